//! C4: Job Registry.
//!
//! The authoritative set of configured jobs per channel and their run
//! state (§4.4). A single `parking_lot::Mutex` guards the map; callers
//! hold it only for the duration of a lookup/mutation, never across an
//! await point.

use std::collections::{HashMap, HashSet};

use cln_rpc::primitives::{PublicKey, ShortChannelId};
use parking_lot::Mutex;

use crate::errors::SlingError;
use crate::graph::GraphSnapshot;
use crate::model::{CandidateSet, Job, JobKind, JobRunState, SatDirection};

pub struct JobRegistry {
    jobs: Mutex<HashMap<ShortChannelId, Job>>,
    run_state: Mutex<HashMap<ShortChannelId, JobRunState>>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        JobRegistry {
            jobs: Mutex::new(HashMap::new()),
            run_state: Mutex::new(HashMap::new()),
        }
    }

    fn is_owned(graph: &GraphSnapshot, my_id: &PublicKey, scid: &ShortChannelId) -> bool {
        graph
            .edge_either_direction(scid)
            .iter()
            .any(|e| &e.from_node == my_id || &e.to_node == my_id)
    }

    /// Checks whether `candidate` already appears as the target of, or in
    /// the candidate list of, another job of the same direction (§4.4).
    fn candidate_conflict(
        &self,
        own_scid: &ShortChannelId,
        candidate: &ShortChannelId,
        direction: SatDirection,
    ) -> bool {
        let jobs = self.jobs.lock();
        jobs.values().any(|j| {
            &j.scid != own_scid
                && j.direction == direction
                && (&j.scid == candidate || j.candidates.contains(candidate))
        })
    }

    pub fn validate_and_add(
        &self,
        job: Job,
        graph: &GraphSnapshot,
        my_id: &PublicKey,
    ) -> Result<(), SlingError> {
        self.validate(&job, graph, my_id)?;
        let mut jobs_snapshot = self.list();
        jobs_snapshot.push(job.clone());
        check_no_cross_job_conflicts(&jobs_snapshot)?;
        self.jobs.lock().insert(job.scid, job.clone());
        self.run_state.lock().insert(job.scid, JobRunState::Stopped);
        Ok(())
    }

    pub fn validate_and_replace(
        &self,
        job: Job,
        graph: &GraphSnapshot,
        my_id: &PublicKey,
    ) -> Result<(), SlingError> {
        // replace bypasses the "already exists" check but keeps the rest.
        self.validate_candidates_and_ownership(&job, graph, my_id)?;
        self.jobs.lock().insert(job.scid, job.clone());
        self.run_state
            .lock()
            .entry(job.scid)
            .or_insert(JobRunState::Stopped);
        Ok(())
    }

    fn validate(
        &self,
        job: &Job,
        graph: &GraphSnapshot,
        my_id: &PublicKey,
    ) -> Result<(), SlingError> {
        if self.jobs.lock().contains_key(&job.scid) {
            return Err(SlingError::validation(
                "There is already a job for that scid!",
            ));
        }
        self.validate_candidates_and_ownership(job, graph, my_id)
    }

    fn validate_candidates_and_ownership(
        &self,
        job: &Job,
        graph: &GraphSnapshot,
        my_id: &PublicKey,
    ) -> Result<(), SlingError> {
        if !graph.contains_scid(&job.scid) || !Self::is_owned(graph, my_id, &job.scid) {
            return Err(SlingError::validation(format!(
                "channel {} not found or not ours",
                job.scid
            )));
        }

        if job.candidates.contains(&job.scid) {
            return Err(SlingError::validation(format!(
                "scid {} can't be its own candidate",
                job.scid
            )));
        }

        if let Some(candidates) = job.candidates.scids() {
            for candidate in candidates {
                if !graph.contains_scid(candidate) || !Self::is_owned(graph, my_id, candidate) {
                    return Err(SlingError::validation(format!(
                        "candidate {} not found or not ours",
                        candidate
                    )));
                }
                if self.candidate_conflict(&job.scid, candidate, job.direction) {
                    return Err(SlingError::validation(format!(
                        "candidate {} has a {}-job",
                        candidate, job.direction
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn add_once(
        &self,
        job: Job,
        graph: &GraphSnapshot,
        my_id: &PublicKey,
    ) -> Result<(), SlingError> {
        debug_assert!(matches!(job.kind, JobKind::Once { .. }));
        if let Some(existing) = self.jobs.lock().get(&job.scid) {
            if matches!(existing.kind, JobKind::Once { .. }) {
                return Err(SlingError::validation(
                    "Once-job is currently running for this channel",
                ));
            }
        }
        self.validate_candidates_and_ownership(&job, graph, my_id)?;
        self.jobs.lock().insert(job.scid, job.clone());
        self.run_state.lock().insert(job.scid, JobRunState::Stopped);
        Ok(())
    }

    pub fn delete(&self, target: DeleteTarget) {
        match target {
            DeleteTarget::All => {
                self.jobs.lock().clear();
                self.run_state.lock().clear();
            }
            DeleteTarget::Scid(scid) => {
                self.jobs.lock().remove(&scid);
                self.run_state.lock().remove(&scid);
            }
        }
    }

    pub fn list(&self) -> Vec<Job> {
        self.jobs.lock().values().cloned().collect()
    }

    pub fn get(&self, scid: &ShortChannelId) -> Option<Job> {
        self.jobs.lock().get(scid).cloned()
    }

    pub fn scids(&self) -> Vec<ShortChannelId> {
        self.jobs.lock().keys().copied().collect()
    }

    pub fn set_run_state(&self, scid: ShortChannelId, state: JobRunState) {
        self.run_state.lock().insert(scid, state);
    }

    pub fn run_state(&self, scid: &ShortChannelId) -> Option<JobRunState> {
        self.run_state.lock().get(scid).cloned()
    }

    pub fn run_states(&self) -> HashMap<ShortChannelId, JobRunState> {
        self.run_state.lock().clone()
    }

    /// Records delivered progress for a `Once` job; returns `true` once the
    /// job has met its total and should be torn down (§4.4, §4.7).
    pub fn record_once_delivery(&self, scid: &ShortChannelId, delivered_msat: u64) -> bool {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.get_mut(scid) {
            if let JobKind::Once {
                total_amount_msat,
                delivered_msat: current,
            } = &mut job.kind
            {
                *current += delivered_msat;
                return *current >= *total_amount_msat;
            }
        }
        false
    }

    /// Restores previously-validated jobs from disk at startup, bypassing
    /// ownership/candidate checks (the graph isn't populated yet).
    pub fn load(&self, jobs: Vec<Job>) {
        let mut map = self.jobs.lock();
        let mut run_state = self.run_state.lock();
        for job in jobs {
            run_state.entry(job.scid).or_insert(JobRunState::Stopped);
            map.insert(job.scid, job);
        }
    }

    /// `sling-except-chan add/remove/list` (§B supplement): except lists are
    /// applied to every currently configured job, since they describe
    /// channels/peers that should never be used as a route hop regardless
    /// of which job is searching.
    pub fn except_chan_add(&self, scid: &ShortChannelId) -> Result<(), SlingError> {
        if self.jobs.lock().contains_key(scid) {
            return Err(SlingError::validation(
                "You can't except your own channels",
            ));
        }
        for job in self.jobs.lock().values_mut() {
            job.except_channels.insert(*scid);
        }
        Ok(())
    }

    pub fn except_chan_remove(&self, scid: &ShortChannelId) {
        for job in self.jobs.lock().values_mut() {
            job.except_channels.remove(scid);
        }
    }

    pub fn except_chan_list(&self) -> HashSet<ShortChannelId> {
        self.jobs
            .lock()
            .values()
            .flat_map(|j| j.except_channels.iter().copied())
            .collect()
    }

    pub fn except_peer_add(&self, peer: PublicKey) {
        for job in self.jobs.lock().values_mut() {
            job.except_peers.insert(peer);
        }
    }

    pub fn except_peer_remove(&self, peer: &PublicKey) {
        for job in self.jobs.lock().values_mut() {
            job.except_peers.remove(peer);
        }
    }

    pub fn except_peer_list(&self) -> HashSet<PublicKey> {
        self.jobs
            .lock()
            .values()
            .flat_map(|j| j.except_peers.iter().copied())
            .collect()
    }
}

pub enum DeleteTarget {
    All,
    Scid(ShortChannelId),
}

/// Checks the cross-job exclusivity invariant from §3/§8: a scid cannot be
/// the target of a `pull` job and also appear as a candidate in another
/// `pull` job (symmetrically for `push`).
pub fn check_no_cross_job_conflicts(jobs: &[Job]) -> Result<(), SlingError> {
    let mut pull_targets = HashSet::new();
    let mut push_targets = HashSet::new();
    let mut pull_candidates = HashSet::new();
    let mut push_candidates = HashSet::new();

    for job in jobs {
        match job.direction {
            SatDirection::Pull => {
                pull_targets.insert(job.scid);
                if let Some(set) = job.candidates.scids() {
                    pull_candidates.extend(set.iter().copied());
                }
            }
            SatDirection::Push => {
                push_targets.insert(job.scid);
                if let Some(set) = job.candidates.scids() {
                    push_candidates.extend(set.iter().copied());
                }
            }
        }
    }

    for scid in &pull_targets {
        if pull_candidates.contains(scid) {
            return Err(SlingError::validation(format!(
                "candidate {} has a pull-job",
                scid
            )));
        }
    }
    for scid in &push_targets {
        if push_candidates.contains(scid) {
            return Err(SlingError::validation(format!(
                "candidate {} has a push-job",
                scid
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn job(scid: &str, direction: SatDirection, candidates: CandidateSet) -> Job {
        Job {
            scid: ShortChannelId::from_str(scid).unwrap(),
            direction,
            amount_msat: 100_000_000,
            max_ppm: 1000,
            out_ppm: 1000,
            target_ratio: 0.5,
            depleteuptopercent: 0.2,
            depleteuptoamount_msat: 2_000_000_000,
            max_hops: 8,
            candidates,
            except_channels: Default::default(),
            except_peers: Default::default(),
            parallel_jobs: 1,
            kind: JobKind::Recurring,
        }
    }

    #[test]
    fn scid_cannot_be_own_candidate() {
        let mut set = HashSet::new();
        set.insert(ShortChannelId::from_str("1x1x0").unwrap());
        let j = job("1x1x0", SatDirection::Pull, CandidateSet::Scids(set));
        assert!(j.candidates.contains(&j.scid));
    }

    #[test]
    fn cross_job_pull_conflict_detected() {
        let mut cands = HashSet::new();
        cands.insert(ShortChannelId::from_str("2x2x0").unwrap());
        let jobs = vec![
            job("2x2x0", SatDirection::Pull, CandidateSet::All),
            job("3x3x0", SatDirection::Pull, CandidateSet::Scids(cands)),
        ];
        assert!(check_no_cross_job_conflicts(&jobs).is_err());
    }

    #[test]
    fn push_and_pull_do_not_conflict_with_each_other() {
        let mut cands = HashSet::new();
        cands.insert(ShortChannelId::from_str("2x2x0").unwrap());
        let jobs = vec![
            job("2x2x0", SatDirection::Push, CandidateSet::All),
            job("3x3x0", SatDirection::Pull, CandidateSet::Scids(cands)),
        ];
        assert!(check_no_cross_job_conflicts(&jobs).is_ok());
    }
}
