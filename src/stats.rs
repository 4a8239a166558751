//! C3: Stats Store.
//!
//! An append-only log of successful and failed rebalance attempts, kept as
//! an in-memory ring per scid (synchronous) and mirrored to disk
//! (asynchronous, via a single serializer — see `persist.rs`). Pruned
//! independently for successes and failures, by age and by size (§4.3).

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use cln_rpc::primitives::ShortChannelId;
use parking_lot::Mutex;

use crate::model::{ChannelPartnerStats, PerChannelStats, StatsKind, StatsRecord, WindowStats};

#[derive(Debug, Clone, Copy)]
pub struct PrunePolicy {
    pub success_age_secs: u64,
    pub success_size: u64,
    pub failure_age_secs: u64,
    pub failure_size: u64,
}

pub struct StatsStore {
    records: Mutex<HashMap<ShortChannelId, VecDeque<StatsRecord>>>,
    policy: Mutex<PrunePolicy>,
    persist_tx: Mutex<Option<tokio::sync::mpsc::UnboundedSender<StatsRecord>>>,
}

impl StatsStore {
    pub fn new(policy: PrunePolicy) -> Self {
        StatsStore {
            records: Mutex::new(HashMap::new()),
            policy: Mutex::new(policy),
            persist_tx: Mutex::new(None),
        }
    }

    pub fn set_policy(&self, policy: PrunePolicy) {
        *self.policy.lock() = policy;
    }

    /// Wires up the async serializer task's channel; calls to `append`
    /// after this enqueue a clone for disk persistence.
    pub fn set_persist_channel(&self, tx: tokio::sync::mpsc::UnboundedSender<StatsRecord>) {
        *self.persist_tx.lock() = Some(tx);
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    /// Synchronous append to the in-memory ring, followed by an
    /// asynchronous enqueue to disk (§4.3, §5).
    pub fn append(&self, record: StatsRecord) {
        if let Some(tx) = self.persist_tx.lock().as_ref() {
            let _ = tx.send(record.clone());
        }
        let mut records = self.records.lock();
        let ring = records.entry(record.scid).or_default();
        ring.push_back(record);
        drop(records);
        self.prune_all();
    }

    /// Prunes every channel's ring against the current policy. Called
    /// after every append and by the periodic background pruner (§5).
    pub fn prune_all(&self) {
        let policy = *self.policy.lock();
        let now = Self::now();
        let mut records = self.records.lock();
        for ring in records.values_mut() {
            prune_ring(ring, &policy, now);
        }
    }

    /// `summary()` restricted to scids that currently have a job, per §4.3.
    pub fn summary(&self, job_scids: &[ShortChannelId]) -> HashMap<ShortChannelId, PerChannelStats> {
        job_scids
            .iter()
            .map(|scid| (*scid, self.per_channel(*scid)))
            .collect()
    }

    /// `per_channel(scid)` per §4.3. `alias_of` resolves a node-adjacent
    /// scid's partner alias (owned by C1, passed in to avoid a dependency
    /// cycle between C1 and C3).
    pub fn per_channel(&self, scid: ShortChannelId) -> PerChannelStats {
        self.per_channel_with_aliases(scid, &HashMap::new())
    }

    pub fn per_channel_with_aliases(
        &self,
        scid: ShortChannelId,
        alias_of: &HashMap<ShortChannelId, String>,
    ) -> PerChannelStats {
        let records = self.records.lock();
        let empty = VecDeque::new();
        let ring = records.get(&scid).unwrap_or(&empty);

        let mut success_amounts: HashMap<ShortChannelId, (u64, u64)> = HashMap::new(); // scid -> (sats, most_recent_ts)
        let mut success_total_sats = 0u64;
        let mut failure_total_sats = 0u64;
        let mut failure_partner_amounts: HashMap<ShortChannelId, (u64, u64)> = HashMap::new();

        for rec in ring.iter() {
            let sats = rec.amount_msat / crate::model::MSAT_PER_SAT;
            match &rec.kind {
                StatsKind::Success { route, .. } => {
                    success_total_sats += sats;
                    if let Some(partner) = rec.partner_scid(route) {
                        let entry = success_amounts.entry(partner).or_insert((0, 0));
                        entry.0 += sats;
                        entry.1 = entry.1.max(rec.timestamp);
                    }
                }
                StatsKind::Failure { .. } => {
                    failure_total_sats += sats;
                    // failures don't carry a resolved route; attribute to
                    // the job's own scid as a best-effort partner bucket.
                    let entry = failure_partner_amounts.entry(rec.scid).or_insert((0, 0));
                    entry.0 += sats;
                    entry.1 = entry.1.max(rec.timestamp);
                }
            }
        }

        PerChannelStats {
            successes_in_time_window: WindowStats {
                total_amount_sats: success_total_sats,
                top_5_channel_partners: top_5(&success_amounts, alias_of),
            },
            failures_in_time_window: WindowStats {
                total_amount_sats: failure_total_sats,
                top_5_channel_partners: top_5(&failure_partner_amounts, alias_of),
            },
        }
    }
}

fn top_5(
    amounts: &HashMap<ShortChannelId, (u64, u64)>,
    alias_of: &HashMap<ShortChannelId, String>,
) -> Vec<ChannelPartnerStats> {
    let mut entries: Vec<(ShortChannelId, u64, u64)> =
        amounts.iter().map(|(k, (sats, ts))| (*k, *sats, *ts)).collect();
    // rank by sats desc, tie-break by most recent success (ts desc)
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));
    entries
        .into_iter()
        .take(5)
        .map(|(scid, sats, _)| ChannelPartnerStats {
            scid: scid.to_string(),
            alias: alias_of
                .get(&scid)
                .cloned()
                .unwrap_or_else(|| crate::model::PLUGIN_NAME.to_string()),
            sats,
        })
        .collect()
}

fn prune_ring(ring: &mut VecDeque<StatsRecord>, policy: &PrunePolicy, now: u64) {
    if policy.success_age_secs > 0 || policy.failure_age_secs > 0 {
        ring.retain(|rec| match &rec.kind {
            StatsKind::Success { .. } => {
                policy.success_age_secs == 0
                    || now.saturating_sub(rec.timestamp) < policy.success_age_secs
            }
            StatsKind::Failure { .. } => {
                policy.failure_age_secs == 0
                    || now.saturating_sub(rec.timestamp) < policy.failure_age_secs
            }
        });
    }

    if policy.success_size > 0 {
        prune_size(ring, policy.success_size, |r| matches!(r.kind, StatsKind::Success { .. }));
    }
    if policy.failure_size > 0 {
        prune_size(ring, policy.failure_size, |r| matches!(r.kind, StatsKind::Failure { .. }));
    }
}

/// Drops the oldest matching records (FIFO by timestamp, since the ring is
/// already append-ordered) until at most `max` remain for that class.
fn prune_size(ring: &mut VecDeque<StatsRecord>, max: u64, matches: impl Fn(&StatsRecord) -> bool) {
    let count = ring.iter().filter(|r| matches(r)).count() as u64;
    if count <= max {
        return;
    }
    let mut to_drop = count - max;
    let mut i = 0;
    while i < ring.len() && to_drop > 0 {
        if matches(&ring[i]) {
            ring.remove(i);
            to_drop -= 1;
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SatDirection;
    use std::str::FromStr;

    fn scid(n: u64) -> ShortChannelId {
        ShortChannelId::from_str(&format!("{}x{}x0", n, n)).unwrap()
    }

    fn success(scid_: ShortChannelId, ts: u64, partner: ShortChannelId, sats: u64) -> StatsRecord {
        StatsRecord {
            scid: scid_,
            timestamp: ts,
            direction: SatDirection::Pull,
            amount_msat: sats * 1000,
            kind: StatsKind::Success {
                fee_msat: 10,
                route: vec![partner, scid_],
            },
        }
    }

    fn failure(scid_: ShortChannelId, ts: u64) -> StatsRecord {
        StatsRecord {
            scid: scid_,
            timestamp: ts,
            direction: SatDirection::Pull,
            amount_msat: 100_000,
            kind: StatsKind::Failure {
                at_hop: 1,
                code: "temporary_channel_failure".to_string(),
            },
        }
    }

    #[test]
    fn total_amount_is_monotonic_until_pruned() {
        let store = StatsStore::new(PrunePolicy {
            success_age_secs: 0,
            success_size: 0,
            failure_age_secs: 0,
            failure_size: 0,
        });
        let target = scid(1);
        store.append(success(target, 1, scid(2), 100));
        let first = store.per_channel(target).successes_in_time_window.total_amount_sats;
        store.append(success(target, 2, scid(2), 50));
        let second = store.per_channel(target).successes_in_time_window.total_amount_sats;
        assert!(second >= first);
    }

    #[test]
    fn size_pruning_drops_oldest_first() {
        let store = StatsStore::new(PrunePolicy {
            success_age_secs: 0,
            success_size: 2,
            failure_age_secs: 0,
            failure_size: 0,
        });
        let target = scid(1);
        for i in 0..5 {
            store.append(success(target, i, scid(2), 10));
        }
        let stats = store.per_channel(target);
        // only the last 2 successes (10+10=20 sats) should survive
        assert_eq!(stats.successes_in_time_window.total_amount_sats, 20);
    }

    #[test]
    fn top_5_partners_ranked_by_total_sats() {
        let store = StatsStore::new(PrunePolicy {
            success_age_secs: 0,
            success_size: 0,
            failure_age_secs: 0,
            failure_size: 0,
        });
        let target = scid(1);
        store.append(success(target, 1, scid(2), 100));
        store.append(success(target, 2, scid(3), 500));
        let stats = store.per_channel(target);
        assert_eq!(
            stats.successes_in_time_window.top_5_channel_partners[0].scid,
            scid(3).to_string()
        );
    }

    #[test]
    fn age_pruning_disabled_at_zero() {
        let store = StatsStore::new(PrunePolicy {
            success_age_secs: 0,
            success_size: 0,
            failure_age_secs: 0,
            failure_size: 0,
        });
        let target = scid(1);
        store.append(failure(target, 0));
        store.prune_all();
        assert_eq!(store.per_channel(target).failures_in_time_window.total_amount_sats, 100);
    }
}
