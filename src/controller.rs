//! C7: Job Controller.
//!
//! Per active job, spawns `parallel_jobs` workers running the loop from
//! §4.7: search for a route, execute it, and back off when balanced or
//! when no route exists. Workers on the same job share an exclude-set so
//! they never race each other onto the same candidate route.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cln_rpc::primitives::ShortChannelId;
use log::info;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::graph::GraphCache;
use crate::host::HostClient;
use crate::jobs::JobRegistry;
use crate::liquidity::LiquidityStore;
use crate::model::{Job, JobRunState, WorkerStatus};
use crate::routing::{build_exclude_chans, search, RouteSearchParams};
use crate::stats::StatsStore;

/// How long an idle worker sleeps between iterations when balanced or
/// without a candidate route. Not named as a tunable option in the spec's
/// configuration table; fixed here and documented in DESIGN.md.
const BACK_OFF: Duration = Duration::from_secs(10);

pub struct Controller {
    host: Arc<dyn HostClient>,
    graph: Arc<GraphCache>,
    liquidity: Arc<LiquidityStore>,
    stats: Arc<StatsStore>,
    jobs: Arc<JobRegistry>,
    stop_flags: SyncMutex<HashMap<ShortChannelId, Arc<AtomicBool>>>,
    exclude_sets: SyncMutex<HashMap<ShortChannelId, Arc<AsyncMutex<HashSet<ShortChannelId>>>>>,
}

impl Controller {
    pub fn new(
        host: Arc<dyn HostClient>,
        graph: Arc<GraphCache>,
        liquidity: Arc<LiquidityStore>,
        stats: Arc<StatsStore>,
        jobs: Arc<JobRegistry>,
    ) -> Self {
        Controller {
            host,
            graph,
            liquidity,
            stats,
            jobs,
            stop_flags: SyncMutex::new(HashMap::new()),
            exclude_sets: SyncMutex::new(HashMap::new()),
        }
    }

    /// `sling-go`: starts (or restarts) the given scid, or every configured
    /// job when `scid` is `None`.
    pub fn go(self: &Arc<Self>, scid: Option<ShortChannelId>, max_htlc_count: u32, timeoutpay: u64, candidates_min_age: u32) {
        let targets = match scid {
            Some(s) => vec![s],
            None => self.jobs.scids(),
        };
        for scid in targets {
            self.spawn_job(scid, max_htlc_count, timeoutpay, candidates_min_age);
        }
    }

    /// `sling-stop`: cooperatively stops the given scid, or every running
    /// job when `scid` is `None` (§4.7).
    pub fn stop(&self, scid: Option<ShortChannelId>) {
        let flags = self.stop_flags.lock();
        let targets: Vec<ShortChannelId> = match scid {
            Some(s) => vec![s],
            None => flags.keys().copied().collect(),
        };
        for scid in &targets {
            if let Some(flag) = flags.get(scid) {
                flag.store(true, Ordering::SeqCst);
            }
            self.jobs.set_run_state(*scid, JobRunState::Stopping);
        }
        info!("sling: Stopping job...");
    }

    fn spawn_job(
        self: &Arc<Self>,
        scid: ShortChannelId,
        max_htlc_count: u32,
        timeoutpay: u64,
        candidates_min_age: u32,
    ) {
        let Some(job) = self.jobs.get(&scid) else {
            return;
        };
        let stop_flag = Arc::new(AtomicBool::new(false));
        self.stop_flags.lock().insert(scid, stop_flag.clone());
        let exclude_set = self
            .exclude_sets
            .lock()
            .entry(scid)
            .or_insert_with(|| Arc::new(AsyncMutex::new(HashSet::new())))
            .clone();

        let worker_count = job.parallel_jobs.max(1);
        self.jobs.set_run_state(
            scid,
            JobRunState::Running {
                per_worker_status: vec![WorkerStatus::Idle; worker_count as usize],
            },
        );

        for worker_id in 0..worker_count {
            let this = self.clone();
            let stop_flag = stop_flag.clone();
            let exclude_set = exclude_set.clone();
            tokio::spawn(async move {
                this.run_worker(
                    scid,
                    worker_id,
                    stop_flag,
                    exclude_set,
                    max_htlc_count,
                    timeoutpay,
                    candidates_min_age,
                )
                .await;
            });
        }
    }

    fn set_worker_status(&self, scid: ShortChannelId, worker_id: u16, status: WorkerStatus) {
        if let Some(JobRunState::Running { mut per_worker_status }) = self.jobs.run_state(&scid) {
            if let Some(slot) = per_worker_status.get_mut(worker_id as usize) {
                *slot = status;
            }
            self.jobs
                .set_run_state(scid, JobRunState::Running { per_worker_status });
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_worker(
        self: Arc<Self>,
        scid: ShortChannelId,
        worker_id: u16,
        stop_flag: Arc<AtomicBool>,
        exclude_set: Arc<AsyncMutex<HashSet<ShortChannelId>>>,
        max_htlc_count: u32,
        timeoutpay: u64,
        candidates_min_age: u32,
    ) {
        loop {
            if stop_flag.load(Ordering::SeqCst) {
                self.set_worker_status(scid, worker_id, WorkerStatus::Stopped);
                self.maybe_finalize_stop(scid);
                return;
            }

            let Some(job) = self.jobs.get(&scid) else {
                return;
            };

            let snapshot = self.graph.current();
            let local_channels = match self.host.list_local_channels().await {
                Ok(l) => l,
                Err(_) => {
                    tokio::time::sleep(BACK_OFF).await;
                    continue;
                }
            };
            let Some(target_local) = local_channels.iter().find(|c| c.scid == scid) else {
                self.set_worker_status(
                    scid,
                    worker_id,
                    WorkerStatus::Error(crate::model::ErrorKind::ChanNotInGraph),
                );
                tokio::time::sleep(BACK_OFF).await;
                continue;
            };

            if job.is_balanced(target_local.to_us_msat, target_local.capacity_msat) {
                self.set_worker_status(scid, worker_id, WorkerStatus::Balanced);
                info!("sling: already balanced. Taking a break");
                tokio::time::sleep(BACK_OFF).await;
                continue;
            }

            self.set_worker_status(scid, worker_id, WorkerStatus::SearchingRoute);

            let all_jobs: Vec<Job> = self.jobs.list();
            let (exclude_pull, exclude_push) = build_exclude_chans(&all_jobs);
            let local_spendable: HashMap<ShortChannelId, u64> = local_channels
                .iter()
                .map(|c| (c.scid, c.spendable_msat))
                .collect();
            let channel_ages = HashMap::new();

            let worker_exclude = exclude_set.lock().await.clone();
            let route = {
                let params = RouteSearchParams {
                    job: &job,
                    graph: &snapshot,
                    liquidity: &self.liquidity,
                    amount_msat: job.amount_msat,
                    my_id: match self.host.get_info().await {
                        Ok(id) => id,
                        Err(_) => {
                            tokio::time::sleep(BACK_OFF).await;
                            continue;
                        }
                    },
                    exclude_scids: &worker_exclude,
                    exclude_pull_chans: &exclude_pull,
                    exclude_push_chans: &exclude_push,
                    local_spendable_msat: &local_spendable,
                    max_htlc_count,
                    candidates_min_age_blocks: candidates_min_age,
                    channel_age_blocks: &channel_ages,
                };
                search(&params)
            };

            let Some(route) = route else {
                self.set_worker_status(scid, worker_id, WorkerStatus::NoCandidates);
                tokio::time::sleep(BACK_OFF).await;
                continue;
            };

            let route_scids: Vec<ShortChannelId> = route.iter().map(|e| e.scid).collect();
            exclude_set.lock().await.extend(route_scids.iter().copied());

            self.set_worker_status(scid, worker_id, WorkerStatus::Paying);
            let direction = job.direction;
            let outcome = crate::executor::execute(
                self.host.as_ref(),
                &self.liquidity,
                &self.stats,
                scid,
                direction,
                &route,
                job.amount_msat,
                timeoutpay,
            )
            .await;

            {
                let mut set = exclude_set.lock().await;
                for s in &route_scids {
                    set.remove(s);
                }
            }

            if let Ok(outcome) = outcome {
                if outcome.success {
                    if matches!(job.kind, crate::model::JobKind::Once { .. }) {
                        let done = self.jobs.record_once_delivery(&scid, outcome.delivered_msat);
                        if done {
                            if let Some(flag) = self.stop_flags.lock().get(&scid) {
                                flag.store(true, Ordering::SeqCst);
                            }
                            self.jobs.delete(crate::jobs::DeleteTarget::Scid(scid));
                            info!("sling: Spawned once-job exited");
                        }
                    }
                }
            }

            self.set_worker_status(scid, worker_id, WorkerStatus::Idle);
        }
    }

    fn maybe_finalize_stop(&self, scid: ShortChannelId) {
        if let Some(JobRunState::Running { per_worker_status }) = self.jobs.run_state(&scid) {
            if per_worker_status
                .iter()
                .all(|s| matches!(s, WorkerStatus::Stopped))
            {
                self.jobs.set_run_state(scid, JobRunState::Stopped);
            }
        }
    }

    /// `sling-stats [true]` live status formatting (§4.7):
    /// `["1:Balanced","2:Balanced",...]`.
    pub fn live_status(&self, scid: ShortChannelId) -> Vec<String> {
        match self.jobs.run_state(&scid) {
            Some(JobRunState::Running { per_worker_status }) => per_worker_status
                .iter()
                .enumerate()
                .map(|(i, s)| format!("{}:{}", i + 1, s))
                .collect(),
            _ => Vec::new(),
        }
    }
}
