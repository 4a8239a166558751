//! Persistence for `jobs.json`, `liquidity.json`, and the per-scid stats
//! log under `<lightning-dir>/sling/` (§6, §9).
//!
//! Writers to the stats log are serialized through a single background
//! task that drains an mpsc channel (§5): workers enqueue, one task
//! appends. Corrupt files are logged and treated as empty state, never
//! fatal (§7).

use std::path::{Path, PathBuf};

use cln_rpc::primitives::ShortChannelId;
use log::{error, warn};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::liquidity::LiquidityStore;
use crate::model::{Job, StatsRecord, STATS_DIR_NAME};

pub async fn save_liquidity(path: &Path, store: &LiquidityStore) -> anyhow::Result<()> {
    let json = store.to_persisted_json()?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

/// Loads beliefs from `liquidity.json`. Missing or corrupt files are
/// treated as "no prior beliefs" rather than propagated as an error.
pub async fn load_liquidity(path: &Path, store: &LiquidityStore) {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            if let Err(e) = store.load_from_json(&contents) {
                error!("sling: corrupt {}: {}, starting with no prior beliefs", path.display(), e);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("sling: failed reading {}: {}", path.display(), e),
    }
}

pub async fn save_jobs(path: &Path, jobs: &[Job]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(jobs)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

/// Loads jobs from `jobs.json`. A corrupt file is logged and treated as
/// empty (§7); the caller ends up with no configured jobs rather than a
/// fatal startup error.
pub async fn load_jobs(path: &Path) -> Vec<Job> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let trimmed = contents.trim();
            if trimmed.is_empty() {
                return Vec::new();
            }
            match serde_json::from_str::<Vec<Job>>(trimmed) {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!("sling: corrupt {}: {}, starting with no jobs", path.display(), e);
                    Vec::new()
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            warn!("sling: failed reading {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

pub fn stats_file_path(sling_dir: &Path, scid: ShortChannelId) -> PathBuf {
    sling_dir.join(STATS_DIR_NAME).join(format!("{}.jsonl", scid))
}

/// The single serializer task for the stats log (§5): appends each
/// incoming record to its scid's file, one line of JSON per record.
pub async fn run_stats_serializer(sling_dir: PathBuf, mut rx: UnboundedReceiver<StatsRecord>) {
    let stats_dir = sling_dir.join(STATS_DIR_NAME);
    if let Err(e) = tokio::fs::create_dir_all(&stats_dir).await {
        error!("sling: could not create stats directory: {}", e);
        return;
    }
    while let Some(record) = rx.recv().await {
        let path = stats_file_path(&sling_dir, record.scid);
        let line = match serde_json::to_string(&record) {
            Ok(s) => s,
            Err(e) => {
                error!("sling: failed to serialize stats record: {}", e);
                continue;
            }
        };
        let result: anyhow::Result<()> = async {
            let mut file = OpenOptions::new().append(true).create(true).open(&path).await?;
            file.write_all(format!("{}\n", line).as_bytes()).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            error!("sling: failed to append stats record to {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn corrupt_jobs_file_becomes_empty_state() {
        let dir = tempdir();
        let path = dir.join("jobs.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        let jobs = load_jobs(&path).await;
        assert!(jobs.is_empty());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn empty_liquidity_file_is_legal() {
        let store = LiquidityStore::new();
        let dir = tempdir();
        let path = dir.join("liquidity.json");
        tokio::fs::write(&path, "[]").await.unwrap();
        load_liquidity(&path, &store).await;
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sling-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
