//! Control RPC surface (§6). Thin dispatch: parses/validates the request,
//! calls into the engine, and serializes the result. The wire transport
//! itself (registering these as `cln_plugin` rpc methods) is out of scope
//! and lives in `main.rs`.

use std::collections::HashSet;
use std::str::FromStr;

use cln_rpc::primitives::{PublicKey, ShortChannelId};
use serde::Deserialize;
use serde_json::{json, Value};

use tabled::settings::Style;
use tabled::Table;

use crate::errors::SlingError;
use crate::jobs::DeleteTarget;
use crate::model::{CandidateSet, Job, JobKind, SatDirection, StatSummaryRow};
use crate::state::EngineState;

#[derive(Debug, Deserialize)]
pub struct JobParams {
    pub scid: String,
    pub direction: String,
    pub amount: u64,
    pub maxppm: u32,
    #[serde(default)]
    pub outppm: Option<u32>,
    #[serde(default)]
    pub target: Option<f64>,
    #[serde(default)]
    pub depleteuptopercent: Option<f64>,
    #[serde(default)]
    pub depleteuptoamount: Option<u64>,
    #[serde(default)]
    pub maxhops: Option<u8>,
    #[serde(default)]
    pub candidates: Option<Vec<String>>,
    #[serde(default)]
    pub paralleljobs: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct OnceParams {
    #[serde(flatten)]
    pub job: JobParams,
    pub total_amount: u64,
}

fn parse_scid(s: &str) -> Result<ShortChannelId, SlingError> {
    ShortChannelId::from_str(s).map_err(|_| SlingError::validation(format!("invalid scid {}", s)))
}

fn build_job(
    params: &JobParams,
    config: &crate::config::Config,
    kind: JobKind,
) -> Result<Job, SlingError> {
    let scid = parse_scid(&params.scid)?;
    let direction = SatDirection::from_str(&params.direction)
        .map_err(|e| SlingError::validation(e.to_string()))?;
    let candidates = match &params.candidates {
        None => CandidateSet::All,
        Some(list) if list.len() == 1 && list[0].eq_ignore_ascii_case("all") => CandidateSet::All,
        Some(list) => {
            let mut set = HashSet::new();
            for c in list {
                set.insert(parse_scid(c)?);
            }
            CandidateSet::Scids(set)
        }
    };
    let depleteuptopercent = params
        .depleteuptopercent
        .unwrap_or(config.depleteuptopercent.1);
    let depleteuptoamount_msat = params
        .depleteuptoamount
        .map(|s| s * crate::model::MSAT_PER_SAT)
        .unwrap_or(config.depleteuptoamount.1);
    let max_hops = params.maxhops.unwrap_or(config.maxhops.1);
    let parallel_jobs = params.paralleljobs.unwrap_or(config.paralleljobs.1);
    let out_ppm = params.outppm.unwrap_or(0);

    Ok(Job {
        scid,
        direction,
        amount_msat: params.amount * crate::model::MSAT_PER_SAT,
        max_ppm: params.maxppm,
        out_ppm,
        target_ratio: params.target.unwrap_or(0.5),
        depleteuptopercent,
        depleteuptoamount_msat,
        max_hops,
        candidates,
        except_channels: HashSet::new(),
        except_peers: HashSet::new(),
        parallel_jobs,
        kind,
    })
}

pub async fn sling_version() -> Value {
    json!({ "version": env!("CARGO_PKG_VERSION") })
}

pub async fn sling_job(state: &EngineState, params: JobParams) -> Result<Value, SlingError> {
    let config = state.config.lock().clone();
    let job = build_job(&params, &config, JobKind::Recurring)?;
    let graph = state.graph.current();
    let my_id = state.host.get_info().await.map_err(SlingError::Internal)?;
    state.jobs.validate_and_add(job, &graph, &my_id)?;
    state.persist_jobs().await;
    Ok(json!({"result": "ok"}))
}

pub async fn sling_once(state: &EngineState, params: OnceParams) -> Result<Value, SlingError> {
    let config = state.config.lock().clone();
    let job = build_job(
        &params.job,
        &config,
        JobKind::Once {
            total_amount_msat: params.total_amount * crate::model::MSAT_PER_SAT,
            delivered_msat: 0,
        },
    )?;
    let graph = state.graph.current();
    let my_id = state.host.get_info().await.map_err(SlingError::Internal)?;
    state.jobs.add_once(job, &graph, &my_id)?;
    state.persist_jobs().await;
    Ok(json!({"result": "ok"}))
}

pub async fn sling_go(
    state: &EngineState,
    scid: Option<String>,
) -> Result<Value, SlingError> {
    let scid = scid.map(|s| parse_scid(&s)).transpose()?;
    let config = state.config.lock().clone();
    state.controller.go(
        scid,
        config.max_htlc_count.1 as u32,
        config.timeoutpay.1,
        config.candidates_min_age.1,
    );
    Ok(json!({"result": "ok"}))
}

pub async fn sling_stop(state: &EngineState, scid: Option<String>) -> Result<Value, SlingError> {
    let scid = scid.map(|s| parse_scid(&s)).transpose()?;
    state.controller.stop(scid);
    Ok(json!({"result": "ok"}))
}

pub async fn sling_deletejob(state: &EngineState, target: String) -> Result<Value, SlingError> {
    if target == "all" {
        state.jobs.delete(DeleteTarget::All);
    } else {
        state.jobs.delete(DeleteTarget::Scid(parse_scid(&target)?));
    }
    state.persist_jobs().await;
    Ok(json!({"result": "ok"}))
}

pub enum StatsQuery {
    Summary,
    Channel(String),
    Live,
}

pub async fn sling_stats(state: &EngineState, query: StatsQuery) -> Result<Value, SlingError> {
    match query {
        StatsQuery::Summary => {
            let scids = state.jobs.scids();
            let summary = state.stats.summary(&scids);
            let rows: Vec<StatSummaryRow> = summary
                .iter()
                .map(|(scid, s)| StatSummaryRow::from_per_channel(*scid, s))
                .collect();
            let table = Table::new(&rows).with(Style::rounded()).to_string();
            let map: serde_json::Map<String, Value> = summary
                .into_iter()
                .map(|(scid, s)| (scid.to_string(), serde_json::to_value(s).unwrap()))
                .collect();
            Ok(json!({"result": map, "format-hint": "simple", "table": table}))
        }
        StatsQuery::Channel(scid) => {
            let scid = parse_scid(&scid)?;
            let stats = state.stats.per_channel(scid);
            Ok(serde_json::to_value(stats).map_err(|e| SlingError::Internal(e.into()))?)
        }
        StatsQuery::Live => {
            let scids = state.jobs.scids();
            let mut map = serde_json::Map::new();
            for scid in scids {
                let status = state.controller.live_status(scid);
                map.insert(scid.to_string(), json!(status));
            }
            Ok(json!({"result": map}))
        }
    }
}

pub async fn sling_except_chan(
    state: &EngineState,
    action: String,
    scid: Option<String>,
) -> Result<Value, SlingError> {
    match action.as_str() {
        "add" => {
            let scid = parse_scid(&scid.ok_or_else(|| SlingError::validation("scid is required"))?)?;
            state.jobs.except_chan_add(&scid)?;
            Ok(json!({"result": "ok"}))
        }
        "remove" => {
            let scid = parse_scid(&scid.ok_or_else(|| SlingError::validation("scid is required"))?)?;
            state.jobs.except_chan_remove(&scid);
            Ok(json!({"result": "ok"}))
        }
        "list" => {
            let list: Vec<String> = state
                .jobs
                .except_chan_list()
                .iter()
                .map(|s| s.to_string())
                .collect();
            Ok(json!({"result": list}))
        }
        other => Err(SlingError::validation(format!("unknown action {}", other))),
    }
}

pub async fn sling_except_peer(
    state: &EngineState,
    action: String,
    peer: Option<PublicKey>,
) -> Result<Value, SlingError> {
    match action.as_str() {
        "add" => {
            let peer = peer.ok_or_else(|| SlingError::validation("peer id is required"))?;
            state.jobs.except_peer_add(peer);
            Ok(json!({"result": "ok"}))
        }
        "remove" => {
            let peer = peer.ok_or_else(|| SlingError::validation("peer id is required"))?;
            state.jobs.except_peer_remove(&peer);
            Ok(json!({"result": "ok"}))
        }
        "list" => {
            let list: Vec<String> = state
                .jobs
                .except_peer_list()
                .iter()
                .map(|p| p.to_string())
                .collect();
            Ok(json!({"result": list}))
        }
        other => Err(SlingError::validation(format!("unknown action {}", other))),
    }
}
