//! Plugin bootstrap (thin glue, §1 Non-goals: the CLN handshake and wire
//! transport are explicitly out of scope). Wires `cln_plugin` option
//! registration and rpc method dispatch onto the engine in `sling::*`.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use cln_plugin::options::{ConfigOption, Value as OptValue};
use cln_plugin::{Builder, Plugin};
use cln_rpc::ClnRpc;
use serde_json::{json, Value};
use tokio::io::{stdin, stdout};

use sling::config::{
    validate_depleteuptopercent, validate_maxhops, validate_min1, validate_nonnegative,
    validate_paralleljobs, validate_stats_age, Config,
};
use sling::errors::SlingError;
use sling::host_cln::ClnHostClient;
use sling::model::PLUGIN_NAME;
use sling::rpc::{JobParams, OnceParams, StatsQuery};
use sling::state::EngineState;

macro_rules! int_opt {
    ($name:expr, $default:expr) => {
        ConfigOption::new($name, OptValue::Integer($default), "")
            .dynamic()
    };
}

fn register_options(
    builder: Builder<Arc<EngineState>, Value>,
) -> Builder<Arc<EngineState>, Value> {
    let cfg = Config::new();
    builder
        .option(int_opt!(cfg.refresh_peers_interval.0.clone(), cfg.refresh_peers_interval.1 as i64))
        .option(int_opt!(cfg.refresh_aliasmap_interval.0.clone(), cfg.refresh_aliasmap_interval.1 as i64))
        .option(int_opt!(cfg.refresh_graph_interval.0.clone(), cfg.refresh_graph_interval.1 as i64))
        .option(int_opt!(cfg.reset_liquidity_interval.0.clone(), cfg.reset_liquidity_interval.1 as i64))
        .option(ConfigOption::new(
            cfg.depleteuptopercent.0.clone(),
            OptValue::String(cfg.depleteuptopercent.1.to_string()),
            "",
        ).dynamic())
        .option(int_opt!(cfg.depleteuptoamount.0.clone(), cfg.depleteuptoamount.1 as i64))
        .option(int_opt!(cfg.maxhops.0.clone(), cfg.maxhops.1 as i64))
        .option(int_opt!(cfg.candidates_min_age.0.clone(), cfg.candidates_min_age.1 as i64))
        .option(int_opt!(cfg.paralleljobs.0.clone(), cfg.paralleljobs.1 as i64))
        .option(int_opt!(cfg.timeoutpay.0.clone(), cfg.timeoutpay.1 as i64))
        .option(int_opt!(cfg.max_htlc_count.0.clone(), cfg.max_htlc_count.1 as i64))
        .option(int_opt!(cfg.stats_delete_failures_age.0.clone(), cfg.stats_delete_failures_age.1 as i64))
        .option(int_opt!(cfg.stats_delete_failures_size.0.clone(), cfg.stats_delete_failures_size.1 as i64))
        .option(int_opt!(cfg.stats_delete_successes_age.0.clone(), cfg.stats_delete_successes_age.1 as i64))
        .option(int_opt!(cfg.stats_delete_successes_size.0.clone(), cfg.stats_delete_successes_size.1 as i64))
        .option(ConfigOption::new(
            cfg.channel_health.0.clone(),
            OptValue::Boolean(cfg.channel_health.1),
            "",
        ).dynamic())
}

fn read_config<I, O>(
    plugin: &cln_plugin::ConfiguredPlugin<Arc<EngineState>, I, O>,
) -> Result<Config, SlingError>
where
    I: tokio::io::AsyncRead + Send + Unpin + 'static,
    O: tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let mut cfg = Config::new();
    let opt = plugin.option_str(&cfg.refresh_peers_interval.0)?;
    if let Some(OptValue::Integer(v)) = opt {
        cfg.refresh_peers_interval.1 = validate_min1(&cfg.refresh_peers_interval.0, v)?;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.refresh_aliasmap_interval.0)? {
        cfg.refresh_aliasmap_interval.1 = validate_min1(&cfg.refresh_aliasmap_interval.0, v)?;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.refresh_graph_interval.0)? {
        cfg.refresh_graph_interval.1 = validate_min1(&cfg.refresh_graph_interval.0, v)?;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.reset_liquidity_interval.0)? {
        cfg.reset_liquidity_interval.1 = validate_min1(&cfg.reset_liquidity_interval.0, v)?;
    }
    if let Some(OptValue::String(v)) = plugin.option_str(&cfg.depleteuptopercent.0)? {
        let parsed: f64 = v
            .parse()
            .map_err(|_| SlingError::validation("sling-depleteuptopercent must be a number"))?;
        cfg.depleteuptopercent.1 = validate_depleteuptopercent(parsed)?;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.depleteuptoamount.0)? {
        cfg.depleteuptoamount.1 = validate_nonnegative(&cfg.depleteuptoamount.0, v)?;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.maxhops.0)? {
        cfg.maxhops.1 = validate_maxhops(v)?;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.candidates_min_age.0)? {
        cfg.candidates_min_age.1 = validate_nonnegative(&cfg.candidates_min_age.0, v)? as u32;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.paralleljobs.0)? {
        cfg.paralleljobs.1 = validate_paralleljobs(v)?;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.timeoutpay.0)? {
        cfg.timeoutpay.1 = validate_min1(&cfg.timeoutpay.0, v)?;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.max_htlc_count.0)? {
        cfg.max_htlc_count.1 = validate_min1(&cfg.max_htlc_count.0, v)?;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.stats_delete_failures_age.0)? {
        cfg.stats_delete_failures_age.1 = validate_stats_age(&cfg.stats_delete_failures_age.0, v)?;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.stats_delete_failures_size.0)? {
        cfg.stats_delete_failures_size.1 = validate_nonnegative(&cfg.stats_delete_failures_size.0, v)?;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.stats_delete_successes_age.0)? {
        cfg.stats_delete_successes_age.1 = validate_stats_age(&cfg.stats_delete_successes_age.0, v)?;
    }
    if let Some(OptValue::Integer(v)) = plugin.option_str(&cfg.stats_delete_successes_size.0)? {
        cfg.stats_delete_successes_size.1 = validate_nonnegative(&cfg.stats_delete_successes_size.0, v)?;
    }
    if let Some(OptValue::Boolean(v)) = plugin.option_str(&cfg.channel_health.0)? {
        cfg.channel_health.1 = v;
    }
    Ok(cfg)
}

fn sling_dir<I, O>(plugin: &cln_plugin::ConfiguredPlugin<Arc<EngineState>, I, O>) -> PathBuf
where
    I: tokio::io::AsyncRead + Send + Unpin + 'static,
    O: tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    plugin.configuration().lightning_dir.join(PLUGIN_NAME)
}

fn rpc_error(e: SlingError) -> Value {
    json!({"code": e.rpc_code(), "message": e.to_string()})
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::try_init().ok();

    let builder = Builder::new(stdin(), stdout());
    let builder = register_options(builder);

    let plugin = match builder
        .rpcmethod("sling-version", "show the plugin version", |_p: Plugin<Arc<EngineState>>, _v: Value| async move {
            Ok::<Value, Value>(sling::rpc::sling_version().await)
        })
        .rpcmethod("sling-job", "add or replace a rebalance job", |p: Plugin<Arc<EngineState>>, v: Value| async move {
            let params: JobParams = serde_json::from_value(v).map_err(|e| rpc_error(SlingError::validation(e.to_string())))?;
            sling::rpc::sling_job(p.state(), params).await.map_err(rpc_error)
        })
        .rpcmethod("sling-once", "add a one-shot rebalance job", |p: Plugin<Arc<EngineState>>, v: Value| async move {
            let params: OnceParams = serde_json::from_value(v).map_err(|e| rpc_error(SlingError::validation(e.to_string())))?;
            sling::rpc::sling_once(p.state(), params).await.map_err(rpc_error)
        })
        .rpcmethod("sling-go", "start configured jobs", |p: Plugin<Arc<EngineState>>, v: Value| async move {
            let scid = v.get("scid").and_then(|s| s.as_str()).map(|s| s.to_string());
            sling::rpc::sling_go(p.state(), scid).await.map_err(rpc_error)
        })
        .rpcmethod("sling-stop", "stop running jobs", |p: Plugin<Arc<EngineState>>, v: Value| async move {
            let scid = v.get("scid").and_then(|s| s.as_str()).map(|s| s.to_string());
            sling::rpc::sling_stop(p.state(), scid).await.map_err(rpc_error)
        })
        .rpcmethod("sling-deletejob", "delete a job", |p: Plugin<Arc<EngineState>>, v: Value| async move {
            let target = v.get("job").and_then(|s| s.as_str()).unwrap_or("all").to_string();
            sling::rpc::sling_deletejob(p.state(), target).await.map_err(rpc_error)
        })
        .rpcmethod("sling-stats", "show rebalance statistics", |p: Plugin<Arc<EngineState>>, v: Value| async move {
            let query = match v.get("scid").and_then(|s| s.as_str()) {
                Some(s) if s == "true" => StatsQuery::Live,
                Some(s) => StatsQuery::Channel(s.to_string()),
                None => StatsQuery::Summary,
            };
            sling::rpc::sling_stats(p.state(), query).await.map_err(rpc_error)
        })
        .rpcmethod("sling-except-chan", "except a channel from candidate selection", |p: Plugin<Arc<EngineState>>, v: Value| async move {
            let action = v.get("action").and_then(|s| s.as_str()).unwrap_or("list").to_string();
            let scid = v.get("scid").and_then(|s| s.as_str()).map(|s| s.to_string());
            sling::rpc::sling_except_chan(p.state(), action, scid).await.map_err(rpc_error)
        })
        .rpcmethod("sling-except-peer", "except a peer from candidate selection", |p: Plugin<Arc<EngineState>>, v: Value| async move {
            let action = v.get("action").and_then(|s| s.as_str()).unwrap_or("list").to_string();
            let peer = match v.get("peer_id").and_then(|s| s.as_str()) {
                Some(s) => Some(
                    cln_rpc::primitives::PublicKey::from_str(s)
                        .map_err(|e| rpc_error(SlingError::validation(e.to_string())))?,
                ),
                None => None,
            };
            sling::rpc::sling_except_peer(p.state(), action, peer).await.map_err(rpc_error)
        })
        .configure()
        .await?
    {
        Some(p) => p,
        None => return Ok(()),
    };

    let config = read_config(&plugin).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let rpc_socket = plugin.configuration().rpc_file.clone();
    let rpc = ClnRpc::new(rpc_socket).await?;
    let host: Arc<dyn sling::host::HostClient> = Arc::new(ClnHostClient::new(rpc));

    let dir = sling_dir(&plugin);
    tokio::fs::create_dir_all(&dir).await.ok();

    let engine = Arc::new(EngineState::new(host, dir, config));
    sling::persist::load_liquidity(&engine.liquidity_path(), &engine.liquidity).await;
    engine.jobs.load(sling::persist::load_jobs(&engine.jobs_path()).await);

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    engine.stats.set_persist_channel(tx);
    let stats_dir = engine.sling_dir.clone();
    tokio::spawn(async move { sling::persist::run_stats_serializer(stats_dir, rx).await });

    engine.graph.refresh(engine.host.as_ref()).await;
    engine.spawn_background_tasks();

    let plugin = plugin.start(engine).await?;
    plugin.join().await
}
