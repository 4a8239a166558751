//! C6: Payment Executor.
//!
//! Drives a single rebalance attempt: builds a self-payment invoice, sends
//! it along the candidate route, classifies the outcome, and feeds the
//! result back into the liquidity belief store and the stats log (§4.6).
//! Returns control to the controller afterwards; it never loops itself.

use std::time::{SystemTime, UNIX_EPOCH};

use cln_rpc::primitives::ShortChannelId;
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::host::HostClient;
use crate::liquidity::{LiquidityStore, UnusableReason};
use crate::model::{DirectedChannel, SatDirection, StatsKind, StatsRecord};
use crate::routing::accumulate_amounts;
use crate::stats::StatsStore;

pub struct ExecutionOutcome {
    pub success: bool,
    pub delivered_msat: u64,
}

fn random_label() -> String {
    format!(
        "sling-{}",
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect::<String>()
    )
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// Executes one attempt of `route` for `amount_msat` on behalf of `scid`'s
/// job, classifying the forwarding outcome per §4.6 and writing the result
/// to C2 and C3.
pub async fn execute(
    host: &dyn HostClient,
    liquidity: &LiquidityStore,
    stats: &StatsStore,
    scid: ShortChannelId,
    direction: SatDirection,
    route: &[DirectedChannel],
    amount_msat: u64,
    timeout_secs: u64,
) -> anyhow::Result<ExecutionOutcome> {
    let label = random_label();
    let invoice = host.create_self_invoice(amount_msat, &label).await?;

    let scids: Vec<ShortChannelId> = route.iter().map(|e| e.scid).collect();
    let outcome = host
        .send_along_route(&scids, amount_msat, &invoice, timeout_secs)
        .await?;

    if outcome.success {
        for edge in route {
            liquidity.observe_success(edge.scid, edge.from_node, amount_msat, edge.capacity_msat);
        }
        info!(
            "sling: Rebalance SUCCESSFULL after {} hops, fee={}msat",
            route.len(),
            outcome.fee_msat
        );
        stats.append(StatsRecord {
            scid,
            timestamp: now(),
            direction,
            amount_msat,
            kind: StatsKind::Success {
                fee_msat: outcome.fee_msat,
                route: scids,
            },
        });
        return Ok(ExecutionOutcome {
            success: true,
            delivered_msat: amount_msat,
        });
    }

    let (hop, code) = match &outcome.failed_hop {
        Some((hop, code)) => (*hop, code.clone()),
        None => {
            warn!("sling: payment timed out without a forwarding error");
            stats.append(StatsRecord {
                scid,
                timestamp: now(),
                direction,
                amount_msat,
                kind: StatsKind::Failure {
                    at_hop: 0,
                    code: "timeout".to_string(),
                },
            });
            return Ok(ExecutionOutcome {
                success: false,
                delivered_msat: 0,
            });
        }
    };

    let amounts = accumulate_amounts(route, amount_msat);
    let amt_at_hop = amounts.get(hop as usize).copied().unwrap_or(amount_msat);
    classify_and_record(liquidity, route, hop, &code, amt_at_hop);

    stats.append(StatsRecord {
        scid,
        timestamp: now(),
        direction,
        amount_msat,
        kind: StatsKind::Failure { at_hop: hop, code: code.clone() },
    });

    debug!("sling: forwarding failure at hop {}: {}", hop, code);
    Ok(ExecutionOutcome {
        success: false,
        delivered_msat: 0,
    })
}

/// BOLT-4 failure classification (§4.6). `amt_at_hop` is the amount that
/// was actually in flight on `route[hop]` when the failure was reported
/// (§4.5 rule 3's backward accumulation, not the edge's total capacity).
fn classify_and_record(
    liquidity: &LiquidityStore,
    route: &[DirectedChannel],
    hop: u8,
    code: &str,
    amt_at_hop: u64,
) {
    let Some(edge) = route.get(hop as usize) else {
        return;
    };
    match code {
        "temporary_channel_failure" => {
            liquidity.observe_failure_could_not_forward(
                edge.scid,
                edge.from_node,
                amt_at_hop,
                edge.capacity_msat,
            );
            liquidity.observe_channel_unusable(
                edge.scid,
                edge.from_node,
                UnusableReason::TemporaryChannelFailure,
            );
        }
        "unknown_next_peer" => {
            liquidity.observe_failure_could_not_forward(
                edge.scid,
                edge.from_node,
                amt_at_hop,
                edge.capacity_msat,
            );
            liquidity.observe_channel_unusable(
                edge.scid,
                edge.from_node,
                UnusableReason::UnknownNextPeer,
            );
        }
        "fee_insufficient" | "incorrect_cltv_expiry" | "expiry_too_soon" => {
            // caller retries with updated hints; nothing to record here
            // beyond the failure itself, already appended by the caller.
        }
        "amount_below_minimum" | "amount_above_maximum" => {
            // htlc bounds come from the host's updated channel_update on
            // retry; the belief store only needs the observed gossip
            // refresh, which happens on the next graph refresh tick.
        }
        "final_incorrect_cltv_expiry" | "final_incorrect_htlc_amount" => {
            // internal error on our own node, not a liquidity signal.
        }
        _ => {
            liquidity.observe_channel_unusable(
                edge.scid,
                edge.from_node,
                UnusableReason::PermanentFailure,
            );
        }
    }
}
