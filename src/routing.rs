//! C5: Route Search.
//!
//! Finds a circular route through the channel graph that uses the target
//! channel at the required end and a job-candidate local channel at the
//! other end, subject to the constraints in §4.5. Implemented as a
//! boundary-edge enumeration (own-side candidate edges, of which there are
//! only ever a handful) combined with a Dijkstra search over the free
//! middle segment between the two boundary nodes — an exact backward
//! fee-accumulation pass over the winning path replaces the heuristic
//! per-hop cost used to rank candidates during the search itself.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use cln_rpc::primitives::{PublicKey, ShortChannelId};
use log::debug;

use crate::graph::GraphSnapshot;
use crate::liquidity::LiquidityStore;
use crate::model::{DirectedChannel, Job, SatDirection};

pub struct RouteSearchParams<'a> {
    pub job: &'a Job,
    pub graph: &'a GraphSnapshot,
    pub liquidity: &'a LiquidityStore,
    pub amount_msat: u64,
    pub my_id: PublicKey,
    /// Routes (by scid set) already tried this job iteration, shared across
    /// this job's parallel workers (§4.5, §4.7).
    pub exclude_scids: &'a HashSet<ShortChannelId>,
    pub exclude_pull_chans: &'a HashSet<ShortChannelId>,
    pub exclude_push_chans: &'a HashSet<ShortChannelId>,
    /// Current spendable balance on the side of each local channel we might
    /// spend from, used for the depletion gate (§4.5 rule 8).
    pub local_spendable_msat: &'a HashMap<ShortChannelId, u64>,
    pub max_htlc_count: u32,
    pub candidates_min_age_blocks: u32,
    pub channel_age_blocks: &'a HashMap<ShortChannelId, u32>,
}

/// Builds `exclude_pull_chans` / `exclude_push_chans` from the full job
/// list (§4.5): for a pull job this is every other pull job's target scid
/// plus every scid in any other pull job's candidate list, so two jobs
/// never fight over the same edge; symmetrically for push.
pub fn build_exclude_chans(jobs: &[Job]) -> (HashSet<ShortChannelId>, HashSet<ShortChannelId>) {
    let mut pull = HashSet::new();
    let mut push = HashSet::new();
    for job in jobs {
        let (target_set, cand_set) = match job.direction {
            SatDirection::Pull => (&mut pull, &mut pull),
            SatDirection::Push => (&mut push, &mut push),
        };
        target_set.insert(job.scid);
        if let Some(candidates) = job.candidates.scids() {
            cand_set.extend(candidates.iter().copied());
        }
    }
    (pull, push)
}

fn csv(set: &HashSet<ShortChannelId>) -> String {
    let mut v: Vec<String> = set.iter().map(|s| s.to_string()).collect();
    v.sort();
    v.join(",")
}

#[derive(Clone)]
struct SearchNode {
    node: PublicKey,
    cost: f64,
    hops: u8,
    cltv_sum: u32,
    path: Vec<DirectedChannel>,
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.hops == other.hops && self.cltv_sum == other.cltv_sum
    }
}
impl Eq for SearchNode {}
impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap via BinaryHeap (which is a max-heap) by reversing.
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.hops.cmp(&self.hops))
            .then_with(|| other.cltv_sum.cmp(&self.cltv_sum))
    }
}

fn edge_cost(edge: &DirectedChannel, amount_msat: u64, upper_bound: u64) -> f64 {
    let fee = edge.fee_for_amount(amount_msat) as f64;
    let headroom_penalty = if upper_bound == 0 {
        1.0
    } else {
        1.0 - (amount_msat as f64 / upper_bound as f64).min(1.0)
    };
    fee + headroom_penalty * 1000.0
}

/// Finds the best middle-segment path (exclusive of the two boundary
/// edges) from `start` to `goal`, at most `max_hops` edges, using a
/// Dijkstra search weighted by fee + liquidity-headroom penalty (§4.5).
#[allow(clippy::too_many_arguments)]
fn dijkstra_middle(
    params: &RouteSearchParams,
    start: PublicKey,
    goal: PublicKey,
    max_hops: u8,
) -> Option<Vec<DirectedChannel>> {
    if start == goal {
        return Some(Vec::new());
    }
    let mut heap = BinaryHeap::new();
    heap.push(SearchNode {
        node: start,
        cost: 0.0,
        hops: 0,
        cltv_sum: 0,
        path: Vec::new(),
    });
    let mut best_cost: HashMap<PublicKey, f64> = HashMap::new();

    while let Some(current) = heap.pop() {
        if current.node == goal {
            return Some(current.path);
        }
        if current.hops >= max_hops {
            continue;
        }
        if let Some(&known) = best_cost.get(&current.node) {
            if known < current.cost {
                continue;
            }
        }

        for edge in params.graph.directed_edges_from(&current.node) {
            if !edge.active {
                continue;
            }
            if edge.from_node == params.my_id || edge.to_node == params.my_id {
                // mid-path hops never touch our own node again
                continue;
            }
            if params.exclude_scids.contains(&edge.scid) {
                continue;
            }
            if params.job.except_channels.contains(&edge.scid) {
                continue;
            }
            if params
                .job
                .except_peers
                .contains(&edge.from_node)
                || params.job.except_peers.contains(&edge.to_node)
            {
                continue;
            }
            let exclude_set = match params.job.direction {
                SatDirection::Pull => params.exclude_pull_chans,
                SatDirection::Push => params.exclude_push_chans,
            };
            if exclude_set.contains(&edge.scid) {
                continue;
            }
            if let Some(&age) = params.channel_age_blocks.get(&edge.scid) {
                if age < params.candidates_min_age_blocks {
                    continue;
                }
            }
            if params.liquidity.is_unusable(edge.scid, edge.from_node) {
                continue;
            }
            if params.amount_msat < edge.htlc_min_msat || params.amount_msat > edge.htlc_max_msat {
                continue;
            }
            let (_, upper) = params
                .liquidity
                .bounds(edge.scid, edge.from_node, edge.capacity_msat);
            if params.amount_msat > upper {
                continue;
            }

            let next_cost = current.cost + edge_cost(edge, params.amount_msat, upper);
            if let Some(&known) = best_cost.get(&edge.to_node) {
                if known <= next_cost {
                    continue;
                }
            }
            best_cost.insert(edge.to_node, next_cost);
            let mut path = current.path.clone();
            path.push(edge.clone());
            heap.push(SearchNode {
                node: edge.to_node,
                cost: next_cost,
                hops: current.hops + 1,
                cltv_sum: current.cltv_sum + edge.cltv_delta as u32,
                path,
            });
        }
    }
    None
}

/// Candidate edges on our own side of the circle: for a pull job this is
/// an outgoing edge we exit through (`from_node == my_id`); for a push
/// job it is the incoming return edge we re-enter through
/// (`to_node == my_id`) — the candidate channel's local balance rises
/// either way once the payment completes (§4.5 constraint 1).
fn own_side_edges<'a>(
    params: &'a RouteSearchParams,
    direction: SatDirection,
) -> Vec<&'a DirectedChannel> {
    let edges = match direction {
        SatDirection::Pull => params.graph.directed_edges_from(&params.my_id),
        SatDirection::Push => params.graph.directed_edges_to(&params.my_id),
    };
    edges
        .iter()
        .filter(|e| {
            if e.scid == params.job.scid || !e.active {
                return false;
            }
            if params.exclude_scids.contains(&e.scid) {
                return false;
            }
            if params.job.except_channels.contains(&e.scid) {
                return false;
            }
            let peer = match direction {
                SatDirection::Pull => e.to_node,
                SatDirection::Push => e.from_node,
            };
            if params.job.except_peers.contains(&peer) {
                return false;
            }
            if !params.job.candidates.is_all() && !params.job.candidates.contains(&e.scid) {
                return false;
            }
            if params.liquidity.is_unusable(e.scid, e.from_node) {
                return false;
            }
            match direction {
                SatDirection::Pull => e.fee_ppm >= params.job.out_ppm,
                SatDirection::Push => e.fee_ppm <= params.job.out_ppm,
            }
        })
        .collect()
}

fn passes_depletion_gate(params: &RouteSearchParams, edge: &DirectedChannel, amount_msat: u64) -> bool {
    let Some(&spendable) = params.local_spendable_msat.get(&edge.scid) else {
        return true;
    };
    let floor = params.job.depletion_floor_msat(edge.capacity_msat);
    spendable.saturating_sub(amount_msat) >= floor
}

/// Computes `amt_at_e` for every edge on the path (§4.5 rule 3): downstream
/// amount plus every downstream edge's own fee, accumulated backward from
/// the final recipient. Also used by the executor (§4.6) to recover the
/// amount that was actually in flight at the hop a forwarding failure was
/// reported for.
pub fn accumulate_amounts(path: &[DirectedChannel], final_amount: u64) -> Vec<u64> {
    let mut amounts = vec![0u64; path.len()];
    let mut running = final_amount;
    for i in (0..path.len()).rev() {
        amounts[i] = running;
        if i > 0 {
            running += path[i].fee_for_amount(running);
        }
    }
    amounts
}

fn total_fee_msat(amounts: &[u64]) -> u64 {
    match (amounts.first(), amounts.last()) {
        (Some(&first), Some(&last)) => first.saturating_sub(last),
        _ => 0,
    }
}

/// Exact post-hoc verification of every constraint in §4.5, run once on
/// the candidate the heuristic search selected.
fn verify_route(params: &RouteSearchParams, path: &[DirectedChannel]) -> bool {
    if path.len() < 2 || path.len() > params.job.max_hops as usize {
        return false;
    }
    let amounts = accumulate_amounts(path, params.amount_msat);
    for (edge, &amt) in path.iter().zip(amounts.iter()) {
        if amt < edge.htlc_min_msat || amt > edge.htlc_max_msat {
            return false;
        }
        let (_, upper) = params.liquidity.bounds(edge.scid, edge.from_node, edge.capacity_msat);
        if amt > upper {
            return false;
        }
    }
    let entry_fee_budget = (params.amount_msat as u128 * params.job.max_ppm as u128) / 1_000_000;
    let total_fee = amounts[0].saturating_sub(params.amount_msat);
    if total_fee as u128 > entry_fee_budget {
        return false;
    }
    if path.len() as u32 > params.max_htlc_count {
        return false;
    }
    true
}

/// Produces the best circular route for this job iteration not yet in
/// `exclude_scids`, or `None` if no route satisfies the constraints
/// (§4.5). `None` is a valid outcome and triggers the controller's idle
/// back-off.
pub fn search(params: &RouteSearchParams) -> Option<Vec<DirectedChannel>> {
    debug!("exclude_pull_chans: {}", csv(params.exclude_pull_chans));
    debug!("exclude_push_chans: {}", csv(params.exclude_push_chans));

    let target_from = match params.job.direction {
        SatDirection::Pull => None, // incoming edge: from_node = peer (unknown yet)
        SatDirection::Push => Some(params.my_id),
    };
    let target_edges = params.graph.edge_either_direction(&params.job.scid);
    let target_edge = target_edges.into_iter().find(|e| match params.job.direction {
        SatDirection::Pull => e.to_node == params.my_id,
        SatDirection::Push => Some(e.from_node) == target_from,
    })?;
    if !target_edge.active {
        return None;
    }

    let own_edges = own_side_edges(params, params.job.direction);
    if own_edges.is_empty() {
        return None;
    }

    let mut best: Option<(f64, Vec<DirectedChannel>)> = None;

    for own_edge in own_edges {
        // §4.5 rule 8: the depletion gate binds the edge we spend from
        // locally. For pull that's the own candidate edge (outgoing); for
        // push it's the target edge itself (also outgoing, from us).
        let spend_from_edge = match params.job.direction {
            SatDirection::Pull => own_edge,
            SatDirection::Push => target_edge,
        };
        if !passes_depletion_gate(params, spend_from_edge, params.amount_msat) {
            continue;
        }
        let middle_budget = params.job.max_hops.saturating_sub(2);
        let (start, goal) = match params.job.direction {
            SatDirection::Pull => (own_edge.to_node, target_edge.from_node),
            SatDirection::Push => (target_edge.to_node, own_edge.from_node),
        };
        let Some(middle) = dijkstra_middle(params, start, goal, middle_budget) else {
            continue;
        };

        let mut path = Vec::with_capacity(middle.len() + 2);
        match params.job.direction {
            SatDirection::Pull => {
                path.push(own_edge.clone());
                path.extend(middle);
                path.push(target_edge.clone());
            }
            SatDirection::Push => {
                path.push(target_edge.clone());
                path.extend(middle);
                path.push(own_edge.clone());
            }
        }

        if !verify_route(params, &path) {
            continue;
        }

        let amounts = accumulate_amounts(&path, params.amount_msat);
        let cost = total_fee_msat(&amounts) as f64;
        if best.as_ref().map(|(c, _)| cost < *c).unwrap_or(true) {
            best = Some((cost, path));
        }
    }

    best.map(|(_, path)| path)
}
