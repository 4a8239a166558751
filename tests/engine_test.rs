//! End-to-end scenarios (§8) driven against the in-process fake host
//! rather than a live `lightningd` (§1 Non-goals: the real RPC transport).

mod support;

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use cln_rpc::primitives::ShortChannelId;

use sling::config::Config;
use sling::executor;
use sling::graph::GraphCache;
use sling::host::LocalChannel;
use sling::jobs::JobRegistry;
use sling::liquidity::LiquidityStore;
use sling::model::{CandidateSet, Job, JobKind, SatDirection};
use sling::routing::{search, RouteSearchParams};
use sling::stats::{PrunePolicy, StatsStore};

use support::fake_host::{pubkey, FakeHost, ScriptedOutcome};

fn scid(s: &str) -> ShortChannelId {
    ShortChannelId::from_str(s).unwrap()
}

fn local_channel(scid_: ShortChannelId, peer: cln_rpc::primitives::PublicKey, to_us_msat: u64, capacity_msat: u64) -> LocalChannel {
    LocalChannel {
        scid: scid_,
        peer_id: peer,
        capacity_msat,
        to_us_msat,
        spendable_msat: to_us_msat,
        receivable_msat: capacity_msat.saturating_sub(to_us_msat),
        private: true,
        active: true,
        opener_is_local: true,
    }
}

fn public_edge(scid_: ShortChannelId, from: cln_rpc::primitives::PublicKey, to: cln_rpc::primitives::PublicKey) -> sling::model::DirectedChannel {
    sling::model::DirectedChannel {
        scid: scid_,
        from_node: from,
        to_node: to,
        capacity_msat: 5_000_000_000,
        fee_base_msat: 1,
        fee_ppm: 100,
        htlc_min_msat: 1,
        htlc_max_msat: 5_000_000_000,
        cltv_delta: 40,
        active: true,
        private: false,
    }
}

fn plain_job(target: ShortChannelId, direction: SatDirection, candidates: CandidateSet) -> Job {
    Job {
        scid: target,
        direction,
        amount_msat: 100_000_000,
        max_ppm: 5_000,
        out_ppm: 0,
        target_ratio: 0.5,
        depleteuptopercent: 0.2,
        depleteuptoamount_msat: 0,
        max_hops: 8,
        candidates,
        except_channels: HashSet::new(),
        except_peers: HashSet::new(),
        parallel_jobs: 1,
        kind: JobKind::Recurring,
    }
}

/// Scenario: two private channels to different peers, connected by one
/// public hop between those peers. A pull job on the depleted channel
/// finds a route out through the other private channel and back.
#[tokio::test]
async fn two_private_channels_pull_through_a_public_bridge() {
    let me = pubkey(1);
    let peer_a = pubkey(2);
    let peer_b = pubkey(3);

    let target_scid = scid("10x1x0"); // me <-> peer_b, depleted on our side
    let candidate_scid = scid("20x1x0"); // me <-> peer_a, has plenty on our side
    let bridge_scid = scid("30x1x0"); // peer_a <-> peer_b, public

    let host = FakeHost::new(me);
    *host.local_channels.lock().unwrap() = vec![
        local_channel(target_scid, peer_b, 0, 1_000_000_000),
        local_channel(candidate_scid, peer_a, 1_000_000_000, 1_000_000_000),
    ];
    *host.public_channels.lock().unwrap() = vec![
        public_edge(bridge_scid, peer_a, peer_b),
        public_edge(bridge_scid, peer_b, peer_a),
    ];

    let graph = GraphCache::new();
    graph.refresh(&host).await;
    let snapshot = graph.current();
    assert!(snapshot.contains_scid(&target_scid));
    assert!(snapshot.contains_scid(&bridge_scid));

    let job = plain_job(target_scid, SatDirection::Pull, CandidateSet::All);
    let liquidity = LiquidityStore::new();
    let exclude = HashSet::new();
    let (pull, push) = (HashSet::new(), HashSet::new());
    let local_spendable: HashMap<ShortChannelId, u64> = host
        .local_channels
        .lock()
        .unwrap()
        .iter()
        .map(|c| (c.scid, c.spendable_msat))
        .collect();
    let ages = HashMap::new();

    let params = RouteSearchParams {
        job: &job,
        graph: &snapshot,
        liquidity: &liquidity,
        amount_msat: job.amount_msat,
        my_id: me,
        exclude_scids: &exclude,
        exclude_pull_chans: &pull,
        exclude_push_chans: &push,
        local_spendable_msat: &local_spendable,
        max_htlc_count: 10,
        candidates_min_age_blocks: 0,
        channel_age_blocks: &ages,
    };
    let route = search(&params).expect("a route should exist across the public bridge");
    assert_eq!(route.first().unwrap().scid, candidate_scid);
    assert_eq!(route.last().unwrap().scid, target_scid);

    let route_scids: Vec<ShortChannelId> = route.iter().map(|e| e.scid).collect();
    host.script(&route_scids, ScriptedOutcome::Success { fee_msat: 500 });

    let stats = StatsStore::new(PrunePolicy {
        success_age_secs: 0,
        success_size: 0,
        failure_age_secs: 0,
        failure_size: 0,
    });
    let outcome = executor::execute(
        &host,
        &liquidity,
        &stats,
        target_scid,
        SatDirection::Pull,
        &route,
        job.amount_msat,
        30,
    )
    .await
    .expect("payment should succeed");
    assert!(outcome.success);

    let (lower, _) = liquidity.bounds(target_scid, peer_b, 1_000_000_000);
    assert!(lower >= job.amount_msat);

    let per_channel = stats.per_channel(target_scid);
    assert_eq!(
        per_channel.successes_in_time_window.total_amount_sats,
        job.amount_msat / sling::model::MSAT_PER_SAT
    );
}

/// Scenario: a push job exits through the target channel and closes the
/// cycle back through the candidate's incoming edge (§4.5 constraint 1).
#[tokio::test]
async fn push_job_exits_target_and_returns_through_candidate() {
    let me = pubkey(1);
    let peer_a = pubkey(2);
    let peer_b = pubkey(3);

    let target_scid = scid("10x1x0"); // me <-> peer_b, full on our side, to be pushed out
    let candidate_scid = scid("20x1x0"); // me <-> peer_a, empty on our side, to receive
    let bridge_scid = scid("30x1x0"); // peer_b <-> peer_a, public

    let host = FakeHost::new(me);
    *host.local_channels.lock().unwrap() = vec![
        local_channel(target_scid, peer_b, 1_000_000_000, 1_000_000_000),
        local_channel(candidate_scid, peer_a, 0, 1_000_000_000),
    ];
    *host.public_channels.lock().unwrap() = vec![
        public_edge(bridge_scid, peer_b, peer_a),
        public_edge(bridge_scid, peer_a, peer_b),
    ];

    let graph = GraphCache::new();
    graph.refresh(&host).await;
    let snapshot = graph.current();

    let mut job = plain_job(target_scid, SatDirection::Push, CandidateSet::All);
    job.out_ppm = 0;
    let liquidity = LiquidityStore::new();
    let exclude = HashSet::new();
    let (pull, push) = (HashSet::new(), HashSet::new());
    let local_spendable: HashMap<ShortChannelId, u64> = host
        .local_channels
        .lock()
        .unwrap()
        .iter()
        .map(|c| (c.scid, c.spendable_msat))
        .collect();
    let ages = HashMap::new();

    let params = RouteSearchParams {
        job: &job,
        graph: &snapshot,
        liquidity: &liquidity,
        amount_msat: job.amount_msat,
        my_id: me,
        exclude_scids: &exclude,
        exclude_pull_chans: &pull,
        exclude_push_chans: &push,
        local_spendable_msat: &local_spendable,
        max_htlc_count: 10,
        candidates_min_age_blocks: 0,
        channel_age_blocks: &ages,
    };
    let route = search(&params).expect("a push route should exist across the public bridge");
    assert_eq!(route.first().unwrap().scid, target_scid);
    assert_eq!(route.first().unwrap().from_node, me);
    assert_eq!(route.last().unwrap().scid, candidate_scid);
    assert_eq!(route.last().unwrap().to_node, me);

    let route_scids: Vec<ShortChannelId> = route.iter().map(|e| e.scid).collect();
    host.script(&route_scids, ScriptedOutcome::Success { fee_msat: 500 });

    let stats = StatsStore::new(PrunePolicy {
        success_age_secs: 0,
        success_size: 0,
        failure_age_secs: 0,
        failure_size: 0,
    });
    let outcome = executor::execute(
        &host,
        &liquidity,
        &stats,
        target_scid,
        SatDirection::Push,
        &route,
        job.amount_msat,
        30,
    )
    .await
    .expect("payment should succeed");
    assert!(outcome.success);
}

/// Scenario: a job whose candidate list excludes the only viable local
/// channel finds no route.
#[tokio::test]
async fn candidate_gating_excludes_non_listed_channel() {
    let me = pubkey(1);
    let peer_a = pubkey(2);
    let peer_b = pubkey(3);

    let target_scid = scid("10x1x0");
    let candidate_scid = scid("20x1x0");
    let bridge_scid = scid("30x1x0");

    let host = FakeHost::new(me);
    *host.local_channels.lock().unwrap() = vec![
        local_channel(target_scid, peer_b, 0, 1_000_000_000),
        local_channel(candidate_scid, peer_a, 1_000_000_000, 1_000_000_000),
    ];
    *host.public_channels.lock().unwrap() = vec![
        public_edge(bridge_scid, peer_a, peer_b),
        public_edge(bridge_scid, peer_b, peer_a),
    ];

    let graph = GraphCache::new();
    graph.refresh(&host).await;
    let snapshot = graph.current();

    let mut other = HashSet::new();
    other.insert(scid("99x9x0")); // not our candidate channel
    let job = plain_job(target_scid, SatDirection::Pull, CandidateSet::Scids(other));
    let liquidity = LiquidityStore::new();
    let exclude = HashSet::new();
    let (pull, push) = (HashSet::new(), HashSet::new());
    let local_spendable = HashMap::new();
    let ages = HashMap::new();

    let params = RouteSearchParams {
        job: &job,
        graph: &snapshot,
        liquidity: &liquidity,
        amount_msat: job.amount_msat,
        my_id: me,
        exclude_scids: &exclude,
        exclude_pull_chans: &pull,
        exclude_push_chans: &push,
        local_spendable_msat: &local_spendable,
        max_htlc_count: 10,
        candidates_min_age_blocks: 0,
        channel_age_blocks: &ages,
    };
    assert!(search(&params).is_none());
}

/// Scenario: a once-job tears itself down once its total has been
/// delivered (§4.4, §4.7).
#[test]
fn once_job_lifecycle_deletes_itself_after_total_delivered() {
    let target_scid = scid("10x1x0");

    let registry = JobRegistry::new();
    let mut job = plain_job(target_scid, SatDirection::Pull, CandidateSet::All);
    job.kind = JobKind::Once {
        total_amount_msat: 200_000_000,
        delivered_msat: 0,
    };

    registry.load(vec![job.clone()]);
    assert!(!registry.record_once_delivery(&target_scid, 100_000_000));
    assert!(registry.record_once_delivery(&target_scid, 100_000_000));
}

/// Scenario: two pull jobs cannot target/candidate the same scid (§3, §8).
#[test]
fn cross_job_conflict_is_rejected_on_add() {
    let registry = JobRegistry::new();
    let mut candidates = HashSet::new();
    candidates.insert(scid("2x2x0"));
    let first = plain_job(scid("2x2x0"), SatDirection::Pull, CandidateSet::All);
    let second = plain_job(scid("3x3x0"), SatDirection::Pull, CandidateSet::Scids(candidates));
    registry.load(vec![first]);
    let conflicts = sling::jobs::check_no_cross_job_conflicts(&{
        let mut v = registry.list();
        v.push(second);
        v
    });
    assert!(conflicts.is_err());
}
