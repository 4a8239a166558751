//! Shared data types for the rebalancing engine: channels, beliefs, jobs,
//! job run state, and stats records. Pure data + small invariant-preserving
//! helpers; no I/O and no locking lives here.

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use anyhow::{anyhow, Error};
use cln_rpc::primitives::{PublicKey, ShortChannelId};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

pub const PLUGIN_NAME: &str = "sling";
pub const GRAPH_FILE_NAME: &str = "graph.json";
pub const JOB_FILE_NAME: &str = "jobs.json";
pub const LIQUIDITY_FILE_NAME: &str = "liquidity.json";
pub const EXCEPTS_CHANS_FILE_NAME: &str = "excepts.json";
pub const EXCEPTS_PEERS_FILE_NAME: &str = "excepts_peers.json";
pub const STATS_DIR_NAME: &str = "stats";

/// 1 sat = 1000 msat.
pub const MSAT_PER_SAT: u64 = 1_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SatDirection {
    #[serde(alias = "pull")]
    Pull,
    #[serde(alias = "push")]
    Push,
}

impl FromStr for SatDirection {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pull" => Ok(SatDirection::Pull),
            "push" => Ok(SatDirection::Push),
            _ => Err(anyhow!("could not parse flow direction from `{}`", s)),
        }
    }
}

impl Display for SatDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            SatDirection::Pull => write!(f, "pull"),
            SatDirection::Push => write!(f, "push"),
        }
    }
}

/// A directed channel edge as known from gossip or from our own peer list.
///
/// Invariant: `htlc_min_msat <= htlc_max_msat <= capacity_msat`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectedChannel {
    pub scid: ShortChannelId,
    pub from_node: PublicKey,
    pub to_node: PublicKey,
    pub capacity_msat: u64,
    pub fee_base_msat: u64,
    pub fee_ppm: u32,
    pub htlc_min_msat: u64,
    pub htlc_max_msat: u64,
    pub cltv_delta: u16,
    pub active: bool,
    pub private: bool,
}

impl DirectedChannel {
    pub fn check_invariant(&self) -> Result<(), Error> {
        if self.htlc_min_msat <= self.htlc_max_msat && self.htlc_max_msat <= self.capacity_msat {
            Ok(())
        } else {
            Err(anyhow!(
                "channel {} violates htlc_min<=htlc_max<=capacity invariant",
                self.scid
            ))
        }
    }

    pub fn fee_for_amount(&self, amount_msat: u64) -> u64 {
        let ppm_fee = (amount_msat as u128 * self.fee_ppm as u128 + 999_999) / 1_000_000;
        self.fee_base_msat + ppm_fee as u64
    }
}

/// `candidates: set<SCID> | ALL` from the data model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CandidateSet {
    All,
    Scids(HashSet<ShortChannelId>),
}

impl CandidateSet {
    pub fn contains(&self, scid: &ShortChannelId) -> bool {
        match self {
            CandidateSet::All => true,
            CandidateSet::Scids(set) => set.contains(scid),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, CandidateSet::All)
    }

    pub fn scids(&self) -> Option<&HashSet<ShortChannelId>> {
        match self {
            CandidateSet::All => None,
            CandidateSet::Scids(set) => Some(set),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobKind {
    Recurring,
    Once {
        total_amount_msat: u64,
        delivered_msat: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub scid: ShortChannelId,
    pub direction: SatDirection,
    pub amount_msat: u64,
    pub max_ppm: u32,
    pub out_ppm: u32,
    pub target_ratio: f64,
    pub depleteuptopercent: f64,
    pub depleteuptoamount_msat: u64,
    pub max_hops: u8,
    pub candidates: CandidateSet,
    pub except_channels: HashSet<ShortChannelId>,
    pub except_peers: HashSet<PublicKey>,
    pub parallel_jobs: u16,
    pub kind: JobKind,
}

impl Job {
    /// `already_at_target` from §4.7.
    pub fn is_balanced(&self, local_to_us_msat: u64, capacity_msat: u64) -> bool {
        if let JobKind::Once {
            total_amount_msat,
            delivered_msat,
        } = self.kind
        {
            return delivered_msat >= total_amount_msat;
        }
        let target = (capacity_msat as f64 * self.target_ratio) as u64;
        match self.direction {
            SatDirection::Pull => local_to_us_msat >= target,
            SatDirection::Push => capacity_msat.saturating_sub(local_to_us_msat) >= target,
        }
    }

    /// Minimum "to us" balance on the depleted side of the local channel we
    /// spend from, per §4.5 rule 8.
    pub fn depletion_floor_msat(&self, capacity_msat: u64) -> u64 {
        let pct_floor = (capacity_msat as f64 * self.depleteuptopercent) as u64;
        pct_floor.max(self.depleteuptoamount_msat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Disconnected,
    PeerNotFound,
    PeerNotReady,
    ChanNotNormal,
    GraphEmpty,
    ChanNotInGraph,
    HtlcCapped,
    TooExpensive,
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Disconnected => "Disconnected",
            ErrorKind::PeerNotFound => "PeerNotFound",
            ErrorKind::PeerNotReady => "PeerNotReady",
            ErrorKind::ChanNotNormal => "ChanNotNormal",
            ErrorKind::GraphEmpty => "GraphEmpty",
            ErrorKind::ChanNotInGraph => "ChanNotInGraph",
            ErrorKind::HtlcCapped => "HTLCcapped",
            ErrorKind::TooExpensive => "NoCheapRoute",
            ErrorKind::Internal => "Error",
        };
        write!(f, "{}", s)
    }
}

/// `WorkerStatus` from the data model (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Idle,
    SearchingRoute,
    Paying,
    Balanced,
    NoCandidates,
    Stopping,
    Stopped,
    Error(ErrorKind),
}

impl Display for WorkerStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "Idle"),
            WorkerStatus::SearchingRoute => write!(f, "SearchingRoute"),
            WorkerStatus::Paying => write!(f, "Paying"),
            WorkerStatus::Balanced => write!(f, "Balanced"),
            WorkerStatus::NoCandidates => write!(f, "NoCandidates"),
            WorkerStatus::Stopping => write!(f, "Stopping"),
            WorkerStatus::Stopped => write!(f, "Stopped"),
            WorkerStatus::Error(k) => write!(f, "{}", k),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobRunState {
    Stopped,
    Running { per_worker_status: Vec<WorkerStatus> },
    Stopping,
}

/// Forwarding-failure classification from BOLT-4 error codes (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardingErrorCode {
    TemporaryChannelFailure,
    UnknownNextPeer,
    FeeInsufficient,
    IncorrectCltvExpiry,
    ExpiryTooSoon,
    AmountBelowMinimum,
    AmountAboveMaximum,
    FinalIncorrect,
    PermanentFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatsKind {
    Success {
        fee_msat: u64,
        route: Vec<ShortChannelId>,
    },
    Failure {
        at_hop: u8,
        code: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsRecord {
    pub scid: ShortChannelId,
    pub timestamp: u64,
    pub direction: SatDirection,
    pub amount_msat: u64,
    pub kind: StatsKind,
}

impl StatsRecord {
    /// The adjacent scid of the hop closest to us, used to attribute a
    /// record to a channel partner (§4.3).
    pub fn partner_scid(&self, route: &[ShortChannelId]) -> Option<ShortChannelId> {
        let _ = self;
        route.first().copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPartnerStats {
    pub scid: String,
    pub alias: String,
    pub sats: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowStats {
    pub total_amount_sats: u64,
    pub top_5_channel_partners: Vec<ChannelPartnerStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerChannelStats {
    pub successes_in_time_window: WindowStats,
    pub failures_in_time_window: WindowStats,
}

/// One row of the `sling-stats` human-readable summary table.
#[derive(Debug, Tabled)]
pub struct StatSummaryRow {
    pub scid: String,
    pub successes_sats: u64,
    pub failures_sats: u64,
    pub top_partner: String,
}

impl StatSummaryRow {
    pub fn from_per_channel(scid: ShortChannelId, stats: &PerChannelStats) -> Self {
        let top_partner = stats
            .successes_in_time_window
            .top_5_channel_partners
            .first()
            .map(|p| p.alias.clone())
            .unwrap_or_else(|| "-".to_string());
        StatSummaryRow {
            scid: scid.to_string(),
            successes_sats: stats.successes_in_time_window.total_amount_sats,
            failures_sats: stats.failures_in_time_window.total_amount_sats,
            top_partner,
        }
    }
}
