//! C2: Liquidity Belief Store.
//!
//! Per-directed-channel running estimate of usable liquidity, decayed on a
//! timer and updated from payment outcomes (§4.2). Guarded by per-key
//! locking via a single `parking_lot::Mutex` over the map — contention is
//! low enough (one entry touched per hop per payment attempt) that a
//! sharded map would be premature.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cln_rpc::primitives::{PublicKey, ShortChannelId};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

type Key = (ShortChannelId, PublicKey);

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Belief {
    pub lower_bound_msat: u64,
    pub upper_bound_msat: u64,
    pub last_updated: u64,
}

impl Belief {
    fn full(capacity_msat: u64, now: u64) -> Self {
        Belief {
            lower_bound_msat: 0,
            upper_bound_msat: capacity_msat,
            last_updated: now,
        }
    }

    /// Resets a belief that would otherwise violate `lo <= hi` (§4.2).
    fn check_or_reset(&mut self, capacity_msat: u64, now: u64) {
        if self.lower_bound_msat > self.upper_bound_msat
            || self.upper_bound_msat > capacity_msat
        {
            *self = Belief::full(capacity_msat, now);
        }
    }
}

/// Reasons a directed edge can be temporarily marked unusable (§4.2, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusableReason {
    DisconnectedPeer,
    TemporaryChannelFailure,
    UnknownNextPeer,
    PermanentFailure,
}

impl UnusableReason {
    /// Open question in the spec: exact TTLs are not documented in the
    /// distilled source, only observable from logs. We make them
    /// configurable defaults rather than hardcode surprising numbers.
    pub fn default_ttl(self) -> Duration {
        match self {
            UnusableReason::DisconnectedPeer => Duration::from_secs(10 * 60),
            UnusableReason::TemporaryChannelFailure => Duration::from_secs(10 * 60),
            UnusableReason::UnknownNextPeer => Duration::from_secs(24 * 60 * 60),
            UnusableReason::PermanentFailure => Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedBelief {
    scid: String,
    dir: String,
    lo: u64,
    hi: u64,
    ts: u64,
}

pub struct LiquidityStore {
    beliefs: Mutex<HashMap<Key, Belief>>,
    tempbans: Mutex<HashMap<Key, u64>>,
}

impl Default for LiquidityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LiquidityStore {
    pub fn new() -> Self {
        LiquidityStore {
            beliefs: Mutex::new(HashMap::new()),
            tempbans: Mutex::new(HashMap::new()),
        }
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    pub fn bounds(&self, scid: ShortChannelId, dir: PublicKey, capacity_msat: u64) -> (u64, u64) {
        let mut map = self.beliefs.lock();
        let now = Self::now();
        let belief = map
            .entry((scid, dir))
            .or_insert_with(|| Belief::full(capacity_msat, now));
        belief.check_or_reset(capacity_msat, now);
        (belief.lower_bound_msat, belief.upper_bound_msat)
    }

    pub fn observe_success(&self, scid: ShortChannelId, dir: PublicKey, amt: u64, capacity_msat: u64) {
        let mut map = self.beliefs.lock();
        let now = Self::now();
        let belief = map
            .entry((scid, dir))
            .or_insert_with(|| Belief::full(capacity_msat, now));
        belief.lower_bound_msat = belief.lower_bound_msat.max(amt);
        belief.last_updated = now;
        belief.check_or_reset(capacity_msat, now);
    }

    pub fn observe_failure_could_not_forward(
        &self,
        scid: ShortChannelId,
        dir: PublicKey,
        amt: u64,
        capacity_msat: u64,
    ) {
        let mut map = self.beliefs.lock();
        let now = Self::now();
        let belief = map
            .entry((scid, dir))
            .or_insert_with(|| Belief::full(capacity_msat, now));
        belief.upper_bound_msat = belief.upper_bound_msat.min(amt.saturating_sub(1));
        belief.last_updated = now;
        belief.check_or_reset(capacity_msat, now);
    }

    pub fn observe_channel_unusable(
        &self,
        scid: ShortChannelId,
        dir: PublicKey,
        reason: UnusableReason,
    ) {
        let expiry = Self::now() + reason.default_ttl().as_secs();
        self.tempbans.lock().insert((scid, dir), expiry);
    }

    pub fn is_unusable(&self, scid: ShortChannelId, dir: PublicKey) -> bool {
        let mut bans = self.tempbans.lock();
        let now = Self::now();
        match bans.get(&(scid, dir)) {
            Some(&expiry) if expiry > now => true,
            Some(_) => {
                bans.remove(&(scid, dir));
                false
            }
            None => false,
        }
    }

    /// Resets beliefs older than `interval_minutes` to `[0, capacity]`
    /// (§4.2). Capacities must be supplied by the caller (from the current
    /// graph snapshot) since the store itself does not own channel
    /// metadata.
    pub fn decay_tick(&self, capacities: &HashMap<Key, u64>, interval_minutes: u64) {
        let now = Self::now();
        let cutoff = interval_minutes.saturating_mul(60);
        let mut map = self.beliefs.lock();
        let mut reset_count = 0;
        for (key, belief) in map.iter_mut() {
            if now.saturating_sub(belief.last_updated) >= cutoff {
                if let Some(&capacity) = capacities.get(key) {
                    *belief = Belief::full(capacity, now);
                    reset_count += 1;
                }
            }
        }
        debug!("sling: reset liquidity belief on {} channels", reset_count);
    }

    pub fn to_persisted_json(&self) -> anyhow::Result<String> {
        let map = self.beliefs.lock();
        let items: Vec<PersistedBelief> = map
            .iter()
            .map(|((scid, dir), b)| PersistedBelief {
                scid: scid.to_string(),
                dir: dir.to_string(),
                lo: b.lower_bound_msat,
                hi: b.upper_bound_msat,
                ts: b.last_updated,
            })
            .collect();
        Ok(serde_json::to_string(&items)?)
    }

    /// Loads from `liquidity.json`. An empty file (or empty array) means
    /// "no prior beliefs" and is not an error (§4.2, §6).
    pub fn load_from_json(&self, contents: &str) -> anyhow::Result<()> {
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let items: Vec<PersistedBelief> = serde_json::from_str(trimmed)?;
        let mut map = self.beliefs.lock();
        for item in items {
            let scid: ShortChannelId = item.scid.parse()?;
            let dir: PublicKey = item.dir.parse()?;
            map.insert(
                (scid, dir),
                Belief {
                    lower_bound_msat: item.lo,
                    upper_bound_msat: item.hi,
                    last_updated: item.ts,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn scid() -> ShortChannelId {
        ShortChannelId::from_str("1x1x0").unwrap()
    }

    fn pubkey(byte: u8) -> PublicKey {
        let mut bytes = [0u8; 33];
        bytes[0] = 0x02;
        bytes[32] = byte;
        PublicKey::from_slice(&bytes).unwrap()
    }

    #[test]
    fn defaults_to_full_capacity_when_absent() {
        let store = LiquidityStore::new();
        let (lo, hi) = store.bounds(scid(), pubkey(1), 1_000_000);
        assert_eq!((lo, hi), (0, 1_000_000));
    }

    #[test]
    fn success_raises_lower_bound_monotonically() {
        let store = LiquidityStore::new();
        store.observe_success(scid(), pubkey(1), 500_000, 1_000_000);
        assert_eq!(store.bounds(scid(), pubkey(1), 1_000_000).0, 500_000);
        store.observe_success(scid(), pubkey(1), 300_000, 1_000_000);
        assert_eq!(store.bounds(scid(), pubkey(1), 1_000_000).0, 500_000);
    }

    #[test]
    fn could_not_forward_lowers_upper_bound() {
        let store = LiquidityStore::new();
        store.observe_failure_could_not_forward(scid(), pubkey(1), 100_000, 1_000_000);
        assert_eq!(store.bounds(scid(), pubkey(1), 1_000_000).1, 99_999);
    }

    #[test]
    fn invariant_violation_resets_belief() {
        let store = LiquidityStore::new();
        store.observe_success(scid(), pubkey(1), 900_000, 1_000_000);
        store.observe_failure_could_not_forward(scid(), pubkey(1), 500_000, 1_000_000);
        // lo=900_000 > hi=499_999 would violate invariant, so it resets
        let (lo, hi) = store.bounds(scid(), pubkey(1), 1_000_000);
        assert!(lo <= hi);
        assert_eq!((lo, hi), (0, 1_000_000));
    }

    #[test]
    fn tempban_expires_after_ttl() {
        let store = LiquidityStore::new();
        store.observe_channel_unusable(scid(), pubkey(1), UnusableReason::DisconnectedPeer);
        assert!(store.is_unusable(scid(), pubkey(1)));
    }

    #[test]
    fn empty_persisted_file_is_not_an_error() {
        let store = LiquidityStore::new();
        store.load_from_json("").unwrap();
        store.load_from_json("[]").unwrap();
    }
}
