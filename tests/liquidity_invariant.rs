//! Property test for the liquidity-belief invariant (§4.2, §8):
//! `0 <= lower_bound_msat <= upper_bound_msat <= capacity_msat` must hold
//! after any sequence of successes and could-not-forward failures.

use cln_rpc::primitives::{PublicKey, ShortChannelId};
use proptest::prelude::*;
use sling::liquidity::LiquidityStore;
use std::str::FromStr;

fn scid() -> ShortChannelId {
    ShortChannelId::from_str("1x1x0").unwrap()
}

fn peer() -> PublicKey {
    let mut bytes = [0u8; 33];
    bytes[0] = 0x02;
    bytes[32] = 7;
    PublicKey::from_slice(&bytes).unwrap()
}

#[derive(Debug, Clone)]
enum Event {
    Success(u64),
    CouldNotForward(u64),
}

fn event_strategy() -> impl Strategy<Value = Event> {
    prop_oneof![
        (0u64..2_000_000).prop_map(Event::Success),
        (0u64..2_000_000).prop_map(Event::CouldNotForward),
    ]
}

proptest! {
    #[test]
    fn belief_bounds_stay_within_capacity_under_any_event_sequence(
        events in prop::collection::vec(event_strategy(), 0..50)
    ) {
        let capacity = 1_000_000u64;
        let store = LiquidityStore::new();
        for event in events {
            match event {
                Event::Success(amt) => store.observe_success(scid(), peer(), amt, capacity),
                Event::CouldNotForward(amt) => {
                    store.observe_failure_could_not_forward(scid(), peer(), amt, capacity)
                }
            }
            let (lo, hi) = store.bounds(scid(), peer(), capacity);
            prop_assert!(lo <= hi);
            prop_assert!(hi <= capacity);
        }
    }
}
