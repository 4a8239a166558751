//! In-process fake `HostClient` for end-to-end tests (§1 Non-goals: the
//! real RPC transport is out of scope, so tests exercise the engine
//! against this fake instead of a live `lightningd`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use cln_rpc::primitives::{PublicKey, ShortChannelId};
use sling::host::{HostClient, Invoice, LocalChannel, PaymentOutcome};
use sling::model::DirectedChannel;

pub fn pubkey(byte: u8) -> PublicKey {
    let mut bytes = [0u8; 33];
    bytes[0] = 0x02;
    bytes[32] = byte;
    PublicKey::from_slice(&bytes).unwrap()
}

/// What the fake should do when asked to pay along a given route, keyed by
/// the route's scids joined with a comma.
pub enum ScriptedOutcome {
    Success { fee_msat: u64 },
    Fail { at_hop: u8, code: &'static str },
}

pub struct FakeHost {
    pub my_id: PublicKey,
    pub public_channels: Mutex<Vec<DirectedChannel>>,
    pub local_channels: Mutex<Vec<LocalChannel>>,
    pub aliases: HashMap<PublicKey, String>,
    pub scripted: Mutex<HashMap<String, ScriptedOutcome>>,
    pub invoice_counter: AtomicU64,
    pub payments_attempted: Mutex<Vec<Vec<ShortChannelId>>>,
}

impl FakeHost {
    pub fn new(my_id: PublicKey) -> Self {
        FakeHost {
            my_id,
            public_channels: Mutex::new(Vec::new()),
            local_channels: Mutex::new(Vec::new()),
            aliases: HashMap::new(),
            scripted: Mutex::new(HashMap::new()),
            invoice_counter: AtomicU64::new(0),
            payments_attempted: Mutex::new(Vec::new()),
        }
    }

    fn route_key(route: &[ShortChannelId]) -> String {
        route.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(",")
    }

    pub fn script(&self, route: &[ShortChannelId], outcome: ScriptedOutcome) {
        self.scripted.lock().unwrap().insert(Self::route_key(route), outcome);
    }
}

#[async_trait]
impl HostClient for FakeHost {
    async fn get_info(&self) -> anyhow::Result<PublicKey> {
        Ok(self.my_id)
    }

    async fn list_public_channels(&self) -> anyhow::Result<Vec<DirectedChannel>> {
        Ok(self.public_channels.lock().unwrap().clone())
    }

    async fn list_local_channels(&self) -> anyhow::Result<Vec<LocalChannel>> {
        Ok(self.local_channels.lock().unwrap().clone())
    }

    async fn lookup_alias(&self, node: &PublicKey) -> anyhow::Result<Option<String>> {
        Ok(self.aliases.get(node).cloned())
    }

    async fn create_self_invoice(&self, _amount_msat: u64, label: &str) -> anyhow::Result<Invoice> {
        let n = self.invoice_counter.fetch_add(1, Ordering::SeqCst);
        let mut hash = [0u8; 32];
        hash[0..8].copy_from_slice(&n.to_be_bytes());
        Ok(Invoice {
            bolt11: format!("lnbcrt1_{}_{}", label, n),
            payment_hash: hash,
        })
    }

    async fn send_along_route(
        &self,
        route: &[ShortChannelId],
        _amount_msat: u64,
        _invoice: &Invoice,
        _timeout_secs: u64,
    ) -> anyhow::Result<PaymentOutcome> {
        self.payments_attempted.lock().unwrap().push(route.to_vec());
        let key = Self::route_key(route);
        match self.scripted.lock().unwrap().get(&key) {
            Some(ScriptedOutcome::Success { fee_msat }) => Ok(PaymentOutcome {
                success: true,
                fee_msat: *fee_msat,
                failed_hop: None,
                updated_channel_update: None,
            }),
            Some(ScriptedOutcome::Fail { at_hop, code }) => Ok(PaymentOutcome {
                success: false,
                fee_msat: 0,
                failed_hop: Some((*at_hop, code.to_string())),
                updated_channel_update: None,
            }),
            None => Ok(PaymentOutcome {
                success: false,
                fee_msat: 0,
                failed_hop: Some((0, "unknown_next_peer".to_string())),
                updated_channel_update: None,
            }),
        }
    }
}
