//! Narrow interface to the host Core Lightning node.
//!
//! The plugin handshake, the wire transport (`cln_rpc`'s JSON-RPC-over-
//! Unix-socket client), and the on-disk gossip-store format are explicitly
//! out of scope (§1) — they are thin glue around this trait. Everything in
//! C1-C7 talks to the host exclusively through `HostClient`, which makes
//! the engine testable against an in-process fake (see `tests/support`).

use async_trait::async_trait;
use cln_rpc::primitives::{PublicKey, ShortChannelId};

use crate::model::DirectedChannel;

/// A channel as reported by the host's own peer list (`listpeerchannels`),
/// i.e. one of our own channels, with live balance info gossip doesn't
/// carry.
#[derive(Debug, Clone)]
pub struct LocalChannel {
    pub scid: ShortChannelId,
    pub peer_id: PublicKey,
    pub capacity_msat: u64,
    pub to_us_msat: u64,
    pub spendable_msat: u64,
    pub receivable_msat: u64,
    pub private: bool,
    pub active: bool,
    /// `true` when the channel was opened by us (used to classify which
    /// endpoint owns a directed edge when both sides are local).
    pub opener_is_local: bool,
}

#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub success: bool,
    pub fee_msat: u64,
    /// Present on failure: the 0-based index of the hop that reported the
    /// failure, and the BOLT-4 error name as the host reports it.
    pub failed_hop: Option<(u8, String)>,
    /// Updated htlc bounds / fee hints the host attached to a retryable
    /// failure (fee_insufficient, incorrect_cltv_expiry, expiry_too_soon,
    /// amount_below_minimum, amount_above_maximum).
    pub updated_channel_update: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct Invoice {
    pub bolt11: String,
    pub payment_hash: [u8; 32],
}

/// Everything the engine needs from the host node.
#[async_trait]
pub trait HostClient: Send + Sync {
    /// Our own node id.
    async fn get_info(&self) -> anyhow::Result<PublicKey>;

    /// Public channels from the gossip store, both directions.
    async fn list_public_channels(&self) -> anyhow::Result<Vec<DirectedChannel>>;

    /// Our own channels (public and private), as the host's peer-channel
    /// listing reports them.
    async fn list_local_channels(&self) -> anyhow::Result<Vec<LocalChannel>>;

    /// Node alias lookup, populated from gossip `node_announcement`s.
    async fn lookup_alias(&self, node: &PublicKey) -> anyhow::Result<Option<String>>;

    /// Creates a self-payment invoice with a random label and long expiry
    /// (§4.6 step 1).
    async fn create_self_invoice(&self, amount_msat: u64, label: &str) -> anyhow::Result<Invoice>;

    /// Submits the `sendpay`-equivalent call with an explicit route and
    /// awaits the terminal outcome, or times out after `timeout_secs`.
    async fn send_along_route(
        &self,
        route: &[ShortChannelId],
        amount_msat: u64,
        invoice: &Invoice,
        timeout_secs: u64,
    ) -> anyhow::Result<PaymentOutcome>;
}
