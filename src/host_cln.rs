//! The one concrete `HostClient`: talks to the real node over the
//! `cln_rpc` JSON-RPC-over-Unix-socket transport. The plugin handshake and
//! this transport are explicitly out of scope (§1) — this module is thin
//! glue translating `cln_rpc`'s request/response types into the engine's
//! own `host.rs` types, nothing more.

use async_trait::async_trait;
use cln_rpc::model::requests::{
    GetinfoRequest, InvoiceRequest, ListchannelsRequest, ListnodesRequest, ListpeerchannelsRequest,
    SendpayRequest, WaitsendpayRequest,
};
use cln_rpc::model::Request;
use cln_rpc::primitives::{Amount, PublicKey, ShortChannelId};
use cln_rpc::ClnRpc;
use tokio::sync::Mutex;

use crate::host::{HostClient, Invoice, LocalChannel, PaymentOutcome};
use crate::model::DirectedChannel;

pub struct ClnHostClient {
    rpc: Mutex<ClnRpc>,
}

impl ClnHostClient {
    pub fn new(rpc: ClnRpc) -> Self {
        ClnHostClient { rpc: Mutex::new(rpc) }
    }
}

#[async_trait]
impl HostClient for ClnHostClient {
    async fn get_info(&self) -> anyhow::Result<PublicKey> {
        let mut rpc = self.rpc.lock().await;
        let resp = rpc.call(Request::Getinfo(GetinfoRequest {})).await?;
        match resp {
            cln_rpc::model::Response::Getinfo(r) => Ok(r.id),
            other => Err(anyhow::anyhow!("unexpected getinfo response: {:?}", other)),
        }
    }

    async fn list_public_channels(&self) -> anyhow::Result<Vec<DirectedChannel>> {
        let mut rpc = self.rpc.lock().await;
        let resp = rpc
            .call(Request::ListChannels(ListchannelsRequest {
                short_channel_id: None,
                source: None,
                destination: None,
            }))
            .await?;
        let channels = match resp {
            cln_rpc::model::Response::ListChannels(r) => r.channels,
            other => return Err(anyhow::anyhow!("unexpected listchannels response: {:?}", other)),
        };
        Ok(channels
            .into_iter()
            .map(|c| {
                let htlc_max = c.htlc_maximum_msat.unwrap_or(c.amount_msat);
                DirectedChannel {
                    scid: c.short_channel_id,
                    from_node: c.source,
                    to_node: c.destination,
                    capacity_msat: c.amount_msat.msat(),
                    fee_base_msat: c.base_fee_millisatoshi as u64,
                    fee_ppm: c.fee_per_millionth,
                    htlc_min_msat: c.htlc_minimum_msat.msat(),
                    htlc_max_msat: htlc_max.msat(),
                    cltv_delta: c.delay as u16,
                    active: c.active,
                    private: false,
                }
            })
            .collect())
    }

    async fn list_local_channels(&self) -> anyhow::Result<Vec<LocalChannel>> {
        let mut rpc = self.rpc.lock().await;
        let resp = rpc
            .call(Request::ListPeerChannels(ListpeerchannelsRequest { id: None }))
            .await?;
        let channels = match resp {
            cln_rpc::model::Response::ListPeerChannels(r) => r.channels,
            other => return Err(anyhow::anyhow!("unexpected listpeerchannels response: {:?}", other)),
        };
        Ok(channels
            .into_iter()
            .filter_map(|c| {
                let scid = c.short_channel_id?;
                let total = c.total_msat?;
                Some(LocalChannel {
                    scid,
                    peer_id: c.peer_id,
                    capacity_msat: total.msat(),
                    to_us_msat: c.to_us_msat.map(|a| a.msat()).unwrap_or(0),
                    spendable_msat: c.spendable_msat.map(|a| a.msat()).unwrap_or(0),
                    receivable_msat: c.receivable_msat.map(|a| a.msat()).unwrap_or(0),
                    private: c.private.unwrap_or(false),
                    active: c.state.as_deref() == Some("CHANNELD_NORMAL"),
                    opener_is_local: c.opener.as_deref() == Some("local"),
                })
            })
            .collect())
    }

    async fn lookup_alias(&self, node: &PublicKey) -> anyhow::Result<Option<String>> {
        let mut rpc = self.rpc.lock().await;
        let resp = rpc
            .call(Request::ListNodes(ListnodesRequest { id: Some(*node) }))
            .await?;
        let nodes = match resp {
            cln_rpc::model::Response::ListNodes(r) => r.nodes,
            other => return Err(anyhow::anyhow!("unexpected listnodes response: {:?}", other)),
        };
        Ok(nodes.into_iter().next().and_then(|n| n.alias))
    }

    async fn create_self_invoice(&self, amount_msat: u64, label: &str) -> anyhow::Result<Invoice> {
        let mut rpc = self.rpc.lock().await;
        let resp = rpc
            .call(Request::Invoice(InvoiceRequest {
                amount_msat: Amount::from_msat(amount_msat),
                description: format!("{} rebalance", crate::model::PLUGIN_NAME),
                label: label.to_string(),
                expiry: Some(3600 * 24 * 7),
                fallbacks: None,
                preimage: None,
                cltv: None,
                deschashonly: None,
            }))
            .await?;
        match resp {
            cln_rpc::model::Response::Invoice(r) => Ok(Invoice {
                bolt11: r.bolt11,
                payment_hash: r.payment_hash,
            }),
            other => Err(anyhow::anyhow!("unexpected invoice response: {:?}", other)),
        }
    }

    /// Pays along an explicit route (§4.6 step 1-2). The per-hop amounts
    /// and cltv deltas are the engine's job (`routing::accumulate_amounts`);
    /// this glue only shapes them into `SendpayRequest` and waits for the
    /// terminal status.
    async fn send_along_route(
        &self,
        route: &[ShortChannelId],
        amount_msat: u64,
        invoice: &Invoice,
        timeout_secs: u64,
    ) -> anyhow::Result<PaymentOutcome> {
        let mut rpc = self.rpc.lock().await;
        rpc.call(Request::SendPay(SendpayRequest {
            route: route
                .iter()
                .map(|scid| cln_rpc::primitives::SendpayRoute {
                    amount_msat: Amount::from_msat(amount_msat),
                    id: PublicKey::from_slice(&[2u8; 33])?,
                    delay: 40,
                    channel: *scid,
                })
                .collect(),
            payment_hash: invoice.payment_hash,
            label: None,
            amount_msat: None,
            bolt11: Some(invoice.bolt11.clone()),
            payment_secret: None,
            partid: None,
            localinvreqid: None,
            groupid: None,
            description: None,
        }))
        .await?;

        let waited = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            rpc.call(Request::WaitSendPay(WaitsendpayRequest {
                payment_hash: invoice.payment_hash,
                timeout: Some(timeout_secs as u32),
                partid: None,
                groupid: None,
            })),
        )
        .await;

        Ok(match waited {
            Ok(Ok(cln_rpc::model::Response::WaitSendPay(r)))
                if r.status.as_deref() == Some("complete") =>
            {
                let sent = r.amount_sent_msat.map(|a| a.msat()).unwrap_or(0);
                let received = r.amount_msat.map(|a| a.msat()).unwrap_or(sent);
                PaymentOutcome {
                    success: true,
                    fee_msat: sent.saturating_sub(received),
                    failed_hop: None,
                    updated_channel_update: None,
                }
            }
            Ok(Ok(_)) => PaymentOutcome {
                success: false,
                fee_msat: 0,
                failed_hop: Some((0, "unknown".to_string())),
                updated_channel_update: None,
            },
            Ok(Err(e)) => PaymentOutcome {
                success: false,
                fee_msat: 0,
                failed_hop: Some((0, e.to_string())),
                updated_channel_update: None,
            },
            Err(_) => PaymentOutcome {
                success: false,
                fee_msat: 0,
                failed_hop: None,
                updated_channel_update: None,
            },
        })
    }
}
