//! C1: Graph & Alias Cache.
//!
//! Holds the latest merged view of public (gossip) and private (our own)
//! channels, plus the node-id -> alias map. Readers take an atomic snapshot
//! (an `Arc<GraphSnapshot>`) so in-flight workers never observe a partial
//! refresh (§4.1).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cln_rpc::primitives::{PublicKey, ShortChannelId};
use log::{info, warn};
use parking_lot::RwLock;

use crate::host::HostClient;
use crate::model::DirectedChannel;

/// An immutable view of the channel graph at one point in time.
#[derive(Debug, Default)]
pub struct GraphSnapshot {
    /// Outgoing directed edges, keyed by the source node.
    by_source: HashMap<PublicKey, Vec<DirectedChannel>>,
    /// Incoming directed edges, keyed by the destination node.
    by_dest: HashMap<PublicKey, Vec<DirectedChannel>>,
    /// All edges keyed by (scid, direction-as-from_node) for O(1) lookup.
    by_scid: HashMap<(ShortChannelId, PublicKey), DirectedChannel>,
    aliases: HashMap<PublicKey, String>,
    public_edge_count: usize,
    private_edge_count: usize,
}

impl GraphSnapshot {
    pub fn directed_edges_from(&self, node: &PublicKey) -> &[DirectedChannel] {
        self.by_source
            .get(node)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Edges whose `to_node` is `node` — the return hop of a push job's
    /// own side (§4.5 constraint 1).
    pub fn directed_edges_to(&self, node: &PublicKey) -> &[DirectedChannel] {
        self.by_dest
            .get(node)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn edge(&self, scid: &ShortChannelId, from_node: &PublicKey) -> Option<&DirectedChannel> {
        self.by_scid.get(&(*scid, *from_node))
    }

    /// Looks up an edge by scid regardless of direction (used when a job
    /// only knows the scid and its own direction convention).
    pub fn edge_either_direction(&self, scid: &ShortChannelId) -> Vec<&DirectedChannel> {
        self.by_scid
            .iter()
            .filter(|((s, _), _)| s == scid)
            .map(|(_, c)| c)
            .collect()
    }

    pub fn lookup_alias(&self, node: &PublicKey) -> Option<&str> {
        self.aliases.get(node).map(|s| s.as_str())
    }

    pub fn count_public(&self) -> usize {
        self.public_edge_count
    }

    pub fn count_private(&self) -> usize {
        self.private_edge_count
    }

    pub fn contains_scid(&self, scid: &ShortChannelId) -> bool {
        self.by_scid.keys().any(|(s, _)| s == scid)
    }

    /// Every directed edge currently known, in no particular order.
    pub fn all_edges(&self) -> Vec<DirectedChannel> {
        self.by_scid.values().cloned().collect()
    }
}

struct Builder {
    by_source: HashMap<PublicKey, Vec<DirectedChannel>>,
    by_dest: HashMap<PublicKey, Vec<DirectedChannel>>,
    by_scid: HashMap<(ShortChannelId, PublicKey), DirectedChannel>,
    public_edge_count: usize,
    private_edge_count: usize,
}

impl Builder {
    fn new() -> Self {
        Builder {
            by_source: HashMap::new(),
            by_dest: HashMap::new(),
            by_scid: HashMap::new(),
            public_edge_count: 0,
            private_edge_count: 0,
        }
    }

    fn insert(&mut self, edge: DirectedChannel) {
        if edge.private {
            self.private_edge_count += 1;
        } else {
            self.public_edge_count += 1;
        }
        self.by_scid
            .insert((edge.scid, edge.from_node), edge.clone());
        self.by_dest.entry(edge.to_node).or_default().push(edge.clone());
        self.by_source.entry(edge.from_node).or_default().push(edge);
    }

    fn build(self, aliases: HashMap<PublicKey, String>) -> GraphSnapshot {
        GraphSnapshot {
            by_source: self.by_source,
            by_dest: self.by_dest,
            by_scid: self.by_scid,
            aliases,
            public_edge_count: self.public_edge_count,
            private_edge_count: self.private_edge_count,
        }
    }
}

/// Owns the current snapshot and knows how to refresh it from the host.
pub struct GraphCache {
    current: RwLock<Arc<GraphSnapshot>>,
}

impl Default for GraphCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphCache {
    pub fn new() -> Self {
        GraphCache {
            current: RwLock::new(Arc::new(GraphSnapshot::default())),
        }
    }

    pub fn current(&self) -> Arc<GraphSnapshot> {
        self.current.read().clone()
    }

    /// Pulls public + private channels and the alias map from the host and
    /// atomically swaps in a new snapshot. On host failure the previous
    /// snapshot is kept and a warning is logged (§4.1).
    pub async fn refresh(&self, host: &dyn HostClient) {
        let my_id = match host.get_info().await {
            Ok(id) => id,
            Err(e) => {
                warn!("sling: failed to refresh graph: {}", e);
                return;
            }
        };

        let public = match host.list_public_channels().await {
            Ok(p) => p,
            Err(e) => {
                warn!("sling: failed to refresh graph: {}", e);
                return;
            }
        };

        let local = match host.list_local_channels().await {
            Ok(l) => l,
            Err(e) => {
                warn!("sling: failed to refresh graph: {}", e);
                return;
            }
        };

        let mut builder = Builder::new();
        for edge in public {
            builder.insert(edge);
        }

        // Private channels are included on both endpoints when the remote
        // endpoint is known; otherwise they are still routable as the
        // first/last hop but not mid-path (§4.1). We model the "unknown
        // remote endpoint" case by only inserting the edge we can observe
        // directly from our own peer-channel listing.
        let mut seen_private_scids = HashSet::new();
        for lc in &local {
            if !lc.private {
                continue;
            }
            seen_private_scids.insert(lc.scid);
            let out_edge = DirectedChannel {
                scid: lc.scid,
                from_node: my_id,
                to_node: lc.peer_id,
                capacity_msat: lc.capacity_msat,
                fee_base_msat: 0,
                fee_ppm: 0,
                htlc_min_msat: 1,
                htlc_max_msat: lc.capacity_msat,
                cltv_delta: 40,
                active: lc.active,
                private: true,
            };
            let in_edge = DirectedChannel {
                scid: lc.scid,
                from_node: lc.peer_id,
                to_node: my_id,
                capacity_msat: lc.capacity_msat,
                fee_base_msat: 0,
                fee_ppm: 0,
                htlc_min_msat: 1,
                htlc_max_msat: lc.capacity_msat,
                cltv_delta: 40,
                active: lc.active,
                private: true,
            };
            builder.insert(out_edge);
            builder.insert(in_edge);
        }

        let aliases = {
            let mut map = HashMap::new();
            let mut nodes: HashSet<PublicKey> = builder.by_source.keys().copied().collect();
            nodes.insert(my_id);
            for node in nodes {
                if let Ok(Some(alias)) = host.lookup_alias(&node).await {
                    map.insert(node, alias);
                }
            }
            map
        };

        let snapshot = builder.build(aliases);
        info!("sling: Added {} public channels", snapshot.public_edge_count);
        info!("sling: Added {} private channels", snapshot.private_edge_count);

        *self.current.write() = Arc::new(snapshot);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Builds a `GraphSnapshot` directly from a list of edges, bypassing
    /// the host refresh path. Used by other modules' unit tests.
    pub(crate) fn snapshot_from_edges(edges: Vec<DirectedChannel>) -> GraphSnapshot {
        let mut builder = Builder::new();
        for edge in edges {
            builder.insert(edge);
        }
        builder.build(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn pubkey(byte: u8) -> PublicKey {
        let mut bytes = [0u8; 33];
        bytes[0] = 0x02;
        bytes[32] = byte;
        PublicKey::from_slice(&bytes).unwrap()
    }

    fn edge(scid: &str, from: PublicKey, to: PublicKey, private: bool) -> DirectedChannel {
        DirectedChannel {
            scid: ShortChannelId::from_str(scid).unwrap(),
            from_node: from,
            to_node: to,
            capacity_msat: 1_000_000_000,
            fee_base_msat: 0,
            fee_ppm: 0,
            htlc_min_msat: 1,
            htlc_max_msat: 1_000_000_000,
            cltv_delta: 40,
            active: true,
            private,
        }
    }

    #[test]
    fn builder_counts_public_and_private_separately() {
        let a = pubkey(1);
        let b = pubkey(2);
        let mut builder = Builder::new();
        builder.insert(edge("1x1x0", a, b, false));
        builder.insert(edge("1x1x0", b, a, false));
        builder.insert(edge("2x2x0", a, b, true));
        let snap = builder.build(HashMap::new());
        assert_eq!(snap.count_public(), 2);
        assert_eq!(snap.count_private(), 1);
        assert!(snap.contains_scid(&ShortChannelId::from_str("2x2x0").unwrap()));
    }

    #[test]
    fn edge_lookup_is_directional() {
        let a = pubkey(1);
        let b = pubkey(2);
        let mut builder = Builder::new();
        builder.insert(edge("1x1x0", a, b, false));
        let snap = builder.build(HashMap::new());
        assert!(snap.edge(&ShortChannelId::from_str("1x1x0").unwrap(), &a).is_some());
        assert!(snap.edge(&ShortChannelId::from_str("1x1x0").unwrap(), &b).is_none());
    }
}
