//! Gossip network (C8): UDP peer table, keepalive flood, and block
//! republish (§4.7).
//!
//! A [`PeerTable`] tracks every endpoint this node has exchanged traffic
//! with, along with its negotiated protocol version, an optional node
//! identity, its delegated representative weight, and when it was last
//! heard from. [`GossipSocket`] wraps the UDP transport: it floods
//! keepalives to known peers and republishes newly-admitted blocks to a
//! weighted sample of them (§5 "no global lock is held across I/O" — the
//! peer table uses its own fine-grained mutex, separate from the store).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tokio::net::UdpSocket;

use crate::block::StateBlock;
use crate::network::NetworkParams;
use crate::numbers::{Account, Amount};
use crate::wire::{self, AcceptAnyWork, Keepalive, Message, ParseStatus, Publish, WorkValidator};

/// A peer is dropped from the table if nothing has been heard from it in
/// this long (§4.7 "UDP keepalives flood every N seconds" implies the
/// converse: silence past a few missed intervals means the peer is gone).
pub const PEER_EXPIRY: Duration = Duration::from_secs(300);

/// Default keepalive flood interval.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Number of peers `republish_block` selects (§4.7 "K peers").
pub const REPUBLISH_FANOUT: usize = 8;

/// Minimum spacing enforced between two republishes of the *same* block
/// hash, so a storm of duplicate `publish`/vote traffic for one root can't
/// make `republish_block` flood the network (§4.7 "bounded rate").
pub const REPUBLISH_MIN_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug)]
pub struct PeerEntry {
    pub addr: SocketAddr,
    pub version: u8,
    pub node_id: Option<Account>,
    pub rep_weight: Amount,
    pub last_seen: Instant,
}

/// Peer table (§4.7): endpoints mapped to what this node knows about them.
/// Guarded by its own mutex, never the store's (§5).
#[derive(Default)]
pub struct PeerTable {
    peers: Mutex<HashMap<SocketAddr, PeerEntry>>,
    last_republished: Mutex<HashMap<crate::numbers::Hash, Instant>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records contact from `addr`, creating the entry if new. Does not
    /// overwrite a known `rep_weight` with zero — that is only ever
    /// updated explicitly via [`PeerTable::set_weight`].
    pub fn observed(&self, addr: SocketAddr, version: u8) {
        let mut peers = self.peers.lock();
        peers
            .entry(addr)
            .and_modify(|p| {
                p.version = version;
                p.last_seen = Instant::now();
            })
            .or_insert(PeerEntry {
                addr,
                version,
                node_id: None,
                rep_weight: Amount::ZERO,
                last_seen: Instant::now(),
            });
    }

    pub fn set_node_id(&self, addr: SocketAddr, node_id: Account) {
        if let Some(entry) = self.peers.lock().get_mut(&addr) {
            entry.node_id = Some(node_id);
        }
    }

    pub fn set_weight(&self, addr: SocketAddr, weight: Amount) {
        if let Some(entry) = self.peers.lock().get_mut(&addr) {
            entry.rep_weight = weight;
        }
    }

    /// Drops every peer not heard from within [`PEER_EXPIRY`]. Returns how
    /// many were dropped.
    pub fn prune_expired(&self) -> usize {
        let mut peers = self.peers.lock();
        let before = peers.len();
        peers.retain(|_, p| p.last_seen.elapsed() < PEER_EXPIRY);
        before - peers.len()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn snapshot(&self) -> Vec<PeerEntry> {
        self.peers.lock().values().copied().collect()
    }

    /// Selects up to `k` distinct peers, weighted toward higher
    /// `rep_weight` (§4.7 "selects K peers weighted toward higher rep
    /// weight"). Peers with zero weight still have a nonzero chance of
    /// being picked (a weight of 1 is added to every entry before
    /// sampling) so brand-new or non-representative peers aren't starved
    /// of republishes entirely.
    pub fn select_weighted(&self, k: usize) -> Vec<SocketAddr> {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return Vec::new();
        }
        let mut pool: Vec<(SocketAddr, u128)> = snapshot
            .iter()
            .map(|p| (p.addr, p.rep_weight.0 as u128 + 1))
            .collect();
        let mut chosen = Vec::with_capacity(k.min(pool.len()));
        let mut rng = rand::thread_rng();
        while !pool.is_empty() && chosen.len() < k {
            let total: u128 = pool.iter().map(|(_, w)| *w).sum();
            let mut pick = rng.gen_range(0..total);
            let mut idx = 0;
            for (i, (_, w)) in pool.iter().enumerate() {
                if pick < *w {
                    idx = i;
                    break;
                }
                pick -= *w;
            }
            chosen.push(pool.remove(idx).0);
        }
        chosen
    }

    /// Whether `hash` may be republished now, given [`REPUBLISH_MIN_INTERVAL`].
    /// Records the attempt as "just republished" when it returns `true`.
    fn try_claim_republish(&self, hash: crate::numbers::Hash) -> bool {
        let mut last = self.last_republished.lock();
        match last.get(&hash) {
            Some(t) if t.elapsed() < REPUBLISH_MIN_INTERVAL => false,
            _ => {
                last.insert(hash, Instant::now());
                true
            }
        }
    }
}

/// Owns the UDP socket side of the gossip network (§4.7). All outbound
/// traffic goes through [`GossipSocket::send_to`]; inbound datagrams are
/// read and parsed one at a time by [`GossipSocket::recv`].
pub struct GossipSocket {
    socket: UdpSocket,
    params: NetworkParams,
    work_validator: Arc<dyn WorkValidator>,
}

impl GossipSocket {
    pub async fn bind(addr: SocketAddr, params: NetworkParams) -> std::io::Result<Self> {
        Self::bind_with_validator(addr, params, Arc::new(AcceptAnyWork)).await
    }

    /// Like [`Self::bind`], but with an explicit proof-of-work validator
    /// (§4.6 "refuses blocks whose proof-of-work fails validation before
    /// dispatching to handlers") instead of the permissive default.
    pub async fn bind_with_validator(
        addr: SocketAddr,
        params: NetworkParams,
        work_validator: Arc<dyn WorkValidator>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(GossipSocket { socket, params, work_validator })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    async fn send(&self, message: &Message, to: SocketAddr) -> std::io::Result<()> {
        let mut bytes = Vec::new();
        wire::serialize_message(&self.params, message, &mut bytes);
        self.socket.send_to(&bytes, to).await?;
        Ok(())
    }

    pub async fn send_keepalive(&self, to: SocketAddr, peers: Keepalive) -> std::io::Result<()> {
        self.send(&Message::Keepalive(peers), to).await
    }

    /// Floods a keepalive carrying up to 8 known peer addresses (§4.6) to
    /// every entry currently in `table` (§4.7 "UDP keepalives flood every
    /// N seconds").
    pub async fn flood_keepalive(&self, table: &PeerTable) -> std::io::Result<()> {
        let snapshot = table.snapshot();
        let sample: Vec<SocketAddr> = snapshot.iter().map(|p| p.addr).take(wire::KEEPALIVE_PEER_COUNT).collect();
        let mut peers = Keepalive::default();
        for (slot, addr) in peers.peers.iter_mut().zip(sample.iter()) {
            if let SocketAddr::V6(v6) = addr {
                *slot = wire::PeerAddr { ipv6: v6.ip().octets(), port: v6.port() };
            } else if let SocketAddr::V4(v4) = addr {
                let mut ipv6 = [0u8; 16];
                ipv6[10] = 0xff;
                ipv6[11] = 0xff;
                ipv6[12..].copy_from_slice(&v4.ip().octets());
                *slot = wire::PeerAddr { ipv6, port: v4.port() };
            }
        }
        for p in snapshot {
            self.send_keepalive(p.addr, peers).await?;
        }
        Ok(())
    }

    /// Republishes `block` to a weighted sample of `table`'s peers (§4.7
    /// "`republish_block` serializes a block and selects K peers weighted
    /// toward higher rep weight; bounded rate"). No-op if the same hash
    /// was republished within [`REPUBLISH_MIN_INTERVAL`].
    pub async fn republish_block(&self, table: &PeerTable, block: &StateBlock) -> std::io::Result<()> {
        if !table.try_claim_republish(block.hash()) {
            return Ok(());
        }
        let message = Message::Publish(Publish { block: *block });
        for addr in table.select_weighted(REPUBLISH_FANOUT) {
            self.send(&message, addr).await?;
        }
        Ok(())
    }

    /// Receives and parses one datagram, recording the sender in `table`
    /// on success. Parse failures never propagate as I/O errors (§7
    /// "network parse errors never crash the process") — they come back
    /// as `Err(ParseStatus)` alongside the sender so the caller can bump a
    /// counter and move on.
    pub async fn recv(&self, table: &PeerTable) -> std::io::Result<(SocketAddr, Result<Message, ParseStatus>)> {
        let mut buf = [0u8; wire::MAX_SAFE_UDP_MESSAGE_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        let datagram = &buf[..len];
        let parsed = wire::parse_message(&self.params, datagram, self.work_validator.as_ref());
        if parsed.is_ok() {
            let version = wire::MessageHeader::deserialize(datagram).map(|h| h.version).unwrap_or(0);
            table.observed(from, version);
        }
        Ok((from, parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn peer_table_tracks_observed_peers() {
        let table = PeerTable::new();
        table.observed(addr(1001), 1);
        table.observed(addr(1002), 1);
        assert_eq!(table.peer_count(), 2);
    }

    #[test]
    fn prune_expired_drops_nothing_when_fresh() {
        let table = PeerTable::new();
        table.observed(addr(1001), 1);
        assert_eq!(table.prune_expired(), 0);
        assert_eq!(table.peer_count(), 1);
    }

    #[test]
    fn select_weighted_prefers_higher_weight_over_many_draws() {
        let table = PeerTable::new();
        table.observed(addr(1), 1);
        table.observed(addr(2), 1);
        table.set_weight(addr(1), Amount(1_000_000));
        table.set_weight(addr(2), Amount(1));

        let mut heavy_hits = 0;
        for _ in 0..200 {
            if table.select_weighted(1) == vec![addr(1)] {
                heavy_hits += 1;
            }
        }
        assert!(heavy_hits > 150, "heavy_hits={heavy_hits}");
    }

    #[test]
    fn select_weighted_never_returns_duplicates() {
        let table = PeerTable::new();
        for i in 0..5 {
            table.observed(addr(1000 + i), 1);
        }
        let chosen = table.select_weighted(10);
        assert_eq!(chosen.len(), 5);
        let mut sorted = chosen.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), chosen.len());
    }

    #[test]
    fn republish_claim_is_rate_limited_per_hash() {
        let table = PeerTable::new();
        let hash = crate::numbers::Hash([7u8; 32]);
        assert!(table.try_claim_republish(hash));
        assert!(!table.try_claim_republish(hash));
    }
}
