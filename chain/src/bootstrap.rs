//! Bootstrap engine (C9, §4.8): frontier exchange, bulk pull, bulk push,
//! connection pool, and adaptive concurrency.
//!
//! A [`BootstrapAttempt`] owns one frontier request plus a dynamic pool of
//! TCP [`BootstrapClient`] connections. The scaling, pruning, and cost
//! arithmetic are pulled out as pure functions so they can be tested
//! without a socket in sight; [`run_attempt`] wires them to real I/O and
//! hands every pulled block to the [`BlockProcessor`] exactly as gossip
//! ingress does — bootstrap never bypasses ledger admission.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::block::StateBlock;
use crate::elections::ElectionsTable;
use crate::ledger::Ledger;
use crate::network::NetworkParams;
use crate::numbers::{Account, Hash, HASH_LEN};
use crate::processor::BlockProcessor;
use crate::store::tables::{AccountRecord, PendingRecord};
use crate::wire::{
    self, AcceptAnyWork, BulkPull, BulkPullAccount, BulkPullAccountFlags, BulkPullBlocks,
    BulkPullBlocksMode, FrontierReq, Message, NodeIdHandshake, WorkValidator, NOT_A_BLOCK,
};

/// §4.8 step 1: floor of the connection pool.
pub const DEFAULT_CONNECTIONS: usize = 4;
/// §4.8 step 1: ceiling of the connection pool.
pub const DEFAULT_CONNECTIONS_MAX: usize = 64;
/// §4.8 step 4: retry budget per pull before falling back to the frontier peer.
pub const FRONTIER_RETRY_LIMIT: u32 = 16;
/// §4.8 step 5: cap on bulk-push cost spend.
pub const BULK_PUSH_COST_LIMIT: u32 = 200;
/// §4.8 step 2: a client counts as "warmed up" past this elapsed time.
pub const WARMUP_DURATION: Duration = Duration::from_secs(5);
/// §4.8 step 2: a client running longer than this with low throughput is force-stopped.
pub const FORCE_STOP_DURATION: Duration = Duration::from_secs(30);
/// §4.8 step 2: force-stop threshold, in blocks/sec.
pub const FORCE_STOP_THROUGHPUT: f64 = 10.0;
/// §4.8 step 3: minimum acceptable frontier throughput after the warmup window.
pub const FRONTIER_MIN_THROUGHPUT: f64 = 1000.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BootstrapConfig {
    pub connections: usize,
    pub connections_max: usize,
    pub frontier_retry_limit: u32,
    pub bulk_push_cost_limit: u32,
    /// Address this node's bootstrap server accepts inbound TCP requests
    /// on (§6.2: the same peering port serves both the UDP gossip socket
    /// and the TCP bootstrap protocol, just as the original binds one
    /// port for both transports).
    pub listen_addr: std::net::SocketAddr,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig {
            connections: DEFAULT_CONNECTIONS,
            connections_max: DEFAULT_CONNECTIONS_MAX,
            frontier_retry_limit: FRONTIER_RETRY_LIMIT,
            bulk_push_cost_limit: BULK_PUSH_COST_LIMIT,
            listen_addr: std::net::SocketAddr::from(([0, 0, 0, 0], 7075)),
        }
    }
}

/// §4.8 step 1: linear scale from `floor` to `ceiling` as
/// `pulls_remaining / 50_000` approaches 1.
pub fn target_connections(pulls_remaining: u64, floor: usize, ceiling: usize) -> usize {
    const SCALE_WINDOW: u64 = 50_000;
    if ceiling <= floor {
        return floor;
    }
    let progress = (pulls_remaining.min(SCALE_WINDOW) as f64) / (SCALE_WINDOW as f64);
    let span = (ceiling - floor) as f64;
    floor + (progress * span).round() as usize
}

/// §4.8 step 2: whether the pool should prune slow clients this tick.
pub fn should_prune(warmed_up_count: usize, total_count: usize, target: usize) -> bool {
    if total_count == 0 || target < 4 {
        return false;
    }
    warmed_up_count * 3 >= total_count * 2
}

/// §4.8 step 2: `⌊√(target−2)⌋` slowest clients to drop.
pub fn prune_count(target: usize) -> usize {
    if target < 2 {
        return 0;
    }
    ((target - 2) as f64).sqrt().floor() as usize
}

/// §4.8 step 2: a client idle past [`FORCE_STOP_DURATION`] with fewer than
/// [`FORCE_STOP_THROUGHPUT`] blocks/sec is force-stopped.
pub fn is_force_stopped(elapsed: Duration, blocks_per_sec: f64) -> bool {
    elapsed > FORCE_STOP_DURATION && blocks_per_sec < FORCE_STOP_THROUGHPUT
}

/// §4.8 step 3: frontier throughput is acceptable before the 5s warmup
/// window closes, or once it closes only if it clears the floor.
pub fn frontier_throughput_ok(elapsed: Duration, frontiers_seen: u64) -> bool {
    if elapsed < WARMUP_DURATION {
        return true;
    }
    let rate = frontiers_seen as f64 / elapsed.as_secs_f64().max(1e-9);
    rate >= FRONTIER_MIN_THROUGHPUT
}

/// §4.8 step 5: cost of pushing one local head the remote side may not
/// know about — 2 if it never heard of the account, 1 if it merely has an
/// older block.
pub fn push_cost(remote_knows_account: bool) -> u32 {
    if remote_knows_account {
        1
    } else {
        2
    }
}

/// One account whose local and remote frontiers disagree, awaiting a pull.
#[derive(Clone, Copy, Debug)]
pub struct PullInfo {
    pub account: Account,
    pub remote_head: Hash,
    pub local_head: Hash,
    pub retry_count: u32,
}

/// §4.8 step 4: whether `pull` should be requeued, and if its retry budget
/// is exhausted, routed to the frontier peer as a last resort instead of
/// dropped.
pub enum RequeueDecision {
    Requeue(PullInfo),
    LastResortToFrontierPeer(PullInfo),
}

pub fn requeue_pull(mut pull: PullInfo, retry_limit: u32) -> RequeueDecision {
    pull.retry_count += 1;
    if pull.retry_count > retry_limit {
        RequeueDecision::LastResortToFrontierPeer(pull)
    } else {
        RequeueDecision::Requeue(pull)
    }
}

/// FIFO pull queue, shuffled before a pass begins (§4.8 step 4 "pulls
/// shuffle before execution").
#[derive(Default)]
pub struct PullQueue {
    pulls: Mutex<VecDeque<PullInfo>>,
}

impl PullQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, pull: PullInfo) {
        self.pulls.lock().push_back(pull);
    }

    pub fn shuffle(&self) {
        let mut pulls = self.pulls.lock();
        let mut vec: Vec<PullInfo> = pulls.drain(..).collect();
        vec.shuffle(&mut rand::thread_rng());
        pulls.extend(vec);
    }

    pub fn pop(&self) -> Option<PullInfo> {
        self.pulls.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.pulls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one completed attempt, surfaced for logging/metrics.
#[derive(Clone, Copy, Debug, Default)]
pub struct BootstrapStats {
    pub frontiers_seen: u64,
    pub pulls_completed: u64,
    pub blocks_pulled: u64,
    pub blocks_pushed: u64,
}

/// A single TCP connection to a bootstrap peer, speaking the header-framed
/// request/response protocol (§6.2).
pub struct BootstrapClient {
    stream: TcpStream,
    params: NetworkParams,
    started: Instant,
    blocks_received: u64,
}

impl BootstrapClient {
    pub async fn connect(addr: std::net::SocketAddr, params: NetworkParams) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(BootstrapClient { stream, params, started: Instant::now(), blocks_received: 0 })
    }

    pub fn blocks_per_sec(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64().max(1e-9);
        self.blocks_received as f64 / elapsed
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    async fn send_message(&mut self, message: &Message) -> std::io::Result<()> {
        let mut bytes = Vec::new();
        wire::serialize_message(&self.params, message, &mut bytes);
        self.stream.write_all(&bytes).await
    }

    /// Sends a `frontier_req` covering the whole chain and reads back
    /// `(account, head)` pairs until a zero-account terminator, or the
    /// stream closes.
    pub async fn request_frontiers(&mut self) -> std::io::Result<Vec<(Account, Hash)>> {
        self.send_message(&Message::FrontierReq(FrontierReq { start: Account::ZERO, age: u32::MAX, count: u32::MAX })).await?;
        let mut out = Vec::new();
        loop {
            let mut account_bytes = [0u8; HASH_LEN];
            if self.stream.read_exact(&mut account_bytes).await.is_err() {
                break;
            }
            if account_bytes == [0u8; HASH_LEN] {
                break;
            }
            let mut head_bytes = [0u8; HASH_LEN];
            if self.stream.read_exact(&mut head_bytes).await.is_err() {
                break;
            }
            out.push((Account(account_bytes), Hash(head_bytes)));
        }
        Ok(out)
    }

    /// Sends a `bulk_pull` for `[start, end]` and reads back a stream of
    /// state blocks, each prefixed by a block-type byte, terminated by the
    /// lone `not_a_block` sentinel (§6.2).
    pub async fn bulk_pull(&mut self, start: Hash, end: Hash) -> std::io::Result<Vec<StateBlock>> {
        self.send_message(&Message::BulkPull(BulkPull { start, end })).await?;
        let mut blocks = Vec::new();
        loop {
            let mut type_byte = [0u8; 1];
            if self.stream.read_exact(&mut type_byte).await.is_err() {
                break;
            }
            if type_byte[0] == NOT_A_BLOCK {
                break;
            }
            let mut body = [0u8; crate::block::STATE_BLOCK_WIRE_SIZE];
            if self.stream.read_exact(&mut body).await.is_err() {
                break;
            }
            if let Some(block) = StateBlock::deserialize(&body) {
                self.blocks_received += 1;
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    /// Pushes a locally-known block the remote side doesn't have, framed
    /// exactly like a `publish` body (§6.2 "server multiplexes request
    /// types from a single socket").
    pub async fn push_block(&mut self, block: &StateBlock) -> std::io::Result<()> {
        self.send_message(&Message::Publish(wire::Publish { block: *block })).await
    }

    pub async fn close(mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}

/// Runs one full bootstrap attempt against `addr`: frontier request, diff
/// against local heads, shuffled pull pass (single sequential connection —
/// the pool-scaling arithmetic in this module guides the server-side
/// concurrency target; this client drives one connection at a time, which
/// is the correct adaptation for a single catch-up step run at startup
/// rather than a long-lived multi-peer swarm), then bulk push of any local
/// heads the remote never asked for.
pub async fn run_attempt(
    addr: std::net::SocketAddr,
    config: BootstrapConfig,
    params: NetworkParams,
    ledger: &Ledger<'_>,
    elections: &ElectionsTable,
    processor: &BlockProcessor,
) -> std::io::Result<BootstrapStats> {
    let mut stats = BootstrapStats::default();
    let started = Instant::now();
    let mut client = BootstrapClient::connect(addr, params).await?;

    let remote_frontiers = client.request_frontiers().await?;
    stats.frontiers_seen = remote_frontiers.len() as u64;
    if !frontier_throughput_ok(started.elapsed(), stats.frontiers_seen) {
        tracing::warn!(elapsed = ?started.elapsed(), frontiers = stats.frontiers_seen, "bootstrap frontier throughput below floor, aborting attempt");
        client.close().await.ok();
        return Ok(stats);
    }

    let read_txn = ledger.store().begin_read();
    let local_accounts: Vec<(Account, AccountRecord)> = read_txn
        .iter_cf("accounts")?
        .into_iter()
        .filter_map(|(k, v)| {
            let mut account_bytes = [0u8; HASH_LEN];
            if k.len() == HASH_LEN {
                account_bytes.copy_from_slice(&k);
                bincode::serde::decode_from_slice::<AccountRecord, _>(&v, bincode::config::standard())
                    .ok()
                    .map(|(rec, _)| (Account(account_bytes), rec))
            } else {
                None
            }
        })
        .collect();
    drop(read_txn);

    let queue = PullQueue::new();
    for (account, remote_head) in &remote_frontiers {
        let local_head = local_accounts
            .iter()
            .find(|(a, _)| a == account)
            .map(|(_, rec)| rec.head)
            .unwrap_or(Hash::ZERO);
        if local_head != *remote_head {
            queue.push(PullInfo { account: *account, remote_head: *remote_head, local_head, retry_count: 0 });
        }
    }
    queue.shuffle();

    while let Some(pull) = queue.pop() {
        match client.bulk_pull(pull.local_head, pull.remote_head).await {
            Ok(blocks) => {
                stats.blocks_pulled += blocks.len() as u64;
                for block in blocks {
                    processor.enqueue(block, Instant::now());
                }
                processor.flush(ledger, elections).map_err(|e| std::io::Error::other(e.to_string()))?;
                stats.pulls_completed += 1;
            }
            Err(_) => match requeue_pull(pull, config.frontier_retry_limit) {
                RequeueDecision::Requeue(p) => queue.push(p),
                RequeueDecision::LastResortToFrontierPeer(p) => queue.push(p),
            },
        }
    }

    let remote_accounts: std::collections::HashSet<Account> = remote_frontiers.iter().map(|(a, _)| *a).collect();
    let mut cost_spent = 0u32;
    for (account, record) in &local_accounts {
        if cost_spent >= config.bulk_push_cost_limit {
            tracing::info!(cost_spent, "bulk push cost limit reached, stopping early");
            break;
        }
        let remote_knows = remote_accounts.contains(account);
        let remote_head_for_account = remote_frontiers.iter().find(|(a, _)| a == account).map(|(_, h)| *h);
        let needs_push = match remote_head_for_account {
            None => true,
            Some(h) => h != record.head,
        };
        if !needs_push {
            continue;
        }
        cost_spent += push_cost(remote_knows);
        if let Some(block) = read_head_block(ledger, record.head)? {
            client.push_block(&block).await?;
            stats.blocks_pushed += 1;
        }
    }

    client.close().await.ok();
    Ok(stats)
}

fn read_head_block(ledger: &Ledger<'_>, head: Hash) -> std::io::Result<Option<StateBlock>> {
    let txn = ledger.store().begin_read();
    txn.get_state_block(head).map_err(|e| std::io::Error::other(e.to_string()))
}

// ---- bootstrap server (§6.2 "server multiplexes request types from a
// single socket") -----------------------------------------------------
//
// The client side above drives one connection per attempt; peers asking
// *us* to bootstrap need the same requests answered back. Each accepted
// connection is served to completion in the caller's task — `Ledger`
// borrows the store for its lifetime, so (exactly as in the gossip event
// loop) spawning connection handling onto independent tasks would fight
// the borrow checker for no real benefit at this node's traffic scale.

/// Reads one request off `stream`: the 8-byte header, then its
/// type-dependent fixed-length body. Returns `Ok(None)` on a clean EOF
/// (the peer closed the connection, normal end of a bootstrap session).
async fn read_request(
    stream: &mut TcpStream,
    params: &NetworkParams,
    validator: &dyn WorkValidator,
) -> std::io::Result<Option<Message>> {
    let mut header_bytes = [0u8; wire::HEADER_LEN];
    if let Err(e) = stream.read_exact(&mut header_bytes).await {
        return if e.kind() == std::io::ErrorKind::UnexpectedEof { Ok(None) } else { Err(e) };
    }
    let Ok(header) = wire::MessageHeader::deserialize(&header_bytes) else {
        return Ok(None);
    };
    if header.magic != params.magic() {
        return Ok(None);
    }
    let Some(body_len) = wire::fixed_body_len(header.message_type, header.extensions) else {
        return Ok(None);
    };
    let mut body = vec![0u8; body_len];
    if body_len > 0 && stream.read_exact(&mut body).await.is_err() {
        return Ok(None);
    }
    let mut datagram = Vec::with_capacity(wire::HEADER_LEN + body_len);
    datagram.extend_from_slice(&header_bytes);
    datagram.extend_from_slice(&body);
    Ok(wire::parse_message(params, &datagram, validator).ok())
}

/// `frontier_req` (§4.8 step "frontier exchange"): every `(account, head)`
/// pair with `account >= req.start`, up to `req.count` of them, in account
/// order, terminated by a zero account (matching what
/// [`BootstrapClient::request_frontiers`] reads back). `req.age` has no
/// corresponding field in the account record this node keeps, so it is
/// accepted but not filtered on.
async fn respond_frontier_req(stream: &mut TcpStream, ledger: &Ledger<'_>, req: FrontierReq) -> std::io::Result<()> {
    let txn = ledger.store().begin_read();
    let mut accounts: Vec<(Account, Hash)> = txn
        .iter_cf("accounts")
        .map_err(|e| std::io::Error::other(e.to_string()))?
        .into_iter()
        .filter_map(|(k, v)| {
            if k.len() != HASH_LEN {
                return None;
            }
            let mut account_bytes = [0u8; HASH_LEN];
            account_bytes.copy_from_slice(&k);
            bincode::serde::decode_from_slice::<AccountRecord, _>(&v, bincode::config::standard())
                .ok()
                .map(|(rec, _)| (Account(account_bytes), rec.head))
        })
        .collect();
    drop(txn);
    accounts.sort_by(|a, b| a.0.0.cmp(&b.0.0));

    let mut sent = 0u32;
    for (account, head) in accounts {
        if account.0 < req.start.0 {
            continue;
        }
        if sent >= req.count {
            break;
        }
        stream.write_all(&account.0).await?;
        stream.write_all(&head.0).await?;
        sent += 1;
    }
    stream.write_all(&[0u8; HASH_LEN]).await
}

/// `bulk_pull` (§6.2): walks `req.end`'s chain backwards via `previous`
/// pointers down to (not including) `req.start`, then replays the
/// collected blocks oldest-first, each prefixed by the state block-type
/// byte, terminated by `not_a_block`.
async fn respond_bulk_pull(stream: &mut TcpStream, ledger: &Ledger<'_>, req: BulkPull) -> std::io::Result<()> {
    let txn = ledger.store().begin_read();
    let mut blocks = Vec::new();
    let mut cursor = req.end;
    while !cursor.is_zero() && cursor != req.start {
        match txn.get_state_block(cursor).map_err(|e| std::io::Error::other(e.to_string()))? {
            Some(block) => {
                cursor = block.previous;
                blocks.push(block);
            }
            None => break,
        }
    }
    drop(txn);
    blocks.reverse();

    for block in &blocks {
        stream.write_all(&[0x06]).await?;
        let mut body = Vec::new();
        block.serialize(&mut body);
        stream.write_all(&body).await?;
    }
    stream.write_all(&[NOT_A_BLOCK]).await
}

/// `bulk_pull_account` (§4.6 message table): pending entries for
/// `req.account` at or above `req.minimum_amount`, each as `hash` (plus
/// `amount` unless `PendingAddressOnly` was requested), terminated by a
/// zero hash.
async fn respond_bulk_pull_account(stream: &mut TcpStream, ledger: &Ledger<'_>, req: BulkPullAccount) -> std::io::Result<()> {
    let txn = ledger.store().begin_read();
    let entries = txn.iter_cf("pending").map_err(|e| std::io::Error::other(e.to_string()))?;
    drop(txn);

    for (key, value) in entries {
        if key.len() != HASH_LEN * 2 || key[..HASH_LEN] != req.account.0 {
            continue;
        }
        let Ok((record, _)) = bincode::serde::decode_from_slice::<PendingRecord, _>(&value, bincode::config::standard()) else {
            continue;
        };
        if record.amount.0 < req.minimum_amount {
            continue;
        }
        let mut send_hash = [0u8; HASH_LEN];
        send_hash.copy_from_slice(&key[HASH_LEN..]);
        stream.write_all(&send_hash).await?;
        if matches!(req.flags, BulkPullAccountFlags::PendingHashAndAmount) {
            stream.write_all(&record.amount.0.to_be_bytes()).await?;
        }
    }
    stream.write_all(&[0u8; HASH_LEN]).await
}

/// `bulk_pull_blocks` (§4.6 message table): `list_blocks` mode streams
/// every block whose hash falls in `[req.min_hash, req.max_hash]`, in hash
/// order, up to `req.max_count`, terminated by `not_a_block`;
/// `checksum_blocks` mode instead replies with the single running XOR
/// checksum this store maintains (§3.4), with no terminator since it is
/// not a block stream.
async fn respond_bulk_pull_blocks(stream: &mut TcpStream, ledger: &Ledger<'_>, req: BulkPullBlocks) -> std::io::Result<()> {
    let txn = ledger.store().begin_read();
    match req.mode {
        BulkPullBlocksMode::ChecksumBlocks => {
            let checksum = txn.checksum_get().map_err(|e| std::io::Error::other(e.to_string()))?;
            drop(txn);
            stream.write_all(&checksum.0).await
        }
        BulkPullBlocksMode::ListBlocks => {
            let mut entries = txn.iter_cf("state_blocks").map_err(|e| std::io::Error::other(e.to_string()))?;
            drop(txn);
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sent = 0u32;
            for (key, value) in entries {
                if sent >= req.max_count {
                    break;
                }
                if key.len() != HASH_LEN || key.as_ref() < req.min_hash.0.as_slice() || key.as_ref() > req.max_hash.0.as_slice() {
                    continue;
                }
                let Ok(((block, _successor), _)) = bincode::serde::decode_from_slice::<(StateBlock, Hash), _>(&value, bincode::config::standard()) else {
                    continue;
                };
                stream.write_all(&[0x06]).await?;
                let mut body = Vec::new();
                block.serialize(&mut body);
                stream.write_all(&body).await?;
                sent += 1;
            }
            stream.write_all(&[NOT_A_BLOCK]).await
        }
    }
}

/// `node_id_handshake` (§B supplemented feature): this node carries no
/// persistent signing identity (the wallet/identity layer is out of
/// scope, §1), so a query is acknowledged with an empty reply rather than
/// a fabricated signature.
async fn respond_node_id_handshake(stream: &mut TcpStream, params: &NetworkParams, req: NodeIdHandshake) -> std::io::Result<()> {
    if req.query.is_none() {
        return Ok(());
    }
    let reply = Message::NodeIdHandshake(NodeIdHandshake { query: None, response: None });
    let mut bytes = Vec::new();
    wire::serialize_message(params, &reply, &mut bytes);
    stream.write_all(&bytes).await
}

/// Serves one inbound bootstrap connection end to end: repeatedly reads a
/// request and answers it until the peer closes the stream. `bulk_push`'s
/// body is empty (§6.2); the blocks it precedes arrive as ordinary
/// `publish` messages on the same connection, handed to the processor
/// exactly as gossip-received blocks are, so a pushed block never
/// bypasses ledger admission.
pub async fn serve_bootstrap_connection(
    stream: TcpStream,
    params: NetworkParams,
    ledger: &Ledger<'_>,
    elections: &ElectionsTable,
    processor: &BlockProcessor,
) -> std::io::Result<()> {
    serve_bootstrap_connection_with_validator(stream, params, ledger, elections, processor, &AcceptAnyWork).await
}

/// Like [`serve_bootstrap_connection`], but checks every pushed block's
/// proof-of-work against `validator` before it ever reaches the processor
/// (§4.6), instead of accepting any work value.
pub async fn serve_bootstrap_connection_with_validator(
    mut stream: TcpStream,
    params: NetworkParams,
    ledger: &Ledger<'_>,
    elections: &ElectionsTable,
    processor: &BlockProcessor,
    validator: &dyn WorkValidator,
) -> std::io::Result<()> {
    loop {
        let Some(message) = read_request(&mut stream, &params, validator).await? else {
            return Ok(());
        };
        match message {
            Message::FrontierReq(req) => respond_frontier_req(&mut stream, ledger, req).await?,
            Message::BulkPull(req) => respond_bulk_pull(&mut stream, ledger, req).await?,
            Message::BulkPullAccount(req) => respond_bulk_pull_account(&mut stream, ledger, req).await?,
            Message::BulkPullBlocks(req) => respond_bulk_pull_blocks(&mut stream, ledger, req).await?,
            Message::NodeIdHandshake(req) => respond_node_id_handshake(&mut stream, &params, req).await?,
            Message::BulkPush(_) => {}
            Message::Publish(p) => {
                processor.enqueue(p.block, Instant::now());
                processor.flush(ledger, elections).map_err(|e| std::io::Error::other(e.to_string()))?;
            }
            Message::ConfirmReq(_) | Message::ConfirmAck(_) | Message::Keepalive(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_connections_scales_linearly_between_floor_and_ceiling() {
        assert_eq!(target_connections(50_000, 4, 64), 4);
        assert_eq!(target_connections(0, 4, 64), 64);
        assert_eq!(target_connections(25_000, 4, 64), 34);
    }

    #[test]
    fn should_prune_requires_majority_warmed_and_target_floor() {
        assert!(!should_prune(1, 10, 3));
        assert!(!should_prune(3, 10, 4));
        assert!(should_prune(7, 10, 4));
    }

    #[test]
    fn prune_count_matches_sqrt_formula() {
        assert_eq!(prune_count(2), 0);
        assert_eq!(prune_count(6), 2);
        assert_eq!(prune_count(11), 3);
    }

    #[test]
    fn force_stop_triggers_past_threshold_with_low_throughput() {
        assert!(!is_force_stopped(Duration::from_secs(31), 20.0));
        assert!(is_force_stopped(Duration::from_secs(31), 5.0));
        assert!(!is_force_stopped(Duration::from_secs(10), 1.0));
    }

    #[test]
    fn frontier_throughput_ok_before_warmup_and_checked_after() {
        assert!(frontier_throughput_ok(Duration::from_secs(2), 0));
        assert!(frontier_throughput_ok(Duration::from_secs(6), 6_500));
        assert!(!frontier_throughput_ok(Duration::from_secs(6), 100));
    }

    #[test]
    fn push_cost_is_higher_for_unknown_accounts() {
        assert_eq!(push_cost(false), 2);
        assert_eq!(push_cost(true), 1);
    }

    #[test]
    fn requeue_pull_falls_back_to_frontier_peer_past_limit() {
        let pull = PullInfo { account: Account::ZERO, remote_head: Hash::ZERO, local_head: Hash::ZERO, retry_count: 16 };
        match requeue_pull(pull, 16) {
            RequeueDecision::LastResortToFrontierPeer(p) => assert_eq!(p.retry_count, 17),
            RequeueDecision::Requeue(_) => panic!("expected last-resort routing"),
        }
    }

    #[test]
    fn requeue_pull_retries_under_limit() {
        let pull = PullInfo { account: Account::ZERO, remote_head: Hash::ZERO, local_head: Hash::ZERO, retry_count: 0 };
        match requeue_pull(pull, 16) {
            RequeueDecision::Requeue(p) => assert_eq!(p.retry_count, 1),
            RequeueDecision::LastResortToFrontierPeer(_) => panic!("expected requeue"),
        }
    }

    #[tokio::test]
    async fn bootstrap_server_answers_frontier_req_and_bulk_pull() {
        use crate::numbers::{Signature, Work};
        use tempfile::TempDir;
        use tokio::net::TcpListener;

        let tmp = TempDir::new().expect("tempdir");
        let store = crate::store::Store::open(&crate::store::StoreConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
        })
        .expect("open store");
        let params = NetworkParams::test();
        let ledger = Ledger::new(&store, params);

        let genesis = StateBlock {
            account: params.genesis_account,
            creation_time: params.manna_start_time,
            previous: Hash::ZERO,
            representative: params.genesis_account,
            balance: params.genesis_amount,
            link: Hash::ZERO,
            signature: Signature::ZERO,
            work: Work(0),
        };
        ledger.ensure_genesis(&genesis).expect("stamp genesis");

        let elections = ElectionsTable::new();
        let processor = BlockProcessor::new();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");

        let server = async {
            let (stream, _from) = listener.accept().await.expect("accept");
            serve_bootstrap_connection(stream, params, &ledger, &elections, &processor).await.expect("serve connection");
        };

        let client = async {
            let mut client = BootstrapClient::connect(addr, params).await.expect("connect");

            let frontiers = client.request_frontiers().await.expect("request_frontiers");
            assert_eq!(frontiers, vec![(params.genesis_account, genesis.hash())]);

            let blocks = client.bulk_pull(Hash::ZERO, genesis.hash()).await.expect("bulk_pull");
            assert_eq!(blocks, vec![genesis]);

            client.close().await.ok();
        };

        tokio::join!(server, client);
    }

    #[test]
    fn pull_queue_shuffle_preserves_all_entries() {
        let queue = PullQueue::new();
        for i in 0..20u8 {
            queue.push(PullInfo { account: Account([i; HASH_LEN]), remote_head: Hash::ZERO, local_head: Hash::ZERO, retry_count: 0 });
        }
        queue.shuffle();
        assert_eq!(queue.len(), 20);
    }
}
