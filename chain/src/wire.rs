//! Wire protocol and message framing (C7, §4.6).
//!
//! Every UDP/TCP message begins with an 8-byte header (magic, version
//! triple, message type, extensions bitmap) followed by a typed body. All
//! integers are big-endian unless noted. The parser never panics on
//! malformed input — every failure is a [`ParseStatus`] value, matching
//! the original's `message_parser::parse_status` enum
//! (`original_source/rai/node/common.hpp`).

use crate::block::StateBlock;
use crate::network::NetworkParams;
use crate::numbers::{Account, Hash, HASH_LEN, Signature};
use crate::vote::{Vote, VoteTarget};

/// UDP datagrams larger than this are dropped unread (§4.6, §6.1): the
/// safe MTU floor the original protocol is built around.
pub const MAX_SAFE_UDP_MESSAGE_SIZE: usize = 508;

/// Byte length of the fixed message header.
pub const HEADER_LEN: usize = 8;

/// Sentinel byte terminating a TCP bulk_push/bulk_pull response stream
/// (§6.2): "not a block".
pub const NOT_A_BLOCK: u8 = 0x01;

/// Block-type byte used on the wire; Mikron only ever produces `State`
/// (§4.6 "only `state=6` is used").
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum BlockTypeByte {
    NotABlock,
    State,
}

impl BlockTypeByte {
    fn to_byte(self) -> u8 {
        match self {
            BlockTypeByte::NotABlock => NOT_A_BLOCK,
            BlockTypeByte::State => 0x06,
        }
    }

    fn from_byte(byte: u8) -> Option<BlockTypeByte> {
        match byte {
            NOT_A_BLOCK => Some(BlockTypeByte::NotABlock),
            0x06 => Some(BlockTypeByte::State),
            _ => None,
        }
    }
}

/// Message type discriminant (§4.6 header byte 5), values matching the
/// original `rai::message_type` enum exactly so the two protocols can be
/// told apart only by magic bytes, not by renumbering.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum MessageType {
    Keepalive,
    Publish,
    ConfirmReq,
    ConfirmAck,
    BulkPull,
    BulkPush,
    FrontierReq,
    BulkPullBlocks,
    NodeIdHandshake,
    BulkPullAccount,
}

impl MessageType {
    fn to_byte(self) -> u8 {
        match self {
            MessageType::Keepalive => 0x02,
            MessageType::Publish => 0x03,
            MessageType::ConfirmReq => 0x04,
            MessageType::ConfirmAck => 0x05,
            MessageType::BulkPull => 0x06,
            MessageType::BulkPush => 0x07,
            MessageType::FrontierReq => 0x08,
            MessageType::BulkPullBlocks => 0x09,
            MessageType::NodeIdHandshake => 0x0a,
            MessageType::BulkPullAccount => 0x0b,
        }
    }

    fn from_byte(byte: u8) -> Option<MessageType> {
        match byte {
            0x02 => Some(MessageType::Keepalive),
            0x03 => Some(MessageType::Publish),
            0x04 => Some(MessageType::ConfirmReq),
            0x05 => Some(MessageType::ConfirmAck),
            0x06 => Some(MessageType::BulkPull),
            0x07 => Some(MessageType::BulkPush),
            0x08 => Some(MessageType::FrontierReq),
            0x09 => Some(MessageType::BulkPullBlocks),
            0x0a => Some(MessageType::NodeIdHandshake),
            0x0b => Some(MessageType::BulkPullAccount),
            _ => None,
        }
    }
}

/// Extension bitmap bit positions (§4.6): the low four bits are the only
/// ones currently assigned.
pub mod extension_bits {
    pub const QUERY: u16 = 0;
    pub const RESPONSE: u16 = 1;
    pub const FULL_NODE: u16 = 2;
    pub const VALIDATING_NODE: u16 = 3;
}

/// The 8-byte message header (§4.6).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct MessageHeader {
    pub magic: [u8; 2],
    pub version: u8,
    pub version_min: u8,
    pub version_max: u8,
    pub message_type: MessageType,
    pub extensions: u16,
}

impl MessageHeader {
    pub fn new(params: &NetworkParams, message_type: MessageType) -> Self {
        MessageHeader {
            magic: params.magic(),
            version: crate::network::PROTOCOL_VERSION,
            version_min: crate::network::PROTOCOL_VERSION_MIN,
            version_max: crate::network::PROTOCOL_VERSION_MAX,
            message_type,
            extensions: 0,
        }
    }

    pub fn with_bit(mut self, bit: u16) -> Self {
        self.extensions |= 1 << bit;
        self
    }

    pub fn has_bit(&self, bit: u16) -> bool {
        self.extensions & (1 << bit) != 0
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic);
        out.push(self.version);
        out.push(self.version_min);
        out.push(self.version_max);
        out.push(self.message_type.to_byte());
        out.extend_from_slice(&self.extensions.to_be_bytes());
    }

    pub fn deserialize(bytes: &[u8]) -> Result<MessageHeader, ParseStatus> {
        if bytes.len() < HEADER_LEN {
            return Err(ParseStatus::InvalidHeader);
        }
        let magic = [bytes[0], bytes[1]];
        let version = bytes[2];
        let version_min = bytes[3];
        let version_max = bytes[4];
        let Some(message_type) = MessageType::from_byte(bytes[5]) else {
            return Err(ParseStatus::InvalidMessageType);
        };
        let extensions = u16::from_be_bytes([bytes[6], bytes[7]]);
        Ok(MessageHeader {
            magic,
            version,
            version_min,
            version_max,
            message_type,
            extensions,
        })
    }
}

/// Typed parse outcome (§6.1); a datagram is dropped and a counter bumped
/// on anything other than `Success` — parse errors never crash the node
/// (§7 "Network parse errors never crash the process").
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ParseStatus {
    Success,
    InvalidHeader,
    InvalidMessageType,
    InvalidKeepaliveMessage,
    InvalidPublishMessage,
    InvalidConfirmReqMessage,
    InvalidConfirmAckMessage,
    InvalidFrontierReqMessage,
    InvalidBulkPullMessage,
    InvalidBulkPullAccountMessage,
    InvalidBulkPullBlocksMessage,
    InvalidNodeIdHandshakeMessage,
    OutdatedVersion,
    MessageTooLarge,
    InsufficientWork,
}

/// 8 peers × (16-byte IPv6 address + 2-byte port). Unreachable slots are
/// zero-addressed (§4.6 "keepalive").
pub const KEEPALIVE_PEER_COUNT: usize = 8;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct PeerAddr {
    pub ipv6: [u8; 16],
    pub port: u16,
}

impl PeerAddr {
    pub const UNSPECIFIED: PeerAddr = PeerAddr { ipv6: [0u8; 16], port: 0 };

    pub fn is_unspecified(&self) -> bool {
        self.ipv6 == [0u8; 16] && self.port == 0
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Keepalive {
    pub peers: [PeerAddr; KEEPALIVE_PEER_COUNT],
}

impl Default for Keepalive {
    fn default() -> Self {
        Keepalive { peers: [PeerAddr::UNSPECIFIED; KEEPALIVE_PEER_COUNT] }
    }
}

#[derive(Clone, Debug)]
pub struct Publish {
    pub block: StateBlock,
}

#[derive(Clone, Debug)]
pub struct ConfirmReq {
    pub block: StateBlock,
}

/// §4.6 "confirm_ack": vote payload followed either by a sequence of
/// block hashes, or exactly one full block, depending on `block_type`.
#[derive(Clone, Debug)]
pub struct ConfirmAck {
    pub vote: Vote,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct FrontierReq {
    pub start: Account,
    pub age: u32,
    pub count: u32,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct BulkPull {
    pub start: Hash,
    pub end: Hash,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum BulkPullAccountFlags {
    PendingHashAndAmount,
    PendingAddressOnly,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct BulkPullAccount {
    pub account: Account,
    pub minimum_amount: u64,
    pub flags: BulkPullAccountFlags,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum BulkPullBlocksMode {
    ListBlocks,
    ChecksumBlocks,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct BulkPullBlocks {
    pub min_hash: Hash,
    pub max_hash: Hash,
    pub mode: BulkPullBlocksMode,
    pub max_count: u32,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
pub struct BulkPush;

/// §B supplemented feature: minimal query/response node identity
/// handshake. `query` is present iff the query extension bit is set;
/// `response` iff the response bit is set.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct NodeIdHandshake {
    pub query: Option<Hash>,
    pub response: Option<(Account, Signature)>,
}

/// Every message body this node parses or emits, tagged by the header's
/// `message_type` (§9 "one concrete type, switched on once").
#[derive(Clone, Debug)]
pub enum Message {
    Keepalive(Keepalive),
    Publish(Publish),
    ConfirmReq(ConfirmReq),
    ConfirmAck(ConfirmAck),
    BulkPull(BulkPull),
    BulkPullAccount(BulkPullAccount),
    BulkPullBlocks(BulkPullBlocks),
    BulkPush(BulkPush),
    FrontierReq(FrontierReq),
    NodeIdHandshake(NodeIdHandshake),
}

/// Serializes `header` followed by `message`'s body into `out`.
pub fn serialize_message(params: &NetworkParams, message: &Message, out: &mut Vec<u8>) {
    let message_type = match message {
        Message::Keepalive(_) => MessageType::Keepalive,
        Message::Publish(_) => MessageType::Publish,
        Message::ConfirmReq(_) => MessageType::ConfirmReq,
        Message::ConfirmAck(_) => MessageType::ConfirmAck,
        Message::BulkPull(_) => MessageType::BulkPull,
        Message::BulkPullAccount(_) => MessageType::BulkPullAccount,
        Message::BulkPullBlocks(_) => MessageType::BulkPullBlocks,
        Message::BulkPush(_) => MessageType::BulkPush,
        Message::FrontierReq(_) => MessageType::FrontierReq,
        Message::NodeIdHandshake(_) => MessageType::NodeIdHandshake,
    };
    let mut header = MessageHeader::new(params, message_type);
    if let Message::NodeIdHandshake(h) = message {
        if h.query.is_some() {
            header = header.with_bit(extension_bits::QUERY);
        }
        if h.response.is_some() {
            header = header.with_bit(extension_bits::RESPONSE);
        }
    }
    header.serialize(out);

    match message {
        Message::Keepalive(k) => {
            for peer in &k.peers {
                out.extend_from_slice(&peer.ipv6);
                out.extend_from_slice(&peer.port.to_be_bytes());
            }
        }
        Message::Publish(p) => {
            out.push(BlockTypeByte::State.to_byte());
            p.block.serialize(out);
        }
        Message::ConfirmReq(c) => {
            out.push(BlockTypeByte::State.to_byte());
            c.block.serialize(out);
        }
        Message::ConfirmAck(c) => {
            serialize_confirm_ack(&c.vote, out);
        }
        Message::BulkPull(b) => {
            out.extend_from_slice(&b.start.0);
            out.extend_from_slice(&b.end.0);
        }
        Message::BulkPullAccount(b) => {
            out.extend_from_slice(&b.account.0);
            out.extend_from_slice(&b.minimum_amount.to_be_bytes());
            out.push(match b.flags {
                BulkPullAccountFlags::PendingHashAndAmount => 0x0,
                BulkPullAccountFlags::PendingAddressOnly => 0x1,
            });
        }
        Message::BulkPullBlocks(b) => {
            out.extend_from_slice(&b.min_hash.0);
            out.extend_from_slice(&b.max_hash.0);
            out.push(match b.mode {
                BulkPullBlocksMode::ListBlocks => 0,
                BulkPullBlocksMode::ChecksumBlocks => 1,
            });
            out.extend_from_slice(&b.max_count.to_be_bytes());
        }
        Message::BulkPush(_) => {}
        Message::FrontierReq(f) => {
            out.extend_from_slice(&f.start.0);
            out.extend_from_slice(&f.age.to_be_bytes());
            out.extend_from_slice(&f.count.to_be_bytes());
        }
        Message::NodeIdHandshake(h) => {
            if let Some(query) = h.query {
                out.extend_from_slice(&query.0);
            }
            if let Some((account, sig)) = &h.response {
                out.extend_from_slice(&account.0);
                out.extend_from_slice(&sig.0);
            }
        }
    }
}

/// `confirm_ack` body (§4.6): block-type byte + vote payload
/// `account(32) || signature(64) || sequence(8)`, then either the hash
/// list (block type = `not_a_block`) or exactly one full block.
fn serialize_confirm_ack(vote: &Vote, out: &mut Vec<u8>) {
    let is_block = matches!(vote.target, VoteTarget::Block(_));
    out.push(if is_block { BlockTypeByte::State.to_byte() } else { BlockTypeByte::NotABlock.to_byte() });
    out.extend_from_slice(&vote.account.0);
    out.extend_from_slice(&vote.signature.0);
    out.extend_from_slice(&vote.sequence.to_be_bytes());
    match &vote.target {
        VoteTarget::Block(block) => block.serialize(out),
        VoteTarget::Hashes(hashes) => {
            for h in hashes {
                out.extend_from_slice(&h.0);
            }
        }
    }
}

/// Fixed body length for a TCP-framed request of `message_type`, given its
/// header's `extensions` bitmap (only `node_id_handshake` varies on that).
/// Returns `None` for types this implementation never reads off a
/// connection-oriented socket (`confirm_ack`'s body length depends on its
/// own internal block-type byte, which the UDP gossip path handles by
/// reading the whole datagram at once instead).
pub(crate) fn fixed_body_len(message_type: MessageType, extensions: u16) -> Option<usize> {
    const PEER_LEN: usize = 18;
    Some(match message_type {
        MessageType::Keepalive => PEER_LEN * KEEPALIVE_PEER_COUNT,
        MessageType::Publish => 1 + crate::block::STATE_BLOCK_WIRE_SIZE,
        MessageType::ConfirmReq => 1 + crate::block::STATE_BLOCK_WIRE_SIZE,
        MessageType::ConfirmAck => return None,
        MessageType::BulkPull => HASH_LEN * 2,
        MessageType::BulkPullAccount => HASH_LEN + 8 + 1,
        MessageType::BulkPullBlocks => HASH_LEN * 2 + 1 + 4,
        MessageType::BulkPush => 0,
        MessageType::FrontierReq => HASH_LEN + 8,
        MessageType::NodeIdHandshake => {
            let header = MessageHeader { magic: [0, 0], version: 0, version_min: 0, version_max: 0, message_type, extensions };
            (if header.has_bit(extension_bits::QUERY) { HASH_LEN } else { 0 })
                + (if header.has_bit(extension_bits::RESPONSE) { HASH_LEN + 64 } else { 0 })
        }
    })
}

/// Parses one message out of `datagram`, rejecting it outright if it
/// exceeds [`MAX_SAFE_UDP_MESSAGE_SIZE`] (§4.6, §6.1) or carries a magic
/// that doesn't match `params`, or a version below what this build
/// understands. Blocks carried by `publish`/`confirm_req` are checked
/// against `validator` before the message is handed back to the caller
/// (§4.6 "refuses blocks whose proof-of-work fails validation before
/// dispatching to handlers") — a failing block never reaches a handler,
/// it comes back as [`ParseStatus::InsufficientWork`].
pub fn parse_message(params: &NetworkParams, datagram: &[u8], validator: &dyn WorkValidator) -> Result<Message, ParseStatus> {
    if datagram.len() > MAX_SAFE_UDP_MESSAGE_SIZE {
        return Err(ParseStatus::MessageTooLarge);
    }
    let header = MessageHeader::deserialize(datagram)?;
    if header.magic != params.magic() {
        return Err(ParseStatus::InvalidHeader);
    }
    if header.version < crate::network::PROTOCOL_VERSION_MIN {
        return Err(ParseStatus::OutdatedVersion);
    }
    let body = &datagram[HEADER_LEN..];

    match header.message_type {
        MessageType::Keepalive => parse_keepalive(body),
        MessageType::Publish => parse_publish(body, validator),
        MessageType::ConfirmReq => parse_confirm_req(body, validator),
        MessageType::ConfirmAck => parse_confirm_ack(body),
        MessageType::BulkPull => parse_bulk_pull(body),
        MessageType::BulkPullAccount => parse_bulk_pull_account(body),
        MessageType::BulkPullBlocks => parse_bulk_pull_blocks(body),
        MessageType::BulkPush => Ok(Message::BulkPush(BulkPush)),
        MessageType::FrontierReq => parse_frontier_req(body),
        MessageType::NodeIdHandshake => parse_node_id_handshake(body, &header),
    }
}

fn parse_keepalive(body: &[u8]) -> Result<Message, ParseStatus> {
    const PEER_LEN: usize = 18;
    if body.len() < PEER_LEN * KEEPALIVE_PEER_COUNT {
        return Err(ParseStatus::InvalidKeepaliveMessage);
    }
    let mut peers = [PeerAddr::UNSPECIFIED; KEEPALIVE_PEER_COUNT];
    for (i, peer) in peers.iter_mut().enumerate() {
        let off = i * PEER_LEN;
        let mut ipv6 = [0u8; 16];
        ipv6.copy_from_slice(&body[off..off + 16]);
        let port = u16::from_be_bytes([body[off + 16], body[off + 17]]);
        *peer = PeerAddr { ipv6, port };
    }
    Ok(Message::Keepalive(Keepalive { peers }))
}

fn parse_publish(body: &[u8], validator: &dyn WorkValidator) -> Result<Message, ParseStatus> {
    let block = parse_state_block_body(body).ok_or(ParseStatus::InvalidPublishMessage)?;
    if !validator.validate(block.root(), block.work) {
        return Err(ParseStatus::InsufficientWork);
    }
    Ok(Message::Publish(Publish { block }))
}

fn parse_confirm_req(body: &[u8], validator: &dyn WorkValidator) -> Result<Message, ParseStatus> {
    let block = parse_state_block_body(body).ok_or(ParseStatus::InvalidConfirmReqMessage)?;
    if !validator.validate(block.root(), block.work) {
        return Err(ParseStatus::InsufficientWork);
    }
    Ok(Message::ConfirmReq(ConfirmReq { block }))
}

fn parse_state_block_body(body: &[u8]) -> Option<StateBlock> {
    if body.is_empty() || BlockTypeByte::from_byte(body[0]) != Some(BlockTypeByte::State) {
        return None;
    }
    StateBlock::deserialize(&body[1..])
}

fn parse_confirm_ack(body: &[u8]) -> Result<Message, ParseStatus> {
    if body.is_empty() {
        return Err(ParseStatus::InvalidConfirmAckMessage);
    }
    let Some(block_type) = BlockTypeByte::from_byte(body[0]) else {
        return Err(ParseStatus::InvalidConfirmAckMessage);
    };
    let rest = &body[1..];
    if rest.len() < HASH_LEN + 64 + 8 {
        return Err(ParseStatus::InvalidConfirmAckMessage);
    }
    let mut account = [0u8; HASH_LEN];
    account.copy_from_slice(&rest[0..HASH_LEN]);
    let mut sig = [0u8; 64];
    sig.copy_from_slice(&rest[HASH_LEN..HASH_LEN + 64]);
    let mut seq_bytes = [0u8; 8];
    seq_bytes.copy_from_slice(&rest[HASH_LEN + 64..HASH_LEN + 64 + 8]);
    let sequence = u64::from_be_bytes(seq_bytes);
    let tail = &rest[HASH_LEN + 64 + 8..];

    let target = match block_type {
        BlockTypeByte::State => {
            let block = StateBlock::deserialize(tail).ok_or(ParseStatus::InvalidConfirmAckMessage)?;
            VoteTarget::Block(Box::new(block))
        }
        BlockTypeByte::NotABlock => {
            if tail.is_empty() || tail.len() % HASH_LEN != 0 {
                return Err(ParseStatus::InvalidConfirmAckMessage);
            }
            let hashes = tail
                .chunks(HASH_LEN)
                .map(|chunk| {
                    let mut h = [0u8; HASH_LEN];
                    h.copy_from_slice(chunk);
                    Hash(h)
                })
                .collect();
            VoteTarget::Hashes(hashes)
        }
    };

    Ok(Message::ConfirmAck(ConfirmAck {
        vote: Vote { account: Account(account), signature: Signature(sig), sequence, target },
    }))
}

fn parse_frontier_req(body: &[u8]) -> Result<Message, ParseStatus> {
    if body.len() < HASH_LEN + 8 {
        return Err(ParseStatus::InvalidFrontierReqMessage);
    }
    let mut start = [0u8; HASH_LEN];
    start.copy_from_slice(&body[0..HASH_LEN]);
    let age = u32::from_be_bytes(body[HASH_LEN..HASH_LEN + 4].try_into().unwrap());
    let count = u32::from_be_bytes(body[HASH_LEN + 4..HASH_LEN + 8].try_into().unwrap());
    Ok(Message::FrontierReq(FrontierReq { start: Account(start), age, count }))
}

fn parse_bulk_pull(body: &[u8]) -> Result<Message, ParseStatus> {
    if body.len() < HASH_LEN * 2 {
        return Err(ParseStatus::InvalidBulkPullMessage);
    }
    let mut start = [0u8; HASH_LEN];
    start.copy_from_slice(&body[0..HASH_LEN]);
    let mut end = [0u8; HASH_LEN];
    end.copy_from_slice(&body[HASH_LEN..HASH_LEN * 2]);
    Ok(Message::BulkPull(BulkPull { start: Hash(start), end: Hash(end) }))
}

fn parse_bulk_pull_account(body: &[u8]) -> Result<Message, ParseStatus> {
    if body.len() < HASH_LEN + 8 + 1 {
        return Err(ParseStatus::InvalidBulkPullAccountMessage);
    }
    let mut account = [0u8; HASH_LEN];
    account.copy_from_slice(&body[0..HASH_LEN]);
    let minimum_amount = u64::from_be_bytes(body[HASH_LEN..HASH_LEN + 8].try_into().unwrap());
    let flags = match body[HASH_LEN + 8] {
        0x0 => BulkPullAccountFlags::PendingHashAndAmount,
        0x1 => BulkPullAccountFlags::PendingAddressOnly,
        _ => return Err(ParseStatus::InvalidBulkPullAccountMessage),
    };
    Ok(Message::BulkPullAccount(BulkPullAccount { account: Account(account), minimum_amount, flags }))
}

fn parse_bulk_pull_blocks(body: &[u8]) -> Result<Message, ParseStatus> {
    if body.len() < HASH_LEN * 2 + 1 + 4 {
        return Err(ParseStatus::InvalidBulkPullBlocksMessage);
    }
    let mut min_hash = [0u8; HASH_LEN];
    min_hash.copy_from_slice(&body[0..HASH_LEN]);
    let mut max_hash = [0u8; HASH_LEN];
    max_hash.copy_from_slice(&body[HASH_LEN..HASH_LEN * 2]);
    let mode = match body[HASH_LEN * 2] {
        0 => BulkPullBlocksMode::ListBlocks,
        1 => BulkPullBlocksMode::ChecksumBlocks,
        _ => return Err(ParseStatus::InvalidBulkPullBlocksMessage),
    };
    let max_count = u32::from_be_bytes(body[HASH_LEN * 2 + 1..HASH_LEN * 2 + 5].try_into().unwrap());
    Ok(Message::BulkPullBlocks(BulkPullBlocks { min_hash: Hash(min_hash), max_hash: Hash(max_hash), mode, max_count }))
}

fn parse_node_id_handshake(body: &[u8], header: &MessageHeader) -> Result<Message, ParseStatus> {
    let mut offset = 0usize;
    let query = if header.has_bit(extension_bits::QUERY) {
        if body.len() < offset + HASH_LEN {
            return Err(ParseStatus::InvalidNodeIdHandshakeMessage);
        }
        let mut h = [0u8; HASH_LEN];
        h.copy_from_slice(&body[offset..offset + HASH_LEN]);
        offset += HASH_LEN;
        Some(Hash(h))
    } else {
        None
    };
    let response = if header.has_bit(extension_bits::RESPONSE) {
        if body.len() < offset + HASH_LEN + 64 {
            return Err(ParseStatus::InvalidNodeIdHandshakeMessage);
        }
        let mut account = [0u8; HASH_LEN];
        account.copy_from_slice(&body[offset..offset + HASH_LEN]);
        offset += HASH_LEN;
        let mut sig = [0u8; 64];
        sig.copy_from_slice(&body[offset..offset + 64]);
        Some((Account(account), Signature(sig)))
    } else {
        None
    };
    Ok(Message::NodeIdHandshake(NodeIdHandshake { query, response }))
}

/// Pluggable proof-of-work validator (§B supplemented feature; §1
/// collaborator boundary): Mikron carries the `work` field on the wire
/// but neither generates nor difficulty-checks it itself.
pub trait WorkValidator: Send + Sync {
    fn validate(&self, root: Hash, work: crate::numbers::Work) -> bool;
}

/// Permissive default: accepts any work value. A real deployment plugs in
/// a difficulty-checking collaborator instead.
pub struct AcceptAnyWork;

impl WorkValidator for AcceptAnyWork {
    fn validate(&self, _root: Hash, _work: crate::numbers::Work) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numbers::{Amount, ShortTimestamp, Work};

    fn sample_block() -> StateBlock {
        StateBlock {
            account: Account([1u8; HASH_LEN]),
            creation_time: ShortTimestamp(10),
            previous: Hash([2u8; HASH_LEN]),
            representative: Account([3u8; HASH_LEN]),
            balance: Amount(500),
            link: Hash([4u8; HASH_LEN]),
            signature: Signature([5u8; 64]),
            work: Work(7),
        }
    }

    #[test]
    fn publish_roundtrips() {
        let params = NetworkParams::test();
        let msg = Message::Publish(Publish { block: sample_block() });
        let mut bytes = Vec::new();
        serialize_message(&params, &msg, &mut bytes);
        let parsed = parse_message(&params, &bytes, &AcceptAnyWork).expect("parses");
        match parsed {
            Message::Publish(p) => assert_eq!(p.block, sample_block()),
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn keepalive_roundtrips_with_unspecified_slots() {
        let params = NetworkParams::test();
        let mut peers = [PeerAddr::UNSPECIFIED; KEEPALIVE_PEER_COUNT];
        peers[0] = PeerAddr { ipv6: [9u8; 16], port: 7075 };
        let msg = Message::Keepalive(Keepalive { peers });
        let mut bytes = Vec::new();
        serialize_message(&params, &msg, &mut bytes);
        let parsed = parse_message(&params, &bytes, &AcceptAnyWork).expect("parses");
        match parsed {
            Message::Keepalive(k) => {
                assert_eq!(k.peers[0].port, 7075);
                assert!(k.peers[1].is_unspecified());
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn oversized_datagram_is_rejected() {
        let params = NetworkParams::test();
        let datagram = vec![0u8; MAX_SAFE_UDP_MESSAGE_SIZE + 1];
        assert_eq!(parse_message(&params, &datagram, &AcceptAnyWork), Err(ParseStatus::MessageTooLarge));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let params = NetworkParams::test();
        let msg = Message::BulkPush(BulkPush);
        let mut bytes = Vec::new();
        serialize_message(&params, &msg, &mut bytes);
        let beta = NetworkParams::beta();
        assert_eq!(parse_message(&beta, &bytes, &AcceptAnyWork), Err(ParseStatus::InvalidHeader));
    }

    #[test]
    fn confirm_ack_with_hash_list_roundtrips() {
        let params = NetworkParams::test();
        let vote = Vote {
            account: Account([6u8; HASH_LEN]),
            signature: Signature([7u8; 64]),
            sequence: 42,
            target: VoteTarget::Hashes(vec![Hash([8u8; HASH_LEN]), Hash([9u8; HASH_LEN])]),
        };
        let msg = Message::ConfirmAck(ConfirmAck { vote: vote.clone() });
        let mut bytes = Vec::new();
        serialize_message(&params, &msg, &mut bytes);
        let parsed = parse_message(&params, &bytes, &AcceptAnyWork).expect("parses");
        match parsed {
            Message::ConfirmAck(c) => assert_eq!(c.vote.hashes(), vote.hashes()),
            _ => panic!("wrong message type"),
        }
    }

    struct RejectAllWork;

    impl WorkValidator for RejectAllWork {
        fn validate(&self, _root: Hash, _work: Work) -> bool {
            false
        }
    }

    #[test]
    fn publish_with_insufficient_work_is_rejected_before_dispatch() {
        let params = NetworkParams::test();
        let msg = Message::Publish(Publish { block: sample_block() });
        let mut bytes = Vec::new();
        serialize_message(&params, &msg, &mut bytes);
        assert_eq!(parse_message(&params, &bytes, &RejectAllWork), Err(ParseStatus::InsufficientWork));
    }

    #[test]
    fn confirm_req_with_insufficient_work_is_rejected_before_dispatch() {
        let params = NetworkParams::test();
        let msg = Message::ConfirmReq(ConfirmReq { block: sample_block() });
        let mut bytes = Vec::new();
        serialize_message(&params, &msg, &mut bytes);
        assert_eq!(parse_message(&params, &bytes, &RejectAllWork), Err(ParseStatus::InsufficientWork));
    }

    #[test]
    fn node_id_handshake_query_only_roundtrips() {
        let params = NetworkParams::test();
        let msg = Message::NodeIdHandshake(NodeIdHandshake {
            query: Some(Hash([1u8; HASH_LEN])),
            response: None,
        });
        let mut bytes = Vec::new();
        serialize_message(&params, &msg, &mut bytes);
        let parsed = parse_message(&params, &bytes, &AcceptAnyWork).expect("parses");
        match parsed {
            Message::NodeIdHandshake(h) => {
                assert_eq!(h.query, Some(Hash([1u8; HASH_LEN])));
                assert!(h.response.is_none());
            }
            _ => panic!("wrong message type"),
        }
    }
}
