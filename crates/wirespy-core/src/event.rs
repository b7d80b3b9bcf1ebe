//! Producer-facing event records.
//!
//! The protocol layer hands the pipeline one of eight record types. These are
//! plain data: they say nothing about how a row is laid out in any particular
//! store. Store adapters own the record → row mapping.
//!
//! Each [`EventKind`] declares how it is ingested:
//!
//! | Kind                 | Dedup key | Write policy              |
//! |----------------------|-----------|---------------------------|
//! | `peer`               | none      | write-through             |
//! | `block`              | hash      | batched                   |
//! | `transaction`        | hash      | batched                   |
//! | `transaction_content`| none      | upsert, ignore conflicts  |
//! | `hello`              | none      | write-through             |
//! | `disconnect`         | none      | write-through             |
//! | `ping`, `pong`       | none      | write-through             |
//!
//! The last four are RLPx session messages, recorded per peer.

use crate::error::{Error, Result};
use crate::wire::{DisconnectReason, MessageCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed set of event kinds the pipeline ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Peer,
    Block,
    Transaction,
    TransactionContent,
    Hello,
    Disconnect,
    Ping,
    Pong,
}

/// How records of a kind reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Persist each record as soon as it is dequeued.
    WriteThrough,
    /// Buffer records and insert them in batches.
    Batched,
    /// Insert keyed by hash; a second insert for the same hash is a no-op.
    UpsertIgnoreConflict,
}

impl EventKind {
    /// All kinds, in queue index order.
    pub const ALL: [EventKind; 8] = [
        EventKind::Peer,
        EventKind::Block,
        EventKind::Transaction,
        EventKind::TransactionContent,
        EventKind::Hello,
        EventKind::Disconnect,
        EventKind::Ping,
        EventKind::Pong,
    ];

    /// Stable position of this kind in [`EventKind::ALL`].
    pub const fn index(self) -> usize {
        match self {
            Self::Peer => 0,
            Self::Block => 1,
            Self::Transaction => 2,
            Self::TransactionContent => 3,
            Self::Hello => 4,
            Self::Disconnect => 5,
            Self::Ping => 6,
            Self::Pong => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Block => "block",
            Self::Transaction => "transaction",
            Self::TransactionContent => "transaction_content",
            Self::Hello => "hello",
            Self::Disconnect => "disconnect",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    pub fn write_policy(self) -> WritePolicy {
        match self {
            Self::Block | Self::Transaction => WritePolicy::Batched,
            Self::TransactionContent => WritePolicy::UpsertIgnoreConflict,
            Self::Peer | Self::Hello | Self::Disconnect | Self::Ping | Self::Pong => {
                WritePolicy::WriteThrough
            }
        }
    }

    /// Whether repeated observations of the same key are capped.
    pub fn is_suppressed(self) -> bool {
        matches!(self, Self::Block | Self::Transaction)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

/// A node handshake observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSighting {
    pub peer_id: String,
    /// Negotiated protocol version.
    pub version: u32,
    /// Remote address the handshake came from.
    pub address: String,
    pub observed_at: DateTime<Utc>,
}

/// A block hash seen in a `NewBlockHashes` or `NewBlock` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAnnouncement {
    pub peer_id: String,
    pub hash: String,
    pub number: u64,
    pub code: MessageCode,
    pub observed_at: DateTime<Utc>,
}

/// A transaction hash seen in a transaction or pooled-hash message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAnnouncement {
    pub peer_id: String,
    pub hash: String,
    pub code: MessageCode,
    pub observed_at: DateTime<Utc>,
}

/// Raw ECDSA signature values, as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub v: String,
    pub r: String,
    pub s: String,
}

/// A decoded transaction body.
///
/// `value` and `gas_price` are decimal strings because they routinely exceed
/// 64 bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionContent {
    pub hash: String,
    pub from: String,
    /// `None` for contract creation.
    #[serde(default)]
    pub to: Option<String>,
    pub nonce: u64,
    pub value: String,
    pub gas_price: String,
    pub gas: u64,
    /// Call data, hex encoded (an optional `0x` prefix is accepted).
    pub data_hex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

/// An RLPx `Hello` exchanged with a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHello {
    pub peer_id: String,
    /// Remote client identifier, e.g. `Geth/v1.10.26-stable/linux-amd64/go1.19`.
    pub name: String,
    /// Advertised capabilities, e.g. `eth/66`.
    #[serde(default)]
    pub caps: Vec<String>,
    #[serde(default)]
    pub enode: String,
    #[serde(default)]
    pub enr: String,
    #[serde(default)]
    pub local_address: String,
    #[serde(default)]
    pub remote_address: String,
    #[serde(default)]
    pub inbound: bool,
    #[serde(default)]
    pub trusted: bool,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    pub observed_at: DateTime<Utc>,
}

/// An RLPx `Disconnect` received from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDisconnect {
    pub peer_id: String,
    pub reason: DisconnectReason,
    pub observed_at: DateTime<Utc>,
}

/// An RLPx `Ping` or `Pong`; both carry no payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHeartbeat {
    pub peer_id: String,
    pub observed_at: DateTime<Utc>,
}

/// Any record the pipeline accepts.
///
/// Serialized with an internal `"kind"` tag, which is also the JSONL replay
/// format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Peer(PeerSighting),
    Block(BlockAnnouncement),
    Transaction(TransactionAnnouncement),
    TransactionContent(TransactionContent),
    Hello(PeerHello),
    Disconnect(PeerDisconnect),
    Ping(PeerHeartbeat),
    Pong(PeerHeartbeat),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Peer(_) => EventKind::Peer,
            Self::Block(_) => EventKind::Block,
            Self::Transaction(_) => EventKind::Transaction,
            Self::TransactionContent(_) => EventKind::TransactionContent,
            Self::Hello(_) => EventKind::Hello,
            Self::Disconnect(_) => EventKind::Disconnect,
            Self::Ping(_) => EventKind::Ping,
            Self::Pong(_) => EventKind::Pong,
        }
    }

    /// Key used to cap repeated observations, for suppressed kinds only.
    pub fn dedup_key(&self) -> Option<&str> {
        match self {
            Self::Block(block) => Some(&block.hash),
            Self::Transaction(tx) => Some(&tx.hash),
            _ => None,
        }
    }

    /// eth wire message the record was observed in, for announcements.
    pub fn message_code(&self) -> Option<MessageCode> {
        match self {
            Self::Block(block) => Some(block.code),
            Self::Transaction(tx) => Some(tx.code),
            _ => None,
        }
    }

    /// Peer the record was observed from, if it is tied to one.
    pub fn peer_id(&self) -> Option<&str> {
        match self {
            Self::Peer(peer) => Some(&peer.peer_id),
            Self::Block(block) => Some(&block.peer_id),
            Self::Transaction(tx) => Some(&tx.peer_id),
            Self::TransactionContent(_) => None,
            Self::Hello(hello) => Some(&hello.peer_id),
            Self::Disconnect(disconnect) => Some(&disconnect.peer_id),
            Self::Ping(beat) | Self::Pong(beat) => Some(&beat.peer_id),
        }
    }

    /// Check the structural invariants a record must satisfy to be ingested.
    ///
    /// Everything tied to a peer needs a peer identifier; anything keyed by
    /// hash needs a hash; call data must be valid hex.
    pub fn validate(&self) -> Result<()> {
        if let Some(peer_id) = self.peer_id() {
            require_non_empty("peer_id", peer_id)?;
        }

        match self {
            Self::Block(block) => require_non_empty("hash", &block.hash)?,
            Self::Transaction(tx) => require_non_empty("hash", &tx.hash)?,
            Self::TransactionContent(content) => {
                require_non_empty("hash", &content.hash)?;
                require_non_empty("from", &content.from)?;
                let data = content
                    .data_hex
                    .strip_prefix("0x")
                    .unwrap_or(&content.data_hex);
                hex::decode(data).map_err(|e| Error::HexDecode(format!("data_hex: {}", e)))?;
            }
            Self::Peer(_) | Self::Hello(_) | Self::Disconnect(_) | Self::Ping(_) | Self::Pong(_) => {}
        }

        Ok(())
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

impl From<PeerSighting> for Event {
    fn from(peer: PeerSighting) -> Self {
        Self::Peer(peer)
    }
}

impl From<BlockAnnouncement> for Event {
    fn from(block: BlockAnnouncement) -> Self {
        Self::Block(block)
    }
}

impl From<TransactionAnnouncement> for Event {
    fn from(tx: TransactionAnnouncement) -> Self {
        Self::Transaction(tx)
    }
}

impl From<TransactionContent> for Event {
    fn from(content: TransactionContent) -> Self {
        Self::TransactionContent(content)
    }
}

impl From<PeerHello> for Event {
    fn from(hello: PeerHello) -> Self {
        Self::Hello(hello)
    }
}

impl From<PeerDisconnect> for Event {
    fn from(disconnect: PeerDisconnect) -> Self {
        Self::Disconnect(disconnect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn block(hash: &str) -> BlockAnnouncement {
        BlockAnnouncement {
            peer_id: "enode-a".to_string(),
            hash: hash.to_string(),
            number: 17_000_000,
            code: MessageCode::NewBlockHashes,
            observed_at: Utc::now(),
        }
    }

    fn content(data_hex: &str) -> TransactionContent {
        TransactionContent {
            hash: "0xabc".to_string(),
            from: "0x1111".to_string(),
            to: None,
            nonce: 7,
            value: "1000000000000000000".to_string(),
            gas_price: "30000000000".to_string(),
            gas: 21_000,
            data_hex: data_hex.to_string(),
            signature: None,
        }
    }

    #[test]
    fn test_kind_policies() {
        assert_eq!(EventKind::Peer.write_policy(), WritePolicy::WriteThrough);
        assert_eq!(EventKind::Block.write_policy(), WritePolicy::Batched);
        assert_eq!(EventKind::Transaction.write_policy(), WritePolicy::Batched);
        assert_eq!(
            EventKind::TransactionContent.write_policy(),
            WritePolicy::UpsertIgnoreConflict
        );
        assert!(EventKind::Block.is_suppressed());
        assert!(EventKind::Transaction.is_suppressed());
        assert!(!EventKind::Peer.is_suppressed());
        assert!(!EventKind::TransactionContent.is_suppressed());

        for kind in [EventKind::Hello, EventKind::Disconnect, EventKind::Ping, EventKind::Pong] {
            assert_eq!(kind.write_policy(), WritePolicy::WriteThrough);
            assert!(!kind.is_suppressed());
        }
    }

    #[test]
    fn test_kind_index_matches_all() {
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(EventKind::from_str(kind.as_str()), Ok(*kind));
        }
    }

    #[test]
    fn test_dedup_key() {
        let event = Event::from(block("0xdead"));
        assert_eq!(event.kind(), EventKind::Block);
        assert_eq!(event.dedup_key(), Some("0xdead"));

        let event = Event::from(content(""));
        assert_eq!(event.dedup_key(), None);
    }

    #[test]
    fn test_validate_rejects_empty_peer_id() {
        let mut b = block("0xdead");
        b.peer_id = String::new();
        let err = Event::from(b).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "peer_id", .. }));
    }

    #[test]
    fn test_validate_rejects_empty_hash() {
        let err = Event::from(block("  ")).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "hash", .. }));
    }

    #[test]
    fn test_validate_data_hex() {
        assert!(Event::from(content("")).validate().is_ok());
        assert!(Event::from(content("0xa9059cbb")).validate().is_ok());
        assert!(Event::from(content("a9059cbb")).validate().is_ok());
        assert!(matches!(
            Event::from(content("zz")).validate(),
            Err(Error::HexDecode(_))
        ));
    }

    #[test]
    fn test_jsonl_format_is_kind_tagged() {
        let line = r#"{"kind":"transaction","peer_id":"enode-b","hash":"0xfeed","code":8,"observed_at":"2023-05-01T12:00:00Z"}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        match &event {
            Event::Transaction(tx) => {
                assert_eq!(tx.hash, "0xfeed");
                assert_eq!(tx.code, MessageCode::NewPooledTransactionHashes);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "transaction");
    }

    #[test]
    fn test_content_without_recipient_or_signature() {
        let line = r#"{"kind":"transaction_content","hash":"0xabc","from":"0x1","nonce":0,"value":"0","gas_price":"1","gas":53000,"data_hex":"6080"}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        match event {
            Event::TransactionContent(c) => {
                assert!(c.to.is_none());
                assert!(c.signature.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_session_messages_from_jsonl() {
        let hello = r#"{"kind":"hello","peer_id":"enode-c","name":"Geth/v1.10.26","caps":["eth/66","snap/1"],"inbound":true,"static":true,"observed_at":"2023-05-01T12:00:00Z"}"#;
        match serde_json::from_str::<Event>(hello).unwrap() {
            Event::Hello(h) => {
                assert_eq!(h.caps, vec!["eth/66", "snap/1"]);
                assert!(h.inbound);
                assert!(h.is_static);
                assert!(!h.trusted);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let disconnect = r#"{"kind":"disconnect","peer_id":"enode-c","reason":4,"observed_at":"2023-05-01T12:00:01Z"}"#;
        let event: Event = serde_json::from_str(disconnect).unwrap();
        assert_eq!(event.kind(), EventKind::Disconnect);
        match event {
            Event::Disconnect(d) => assert_eq!(d.reason, DisconnectReason::TooManyPeers),
            other => panic!("unexpected event: {:?}", other),
        }

        let pong = r#"{"kind":"pong","peer_id":"enode-c","observed_at":"2023-05-01T12:00:02Z"}"#;
        let event: Event = serde_json::from_str(pong).unwrap();
        assert_eq!(event.kind(), EventKind::Pong);
        assert_eq!(event.peer_id(), Some("enode-c"));
    }

    #[test]
    fn test_validate_session_message_needs_peer() {
        let ping = Event::Ping(PeerHeartbeat {
            peer_id: " ".to_string(),
            observed_at: Utc::now(),
        });
        assert!(matches!(
            ping.validate(),
            Err(Error::InvalidField { field: "peer_id", .. })
        ));
    }

    #[test]
    fn test_message_code_for_announcements() {
        assert_eq!(
            Event::from(block("0x1")).message_code(),
            Some(MessageCode::NewBlockHashes)
        );
        assert_eq!(Event::from(content("")).message_code(), None);
    }
}
