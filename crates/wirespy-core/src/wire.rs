//! eth wire protocol message codes.
//!
//! Announcements carry the code of the message they were observed in. The
//! pipeline stores the raw numeric code; [`MessageCode::name`] exists so logs
//! can say `NewPooledTransactionHashes` instead of `8`.
//!
//! ```text
//! 0x00 Status                       0x07 NewBlock
//! 0x01 NewBlockHashes               0x08 NewPooledTransactionHashes (eth/65)
//! 0x02 Transactions                 0x09 GetPooledTransactions      (eth/65)
//! 0x03 GetBlockHeaders              0x0a PooledTransactions         (eth/65)
//! 0x04 BlockHeaders                 0x0d GetNodeData
//! 0x05 GetBlockBodies               0x0e NodeData
//! 0x06 BlockBodies                  0x0f GetReceipts
//!                                   0x10 Receipts
//! ```
//!
//! RLPx `Disconnect` messages carry a reason code, mapped by
//! [`DisconnectReason`] in the same way.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An eth wire message code.
///
/// Serialized as its numeric code so unknown codes survive a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum MessageCode {
    Status,
    NewBlockHashes,
    Transactions,
    GetBlockHeaders,
    BlockHeaders,
    GetBlockBodies,
    BlockBodies,
    NewBlock,
    NewPooledTransactionHashes,
    GetPooledTransactions,
    PooledTransactions,
    GetNodeData,
    NodeData,
    GetReceipts,
    Receipts,
    /// A code outside the eth/65 table.
    Unknown(u64),
}

impl MessageCode {
    /// Numeric wire code.
    pub fn code(self) -> u64 {
        match self {
            Self::Status => 0x00,
            Self::NewBlockHashes => 0x01,
            Self::Transactions => 0x02,
            Self::GetBlockHeaders => 0x03,
            Self::BlockHeaders => 0x04,
            Self::GetBlockBodies => 0x05,
            Self::BlockBodies => 0x06,
            Self::NewBlock => 0x07,
            Self::NewPooledTransactionHashes => 0x08,
            Self::GetPooledTransactions => 0x09,
            Self::PooledTransactions => 0x0a,
            Self::GetNodeData => 0x0d,
            Self::NodeData => 0x0e,
            Self::GetReceipts => 0x0f,
            Self::Receipts => 0x10,
            Self::Unknown(code) => code,
        }
    }

    /// Human-readable message name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Status => "StatusMsg",
            Self::NewBlockHashes => "NewBlockHashesMsg",
            Self::Transactions => "TransactionMsg",
            Self::GetBlockHeaders => "GetBlockHeadersMsg",
            Self::BlockHeaders => "BlockHeadersMsg",
            Self::GetBlockBodies => "GetBlockBodiesMsg",
            Self::BlockBodies => "BlockBodiesMsg",
            Self::NewBlock => "NewBlockMsg",
            Self::NewPooledTransactionHashes => "NewPooledTransactionHashesMsg",
            Self::GetPooledTransactions => "GetPooledTransactionsMsg",
            Self::PooledTransactions => "PooledTransactionsMsg",
            Self::GetNodeData => "GetNodeDataMsg",
            Self::NodeData => "NodeDataMsg",
            Self::GetReceipts => "GetReceiptsMsg",
            Self::Receipts => "ReceiptsMsg",
            Self::Unknown(_) => "UnknownMsg",
        }
    }
}

impl From<u64> for MessageCode {
    fn from(code: u64) -> Self {
        match code {
            0x00 => Self::Status,
            0x01 => Self::NewBlockHashes,
            0x02 => Self::Transactions,
            0x03 => Self::GetBlockHeaders,
            0x04 => Self::BlockHeaders,
            0x05 => Self::GetBlockBodies,
            0x06 => Self::BlockBodies,
            0x07 => Self::NewBlock,
            0x08 => Self::NewPooledTransactionHashes,
            0x09 => Self::GetPooledTransactions,
            0x0a => Self::PooledTransactions,
            0x0d => Self::GetNodeData,
            0x0e => Self::NodeData,
            0x0f => Self::GetReceipts,
            0x10 => Self::Receipts,
            other => Self::Unknown(other),
        }
    }
}

impl From<MessageCode> for u64 {
    fn from(code: MessageCode) -> Self {
        code.code()
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "UnknownMsg(0x{:02x})", code),
            known => f.write_str(known.name()),
        }
    }
}

/// Reason code carried by an RLPx `Disconnect` message.
///
/// Serialized as its numeric code, like [`MessageCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum DisconnectReason {
    Requested,
    TcpError,
    BreachOfProtocol,
    UselessPeer,
    TooManyPeers,
    AlreadyConnected,
    IncompatibleVersion,
    NullIdentity,
    ClientQuitting,
    UnexpectedIdentity,
    ConnectedToSelf,
    PingTimeout,
    /// Reason specific to a subprotocol (0x10).
    Subprotocol,
    Unknown(u64),
}

impl DisconnectReason {
    pub fn code(self) -> u64 {
        match self {
            Self::Requested => 0x00,
            Self::TcpError => 0x01,
            Self::BreachOfProtocol => 0x02,
            Self::UselessPeer => 0x03,
            Self::TooManyPeers => 0x04,
            Self::AlreadyConnected => 0x05,
            Self::IncompatibleVersion => 0x06,
            Self::NullIdentity => 0x07,
            Self::ClientQuitting => 0x08,
            Self::UnexpectedIdentity => 0x09,
            Self::ConnectedToSelf => 0x0a,
            Self::PingTimeout => 0x0b,
            Self::Subprotocol => 0x10,
            Self::Unknown(code) => code,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Requested => "disconnect requested",
            Self::TcpError => "TCP sub-system error",
            Self::BreachOfProtocol => "breach of protocol",
            Self::UselessPeer => "useless peer",
            Self::TooManyPeers => "too many peers",
            Self::AlreadyConnected => "already connected",
            Self::IncompatibleVersion => "incompatible p2p protocol version",
            Self::NullIdentity => "null node identity",
            Self::ClientQuitting => "client quitting",
            Self::UnexpectedIdentity => "unexpected identity in handshake",
            Self::ConnectedToSelf => "connected to self",
            Self::PingTimeout => "ping timeout",
            Self::Subprotocol => "subprotocol reason",
            Self::Unknown(_) => "unknown reason",
        }
    }
}

impl From<u64> for DisconnectReason {
    fn from(code: u64) -> Self {
        match code {
            0x00 => Self::Requested,
            0x01 => Self::TcpError,
            0x02 => Self::BreachOfProtocol,
            0x03 => Self::UselessPeer,
            0x04 => Self::TooManyPeers,
            0x05 => Self::AlreadyConnected,
            0x06 => Self::IncompatibleVersion,
            0x07 => Self::NullIdentity,
            0x08 => Self::ClientQuitting,
            0x09 => Self::UnexpectedIdentity,
            0x0a => Self::ConnectedToSelf,
            0x0b => Self::PingTimeout,
            0x10 => Self::Subprotocol,
            other => Self::Unknown(other),
        }
    }
}

impl From<DisconnectReason> for u64 {
    fn from(reason: DisconnectReason) -> Self {
        reason.code()
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown reason (0x{:02x})", code),
            known => f.write_str(known.name()),
        }
    }
}
