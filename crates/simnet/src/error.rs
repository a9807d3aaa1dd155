use std::io;
use std::net::SocketAddr;

use crate::net::{PeerId, Priority};
use crate::record::RecordTypeId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("buffer overflow: needed {needed} bytes, {available} available")]
    Overflow { needed: usize, available: usize },
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
    #[error("no record bound to message id {0}")]
    UnknownMessageId(u16),
    #[error("record type {0} has no message id")]
    UnregisteredType(RecordTypeId),
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("datagram truncated: {len} bytes, header needs {needed}")]
    Truncated { len: usize, needed: usize },
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unknown routing type {0}")]
    UnknownRouting(u8),
    #[error("invalid priority lane {0}")]
    InvalidPriority(u8),
    #[error("declared payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: u32, max: usize },
    #[error("declared payload of {declared} bytes but {actual} bytes follow the header")]
    LengthMismatch { declared: u32, actual: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("network interface is not initialized")]
    NotInitialized,
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("peer id {id} exceeds capacity of {capacity}")]
    PeerCapacity { id: PeerId, capacity: usize },
    #[error("transmit queue for {0:?} priority is full")]
    QueueFull(Priority),
}
