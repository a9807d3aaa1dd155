pub mod config;
pub mod error;
pub mod net;
pub mod queue;
pub mod record;

pub use config::NetworkConfig;
pub use error::{CodecError, HeaderError, NetError};
pub use net::{
    ConfirmationId, HandlerId, Message, MessageHandler, MemoryNetwork, MemoryTransport,
    NetworkInterface, NetworkStats, PacketDecoder, PacketSource, PeerId, PeerInfo, Priority,
    RecordSource, Reliability, RetryPolicy, Route, Transport, UdpTransport, WireHeader,
};
pub use queue::PacketQueue;
pub use record::{Record, RecordCodec, RecordRegistry, RecordTypeId, TagReader, TagWriter, TaggedRecord};
