mod bandwidth;
mod dispatch;
mod header;
mod interface;
mod peer;
mod reliable;
mod stats;
mod tracking;
mod transport;

pub use bandwidth::BandwidthBudget;
pub use dispatch::{
    HandlerId, HandlerSet, Message, MessageHandler, PacketDecoder, PacketSource, RecordDecoder,
    RecordSource, Reliability,
};
pub use header::{
    Datagram, HeaderFlags, MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_MAGIC, Priority,
    RECEIPT_HEADER_SIZE, ReceiptHeader, Route, RoutingType, WIRE_HEADER_SIZE, WireHeader,
    encode_datagram, write_datagram,
};
pub use interface::NetworkInterface;
pub use peer::{ActivePeerList, DEFAULT_MAX_PEERS, PeerId, PeerInfo};
pub use reliable::{
    ConfirmationId, ReliablePacket, ReliableScheduler, ReliableState, RetryPolicy, ServiceOutcome,
};
pub use stats::NetworkStats;
pub use tracking::{ReceiptWindow, RttEstimator};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, UdpTransport};
