mod packet_queue;
mod ring;

pub use packet_queue::PacketQueue;
pub use ring::RingBuffer;
