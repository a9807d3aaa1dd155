mod codec;
mod control;
mod registry;
mod tag;

pub use codec::{MESSAGE_ID_COUNT, RESERVED_MESSAGE_IDS, RecordCodec};
pub use control::{ACK_ID, PING_ID, PONG_ID, Ping, Pong};
pub use registry::{Record, RecordFactory, RecordRegistry, RecordTypeId, TaggedRecord};
pub use tag::{TagReader, TagWriter};
