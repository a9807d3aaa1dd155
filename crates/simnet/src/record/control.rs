//! Built-in control records bound to the reserved id range.

use super::registry::{Record, RecordFactory, RecordRegistry};
use super::tag::{TagReader, TagWriter};
use crate::error::CodecError;

pub const PING_ID: u16 = 1;
pub const PONG_ID: u16 = 2;
/// Acknowledgements carry no record; only the receipt header matters.
pub const ACK_ID: u16 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ping {
    pub nonce: u32,
    pub sent_micros: u64,
}

impl Record for Ping {
    const NAME: &'static str = "simnet.Ping";

    fn write_fields(&self, writer: &mut TagWriter<'_>) -> Result<(), CodecError> {
        writer.write_u32(self.nonce)?;
        writer.write_u64(self.sent_micros)
    }

    fn read_fields(&mut self, reader: &mut TagReader<'_>) -> Result<(), CodecError> {
        self.nonce = reader.read_u32()?;
        self.sent_micros = reader.read_u64()?;
        Ok(())
    }
}

/// Echo of a [`Ping`]; carries the original nonce and send time back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pong {
    pub nonce: u32,
    pub sent_micros: u64,
}

impl Pong {
    pub fn answer(ping: &Ping) -> Self {
        Self {
            nonce: ping.nonce,
            sent_micros: ping.sent_micros,
        }
    }
}

impl Record for Pong {
    const NAME: &'static str = "simnet.Pong";

    fn write_fields(&self, writer: &mut TagWriter<'_>) -> Result<(), CodecError> {
        writer.write_u32(self.nonce)?;
        writer.write_u64(self.sent_micros)
    }

    fn read_fields(&mut self, reader: &mut TagReader<'_>) -> Result<(), CodecError> {
        self.nonce = reader.read_u32()?;
        self.sent_micros = reader.read_u64()?;
        Ok(())
    }
}

pub(crate) fn register_control_records(registry: &mut RecordRegistry) {
    registry.register_factory(RecordFactory::of::<Ping>().with_custom_id(PING_ID));
    registry.register_factory(RecordFactory::of::<Pong>().with_custom_id(PONG_ID));
}
