use simnet::error::CodecError;
use simnet::record::{Record, TagReader, TagWriter};

/// Custom message id the demo status record is bound to.
pub const STATUS_ID: u16 = 64;

const TAG_LABEL: u8 = 1;

/// Periodic heartbeat every node broadcasts to its peers.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Status {
    pub tick: u32,
    pub uptime_ms: u64,
    pub peer_count: u16,
    pub label: Option<String>,
}

impl Record for Status {
    const NAME: &'static str = "simnet.node.Status";

    fn write_fields(&self, writer: &mut TagWriter<'_>) -> Result<(), CodecError> {
        writer.write_u32(self.tick)?;
        writer.write_u64(self.uptime_ms)?;
        writer.write_u16(self.peer_count)?;
        if let Some(label) = &self.label {
            writer.write_tagged(TAG_LABEL, |w| w.write_str(label))?;
        }
        Ok(())
    }

    fn read_fields(&mut self, reader: &mut TagReader<'_>) -> Result<(), CodecError> {
        self.tick = reader.read_u32()?;
        self.uptime_ms = reader.read_u64()?;
        self.peer_count = reader.read_u16()?;
        let label = &mut self.label;
        reader.read_tags(|tag, body| match tag {
            TAG_LABEL => {
                *label = Some(body.read_str()?.to_owned());
                Ok(true)
            }
            _ => Ok(false),
        })
    }
}
