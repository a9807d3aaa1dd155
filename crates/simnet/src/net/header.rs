//! Fixed-layout datagram headers.
//!
//! ```text
//!  0       4     6   7   8   9   10    12            16            20            24
//!  | magic | msg | rt| fl| pr| -- | src |  payload len | routing data| confirm id |
//! ```
//!
//! The confirmation id is only present when `flags` carries `RELIABLE` or
//! `ACK`, turning the wire header into a receipt header. Exactly
//! `payload len` bytes of record data follow.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::peer::PeerId;
use super::reliable::ConfirmationId;
use crate::error::{CodecError, HeaderError};
use crate::record::{TagReader, TagWriter};

pub const PROTOCOL_MAGIC: u32 = 0x534E_4554;
pub const WIRE_HEADER_SIZE: usize = 20;
pub const RECEIPT_HEADER_SIZE: usize = WIRE_HEADER_SIZE + 4;
pub const MAX_PAYLOAD_SIZE: usize = 500;
pub const MAX_DATAGRAM_SIZE: usize = RECEIPT_HEADER_SIZE + MAX_PAYLOAD_SIZE;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u8 {
        const RELIABLE = 1 << 0;
        const ACK = 1 << 1;
    }
}

impl HeaderFlags {
    pub fn has_receipt(self) -> bool {
        self.intersects(Self::RELIABLE | Self::ACK)
    }
}

/// Transmit lane; `Critical` drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn lane(self) -> usize {
        self as usize
    }

    pub fn from_lane(lane: u8) -> Option<Self> {
        Self::ALL.get(lane as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoutingType {
    /// `routing_data` is the destination peer id.
    Unicast = 0,
    Broadcast = 1,
    /// `routing_data` is a group mask matched against each peer's groups.
    Group = 2,
}

impl TryFrom<u8> for RoutingType {
    type Error = HeaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RoutingType::Unicast),
            1 => Ok(RoutingType::Broadcast),
            2 => Ok(RoutingType::Group),
            other => Err(HeaderError::UnknownRouting(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Peer(PeerId),
    Broadcast,
    Group(u32),
}

impl Route {
    pub fn routing(self) -> (RoutingType, u32) {
        match self {
            Route::Peer(peer) => (RoutingType::Unicast, peer.0 as u32),
            Route::Broadcast => (RoutingType::Broadcast, 0),
            Route::Group(mask) => (RoutingType::Group, mask),
        }
    }

    pub fn from_routing(routing: RoutingType, data: u32) -> Self {
        match routing {
            RoutingType::Unicast => Route::Peer(PeerId(data as u16)),
            RoutingType::Broadcast => Route::Broadcast,
            RoutingType::Group => Route::Group(data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub message_id: u16,
    pub routing: RoutingType,
    pub flags: HeaderFlags,
    pub priority: Priority,
    pub source: PeerId,
    pub payload_length: u32,
    pub routing_data: u32,
}

impl Default for WireHeader {
    fn default() -> Self {
        Self {
            message_id: 0,
            routing: RoutingType::Broadcast,
            flags: HeaderFlags::empty(),
            priority: Priority::Normal,
            source: PeerId(0),
            payload_length: 0,
            routing_data: 0,
        }
    }
}

impl WireHeader {
    pub fn new(message_id: u16, source: PeerId, route: Route, priority: Priority) -> Self {
        let (routing, routing_data) = route.routing();
        Self {
            message_id,
            routing,
            flags: HeaderFlags::empty(),
            priority,
            source,
            payload_length: 0,
            routing_data,
        }
    }

    pub fn route(&self) -> Route {
        Route::from_routing(self.routing, self.routing_data)
    }

    pub fn set_route(&mut self, route: Route) {
        let (routing, routing_data) = route.routing();
        self.routing = routing;
        self.routing_data = routing_data;
    }

    pub fn encoded_len(&self) -> usize {
        if self.flags.has_receipt() {
            RECEIPT_HEADER_SIZE
        } else {
            WIRE_HEADER_SIZE
        }
    }

    pub fn write(&self, writer: &mut TagWriter<'_>) -> Result<(), CodecError> {
        writer.write_u32(PROTOCOL_MAGIC)?;
        writer.write_u16(self.message_id)?;
        writer.write_u8(self.routing as u8)?;
        writer.write_u8(self.flags.bits())?;
        writer.write_u8(self.priority as u8)?;
        writer.write_u8(0)?;
        writer.write_u16(self.source.0)?;
        writer.write_u32(self.payload_length)?;
        writer.write_u32(self.routing_data)
    }
}

/// A wire header extended with the confirmation id of a reliable packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptHeader {
    pub header: WireHeader,
    pub confirmation_id: ConfirmationId,
}

impl ReceiptHeader {
    pub fn write(&self, writer: &mut TagWriter<'_>) -> Result<(), CodecError> {
        self.header.write(writer)?;
        writer.write_u32(self.confirmation_id.0)
    }
}

/// Writes a complete datagram; `header.payload_length` is taken from
/// `payload`. A confirmation id is written iff the flags call for one.
pub fn write_datagram(
    out: &mut [u8],
    header: &WireHeader,
    confirmation_id: Option<ConfirmationId>,
    payload: &[u8],
) -> Result<usize, CodecError> {
    let mut header = *header;
    header.payload_length = u32::try_from(payload.len())
        .map_err(|_| CodecError::InvalidValue("payload length exceeds u32"))?;

    let mut writer = TagWriter::new(out);
    match (header.flags.has_receipt(), confirmation_id) {
        (true, Some(confirmation_id)) => ReceiptHeader {
            header,
            confirmation_id,
        }
        .write(&mut writer)?,
        (false, None) => header.write(&mut writer)?,
        (true, None) => {
            return Err(CodecError::InvalidValue("receipt header without confirmation id"));
        }
        (false, Some(_)) => {
            return Err(CodecError::InvalidValue("confirmation id on a plain header"));
        }
    }
    writer.write_bytes(payload)?;
    Ok(writer.position())
}

pub fn encode_datagram(
    header: &WireHeader,
    confirmation_id: Option<ConfirmationId>,
    payload: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![0u8; header.encoded_len() + payload.len()];
    let len = write_datagram(&mut out, header, confirmation_id, payload)?;
    out.truncate(len);
    Ok(out)
}

/// A validated view over a received datagram.
#[derive(Debug, Clone, Copy)]
pub struct Datagram<'a> {
    pub header: WireHeader,
    pub confirmation_id: Option<ConfirmationId>,
    pub payload: &'a [u8],
}

impl<'a> Datagram<'a> {
    pub fn parse(data: &'a [u8], max_payload: usize) -> Result<Self, HeaderError> {
        if data.len() < WIRE_HEADER_SIZE {
            return Err(HeaderError::Truncated {
                len: data.len(),
                needed: WIRE_HEADER_SIZE,
            });
        }

        let mut reader = TagReader::new(data);
        let header = RawHeader::read(&mut reader)
            .map_err(|_| HeaderError::Truncated {
                len: data.len(),
                needed: WIRE_HEADER_SIZE,
            })?
            .validate()?;

        let confirmation_id = if header.flags.has_receipt() {
            let id = reader.read_u32().map_err(|_| HeaderError::Truncated {
                len: data.len(),
                needed: RECEIPT_HEADER_SIZE,
            })?;
            Some(ConfirmationId(id))
        } else {
            None
        };

        if header.payload_length as usize > max_payload {
            return Err(HeaderError::PayloadTooLarge {
                len: header.payload_length,
                max: max_payload,
            });
        }
        let payload = &data[reader.position()..];
        if payload.len() != header.payload_length as usize {
            return Err(HeaderError::LengthMismatch {
                declared: header.payload_length,
                actual: payload.len(),
            });
        }

        Ok(Self {
            header,
            confirmation_id,
            payload,
        })
    }
}

struct RawHeader {
    magic: u32,
    message_id: u16,
    routing: u8,
    flags: u8,
    priority: u8,
    source: u16,
    payload_length: u32,
    routing_data: u32,
}

impl RawHeader {
    fn read(reader: &mut TagReader<'_>) -> Result<Self, CodecError> {
        let magic = reader.read_u32()?;
        let message_id = reader.read_u16()?;
        let routing = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let priority = reader.read_u8()?;
        let _reserved = reader.read_u8()?;
        Ok(Self {
            magic,
            message_id,
            routing,
            flags,
            priority,
            source: reader.read_u16()?,
            payload_length: reader.read_u32()?,
            routing_data: reader.read_u32()?,
        })
    }

    fn validate(self) -> Result<WireHeader, HeaderError> {
        if self.magic != PROTOCOL_MAGIC {
            return Err(HeaderError::BadMagic(self.magic));
        }
        let routing = RoutingType::try_from(self.routing)?;
        let priority =
            Priority::from_lane(self.priority).ok_or(HeaderError::InvalidPriority(self.priority))?;

        Ok(WireHeader {
            message_id: self.message_id,
            routing,
            flags: HeaderFlags::from_bits_truncate(self.flags),
            priority,
            source: PeerId(self.source),
            payload_length: self.payload_length,
            routing_data: self.routing_data,
        })
    }
}
