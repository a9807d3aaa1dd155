use std::collections::HashMap;
use std::sync::Arc;

use super::registry::{RecordFactory, RecordRegistry, RecordTypeId, TaggedRecord};
use super::tag::{TagReader, TagWriter};
use crate::error::CodecError;

pub const MESSAGE_ID_COUNT: usize = 1 << 16;
/// Ids below this bound belong to built-in control messages.
pub const RESERVED_MESSAGE_IDS: u16 = 64;

/// Routing table from wire message ids to record factories.
///
/// Each codec owns its bindings. The factories' custom ids only seed the
/// table at construction, so rebinding one codec leaves others built from
/// the same registry untouched.
pub struct RecordCodec {
    table: Vec<Option<Arc<RecordFactory>>>,
    known: HashMap<RecordTypeId, Arc<RecordFactory>>,
    ids: HashMap<RecordTypeId, u16>,
}

impl RecordCodec {
    /// Snapshots the registry; every factory with a non-zero custom id is
    /// bound to that id.
    pub fn new(registry: &RecordRegistry) -> Self {
        let mut table: Vec<Option<Arc<RecordFactory>>> = vec![None; MESSAGE_ID_COUNT];
        let mut known = HashMap::with_capacity(registry.len());
        let mut ids = HashMap::with_capacity(registry.len());

        for factory in registry.factories() {
            known.insert(factory.type_id(), Arc::clone(factory));

            let id = factory.custom_id();
            if id == 0 {
                continue;
            }
            if let Some(existing) = &table[id as usize] {
                log::warn!(
                    "message id {} claimed by both '{}' and '{}'; keeping '{}'",
                    id,
                    existing.name(),
                    factory.name(),
                    existing.name()
                );
                continue;
            }
            table[id as usize] = Some(Arc::clone(factory));
            ids.insert(factory.type_id(), id);
        }

        Self { table, known, ids }
    }

    pub fn local_id(&self, type_id: RecordTypeId) -> Option<u16> {
        self.ids.get(&type_id).copied()
    }

    pub fn factory_for(&self, local_id: u16) -> Option<&Arc<RecordFactory>> {
        self.table[local_id as usize].as_ref()
    }

    pub fn is_bound(&self, local_id: u16) -> bool {
        self.table[local_id as usize].is_some()
    }

    /// Serializes `record` into `buf` and returns the number of bytes
    /// written. Fails with [`CodecError::Overflow`] when `buf` is too small.
    pub fn encode(&self, record: &dyn TaggedRecord, buf: &mut [u8]) -> Result<usize, CodecError> {
        if self.local_id(record.record_type()).is_none() {
            return Err(CodecError::UnregisteredType(record.record_type()));
        }
        let mut writer = TagWriter::new(buf);
        record.encode(&mut writer)?;
        Ok(writer.position())
    }

    pub fn try_decode(&self, local_id: u16, buf: &[u8]) -> Result<Box<dyn TaggedRecord>, CodecError> {
        let factory = self
            .factory_for(local_id)
            .ok_or(CodecError::UnknownMessageId(local_id))?;

        let mut record = factory.create();
        let mut reader = TagReader::new(buf);
        record.decode(&mut reader)?;
        Ok(record)
    }

    /// Decodes a payload, logging and discarding anything that cannot be
    /// interpreted.
    pub fn decode(&self, local_id: u16, buf: &[u8]) -> Option<Box<dyn TaggedRecord>> {
        match self.try_decode(local_id, buf) {
            Ok(record) => Some(record),
            Err(CodecError::UnknownMessageId(id)) => {
                log::error!("no record registered for message id {}", id);
                None
            }
            Err(e) => {
                log::warn!("failed to decode message id {}: {}", local_id, e);
                None
            }
        }
    }

    /// Binds `type_id` to `desired` on the wire, releasing any id it held
    /// before. Reserved ids and ids bound to another type are refused.
    pub fn register_message_id(&mut self, type_id: RecordTypeId, desired: u16) -> bool {
        if desired < RESERVED_MESSAGE_IDS {
            log::warn!("message id {} is in the reserved range", desired);
            return false;
        }
        let Some(factory) = self.known.get(&type_id) else {
            log::warn!("record type {} is not registered", type_id);
            return false;
        };

        if let Some(existing) = &self.table[desired as usize] {
            if existing.type_id() == type_id {
                return true;
            }
            log::warn!(
                "message id {} is already bound to '{}'",
                desired,
                existing.name()
            );
            return false;
        }

        let previous = self.ids.get(&type_id).copied();
        if let Some(previous) = previous {
            if previous < RESERVED_MESSAGE_IDS {
                log::warn!("'{}' owns reserved id {} and cannot move", factory.name(), previous);
                return false;
            }
            self.table[previous as usize] = None;
        }

        log::debug!("bound '{}' to message id {}", factory.name(), desired);
        self.table[desired as usize] = Some(Arc::clone(factory));
        self.ids.insert(type_id, desired);
        true
    }

    /// Drops every binding outside the reserved range.
    pub fn clear_message_ids(&mut self) {
        for slot in &mut self.table[RESERVED_MESSAGE_IDS as usize..] {
            if let Some(factory) = slot.take() {
                self.ids.remove(&factory.type_id());
            }
        }
    }

    pub fn bound_ids(&self) -> impl Iterator<Item = (u16, &str)> {
        self.table
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|f| (id as u16, f.name())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{PING_ID, Ping, Record};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct AircraftState {
        entity: u32,
        position: [f64; 3],
        heading: f32,
        gear_down: bool,
        callsign: Option<String>,
        throttle: Option<u16>,
    }

    impl Record for AircraftState {
        const NAME: &'static str = "test.AircraftState";

        fn write_fields(&self, writer: &mut TagWriter<'_>) -> Result<(), CodecError> {
            writer.write_u32(self.entity)?;
            for axis in self.position {
                writer.write_f64(axis)?;
            }
            writer.write_f32(self.heading)?;
            writer.write_bool(self.gear_down)?;
            if let Some(callsign) = &self.callsign {
                writer.write_tagged(1, |w| w.write_str(callsign))?;
            }
            if let Some(throttle) = self.throttle {
                writer.write_tagged(2, |w| w.write_u16(throttle))?;
            }
            Ok(())
        }

        fn read_fields(&mut self, reader: &mut TagReader<'_>) -> Result<(), CodecError> {
            self.entity = reader.read_u32()?;
            for axis in &mut self.position {
                *axis = reader.read_f64()?;
            }
            self.heading = reader.read_f32()?;
            self.gear_down = reader.read_bool()?;
            reader.read_tags(|tag, body| match tag {
                1 => {
                    self.callsign = Some(body.read_str()?.to_owned());
                    Ok(true)
                }
                2 => {
                    self.throttle = Some(body.read_u16()?);
                    Ok(true)
                }
                _ => Ok(false),
            })
        }
    }

    #[derive(Debug, Default)]
    struct Marker;

    impl Record for Marker {
        const NAME: &'static str = "test.Marker";

        fn write_fields(&self, _writer: &mut TagWriter<'_>) -> Result<(), CodecError> {
            Ok(())
        }

        fn read_fields(&mut self, _reader: &mut TagReader<'_>) -> Result<(), CodecError> {
            Ok(())
        }
    }

    fn codec() -> RecordCodec {
        let mut registry = RecordRegistry::with_control_records();
        registry.register::<AircraftState>();
        registry.register::<Marker>();
        let mut codec = RecordCodec::new(&registry);
        assert!(codec.register_message_id(AircraftState::TYPE_ID, 100));
        codec
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        let samples = [
            AircraftState::default(),
            AircraftState {
                entity: 7,
                position: [1.5, -2000.25, 10_000.0],
                heading: 271.5,
                gear_down: true,
                callsign: Some("VIPER 1".into()),
                throttle: Some(65_535),
            },
            AircraftState {
                entity: u32::MAX,
                position: [f64::MIN, 0.0, f64::MAX],
                heading: -0.0,
                gear_down: false,
                callsign: Some(String::new()),
                throttle: None,
            },
        ];

        let mut buf = [0u8; 500];
        for sample in samples {
            let len = codec.encode(&sample, &mut buf).unwrap();
            let decoded = codec.decode(100, &buf[..len]).unwrap();
            assert_eq!(decoded.downcast_ref::<AircraftState>(), Some(&sample));
        }
    }

    #[test]
    fn test_encode_overflow() {
        let codec = codec();
        let state = AircraftState {
            callsign: Some("X".repeat(64)),
            ..Default::default()
        };

        let mut buf = [0u8; 40];
        assert!(matches!(
            codec.encode(&state, &mut buf),
            Err(CodecError::Overflow { .. })
        ));
    }

    #[test]
    fn test_encode_unbound_type_fails() {
        let codec = codec();
        let mut buf = [0u8; 16];
        assert_eq!(
            codec.encode(&Marker, &mut buf),
            Err(CodecError::UnregisteredType(Marker::TYPE_ID))
        );
    }

    #[test]
    fn test_unknown_id_never_decodes() {
        let codec = codec();
        let oversized = vec![0xA5u8; 70_000];
        let inputs: [&[u8]; 4] = [&[], &[0], &[0xFF; 32], &oversized];

        for id in [0u16, 63, 64, 99, 101, u16::MAX] {
            for input in inputs {
                assert!(codec.decode(id, input).is_none());
            }
        }
    }

    #[test]
    fn test_truncated_payload_is_dropped() {
        let codec = codec();
        let state = AircraftState {
            entity: 3,
            callsign: Some("HAWK".into()),
            ..Default::default()
        };
        let mut buf = [0u8; 128];
        let len = codec.encode(&state, &mut buf).unwrap();

        // A cut exactly after the mandatory fields is a valid record with no
        // optional fields.
        const MANDATORY_LEN: usize = 4 + 3 * 8 + 4 + 1;
        for cut in (0..len).filter(|&cut| cut != MANDATORY_LEN) {
            assert!(codec.decode(100, &buf[..cut]).is_none(), "cut at {}", cut);
        }
        assert!(codec.decode(100, &buf[..MANDATORY_LEN]).is_some());
    }

    #[test]
    fn test_reserved_range_is_protected() {
        let mut codec = codec();

        assert!(!codec.register_message_id(AircraftState::TYPE_ID, 10));
        assert!(!codec.register_message_id(Marker::TYPE_ID, PING_ID));
        assert_eq!(codec.factory_for(PING_ID).unwrap().type_id(), Ping::TYPE_ID);
        assert!(!codec.is_bound(10));
        assert_eq!(codec.local_id(AircraftState::TYPE_ID), Some(100));
    }

    #[test]
    fn test_rebinding_releases_previous_id() {
        let mut codec = codec();

        assert!(codec.register_message_id(AircraftState::TYPE_ID, 200));
        assert!(!codec.is_bound(100));
        assert_eq!(codec.local_id(AircraftState::TYPE_ID), Some(200));

        assert!(codec.register_message_id(Marker::TYPE_ID, 100));
        assert!(!codec.register_message_id(Marker::TYPE_ID, 200));
        assert!(codec.register_message_id(AircraftState::TYPE_ID, 200));
    }

    #[test]
    fn test_clear_keeps_reserved_bindings() {
        let mut codec = codec();
        codec.clear_message_ids();

        assert!(!codec.is_bound(100));
        assert_eq!(codec.local_id(AircraftState::TYPE_ID), None);
        assert_eq!(codec.local_id(Ping::TYPE_ID), Some(PING_ID));
        assert_eq!(codec.bound_ids().count(), 2);
    }

    #[test]
    fn test_codecs_from_one_registry_bind_independently() {
        let mut registry = RecordRegistry::with_control_records();
        registry.register_factory(RecordFactory::of::<AircraftState>().with_custom_id(64));
        let mut one = RecordCodec::new(&registry);
        let two = RecordCodec::new(&registry);

        assert!(one.register_message_id(AircraftState::TYPE_ID, 100));
        assert_eq!(one.local_id(AircraftState::TYPE_ID), Some(100));
        assert_eq!(two.local_id(AircraftState::TYPE_ID), Some(64));
        assert!(two.is_bound(64));
        assert!(!two.is_bound(100));

        let state = AircraftState {
            entity: 9,
            ..Default::default()
        };
        let mut buf = [0u8; 128];
        let len = two.encode(&state, &mut buf).unwrap();
        assert!(two.decode(64, &buf[..len]).is_some());

        one.clear_message_ids();
        assert_eq!(two.local_id(AircraftState::TYPE_ID), Some(64));
        assert_eq!(
            registry.factory(AircraftState::TYPE_ID).unwrap().custom_id(),
            64
        );
    }
}
