use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use serde::{Deserialize, Serialize};

use super::tag::{TagReader, TagWriter};
use crate::error::CodecError;

/// Stable 64-bit identity of a record type, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordTypeId(pub u64);

impl RecordTypeId {
    /// FNV-1a over the UTF-8 bytes of `name`.
    pub const fn from_name(name: &str) -> Self {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;

        let bytes = name.as_bytes();
        let mut hash = OFFSET;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(PRIME);
            i += 1;
        }
        Self(hash)
    }
}

impl fmt::Display for RecordTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A concrete message payload type.
///
/// Implementors write their mandatory fields in declaration order and may
/// append optional fields with [`TagWriter::write_tagged`].
pub trait Record: fmt::Debug + Default + 'static {
    const NAME: &'static str;
    const TYPE_ID: RecordTypeId = RecordTypeId::from_name(Self::NAME);

    fn write_fields(&self, writer: &mut TagWriter<'_>) -> Result<(), CodecError>;

    fn read_fields(&mut self, reader: &mut TagReader<'_>) -> Result<(), CodecError>;
}

/// Object-safe view of a [`Record`], as produced by factories and handed to
/// message handlers.
pub trait TaggedRecord: Any + fmt::Debug + 'static {
    fn record_type(&self) -> RecordTypeId;

    fn record_name(&self) -> &'static str;

    fn encode(&self, writer: &mut TagWriter<'_>) -> Result<(), CodecError>;

    fn decode(&mut self, reader: &mut TagReader<'_>) -> Result<(), CodecError>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<R: Record> TaggedRecord for R {
    fn record_type(&self) -> RecordTypeId {
        R::TYPE_ID
    }

    fn record_name(&self) -> &'static str {
        R::NAME
    }

    fn encode(&self, writer: &mut TagWriter<'_>) -> Result<(), CodecError> {
        self.write_fields(writer)
    }

    fn decode(&mut self, reader: &mut TagReader<'_>) -> Result<(), CodecError> {
        self.read_fields(reader)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl dyn TaggedRecord {
    pub fn is<R: Record>(&self) -> bool {
        self.as_any().is::<R>()
    }

    pub fn downcast_ref<R: Record>(&self) -> Option<&R> {
        self.as_any().downcast_ref::<R>()
    }

    pub fn downcast<R: Record>(self: Box<Self>) -> Option<Box<R>> {
        self.into_any().downcast::<R>().ok()
    }
}

fn create_boxed<R: Record>() -> Box<dyn TaggedRecord> {
    Box::new(R::default())
}

#[derive(Debug)]
pub struct RecordFactory {
    name: &'static str,
    type_id: RecordTypeId,
    create: fn() -> Box<dyn TaggedRecord>,
    custom_id: AtomicU16,
}

impl RecordFactory {
    pub fn of<R: Record>() -> Self {
        Self {
            name: R::NAME,
            type_id: R::TYPE_ID,
            create: create_boxed::<R>,
            custom_id: AtomicU16::new(0),
        }
    }

    pub fn with_custom_id(self, id: u16) -> Self {
        self.custom_id.store(id, Ordering::Relaxed);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> RecordTypeId {
        self.type_id
    }

    pub fn create(&self) -> Box<dyn TaggedRecord> {
        (self.create)()
    }

    /// Wire id a new codec binds this type to, `0` when unassigned.
    pub fn custom_id(&self) -> u16 {
        self.custom_id.load(Ordering::Relaxed)
    }

    pub fn set_custom_id(&self, id: u16) {
        self.custom_id.store(id, Ordering::Relaxed);
    }
}

/// Name- and type-keyed set of record factories.
///
/// Built once at startup and passed by reference to the codec; several
/// independent registries can coexist in one process.
#[derive(Debug, Default)]
pub struct RecordRegistry {
    factories: Vec<Arc<RecordFactory>>,
    by_name: HashMap<&'static str, usize>,
    by_type: HashMap<RecordTypeId, usize>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in control records at their
    /// reserved ids.
    pub fn with_control_records() -> Self {
        let mut registry = Self::new();
        super::control::register_control_records(&mut registry);
        registry
    }

    pub fn register_factory(&mut self, factory: RecordFactory) -> bool {
        if self.by_name.contains_key(factory.name()) {
            log::warn!("record factory '{}' is already registered", factory.name());
            return false;
        }
        if let Some(&index) = self.by_type.get(&factory.type_id()) {
            log::warn!(
                "record factory '{}' collides with '{}' on type id {}",
                factory.name(),
                self.factories[index].name(),
                factory.type_id()
            );
            return false;
        }

        let index = self.factories.len();
        self.by_name.insert(factory.name(), index);
        self.by_type.insert(factory.type_id(), index);
        self.factories.push(Arc::new(factory));
        true
    }

    pub fn register<R: Record>(&mut self) -> bool {
        self.register_factory(RecordFactory::of::<R>())
    }

    pub fn create_record(&self, type_id: RecordTypeId) -> Option<Box<dyn TaggedRecord>> {
        self.factory(type_id).map(|factory| factory.create())
    }

    pub fn create_record_by_name(&self, name: &str) -> Option<Box<dyn TaggedRecord>> {
        self.factory_by_name(name).map(|factory| factory.create())
    }

    pub fn has_factory(&self, type_id: RecordTypeId) -> bool {
        self.by_type.contains_key(&type_id)
    }

    pub fn has_factory_named(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn factory(&self, type_id: RecordTypeId) -> Option<&Arc<RecordFactory>> {
        self.by_type.get(&type_id).map(|&index| &self.factories[index])
    }

    pub fn factory_by_name(&self, name: &str) -> Option<&Arc<RecordFactory>> {
        self.by_name.get(name).map(|&index| &self.factories[index])
    }

    pub fn factories(&self) -> impl Iterator<Item = &Arc<RecordFactory>> {
        self.factories.iter()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Heading {
        degrees: f32,
    }

    impl Record for Heading {
        const NAME: &'static str = "test.Heading";

        fn write_fields(&self, writer: &mut TagWriter<'_>) -> Result<(), CodecError> {
            writer.write_f32(self.degrees)
        }

        fn read_fields(&mut self, reader: &mut TagReader<'_>) -> Result<(), CodecError> {
            self.degrees = reader.read_f32()?;
            Ok(())
        }
    }

    #[test]
    fn test_type_id_is_stable() {
        assert_eq!(RecordTypeId::from_name(""), RecordTypeId(0xcbf2_9ce4_8422_2325));
        assert_eq!(Heading::TYPE_ID, RecordTypeId::from_name("test.Heading"));
        assert_ne!(Heading::TYPE_ID, RecordTypeId::from_name("test.heading"));
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut registry = RecordRegistry::new();

        assert!(registry.register::<Heading>());
        assert!(!registry.register::<Heading>());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_create_by_name_and_id() {
        let mut registry = RecordRegistry::new();
        registry.register::<Heading>();

        let by_name = registry.create_record_by_name("test.Heading").unwrap();
        assert!(by_name.is::<Heading>());

        let by_id = registry.create_record(Heading::TYPE_ID).unwrap();
        assert_eq!(by_id.downcast_ref::<Heading>(), Some(&Heading::default()));

        assert!(registry.create_record_by_name("test.Missing").is_none());
        assert!(registry.create_record(RecordTypeId(1)).is_none());
        assert!(!registry.has_factory_named("test.Missing"));
    }

    #[test]
    fn test_registries_are_isolated() {
        let mut first = RecordRegistry::new();
        let second = RecordRegistry::new();

        first.register::<Heading>();

        assert!(first.has_factory(Heading::TYPE_ID));
        assert!(!second.has_factory(Heading::TYPE_ID));
    }

    #[test]
    fn test_custom_id_slot_defaults_to_unassigned() {
        let factory = RecordFactory::of::<Heading>();
        assert_eq!(factory.custom_id(), 0);

        factory.set_custom_id(100);
        assert_eq!(factory.custom_id(), 100);
    }
}
