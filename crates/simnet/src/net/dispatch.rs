//! Pluggable producers and consumers around the network interface.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::header::{HeaderFlags, Priority, Route, WireHeader};
use crate::error::CodecError;
use crate::record::{RecordCodec, TaggedRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reliability {
    #[default]
    Unreliable,
    Reliable,
}

/// A decoded inbound message. Borrowed for the duration of one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub header: &'a WireHeader,
    pub record: &'a dyn TaggedRecord,
}

pub trait MessageHandler {
    fn handle_message(&mut self, message: &Message<'_>);
}

impl<F> MessageHandler for F
where
    F: FnMut(&Message<'_>),
{
    fn handle_message(&mut self, message: &Message<'_>) {
        self(message)
    }
}

/// Turns an inbound payload into a record.
pub trait PacketDecoder {
    fn decode(
        &mut self,
        codec: &RecordCodec,
        header: &WireHeader,
        payload: &[u8],
    ) -> Result<Box<dyn TaggedRecord>, CodecError>;
}

/// Default decoder: looks the message id up in the codec table.
#[derive(Debug, Default)]
pub struct RecordDecoder;

impl PacketDecoder for RecordDecoder {
    fn decode(
        &mut self,
        codec: &RecordCodec,
        header: &WireHeader,
        payload: &[u8],
    ) -> Result<Box<dyn TaggedRecord>, CodecError> {
        codec.try_decode(header.message_id, payload)
    }
}

/// Supplies outbound packets on demand.
///
/// An implementation fills in `header` (message id, route, priority, and
/// `HeaderFlags::RELIABLE` if delivery must be confirmed), writes the
/// payload, and returns its length. `None` means nothing is ready this
/// cycle.
pub trait PacketSource {
    fn get_packet(
        &mut self,
        codec: &RecordCodec,
        header: &mut WireHeader,
        payload: &mut [u8],
    ) -> Option<usize>;
}

#[derive(Debug)]
struct Outgoing {
    record: Box<dyn TaggedRecord>,
    route: Route,
    priority: Priority,
    reliability: Reliability,
}

/// A [`PacketSource`] fed with records. Clones share the same queue, so one
/// handle can be given to the interface while another keeps pushing.
#[derive(Debug, Clone, Default)]
pub struct RecordSource {
    queue: Rc<RefCell<VecDeque<Outgoing>>>,
}

impl RecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &self,
        record: Box<dyn TaggedRecord>,
        route: Route,
        priority: Priority,
        reliability: Reliability,
    ) {
        self.queue.borrow_mut().push_back(Outgoing {
            record,
            route,
            priority,
            reliability,
        });
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

impl PacketSource for RecordSource {
    fn get_packet(
        &mut self,
        codec: &RecordCodec,
        header: &mut WireHeader,
        payload: &mut [u8],
    ) -> Option<usize> {
        let mut queue = self.queue.borrow_mut();
        while let Some(outgoing) = queue.pop_front() {
            let record = outgoing.record.as_ref();
            let Some(message_id) = codec.local_id(record.record_type()) else {
                log::warn!("dropping {}: no message id bound", record.record_name());
                continue;
            };
            let len = match codec.encode(record, payload) {
                Ok(len) => len,
                Err(e) => {
                    log::warn!("dropping {}: {}", record.record_name(), e);
                    continue;
                }
            };

            header.message_id = message_id;
            header.set_route(outgoing.route);
            header.priority = outgoing.priority;
            header.flags = match outgoing.reliability {
                Reliability::Reliable => HeaderFlags::RELIABLE,
                Reliability::Unreliable => HeaderFlags::empty(),
            };
            return Some(len);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u32);

#[derive(Default)]
pub struct HandlerSet {
    handlers: Vec<(HandlerId, Box<dyn MessageHandler>)>,
    next_id: u32,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handler: Box<dyn MessageHandler>) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.handlers.push((id, handler));
        id
    }

    pub fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(handler_id, _)| *handler_id != id);
        self.handlers.len() != before
    }

    /// Calls every handler in registration order.
    pub fn dispatch(&mut self, message: &Message<'_>) {
        for (_, handler) in &mut self.handlers {
            handler.handle_message(message);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
