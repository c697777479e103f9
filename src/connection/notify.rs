use crate::connection::sequence::EventSeq;
use crate::event::{GuaranteeType, NetEvent};
use crate::util::arena_queue::LinkedQueue;
use std::fmt::{Debug, Formatter};

/// A queued event together with the data the connection needs to send and resolve it. Notes
///  live in the connection's node arena and move between its queues and the notify records of
///  outgoing packets.
pub(crate) struct EventNote {
    pub(crate) event: Box<dyn NetEvent>,
    pub(crate) class_id: u32,
    pub(crate) guarantee: GuaranteeType,
    /// only for reliable ordered events
    pub(crate) seq: Option<EventSeq>,
}

impl Debug for EventNote {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventNote{{{} (#{}) {:?} seq: {:?}}}", self.event.class_name(), self.class_id, self.guarantee, self.seq)
    }
}

/// The events written into one outgoing packet.
///
/// The transport allocates one of these per packet (see
///  [crate::connection::EventConnection::alloc_notify]), passes it to
///  [crate::connection::EventConnection::write_packet] and keeps it with its own per-packet
///  acknowledgement data. Once it knows the packet's fate, it hands the record back through
///  `packet_received` or `packet_dropped`, which consume the record's events.
///
/// A record refers to nodes owned by the connection that filled it, and must only be resolved
///  by that connection.
#[derive(Default, Debug)]
pub struct EventPacketNotify {
    events: LinkedQueue,
}

impl EventPacketNotify {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn events(&self) -> &LinkedQueue {
        &self.events
    }

    pub(crate) fn events_mut(&mut self) -> &mut LinkedQueue {
        &mut self.events
    }

    /// detaches the record's events, leaving the record empty
    pub(crate) fn take_events(&mut self) -> LinkedQueue {
        self.events.take()
    }
}
