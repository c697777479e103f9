use crate::event::class_registry::{ClassRegistry, ClassRegistryBuilder, NetClassGroupMask};
use crate::event::{DeliveryOutcome, EventContext, EventDirection, GuaranteeType, NetEvent};
use crate::util::bit_stream::BitStream;
use anyhow::bail;
use std::sync::{Arc, Mutex, MutexGuard};

/// A callback invocation on a [TrackingEvent], identified by the event's payload
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EventLogEntry {
    Sent(u32),
    Delivered(u32, DeliveryOutcome),
    Processed(u32),
}

/// A shared, ordered record of callbacks. Events created by the registry on the receiving side
///  log to the registry's [EventLog], so a single log sees both ends of a link.
#[derive(Clone, Default, Debug)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<EventLogEntry>>>,
}

impl EventLog {
    pub fn new() -> EventLog {
        Default::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EventLogEntry>> {
        self.entries.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, entry: EventLogEntry) {
        self.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<EventLogEntry> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn sent(&self) -> Vec<u32> {
        self.lock().iter()
            .filter_map(|e| match e {
                EventLogEntry::Sent(payload) => Some(*payload),
                _ => None,
            })
            .collect()
    }

    pub fn delivered(&self) -> Vec<(u32, DeliveryOutcome)> {
        self.lock().iter()
            .filter_map(|e| match e {
                EventLogEntry::Delivered(payload, outcome) => Some((*payload, *outcome)),
                _ => None,
            })
            .collect()
    }

    pub fn processed(&self) -> Vec<u32> {
        self.lock().iter()
            .filter_map(|e| match e {
                EventLogEntry::Processed(payload) => Some(*payload),
                _ => None,
            })
            .collect()
    }
}

/// The event classes registered by [tracking_registry]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum TrackingClass {
    Unreliable,
    Reliable,
    Ordered,
    /// reliable unordered, registered with version 1
    ServerToClient,
}

impl TrackingClass {
    pub const ALL: [TrackingClass; 4] = [TrackingClass::Unreliable, TrackingClass::Reliable, TrackingClass::Ordered, TrackingClass::ServerToClient];

    pub fn name(&self) -> &'static str {
        match self {
            TrackingClass::Unreliable => "TrackingUnreliable",
            TrackingClass::Reliable => "TrackingReliable",
            TrackingClass::Ordered => "TrackingOrdered",
            TrackingClass::ServerToClient => "TrackingServerToClient",
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            TrackingClass::ServerToClient => 1,
            _ => 0,
        }
    }

    pub fn guarantee_type(&self) -> GuaranteeType {
        match self {
            TrackingClass::Unreliable => GuaranteeType::Unreliable,
            TrackingClass::Reliable => GuaranteeType::ReliableUnordered,
            TrackingClass::Ordered => GuaranteeType::ReliableOrdered,
            TrackingClass::ServerToClient => GuaranteeType::ReliableUnordered,
        }
    }

    pub fn direction(&self) -> EventDirection {
        match self {
            TrackingClass::ServerToClient => EventDirection::ServerToClient,
            _ => EventDirection::Any,
        }
    }
}

/// An event that records its callbacks in an [EventLog]. Its payload is a number that
///  identifies it in the log, optionally followed by padding bits to control its size on the
///  wire.
#[derive(Debug)]
pub struct TrackingEvent {
    class: TrackingClass,
    payload: u32,
    extra_bits: u16,
    log: EventLog,
}

impl TrackingEvent {
    pub fn new(class: TrackingClass, payload: u32, log: &EventLog) -> TrackingEvent {
        TrackingEvent {
            class,
            payload,
            extra_bits: 0,
            log: log.clone(),
        }
    }

    pub fn with_extra_bits(self, extra_bits: u16) -> TrackingEvent {
        TrackingEvent {
            extra_bits,
            ..self
        }
    }

    pub fn payload(&self) -> u32 {
        self.payload
    }
}

impl NetEvent for TrackingEvent {
    fn class_name(&self) -> &'static str {
        self.class.name()
    }

    fn guarantee_type(&self) -> GuaranteeType {
        self.class.guarantee_type()
    }

    fn direction(&self) -> EventDirection {
        self.class.direction()
    }

    fn pack(&self, _ctx: &EventContext, stream: &mut BitStream) {
        stream.write_u32(self.payload);
        stream.write_int(self.extra_bits as u32, 16);

        let mut remaining = self.extra_bits;
        while remaining > 0 && !stream.has_error() {
            let chunk = remaining.min(32);
            stream.write_int(0, chunk as u8);
            remaining -= chunk;
        }
    }

    fn unpack(&mut self, _ctx: &EventContext, stream: &mut BitStream) -> anyhow::Result<()> {
        self.payload = stream.read_u32();
        self.extra_bits = stream.read_int(16) as u16;

        let mut remaining = self.extra_bits;
        while remaining > 0 && !stream.has_error() {
            let chunk = remaining.min(32);
            if stream.read_int(chunk as u8) != 0 {
                bail!("{} event has non-zero padding", self.class.name());
            }
            remaining -= chunk;
        }

        if stream.has_error() {
            bail!("{} event is truncated", self.class.name());
        }
        Ok(())
    }

    fn notify_sent(&mut self, _ctx: &EventContext) {
        self.log.record(EventLogEntry::Sent(self.payload));
    }

    fn notify_delivered(&mut self, _ctx: &EventContext, outcome: DeliveryOutcome) {
        self.log.record(EventLogEntry::Delivered(self.payload, outcome));
    }

    fn process(&mut self, _ctx: &EventContext) -> anyhow::Result<()> {
        self.log.record(EventLogEntry::Processed(self.payload));
        Ok(())
    }
}

/// A registry with all [TrackingClass]es in the game class group. Events it creates record to
///  `log`.
///
/// Class ids are `TrackingOrdered` = 0, `TrackingReliable` = 1, `TrackingUnreliable` = 2 and
///  `TrackingServerToClient` = 3.
pub fn tracking_registry(log: &EventLog) -> Arc<ClassRegistry> {
    let mut builder = ClassRegistryBuilder::new();
    for class in TrackingClass::ALL {
        let log = log.clone();
        builder = builder.register_event(class.name(), class.version(), NetClassGroupMask::GAME, move || {
            Box::new(TrackingEvent::new(class, 0, &log)) as Box<dyn NetEvent>
        });
    }
    builder.build()
        .expect("tracking classes have unique names")
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionRole, ConnectionState};
    use crate::event::class_registry::NetClassGroup;
    use rstest::rstest;

    fn ctx() -> EventContext {
        EventContext {
            peer_addr: "127.0.0.1:1234".parse().unwrap(),
            role: ConnectionRole::Server,
            state: ConnectionState::Connected,
            event_class_version: 0,
        }
    }

    #[rstest]
    fn test_registry_ids() {
        let registry = tracking_registry(&EventLog::new());
        let ids = [TrackingClass::Ordered, TrackingClass::Reliable, TrackingClass::Unreliable, TrackingClass::ServerToClient]
            .iter()
            .map(|c| registry.class_id(NetClassGroup::Game, c.name()))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![Some(0), Some(1), Some(2), Some(3)]);
        assert!(registry.is_version_border_count(NetClassGroup::Game, 3));
    }

    #[rstest]
    #[case::plain(0)]
    #[case::short_padding(5)]
    #[case::long_padding(100)]
    fn test_pack_unpack(#[case] extra_bits: u16) {
        let log = EventLog::new();
        let event = TrackingEvent::new(TrackingClass::Reliable, 4711, &log).with_extra_bits(extra_bits);

        let mut stream = BitStream::for_writing(100);
        event.pack(&ctx(), &mut stream);
        assert_eq!(stream.bit_position(), 48 + extra_bits as usize);

        let mut received = TrackingEvent::new(TrackingClass::Reliable, 0, &log);
        received.unpack(&ctx(), &mut BitStream::for_reading(stream.as_slice())).unwrap();
        assert_eq!(received.payload(), 4711);
    }

    #[rstest]
    fn test_unpack_truncated() {
        let log = EventLog::new();
        let mut event = TrackingEvent::new(TrackingClass::Reliable, 0, &log);
        assert!(event.unpack(&ctx(), &mut BitStream::for_reading(&[1, 2, 3])).is_err());
    }

    #[rstest]
    fn test_log() {
        let log = EventLog::new();
        let mut event = TrackingEvent::new(TrackingClass::Ordered, 3, &log);
        event.notify_sent(&ctx());
        event.process(&ctx()).unwrap();
        event.notify_delivered(&ctx(), DeliveryOutcome::Lost);

        assert_eq!(log.entries(), vec![
            EventLogEntry::Sent(3),
            EventLogEntry::Processed(3),
            EventLogEntry::Delivered(3, DeliveryOutcome::Lost),
        ]);
        assert_eq!(log.sent(), vec![3]);
        assert_eq!(log.processed(), vec![3]);
        assert_eq!(log.delivered(), vec![(3, DeliveryOutcome::Lost)]);

        log.clear();
        assert!(log.entries().is_empty());
    }
}
