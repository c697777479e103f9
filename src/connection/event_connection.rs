use crate::connection::config::EventConnectionConfig;
use crate::connection::notify::{EventNote, EventPacketNotify};
use crate::connection::sequence::EventSeq;
use crate::connection::{ConnectionRole, ConnectionState};
use crate::event::class_registry::ClassRegistry;
use crate::event::{DeliveryOutcome, EventContext, GuaranteeType, NetEvent};
use crate::util::arena_queue::{LinkedQueue, NodeArena, NodeIdx};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// The event layer of a single connection.
///
/// An `EventConnection` is driven by the surrounding connection / transport code, which must
///  serialize all calls for one connection: the application posts events, the transport asks
///  for packet contents with `write_packet`, passes received packets to `read_packet`, and
///  reports the fate of every written packet via `packet_received` or `packet_dropped`.
///
/// All queues share one node arena. A note is in exactly one of the send queues, the
///  delivery-pending list, the receive reorder buffer, or the notify record of a packet that
///  is still in flight.
pub struct EventConnection {
    pub(super) config: Arc<EventConnectionConfig>,
    pub(super) registry: Arc<ClassRegistry>,
    pub(super) context: EventContext,

    pub(super) notes: NodeArena<EventNote>,
    /// not yet sent ordered events, ascending by sequence number
    pub(super) ordered_send_queue: LinkedQueue,
    /// not yet sent unreliable and reliable unordered events
    pub(super) unordered_send_queue: LinkedQueue,
    /// received ordered events waiting for their predecessors, ascending by sequence number
    pub(super) receive_reorder_buffer: LinkedQueue,
    /// acknowledged ordered events waiting for their predecessors to be acknowledged,
    ///  ascending by sequence number
    pub(super) delivery_pending: LinkedQueue,

    pub(super) next_send_seq: EventSeq,
    pub(super) next_recv_seq: EventSeq,
    /// the lowest sequence number whose delivery was not confirmed yet, i.e. 'last acknowledged + 1'
    pub(super) next_ack_seq: EventSeq,

    pub(super) event_class_count: u32,
    pub(super) event_class_bit_size: u8,

    pub(super) num_events_waiting: usize,
    pub(super) last_error: Option<String>,
}

impl EventConnection {
    pub fn new(config: Arc<EventConnectionConfig>, registry: Arc<ClassRegistry>, peer_addr: SocketAddr, role: ConnectionRole) -> anyhow::Result<EventConnection> {
        config.validate()?;

        Ok(EventConnection {
            config,
            registry,
            context: EventContext {
                peer_addr,
                role,
                state: ConnectionState::Handshaking,
                event_class_version: 0,
            },
            notes: Default::default(),
            ordered_send_queue: Default::default(),
            unordered_send_queue: Default::default(),
            receive_reorder_buffer: Default::default(),
            delivery_pending: Default::default(),
            next_send_seq: EventSeq::ZERO,
            next_recv_seq: EventSeq::ZERO,
            next_ack_seq: EventSeq::ZERO,
            event_class_count: 0,
            event_class_bit_size: 0,
            num_events_waiting: 0,
            last_error: None,
        })
    }

    /// Queues an event for sending.
    ///
    /// The event is rejected and handed back if the connection is closed, if its class is not
    ///  registered in the connection's class group, or if the connection is established and
    ///  the peer does not know the class. While the handshake is running, the class count is
    ///  not known yet and the last check is skipped.
    pub fn post_event(&mut self, event: Box<dyn NetEvent>) -> Result<(), Box<dyn NetEvent>> {
        if self.context.state == ConnectionState::Closed {
            debug!("rejecting {} event for closed connection to {:?}", event.class_name(), self.context.peer_addr);
            return Err(event);
        }

        let Some(class_id) = self.registry.class_id_of(self.config.class_group, event.as_ref()) else {
            warn!("rejecting event of unregistered class {} for {:?}", event.class_name(), self.context.peer_addr);
            return Err(event);
        };
        if self.context.state == ConnectionState::Connected && class_id >= self.event_class_count {
            warn!("rejecting {} event: class #{} is not known to {:?}", event.class_name(), class_id, self.context.peer_addr);
            return Err(event);
        }

        let guarantee = event.guarantee_type();
        let seq = if guarantee == GuaranteeType::ReliableOrdered {
            let seq = self.next_send_seq;
            self.next_send_seq = seq.next();
            Some(seq)
        }
        else {
            None
        };

        trace!("posting {} event #{} ({:?}, seq {:?}) for {:?}", event.class_name(), class_id, guarantee, seq, self.context.peer_addr);

        let idx = self.notes.insert(EventNote {
            event,
            class_id,
            guarantee,
            seq,
        });
        match guarantee {
            GuaranteeType::ReliableOrdered => self.ordered_send_queue.push_back(&mut self.notes, idx),
            _ => self.unordered_send_queue.push_back(&mut self.notes, idx),
        }
        self.num_events_waiting += 1;
        Ok(())
    }

    /// allocates the record that tracks the events of one outgoing packet
    pub fn alloc_notify(&self) -> EventPacketNotify {
        EventPacketNotify::default()
    }

    /// Is there anything in the send queues? Events that are in flight are not counted.
    pub fn is_data_to_transmit(&self) -> bool {
        !self.unordered_send_queue.is_empty() || !self.ordered_send_queue.is_empty()
    }

    pub fn state(&self) -> ConnectionState {
        self.context.state
    }

    /// Updates the connection state as reported by the connection-establishment layer.
    ///  Switching to [ConnectionState::Closed] tears the connection down; a closed connection
    ///  stays closed.
    pub fn set_connection_state(&mut self, state: ConnectionState) {
        match (self.context.state, state) {
            (_, ConnectionState::Closed) => self.close(),
            (ConnectionState::Closed, _) => {
                warn!("ignoring state change to {:?} for closed connection to {:?}", state, self.context.peer_addr);
            }
            _ => {
                debug!("connection to {:?}: {:?} -> {:?}", self.context.peer_addr, self.context.state, state);
                self.context.state = state;
            }
        }
    }

    pub fn role(&self) -> ConnectionRole {
        self.context.role
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.context.peer_addr
    }

    pub fn config(&self) -> &EventConnectionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    /// the sequence number the next posted ordered event will get
    pub fn next_send_seq(&self) -> EventSeq {
        self.next_send_seq
    }

    /// the sequence number of the next ordered event to be processed
    pub fn next_recv_seq(&self) -> EventSeq {
        self.next_recv_seq
    }

    /// the highest sequence number up to which all ordered events are confirmed as delivered
    pub fn last_acked_seq(&self) -> Option<EventSeq> {
        self.next_ack_seq.prev()
    }

    /// number of posted events plus the number of events resolved after a packet loss, minus
    ///  the number of times an event was written to a packet
    pub fn num_events_waiting(&self) -> usize {
        self.num_events_waiting
    }

    /// number of events this connection currently owns: queued for sending, in flight, waiting
    ///  for delivery confirmation, or received and waiting for their predecessors
    pub fn num_held_events(&self) -> usize {
        self.notes.len()
    }

    /// the protocol violation that caused the most recent packet to be rejected
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// the number of event classes both peers know, as agreed during the handshake
    pub fn event_class_count(&self) -> u32 {
        self.event_class_count
    }

    pub fn event_class_bit_size(&self) -> u8 {
        self.event_class_bit_size
    }

    pub fn event_class_version(&self) -> u32 {
        self.context.event_class_version
    }

    /// Tears the connection down. Every event this side posted and that is not resolved yet is
    ///  notified as not delivered: first the events waiting for delivery confirmation, then
    ///  the unordered and ordered send queues, and finally events in packets that are still in
    ///  flight. The notify records of those packets belong to the transport, so these are
    ///  notified in no particular order rather than by packet or send order. Received events
    ///  that were not processed yet are discarded.
    ///
    /// Afterwards, the connection accepts no events and ignores packet notifications. Calling
    ///  this more than once has no further effect.
    pub fn close(&mut self) {
        if self.context.state == ConnectionState::Closed {
            return;
        }
        debug!("closing event connection to {:?}", self.context.peer_addr);
        self.context.state = ConnectionState::Closed;

        let delivery_pending = self.delivery_pending.take();
        self.notify_all(delivery_pending, DeliveryOutcome::ConnectionClosed);
        let unordered = self.unordered_send_queue.take();
        self.notify_all(unordered, DeliveryOutcome::ConnectionClosed);
        let ordered = self.ordered_send_queue.take();
        self.notify_all(ordered, DeliveryOutcome::ConnectionClosed);

        let mut received = self.receive_reorder_buffer.take();
        while let Some(idx) = received.pop_front(&mut self.notes) {
            self.notes.remove(idx);
        }

        // whatever is left belongs to notify records of packets in flight, visited in arena order
        for idx in self.notes.occupied() {
            self.notify_delivered(idx, DeliveryOutcome::ConnectionClosed);
        }
        self.num_events_waiting = 0;
    }

    /// removes a note from the arena and reports the outcome to its event. The note must not
    ///  be linked into a queue.
    pub(super) fn notify_delivered(&mut self, idx: NodeIdx, outcome: DeliveryOutcome) {
        let mut note = self.notes.remove(idx);
        trace!("{:?} for {:?}: {:?}", note, self.context.peer_addr, outcome);
        note.event.notify_delivered(&self.context, outcome);
    }

    pub(super) fn notify_all(&mut self, mut queue: LinkedQueue, outcome: DeliveryOutcome) {
        while let Some(idx) = queue.pop_front(&mut self.notes) {
            self.notify_delivered(idx, outcome);
        }
    }

    /// records a protocol violation
    pub(super) fn fail(&mut self, error: anyhow::Error) -> anyhow::Error {
        warn!("protocol error on connection to {:?}: {}", self.context.peer_addr, error);
        self.last_error = Some(error.to_string());
        error
    }
}

impl Drop for EventConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MockNetEvent;
    use crate::test_util::event::{tracking_registry, EventLog, EventLogEntry, TrackingClass, TrackingEvent};
    use crate::test_util::link::SimulatedLink;
    use rstest::rstest;

    fn ordered(payload: u32, log: &EventLog) -> Box<dyn NetEvent> {
        Box::new(TrackingEvent::new(TrackingClass::Ordered, payload, log))
    }

    fn unordered(class: TrackingClass, payload: u32, log: &EventLog) -> Box<dyn NetEvent> {
        Box::new(TrackingEvent::new(class, payload, log))
    }

    fn queued_seqs(conn: &EventConnection, queue: &LinkedQueue) -> Vec<Option<u64>> {
        queue.iter(&conn.notes)
            .map(|idx| conn.notes.get(idx).seq.map(|s| s.to_raw()))
            .collect()
    }

    #[rstest]
    fn test_post_assigns_consecutive_seqs() {
        let log = EventLog::new();
        let mut link = SimulatedLink::new(Default::default(), tracking_registry(&log), 1).unwrap();
        let conn = &mut link.client;

        for payload in 0..5 {
            assert!(conn.post_event(ordered(payload, &log)).is_ok());
        }
        assert!(conn.post_event(unordered(TrackingClass::Reliable, 100, &log)).is_ok());
        assert!(conn.post_event(unordered(TrackingClass::Unreliable, 101, &log)).is_ok());

        assert_eq!(queued_seqs(conn, &conn.ordered_send_queue), vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(queued_seqs(conn, &conn.unordered_send_queue), vec![None, None]);
        assert_eq!(conn.next_send_seq(), EventSeq::from_raw(5));
        assert_eq!(conn.num_events_waiting(), 7);
        assert!(conn.is_data_to_transmit());
    }

    #[rstest]
    fn test_post_unregistered_class() {
        let log = EventLog::new();
        let mut link = SimulatedLink::new(Default::default(), tracking_registry(&log), 1).unwrap();

        let mut event = MockNetEvent::new();
        event.expect_class_name().return_const("NotRegistered");
        event.expect_notify_delivered().never();

        assert!(link.client.post_event(Box::new(event)).is_err());
        assert!(!link.client.is_data_to_transmit());
        assert_eq!(link.client.num_events_waiting(), 0);
    }

    #[rstest]
    #[case::handshaking(ConnectionState::Handshaking, true)]
    #[case::connected(ConnectionState::Connected, false)]
    fn test_post_class_unknown_to_peer(#[case] state: ConnectionState, #[case] expected_ok: bool) {
        let log = EventLog::new();
        let mut link = SimulatedLink::new(Default::default(), tracking_registry(&log), 1).unwrap();

        // the peer only knows the version 0 classes
        link.client.set_event_class_count(3);
        link.client.context.state = state;

        let result = link.client.post_event(unordered(TrackingClass::ServerToClient, 1, &log));
        assert_eq!(result.is_ok(), expected_ok);
        assert!(link.client.post_event(unordered(TrackingClass::Reliable, 2, &log)).is_ok());
    }

    #[rstest]
    fn test_post_after_close() {
        let log = EventLog::new();
        let mut link = SimulatedLink::new(Default::default(), tracking_registry(&log), 1).unwrap();
        link.client.close();

        let rejected = link.client.post_event(ordered(1, &log));
        assert!(rejected.is_err());
        assert_eq!(link.client.next_send_seq(), EventSeq::ZERO);
        assert!(log.entries().is_empty());
    }

    #[rstest]
    fn test_close_notifies_in_queue_order() {
        let log = EventLog::new();
        let mut link = SimulatedLink::new(Default::default(), tracking_registry(&log), 1).unwrap();

        // events 1 and 2 end up in the delivery-pending list, waiting for event 0
        link.client.post_event(ordered(0, &log)).ok();
        let first = link.send(ConnectionRole::Client, 1000);
        link.client.post_event(ordered(1, &log)).ok();
        link.client.post_event(ordered(2, &log)).ok();
        let second = link.send(ConnectionRole::Client, 1000);
        link.deliver(second).unwrap();

        // event 3 is in flight, events 4 and 5 are queued
        link.client.post_event(unordered(TrackingClass::Reliable, 3, &log)).ok();
        let _third = link.send(ConnectionRole::Client, 1000);
        link.client.post_event(ordered(4, &log)).ok();
        link.client.post_event(unordered(TrackingClass::Unreliable, 5, &log)).ok();

        log.clear();
        link.client.close();

        let delivered = log.delivered();
        assert_eq!(delivered.len(), 6);
        assert!(delivered.iter().all(|(_, outcome)| *outcome == DeliveryOutcome::ConnectionClosed));
        assert_eq!(delivered[..4].iter().map(|(p, _)| *p).collect::<Vec<_>>(), vec![1, 2, 5, 4]);
        assert!(link.client.notes.is_empty());
        assert_eq!(link.client.state(), ConnectionState::Closed);

        // in-flight events come last, each exactly once, in unspecified order
        let mut in_flight = log.delivered()[4..].iter().map(|(p, _)| *p).collect::<Vec<_>>();
        in_flight.sort();
        assert_eq!(in_flight, vec![0, 3]);

        // resolving packets after the teardown has no effect
        link.drop_packet(first);
        assert_eq!(log.delivered().len(), 6);
    }

    #[rstest]
    fn test_close_discards_unprocessed_received_events() {
        let log = EventLog::new();
        let mut link = SimulatedLink::new(Default::default(), tracking_registry(&log), 1).unwrap();

        link.client.post_event(ordered(0, &log)).ok();
        let lost = link.send(ConnectionRole::Client, 1000);
        link.client.post_event(ordered(1, &log)).ok();
        let arrived = link.send(ConnectionRole::Client, 1000);
        link.deliver(arrived).unwrap();
        link.drop_packet(lost);

        assert_eq!(link.server.receive_reorder_buffer.len(&link.server.notes), 1);
        log.clear();
        link.server.close();

        assert!(log.entries().is_empty());
        assert!(link.server.notes.is_empty());
    }

    #[rstest]
    fn test_close_is_idempotent() {
        let mut event = MockNetEvent::new();
        event.expect_class_name().return_const("TrackingReliable");
        event.expect_guarantee_type().return_const(GuaranteeType::ReliableUnordered);
        event.expect_notify_delivered()
            .withf(|_, outcome| *outcome == DeliveryOutcome::ConnectionClosed)
            .times(1)
            .return_const(());

        let log = EventLog::new();
        let mut link = SimulatedLink::new(Default::default(), tracking_registry(&log), 1).unwrap();
        assert!(link.client.post_event(Box::new(event)).is_ok());

        link.client.close();
        link.client.close();
        link.client.set_connection_state(ConnectionState::Connected);
        assert_eq!(link.client.state(), ConnectionState::Closed);
    }

    #[rstest]
    fn test_drop_closes() {
        let log = EventLog::new();
        let mut link = SimulatedLink::new(Default::default(), tracking_registry(&log), 1).unwrap();
        link.client.post_event(unordered(TrackingClass::Reliable, 7, &log)).ok();
        drop(link);

        assert_eq!(log.entries(), vec![EventLogEntry::Delivered(7, DeliveryOutcome::ConnectionClosed)]);
    }
}
