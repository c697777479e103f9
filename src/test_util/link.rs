use crate::connection::config::EventConnectionConfig;
use crate::connection::notify::EventPacketNotify;
use crate::connection::{ConnectionRole, ConnectionState, EventConnection};
use crate::event::class_registry::ClassRegistry;
use crate::util::bit_stream::BitStream;
use anyhow::{anyhow, bail};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::trace;

pub type PacketId = u64;

struct InFlightPacket {
    from: ConnectionRole,
    data: Bytes,
    notify: EventPacketNotify,
}

/// An in-memory transport between a client and a server [EventConnection], with explicit
///  control over which packet arrives or gets lost, and in which order. Random scenarios are
///  driven by a seeded RNG so they are reproducible.
pub struct SimulatedLink {
    pub client: EventConnection,
    pub server: EventConnection,
    in_flight: BTreeMap<PacketId, InFlightPacket>,
    next_packet_id: PacketId,
    rng: StdRng,
}

impl SimulatedLink {
    pub const CLIENT_ADDR: &'static str = "10.0.0.1:7000";
    pub const SERVER_ADDR: &'static str = "10.0.0.2:7000";

    /// creates both ends and runs the class count negotiation, leaving both connected
    pub fn new(config: Arc<EventConnectionConfig>, registry: Arc<ClassRegistry>, seed: u64) -> anyhow::Result<SimulatedLink> {
        let client_addr: SocketAddr = Self::CLIENT_ADDR.parse()?;
        let server_addr: SocketAddr = Self::SERVER_ADDR.parse()?;

        let mut client = EventConnection::new(config.clone(), registry.clone(), server_addr, ConnectionRole::Client)?;
        let mut server = EventConnection::new(config, registry, client_addr, ConnectionRole::Server)?;

        let mut request = BitStream::for_writing(4);
        client.write_connect_request(&mut request);
        server.read_connect_request(&mut BitStream::for_reading(request.as_slice()))?;

        let mut accept = BitStream::for_writing(4);
        server.write_connect_accept(&mut accept);
        client.read_connect_accept(&mut BitStream::for_reading(accept.as_slice()))?;

        client.set_connection_state(ConnectionState::Connected);
        server.set_connection_state(ConnectionState::Connected);

        Ok(SimulatedLink {
            client,
            server,
            in_flight: Default::default(),
            next_packet_id: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn connection(&mut self, role: ConnectionRole) -> &mut EventConnection {
        match role {
            ConnectionRole::Client => &mut self.client,
            ConnectionRole::Server => &mut self.server,
        }
    }

    /// (sender, receiver) for packets sent by `from`
    fn ends(&mut self, from: ConnectionRole) -> (&mut EventConnection, &mut EventConnection) {
        match from {
            ConnectionRole::Client => (&mut self.client, &mut self.server),
            ConnectionRole::Server => (&mut self.server, &mut self.client),
        }
    }

    /// Has one end write a packet of at most `max_bytes` bytes, which is then in flight until
    ///  it is delivered or dropped. A packet is written even if there are no events to send.
    pub fn send(&mut self, from: ConnectionRole, max_bytes: usize) -> PacketId {
        let sender = self.connection(from);
        let mut stream = BitStream::for_writing(max_bytes);
        let mut notify = sender.alloc_notify();
        sender.write_packet(&mut stream, &mut notify);

        let packet_id = self.next_packet_id;
        self.next_packet_id += 1;
        trace!("simulated link: {:?} sends packet {} with {} bytes", from, packet_id, stream.byte_len());

        self.in_flight.insert(packet_id, InFlightPacket {
            from,
            data: stream.into_packet(),
            notify,
        });
        packet_id
    }

    /// The packet arrives and the sender learns about it
    pub fn deliver(&mut self, packet_id: PacketId) -> anyhow::Result<()> {
        let mut packet = self.in_flight.remove(&packet_id)
            .ok_or_else(|| anyhow!("packet {} is not in flight", packet_id))?;
        trace!("simulated link: delivering packet {}", packet_id);

        let (sender, receiver) = self.ends(packet.from);
        receiver.read_packet(&mut BitStream::for_reading(&packet.data))?;
        sender.packet_received(&mut packet.notify);
        Ok(())
    }

    /// The packet is lost and the sender learns about it. Unknown packet ids are ignored.
    pub fn drop_packet(&mut self, packet_id: PacketId) {
        let Some(mut packet) = self.in_flight.remove(&packet_id) else {
            return;
        };
        trace!("simulated link: dropping packet {}", packet_id);

        let (sender, _) = self.ends(packet.from);
        sender.packet_dropped(&mut packet.notify);
    }

    pub fn in_flight(&self) -> Vec<PacketId> {
        self.in_flight.keys().copied().collect()
    }

    /// Runs a random sequence of sends, deliveries and losses. In each round, `from` sends a
    ///  packet if it has anything to send, and a random packet in flight is resolved - lost
    ///  with probability `loss_rate`. Packets are resolved in random order, so they arrive out
    ///  of order and are acknowledged out of order.
    pub fn pump_randomly(&mut self, from: ConnectionRole, rounds: usize, loss_rate: f64, max_bytes: usize) -> anyhow::Result<()> {
        for _ in 0..rounds {
            if self.connection(from).is_data_to_transmit() && self.rng.gen_bool(0.7) {
                self.send(from, max_bytes);
            }

            if !self.in_flight.is_empty() && self.rng.gen_bool(0.6) {
                let in_flight = self.in_flight();
                let packet_id = in_flight[self.rng.gen_range(0..in_flight.len())];
                if self.rng.gen_bool(loss_rate) {
                    self.drop_packet(packet_id);
                }
                else {
                    self.deliver(packet_id)?;
                }
            }
        }
        Ok(())
    }

    /// Delivers everything in flight, then sends and delivers packets from `from` until there is
    ///  nothing left to send.
    pub fn flush(&mut self, from: ConnectionRole, max_bytes: usize) -> anyhow::Result<()> {
        for packet_id in self.in_flight() {
            self.deliver(packet_id)?;
        }

        const MAX_PACKETS: usize = 10_000;
        for _ in 0..MAX_PACKETS {
            if !self.connection(from).is_data_to_transmit() {
                return Ok(());
            }
            let packet_id = self.send(from, max_bytes);
            self.deliver(packet_id)?;
        }
        bail!("{:?} still has events to send after {} packets", from, MAX_PACKETS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::sequence::EventSeq;
    use crate::event::{DeliveryOutcome, NetEvent};
    use crate::test_util::event::{tracking_registry, EventLog, EventLogEntry, TrackingClass, TrackingEvent};
    use rstest::rstest;

    fn post_mixed(link: &mut SimulatedLink, log: &EventLog, num_events: u32) {
        for payload in 0..num_events {
            let class = match payload % 3 {
                0 => TrackingClass::Ordered,
                1 => TrackingClass::Reliable,
                _ => TrackingClass::Unreliable,
            };
            let event: Box<dyn NetEvent> = Box::new(TrackingEvent::new(class, payload, log).with_extra_bits((payload % 40) as u16));
            assert!(link.client.post_event(event).is_ok());
        }
    }

    #[rstest]
    fn test_handshake_connects_both_ends() {
        let log = EventLog::new();
        let link = SimulatedLink::new(Default::default(), tracking_registry(&log), 0).unwrap();
        assert_eq!(link.client.state(), ConnectionState::Connected);
        assert_eq!(link.server.state(), ConnectionState::Connected);
        assert_eq!(link.client.event_class_count(), 4);
        assert_eq!(link.server.event_class_count(), 4);
        assert_eq!(link.client.event_class_bit_size(), 2);
        assert_eq!(link.client.event_class_version(), 1);
    }

    #[rstest]
    fn test_unknown_packet() {
        let log = EventLog::new();
        let mut link = SimulatedLink::new(Default::default(), tracking_registry(&log), 0).unwrap();
        assert!(link.deliver(17).is_err());
        link.drop_packet(17);
    }

    #[rstest]
    fn test_sequence_wraparound() {
        let log = EventLog::new();
        let mut link = SimulatedLink::new(Default::default(), tracking_registry(&log), 0).unwrap();

        for payload in 0..300 {
            link.client.post_event(Box::new(TrackingEvent::new(TrackingClass::Ordered, payload, &log))).ok();
        }
        link.flush(ConnectionRole::Client, 100).unwrap();

        assert_eq!(log.processed(), (0..300).collect::<Vec<_>>());
        assert_eq!(link.server.next_recv_seq(), EventSeq::from_raw(300));
        assert_eq!(link.client.last_acked_seq(), Some(EventSeq::from_raw(299)));
    }

    /// checks the delivery guarantees after a lossy run that was flushed at the end
    fn verify_guarantees(log: &EventLog, num_events: u32) {
        let entries = log.entries();

        let processed_ordered = log.processed().into_iter()
            .filter(|p| p % 3 == 0)
            .collect::<Vec<_>>();
        assert_eq!(processed_ordered, (0..num_events).filter(|p| p % 3 == 0).collect::<Vec<_>>());

        let delivered_ordered = log.delivered().into_iter()
            .filter(|(p, _)| p % 3 == 0)
            .collect::<Vec<_>>();
        assert_eq!(delivered_ordered, (0..num_events).filter(|p| p % 3 == 0).map(|p| (p, DeliveryOutcome::Delivered)).collect::<Vec<_>>());

        for payload in 0..num_events {
            let processed = entries.iter().filter(|e| **e == EventLogEntry::Processed(payload)).count();
            let delivered = log.delivered().into_iter().filter(|(p, _)| *p == payload).collect::<Vec<_>>();
            assert_eq!(delivered.len(), 1, "event {} must be resolved exactly once", payload);

            match payload % 3 {
                0 | 1 => {
                    assert_eq!(processed, 1, "reliable event {}", payload);
                    assert_eq!(delivered[0].1, DeliveryOutcome::Delivered);
                }
                _ => {
                    let expected = if delivered[0].1.is_delivered() { 1 } else { 0 };
                    assert_eq!(processed, expected, "unreliable event {}", payload);
                }
            }
        }
    }

    #[rstest]
    #[case::no_loss(1, 0.0)]
    #[case::some_loss(2, 0.2)]
    #[case::heavy_loss(3, 0.5)]
    #[case::heavy_loss_other_seed(4, 0.5)]
    fn test_random_loss_and_reordering(#[case] seed: u64, #[case] loss_rate: f64) {
        let log = EventLog::new();
        let mut link = SimulatedLink::new(Default::default(), tracking_registry(&log), seed).unwrap();
        post_mixed(&mut link, &log, 400);

        link.pump_randomly(ConnectionRole::Client, 2000, loss_rate, 80).unwrap();
        link.flush(ConnectionRole::Client, 80).unwrap();

        verify_guarantees(&log, 400);
        assert_eq!(link.client.num_held_events(), 0);
        assert_eq!(link.server.num_held_events(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_independent_links_in_parallel() {
        let mut handles = Vec::new();
        for seed in 0..8u64 {
            handles.push(tokio::spawn(async move {
                let log = EventLog::new();
                let mut link = SimulatedLink::new(Default::default(), tracking_registry(&log), seed).unwrap();
                post_mixed(&mut link, &log, 200);
                link.pump_randomly(ConnectionRole::Client, 1000, 0.3, 60).unwrap();
                link.flush(ConnectionRole::Client, 60).unwrap();
                log
            }));
        }

        for handle in handles {
            let log = handle.await.unwrap();
            verify_guarantees(&log, 200);
        }
    }
}
