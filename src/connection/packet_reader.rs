use crate::connection::notify::EventNote;
use crate::connection::packet_writer::{debug_position_marker, DEBUG_CHECKSUM, DEBUG_POSITION_BITS};
use crate::connection::sequence::{EventSeq, WIRE_BITS};
use crate::connection::{ConnectionState, EventConnection};
use crate::event::GuaranteeType;
use crate::util::bit_stream::BitStream;
use anyhow::{bail, Context};
use tracing::trace;

impl EventConnection {
    /// Reads the event section of a received packet, after the transport read its own header
    ///  from `stream`.
    ///
    /// The whole section is parsed before any event is processed. If it contains a protocol
    ///  violation, nothing from the packet is processed, the error is recorded as the
    ///  connection's [EventConnection::last_error] and returned. It is up to the caller to
    ///  terminate the connection in that case.
    ///
    /// If an event fails to process, the rest of the packet can not be delivered any more
    ///  although the peer will see it acknowledged, so the connection is closed.
    ///
    /// Unordered events are processed in the order they appear in the packet. Ordered events go
    ///  through the receive reorder buffer and are processed once all their predecessors were.
    pub fn read_packet(&mut self, stream: &mut BitStream) -> anyhow::Result<()> {
        if self.context.state == ConnectionState::Closed {
            bail!("received packet on closed connection to {:?}", self.context.peer_addr);
        }

        let (unordered, ordered) = match self.parse_event_section(stream) {
            Ok(events) => events,
            Err(e) => return Err(self.fail(e)),
        };

        for mut note in unordered {
            self.process_event(&mut note)?;
        }

        for note in ordered {
            if self.is_duplicate(&note) {
                trace!("discarding duplicate of {:?} from {:?}", note, self.context.peer_addr);
                continue;
            }
            let idx = self.notes.insert(note);
            self.receive_reorder_buffer.insert_sorted_by_key(&mut self.notes, idx, |n| n.seq);
        }

        while let Some(idx) = self.receive_reorder_buffer.front() {
            if self.notes.get(idx).seq != Some(self.next_recv_seq) {
                break;
            }
            self.receive_reorder_buffer.pop_front(&mut self.notes);
            let mut note = self.notes.remove(idx);
            self.next_recv_seq = self.next_recv_seq.next();
            self.process_event(&mut note)?;
        }
        Ok(())
    }

    /// Sequence numbers are unwrapped to `next_recv_seq` or above, so a retransmitted event
    ///  can only collide with one in the reorder buffer.
    fn is_duplicate(&self, note: &EventNote) -> bool {
        self.receive_reorder_buffer.iter(&self.notes)
            .any(|idx| self.notes.get(idx).seq == note.seq)
    }

    /// returns unordered and ordered events, each in the order they appear in the packet
    fn parse_event_section(&self, stream: &mut BitStream) -> anyhow::Result<(Vec<EventNote>, Vec<EventNote>)> {
        if self.config.debug_object_sizes {
            let checksum = stream.read_u32();
            if checksum != DEBUG_CHECKSUM {
                bail!("event section checksum mismatch: {:#x}", checksum);
            }
        }

        let mut unordered = Vec::new();
        while stream.read_flag() {
            unordered.push(self.read_event_record(stream, None)?);
        }
        if stream.has_error() {
            bail!("packet ends inside the unordered events");
        }

        let mut ordered = Vec::new();
        let mut prev_wire = None;
        while stream.read_flag() {
            let wire = if stream.read_flag() {
                match prev_wire {
                    Some(prev) => EventSeq::next_wire(prev),
                    None => bail!("first ordered event in packet has a delta-encoded sequence number"),
                }
            }
            else {
                stream.read_int(WIRE_BITS)
            };
            prev_wire = Some(wire);

            let seq = EventSeq::from_wire(wire, self.next_recv_seq);
            ordered.push(self.read_event_record(stream, Some(seq))?);
        }
        if stream.has_error() {
            bail!("packet ends inside the ordered events");
        }

        Ok((unordered, ordered))
    }

    fn read_event_record(&self, stream: &mut BitStream, seq: Option<EventSeq>) -> anyhow::Result<EventNote> {
        let class_id = stream.read_int(self.event_class_bit_size);
        if stream.has_error() {
            bail!("packet ends inside an event record header");
        }
        if class_id >= self.event_class_count {
            bail!("event class #{} is outside the {} negotiated classes", class_id, self.event_class_count);
        }
        let Some(mut event) = self.registry.create(self.config.class_group, class_id) else {
            bail!("cannot instantiate event class #{}", class_id);
        };
        let class_name = event.class_name();

        let direction = event.direction();
        if !direction.is_receivable_by(self.context.role) {
            bail!("{} event with direction {:?} is not accepted by a {:?}", class_name, direction, self.context.role);
        }

        let guarantee = event.guarantee_type();
        if seq.is_some() != (guarantee == GuaranteeType::ReliableOrdered) {
            bail!("{:?} event {} in the wrong part of the packet", guarantee, class_name);
        }

        event.unpack(&self.context, stream)
            .with_context(|| format!("unpacking {} event", class_name))?;
        if stream.has_error() {
            bail!("packet ends inside {} event", class_name);
        }

        if self.config.debug_object_sizes {
            let expected = debug_position_marker(stream.bit_position());
            let marker = stream.read_int(DEBUG_POSITION_BITS);
            if stream.has_error() || marker != expected {
                bail!("{} event was packed up to position {} but unpacked up to {} (mod 2^16)", class_name, marker, expected);
            }
        }

        let note = EventNote {
            event,
            class_id,
            guarantee,
            seq,
        };
        trace!("read {:?} from {:?}", note, self.context.peer_addr);
        Ok(note)
    }

    fn process_event(&mut self, note: &mut EventNote) -> anyhow::Result<()> {
        if self.context.state != ConnectionState::Connected {
            trace!("connection to {:?} is {:?} - discarding {:?}", self.context.peer_addr, self.context.state, note);
            return Ok(());
        }

        trace!("processing {:?} from {:?}", note, self.context.peer_addr);
        if let Err(e) = note.event.process(&self.context) {
            let error = self.fail(e.context(format!("processing {} event", note.event.class_name())));
            self.close();
            return Err(error);
        }
        Ok(())
    }
}
