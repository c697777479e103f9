use crate::connection::notify::EventPacketNotify;
use crate::connection::sequence::{EventSeq, WIRE_BITS};
use crate::connection::EventConnection;
use crate::util::arena_queue::NodeIdx;
use crate::util::bit_stream::BitStream;
use tracing::{error, trace, warn};

/// written at the start of the event section if `debug_object_sizes` is on
pub(super) const DEBUG_CHECKSUM: u32 = 0xF00D_BAAD;
/// width of the end-position marker after each payload if `debug_object_sizes` is on
pub(super) const DEBUG_POSITION_BITS: u8 = 16;

pub(super) fn debug_position_marker(bit_pos: usize) -> u32 {
    (bit_pos & 0xFFFF) as u32
}

impl EventConnection {
    /// Writes the event section of an outgoing packet, after the transport wrote its own header
    ///  to `stream`. Events are taken from the send queues while they fit, and the ones that
    ///  were written are moved to `notify`, which the transport keeps until it knows whether
    ///  the packet arrived.
    ///
    /// Unordered events come first. They stop when the configured fill fraction of the packet
    ///  is used up, the rest of the packet is available for ordered events. Ordered events are
    ///  only written while their sequence number is inside the send window.
    pub fn write_packet(&mut self, stream: &mut BitStream, notify: &mut EventPacketNotify) {
        if self.config.debug_object_sizes {
            stream.write_u32(DEBUG_CHECKSUM);
        }

        let mut sent = Vec::new();

        let fill_limit = stream.max_write_bit_num() as f64 * self.config.packet_fill_fraction as f64;
        while let Some(idx) = self.unordered_send_queue.front() {
            if stream.is_full() || stream.bit_position() as f64 > fill_limit {
                break;
            }

            let record_start = stream.bit_position();
            stream.write_flag(true);
            if !self.try_write_event_record(stream, idx, record_start) {
                break;
            }

            self.unordered_send_queue.pop_front(&mut self.notes);
            notify.events_mut().push_back(&mut self.notes, idx);
            self.num_events_waiting = self.num_events_waiting.saturating_sub(1);
            sent.push(idx);
        }

        stream.write_flag(false);

        let mut prev_seq: Option<EventSeq> = None;
        while let Some(idx) = self.ordered_send_queue.front() {
            let Some(seq) = self.notes.get(idx).seq else {
                error!("ordered event without sequence number for {:?} - this is a bug", self.context.peer_addr);
                break;
            };
            if stream.is_full() || !seq.is_in_send_window(self.next_ack_seq) {
                break;
            }

            let record_start = stream.bit_position();
            stream.write_flag(true);
            if !stream.write_flag(prev_seq.map(|prev| prev.next()) == Some(seq)) {
                stream.write_int(seq.to_wire(), WIRE_BITS);
            }
            if !self.try_write_event_record(stream, idx, record_start) {
                break;
            }

            self.ordered_send_queue.pop_front(&mut self.notes);
            notify.events_mut().push_back(&mut self.notes, idx);
            self.num_events_waiting = self.num_events_waiting.saturating_sub(1);
            sent.push(idx);
            prev_seq = Some(seq);
        }

        stream.write_flag(false);
        if stream.has_error() {
            warn!("no room for the event section markers in packet to {:?}", self.context.peer_addr);
        }

        for idx in sent {
            self.notes.get_mut(idx).event.notify_sent(&self.context);
        }
    }

    /// Writes class id and payload of a queued event, following the record's header bits. If
    ///  this leaves less than the minimum padding, the stream is rewound to `record_start`
    ///  and the event stays where it is.
    fn try_write_event_record(&self, stream: &mut BitStream, idx: NodeIdx, record_start: usize) -> bool {
        let note = self.notes.get(idx);

        let payload_start = stream.bit_position();
        stream.write_int(note.class_id, self.event_class_bit_size);
        note.event.pack(&self.context, stream);
        let payload_end = stream.bit_position();

        if self.config.debug_object_sizes {
            stream.write_int(debug_position_marker(payload_end), DEBUG_POSITION_BITS);
        }

        if stream.has_error() || stream.bit_space_available() < self.config.minimum_padding_bits {
            trace!("{:?} does not fit into packet to {:?} - deferring", note, self.context.peer_addr);
            stream.set_bit_position(record_start);
            stream.clear_error();
            return false;
        }

        if let Some(class_rep) = self.registry.class_rep(self.config.class_group, note.class_id) {
            class_rep.add_initial_update(payload_end - payload_start);
        }
        trace!("writing {:?} to packet for {:?}", note, self.context.peer_addr);
        true
    }
}
