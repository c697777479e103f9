use crate::connection::notify::EventPacketNotify;
use crate::connection::{ConnectionState, EventConnection};
use crate::event::{DeliveryOutcome, GuaranteeType};
use crate::util::arena_queue::LinkedQueue;
use tracing::debug;

impl EventConnection {
    /// The transport gave up on a packet: reliable events from it are queued for sending again,
    ///  and unreliable events are reported as lost.
    ///
    /// Ordered events go back to their position in the ordered send queue. Reliable unordered
    ///  events go to the front of the unordered send queue, keeping their relative order.
    pub fn packet_dropped(&mut self, notify: &mut EventPacketNotify) {
        let mut events = notify.take_events();
        if self.context.state == ConnectionState::Closed {
            return;
        }

        let mut requeued_unordered = LinkedQueue::default();
        let mut num_requeued_ordered = 0;
        while let Some(idx) = events.pop_front(&mut self.notes) {
            self.num_events_waiting += 1;

            match self.notes.get(idx).guarantee {
                GuaranteeType::ReliableOrdered => {
                    self.ordered_send_queue.insert_sorted_by_key(&mut self.notes, idx, |n| n.seq);
                    num_requeued_ordered += 1;
                }
                GuaranteeType::ReliableUnordered => {
                    requeued_unordered.push_back(&mut self.notes, idx);
                }
                GuaranteeType::Unreliable => {
                    self.notify_delivered(idx, DeliveryOutcome::Lost);
                }
            }
        }

        if num_requeued_ordered > 0 || !requeued_unordered.is_empty() {
            debug!("packet to {:?} was dropped - re-queueing {} ordered and {} unordered events", self.context.peer_addr, num_requeued_ordered, requeued_unordered.len(&self.notes));
        }
        self.unordered_send_queue.prepend(&mut self.notes, requeued_unordered);
    }

    /// The transport knows that the peer received a packet. Unordered events from it are
    ///  reported as delivered right away. An ordered event is only reported once all ordered
    ///  events before it were, so delivery is confirmed in sequence order even if packets are
    ///  acknowledged out of order.
    pub fn packet_received(&mut self, notify: &mut EventPacketNotify) {
        let mut events = notify.take_events();
        if self.context.state == ConnectionState::Closed {
            return;
        }

        while let Some(idx) = events.pop_front(&mut self.notes) {
            match self.notes.get(idx).guarantee {
                GuaranteeType::ReliableOrdered => {
                    self.delivery_pending.insert_sorted_by_key(&mut self.notes, idx, |n| n.seq);
                }
                GuaranteeType::ReliableUnordered | GuaranteeType::Unreliable => {
                    self.notify_delivered(idx, DeliveryOutcome::Delivered);
                }
            }
        }

        let prev_next_ack_seq = self.next_ack_seq;
        while let Some(idx) = self.delivery_pending.front() {
            if self.notes.get(idx).seq != Some(self.next_ack_seq) {
                break;
            }
            self.delivery_pending.pop_front(&mut self.notes);
            self.next_ack_seq = self.next_ack_seq.next();
            self.notify_delivered(idx, DeliveryOutcome::Delivered);
        }

        if self.next_ack_seq != prev_next_ack_seq {
            debug!("ordered events up to {} confirmed as delivered to {:?}", self.next_ack_seq.to_raw() - 1, self.context.peer_addr);
        }
    }
}
