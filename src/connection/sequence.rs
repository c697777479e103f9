//! Sequence numbers of ordered events.
//!
//! Logically, sequence numbers are unbounded and assigned consecutively starting at 0. On the
//!  wire only the lowest 7 bits are sent, and the receiver reconstructs the full value relative
//!  to the next sequence number it expects ('window unwrap'). This is unambiguous as long as the
//!  sender never has more than [SEND_WINDOW] sequence numbers in flight beyond the last one it
//!  knows to be delivered.

use std::fmt::{Display, Formatter};

pub const WIRE_BITS: u8 = 7;
pub const WIRE_MODULUS: u64 = 1 << WIRE_BITS;
pub const WIRE_MASK: u64 = WIRE_MODULUS - 1;

/// the number of sequence numbers, counting from the first unacknowledged one, that may be
///  written to packets
pub const SEND_WINDOW: u64 = WIRE_MODULUS - 2;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EventSeq(u64);

impl Display for EventSeq {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl EventSeq {
    pub const ZERO: EventSeq = EventSeq(0);

    pub fn from_raw(value: u64) -> EventSeq {
        EventSeq(value)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> EventSeq {
        EventSeq(self.0 + 1)
    }

    pub fn prev(&self) -> Option<EventSeq> {
        self.0.checked_sub(1).map(EventSeq)
    }

    /// the 7-bit representation on the wire
    pub fn to_wire(&self) -> u32 {
        (self.0 & WIRE_MASK) as u32
    }

    /// Reconstructs the logical sequence number from its wire representation: the result is
    ///  the smallest sequence number that is `>= expected` and has the given low bits.
    pub fn from_wire(wire: u32, expected: EventSeq) -> EventSeq {
        let mut seq = (expected.0 & !WIRE_MASK) | (wire as u64 & WIRE_MASK);
        if seq < expected.0 {
            seq += WIRE_MODULUS;
        }
        EventSeq(seq)
    }

    /// the wire value following `wire`, used for 'same as previous + 1' delta encoding
    pub fn next_wire(wire: u32) -> u32 {
        (wire + 1) & WIRE_MASK as u32
    }

    /// may an event with this sequence number be sent, given the first sequence number that is
    ///  not yet confirmed as delivered?
    pub fn is_in_send_window(&self, first_unacked: EventSeq) -> bool {
        self.0 < first_unacked.0 + SEND_WINDOW
    }
}
