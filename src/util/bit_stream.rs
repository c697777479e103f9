//! A bit-granular packet buffer. Values are stored least significant bit first, and a single
//!  [BitStream] is used both for assembling an outgoing packet and for parsing an incoming one.
//!
//! Writing never panics when the buffer is exhausted: the write is skipped and an error flag is
//!  set instead, so a caller can write a complete record, check for overflow once and rewind to
//!  the start of the record. Reading past the end behaves the same way, returning zero bits.

use bytes::{Bytes, BytesMut};
use std::fmt::{Debug, Formatter};

pub struct BitStream {
    buf: BytesMut,
    bit_num: usize,
    /// bits up to this position may contain written data - rewinding clears everything between
    ///  the new position and this mark, so a rolled-back record leaves no trace in the buffer
    written_bits: usize,
    max_read_bit_num: usize,
    max_write_bit_num: usize,
    error: bool,
}

impl Debug for BitStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "BitStream{{pos: {}, max_read: {}, max_write: {}, error: {}}}", self.bit_num, self.max_read_bit_num, self.max_write_bit_num, self.error)
    }
}

impl BitStream {
    /// create an empty stream for assembling a packet of at most `max_bytes` bytes
    pub fn for_writing(max_bytes: usize) -> BitStream {
        BitStream {
            buf: BytesMut::zeroed(max_bytes),
            bit_num: 0,
            written_bits: 0,
            max_read_bit_num: 0,
            max_write_bit_num: max_bytes * 8,
            error: false,
        }
    }

    /// create a stream for parsing a received packet, positioned at its first bit
    pub fn for_reading(packet: &[u8]) -> BitStream {
        BitStream {
            buf: BytesMut::from(packet),
            bit_num: 0,
            written_bits: 0,
            max_read_bit_num: packet.len() * 8,
            max_write_bit_num: packet.len() * 8,
            error: false,
        }
    }

    pub fn bit_position(&self) -> usize {
        self.bit_num
    }

    pub fn set_bit_position(&mut self, bit_pos: usize) {
        if bit_pos < self.written_bits {
            for pos in bit_pos..self.written_bits {
                self.put_bit(pos, false);
            }
            self.written_bits = bit_pos;
        }
        self.bit_num = bit_pos;
    }

    pub fn max_write_bit_num(&self) -> usize {
        self.max_write_bit_num
    }

    pub fn bit_space_available(&self) -> usize {
        self.max_write_bit_num.saturating_sub(self.bit_num)
    }

    pub fn is_full(&self) -> bool {
        self.bit_num >= self.max_write_bit_num
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn clear_error(&mut self) {
        self.error = false;
    }

    /// writes a single bit and returns it, so the flag can be used in a condition directly
    pub fn write_flag(&mut self, value: bool) -> bool {
        self.write_int(value as u32, 1);
        value
    }

    pub fn read_flag(&mut self) -> bool {
        self.read_int(1) != 0
    }

    /// writes the lowest `bit_count` bits of `value`
    pub fn write_int(&mut self, value: u32, bit_count: u8) {
        debug_assert!(bit_count <= 32);
        let bit_count = bit_count as usize;

        if self.bit_num + bit_count > self.max_write_bit_num {
            self.error = true;
            return;
        }

        for i in 0..bit_count {
            self.put_bit(self.bit_num + i, (value >> i) & 1 != 0);
        }
        self.bit_num += bit_count;
        self.written_bits = self.written_bits.max(self.bit_num);
    }

    pub fn read_int(&mut self, bit_count: u8) -> u32 {
        debug_assert!(bit_count <= 32);
        let bit_count = bit_count as usize;

        if self.bit_num + bit_count > self.max_read_bit_num {
            self.error = true;
            return 0;
        }

        let mut result = 0u32;
        for i in 0..bit_count {
            if self.get_bit(self.bit_num + i) {
                result |= 1 << i;
            }
        }
        self.bit_num += bit_count;
        result
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_int(value, 32);
    }

    pub fn read_u32(&mut self) -> u32 {
        self.read_int(32)
    }

    /// number of bytes touched by the bits written so far
    pub fn byte_len(&self) -> usize {
        self.bit_num.div_ceil(8)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.byte_len()]
    }

    /// the assembled packet, cut to the bytes that were actually used
    pub fn into_packet(mut self) -> Bytes {
        let len = self.byte_len();
        self.buf.truncate(len);
        self.buf.freeze()
    }

    fn put_bit(&mut self, pos: usize, value: bool) {
        let mask = 1u8 << (pos % 8);
        if value {
            self.buf[pos / 8] |= mask;
        }
        else {
            self.buf[pos / 8] &= !mask;
        }
    }

    fn get_bit(&self, pos: usize) -> bool {
        self.buf[pos / 8] & (1u8 << (pos % 8)) != 0
    }
}
