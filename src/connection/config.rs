use crate::event::class_registry::NetClassGroup;
use anyhow::bail;

#[derive(Debug, Clone)]
pub struct EventConnectionConfig {
    /// the registry group that determines which event classes (and class ids) this connection
    ///  uses
    pub class_group: NetClassGroup,

    /// Upper bound for the fraction of a packet's bits that may be used before unordered events
    ///  stop being added. A value below 1.0 reserves room for ordered events that would
    ///  otherwise be crowded out by a steady stream of unordered ones.
    ///
    /// Must be in the range `(0.0, 1.0]`.
    pub packet_fill_fraction: f32,

    /// The number of bits that must remain available after an event record is written, or the
    ///  record is rolled back and deferred to the next packet. This reserves room for the
    ///  phase markers and for data written to the packet after the event section.
    pub minimum_padding_bits: usize,

    /// Adds a checksum at the start of the event section and an end-position marker after every
    ///  event payload, so mismatches between an event's `pack` and `unpack` are detected
    ///  immediately. Both peers must agree on this setting.
    pub debug_object_sizes: bool,
}

impl Default for EventConnectionConfig {
    fn default() -> Self {
        EventConnectionConfig {
            class_group: NetClassGroup::Game,
            packet_fill_fraction: 1.0,
            minimum_padding_bits: 128,
            debug_object_sizes: false,
        }
    }
}

impl EventConnectionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.packet_fill_fraction > 0.0 && self.packet_fill_fraction <= 1.0) {
            bail!("packet fill fraction must be in (0.0, 1.0], was {}", self.packet_fill_fraction);
        }
        // the phase boundary and the terminal marker must always fit after the last record
        if self.minimum_padding_bits < 2 {
            bail!("minimum padding must be at least 2 bits, was {}", self.minimum_padding_bits);
        }
        Ok(())
    }
}
