//! Reliable delivery of application events over an unreliable, packet oriented transport.
//!
//! The transport sends discrete packets that may be lost or reordered, and reports for every
//!  packet it sent whether it was acknowledged or lost. On top of that, an
//!  [connection::EventConnection] offers three guarantees for application events:
//!
//! * *unreliable*: sent once, reported as lost if its packet is lost
//! * *reliable unordered*: resent until its packet is acknowledged, processed by the peer in
//!     arrival order
//! * *reliable ordered*: resent until acknowledged, processed by the peer exactly once and
//!     strictly in posting order
//!
//! Retransmission is driven by the transport's loss notifications only, there are no timers.
//!
//! ## Wire format
//!
//! The event section of a packet follows the transport's own header:
//!
//! ```text
//! [checksum: 32 bits 0xF00DBAAD]           only with debug_object_sizes
//! { 1, record }*                           unordered events
//! 0
//! { 1, seq, record }*                      ordered events
//! 0
//!
//! seq:    1                                sequence number of the previous ordered record + 1
//!       | 0, seq: 7 bits                   lowest 7 bits of the sequence number
//! record: class id: ceil(log2(class count)) bits
//!         payload                          written by the event itself
//!         [end position: 16 bits]          only with debug_object_sizes
//! ```
//!
//! All values are written least significant bit first. The receiver reconstructs full sequence
//!  numbers from their lowest 7 bits relative to the next sequence number it expects, which
//!  works because the sender never has more than 126 unacknowledged sequence numbers in flight.
//!
//! The class count is negotiated during connection establishment, see the `connect_request`
//!  and `connect_accept` methods of [connection::EventConnection].

pub mod connection;
pub mod event;
pub mod util;
pub mod test_util;
