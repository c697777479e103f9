//! The per-connection event layer: send queues, the packet writer and reader, and the
//!  resolution of a packet's events once the transport knows whether it arrived.

pub mod config;
pub mod sequence;
pub mod notify;
mod event_connection;
mod packet_writer;
mod packet_reader;
mod delivery;
mod handshake;

pub use event_connection::EventConnection;

/// The side of the connection that this end represents
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ConnectionRole {
    /// this end initiated the connection, i.e. it is a connection *to a server*
    Client,
    /// this end accepted the connection, i.e. it is a connection *to a client*
    Server,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ConnectionState {
    /// the connection-establishment protocol is still running
    Handshaking,
    Connected,
    /// torn down - no more events are accepted or processed
    Closed,
}
