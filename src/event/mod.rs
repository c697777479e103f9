//! Events are the application-level messages carried by an [crate::connection::EventConnection].
//!  Each concrete event type implements [NetEvent] and is registered with a
//!  [class_registry::ClassRegistry] so the receiving side can instantiate it from its class id.

pub mod class_registry;

#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use crate::connection::{ConnectionRole, ConnectionState};
use crate::util::bit_stream::BitStream;

/// The delivery policy of an event, fixed per event class
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum GuaranteeType {
    /// sent at most once, never retransmitted, no ordering
    Unreliable,
    /// retransmitted until the peer acknowledges it, delivered in arbitrary order
    ReliableUnordered,
    /// retransmitted until acknowledged, processed by the peer strictly in posting order
    ReliableOrdered,
}

/// The direction in which an event class may travel. The receiving side rejects packets
///  containing events that travel in the wrong direction.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum EventDirection {
    /// not configured - never accepted by a receiver
    Unset,
    Any,
    ServerToClient,
    ClientToServer,
}

impl EventDirection {
    /// can an event with this direction be received by a connection with the given role?
    pub fn is_receivable_by(&self, role: ConnectionRole) -> bool {
        match self {
            EventDirection::Unset => false,
            EventDirection::Any => true,
            EventDirection::ServerToClient => role == ConnectionRole::Client,
            EventDirection::ClientToServer => role == ConnectionRole::Server,
        }
    }
}

/// The final fate of a posted event, passed to [NetEvent::notify_delivered]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum DeliveryOutcome {
    Delivered,
    /// the packet carrying an unreliable event was lost
    Lost,
    /// the connection was torn down before the event's delivery was confirmed
    ConnectionClosed,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        *self == DeliveryOutcome::Delivered
    }
}

/// Connection data that is visible to events in their callbacks
#[derive(Clone, Debug)]
pub struct EventContext {
    pub peer_addr: SocketAddr,
    pub role: ConnectionRole,
    pub state: ConnectionState,
    /// version of the highest event class shared with the peer, 0 before negotiation
    pub event_class_version: u32,
}

/// The capability interface of an application event.
///
/// Ownership of an event passes to the connection when it is posted. The sending side gets
///  exactly one [NetEvent::notify_delivered] call per successfully posted event, after which
///  the event is dropped. On the receiving side, the connection instantiates the event through
///  the class registry, calls [NetEvent::unpack], and then [NetEvent::process] once it is the
///  event's turn.
#[cfg_attr(test, automock)]
pub trait NetEvent: Send + 'static {
    /// the name the event's class is registered under
    fn class_name(&self) -> &'static str;

    fn guarantee_type(&self) -> GuaranteeType;

    fn direction(&self) -> EventDirection;

    /// writes the event's payload. Running out of space is detected by the caller after this
    ///  returns, there is no need to check it here.
    fn pack(&self, ctx: &EventContext, stream: &mut BitStream);

    /// reads the payload written by [NetEvent::pack]. Returning an error is a protocol
    ///  violation that terminates processing of the packet.
    fn unpack(&mut self, ctx: &EventContext, stream: &mut BitStream) -> anyhow::Result<()>;

    /// called once per packet the event was written into, after the packet is assembled
    fn notify_sent(&mut self, _ctx: &EventContext) {
    }

    fn notify_delivered(&mut self, _ctx: &EventContext, _outcome: DeliveryOutcome) {
    }

    fn process(&mut self, ctx: &EventContext) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::unset_client(EventDirection::Unset, ConnectionRole::Client, false)]
    #[case::unset_server(EventDirection::Unset, ConnectionRole::Server, false)]
    #[case::any_client(EventDirection::Any, ConnectionRole::Client, true)]
    #[case::any_server(EventDirection::Any, ConnectionRole::Server, true)]
    #[case::s2c_client(EventDirection::ServerToClient, ConnectionRole::Client, true)]
    #[case::s2c_server(EventDirection::ServerToClient, ConnectionRole::Server, false)]
    #[case::c2s_client(EventDirection::ClientToServer, ConnectionRole::Client, false)]
    #[case::c2s_server(EventDirection::ClientToServer, ConnectionRole::Server, true)]
    fn test_is_receivable_by(#[case] direction: EventDirection, #[case] role: ConnectionRole, #[case] expected: bool) {
        assert_eq!(direction.is_receivable_by(role), expected);
    }

    #[rstest]
    #[case(DeliveryOutcome::Delivered, true)]
    #[case(DeliveryOutcome::Lost, false)]
    #[case(DeliveryOutcome::ConnectionClosed, false)]
    fn test_is_delivered(#[case] outcome: DeliveryOutcome, #[case] expected: bool) {
        assert_eq!(outcome.is_delivered(), expected);
    }
}
