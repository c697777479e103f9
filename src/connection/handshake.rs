//! Negotiation of the event classes both peers know, piggybacked on the connection
//!  establishment messages: the client sends its class count with the connect request, the
//!  server settles on the shared count and sends it back with the connect accept.

use crate::connection::EventConnection;
use crate::event::class_registry::class_id_bit_size;
use crate::util::bit_stream::BitStream;
use anyhow::bail;
use tracing::debug;

impl EventConnection {
    pub fn write_connect_request(&self, stream: &mut BitStream) {
        stream.write_u32(self.registry.class_count(self.config.class_group));
    }

    /// Server side: a peer with fewer classes than this side is accepted if its count ends on a
    ///  version border of this side's classes. A peer with more classes is limited to this
    ///  side's count.
    pub fn read_connect_request(&mut self, stream: &mut BitStream) -> anyhow::Result<()> {
        let peer_count = stream.read_u32();
        if stream.has_error() {
            bail!("connect request from {:?} has no event class count", self.context.peer_addr);
        }

        let group = self.config.class_group;
        let local_count = self.registry.class_count(group);
        let count = if local_count <= peer_count {
            local_count
        }
        else if self.registry.is_version_border_count(group, peer_count) {
            peer_count
        }
        else {
            bail!("{:?} knows {} event classes, which is not a version border of the {} local classes", self.context.peer_addr, peer_count, local_count);
        };

        self.set_event_class_count(count);
        Ok(())
    }

    pub fn write_connect_accept(&self, stream: &mut BitStream) {
        stream.write_u32(self.event_class_count);
    }

    /// Client side: adopts the count the server settled on, which must not exceed this side's
    ///  count and must end on a version border.
    pub fn read_connect_accept(&mut self, stream: &mut BitStream) -> anyhow::Result<()> {
        let count = stream.read_u32();
        if stream.has_error() {
            bail!("connect accept from {:?} has no event class count", self.context.peer_addr);
        }

        let group = self.config.class_group;
        let local_count = self.registry.class_count(group);
        if count > local_count {
            bail!("{:?} settled on {} event classes, but only {} are known locally", self.context.peer_addr, count, local_count);
        }
        if !self.registry.is_version_border_count(group, count) {
            bail!("{:?} settled on {} event classes, which is not a version border", self.context.peer_addr, count);
        }

        self.set_event_class_count(count);
        Ok(())
    }

    pub(super) fn set_event_class_count(&mut self, count: u32) {
        self.event_class_count = count;
        self.event_class_bit_size = class_id_bit_size(count);
        self.context.event_class_version = count.checked_sub(1)
            .and_then(|last_id| self.registry.class_version(self.config.class_group, last_id))
            .unwrap_or(0);

        debug!("connection to {:?}: {} shared event classes (version {}), {} bits per class id",
            self.context.peer_addr, count, self.context.event_class_version, self.event_class_bit_size);
    }
}
