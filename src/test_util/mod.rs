//! This module contains utilities for testing code based on event connections: an event type
//!  that records its callbacks, and an in-memory link that connects two event connections.
//!  They are used for testing this crate itself, but they are also exported for application
//!  testing.

pub mod event;
pub mod link;
