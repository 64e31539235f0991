//! In-memory collaboration hub.
//!
//! One hub per process multiplexes, per workflow id, cursor positions,
//! edit-time node updates, chat, and engine progress events to every live
//! subscriber. Delivery is best-effort at-most-once with per-subscriber
//! FIFO order; a failed send drops the subscriber.

pub mod hub;
pub mod message;

pub use hub::{ActiveUser, CollabHub};
pub use message::{Frame, InboundMessage, OutboundMessage};
