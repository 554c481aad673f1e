//! Topic bus plumbing for mqtt-ruler
//!
//! This crate turns a publish/subscribe [`Transport`] into the two
//! primitives rules are written against:
//!
//! - [`EventSource`] - a hot, multicast stream of decoded messages for one topic
//! - [`CommandSink`] - a fire-and-forget publisher for one topic that buffers
//!   while the transport is disconnected
//!
//! [`LocalBus`] is an in-process transport used by tests and local runs.

mod local;
mod sink;
mod source;
mod transport;

pub use local::LocalBus;
pub use sink::{CommandSink, REPLAY_CAPACITY};
pub use source::{merge, EventSource, Subscription};
pub use transport::{BusError, BusResult, Lifecycle, RawMessage, SharedTransport, Transport};
