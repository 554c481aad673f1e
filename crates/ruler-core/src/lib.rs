//! Core types for mqtt-ruler
//!
//! This crate provides the fundamental types shared by the bus adapters and
//! the rule engine: Topic, Payload, Message, the device state models and the
//! Clock abstraction used for wall-clock decisions.

mod clock;
mod device;
mod message;
mod payload;
mod topic;

#[cfg(any(test, feature = "test-util"))]
mod testing;

pub use clock::{Clock, SharedClock, SystemClock, Timestamp};
pub use device::{
    ButtonPress, CommandEcho, DeviceState, ExternalStatus, HourWindow, MotionEvent,
    MotionReading, Status,
};
pub use message::Message;
pub use payload::{Payload, PayloadError, PayloadResult};
#[cfg(any(test, feature = "test-util"))]
pub use testing::MockClock;
pub use topic::Topic;
