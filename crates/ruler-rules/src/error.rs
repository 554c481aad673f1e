//! Rule errors

use ruler_bus::BusError;
use ruler_core::{PayloadError, Timestamp};
use thiserror::Error;

/// Rule errors
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid rule configuration: {0}")]
    InvalidConfig(String),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Deadline out of range for motion observed at {observed_at}")]
    DeadlineOverflow { observed_at: Timestamp },
}

/// Result type for rule operations
pub type RuleResult<T> = Result<T, RuleError>;
