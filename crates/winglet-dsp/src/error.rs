//! Error types for the winglet DSP driver.

use crate::ihex::DecodeError;
use thiserror::Error;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DspError>;

/// Errors that can occur across the DSP driver stack.
#[derive(Debug, Error)]
pub enum DspError {
    /// Bad device description or resource wiring. Fatal for the instance;
    /// the driver does not come up.
    #[error("Configuration error: {reason}")]
    Config {
        /// What was wrong with the description.
        reason: String,
    },

    /// Malformed firmware image. Enable aborts and is fully rolled back;
    /// the instance stays usable for another attempt.
    #[error("Firmware decode failed at record {record}: {source}")]
    Decode {
        /// 1-based index of the offending record.
        record: u32,
        /// Underlying format error.
        #[source]
        source: DecodeError,
    },

    /// Clock/reset/memory acquisition failed during enable. All prior
    /// bring-up steps were rolled back.
    #[error("Resource acquisition failed ({step}): {reason}")]
    Resource {
        /// Bring-up step that failed.
        step: &'static str,
        /// Reason for failure.
        reason: String,
    },

    /// Enable attempted while the DSP is already enabled.
    #[error("DSP already enabled")]
    Busy,

    /// Outbound mailbox FIFO is full. Retryable; nothing was written.
    #[error("Mailbox channel {channel} full")]
    MailboxFull {
        /// Channel whose FIFO was full.
        channel: usize,
    },

    /// Address not covered by any co-processor memory window.
    #[error("Address {addr:#010x} outside co-processor RAM")]
    InvalidAddress {
        /// The offending DSP-local address.
        addr: u32,
    },

    /// Caller-supplied buffer shorter than the data to return.
    #[error("Buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        got: usize,
    },

    /// Hardware did not acknowledge within the bounded wait.
    #[error("Hardware timeout waiting for {what}")]
    HardwareTimeout {
        /// What was being waited on.
        what: &'static str,
    },

    /// A blocking wait was cut short by shutdown or signal delivery.
    #[error("Operation interrupted")]
    Interrupted,

    /// All device minor numbers are in use.
    #[error("No free device slots (capacity {capacity})")]
    NoFreeMinor {
        /// Allocator capacity.
        capacity: usize,
    },

    /// Firmware blob not found anywhere in the search path.
    #[error("Firmware '{name}' not found in search path")]
    FirmwareNotFound {
        /// Requested firmware name.
        name: String,
    },

    /// I/O error talking to the device or filesystem.
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl DspError {
    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a resource acquisition error for a named bring-up step.
    pub fn resource(step: &'static str, reason: impl Into<String>) -> Self {
        Self::Resource {
            step,
            reason: reason.into(),
        }
    }
}
