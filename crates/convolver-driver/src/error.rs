//! Error types for convolver driver operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for convolver operations
pub type Result<T> = std::result::Result<T, ConvolverError>;

/// Errors that can occur while driving the accelerator
#[derive(Debug, Error)]
pub enum ConvolverError {
    /// Slot index outside `0..8`
    #[error("Slot index {index} out of range for {family} (have 8 slots)")]
    InvalidSlot {
        /// Register family the index was meant for
        family: &'static str,
        /// Requested index
        index: usize,
    },

    /// Session or request configuration rejected before touching hardware
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Reason for rejection
        reason: String,
    },

    /// Overlay / session construction failed
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for failure
        reason: String,
    },

    /// A DMA channel did not complete within its bound
    #[error("{channel} transfer timed out after {duration_ms}ms")]
    TransferTimeout {
        /// Channel that timed out
        channel: String,
        /// Bound that was exceeded, in milliseconds
        duration_ms: u64,
    },

    /// Hardware reported an error pattern
    #[error("Hardware fault: {reason}")]
    HardwareFault {
        /// Decoded fault description
        reason: String,
    },

    /// Data transfer contract violated (busy channel, short buffer, ...)
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },

    /// Session is not in a state that allows the operation
    #[error("Session in invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Configuration file could not be parsed
    #[error("Invalid config {path}: {reason}")]
    ConfigParse {
        /// File that was read
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// I/O error during device or file access
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl ConvolverError {
    /// Create an invalid slot error
    pub const fn invalid_slot(family: &'static str, index: usize) -> Self {
        Self::InvalidSlot { family, index }
    }

    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an initialization error
    pub fn initialization(reason: impl Into<String>) -> Self {
        Self::Initialization {
            reason: reason.into(),
        }
    }

    /// Create a transfer timeout error
    pub fn transfer_timeout(channel: impl std::fmt::Display, duration_ms: u64) -> Self {
        Self::TransferTimeout {
            channel: channel.to_string(),
            duration_ms,
        }
    }

    /// Create a hardware fault error
    pub fn hardware_fault(reason: impl Into<String>) -> Self {
        Self::HardwareFault {
            reason: reason.into(),
        }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// True for errors raised before any register was written
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidSlot { .. } | Self::Configuration { .. })
    }
}
