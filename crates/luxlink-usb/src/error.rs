//! Error types for the USB DMX output system
use thiserror::Error;

use crate::transport::{TransferStatus, TransportError};

/// USB DMX driver errors
#[derive(Error, Debug)]
pub enum DriverError {
    /// Transport-level failure (open, claim, transfer)
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A connect-sequence step failed
    #[error("device setup failed: {0}")]
    Setup(String),

    /// A transfer completed but the adapter reported a non-ok status
    #[error("transfer completed with status {0:?}")]
    TransferStatus(TransferStatus),

    /// Operation requires a connected driver
    #[error("driver is not connected")]
    NotConnected,

    /// Universe buffer has the wrong length
    #[error("universe must be exactly 512 channels, got {0}")]
    InvalidUniverseSize(usize),
}

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;
