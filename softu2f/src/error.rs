//! Error types for running a virtual device

use thiserror::Error;

/// Errors raised while starting, running or stopping a [`VirtualDevice`](crate::VirtualDevice)
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The engine thread could not be started
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The engine stopped with an error
    #[error("engine error: {0}")]
    Engine(#[from] softu2f_hid::Error),

    /// The engine thread panicked
    #[error("engine thread panicked")]
    Panicked,
}

/// Result type alias for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;
