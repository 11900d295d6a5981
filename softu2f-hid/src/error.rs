//! Error types for the U2FHID engine

use thiserror::Error;

/// U2FHID error codes carried as the single payload byte of an ERROR response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// The command in the request is unknown or not allowed here
    InvalidCmd = 0x01,
    /// A parameter in the request is invalid
    InvalidPar = 0x02,
    /// The declared length of the request is invalid
    InvalidLen = 0x03,
    /// Continuation frame arrived with an unexpected sequence number
    InvalidSeq = 0x04,
    /// The message was not completed in time
    MsgTimeout = 0x05,
    /// Another channel holds the lock or a transaction is in progress
    ChannelBusy = 0x06,
    /// The command requires a channel lock
    LockRequired = 0x0a,
    /// The channel id is not valid for this command
    InvalidCid = 0x0b,
    /// Unspecified error
    Other = 0x7f,
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = u8;

    fn try_from(value: u8) -> core::result::Result<Self, u8> {
        match value {
            0x01 => Ok(ErrorCode::InvalidCmd),
            0x02 => Ok(ErrorCode::InvalidPar),
            0x03 => Ok(ErrorCode::InvalidLen),
            0x04 => Ok(ErrorCode::InvalidSeq),
            0x05 => Ok(ErrorCode::MsgTimeout),
            0x06 => Ok(ErrorCode::ChannelBusy),
            0x0a => Ok(ErrorCode::LockRequired),
            0x0b => Ok(ErrorCode::InvalidCid),
            0x7f => Ok(ErrorCode::Other),
            other => Err(other),
        }
    }
}

/// Errors produced by the engine and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// The transport failed to read or write a frame
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame of the wrong size was handed to the codec
    #[error("invalid frame size: expected {expected}, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    /// A message payload is larger than the protocol allows
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// A protocol violation that is reported to the client
    #[error("protocol error on channel 0x{cid:08x}: {code:?}")]
    Protocol { cid: u32, code: ErrorCode },

    /// A message handler failed for a reason of its own
    #[error("handler failed: {0}")]
    Handler(String),

    /// The peer did not answer in time
    #[error("timed out waiting for a response")]
    Timeout,

    /// The engine has already been shut down
    #[error("engine is stopped")]
    Stopped,
}

impl Error {
    /// Build a transport error from anything printable
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Error::Transport(err.to_string())
    }

    /// Build a handler error from anything printable
    pub fn handler(err: impl std::fmt::Display) -> Self {
        Error::Handler(err.to_string())
    }

    /// Whether this error came from moving frames rather than from protocol logic
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
