//! U2FHID command identifiers

use std::fmt;

/// Lowest command byte reserved for vendor-specific commands
pub const VENDOR_FIRST: u8 = 0x40;
/// Highest command byte reserved for vendor-specific commands
pub const VENDOR_LAST: u8 = 0x7f;

/// U2FHID commands
///
/// The wire byte carries the INIT type bit in addition to these values; the
/// codec strips and restores it, so commands are always handled without it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Command {
    /// Echo data back to the client.
    Ping,
    /// Encapsulated U2F raw message.
    Msg,
    /// Place an exclusive lock for one channel.
    Lock,
    /// Allocate a new channel or resynchronize an existing one.
    Init,
    /// Ask the device for a visual or audible identification.
    Wink,
    /// Resynchronize after an aborted transaction.
    Sync,
    /// Error response.
    Error,
    /// Any other command byte, including the vendor range.
    Other(u8),
}

impl Command {
    /// Command byte without the frame type bit
    pub fn as_byte(self) -> u8 {
        match self {
            Command::Ping => 0x01,
            Command::Msg => 0x03,
            Command::Lock => 0x04,
            Command::Init => 0x06,
            Command::Wink => 0x08,
            Command::Sync => 0x3c,
            Command::Error => 0x3f,
            Command::Other(byte) => byte & 0x7f,
        }
    }

    /// Whether the command falls in the vendor-specific range
    pub fn is_vendor(self) -> bool {
        (VENDOR_FIRST..=VENDOR_LAST).contains(&self.as_byte())
    }
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value & 0x7f {
            0x01 => Command::Ping,
            0x03 => Command::Msg,
            0x04 => Command::Lock,
            0x06 => Command::Init,
            0x08 => Command::Wink,
            0x3c => Command::Sync,
            0x3f => Command::Error,
            other => Command::Other(other),
        }
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> Self {
        cmd.as_byte()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ping => write!(f, "PING"),
            Command::Msg => write!(f, "MSG"),
            Command::Lock => write!(f, "LOCK"),
            Command::Init => write!(f, "INIT"),
            Command::Wink => write!(f, "WINK"),
            Command::Sync => write!(f, "SYNC"),
            Command::Error => write!(f, "ERROR"),
            Command::Other(byte) => write!(f, "0x{:02x}", byte),
        }
    }
}
