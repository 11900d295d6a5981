//! U2FHID Protocol Engine
//!
//! This crate implements the device side of the U2FHID transport used by
//! U2F (CTAP1) security keys:
//! - frame codec (fragmentation into 64-byte reports and back)
//! - per-channel message reassembly with sequence and timeout checks
//! - channel allocation through the INIT handshake
//! - the LOCK transaction lock
//! - command dispatch with built-in PING, WINK, LOCK, INIT and SYNC handling
//! - a polling run loop tying them together
//!
//! Moving reports to and from an actual (or virtual) HID device is left to a
//! [`Transport`] implementation. U2F message contents are handed to a handler
//! registered for [`Command::Msg`].
//!
//! Spec: <https://fidoalliance.org/specs/fido-u2f-v1.2-ps-20170411/fido-u2f-hid-protocol-v1.2-ps-20170411.html>

pub mod channel;
pub mod clock;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod frame;
pub mod lock;
pub mod message;
pub mod reassembly;
pub mod transport;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::Command;
pub use config::{
    Capabilities, DeviceVersion, EngineConfig, EngineConfigBuilder, InitCollisionPolicy,
};
pub use dispatch::{Dispatcher, Handler, HandlerContext, InitResponse, Reply};
pub use engine::{Cycle, CycleStats, Engine, RunState, ShutdownHandle};
pub use error::{Error, ErrorCode, Result};
pub use frame::{Cid, Frame, FrameView, BROADCAST_CID, FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use message::Message;
pub use transport::{HostPort, QueueTransport, Transport};
