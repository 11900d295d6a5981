//! Software U2F Security Key
//!
//! Runs a [`softu2f_hid::Engine`] on a dedicated thread so an application can
//! present a U2F device without owning the run loop itself. The U2F raw
//! message handler (registration and authentication) is supplied by the
//! application; everything at the U2FHID layer is handled by the engine.
//!
//! # Example
//!
//! ```no_run
//! use softu2f::{DeviceBuilder, Reply};
//! use softu2f_hid::{EngineConfig, QueueTransport};
//!
//! let (transport, host) = QueueTransport::pair();
//! let device = DeviceBuilder::new()
//!     .config(EngineConfig::default())
//!     .on_message(|_ctx, request| Ok(Reply::Message(request.reply(vec![0x6d, 0x00]))))
//!     .spawn(transport)
//!     .unwrap();
//!
//! // ... hand `host` to whatever feeds reports to the device ...
//! # drop(host);
//! device.shutdown().unwrap();
//! ```

pub mod device;
pub mod error;

pub use device::{DeviceBuilder, VirtualDevice};
pub use error::{DeviceError, Result};

// Re-export the engine types applications need most
pub use softu2f_hid;
pub use softu2f_hid::{
    Command, EngineConfig, ErrorCode, HandlerContext, Message, Reply, ShutdownHandle, Transport,
};
