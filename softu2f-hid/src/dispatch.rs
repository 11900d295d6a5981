//! Command dispatch
//!
//! Every complete message is routed by command to either a registered
//! handler or the built-in behaviour for that command. Built-ins exist for
//! INIT, PING, WINK, LOCK and SYNC. MSG has none: the raw U2F payload is only
//! meaningful to whatever credential logic the application registers.
//!
//! # Example
//!
//! ```
//! use softu2f_hid::{Command, Dispatcher, Reply};
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register(Command::Msg, |_ctx, request| {
//!     // Answer every U2F request with SW_NO_ERROR
//!     Ok(Reply::Message(request.reply(vec![0x90, 0x00])))
//! });
//! ```

use crate::channel::ChannelAllocator;
use crate::command::Command;
use crate::config::EngineConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::frame::{Cid, BROADCAST_CID};
use crate::lock::LockArbiter;
use crate::message::Message;

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Size of the nonce carried by an INIT request
pub const INIT_NONCE_SIZE: usize = 8;
/// Size of an INIT response payload
pub const INIT_RESPONSE_SIZE: usize = 17;

/// What a handler wants sent back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Send this message
    Message(Message),
    /// Send an ERROR frame with this code on the request's channel
    Error(ErrorCode),
    /// Send nothing
    Silent,
}

/// Engine state a handler may consult or change
pub struct HandlerContext<'a> {
    pub lock: &'a mut LockArbiter,
    pub channels: &'a mut ChannelAllocator,
    pub config: &'a EngineConfig,
    pub now: Instant,
}

/// Handles one command
pub trait Handler {
    fn handle(&mut self, ctx: &mut HandlerContext<'_>, request: &Message) -> Result<Reply>;
}

impl<F> Handler for F
where
    F: FnMut(&mut HandlerContext<'_>, &Message) -> Result<Reply>,
{
    fn handle(&mut self, ctx: &mut HandlerContext<'_>, request: &Message) -> Result<Reply> {
        self(ctx, request)
    }
}

/// Commands with behaviour built into the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltIn {
    Init,
    Ping,
    Wink,
    Lock,
    Sync,
}

impl BuiltIn {
    /// Built-in behaviour for `command`, if there is one
    pub fn for_command(command: Command) -> Option<Self> {
        match command {
            Command::Init => Some(BuiltIn::Init),
            Command::Ping => Some(BuiltIn::Ping),
            Command::Wink => Some(BuiltIn::Wink),
            Command::Lock => Some(BuiltIn::Lock),
            Command::Sync => Some(BuiltIn::Sync),
            Command::Msg | Command::Error | Command::Other(_) => None,
        }
    }

    fn handle(self, ctx: &mut HandlerContext<'_>, request: &Message) -> Result<Reply> {
        match self {
            BuiltIn::Init => handle_init(ctx, request),
            BuiltIn::Ping => handle_ping(request),
            BuiltIn::Wink => handle_wink(request),
            BuiltIn::Lock => handle_lock(ctx, request),
            BuiltIn::Sync => handle_sync(request),
        }
    }
}

/// How a command will be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// A registered handler
    Registered,
    /// The engine's default behaviour
    BuiltIn(BuiltIn),
    /// Nothing handles it; the client gets `ERR_INVALID_CMD`
    Unsupported,
}

/// Routes complete messages to handlers
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<Command, Box<dyn Handler + Send>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure for `command`, replacing any built-in or earlier registration
    pub fn register<F>(&mut self, command: Command, handler: F)
    where
        F: FnMut(&mut HandlerContext<'_>, &Message) -> Result<Reply> + Send + 'static,
    {
        self.register_handler(command, handler);
    }

    /// Register a [`Handler`] implementation for `command`
    ///
    /// `Command::Other` values are keyed by the command they decode to, so
    /// `Other(0x01)` registers for PING and the type bit is ignored.
    pub fn register_handler<H>(&mut self, command: Command, handler: H)
    where
        H: Handler + Send + 'static,
    {
        let command = normalize(command);
        if self.handlers.insert(command, Box::new(handler)).is_some() {
            tracing::debug!(%command, "replaced registered handler");
        }
    }

    /// Remove a registration, falling back to the built-in behaviour
    pub fn unregister(&mut self, command: Command) -> bool {
        self.handlers.remove(&normalize(command)).is_some()
    }

    /// Where a command would be routed
    pub fn route(&self, command: Command) -> Route {
        let command = normalize(command);
        if self.handlers.contains_key(&command) {
            Route::Registered
        } else {
            BuiltIn::for_command(command)
                .map(Route::BuiltIn)
                .unwrap_or(Route::Unsupported)
        }
    }

    /// Run the handler for `request`
    pub fn dispatch(&mut self, ctx: &mut HandlerContext<'_>, request: &Message) -> Result<Reply> {
        tracing::debug!(
            cid = %Cid(request.cid),
            command = %request.command,
            len = request.payload.len(),
            "dispatching message"
        );
        let command = normalize(request.command);
        if let Some(handler) = self.handlers.get_mut(&command) {
            return handler.handle(ctx, request);
        }
        match BuiltIn::for_command(command) {
            Some(builtin) => builtin.handle(ctx, request),
            None => {
                tracing::warn!(command = %request.command, "no handler for message");
                Ok(Reply::Error(ErrorCode::InvalidCmd))
            }
        }
    }
}

/// Key a command the same way a decoded frame would be
fn normalize(command: Command) -> Command {
    Command::from(command.as_byte())
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<_> = self.handlers.keys().collect();
        registered.sort();
        f.debug_struct("Dispatcher")
            .field("registered", &registered)
            .finish()
    }
}

/// Payload of an INIT response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitResponse {
    pub nonce: [u8; INIT_NONCE_SIZE],
    pub cid: u32,
    pub interface_version: u8,
    pub major: u8,
    pub minor: u8,
    pub build: u8,
    pub capabilities: u8,
}

impl InitResponse {
    pub fn to_bytes(&self) -> [u8; INIT_RESPONSE_SIZE] {
        let mut out = [0u8; INIT_RESPONSE_SIZE];
        out[..8].copy_from_slice(&self.nonce);
        out[8..12].copy_from_slice(&self.cid.to_be_bytes());
        out[12] = self.interface_version;
        out[13] = self.major;
        out[14] = self.minor;
        out[15] = self.build;
        out[16] = self.capabilities;
        out
    }

    /// Parse an INIT response payload, as a client would
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < INIT_RESPONSE_SIZE {
            return None;
        }
        let mut nonce = [0u8; INIT_NONCE_SIZE];
        nonce.copy_from_slice(&payload[..8]);
        Some(Self {
            nonce,
            cid: u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]),
            interface_version: payload[12],
            major: payload[13],
            minor: payload[14],
            build: payload[15],
            capabilities: payload[16],
        })
    }
}

/// Allocate a channel (broadcast request) or resynchronize the requester's channel
pub fn handle_init(ctx: &mut HandlerContext<'_>, request: &Message) -> Result<Reply> {
    let nonce: [u8; INIT_NONCE_SIZE] = match request.payload.as_slice().try_into() {
        Ok(nonce) => nonce,
        Err(_) => {
            tracing::warn!(len = request.payload.len(), "INIT request without an 8 byte nonce");
            return Ok(Reply::Error(ErrorCode::InvalidLen));
        }
    };

    let cid = if request.cid == BROADCAST_CID {
        ctx.channels.allocate()
    } else {
        tracing::debug!(cid = %Cid(request.cid), "resynchronizing channel");
        request.cid
    };

    let version = ctx.config.version;
    let response = InitResponse {
        nonce,
        cid,
        interface_version: version.interface,
        major: version.major,
        minor: version.minor,
        build: version.build,
        capabilities: ctx.config.capabilities.flags(),
    };
    Ok(Reply::Message(request.reply(response.to_bytes().to_vec())))
}

/// Echo the payload back unchanged
pub fn handle_ping(request: &Message) -> Result<Reply> {
    Ok(Reply::Message(request.clone()))
}

/// Acknowledge a WINK, echoing whatever was sent
pub fn handle_wink(request: &Message) -> Result<Reply> {
    tracing::info!(cid = %Cid(request.cid), "wink");
    Ok(Reply::Message(request.clone()))
}

/// Install or clear the channel lock
pub fn handle_lock(ctx: &mut HandlerContext<'_>, request: &Message) -> Result<Reply> {
    let duration = match request.payload.as_slice() {
        [duration] => *duration,
        other => {
            tracing::warn!(len = other.len(), "LOCK request without a one byte duration");
            return Ok(Reply::Error(ErrorCode::InvalidLen));
        }
    };
    ctx.lock.set(request.cid, duration, ctx.now);
    Ok(Reply::Message(request.reply(Vec::new())))
}

/// Echo a SYNC request
pub fn handle_sync(request: &Message) -> Result<Reply> {
    Ok(Reply::Message(request.clone()))
}

/// Turn a handler failure into the reply the client should see
pub(crate) fn reply_for_failure(err: &Error) -> Reply {
    match err {
        Error::Transport(_) => Reply::Silent,
        Error::Protocol { code, .. } => Reply::Error(*code),
        _ => Reply::Error(ErrorCode::Other),
    }
}
