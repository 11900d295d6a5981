//! The U2FHID run loop
//!
//! One [`Engine`] owns all protocol state: the in-flight messages, the
//! channel lock, the channel counter and the handler table. Each cycle
//! drains every frame the transport has queued, then dispatches complete
//! messages and expires stale ones, then yields for the poll interval.
//!
//! The engine is single-threaded. Shutdown is requested from elsewhere
//! through a [`ShutdownHandle`] and takes effect at the top of the next cycle.

use crate::channel::ChannelAllocator;
use crate::clock::{Clock, SystemClock};
use crate::command::Command;
use crate::config::EngineConfig;
use crate::dispatch::{self, Dispatcher, Handler, HandlerContext, Reply};
use crate::error::{Error, ErrorCode, Result};
use crate::frame::{self, Cid, Frame, FRAME_SIZE};
use crate::lock::LockArbiter;
use crate::message::Message;
use crate::reassembly::{Ingest, Reassembler, Swept};
use crate::transport::Transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where the run loop is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created but not started
    Idle,
    /// Draining frames from the transport
    Polling,
    /// Sweeping complete and timed-out messages
    Dispatching,
    /// Shut down; no further frames will be processed
    Stopped,
}

/// Outcome of a single cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// The cycle ran
    Ran(CycleStats),
    /// Shutdown was requested; the engine is now stopped
    Stopped,
}

/// Counters for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Well-formed frames handed to reassembly
    pub frames: usize,
    /// Reports dropped for being the wrong size
    pub dropped: usize,
    /// Complete messages dispatched
    pub dispatched: usize,
    /// Messages expired with `ERR_MSG_TIMEOUT`
    pub timed_out: usize,
    /// Protocol errors reported to clients during reassembly
    pub rejected: usize,
}

/// Cloneable handle that asks a running engine to stop
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the engine to stop at the top of its next cycle
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// U2FHID protocol engine
pub struct Engine<T, C = SystemClock> {
    transport: T,
    clock: C,
    config: EngineConfig,
    reassembler: Reassembler,
    lock: LockArbiter,
    channels: ChannelAllocator,
    dispatcher: Dispatcher,
    state: RunState,
    shutdown: ShutdownHandle,
}

impl<T: Transport> Engine<T, SystemClock> {
    /// Create an engine reading and writing frames through `transport`
    pub fn new(config: EngineConfig, transport: T) -> Self {
        Self::with_clock(config, transport, SystemClock)
    }
}

impl<T: Transport, C: Clock> Engine<T, C> {
    /// Create an engine with a custom time source
    pub fn with_clock(config: EngineConfig, transport: T, clock: C) -> Self {
        Self {
            transport,
            clock,
            reassembler: Reassembler::new(config.init_collision),
            lock: LockArbiter::new(),
            channels: ChannelAllocator::new(config.first_channel_id),
            dispatcher: Dispatcher::new(),
            state: RunState::Idle,
            shutdown: ShutdownHandle::new(),
            config,
        }
    }

    /// Register a closure for `command`, replacing the built-in behaviour
    pub fn register<F>(&mut self, command: Command, handler: F)
    where
        F: FnMut(&mut HandlerContext<'_>, &Message) -> Result<Reply> + Send + 'static,
    {
        self.dispatcher.register(command, handler);
    }

    /// Register a [`Handler`] implementation for `command`
    pub fn register_handler<H>(&mut self, command: Command, handler: H)
    where
        H: Handler + Send + 'static,
    {
        self.dispatcher.register_handler(command, handler);
    }

    /// Replace the handler table wholesale
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Number of channels with a partially received message
    pub fn pending_count(&self) -> usize {
        self.reassembler.pending_count()
    }

    /// Channel currently holding the lock, if the lock is live
    pub fn lock_owner(&mut self) -> Option<u32> {
        let now = self.clock.now();
        self.lock.current(now).map(|lock| lock.owner)
    }

    /// Id the next broadcast INIT will be given
    pub fn next_channel_id(&self) -> u32 {
        self.channels.peek()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Handle for stopping the engine from another thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.request_shutdown();
    }

    /// Begin processing frames
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            RunState::Stopped => Err(Error::Stopped),
            RunState::Idle => {
                tracing::info!(
                    timeout_ms = self.config.message_timeout.as_millis() as u64,
                    poll_ms = self.config.poll_interval.as_millis() as u64,
                    "u2fhid engine started"
                );
                self.state = RunState::Polling;
                Ok(())
            }
            RunState::Polling | RunState::Dispatching => Ok(()),
        }
    }

    /// Run one drain-then-dispatch cycle without sleeping
    pub fn run_once(&mut self) -> Result<Cycle> {
        self.start()?;

        if self.shutdown.is_shutdown_requested() {
            self.stop();
            return Ok(Cycle::Stopped);
        }

        let mut stats = CycleStats::default();
        self.state = RunState::Polling;
        self.drain(&mut stats);

        self.state = RunState::Dispatching;
        self.sweep(&mut stats);

        self.state = RunState::Polling;
        Ok(Cycle::Ran(stats))
    }

    /// Run cycles until shutdown is requested
    pub fn run_forever(&mut self) -> Result<()> {
        loop {
            if let Cycle::Stopped = self.run_once()? {
                return Ok(());
            }
            if !self.shutdown.is_shutdown_requested() {
                std::thread::sleep(self.config.poll_interval);
            }
        }
    }

    fn stop(&mut self) {
        self.reassembler.clear();
        self.state = RunState::Stopped;
        tracing::info!("u2fhid engine stopped");
    }

    fn drain(&mut self, stats: &mut CycleStats) {
        let mut buf = [0u8; FRAME_SIZE];
        loop {
            match self.transport.poll_frame(&mut buf) {
                Ok(None) => break,
                Ok(Some(n)) if n != FRAME_SIZE => {
                    tracing::warn!(size = n, "bad frame size, dropping");
                    stats.dropped += 1;
                }
                Ok(Some(_)) => {
                    stats.frames += 1;
                    let frame = Frame::from_bytes(buf);
                    self.ingest(&frame, stats);
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to read frame");
                    break;
                }
            }
        }
    }

    fn ingest(&mut self, frame: &Frame, stats: &mut CycleStats) {
        frame::trace_frame(frame, false);
        let now = self.clock.now();
        if let Ingest::Rejected { cid, code } = self.reassembler.ingest(frame, &mut self.lock, now)
        {
            stats.rejected += 1;
            self.report_error(cid, code);
        }
    }

    fn sweep(&mut self, stats: &mut CycleStats) {
        let now = self.clock.now();
        for swept in self.reassembler.sweep(now, self.config.message_timeout) {
            match swept {
                Swept::Complete(msg) => {
                    stats.dispatched += 1;
                    self.dispatch(msg);
                }
                Swept::TimedOut { cid } => {
                    stats.timed_out += 1;
                    self.report_error(cid, ErrorCode::MsgTimeout);
                }
            }
        }
    }

    fn dispatch(&mut self, request: Message) {
        let mut ctx = HandlerContext {
            lock: &mut self.lock,
            channels: &mut self.channels,
            config: &self.config,
            now: self.clock.now(),
        };

        let reply = match self.dispatcher.dispatch(&mut ctx, &request) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    cid = %Cid(request.cid),
                    command = %request.command,
                    error = %e,
                    "error handling message"
                );
                dispatch::reply_for_failure(&e)
            }
        };

        match reply {
            Reply::Message(response) => {
                if let Err(e) = self.send_message(&response) {
                    tracing::error!(error = %e, "failed to send response");
                }
            }
            Reply::Error(code) => self.report_error(request.cid, code),
            Reply::Silent => {}
        }
    }

    fn report_error(&mut self, cid: u32, code: ErrorCode) {
        if let Err(e) = self.send_error(cid, code) {
            tracing::error!(error = %e, ?code, "failed to send error frame");
        }
    }

    /// Serialize a message and push every frame to the transport
    pub fn send_message(&mut self, msg: &Message) -> Result<()> {
        for frame in msg.to_frames()? {
            frame::trace_frame(&frame, true);
            self.transport.send_frame(&frame)?;
        }
        Ok(())
    }

    /// Send a one-byte ERROR message on `cid`
    pub fn send_error(&mut self, cid: u32, code: ErrorCode) -> Result<()> {
        tracing::debug!(cid = %Cid(cid), ?code, "sending error");
        self.send_message(&Message::error(cid, code))
    }
}
