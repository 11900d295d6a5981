//! Threaded virtual device

use crate::error::{DeviceError, Result};

use softu2f_hid::{
    Clock, Command, Dispatcher, Engine, EngineConfig, Handler, HandlerContext, Message, Reply,
    ShutdownHandle, SystemClock, Transport,
};

use std::thread::{self, JoinHandle};

const THREAD_NAME: &str = "softu2f-engine";

/// A U2FHID engine running on its own thread
///
/// Dropping the device requests shutdown and waits for the thread to exit.
#[derive(Debug)]
pub struct VirtualDevice {
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<softu2f_hid::Result<()>>>,
}

impl VirtualDevice {
    /// Run an already configured engine on a new thread
    pub fn spawn<T, C>(mut engine: Engine<T, C>) -> Result<Self>
    where
        T: Transport + Send + 'static,
        C: Clock + Send + 'static,
    {
        let shutdown = engine.shutdown_handle();
        engine.start()?;
        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || engine.run_forever())?;
        tracing::info!("virtual U2F device running");
        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    /// Handle that can stop the device from anywhere, e.g. a signal handler
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Whether the engine thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the engine thread without asking it to stop
    pub fn join(mut self) -> Result<()> {
        self.join_thread()
    }

    /// Stop the engine and wait for its thread to exit
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown.request_shutdown();
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        match thread.join() {
            Ok(result) => result.map_err(DeviceError::from),
            Err(_) => Err(DeviceError::Panicked),
        }
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown.request_shutdown();
            if let Err(e) = self.join_thread() {
                tracing::error!(error = %e, "engine thread exited with an error");
            }
        }
    }
}

/// Builder for a [`VirtualDevice`]
///
/// # Example
///
/// ```no_run
/// use softu2f::{Command, DeviceBuilder, Reply};
/// use softu2f_hid::QueueTransport;
///
/// let (transport, _host) = QueueTransport::pair();
/// let device = DeviceBuilder::new()
///     .on_message(|_ctx, req| Ok(Reply::Message(req.reply(vec![0x90, 0x00]))))
///     .handler(Command::Wink, |_ctx, req| {
///         println!("blink!");
///         Ok(Reply::Message(req.clone()))
///     })
///     .spawn(transport)
///     .unwrap();
/// # drop(device);
/// ```
#[derive(Debug, Default)]
pub struct DeviceBuilder {
    config: EngineConfig,
    dispatcher: Dispatcher,
}

impl DeviceBuilder {
    /// Create a new builder with default configuration and built-in handlers only
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the handler for U2F raw messages (`U2FHID_MSG`)
    pub fn on_message<F>(self, handler: F) -> Self
    where
        F: FnMut(&mut HandlerContext<'_>, &Message) -> softu2f_hid::Result<Reply> + Send + 'static,
    {
        self.handler(Command::Msg, handler)
    }

    /// Set the handler for any command, replacing its built-in behaviour
    pub fn handler<F>(mut self, command: Command, handler: F) -> Self
    where
        F: FnMut(&mut HandlerContext<'_>, &Message) -> softu2f_hid::Result<Reply> + Send + 'static,
    {
        self.dispatcher.register(command, handler);
        self
    }

    /// Set a [`Handler`] implementation for a command
    pub fn handler_impl<H>(mut self, command: Command, handler: H) -> Self
    where
        H: Handler + Send + 'static,
    {
        self.dispatcher.register_handler(command, handler);
        self
    }

    /// Build the engine without starting it
    pub fn build<T: Transport>(self, transport: T) -> Engine<T, SystemClock> {
        Engine::new(self.config, transport).with_dispatcher(self.dispatcher)
    }

    /// Build the engine with a custom clock without starting it
    pub fn build_with_clock<T: Transport, C: Clock>(self, transport: T, clock: C) -> Engine<T, C> {
        Engine::with_clock(self.config, transport, clock).with_dispatcher(self.dispatcher)
    }

    /// Build the engine and run it on a new thread
    pub fn spawn<T>(self, transport: T) -> Result<VirtualDevice>
    where
        T: Transport + Send + 'static,
    {
        VirtualDevice::spawn(self.build(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use softu2f_hid::dispatch::Route;
    use softu2f_hid::{ManualClock, QueueTransport, RunState};

    #[test]
    fn test_builder_registers_message_handler() {
        let (transport, _host) = QueueTransport::pair();
        let engine = DeviceBuilder::new()
            .on_message(|_ctx, req| Ok(Reply::Message(req.clone())))
            .build(transport);
        assert_eq!(engine.dispatcher().route(Command::Msg), Route::Registered);
        assert!(matches!(
            engine.dispatcher().route(Command::Ping),
            Route::BuiltIn(_)
        ));
    }

    #[test]
    fn test_builder_applies_config() {
        let (transport, _host) = QueueTransport::pair();
        let config = EngineConfig::builder().first_channel_id(0x40).build();
        let engine = DeviceBuilder::new()
            .config(config)
            .build_with_clock(transport, ManualClock::new());
        assert_eq!(engine.next_channel_id(), 0x40);
        assert_eq!(engine.state(), RunState::Idle);
    }

    #[test]
    fn test_shutdown_twice_is_harmless() {
        let (transport, _host) = QueueTransport::pair();
        let device = DeviceBuilder::new().spawn(transport).unwrap();
        let handle = device.shutdown_handle();
        handle.request_shutdown();
        device.shutdown().unwrap();
        assert!(handle.is_shutdown_requested());
    }
}
