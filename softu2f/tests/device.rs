//! Threaded device tests
//!
//! These run the engine on its own thread with the system clock, so the
//! timing dependent ones are serialized.

use serial_test::serial;
use softu2f::{DeviceBuilder, DeviceError, Reply, VirtualDevice};
use softu2f_hid::{frame, Command, Engine, EngineConfig, Error, ErrorCode, HostPort, QueueTransport};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn fast_config() -> EngineConfig {
    EngineConfig::builder()
        .poll_interval(Duration::from_millis(5))
        .build()
}

fn spawn_default() -> (VirtualDevice, HostPort) {
    let (transport, host) = QueueTransport::pair();
    let device = DeviceBuilder::new()
        .config(fast_config())
        .spawn(transport)
        .unwrap();
    (device, host)
}

#[test]
fn test_handshake_and_ping() {
    let (device, host) = spawn_default();

    let cid = host.handshake([9; 8], WAIT).unwrap();
    assert_eq!(cid, 1);

    let reply = host.transact(cid, Command::Ping, b"threaded", WAIT).unwrap();
    assert_eq!(reply.payload, b"threaded");

    device.shutdown().unwrap();
}

#[test]
fn test_on_message_handler() {
    let (transport, host) = QueueTransport::pair();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();

    let device = DeviceBuilder::new()
        .config(fast_config())
        .on_message(move |_ctx, request| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Reply::Message(request.reply(vec![0x90, 0x00])))
        })
        .spawn(transport)
        .unwrap();

    let cid = host.handshake([1; 8], WAIT).unwrap();
    let reply = host.transact(cid, Command::Msg, &[0, 2, 3, 0, 0], WAIT).unwrap();
    assert_eq!(reply.command, Command::Msg);
    assert_eq!(reply.payload, vec![0x90, 0x00]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    device.shutdown().unwrap();
}

#[test]
fn test_handler_override() {
    let (transport, host) = QueueTransport::pair();
    let device = DeviceBuilder::new()
        .config(fast_config())
        .handler(Command::Wink, |_ctx, request| {
            Ok(Reply::Message(request.reply(b"blink".to_vec())))
        })
        .spawn(transport)
        .unwrap();

    let cid = host.handshake([2; 8], WAIT).unwrap();
    let reply = host.transact(cid, Command::Wink, &[], WAIT).unwrap();
    assert_eq!(reply.payload, b"blink");

    device.shutdown().unwrap();
}

#[test]
fn test_failing_handler_reports_other() {
    let (transport, host) = QueueTransport::pair();
    let device = DeviceBuilder::new()
        .config(fast_config())
        .on_message(|_ctx, _request| Err(Error::handler("token unavailable")))
        .spawn(transport)
        .unwrap();

    let cid = host.handshake([3; 8], WAIT).unwrap();
    let reply = host.transact(cid, Command::Msg, &[0; 5], WAIT).unwrap();
    assert_eq!(reply.error_code(), Some(ErrorCode::Other));

    // The engine keeps serving after a handler failure
    let ping = host.transact(cid, Command::Ping, b"still here", WAIT).unwrap();
    assert_eq!(ping.payload, b"still here");

    device.shutdown().unwrap();
}

#[test]
#[serial]
fn test_stalled_message_times_out() {
    let (transport, host) = QueueTransport::pair();
    let device = DeviceBuilder::new()
        .config(
            EngineConfig::builder()
                .poll_interval(Duration::from_millis(5))
                .message_timeout(Duration::from_millis(100))
                .build(),
        )
        .spawn(transport)
        .unwrap();

    let cid = host.handshake([4; 8], WAIT).unwrap();
    let frames = frame::encode(cid, Command::Ping, &[0x42; 120]).unwrap();
    host.send_frame(&frames[0]).unwrap();

    let reply = host.recv_message(cid, WAIT).unwrap();
    assert_eq!(reply.error_code(), Some(ErrorCode::MsgTimeout));

    device.shutdown().unwrap();
}

#[test]
#[serial]
fn test_lock_blocks_other_channel() {
    let (device, host) = spawn_default();

    let a = host.handshake([5; 8], WAIT).unwrap();
    let b = host.handshake([6; 8], WAIT).unwrap();

    let reply = host.transact(a, Command::Lock, &[1], WAIT).unwrap();
    assert!(reply.payload.is_empty());

    let busy = host.transact(b, Command::Ping, b"b", WAIT).unwrap();
    assert_eq!(busy.error_code(), Some(ErrorCode::ChannelBusy));

    std::thread::sleep(Duration::from_millis(1100));
    let ok = host.transact(b, Command::Ping, b"b", WAIT).unwrap();
    assert_eq!(ok.payload, b"b");

    device.shutdown().unwrap();
}

#[test]
fn test_shutdown_handle_stops_thread() {
    let (device, _host) = spawn_default();
    let handle = device.shutdown_handle();
    handle.request_shutdown();

    for _ in 0..200 {
        if device.is_finished() {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(device.is_finished());
    device.join().unwrap();
}

#[test]
fn test_drop_stops_thread() {
    let (device, host) = spawn_default();
    drop(device);
    // The engine side of the queue is gone once its thread has exited
    assert!(host.send_raw(&[0u8; 64]).is_err());
}

#[test]
fn test_spawn_stopped_engine_fails() {
    let (transport, _host) = QueueTransport::pair();
    let mut engine = Engine::new(fast_config(), transport);
    engine.request_shutdown();
    engine.run_once().unwrap();

    match VirtualDevice::spawn(engine) {
        Err(DeviceError::Engine(Error::Stopped)) => {}
        other => panic!("expected stopped engine error, got {:?}", other.map(|_| ())),
    }
}
