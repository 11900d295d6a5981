//! Virtual U2F device driven by an in-process host
//!
//! Run with: RUST_LOG=debug cargo run --example virtual_device
//!
//! The device answers U2F_VERSION over U2FHID_MSG and rejects every other
//! instruction with SW_INS_NOT_SUPPORTED. Press Ctrl+C to exit.

use softu2f::{DeviceBuilder, Reply};
use softu2f_hid::{Command, EngineConfig, QueueTransport};

use std::sync::mpsc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

const U2F_VERSION: u8 = 0x03;
const SW_NO_ERROR: [u8; 2] = [0x90, 0x00];
const SW_INS_NOT_SUPPORTED: [u8; 2] = [0x6d, 0x00];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let (transport, host) = QueueTransport::pair();

    let device = DeviceBuilder::new()
        .config(
            EngineConfig::builder()
                .poll_interval(Duration::from_millis(10))
                .build(),
        )
        .on_message(|_ctx, request| {
            let ins = request.payload.get(1).copied();
            let response = match ins {
                Some(U2F_VERSION) => [b"U2F_V2".as_slice(), &SW_NO_ERROR].concat(),
                _ => SW_INS_NOT_SUPPORTED.to_vec(),
            };
            Ok(Reply::Message(request.reply(response)))
        })
        .spawn(transport)?;

    let (stop_tx, stop_rx) = mpsc::channel();
    let shutdown = device.shutdown_handle();
    ctrlc::set_handler(move || {
        shutdown.request_shutdown();
        let _ = stop_tx.send(());
    })?;

    let timeout = Duration::from_secs(1);
    let cid = host.handshake(clock_nonce(), timeout)?;
    println!("allocated channel {cid:#010x}");

    let ping = host.transact(cid, Command::Ping, b"hello", timeout)?;
    println!("ping echoed {:?}", String::from_utf8_lossy(&ping.payload));

    let apdu = [0x00, U2F_VERSION, 0x00, 0x00, 0x00];
    let version = host.transact(cid, Command::Msg, &apdu, timeout)?;
    println!("version response: {}", hex::encode(&version.payload));

    println!("device running, press Ctrl+C to stop");
    let _ = stop_rx.recv();
    device.shutdown()?;
    println!("stopped");
    Ok(())
}

fn clock_nonce() -> [u8; 8] {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    nanos.to_le_bytes()
}
