//! Transport seam
//!
//! The engine only needs two primitives from whatever moves reports between
//! the device and its clients: a non-blocking "next frame, if any" and a
//! "deliver this frame". [`QueueTransport`] implements them over in-process
//! queues so that a host (a test, a driver thread, a socket reader) can feed
//! the single-threaded engine from anywhere.

use crate::command::Command;
use crate::dispatch::{InitResponse, INIT_NONCE_SIZE};
use crate::error::{Error, Result};
use crate::frame::{self, Frame, FrameView, BROADCAST_CID, FRAME_SIZE};
use crate::message::{Message, PendingMessage};

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

/// Moves frames between the engine and the device
pub trait Transport {
    /// Read the next available report into `buf`
    ///
    /// Returns `Ok(None)` when nothing is queued, otherwise the size of the
    /// report that arrived. A size other than [`FRAME_SIZE`] marks a
    /// malformed report.
    fn poll_frame(&mut self, buf: &mut [u8; FRAME_SIZE]) -> Result<Option<usize>>;

    /// Deliver one frame to the device
    fn send_frame(&mut self, frame: &Frame) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn poll_frame(&mut self, buf: &mut [u8; FRAME_SIZE]) -> Result<Option<usize>> {
        (**self).poll_frame(buf)
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        (**self).send_frame(frame)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn poll_frame(&mut self, buf: &mut [u8; FRAME_SIZE]) -> Result<Option<usize>> {
        (**self).poll_frame(buf)
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        (**self).send_frame(frame)
    }
}

/// Device side of an in-process queue pair
#[derive(Debug)]
pub struct QueueTransport {
    inbound: Receiver<Vec<u8>>,
    outbound: Sender<Frame>,
}

/// Host side of an in-process queue pair
#[derive(Debug)]
pub struct HostPort {
    outbound: Sender<Vec<u8>>,
    inbound: Receiver<Frame>,
}

impl QueueTransport {
    /// Create a connected device/host pair
    pub fn pair() -> (QueueTransport, HostPort) {
        let (to_device, from_host) = mpsc::channel();
        let (to_host, from_device) = mpsc::channel();
        (
            QueueTransport {
                inbound: from_host,
                outbound: to_host,
            },
            HostPort {
                outbound: to_device,
                inbound: from_device,
            },
        )
    }
}

impl Transport for QueueTransport {
    fn poll_frame(&mut self, buf: &mut [u8; FRAME_SIZE]) -> Result<Option<usize>> {
        match self.inbound.try_recv() {
            Ok(report) => {
                let n = report.len().min(FRAME_SIZE);
                buf[..n].copy_from_slice(&report[..n]);
                Ok(Some(report.len()))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::transport("host disconnected")),
        }
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.outbound
            .send(frame.clone())
            .map_err(|_| Error::transport("host disconnected"))
    }
}

impl HostPort {
    /// Queue a raw report, whatever its size
    pub fn send_raw(&self, report: &[u8]) -> Result<()> {
        self.outbound
            .send(report.to_vec())
            .map_err(|_| Error::transport("device disconnected"))
    }

    /// Queue one frame
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send_raw(frame.as_bytes())
    }

    /// Fragment a message and queue all of its frames
    pub fn send_message(&self, cid: u32, command: Command, payload: &[u8]) -> Result<()> {
        for frame in frame::encode(cid, command, payload)? {
            self.send_frame(&frame)?;
        }
        Ok(())
    }

    /// Next frame from the device, if one is already waiting
    pub fn try_recv_frame(&self) -> Option<Frame> {
        self.inbound.try_recv().ok()
    }

    /// Wait up to `timeout` for the next frame from the device
    pub fn recv_frame(&self, timeout: Duration) -> Result<Frame> {
        self.inbound.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::Timeout,
            RecvTimeoutError::Disconnected => Error::transport("device disconnected"),
        })
    }

    /// Wait for and reassemble the next message addressed to `cid`
    ///
    /// Frames for other channels are skipped.
    pub fn recv_message(&self, cid: u32, timeout: Duration) -> Result<Message> {
        let deadline = Instant::now() + timeout;
        let mut pending: Option<PendingMessage> = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = self.recv_frame(remaining)?;
            if frame.cid() != cid {
                continue;
            }

            match frame.view() {
                FrameView::Init {
                    command,
                    length,
                    data,
                    ..
                } => {
                    pending = Some(PendingMessage::start(
                        cid,
                        command,
                        usize::from(length),
                        data,
                        Instant::now(),
                    ));
                }
                FrameView::Cont { sequence, data, .. } => {
                    let Some(msg) = pending.as_mut() else {
                        continue;
                    };
                    if msg.take_sequence() != sequence {
                        return Err(Error::Protocol {
                            cid,
                            code: crate::error::ErrorCode::InvalidSeq,
                        });
                    }
                    msg.append(data);
                }
            }

            if pending.as_ref().is_some_and(PendingMessage::is_complete) {
                if let Some(msg) = pending.take() {
                    return Ok(msg.into_message());
                }
            }
        }
    }

    /// Send a request and wait for the reply on the same channel
    pub fn transact(
        &self,
        cid: u32,
        command: Command,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Message> {
        self.send_message(cid, command, payload)?;
        self.recv_message(cid, timeout)
    }

    /// Run the INIT handshake on the broadcast channel and return the new channel id
    pub fn handshake(&self, nonce: [u8; INIT_NONCE_SIZE], timeout: Duration) -> Result<u32> {
        let reply = self.transact(BROADCAST_CID, Command::Init, &nonce, timeout)?;
        if let Some(code) = reply.error_code() {
            return Err(Error::Protocol {
                cid: BROADCAST_CID,
                code,
            });
        }
        let response = InitResponse::parse(&reply.payload)
            .filter(|r| r.nonce == nonce)
            .ok_or_else(|| Error::transport("malformed INIT response"))?;
        Ok(response.cid)
    }
}
