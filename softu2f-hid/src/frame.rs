//! U2FHID frame codec
//!
//! Every frame on the wire is exactly [`FRAME_SIZE`] bytes:
//!
//! ```text
//! INIT:  | cid (4, BE) | 0x80 | cmd (1) | bcnt (2, BE) | data (57) |
//! CONT:  | cid (4, BE) | seq (1, top bit clear)        | data (59) |
//! ```
//!
//! A message is split into one INIT frame followed by as many CONT frames
//! as its payload needs.

use crate::command::Command;
use crate::error::{Error, Result};

use std::fmt;

/// Size of every HID report exchanged with the device
pub const FRAME_SIZE: usize = 64;
/// Bytes of header in an INIT frame (cid, cmd, bcnth, bcntl)
pub const INIT_HEADER_SIZE: usize = 7;
/// Bytes of header in a CONT frame (cid, seq)
pub const CONT_HEADER_SIZE: usize = 5;
/// Payload capacity of an INIT frame
pub const INIT_DATA_SIZE: usize = FRAME_SIZE - INIT_HEADER_SIZE;
/// Payload capacity of a CONT frame
pub const CONT_DATA_SIZE: usize = FRAME_SIZE - CONT_HEADER_SIZE;
/// Number of CONT frames a single message may span
pub const MAX_CONT_FRAMES: usize = 128;
/// Largest payload a message can carry (7609 bytes)
pub const MAX_PAYLOAD_SIZE: usize = INIT_DATA_SIZE + MAX_CONT_FRAMES * CONT_DATA_SIZE;
/// Type bit marking an INIT frame
pub const TYPE_INIT: u8 = 0x80;
/// Reserved channel used for the handshake before a client owns a channel
pub const BROADCAST_CID: u32 = 0xffff_ffff;

/// Channel id formatted the way it is logged: `0x` and eight hex digits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cid(pub u32);

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// One fixed-size wire frame
#[derive(Clone, PartialEq, Eq)]
pub struct Frame([u8; FRAME_SIZE]);

/// Structured view over a frame's header and data region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameView<'a> {
    /// First frame of a message
    Init {
        cid: u32,
        command: Command,
        length: u16,
        data: &'a [u8],
    },
    /// Follow-up frame of a message
    Cont { cid: u32, sequence: u8, data: &'a [u8] },
}

impl Frame {
    /// Wrap a full report
    pub fn from_bytes(bytes: [u8; FRAME_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy a report out of a slice, rejecting anything that is not a full frame
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; FRAME_SIZE] = bytes.try_into().map_err(|_| Error::FrameSize {
            expected: FRAME_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Build an INIT frame. `data` beyond [`INIT_DATA_SIZE`] is ignored.
    pub fn init(cid: u32, command: Command, length: u16, data: &[u8]) -> Self {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[..4].copy_from_slice(&cid.to_be_bytes());
        bytes[4] = TYPE_INIT | command.as_byte();
        bytes[5..7].copy_from_slice(&length.to_be_bytes());
        let n = data.len().min(INIT_DATA_SIZE);
        bytes[INIT_HEADER_SIZE..INIT_HEADER_SIZE + n].copy_from_slice(&data[..n]);
        Self(bytes)
    }

    /// Build a CONT frame. `data` beyond [`CONT_DATA_SIZE`] is ignored.
    pub fn cont(cid: u32, sequence: u8, data: &[u8]) -> Self {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[..4].copy_from_slice(&cid.to_be_bytes());
        bytes[4] = sequence & !TYPE_INIT;
        let n = data.len().min(CONT_DATA_SIZE);
        bytes[CONT_HEADER_SIZE..CONT_HEADER_SIZE + n].copy_from_slice(&data[..n]);
        Self(bytes)
    }

    /// Raw report bytes
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }

    /// Channel the frame belongs to
    pub fn cid(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Whether the type bit marks this as the first frame of a message
    pub fn is_init(&self) -> bool {
        self.0[4] & TYPE_INIT != 0
    }

    /// Decode the header fields
    pub fn view(&self) -> FrameView<'_> {
        let cid = self.cid();
        if self.is_init() {
            FrameView::Init {
                cid,
                command: Command::from(self.0[4]),
                length: u16::from_be_bytes([self.0[5], self.0[6]]),
                data: &self.0[INIT_HEADER_SIZE..],
            }
        } else {
            FrameView::Cont {
                cid,
                sequence: self.0[4],
                data: &self.0[CONT_HEADER_SIZE..],
            }
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.view() {
            FrameView::Init {
                cid,
                command,
                length,
                data,
            } => f
                .debug_struct("InitFrame")
                .field("cid", &format_args!("{}", Cid(cid)))
                .field("command", &command)
                .field("length", &length)
                .field("data", &hex::encode(data))
                .finish(),
            FrameView::Cont {
                cid,
                sequence,
                data,
            } => f
                .debug_struct("ContFrame")
                .field("cid", &format_args!("{}", Cid(cid)))
                .field("sequence", &sequence)
                .field("data", &hex::encode(data))
                .finish(),
        }
    }
}

/// Decode one report received from the transport
///
/// The only way a report can fail to decode is by having the wrong size; the
/// caller logs and drops such reports.
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    Frame::from_slice(bytes)
}

/// Split a message into the frames that carry it
///
/// A zero-length payload still produces exactly one INIT frame.
pub fn encode(cid: u32, command: Command, payload: &[u8]) -> Result<Vec<Frame>> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut frames = Vec::with_capacity(frame_count(payload.len()));
    let (head, mut rest) = payload.split_at(payload.len().min(INIT_DATA_SIZE));
    frames.push(Frame::init(cid, command, payload.len() as u16, head));

    let mut sequence: u8 = 0;
    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(rest.len().min(CONT_DATA_SIZE));
        frames.push(Frame::cont(cid, sequence, chunk));
        sequence = sequence.wrapping_add(1);
        rest = tail;
    }

    Ok(frames)
}

/// Number of frames needed to carry a payload of `len` bytes
pub fn frame_count(len: usize) -> usize {
    1 + len.saturating_sub(INIT_DATA_SIZE).div_ceil(CONT_DATA_SIZE)
}

/// Dump a frame at trace level
pub(crate) fn trace_frame(frame: &Frame, outbound: bool) {
    let direction = if outbound { "send" } else { "recv" };
    tracing::trace!(direction, frame = ?frame, "u2fhid frame");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(frames: &[Frame]) -> (Command, Vec<u8>) {
        let (command, length, first) = match frames[0].view() {
            FrameView::Init {
                command,
                length,
                data,
                ..
            } => (command, length as usize, data),
            other => panic!("first frame is not INIT: {:?}", other),
        };
        let mut out = first[..length.min(INIT_DATA_SIZE)].to_vec();
        for (i, frame) in frames[1..].iter().enumerate() {
            match frame.view() {
                FrameView::Cont { sequence, data, .. } => {
                    assert_eq!(sequence as usize, i);
                    let take = (length - out.len()).min(CONT_DATA_SIZE);
                    out.extend_from_slice(&data[..take]);
                }
                other => panic!("expected CONT frame, got {:?}", other),
            }
        }
        (command, out)
    }

    #[test]
    fn test_constants() {
        assert_eq!(INIT_DATA_SIZE, 57);
        assert_eq!(CONT_DATA_SIZE, 59);
        assert_eq!(MAX_PAYLOAD_SIZE, 7609);
    }

    #[test]
    fn test_init_frame_layout() {
        let frame = Frame::init(0x0102_0304, Command::Ping, 0x0105, b"hi");
        let bytes = frame.as_bytes();
        assert_eq!(&bytes[..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(bytes[4], 0x81);
        assert_eq!(&bytes[5..7], &[0x01, 0x05]);
        assert_eq!(&bytes[7..9], b"hi");
        assert!(bytes[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_cont_frame_layout() {
        let frame = Frame::cont(0xdead_beef, 3, &[0xaa; 70]);
        let bytes = frame.as_bytes();
        assert_eq!(&bytes[..4], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(bytes[4], 3);
        assert!(bytes[5..].iter().all(|&b| b == 0xaa));
        assert!(!frame.is_init());
    }

    #[test]
    fn test_zero_length_payload_is_one_frame() {
        let frames = encode(7, Command::Wink, &[]).unwrap();
        assert_eq!(frames.len(), 1);
        match frames[0].view() {
            FrameView::Init { length, .. } => assert_eq!(length, 0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fragmentation_boundaries() {
        for len in [
            0,
            1,
            INIT_DATA_SIZE,
            INIT_DATA_SIZE + 1,
            INIT_DATA_SIZE + CONT_DATA_SIZE,
            INIT_DATA_SIZE + CONT_DATA_SIZE + 1,
            1000,
            MAX_PAYLOAD_SIZE,
        ] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frames = encode(0x42, Command::Ping, &payload).unwrap();
            assert_eq!(frames.len(), frame_count(len), "frame count for {len}");
            let (command, out) = reassemble(&frames);
            assert_eq!(command, Command::Ping);
            assert_eq!(out, payload, "payload for {len}");
        }
    }

    #[test]
    fn test_max_payload_uses_all_sequences() {
        let frames = encode(1, Command::Msg, &vec![0u8; MAX_PAYLOAD_SIZE]).unwrap();
        assert_eq!(frames.len(), 1 + MAX_CONT_FRAMES);
        match frames.last().unwrap().view() {
            FrameView::Cont { sequence, .. } => assert_eq!(sequence, 127),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let err = encode(1, Command::Msg, &vec![0u8; MAX_PAYLOAD_SIZE + 1]).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { len: 7610, .. }));
    }

    #[test]
    fn test_decode_rejects_short_report() {
        let err = decode(&[0u8; 63]).unwrap_err();
        assert!(matches!(
            err,
            Error::FrameSize {
                expected: 64,
                actual: 63
            }
        ));
    }

    #[test]
    fn test_decode_reads_broadcast_init() {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[..4].copy_from_slice(&[0xff; 4]);
        bytes[4] = 0x86;
        bytes[6] = 8;
        let frame = decode(&bytes).unwrap();
        assert_eq!(frame.cid(), BROADCAST_CID);
        match frame.view() {
            FrameView::Init {
                command, length, ..
            } => {
                assert_eq!(command, Command::Init);
                assert_eq!(length, 8);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cid_display() {
        assert_eq!(Cid(1).to_string(), "0x00000001");
        assert_eq!(Cid(BROADCAST_CID).to_string(), "0xffffffff");
    }
}
