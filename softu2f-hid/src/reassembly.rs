//! Message reassembly
//!
//! Frames from every channel are interleaved on the wire. The reassembler
//! keeps at most one in-flight message per channel and folds each incoming
//! frame into it, reporting protocol violations back to the caller so they
//! can be answered on the offending channel.

use crate::command::Command;
use crate::config::InitCollisionPolicy;
use crate::error::ErrorCode;
use crate::frame::{Cid, Frame, FrameView, BROADCAST_CID, MAX_PAYLOAD_SIZE};
use crate::lock::LockArbiter;
use crate::message::{Message, PendingMessage};

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What happened to a frame handed to [`Reassembler::ingest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// An INIT frame started a new message
    Started { cid: u32 },
    /// A CONT frame extended an in-flight message
    Appended { cid: u32 },
    /// The frame was stale and has been dropped without telling the client
    Ignored,
    /// The frame broke the protocol; the client must be sent `code`
    Rejected { cid: u32, code: ErrorCode },
}

/// Result of sweeping the pending set
#[derive(Debug, PartialEq, Eq)]
pub enum Swept {
    /// A message whose payload is fully received
    Complete(Message),
    /// A message that missed its deadline
    TimedOut { cid: u32 },
}

/// In-flight messages keyed by channel
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<u32, PendingMessage>,
    policy: InitCollisionPolicy,
}

impl Reassembler {
    pub fn new(policy: InitCollisionPolicy) -> Self {
        Self {
            pending: HashMap::new(),
            policy,
        }
    }

    /// Number of channels with a message in flight
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// In-flight message for `cid`, if any
    pub fn get(&self, cid: u32) -> Option<&PendingMessage> {
        self.pending.get(&cid)
    }

    /// Drop every in-flight message
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(count = self.pending.len(), "discarding in-flight messages");
        }
        self.pending.clear();
    }

    /// Fold one frame into the pending set
    pub fn ingest(&mut self, frame: &Frame, lock: &mut LockArbiter, now: Instant) -> Ingest {
        match frame.view() {
            FrameView::Init {
                cid,
                command,
                length,
                data,
            } => self.ingest_init(cid, command, usize::from(length), data, lock, now),
            FrameView::Cont {
                cid,
                sequence,
                data,
            } => self.ingest_cont(cid, sequence, data),
        }
    }

    fn ingest_init(
        &mut self,
        cid: u32,
        command: Command,
        length: usize,
        data: &[u8],
        lock: &mut LockArbiter,
        now: Instant,
    ) -> Ingest {
        if cid == BROADCAST_CID && command != Command::Init {
            tracing::warn!(%command, "command other than INIT on the broadcast channel");
            return Ingest::Rejected {
                cid,
                code: ErrorCode::InvalidCid,
            };
        }

        if command == Command::Sync {
            if self.pending.remove(&cid).is_some() {
                tracing::warn!(cid = %Cid(cid), "SYNC abandoned an in-flight message");
            } else {
                tracing::warn!(cid = %Cid(cid), "SYNC frame out of order");
            }
            return Ingest::Rejected {
                cid,
                code: ErrorCode::InvalidCmd,
            };
        }

        if !lock.is_unlocked_for(cid, now) {
            tracing::debug!(cid = %Cid(cid), "device is locked by another channel");
            return Ingest::Rejected {
                cid,
                code: ErrorCode::ChannelBusy,
            };
        }

        if self.pending.contains_key(&cid) {
            match self.policy {
                InitCollisionPolicy::Reset => {
                    tracing::debug!(cid = %Cid(cid), "INIT while expecting CONT, resetting");
                    self.pending.remove(&cid);
                }
                InitCollisionPolicy::RejectBusy => {
                    tracing::debug!(cid = %Cid(cid), "INIT while expecting CONT, rejecting");
                    return Ingest::Rejected {
                        cid,
                        code: ErrorCode::ChannelBusy,
                    };
                }
            }
        }

        if length > MAX_PAYLOAD_SIZE {
            tracing::warn!(cid = %Cid(cid), length, "declared length too large");
            return Ingest::Rejected {
                cid,
                code: ErrorCode::InvalidLen,
            };
        }

        self.pending
            .insert(cid, PendingMessage::start(cid, command, length, data, now));
        Ingest::Started { cid }
    }

    fn ingest_cont(&mut self, cid: u32, sequence: u8, data: &[u8]) -> Ingest {
        let Some(msg) = self.pending.get_mut(&cid) else {
            tracing::debug!(cid = %Cid(cid), sequence, "CONT frame out of order, ignoring");
            return Ingest::Ignored;
        };

        let expected = msg.take_sequence();
        if sequence != expected {
            tracing::warn!(
                cid = %Cid(cid),
                sequence,
                expected,
                "bad sequence in CONT frame"
            );
            self.pending.remove(&cid);
            return Ingest::Rejected {
                cid,
                code: ErrorCode::InvalidSeq,
            };
        }

        msg.append(data);
        Ingest::Appended { cid }
    }

    /// Remove every complete or timed-out message
    ///
    /// Messages that are neither stay pending. Results are ordered by channel.
    pub fn sweep(&mut self, now: Instant, deadline: Duration) -> Vec<Swept> {
        let mut ready: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, msg)| msg.is_complete() || msg.is_timed_out(now, deadline))
            .map(|(cid, _)| *cid)
            .collect();
        ready.sort_unstable();

        ready
            .into_iter()
            .filter_map(|cid| self.pending.remove(&cid))
            .map(|msg| {
                if msg.is_complete() {
                    Swept::Complete(msg.into_message())
                } else {
                    tracing::warn!(
                        cid = %Cid(msg.cid()),
                        received = msg.received(),
                        expected = msg.expected_length(),
                        "message timed out"
                    );
                    Swept::TimedOut { cid: msg.cid() }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode, Frame};

    const CID: u32 = 0x0000_0010;

    fn setup() -> (Reassembler, LockArbiter, Instant) {
        (
            Reassembler::new(InitCollisionPolicy::Reset),
            LockArbiter::new(),
            Instant::now(),
        )
    }

    #[test]
    fn test_single_frame_message_completes() {
        let (mut r, mut lock, now) = setup();
        let frames = encode(CID, Command::Ping, b"hello").unwrap();
        assert_eq!(r.ingest(&frames[0], &mut lock, now), Ingest::Started { cid: CID });

        let swept = r.sweep(now, Duration::from_secs(3));
        assert_eq!(
            swept,
            vec![Swept::Complete(Message::new(CID, Command::Ping, b"hello".to_vec()))]
        );
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_multi_frame_message() {
        let (mut r, mut lock, now) = setup();
        let payload: Vec<u8> = (0..200u8).collect();
        for frame in encode(CID, Command::Msg, &payload).unwrap() {
            r.ingest(&frame, &mut lock, now);
        }
        match r.sweep(now, Duration::from_secs(3)).pop() {
            Some(Swept::Complete(msg)) => assert_eq!(msg.payload, payload),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_sequence_discards_message() {
        let (mut r, mut lock, now) = setup();
        let frames = encode(CID, Command::Ping, &[1u8; 150]).unwrap();
        r.ingest(&frames[0], &mut lock, now);

        let wrong = Frame::cont(CID, 1, &[0u8; 59]);
        assert_eq!(
            r.ingest(&wrong, &mut lock, now),
            Ingest::Rejected {
                cid: CID,
                code: ErrorCode::InvalidSeq
            }
        );
        assert!(r.get(CID).is_none());

        // Later CONT frames for the channel are orphans
        assert_eq!(r.ingest(&frames[1], &mut lock, now), Ingest::Ignored);
    }

    #[test]
    fn test_cont_without_init_is_ignored() {
        let (mut r, mut lock, now) = setup();
        let frame = Frame::cont(CID, 0, &[0u8; 59]);
        assert_eq!(r.ingest(&frame, &mut lock, now), Ingest::Ignored);
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_second_init_resets() {
        let (mut r, mut lock, now) = setup();
        let first = encode(CID, Command::Ping, &[1u8; 100]).unwrap();
        r.ingest(&first[0], &mut lock, now);

        let second = encode(CID, Command::Wink, &[]).unwrap();
        assert_eq!(r.ingest(&second[0], &mut lock, now), Ingest::Started { cid: CID });
        assert_eq!(r.get(CID).unwrap().command(), Command::Wink);
    }

    #[test]
    fn test_second_init_rejected_when_policy_is_busy() {
        let mut r = Reassembler::new(InitCollisionPolicy::RejectBusy);
        let mut lock = LockArbiter::new();
        let now = Instant::now();
        let first = encode(CID, Command::Ping, &[1u8; 100]).unwrap();
        r.ingest(&first[0], &mut lock, now);

        let second = encode(CID, Command::Wink, &[]).unwrap();
        assert_eq!(
            r.ingest(&second[0], &mut lock, now),
            Ingest::Rejected {
                cid: CID,
                code: ErrorCode::ChannelBusy
            }
        );
        assert_eq!(r.get(CID).unwrap().command(), Command::Ping);
    }

    #[test]
    fn test_sync_is_rejected() {
        let (mut r, mut lock, now) = setup();
        let sync = Frame::init(CID, Command::Sync, 0, &[]);
        assert_eq!(
            r.ingest(&sync, &mut lock, now),
            Ingest::Rejected {
                cid: CID,
                code: ErrorCode::InvalidCmd
            }
        );

        let first = encode(CID, Command::Ping, &[1u8; 100]).unwrap();
        r.ingest(&first[0], &mut lock, now);
        assert!(matches!(
            r.ingest(&sync, &mut lock, now),
            Ingest::Rejected {
                code: ErrorCode::InvalidCmd,
                ..
            }
        ));
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_broadcast_only_accepts_init() {
        let (mut r, mut lock, now) = setup();
        let ping = Frame::init(BROADCAST_CID, Command::Ping, 0, &[]);
        assert_eq!(
            r.ingest(&ping, &mut lock, now),
            Ingest::Rejected {
                cid: BROADCAST_CID,
                code: ErrorCode::InvalidCid
            }
        );

        let init = Frame::init(BROADCAST_CID, Command::Init, 8, &[0u8; 8]);
        assert_eq!(
            r.ingest(&init, &mut lock, now),
            Ingest::Started { cid: BROADCAST_CID }
        );
    }

    #[test]
    fn test_oversized_length_rejected() {
        let (mut r, mut lock, now) = setup();
        let frame = Frame::init(CID, Command::Msg, (MAX_PAYLOAD_SIZE + 1) as u16, &[]);
        assert_eq!(
            r.ingest(&frame, &mut lock, now),
            Ingest::Rejected {
                cid: CID,
                code: ErrorCode::InvalidLen
            }
        );
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_locked_device_rejects_other_channel() {
        let (mut r, mut lock, now) = setup();
        lock.set(0x99, 5, now);
        let frame = Frame::init(CID, Command::Ping, 0, &[]);
        assert_eq!(
            r.ingest(&frame, &mut lock, now),
            Ingest::Rejected {
                cid: CID,
                code: ErrorCode::ChannelBusy
            }
        );

        let owner = Frame::init(0x99, Command::Ping, 0, &[]);
        assert_eq!(r.ingest(&owner, &mut lock, now), Ingest::Started { cid: 0x99 });
    }

    #[test]
    fn test_timeout_sweep() {
        let (mut r, mut lock, now) = setup();
        let frames = encode(CID, Command::Ping, &[1u8; 100]).unwrap();
        r.ingest(&frames[0], &mut lock, now);

        let deadline = Duration::from_millis(500);
        assert!(r.sweep(now + deadline, deadline).is_empty());
        assert_eq!(
            r.sweep(now + deadline + Duration::from_millis(1), deadline),
            vec![Swept::TimedOut { cid: CID }]
        );
        assert_eq!(r.pending_count(), 0);
    }
}
