//! U2FHID messages, complete and in flight

use crate::command::Command;
use crate::error::{ErrorCode, Result};
use crate::frame::{self, Frame};

use std::time::{Duration, Instant};

/// A complete U2FHID request or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cid: u32,
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(cid: u32, command: Command, payload: Vec<u8>) -> Self {
        Self {
            cid,
            command,
            payload,
        }
    }

    /// One-byte ERROR response for `cid`
    pub fn error(cid: u32, code: ErrorCode) -> Self {
        Self::new(cid, Command::Error, vec![code.into()])
    }

    /// Reply on the same channel and command with a new payload
    pub fn reply(&self, payload: Vec<u8>) -> Self {
        Self::new(self.cid, self.command, payload)
    }

    /// Serialize into wire frames
    pub fn to_frames(&self) -> Result<Vec<Frame>> {
        frame::encode(self.cid, self.command, &self.payload)
    }

    /// Error code carried by an ERROR message
    pub fn error_code(&self) -> Option<ErrorCode> {
        match (self.command, self.payload.as_slice()) {
            (Command::Error, [code]) => ErrorCode::try_from(*code).ok(),
            _ => None,
        }
    }
}

/// A message being reassembled from frames
#[derive(Debug)]
pub struct PendingMessage {
    cid: u32,
    command: Command,
    expected_length: usize,
    payload: Vec<u8>,
    next_sequence: u8,
    created_at: Instant,
}

impl PendingMessage {
    /// Start a message from the data region of its INIT frame
    ///
    /// Only as much of `data` as the declared length calls for is kept.
    pub fn start(
        cid: u32,
        command: Command,
        expected_length: usize,
        data: &[u8],
        now: Instant,
    ) -> Self {
        let mut payload = Vec::with_capacity(expected_length);
        let take = data.len().min(expected_length);
        payload.extend_from_slice(&data[..take]);
        Self {
            cid,
            command,
            expected_length,
            payload,
            next_sequence: 0,
            created_at: now,
        }
    }

    pub fn cid(&self) -> u32 {
        self.cid
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn expected_length(&self) -> usize {
        self.expected_length
    }

    pub fn received(&self) -> usize {
        self.payload.len()
    }

    /// Sequence number the next CONT frame must carry
    pub fn next_sequence(&self) -> u8 {
        self.next_sequence
    }

    /// Consume a sequence number, returning the one that was expected
    pub(crate) fn take_sequence(&mut self) -> u8 {
        let expected = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        expected
    }

    /// Append a CONT frame's data, never growing past the declared length
    pub(crate) fn append(&mut self, data: &[u8]) {
        let take = data.len().min(self.expected_length - self.payload.len());
        self.payload.extend_from_slice(&data[..take]);
    }

    pub fn is_complete(&self) -> bool {
        self.payload.len() == self.expected_length
    }

    pub fn is_timed_out(&self, now: Instant, deadline: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > deadline
    }

    /// Finish reassembly
    pub fn into_message(self) -> Message {
        Message::new(self.cid, self.command, self.payload)
    }
}
