//! Channel lock arbiter
//!
//! A channel may claim the device exclusively for up to [`MAX_LOCK_SECONDS`].
//! While the claim is live, transactions from every other channel are refused.

use crate::frame::Cid;

use std::time::{Duration, Instant};

/// Longest lock a channel may hold, in seconds
pub const MAX_LOCK_SECONDS: u8 = 10;

/// Exclusive claim held by one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lock {
    /// Channel holding the lock
    pub owner: u32,
    /// Instant at which the lock lapses
    pub expiration: Instant,
}

/// Tracks the single process-wide lock
#[derive(Debug, Default)]
pub struct LockArbiter {
    lock: Option<Lock>,
}

impl LockArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `cid` may start a transaction at `now`
    ///
    /// An expired lock is cleared as a side effect.
    pub fn is_unlocked_for(&mut self, cid: u32, now: Instant) -> bool {
        match self.current(now) {
            None => true,
            Some(lock) => lock.owner == cid,
        }
    }

    /// Install or clear the lock
    ///
    /// A zero duration clears any lock. Anything else is clamped to
    /// [`MAX_LOCK_SECONDS`] and replaces the current lock, whoever holds it.
    pub fn set(&mut self, cid: u32, duration_secs: u8, now: Instant) {
        if duration_secs == 0 {
            if let Some(old) = self.lock.take() {
                tracing::debug!(cid = %Cid(old.owner), "lock cleared");
            }
            return;
        }

        let secs = duration_secs.min(MAX_LOCK_SECONDS);
        let expiration = now + Duration::from_secs(u64::from(secs));
        if let Some(old) = self.lock {
            if old.owner != cid && old.expiration > now {
                tracing::warn!(
                    previous = %Cid(old.owner),
                    cid = %Cid(cid),
                    "lock taken over by another channel"
                );
            }
        }
        tracing::debug!(cid = %Cid(cid), secs, "lock installed");
        self.lock = Some(Lock {
            owner: cid,
            expiration,
        });
    }

    /// The live lock, if any, clearing an expired one
    pub fn current(&mut self, now: Instant) -> Option<Lock> {
        if let Some(lock) = self.lock {
            if now >= lock.expiration {
                tracing::debug!(cid = %Cid(lock.owner), "lock expired");
                self.lock = None;
            }
        }
        self.lock
    }
}
