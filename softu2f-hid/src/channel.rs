//! Channel id allocation

use crate::frame::{Cid, BROADCAST_CID};

/// Hands out channel ids to clients completing the INIT handshake
///
/// Ids increase strictly for the lifetime of the allocator and are never
/// reused. The broadcast id is skipped if the counter ever reaches it.
#[derive(Debug)]
pub struct ChannelAllocator {
    next: u32,
}

impl ChannelAllocator {
    /// Start allocating at `first`
    pub fn new(first: u32) -> Self {
        Self { next: first }
    }

    /// Next id that [`allocate`](Self::allocate) would return
    pub fn peek(&self) -> u32 {
        self.next
    }

    /// Issue a fresh channel id
    pub fn allocate(&mut self) -> u32 {
        if self.next == BROADCAST_CID {
            tracing::warn!("channel counter reached the broadcast id, wrapping");
            self.next = 1;
        }
        let cid = self.next;
        self.next = self.next.wrapping_add(1);
        tracing::debug!(cid = %Cid(cid), "allocated channel");
        cid
    }
}

impl Default for ChannelAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_strictly_increasing() {
        let mut allocator = ChannelAllocator::new(1);
        let ids: Vec<u32> = (0..16).map(|_| allocator.allocate()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(!ids.contains(&BROADCAST_CID));
        assert_eq!(allocator.peek(), 17);
    }

    #[test]
    fn test_broadcast_is_never_issued() {
        let mut allocator = ChannelAllocator::new(BROADCAST_CID - 1);
        assert_eq!(allocator.allocate(), BROADCAST_CID - 1);
        assert_eq!(allocator.allocate(), 1);
    }
}
