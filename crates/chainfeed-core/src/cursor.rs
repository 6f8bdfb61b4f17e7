//! Receiver cursor — the last height handed downstream, and its hash.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::hex::Hex;

/// The pipeline's position in the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Last height fully emitted.
    pub height: u64,
    /// Hash of that block (empty until the first emit).
    pub hash: Hex,
}

impl Cursor {
    pub fn new(height: u64, hash: Hex) -> Self {
        Self { height, hash }
    }

    /// Returns the next height to emit (cursor + 1).
    pub fn next_height(&self) -> u64 {
        self.height + 1
    }

    /// How many heights `head` is ahead of the cursor.
    pub fn lag(&self, head: u64) -> u64 {
        head.saturating_sub(self.height)
    }
}

/// Cursor shared between the sequencer (sole writer) and the sync driver.
///
/// Height and hash are updated together under the write lock, so a reader
/// never observes one without the other.
#[derive(Debug, Clone, Default)]
pub struct SharedCursor {
    inner: Arc<RwLock<Cursor>>,
}

impl SharedCursor {
    pub fn new(cursor: Cursor) -> Self {
        Self {
            inner: Arc::new(RwLock::new(cursor)),
        }
    }

    /// Start at `height` with an unknown hash.
    pub fn at(height: u64) -> Self {
        Self::new(Cursor::new(height, Hex::default()))
    }

    /// Current `(height, hash)`.
    pub fn level(&self) -> (u64, Hex) {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        (guard.height, guard.hash.clone())
    }

    pub fn height(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).height
    }

    pub fn snapshot(&self) -> Cursor {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Move the cursor forward. Heights at or below the current one are ignored.
    pub fn advance(&self, height: u64, hash: Hex) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if height <= guard.height {
            return false;
        }
        guard.height = height;
        guard.hash = hash;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_next_height_and_lag() {
        let cursor = Cursor::new(500, Hex::default());
        assert_eq!(cursor.next_height(), 501);
        assert_eq!(cursor.lag(628), 128);
        assert_eq!(cursor.lag(400), 0);
    }

    #[test]
    fn advance_moves_forward_only() {
        let shared = SharedCursor::at(100);
        assert!(shared.advance(101, Hex::from_u64(0xb)));
        assert!(!shared.advance(100, Hex::from_u64(0xa)));
        assert_eq!(shared.level(), (101, Hex::from_u64(0xb)));
    }

    #[test]
    fn clones_share_state() {
        let shared = SharedCursor::at(7);
        let reader = shared.clone();
        shared.advance(8, Hex::from_u64(8));
        assert_eq!(reader.height(), 8);
        assert_eq!(reader.snapshot().hash, Hex::from_u64(8));
    }

    #[test]
    fn concurrent_reads_are_monotonic_and_untorn() {
        let shared = SharedCursor::at(0);
        let reader = shared.clone();
        let handle = std::thread::spawn(move || {
            let mut last = 0;
            for _ in 0..10_000 {
                let (height, hash) = reader.level();
                assert!(height >= last, "cursor went backwards");
                if height > 0 {
                    assert_eq!(hash, Hex::from_u64(height), "torn cursor");
                }
                last = height;
            }
        });
        for h in 1..=5_000u64 {
            shared.advance(h, Hex::from_u64(h));
        }
        handle.join().unwrap();
    }
}
