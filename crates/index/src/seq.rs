//! Monotonic sequence numbers and pinned snapshots.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-database source of strictly monotonic sequence numbers.
///
/// Cloning is cheap and shares the counter. The generator also tracks the
/// multiset of sequence numbers pinned by live [`Snapshot`]s, which bounds
/// how far version chains may be trimmed.
#[derive(Clone)]
pub struct SeqGenerator {
    inner: Arc<SeqInner>,
}

struct SeqInner {
    next: AtomicU64,
    pinned: Mutex<BTreeMap<u64, usize>>,
}

impl SeqGenerator {
    /// Starts issuing at sequence number 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SeqInner {
                next: AtomicU64::new(1),
                pinned: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Returns the next sequence number and advances the counter.
    pub fn next_sequence(&self) -> u64 {
        self.inner.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The most recently issued sequence number (0 before the first).
    #[must_use]
    pub fn current(&self) -> u64 {
        self.inner.next.load(Ordering::Relaxed) - 1
    }

    /// Pins the current sequence number until the snapshot is dropped.
    #[must_use]
    pub fn make_snapshot(&self) -> Snapshot {
        let seq = self.current();
        *self.inner.pinned.lock().entry(seq).or_insert(0) += 1;
        Snapshot {
            seq,
            inner: Arc::clone(&self.inner),
        }
    }

    /// The smallest pinned sequence number, if any snapshot is live.
    #[must_use]
    pub fn oldest_snapshot_seq(&self) -> Option<u64> {
        self.inner.pinned.lock().keys().next().copied()
    }
}

impl Default for SeqGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// A consistent read point: reads at this snapshot observe exactly the
/// writes with a sequence number at or below it.
pub struct Snapshot {
    seq: u64,
    inner: Arc<SeqInner>,
}

impl Snapshot {
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.seq
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        let mut pinned = self.inner.pinned.lock();
        if let Some(count) = pinned.get_mut(&self.seq) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&self.seq);
            }
        }
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").field("seq", &self.seq).finish()
    }
}
