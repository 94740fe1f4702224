//! # Index — MVCC over a bit-degrade tree
//!
//! Maps keys to offsets in the data file through an in-memory crit-bit
//! trie with fixed fanout (the [`tree`] module), layered with multi-version
//! concurrency control:
//!
//! - every key carries a chain of `(sequence, offset)` versions, newest
//!   first; a [`DISK_NULL`] offset is a tombstone;
//! - reads resolve the newest version at or below their sequence number;
//! - while any iterator is live, structural trie mutations are deferred
//!   onto a pending list so the iterator's descent state stays valid, and
//!   drained once the last iterator is gone.
//!
//! Offsets resolve to values through the data log, so lookups return the
//! stored bytes directly. The index is not internally synchronized; the
//! database façade serializes access through its reader/writer lock.

mod iter;
mod seq;
mod tree;

pub use iter::{RegexIter, TreeIter};
pub use seq::{SeqGenerator, Snapshot};
pub use tree::{zero_ext_cmp, zero_ext_eq, Leaf};

use datalog::LogError;
use envio::RandomAccessFile;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tree::BdTree;

/// Slots per tree node.
pub(crate) const FANOUT: usize = 32;

/// Sentinel offset: "no such position"; marks tombstone versions.
pub const DISK_NULL: u32 = u32::MAX;

/// One entry of a version chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub seq: u64,
    pub offset: u32,
}

impl Version {
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.offset == DISK_NULL
    }
}

/// Errors surfaced by lookups that dereference the data file.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Log(#[from] LogError),

    /// The index pointed at a record that does not contain the key — the
    /// index and the data file disagree.
    #[error("record at offset {offset} does not contain the looked-up key")]
    KeyMismatch { offset: u32 },
}

/// A structural mutation deferred while iterators are live.
enum Pending {
    /// A version for a key that has no leaf yet (or a further version for
    /// such a key).
    Insert { key: Vec<u8>, version: Version },
    /// A leaf whose chain became all-tombstone and can be reclaimed.
    Reclaim { key: Vec<u8> },
}

/// The MVCC index of one database instance.
pub struct Index {
    tree: BdTree,
    pending: Vec<Pending>,
    operating_iters: Arc<AtomicUsize>,
    seq_gen: SeqGenerator,
    data_file: Arc<RandomAccessFile>,
}

impl Index {
    pub fn new(seq_gen: SeqGenerator, data_file: Arc<RandomAccessFile>) -> Self {
        Self {
            tree: BdTree::new(),
            pending: Vec::new(),
            operating_iters: Arc::new(AtomicUsize::new(0)),
            seq_gen,
            data_file,
        }
    }

    #[must_use]
    pub fn seq_gen(&self) -> &SeqGenerator {
        &self.seq_gen
    }

    pub(crate) fn data_file(&self) -> &RandomAccessFile {
        &self.data_file
    }

    pub(crate) fn tree(&self) -> &BdTree {
        &self.tree
    }

    fn iters_active(&self) -> bool {
        self.operating_iters.load(Ordering::Acquire) > 0
    }

    pub(crate) fn iter_guard(&self) -> IterGuard {
        IterGuard::new(&self.operating_iters)
    }

    /// Attaches a new version of `key` pointing at `offset`; returns the
    /// sequence number it was tagged with.
    pub fn insert(&mut self, key: &[u8], offset: u32) -> u64 {
        self.try_apply_pending();
        let seq = self.seq_gen.next_sequence();
        self.put_version(key, Version { seq, offset });
        seq
    }

    /// Attaches a tombstone version of `key`; the leaf itself is reclaimed
    /// once no snapshot or iterator can still observe an older version.
    pub fn remove(&mut self, key: &[u8]) -> u64 {
        self.try_apply_pending();
        let seq = self.seq_gen.next_sequence();
        let tomb = Version {
            seq,
            offset: DISK_NULL,
        };
        let oldest = self.seq_gen.oldest_snapshot_seq();
        if let Some(leaf) = self.tree.find_leaf_mut(key) {
            leaf.versions.insert(0, tomb);
            prune_chain(&mut leaf.versions, oldest);
            if leaf.versions.iter().all(Version::is_tombstone) {
                if self.iters_active() {
                    self.pending.push(Pending::Reclaim { key: key.to_vec() });
                } else {
                    self.tree.remove_leaf(key);
                }
            }
        } else if self.pending_has(key) {
            self.pending.push(Pending::Insert {
                key: key.to_vec(),
                version: tomb,
            });
        }
        seq
    }

    /// Resolves `key` at `seq` and reads the stored value from the data
    /// file. `Ok(None)` for absent keys and tombstones.
    pub fn find(&self, key: &[u8], seq: u64) -> Result<Option<Vec<u8>>, IndexError> {
        match self.find_offset(key, seq) {
            Some(offset) => self.value_at(offset, key),
            None => Ok(None),
        }
    }

    /// The newest non-tombstone offset of `key` at or below `seq`.
    #[must_use]
    pub fn find_offset(&self, key: &[u8], seq: u64) -> Option<u32> {
        if let Some(leaf) = self.tree.find_leaf(key) {
            resolve(&leaf.versions, seq)
        } else {
            resolve(&self.pending_versions(key), seq)
        }
    }

    /// Applies deferred structural mutations if no iterator is live.
    pub fn try_apply_pending(&mut self) {
        if self.pending.is_empty() || self.iters_active() {
            return;
        }
        let ops = std::mem::take(&mut self.pending);
        tracing::debug!(ops = ops.len(), "applying deferred index mutations");
        for op in ops {
            match op {
                Pending::Insert { key, version } => self.put_version(&key, version),
                Pending::Reclaim { key } => self.reclaim(&key),
            }
        }
    }

    /// Calls `f` with every key and its newest live offset, in tree order
    /// for stored keys followed by the pending ones.
    pub fn for_each_latest(&self, mut f: impl FnMut(&[u8], u32)) {
        self.tree.for_each_leaf(&mut |leaf| {
            if let Some(offset) = resolve(&leaf.versions, u64::MAX) {
                f(&leaf.key, offset);
            }
        });
        let mut newest: BTreeMap<&[u8], Version> = BTreeMap::new();
        for op in &self.pending {
            if let Pending::Insert { key, version } = op {
                newest.insert(key.as_slice(), *version);
            }
        }
        for (key, version) in newest {
            if !version.is_tombstone() {
                f(key, version.offset);
            }
        }
    }

    /// Number of distinct keys with a live (non-tombstone) newest version.
    #[must_use]
    pub fn live_keys(&self) -> usize {
        let mut count = 0;
        self.for_each_latest(|_, _| count += 1);
        count
    }

    fn put_version(&mut self, key: &[u8], version: Version) {
        let oldest = self.seq_gen.oldest_snapshot_seq();
        if let Some(leaf) = self.tree.find_leaf_mut(key) {
            leaf.versions.insert(0, version);
            prune_chain(&mut leaf.versions, oldest);
        } else if self.iters_active() {
            self.pending.push(Pending::Insert {
                key: key.to_vec(),
                version,
            });
        } else {
            self.tree.insert_leaf(Leaf::new(key, version));
        }
    }

    fn reclaim(&mut self, key: &[u8]) {
        let oldest = self.seq_gen.oldest_snapshot_seq();
        let dead = match self.tree.find_leaf_mut(key) {
            Some(leaf) => {
                prune_chain(&mut leaf.versions, oldest);
                leaf.versions.iter().all(Version::is_tombstone)
            }
            None => false,
        };
        if dead {
            self.tree.remove_leaf(key);
        }
    }

    fn pending_has(&self, key: &[u8]) -> bool {
        self.pending.iter().any(|op| match op {
            Pending::Insert { key: k, .. } => zero_ext_eq(k, key),
            Pending::Reclaim { .. } => false,
        })
    }

    /// Versions queued for `key`, newest first.
    fn pending_versions(&self, key: &[u8]) -> Vec<Version> {
        self.pending
            .iter()
            .rev()
            .filter_map(|op| match op {
                Pending::Insert { key: k, version } if zero_ext_eq(k, key) => Some(*version),
                _ => None,
            })
            .collect()
    }

    /// Snapshot of the pending inserts grouped per key, chains newest
    /// first, for iterator merging.
    pub(crate) fn pending_chains(&self) -> Vec<(Vec<u8>, Vec<Version>)> {
        let mut chains: Vec<(Vec<u8>, Vec<Version>)> = Vec::new();
        for op in &self.pending {
            if let Pending::Insert { key, version } = op {
                match chains.iter_mut().find(|(k, _)| zero_ext_eq(k, key)) {
                    Some((_, versions)) => versions.insert(0, *version),
                    None => chains.push((key.clone(), vec![*version])),
                }
            }
        }
        chains.sort_by(|(a, _), (b, _)| zero_ext_cmp(a, b));
        chains
    }

    /// Reads the value of `key` out of the record at `offset`.
    ///
    /// A record flagged as a deletion reads as absent — this is how an
    /// explicitly-indexed delete record behaves like a tombstone.
    pub(crate) fn value_at(
        &self,
        offset: u32,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, IndexError> {
        let entries = datalog::read_record(&self.data_file, offset)?;
        for (k, value, del) in entries {
            if zero_ext_eq(&k, key) {
                return Ok(if del { None } else { Some(value) });
            }
        }
        Err(IndexError::KeyMismatch { offset })
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        self.tree.check_invariants();
    }
}

/// Newest non-tombstone offset at or below `seq`, if any.
pub(crate) fn resolve(versions: &[Version], seq: u64) -> Option<u32> {
    versions
        .iter()
        .find(|v| v.seq <= seq)
        .and_then(|v| (!v.is_tombstone()).then_some(v.offset))
}

/// Drops chain versions no live snapshot can still observe; the newest
/// version always survives.
fn prune_chain(versions: &mut Vec<Version>, oldest_snapshot: Option<u64>) {
    let keep = match oldest_snapshot {
        None => 1,
        Some(s) => match versions.iter().position(|v| v.seq <= s) {
            Some(pos) => pos + 1,
            None => versions.len(),
        },
    };
    versions.truncate(keep.max(1));
}

/// Lifetime of one live iterator: while any guard exists, structural tree
/// mutations are deferred.
pub(crate) struct IterGuard {
    counter: Arc<AtomicUsize>,
}

impl IterGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for IterGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests;
