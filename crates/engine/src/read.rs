//! Read path: point lookups, snapshots, iterators and meta queries.

use crate::{sidecar, DbShared, DbSingle, ReadOptions, Result, Snapshot};
use index::{RegexIter, TreeIter};
use std::sync::Arc;
use usr::UsrJudge;

impl DbSingle {
    /// Looks up `key`, by default at the latest state; `Ok(None)` when the
    /// key is absent or deleted at the read sequence.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let core = self.shared.core.read();
        let seq = options.sequence_number.unwrap_or(u64::MAX);
        Ok(core.index.find(key, seq)?)
    }

    /// Pins the current sequence number as a consistent read point.
    ///
    /// Takes the exclusive lock to linearize against in-flight writes: a
    /// snapshot observes a write entirely or not at all.
    pub fn make_snapshot(&self) -> Snapshot {
        let _core = self.shared.core.write();
        self.shared.seq_gen.make_snapshot()
    }

    /// In-order iterator over all live keys, optionally at a snapshot.
    pub fn make_iterator(&self, snapshot: Option<Snapshot>) -> DbIterator {
        let core = self.shared.core.read();
        let seq = snapshot
            .as_ref()
            .map_or_else(|| self.shared.seq_gen.current(), Snapshot::sequence_number);
        let state = TreeIter::new(&core.index, seq);
        drop(core);
        DbIterator {
            shared: Arc::clone(&self.shared),
            state,
            _snapshot: snapshot,
        }
    }

    /// Iterator over the keys matching `judge`, in tree order, pruning
    /// subtrees the judge rules out on partial bits.
    pub fn make_regex_iterator(
        &self,
        judge: Arc<dyn UsrJudge + Send + Sync>,
        snapshot: Option<Snapshot>,
    ) -> DbRegexIterator {
        self.regex_iterator(judge, snapshot, false)
    }

    /// Reversed-order variant of [`DbSingle::make_regex_iterator`].
    pub fn make_regex_reversed_iterator(
        &self,
        judge: Arc<dyn UsrJudge + Send + Sync>,
        snapshot: Option<Snapshot>,
    ) -> DbRegexIterator {
        self.regex_iterator(judge, snapshot, true)
    }

    fn regex_iterator(
        &self,
        judge: Arc<dyn UsrJudge + Send + Sync>,
        snapshot: Option<Snapshot>,
        reversed: bool,
    ) -> DbRegexIterator {
        let core = self.shared.core.read();
        let seq = snapshot
            .as_ref()
            .map_or_else(|| self.shared.seq_gen.current(), Snapshot::sequence_number);
        let state = RegexIter::new(&core.index, judge, seq, reversed);
        drop(core);
        DbRegexIterator {
            shared: Arc::clone(&self.shared),
            state,
            _snapshot: snapshot,
        }
    }

    /// Smallest key ever inserted, per the keeper's hint.
    pub fn smallest_key(&self) -> Option<Vec<u8>> {
        self.shared.core.read().keeper.smallest.clone()
    }

    /// Largest key ever inserted, per the keeper's hint.
    pub fn largest_key(&self) -> Option<Vec<u8>> {
        self.shared.core.read().keeper.largest.clone()
    }

    /// Physical size of the data log.
    pub fn data_file_size(&self) -> u64 {
        self.shared.core.read().writer.length()
    }

    /// Physical size of the `.index` checkpoint as of the last write.
    pub fn index_file_size(&self) -> Result<u64> {
        let core = self.shared.core.read();
        Ok(std::fs::metadata(sidecar(&core.prefix, "index"))?.len())
    }
}

/// Engine-level plain iterator.
///
/// Holds no lock between steps: each `next` re-acquires the shared lock.
/// Creating it registers with the index so structural mutations defer
/// until every iterator is dropped.
pub struct DbIterator {
    pub(crate) shared: Arc<DbShared>,
    pub(crate) state: TreeIter,
    pub(crate) _snapshot: Option<Snapshot>,
}

impl DbIterator {
    /// Repositions at the first key not less than `target`.
    pub fn seek(&mut self, target: &[u8]) {
        let core = self.shared.core.read();
        self.state.seek(&core.index, target);
    }
}

impl Iterator for DbIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let core = self.shared.core.read();
        self.state
            .next(&core.index)
            .map_err(Into::into)
            .transpose()
    }
}

/// Engine-level regex iterator; same locking discipline as [`DbIterator`].
pub struct DbRegexIterator {
    pub(crate) shared: Arc<DbShared>,
    pub(crate) state: RegexIter,
    pub(crate) _snapshot: Option<Snapshot>,
}

impl Iterator for DbRegexIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let core = self.shared.core.read();
        self.state
            .next(&core.index)
            .map_err(Into::into)
            .transpose()
    }
}
