//! # Engine — the single-database façade
//!
//! Ties the [`datalog`] writer/reader and the MVCC [`index`] into one
//! database instance living in its own directory:
//!
//! ```text
//! name/
//!   name.lock     advisory file lock (exclusive while open)
//!   name.data     append-only record log — the source of truth
//!   name.index    checkpoint of the latest live key→offset pairs
//!   name.keeper   meta sidecar: free offset, write counter, key range
//! ```
//!
//! ## Write path
//!
//! Exclusive lock → append the record to `.data` → attach the returned
//! offset as a new version in the index → optional fsync.
//!
//! ## Read path
//!
//! Shared lock → resolve the key's version chain at the read sequence →
//! fetch the value bytes back out of `.data`.
//!
//! ## Open & recovery
//!
//! A clean open loads the `.index` checkpoint and replays only the `.data`
//! tail it does not cover. A missing or stale sidecar (for example after a
//! crash that truncated `.data` past the keeper's recorded offset) falls
//! back to [`DbSingle::simple_repair`], a full recovery scan that tolerates
//! a torn tail.
//!
//! | Module       | Purpose                                             |
//! |--------------|-----------------------------------------------------|
//! | `lib.rs`     | options, errors, `DbSingle`, open/close             |
//! | `meta`       | keeper sidecar encode/decode, atomic writes         |
//! | `checkpoint` | `.index` checkpoint format                          |
//! | `write`      | `put`, `remove`, `explicit_remove`, `write`, `sync` |
//! | `read`       | `get`, snapshots, iterators, size/key-range queries |
//! | `repair`     | tail replay, full rebuild, `repair_db_single`       |

mod checkpoint;
mod meta;
mod read;
mod repair;
mod write;

pub use index::{SeqGenerator, Snapshot};
pub use read::{DbIterator, DbRegexIterator};
pub use repair::repair_db_single;
pub use usr::{RegexJudge, Usr, UsrJudge};

use datalog::LogWriter;
use envio::{AppendableFile, FileLock, RandomAccessFile};
use index::{Index, IndexError};
use meta::Keeper;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Write counter interval at which the keeper sidecar is rewritten.
const KEEPER_SYNC_INTERVAL: u64 = 512;

/// Open-time behavior.
#[derive(Clone, Copy, Debug, Default)]
pub struct Options {
    /// Create the database directory when it does not exist.
    pub create_if_missing: bool,
    /// Fail when the database directory already exists.
    pub error_if_exists: bool,
}

/// Per-write behavior.
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteOptions {
    /// Fsync the data file before returning.
    pub sync: bool,
    /// For batches: try the compressed encoding.
    pub compress: bool,
    /// Total uncompressed payload size; required when `compress` is set —
    /// the compressed encoding is used only when it saves at least 1/8.
    pub uncompress_size: u32,
}

/// Per-read behavior.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadOptions {
    /// Read at this sequence number; `None` reads the latest state.
    pub sequence_number: Option<u64>,
}

/// Error categories of the database surface.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Log(#[from] datalog::LogError),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// One open database instance.
///
/// All operations go through one reader/writer lock: mutations hold it
/// exclusively for log append + index update (+ optional sync), point
/// reads hold it shared, iterators re-acquire it shared per step.
pub struct DbSingle {
    shared: Arc<DbShared>,
    closed: bool,
}

pub(crate) struct DbShared {
    pub(crate) core: RwLock<DbCore>,
    pub(crate) seq_gen: SeqGenerator,
    _lock: FileLock,
    name: PathBuf,
}

pub(crate) struct DbCore {
    pub(crate) writer: LogWriter,
    pub(crate) data_file: Arc<RandomAccessFile>,
    pub(crate) index: Index,
    pub(crate) keeper: Keeper,
    pub(crate) prefix: PathBuf,
}

/// `name/name` + `.ext`, the naming scheme of every database file.
pub(crate) fn sidecar(prefix: &Path, ext: &str) -> PathBuf {
    let mut os = prefix.as_os_str().to_os_string();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

impl DbSingle {
    /// Opens (or creates) the database directory `name`.
    pub fn open<P: AsRef<Path>>(name: P, options: Options) -> Result<Self> {
        let dir = name.as_ref().to_path_buf();
        let base = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DbError::InvalidArgument(format!("bad db path {}", dir.display())))?
            .to_string();
        let prefix = dir.join(base);

        let existed = dir.is_dir();
        if existed && options.error_if_exists {
            return Err(DbError::InvalidArgument(format!(
                "db already exists: {}",
                dir.display()
            )));
        }
        if !existed {
            if !options.create_if_missing {
                return Err(DbError::NotFound(format!(
                    "db not found: {}",
                    dir.display()
                )));
            }
            std::fs::create_dir_all(&dir)?;
        }

        let lock = FileLock::acquire(sidecar(&prefix, "lock"))?;
        let seq_gen = SeqGenerator::new();
        let core = if existed {
            Self::open_existing(&prefix, &seq_gen)?
        } else {
            Self::create_fresh(&prefix, &seq_gen)?
        };
        tracing::debug!(
            db = %dir.display(),
            thread = envio::thread_id(),
            "database opened"
        );

        Ok(Self {
            shared: Arc::new(DbShared {
                core: RwLock::new(core),
                seq_gen,
                _lock: lock,
                name: dir,
            }),
            closed: false,
        })
    }

    fn create_fresh(prefix: &Path, seq_gen: &SeqGenerator) -> Result<DbCore> {
        let data_path = sidecar(prefix, "data");
        let writer = LogWriter::new(AppendableFile::open(&data_path)?);
        let data_file = Arc::new(RandomAccessFile::open(&data_path)?);
        let index = Index::new(seq_gen.clone(), Arc::clone(&data_file));
        let keeper = Keeper::fresh(sidecar(prefix, "keeper"));
        let mut core = DbCore {
            writer,
            data_file,
            index,
            keeper,
            prefix: prefix.to_path_buf(),
        };
        core.write_checkpoint()?;
        Ok(core)
    }

    fn open_existing(prefix: &Path, seq_gen: &SeqGenerator) -> Result<DbCore> {
        let data_path = sidecar(prefix, "data");
        if !data_path.exists() {
            return Err(DbError::NotFound(format!(
                "data file missing: {}",
                data_path.display()
            )));
        }
        let writer = LogWriter::new(AppendableFile::open(&data_path)?);
        let data_file = Arc::new(RandomAccessFile::open(&data_path)?);

        let index_path = sidecar(prefix, "index");
        let keeper_path = sidecar(prefix, "keeper");
        if !index_path.exists() || !keeper_path.exists() {
            return repair::rebuild(prefix, writer, data_file, seq_gen);
        }

        match repair::open_checkpointed(prefix, writer, data_file, seq_gen) {
            Ok(core) => Ok(core),
            Err(recover) => {
                tracing::warn!(error = %recover.cause, "checkpoint unusable, rebuilding");
                repair::rebuild(prefix, recover.writer, recover.data_file, seq_gen)
            }
        }
    }

    /// Directory this database lives in.
    #[must_use]
    pub fn name(&self) -> &Path {
        &self.shared.name
    }

    /// Rebuilds the in-memory index, `.index` and `.keeper` from a full
    /// recovery scan of `.data`. Corruption is logged and skipped; a torn
    /// tail is dropped.
    pub fn simple_repair(&self) -> Result<()> {
        let mut core = self.shared.core.write();
        core.rebuild_in_place(&self.shared.seq_gen)
    }

    /// Writes the `.index` checkpoint and keeper, then releases the
    /// instance. [`Drop`] does the same on a best-effort basis.
    pub fn close(mut self) -> Result<()> {
        self.do_close()
    }

    fn do_close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut core = self.shared.core.write();
        core.write_checkpoint()
    }
}

impl Drop for DbSingle {
    fn drop(&mut self) {
        if let Err(err) = self.do_close() {
            tracing::warn!(error = %err, "checkpoint on close failed; next open will repair");
        }
    }
}

impl std::fmt::Debug for DbSingle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbSingle")
            .field("name", &self.shared.name)
            .field("seq", &self.shared.seq_gen.current())
            .finish()
    }
}

impl DbCore {
    /// Persists the current state: `.index` checkpoint covering everything
    /// written so far, then the keeper.
    pub(crate) fn write_checkpoint(&mut self) -> Result<()> {
        let covered = self.writer.calc_write_pos();
        let mut pairs = Vec::new();
        self.index
            .for_each_latest(|key, offset| pairs.push((key.to_vec(), offset)));
        checkpoint::save(&sidecar(&self.prefix, "index"), covered, &pairs)?;
        self.keeper.offset_to_empty = covered;
        self.keeper.save()?;
        tracing::debug!(covered, keys = pairs.len(), "checkpoint written");
        Ok(())
    }

    /// Bumps the write counter, rewriting the keeper at a fixed cadence so
    /// a crash loses at most one interval of meta updates.
    pub(crate) fn note_write(&mut self) -> Result<()> {
        self.keeper.counter += 1;
        if self.keeper.counter % KEEPER_SYNC_INTERVAL == 0 {
            self.keeper.offset_to_empty = self.writer.calc_write_pos();
            self.keeper.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
