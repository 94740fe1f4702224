//! Open-time recovery: checkpointed opens with tail replay, and the full
//! rebuild path for missing or stale sidecars.

use crate::{checkpoint, sidecar, DbCore, DbError, DbSingle, Options, Result};
use datalog::{EntryKind, LoggingReporter, LogWriter, RecoveryIterator};
use envio::RandomAccessFile;
use index::{Index, SeqGenerator};
use std::path::Path;
use std::sync::Arc;

use crate::meta::Keeper;

/// A clean open that failed validation, handing the file handles back so
/// the caller can fall through to [`rebuild`].
pub(crate) struct RecoverableOpen {
    pub(crate) writer: LogWriter,
    pub(crate) data_file: Arc<RandomAccessFile>,
    pub(crate) cause: DbError,
}

/// Loads the `.index` checkpoint and keeper, then replays the `.data`
/// tail the checkpoint does not cover.
pub(crate) fn open_checkpointed(
    prefix: &Path,
    writer: LogWriter,
    data_file: Arc<RandomAccessFile>,
    seq_gen: &SeqGenerator,
) -> std::result::Result<DbCore, RecoverableOpen> {
    match try_open_checkpointed(prefix, &writer, &data_file, seq_gen) {
        Ok((index, keeper)) => Ok(DbCore {
            writer,
            data_file,
            index,
            keeper,
            prefix: prefix.to_path_buf(),
        }),
        Err(cause) => Err(RecoverableOpen {
            writer,
            data_file,
            cause,
        }),
    }
}

fn try_open_checkpointed(
    prefix: &Path,
    writer: &LogWriter,
    data_file: &Arc<RandomAccessFile>,
    seq_gen: &SeqGenerator,
) -> Result<(Index, Keeper)> {
    let mut keeper = Keeper::load(sidecar(prefix, "keeper"))?;
    let data_len = writer.length();
    if u64::from(keeper.offset_to_empty) > data_len {
        return Err(DbError::Corruption(format!(
            "keeper records offset {} beyond data length {}",
            keeper.offset_to_empty, data_len
        )));
    }

    let (covered, pairs) = checkpoint::load(&sidecar(prefix, "index"))?;
    if u64::from(covered) > data_len {
        return Err(DbError::Corruption(format!(
            "checkpoint covers offset {covered} beyond data length {data_len}"
        )));
    }

    let mut index = Index::new(seq_gen.clone(), Arc::clone(data_file));
    for (key, offset) in &pairs {
        index.insert(key, *offset);
    }

    let mut replayed = 0u64;
    for entry in RecoveryIterator::from_offset(data_file, covered, LoggingReporter)? {
        let (key, offset, kind) = entry?;
        match kind {
            EntryKind::Del => {
                index.remove(&key);
            }
            // explicit deletes stay indexed at their own offset, exactly
            // as the live write path left them
            EntryKind::Put | EntryKind::ExplicitDel => {
                index.insert(&key, offset);
                keeper.update_key_range(&key);
            }
        }
        replayed += 1;
    }
    if replayed > 0 {
        tracing::debug!(replayed, from = covered, "replayed log tail");
    }
    Ok((index, keeper))
}

/// Rebuilds the index and both sidecars from a full scan of `.data`.
pub(crate) fn rebuild(
    prefix: &Path,
    writer: LogWriter,
    data_file: Arc<RandomAccessFile>,
    seq_gen: &SeqGenerator,
) -> Result<DbCore> {
    tracing::warn!(db = %prefix.display(), "rebuilding index and keeper from the data file");
    let (index, keeper) = scan_data(prefix, &data_file, seq_gen)?;
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

fn scan_data(
    prefix: &Path,
    data_file: &Arc<RandomAccessFile>,
    seq_gen: &SeqGenerator,
) -> Result<(Index, Keeper)> {
    let mut index = Index::new(seq_gen.clone(), Arc::clone(data_file));
    let mut keeper = Keeper::fresh(sidecar(prefix, "keeper"));
    for entry in RecoveryIterator::new(data_file, LoggingReporter)? {
        let (key, offset, kind) = entry?;
        keeper.counter += 1;
        match kind {
            EntryKind::Del => {
                index.remove(&key);
            }
            EntryKind::Put | EntryKind::ExplicitDel => {
                index.insert(&key, offset);
                keeper.update_key_range(&key);
            }
        }
    }
    Ok((index, keeper))
}

impl DbCore {
    /// In-place variant of [`rebuild`] for an already-open database.
    pub(crate) fn rebuild_in_place(&mut self, seq_gen: &SeqGenerator) -> Result<()> {
        let prefix = self.prefix.clone();
        let (index, keeper) = scan_data(&prefix, &self.data_file, seq_gen)?;
        self.index = index;
        self.keeper = keeper;
        self.write_checkpoint()
    }
}

/// Repairs the database at `name` from its data file alone.
///
/// Returns `Ok(false)` when there is nothing to repair (no directory or no
/// data file); otherwise rebuilds `.index` and `.keeper` and returns
/// `Ok(true)`.
pub fn repair_db_single<P: AsRef<Path>>(name: P) -> Result<bool> {
    let dir = name.as_ref();
    if !dir.is_dir() {
        return Ok(false);
    }
    let Some(base) = dir.file_name().and_then(|n| n.to_str()) else {
        return Ok(false);
    };
    if !sidecar(&dir.join(base), "data").exists() {
        return Ok(false);
    }

    let db = DbSingle::open(dir, Options::default())?;
    db.simple_repair()?;
    db.close()?;
    Ok(true)
}
