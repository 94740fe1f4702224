//! Write path: `put`, `remove`, `explicit_remove`, batched `write`, and
//! `sync`. Every mutation appends to the data log before touching the
//! index, under the exclusive lock.

use crate::{DbError, DbSingle, Result, WriteOptions};
use datalog::LogWriter;

impl DbSingle {
    /// Inserts or overwrites one key.
    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        let mut core = self.shared.core.write();
        let pos = core.writer.calc_write_pos();
        core.writer.add_record(&LogWriter::make_record(key, value))?;
        core.index.insert(key, pos);
        core.keeper.update_key_range(key);
        core.note_write()?;
        if options.sync {
            core.writer.sync()?;
        }
        Ok(())
    }

    /// Deletes one key: appends a delete record and tombstones the index
    /// entry. Earlier versions stay visible to older snapshots.
    pub fn remove(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        check_key(key)?;
        let mut core = self.shared.core.write();
        core.writer
            .add_del_record(&LogWriter::make_record(key, b""))?;
        core.index.remove(key);
        core.note_write()?;
        if options.sync {
            core.writer.sync()?;
        }
        Ok(())
    }

    /// Deletes one key but keeps the delete record's offset in the index,
    /// so a later rebuild of downstream state sees the deletion explicitly
    /// rather than an absent key. The record carries the EXPLICIT flag, so
    /// a recovery scan re-indexes it the same way.
    pub fn explicit_remove(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        check_key(key)?;
        let mut core = self.shared.core.write();
        let pos = core.writer.calc_write_pos();
        core.writer
            .add_explicit_del_record(&LogWriter::make_record(key, b""))?;
        core.index.insert(key, pos);
        core.keeper.update_key_range(key);
        core.note_write()?;
        if options.sync {
            core.writer.sync()?;
        }
        Ok(())
    }

    /// Writes a batch atomically with respect to readers.
    ///
    /// With `options.compress`, the whole batch is encoded as one
    /// compressed record — sharing a single offset across all keys — when
    /// that encoding is at most 7/8 of `options.uncompress_size`;
    /// otherwise every pair gets its own plain record.
    pub fn write(&self, options: &WriteOptions, kvs: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        for (key, _) in kvs {
            check_key(key)?;
        }
        let mut core = self.shared.core.write();

        if options.compress && !kvs.is_empty() {
            debug_assert!(options.uncompress_size != 0, "compress requires uncompress_size");
            let pos = core.writer.calc_write_pos();
            let bin = LogWriter::make_compress_record(kvs)?;
            if bin.len() as u64 <= u64::from(options.uncompress_size) / 8 * 7 {
                core.writer.add_compress_record(&bin)?;
                for (key, _) in kvs {
                    core.index.insert(key, pos);
                    core.keeper.update_key_range(key);
                }
                core.note_write()?;
                if options.sync {
                    core.writer.sync()?;
                }
                return Ok(());
            }
        }

        let records: Vec<Vec<u8>> = kvs
            .iter()
            .map(|(key, value)| LogWriter::make_record(key, value))
            .collect();
        let offsets = core.writer.add_records(&records)?;
        for ((key, _), offset) in kvs.iter().zip(offsets) {
            core.index.insert(key, offset);
            core.keeper.update_key_range(key);
        }
        core.note_write()?;
        if options.sync {
            core.writer.sync()?;
        }
        Ok(())
    }

    /// Forces everything appended so far to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.shared.core.write().writer.sync()?;
        Ok(())
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(DbError::InvalidArgument("empty key".to_string()));
    }
    Ok(())
}
