//! # EnvIO — file-system primitives
//!
//! The only assumptions the storage engine makes about the operating system
//! live here: an append-only file, a positional-read file, and an advisory
//! file lock. Everything is a thin wrapper over `std::fs`; the lock uses
//! `fs2` so that two processes (or two handles in one process) cannot open
//! the same database concurrently.
//!
//! Positional reads never touch a shared cursor, so a [`RandomAccessFile`]
//! can be shared freely across threads behind an `Arc`.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only file handle.
///
/// Tracks its own logical length so callers can compute write offsets
/// without a metadata round-trip per append.
pub struct AppendableFile {
    file: File,
    length: u64,
}

impl AppendableFile {
    /// Opens (or creates) `path` in append mode.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let length = file.metadata()?.len();
        Ok(Self { file, length })
    }

    /// Appends `data` at the end of the file.
    pub fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.length += data.len() as u64;
        Ok(())
    }

    /// Forces buffered data to stable storage (`fsync`).
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }

    /// Current logical length in bytes.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }
}

/// Read-only file handle supporting positional reads.
pub struct RandomAccessFile {
    file: File,
}

impl RandomAccessFile {
    /// Opens `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file })
    }

    /// Reads into `buf` starting at `offset`, returning the number of bytes
    /// read. Short reads happen only at end of file.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.pread_once(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                break;
            }
            done += n;
        }
        Ok(done)
    }

    /// Reads up to `len` bytes starting at `offset`. The returned buffer is
    /// shorter than `len` only at end of file.
    pub fn pread(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = self.read_at(&mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Current file length in bytes.
    pub fn length(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    #[cfg(unix)]
    fn pread_once(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(&self.file, buf, offset)
    }

    #[cfg(windows)]
    fn pread_once(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(&self.file, buf, offset)
    }
}

/// Exclusive advisory file lock, held until drop.
///
/// Acquisition is non-blocking: a second `acquire` on the same path fails
/// immediately instead of waiting for the first holder.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Creates the lock file if missing and takes an exclusive lock on it.
    pub fn acquire<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()?;
        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Path of the underlying lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Stable identifier of the calling thread, for trace output.
#[must_use]
pub fn thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests;
