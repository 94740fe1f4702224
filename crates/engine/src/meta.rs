//! The keeper sidecar: a small fixed-layout meta record.
//!
//! ```text
//! [offset_to_empty: u32][counter: u64][smallest_len: u16][largest_len: u16]
//! [smallest key bytes][largest key bytes]
//! ```
//!
//! Keys are non-empty, so a zero length means "no hint yet". The file is
//! rewritten atomically: temp file, fsync, rename.

use crate::{DbError, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use index::zero_ext_cmp;
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

const HEADER: usize = 4 + 8 + 2 + 2;

pub(crate) struct Keeper {
    path: PathBuf,
    /// Next free offset in the data file as of the last save.
    pub offset_to_empty: u32,
    /// Total mutations accepted over the database's lifetime.
    pub counter: u64,
    pub smallest: Option<Vec<u8>>,
    pub largest: Option<Vec<u8>>,
}

impl Keeper {
    pub fn fresh(path: PathBuf) -> Self {
        Self {
            path,
            offset_to_empty: 0,
            counter: 0,
            smallest: None,
            largest: None,
        }
    }

    pub fn load(path: PathBuf) -> Result<Self> {
        let raw = fs::read(&path)?;
        if raw.len() < HEADER {
            return Err(DbError::Corruption(format!(
                "keeper too short: {}",
                path.display()
            )));
        }
        let offset_to_empty = LittleEndian::read_u32(&raw[0..4]);
        let counter = LittleEndian::read_u64(&raw[4..12]);
        let smallest_len = LittleEndian::read_u16(&raw[12..14]) as usize;
        let largest_len = LittleEndian::read_u16(&raw[14..16]) as usize;
        if raw.len() != HEADER + smallest_len + largest_len {
            return Err(DbError::Corruption(format!(
                "keeper length mismatch: {}",
                path.display()
            )));
        }
        let smallest = (smallest_len > 0).then(|| raw[HEADER..HEADER + smallest_len].to_vec());
        let largest =
            (largest_len > 0).then(|| raw[HEADER + smallest_len..].to_vec());
        Ok(Self {
            path,
            offset_to_empty,
            counter,
            smallest,
            largest,
        })
    }

    pub fn save(&self) -> Result<()> {
        let mut buf = Vec::with_capacity(
            HEADER
                + self.smallest.as_ref().map_or(0, Vec::len)
                + self.largest.as_ref().map_or(0, Vec::len),
        );
        buf.write_u32::<LittleEndian>(self.offset_to_empty)?;
        buf.write_u64::<LittleEndian>(self.counter)?;
        buf.write_u16::<LittleEndian>(self.smallest.as_ref().map_or(0, Vec::len) as u16)?;
        buf.write_u16::<LittleEndian>(self.largest.as_ref().map_or(0, Vec::len) as u16)?;
        if let Some(smallest) = &self.smallest {
            buf.extend_from_slice(smallest);
        }
        if let Some(largest) = &self.largest {
            buf.extend_from_slice(largest);
        }
        write_atomically(&self.path, &buf)
    }

    /// Extends the `[smallest, largest]` hint to cover `key`.
    pub fn update_key_range(&mut self, key: &[u8]) {
        match &self.smallest {
            Some(smallest) if zero_ext_cmp(key, smallest) != Ordering::Less => {}
            _ => self.smallest = Some(key.to_vec()),
        }
        match &self.largest {
            Some(largest) if zero_ext_cmp(key, largest) != Ordering::Greater => {}
            _ => self.largest = Some(key.to_vec()),
        }
    }
}

/// Temp-file + fsync + rename, so the target is never half-written.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
