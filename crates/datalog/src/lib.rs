//! # Datalog — append-only record log
//!
//! The persistent heart of the store: every insert, delete and batch is one
//! logical record appended to a single growing `.data` file. Records are
//! split into **fragments** so that no fragment ever crosses a fixed-size
//! physical block boundary, which lets recovery resynchronize at block
//! granularity after corruption.
//!
//! ## Fragment format
//!
//! ```text
//! [crc32: u32 LE][length: u16 LE][type: u8][payload ...]
//! ```
//!
//! `crc32` covers the type byte followed by the payload. `type` encodes the
//! fragment position in bits 0..1 (`FULL`, `FIRST`, `MIDDLE`, `LAST`), the
//! DEL flag in bit 2, the COMPRESS flag in bit 3, and the EXPLICIT flag in
//! bit 4 — a deletion whose own record offset stays indexed, so a rebuild
//! of the index keeps seeing the delete rather than an absent key. A block
//! tail shorter than the 7-byte header is zero-padded.
//!
//! ## Logical payloads
//!
//! - Plain: `varint(|K|) ‖ K ‖ V`; the DEL flag of the trailing fragment
//!   marks deletions.
//! - Compressed batch: DEFLATE over `(varint(|K|) ‖ K ‖ varint(|V|+1) ‖ V ‖
//!   meta)*` where `meta` is one trailing byte per pair (non-zero = delete).
//!   Every pair of the batch shares the record's start offset.
//!
//! ## Recovery
//!
//! [`RecoveryIterator`] scans the whole file, yielding `(key, offset,
//! kind)` per logical entry — the [`EntryKind`] tells a replaying index
//! whether to insert the offset, drop the key, or insert the deletion's
//! own offset. A truncated record at the tail (a torn write) ends the scan
//! silently; earlier corruption goes through a [`Reporter`] — the default
//! re-raises, [`LoggingReporter`] warns and resynchronizes at the next
//! block.

mod reader;
mod writer;

pub use reader::{
    read_record, DefaultReporter, LoggingReporter, RecoveryIterator, Reporter,
};
pub use writer::LogWriter;

use std::io;
use thiserror::Error;

/// Physical block size; fragments never cross a block boundary.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Size of the per-fragment header.
pub const HEADER_SIZE: usize = 7;

pub(crate) const POS_FULL: u8 = 0;
pub(crate) const POS_FIRST: u8 = 1;
pub(crate) const POS_MIDDLE: u8 = 2;
pub(crate) const POS_LAST: u8 = 3;
pub(crate) const FLAG_DEL: u8 = 0x04;
pub(crate) const FLAG_COMPRESS: u8 = 0x08;
pub(crate) const FLAG_EXPLICIT: u8 = 0x10;

/// How one recovered logical entry affects an index replaying the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Index the record's offset for the key.
    Put,
    /// Drop the key (a plain deletion).
    Del,
    /// A deletion whose own offset must stay indexed, so rebuilt state
    /// keeps seeing the delete explicitly.
    ExplicitDel,
}

/// Errors from encoding, decoding or scanning the log.
#[derive(Debug, Error)]
pub enum LogError {
    /// An underlying file operation failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A fragment or payload failed validation mid-file.
    #[error("corrupt record at offset {offset}: {reason}")]
    Corrupt { offset: u32, reason: &'static str },

    /// A record ran past the end of the file (torn tail).
    #[error("truncated record at offset {offset}")]
    Truncated { offset: u32 },

    /// The data file has grown past 32-bit addressing.
    #[error("data file full (offsets exceed u32)")]
    FileFull,
}

/// CRC over the type byte followed by the payload.
pub(crate) fn record_crc(ty: u8, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[ty]);
    hasher.update(payload);
    hasher.finalize()
}

/// Appends `v` to `buf` as a LEB128 varint.
pub fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Consumes a LEB128 varint from the front of `input`.
pub fn take_uvarint(input: &mut &[u8]) -> Option<u64> {
    let mut v = 0u64;
    let mut shift = 0u32;
    loop {
        let (&b, rest) = input.split_first()?;
        *input = rest;
        if shift >= 63 && b > 1 {
            return None;
        }
        v |= u64::from(b & 0x7F) << shift;
        if b & 0x80 == 0 {
            return Some(v);
        }
        shift += 7;
    }
}

#[cfg(test)]
mod tests;
