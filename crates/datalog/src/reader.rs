//! Log reader: point decode of one logical record, and the full-file
//! recovery scan.

use crate::{
    record_crc, take_uvarint, EntryKind, LogError, BLOCK_SIZE, FLAG_COMPRESS, FLAG_DEL,
    FLAG_EXPLICIT, HEADER_SIZE, POS_FIRST, POS_FULL, POS_LAST, POS_MIDDLE,
};
use byteorder::{ByteOrder, LittleEndian};
use envio::RandomAccessFile;
use flate2::read::DeflateDecoder;
use std::collections::VecDeque;
use std::io::Read;

/// One decoded logical entry: `(key, value, del)`.
pub type Entry = (Vec<u8>, Vec<u8>, bool);

/// Decodes the logical record starting at `offset`.
///
/// Returns one entry for a plain record, one per pair for a compressed
/// batch. Every fragment's CRC is verified.
pub fn read_record(file: &RandomAccessFile, offset: u32) -> Result<Vec<Entry>, LogError> {
    let file_len = file.length()?;
    let (payload, ty, _end) = read_logical(file, offset, file_len)?;
    decode_payload(&payload, ty, offset)
}

/// Reassembles the fragment chain starting at `offset`.
///
/// Returns the logical payload, the trailing fragment's type byte (which
/// carries the authoritative DEL/COMPRESS flags) and the file position just
/// past the record.
fn read_logical(
    file: &RandomAccessFile,
    offset: u32,
    file_len: u64,
) -> Result<(Vec<u8>, u8, u64), LogError> {
    let mut pos = u64::from(offset);
    let mut payload = Vec::new();
    let mut expect_first = true;

    loop {
        // skip a zero-padded block tail
        let block_left = BLOCK_SIZE - (pos % BLOCK_SIZE as u64) as usize;
        if block_left < HEADER_SIZE {
            pos += block_left as u64;
        }
        if pos + HEADER_SIZE as u64 > file_len {
            return Err(LogError::Truncated { offset });
        }

        let header = file.pread(pos, HEADER_SIZE)?;
        if header.len() < HEADER_SIZE {
            return Err(LogError::Truncated { offset });
        }
        let crc = LittleEndian::read_u32(&header[0..4]);
        let len = LittleEndian::read_u16(&header[4..6]) as usize;
        let ty = header[6];

        let frag_pos = ty & 0b11;
        let in_block = (pos % BLOCK_SIZE as u64) as usize;
        if in_block + HEADER_SIZE + len > BLOCK_SIZE {
            return Err(LogError::Corrupt {
                offset: pos as u32,
                reason: "fragment crosses a block boundary",
            });
        }
        if pos + (HEADER_SIZE + len) as u64 > file_len {
            return Err(LogError::Truncated { offset });
        }

        let chunk = file.pread(pos + HEADER_SIZE as u64, len)?;
        if chunk.len() < len {
            return Err(LogError::Truncated { offset });
        }
        if record_crc(ty, &chunk) != crc {
            return Err(LogError::Corrupt {
                offset: pos as u32,
                reason: "crc mismatch",
            });
        }

        let chain_ok = if expect_first {
            frag_pos == POS_FULL || frag_pos == POS_FIRST
        } else {
            frag_pos == POS_MIDDLE || frag_pos == POS_LAST
        };
        if !chain_ok {
            return Err(LogError::Corrupt {
                offset: pos as u32,
                reason: "broken fragment chain",
            });
        }

        payload.extend_from_slice(&chunk);
        pos += (HEADER_SIZE + len) as u64;
        expect_first = false;

        if frag_pos == POS_FULL || frag_pos == POS_LAST {
            return Ok((payload, ty, pos));
        }
    }
}

fn decode_payload(payload: &[u8], ty: u8, offset: u32) -> Result<Vec<Entry>, LogError> {
    let corrupt = |reason| LogError::Corrupt { offset, reason };

    if ty & FLAG_COMPRESS == 0 {
        let del = ty & FLAG_DEL != 0;
        let mut input = payload;
        let klen = take_uvarint(&mut input).ok_or(corrupt("bad key length"))? as usize;
        if klen > input.len() {
            return Err(corrupt("key length exceeds payload"));
        }
        let (key, value) = input.split_at(klen);
        return Ok(vec![(key.to_vec(), value.to_vec(), del)]);
    }

    let mut raw = Vec::new();
    DeflateDecoder::new(payload)
        .read_to_end(&mut raw)
        .map_err(|_| corrupt("bad compressed payload"))?;

    let mut input = &raw[..];
    let mut entries = Vec::new();
    while !input.is_empty() {
        let klen = take_uvarint(&mut input).ok_or(corrupt("bad key length"))? as usize;
        if klen > input.len() {
            return Err(corrupt("key length exceeds payload"));
        }
        let (key, rest) = input.split_at(klen);
        input = rest;
        let vlen = take_uvarint(&mut input).ok_or(corrupt("bad value length"))? as usize;
        if vlen == 0 || vlen > input.len() {
            return Err(corrupt("value length exceeds payload"));
        }
        let (stored, rest) = input.split_at(vlen);
        input = rest;
        // the last stored byte is the per-pair meta (non-zero: deletion)
        let (value, meta) = stored.split_at(vlen - 1);
        entries.push((key.to_vec(), value.to_vec(), meta[0] != 0));
    }
    Ok(entries)
}

/// Receiver for corruption discovered during a recovery scan.
///
/// Returning `Ok(())` lets the scan resynchronize at the next block;
/// returning the error aborts the scan.
pub trait Reporter {
    fn corruption(&mut self, err: LogError) -> Result<(), LogError>;
}

/// Re-raises every corruption (mid-file corruption is fatal).
pub struct DefaultReporter;

impl Reporter for DefaultReporter {
    fn corruption(&mut self, err: LogError) -> Result<(), LogError> {
        Err(err)
    }
}

/// Logs corruption and lets the scan continue — the reporter to use when
/// rebuilding an index from a damaged file.
pub struct LoggingReporter;

impl Reporter for LoggingReporter {
    fn corruption(&mut self, err: LogError) -> Result<(), LogError> {
        tracing::warn!(error = %err, "skipping corrupt log region during recovery");
        Ok(())
    }
}

/// End-to-end scan of the data file.
///
/// Yields `(key, record_offset, kind)` for every logical entry, in file
/// order; all pairs of a compressed batch share their record's offset. A
/// torn tail ends the scan silently.
pub struct RecoveryIterator<'a, R: Reporter> {
    file: &'a RandomAccessFile,
    file_len: u64,
    pos: u64,
    queue: VecDeque<(Vec<u8>, u32, EntryKind)>,
    reporter: R,
    done: bool,
}

impl<'a, R: Reporter> RecoveryIterator<'a, R> {
    /// Scans the whole file from offset 0.
    pub fn new(file: &'a RandomAccessFile, reporter: R) -> Result<Self, LogError> {
        Self::from_offset(file, 0, reporter)
    }

    /// Scans from `offset`, which must be a record boundary (for example a
    /// checkpoint's covered offset).
    pub fn from_offset(
        file: &'a RandomAccessFile,
        offset: u32,
        reporter: R,
    ) -> Result<Self, LogError> {
        Ok(Self {
            file,
            file_len: file.length()?,
            pos: u64::from(offset),
            queue: VecDeque::new(),
            reporter,
            done: false,
        })
    }

    fn skip_to_next_block(&mut self, record_start: u64) {
        self.pos = (record_start / BLOCK_SIZE as u64 + 1) * BLOCK_SIZE as u64;
    }
}

impl<R: Reporter> Iterator for RecoveryIterator<'_, R> {
    type Item = Result<(Vec<u8>, u32, EntryKind), LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.queue.pop_front() {
                return Some(Ok(entry));
            }
            if self.done {
                return None;
            }

            // land on the next record boundary
            let block_left = BLOCK_SIZE - (self.pos % BLOCK_SIZE as u64) as usize;
            if block_left < HEADER_SIZE {
                self.pos += block_left as u64;
            }
            if self.pos >= self.file_len {
                self.done = true;
                return None;
            }
            let record_start = self.pos;

            match read_logical(self.file, record_start as u32, self.file_len) {
                Ok((payload, ty, end)) => {
                    self.pos = end;
                    match decode_payload(&payload, ty, record_start as u32) {
                        Ok(entries) => {
                            let explicit = ty & FLAG_EXPLICIT != 0;
                            self.queue.extend(entries.into_iter().map(|(key, _, del)| {
                                let kind = match (del, explicit) {
                                    (false, _) => EntryKind::Put,
                                    (true, false) => EntryKind::Del,
                                    (true, true) => EntryKind::ExplicitDel,
                                };
                                (key, record_start as u32, kind)
                            }));
                        }
                        Err(err) => {
                            if let Err(fatal) = self.reporter.corruption(err) {
                                self.done = true;
                                return Some(Err(fatal));
                            }
                            self.skip_to_next_block(record_start);
                        }
                    }
                }
                Err(LogError::Truncated { .. }) => {
                    // torn tail: everything before it is intact
                    tracing::debug!(offset = record_start, "dropping torn log tail");
                    self.done = true;
                    return None;
                }
                Err(err @ LogError::Corrupt { .. }) => {
                    if let Err(fatal) = self.reporter.corruption(err) {
                        self.done = true;
                        return Some(Err(fatal));
                    }
                    self.skip_to_next_block(record_start);
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
