//! Log writer: fragmenting, block padding, batch and compressed appends.

use crate::{
    put_uvarint, record_crc, LogError, BLOCK_SIZE, FLAG_COMPRESS, FLAG_DEL, FLAG_EXPLICIT,
    HEADER_SIZE, POS_FIRST, POS_FULL, POS_LAST, POS_MIDDLE,
};
use byteorder::{LittleEndian, WriteBytesExt};
use envio::AppendableFile;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Write};

const ZERO_PAD: [u8; HEADER_SIZE] = [0; HEADER_SIZE];

/// Appends logical records to the data file.
///
/// Owns the [`AppendableFile`]; durability is the caller's choice via
/// [`LogWriter::sync`].
pub struct LogWriter {
    dst: AppendableFile,
}

impl LogWriter {
    pub fn new(dst: AppendableFile) -> Self {
        Self { dst }
    }

    /// Offset at which the next record will start.
    ///
    /// Accounts for the zero padding emitted when the current block cannot
    /// hold another fragment header.
    #[must_use]
    pub fn calc_write_pos(&self) -> u32 {
        let len = self.dst.length();
        let leftover = BLOCK_SIZE as u64 - len % BLOCK_SIZE as u64;
        if leftover < HEADER_SIZE as u64 {
            (len + leftover) as u32
        } else {
            len as u32
        }
    }

    /// Current physical length of the data file.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.dst.length()
    }

    /// Forces appended records to stable storage.
    pub fn sync(&mut self) -> Result<(), LogError> {
        self.dst.sync()?;
        Ok(())
    }

    /// Appends one plain logical record, returning its start offset.
    pub fn add_record(&mut self, record: &[u8]) -> Result<u32, LogError> {
        self.emit(record, 0)
    }

    /// Appends one deletion record (the DEL flag set on every fragment).
    pub fn add_del_record(&mut self, record: &[u8]) -> Result<u32, LogError> {
        self.emit(record, FLAG_DEL)
    }

    /// Appends a deletion record additionally marked EXPLICIT: a recovery
    /// scan re-indexes its offset instead of dropping the key, so the
    /// delete survives rebuilds as an indexed tombstone.
    pub fn add_explicit_del_record(&mut self, record: &[u8]) -> Result<u32, LogError> {
        self.emit(record, FLAG_DEL | FLAG_EXPLICIT)
    }

    /// Appends a batch, one logical record per element; returns the start
    /// offset of each.
    pub fn add_records(&mut self, records: &[Vec<u8>]) -> Result<Vec<u32>, LogError> {
        let mut offsets = Vec::with_capacity(records.len());
        for record in records {
            offsets.push(self.emit(record, 0)?);
        }
        Ok(offsets)
    }

    /// Appends one compressed batch record (see [`make_compress_record`]);
    /// every pair inside shares the returned offset.
    ///
    /// [`make_compress_record`]: LogWriter::make_compress_record
    pub fn add_compress_record(&mut self, record: &[u8]) -> Result<u32, LogError> {
        self.emit(record, FLAG_COMPRESS)
    }

    fn emit(&mut self, payload: &[u8], flags: u8) -> Result<u32, LogError> {
        // pad out a block tail too small for a header
        let leftover = BLOCK_SIZE - (self.dst.length() % BLOCK_SIZE as u64) as usize;
        if leftover < HEADER_SIZE {
            self.dst.append(&ZERO_PAD[..leftover])?;
        }

        let start = self.dst.length();
        if start > u64::from(u32::MAX) {
            return Err(LogError::FileFull);
        }

        let mut rest = payload;
        let mut first = true;
        let mut header = Vec::with_capacity(HEADER_SIZE);
        loop {
            let block_used = (self.dst.length() % BLOCK_SIZE as u64) as usize;
            let avail = BLOCK_SIZE - block_used - HEADER_SIZE;
            let take = rest.len().min(avail);
            let last = take == rest.len();

            let pos = match (first, last) {
                (true, true) => POS_FULL,
                (true, false) => POS_FIRST,
                (false, false) => POS_MIDDLE,
                (false, true) => POS_LAST,
            };
            let ty = pos | flags;
            let (chunk, after) = rest.split_at(take);

            header.clear();
            header.write_u32::<LittleEndian>(record_crc(ty, chunk))?;
            header.write_u16::<LittleEndian>(take as u16)?;
            header.write_u8(ty)?;
            self.dst.append(&header)?;
            self.dst.append(chunk)?;

            rest = after;
            first = false;
            if last {
                break;
            }
            // a non-last fragment filled its block exactly; nothing to pad
        }
        Ok(start as u32)
    }

    /// Pure encoder for a plain record payload: `varint(|K|) ‖ K ‖ V`.
    #[must_use]
    pub fn make_record(key: &[u8], value: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(key.len() + value.len() + 5);
        put_uvarint(&mut buf, key.len() as u64);
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
        buf
    }

    /// Pure encoder for a compressed batch payload.
    ///
    /// Each stored value carries one trailing meta byte (zero: live pair);
    /// the whole stream is DEFLATE-compressed.
    pub fn make_compress_record<K, V>(kvs: &[(K, V)]) -> io::Result<Vec<u8>>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut stream = Vec::new();
        for (key, value) in kvs {
            let (key, value) = (key.as_ref(), value.as_ref());
            put_uvarint(&mut stream, key.len() as u64);
            stream.extend_from_slice(key);
            put_uvarint(&mut stream, value.len() as u64 + 1);
            stream.extend_from_slice(value);
            stream.push(0);
        }
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&stream)?;
        Ok(enc.finish()?)
    }
}
