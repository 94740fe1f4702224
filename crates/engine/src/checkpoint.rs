//! The `.index` checkpoint: the latest live key→offset pairs, plus the
//! data-file offset the snapshot covers.
//!
//! ```text
//! [magic: u32][covered_offset: u32][count: u32][body_crc32: u32]
//! [varint(|K|) ‖ K ‖ offset: u32]*
//! ```
//!
//! On open the pairs rebuild the trie in one pass and only the `.data`
//! tail past `covered_offset` is replayed. The body is CRC-protected; any
//! mismatch makes the open fall back to a full rebuild.

use crate::meta::write_atomically;
use crate::{DbError, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use datalog::{put_uvarint, take_uvarint};
use std::fs;
use std::path::Path;

const MAGIC: u32 = 0x4244_5431; // "BDT1"
const HEADER: usize = 16;

pub(crate) fn save(path: &Path, covered: u32, pairs: &[(Vec<u8>, u32)]) -> Result<()> {
    let mut body = Vec::new();
    for (key, offset) in pairs {
        put_uvarint(&mut body, key.len() as u64);
        body.extend_from_slice(key);
        body.write_u32::<LittleEndian>(*offset)?;
    }

    let mut out = Vec::with_capacity(HEADER + body.len());
    out.write_u32::<LittleEndian>(MAGIC)?;
    out.write_u32::<LittleEndian>(covered)?;
    out.write_u32::<LittleEndian>(pairs.len() as u32)?;
    out.write_u32::<LittleEndian>(crc32fast::hash(&body))?;
    out.extend_from_slice(&body);
    write_atomically(path, &out)
}

pub(crate) fn load(path: &Path) -> Result<(u32, Vec<(Vec<u8>, u32)>)> {
    let corrupt = |reason: &str| {
        DbError::Corruption(format!("index checkpoint {}: {reason}", path.display()))
    };

    let raw = fs::read(path)?;
    if raw.len() < HEADER {
        return Err(corrupt("truncated header"));
    }
    if LittleEndian::read_u32(&raw[0..4]) != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let covered = LittleEndian::read_u32(&raw[4..8]);
    let count = LittleEndian::read_u32(&raw[8..12]) as usize;
    let crc = LittleEndian::read_u32(&raw[12..16]);
    let body = &raw[HEADER..];
    if crc32fast::hash(body) != crc {
        return Err(corrupt("crc mismatch"));
    }

    let mut input = body;
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let klen = take_uvarint(&mut input).ok_or_else(|| corrupt("bad key length"))? as usize;
        if input.len() < klen + 4 {
            return Err(corrupt("entry exceeds body"));
        }
        let (key, rest) = input.split_at(klen);
        let offset = LittleEndian::read_u32(&rest[..4]);
        pairs.push((key.to_vec(), offset));
        input = &rest[4..];
    }
    if !input.is_empty() {
        return Err(corrupt("trailing bytes"));
    }
    Ok((covered, pairs))
}
