//! Block index encoding.
//!
//! An archive is a sequence of blocks. Each block is the concatenated file
//! contents followed by an index:
//!
//! ```text
//! "IBA" version:u8
//! entry* : name_len:u32 name mode:u32 mod_time:i64 start:u64 size:u64 crc32:u32 flags:u32
//! footer : entry_count:u32 index_size:u64 block_size:u64 crc32:u32
//! ```
//!
//! All integers are big-endian. `start` is relative to the block start,
//! `index_size` covers the signature through the footer, and the footer
//! CRC covers the signature and entries.

use crate::errors::{EngineError, Result};
use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

pub const INDEX_SIGNATURE: &[u8; 3] = b"IBA";
pub const INDEX_VERSION: u8 = 1;
pub const FOOTER_LEN: u64 = 24;
pub const FLAG_DELETED: u32 = 1;
/// Encoded size of an entry with an empty name.
const MIN_ENTRY_LEN: usize = 4 + 4 + 8 + 8 + 8 + 4 + 4;

/// One file recorded in a block index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub mode: u32,
    pub mod_time: i64,
    /// Offset from the start of the archive.
    pub start: u64,
    pub size: u64,
    pub crc32: u32,
    pub flags: u32,
}

impl IndexEntry {
    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Footer {
    entry_count: u32,
    index_size: u64,
    block_size: u64,
    crc32: u32,
}

/// Serialize the index of one block; entry offsets are block-relative.
pub fn encode_index(entries: &[IndexEntry], contents_len: u64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(INDEX_SIGNATURE);
    out.push(INDEX_VERSION);
    for entry in entries {
        out.extend_from_slice(&(entry.name.len() as u32).to_be_bytes());
        out.extend_from_slice(entry.name.as_bytes());
        out.extend_from_slice(&entry.mode.to_be_bytes());
        out.extend_from_slice(&entry.mod_time.to_be_bytes());
        out.extend_from_slice(&entry.start.to_be_bytes());
        out.extend_from_slice(&entry.size.to_be_bytes());
        out.extend_from_slice(&entry.crc32.to_be_bytes());
        out.extend_from_slice(&entry.flags.to_be_bytes());
    }

    let mut crc = flate2::Crc::new();
    crc.update(&out);
    let index_size = out.len() as u64 + FOOTER_LEN;

    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    out.extend_from_slice(&index_size.to_be_bytes());
    out.extend_from_slice(&(contents_len + index_size).to_be_bytes());
    out.extend_from_slice(&crc.sum().to_be_bytes());
    out
}

/// Read every block index, newest block first, and return the live entries.
///
/// A name recorded in a newer block shadows the same name in older blocks;
/// a deleted flag hides it altogether.
pub fn read_entries<R: Read + Seek>(input: &mut R, path: &Path) -> Result<Vec<IndexEntry>> {
    let corrupt = |reason: String| EngineError::ArchiveCorrupt {
        path: path.to_path_buf(),
        reason,
    };
    let io_err = |e: std::io::Error| EngineError::io(path, e);

    let mut end = input.seek(SeekFrom::End(0)).map_err(io_err)?;
    if end == 0 {
        return Err(corrupt("empty archive".into()));
    }

    let mut seen = HashSet::new();
    let mut live = Vec::new();

    while end > 0 {
        if end < FOOTER_LEN {
            return Err(corrupt(format!("block ending at {end} is shorter than a footer")));
        }
        input.seek(SeekFrom::Start(end - FOOTER_LEN)).map_err(io_err)?;
        let mut raw = [0u8; FOOTER_LEN as usize];
        input.read_exact(&mut raw).map_err(io_err)?;
        let footer = parse_footer(&raw);

        if footer.index_size < FOOTER_LEN + 4
            || footer.index_size > end
            || footer.block_size < footer.index_size
            || footer.block_size > end
        {
            return Err(corrupt(format!("inconsistent footer at offset {}", end - FOOTER_LEN)));
        }

        let index_start = end - footer.index_size;
        let block_start = end - footer.block_size;
        let mut index = vec![0u8; (footer.index_size - FOOTER_LEN) as usize];
        input.seek(SeekFrom::Start(index_start)).map_err(io_err)?;
        input.read_exact(&mut index).map_err(io_err)?;

        let mut crc = flate2::Crc::new();
        crc.update(&index);
        if crc.sum() != footer.crc32 {
            return Err(corrupt(format!("index checksum mismatch at offset {index_start}")));
        }

        let entries = parse_entries(&index, footer.entry_count, block_start)
            .map_err(|reason| corrupt(reason.to_string()))?;
        for entry in entries {
            let overruns = entry.start.checked_add(entry.size).is_none_or(|end| end > index_start);
            if overruns {
                return Err(corrupt(format!("entry {} overruns its block", entry.name)));
            }
            if seen.insert(entry.name.clone()) && !entry.is_deleted() {
                live.push(entry);
            }
        }

        end = block_start;
    }

    live.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(live)
}

fn parse_footer(raw: &[u8; FOOTER_LEN as usize]) -> Footer {
    let mut cursor = Cursor::new(raw);
    Footer {
        entry_count: cursor.u32().unwrap_or(0),
        index_size: cursor.u64().unwrap_or(0),
        block_size: cursor.u64().unwrap_or(0),
        crc32: cursor.u32().unwrap_or(0),
    }
}

fn parse_entries(index: &[u8], count: u32, block_start: u64) -> Result<Vec<IndexEntry>, &'static str> {
    let mut cursor = Cursor::new(index);
    if cursor.take(3)? != INDEX_SIGNATURE {
        return Err("bad index signature");
    }
    if cursor.take(1)?[0] != INDEX_VERSION {
        return Err("unsupported index version");
    }

    // the count is untrusted; every entry needs at least MIN_ENTRY_LEN bytes
    let mut entries = Vec::with_capacity((count as usize).min(index.len() / MIN_ENTRY_LEN));
    for _ in 0..count {
        let name_len = cursor.u32()? as usize;
        let name = std::str::from_utf8(cursor.take(name_len)?)
            .map_err(|_| "entry name is not UTF-8")?
            .to_string();
        entries.push(IndexEntry {
            name,
            mode: cursor.u32()?,
            mod_time: cursor.u64()? as i64,
            start: block_start
                .checked_add(cursor.u64()?)
                .ok_or("entry offset overflows")?,
            size: cursor.u64()?,
            crc32: cursor.u32()?,
            flags: cursor.u32()?,
        });
    }
    if !cursor.is_empty() {
        return Err("trailing bytes after index entries");
    }
    Ok(entries)
}

struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], &'static str> {
        if self.bytes.len() < n {
            return Err("truncated index");
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32, &'static str> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, &'static str> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
