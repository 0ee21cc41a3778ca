//! Row protocol: the record format every reader emits.
//!
//! A row is a timestamp, an ordered key and an ordered list of typed values.
//! The key holds the first column (the repository ID) so the downstream
//! engine can group by repository without decoding the payload; the values
//! hold every remaining column in header order.
//!
//! On the wire each row is a little-endian `u32` length followed by the
//! `postcard` encoding of the row.

use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicI64, Ordering};

/// Upper bound on a single frame, guards against reading garbage lengths.
const MAX_FRAME_LEN: u32 = 1 << 30;

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(i64::MIN);

/// Nanoseconds since the Unix epoch, never smaller than a previous call.
pub fn now() -> i64 {
    let wall = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or(i64::MAX);
    let previous = LAST_TIMESTAMP.fetch_max(wall, Ordering::AcqRel);
    previous.max(wall)
}

/// A single typed column value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v.into_iter().map(Value::Str).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Str(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// One extracted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub timestamp: i64,
    pub key: Vec<Value>,
    pub values: Vec<Value>,
}

impl Row {
    /// Build a row from its columns; the first column becomes the key.
    pub fn new(columns: Vec<Value>) -> Self {
        let mut columns = columns.into_iter();
        let key = columns.next().into_iter().collect();
        Self {
            timestamp: now(),
            key,
            values: columns.collect(),
        }
    }

    /// Build a header row from column names.
    pub fn header<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(names.iter().map(|n| Value::from(n.as_ref())).collect())
    }

    /// All columns, key first.
    pub fn columns(&self) -> impl Iterator<Item = &Value> {
        self.key.iter().chain(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.key.len() + self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column by position, key first.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.columns().nth(index)
    }

    /// Encode as one length-prefixed frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = postcard::to_allocvec(self).map_err(|source| EngineError::RowEncode { source })?;
        frame(&body, MAX_FRAME_LEN)
    }

    /// Write this row to a byte sink as one frame.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let frame = self.encode()?;
        out.write_all(&frame)
            .map_err(|source| EngineError::RowWrite { source })
    }

    /// Read the next frame. Returns `None` at a clean end of stream.
    pub fn read_from<R: Read>(input: &mut R) -> Result<Option<Row>> {
        let mut len_buf = [0u8; 4];
        if !read_exact_or_eof(input, &mut len_buf)? {
            return Ok(None);
        }
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            return Err(EngineError::RowRead {
                reason: format!("frame length {len} exceeds limit"),
            });
        }
        let mut body = vec![0u8; len as usize];
        input.read_exact(&mut body).map_err(|e| EngineError::RowRead {
            reason: format!("truncated frame: {e}"),
        })?;
        postcard::from_bytes(&body)
            .map(Some)
            .map_err(|e| EngineError::RowRead {
                reason: e.to_string(),
            })
    }

    /// Tab-separated rendering of all columns.
    pub fn to_tsv(&self) -> String {
        self.columns()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\t")
    }
}

/// Length-prefix `body`, refusing bodies a reader would reject.
fn frame(body: &[u8], limit: u32) -> Result<Vec<u8>> {
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= limit)
        .ok_or(EngineError::RowTooLarge {
            len: body.len(),
            limit,
        })?;
    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Fill `buf` completely; `Ok(false)` if the stream ended before the first byte.
fn read_exact_or_eof<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(EngineError::RowRead {
                    reason: "truncated frame length".into(),
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                return Err(EngineError::RowRead {
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok(true)
}

/// Iterator over the frames of a row stream.
pub struct RowStream<R> {
    input: R,
}

impl<R: Read> RowStream<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }
}

impl<R: Read> Iterator for RowStream<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        Row::read_from(&mut self.input).transpose()
    }
}
