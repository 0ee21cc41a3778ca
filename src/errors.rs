//! Unified error type for gitengine operations.
//!
//! Errors fall into four classes, and every caller decides what to do with
//! an error by asking which class it belongs to:
//!
//! - **Benign/skip**: an unresolvable reference. Absorbed inside the reader
//!   chain; the reference is dropped and iteration continues.
//! - **Shard-fatal**: the repository cannot be opened, an object is missing
//!   or unreadable, a row cannot be written. Aborts the current shard only.
//! - **Process-fatal**: malformed invocation (unknown data type, descriptor
//!   that does not decode). The worker process exits immediately.
//! - **Scan-fatal**: a directory listing failed while locating repositories.
//!
//! End of stream is never an error: readers return `Ok(None)`.
//!
//! # Error Codes
//!
//! - E001-E009: source discovery and filesystem errors
//! - E010-E019: shard descriptor errors
//! - E020-E029: repository and object errors
//! - E030-E039: row stream errors
//! - E040-E049: invocation and configuration errors
//!
//! # Example
//!
//! ```rust
//! use gitengine::errors::{EngineError, ErrorCode};
//!
//! let err = EngineError::UnresolvableReference { name: "HEAD".into() };
//! assert!(err.is_skippable());
//! assert_eq!(err.code(), ErrorCode::REF_UNRESOLVABLE);
//! ```

use crate::shard::DataType;
use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Structured error code for documentation and programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(&'static str);

impl ErrorCode {
    /// Source path is neither a directory nor a packed archive
    pub const SOURCE_INVALID: ErrorCode = ErrorCode("E001");
    /// Directory listing failed during discovery
    pub const SOURCE_LISTING: ErrorCode = ErrorCode("E002");
    /// Packed archive is malformed
    pub const ARCHIVE_CORRUPT: ErrorCode = ErrorCode("E003");
    /// Generic I/O failure
    pub const IO_GENERIC: ErrorCode = ErrorCode("E009");

    /// Descriptor could not be encoded
    pub const SHARD_ENCODE: ErrorCode = ErrorCode("E010");
    /// Descriptor could not be decoded
    pub const SHARD_DECODE: ErrorCode = ErrorCode("E011");

    /// Repository could not be opened
    pub const REPO_OPEN: ErrorCode = ErrorCode("E020");
    /// Object missing or unreadable
    pub const OBJECT_READ: ErrorCode = ErrorCode("E021");
    /// Reference could not be resolved to a commit
    pub const REF_UNRESOLVABLE: ErrorCode = ErrorCode("E022");
    /// Reference or history iteration failed
    pub const REPO_ITERATION: ErrorCode = ErrorCode("E023");

    /// Row could not be serialized or written
    pub const ROW_WRITE: ErrorCode = ErrorCode("E030");
    /// Row stream is truncated or malformed
    pub const ROW_READ: ErrorCode = ErrorCode("E031");

    /// Unknown data type requested
    pub const INVOCATION_DATA_TYPE: ErrorCode = ErrorCode("E040");
    /// Invalid configuration value
    pub const CONFIG_INVALID: ErrorCode = ErrorCode("E041");

    /// Get the error code string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unified error type for gitengine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid source {path}: must be a directory or a packed archive")]
    InvalidSource { path: PathBuf },

    #[error("failed to list {path}")]
    Listing {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("packed archive {path} is corrupt: {reason}")]
    ArchiveCorrupt { path: PathBuf, reason: String },

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode shard for {repository}")]
    ShardEncode {
        repository: String,
        #[source]
        source: postcard::Error,
    },

    #[error("could not decode shard descriptor: {reason}")]
    ShardDecode { reason: String },

    #[error("could not open repository {path}")]
    OpenRepository {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("could not read {object} {hash} in {repository}")]
    ObjectRead {
        repository: String,
        object: &'static str,
        hash: String,
        #[source]
        source: git2::Error,
    },

    #[error("unable to resolve reference {name}")]
    UnresolvableReference { name: String },

    #[error("could not iterate {what} in {repository}")]
    Iteration {
        repository: String,
        what: &'static str,
        #[source]
        source: git2::Error,
    },

    #[error("could not write row")]
    RowWrite {
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize row")]
    RowEncode {
        #[source]
        source: postcard::Error,
    },

    #[error("row of {len} bytes exceeds the {limit}-byte frame limit")]
    RowTooLarge { len: usize, limit: u32 },

    #[error("malformed row stream: {reason}")]
    RowRead { reason: String },

    #[error("unknown data type {0:?}")]
    UnknownDataType(String),

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("{data_type} stage failed in {repository}")]
    Stage {
        data_type: DataType,
        repository: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("shard {data_type} of {repository} failed")]
    Shard {
        data_type: DataType,
        repository: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Wrap an error raised inside a reader stage with its stage context.
    #[must_use]
    pub fn in_stage(self, data_type: DataType, repository: impl Into<String>) -> Self {
        match self {
            // Already carries stage context; a second layer adds nothing.
            stage @ Self::Stage { .. } => stage,
            other => Self::Stage {
                data_type,
                repository: repository.into(),
                source: Box::new(other),
            },
        }
    }

    /// Wrap an error with the shard it aborted.
    #[must_use]
    pub fn in_shard(self, data_type: DataType, repository: impl Into<String>) -> Self {
        Self::Shard {
            data_type,
            repository: repository.into(),
            source: Box::new(self),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn object_read(
        repository: impl Into<String>,
        object: &'static str,
        hash: impl ToString,
        source: git2::Error,
    ) -> Self {
        Self::ObjectRead {
            repository: repository.into(),
            object,
            hash: hash.to_string(),
            source,
        }
    }

    /// The innermost error, skipping context layers.
    #[must_use]
    pub fn root(&self) -> &EngineError {
        match self {
            Self::Stage { source, .. } | Self::Shard { source, .. } => source.root(),
            other => other,
        }
    }

    /// Get the error code of the innermost error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self.root() {
            Self::InvalidSource { .. } => ErrorCode::SOURCE_INVALID,
            Self::Listing { .. } => ErrorCode::SOURCE_LISTING,
            Self::ArchiveCorrupt { .. } => ErrorCode::ARCHIVE_CORRUPT,
            Self::Io { .. } => ErrorCode::IO_GENERIC,
            Self::ShardEncode { .. } => ErrorCode::SHARD_ENCODE,
            Self::ShardDecode { .. } => ErrorCode::SHARD_DECODE,
            Self::OpenRepository { .. } => ErrorCode::REPO_OPEN,
            Self::ObjectRead { .. } => ErrorCode::OBJECT_READ,
            Self::UnresolvableReference { .. } => ErrorCode::REF_UNRESOLVABLE,
            Self::Iteration { .. } => ErrorCode::REPO_ITERATION,
            Self::RowWrite { .. } | Self::RowEncode { .. } | Self::RowTooLarge { .. } => ErrorCode::ROW_WRITE,
            Self::RowRead { .. } => ErrorCode::ROW_READ,
            Self::UnknownDataType(_) => ErrorCode::INVOCATION_DATA_TYPE,
            Self::Config { .. } => ErrorCode::CONFIG_INVALID,
            Self::Stage { .. } | Self::Shard { .. } => unreachable!("root() unwraps context"),
        }
    }

    /// Benign errors: the offending element is dropped and iteration continues.
    #[must_use]
    pub fn is_skippable(&self) -> bool {
        matches!(self.root(), Self::UnresolvableReference { .. })
    }

    /// Errors that must terminate the worker process rather than one shard.
    #[must_use]
    pub fn is_process_fatal(&self) -> bool {
        matches!(
            self.root(),
            Self::UnknownDataType(_) | Self::ShardDecode { .. }
        )
    }

    /// Process exit code a worker reports for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_process_fatal() {
            2
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_blob() -> EngineError {
        EngineError::object_read(
            "/repos/a",
            "blob",
            "0123abcd",
            git2::Error::from_str("object not found"),
        )
    }

    #[test]
    fn test_unresolvable_reference_is_skippable() {
        let err = EngineError::UnresolvableReference {
            name: "refs/heads/gone".into(),
        };
        assert!(err.is_skippable());
        assert!(!err.is_process_fatal());
    }

    #[test]
    fn test_context_layers_keep_root_classification() {
        let err = missing_blob()
            .in_stage(DataType::Blobs, "/repos/a")
            .in_shard(DataType::Blobs, "/repos/a");

        assert_eq!(err.code(), ErrorCode::OBJECT_READ);
        assert!(!err.is_skippable());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_in_stage_does_not_double_wrap() {
        let err = missing_blob()
            .in_stage(DataType::Blobs, "/repos/a")
            .in_stage(DataType::Commits, "/repos/a");

        match err {
            EngineError::Stage {
                data_type, source, ..
            } => {
                assert_eq!(data_type, DataType::Blobs);
                assert!(matches!(*source, EngineError::ObjectRead { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_object_read_message_names_repository_and_hash() {
        let message = missing_blob().to_string();
        assert!(message.contains("/repos/a"));
        assert!(message.contains("0123abcd"));
        assert!(message.contains("blob"));
    }

    #[test]
    fn test_invocation_errors_are_process_fatal() {
        assert!(EngineError::UnknownDataType("tags".into()).is_process_fatal());
        let decode = EngineError::ShardDecode {
            reason: "truncated".into(),
        };
        assert!(decode.is_process_fatal());
        assert_eq!(decode.exit_code(), 2);
        assert_eq!(ErrorCode::SHARD_DECODE.to_string(), "E011");
    }
}
