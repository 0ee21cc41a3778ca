//! Sharded extraction of repositories, references, commits, trees and blobs
//! from git repositories.
//!
//! The pipeline: [`locator`] finds repositories, [`source`] turns each one
//! into an encoded [`shard::ShardDescriptor`], [`partition`] spreads shards
//! over workers, and [`executor`] runs one shard by driving a [`readers`]
//! chain and streaming framed [`row::Row`]s to a byte sink.

pub mod archive;
pub mod cli;
pub mod config;
pub mod driver;
pub mod errors;
pub mod executor;
pub mod locator;
pub mod observability;
pub mod partition;
pub mod readers;
pub mod row;
pub mod shard;
pub mod source;
pub mod testkit;

pub use crate::errors::{EngineError, ErrorCode, Result};
pub use crate::executor::{execute, execute_encoded, ExecutorConfig, ShardSummary};
pub use crate::row::{Row, Value};
pub use crate::shard::{DataType, RepositoryKind, ShardDescriptor, StageOptions, TagPolicy};
pub use crate::source::GitSource;
