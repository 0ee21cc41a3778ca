//! Shard descriptors: self-contained, serializable units of work.
//!
//! A shard binds one discovered repository to a requested extraction mode.
//! It is created on the generation side, encoded, shipped to a worker and
//! decoded there exactly once.

mod codec;
mod descriptor;

pub use codec::{decode, encode, WIRE_MAGIC};
pub use descriptor::{DataType, RepositoryKind, ShardDescriptor, StageOptions, TagPolicy, REF_NAME_COLUMN};
