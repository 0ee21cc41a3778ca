//! Round-robin assignment of shards to worker partitions.

use crate::errors::{EngineError, Result};

/// Assign items to `count` partitions by arrival position modulo `count`.
///
/// Pure function: item `i` lands in partition `i % count`, and items keep
/// their relative order within a partition. Partition sizes differ by at
/// most one. Fails when `count` is zero.
pub fn partition<T, I>(items: I, count: usize) -> Result<Vec<Vec<T>>>
where
    I: IntoIterator<Item = T>,
{
    if count == 0 {
        return Err(EngineError::Config {
            message: "partition count must be positive".into(),
        });
    }
    let mut partitions: Vec<Vec<T>> = (0..count).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        partitions[i % count].push(item);
    }
    Ok(partitions)
}
