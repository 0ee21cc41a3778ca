//! Thread-local shard context for crash reports.
//!
//! Each worker thread records which shard it is executing and how many rows
//! it has emitted so far. Global atomic counters track how many shards of a
//! run have completed.
//!
//! ## Thread Safety
//!
//! - Thread-local context: each worker thread has its own (via `thread_local!`)
//! - Global progress: atomic counters for shards completed/total
//! - Context guards use RAII for automatic cleanup on drop

use crate::shard::DataType;
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};

static SHARDS_COMPLETED: AtomicUsize = AtomicUsize::new(0);
static SHARDS_TOTAL: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static CURRENT_CONTEXT: RefCell<ShardContext> = const { RefCell::new(ShardContext::new()) };
}

/// Snapshot of what the current thread was executing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardContext {
    pub data_type: Option<DataType>,
    pub repository: Option<String>,
    pub rows: u64,
}

impl ShardContext {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data_type: None,
            repository: None,
            rows: 0,
        }
    }
}

/// RAII guard restoring the previous context on drop.
pub struct ContextGuard {
    previous: ShardContext,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|ctx| {
            *ctx.borrow_mut() = std::mem::take(&mut self.previous);
        });
    }
}

/// Mark the current thread as executing a shard, with a fresh row count.
#[must_use]
pub fn enter_shard(data_type: DataType, repository: impl Into<String>) -> ContextGuard {
    CURRENT_CONTEXT.with(|ctx| {
        let previous = ctx.replace(ShardContext {
            data_type: Some(data_type),
            repository: Some(repository.into()),
            rows: 0,
        });
        ContextGuard { previous }
    })
}

/// Count one emitted row against the current shard.
pub fn record_row() {
    CURRENT_CONTEXT.with(|ctx| ctx.borrow_mut().rows += 1);
}

#[must_use]
pub fn get_current_context() -> ShardContext {
    CURRENT_CONTEXT.with(|ctx| ctx.borrow().clone())
}

/// Reset the current thread's context to empty.
pub fn reset_context() {
    CURRENT_CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = ShardContext::new();
    });
}

pub fn set_progress(completed: usize, total: usize) {
    SHARDS_COMPLETED.store(completed, Ordering::Relaxed);
    SHARDS_TOTAL.store(total, Ordering::Relaxed);
}

pub fn increment_completed() {
    SHARDS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}

/// Shards completed and total, for crash reports.
#[must_use]
pub fn get_progress() -> (usize, usize) {
    (
        SHARDS_COMPLETED.load(Ordering::Relaxed),
        SHARDS_TOTAL.load(Ordering::Relaxed),
    )
}
