//! Observability: logging setup, shard context and crash reports.
//!
//! Install the panic hook and the subscriber at startup:
//!
//! ```ignore
//! use gitengine::observability::{init_logging, install_panic_hook};
//!
//! fn main() {
//!     install_panic_hook();
//!     init_logging(0, None);
//! }
//! ```
//!
//! Track the shard being executed:
//!
//! ```ignore
//! let _shard = enter_shard(shard.data_type, &shard.repo_path);
//! // a panic here reports the data type, repository and rows emitted
//! ```

pub mod context;
pub mod panic_hook;
pub mod tracing;

pub use context::{
    enter_shard, get_current_context, get_progress, increment_completed, record_row, reset_context,
    set_progress, ContextGuard, ShardContext,
};
pub use panic_hook::install_panic_hook;
pub use self::tracing::{init_logging, LOG_ENV};
