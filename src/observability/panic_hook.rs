//! Custom panic hook for structured crash reports.
//!
//! A panic inside a worker should say which shard was running, how far it
//! got, and where it failed. Everything goes to stderr; stdout carries rows.

use super::context::{get_current_context, get_progress, ShardContext};
use std::panic::PanicHookInfo;
use tracing::Span;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const RULE: &str = "════════════════════════════════════════════════════════════════════════════════";

/// Install the crash report hook. Call once, early in `main`.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        print_crash_report(info);
    }));
}

fn print_crash_report(info: &PanicHookInfo<'_>) {
    let context = get_current_context();
    let (completed, total) = get_progress();

    eprintln!();
    eprintln!("{RULE}");
    eprintln!("  GITENGINE CRASH REPORT");
    eprintln!("  Version: {VERSION}");
    eprintln!("  Platform: {}", std::env::consts::OS);
    eprintln!("  Time: {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    eprintln!("{RULE}");
    eprintln!("  PANIC: {}", truncate(&extract_panic_message(info), 68));
    if let Some(location) = info.location() {
        eprintln!(
            "  Location: {}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        );
    }
    eprintln!("{RULE}");
    for line in context_lines(&context, completed, total) {
        eprintln!("  {line}");
    }
    if let Some(metadata) = Span::current().metadata() {
        eprintln!("  Span: {}", metadata.name());
    }
    eprintln!("{RULE}");

    if std::env::var("RUST_BACKTRACE").is_ok() {
        eprintln!("{}", std::backtrace::Backtrace::capture());
    } else {
        eprintln!("  Run with RUST_BACKTRACE=1 for stack trace");
    }
}

fn context_lines(context: &ShardContext, completed: usize, total: usize) -> Vec<String> {
    let mut lines = Vec::new();
    match (&context.data_type, &context.repository) {
        (Some(data_type), Some(repository)) => {
            lines.push(format!("Shard: {data_type} of {}", truncate(repository, 60)));
            lines.push(format!("Rows emitted: {}", context.rows));
        }
        _ => lines.push("Shard: (none - crash occurred outside shard execution)".to_string()),
    }
    if total > 0 {
        lines.push(format!("Progress: {completed} / {total} shards"));
    }
    lines
}

fn extract_panic_message(info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}
