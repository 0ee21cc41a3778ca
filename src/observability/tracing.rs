//! Subscriber setup. Logs go to stderr so stdout stays a clean row stream.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "GITENGINE_LOG";

static INIT: Once = Once::new();

/// Default directive for a `-v` count, used when `GITENGINE_LOG` is unset.
pub fn default_directive(verbosity: u8, configured: Option<&str>) -> String {
    match (verbosity, configured) {
        (0, Some(level)) => format!("gitengine={level},warn"),
        (0, None) => "gitengine=info,warn".to_string(),
        (1, _) => "gitengine=debug,warn".to_string(),
        _ => "gitengine=trace,info".to_string(),
    }
}

/// Install the global subscriber once; later calls are no-ops.
pub fn init_logging(verbosity: u8, configured: Option<&str>) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity, configured)));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_wins_over_configured_level() {
        assert_eq!(default_directive(0, None), "gitengine=info,warn");
        assert_eq!(default_directive(0, Some("error")), "gitengine=error,warn");
        assert_eq!(default_directive(1, Some("error")), "gitengine=debug,warn");
        assert_eq!(default_directive(3, None), "gitengine=trace,info");
    }
}
