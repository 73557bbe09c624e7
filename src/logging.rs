//! Compact timestamped logging with per-target levels.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"  # quiet by default
//!
//! [logging.modules]
//! "rocketdesk::watcher" = "debug"
//! ```
//!
//! # Environment Variable
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=debug rocketdesk watch
//! RUST_LOG=rocketdesk::store=trace rocketdesk watch ~/projects
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Build an `EnvFilter` directive string from the config,
/// e.g. `warn,rocketdesk::watcher=debug`.
pub fn filter_directives(config: &LoggingConfig) -> String {
    config
        .modules
        .iter()
        .fold(config.default.clone(), |mut directives, (target, level)| {
            directives.push_str(&format!(",{target}={level}"));
            directives
        })
}

/// Install the global subscriber. Only the first call has an effect.
///
/// Output goes to stderr so command output on stdout stays clean. The
/// `RUST_LOG` environment variable takes precedence over `config`.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        // A host application may already own the global subscriber
        if tracing_subscriber::registry().with(fmt_layer).try_init().is_err() {
            tracing::debug!("[logging] subscriber already installed");
        }
    });
}

/// Install the subscriber with default levels (`warn`).
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Log an event with handler context.
///
/// # Examples
/// ```ignore
/// log_event!("watcher", "registered", "{}", root.display());
/// log_event!("store", "closed");
/// ```
#[macro_export]
macro_rules! log_event {
    ($handler:expr, $event:expr) => {
        tracing::info!("[{}] {}", $handler, $event)
    };
    ($handler:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $handler, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("dispatcher", "subscribed", "'{name}' listener {id}");
/// ```
#[macro_export]
macro_rules! debug_event {
    ($handler:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $handler, $event)
    };
    ($handler:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $handler, $event, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        let mut config = LoggingConfig::default();
        assert_eq!(filter_directives(&config), "warn");

        config.default = "info".to_string();
        config
            .modules
            .insert("rocketdesk::store".to_string(), "trace".to_string());
        config
            .modules
            .insert("rocketdesk::watcher".to_string(), "debug".to_string());
        assert_eq!(
            filter_directives(&config),
            "info,rocketdesk::store=trace,rocketdesk::watcher=debug"
        );
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init();
        init_with_config(&LoggingConfig::default());
    }
}
