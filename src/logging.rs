//! Logging and tracing initialization.
//!
//! Structured logging via the `tracing` ecosystem, rendered either as
//! pretty console output or as JSON for log aggregation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::AppConfig;

/// Configuration for the logging system.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json: false,
            verbose: false,
        }
    }
}

impl From<&AppConfig> for LogConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            json: config.json_logs,
            verbose: config.verbose,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once, early in `main()`, after [`AppConfig`] is loaded; a second
/// call panics because the global subscriber is already set. Only events
/// from the `rpchost` target pass the default filter, at INFO, or DEBUG
/// when `verbose` is set. A `RUST_LOG` directive replaces that filter
/// entirely.
///
/// # Examples
///
/// ```ignore
/// use rpchost::logging::{self, LogConfig};
///
/// // Console output at INFO
/// logging::init(LogConfig::default());
///
/// // Lifecycle and per-connection DEBUG events
/// logging::init(LogConfig { verbose: true, ..Default::default() });
///
/// // One JSON object per event, span close events included
/// logging::init(LogConfig { json: true, ..Default::default() });
///
/// // Straight from the layered application config
/// logging::init(LogConfig::from(&app_config));
/// ```
pub fn init(config: LogConfig) {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("rpchost={}", default_level.as_str().to_lowercase()))
    });

    if config.json {
        // One JSON object per event, plus span close timings
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        // Compact terminal output without targets or source locations
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}

/// Rate limiter for log lines that can repeat in a tight loop, such as
/// accept failures while the process is out of file descriptors.
pub struct LogThrottle {
    interval_ms: u64,
    /// Stores the last log time in ms, or u64::MAX to indicate "never logged"
    last_log_ms: AtomicU64,
    start: Instant,
}

/// Sentinel value indicating the throttle has never logged
const NEVER_LOGGED: u64 = u64::MAX;

impl LogThrottle {
    /// Create a new throttle with the given minimum interval between logs.
    pub fn new(interval: std::time::Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_log_ms: AtomicU64::new(NEVER_LOGGED),
            start: Instant::now(),
        }
    }

    /// Returns true if enough time has passed since the last log.
    ///
    /// This is thread-safe and uses atomic operations.
    pub fn should_log(&self) -> bool {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);

        // First call (never logged) or enough time has passed
        let should = last == NEVER_LOGGED || now_ms.saturating_sub(last) >= self.interval_ms;

        if should {
            // Try to update; if we lose the race, another thread logged
            self.last_log_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        } else {
            false
        }
    }
}
