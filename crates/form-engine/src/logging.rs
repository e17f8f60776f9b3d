//! Logging for hosts embedding the engine.
//!
//! The engine logs through `tracing`. Hosts with their own subscriber only
//! need [`set_log_data`]; others can install one with [`init_logging`] or
//! scope one with [`subscriber`].
//!
//! # Log Levels
//!
//! - `warn`: formula failures, the recomputation circuit breaker
//! - `debug`: bridge transitions, dropped stale results, formula `log` calls
//! - `trace`: dependency gating decisions
//!
//! Field values are clinical data. They only reach the logs through
//! [`redact_value`], which hides them until data logging is enabled.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::subscriber::SetGlobalDefaultError;
use tracing::{Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;

static LOG_DATA_ENABLED: AtomicBool = AtomicBool::new(false);

/// Placeholder logged instead of field values.
pub const REDACTED_VALUE: &str = "[REDACTED]";

/// Allows field values in the logs, process-wide.
pub fn set_log_data(enabled: bool) {
    LOG_DATA_ENABLED.store(enabled, Ordering::Release);
}

pub fn log_data_enabled() -> bool {
    LOG_DATA_ENABLED.load(Ordering::Acquire)
}

/// Returns the input value when data logging is enabled, otherwise a
/// redacted token.
pub fn redact_value(value: &str) -> &str {
    if log_data_enabled() {
        value
    } else {
        REDACTED_VALUE
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level of the engine crates; everything else logs warnings only.
    pub level: Level,
    pub format: LogFormat,
    /// Let `RUST_LOG` replace the configured filter.
    pub use_env: bool,
    /// Whether field values may be logged.
    pub log_data: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::default(),
            use_env: true,
            log_data: false,
        }
    }
}

impl LogConfig {
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env(mut self, enable: bool) -> Self {
        self.use_env = enable;
        self
    }

    #[must_use]
    pub fn with_log_data(mut self, enable: bool) -> Self {
        self.log_data = enable;
        self
    }

    /// Filter directives for the configured level.
    pub fn directives(&self) -> String {
        let level = self.level.as_str().to_lowercase();
        format!("warn,form_engine={level},form_store={level},form_model={level}")
    }

    fn env_filter(&self) -> EnvFilter {
        if self.use_env
            && let Ok(filter) = EnvFilter::try_from_default_env()
        {
            return filter;
        }
        EnvFilter::new(self.directives())
    }
}

/// Builds a subscriber writing to `writer`, for hosts that scope it
/// themselves (`tracing::subscriber::set_default`). Does not touch the
/// data logging flag.
pub fn subscriber<W>(config: &LogConfig, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(config.env_filter());
    match config.format {
        LogFormat::Json => Box::new(registry.with(fmt::layer().json().with_writer(writer))),
        LogFormat::Pretty => Box::new(
            registry.with(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(false)
                    .without_time(),
            ),
        ),
    }
}

/// Installs a stderr subscriber as the global default and applies the
/// data logging flag.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), SetGlobalDefaultError> {
    tracing::subscriber::set_global_default(subscriber(config, io::stderr))?;
    set_log_data(config.log_data);
    Ok(())
}
