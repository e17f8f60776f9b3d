//! Engine settings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Default language in which values are displayed and written.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Consecutive computation-driven transitions after which no new
/// computations are scheduled.
pub const DEFAULT_MAX_RECOMPUTE_DEPTH: usize = 1000;

/// Settings shared by every bridge of a form tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Language in which values are displayed and written.
    pub language: String,

    /// Data owner recorded on values written without an explicit owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responsible: Option<String>,

    /// Circuit breaker for formula cycles.
    pub max_recompute_depth: usize,

    /// A value date further than this from the displayed contact is
    /// reported as discordant.
    pub discordance_window_hours: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            responsible: None,
            max_recompute_depth: DEFAULT_MAX_RECOMPUTE_DEPTH,
            discordance_window_hours: 24,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document. Missing keys take their
    /// defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| EngineError::Config(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.language.trim().is_empty() {
            return Err(EngineError::Config("language must not be empty".to_string()));
        }
        if self.max_recompute_depth == 0 {
            return Err(EngineError::Config(
                "max_recompute_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    #[must_use]
    pub fn with_responsible(mut self, responsible: impl Into<String>) -> Self {
        self.responsible = Some(responsible.into());
        self
    }

    #[must_use]
    pub fn with_max_recompute_depth(mut self, depth: usize) -> Self {
        self.max_recompute_depth = depth;
        self
    }

    /// The discordance window in milliseconds.
    #[must_use]
    pub fn discordance_window_millis(&self) -> i64 {
        i64::from(self.discordance_window_hours) * 3_600_000
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "language={} max_recompute_depth={} discordance_window={}h",
            self.language, self.max_recompute_depth, self.discordance_window_hours
        )
    }
}
