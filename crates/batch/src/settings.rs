//! Engine settings read from the environment (`CRYOCAT_*`).

use std::path::PathBuf;

/// Worker pool size when nothing else is configured.
pub const DEFAULT_WORKERS: usize = 8;

/// Errors listed in a summary before the rest are only counted.
pub const DEFAULT_MAX_ERRORS_SHOWN: usize = 10;

/// Runtime options for batch operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Project configuration file.
    pub config_path: Option<PathBuf>,
    /// Concurrent run tasks (minimum 1).
    pub workers: usize,
    pub max_errors_shown: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            workers: DEFAULT_WORKERS,
            max_errors_shown: DEFAULT_MAX_ERRORS_SHOWN,
        }
    }
}

impl EngineSettings {
    /// Load settings from environment variables with defaults.
    ///
    /// | Env Var                    | Default |
    /// |----------------------------|---------|
    /// | `CRYOCAT_CONFIG`           | unset   |
    /// | `CRYOCAT_WORKERS`          | `8`     |
    /// | `CRYOCAT_MAX_ERRORS_SHOWN` | `10`    |
    ///
    /// Unparseable numbers fall back to the default with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let config_path = lookup("CRYOCAT_CONFIG")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let workers = parse_or("CRYOCAT_WORKERS", lookup("CRYOCAT_WORKERS"), DEFAULT_WORKERS).max(1);
        let max_errors_shown = parse_or(
            "CRYOCAT_MAX_ERRORS_SHOWN",
            lookup("CRYOCAT_MAX_ERRORS_SHOWN"),
            DEFAULT_MAX_ERRORS_SHOWN,
        );

        Self {
            config_path,
            workers,
            max_errors_shown,
        }
    }
}

fn parse_or(key: &str, raw: Option<String>, default: usize) -> usize {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, default, "Ignoring invalid setting");
            default
        }
    }
}
