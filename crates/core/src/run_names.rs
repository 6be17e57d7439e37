//! Run-name transformation for imported datasets.
//!
//! Deposit-style workflows derive catalog run names from external names by
//! optionally extracting a regex capture and then prepending a prefix.

use regex::Regex;

use crate::error::CoreError;

/// Maps external dataset names to run names.
#[derive(Debug, Clone, Default)]
pub struct RunNameTransform {
    prefix: Option<String>,
    regex: Option<Regex>,
}

impl RunNameTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Extract the run name with `pattern`: the first capture group if the
    /// expression has one, otherwise the whole match.
    pub fn with_regex(mut self, pattern: &str) -> Result<Self, CoreError> {
        let regex = Regex::new(pattern).map_err(|e| {
            CoreError::Validation(format!("Invalid run name regex '{pattern}': {e}"))
        })?;
        self.regex = Some(regex);
        Ok(self)
    }

    /// Apply the transform to `name`.
    pub fn apply(&self, name: &str) -> Result<String, CoreError> {
        let base = match &self.regex {
            Some(regex) => {
                let caps = regex.captures(name).ok_or_else(|| {
                    CoreError::Validation(format!(
                        "Run name '{name}' does not match '{}'",
                        regex.as_str()
                    ))
                })?;
                caps.get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default()
            }
            None => name.to_string(),
        };

        if base.is_empty() {
            return Err(CoreError::Validation(format!(
                "Run name derived from '{name}' is empty"
            )));
        }

        Ok(match &self.prefix {
            Some(prefix) => format!("{prefix}{base}"),
            None => base,
        })
    }
}
