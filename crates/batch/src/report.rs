//! Per-run results and the caller-facing summary.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// One successful (or, for dry runs, previewed) per-object outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RunEntry {
    Mapped { source: String, target: String },
    Removed { object: String },
    WouldRemove { object: String },
}

/// Outcome of one run task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Objects affected (or that would be, for dry runs).
    pub count: usize,
    pub entries: Vec<RunEntry>,
    pub errors: Vec<String>,
}

impl RunResult {
    /// A run that failed as a whole, e.g. because its worker panicked.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, entry: RunEntry) {
        self.count += 1;
        self.entries.push(entry);
    }

    pub(crate) fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// Results of a batch, keyed by run name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub runs: BTreeMap<String, RunResult>,
}

impl BatchReport {
    pub fn run(&self, name: &str) -> Option<&RunResult> {
        self.runs.get(name)
    }

    pub fn successes(&self) -> usize {
        self.runs.values().map(|r| r.count).sum()
    }

    pub fn error_count(&self) -> usize {
        self.runs.values().map(|r| r.errors.len()).sum()
    }

    /// All errors as `run: message`, ordered by run name.
    pub fn errors(&self) -> impl Iterator<Item = String> + '_ {
        self.runs
            .iter()
            .flat_map(|(run, result)| result.errors.iter().map(move |e| format!("{run}: {e}")))
    }

    /// Totals plus the first `max_shown` errors.
    pub fn summary(&self, max_shown: usize) -> BatchSummary {
        let errors = self.error_count();
        let shown_errors: Vec<String> = self.errors().take(max_shown).collect();
        BatchSummary {
            successes: self.successes(),
            errors,
            hidden_errors: errors - shown_errors.len(),
            shown_errors,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Condensed view of a [`BatchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub successes: usize,
    pub errors: usize,
    pub shown_errors: Vec<String>,
    pub hidden_errors: usize,
}

impl BatchSummary {
    /// Errors were reported and nothing succeeded.
    pub fn is_failure(&self) -> bool {
        self.errors > 0 && self.successes == 0
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} object(s) processed, {} error(s)",
            self.successes, self.errors
        )?;
        for error in &self.shown_errors {
            write!(f, "\n  - {error}")?;
        }
        if self.hidden_errors > 0 {
            write!(f, "\n  ... and {} more error(s)", self.hidden_errors)?;
        }
        Ok(())
    }
}
