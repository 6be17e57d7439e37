//! URI patterns used to select entities.
//!
//! A source URI is classified as one of:
//!
//! - **Literal**: every field is concrete; matches by field equality.
//! - **Glob**: at least one field contains `*`, `?` or `[`; matched against
//!   the canonical string (case-sensitive, `*` may span separators).
//! - **Regex**: the whole string is prefixed with `re:`; the remainder is a
//!   regular expression searched in the canonical string.

use std::fmt;

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;

use crate::error::CoreError;
use crate::kind::{
    format_voxel_spacing, parse_voxel_spacing, validate_field_value, EntityId, EntityKind, Field,
    WILDCARDS,
};

/// Prefix that switches a URI into regular-expression mode.
pub const REGEX_PREFIX: &str = "re:";

/// A parsed source URI.
#[derive(Debug, Clone)]
pub enum UriPattern {
    Literal(EntityId),
    Glob {
        kind: EntityKind,
        raw: String,
        matcher: GlobMatcher,
    },
    Regex {
        kind: EntityKind,
        raw: String,
        regex: Regex,
    },
}

impl UriPattern {
    /// Parse `uri` for `kind`.
    pub fn parse(kind: EntityKind, uri: &str) -> Result<Self, CoreError> {
        if let Some(expr) = uri.strip_prefix(REGEX_PREFIX) {
            if expr.is_empty() {
                return Err(CoreError::invalid_uri(uri, "empty regular expression"));
            }
            let regex = Regex::new(expr)
                .map_err(|e| CoreError::invalid_uri(uri, format!("bad regular expression: {e}")))?;
            return Ok(Self::Regex {
                kind,
                raw: uri.to_string(),
                regex,
            });
        }

        if uri.contains(['{', '}']) {
            return Err(CoreError::invalid_uri(
                uri,
                "placeholders are only allowed in target templates",
            ));
        }

        let values = kind.split_fields(uri)?;
        let is_glob = values.iter().any(|v| v.contains(WILDCARDS));

        if !is_glob {
            return EntityId::parse(kind, uri).map(Self::Literal);
        }

        // Concrete fields are still validated, and concrete voxel spacings are
        // normalized so that `@10` matches the canonical `@10.0`.
        let mut normalized = Vec::with_capacity(values.len());
        for (field, value) in kind.fields().iter().zip(values) {
            if value.contains(WILDCARDS) {
                normalized.push(value);
                continue;
            }
            validate_field_value(*field, &value)
                .map_err(|e| CoreError::invalid_uri(uri, e.to_string()))?;
            if *field == Field::VoxelSpacing {
                let vs = parse_voxel_spacing(&value)
                    .map_err(|e| CoreError::invalid_uri(uri, e.to_string()))?;
                normalized.push(format_voxel_spacing(vs));
            } else {
                normalized.push(value);
            }
        }

        let glob = GlobBuilder::new(&kind.join(&normalized))
            .literal_separator(false)
            .case_insensitive(false)
            .backslash_escape(true)
            .build()
            .map_err(|e| CoreError::invalid_uri(uri, format!("bad glob: {e}")))?;

        Ok(Self::Glob {
            kind,
            raw: uri.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Literal(id) => id.kind(),
            Self::Glob { kind, .. } | Self::Regex { kind, .. } => *kind,
        }
    }

    /// `true` for glob and regex URIs, which may select many entities.
    pub fn is_pattern(&self) -> bool {
        !matches!(self, Self::Literal(_))
    }

    /// Whether `id` is selected by this URI.
    pub fn matches(&self, id: &EntityId) -> bool {
        if id.kind() != self.kind() {
            return false;
        }
        match self {
            Self::Literal(expected) => expected == id,
            Self::Glob { matcher, .. } => matcher.is_match(id.canonical()),
            Self::Regex { regex, .. } => regex.is_match(&id.canonical()),
        }
    }

    /// The URI as written by the caller (canonical form for literals).
    pub fn as_str(&self) -> String {
        match self {
            Self::Literal(id) => id.canonical(),
            Self::Glob { raw, .. } | Self::Regex { raw, .. } => raw.clone(),
        }
    }
}

impl fmt::Display for UriPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Parse `uri` for `kind`; see [`UriPattern::parse`].
pub fn parse_pattern(kind: EntityKind, uri: &str) -> Result<UriPattern, CoreError> {
    UriPattern::parse(kind, uri)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
