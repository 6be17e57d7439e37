//! Target URI templates.
//!
//! A template is a target URI that may contain `{field}` placeholders, e.g.
//! `ribosome:backup/{session_id}`. Each matched source is rendered into one
//! concrete target identity by substituting its own field values.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::CoreError;
use crate::kind::{EntityId, EntityKind, Field, WILDCARDS};
use crate::uri::REGEX_PREFIX;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Field),
}

/// A validated target template for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTemplate {
    kind: EntityKind,
    raw: String,
    segments: Vec<Segment>,
}

impl TargetTemplate {
    /// Parse and validate a template.
    ///
    /// Rejects regex prefixes, wildcards, unbalanced braces, placeholders that
    /// are not fields of `kind`, and strings whose separator structure or
    /// literal field values do not form a valid identity.
    pub fn parse(kind: EntityKind, raw: &str) -> Result<Self, CoreError> {
        if raw.starts_with(REGEX_PREFIX) {
            return Err(CoreError::invalid_uri(
                raw,
                "a target cannot be a regular expression",
            ));
        }
        if raw.contains(WILDCARDS) {
            return Err(CoreError::invalid_uri(raw, "a target cannot contain wildcards"));
        }

        let segments = tokenize(kind, raw)?;
        let template = Self {
            kind,
            raw: raw.to_string(),
            segments,
        };

        // Render once with neutral stand-ins to validate the structure.
        let probe = template.substitute(|field| match field {
            Field::VoxelSpacing => "1.0".to_string(),
            _ => "x".to_string(),
        });
        EntityId::parse(kind, &probe).map_err(|e| match e {
            CoreError::InvalidUri { reason, .. } => CoreError::invalid_uri(raw, reason),
            other => other,
        })?;

        Ok(template)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn has_placeholders(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Placeholder(_)))
    }

    /// Fields referenced by placeholders, in order of appearance.
    pub fn placeholders(&self) -> Vec<Field> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(f) => Some(*f),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Render the concrete target identity for `source`.
    pub fn render(&self, source: &EntityId) -> Result<EntityId, CoreError> {
        if source.kind() != self.kind {
            return Err(CoreError::Validation(format!(
                "cannot render {} template from a {} source",
                self.kind,
                source.kind()
            )));
        }
        let rendered = self.substitute(|field| source.get(field).unwrap_or_default().to_string());
        EntityId::parse(self.kind, &rendered)
    }

    fn substitute(&self, value_of: impl Fn(Field) -> String) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(field) => out.push_str(&value_of(*field)),
            }
        }
        out
    }
}

impl fmt::Display for TargetTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn tokenize(kind: EntityKind, raw: &str) -> Result<Vec<Segment>, CoreError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    match n {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => {
                            return Err(CoreError::invalid_uri(raw, "nested '{' in placeholder"))
                        }
                        other => name.push(other),
                    }
                }
                if !closed {
                    return Err(CoreError::invalid_uri(raw, "unterminated placeholder"));
                }
                let field = Field::from_name(&name)
                    .filter(|f| kind.has_field(*f))
                    .ok_or_else(|| {
                        CoreError::invalid_uri(
                            raw,
                            format!("unknown placeholder {{{name}}} for {kind}"),
                        )
                    })?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(field));
            }
            '}' => return Err(CoreError::invalid_uri(raw, "unmatched '}'")),
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

// ---------------------------------------------------------------------------
// Target resolution
// ---------------------------------------------------------------------------

/// One source and the target it resolved to (or why it could not).
#[derive(Debug)]
pub struct TargetAssignment {
    pub source: EntityId,
    pub target: Result<EntityId, CoreError>,
}

/// Resolve targets for every matched source.
///
/// Returns [`CoreError::AmbiguousTarget`] when more than one source is given
/// and the template has no placeholders. Otherwise every source gets an
/// assignment; sources whose targets collide with another source's target
/// carry a [`CoreError::TargetCollision`] instead of a target.
pub fn resolve_targets(
    sources: &[EntityId],
    template: &TargetTemplate,
) -> Result<Vec<TargetAssignment>, CoreError> {
    if sources.len() > 1 && !template.has_placeholders() {
        return Err(CoreError::AmbiguousTarget {
            template: template.as_str().to_string(),
            matches: sources.len(),
        });
    }

    let mut assignments: Vec<TargetAssignment> = sources
        .iter()
        .map(|source| TargetAssignment {
            source: source.clone(),
            target: template.render(source),
        })
        .collect();

    let mut by_target: BTreeMap<EntityId, Vec<usize>> = BTreeMap::new();
    for (i, assignment) in assignments.iter().enumerate() {
        if let Ok(target) = &assignment.target {
            by_target.entry(target.clone()).or_default().push(i);
        }
    }

    for (target, indices) in by_target {
        if indices.len() < 2 {
            continue;
        }
        let colliding: Vec<String> = indices
            .iter()
            .map(|&i| assignments[i].source.canonical())
            .collect();
        for i in indices {
            assignments[i].target = Err(CoreError::TargetCollision {
                target: target.canonical(),
                sources: colliding.clone(),
            });
        }
    }

    Ok(assignments)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
