//! Entity kinds, their identity field schema, and concrete entity identities.
//!
//! Each [`EntityKind`] has a fixed tuple of [`Field`]s joined by fixed
//! separators into its canonical URI:
//!
//! | Kind           | Canonical form                           |
//! |----------------|------------------------------------------|
//! | `picks`        | `object_name:user_id/session_id`         |
//! | `mesh`         | `object_name:user_id/session_id`         |
//! | `segmentation` | `name:user_id/session_id@voxel_spacing`  |
//! | `tomogram`     | `tomo_type@voxel_spacing`                |
//! | `feature`      | `tomo_type@voxel_spacing:feature_type`   |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Characters that separate identity fields in a canonical URI.
pub const SEPARATORS: &[char] = &[':', '/', '@'];

/// Characters that turn a URI field into a glob pattern.
pub const WILDCARDS: &[char] = &['*', '?', '['];

/// Characters never allowed inside a concrete identity field value.
const FORBIDDEN_IN_VALUES: &[char] = &[':', '/', '@', '*', '?', '[', ']', '{', '}'];

/// Storage suffix of feature stores; a tomogram type ending in it would be
/// listed as a feature instead.
const FEATURES_TOKEN: &str = "_features";

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// A single identity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    ObjectName,
    UserId,
    SessionId,
    Name,
    TomoType,
    VoxelSpacing,
    FeatureType,
}

impl Field {
    /// Placeholder / serialized name of the field.
    pub fn name(self) -> &'static str {
        match self {
            Self::ObjectName => "object_name",
            Self::UserId => "user_id",
            Self::SessionId => "session_id",
            Self::Name => "name",
            Self::TomoType => "tomo_type",
            Self::VoxelSpacing => "voxel_spacing",
            Self::FeatureType => "feature_type",
        }
    }

    /// Parse a placeholder name such as `session_id`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "object_name" => Some(Self::ObjectName),
            "user_id" => Some(Self::UserId),
            "session_id" => Some(Self::SessionId),
            "name" => Some(Self::Name),
            "tomo_type" => Some(Self::TomoType),
            "voxel_spacing" => Some(Self::VoxelSpacing),
            "feature_type" => Some(Self::FeatureType),
            _ => None,
        }
    }

    /// Fields that end up as `_`-delimited tokens in storage names.
    fn forbids_underscore(self) -> bool {
        matches!(self, Self::UserId | Self::SessionId | Self::FeatureType)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

/// The closed set of addressable entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Picks,
    Mesh,
    Segmentation,
    Tomogram,
    Feature,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        Self::Picks,
        Self::Mesh,
        Self::Segmentation,
        Self::Tomogram,
        Self::Feature,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Picks => "picks",
            Self::Mesh => "mesh",
            Self::Segmentation => "segmentation",
            Self::Tomogram => "tomogram",
            Self::Feature => "feature",
        }
    }

    /// Identity fields in canonical order.
    pub fn fields(self) -> &'static [Field] {
        match self {
            Self::Picks | Self::Mesh => &[Field::ObjectName, Field::UserId, Field::SessionId],
            Self::Segmentation => &[
                Field::Name,
                Field::UserId,
                Field::SessionId,
                Field::VoxelSpacing,
            ],
            Self::Tomogram => &[Field::TomoType, Field::VoxelSpacing],
            Self::Feature => &[Field::TomoType, Field::VoxelSpacing, Field::FeatureType],
        }
    }

    /// Separators between consecutive fields; always `fields().len() - 1` long.
    pub fn separators(self) -> &'static [char] {
        match self {
            Self::Picks | Self::Mesh => &[':', '/'],
            Self::Segmentation => &[':', '/', '@'],
            Self::Tomogram => &['@'],
            Self::Feature => &['@', ':'],
        }
    }

    /// Human-readable grammar, used in error messages.
    pub fn grammar(self) -> &'static str {
        match self {
            Self::Picks | Self::Mesh => "object_name:user_id/session_id",
            Self::Segmentation => "name:user_id/session_id@voxel_spacing",
            Self::Tomogram => "tomo_type@voxel_spacing",
            Self::Feature => "tomo_type@voxel_spacing:feature_type",
        }
    }

    pub fn has_field(self, field: Field) -> bool {
        self.fields().contains(&field)
    }

    /// Split a URI string into this kind's raw field values.
    ///
    /// Only the separator structure is checked here; field contents are
    /// validated by the caller (patterns allow wildcards, identities don't).
    pub fn split_fields(self, uri: &str) -> Result<Vec<String>, CoreError> {
        let mut values = Vec::with_capacity(self.fields().len());
        let mut rest = uri;

        for sep in self.separators() {
            let Some((head, tail)) = rest.split_once(*sep) else {
                return Err(CoreError::invalid_uri(
                    uri,
                    format!("expected {} URI of the form '{}'", self, self.grammar()),
                ));
            };
            values.push(head.to_string());
            rest = tail;
        }

        if rest.contains(SEPARATORS) {
            return Err(CoreError::invalid_uri(
                uri,
                format!(
                    "too many separators for {} URI '{}'",
                    self,
                    self.grammar()
                ),
            ));
        }
        values.push(rest.to_string());

        for (field, value) in self.fields().iter().zip(&values) {
            if value.is_empty() {
                return Err(CoreError::invalid_uri(uri, format!("{field} is empty")));
            }
        }

        Ok(values)
    }

    /// Join field values with this kind's separators.
    pub(crate) fn join<S: AsRef<str>>(self, values: &[S]) -> String {
        let mut out = String::new();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                out.push(self.separators()[i - 1]);
            }
            out.push_str(value.as_ref());
        }
        out
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "picks" => Ok(Self::Picks),
            "mesh" => Ok(Self::Mesh),
            "segmentation" => Ok(Self::Segmentation),
            "tomogram" => Ok(Self::Tomogram),
            "feature" | "features" => Ok(Self::Feature),
            other => Err(CoreError::Validation(format!(
                "Unknown entity kind '{other}'. Must be one of: picks, mesh, segmentation, tomogram, feature"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Voxel spacing helpers
// ---------------------------------------------------------------------------

/// Parse a voxel spacing, rejecting non-positive or non-finite values.
pub fn parse_voxel_spacing(raw: &str) -> Result<f64, CoreError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| CoreError::Validation(format!("Invalid voxel spacing '{raw}'")))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(CoreError::Validation(format!(
            "Voxel spacing must be a positive number, got '{raw}'"
        )));
    }
    Ok(value)
}

/// Round to the three decimals used by storage names.
pub fn round_voxel_spacing(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Canonical URI rendering of a voxel spacing: `10.0`, `7.84`.
pub fn format_voxel_spacing(value: f64) -> String {
    let mut s = format!("{}", round_voxel_spacing(value));
    if !s.contains('.') {
        s.push_str(".0");
    }
    s
}

/// Whether two voxel spacings refer to the same storage directory.
pub fn same_voxel_spacing(a: f64, b: f64) -> bool {
    (round_voxel_spacing(a) - round_voxel_spacing(b)).abs() < 1e-9
}

/// Validate a concrete value for `field`.
pub fn validate_field_value(field: Field, value: &str) -> Result<(), CoreError> {
    if value.is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    if field == Field::VoxelSpacing {
        return parse_voxel_spacing(value).map(|_| ());
    }
    if let Some(c) = value.chars().find(|c| FORBIDDEN_IN_VALUES.contains(c)) {
        return Err(CoreError::Validation(format!(
            "{field} '{value}' contains reserved character '{c}'"
        )));
    }
    if field == Field::TomoType && value.ends_with(FEATURES_TOKEN) {
        return Err(CoreError::Validation(format!(
            "{field} '{value}' must not end with '{FEATURES_TOKEN}'"
        )));
    }
    if field.forbids_underscore() && value.contains('_') {
        return Err(CoreError::Validation(format!(
            "{field} '{value}' must not contain '_'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Concrete identity of one entity within a run.
///
/// Values are stored in the kind's field order; voxel spacings are kept in
/// canonical form so that equality, hashing and ordering follow the
/// canonical URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawEntityId")]
pub struct EntityId {
    kind: EntityKind,
    values: Vec<String>,
}

/// Unchecked wire form of [`EntityId`].
#[derive(Deserialize)]
struct RawEntityId {
    kind: EntityKind,
    values: Vec<String>,
}

impl TryFrom<RawEntityId> for EntityId {
    type Error = CoreError;

    fn try_from(raw: RawEntityId) -> Result<Self, Self::Error> {
        Self::from_values(raw.kind, raw.values)
    }
}

impl EntityId {
    /// Build an identity from values in the kind's field order.
    pub fn from_values<I, S>(kind: EntityKind, values: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut normalized: Vec<String> = values.into_iter().map(Into::into).collect();
        if normalized.len() != kind.fields().len() {
            return Err(CoreError::Validation(format!(
                "{kind} identity needs {} fields, got {}",
                kind.fields().len(),
                normalized.len()
            )));
        }
        for (field, value) in kind.fields().iter().zip(normalized.iter_mut()) {
            validate_field_value(*field, value)?;
            if *field == Field::VoxelSpacing {
                *value = format_voxel_spacing(parse_voxel_spacing(value)?);
            }
        }
        Ok(Self {
            kind,
            values: normalized,
        })
    }

    /// Parse a concrete (wildcard-free) canonical URI.
    pub fn parse(kind: EntityKind, uri: &str) -> Result<Self, CoreError> {
        let values = kind.split_fields(uri)?;
        Self::from_values(kind, values).map_err(|e| match e {
            CoreError::Validation(reason) => CoreError::invalid_uri(uri, reason),
            other => other,
        })
    }

    pub fn picks(object_name: &str, user_id: &str, session_id: &str) -> Result<Self, CoreError> {
        Self::from_values(EntityKind::Picks, [object_name, user_id, session_id])
    }

    pub fn mesh(object_name: &str, user_id: &str, session_id: &str) -> Result<Self, CoreError> {
        Self::from_values(EntityKind::Mesh, [object_name, user_id, session_id])
    }

    pub fn segmentation(
        name: &str,
        user_id: &str,
        session_id: &str,
        voxel_spacing: f64,
    ) -> Result<Self, CoreError> {
        let vs = format_voxel_spacing(voxel_spacing);
        Self::from_values(
            EntityKind::Segmentation,
            [name, user_id, session_id, vs.as_str()],
        )
    }

    pub fn tomogram(tomo_type: &str, voxel_spacing: f64) -> Result<Self, CoreError> {
        let vs = format_voxel_spacing(voxel_spacing);
        Self::from_values(EntityKind::Tomogram, [tomo_type, vs.as_str()])
    }

    pub fn feature(
        tomo_type: &str,
        voxel_spacing: f64,
        feature_type: &str,
    ) -> Result<Self, CoreError> {
        let vs = format_voxel_spacing(voxel_spacing);
        Self::from_values(EntityKind::Feature, [tomo_type, vs.as_str(), feature_type])
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Value of `field`, or `None` if the kind has no such field.
    pub fn get(&self, field: Field) -> Option<&str> {
        self.kind
            .fields()
            .iter()
            .position(|f| *f == field)
            .map(|i| self.values[i].as_str())
    }

    /// Voxel spacing as a number, for kinds that carry one.
    pub fn voxel_spacing(&self) -> Option<f64> {
        self.get(Field::VoxelSpacing)
            .and_then(|v| parse_voxel_spacing(v).ok())
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Canonical URI string.
    pub fn canonical(&self) -> String {
        self.kind.join(&self.values)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn every_kind_has_one_separator_less_than_fields() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.separators().len() + 1, kind.fields().len(), "{kind}");
        }
    }

    #[test]
    fn parses_picks_uri() {
        let id = EntityId::parse(EntityKind::Picks, "ribosome:user1/session-001").unwrap();
        assert_eq!(id.get(Field::ObjectName), Some("ribosome"));
        assert_eq!(id.get(Field::UserId), Some("user1"));
        assert_eq!(id.get(Field::SessionId), Some("session-001"));
        assert_eq!(id.get(Field::VoxelSpacing), None);
        assert_eq!(id.canonical(), "ribosome:user1/session-001");
    }

    #[test]
    fn parses_feature_uri_in_field_order() {
        let id = EntityId::parse(EntityKind::Feature, "wbp@10:cellcanvas").unwrap();
        assert_eq!(id.get(Field::TomoType), Some("wbp"));
        assert_eq!(id.get(Field::VoxelSpacing), Some("10.0"));
        assert_eq!(id.get(Field::FeatureType), Some("cellcanvas"));
        assert_eq!(id.to_string(), "wbp@10.0:cellcanvas");
    }

    #[test]
    fn segmentation_voxel_spacing_is_normalized() {
        let a = EntityId::parse(EntityKind::Segmentation, "membrane:u/s@10").unwrap();
        let b = EntityId::segmentation("membrane", "u", "s", 10.0).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.voxel_spacing(), Some(10.0));
    }

    #[test]
    fn missing_separator_is_invalid_uri() {
        let err = EntityId::parse(EntityKind::Picks, "ribosome:user1").unwrap_err();
        assert_matches!(err, CoreError::InvalidUri { .. });
    }

    #[test]
    fn extra_separator_is_invalid_uri() {
        let err = EntityId::parse(EntityKind::Tomogram, "wbp@10.0@5").unwrap_err();
        assert_matches!(err, CoreError::InvalidUri { .. });

        let err = EntityId::parse(EntityKind::Picks, "a:b/c/d").unwrap_err();
        assert_matches!(err, CoreError::InvalidUri { .. });
    }

    #[test]
    fn empty_field_is_invalid_uri() {
        let err = EntityId::parse(EntityKind::Picks, ":user1/s").unwrap_err();
        assert_matches!(err, CoreError::InvalidUri { .. });
    }

    #[test]
    fn underscore_in_user_id_rejected() {
        assert!(EntityId::picks("ribosome", "user_1", "s").is_err());
        assert!(EntityId::picks("large_ribosome", "user1", "s").is_ok());
    }

    #[test]
    fn tomo_type_cannot_look_like_a_feature_store() {
        assert_matches!(
            EntityId::tomogram("wbp_features", 10.0),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            EntityId::feature("wbp_features", 10.0, "cellcanvas"),
            Err(CoreError::Validation(_))
        );
        assert!(EntityId::tomogram("wbp_features-v2", 10.0).is_ok());
        assert!(EntityId::tomogram("denoised_wbp", 10.0).is_ok());
    }

    #[test]
    fn deserialized_ids_are_validated_and_normalized() {
        let id: EntityId =
            serde_json::from_str(r#"{"kind":"tomogram","values":["wbp","10"]}"#).unwrap();
        assert_eq!(id, EntityId::tomogram("wbp", 10.0).unwrap());
        assert_eq!(serde_json::to_value(&id).unwrap()["values"][1], "10.0");

        assert!(serde_json::from_str::<EntityId>(r#"{"kind":"picks","values":["r","user_1","s"]}"#).is_err());
        assert!(serde_json::from_str::<EntityId>(r#"{"kind":"picks","values":["r","u"]}"#).is_err());
    }

    #[test]
    fn non_numeric_voxel_spacing_is_invalid_uri() {
        let err = EntityId::parse(EntityKind::Tomogram, "wbp@ten").unwrap_err();
        assert_matches!(err, CoreError::InvalidUri { .. });
        assert!(EntityId::tomogram("wbp", -1.0).is_err());
    }

    #[test]
    fn voxel_spacing_formatting() {
        assert_eq!(format_voxel_spacing(10.0), "10.0");
        assert_eq!(format_voxel_spacing(7.84), "7.84");
        assert_eq!(format_voxel_spacing(13.4800001), "13.48");
        assert!(same_voxel_spacing(10.0, 10.0004));
        assert!(!same_voxel_spacing(10.0, 10.01));
    }

    #[test]
    fn kind_from_str() {
        assert_eq!("picks".parse::<EntityKind>().unwrap(), EntityKind::Picks);
        assert_eq!("features".parse::<EntityKind>().unwrap(), EntityKind::Feature);
        assert!("volume".parse::<EntityKind>().is_err());
    }
}
