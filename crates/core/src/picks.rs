//! Point annotation document stored for each picks entity.

use serde::{Deserialize, Serialize};

fn default_unit() -> String {
    "angstrom".to_string()
}

fn default_trust_orientation() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A single picked point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub location: Location,
    /// Row-major 4x4 local transform.
    #[serde(
        rename = "transformation_",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transformation: Option<[[f64; 4]; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Point {
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self {
            location: Location { x, y, z },
            transformation: None,
            instance_id: None,
            score: None,
        }
    }
}

/// The JSON document behind a picks entity.
///
/// Identity fields are duplicated in the header. The storage path is the
/// identity of record; typed writes stamp the header to match it, while
/// copies keep the source document byte for byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PicksFile {
    pub pickable_object_name: String,
    pub user_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voxel_spacing: Option<f64>,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub points: Vec<Point>,
    #[serde(default = "default_trust_orientation")]
    pub trust_orientation: bool,
}

impl PicksFile {
    /// An empty document for a new picks entity.
    pub fn empty(object_name: &str, user_id: &str, session_id: &str, run_name: &str) -> Self {
        Self {
            pickable_object_name: object_name.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            run_name: Some(run_name.to_string()),
            voxel_spacing: None,
            unit: default_unit(),
            points: Vec::new(),
            trust_orientation: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied_when_missing() {
        let doc: PicksFile = serde_json::from_str(
            r#"{ "pickable_object_name": "ribosome", "user_id": "u", "session_id": "s" }"#,
        )
        .unwrap();
        assert_eq!(doc.unit, "angstrom");
        assert!(doc.trust_orientation);
        assert!(doc.points.is_empty());
        assert!(doc.run_name.is_none());
    }

    #[test]
    fn transformation_uses_trailing_underscore_key() {
        let mut point = Point::at(1.0, 2.0, 3.0);
        point.transformation = Some([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        let json = serde_json::to_value(&point).unwrap();
        assert!(json.get("transformation_").is_some());
        assert!(json.get("instance_id").is_none());
    }
}
