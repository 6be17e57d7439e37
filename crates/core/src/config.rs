//! Project configuration.
//!
//! A project is described by a JSON document naming the pickable objects
//! and the two storage roots:
//!
//! ```json
//! {
//!   "name": "demo",
//!   "description": "Example project",
//!   "version": "0.1.0",
//!   "pickable_objects": [
//!     { "name": "ribosome", "is_particle": true, "label": 1, "radius": 150.0 }
//!   ],
//!   "overlay_root": "local:///data/overlay",
//!   "static_root": "/data/static"
//! }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::kind::{validate_field_value, Field};

/// URL scheme accepted for storage roots.
const LOCAL_SCHEME: &str = "local://";

fn default_version() -> String {
    "0.1.0".to_string()
}

/// A registered object type that can be picked or meshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickableObject {
    pub name: String,
    pub is_particle: bool,
    /// Integer label used in label volumes. Unique per project.
    pub label: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<[u8; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emdb_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdb_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl PickableObject {
    pub fn new(name: impl Into<String>, label: i64, is_particle: bool) -> Self {
        Self {
            name: name.into(),
            is_particle,
            label,
            color: None,
            radius: None,
            emdb_id: None,
            pdb_id: None,
            identifier: None,
        }
    }
}

/// Top-level project configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub pickable_objects: Vec<PickableObject>,
    /// Writable overlay root. Required.
    pub overlay_root: String,
    /// Read-only static root. Optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_root: Option<String>,
}

impl ProjectConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::Config(format!("Invalid project config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("Cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Check name, object-name and label uniqueness, and root schemes.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Config("Project name must not be empty".into()));
        }

        let mut names = HashSet::with_capacity(self.pickable_objects.len());
        let mut labels = HashSet::with_capacity(self.pickable_objects.len());
        for object in &self.pickable_objects {
            validate_field_value(Field::ObjectName, &object.name)
                .map_err(|e| CoreError::Config(e.to_string()))?;
            if !names.insert(object.name.as_str()) {
                return Err(CoreError::Config(format!(
                    "Duplicate pickable object name: \"{}\"",
                    object.name
                )));
            }
            if !labels.insert(object.label) {
                return Err(CoreError::Config(format!(
                    "Duplicate pickable object label {} (\"{}\")",
                    object.label, object.name
                )));
            }
        }

        local_root_path(&self.overlay_root)?;
        if let Some(root) = &self.static_root {
            local_root_path(root)?;
        }
        Ok(())
    }

    pub fn pickable_object(&self, name: &str) -> Option<&PickableObject> {
        self.pickable_objects.iter().find(|o| o.name == name)
    }

    pub fn overlay_path(&self) -> Result<PathBuf, CoreError> {
        local_root_path(&self.overlay_root)
    }

    pub fn static_path(&self) -> Result<Option<PathBuf>, CoreError> {
        self.static_root.as_deref().map(local_root_path).transpose()
    }
}

/// Resolve a storage root string to a local directory.
///
/// Accepts plain paths and `local://` URLs. Any other scheme is rejected.
pub fn local_root_path(root: &str) -> Result<PathBuf, CoreError> {
    let root = root.trim();
    if root.is_empty() {
        return Err(CoreError::Config("Storage root must not be empty".into()));
    }
    if let Some(path) = root.strip_prefix(LOCAL_SCHEME) {
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = root.split_once("://") {
        return Err(CoreError::Config(format!(
            "Unsupported storage scheme '{scheme}://'. Only local paths are supported"
        )));
    }
    Ok(PathBuf::from(root))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
