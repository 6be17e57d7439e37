use std::sync::Arc;

use cryocat_core::config::{PickableObject, ProjectConfig};
use cryocat_store::{Layer, MemoryLayer, Root};

/// Project with `ribosome` and `membrane` registered.
pub fn test_config() -> ProjectConfig {
    ProjectConfig {
        name: "store-tests".to_string(),
        description: "two-layer fixture".to_string(),
        version: "0.1.0".to_string(),
        pickable_objects: vec![
            PickableObject::new("ribosome", 1, true),
            PickableObject::new("membrane", 2, false),
        ],
        overlay_root: "/overlay".to_string(),
        static_root: Some("/static".to_string()),
    }
}

/// A root over two in-memory layers, plus handles to both layers so tests
/// can seed and inspect them directly.
pub struct Fixture {
    pub root: Root,
    pub overlay: Arc<MemoryLayer>,
    pub static_layer: Arc<MemoryLayer>,
}

pub fn two_layer_root() -> Fixture {
    let overlay = Arc::new(MemoryLayer::new("overlay"));
    let static_layer = Arc::new(MemoryLayer::new("static"));
    let root = Root::new(
        test_config(),
        overlay.clone(),
        Some(static_layer.clone() as Arc<dyn Layer>),
    )
    .expect("fixture config is valid");
    Fixture {
        root,
        overlay,
        static_layer,
    }
}

/// Picks JSON document as a static layer would hold it.
pub fn picks_json(object: &str, user: &str, session: &str, run: &str, x: f64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "pickable_object_name": object,
        "user_id": user,
        "session_id": session,
        "run_name": run,
        "unit": "angstrom",
        "points": [{ "location": { "x": x, "y": 2.0, "z": 3.0 } }],
        "trust_orientation": true
    }))
    .expect("picks fixture serializes")
}
