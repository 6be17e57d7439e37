use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cryocat_core::config::{PickableObject, ProjectConfig};
use cryocat_core::{EntityId, EntityKind};
use cryocat_store::{CodecRegistry, EntityCodec, Layer, MemoryLayer, Payload, Root, StoreError, StoreResult};

pub fn test_config() -> ProjectConfig {
    ProjectConfig {
        name: "batch-tests".to_string(),
        description: String::new(),
        version: "0.1.0".to_string(),
        pickable_objects: vec![
            PickableObject::new("ribosome", 1, true),
            PickableObject::new("membrane", 2, false),
        ],
        overlay_root: "/overlay".to_string(),
        static_root: Some("/static".to_string()),
    }
}

/// Overlay layer wrapper whose deletes fail while `fail_deletes` is set.
#[derive(Debug)]
pub struct FaultyLayer {
    pub inner: MemoryLayer,
    pub fail_deletes: AtomicBool,
}

impl FaultyLayer {
    pub fn new() -> Self {
        Self {
            inner: MemoryLayer::new("overlay"),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

impl Layer for FaultyLayer {
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.list(prefix)
    }

    fn exists(&self, path: &str) -> StoreResult<bool> {
        self.inner.exists(path)
    }

    fn is_dir(&self, path: &str) -> StoreResult<bool> {
        self.inner.is_dir(path)
    }

    fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.inner.read(path)
    }

    fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        self.inner.write(path, data)
    }

    fn create_dir(&self, path: &str) -> StoreResult<()> {
        self.inner.create_dir(path)
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "injected failure"),
            });
        }
        self.inner.delete(path)
    }
}

/// Picks codec that tracks how many loads overlap and panics on any load
/// inside `panic_in_run`.
#[derive(Debug, Default)]
pub struct InstrumentedCodec {
    delay: Duration,
    panic_in_run: Option<String>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl InstrumentedCodec {
    pub fn new(delay: Duration, panic_in_run: Option<&str>) -> Self {
        Self {
            delay,
            panic_in_run: panic_in_run.map(str::to_string),
            ..Self::default()
        }
    }

    /// Highest number of loads seen running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl EntityCodec for InstrumentedCodec {
    fn load(&self, layer: &dyn Layer, path: &str) -> StoreResult<Payload> {
        if let Some(run) = &self.panic_in_run {
            if path.contains(&format!("/{run}/")) {
                panic!("codec failure inside {run}");
            }
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let bytes = layer.read(path);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Payload::single(bytes?))
    }

    fn store(
        &self,
        layer: &dyn Layer,
        path: &str,
        _run: &str,
        _id: &EntityId,
        payload: &Payload,
    ) -> StoreResult<()> {
        layer.write(path, payload.bytes().unwrap_or_default())
    }
}

pub struct Fixture {
    pub root: Root,
    pub overlay: Arc<FaultyLayer>,
    pub static_layer: Arc<MemoryLayer>,
}

pub fn fixture() -> Fixture {
    let overlay = Arc::new(FaultyLayer::new());
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

/// Same layers as [`fixture`], with `codec` handling picks.
pub fn fixture_with_picks_codec(codec: Arc<InstrumentedCodec>) -> Fixture {
    let overlay = Arc::new(FaultyLayer::new());
    let static_layer = Arc::new(MemoryLayer::new("static"));
    let mut codecs = CodecRegistry::default();
    codecs.set(EntityKind::Picks, codec);
    let root = Root::with_codecs(
        test_config(),
        overlay.clone(),
        Some(static_layer.clone() as Arc<dyn Layer>),
        codecs,
    )
    .expect("fixture config is valid");
    Fixture {
        root,
        overlay,
        static_layer,
    }
}

pub fn picks_path(run: &str, user: &str, session: &str, object: &str) -> String {
    format!("ExperimentRuns/{run}/Picks/{user}_{session}_{object}.json")
}

pub fn picks_json(object: &str, user: &str, session: &str, x: f64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "pickable_object_name": object,
        "user_id": user,
        "session_id": session,
        "points": [
            { "location": { "x": x, "y": 0.0, "z": 0.0 }, "score": 0.5 },
            { "location": { "x": x + 1.0, "y": 0.0, "z": 0.0 } }
        ]
    }))
    .expect("picks fixture serializes")
}
