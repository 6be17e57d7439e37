//! Per-kind payload codecs.
//!
//! Format-specific handlers (zarr, glb, ...) live outside this crate and plug
//! in through [`EntityCodec`]. The defaults copy entity content verbatim;
//! picks documents are checked to parse before they are written.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use cryocat_core::picks::PicksFile;
use cryocat_core::{EntityId, EntityKind};

use crate::error::{StoreError, StoreResult};
use crate::layer::{join, walk_files, Layer};

/// Entity content as a set of files keyed by path relative to the entity.
///
/// Single-file entities use the empty key `""`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    pub files: BTreeMap<String, Vec<u8>>,
    /// Segmentation only: stored with the multilabel suffix.
    pub multilabel: bool,
}

impl Payload {
    pub fn single(bytes: impl Into<Vec<u8>>) -> Self {
        let mut files = BTreeMap::new();
        files.insert(String::new(), bytes.into());
        Self {
            files,
            multilabel: false,
        }
    }

    pub fn tree<I, K, V>(files: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            multilabel: false,
        }
    }

    pub fn with_multilabel(mut self, multilabel: bool) -> Self {
        self.multilabel = multilabel;
        self
    }

    /// Bytes of a single-file payload.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self.files.len() {
            1 => self.files.get("").map(Vec::as_slice),
            _ => None,
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

/// Reads and writes the content of one entity kind.
pub trait EntityCodec: Send + Sync {
    fn load(&self, layer: &dyn Layer, path: &str) -> StoreResult<Payload>;

    /// Write `payload` at `path` as the content of entity `id` in `run`.
    fn store(
        &self,
        layer: &dyn Layer,
        path: &str,
        run: &str,
        id: &EntityId,
        payload: &Payload,
    ) -> StoreResult<()>;
}

/// Byte-for-byte copy of a file or directory tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl EntityCodec for RawCodec {
    fn load(&self, layer: &dyn Layer, path: &str) -> StoreResult<Payload> {
        let mut files = BTreeMap::new();
        for rel in walk_files(layer, path)? {
            let bytes = layer.read(&join(&[path, rel.as_str()]))?;
            files.insert(rel, bytes);
        }
        Ok(Payload {
            files,
            multilabel: false,
        })
    }

    fn store(
        &self,
        layer: &dyn Layer,
        path: &str,
        _run: &str,
        _id: &EntityId,
        payload: &Payload,
    ) -> StoreResult<()> {
        if let Some(bytes) = payload.bytes() {
            return layer.write(path, bytes);
        }
        layer.create_dir(path)?;
        for (rel, bytes) in &payload.files {
            if rel.is_empty() {
                return Err(StoreError::Codec(format!(
                    "payload for '{path}' mixes a root file with nested files"
                )));
            }
            layer.write(&join(&[path, rel.as_str()]), bytes)?;
        }
        Ok(())
    }
}

/// Picks documents. Bytes are stored unchanged so copies stay identical to
/// their source, including header and point keys this crate does not model.
#[derive(Debug, Default, Clone, Copy)]
pub struct PicksCodec;

impl EntityCodec for PicksCodec {
    fn load(&self, layer: &dyn Layer, path: &str) -> StoreResult<Payload> {
        Ok(Payload::single(layer.read(path)?))
    }

    fn store(
        &self,
        layer: &dyn Layer,
        path: &str,
        run: &str,
        id: &EntityId,
        payload: &Payload,
    ) -> StoreResult<()> {
        let bytes = payload
            .bytes()
            .ok_or_else(|| StoreError::Codec("picks payload must be a single file".into()))?;
        serde_json::from_slice::<PicksFile>(bytes)?;
        tracing::trace!(run, target = %id, bytes = bytes.len(), "Writing picks document");
        layer.write(path, bytes)
    }
}

/// Codec lookup by entity kind.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<EntityKind, Arc<dyn EntityCodec>>,
}

impl CodecRegistry {
    /// Replace the codec used for `kind`.
    pub fn set(&mut self, kind: EntityKind, codec: Arc<dyn EntityCodec>) {
        self.codecs.insert(kind, codec);
    }

    pub fn get(&self, kind: EntityKind) -> &dyn EntityCodec {
        match self.codecs.get(&kind) {
            Some(codec) => codec.as_ref(),
            None => &RawCodec,
        }
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut codecs: HashMap<EntityKind, Arc<dyn EntityCodec>> = HashMap::new();
        codecs.insert(EntityKind::Picks, Arc::new(PicksCodec));
        for kind in [
            EntityKind::Mesh,
            EntityKind::Segmentation,
            EntityKind::Tomogram,
            EntityKind::Feature,
        ] {
            codecs.insert(kind, Arc::new(RawCodec));
        }
        Self { codecs }
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.codecs.keys().map(|k| k.name()).collect();
        kinds.sort_unstable();
        f.debug_struct("CodecRegistry").field("kinds", &kinds).finish()
    }
}
