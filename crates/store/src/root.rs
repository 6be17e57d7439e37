//! Entity store: the project root and its runs.
//!
//! All reads go through the [`LayerResolver`], so the overlay always shadows
//! the static layer. All writes land in the overlay. An entity whose only
//! instance is in the static layer cannot be overwritten or deleted.

use std::sync::Arc;

use cryocat_core::config::{PickableObject, ProjectConfig};
use cryocat_core::kind::{round_voxel_spacing, validate_field_value};
use cryocat_core::picks::PicksFile;
use cryocat_core::{CoreError, EntityId, EntityKind, Field};

use crate::codec::{CodecRegistry, Payload};
use crate::error::{StoreError, StoreResult};
use crate::layer::{Layer, LocalLayer};
use crate::layout::{
    candidate_paths, container_path, entity_path, parse_entry, parse_voxel_spacing_dir, run_path,
    voxel_spacing_path, RUNS_DIR,
};
use crate::resolver::{LayerResolver, Merged, Presence};

/// Marker written into freshly created zarr containers.
const ZARR_GROUP_FILE: &str = ".zgroup";
const ZARR_GROUP_BODY: &[u8] = br#"{"zarr_format": 2}"#;

/// Run names are single path segments.
fn validate_run_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(CoreError::Validation(format!("Invalid run name '{name}'")));
    }
    Ok(())
}

/// Voxel spacings rounded to storage precision, as an orderable key.
fn voxel_spacing_key(value: f64) -> i64 {
    (round_voxel_spacing(value) * 1000.0).round() as i64
}

fn zarr_stub() -> Payload {
    Payload::tree([(ZARR_GROUP_FILE, ZARR_GROUP_BODY.to_vec())])
}

// ---------------------------------------------------------------------------
// Listing records
// ---------------------------------------------------------------------------

/// A listed entity and where its authoritative instance lives.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub presence: Presence,
    /// Segmentations stored with the multilabel suffix.
    pub multilabel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelSpacing {
    pub value: f64,
    pub presence: Presence,
}

/// Resolved storage location of one entity identity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityLocation {
    pub presence: Presence,
    pub overlay_path: Option<String>,
    pub static_path: Option<String>,
    /// Multilabel flag of the authoritative instance.
    pub multilabel: bool,
}

impl EntityLocation {
    /// Path of the authoritative instance.
    pub fn authoritative_path(&self) -> Option<&str> {
        self.overlay_path
            .as_deref()
            .or(self.static_path.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RootInner {
    config: ProjectConfig,
    resolver: LayerResolver,
    codecs: CodecRegistry,
}

/// Project handle. Cheap to clone and safe to share across worker threads.
#[derive(Debug, Clone)]
pub struct Root {
    inner: Arc<RootInner>,
}

impl Root {
    pub fn new(
        config: ProjectConfig,
        overlay: Arc<dyn Layer>,
        static_layer: Option<Arc<dyn Layer>>,
    ) -> StoreResult<Self> {
        Self::with_codecs(config, overlay, static_layer, CodecRegistry::default())
    }

    pub fn with_codecs(
        config: ProjectConfig,
        overlay: Arc<dyn Layer>,
        static_layer: Option<Arc<dyn Layer>>,
        codecs: CodecRegistry,
    ) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RootInner {
                config,
                resolver: LayerResolver::new(overlay, static_layer),
                codecs,
            }),
        })
    }

    /// Open the local directories named by the configuration.
    pub fn from_config(config: ProjectConfig) -> StoreResult<Self> {
        let overlay: Arc<dyn Layer> = Arc::new(LocalLayer::new("overlay", config.overlay_path()?));
        let static_layer = config
            .static_path()?
            .map(|path| Arc::new(LocalLayer::new("static", path)) as Arc<dyn Layer>);

        tracing::info!(
            project = %config.name,
            overlay = %config.overlay_root,
            static_root = config.static_root.as_deref().unwrap_or("-"),
            "Opened project",
        );
        Self::new(config, overlay, static_layer)
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.inner.config
    }

    pub fn resolver(&self) -> &LayerResolver {
        &self.inner.resolver
    }

    pub fn pickable_object(&self, name: &str) -> Option<&PickableObject> {
        self.inner.config.pickable_object(name)
    }

    /// All runs of the merged view, ordered by name.
    pub fn runs(&self) -> StoreResult<Vec<Run>> {
        let names = self.resolver().list_names(RUNS_DIR)?;
        Ok(names
            .into_iter()
            .filter(|m| validate_run_name(&m.item).is_ok())
            .map(|Merged { item, presence }| Run {
                root: self.clone(),
                name: item,
                presence,
            })
            .collect())
    }

    pub fn run(&self, name: &str) -> StoreResult<Run> {
        validate_run_name(name)?;
        let presence = self.resolver().resolve(&run_path(name))?;
        if !presence.is_present() {
            return Err(StoreError::NotFound(format!("Run '{name}'")));
        }
        Ok(Run {
            root: self.clone(),
            name: name.to_string(),
            presence,
        })
    }

    /// Create an empty run in the overlay.
    pub fn new_run(&self, name: &str) -> StoreResult<Run> {
        validate_run_name(name)?;
        let path = run_path(name);
        if self.resolver().resolve(&path)?.is_present() {
            return Err(StoreError::Conflict(format!("Run '{name}' already exists")));
        }
        self.resolver().overlay().create_dir(&path)?;
        tracing::info!(run = %name, "Created run");
        Ok(Run {
            root: self.clone(),
            name: name.to_string(),
            presence: Presence::OverlayOnly,
        })
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// One run of the merged view.
#[derive(Debug, Clone)]
pub struct Run {
    root: Root,
    name: String,
    presence: Presence,
}

impl Run {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Presence of the run directory at the time the handle was obtained.
    pub fn presence(&self) -> Presence {
        self.presence
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    fn resolver(&self) -> &LayerResolver {
        self.root.resolver()
    }

    pub fn voxel_spacings(&self) -> StoreResult<Vec<VoxelSpacing>> {
        let merged = self.resolver().list_parsed(&run_path(&self.name), |name| {
            parse_voxel_spacing_dir(name).map(|vs| (voxel_spacing_key(vs), vs))
        })?;
        Ok(merged
            .into_iter()
            .map(|Merged { item, presence }| VoxelSpacing {
                value: item,
                presence,
            })
            .collect())
    }

    pub fn new_voxel_spacing(&self, value: f64) -> StoreResult<VoxelSpacing> {
        if !value.is_finite() || value <= 0.0 {
            return Err(CoreError::Validation(format!(
                "Voxel spacing must be a positive number, got {value}"
            ))
            .into());
        }
        let path = voxel_spacing_path(&self.name, value);
        if self.resolver().resolve(&path)?.is_present() {
            return Err(StoreError::Conflict(format!(
                "Voxel spacing {value} already exists in run '{}'",
                self.name
            )));
        }
        self.resolver().overlay().create_dir(&path)?;
        Ok(VoxelSpacing {
            value: round_voxel_spacing(value),
            presence: Presence::OverlayOnly,
        })
    }

    /// All entities of `kind` in the merged view, ordered by identity.
    pub fn list(&self, kind: EntityKind) -> StoreResult<Vec<Entity>> {
        let containers: Vec<(String, Option<f64>)> = match kind {
            EntityKind::Tomogram | EntityKind::Feature => self
                .voxel_spacings()?
                .into_iter()
                .filter_map(|vs| {
                    container_path(&self.name, kind, Some(vs.value)).map(|p| (p, Some(vs.value)))
                })
                .collect(),
            _ => container_path(&self.name, kind, None)
                .map(|p| (p, None))
                .into_iter()
                .collect(),
        };

        let mut entities = Vec::new();
        for (container, voxel_spacing) in containers {
            let merged = self.resolver().list_parsed(&container, |name| {
                let parsed = parse_entry(kind, voxel_spacing, name);
                if parsed.is_none() {
                    tracing::debug!(run = %self.name, entry = %name, kind = %kind, "Skipping unrecognised entry");
                }
                parsed.map(|(id, multilabel)| (id.clone(), (id, multilabel)))
            })?;
            entities.extend(merged.into_iter().map(|m| Entity {
                id: m.item.0,
                presence: m.presence,
                multilabel: m.item.1,
            }));
        }
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    /// Locate `id` in both layers.
    pub fn resolve(&self, id: &EntityId) -> StoreResult<EntityLocation> {
        let mut overlay_hit = None;
        let mut static_hit = None;
        for (path, multilabel) in candidate_paths(&self.name, id) {
            if overlay_hit.is_none() && self.resolver().overlay().exists(&path)? {
                overlay_hit = Some((path.clone(), multilabel));
            }
            if static_hit.is_none() {
                if let Some(layer) = self.resolver().static_layer() {
                    if layer.exists(&path)? {
                        static_hit = Some((path, multilabel));
                    }
                }
            }
        }

        let presence = Presence::from_flags(overlay_hit.is_some(), static_hit.is_some());
        let multilabel = overlay_hit
            .as_ref()
            .or(static_hit.as_ref())
            .is_some_and(|(_, m)| *m);
        Ok(EntityLocation {
            presence,
            overlay_path: overlay_hit.map(|(p, _)| p),
            static_path: static_hit.map(|(p, _)| p),
            multilabel,
        })
    }

    pub fn exists(&self, id: &EntityId) -> StoreResult<bool> {
        Ok(self.resolve(id)?.presence.is_present())
    }

    /// Read the authoritative instance of `id`.
    pub fn load(&self, id: &EntityId) -> StoreResult<Payload> {
        let location = self.resolve(id)?;
        let (Some(layer), Some(path)) = (
            self.resolver().authoritative(location.presence),
            location.authoritative_path(),
        ) else {
            return Err(self.not_found(id));
        };
        let payload = self.root.inner.codecs.get(id.kind()).load(layer, path)?;
        Ok(payload.with_multilabel(location.multilabel))
    }

    /// Write `payload` as the overlay instance of `id`.
    ///
    /// Any existing instance is a conflict unless `overwrite` is set. With
    /// `overwrite`, an overlay instance is replaced; a static-only instance
    /// can never be.
    pub fn store(&self, id: &EntityId, payload: &Payload, overwrite: bool) -> StoreResult<()> {
        self.check_creatable(id)?;

        let location = self.resolve(id)?;
        match location.presence {
            Presence::Absent => {}
            _ if !overwrite => {
                return Err(StoreError::Conflict(format!(
                    "{} '{id}' already exists in run '{}'",
                    id.kind(),
                    self.name
                )));
            }
            Presence::StaticOnly => {
                return Err(StoreError::ReadOnly(format!(
                    "{} '{id}' in run '{}' exists only in the static layer",
                    id.kind(),
                    self.name
                )));
            }
            Presence::OverlayOnly | Presence::Both => {}
        }

        let overlay = self.resolver().overlay();
        if let Some(existing) = &location.overlay_path {
            overlay.delete(existing)?;
        }

        let path = entity_path(&self.name, id, payload.multilabel);
        self.root
            .inner
            .codecs
            .get(id.kind())
            .store(overlay, &path, &self.name, id, payload)?;

        tracing::debug!(
            run = %self.name,
            kind = %id.kind(),
            target = %id,
            bytes = payload.total_bytes(),
            replaced = location.overlay_path.is_some(),
            "Stored entity",
        );
        Ok(())
    }

    /// Delete the overlay instance of `id`. Returns the presence it had, so
    /// callers can tell when a static instance becomes visible again.
    pub fn delete(&self, id: &EntityId) -> StoreResult<Presence> {
        let location = self.resolve(id)?;
        match (location.presence, &location.overlay_path) {
            (Presence::Absent, _) => Err(self.not_found(id)),
            (Presence::StaticOnly, _) => Err(StoreError::ReadOnly(format!(
                "{} '{id}' in run '{}' exists only in the static layer",
                id.kind(),
                self.name
            ))),
            (presence, Some(path)) => {
                self.resolver().overlay().delete(path)?;
                tracing::debug!(
                    run = %self.name,
                    kind = %id.kind(),
                    object = %id,
                    layer = presence.label(),
                    "Deleted entity",
                );
                Ok(presence)
            }
            (_, None) => Err(self.not_found(id)),
        }
    }

    // -- Typed helpers ------------------------------------------------------

    pub fn new_picks(&self, object_name: &str, user_id: &str, session_id: &str) -> StoreResult<EntityId> {
        let id = EntityId::picks(object_name, user_id, session_id)?;
        let doc = PicksFile::empty(object_name, user_id, session_id, &self.name);
        self.store(&id, &Payload::single(serde_json::to_vec_pretty(&doc)?), false)?;
        Ok(id)
    }

    pub fn read_picks(&self, id: &EntityId) -> StoreResult<PicksFile> {
        self.expect_kind(id, EntityKind::Picks)?;
        let payload = self.load(id)?;
        let bytes = payload
            .bytes()
            .ok_or_else(|| StoreError::Codec(format!("picks '{id}' is not a single document")))?;
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Replace the points of an existing or new overlay picks document. The
    /// identity header is stamped from `id` and this run.
    pub fn write_picks(&self, id: &EntityId, picks: &PicksFile) -> StoreResult<()> {
        self.expect_kind(id, EntityKind::Picks)?;
        let mut doc = picks.clone();
        doc.pickable_object_name = id.get(Field::ObjectName).unwrap_or_default().to_string();
        doc.user_id = id.get(Field::UserId).unwrap_or_default().to_string();
        doc.session_id = id.get(Field::SessionId).unwrap_or_default().to_string();
        doc.run_name = Some(self.name.clone());
        self.store(id, &Payload::single(serde_json::to_vec_pretty(&doc)?), true)
    }

    pub fn new_mesh(
        &self,
        object_name: &str,
        user_id: &str,
        session_id: &str,
        glb: &[u8],
    ) -> StoreResult<EntityId> {
        let id = EntityId::mesh(object_name, user_id, session_id)?;
        self.store(&id, &Payload::single(glb), false)?;
        Ok(id)
    }

    pub fn new_segmentation(
        &self,
        name: &str,
        user_id: &str,
        session_id: &str,
        voxel_spacing: f64,
        multilabel: bool,
    ) -> StoreResult<EntityId> {
        let id = EntityId::segmentation(name, user_id, session_id, voxel_spacing)?;
        self.store(&id, &zarr_stub().with_multilabel(multilabel), false)?;
        Ok(id)
    }

    pub fn new_tomogram(&self, tomo_type: &str, voxel_spacing: f64) -> StoreResult<EntityId> {
        let id = EntityId::tomogram(tomo_type, voxel_spacing)?;
        self.store(&id, &zarr_stub(), false)?;
        Ok(id)
    }

    pub fn new_features(
        &self,
        tomo_type: &str,
        voxel_spacing: f64,
        feature_type: &str,
    ) -> StoreResult<EntityId> {
        let id = EntityId::feature(tomo_type, voxel_spacing, feature_type)?;
        self.store(&id, &zarr_stub(), false)?;
        Ok(id)
    }

    // -- Internals ----------------------------------------------------------

    fn not_found(&self, id: &EntityId) -> StoreError {
        StoreError::NotFound(format!("{} '{id}' in run '{}'", id.kind(), self.name))
    }

    fn expect_kind(&self, id: &EntityId, kind: EntityKind) -> StoreResult<()> {
        if id.kind() != kind {
            return Err(CoreError::Validation(format!("'{id}' is a {}, not {kind}", id.kind())).into());
        }
        Ok(())
    }

    /// Project-level constraints on creating `id` in this run.
    fn check_creatable(&self, id: &EntityId) -> StoreResult<()> {
        validate_run_name(&self.name)?;
        match id.kind() {
            EntityKind::Picks | EntityKind::Mesh => {
                let object = id.get(Field::ObjectName).unwrap_or_default();
                validate_field_value(Field::ObjectName, object)?;
                if self.root.pickable_object(object).is_none() {
                    return Err(CoreError::Validation(format!(
                        "'{object}' is not a pickable object of project '{}'",
                        self.root.config().name
                    ))
                    .into());
                }
            }
            EntityKind::Feature => {
                let tomo_type = id.get(Field::TomoType).unwrap_or_default();
                let voxel_spacing = id.voxel_spacing().unwrap_or_default();
                let parent = EntityId::tomogram(tomo_type, voxel_spacing)?;
                if !self.exists(&parent)? {
                    return Err(StoreError::NotFound(format!(
                        "Parent tomogram '{parent}' of features '{id}' in run '{}'",
                        self.name
                    )));
                }
            }
            EntityKind::Segmentation | EntityKind::Tomogram => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
