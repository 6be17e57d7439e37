//! On-layer naming of runs, voxel spacings, and entities.
//!
//! ```text
//! ExperimentRuns/{run}/VoxelSpacing{vs:.3}/{tomo_type}.zarr
//! ExperimentRuns/{run}/VoxelSpacing{vs:.3}/{tomo_type}_{feature_type}_features.zarr
//! ExperimentRuns/{run}/Picks/{user_id}_{session_id}_{object_name}.json
//! ExperimentRuns/{run}/Meshes/{user_id}_{session_id}_{object_name}.glb
//! ExperimentRuns/{run}/Segmentations/{vs:.3}_{user_id}_{session_id}_{name}[-multilabel].zarr
//! ```

use cryocat_core::kind::{parse_voxel_spacing, round_voxel_spacing};
use cryocat_core::{EntityId, EntityKind, Field};

use crate::layer::join;

pub const RUNS_DIR: &str = "ExperimentRuns";
pub const PICKS_DIR: &str = "Picks";
pub const MESHES_DIR: &str = "Meshes";
pub const SEGMENTATIONS_DIR: &str = "Segmentations";

const VOXEL_SPACING_PREFIX: &str = "VoxelSpacing";
const ZARR_SUFFIX: &str = ".zarr";
const FEATURES_SUFFIX: &str = "_features.zarr";
const MULTILABEL_SUFFIX: &str = "-multilabel";

pub fn run_path(run: &str) -> String {
    join(&[RUNS_DIR, run])
}

pub fn voxel_spacing_dir_name(voxel_spacing: f64) -> String {
    format!("{VOXEL_SPACING_PREFIX}{:.3}", round_voxel_spacing(voxel_spacing))
}

pub fn parse_voxel_spacing_dir(name: &str) -> Option<f64> {
    name.strip_prefix(VOXEL_SPACING_PREFIX)
        .and_then(|v| parse_voxel_spacing(v).ok())
        .map(round_voxel_spacing)
}

pub fn voxel_spacing_path(run: &str, voxel_spacing: f64) -> String {
    join(&[RUNS_DIR, run, voxel_spacing_dir_name(voxel_spacing).as_str()])
}

/// Directory listing the entities of `kind`. Tomograms and features live
/// under a voxel spacing directory, which must then be given.
pub fn container_path(run: &str, kind: EntityKind, voxel_spacing: Option<f64>) -> Option<String> {
    match kind {
        EntityKind::Picks => Some(join(&[RUNS_DIR, run, PICKS_DIR])),
        EntityKind::Mesh => Some(join(&[RUNS_DIR, run, MESHES_DIR])),
        EntityKind::Segmentation => Some(join(&[RUNS_DIR, run, SEGMENTATIONS_DIR])),
        EntityKind::Tomogram | EntityKind::Feature => {
            voxel_spacing.map(|vs| voxel_spacing_path(run, vs))
        }
    }
}

fn field<'a>(id: &'a EntityId, f: Field) -> &'a str {
    id.get(f).unwrap_or_default()
}

/// Storage name of `id` inside its container.
pub fn entity_file_name(id: &EntityId, multilabel: bool) -> String {
    match id.kind() {
        EntityKind::Picks => format!(
            "{}_{}_{}.json",
            field(id, Field::UserId),
            field(id, Field::SessionId),
            field(id, Field::ObjectName)
        ),
        EntityKind::Mesh => format!(
            "{}_{}_{}.glb",
            field(id, Field::UserId),
            field(id, Field::SessionId),
            field(id, Field::ObjectName)
        ),
        EntityKind::Segmentation => format!(
            "{:.3}_{}_{}_{}{}{ZARR_SUFFIX}",
            id.voxel_spacing().unwrap_or_default(),
            field(id, Field::UserId),
            field(id, Field::SessionId),
            field(id, Field::Name),
            if multilabel { MULTILABEL_SUFFIX } else { "" }
        ),
        EntityKind::Tomogram => format!("{}{ZARR_SUFFIX}", field(id, Field::TomoType)),
        EntityKind::Feature => format!(
            "{}_{}{FEATURES_SUFFIX}",
            field(id, Field::TomoType),
            field(id, Field::FeatureType)
        ),
    }
}

/// Full layer path of `id` in `run`.
pub fn entity_path(run: &str, id: &EntityId, multilabel: bool) -> String {
    let container = container_path(run, id.kind(), id.voxel_spacing()).unwrap_or_default();
    join(&[container.as_str(), entity_file_name(id, multilabel).as_str()])
}

/// Candidate paths for `id`; segmentations may be stored with or without the
/// multilabel suffix. Returns `(path, multilabel)` pairs.
pub fn candidate_paths(run: &str, id: &EntityId) -> Vec<(String, bool)> {
    match id.kind() {
        EntityKind::Segmentation => vec![
            (entity_path(run, id, false), false),
            (entity_path(run, id, true), true),
        ],
        _ => vec![(entity_path(run, id, false), false)],
    }
}

/// Parse a container entry back into an identity and its multilabel flag.
///
/// `voxel_spacing` is the enclosing voxel spacing for tomograms and features.
/// Entries that do not follow the naming scheme yield `None`.
pub fn parse_entry(
    kind: EntityKind,
    voxel_spacing: Option<f64>,
    name: &str,
) -> Option<(EntityId, bool)> {
    match kind {
        EntityKind::Picks | EntityKind::Mesh => {
            let suffix = if kind == EntityKind::Picks { ".json" } else { ".glb" };
            let stem = name.strip_suffix(suffix)?;
            let mut parts = stem.splitn(3, '_');
            let user = parts.next()?;
            let session = parts.next()?;
            let object = parts.next()?;
            EntityId::from_values(kind, [object, user, session])
                .ok()
                .map(|id| (id, false))
        }
        EntityKind::Segmentation => {
            let stem = name.strip_suffix(ZARR_SUFFIX)?;
            let (stem, multilabel) = match stem.strip_suffix(MULTILABEL_SUFFIX) {
                Some(s) => (s, true),
                None => (stem, false),
            };
            let mut parts = stem.splitn(4, '_');
            let vs = parts.next()?;
            let user = parts.next()?;
            let session = parts.next()?;
            let seg_name = parts.next()?;
            let vs = parse_voxel_spacing(vs).ok()?;
            EntityId::segmentation(seg_name, user, session, vs)
                .ok()
                .map(|id| (id, multilabel))
        }
        EntityKind::Tomogram => {
            if name.ends_with(FEATURES_SUFFIX) {
                return None;
            }
            let tomo_type = name.strip_suffix(ZARR_SUFFIX)?;
            EntityId::tomogram(tomo_type, voxel_spacing?)
                .ok()
                .map(|id| (id, false))
        }
        EntityKind::Feature => {
            let stem = name.strip_suffix(FEATURES_SUFFIX)?;
            let (tomo_type, feature_type) = stem.rsplit_once('_')?;
            EntityId::feature(tomo_type, voxel_spacing?, feature_type)
                .ok()
                .map(|id| (id, false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_path_and_back() {
        let id = EntityId::picks("large_ribosome", "user1", "session-001").unwrap();
        let path = entity_path("TS_001", &id, false);
        assert_eq!(path, "ExperimentRuns/TS_001/Picks/user1_session-001_large_ribosome.json");
        let name = path.rsplit('/').next().unwrap();
        assert_eq!(parse_entry(EntityKind::Picks, None, name), Some((id, false)));
    }

    #[test]
    fn segmentation_path_keeps_three_decimals() {
        let id = EntityId::segmentation("membrane", "alice", "s1", 10.0).unwrap();
        assert_eq!(
            entity_path("r", &id, true),
            "ExperimentRuns/r/Segmentations/10.000_alice_s1_membrane-multilabel.zarr"
        );
        assert_eq!(
            parse_entry(EntityKind::Segmentation, None, "10.000_alice_s1_membrane-multilabel.zarr"),
            Some((id.clone(), true))
        );
        assert_eq!(
            parse_entry(EntityKind::Segmentation, None, "10.000_alice_s1_membrane.zarr"),
            Some((id, false))
        );
    }

    #[test]
    fn tomogram_and_feature_entries_are_disjoint() {
        let features = "wbp_cellcanvas_features.zarr";
        assert!(parse_entry(EntityKind::Tomogram, Some(10.0), features).is_none());
        let (fid, _) = parse_entry(EntityKind::Feature, Some(10.0), features).unwrap();
        assert_eq!(fid.canonical(), "wbp@10.0:cellcanvas");

        let (tid, _) = parse_entry(EntityKind::Tomogram, Some(10.0), "wbp.zarr").unwrap();
        assert_eq!(tid.canonical(), "wbp@10.0");
        assert_eq!(
            entity_path("r", &tid, false),
            "ExperimentRuns/r/VoxelSpacing10.000/wbp.zarr"
        );
        assert!(parse_entry(EntityKind::Feature, Some(10.0), "wbp.zarr").is_none());
    }

    #[test]
    fn voxel_spacing_dirs() {
        assert_eq!(voxel_spacing_dir_name(7.84), "VoxelSpacing7.840");
        assert_eq!(parse_voxel_spacing_dir("VoxelSpacing7.840"), Some(7.84));
        assert_eq!(parse_voxel_spacing_dir("Picks"), None);
    }

    #[test]
    fn malformed_entries_are_ignored() {
        assert!(parse_entry(EntityKind::Picks, None, "notes.txt").is_none());
        assert!(parse_entry(EntityKind::Picks, None, "onlyuser.json").is_none());
        assert!(parse_entry(EntityKind::Segmentation, None, "abc_u_s_name.zarr").is_none());
    }
}
