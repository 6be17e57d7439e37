//! Integration tests for batch copy / move / remove over a two-layer project.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{fixture, fixture_with_picks_codec, picks_json, picks_path, InstrumentedCodec};
use cryocat_core::{EntityId, EntityKind};
use cryocat_batch::{BatchEngine, BatchError, RemoveRequest, RunEntry, TransferRequest};
use cryocat_store::{Layer, Presence};

fn seed_sessions(fx: &common::Fixture, run: &str) {
    for session in ["session-001", "session-002", "session-003"] {
        fx.static_layer
            .write(
                &picks_path(run, "user1", session, "ribosome"),
                &picks_json("ribosome", "user1", session, 10.0),
            )
            .unwrap();
    }
}

fn seed_segmentation(layer: &dyn Layer, run: &str, user: &str, session: &str) {
    layer
        .write(
            &format!("ExperimentRuns/{run}/Segmentations/10.000_{user}_{session}_membrane.zarr/.zgroup"),
            b"{}",
        )
        .unwrap();
}

// ---------------------------------------------------------------------------
// Test: copy
// ---------------------------------------------------------------------------

/// Three session picks copied to a templated target produce three new
/// overlay picks and leave the sources intact.
#[tokio::test]
async fn copy_sessions_to_backup_user() {
    let fx = fixture();
    seed_sessions(&fx, "TS_001");
    let engine = BatchEngine::new(fx.root.clone());

    let report = engine
        .copy(
            TransferRequest::new(EntityKind::Picks, "ribosome:user1/session-*", "ribosome:backup/{session_id}")
                .runs(["TS_001"]),
        )
        .await
        .unwrap();

    let result = report.run("TS_001").unwrap();
    assert_eq!(result.count, 3);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(
        result.entries[0],
        RunEntry::Mapped {
            source: "ribosome:user1/session-001".into(),
            target: "ribosome:backup/session-001".into(),
        }
    );

    let run = fx.root.run("TS_001").unwrap();
    for session in ["session-001", "session-002", "session-003"] {
        let source = EntityId::picks("ribosome", "user1", session).unwrap();
        let target = EntityId::picks("ribosome", "backup", session).unwrap();
        assert_eq!(run.resolve(&source).unwrap().presence, Presence::StaticOnly);
        assert_eq!(run.resolve(&target).unwrap().presence, Presence::OverlayOnly);

        assert_eq!(run.load(&target).unwrap(), run.load(&source).unwrap());
    }
}

/// A copied picks document is byte-identical to its source, keys this crate
/// does not model included.
#[tokio::test]
async fn copied_picks_keep_every_byte() {
    let fx = fixture();
    let original = br#"{"pickable_object_name":"ribosome","user_id":"user1","session_id":"s1",
"points":[{"location":{"x":1.5,"y":2,"z":3},"extra_point_key":7}],"custom_header":"keep-me"}"#
        .to_vec();
    fx.static_layer
        .write(&picks_path("TS_001", "user1", "s1", "ribosome"), &original)
        .unwrap();
    let engine = BatchEngine::new(fx.root.clone());

    let report = engine
        .copy(TransferRequest::new(EntityKind::Picks, "ribosome:user1/s1", "ribosome:user1/s2"))
        .await
        .unwrap();
    assert_eq!(report.successes(), 1);

    let run = fx.root.run("TS_001").unwrap();
    let source = EntityId::picks("ribosome", "user1", "s1").unwrap();
    let target = EntityId::picks("ribosome", "user1", "s2").unwrap();
    assert_eq!(run.load(&target).unwrap(), run.load(&source).unwrap());
    assert_eq!(
        fx.overlay.read(&picks_path("TS_001", "user1", "s2", "ribosome")).unwrap(),
        original
    );
}

/// Many matches onto a placeholder-free target mutate nothing.
#[tokio::test]
async fn placeholder_free_target_with_many_matches_is_ambiguous() {
    let fx = fixture();
    seed_sessions(&fx, "TS_001");
    let engine = BatchEngine::new(fx.root.clone());

    let report = engine
        .copy(TransferRequest::new(EntityKind::Picks, "ribosome:user1/session-*", "ribosome:backup/all"))
        .await
        .unwrap();

    let result = report.run("TS_001").unwrap();
    assert_eq!(result.count, 0);
    assert_eq!(result.errors.len(), 3);
    assert!(result.errors.iter().all(|e| e.contains("Ambiguous target")));
    assert_eq!(fx.overlay.inner.file_count(), 0);
    assert!(report.summary(10).is_failure());
}

/// Existing targets conflict unless overwrite is requested.
#[tokio::test]
async fn copy_conflicts_without_overwrite() {
    let fx = fixture();
    seed_sessions(&fx, "TS_001");
    let engine = BatchEngine::new(fx.root.clone());
    let request = TransferRequest::new(EntityKind::Picks, "ribosome:user1/session-001", "ribosome:backup/s1");

    engine.copy(request.clone()).await.unwrap();
    let again = engine.copy(request.clone()).await.unwrap();
    let result = again.run("TS_001").unwrap();
    assert_eq!(result.count, 0);
    assert!(result.errors[0].contains("Conflict"), "{}", result.errors[0]);

    let forced = engine.copy(request.overwrite(true)).await.unwrap();
    assert_eq!(forced.run("TS_001").unwrap().count, 1);
}

/// An existing static-only target is a conflict without overwrite and
/// read-only with it.
#[tokio::test]
async fn copy_onto_static_only_target() {
    let fx = fixture();
    let run = fx.root.new_run("TS_001").unwrap();
    run.new_picks("ribosome", "user1", "s1").unwrap();
    fx.static_layer
        .write(&picks_path("TS_001", "user1", "s2", "ribosome"), &picks_json("ribosome", "user1", "s2", 1.0))
        .unwrap();
    let engine = BatchEngine::new(fx.root.clone());
    let request = TransferRequest::new(EntityKind::Picks, "ribosome:user1/s1", "ribosome:user1/s2");

    let report = engine.copy(request.clone()).await.unwrap();
    let result = report.run("TS_001").unwrap();
    assert_eq!(result.count, 0);
    assert!(result.errors[0].contains("Conflict"), "{}", result.errors[0]);

    let forced = engine.copy(request.overwrite(true)).await.unwrap();
    let result = forced.run("TS_001").unwrap();
    assert_eq!(result.count, 0);
    assert!(result.errors[0].contains("Read-only violation"), "{}", result.errors[0]);
    assert_eq!(fx.static_layer.file_count(), 1);
}

/// Sources that render onto the same target are skipped; the rest proceed.
#[tokio::test]
async fn colliding_targets_are_skipped() {
    let fx = fixture();
    for (user, session) in [("user1", "s1"), ("user2", "s1"), ("user1", "s2")] {
        fx.static_layer
            .write(
                &picks_path("TS_001", user, session, "ribosome"),
                &picks_json("ribosome", user, session, 1.0),
            )
            .unwrap();
    }
    let engine = BatchEngine::new(fx.root.clone());

    let report = engine
        .copy(TransferRequest::new(EntityKind::Picks, "ribosome:*/s*", "ribosome:backup/{session_id}"))
        .await
        .unwrap();

    let result = report.run("TS_001").unwrap();
    assert_eq!(result.count, 1);
    assert_eq!(
        result.entries,
        vec![RunEntry::Mapped {
            source: "ribosome:user1/s2".into(),
            target: "ribosome:backup/s2".into(),
        }]
    );
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors.iter().all(|e| e.contains("Target collision")), "{:?}", result.errors);

    let run = fx.root.run("TS_001").unwrap();
    assert!(!run.exists(&EntityId::picks("ribosome", "backup", "s1").unwrap()).unwrap());
    assert!(!report.summary(10).is_failure());
}

/// A source rendering onto itself is skipped as a conflict.
#[tokio::test]
async fn copy_onto_itself_is_a_conflict() {
    let fx = fixture();
    seed_sessions(&fx, "TS_001");
    let engine = BatchEngine::new(fx.root.clone());

    let report = engine
        .copy(TransferRequest::new(EntityKind::Picks, "ribosome:user1/session-001", "ribosome:user1/{session_id}"))
        .await
        .unwrap();
    let result = report.run("TS_001").unwrap();
    assert_eq!(result.count, 0);
    assert!(result.errors[0].contains("identical"));
}

/// Every run of the project is processed when no run filter is given.
#[tokio::test]
async fn copy_spans_all_runs_with_bounded_pool() {
    let fx = fixture();
    for run in ["TS_001", "TS_002", "TS_003", "TS_004", "TS_005"] {
        fx.static_layer
            .write(&picks_path(run, "user1", "s1", "ribosome"), &picks_json("ribosome", "user1", "s1", 1.0))
            .unwrap();
    }
    let engine = BatchEngine::new(fx.root.clone());

    let report = engine
        .copy(TransferRequest::new(EntityKind::Picks, "ribosome:user1/s1", "ribosome:user2/{session_id}").workers(2))
        .await
        .unwrap();

    assert_eq!(report.runs.len(), 5);
    assert_eq!(report.successes(), 5);
    assert_eq!(report.error_count(), 0);
}

/// Run tasks overlap, but never more of them than `workers`.
#[tokio::test]
async fn run_tasks_never_exceed_worker_count() {
    let codec = Arc::new(InstrumentedCodec::new(Duration::from_millis(25), None));
    let fx = fixture_with_picks_codec(codec.clone());
    for i in 1..=6 {
        let run = format!("TS_{i:03}");
        fx.static_layer
            .write(&picks_path(&run, "user1", "s1", "ribosome"), &picks_json("ribosome", "user1", "s1", 1.0))
            .unwrap();
    }
    let engine = BatchEngine::new(fx.root.clone());

    let report = engine
        .copy(TransferRequest::new(EntityKind::Picks, "ribosome:user1/s1", "ribosome:user2/{session_id}").workers(2))
        .await
        .unwrap();

    assert_eq!(report.successes(), 6);
    assert!((1..=2).contains(&codec.peak()), "peak concurrency {}", codec.peak());
}

/// A run task that panics is reported against its run; other runs finish.
#[tokio::test]
async fn panicking_run_is_reported_and_others_finish() {
    let codec = Arc::new(InstrumentedCodec::new(Duration::ZERO, Some("TS_002")));
    let fx = fixture_with_picks_codec(codec);
    for run in ["TS_001", "TS_002", "TS_003"] {
        fx.static_layer
            .write(&picks_path(run, "user1", "s1", "ribosome"), &picks_json("ribosome", "user1", "s1", 1.0))
            .unwrap();
    }
    let engine = BatchEngine::new(fx.root.clone());

    let report = engine
        .copy(TransferRequest::new(EntityKind::Picks, "ribosome:user1/s1", "ribosome:user2/{session_id}"))
        .await
        .unwrap();

    assert_eq!(report.runs.len(), 3);
    let failed = report.run("TS_002").unwrap();
    assert_eq!(failed.count, 0);
    assert!(failed.errors[0].contains("Run task failed"), "{:?}", failed.errors);
    assert_eq!(report.run("TS_001").unwrap().count, 1);
    assert_eq!(report.run("TS_003").unwrap().count, 1);
    assert_eq!(report.successes(), 2);
}

// ---------------------------------------------------------------------------
// Test: move
// ---------------------------------------------------------------------------

/// Move leaves only the target; repeating it finds nothing to move.
#[tokio::test]
async fn move_then_repeat_matches_nothing() {
    let fx = fixture();
    let run = fx.root.new_run("TS_001").unwrap();
    let source = run.new_picks("ribosome", "user1", "s1").unwrap();
    let engine = BatchEngine::new(fx.root.clone());
    let request = TransferRequest::new(EntityKind::Picks, "ribosome:user1/*", "ribosome:user2/{session_id}");

    let report = engine.move_entities(request.clone()).await.unwrap();
    assert_eq!(report.run("TS_001").unwrap().count, 1);
    assert!(!run.exists(&source).unwrap());
    assert!(run.exists(&EntityId::picks("ribosome", "user2", "s1").unwrap()).unwrap());

    let again = engine.move_entities(request).await.unwrap();
    let result = again.run("TS_001").unwrap();
    assert_eq!(result.count, 0);
    assert!(result.errors.is_empty());
}

/// A failed source delete leaves both copies in place and is reported.
#[tokio::test]
async fn move_with_failing_delete_duplicates() {
    let fx = fixture();
    let run = fx.root.new_run("TS_001").unwrap();
    let source = run.new_mesh("ribosome", "user1", "s1", b"glTF").unwrap();
    fx.overlay.fail_deletes(true);
    let engine = BatchEngine::new(fx.root.clone());

    let report = engine
        .move_entities(TransferRequest::new(EntityKind::Mesh, "ribosome:user1/s1", "ribosome:user1/s2"))
        .await
        .unwrap();

    let result = report.run("TS_001").unwrap();
    assert_eq!(result.count, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("source could not be deleted"));

    let target = EntityId::mesh("ribosome", "user1", "s2").unwrap();
    assert_eq!(run.load(&target).unwrap(), run.load(&source).unwrap());
}

/// Static-only sources cannot be moved and nothing is written.
#[tokio::test]
async fn move_of_static_source_is_read_only() {
    let fx = fixture();
    seed_sessions(&fx, "TS_001");
    let engine = BatchEngine::new(fx.root.clone());

    let report = engine
        .move_entities(TransferRequest::new(EntityKind::Picks, "ribosome:user1/session-001", "ribosome:user2/{session_id}"))
        .await
        .unwrap();

    let result = report.run("TS_001").unwrap();
    assert_eq!(result.count, 0);
    assert!(result.errors[0].contains("Read-only violation"));
    assert_eq!(fx.overlay.inner.file_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: remove
// ---------------------------------------------------------------------------

/// Pattern removal without force or dry-run is refused before any run runs.
#[tokio::test]
async fn pattern_remove_requires_force_or_dry_run() {
    let fx = fixture();
    let run = fx.root.new_run("TS_001").unwrap();
    run.new_picks("ribosome", "user1", "s1").unwrap();
    let engine = BatchEngine::new(fx.root.clone());

    let err = engine
        .remove(RemoveRequest::new(EntityKind::Picks, "ribosome:*/*"))
        .await
        .unwrap_err();
    assert_matches!(err, BatchError::SafetyGate { .. });
    assert_eq!(run.list(EntityKind::Picks).unwrap().len(), 1);

    let forced = engine
        .remove(RemoveRequest::new(EntityKind::Picks, "ribosome:*/*").force(true))
        .await
        .unwrap();
    assert_eq!(forced.run("TS_001").unwrap().count, 1);
    assert!(run.list(EntityKind::Picks).unwrap().is_empty());
}

/// Dry-run removal previews matches and leaves them in place.
#[tokio::test]
async fn dry_run_remove_previews_segmentations() {
    let fx = fixture();
    seed_segmentation(fx.overlay.as_ref(), "TS_001", "alice", "test-1");
    seed_segmentation(fx.overlay.as_ref(), "TS_001", "bob", "test-2");
    seed_segmentation(fx.overlay.as_ref(), "TS_001", "bob", "prod");
    let engine = BatchEngine::new(fx.root.clone());

    let report = engine
        .remove(RemoveRequest::new(EntityKind::Segmentation, "membrane:*/test-*@10.0").dry_run(true))
        .await
        .unwrap();

    let result = report.run("TS_001").unwrap();
    assert_eq!(result.count, 2);
    assert!(result
        .entries
        .iter()
        .all(|e| matches!(e, RunEntry::WouldRemove { .. })));
    let run = fx.root.run("TS_001").unwrap();
    assert_eq!(run.list(EntityKind::Segmentation).unwrap().len(), 3);
}

/// A literal that matches nothing reports NotFound; removing the overlay
/// copy of a shadowed entity exposes the static one.
#[tokio::test]
async fn literal_remove_reports_missing_and_unshadows() {
    let fx = fixture();
    let path = picks_path("TS_001", "user1", "s1", "ribosome");
    fx.static_layer.write(&path, &picks_json("ribosome", "user1", "s1", 1.0)).unwrap();
    fx.overlay.write(&path, &picks_json("ribosome", "user1", "s1", 2.0)).unwrap();
    let engine = BatchEngine::new(fx.root.clone());

    let missing = engine
        .remove(RemoveRequest::new(EntityKind::Picks, "ribosome:user9/s1"))
        .await
        .unwrap();
    assert!(missing.run("TS_001").unwrap().errors[0].contains("Not found"));

    let removed = engine
        .remove(RemoveRequest::new(EntityKind::Picks, "ribosome:user1/s1"))
        .await
        .unwrap();
    assert_eq!(removed.run("TS_001").unwrap().count, 1);

    let run = fx.root.run("TS_001").unwrap();
    let id = EntityId::picks("ribosome", "user1", "s1").unwrap();
    assert_eq!(run.resolve(&id).unwrap().presence, Presence::StaticOnly);
    assert_eq!(run.read_picks(&id).unwrap().points[0].location.x, 1.0);

    let again = engine
        .remove(RemoveRequest::new(EntityKind::Picks, "ribosome:user1/s1"))
        .await
        .unwrap();
    assert!(again.run("TS_001").unwrap().errors[0].contains("Read-only violation"));
}

// ---------------------------------------------------------------------------
// Test: structural errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_runs_abort_before_dispatch() {
    let fx = fixture();
    fx.root.new_run("TS_001").unwrap();
    let engine = BatchEngine::new(fx.root.clone());

    let err = engine
        .copy(
            TransferRequest::new(EntityKind::Picks, "ribosome:a/b", "ribosome:c/{session_id}")
                .runs(["TS_001", "nope", "TS_001"]),
        )
        .await
        .unwrap_err();
    assert_matches!(err, BatchError::UnknownRun(names) if names == vec!["nope".to_string()]);
}

#[tokio::test]
async fn malformed_uris_abort_before_dispatch() {
    let fx = fixture();
    let engine = BatchEngine::new(fx.root.clone());

    let err = engine
        .copy(TransferRequest::new(EntityKind::Picks, "ribosome:user1", "ribosome:a/b"))
        .await
        .unwrap_err();
    assert_matches!(err, BatchError::InvalidUri(_));

    let err = engine
        .copy(TransferRequest::new(EntityKind::Picks, "ribosome:a/b", "ribosome:a/{voxel_spacing}"))
        .await
        .unwrap_err();
    assert_matches!(err, BatchError::InvalidUri(_));
}
