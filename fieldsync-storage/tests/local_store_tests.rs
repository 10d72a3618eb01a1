use fieldsync_storage::{
    Analysis, Collection, Image, IndexQuery, LineItem, LocalStore, Project, StorageError,
    Syncable, ValueRange,
};
use pretty_assertions::assert_eq;

fn test_image(name: &str) -> Image {
    Image::new(name, "image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4])
}

fn test_analysis(image_id: &str) -> Analysis {
    Analysis {
        project_id: Some("proj-1".into()),
        scene_type: "kitchen".into(),
        scene_overview: "Galley kitchen, dated fixtures".into(),
        simplified_data: vec![LineItem {
            category: "Appliance".into(),
            object: "Range hood".into(),
            details: "Grease buildup".into(),
            position: "above stove".into(),
            estimated_cost: Some("$150-$300".into()),
        }],
        narrative_report: "Serviceable but worn.".into(),
        key_observations: vec!["Hood needs cleaning".into(), "Cabinet doors misaligned".into()],
        estimated_property_value: Some(ValueRange {
            min: 250_000.0,
            max: 275_000.0,
        }),
        ..Analysis::for_image(image_id)
    }
}

// ── Create / get ─────────────────────────────────────────────────

#[test]
fn create_assigns_id_and_starts_unsynced() {
    let store = LocalStore::open_in_memory().unwrap();
    let image = store.create(test_image("front.jpg")).unwrap();

    assert!(!image.envelope.id.is_empty());
    assert!(!image.envelope.synced);
    assert_eq!(image.envelope.synced_at, None);
    assert!(image.envelope.timestamp > 0);
}

#[test]
fn create_keeps_caller_supplied_id() {
    let store = LocalStore::open_in_memory().unwrap();
    let mut project = Project::new("Maple St");
    project.envelope.id = "proj-42".into();

    let created = store.create(project).unwrap();
    assert_eq!(created.envelope.id, "proj-42");
    assert!(created.last_modified > 0);
}

#[test]
fn create_resets_sync_flags_from_input() {
    let store = LocalStore::open_in_memory().unwrap();
    let mut project = Project::new("Stale");
    project.envelope.synced = true;
    project.envelope.synced_at = Some(12);

    let created = store.create(project).unwrap();
    assert!(!created.envelope.synced);
    assert_eq!(created.envelope.synced_at, None);
}

#[test]
fn get_by_id_round_trips_image_blob() {
    let store = LocalStore::open_in_memory().unwrap();
    let mut image = test_image("roof.jpg").with_project("proj-1");
    image
        .metadata
        .insert("location".into(), serde_json::json!({"lat": 51.5, "lng": -0.12}));
    let created = store.create(image).unwrap();

    let loaded: Image = store.get_by_id(&created.envelope.id).unwrap().unwrap();
    assert_eq!(loaded, created);
    assert_eq!(loaded.blob, vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4]);
    assert_eq!(loaded.size, 8);
}

#[test]
fn get_by_id_round_trips_analysis() {
    let store = LocalStore::open_in_memory().unwrap();
    let created = store.create(test_analysis("img-1")).unwrap();

    let loaded: Analysis = store.get_by_id(&created.envelope.id).unwrap().unwrap();
    assert_eq!(loaded, created);
    assert_eq!(loaded.key_observations.len(), 2);
}

#[test]
fn get_nonexistent_returns_none() {
    let store = LocalStore::open_in_memory().unwrap();
    let result: Option<Project> = store.get_by_id("nonexistent-id").unwrap();
    assert!(result.is_none());
}

#[test]
fn same_id_in_different_collections_is_independent() {
    let store = LocalStore::open_in_memory().unwrap();
    let mut project = Project::new("P");
    project.envelope.id = "shared".into();
    let mut image = test_image("i.jpg");
    image.envelope.id = "shared".into();
    store.create(project).unwrap();
    store.create(image).unwrap();

    store.delete(Collection::Images, "shared").unwrap();
    assert!(store.get_by_id::<Project>("shared").unwrap().is_some());
    assert!(store.get_by_id::<Image>("shared").unwrap().is_none());
}

// ── Indexes ──────────────────────────────────────────────────────

#[test]
fn get_all_by_project_id() {
    let store = LocalStore::open_in_memory().unwrap();
    store.create(test_image("a.jpg").with_project("proj-1")).unwrap();
    store.create(test_image("b.jpg").with_project("proj-1")).unwrap();
    store.create(test_image("c.jpg").with_project("proj-2")).unwrap();
    store.create(test_image("d.jpg")).unwrap();

    let in_project: Vec<Image> = store
        .get_all_by_index(&IndexQuery::ProjectId("proj-1".into()))
        .unwrap();
    assert_eq!(in_project.len(), 2);
    assert!(in_project.iter().all(|i| i.project_id.as_deref() == Some("proj-1")));
}

#[test]
fn get_all_by_image_id() {
    let store = LocalStore::open_in_memory().unwrap();
    store.create(test_analysis("img-1")).unwrap();
    store.create(test_analysis("img-1")).unwrap();
    store.create(test_analysis("img-2")).unwrap();

    let for_image: Vec<Analysis> = store
        .get_all_by_index(&IndexQuery::ImageId("img-1".into()))
        .unwrap();
    assert_eq!(for_image.len(), 2);
}

#[test]
fn get_all_by_synced_flag() {
    let store = LocalStore::open_in_memory().unwrap();
    let a = store.create(Project::new("A")).unwrap();
    store.create(Project::new("B")).unwrap();
    store.mark_synced(Collection::Projects, &a.envelope.id).unwrap();

    let synced: Vec<Project> = store.get_all_by_index(&IndexQuery::Synced(true)).unwrap();
    let unsynced: Vec<Project> = store.get_all_by_index(&IndexQuery::Synced(false)).unwrap();
    assert_eq!(synced.len(), 1);
    assert_eq!(synced[0].name, "A");
    assert_eq!(unsynced.len(), 1);
    assert_eq!(unsynced[0].name, "B");
}

#[test]
fn index_not_defined_on_collection_is_an_error() {
    let store = LocalStore::open_in_memory().unwrap();
    let err = store
        .get_all_by_index::<Image>(&IndexQuery::ImageId("img-1".into()))
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::UnsupportedIndex {
            index: "imageId",
            collection: Collection::Images
        }
    ));

    let err = store
        .get_all_by_index::<Project>(&IndexQuery::ProjectId("p".into()))
        .unwrap_err();
    assert!(matches!(err, StorageError::UnsupportedIndex { .. }));
}

// ── Update ───────────────────────────────────────────────────────

#[test]
fn update_merges_patch_and_invalidates_sync() {
    let store = LocalStore::open_in_memory().unwrap();
    let created = store.create(test_analysis("img-1")).unwrap();
    let id = created.envelope.id.clone();
    store.mark_synced(Collection::Analyses, &id).unwrap();

    let updated: Analysis = store
        .update(&id, &serde_json::json!({ "narrativeReport": "Edited by surveyor" }))
        .unwrap();

    assert_eq!(updated.narrative_report, "Edited by surveyor");
    assert_eq!(updated.scene_type, "kitchen");
    assert!(!updated.envelope.synced);
    assert_eq!(updated.envelope.synced_at, None);

    let loaded: Analysis = store.get_by_id(&id).unwrap().unwrap();
    assert_eq!(loaded, updated);
}

#[test]
fn update_ignores_envelope_fields_in_patch() {
    let store = LocalStore::open_in_memory().unwrap();
    let created = store.create(Project::new("Old")).unwrap();
    let id = created.envelope.id.clone();

    let updated: Project = store
        .update(
            &id,
            &serde_json::json!({
                "id": "hijacked",
                "synced": true,
                "syncedAt": 99,
                "name": "New"
            }),
        )
        .unwrap();

    assert_eq!(updated.envelope.id, id);
    assert_eq!(updated.name, "New");
    assert!(!updated.envelope.synced);
    assert!(store.get_by_id::<Project>("hijacked").unwrap().is_none());
}

#[test]
fn update_keeps_image_blob() {
    let store = LocalStore::open_in_memory().unwrap();
    let created = store.create(test_image("bath.jpg")).unwrap();

    let updated: Image = store
        .update(&created.envelope.id, &serde_json::json!({ "projectId": "proj-9" }))
        .unwrap();
    assert_eq!(updated.blob, created.blob);
    assert_eq!(updated.project_id.as_deref(), Some("proj-9"));

    let by_project: Vec<Image> = store
        .get_all_by_index(&IndexQuery::ProjectId("proj-9".into()))
        .unwrap();
    assert_eq!(by_project.len(), 1);
}

#[test]
fn update_bumps_project_last_modified() {
    let store = LocalStore::open_in_memory().unwrap();
    let mut project = Project::new("P");
    project.last_modified = 1;
    let created = store.create(project).unwrap();

    let updated: Project = store
        .update(&created.envelope.id, &serde_json::json!({ "client": "ACME" }))
        .unwrap();
    assert!(updated.last_modified >= created.last_modified);
    assert_eq!(updated.envelope.timestamp, created.envelope.timestamp);
}

#[test]
fn update_missing_record_is_not_found() {
    let store = LocalStore::open_in_memory().unwrap();
    let err = store
        .update::<Project>("nope", &serde_json::json!({ "name": "x" }))
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn update_rejects_non_object_patch() {
    let store = LocalStore::open_in_memory().unwrap();
    let created = store.create(Project::new("P")).unwrap();
    let err = store
        .update::<Project>(&created.envelope.id, &serde_json::json!(["name"]))
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidPatch(_)));
}

#[test]
fn update_with_mistyped_field_is_invalid_patch() {
    let store = LocalStore::open_in_memory().unwrap();
    let created = store.create(Project::new("P")).unwrap();
    let err = store
        .update::<Project>(&created.envelope.id, &serde_json::json!({ "name": 42 }))
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidPatch(_)));

    let unchanged: Project = store.get_by_id(&created.envelope.id).unwrap().unwrap();
    assert_eq!(unchanged.name, "P");
}

// ── Delete ───────────────────────────────────────────────────────

#[test]
fn delete_is_idempotent() {
    let store = LocalStore::open_in_memory().unwrap();
    let created = store.create(test_image("x.jpg")).unwrap();
    let id = created.envelope.id.clone();

    store.delete(Collection::Images, &id).unwrap();
    let after_first = store.storage_stats().unwrap();
    store.delete(Collection::Images, &id).unwrap();
    let after_second = store.storage_stats().unwrap();

    assert_eq!(after_first, after_second);
    assert!(store.get_by_id::<Image>(&id).unwrap().is_none());
}

#[test]
fn delete_does_not_cascade_to_analyses() {
    let store = LocalStore::open_in_memory().unwrap();
    let image = store.create(test_image("x.jpg")).unwrap();
    store.create(test_analysis(&image.envelope.id)).unwrap();

    store.delete(Collection::Images, &image.envelope.id).unwrap();

    let orphans: Vec<Analysis> = store
        .get_all_by_index(&IndexQuery::ImageId(image.envelope.id.clone()))
        .unwrap();
    assert_eq!(orphans.len(), 1);
}

// ── Sync marking ─────────────────────────────────────────────────

#[test]
fn mark_synced_sets_synced_at() {
    let store = LocalStore::open_in_memory().unwrap();
    let created = store.create(test_image("x.jpg")).unwrap();

    store.mark_synced(Collection::Images, &created.envelope.id).unwrap();

    let loaded: Image = store.get_by_id(&created.envelope.id).unwrap().unwrap();
    assert!(loaded.envelope.synced);
    assert!(loaded.envelope.synced_at.is_some());
    assert!(loaded.envelope.is_consistent());
}

#[test]
fn mark_synced_missing_record_is_not_found() {
    let store = LocalStore::open_in_memory().unwrap();
    let err = store.mark_synced(Collection::Analyses, "gone").unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "analyses record not found: gone");
}

#[test]
fn sync_state_follows_acknowledgment() {
    let store = LocalStore::open_in_memory().unwrap();
    let project = store.create(Project::new("Lookup")).unwrap();

    assert_eq!(store.sync_state(Collection::Projects, project.id()).unwrap(), Some(false));
    store.mark_synced(Collection::Projects, project.id()).unwrap();
    assert_eq!(store.sync_state(Collection::Projects, project.id()).unwrap(), Some(true));
    assert_eq!(store.sync_state(Collection::Images, project.id()).unwrap(), None);
}

#[test]
fn mark_synced_leaves_other_records_alone() {
    let store = LocalStore::open_in_memory().unwrap();
    let x = store.create(test_image("x.jpg")).unwrap();
    let y = store.create(test_image("y.jpg")).unwrap();
    let z = store.create(Project::new("z")).unwrap();

    store.mark_synced(Collection::Images, &x.envelope.id).unwrap();

    let y_after: Image = store.get_by_id(&y.envelope.id).unwrap().unwrap();
    let z_after: Project = store.get_by_id(&z.envelope.id).unwrap().unwrap();
    assert_eq!(y_after.envelope, y.envelope);
    assert_eq!(z_after.envelope, z.envelope);
}

#[test]
fn acknowledging_a_stale_version_keeps_record_pending() {
    let store = LocalStore::open_in_memory().unwrap();
    let pushed = store.create(Project::new("Draft")).unwrap();
    let edited: Project = store
        .update(pushed.id(), &serde_json::json!({"name": "Revised"}))
        .unwrap();
    assert!(edited.envelope.version > pushed.envelope.version);

    let acknowledged = store
        .mark_synced_at_version(Collection::Projects, pushed.id(), pushed.envelope.version)
        .unwrap();

    assert!(!acknowledged);
    let loaded: Project = store.get_by_id(pushed.id()).unwrap().unwrap();
    assert_eq!(loaded.name, "Revised");
    assert!(!loaded.envelope.synced);
    assert_eq!(loaded.envelope.synced_at, None);
    assert_eq!(store.pending_counts().unwrap().projects, 1);
}

#[test]
fn acknowledging_the_current_version_marks_synced() {
    let store = LocalStore::open_in_memory().unwrap();
    let created = store.create(test_image("current.jpg")).unwrap();

    let acknowledged = store
        .mark_synced_at_version(Collection::Images, created.id(), created.envelope.version)
        .unwrap();

    assert!(acknowledged);
    let loaded: Image = store.get_by_id(created.id()).unwrap().unwrap();
    assert!(loaded.envelope.synced);
    assert!(loaded.envelope.is_consistent());
}

#[test]
fn acknowledging_a_missing_record_is_not_found() {
    let store = LocalStore::open_in_memory().unwrap();
    let err = store
        .mark_synced_at_version(Collection::Images, "gone", 1)
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn recreating_an_id_bumps_its_version() {
    let store = LocalStore::open_in_memory().unwrap();
    let first = store.create(Project::new("First")).unwrap();
    let mut again = Project::new("Second");
    again.envelope.id = first.envelope.id.clone();

    let second = store.create(again).unwrap();

    assert_eq!(first.envelope.version, 1);
    assert_eq!(second.envelope.version, 2);
}

#[test]
fn cache_acknowledged_stores_synced_record() {
    let store = LocalStore::open_in_memory().unwrap();
    let cached = store.cache_acknowledged(test_analysis("img-1")).unwrap();

    assert!(cached.envelope.synced);
    assert!(cached.envelope.synced_at.is_some());
    let unsynced = store.unsynced_items().unwrap();
    assert!(unsynced.analyses.is_empty());
    assert_eq!(store.storage_stats().unwrap().analyses.count, 1);
}

// ── Outbox ───────────────────────────────────────────────────────

#[test]
fn unsynced_items_tracks_sync_state() {
    let store = LocalStore::open_in_memory().unwrap();
    let image = store.create(test_image("offline.jpg")).unwrap();
    let id = image.envelope.id.clone();

    let pending = store.unsynced_items().unwrap();
    assert!(pending.images.iter().any(|i| i.envelope.id == id));

    store.mark_synced(Collection::Images, &id).unwrap();

    let pending = store.unsynced_items().unwrap();
    assert!(pending.images.iter().all(|i| i.envelope.id != id));
    assert_eq!(store.storage_stats().unwrap().images.count, 1);
}

#[test]
fn pending_counts_per_collection() {
    let store = LocalStore::open_in_memory().unwrap();
    store.create(test_image("a.jpg")).unwrap();
    let b = store.create(test_image("b.jpg")).unwrap();
    store.create(test_analysis("img")).unwrap();
    store.create(Project::new("P")).unwrap();
    store.mark_synced(Collection::Images, &b.envelope.id).unwrap();

    let counts = store.pending_counts().unwrap();
    assert_eq!(counts.images, 1);
    assert_eq!(counts.analyses, 1);
    assert_eq!(counts.projects, 1);
    assert_eq!(counts.queue, 0);
    assert_eq!(counts.total(), 3);
}

// ── Stats / clear ────────────────────────────────────────────────

#[test]
fn storage_stats_counts_everything() {
    let store = LocalStore::open_in_memory().unwrap();
    store.create(test_image("a.jpg")).unwrap();
    store.create(Image::new("b.png", "image/png", vec![0u8; 1024])).unwrap();
    store.create(test_analysis("img")).unwrap();
    store.create(Project::new("P1")).unwrap();
    store.create(Project::new("P2")).unwrap();

    let stats = store.storage_stats().unwrap();
    assert_eq!(stats.images.count, 2);
    assert_eq!(stats.images.total_size_bytes, 8 + 1024);
    assert_eq!(stats.analyses.count, 1);
    assert_eq!(stats.projects.count, 2);
}

#[test]
fn oversized_image_is_rejected() {
    let store = LocalStore::open_in_memory().unwrap();
    store.create(test_image("ok.jpg")).unwrap();
    let mut huge = test_image("huge.jpg");
    huge.size = u64::MAX;

    let err = store.create(huge).unwrap_err();

    assert!(matches!(err, StorageError::InvalidPatch(_)));
    let stats = store.storage_stats().unwrap();
    assert_eq!(stats.images.count, 1);
    assert_eq!(stats.images.total_size_bytes, 8);
}

#[test]
fn storage_stats_empty_store() {
    let store = LocalStore::open_in_memory().unwrap();
    let stats = store.storage_stats().unwrap();
    assert_eq!(stats, Default::default());
}

#[test]
fn clear_all_empties_every_collection() {
    let store = LocalStore::open_in_memory().unwrap();
    store.create(test_image("a.jpg")).unwrap();
    store.create(test_analysis("img")).unwrap();
    store.create(Project::new("P")).unwrap();
    store
        .enqueue(
            fieldsync_storage::EntityKind::Image,
            fieldsync_storage::QueueAction::Delete,
            serde_json::json!({ "id": "x" }),
        )
        .unwrap();

    store.clear_all().unwrap();

    let stats = store.storage_stats().unwrap();
    assert_eq!(stats.images.count, 0);
    assert_eq!(stats.analyses.count, 0);
    assert_eq!(stats.projects.count, 0);
    assert_eq!(stats.queue.count, 0);
    assert!(store.unsynced_items().unwrap().is_empty());
}

// ── Persistence ──────────────────────────────────────────────────

#[test]
fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.duckdb");

    let id = {
        let store = LocalStore::open(&path).unwrap();
        let image = store.create(test_image("persist.jpg")).unwrap();
        store.mark_synced(Collection::Images, &image.envelope.id).unwrap();
        image.envelope.id
    };

    let reopened = LocalStore::open(&path).unwrap();
    let image: Image = reopened.get_by_id(&id).unwrap().unwrap();
    assert_eq!(image.filename, "persist.jpg");
    assert!(image.envelope.synced);
    assert_eq!(image.blob.len(), 8);
}

#[test]
fn clones_share_one_database() {
    let store = LocalStore::open_in_memory().unwrap();
    let other = store.clone();
    let created = store.create(Project::new("Shared")).unwrap();

    let seen: Option<Project> = other.get_by_id(created.id()).unwrap();
    assert!(seen.is_some());
}
