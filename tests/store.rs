use tasksync::{LocalStore, RemoteTask, StoreError, SyncStatus, Task, TaskStatus};

async fn open_store() -> LocalStore {
    LocalStore::open("sqlite::memory:")
        .await
        .expect("open in-memory store")
}

fn remote(id: &str, title: &str) -> RemoteTask {
    RemoteTask {
        id: id.into(),
        title: title.into(),
        description: None,
        assigned_to: None,
        status: TaskStatus::Pending,
        is_deleted: false,
        created_at: Some("2026-08-27T08:00:00.000000Z".into()),
        updated_at: Some("2026-08-27T08:00:00.000000Z".into()),
    }
}

/// A record as the pull phase hands it to the store: carries a server id,
/// sync status left for the store to default.
fn pulled(id: &str, title: &str) -> Task {
    remote(id, title).into_task()
}

#[tokio::test]
async fn test_save_round_trip() {
    let store = open_store().await;

    let mut task = Task::new("Buy milk");
    task.description = Some("2 litres".into());
    let local_id = store.save(task).await.expect("save");
    assert!(local_id.starts_with("local_"));

    let found = store
        .get_by_local_id(&local_id)
        .await
        .expect("get")
        .expect("record present");
    assert_eq!(found.local_id.as_deref(), Some(local_id.as_str()));
    assert_eq!(found.title, "Buy milk");
    assert_eq!(found.description.as_deref(), Some("2 litres"));
    assert_eq!(found.status, TaskStatus::Pending);
    assert_eq!(found.sync_status, Some(SyncStatus::PendingCreate));
    assert!(found.server_id.is_none());
    assert!(found.created_at.is_some());
    assert!(found.updated_at.is_some());
}

#[tokio::test]
async fn test_save_keeps_explicit_local_id() {
    let store = open_store().await;

    let mut task = Task::new("Buy milk");
    task.local_id = Some("local_1".into());
    let local_id = store.save(task).await.expect("save");
    assert_eq!(local_id, "local_1");
}

#[tokio::test]
async fn test_save_marks_never_synced_as_pending_create() {
    let store = open_store().await;

    // No server id, sync status deliberately unset.
    let mut task = Task::new("Offline edit");
    task.sync_status = None;
    let local_id = store.save(task).await.expect("save");

    let found = store
        .get_by_local_id(&local_id)
        .await
        .expect("get")
        .expect("record present");
    assert_eq!(found.sync_status, Some(SyncStatus::PendingCreate));
}

#[tokio::test]
async fn test_save_defaults_remote_records_to_synced() {
    let store = open_store().await;

    let mut task = Task::new("From server");
    task.server_id = Some("srv-1".into());
    task.sync_status = None;
    store.save(task).await.expect("save");

    let found = store
        .get_by_server_id("srv-1")
        .await
        .expect("get")
        .expect("record present");
    assert_eq!(found.sync_status, Some(SyncStatus::Synced));
}

#[tokio::test]
async fn test_save_normalizes_empty_optionals() {
    let store = open_store().await;

    let mut task = Task::new("Sparse");
    task.description = Some("".into());
    task.assigned_to = Some("".into());
    let local_id = store.save(task).await.expect("save");

    let found = store
        .get_by_local_id(&local_id)
        .await
        .expect("get")
        .expect("record present");
    assert_eq!(found.description, None);
    assert_eq!(found.assigned_to, None);
}

#[tokio::test]
async fn test_consolidation_collapses_duplicate_server_ids() {
    let store = open_store().await;

    let first_id = store.save(pulled("srv-9", "Original")).await.expect("save");

    // Same server entity arrives again without a local id: it must land on
    // the existing row, not create a second one.
    let second_id = store.save(pulled("srv-9", "Updated")).await.expect("save");
    assert_eq!(second_id, first_id);

    // And with a conflicting explicit local id, the existing row still wins.
    let mut task = pulled("srv-9", "Updated again");
    task.local_id = Some("local_other".into());
    let third_id = store.save(task).await.expect("save");
    assert_eq!(third_id, first_id);
    assert!(
        store
            .get_by_local_id("local_other")
            .await
            .expect("get")
            .is_none()
    );

    let all = store.get_all().await.expect("get_all");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].title, "Updated again");
}

#[tokio::test]
async fn test_get_pending_changes_filters_synced() {
    let store = open_store().await;

    store.save(Task::new("Still local")).await.expect("save");
    store.save(pulled("srv-1", "Already synced")).await.expect("save");

    let pending = store.get_pending_changes().await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].title, "Still local");
    assert!(pending.iter().all(|t| t.sync_status != Some(SyncStatus::Synced)));
}

#[tokio::test]
async fn test_stage_edit_marks_pending_update() {
    let store = open_store().await;

    let local_id = store.save(pulled("srv-1", "Synced")).await.expect("save");
    let mut task = store
        .get_by_local_id(&local_id)
        .await
        .expect("get")
        .expect("record present");
    task.title = "Synced, edited".into();
    store.stage_edit(task).await.expect("stage edit");

    let found = store
        .get_by_local_id(&local_id)
        .await
        .expect("get")
        .expect("record present");
    assert_eq!(found.sync_status, Some(SyncStatus::PendingUpdate));
    assert_eq!(found.title, "Synced, edited");

    // A never-synced record stays pending_create under edits.
    let local_id = store.save(Task::new("Draft")).await.expect("save");
    let mut task = store
        .get_by_local_id(&local_id)
        .await
        .expect("get")
        .expect("record present");
    task.title = "Draft, edited".into();
    store.stage_edit(task).await.expect("stage edit");
    let found = store
        .get_by_local_id(&local_id)
        .await
        .expect("get")
        .expect("record present");
    assert_eq!(found.sync_status, Some(SyncStatus::PendingCreate));
}

#[tokio::test]
async fn test_get_all_hides_reconciled_tombstones() {
    let store = open_store().await;

    let mut gone = pulled("srv-1", "Reconciled tombstone");
    gone.is_deleted = true;
    let gone_id = store.save(gone).await.expect("save");

    let mut in_flight = pulled("srv-2", "Delete still pending");
    in_flight.is_deleted = true;
    in_flight.sync_status = Some(SyncStatus::PendingDelete);
    store.save(in_flight).await.expect("save");

    let all = store.get_all().await.expect("get_all");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].title, "Delete still pending");

    // Hidden, not purged: direct lookup still finds the tombstone.
    let tombstone = store
        .get_by_local_id(&gone_id)
        .await
        .expect("get")
        .expect("tombstone retained");
    assert!(tombstone.is_deleted);
    assert_eq!(tombstone.sync_status, Some(SyncStatus::Synced));
}

#[tokio::test]
async fn test_delete_by_local_id_is_physical() {
    let store = open_store().await;

    let local_id = store.save(Task::new("Short lived")).await.expect("save");
    store.delete_by_local_id(&local_id).await.expect("delete");
    assert!(
        store
            .get_by_local_id(&local_id)
            .await
            .expect("get")
            .is_none()
    );
    assert!(store.get_all().await.expect("get_all").is_empty());
}

#[tokio::test]
async fn test_soft_delete_branches_on_server_awareness() {
    let store = open_store().await;

    // Never synced: physical removal, the server never has to know.
    let local_id = store.save(Task::new("Never synced")).await.expect("save");
    store.soft_delete(&local_id).await.expect("soft delete");
    assert!(
        store
            .get_by_local_id(&local_id)
            .await
            .expect("get")
            .is_none()
    );

    // Synced: flagged and queued for the next push.
    let local_id = store.save(pulled("srv-1", "Known remotely")).await.expect("save");
    store.soft_delete(&local_id).await.expect("soft delete");
    let found = store
        .get_by_local_id(&local_id)
        .await
        .expect("get")
        .expect("record present");
    assert!(found.is_deleted);
    assert_eq!(found.sync_status, Some(SyncStatus::PendingDelete));

    // Unknown id is an error.
    assert!(matches!(
        store.soft_delete("local_missing").await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_reconcile_after_sync_adopts_server_fields() {
    let store = open_store().await;

    let mut task = Task::new("Buy milk");
    task.local_id = Some("local_1".into());
    store.save(task).await.expect("save");

    let server_task = remote("srv-1", "Buy milk");
    let resolved = store
        .reconcile_after_sync("local_1", &server_task)
        .await
        .expect("reconcile");
    assert_eq!(resolved, "local_1");

    let found = store
        .get_by_local_id("local_1")
        .await
        .expect("get")
        .expect("record present");
    assert_eq!(found.server_id.as_deref(), Some("srv-1"));
    assert_eq!(found.sync_status, Some(SyncStatus::Synced));
    assert_eq!(found.updated_at, server_task.updated_at);
    assert_eq!(store.get_all().await.expect("get_all").len(), 1);
}

#[tokio::test]
async fn test_reconcile_resolves_identity_conflict() {
    let store = open_store().await;

    // local_b already holds the server entity srv-7.
    let mut canonical = pulled("srv-7", "Canonical copy");
    canonical.local_id = Some("local_b".into());
    store.save(canonical).await.expect("save");

    // local_a is an unrelated local row that a push response now maps onto
    // the same server entity.
    let mut duplicate = Task::new("Duplicate copy");
    duplicate.local_id = Some("local_a".into());
    store.save(duplicate).await.expect("save");

    let resolved = store
        .reconcile_after_sync("local_a", &remote("srv-7", "Merged"))
        .await
        .expect("reconcile");
    assert_eq!(resolved, "local_b");

    assert!(
        store
            .get_by_local_id("local_a")
            .await
            .expect("get")
            .is_none()
    );
    let survivor = store
        .get_by_local_id("local_b")
        .await
        .expect("get")
        .expect("canonical record present");
    assert_eq!(survivor.title, "Merged");
    assert_eq!(survivor.sync_status, Some(SyncStatus::Synced));
    assert_eq!(store.get_all().await.expect("get_all").len(), 1);
}

#[tokio::test]
async fn test_bulk_save_consolidates_within_batch() {
    let store = open_store().await;

    let saved = store
        .bulk_save(vec![
            pulled("srv-1", "First"),
            pulled("srv-2", "Second"),
            pulled("srv-1", "First, revised"),
        ])
        .await
        .expect("bulk save");
    assert_eq!(saved.len(), 3);

    let all = store.get_all().await.expect("get_all");
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|t| t.sync_status == Some(SyncStatus::Synced)));
    let first = store
        .get_by_server_id("srv-1")
        .await
        .expect("get")
        .expect("record present");
    assert_eq!(first.title, "First, revised");
}

#[tokio::test]
async fn test_set_status_transitions_and_records_server_id() {
    let store = open_store().await;

    let local_id = store.save(Task::new("Promote me")).await.expect("save");
    store
        .set_status(&local_id, SyncStatus::Synced, Some("srv-5"))
        .await
        .expect("set status");

    let found = store
        .get_by_local_id(&local_id)
        .await
        .expect("get")
        .expect("record present");
    assert_eq!(found.sync_status, Some(SyncStatus::Synced));
    assert_eq!(found.server_id.as_deref(), Some("srv-5"));

    assert!(matches!(
        store
            .set_status("local_missing", SyncStatus::Synced, None)
            .await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_updated_at_refreshes_on_save() {
    let store = open_store().await;

    let local_id = store.save(Task::new("Track me")).await.expect("save");
    let before = store
        .get_by_local_id(&local_id)
        .await
        .expect("get")
        .expect("record present");

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let mut edit = before.clone();
    edit.title = "Tracked".into();
    store.stage_edit(edit).await.expect("stage edit");

    let after = store
        .get_by_local_id(&local_id)
        .await
        .expect("get")
        .expect("record present");
    assert!(after.updated_at > before.updated_at);
    assert_eq!(after.created_at, before.created_at);
}

#[tokio::test]
async fn test_watermark_round_trip() {
    let store = open_store().await;

    assert_eq!(store.watermark().await.expect("read"), None);
    store
        .set_watermark("2026-08-27T09:00:00.000000Z")
        .await
        .expect("set");
    assert_eq!(
        store.watermark().await.expect("read").as_deref(),
        Some("2026-08-27T09:00:00.000000Z")
    );

    store
        .set_watermark("2026-08-27T10:00:00.000000Z")
        .await
        .expect("overwrite");
    assert_eq!(
        store.watermark().await.expect("read").as_deref(),
        Some("2026-08-27T10:00:00.000000Z")
    );
}

#[tokio::test]
async fn test_change_notifications_fire_after_mutations() {
    let store = open_store().await;
    let mut rx = store.subscribe();

    store.save(Task::new("Notify me")).await.expect("save");
    assert!(rx.try_recv().is_ok(), "save should notify");

    store
        .bulk_save(vec![pulled("srv-1", "Batch")])
        .await
        .expect("bulk save");
    assert!(rx.try_recv().is_ok(), "bulk save should notify");
}
