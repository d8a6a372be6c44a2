//! Durable local task store.
//!
//! One SQLite table keyed by `local_id`, with secondary indexes on
//! `server_id` (unique), `sync_status`, and `updated_at`, plus a
//! `_tasksync_meta` key/value table holding the last-successful-sync
//! watermark. All write paths funnel through [`save_in`], which owns the
//! identity-consolidation rule: a server entity never occupies two local
//! rows, even when a locally-created record and a pulled copy of the same
//! entity race.
//!
//! Batch operations (`bulk_save`, `reconcile_after_sync`) run inside a
//! single transaction so partial writes are never observed.

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr,
    FromQueryResult, Statement, TransactionTrait,
};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::messages::{ChangeNotification, RemoteTask};
use crate::task::{SyncStatus, Task, TaskStatus, now_rfc3339};

/// The local storage engine failed. The sync engine treats this as a
/// per-record failure, not a reason to abort the whole pass.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage engine failure: {0}")]
    Storage(#[from] DbErr),

    #[error("no task stored under local id {0}")]
    NotFound(String),
}

const WATERMARK_KEY: &str = "last_sync_timestamp";

const TASK_COLUMNS: &str = "local_id, server_id, title, description, assigned_to, status, \
                            is_deleted, created_at, updated_at, sync_status";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tasks (
        local_id TEXT PRIMARY KEY,
        server_id TEXT,
        title TEXT NOT NULL,
        description TEXT,
        assigned_to TEXT,
        status TEXT NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        sync_status TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_server_id
        ON tasks (server_id) WHERE server_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_tasks_sync_status ON tasks (sync_status)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_updated_at ON tasks (updated_at)",
    "CREATE TABLE IF NOT EXISTS _tasksync_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// Client-side durable store for [`Task`] records.
///
/// Owns the change-notification broadcast channel: every durable mutation
/// fires one [`ChangeNotification`] after its transaction commits, so
/// presentation layers can re-read the store.
pub struct LocalStore {
    db: DatabaseConnection,
    change_tx: broadcast::Sender<ChangeNotification>,
}

impl LocalStore {
    /// Connect to the given SeaORM database URL (`sqlite::memory:`,
    /// `sqlite:./tasks.db?mode=rwc`) and create the schema if needed.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let mut opts = ConnectOptions::new(database_url);
        // Single client-side writer; this also keeps an in-memory SQLite
        // database on one pooled connection instead of one database per
        // connection.
        opts.max_connections(1);
        let db = Database::connect(opts).await?;
        create_schema(&db).await?;

        let (change_tx, _) = broadcast::channel::<ChangeNotification>(256);
        Ok(LocalStore { db, change_tx })
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.change_tx.subscribe()
    }

    /// Every record except fully-reconciled tombstones (`is_deleted` and
    /// already `synced`). No ordering guarantee; callers re-sort.
    ///
    /// A record that is deleted but still `pending_delete` remains visible:
    /// the delete lifecycle stays observable until the server has
    /// acknowledged it.
    pub async fn get_all(&self) -> Result<Vec<Task>, StoreError> {
        let rows = TaskRow::find_by_statement(Statement::from_string(
            DatabaseBackend::Sqlite,
            format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE NOT (is_deleted = 1 AND sync_status = 'synced')"
            ),
        ))
        .all(&self.db)
        .await?;
        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    pub async fn get_by_local_id(&self, local_id: &str) -> Result<Option<Task>, StoreError> {
        Ok(find_by_local_id(&self.db, local_id).await?)
    }

    pub async fn get_by_server_id(&self, server_id: &str) -> Result<Option<Task>, StoreError> {
        Ok(find_by_server_id(&self.db, server_id).await?)
    }

    /// Records still owed to the server: `sync_status` in `pending_create`,
    /// `pending_update`, `pending_delete`. Ordering across the three groups
    /// is unspecified; the sync engine treats each record independently.
    pub async fn get_pending_changes(&self) -> Result<Vec<Task>, StoreError> {
        let rows = TaskRow::find_by_statement(Statement::from_string(
            DatabaseBackend::Sqlite,
            format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE sync_status IN ('pending_create', 'pending_update', 'pending_delete')"
            ),
        ))
        .all(&self.db)
        .await?;
        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    /// Upsert a record, returning the resolved `local_id`.
    ///
    /// Applies the full save contract: local-id synthesis for inputs without
    /// one, consolidation against an existing record with the same
    /// `server_id`, `pending_create` marking for never-synced records, and
    /// timestamp bookkeeping. See [`save_in`] for the rules.
    pub async fn save(&self, task: Task) -> Result<String, StoreError> {
        let txn = self.db.begin().await?;
        let (local_id, _) = save_in(&txn, task).await?;
        txn.commit().await?;
        self.notify();
        Ok(local_id)
    }

    /// Apply the same per-record rules as [`save`](LocalStore::save) to a
    /// whole batch inside one transaction: either every record becomes
    /// visible or none does. Used by the pull phase to merge a page of
    /// remote records. Returns the records as stored.
    pub async fn bulk_save(&self, tasks: Vec<Task>) -> Result<Vec<Task>, StoreError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let txn = self.db.begin().await?;
        let mut saved = Vec::with_capacity(tasks.len());
        for task in tasks {
            let (_, record) = save_in(&txn, task).await?;
            saved.push(record);
        }
        txn.commit().await?;
        self.notify();
        Ok(saved)
    }

    /// Unconditional physical removal. Only meant for records the server has
    /// never seen; synced deletions go through [`soft_delete`](LocalStore::soft_delete)
    /// and persist as tombstones.
    pub async fn delete_by_local_id(&self, local_id: &str) -> Result<(), StoreError> {
        delete_row(&self.db, local_id).await?;
        self.notify();
        Ok(())
    }

    /// Merge an authoritative server record into the local record stored
    /// under `local_id`, returning the canonical local id the merge landed
    /// on.
    ///
    /// Normally that is `local_id` itself. If the server id already exists
    /// under a different local id — two local records mapped to one server
    /// entity — the other record is canonical: the merge is written there
    /// and the record under `local_id` is physically deleted. Both writes
    /// happen in one transaction.
    pub async fn reconcile_after_sync(
        &self,
        local_id: &str,
        server_task: &RemoteTask,
    ) -> Result<String, StoreError> {
        let txn = self.db.begin().await?;
        let resolved = reconcile_in(&txn, local_id, server_task).await?;
        txn.commit().await?;
        self.notify();
        Ok(resolved)
    }

    /// Narrow status transition without a full merge. Optionally records a
    /// freshly learned `server_id`; existing values are kept when `server_id`
    /// is `None`.
    pub async fn set_status(
        &self,
        local_id: &str,
        sync_status: SyncStatus,
        server_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = self
            .db
            .execute_raw(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "UPDATE tasks SET sync_status = $1,
                        server_id = COALESCE($2, server_id),
                        updated_at = $3
                 WHERE local_id = $4",
                [
                    sync_status.as_str().into(),
                    server_id.map(str::to_string).into(),
                    now_rfc3339().into(),
                    local_id.into(),
                ],
            ))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(local_id.to_string()));
        }
        self.notify();
        Ok(())
    }

    /// Persist a user edit with the right pending marker: a record the
    /// server already knows about becomes `pending_update`; a never-synced
    /// record stays `pending_create`.
    pub async fn stage_edit(&self, mut task: Task) -> Result<String, StoreError> {
        task.sync_status = Some(if task.server_id.is_some() {
            SyncStatus::PendingUpdate
        } else {
            SyncStatus::PendingCreate
        });
        self.save(task).await
    }

    /// Soft-delete entry point. A record the server knows about is flagged
    /// `is_deleted` and marked `pending_delete` for the next push; a record
    /// that never reached the server is removed physically.
    pub async fn soft_delete(&self, local_id: &str) -> Result<(), StoreError> {
        let Some(mut task) = self.get_by_local_id(local_id).await? else {
            return Err(StoreError::NotFound(local_id.to_string()));
        };
        if task.server_id.is_some() {
            task.is_deleted = true;
            task.sync_status = Some(SyncStatus::PendingDelete);
            self.save(task).await?;
        } else {
            self.delete_by_local_id(local_id).await?;
        }
        Ok(())
    }

    /// The last-successful-sync watermark, if any sync has completed.
    pub async fn watermark(&self) -> Result<Option<String>, StoreError> {
        let row = MetaRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "SELECT value FROM _tasksync_meta WHERE key = $1",
            [WATERMARK_KEY.into()],
        ))
        .one(&self.db)
        .await?;
        Ok(row.map(|r| r.value))
    }

    pub async fn set_watermark(&self, timestamp: &str) -> Result<(), StoreError> {
        self.db
            .execute_raw(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "INSERT OR REPLACE INTO _tasksync_meta (key, value) VALUES ($1, $2)",
                [WATERMARK_KEY.into(), timestamp.into()],
            ))
            .await?;
        Ok(())
    }

    fn notify(&self) {
        // Nobody listening is fine; send only fails without receivers.
        let _ = self.change_tx.send(ChangeNotification);
    }
}

async fn create_schema(db: &impl ConnectionTrait) -> Result<(), DbErr> {
    for stmt in SCHEMA {
        db.execute_unprepared(stmt).await?;
    }
    Ok(())
}

/// `local_<seed>_<suffix>`: seed from the server id when known, else the
/// current epoch millis; random suffix for uniqueness with overwhelming
/// probability. Not cryptographic, and never reassigned once stored (except
/// by consolidation).
fn synthesize_local_id(server_id: Option<&str>) -> String {
    let seed = match server_id {
        Some(id) => id.to_string(),
        None => chrono::Utc::now().timestamp_millis().to_string(),
    };
    let suffix = Uuid::new_v4().simple().to_string();
    format!("local_{seed}_{}", &suffix[..8])
}

/// Per-record save contract, usable both on the connection and inside a
/// transaction:
///
/// 1. Inputs without a `local_id` get one synthesized.
/// 2. Consolidation: an existing record with the same `server_id` donates
///    its `local_id`, so the upsert lands on the existing row.
/// 3. A record without a `server_id` that is not already `pending_create`
///    becomes `pending_create` (its `created_at` stamped if absent).
/// 4. `updated_at` is refreshed to now, `created_at` backfilled from it,
///    and an unset `sync_status` defaults to `synced` (pull-merge path).
async fn save_in(db: &impl ConnectionTrait, mut task: Task) -> Result<(String, Task), StoreError> {
    let mut local_id = match task.local_id.take() {
        Some(id) => id,
        None => synthesize_local_id(task.server_id.as_deref()),
    };

    if let Some(server_id) = task.server_id.as_deref() {
        if let Some(existing) = find_by_server_id(db, server_id).await? {
            if let Some(existing_id) = existing.local_id {
                if existing_id != local_id {
                    log::debug!(
                        "consolidating local id {local_id} into {existing_id} for server id {server_id}"
                    );
                    local_id = existing_id;
                }
            }
        }
    }
    task.local_id = Some(local_id.clone());

    if task.server_id.is_none() && task.sync_status != Some(SyncStatus::PendingCreate) {
        task.sync_status = Some(SyncStatus::PendingCreate);
        if task.created_at.is_none() {
            task.created_at = Some(now_rfc3339());
        }
    }

    let now = now_rfc3339();
    task.updated_at = Some(now.clone());
    if task.created_at.is_none() {
        task.created_at = Some(now);
    }
    if task.sync_status.is_none() {
        task.sync_status = Some(SyncStatus::Synced);
    }
    if task.description.as_deref() == Some("") {
        task.description = None;
    }
    if task.assigned_to.as_deref() == Some("") {
        task.assigned_to = None;
    }

    upsert_row(db, &task).await?;
    Ok((local_id, task))
}

/// Overlay the authoritative server record onto the local one and mark it
/// `synced`; resolve identity conflicts toward the record already holding
/// the server id. Returns the canonical local id.
async fn reconcile_in(
    db: &impl ConnectionTrait,
    local_id: &str,
    server_task: &RemoteTask,
) -> Result<String, StoreError> {
    let mut merged = match find_by_local_id(db, local_id).await? {
        Some(local) => Task {
            server_id: Some(server_task.id.clone()),
            title: server_task.title.clone(),
            description: server_task.description.clone(),
            assigned_to: server_task.assigned_to.clone(),
            status: server_task.status,
            is_deleted: server_task.is_deleted,
            created_at: server_task.created_at.clone().or(local.created_at),
            ..local
        },
        None => server_task.clone().into_task(),
    };
    merged.local_id = Some(local_id.to_string());
    merged.sync_status = Some(SyncStatus::Synced);
    merged.updated_at = Some(server_task.updated_at.clone().unwrap_or_else(now_rfc3339));
    if merged.created_at.is_none() {
        merged.created_at = merged.updated_at.clone();
    }

    let mut resolved = local_id.to_string();
    if let Some(other) = find_by_server_id(db, &server_task.id).await? {
        if let Some(other_id) = other.local_id {
            if other_id != local_id {
                // Two local records mapped to one server entity. The record
                // already holding the server id is canonical: merge there
                // and drop the duplicate row.
                log::info!(
                    "identity conflict on server id {}: merging {local_id} into {other_id}",
                    server_task.id
                );
                merged.local_id = Some(other_id.clone());
                delete_row(db, local_id).await?;
                resolved = other_id;
            }
        }
    }

    upsert_row(db, &merged).await?;
    Ok(resolved)
}

async fn upsert_row(db: &impl ConnectionTrait, task: &Task) -> Result<(), DbErr> {
    db.execute_raw(Statement::from_sql_and_values(
        DatabaseBackend::Sqlite,
        "INSERT OR REPLACE INTO tasks
            (local_id, server_id, title, description, assigned_to, status,
             is_deleted, created_at, updated_at, sync_status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        [
            task.local_id.clone().into(),
            task.server_id.clone().into(),
            task.title.clone().into(),
            task.description.clone().into(),
            task.assigned_to.clone().into(),
            task.status.as_str().into(),
            task.is_deleted.into(),
            task.created_at.clone().into(),
            task.updated_at.clone().into(),
            task.sync_status.map(|s| s.as_str().to_string()).into(),
        ],
    ))
    .await?;
    Ok(())
}

async fn find_by_local_id(
    db: &impl ConnectionTrait,
    local_id: &str,
) -> Result<Option<Task>, DbErr> {
    let row = TaskRow::find_by_statement(Statement::from_sql_and_values(
        DatabaseBackend::Sqlite,
        format!("SELECT {TASK_COLUMNS} FROM tasks WHERE local_id = $1").as_str(),
        [local_id.into()],
    ))
    .one(db)
    .await?;
    Ok(row.map(TaskRow::into_task))
}

async fn find_by_server_id(
    db: &impl ConnectionTrait,
    server_id: &str,
) -> Result<Option<Task>, DbErr> {
    let row = TaskRow::find_by_statement(Statement::from_sql_and_values(
        DatabaseBackend::Sqlite,
        format!("SELECT {TASK_COLUMNS} FROM tasks WHERE server_id = $1").as_str(),
        [server_id.into()],
    ))
    .one(db)
    .await?;
    Ok(row.map(TaskRow::into_task))
}

async fn delete_row(db: &impl ConnectionTrait, local_id: &str) -> Result<u64, DbErr> {
    let result = db
        .execute_raw(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "DELETE FROM tasks WHERE local_id = $1",
            [local_id.into()],
        ))
        .await?;
    Ok(result.rows_affected())
}

#[derive(Debug, FromQueryResult)]
struct TaskRow {
    local_id: String,
    server_id: Option<String>,
    title: String,
    description: Option<String>,
    assigned_to: Option<String>,
    status: String,
    is_deleted: bool,
    created_at: String,
    updated_at: String,
    sync_status: String,
}

impl TaskRow {
    fn into_task(self) -> Task {
        Task {
            local_id: Some(self.local_id),
            server_id: self.server_id,
            title: self.title,
            description: self.description,
            assigned_to: self.assigned_to,
            status: TaskStatus::parse(&self.status).unwrap_or(TaskStatus::Pending),
            is_deleted: self.is_deleted,
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
            sync_status: Some(SyncStatus::parse(&self.sync_status).unwrap_or(SyncStatus::Synced)),
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct MetaRow {
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesized_ids_are_unique() {
        let a = synthesize_local_id(None);
        let b = synthesize_local_id(None);
        assert_ne!(a, b);
        assert!(a.starts_with("local_"));
    }

    #[test]
    fn test_synthesized_id_seeds_from_server_id() {
        let id = synthesize_local_id(Some("srv-42"));
        assert!(id.starts_with("local_srv-42_"));
    }
}
