//! Types that cross a boundary: the remote wire record, the push payload,
//! and the change notification broadcast to presentation layers.

use serde::{Deserialize, Serialize};

use crate::task::{SyncStatus, Task, TaskStatus};

/// A task record as the remote authoritative store returns it.
///
/// `id` is the server-assigned identifier. `updated_at` is the sole change
/// signal for [`get_tasks_modified_since`](crate::gateway::RemoteGateway::get_tasks_modified_since)
/// and must be monotonically increasing per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl RemoteTask {
    /// Convert into a local record ready for merging: tagged `Synced`, no
    /// `local_id` yet. The store's consolidation rule maps it onto an
    /// existing local record with the same `server_id`, or synthesizes a
    /// fresh `local_id` for a never-seen entity.
    pub fn into_task(self) -> Task {
        Task {
            local_id: None,
            server_id: Some(self.id),
            title: self.title,
            description: self.description,
            assigned_to: self.assigned_to,
            status: self.status,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
            sync_status: Some(SyncStatus::Synced),
        }
    }
}

/// Domain fields sent to the remote gateway on create/update.
///
/// Deliberately excludes `local_id` and `sync_status`; those are local
/// bookkeeping and never leave the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<String>,
    pub status: TaskStatus,
    pub is_deleted: bool,
}

/// Payload-free signal that the local store changed.
///
/// Broadcast after every durable mutation (local edit or sync merge).
/// Consumers re-read the store; the signal itself carries no data, so a
/// lagging receiver that misses intermediate notifications still converges
/// on the next one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeNotification;
