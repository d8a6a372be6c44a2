//! Task data model.
//!
//! A [`Task`] lives in the local store under a client-generated `local_id`
//! and, once the server has accepted it, also carries the authoritative
//! `server_id`. The [`SyncStatus`] field records which remote operation is
//! still owed for the record; the sync engine drains those on each pass.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TITLE_MIN_CHARS: usize = 3;
pub const TITLE_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 500;

/// Workflow state of a task, as the user sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

/// Which remote operation (if any) is still owed for a record.
///
/// `Synced` always implies a non-null `server_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::PendingCreate => "pending_create",
            SyncStatus::PendingUpdate => "pending_update",
            SyncStatus::PendingDelete => "pending_delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "synced" => Some(SyncStatus::Synced),
            "pending_create" => Some(SyncStatus::PendingCreate),
            "pending_update" => Some(SyncStatus::PendingUpdate),
            "pending_delete" => Some(SyncStatus::PendingDelete),
            _ => None,
        }
    }

    /// True for the three `pending_*` states drained by the push phase.
    pub fn is_pending(&self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }
}

/// A task record as stored locally.
///
/// Several fields are `Option` because they are filled in by
/// [`LocalStore::save`](crate::store::LocalStore::save): an input without a
/// `local_id` gets one synthesized, missing timestamps are stamped, and an
/// unset `sync_status` defaults to `Synced` (the pull-merge path). Records
/// read back from the store always have these populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub local_id: Option<String>,
    pub server_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<String>,
    pub status: TaskStatus,
    pub is_deleted: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub sync_status: Option<SyncStatus>,
}

impl Task {
    /// A fresh locally-created task: no identifiers yet, owed to the server
    /// as a create.
    pub fn new(title: impl Into<String>) -> Self {
        Task {
            local_id: None,
            server_id: None,
            title: title.into(),
            description: None,
            assigned_to: None,
            status: TaskStatus::Pending,
            is_deleted: false,
            created_at: None,
            updated_at: None,
            sync_status: Some(SyncStatus::PendingCreate),
        }
    }

    /// Domain fields only, for pushing to the remote gateway. Local
    /// bookkeeping (`local_id`, `sync_status`) never crosses the wire.
    pub fn payload(&self) -> crate::messages::TaskPayload {
        crate::messages::TaskPayload {
            title: self.title.clone(),
            description: self.description.clone(),
            assigned_to: self.assigned_to.clone(),
            status: self.status,
            is_deleted: self.is_deleted,
        }
    }

    /// Validate user-supplied fields. Called at the application boundary,
    /// before the record reaches the store; store operations assume valid
    /// input.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let title_len = self.title.trim().chars().count();
        if title_len < TITLE_MIN_CHARS || title_len > TITLE_MAX_CHARS {
            return Err(ValidationError::TitleLength(title_len));
        }
        if let Some(desc) = &self.description {
            let len = desc.chars().count();
            if len > DESCRIPTION_MAX_CHARS {
                return Err(ValidationError::DescriptionTooLong(len));
            }
        }
        Ok(())
    }
}

/// Malformed user input, rejected before any store or gateway call runs.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("title must be {TITLE_MIN_CHARS}-{TITLE_MAX_CHARS} characters, got {0}")]
    TitleLength(usize),

    #[error("description must be at most {DESCRIPTION_MAX_CHARS} characters, got {0}")]
    DescriptionTooLong(usize),
}

/// Current wall-clock time as an RFC 3339 / ISO-8601 UTC string.
///
/// Microsecond precision so that consecutive saves get distinct, strictly
/// ordered timestamps in the common case. Stored as text; RFC 3339 strings
/// with a fixed precision compare correctly as plain strings.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
