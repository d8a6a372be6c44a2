//! Contract for the remote authoritative store.
//!
//! The sync core never talks HTTP itself; the surrounding application
//! provides an implementation of [`RemoteGateway`] (typically a thin REST
//! client) and the engine drives it. Every mutation must return the full
//! authoritative record, including the server-assigned id and timestamps,
//! so the store can reconcile local bookkeeping against it.

use thiserror::Error;

use crate::messages::{RemoteTask, TaskPayload};

/// A remote call failed. During the push phase these are caught per record:
/// the record stays `pending_*` and is retried on the next sync pass.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("remote store unreachable: {0}")]
    Unreachable(String),

    #[error("remote store rejected the request: {0}")]
    Rejected(String),

    #[error("no remote task with id {0}")]
    NotFound(String),
}

/// Operations the sync core requires from the backing store.
///
/// Deletes are soft: the server flags `is_deleted` and keeps the record, so
/// the tombstone still flows through `get_tasks_modified_since` to other
/// clients. `updated_at` is the sole change-detection signal and the
/// comparison is strictly greater-than, so implementations must bump it
/// monotonically (second-or-finer resolution) on every mutation.
#[async_trait::async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn create_task(&self, payload: &TaskPayload) -> Result<RemoteTask, GatewayError>;

    async fn update_task(&self, id: &str, payload: &TaskPayload)
        -> Result<RemoteTask, GatewayError>;

    async fn soft_delete_task(&self, id: &str) -> Result<RemoteTask, GatewayError>;

    /// All records with `updated_at` strictly greater than `since`;
    /// `None` means "since the beginning" (every record).
    async fn get_tasks_modified_since(
        &self,
        since: Option<&str>,
    ) -> Result<Vec<RemoteTask>, GatewayError>;

    async fn get_task_by_id(&self, id: &str) -> Result<Option<RemoteTask>, GatewayError>;
}
