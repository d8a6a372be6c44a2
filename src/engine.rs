//! Sync engine: one push-then-pull pass over the local store and the
//! remote gateway.
//!
//! The engine owns the reentrancy guard (one outstanding pass per process,
//! no queueing) and the last-successful-sync watermark, persisted via the
//! store so it survives restarts. A pass never throws past its own
//! boundary: callers always get a structured [`SyncResult`], and the
//! `syncing` flag is released on every exit path, including panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::gateway::{GatewayError, RemoteGateway};
use crate::messages::RemoteTask;
use crate::store::{LocalStore, StoreError};
use crate::task::{SyncStatus, Task, now_rfc3339};

/// How a synchronization pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Push and pull both ran; individual push failures may still be
    /// reported in [`SyncResult::push_failures`].
    Completed,
    /// Connectivity is down; nothing was attempted.
    Offline,
    /// Another pass is already running; nothing was attempted. The caller
    /// decides whether to retry.
    Busy,
    /// The pass aborted (local storage unavailable) or the pull phase
    /// failed. Push results that completed before the failure stand.
    Failed,
}

/// Summary of one synchronization pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub outcome: SyncOutcome,
    /// Pending records pushed and reconciled this pass.
    pub pushed: usize,
    /// Pending records whose push failed; they stay `pending_*` and are
    /// retried on the next pass.
    pub push_failures: usize,
    /// Remote records merged by the pull phase, as stored locally.
    pub pulled: Vec<Task>,
    pub error: Option<String>,
}

impl SyncResult {
    fn with_outcome(outcome: SyncOutcome) -> Self {
        SyncResult {
            outcome,
            pushed: 0,
            push_failures: 0,
            pulled: Vec::new(),
            error: None,
        }
    }

    fn failed(mut self, error: String) -> Self {
        self.outcome = SyncOutcome::Failed;
        self.error = Some(error);
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == SyncOutcome::Completed
    }
}

#[derive(Error, Debug)]
enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("pending record {0} has no server id for its {1:?} push")]
    MissingServerId(String, SyncStatus),

    #[error("pending record has no local id")]
    MissingLocalId,
}

/// Scoped acquisition of the `syncing` flag. Dropping the guard releases
/// the flag, so it cannot stay stuck true on any exit path.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Orchestrates bidirectional sync between the [`LocalStore`] and a
/// [`RemoteGateway`].
///
/// The `online` flag is driven by the surrounding application's
/// connectivity hooks via [`set_online`](SyncEngine::set_online); it starts
/// optimistic (`true`). The guard is a same-process flag only — it does not
/// protect against a second process racing on the same database.
pub struct SyncEngine {
    store: Arc<LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    syncing: AtomicBool,
    online: AtomicBool,
}

impl SyncEngine {
    pub fn new(store: Arc<LocalStore>, gateway: Arc<dyn RemoteGateway>) -> Self {
        SyncEngine {
            store,
            gateway,
            syncing: AtomicBool::new(false),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// True while a pass is running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Run one synchronization pass: push every pending local mutation,
    /// then pull remote records modified since the stored watermark.
    ///
    /// `force_full_sync` ignores the stored watermark and pulls every
    /// remote record. Push strictly precedes pull, so a record pushed in
    /// this pass is reconciled before its own echo can be pulled back
    /// against a stale watermark.
    pub async fn synchronize(&self, force_full_sync: bool) -> SyncResult {
        if !self.is_online() {
            log::debug!("skipping sync: offline");
            return SyncResult::with_outcome(SyncOutcome::Offline);
        }
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            log::debug!("skipping sync: a pass is already running");
            return SyncResult::with_outcome(SyncOutcome::Busy);
        };

        let mut result = SyncResult::with_outcome(SyncOutcome::Completed);

        // Push phase: each record independently. A failed push leaves its
        // record pending for the next pass and never aborts the batch or
        // the pull.
        match self.store.get_pending_changes().await {
            Ok(pending) => {
                for task in &pending {
                    match self.push_one(task).await {
                        Ok(()) => result.pushed += 1,
                        Err(err) => {
                            log::warn!("push failed for {:?}: {err}", task.local_id);
                            result.push_failures += 1;
                        }
                    }
                }
            }
            Err(err) => {
                // Local storage down: the whole pass is off. Watermark is
                // left untouched.
                log::error!("could not read pending changes: {err}");
                return result.failed(err.to_string());
            }
        }

        let since = if force_full_sync {
            None
        } else {
            self.stored_watermark().await
        };
        match self.pull(since.as_deref()).await {
            Ok(pulled) => result.pulled = pulled,
            Err(err) => {
                // Pull failure aborts only the pull; completed push results
                // stand.
                log::warn!("pull phase failed: {err}");
                result.outcome = SyncOutcome::Failed;
                result.error = Some(err.to_string());
            }
        }

        if let Err(err) = self.store.set_watermark(&now_rfc3339()).await {
            log::error!("could not persist sync watermark: {err}");
            return result.failed(err.to_string());
        }

        result
    }

    /// Dispatch one pending record to the gateway by its `sync_status` and
    /// merge the authoritative response back into the store.
    async fn push_one(&self, task: &Task) -> Result<(), SyncError> {
        let local_id = task.local_id.as_deref().ok_or(SyncError::MissingLocalId)?;
        let payload = task.payload();

        let remote = match task.sync_status {
            Some(SyncStatus::PendingCreate) => self.gateway.create_task(&payload).await?,
            Some(SyncStatus::PendingUpdate) => {
                let server_id = require_server_id(task, SyncStatus::PendingUpdate)?;
                self.gateway.update_task(server_id, &payload).await?
            }
            Some(SyncStatus::PendingDelete) => {
                let server_id = require_server_id(task, SyncStatus::PendingDelete)?;
                self.gateway.soft_delete_task(server_id).await?
            }
            // Not pending; nothing owed.
            _ => return Ok(()),
        };

        self.store.reconcile_after_sync(local_id, &remote).await?;
        Ok(())
    }

    async fn pull(&self, since: Option<&str>) -> Result<Vec<Task>, SyncError> {
        let remote = self.gateway.get_tasks_modified_since(since).await?;
        if remote.is_empty() {
            return Ok(Vec::new());
        }
        log::debug!("pulled {} remote record(s)", remote.len());
        let merged = self
            .store
            .bulk_save(remote.into_iter().map(RemoteTask::into_task).collect())
            .await?;
        Ok(merged)
    }

    async fn stored_watermark(&self) -> Option<String> {
        match self.store.watermark().await {
            Ok(watermark) => watermark,
            Err(err) => {
                log::warn!("could not read sync watermark, pulling everything: {err}");
                None
            }
        }
    }
}

fn require_server_id(task: &Task, status: SyncStatus) -> Result<&str, SyncError> {
    task.server_id.as_deref().ok_or_else(|| {
        SyncError::MissingServerId(task.local_id.clone().unwrap_or_default(), status)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_resets_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let guard = SyncGuard::acquire(&flag).expect("flag is free");
            assert!(flag.load(Ordering::Acquire));
            assert!(SyncGuard::acquire(&flag).is_none());
            drop(guard);
        }
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn test_guard_resets_on_panic() {
        let flag = AtomicBool::new(false);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = SyncGuard::acquire(&flag).expect("flag is free");
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!flag.load(Ordering::Acquire));
    }
}
