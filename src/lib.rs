//! # tasksync
//!
//! Offline-first task storage and synchronization.
//!
//! A client keeps its task records in a [`LocalStore`] (SQLite via SeaORM),
//! edits them freely while disconnected, and reconciles with the remote
//! authoritative store once connectivity returns. The [`SyncEngine`] runs
//! one pass at a time: push every pending local mutation through a
//! [`RemoteGateway`] implementation, merge the authoritative responses back,
//! then pull remote records modified since the last successful sync.
//! Conflicts between locally-generated and server-assigned identifiers are
//! collapsed by the store's consolidation rule; field conflicts resolve
//! last-write-wins at the whole-record level.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tasksync::{LocalStore, SyncEngine, Task};
//!
//! let store = Arc::new(LocalStore::open("sqlite:./tasks.db?mode=rwc").await?);
//! let gateway = Arc::new(MyRestGateway::new(base_url));
//! let engine = SyncEngine::new(store.clone(), gateway);
//!
//! // Offline edit: lands in the store as pending_create.
//! store.save(Task::new("Buy milk")).await?;
//!
//! // On reconnect (or on demand):
//! let result = engine.synchronize(false).await;
//! println!("pushed {}, pulled {}", result.pushed, result.pulled.len());
//! ```
//!
//! ## Key types
//!
//! - [`LocalStore`] — durable client-side records, keyed by a local id,
//!   with the identity-consolidation rule
//! - [`SyncEngine`] — push-then-pull orchestration, reentrancy guard,
//!   watermark bookkeeping
//! - [`RemoteGateway`] — contract the surrounding application implements
//!   against its backing store
//! - [`ChangeNotification`] — payload-free signal emitted after every
//!   durable mutation; subscribe via [`LocalStore::subscribe`]

pub mod engine;
pub mod gateway;
pub mod messages;
pub mod store;
pub mod task;

pub use engine::{SyncEngine, SyncOutcome, SyncResult};
pub use gateway::{GatewayError, RemoteGateway};
pub use messages::{ChangeNotification, RemoteTask, TaskPayload};
pub use store::{LocalStore, StoreError};
pub use task::{SyncStatus, Task, TaskStatus, ValidationError};
