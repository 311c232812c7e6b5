//! Seam to the shared document service.
//!
//! Everything the coordination layer knows about the outside world goes
//! through [`DocumentStore`]: point reads, create-if-absent, field patches
//! and a change feed per document. The in-process [`MemoryStore`] is the
//! reference implementation; a backend adapter only has to honor the same
//! observable contract.

mod memory;
mod patch;

pub use memory::MemoryStore;
pub use patch::Patch;

use std::{error::Error, sync::Arc};

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by document-store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The document does not exist (or no longer exists).
    #[error("document `{id}` not found")]
    NotFound {
        /// Id of the missing document.
        id: String,
    },
    /// A create-if-absent lost the race to another creator.
    #[error("document `{id}` already exists")]
    AlreadyExists {
        /// Id of the contested document.
        id: String,
    },
    /// Backend unreachable or failing; the operation may be retried.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Human-readable description of the failure.
        message: String,
        /// Backend error that triggered this.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StoreError {
    /// Wrap a backend failure as a transient unavailability.
    pub fn unavailable(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        StoreError::Unavailable {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Immutable view of one document at one version.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    /// Per-document version, strictly increasing across accepted writes.
    pub version: u64,
    /// Document body at that version.
    pub body: Arc<Value>,
}

/// Live subscription to one document.
///
/// Backed by a watch channel: bursts of writes may be coalesced into the
/// latest snapshot, but versions observed through one watch never go
/// backwards and the final write is always delivered.
#[derive(Debug)]
pub struct DocumentWatch {
    receiver: watch::Receiver<DocumentSnapshot>,
}

impl DocumentWatch {
    pub(crate) fn new(receiver: watch::Receiver<DocumentSnapshot>) -> Self {
        Self { receiver }
    }

    /// Latest snapshot, marking it seen.
    pub fn latest(&mut self) -> DocumentSnapshot {
        self.receiver.borrow_and_update().clone()
    }

    /// Wait for a snapshot newer than the last one seen through this watch.
    pub async fn changed(&mut self) -> Result<DocumentSnapshot, WatchClosed> {
        self.receiver.changed().await.map_err(|_| WatchClosed)?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// Adapt into a [`Stream`](futures::Stream) of snapshots.
    pub fn into_stream(self) -> WatchStream<DocumentSnapshot> {
        WatchStream::new(self.receiver)
    }
}

/// The watched document was deleted or the backend dropped the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("document watch closed")]
pub struct WatchClosed;

/// Abstraction over the shared key-document service.
///
/// Implementations must guarantee that `create` is atomic create-if-absent
/// (exactly one concurrent creator wins, the rest get
/// [`StoreError::AlreadyExists`]) and that `patch` merges per field with
/// last-write-wins, leaving unrelated fields intact.
pub trait DocumentStore: Send + Sync {
    /// Fetch a document; `None` when it does not exist.
    fn read(&self, id: &str) -> BoxFuture<'static, StoreResult<Option<Value>>>;

    /// Create a document that must not exist yet.
    fn create(&self, id: &str, document: Value) -> BoxFuture<'static, StoreResult<()>>;

    /// Apply a field patch to an existing document.
    fn patch(&self, id: &str, patch: Patch) -> BoxFuture<'static, StoreResult<()>>;

    /// Subscribe to snapshots of an existing document.
    fn subscribe(&self, id: &str) -> BoxFuture<'static, StoreResult<DocumentWatch>>;
}
