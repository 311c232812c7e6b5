use std::{future::Future, sync::Arc};

use tokio::time::sleep;
use tracing::warn;

use crate::{
    config::{MAX_WRITE_RETRY_DELAY, SyncConfig},
    error::{SyncError, SyncResult},
    model::SessionDocument,
    store::{DocumentSnapshot, DocumentStore, DocumentWatch, Patch, StoreError},
};

/// Typed access to one session document.
///
/// Wraps the raw [`DocumentStore`] with (de)serialization of the session
/// shape and maps a vanished document to [`SyncError::SessionGone`], which
/// every loop treats as terminal.
#[derive(Clone)]
pub struct SessionClient {
    store: Arc<dyn DocumentStore>,
    session_id: String,
    config: SyncConfig,
}

impl SessionClient {
    /// Client for `session_id` on `store`.
    pub fn new(store: Arc<dyn DocumentStore>, session_id: impl Into<String>, config: SyncConfig) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            config,
        }
    }

    /// Id of the session this client addresses.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Fetch and decode the session document; `None` when it does not exist
    /// yet.
    pub async fn read_session(&self) -> SyncResult<Option<SessionDocument>> {
        let Some(body) = self.store.read(&self.session_id).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(body)?))
    }

    /// Fetch the session document, treating absence as terminal.
    pub async fn expect_session(&self) -> SyncResult<SessionDocument> {
        self.read_session()
            .await?
            .ok_or_else(|| SyncError::session_gone(&self.session_id))
    }

    /// Fetch the session document like [`SessionClient::expect_session`],
    /// riding out transient read failures.
    pub async fn expect_session_with_retry(&self) -> SyncResult<SessionDocument> {
        self.retrying("session read", || self.expect_session()).await
    }

    /// Create the session document. `Ok(true)` when this client created it,
    /// `Ok(false)` when another creator won the race.
    pub async fn create_session(&self, document: &SessionDocument) -> SyncResult<bool> {
        let body = serde_json::to_value(document)?;
        match self.store.create(&self.session_id, body).await {
            Ok(()) => Ok(true),
            Err(StoreError::AlreadyExists { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Create the session document with the same bounded retry policy as
    /// [`SessionClient::update_with_retry`]. A create whose write landed but
    /// whose response was lost surfaces as a lost race (`Ok(false)`) on the
    /// next attempt.
    pub async fn create_session_with_retry(&self, document: &SessionDocument) -> SyncResult<bool> {
        self.retrying("session create", || self.create_session(document))
            .await
    }

    /// Apply a field patch to the session document.
    pub async fn update(&self, patch: Patch) -> SyncResult<()> {
        match self.store.patch(&self.session_id, patch).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound { .. }) => Err(SyncError::session_gone(&self.session_id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Apply a field patch, retrying transient store failures with a
    /// doubling delay up to the configured attempt budget.
    pub async fn update_with_retry(&self, patch: Patch) -> SyncResult<()> {
        self.retrying("session write", || self.update(patch.clone()))
            .await
    }

    /// Bounded retry loop for transient store failures: doubling delay,
    /// capped per attempt, budgeted by the config. Non-transient errors
    /// surface immediately.
    async fn retrying<T, F, Fut>(&self, what: &str, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut delay = self.config.write_retry_delay;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.config.write_attempts => {
                    warn!(
                        session_id = %self.session_id,
                        attempt,
                        error = %err,
                        "{what} failed; retrying"
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_WRITE_RETRY_DELAY);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Subscribe to decoded snapshots of the session document.
    pub async fn watch(&self) -> SyncResult<SessionWatch> {
        match self.store.subscribe(&self.session_id).await {
            Ok(inner) => Ok(SessionWatch {
                session_id: self.session_id.clone(),
                inner,
            }),
            Err(StoreError::NotFound { .. }) => Err(SyncError::session_gone(&self.session_id)),
            Err(err) => Err(err.into()),
        }
    }
}

/// Decoded live subscription to the session document.
///
/// Inherits the raw watch guarantees: bursts may coalesce to the latest
/// snapshot, observed versions never go backwards, the final write is always
/// delivered.
pub struct SessionWatch {
    session_id: String,
    inner: DocumentWatch,
}

impl SessionWatch {
    /// Latest decoded snapshot, marking it seen.
    pub fn latest(&mut self) -> SyncResult<VersionedSession> {
        decode_snapshot(self.inner.latest())
    }

    /// Wait for a snapshot newer than the last one seen.
    pub async fn changed(&mut self) -> SyncResult<VersionedSession> {
        match self.inner.changed().await {
            Ok(snapshot) => decode_snapshot(snapshot),
            Err(_) => Err(SyncError::session_gone(&self.session_id)),
        }
    }
}

/// A decoded session document plus the store version it came from.
#[derive(Debug, Clone)]
pub struct VersionedSession {
    /// Store version of the snapshot.
    pub version: u64,
    /// The decoded document.
    pub document: SessionDocument,
}

fn decode_snapshot(snapshot: DocumentSnapshot) -> SyncResult<VersionedSession> {
    let document = serde_json::from_value(snapshot.body.as_ref().clone())?;
    Ok(VersionedSession {
        version: snapshot.version,
        document,
    })
}
