//! One seat in a writing match.
//!
//! [`MatchSession::join`] resolves the shared session document, puts the
//! local participant on the roster and spawns the three background loops
//! that drive the seat: presence heartbeats, phase coordination and the
//! synthetic-participant scheduler. Every loop works exclusively through
//! the document store; two seats never talk to each other directly, so any
//! client can crash, rejoin or take over for a vanished peer.

use std::sync::Arc;

use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use validator::Validate;

use crate::{
    clock::{Clock, SystemClock},
    config::SyncConfig,
    error::SyncResult,
    model::{Phase, PhasePayload, SessionDocument, SessionSummary},
    scoring::Scorer,
    store::DocumentStore,
};

mod bootstrap;
mod client;
mod coordinator;
mod events;
mod params;
mod presence;
mod readiness;
mod scratch;
mod submission;
mod synthetic;

pub use client::{SessionClient, SessionWatch, VersionedSession};
pub use events::MatchEvent;
pub use params::{JoinParams, MatchSetup, RosterEntry};
pub use readiness::{ReadinessView, readiness, time_remaining_ms};
pub use submission::{EMPTY_SCORE, FALLBACK_SCORE};

use bootstrap::Bootstrapper;
use coordinator::PhaseCoordinator;
use events::EventHub;
use presence::PresenceTracker;
use scratch::TransitionScratch;
use submission::SubmissionPipeline;
use synthetic::SyntheticScheduler;

/// Collaborators a seat needs beyond the matchmaking parameters.
pub struct JoinOptions {
    /// Timing and retry knobs.
    pub config: SyncConfig,
    /// Clock behind every persisted timestamp and deadline computation.
    pub clock: Arc<dyn Clock>,
    /// Grader for submitted work.
    pub scorer: Arc<dyn Scorer>,
}

impl JoinOptions {
    /// Default knobs and the system clock around `scorer`.
    pub fn new(scorer: Arc<dyn Scorer>) -> Self {
        Self {
            config: SyncConfig::default(),
            clock: Arc::new(SystemClock),
            scorer,
        }
    }
}

/// A joined seat in a match.
///
/// Holds the background loops alive; dropping the handle stops them without
/// touching the document, which is how an unclean disconnect looks to the
/// rest of the party. [`MatchSession::leave`] additionally records the
/// disconnect so peers reclassify immediately instead of waiting out the
/// staleness horizon.
pub struct MatchSession {
    session_id: String,
    user_id: String,
    clock: Arc<dyn Clock>,
    events: EventHub,
    submissions: Arc<SubmissionPipeline>,
    coordinator: Arc<PhaseCoordinator>,
    presence: Arc<PresenceTracker>,
    snapshots: watch::Receiver<SessionDocument>,
    tasks: Vec<JoinHandle<()>>,
}

impl MatchSession {
    /// Join `params.session_id` on `store`.
    ///
    /// The designated leader creates the session document; followers poll
    /// for it and promote themselves if the leader never shows. Returns once
    /// the local participant is on the roster with a first heartbeat
    /// written and the coordination loops are running.
    pub async fn join(
        store: Arc<dyn DocumentStore>,
        params: JoinParams,
        options: JoinOptions,
    ) -> SyncResult<Self> {
        params.validate()?;
        options.config.validate()?;
        let JoinOptions {
            config,
            clock,
            scorer,
        } = options;

        let client = SessionClient::new(store, params.session_id.clone(), config.clone());
        let bootstrap = Bootstrapper::new(
            client.clone(),
            clock.clone(),
            config.clone(),
            params.clone(),
        );
        let document = bootstrap.resolve().await?;
        bootstrap.register_if_needed(&document).await?;

        let events = EventHub::default();
        let presence = Arc::new(PresenceTracker::new(
            client.clone(),
            params.user_id.clone(),
            params.display_name.clone(),
            clock.clone(),
            config.clone(),
            events.clone(),
        ));
        presence.announce_join().await?;

        let scratch = Arc::new(TransitionScratch::new());
        let submissions = Arc::new(SubmissionPipeline::new(
            client.clone(),
            clock.clone(),
            config.clone(),
            scorer,
            events.clone(),
        ));
        let (snapshot_tx, snapshots) = watch::channel(document);
        let coordinator = Arc::new(PhaseCoordinator::new(
            client.clone(),
            clock.clone(),
            config.clone(),
            submissions.clone(),
            scratch.clone(),
            events.clone(),
            params.user_id.clone(),
            snapshot_tx,
        ));
        let scheduler = Arc::new(SyntheticScheduler::new(
            client.clone(),
            clock.clone(),
            config,
            submissions.clone(),
            scratch,
            params.leader,
        ));

        let tasks = vec![
            tokio::spawn(coordinator.clone().run(client.watch().await?)),
            tokio::spawn(presence.clone().run(client.watch().await?)),
            tokio::spawn(scheduler.run(client.watch().await?)),
        ];

        Ok(Self {
            session_id: params.session_id,
            user_id: params.user_id,
            clock,
            events,
            submissions,
            coordinator,
            presence,
            snapshots,
            tasks,
        })
    }

    /// Store id of the joined session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Local participant id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Connection id minted for this seat.
    pub fn connection_id(&self) -> &str {
        self.presence.connection_id()
    }

    /// Subscribe to match events. Only events broadcast after the call are
    /// delivered.
    pub fn events(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }

    /// Latest session document accepted by the coordination loop.
    pub fn snapshot(&self) -> SessionDocument {
        self.snapshots.borrow().clone()
    }

    /// Live feed of the documents behind [`MatchSession::snapshot`], for UI
    /// shells that diff instead of poll.
    pub fn watch(&self) -> watch::Receiver<SessionDocument> {
        self.snapshots.clone()
    }

    /// UI projection of the latest snapshot.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary::from(&self.snapshot())
    }

    /// Readiness and remaining time of the current phase, right now.
    pub fn readiness(&self) -> ReadinessView {
        readiness::readiness(&self.snapshot(), self.clock.now_ms())
    }

    /// Milliseconds left in the current phase window; the full duration
    /// while the phase has not started, zero once the deadline passed.
    pub fn time_remaining_ms(&self) -> u64 {
        let doc = self.snapshot();
        readiness::time_remaining_ms(&doc, doc.current_phase(), self.clock.now_ms())
    }

    /// Open the first phase window; a no-op when a peer already did.
    pub async fn start_match(&self) -> SyncResult<()> {
        self.coordinator.start_match().await
    }

    /// Submit the local participant's work for `phase`.
    pub async fn submit(&self, phase: Phase, payload: PhasePayload) -> SyncResult<()> {
        self.submissions.submit(&self.user_id, phase, payload).await
    }

    /// Leave the match: stop the loops, then record the disconnect so peers
    /// reclassify without waiting out the staleness horizon.
    pub async fn leave(mut self) -> SyncResult<()> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.presence.mark_left().await
    }
}

impl Drop for MatchSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
