use std::sync::Arc;

use serde_json::json;
use tokio::{
    sync::watch,
    time::{Instant, sleep_until},
};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    config::SyncConfig,
    error::{SyncError, SyncResult},
    model::{Phase, SessionDocument, SessionState, SessionTiming},
    store::Patch,
};

use super::{
    client::{SessionClient, SessionWatch},
    events::{EventHub, MatchEvent},
    readiness,
    scratch::TransitionScratch,
    submission::SubmissionPipeline,
};

/// Drives the shared phase state machine from one client's seat.
///
/// Every client runs the same loop against the same document, so every
/// decision here must be convergent: transitions are guarded by a local
/// claim (once per process) plus a fresh re-read of the document (skip if
/// someone else already moved it), and the writes themselves are last-write-
/// wins on identical values. A phase advances when the whole roster has
/// submitted or when the deadline lands, whichever comes first; the deadline
/// path first records an empty stand-in for the local participant so nobody
/// holds the group hostage.
pub struct PhaseCoordinator {
    client: SessionClient,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    submissions: Arc<SubmissionPipeline>,
    scratch: Arc<TransitionScratch>,
    events: EventHub,
    local_user: String,
    published: watch::Sender<SessionDocument>,
    /// Abandonment anchor for documents that carry no creation time.
    adopted_at_ms: u64,
}

impl PhaseCoordinator {
    /// Coordinator for the local participant `local_user`. Snapshots the
    /// loop accepts are republished through `published` for synchronous
    /// accessors.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: SessionClient,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        submissions: Arc<SubmissionPipeline>,
        scratch: Arc<TransitionScratch>,
        events: EventHub,
        local_user: impl Into<String>,
        published: watch::Sender<SessionDocument>,
    ) -> Self {
        let adopted_at_ms = clock.now_ms();
        Self {
            client,
            clock,
            config,
            submissions,
            scratch,
            events,
            local_user: local_user.into(),
            published,
            adopted_at_ms,
        }
    }

    /// Open the first phase window. Write-once: a start time already on the
    /// document makes this a no-op, so any client may call it.
    pub async fn start_match(&self) -> SyncResult<()> {
        let doc = self.client.expect_session().await?;
        if doc.state.is_terminal() {
            return Err(SyncError::InvalidState("the match is already over".into()));
        }
        if doc.phase_start_ms(Phase::Draft).is_some() {
            debug!(session_id = %self.client.session_id(), "match already started");
            return Ok(());
        }
        let patch = Patch::new()
            .set(
                SessionTiming::field_path(Phase::Draft),
                json!(self.clock.now_ms()),
            )
            .set("state", serde_json::to_value(SessionState::Active)?);
        self.client.update_with_retry(patch).await?;
        info!(session_id = %self.client.session_id(), "match started");
        Ok(())
    }

    /// Coordination loop. Returns when the session reaches a terminal state
    /// or the document disappears.
    pub async fn run(self: Arc<Self>, mut watch: SessionWatch) {
        let mut last_published = 0u64;
        let mut last_readiness: Option<(Phase, u32)> = None;
        let mut current = match watch.latest() {
            Ok(versioned) => versioned,
            Err(err) => {
                warn!(error = %err, "coordinator could not read the session");
                return;
            }
        };
        self.events.broadcast(MatchEvent::SessionReady {
            session_id: self.client.session_id().to_string(),
        });

        loop {
            if current.version != last_published {
                last_published = current.version;
                self.published.send_replace(current.document.clone());
            }
            let doc = &current.document;

            self.announce_phase(doc);
            self.announce_readiness(doc, &mut last_readiness);

            if doc.state.is_terminal() {
                self.emit_terminal(doc.state);
                return;
            }

            if let Err(err) = self.refresh_mirror(doc).await {
                if matches!(err, SyncError::SessionGone { .. }) {
                    self.emit_gone();
                    return;
                }
                debug!(error = %err, "mirror refresh failed");
            }

            if let Err(err) = self.evaluate(doc).await {
                if matches!(err, SyncError::SessionGone { .. }) {
                    self.emit_gone();
                    return;
                }
                warn!(error = %err, "coordination step failed");
            }

            // Only arm the timer for future instants; once a deadline has
            // been handled, the next wakeup comes from the resulting write.
            let now_ms = self.clock.now_ms();
            let wake_at = readiness::next_wakeup_ms(doc, self.adopted_at_ms, self.abandon_after_ms())
                .filter(|at| *at > now_ms)
                .map(|at| self.clock.deadline(at));
            tokio::select! {
                changed = watch.changed() => {
                    match changed {
                        Ok(versioned) => current = versioned,
                        Err(_) => {
                            self.emit_gone();
                            return;
                        }
                    }
                }
                _ = sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => {}
            }
        }
    }

    /// Act on the snapshot: abandon overdue sessions, auto-submit at the
    /// deadline, advance when the phase is finished.
    async fn evaluate(&self, doc: &SessionDocument) -> SyncResult<()> {
        let now_ms = self.clock.now_ms();
        if now_ms >= readiness::abandon_at_ms(doc, self.adopted_at_ms, self.abandon_after_ms()) {
            return self.abandon("match exceeded the abandonment ceiling").await;
        }

        let phase = doc.current_phase();
        let Some(deadline_ms) = doc.phase_deadline_ms(phase) else {
            return Ok(());
        };
        let deadline_passed = now_ms >= deadline_ms;
        if !deadline_passed && !doc.all_ready(phase) {
            return Ok(());
        }

        if deadline_passed {
            self.auto_submit_local(doc, phase).await?;
        }

        if self.scratch.claim_advance(phase) {
            if let Err(err) = self.advance(phase).await {
                if err.is_transient() {
                    self.scratch.release_advance(phase);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Record the empty stand-in for the local participant if they never
    /// handed anything in. Peers do the same for themselves; a participant
    /// with no client left simply ends the phase without a result.
    async fn auto_submit_local(&self, doc: &SessionDocument, phase: Phase) -> SyncResult<()> {
        let submitted = doc
            .participant(&self.local_user)
            .is_some_and(|participant| participant.has_submitted(phase));
        if submitted || !self.scratch.claim_auto_submit(phase) {
            return Ok(());
        }
        info!(
            user_id = %self.local_user,
            %phase,
            "deadline reached; recording empty submission"
        );
        match self.submissions.auto_submit(&self.local_user, phase).await {
            Ok(()) => Ok(()),
            Err(SyncError::InvalidState(reason)) => {
                debug!(reason, "auto-submission skipped");
                Ok(())
            }
            Err(err) => {
                if err.is_transient() {
                    self.scratch.release_auto_submit(phase);
                }
                Err(err)
            }
        }
    }

    /// Move the document out of `phase`, unless a fresh read shows another
    /// client already did. The advance patch writes the next phase marker,
    /// its start time and the lifecycle state in one merge.
    async fn advance(&self, phase: Phase) -> SyncResult<()> {
        let fresh = self.client.expect_session().await?;
        if fresh.state.is_terminal() {
            return Ok(());
        }
        if fresh.current_phase() != phase {
            debug!(%phase, "phase already advanced by another client");
            return Ok(());
        }
        match phase.next() {
            Some(next) => {
                if fresh.phase_start_ms(next).is_some() {
                    debug!(%next, "next phase already has a start time");
                    return Ok(());
                }
                self.mark_transitioning(&fresh).await;
                let patch = Patch::new()
                    .set("config.currentPhase", json!(next.number()))
                    .set(SessionTiming::field_path(next), json!(self.clock.now_ms()))
                    .set("state", serde_json::to_value(SessionState::Active)?);
                self.client.update_with_retry(patch).await?;
                info!(from = %phase, to = %next, "phase advanced");
            }
            None => {
                self.mark_transitioning(&fresh).await;
                let patch =
                    Patch::new().set("state", serde_json::to_value(SessionState::Completed)?);
                self.client.update_with_retry(patch).await?;
                info!(session_id = %self.client.session_id(), "all phases finished");
            }
        }
        Ok(())
    }

    /// Advisory marker while the advance writes land. Best-effort: a failure
    /// here never blocks the advance itself.
    async fn mark_transitioning(&self, doc: &SessionDocument) {
        if doc.state == SessionState::Transitioning || doc.state.is_terminal() {
            return;
        }
        let Ok(state) = serde_json::to_value(SessionState::Transitioning) else {
            return;
        };
        if let Err(err) = self.client.update(Patch::new().set("state", state)).await {
            debug!(error = %err, "could not mark the session transitioning");
        }
    }

    /// Mark the session abandoned unless it already reached a terminal
    /// state.
    async fn abandon(&self, reason: &str) -> SyncResult<()> {
        let fresh = self.client.expect_session().await?;
        if fresh.state.is_terminal() {
            return Ok(());
        }
        warn!(session_id = %self.client.session_id(), reason, "abandoning session");
        let patch = Patch::new().set("state", serde_json::to_value(SessionState::Abandoned)?);
        self.client.update_with_retry(patch).await
    }

    /// Keep the denormalized coordination mirror and the waiting marker in
    /// step with the roster. Only written when they differ, so concurrent
    /// clients converge after a single write.
    async fn refresh_mirror(&self, doc: &SessionDocument) -> SyncResult<()> {
        let mut patch = Patch::new();

        let derived = doc.derived_coordination();
        if doc.coordination != derived {
            patch = patch
                .set("coordination.readyCount", json!(derived.ready_count))
                .set(
                    "coordination.allPlayersReady",
                    json!(derived.all_players_ready),
                );
        }

        let phase = doc.current_phase();
        if doc.state == SessionState::Active && doc.phase_start_ms(phase).is_some() {
            let deadline_passed = doc
                .phase_deadline_ms(phase)
                .is_some_and(|deadline| self.clock.now_ms() >= deadline);
            let waiting =
                doc.all_humans_submitted(phase) && !doc.all_ready(phase) && !deadline_passed;
            if waiting {
                patch = patch.set("state", serde_json::to_value(SessionState::Waiting)?);
            }
        }

        if patch.is_empty() {
            return Ok(());
        }
        self.client.update(patch).await
    }

    /// Announce the start of the current phase to local subscribers, once
    /// per phase per process.
    fn announce_phase(&self, doc: &SessionDocument) {
        let phase = doc.current_phase();
        let Some(started_at_ms) = doc.phase_start_ms(phase) else {
            return;
        };
        if self.scratch.claim_announce(phase) {
            self.events.broadcast(MatchEvent::PhaseStarted {
                phase,
                started_at_ms,
                deadline_ms: started_at_ms + doc.phase_duration_ms(),
            });
        }
    }

    /// Announce readiness changes. The first observation seeds silently;
    /// initial state belongs to the session summary.
    fn announce_readiness(&self, doc: &SessionDocument, last: &mut Option<(Phase, u32)>) {
        let phase = doc.current_phase();
        let ready = doc.ready_count(phase);
        if let Some(previous) = *last {
            if previous != (phase, ready) {
                self.events.broadcast(MatchEvent::ReadinessChanged {
                    phase,
                    ready,
                    total: doc.players.len() as u32,
                });
            }
        }
        *last = Some((phase, ready));
    }

    fn emit_terminal(&self, state: SessionState) {
        match state {
            SessionState::Completed => {
                info!(session_id = %self.client.session_id(), "match completed; stopping coordination");
                self.events.broadcast(MatchEvent::MatchCompleted);
            }
            _ => {
                info!(session_id = %self.client.session_id(), "session abandoned; stopping coordination");
                self.events.broadcast(MatchEvent::SessionAbandoned {
                    reason: "session marked abandoned".into(),
                });
            }
        }
    }

    fn emit_gone(&self) {
        warn!(session_id = %self.client.session_id(), "session document no longer exists");
        self.events.broadcast(MatchEvent::SessionGone {
            session_id: self.client.session_id().to_string(),
        });
    }

    fn abandon_after_ms(&self) -> u64 {
        self.config.abandon_after.as_millis() as u64
    }
}
