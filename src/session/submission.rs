use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    config::SyncConfig,
    error::{SyncError, SyncResult},
    model::{Phase, PhasePayload, PhaseResult, SessionDocument, player_result_field},
    scoring::{SCORE_MAX, SCORE_MIN, ScoreContext, Scorer},
    store::Patch,
};

use super::{
    client::SessionClient,
    events::{EventHub, MatchEvent},
};

/// Score recorded when the external scorer fails or times out.
pub const FALLBACK_SCORE: f64 = 50.0;
/// Score recorded for the empty deadline stand-in.
pub const EMPTY_SCORE: f64 = 0.0;

/// How a submission came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmissionKind {
    /// The participant handed work in themselves.
    Manual,
    /// Deadline stand-in written on behalf of a silent participant.
    Auto,
    /// Scheduled synthetic-participant submission.
    Synthetic,
}

/// Records phase results on the session document.
///
/// Results are write-once: a second submission for the same (participant,
/// phase) is a no-op. Scoring happens before the write and is bounded by the
/// configured timeout, falling back to [`FALLBACK_SCORE`] so a dead scorer
/// can never hold a submission hostage. The write itself retries transient
/// store failures.
pub struct SubmissionPipeline {
    client: SessionClient,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    scorer: Arc<dyn Scorer>,
    events: EventHub,
}

impl SubmissionPipeline {
    /// Pipeline writing through `client`, grading with `scorer`.
    pub fn new(
        client: SessionClient,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        scorer: Arc<dyn Scorer>,
        events: EventHub,
    ) -> Self {
        Self {
            client,
            clock,
            config,
            scorer,
            events,
        }
    }

    /// Submit `user_id`'s own work for `phase`. Rejected outside the open
    /// phase window.
    pub async fn submit(
        &self,
        user_id: &str,
        phase: Phase,
        payload: PhasePayload,
    ) -> SyncResult<()> {
        self.submit_inner(user_id, phase, payload, SubmissionKind::Manual)
            .await
    }

    /// Record the empty deadline stand-in for a participant who handed
    /// nothing in. Exempt from the window check: it runs at the deadline.
    pub(crate) async fn auto_submit(&self, user_id: &str, phase: Phase) -> SyncResult<()> {
        self.submit_inner(user_id, phase, PhasePayload::Empty, SubmissionKind::Auto)
            .await
    }

    /// Record a synthetic participant's canned submission.
    pub(crate) async fn submit_synthetic(&self, user_id: &str, phase: Phase) -> SyncResult<()> {
        self.submit_inner(
            user_id,
            phase,
            PhasePayload::synthetic(phase),
            SubmissionKind::Synthetic,
        )
        .await
    }

    async fn submit_inner(
        &self,
        user_id: &str,
        phase: Phase,
        payload: PhasePayload,
        kind: SubmissionKind,
    ) -> SyncResult<()> {
        let doc = self.client.expect_session().await?;

        let Some(participant) = doc.participant(user_id) else {
            return Err(SyncError::InvalidState(format!(
                "participant `{user_id}` is not in the roster"
            )));
        };
        if participant.has_submitted(phase) {
            debug!(user_id, %phase, "result already recorded; skipping");
            return Ok(());
        }
        if doc.current_phase() != phase {
            return Err(SyncError::InvalidState(format!(
                "cannot submit {phase} work while the group is in {}",
                doc.current_phase()
            )));
        }
        if kind == SubmissionKind::Manual {
            let Some(deadline) = doc.phase_deadline_ms(phase) else {
                return Err(SyncError::InvalidState(format!(
                    "the {phase} phase has not started"
                )));
            };
            if self.clock.now_ms() > deadline {
                return Err(SyncError::InvalidState(format!(
                    "the {phase} window has closed"
                )));
            }
        }

        let score = self.score_or_fallback(&doc, phase, payload.clone()).await;
        let result = PhaseResult::submitted(payload, self.clock.now_ms(), score);
        let patch = Patch::new().set(
            player_result_field(user_id, phase),
            serde_json::to_value(&result)?,
        );
        self.client.update_with_retry(patch).await?;

        info!(user_id, %phase, score, kind = ?kind, "submission recorded");
        self.events.broadcast(MatchEvent::SubmissionRecorded {
            user_id: user_id.to_string(),
            phase,
            auto: kind == SubmissionKind::Auto,
        });
        Ok(())
    }

    /// Grade the payload within the scoring budget. The empty stand-in is
    /// never sent to the scorer.
    async fn score_or_fallback(
        &self,
        doc: &SessionDocument,
        phase: Phase,
        payload: PhasePayload,
    ) -> f64 {
        if payload.is_empty() {
            return EMPTY_SCORE;
        }
        let context = ScoreContext {
            trait_id: doc.config.trait_id.clone(),
            prompt_id: doc.config.prompt_id.clone(),
            phase,
        };
        match timeout(self.config.score_timeout, self.scorer.score(payload, context)).await {
            Ok(Ok(evaluation)) => evaluation.score.clamp(SCORE_MIN, SCORE_MAX),
            Ok(Err(err)) => {
                warn!(%phase, error = %err, "scorer failed; applying fallback score");
                FALLBACK_SCORE
            }
            Err(_) => {
                warn!(
                    %phase,
                    budget_ms = self.config.score_timeout.as_millis() as u64,
                    "scorer timed out; applying fallback score"
                );
                FALLBACK_SCORE
            }
        }
    }
}
