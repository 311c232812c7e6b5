use std::sync::Arc;

use dashmap::DashSet;
use indexmap::IndexMap;
use rand::Rng;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    config::SyncConfig,
    error::{SyncError, SyncResult},
    model::{Phase, SessionDocument, SyntheticSchedule},
    store::Patch,
};

use super::{
    client::{SessionClient, SessionWatch},
    scratch::TransitionScratch,
    submission::SubmissionPipeline,
};

/// Plays the synthetic party members.
///
/// When a phase starts, one client derives absolute submit times for every
/// synthetic member and persists them on the document, write-once per phase.
/// Every client then arms timers from the same persisted times, so the
/// schedule survives the scheduling client vanishing mid-phase: whoever is
/// left fires an entry once it is overdue by the takeover grace. The
/// submission write-once check keeps duplicate fires convergent.
pub struct SyntheticScheduler {
    client: SessionClient,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    submissions: Arc<SubmissionPipeline>,
    scratch: Arc<TransitionScratch>,
    leader: bool,
    wrote: DashSet<Phase>,
}

impl SyntheticScheduler {
    /// Scheduler for one session handle. `leader` narrows the derivation
    /// race: the leader derives the moment a phase starts, everyone else
    /// only steps in after the takeover grace.
    pub fn new(
        client: SessionClient,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        submissions: Arc<SubmissionPipeline>,
        scratch: Arc<TransitionScratch>,
        leader: bool,
    ) -> Self {
        Self {
            client,
            clock,
            config,
            submissions,
            scratch,
            leader,
            wrote: DashSet::new(),
        }
    }

    /// Drive synthetic members until the session reaches a terminal state or
    /// the document disappears.
    pub async fn run(self: Arc<Self>, mut watch: SessionWatch) {
        let mut current = match watch.latest() {
            Ok(versioned) => versioned.document,
            Err(err) => {
                warn!(error = %err, "synthetic scheduler could not read the session");
                return;
            }
        };

        loop {
            if current.state.is_terminal() {
                return;
            }
            let phase = current.current_phase();

            if self.schedule_is_due(&current, phase) && self.scratch.claim_schedule(phase) {
                if let Err(err) = self.persist_schedule(phase).await {
                    if err.is_transient() {
                        self.scratch.release_schedule(phase);
                    }
                    warn!(%phase, error = %err, "failed to persist synthetic schedule");
                }
            }

            self.fire_due_entries(&current, phase).await;

            let wake_at = self
                .next_wakeup_ms(&current, phase)
                .map(|at| self.clock.deadline(at));
            tokio::select! {
                changed = watch.changed() => {
                    match changed {
                        Ok(versioned) => current = versioned.document,
                        Err(err) => {
                            debug!(error = %err, "session watch closed; stopping scheduler");
                            return;
                        }
                    }
                }
                _ = sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => {}
            }
        }
    }

    /// Whether this client should derive the schedule for `phase` now.
    fn schedule_is_due(&self, doc: &SessionDocument, phase: Phase) -> bool {
        let Some(start) = doc.phase_start_ms(phase) else {
            return false;
        };
        if doc.schedule_for(phase).is_some() || doc.synthetic_ids().next().is_none() {
            return false;
        }
        if self.leader {
            return true;
        }
        self.clock.now_ms() >= start + self.config.takeover_grace.as_millis() as u64
    }

    /// Derive and persist the schedule for `phase`, unless a re-read shows
    /// another client already did.
    async fn persist_schedule(&self, phase: Phase) -> SyncResult<()> {
        let doc = self.client.expect_session().await?;
        if doc.schedule_for(phase).is_some() {
            debug!(%phase, "synthetic schedule already persisted elsewhere");
            return Ok(());
        }
        let entries = derive_schedule(&doc, phase, &self.config, &mut rand::rng());
        if entries.is_empty() {
            return Ok(());
        }
        let patch = Patch::new().set(
            SyntheticSchedule::field_path(phase),
            serde_json::to_value(&entries)?,
        );
        self.client.update_with_retry(patch).await?;
        self.wrote.insert(phase);
        info!(%phase, entries = entries.len(), "synthetic schedule persisted");
        Ok(())
    }

    /// Fire every schedule entry that is due from this client's point of
    /// view. The per-process latch keeps one fire per entry; peers are
    /// deduplicated by the submission write-once check.
    async fn fire_due_entries(&self, doc: &SessionDocument, phase: Phase) {
        let Some(entries) = doc.schedule_for(phase) else {
            return;
        };
        let now_ms = self.clock.now_ms();
        let grace = self.fire_grace_ms(phase);

        for (user_id, at_ms) in entries {
            if at_ms + grace > now_ms {
                continue;
            }
            let already = doc
                .participant(user_id)
                .is_some_and(|participant| participant.has_submitted(phase));
            if already || !self.scratch.claim_synthetic_fire(phase, user_id) {
                continue;
            }
            match self.submissions.submit_synthetic(user_id, phase).await {
                Ok(()) => {}
                Err(SyncError::InvalidState(reason)) => {
                    debug!(user_id, %phase, reason, "synthetic fire skipped");
                }
                Err(err) => {
                    warn!(user_id, %phase, error = %err, "synthetic submission failed");
                }
            }
        }
    }

    /// Earliest instant this client must wake at without a snapshot: the
    /// next unfired entry (plus grace for non-writers), or the derivation
    /// takeover for a still-missing schedule.
    fn next_wakeup_ms(&self, doc: &SessionDocument, phase: Phase) -> Option<u64> {
        if let Some(entries) = doc.schedule_for(phase) {
            let grace = self.fire_grace_ms(phase);
            return entries
                .iter()
                .filter(|(user_id, _)| {
                    !doc.participant(user_id)
                        .is_some_and(|participant| participant.has_submitted(phase))
                })
                .map(|(_, at_ms)| at_ms + grace)
                .min();
        }
        // Schedule missing: a follower waits out the grace, the leader is
        // woken by its own claim on the next snapshot.
        let start = doc.phase_start_ms(phase)?;
        if self.leader || doc.synthetic_ids().next().is_none() {
            return None;
        }
        Some(start + self.config.takeover_grace.as_millis() as u64)
    }

    /// Writers fire on time; everyone else waits out the takeover grace.
    fn fire_grace_ms(&self, phase: Phase) -> u64 {
        if self.wrote.contains(&phase) {
            0
        } else {
            self.config.takeover_grace.as_millis() as u64
        }
    }
}

/// Derive absolute submit times for every synthetic member of `doc` in
/// `phase`. Times fall inside the configured fraction band of the window,
/// biased into the back half so synthetic members do not finish suspiciously
/// early.
pub fn derive_schedule(
    doc: &SessionDocument,
    phase: Phase,
    config: &SyncConfig,
    rng: &mut impl Rng,
) -> IndexMap<String, u64> {
    let Some(start) = doc.phase_start_ms(phase) else {
        return IndexMap::new();
    };
    let window_ms = doc.phase_duration_ms() as f64;
    let mut entries = IndexMap::new();
    for user_id in doc.synthetic_ids() {
        let fraction = rng.random_range(config.synthetic_earliest..=config.synthetic_latest);
        entries.insert(user_id.to_string(), start + (window_ms * fraction) as u64);
    }
    entries
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use indexmap::IndexMap;
    use rand::{SeedableRng, rngs::StdRng};

    use crate::{
        clock::SimClock,
        model::{
            Coordination, MatchConfig, Participant, SessionMode, SessionState, SessionTiming,
        },
        scoring::FixedScorer,
        session::events::EventHub,
        store::MemoryStore,
    };

    use super::*;

    const PHASE_START: u64 = 100_000;

    fn started_document() -> SessionDocument {
        let mut players = IndexMap::new();
        players.insert(
            "alice".to_string(),
            Participant::placeholder("alice", "Alice", false),
        );
        players.insert(
            "bot-1".to_string(),
            Participant::placeholder("bot-1", "Quill", true),
        );
        players.insert(
            "bot-2".to_string(),
            Participant::placeholder("bot-2", "Inkwell", true),
        );
        SessionDocument {
            session_id: "session-1".into(),
            match_id: "match-1".into(),
            mode: SessionMode::Practice,
            created_at: Some(PHASE_START),
            config: MatchConfig {
                trait_id: "ideas".into(),
                prompt_id: "prompt-1".into(),
                prompt_type: "narrative".into(),
                current_phase: Phase::Draft,
                phase_duration_seconds: 600,
            },
            players,
            state: SessionState::Active,
            timing: SessionTiming {
                phase1_start_time: Some(PHASE_START),
                ..SessionTiming::default()
            },
            coordination: Coordination::default(),
            synthetic_schedule: None,
        }
    }

    fn scheduler_on(
        store: MemoryStore,
        clock: Arc<SimClock>,
        leader: bool,
    ) -> Arc<SyntheticScheduler> {
        let config = SyncConfig::default();
        let client = SessionClient::new(Arc::new(store), "session-1", config.clone());
        let submissions = Arc::new(SubmissionPipeline::new(
            client.clone(),
            clock.clone(),
            config.clone(),
            Arc::new(FixedScorer { score: 70.0 }),
            EventHub::default(),
        ));
        Arc::new(SyntheticScheduler::new(
            client,
            clock,
            config,
            submissions,
            Arc::new(TransitionScratch::new()),
            leader,
        ))
    }

    #[test]
    fn derived_times_stay_inside_the_back_band() {
        let doc = started_document();
        let config = SyncConfig::default();
        let mut rng = StdRng::seed_from_u64(7);

        let entries = derive_schedule(&doc, Phase::Draft, &config, &mut rng);
        assert_eq!(entries.len(), 2);
        assert!(entries.contains_key("bot-1") && entries.contains_key("bot-2"));
        for at in entries.values() {
            assert!(*at >= PHASE_START + 300_000, "too early: {at}");
            assert!(*at <= PHASE_START + 570_000, "too late: {at}");
        }

        // Same seed, same schedule.
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(entries, derive_schedule(&doc, Phase::Draft, &config, &mut rng));
    }

    #[test]
    fn no_schedule_before_the_phase_starts() {
        let mut doc = started_document();
        doc.timing.phase1_start_time = None;
        let mut rng = StdRng::seed_from_u64(7);
        assert!(derive_schedule(&doc, Phase::Draft, &SyncConfig::default(), &mut rng).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn leader_persists_and_fires_the_schedule() {
        let store = MemoryStore::new();
        let clock = Arc::new(SimClock::at(PHASE_START));
        let client = SessionClient::new(
            Arc::new(store.clone()),
            "session-1",
            SyncConfig::default(),
        );
        client.create_session(&started_document()).await.unwrap();

        let scheduler = scheduler_on(store.clone(), clock.clone(), true);
        let watch = client.watch().await.unwrap();
        let handle = tokio::spawn(scheduler.run(watch));

        // Let the schedule land, then read the persisted times.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let doc = client.expect_session().await.unwrap();
        let entries = doc.schedule_for(Phase::Draft).expect("schedule persisted").clone();
        assert_eq!(entries.len(), 2);

        // Ride past the end of the window: both bots must have submitted at
        // exactly their scheduled times.
        tokio::time::sleep(Duration::from_secs(600)).await;
        let doc = client.expect_session().await.unwrap();
        for (user_id, at_ms) in &entries {
            let result = doc.players[user_id].phases.get(Phase::Draft).unwrap();
            assert!(result.submitted);
            assert_eq!(result.submitted_at, Some(*at_ms));
            assert_eq!(result.score, Some(70.0));
        }

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn survivor_fires_overdue_entries_after_grace() {
        let store = MemoryStore::new();
        let clock = Arc::new(SimClock::at(PHASE_START));
        let client = SessionClient::new(
            Arc::new(store.clone()),
            "session-1",
            SyncConfig::default(),
        );

        // A vanished scheduler already persisted this schedule.
        let mut doc = started_document();
        let mut schedule = SyntheticSchedule::default();
        let mut entries = IndexMap::new();
        entries.insert("bot-1".to_string(), PHASE_START + 5_000);
        entries.insert("bot-2".to_string(), PHASE_START + 8_000);
        schedule.set(Phase::Draft, entries);
        doc.synthetic_schedule = Some(schedule);
        client.create_session(&doc).await.unwrap();

        let scheduler = scheduler_on(store, clock, false);
        let watch = client.watch().await.unwrap();
        let handle = tokio::spawn(scheduler.run(watch));

        // takeover_grace is 3s: bot-1 fires at +8s, bot-2 at +11s.
        tokio::time::sleep(Duration::from_millis(8_100)).await;
        let doc = client.expect_session().await.unwrap();
        assert!(doc.players["bot-1"].has_submitted(Phase::Draft));
        assert!(!doc.players["bot-2"].has_submitted(Phase::Draft));
        assert_eq!(
            doc.players["bot-1"]
                .phases
                .get(Phase::Draft)
                .unwrap()
                .submitted_at,
            Some(PHASE_START + 8_000)
        );

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        let doc = client.expect_session().await.unwrap();
        assert!(doc.players["bot-2"].has_submitted(Phase::Draft));

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_stops_on_terminal_state() {
        let store = MemoryStore::new();
        let clock = Arc::new(SimClock::at(PHASE_START));
        let client = SessionClient::new(
            Arc::new(store.clone()),
            "session-1",
            SyncConfig::default(),
        );
        let mut doc = started_document();
        doc.state = SessionState::Completed;
        client.create_session(&doc).await.unwrap();

        let scheduler = scheduler_on(store, clock, true);
        let watch = client.watch().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), scheduler.run(watch))
            .await
            .expect("scheduler should return immediately");
    }
}
