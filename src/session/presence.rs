use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use serde_json::json;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::SyncConfig,
    error::SyncResult,
    model::{ParticipantStatus, SessionDocument, player_field},
    store::Patch,
};

use super::{
    client::{SessionClient, SessionWatch},
    events::{EventHub, MatchEvent},
};

/// Keeps the local participant visible and classifies everyone else.
///
/// The local side writes `lastHeartbeat` on a fixed cadence; the observing
/// side is a pure function of peer heartbeats and "now", so a peer whose
/// client dies flips to offline within one staleness horizon without any
/// document change. Classification never blocks coordination: an offline
/// peer still gets auto-submitted at the deadline like anyone else.
pub struct PresenceTracker {
    client: SessionClient,
    user_id: String,
    display_name: String,
    connection_id: String,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    events: EventHub,
    classifications: DashMap<String, bool>,
    superseded: AtomicBool,
}

impl PresenceTracker {
    /// Tracker for the local participant `user_id`. A fresh connection id is
    /// minted per instance so a second tab for the same user is detectable.
    pub fn new(
        client: SessionClient,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        events: EventHub,
    ) -> Self {
        Self {
            client,
            user_id: user_id.into(),
            display_name: display_name.into(),
            connection_id: Uuid::new_v4().to_string(),
            clock,
            config,
            events,
            classifications: DashMap::new(),
            superseded: AtomicBool::new(false),
        }
    }

    /// Connection id minted for this instance.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// First write after bootstrap: claim the roster entry with this
    /// instance's connection id and an immediate heartbeat. Rides the
    /// bounded write retry; unlike later beats there is no next tick to
    /// absorb a blip.
    pub async fn announce_join(&self) -> SyncResult<()> {
        let patch = Patch::new()
            .set(
                player_field(&self.user_id, "displayName"),
                json!(self.display_name),
            )
            .set(
                player_field(&self.user_id, "status"),
                serde_json::to_value(ParticipantStatus::Connected)?,
            )
            .set(
                player_field(&self.user_id, "connectionId"),
                json!(self.connection_id),
            )
            .set(
                player_field(&self.user_id, "lastHeartbeat"),
                json!(self.clock.now_ms()),
            );
        self.client.update_with_retry(patch).await
    }

    /// One heartbeat write for the local participant.
    pub async fn beat(&self) -> SyncResult<()> {
        let patch = Patch::new()
            .set(
                player_field(&self.user_id, "lastHeartbeat"),
                json!(self.clock.now_ms()),
            )
            .set(
                player_field(&self.user_id, "status"),
                serde_json::to_value(ParticipantStatus::Connected)?,
            );
        self.client.update(patch).await
    }

    /// Clean-leave write. Peers would notice the silence within one
    /// staleness horizon anyway; this just spares them the wait.
    pub async fn mark_left(&self) -> SyncResult<()> {
        let patch = Patch::new().set(
            player_field(&self.user_id, "status"),
            serde_json::to_value(ParticipantStatus::Disconnected)?,
        );
        self.client.update_with_retry(patch).await
    }

    /// Heartbeat and classification loop. Returns when the session document
    /// disappears or another client instance takes over this user.
    pub async fn run(self: Arc<Self>, mut watch: SessionWatch) {
        let mut ticker = interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The join write already counted as the first beat.
        ticker.tick().await;

        loop {
            if self.superseded.load(Ordering::Relaxed) {
                return;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    match self.beat().await {
                        Ok(()) => {}
                        Err(err) if err.is_transient() => {
                            warn!(
                                user_id = %self.user_id,
                                error = %err,
                                "heartbeat write failed; retrying next tick"
                            );
                        }
                        Err(err) => {
                            debug!(user_id = %self.user_id, error = %err, "stopping heartbeats");
                            return;
                        }
                    }
                    if let Ok(snapshot) = watch.latest() {
                        self.observe(&snapshot.document);
                    }
                }
                changed = watch.changed() => {
                    match changed {
                        Ok(snapshot) => self.observe(&snapshot.document),
                        Err(err) => {
                            debug!(user_id = %self.user_id, error = %err, "session watch closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Classify every peer against the staleness horizon and emit an event
    /// for each transition. The first classification of a peer seeds the
    /// table silently; initial state comes from the session summary.
    pub fn observe(&self, doc: &SessionDocument) {
        self.detect_takeover(doc);

        let now_ms = self.clock.now_ms();
        for (user_id, participant) in &doc.players {
            if user_id == &self.user_id || participant.is_synthetic {
                continue;
            }
            let online = participant.is_online(now_ms, self.config.stale_after);
            let previous = self.classifications.insert(user_id.clone(), online);
            if previous.is_some_and(|was| was != online) {
                debug!(peer = %user_id, online, "peer presence changed");
                self.events.broadcast(MatchEvent::PresenceChanged {
                    user_id: user_id.clone(),
                    online,
                });
            }
        }
    }

    /// A different connection id on our own roster entry means a newer
    /// instance of this user is live; the older instance stops heartbeating
    /// so the two don't fight over the entry.
    fn detect_takeover(&self, doc: &SessionDocument) {
        let Some(own) = doc.participant(&self.user_id) else {
            return;
        };
        match &own.connection_id {
            Some(theirs) if theirs != &self.connection_id => {
                if !self.superseded.swap(true, Ordering::Relaxed) {
                    warn!(
                        user_id = %self.user_id,
                        theirs = %theirs,
                        "another client instance took over this participant; yielding heartbeats"
                    );
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use indexmap::IndexMap;
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::{
        clock::SimClock,
        model::{
            Coordination, MatchConfig, Participant, Phase, SessionDocument, SessionMode,
            SessionState, SessionTiming,
        },
        store::MemoryStore,
    };

    use super::*;

    fn sample_document() -> SessionDocument {
        let mut players = IndexMap::new();
        players.insert(
            "alice".to_string(),
            Participant::placeholder("alice", "Alice", false),
        );
        players.insert(
            "bob".to_string(),
            Participant::placeholder("bob", "Bob", false),
        );
        SessionDocument {
            session_id: "session-1".into(),
            match_id: "match-1".into(),
            mode: SessionMode::QuickMatch,
            created_at: Some(0),
            config: MatchConfig {
                trait_id: "voice".into(),
                prompt_id: "prompt-1".into(),
                prompt_type: "narrative".into(),
                current_phase: Phase::Draft,
                phase_duration_seconds: 60,
            },
            players,
            state: SessionState::Forming,
            timing: SessionTiming::default(),
            coordination: Coordination::default(),
            synthetic_schedule: None,
        }
    }

    async fn tracker_on(store: MemoryStore, clock: Arc<SimClock>) -> Arc<PresenceTracker> {
        let client = SessionClient::new(Arc::new(store), "session-1", SyncConfig::default());
        client.create_session(&sample_document()).await.ok();
        Arc::new(PresenceTracker::new(
            client,
            "alice",
            "Alice",
            clock,
            SyncConfig::default(),
            EventHub::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn announce_join_claims_the_roster_entry() {
        let store = MemoryStore::new();
        let clock = Arc::new(SimClock::at(50_000));
        let tracker = tracker_on(store.clone(), clock).await;

        tracker.announce_join().await.unwrap();

        let client = SessionClient::new(Arc::new(store), "session-1", SyncConfig::default());
        let doc = client.expect_session().await.unwrap();
        let alice = doc.participant("alice").unwrap();
        assert_eq!(alice.status, ParticipantStatus::Connected);
        assert_eq!(alice.last_heartbeat, Some(50_000));
        assert_eq!(alice.connection_id.as_deref(), Some(tracker.connection_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn run_beats_on_the_configured_cadence() {
        let store = MemoryStore::new();
        let clock = Arc::new(SimClock::at(0));
        let tracker = tracker_on(store.clone(), clock).await;
        tracker.announce_join().await.unwrap();

        let client = SessionClient::new(
            Arc::new(store.clone()),
            "session-1",
            SyncConfig::default(),
        );
        let watch = client.watch().await.unwrap();
        let handle = tokio::spawn(tracker.clone().run(watch));

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        let beat_after_one = client
            .expect_session()
            .await
            .unwrap()
            .participant("alice")
            .unwrap()
            .last_heartbeat;
        assert_eq!(beat_after_one, Some(5_000));

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        let beat_after_two = client
            .expect_session()
            .await
            .unwrap()
            .participant("alice")
            .unwrap()
            .last_heartbeat;
        assert_eq!(beat_after_two, Some(10_000));

        // Dropping the document ends the loop.
        store.remove("session-1");
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn observe_emits_presence_transitions() {
        let store = MemoryStore::new();
        let clock = Arc::new(SimClock::at(0));
        let tracker = tracker_on(store, clock.clone()).await;
        let mut events = tracker.events.subscribe();

        let mut doc = sample_document();
        if let Some(bob) = doc.players.get_mut("bob") {
            bob.last_heartbeat = Some(0);
        }

        // First classification seeds silently.
        tracker.observe(&doc);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        // Horizon passes with no new beat: bob flips offline.
        tokio::time::advance(Duration::from_secs(20)).await;
        tracker.observe(&doc);
        assert_eq!(
            events.try_recv().unwrap(),
            MatchEvent::PresenceChanged {
                user_id: "bob".into(),
                online: false,
            }
        );

        // A fresh beat flips him back.
        if let Some(bob) = doc.players.get_mut("bob") {
            bob.last_heartbeat = Some(clock.now_ms());
        }
        tracker.observe(&doc);
        assert_eq!(
            events.try_recv().unwrap(),
            MatchEvent::PresenceChanged {
                user_id: "bob".into(),
                online: true,
            }
        );

        // No flip, no event.
        tracker.observe(&doc);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_connection_id_supersedes_this_instance() {
        let store = MemoryStore::new();
        let clock = Arc::new(SimClock::at(0));
        let tracker = tracker_on(store, clock).await;

        let mut doc = sample_document();
        if let Some(alice) = doc.players.get_mut("alice") {
            alice.connection_id = Some("someone-else".into());
        }
        tracker.observe(&doc);
        assert!(tracker.superseded.load(Ordering::Relaxed));
    }
}
