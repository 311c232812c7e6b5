use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    config::SyncConfig,
    error::{SyncError, SyncResult},
    model::{
        Coordination, MatchConfig, Participant, Phase, SessionDocument, SessionState,
        SessionTiming,
    },
    store::Patch,
};

use super::{client::SessionClient, params::JoinParams};

/// When a follower stops waiting for the leader and creates the session
/// document itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotionPolicy {
    /// How often to poll for the leader's create.
    pub poll_interval: Duration,
    /// Patience before self-promoting.
    pub promote_after: Duration,
}

impl PromotionPolicy {
    /// Policy from the configured knobs.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            poll_interval: config.create_poll_interval,
            promote_after: config.promote_after,
        }
    }

    /// Whether a follower that has already waited `waited` should create
    /// the document itself.
    pub fn should_promote(&self, waited: Duration) -> bool {
        waited >= self.promote_after
    }
}

/// Resolves the session document for a joining client.
///
/// The designated leader creates the document; everyone else polls until it
/// appears. Because the roster beyond the leader cannot tell a slow leader
/// from a dead one, a follower that has waited out the promotion ceiling
/// creates the document itself. The store's create-if-absent keeps every
/// race down to one winner, and losers adopt the winner's document.
pub struct Bootstrapper {
    client: SessionClient,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    params: JoinParams,
}

impl Bootstrapper {
    /// Bootstrapper for one joining client.
    pub fn new(
        client: SessionClient,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        params: JoinParams,
    ) -> Self {
        Self {
            client,
            clock,
            config,
            params,
        }
    }

    /// Resolve the session document, creating it when this client is the
    /// leader or when the promotion ceiling expires.
    pub async fn resolve(&self) -> SyncResult<SessionDocument> {
        if self.params.leader {
            self.create_or_adopt().await
        } else {
            self.wait_or_promote().await
        }
    }

    /// Try to create the document; adopt the existing one on a lost race.
    /// A leader rejoining an in-flight match lands on the adopt path. Both
    /// the create and the adopting read ride the bounded retry, so a
    /// transient blip never fails the join.
    async fn create_or_adopt(&self) -> SyncResult<SessionDocument> {
        let document = initial_document(&self.params, self.clock.now_ms());
        if self.client.create_session_with_retry(&document).await? {
            info!(
                session_id = %self.params.session_id,
                user_id = %self.params.user_id,
                "session document created"
            );
            return Ok(document);
        }
        debug!(
            session_id = %self.params.session_id,
            "session document already exists; adopting"
        );
        self.client.expect_session_with_retry().await
    }

    /// Poll for the leader's create, promoting ourselves once the policy
    /// says to stop waiting. Transient read failures burn patience but
    /// never abort the join.
    async fn wait_or_promote(&self) -> SyncResult<SessionDocument> {
        let policy = PromotionPolicy::from_config(&self.config);
        let started = Instant::now();
        let mut ticker = interval(policy.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.client.read_session().await {
                Ok(Some(document)) => return Ok(document),
                Ok(None) => {}
                Err(err) if err.is_transient() => {
                    warn!(
                        session_id = %self.params.session_id,
                        error = %err,
                        "session poll failed; retrying"
                    );
                }
                Err(err) => return Err(err),
            }
            if policy.should_promote(started.elapsed()) {
                warn!(
                    session_id = %self.params.session_id,
                    user_id = %self.params.user_id,
                    "leader never created the session; promoting self"
                );
                return self.create_or_adopt().await;
            }
        }
    }

    /// Make sure the local user holds a roster entry on `document`.
    ///
    /// An unknown user may still slot in while the match is forming (roster
    /// drift between matchmaking and the creating client); once phase 1 has
    /// started the roster is closed and the join is rejected.
    pub async fn register_if_needed(&self, document: &SessionDocument) -> SyncResult<()> {
        if document.players.contains_key(&self.params.user_id) {
            return Ok(());
        }
        if document.phase_start_ms(Phase::Draft).is_some() {
            return Err(SyncError::LateJoin {
                session_id: self.params.session_id.clone(),
                user_id: self.params.user_id.clone(),
            });
        }
        info!(
            session_id = %self.params.session_id,
            user_id = %self.params.user_id,
            "user missing from roster; registering"
        );
        let placeholder = Participant::placeholder(
            self.params.user_id.clone(),
            self.params.display_name.clone(),
            false,
        );
        let patch = Patch::new().set(
            format!("players.{}", self.params.user_id),
            serde_json::to_value(&placeholder)?,
        );
        self.client.update_with_retry(patch).await
    }
}

/// Build the initial session document from the join parameters.
pub fn initial_document(params: &JoinParams, now_ms: u64) -> SessionDocument {
    let mut players = IndexMap::new();
    for entry in &params.setup.roster {
        players.insert(
            entry.user_id.clone(),
            Participant::placeholder(
                entry.user_id.clone(),
                entry.display_name.clone(),
                entry.synthetic,
            ),
        );
    }
    SessionDocument {
        session_id: params.session_id.clone(),
        match_id: params.setup.match_id.clone(),
        mode: params.setup.mode,
        created_at: Some(now_ms),
        config: MatchConfig {
            trait_id: params.setup.trait_id.clone(),
            prompt_id: params.setup.prompt_id.clone(),
            prompt_type: params.setup.prompt_type.clone(),
            current_phase: Phase::Draft,
            phase_duration_seconds: params.setup.phase_duration_seconds,
        },
        players,
        state: SessionState::Forming,
        timing: SessionTiming::default(),
        coordination: Coordination::default(),
        synthetic_schedule: None,
    }
}
