use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use super::session::{SessionDocument, SessionMode, SessionState};

/// Read-only projection of a session for UI shells: human-readable
/// timestamps, flattened per-participant readiness, no payload bodies.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Store id of the session document.
    pub session_id: String,
    /// Matchmaking id.
    pub match_id: String,
    /// Match mode.
    pub mode: SessionMode,
    /// Lifecycle marker.
    pub state: SessionState,
    /// 1-based number of the phase the group is in.
    pub current_phase: u8,
    /// RFC3339 start of the current phase, absent before it begins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_started_at: Option<String>,
    /// Participants with a submitted result for the current phase.
    pub ready_count: u32,
    /// Roster size.
    pub total_participants: u32,
    /// Per-participant readiness, in roster order.
    pub participants: Vec<ParticipantSummary>,
}

/// One roster line of a [`SessionSummary`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    /// Stable identity.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
    /// Whether the member is synthetic.
    pub is_synthetic: bool,
    /// Whether the member has submitted for the current phase.
    pub submitted: bool,
    /// RFC3339 timestamp of the last heartbeat, absent for silent members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<String>,
}

impl From<&SessionDocument> for SessionSummary {
    fn from(doc: &SessionDocument) -> Self {
        let phase = doc.current_phase();
        let participants = doc
            .players
            .values()
            .map(|participant| ParticipantSummary {
                user_id: participant.user_id.clone(),
                display_name: participant.display_name.clone(),
                is_synthetic: participant.is_synthetic,
                submitted: participant.has_submitted(phase),
                last_heartbeat: participant.last_heartbeat.map(format_epoch_ms),
            })
            .collect();

        Self {
            session_id: doc.session_id.clone(),
            match_id: doc.match_id.clone(),
            mode: doc.mode,
            state: doc.state,
            current_phase: phase.number(),
            phase_started_at: doc.phase_start_ms(phase).map(format_epoch_ms),
            ready_count: doc.ready_count(phase),
            total_participants: doc.players.len() as u32,
            participants,
        }
    }
}

/// Render an epoch-ms timestamp as RFC3339 for API payloads.
pub fn format_epoch_ms(ms: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|stamp| stamp.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use serde_json::json;

    use crate::model::{
        participant::{Participant, PhasePayload, PhaseResult},
        phase::Phase,
        session::{Coordination, MatchConfig, SessionTiming},
    };

    use super::*;

    #[test]
    fn formats_epoch_ms_as_rfc3339() {
        // 2021-01-01T00:00:00Z
        assert_eq!(format_epoch_ms(1_609_459_200_000), "2021-01-01T00:00:00Z");
    }

    #[test]
    fn summary_flattens_roster_state() {
        let mut players = IndexMap::new();
        let mut alice = Participant::placeholder("alice", "Alice", false);
        alice.last_heartbeat = Some(1_609_459_200_000);
        alice.phases.set(
            Phase::Draft,
            PhaseResult::submitted(
                PhasePayload::Draft {
                    text: "draft".into(),
                    word_count: 1,
                },
                1_609_459_201_000,
                88.0,
            ),
        );
        players.insert("alice".to_string(), alice);
        players.insert(
            "bot-1".to_string(),
            Participant::placeholder("bot-1", "Quill", true),
        );

        let doc = SessionDocument {
            session_id: "session-1".into(),
            match_id: "match-1".into(),
            mode: SessionMode::Practice,
            created_at: Some(1_609_459_199_000),
            config: MatchConfig {
                trait_id: "voice".into(),
                prompt_id: "prompt-1".into(),
                prompt_type: "narrative".into(),
                current_phase: Phase::Draft,
                phase_duration_seconds: 600,
            },
            players,
            state: SessionState::Active,
            timing: SessionTiming {
                phase1_start_time: Some(1_609_459_200_000),
                ..SessionTiming::default()
            },
            coordination: Coordination::default(),
            synthetic_schedule: None,
        };

        let summary = SessionSummary::from(&doc);
        assert_eq!(summary.current_phase, 1);
        assert_eq!(summary.ready_count, 1);
        assert_eq!(summary.total_participants, 2);
        assert_eq!(
            summary.phase_started_at.as_deref(),
            Some("2021-01-01T00:00:00Z")
        );

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["participants"][0]["submitted"], json!(true));
        assert_eq!(value["participants"][1]["userId"], json!("bot-1"));
        assert_eq!(value["participants"][1]["submitted"], json!(false));
        assert!(value["participants"][1].get("lastHeartbeat").is_none());
    }
}
