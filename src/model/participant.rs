use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::phase::Phase;

/// One party member of a session, human or synthetic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Stable identity; survives reconnects and new browser tabs.
    pub user_id: String,
    /// Name shown to the rest of the party.
    pub display_name: String,
    /// Whether this member is simulated by the synthetic scheduler.
    pub is_synthetic: bool,
    /// Connection hint written by the participant's own client. Advisory:
    /// staleness of `last_heartbeat` is the source of truth.
    pub status: ParticipantStatus,
    /// Epoch-ms timestamp of the most recent heartbeat write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<u64>,
    /// Opaque id regenerated by every client instance; distinguishes a
    /// reconnect from a second tab racing the same user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Work handed in so far, one write-once slot per phase.
    #[serde(default)]
    pub phases: PhaseResults,
}

impl Participant {
    /// Roster entry written at session creation, before the member's own
    /// client has shown up.
    pub fn placeholder(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        is_synthetic: bool,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            is_synthetic,
            status: ParticipantStatus::Disconnected,
            last_heartbeat: None,
            connection_id: None,
            phases: PhaseResults::default(),
        }
    }

    /// Whether this participant has a submitted result for `phase`.
    pub fn has_submitted(&self, phase: Phase) -> bool {
        self.phases.get(phase).is_some_and(|result| result.submitted)
    }

    /// Presence classification at `now_ms`. Synthetic members never
    /// heartbeat and always count as present; humans must have beaten
    /// within the staleness horizon.
    pub fn is_online(&self, now_ms: u64, stale_after: Duration) -> bool {
        if self.is_synthetic {
            return true;
        }
        self.last_heartbeat
            .is_some_and(|beat| now_ms.saturating_sub(beat) <= stale_after.as_millis() as u64)
    }
}

/// Advisory connection state a participant's client writes for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    /// Client is up and heartbeating.
    Connected,
    /// Client left cleanly or never arrived.
    Disconnected,
    /// Client believes it is recovering a dropped connection.
    Reconnecting,
}

/// Per-phase result slots for one participant (wire keys `phase1`..`phase3`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseResults {
    /// Draft phase result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase1: Option<PhaseResult>,
    /// Peer-review phase result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase2: Option<PhaseResult>,
    /// Revision phase result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase3: Option<PhaseResult>,
}

impl PhaseResults {
    /// Result slot for `phase`.
    pub fn get(&self, phase: Phase) -> Option<&PhaseResult> {
        match phase {
            Phase::Draft => self.phase1.as_ref(),
            Phase::Review => self.phase2.as_ref(),
            Phase::Revise => self.phase3.as_ref(),
        }
    }

    /// Fill the slot for `phase`.
    pub fn set(&mut self, phase: Phase, result: PhaseResult) {
        match phase {
            Phase::Draft => self.phase1 = Some(result),
            Phase::Review => self.phase2 = Some(result),
            Phase::Revise => self.phase3 = Some(result),
        }
    }
}

/// Write-once record of one participant's work for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseResult {
    /// Set exactly once; the record is immutable afterwards.
    pub submitted: bool,
    /// Epoch-ms timestamp of the submission write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<u64>,
    /// What was handed in.
    #[serde(flatten)]
    pub payload: PhasePayload,
    /// Score on the shared 0-100 scale, fallback constant when the external
    /// scorer failed or timed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl PhaseResult {
    /// Build a submitted record stamped at `submitted_at_ms`.
    pub fn submitted(payload: PhasePayload, submitted_at_ms: u64, score: f64) -> Self {
        Self {
            submitted: true,
            submitted_at: Some(submitted_at_ms),
            payload,
            score: Some(score),
        }
    }
}

/// Phase-specific submission content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PhasePayload {
    /// First draft written against the prompt.
    #[serde(rename_all = "camelCase")]
    Draft {
        /// The draft itself.
        text: String,
        /// Author-reported word count, advisory.
        word_count: u32,
    },
    /// Structured feedback on an assigned peer's draft.
    #[serde(rename_all = "camelCase")]
    Feedback {
        /// What worked well.
        strengths: String,
        /// What to improve.
        suggestions: String,
    },
    /// Revised piece incorporating the received feedback.
    #[serde(rename_all = "camelCase")]
    Revision {
        /// The revised text.
        text: String,
    },
    /// Deadline stand-in for a participant who handed nothing in.
    Empty,
}

impl PhasePayload {
    /// Whether this is the empty deadline stand-in.
    pub fn is_empty(&self) -> bool {
        matches!(self, PhasePayload::Empty)
    }

    /// Canned content submitted on behalf of a synthetic participant.
    pub fn synthetic(phase: Phase) -> Self {
        match phase {
            Phase::Draft => {
                let text = "The morning the levee broke, Ada counted what the water had left \
                             her: one kettle, two photographs, and the stubborn certainty that \
                             the town could be argued back onto its feet."
                    .to_string();
                let word_count = text.split_whitespace().count() as u32;
                PhasePayload::Draft { text, word_count }
            }
            Phase::Review => PhasePayload::Feedback {
                strengths: "Strong opening image; the inventory of objects grounds the stakes \
                            immediately."
                    .to_string(),
                suggestions: "Consider slowing down the second paragraph so the reader can \
                              register who Ada is before the flashback begins."
                    .to_string(),
            },
            Phase::Revise => PhasePayload::Revision {
                text: "The morning the levee broke, Ada counted what the water had left her. \
                       One kettle. Two photographs. And the stubborn certainty, older than the \
                       flood, that the town could be argued back onto its feet."
                    .to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn participant_round_trips_in_camel_case() {
        let mut participant = Participant::placeholder("u1", "Ada", false);
        participant.status = ParticipantStatus::Connected;
        participant.last_heartbeat = Some(1_000);
        participant.connection_id = Some("conn-1".into());

        let value = serde_json::to_value(&participant).unwrap();
        assert_eq!(value["userId"], json!("u1"));
        assert_eq!(value["displayName"], json!("Ada"));
        assert_eq!(value["isSynthetic"], json!(false));
        assert_eq!(value["status"], json!("connected"));
        assert_eq!(value["lastHeartbeat"], json!(1_000));
        assert_eq!(value["connectionId"], json!("conn-1"));

        let back: Participant = serde_json::from_value(value).unwrap();
        assert_eq!(back, participant);
    }

    #[test]
    fn placeholder_omits_unset_fields() {
        let value = serde_json::to_value(Participant::placeholder("u1", "Ada", true)).unwrap();
        assert!(value.get("lastHeartbeat").is_none());
        assert!(value.get("connectionId").is_none());
        assert_eq!(value["phases"], json!({}));
    }

    #[test]
    fn payload_kind_tags() {
        let draft = serde_json::to_value(PhasePayload::Draft {
            text: "once".into(),
            word_count: 1,
        })
        .unwrap();
        assert_eq!(draft["kind"], json!("draft"));
        assert_eq!(draft["wordCount"], json!(1));

        let empty = serde_json::to_value(PhasePayload::Empty).unwrap();
        assert_eq!(empty, json!({ "kind": "empty" }));
    }

    #[test]
    fn phase_result_flattens_payload() {
        let result = PhaseResult::submitted(
            PhasePayload::Revision {
                text: "final".into(),
            },
            2_000,
            87.5,
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["submitted"], json!(true));
        assert_eq!(value["submittedAt"], json!(2_000));
        assert_eq!(value["kind"], json!("revision"));
        assert_eq!(value["text"], json!("final"));
        assert_eq!(value["score"], json!(87.5));

        let back: PhaseResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn staleness_classification() {
        let mut participant = Participant::placeholder("u1", "Ada", false);
        let horizon = Duration::from_secs(15);

        assert!(!participant.is_online(100_000, horizon));

        participant.last_heartbeat = Some(90_000);
        assert!(participant.is_online(100_000, horizon));
        assert!(!participant.is_online(110_000, horizon));

        let synthetic = Participant::placeholder("bot", "Quill", true);
        assert!(synthetic.is_online(u64::MAX, horizon));
    }

    #[test]
    fn submission_state_per_phase() {
        let mut participant = Participant::placeholder("u1", "Ada", false);
        assert!(!participant.has_submitted(Phase::Draft));

        participant.phases.set(
            Phase::Draft,
            PhaseResult::submitted(PhasePayload::Empty, 1_000, 0.0),
        );
        assert!(participant.has_submitted(Phase::Draft));
        assert!(!participant.has_submitted(Phase::Review));
    }

    #[test]
    fn synthetic_draft_word_count_matches_text() {
        let PhasePayload::Draft { text, word_count } = PhasePayload::synthetic(Phase::Draft)
        else {
            panic!("synthetic draft payload expected");
        };
        assert_eq!(word_count as usize, text.split_whitespace().count());
    }
}
