use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{
    participant::Participant,
    phase::Phase,
};

/// Match mode the session was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// Solo warm-up against synthetic opponents.
    Practice,
    /// Casual matchmade party.
    QuickMatch,
    /// Rated matchmade party.
    Ranked,
}

/// Coarse lifecycle marker stored on the session document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Document exists, match not started.
    Forming,
    /// A phase window is open and work is outstanding.
    Active,
    /// Every human has handed in; the group is waiting on synthetic timers
    /// or the deadline.
    Waiting,
    /// A phase advance is being attempted.
    Transitioning,
    /// All phases finished.
    Completed,
    /// Given up on; no client will coordinate it further.
    Abandoned,
}

impl SessionState {
    /// Terminal states end every coordination loop.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Abandoned)
    }
}

/// Contest parameters fixed at creation, except the advancing phase marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchConfig {
    /// Writing trait the contest grades against.
    #[serde(rename = "trait")]
    pub trait_id: String,
    /// Prompt everyone writes on.
    pub prompt_id: String,
    /// Prompt category (narrative, persuasive, ...). Opaque to this crate.
    pub prompt_type: String,
    /// Phase the group is currently in.
    pub current_phase: Phase,
    /// Fixed length of every phase window.
    pub phase_duration_seconds: u32,
}

/// Per-phase start timestamps in epoch ms. Each field is written exactly
/// once, by whichever client performs the transition into that phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTiming {
    /// Start of the draft phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase1_start_time: Option<u64>,
    /// Start of the peer-review phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase2_start_time: Option<u64>,
    /// Start of the revision phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase3_start_time: Option<u64>,
}

impl SessionTiming {
    /// Start timestamp recorded for `phase`.
    pub fn start_time(&self, phase: Phase) -> Option<u64> {
        match phase {
            Phase::Draft => self.phase1_start_time,
            Phase::Review => self.phase2_start_time,
            Phase::Revise => self.phase3_start_time,
        }
    }

    /// Dotted document path of one phase's start time.
    pub fn field_path(phase: Phase) -> String {
        format!("timing.phase{}StartTime", phase.number())
    }
}

/// Denormalized readiness mirror kept on the document for UI consumers that
/// cannot afford to recount the roster. Derived state; any client may
/// refresh it when it drifts from the roster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordination {
    /// Participants with a submitted result for the current phase.
    pub ready_count: u32,
    /// Whether every participant has submitted for the current phase.
    pub all_players_ready: bool,
}

/// Persisted synthetic submit times per phase, epoch ms keyed by user id.
/// Each phase map is derived and written exactly once so every client arms
/// identical timers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticSchedule {
    /// Draft phase entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase1: Option<IndexMap<String, u64>>,
    /// Peer-review phase entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase2: Option<IndexMap<String, u64>>,
    /// Revision phase entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase3: Option<IndexMap<String, u64>>,
}

impl SyntheticSchedule {
    /// Entries for `phase`, if already derived.
    pub fn get(&self, phase: Phase) -> Option<&IndexMap<String, u64>> {
        match phase {
            Phase::Draft => self.phase1.as_ref(),
            Phase::Review => self.phase2.as_ref(),
            Phase::Revise => self.phase3.as_ref(),
        }
    }

    /// Fill the entries for `phase`.
    pub fn set(&mut self, phase: Phase, entries: IndexMap<String, u64>) {
        match phase {
            Phase::Draft => self.phase1 = Some(entries),
            Phase::Review => self.phase2 = Some(entries),
            Phase::Revise => self.phase3 = Some(entries),
        }
    }

    /// Dotted document path of one phase's schedule map.
    pub fn field_path(phase: Phase) -> String {
        format!("syntheticSchedule.{}", phase.field_name())
    }
}

/// The shared session document, the only coordination medium between the
/// clients of one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    /// Store id of this document.
    pub session_id: String,
    /// Matchmaking id the party was assembled under.
    pub match_id: String,
    /// Match mode.
    pub mode: SessionMode,
    /// Creation timestamp in epoch ms. Written by this crate's creating
    /// client; documents from other writers may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    /// Contest parameters.
    pub config: MatchConfig,
    /// Party roster keyed by user id; insertion order is preserved on the
    /// wire.
    pub players: IndexMap<String, Participant>,
    /// Lifecycle marker.
    pub state: SessionState,
    /// Write-once phase start times.
    #[serde(default)]
    pub timing: SessionTiming,
    /// Derived readiness mirror.
    #[serde(default)]
    pub coordination: Coordination,
    /// Synthetic submit schedules, absent until the first phase starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthetic_schedule: Option<SyntheticSchedule>,
}

impl SessionDocument {
    /// Phase the group is currently in.
    pub fn current_phase(&self) -> Phase {
        self.config.current_phase
    }

    /// Creation time, or `fallback_ms` for documents written without one.
    pub fn created_at_or(&self, fallback_ms: u64) -> u64 {
        self.created_at.unwrap_or(fallback_ms)
    }

    /// Fixed phase window length in ms.
    pub fn phase_duration_ms(&self) -> u64 {
        u64::from(self.config.phase_duration_seconds) * 1_000
    }

    /// Roster entry for `user_id`.
    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.players.get(user_id)
    }

    /// Start timestamp of `phase`, if it has begun.
    pub fn phase_start_ms(&self, phase: Phase) -> Option<u64> {
        self.timing.start_time(phase)
    }

    /// Absolute deadline of `phase`, if it has begun.
    pub fn phase_deadline_ms(&self, phase: Phase) -> Option<u64> {
        self.phase_start_ms(phase)
            .map(|start| start + self.phase_duration_ms())
    }

    /// Participants with a submitted result for `phase`.
    pub fn ready_count(&self, phase: Phase) -> u32 {
        self.players
            .values()
            .filter(|participant| participant.has_submitted(phase))
            .count() as u32
    }

    /// Whether every participant has submitted for `phase`.
    pub fn all_ready(&self, phase: Phase) -> bool {
        self.ready_count(phase) as usize == self.players.len()
    }

    /// Whether every human participant has submitted for `phase`.
    pub fn all_humans_submitted(&self, phase: Phase) -> bool {
        self.players
            .values()
            .filter(|participant| !participant.is_synthetic)
            .all(|participant| participant.has_submitted(phase))
    }

    /// Ids of synthetic members, in roster order.
    pub fn synthetic_ids(&self) -> impl Iterator<Item = &str> {
        self.players
            .values()
            .filter(|participant| participant.is_synthetic)
            .map(|participant| participant.user_id.as_str())
    }

    /// Schedule entries for `phase`, if already derived.
    pub fn schedule_for(&self, phase: Phase) -> Option<&IndexMap<String, u64>> {
        self.synthetic_schedule
            .as_ref()
            .and_then(|schedule| schedule.get(phase))
    }

    /// Readiness mirror recomputed from the roster.
    pub fn derived_coordination(&self) -> Coordination {
        let phase = self.current_phase();
        Coordination {
            ready_count: self.ready_count(phase),
            all_players_ready: self.all_ready(phase),
        }
    }
}

/// Dotted document path of one field inside a participant entry.
pub fn player_field(user_id: &str, field: &str) -> String {
    format!("players.{user_id}.{field}")
}

/// Dotted document path of one participant's result slot for `phase`.
pub fn player_result_field(user_id: &str, phase: Phase) -> String {
    player_field(user_id, &format!("phases.{}", phase.field_name()))
}
