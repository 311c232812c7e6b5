//! Wire-shape types for the shared session document.
//!
//! Everything here serializes to the exact field names the other client
//! platforms read and write, so one store document can be coordinated from
//! any of them.

mod participant;
mod phase;
mod session;
mod summary;

pub use participant::{Participant, ParticipantStatus, PhasePayload, PhaseResult, PhaseResults};
pub use phase::Phase;
pub use session::{
    Coordination, MatchConfig, SessionDocument, SessionMode, SessionState, SessionTiming,
    SyntheticSchedule, player_field, player_result_field,
};
pub use summary::{ParticipantSummary, SessionSummary, format_epoch_ms};
