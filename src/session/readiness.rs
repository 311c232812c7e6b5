//! Pure readiness and deadline computations.
//!
//! Everything here is a function of the session document and a caller-
//! supplied "now", so any client computing against the same snapshot gets
//! the same answer. No local clock offsets ever leak into the document.

use serde::Serialize;

use crate::model::{Phase, SessionDocument};

/// Derived readiness of the current phase at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessView {
    /// Phase the numbers refer to.
    pub phase: Phase,
    /// Participants with a submitted result for the phase.
    pub ready: u32,
    /// Roster size.
    pub total: u32,
    /// Whether the whole roster has submitted.
    pub all_ready: bool,
    /// Whether every human has submitted (synthetics may still be pending).
    pub all_humans_ready: bool,
    /// Ms until the phase deadline, clamped at zero; the full window
    /// length before the phase has started.
    pub time_remaining_ms: u64,
}

/// Compute the readiness view for the document's current phase.
pub fn readiness(doc: &SessionDocument, now_ms: u64) -> ReadinessView {
    let phase = doc.current_phase();
    ReadinessView {
        phase,
        ready: doc.ready_count(phase),
        total: doc.players.len() as u32,
        all_ready: doc.all_ready(phase),
        all_humans_ready: doc.all_humans_submitted(phase),
        time_remaining_ms: time_remaining_ms(doc, phase, now_ms),
    }
}

/// Ms until the deadline of `phase`, clamped at zero. A phase with no
/// start time has its whole window ahead of it, so this reports the full
/// duration rather than zero.
pub fn time_remaining_ms(doc: &SessionDocument, phase: Phase, now_ms: u64) -> u64 {
    match doc.phase_deadline_ms(phase) {
        Some(deadline) => deadline.saturating_sub(now_ms),
        None => doc.phase_duration_ms(),
    }
}

/// Absolute time at which an unfinished session is declared abandoned.
/// Documents written without a creation time anchor at `fallback_ms`, the
/// instant the local client first saw them.
pub fn abandon_at_ms(doc: &SessionDocument, fallback_ms: u64, abandon_after_ms: u64) -> u64 {
    doc.created_at_or(fallback_ms) + abandon_after_ms
}

/// Earliest future instant the coordination loop must wake at even if no
/// snapshot arrives: the current phase deadline (if running) or the abandon
/// ceiling.
pub fn next_wakeup_ms(
    doc: &SessionDocument,
    fallback_ms: u64,
    abandon_after_ms: u64,
) -> Option<u64> {
    if doc.state.is_terminal() {
        return None;
    }
    let deadline = doc.phase_deadline_ms(doc.current_phase());
    let abandon = abandon_at_ms(doc, fallback_ms, abandon_after_ms);
    Some(match deadline {
        Some(deadline) => deadline.min(abandon),
        None => abandon,
    })
}
