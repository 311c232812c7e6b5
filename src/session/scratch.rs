use dashmap::DashSet;

use crate::model::Phase;

/// Per-process latches for deadline side effects.
///
/// Several loops can observe the same instant (a deadline snapshot and the
/// deadline timer, for example); whoever claims a key first performs the
/// side effect, everyone else skips it. Cross-client duplication is handled
/// separately by check-before-write on the document, so these latches only
/// have to be process-local.
#[derive(Debug, Default)]
pub struct TransitionScratch {
    auto_submitted: DashSet<Phase>,
    advanced: DashSet<Phase>,
    scheduled: DashSet<Phase>,
    fired: DashSet<(Phase, String)>,
    announced: DashSet<Phase>,
}

impl TransitionScratch {
    /// Fresh scratch for one session handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the deadline auto-submission for `phase`. True on first claim.
    pub fn claim_auto_submit(&self, phase: Phase) -> bool {
        self.auto_submitted.insert(phase)
    }

    /// Give the auto-submission claim back after a transient failure so the
    /// next wakeup retries. Safe: the submission itself is write-once.
    pub fn release_auto_submit(&self, phase: Phase) {
        self.auto_submitted.remove(&phase);
    }

    /// Claim the advance out of `phase`. True on first claim.
    pub fn claim_advance(&self, phase: Phase) -> bool {
        self.advanced.insert(phase)
    }

    /// Give the advance claim back after a transient failure. Safe: the
    /// advance itself re-checks the document before writing.
    pub fn release_advance(&self, phase: Phase) {
        self.advanced.remove(&phase);
    }

    /// Claim deriving the synthetic schedule for `phase`. True on first
    /// claim.
    pub fn claim_schedule(&self, phase: Phase) -> bool {
        self.scheduled.insert(phase)
    }

    /// Give the schedule claim back after a transient failure. Safe: the
    /// derivation re-checks the document before writing.
    pub fn release_schedule(&self, phase: Phase) {
        self.scheduled.remove(&phase);
    }

    /// Claim firing one synthetic schedule entry. True on first claim.
    pub fn claim_synthetic_fire(&self, phase: Phase, user_id: &str) -> bool {
        self.fired.insert((phase, user_id.to_string()))
    }

    /// Claim announcing the start of `phase` to local subscribers. True on
    /// first claim.
    pub fn claim_announce(&self, phase: Phase) -> bool {
        self.announced.insert(phase)
    }
}
