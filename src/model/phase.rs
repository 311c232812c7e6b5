use std::fmt;

use serde::{Deserialize, Serialize};

/// Contest phases, in play order. Serialized as the 1-based phase number so
/// the wire shape stays compatible with every client platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Phase {
    /// Phase 1: everyone writes a first draft against the prompt.
    Draft,
    /// Phase 2: everyone reviews an assigned peer's draft.
    Review,
    /// Phase 3: everyone revises their own draft using the feedback.
    Revise,
}

impl Phase {
    /// All phases in play order.
    pub const ALL: [Phase; 3] = [Phase::Draft, Phase::Review, Phase::Revise];

    /// 1-based number used on the wire and in field paths.
    pub fn number(self) -> u8 {
        match self {
            Phase::Draft => 1,
            Phase::Review => 2,
            Phase::Revise => 3,
        }
    }

    /// The phase that follows this one, `None` after the last.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Draft => Some(Phase::Review),
            Phase::Review => Some(Phase::Revise),
            Phase::Revise => None,
        }
    }

    /// Key used for this phase inside per-phase document maps
    /// (`phase1`..`phase3`).
    pub fn field_name(self) -> &'static str {
        match self {
            Phase::Draft => "phase1",
            Phase::Review => "phase2",
            Phase::Revise => "phase3",
        }
    }

    /// Human-readable label used in logs and events.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Draft => "draft",
            Phase::Review => "peer-review",
            Phase::Revise => "revision",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<Phase> for u8 {
    fn from(value: Phase) -> Self {
        value.number()
    }
}

impl TryFrom<u8> for Phase {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Phase::Draft),
            2 => Ok(Phase::Review),
            3 => Ok(Phase::Revise),
            other => Err(format!("phase number out of range: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_serialize_as_numbers() {
        assert_eq!(serde_json::to_string(&Phase::Draft).unwrap(), "1");
        assert_eq!(serde_json::from_str::<Phase>("3").unwrap(), Phase::Revise);
        assert!(serde_json::from_str::<Phase>("4").is_err());
    }

    #[test]
    fn play_order_is_draft_review_revise() {
        assert_eq!(Phase::Draft.next(), Some(Phase::Review));
        assert_eq!(Phase::Review.next(), Some(Phase::Revise));
        assert_eq!(Phase::Revise.next(), None);
    }

    #[test]
    fn field_names_match_wire_keys() {
        assert_eq!(Phase::Draft.field_name(), "phase1");
        assert_eq!(Phase::Review.field_name(), "phase2");
        assert_eq!(Phase::Revise.field_name(), "phase3");
    }
}
