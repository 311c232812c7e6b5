use serde::Serialize;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::model::SessionMode;

/// Everything a client needs to join, and if necessary create, a session.
///
/// Matchmaking hands the same parameters to every party member so any one of
/// them can bootstrap the document; `leader` only decides who tries first.
#[derive(Debug, Clone)]
pub struct JoinParams {
    /// Store id of the session document.
    pub session_id: String,
    /// Local participant's stable identity.
    pub user_id: String,
    /// Local participant's display name.
    pub display_name: String,
    /// Whether matchmaking designated this client the creating leader.
    pub leader: bool,
    /// Match parameters used when this client ends up creating the document.
    pub setup: MatchSetup,
}

impl Validate for JoinParams {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.session_id.is_empty() {
            errors.add("session_id", ValidationError::new("id_empty"));
        }
        if let Err(e) = validate_id_segment(&self.user_id) {
            errors.add("user_id", e);
        }
        if self.display_name.is_empty() {
            errors.add("display_name", ValidationError::new("length"));
        }
        if let Err(setup_errors) = self.setup.validate() {
            errors.merge_self("setup", Err(setup_errors));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Parameters describing the match itself.
#[derive(Debug, Clone, Validate)]
pub struct MatchSetup {
    /// Matchmaking id the party was assembled under.
    #[validate(length(min = 1))]
    pub match_id: String,
    /// Match mode.
    pub mode: SessionMode,
    /// Writing trait under evaluation.
    #[validate(length(min = 1))]
    pub trait_id: String,
    /// Prompt everyone writes on.
    #[validate(length(min = 1))]
    pub prompt_id: String,
    /// Prompt category, opaque to this crate.
    pub prompt_type: String,
    /// Length of each phase window in seconds.
    #[validate(range(min = 1))]
    pub phase_duration_seconds: u32,
    /// Full expected party, humans and synthetics alike.
    #[validate(length(min = 1, max = 5), nested)]
    pub roster: Vec<RosterEntry>,
}

/// One expected party member.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    /// Stable identity.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
    /// Whether the member is simulated by the synthetic scheduler.
    pub synthetic: bool,
}

impl Validate for RosterEntry {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_id_segment(&self.user_id) {
            errors.add("user_id", e);
        }
        if self.display_name.is_empty() {
            errors.add("display_name", ValidationError::new("length"));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// User ids become segments of dotted field paths, so they must be non-empty
/// and must not contain `.`.
pub fn validate_id_segment(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::new("id_empty"));
    }
    if id.contains('.') {
        return Err(ValidationError::new("id_contains_dot"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> JoinParams {
        JoinParams {
            session_id: "session-1".into(),
            user_id: "alice".into(),
            display_name: "Alice".into(),
            leader: true,
            setup: MatchSetup {
                match_id: "match-1".into(),
                mode: SessionMode::QuickMatch,
                trait_id: "organization".into(),
                prompt_id: "prompt-9".into(),
                prompt_type: "narrative".into(),
                phase_duration_seconds: 900,
                roster: vec![
                    RosterEntry {
                        user_id: "alice".into(),
                        display_name: "Alice".into(),
                        synthetic: false,
                    },
                    RosterEntry {
                        user_id: "bot-1".into(),
                        display_name: "Quill".into(),
                        synthetic: true,
                    },
                ],
            },
        }
    }

    #[test]
    fn sample_params_validate() {
        assert!(sample_params().validate().is_ok());
    }

    #[test]
    fn rejects_dotted_user_id() {
        let mut params = sample_params();
        params.user_id = "alice.smith".into();
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_dotted_roster_id() {
        let mut params = sample_params();
        params.setup.roster[1].user_id = "bot.1".into();
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_empty_roster() {
        let mut params = sample_params();
        params.setup.roster.clear();
        assert!(params.validate().is_err());
    }

    #[test]
    fn roster_is_capped_at_five() {
        let mut params = sample_params();
        for n in 2..=4 {
            params.setup.roster.push(RosterEntry {
                user_id: format!("bot-{n}"),
                display_name: format!("Bot {n}"),
                synthetic: true,
            });
        }
        assert_eq!(params.setup.roster.len(), 5);
        assert!(params.validate().is_ok());

        params.setup.roster.push(RosterEntry {
            user_id: "bot-5".into(),
            display_name: "Bot 5".into(),
            synthetic: true,
        });
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_zero_phase_duration() {
        let mut params = sample_params();
        params.setup.phase_duration_seconds = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn id_segment_rules() {
        assert!(validate_id_segment("alice").is_ok());
        assert!(validate_id_segment("").is_err());
        assert!(validate_id_segment("a.b").is_err());
    }
}
