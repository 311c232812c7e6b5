//! Seam to the external scoring service.
//!
//! Implementations may be slow or flaky. The submission pipeline bounds
//! every call with the configured timeout and substitutes a fallback score
//! when the call fails, so scoring can never block a submission write.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Phase, PhasePayload};

/// Lowest score the scale allows.
pub const SCORE_MIN: f64 = 0.0;
/// Highest score the scale allows.
pub const SCORE_MAX: f64 = 100.0;

/// Outcome of grading one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    /// Score on the shared 0-100 scale.
    pub score: f64,
    /// Feedback lines attached to the score.
    #[serde(default)]
    pub remarks: Vec<Remark>,
}

/// One piece of scorer feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remark {
    /// Rubric facet the remark addresses.
    pub facet: String,
    /// The feedback text.
    pub message: String,
}

/// Context handed to the scorer alongside the payload.
#[derive(Debug, Clone)]
pub struct ScoreContext {
    /// Writing trait under evaluation.
    pub trait_id: String,
    /// Prompt the piece was written against.
    pub prompt_id: String,
    /// Phase the submission belongs to.
    pub phase: Phase,
}

/// Error returned by a scorer implementation.
#[derive(Debug, Error)]
#[error("scoring failed: {message}")]
pub struct ScoreError {
    /// Human-readable description of the failure.
    pub message: String,
}

impl ScoreError {
    /// Build an error from any printable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// External grading collaborator.
pub trait Scorer: Send + Sync {
    /// Grade `payload` written under `context`.
    fn score(
        &self,
        payload: PhasePayload,
        context: ScoreContext,
    ) -> BoxFuture<'static, Result<Evaluation, ScoreError>>;
}

/// Scorer that awards the same score to everything. Useful for simulations
/// and as a stand-in while the real service is wired up.
#[derive(Debug, Clone, Copy)]
pub struct FixedScorer {
    /// Score awarded to every submission.
    pub score: f64,
}

impl Scorer for FixedScorer {
    fn score(
        &self,
        _payload: PhasePayload,
        _context: ScoreContext,
    ) -> BoxFuture<'static, Result<Evaluation, ScoreError>> {
        let score = self.score;
        Box::pin(async move {
            Ok(Evaluation {
                score,
                remarks: Vec::new(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_scorer_awards_its_score() {
        let scorer = FixedScorer { score: 73.0 };
        let evaluation = scorer
            .score(
                PhasePayload::Revision {
                    text: "final".into(),
                },
                ScoreContext {
                    trait_id: "voice".into(),
                    prompt_id: "prompt-1".into(),
                    phase: Phase::Revise,
                },
            )
            .await
            .unwrap();
        assert_eq!(evaluation.score, 73.0);
        assert!(evaluation.remarks.is_empty());
    }

    #[test]
    fn evaluation_round_trips() {
        let evaluation = Evaluation {
            score: 64.5,
            remarks: vec![Remark {
                facet: "organization".into(),
                message: "clear paragraph order".into(),
            }],
        };
        let value = serde_json::to_value(&evaluation).unwrap();
        let back: Evaluation = serde_json::from_value(value).unwrap();
        assert_eq!(back, evaluation);
    }
}
