use thiserror::Error;

use crate::models::ScoreOutOfRange;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradeError {
    #[error("rubric weights sum to {sum}, expected 1.0 (tolerance {tolerance})")]
    InvalidRubric { sum: f64, tolerance: f64 },

    #[error(
        "score {} for {} on {} is outside [0, {}]",
        .0.score, .0.student_id, .0.assignment_id, .0.max_score
    )]
    ScoreOutOfRange(ScoreOutOfRange),

    #[error("assignment {0} already exists in the rubric")]
    DuplicateAssignment(String),

    #[error("assignment {0} is not in the rubric")]
    UnknownAssignment(String),

    #[error("invalid assignment {assignment_id}: {reason}")]
    InvalidAssignment {
        assignment_id: String,
        reason: String,
    },

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl From<ScoreOutOfRange> for GradeError {
    fn from(value: ScoreOutOfRange) -> Self {
        GradeError::ScoreOutOfRange(value)
    }
}
