use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::GradeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub code: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub name: String,
    pub max_score: f64,
    pub weight: f64,
}

impl Assignment {
    /// Builds an assignment, rejecting a non-positive max score or a negative weight.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        max_score: f64,
        weight: f64,
    ) -> Result<Self, GradeError> {
        let assignment = Self {
            id: id.into(),
            name: name.into(),
            max_score,
            weight,
        };
        assignment.check()?;
        Ok(assignment)
    }

    pub(crate) fn check(&self) -> Result<(), GradeError> {
        if self.id.trim().is_empty() {
            return Err(GradeError::InvalidAssignment {
                assignment_id: self.id.clone(),
                reason: "id must not be empty".to_string(),
            });
        }
        if !self.max_score.is_finite() || self.max_score <= 0.0 {
            return Err(GradeError::InvalidAssignment {
                assignment_id: self.id.clone(),
                reason: format!("max score must be positive, got {}", self.max_score),
            });
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(GradeError::InvalidAssignment {
                assignment_id: self.id.clone(),
                reason: format!("weight must be non-negative, got {}", self.weight),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub student_id: String,
    pub assignment_id: String,
    /// `None` marks a missing submission, which is not the same as a zero.
    pub raw_score: Option<f64>,
}

impl ScoreEntry {
    pub fn present(
        student_id: impl Into<String>,
        assignment_id: impl Into<String>,
        raw_score: f64,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            assignment_id: assignment_id.into(),
            raw_score: Some(raw_score),
        }
    }

    pub fn absent(student_id: impl Into<String>, assignment_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            assignment_id: assignment_id.into(),
            raw_score: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentResult {
    pub student_id: String,
    pub weighted_total: f64,
    pub per_assignment_normalized: BTreeMap<String, f64>,
    /// Assignment ids without a present score, in rubric order.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreOutOfRange {
    pub student_id: String,
    pub assignment_id: String,
    pub score: f64,
    pub max_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    MissingScore,
    StatisticalOutlier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum OutlierSubject {
    Assignment(String),
    WeightedTotal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnomalyDetail {
    MissingScore {
        assignment_id: String,
    },
    StatisticalOutlier {
        subject: OutlierSubject,
        score: f64,
        mean: f64,
        stddev: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyFlag {
    pub student_id: String,
    pub kind: AnomalyKind,
    pub detail: AnomalyDetail,
}

impl AnomalyFlag {
    pub fn missing(student_id: &str, assignment_id: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            kind: AnomalyKind::MissingScore,
            detail: AnomalyDetail::MissingScore {
                assignment_id: assignment_id.to_string(),
            },
        }
    }

    pub fn outlier(
        student_id: &str,
        subject: OutlierSubject,
        score: f64,
        mean: f64,
        stddev: f64,
    ) -> Self {
        Self {
            student_id: student_id.to_string(),
            kind: AnomalyKind::StatisticalOutlier,
            detail: AnomalyDetail::StatisticalOutlier {
                subject,
                score,
                mean,
                stddev,
            },
        }
    }

    /// Assignment the flag refers to, if any. Weighted-total outliers have none.
    pub fn assignment_id(&self) -> Option<&str> {
        match &self.detail {
            AnomalyDetail::MissingScore { assignment_id } => Some(assignment_id),
            AnomalyDetail::StatisticalOutlier {
                subject: OutlierSubject::Assignment(id),
                ..
            } => Some(id),
            AnomalyDetail::StatisticalOutlier { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    pub fn from_total(total: f64) -> Self {
        if total >= 90.0 {
            LetterGrade::A
        } else if total >= 80.0 {
            LetterGrade::B
        } else if total >= 70.0 {
            LetterGrade::C
        } else if total >= 60.0 {
            LetterGrade::D
        } else {
            LetterGrade::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LetterGrade::A => "A",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
        }
    }
}
