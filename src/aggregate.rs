use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::GradeError;
use crate::ledger::ScoreLedger;
use crate::models::{ScoreEntry, ScoreOutOfRange, Student, StudentResult};
use crate::rubric::Rubric;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    pub result: StudentResult,
    pub out_of_range: Vec<ScoreOutOfRange>,
}

impl Aggregation {
    pub fn is_clean(&self) -> bool {
        self.out_of_range.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CohortAggregation {
    pub results: Vec<StudentResult>,
    pub out_of_range: Vec<ScoreOutOfRange>,
}

/// Weighted total for one student. Only an invalid rubric fails the call;
/// out-of-range scores are collected on the returned aggregation.
pub fn aggregate(
    rubric: &Rubric,
    student_id: &str,
    entries: &[ScoreEntry],
    config: &EngineConfig,
) -> Result<Aggregation, GradeError> {
    rubric.validate(config.weight_tolerance)?;
    Ok(aggregate_validated(rubric, student_id, entries))
}

fn aggregate_validated(rubric: &Rubric, student_id: &str, entries: &[ScoreEntry]) -> Aggregation {
    let mut scores: HashMap<&str, Option<f64>> = HashMap::new();
    for entry in entries {
        if entry.student_id != student_id {
            tracing::debug!(
                student = %entry.student_id,
                expected = %student_id,
                "ignoring score entry for another student"
            );
            continue;
        }
        if rubric.get(&entry.assignment_id).is_none() {
            tracing::debug!(
                assignment = %entry.assignment_id,
                "ignoring score entry for assignment outside the rubric"
            );
            continue;
        }
        scores.insert(entry.assignment_id.as_str(), entry.raw_score);
    }

    let mut total = 0.0;
    let mut per_assignment_normalized = BTreeMap::new();
    let mut missing = Vec::new();
    let mut out_of_range = Vec::new();

    for assignment in rubric.iter() {
        let raw = match scores.get(assignment.id.as_str()).copied().flatten() {
            Some(raw) => raw,
            None => {
                missing.push(assignment.id.clone());
                continue;
            }
        };

        if !raw.is_finite() || raw < 0.0 || raw > assignment.max_score {
            tracing::warn!(
                student = %student_id,
                assignment = %assignment.id,
                score = raw,
                max_score = assignment.max_score,
                "score out of range"
            );
            out_of_range.push(ScoreOutOfRange {
                student_id: student_id.to_string(),
                assignment_id: assignment.id.clone(),
                score: raw,
                max_score: assignment.max_score,
            });
            continue;
        }

        let contribution = (raw / assignment.max_score) * assignment.weight * 100.0;
        total += contribution;
        per_assignment_normalized.insert(assignment.id.clone(), contribution);
    }

    Aggregation {
        result: StudentResult {
            student_id: student_id.to_string(),
            weighted_total: round_half_even(total, 2).clamp(0.0, 100.0),
            per_assignment_normalized,
            missing,
        },
        out_of_range,
    }
}

/// Aggregates every roster student. The rubric is validated once; students
/// are processed in parallel and returned ordered by id.
pub fn aggregate_cohort(
    rubric: &Rubric,
    roster: &[Student],
    ledger: &ScoreLedger,
    config: &EngineConfig,
) -> Result<CohortAggregation, GradeError> {
    rubric.validate(config.weight_tolerance)?;

    let mut aggregations: Vec<Aggregation> = roster
        .par_iter()
        .map(|student| {
            let entries = ledger.entries_for_student(&student.id);
            aggregate_validated(rubric, &student.id, &entries)
        })
        .collect();
    aggregations.sort_by(|a, b| a.result.student_id.cmp(&b.result.student_id));

    let mut cohort = CohortAggregation::default();
    for aggregation in aggregations {
        cohort.out_of_range.extend(aggregation.out_of_range);
        cohort.results.push(aggregation.result);
    }
    Ok(cohort)
}

pub fn round_half_even(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Assignment;

    fn rubric() -> Rubric {
        Rubric::from_assignments(vec![
            Assignment::new("hw1", "HW1", 20.0, 0.3).unwrap(),
            Assignment::new("exam", "Exam", 100.0, 0.7).unwrap(),
        ])
        .unwrap()
    }

    fn thirds() -> Rubric {
        Rubric::from_assignments(vec![
            Assignment::new("a", "A", 7.0, 0.1).unwrap(),
            Assignment::new("b", "B", 13.0, 0.2).unwrap(),
            Assignment::new("c", "C", 3.0, 0.3).unwrap(),
            Assignment::new("d", "D", 100.0, 0.4).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn all_max_scores_give_one_hundred() {
        for rubric in [rubric(), thirds()] {
            let entries: Vec<ScoreEntry> = rubric
                .iter()
                .map(|a| ScoreEntry::present("s1", a.id.clone(), a.max_score))
                .collect();
            let out = aggregate(&rubric, "s1", &entries, &EngineConfig::default()).unwrap();
            assert_eq!(out.result.weighted_total, 100.0);
            assert!(out.result.missing.is_empty());
        }
    }

    #[test]
    fn all_zero_scores_give_zero() {
        let rubric = thirds();
        let entries: Vec<ScoreEntry> = rubric
            .iter()
            .map(|a| ScoreEntry::present("s1", a.id.clone(), 0.0))
            .collect();
        let out = aggregate(&rubric, "s1", &entries, &EngineConfig::default()).unwrap();
        assert_eq!(out.result.weighted_total, 0.0);
        assert!(out.result.missing.is_empty());
    }

    #[test]
    fn weights_and_normalizes_scores() {
        let entries = vec![
            ScoreEntry::present("s1", "hw1", 18.0),
            ScoreEntry::present("s1", "exam", 85.0),
        ];
        let out = aggregate(&rubric(), "s1", &entries, &EngineConfig::default()).unwrap();
        // 0.9 * 30 + 0.85 * 70
        assert_eq!(out.result.weighted_total, 86.5);
        assert!((out.result.per_assignment_normalized["hw1"] - 27.0).abs() < 1e-9);
        assert!((out.result.per_assignment_normalized["exam"] - 59.5).abs() < 1e-9);
        assert!(out.is_clean());
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let entries = vec![
            ScoreEntry::present("s1", "exam", 71.3),
            ScoreEntry::present("s1", "hw1", 13.7),
        ];
        let mut reversed = entries.clone();
        reversed.reverse();
        let config = EngineConfig::default();
        let first = aggregate(&rubric(), "s1", &entries, &config).unwrap();
        let second = aggregate(&rubric(), "s1", &entries, &config).unwrap();
        let third = aggregate(&rubric(), "s1", &reversed, &config).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.result.weighted_total.to_bits(),
            third.result.weighted_total.to_bits()
        );
    }

    #[test]
    fn rubric_not_summing_to_one_is_rejected() {
        let rubric = Rubric::from_assignments(vec![
            Assignment::new("hw1", "HW1", 20.0, 0.27).unwrap(),
            Assignment::new("exam", "Exam", 100.0, 0.7).unwrap(),
        ])
        .unwrap();
        let entries = vec![ScoreEntry::present("s1", "hw1", 20.0)];
        let err = aggregate(&rubric, "s1", &entries, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, GradeError::InvalidRubric { .. }));
    }

    #[test]
    fn missing_score_contributes_zero_and_is_recorded() {
        let entries = vec![ScoreEntry::present("s1", "exam", 100.0)];
        let out = aggregate(&rubric(), "s1", &entries, &EngineConfig::default()).unwrap();
        assert_eq!(out.result.weighted_total, 70.0);
        assert_eq!(out.result.missing, vec!["hw1".to_string()]);
        assert!(!out.result.per_assignment_normalized.contains_key("hw1"));
    }

    #[test]
    fn explicit_absence_is_missing_but_zero_is_not() {
        let entries = vec![
            ScoreEntry::absent("s1", "hw1"),
            ScoreEntry::present("s1", "exam", 0.0),
        ];
        let out = aggregate(&rubric(), "s1", &entries, &EngineConfig::default()).unwrap();
        assert_eq!(out.result.missing, vec!["hw1".to_string()]);
        assert_eq!(out.result.per_assignment_normalized.get("exam"), Some(&0.0));
    }

    #[test]
    fn out_of_range_scores_are_reported_without_aborting() {
        let entries = vec![
            ScoreEntry::present("s1", "hw1", 25.0),
            ScoreEntry::present("s1", "exam", 50.0),
        ];
        let out = aggregate(&rubric(), "s1", &entries, &EngineConfig::default()).unwrap();
        assert_eq!(out.out_of_range.len(), 1);
        assert_eq!(out.out_of_range[0].assignment_id, "hw1");
        assert_eq!(out.out_of_range[0].score, 25.0);
        assert_eq!(out.result.weighted_total, 35.0);
        assert!(!out.is_clean());

        let negative = vec![ScoreEntry::present("s1", "exam", -1.0)];
        let out = aggregate(&rubric(), "s1", &negative, &EngineConfig::default()).unwrap();
        assert_eq!(out.out_of_range.len(), 1);
    }

    #[test]
    fn configured_tolerance_applies_to_aggregation() {
        let rubric = Rubric::from_assignments(vec![
            Assignment::new("hw1", "HW1", 20.0, 0.27).unwrap(),
            Assignment::new("exam", "Exam", 100.0, 0.7).unwrap(),
        ])
        .unwrap();
        let entries = vec![
            ScoreEntry::present("s1", "hw1", 20.0),
            ScoreEntry::present("s1", "exam", 100.0),
        ];
        let loose = EngineConfig {
            weight_tolerance: 0.05,
            ..EngineConfig::default()
        };
        let out = aggregate(&rubric, "s1", &entries, &loose).unwrap();
        assert_eq!(out.result.weighted_total, 97.0);

        let strict = EngineConfig {
            weight_tolerance: 0.01,
            ..EngineConfig::default()
        };
        match aggregate(&rubric, "s1", &entries, &strict) {
            Err(GradeError::InvalidRubric { sum, tolerance }) => {
                assert!((sum - 0.97).abs() < 1e-9);
                assert_eq!(tolerance, 0.01);
            }
            other => panic!("expected InvalidRubric, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_scores_are_out_of_range() {
        let entries = vec![
            ScoreEntry::present("s1", "hw1", f64::NAN),
            ScoreEntry::present("s1", "exam", f64::INFINITY),
        ];
        let out = aggregate(&rubric(), "s1", &entries, &EngineConfig::default()).unwrap();
        assert_eq!(out.out_of_range.len(), 2);
        assert!(out.result.per_assignment_normalized.is_empty());
        assert_eq!(out.result.weighted_total, 0.0);
        assert!(out.result.missing.is_empty());
    }

    #[test]
    fn entries_for_other_students_or_assignments_are_ignored() {
        let entries = vec![
            ScoreEntry::present("s2", "hw1", 20.0),
            ScoreEntry::present("s1", "quiz", 5.0),
            ScoreEntry::present("s1", "exam", 50.0),
        ];
        let out = aggregate(&rubric(), "s1", &entries, &EngineConfig::default()).unwrap();
        assert_eq!(out.result.weighted_total, 35.0);
        assert_eq!(out.result.missing, vec!["hw1".to_string()]);
    }

    #[test]
    fn cohort_results_are_sorted_and_collect_issues() {
        let roster = vec![
            Student {
                id: "s2".to_string(),
                name: "Bob".to_string(),
            },
            Student {
                id: "s1".to_string(),
                name: "Alice".to_string(),
            },
        ];
        let ledger = ScoreLedger::from_entries(vec![
            ScoreEntry::present("s1", "hw1", 18.0),
            ScoreEntry::present("s1", "exam", 85.0),
            ScoreEntry::present("s2", "hw1", 40.0),
            ScoreEntry::present("s2", "exam", 70.0),
        ]);
        let cohort = aggregate_cohort(&rubric(), &roster, &ledger, &EngineConfig::default()).unwrap();
        let ids: Vec<&str> = cohort.results.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        assert_eq!(cohort.results[0].weighted_total, 86.5);
        assert_eq!(cohort.results[1].weighted_total, 49.0);
        assert_eq!(cohort.out_of_range.len(), 1);
        assert_eq!(cohort.out_of_range[0].student_id, "s2");
    }

    #[test]
    fn rounds_half_to_even() {
        assert_eq!(round_half_even(0.125, 2), 0.12);
        assert_eq!(round_half_even(0.375, 2), 0.38);
        assert_eq!(round_half_even(86.5, 2), 86.5);
        assert_eq!(round_half_even(99.999, 2), 100.0);
    }
}
