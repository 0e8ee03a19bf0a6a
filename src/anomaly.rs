use std::collections::{HashMap, HashSet};

use crate::config::EngineConfig;
use crate::models::{AnomalyDetail, AnomalyFlag, OutlierSubject, ScoreEntry, Student, StudentResult};
use crate::rubric::Rubric;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CohortStats {
    pub mean: f64,
    pub stddev: f64,
}

/// Mean and population standard deviation.
pub fn population_stats(values: &[f64]) -> Option<CohortStats> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(CohortStats {
        mean,
        stddev: variance.sqrt(),
    })
}

/// Scans the cohort for missing scores and outliers. Flags are ordered by
/// student, then kind, then rubric position (weighted-total outliers last).
pub fn detect_anomalies(
    rubric: &Rubric,
    roster: &[Student],
    entries: &[ScoreEntry],
    results: Option<&[StudentResult]>,
    config: &EngineConfig,
) -> Vec<AnomalyFlag> {
    let enrolled: HashSet<&str> = roster.iter().map(|s| s.id.as_str()).collect();
    let mut present: HashMap<(&str, &str), f64> = HashMap::new();
    for entry in entries {
        if !enrolled.contains(entry.student_id.as_str()) {
            tracing::debug!(student = %entry.student_id, "ignoring entry for student not on roster");
            continue;
        }
        if let Some(score) = entry.raw_score {
            present.insert((entry.student_id.as_str(), entry.assignment_id.as_str()), score);
        }
    }

    let mut flags = Vec::new();

    for student in roster {
        for assignment in rubric.iter() {
            if !present.contains_key(&(student.id.as_str(), assignment.id.as_str())) {
                flags.push(AnomalyFlag::missing(&student.id, &assignment.id));
            }
        }
    }

    for assignment in rubric.iter() {
        // Non-finite scores are surfaced by aggregation; they would poison the stats here.
        let scored: Vec<(&str, f64)> = roster
            .iter()
            .filter_map(|student| {
                present
                    .get(&(student.id.as_str(), assignment.id.as_str()))
                    .map(|score| (student.id.as_str(), *score))
            })
            .filter(|(_, score)| score.is_finite())
            .collect();
        flag_outliers(
            &scored,
            || OutlierSubject::Assignment(assignment.id.clone()),
            config,
            &mut flags,
        );
    }

    if let Some(results) = results {
        let totals: Vec<(&str, f64)> = results
            .iter()
            .filter(|r| enrolled.contains(r.student_id.as_str()))
            .map(|r| (r.student_id.as_str(), r.weighted_total))
            .collect();
        flag_outliers(&totals, || OutlierSubject::WeightedTotal, config, &mut flags);
    }

    flags.sort_by(|a, b| {
        a.student_id
            .cmp(&b.student_id)
            .then(a.kind.cmp(&b.kind))
            .then(subject_rank(rubric, a).cmp(&subject_rank(rubric, b)))
    });
    flags
}

fn flag_outliers(
    scored: &[(&str, f64)],
    subject: impl Fn() -> OutlierSubject,
    config: &EngineConfig,
    flags: &mut Vec<AnomalyFlag>,
) {
    if scored.len() < config.min_outlier_sample {
        return;
    }
    let values: Vec<f64> = scored.iter().map(|(_, score)| *score).collect();
    let Some(stats) = population_stats(&values) else {
        return;
    };
    if stats.stddev <= f64::EPSILON * stats.mean.abs().max(1.0) {
        return;
    }

    let threshold = config.outlier_sigma_multiplier * stats.stddev;
    for (student_id, score) in scored {
        if (score - stats.mean).abs() >= threshold {
            flags.push(AnomalyFlag::outlier(
                student_id,
                subject(),
                *score,
                stats.mean,
                stats.stddev,
            ));
        }
    }
}

fn subject_rank(rubric: &Rubric, flag: &AnomalyFlag) -> usize {
    match &flag.detail {
        AnomalyDetail::StatisticalOutlier {
            subject: OutlierSubject::WeightedTotal,
            ..
        } => usize::MAX,
        _ => flag
            .assignment_id()
            .and_then(|id| rubric.position(id))
            .unwrap_or(usize::MAX - 1),
    }
}
