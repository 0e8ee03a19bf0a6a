use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::aggregate::CohortAggregation;
use crate::ledger::ScoreLedger;
use crate::models::{AnomalyDetail, AnomalyFlag, Course, LetterGrade, OutlierSubject, Student};
use crate::rubric::Rubric;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LetterSummary {
    pub letter: LetterGrade,
    pub count: usize,
    pub avg_total: f64,
}

pub fn summarize_by_letter(cohort: &CohortAggregation) -> Vec<LetterSummary> {
    let mut map: HashMap<LetterGrade, (usize, f64)> = HashMap::new();

    for result in &cohort.results {
        let entry = map
            .entry(LetterGrade::from_total(result.weighted_total))
            .or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += result.weighted_total;
    }

    let mut summaries: Vec<LetterSummary> = map
        .into_iter()
        .map(|(letter, (count, total))| LetterSummary {
            letter,
            count,
            avg_total: if count == 0 { 0.0 } else { total / count as f64 },
        })
        .collect();

    summaries.sort_by_key(|s| s.letter);
    summaries
}

pub fn describe_flag(flag: &AnomalyFlag) -> String {
    match &flag.detail {
        AnomalyDetail::MissingScore { assignment_id } => {
            format!("missing score for {assignment_id}")
        }
        AnomalyDetail::StatisticalOutlier {
            subject,
            score,
            mean,
            stddev,
        } => {
            let label = match subject {
                OutlierSubject::Assignment(id) => id.as_str(),
                OutlierSubject::WeightedTotal => "weighted total",
            };
            format!("{label} score {score:.2} is an outlier (mean {mean:.2}, stddev {stddev:.2})")
        }
    }
}

fn student_name<'a>(roster: &'a [Student], student_id: &'a str) -> &'a str {
    roster
        .iter()
        .find(|s| s.id == student_id)
        .map(|s| s.name.as_str())
        .unwrap_or(student_id)
}

pub fn build_report(
    course: &Course,
    generated_on: NaiveDate,
    rubric: &Rubric,
    roster: &[Student],
    ledger: &ScoreLedger,
    cohort: &CohortAggregation,
    flags: &[AnomalyFlag],
) -> String {
    let summaries = summarize_by_letter(cohort);
    let mut output = String::new();

    let _ = writeln!(output, "# Class Grade Report");
    let _ = writeln!(
        output,
        "Generated for {} - {} on {}",
        course.code, course.title, generated_on
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Rubric");

    if rubric.is_empty() {
        let _ = writeln!(output, "No assignments defined.");
    } else {
        for assignment in rubric.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): weight {:.2}, max {}",
                assignment.name, assignment.id, assignment.weight, assignment.max_score
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Distribution");

    if summaries.is_empty() {
        let _ = writeln!(output, "No students enrolled.");
    } else {
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- {}: {} students (avg total {:.2})",
                summary.letter.as_str(),
                summary.count,
                summary.avg_total
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Weighted Totals");

    for result in &cohort.results {
        let _ = writeln!(
            output,
            "- {} ({}): {:.2} {}",
            student_name(roster, &result.student_id),
            result.student_id,
            result.weighted_total,
            LetterGrade::from_total(result.weighted_total).as_str()
        );
        for assignment in rubric.iter() {
            let raw = match ledger.get(&result.student_id, &assignment.id) {
                Some(Some(score)) => format!("{score}"),
                Some(None) => "absent".to_string(),
                None => "-".to_string(),
            };
            let _ = writeln!(output, "  - {}: {}", assignment.id, raw);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Score Issues");

    if cohort.out_of_range.is_empty() {
        let _ = writeln!(output, "No out-of-range scores.");
    } else {
        for issue in &cohort.out_of_range {
            let _ = writeln!(
                output,
                "- {} on {}: {} outside [0, {}] (excluded from total)",
                student_name(roster, &issue.student_id),
                issue.assignment_id,
                issue.score,
                issue.max_score
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Anomalies");

    if flags.is_empty() {
        let _ = writeln!(output, "No anomalies detected.");
    } else {
        for flag in flags {
            let _ = writeln!(
                output,
                "- {} ({}): {}",
                student_name(roster, &flag.student_id),
                flag.student_id,
                describe_flag(flag)
            );
        }
    }

    output
}

/// One row per student: id, name, raw score per assignment, total, letter.
pub fn write_class_csv<W: std::io::Write>(
    writer: W,
    rubric: &Rubric,
    roster: &[Student],
    ledger: &ScoreLedger,
    cohort: &CohortAggregation,
) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);

    let mut header = vec!["id".to_string(), "name".to_string()];
    header.extend(rubric.iter().map(|a| a.id.clone()));
    header.push("weighted_total".to_string());
    header.push("letter".to_string());
    writer.write_record(&header)?;

    for result in &cohort.results {
        let mut row = vec![
            result.student_id.clone(),
            student_name(roster, &result.student_id).to_string(),
        ];
        for assignment in rubric.iter() {
            row.push(match ledger.get(&result.student_id, &assignment.id) {
                Some(Some(score)) => score.to_string(),
                _ => String::new(),
            });
        }
        row.push(format!("{:.2}", result.weighted_total));
        row.push(LetterGrade::from_total(result.weighted_total).as_str().to_string());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_cohort;
    use crate::anomaly::detect_anomalies;
    use crate::config::EngineConfig;
    use crate::models::{Assignment, ScoreEntry};

    fn fixture() -> (Course, Rubric, Vec<Student>, ScoreLedger) {
        let course = Course {
            code: "demo101".to_string(),
            title: "Demo Course".to_string(),
        };
        let rubric = Rubric::from_assignments(vec![
            Assignment::new("HW1", "HW1", 20.0, 0.3).unwrap(),
            Assignment::new("Exam", "Exam", 100.0, 0.7).unwrap(),
        ])
        .unwrap();
        let roster = vec![
            Student {
                id: "s1".to_string(),
                name: "Alice".to_string(),
            },
            Student {
                id: "s2".to_string(),
                name: "Bob".to_string(),
            },
        ];
        let ledger = ScoreLedger::from_entries(vec![
            ScoreEntry::present("s1", "HW1", 18.0),
            ScoreEntry::present("s1", "Exam", 85.0),
            ScoreEntry::present("s2", "Exam", 70.0),
        ]);
        (course, rubric, roster, ledger)
    }

    #[test]
    fn report_lists_totals_and_anomalies() {
        let (course, rubric, roster, ledger) = fixture();
        let config = EngineConfig::default();
        let cohort = aggregate_cohort(&rubric, &roster, &ledger, &config).unwrap();
        let flags = detect_anomalies(&rubric, &roster, &ledger.entries(), None, &config);
        let date = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();

        let report = build_report(&course, date, &rubric, &roster, &ledger, &cohort, &flags);
        assert!(report.contains("Generated for demo101 - Demo Course on 2026-02-02"));
        assert!(report.contains("- Alice (s1): 86.50 B"));
        assert!(report.contains("- Bob (s2): 49.00 F"));
        assert!(report.contains("- Bob (s2): missing score for HW1"));
        assert!(report.contains("No out-of-range scores."));
    }

    #[test]
    fn letter_summary_is_sorted_best_first() {
        let (_, rubric, roster, ledger) = fixture();
        let cohort = aggregate_cohort(&rubric, &roster, &ledger, &EngineConfig::default()).unwrap();
        let summaries = summarize_by_letter(&cohort);
        let letters: Vec<LetterGrade> = summaries.iter().map(|s| s.letter).collect();
        assert_eq!(letters, vec![LetterGrade::B, LetterGrade::F]);
    }

    #[test]
    fn csv_export_has_one_column_per_assignment() {
        let (_, rubric, roster, ledger) = fixture();
        let cohort = aggregate_cohort(&rubric, &roster, &ledger, &EngineConfig::default()).unwrap();
        let mut buffer = Vec::new();
        write_class_csv(&mut buffer, &rubric, &roster, &ledger, &cohort).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id,name,HW1,Exam,weighted_total,letter");
        assert_eq!(lines[1], "s1,Alice,18,85,86.50,B");
        assert_eq!(lines[2], "s2,Bob,,70,49.00,F");
    }
}
