use std::collections::HashSet;
use std::io::Read;

use crate::models::{ScoreEntry, Student};
use crate::rubric::Rubric;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradeImport {
    pub entries: Vec<ScoreEntry>,
    pub failed: usize,
}

/// Reads `student_id,full_name` rows, with or without a header row. The
/// name falls back to the id and repeated ids keep their first row.
pub fn parse_roster<R: Read>(reader: R) -> anyhow::Result<Vec<Student>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut seen = HashSet::new();
    let mut students = Vec::new();

    for (index, result) in reader.records().enumerate() {
        let row = result?;
        let student_id = row.get(0).unwrap_or_default();
        if index == 0 && is_student_header(student_id) {
            continue;
        }
        if student_id.is_empty() {
            continue;
        }
        if !seen.insert(student_id.to_string()) {
            tracing::warn!(student = %student_id, "duplicate roster row skipped");
            continue;
        }
        let name = match row.get(1).unwrap_or_default() {
            "" => student_id,
            name => name,
        };
        students.push(Student {
            id: student_id.to_string(),
            name: name.to_string(),
        });
    }

    Ok(students)
}

/// Parses a raw score, rejecting NaN and infinities.
pub fn parse_score(value: &str) -> Result<f64, String> {
    match value.trim().parse::<f64>() {
        Ok(score) if score.is_finite() => Ok(score),
        Ok(_) => Err(format!("score must be a finite number, got {value}")),
        Err(err) => Err(format!("invalid score {value}: {err}")),
    }
}

fn is_student_header(cell: &str) -> bool {
    cell.eq_ignore_ascii_case("id") || cell.eq_ignore_ascii_case("student_id")
}

/// Reads grades in long form (`student_id,assignment_id,score`, optional
/// header, blank score records an absence) or wide form (header starting
/// with `id` or `student_id`, one column per assignment, blank cells
/// skipped). Rows naming unknown students or assignments, or holding
/// unparsable or non-finite scores, are counted as failed.
pub fn parse_grades<R: Read>(
    reader: R,
    rubric: &Rubric,
    roster: &[Student],
) -> anyhow::Result<GradeImport> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
    let enrolled: HashSet<&str> = roster.iter().map(|s| s.id.as_str()).collect();

    let mut import = GradeImport::default();
    let Some(first) = rows.first() else {
        return Ok(import);
    };

    let has_header = is_student_header(first.get(0).unwrap_or_default());
    let long_header = has_header
        && first
            .get(1)
            .is_some_and(|cell| cell.eq_ignore_ascii_case("assignment_id"));
    if has_header && !long_header {
        let assignment_ids: Vec<&str> = first.iter().skip(1).collect();
        for row in rows.iter().skip(1) {
            let student_id = row.get(0).unwrap_or_default();
            if student_id.is_empty() {
                continue;
            }
            if !enrolled.contains(student_id) {
                tracing::warn!(student = %student_id, "grade row for unknown student");
                import.failed += 1;
                continue;
            }
            for (assignment_id, cell) in assignment_ids.iter().zip(row.iter().skip(1)) {
                if cell.is_empty() {
                    continue;
                }
                if rubric.get(assignment_id).is_none() {
                    tracing::warn!(assignment = %assignment_id, "grade column for unknown assignment");
                    import.failed += 1;
                    continue;
                }
                match parse_score(cell) {
                    Ok(score) => import
                        .entries
                        .push(ScoreEntry::present(student_id, *assignment_id, score)),
                    Err(_) => {
                        tracing::warn!(student = %student_id, value = %cell, "unparsable score");
                        import.failed += 1;
                    }
                }
            }
        }
        return Ok(import);
    }

    for row in rows.iter().skip(usize::from(long_header)) {
        if row.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        let (Some(student_id), Some(assignment_id)) = (row.get(0), row.get(1)) else {
            import.failed += 1;
            continue;
        };
        if !enrolled.contains(student_id) || rubric.get(assignment_id).is_none() {
            tracing::warn!(
                student = %student_id,
                assignment = %assignment_id,
                "grade row for unknown student or assignment"
            );
            import.failed += 1;
            continue;
        }
        match row.get(2).unwrap_or_default() {
            "" => import
                .entries
                .push(ScoreEntry::absent(student_id, assignment_id)),
            value => match parse_score(value) {
                Ok(score) => import
                    .entries
                    .push(ScoreEntry::present(student_id, assignment_id, score)),
                Err(_) => {
                    tracing::warn!(student = %student_id, value = %value, "unparsable score");
                    import.failed += 1;
                }
            },
        }
    }

    Ok(import)
}
