use anyhow::Context;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::ledger::ScoreLedger;
use crate::models::{Assignment, Course, ScoreEntry, Student};
use crate::rubric::Rubric;

/// Everything the engine needs for one course, read in a single pass.
#[derive(Debug, Clone)]
pub struct CourseSnapshot {
    pub course_id: Uuid,
    pub course: Course,
    pub roster: Vec<Student>,
    pub rubric: Rubric,
    pub ledger: ScoreLedger,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let course_id = create_course(pool, "demo101", "Demo Course").await?;

    let students = vec![
        Student {
            id: "s1".to_string(),
            name: "Alice".to_string(),
        },
        Student {
            id: "s2".to_string(),
            name: "Bob".to_string(),
        },
        Student {
            id: "s3".to_string(),
            name: "Charlie".to_string(),
        },
    ];
    upsert_students(pool, course_id, &students).await?;

    let rubric = Rubric::from_assignments(vec![
        Assignment::new("HW1", "HW1", 20.0, 0.3)?,
        Assignment::new("Exam", "Exam", 100.0, 0.7)?,
    ])?;
    save_rubric(pool, course_id, &rubric).await?;

    let scores = vec![
        ("s1", "HW1", 18.0),
        ("s1", "Exam", 85.0),
        ("s2", "HW1", 12.0),
        ("s2", "Exam", 70.0),
        ("s3", "HW1", 19.0),
        ("s3", "Exam", 95.0),
    ];
    for (student_id, assignment_id, score) in scores {
        record_score(pool, course_id, student_id, assignment_id, Some(score)).await?;
    }

    Ok(())
}

pub async fn create_course(pool: &PgPool, code: &str, title: &str) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO grade_aggregation.courses (id, code, title)
        VALUES ($1, $2, $3)
        ON CONFLICT (code) DO UPDATE
        SET title = EXCLUDED.title
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(code)
    .bind(title)
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(id)
}

pub async fn course_id(pool: &PgPool, code: &str) -> anyhow::Result<Uuid> {
    let row = sqlx::query("SELECT id FROM grade_aggregation.courses WHERE code = $1")
        .bind(code)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("course {code} not found"))?;
    Ok(row.get("id"))
}

/// Inserts roster students, leaving existing ids untouched. Returns how many were new.
pub async fn upsert_students(
    pool: &PgPool,
    course_id: Uuid,
    students: &[Student],
) -> anyhow::Result<usize> {
    let mut inserted = 0usize;

    for student in students {
        let result = sqlx::query(
            r#"
            INSERT INTO grade_aggregation.students (course_id, student_id, full_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (course_id, student_id) DO NOTHING
            "#,
        )
        .bind(course_id)
        .bind(&student.id)
        .bind(&student.name)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Replaces the stored rubric. Assignments no longer present are deleted
/// along with their scores.
pub async fn save_rubric(pool: &PgPool, course_id: Uuid, rubric: &Rubric) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    let keep: Vec<String> = rubric.iter().map(|a| a.id.clone()).collect();

    sqlx::query(
        r#"
        DELETE FROM grade_aggregation.assignments
        WHERE course_id = $1 AND NOT (assignment_id = ANY($2))
        "#,
    )
    .bind(course_id)
    .bind(&keep)
    .execute(&mut *tx)
    .await?;

    for (position, assignment) in rubric.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO grade_aggregation.assignments
            (course_id, assignment_id, name, max_score, weight, position)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (course_id, assignment_id) DO UPDATE
            SET name = EXCLUDED.name,
                max_score = EXCLUDED.max_score,
                weight = EXCLUDED.weight,
                position = EXCLUDED.position
            "#,
        )
        .bind(course_id)
        .bind(&assignment.id)
        .bind(&assignment.name)
        .bind(assignment.max_score)
        .bind(assignment.weight)
        .bind(position as i32)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn record_score(
    pool: &PgPool,
    course_id: Uuid,
    student_id: &str,
    assignment_id: &str,
    raw_score: Option<f64>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO grade_aggregation.scores
        (course_id, student_id, assignment_id, raw_score, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (course_id, student_id, assignment_id) DO UPDATE
        SET raw_score = EXCLUDED.raw_score, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(course_id)
    .bind(student_id)
    .bind(assignment_id)
    .bind(raw_score)
    .bind(Utc::now())
    .execute(pool)
    .await
    .with_context(|| format!("failed to record score for {student_id} on {assignment_id}"))?;

    Ok(())
}

pub async fn record_scores(
    pool: &PgPool,
    course_id: Uuid,
    entries: &[ScoreEntry],
) -> anyhow::Result<usize> {
    for entry in entries {
        record_score(
            pool,
            course_id,
            &entry.student_id,
            &entry.assignment_id,
            entry.raw_score,
        )
        .await?;
    }
    Ok(entries.len())
}

pub async fn load_snapshot(pool: &PgPool, code: &str) -> anyhow::Result<CourseSnapshot> {
    let course_row = sqlx::query("SELECT id, code, title FROM grade_aggregation.courses WHERE code = $1")
        .bind(code)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("course {code} not found"))?;
    let course_id: Uuid = course_row.get("id");
    let course = Course {
        code: course_row.get("code"),
        title: course_row.get("title"),
    };

    let roster = sqlx::query(
        "SELECT student_id, full_name FROM grade_aggregation.students \
         WHERE course_id = $1 ORDER BY student_id",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| Student {
        id: row.get("student_id"),
        name: row.get("full_name"),
    })
    .collect();

    let mut rubric = Rubric::new();
    let rows = sqlx::query(
        "SELECT assignment_id, name, max_score, weight FROM grade_aggregation.assignments \
         WHERE course_id = $1 ORDER BY position, assignment_id",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;
    for row in rows {
        let assignment = Assignment::new(
            row.get::<String, _>("assignment_id"),
            row.get::<String, _>("name"),
            row.get("max_score"),
            row.get("weight"),
        )?;
        rubric.add_assignment(assignment)?;
    }

    let entries = sqlx::query(
        "SELECT student_id, assignment_id, raw_score FROM grade_aggregation.scores \
         WHERE course_id = $1",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| ScoreEntry {
        student_id: row.get("student_id"),
        assignment_id: row.get("assignment_id"),
        raw_score: row.get("raw_score"),
    });

    let ledger = ScoreLedger::from_entries(entries);
    tracing::debug!(course = %code, scores = ledger.len(), "snapshot loaded");

    Ok(CourseSnapshot {
        course_id,
        course,
        roster,
        rubric,
        ledger,
    })
}
