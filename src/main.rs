use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;

mod aggregate;
mod anomaly;
mod config;
mod db;
mod error;
mod import;
mod ledger;
mod models;
mod report;
mod rubric;

use crate::config::EngineConfig;
use crate::error::GradeError;
use crate::models::{Assignment, LetterGrade};
use crate::rubric::AssignmentUpdate;

#[derive(Parser)]
#[command(name = "grade-aggregation")]
#[command(about = "Weighted grade totals and anomaly review for Group Scholar courses", long_about = None)]
struct Cli {
    /// TOML file with engine settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Markdown,
    Csv,
}

impl ReportFormat {
    fn default_out(self) -> PathBuf {
        match self {
            ReportFormat::Markdown => PathBuf::from("report.md"),
            ReportFormat::Csv => PathBuf::from("report.csv"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the demo course
    Seed,
    /// Create a course or rename an existing one
    CreateCourse {
        #[arg(long)]
        code: String,
        #[arg(long)]
        title: String,
    },
    /// Import students from a CSV file (student_id,full_name)
    ImportRoster {
        #[arg(long)]
        course: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Add an assignment to the course rubric
    AddAssignment {
        #[arg(long)]
        course: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        weight: f64,
        #[arg(long, default_value_t = 100.0)]
        max_score: f64,
    },
    /// Change an assignment's name, weight or max score
    EditAssignment {
        #[arg(long)]
        course: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        max_score: Option<f64>,
    },
    /// Remove an assignment and its scores
    RemoveAssignment {
        #[arg(long)]
        course: String,
        #[arg(long)]
        id: String,
    },
    /// Record one grade, or an explicit missing submission
    #[command(group(
        ArgGroup::new("value")
            .args(["score", "absent"])
            .required(true)
            .multiple(false)
    ))]
    EnterGrade {
        #[arg(long)]
        course: String,
        #[arg(long)]
        student: String,
        #[arg(long)]
        assignment: String,
        #[arg(long, value_parser = import::parse_score)]
        score: Option<f64>,
        #[arg(long)]
        absent: bool,
    },
    /// Import grades from a long or wide CSV file
    ImportGrades {
        #[arg(long)]
        course: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// List the roster and the rubric
    Show {
        #[arg(long)]
        course: String,
    },
    /// Print weighted totals for every student, or a breakdown for one
    Totals {
        #[arg(long)]
        course: String,
        #[arg(long)]
        student: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List missing scores and statistical outliers
    Anomalies {
        #[arg(long)]
        course: String,
        /// Override the outlier threshold in standard deviations
        #[arg(long)]
        sigma: Option<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Generate a class report
    Report {
        #[arg(long)]
        course: String,
        #[arg(long, value_enum, default_value_t = ReportFormat::Markdown)]
        format: ReportFormat,
        /// Defaults to report.md or report.csv depending on the format
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let engine = EngineConfig::load(cli.config.as_deref())?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Demo course demo101 created.");
        }
        Commands::CreateCourse { code, title } => {
            db::create_course(&pool, &code, &title).await?;
            println!("Course {code} ready.");
        }
        Commands::ImportRoster { course, csv } => {
            let course_id = db::course_id(&pool, &course).await?;
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let students = import::parse_roster(file)?;
            let inserted = db::upsert_students(&pool, course_id, &students).await?;
            tracing::info!(course = %course, inserted, "roster imported");
            println!("Imported {inserted} students from {}.", csv.display());
        }
        Commands::AddAssignment {
            course,
            id,
            name,
            weight,
            max_score,
        } => {
            let mut snapshot = db::load_snapshot(&pool, &course).await?;
            let name = name.unwrap_or_else(|| id.clone());
            snapshot
                .rubric
                .add_assignment(Assignment::new(id.clone(), name, max_score, weight)?)?;
            db::save_rubric(&pool, snapshot.course_id, &snapshot.rubric).await?;
            println!(
                "Assignment {id} added. Rubric weights now sum to {:.4}.",
                snapshot.rubric.weight_sum()
            );
        }
        Commands::EditAssignment {
            course,
            id,
            name,
            weight,
            max_score,
        } => {
            let mut snapshot = db::load_snapshot(&pool, &course).await?;
            snapshot.rubric.edit_assignment(
                &id,
                AssignmentUpdate {
                    name,
                    max_score,
                    weight,
                },
            )?;
            db::save_rubric(&pool, snapshot.course_id, &snapshot.rubric).await?;
            println!(
                "Assignment {id} updated. Rubric weights now sum to {:.4}.",
                snapshot.rubric.weight_sum()
            );
        }
        Commands::RemoveAssignment { course, id } => {
            let mut snapshot = db::load_snapshot(&pool, &course).await?;
            snapshot.rubric.remove_assignment(&id)?;
            let dropped = snapshot.ledger.remove_assignment(&id);
            db::save_rubric(&pool, snapshot.course_id, &snapshot.rubric).await?;
            println!("Assignment {id} removed along with {dropped} scores.");
        }
        Commands::EnterGrade {
            course,
            student,
            assignment,
            score,
            absent: _,
        } => {
            let snapshot = db::load_snapshot(&pool, &course).await?;
            if !snapshot.roster.iter().any(|s| s.id == student) {
                anyhow::bail!("student {student} is not enrolled in {course}");
            }
            if snapshot.rubric.get(&assignment).is_none() {
                anyhow::bail!("assignment {assignment} is not in the {course} rubric");
            }
            db::record_score(&pool, snapshot.course_id, &student, &assignment, score).await?;
            match score {
                Some(score) => println!("Recorded {score} for {student} on {assignment}."),
                None => println!("Recorded missing submission for {student} on {assignment}."),
            }
        }
        Commands::ImportGrades { course, csv } => {
            let snapshot = db::load_snapshot(&pool, &course).await?;
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let import = import::parse_grades(file, &snapshot.rubric, &snapshot.roster)?;
            let processed = db::record_scores(&pool, snapshot.course_id, &import.entries).await?;
            tracing::info!(course = %course, processed, failed = import.failed, "grades imported");
            println!("Processed: {processed}, Failed: {}", import.failed);
        }
        Commands::Show { course } => {
            let snapshot = db::load_snapshot(&pool, &course).await?;
            println!("{} - {}", snapshot.course.code, snapshot.course.title);

            println!("Students:");
            if snapshot.roster.is_empty() {
                println!("  (none)");
            }
            for student in &snapshot.roster {
                println!("  {} | {}", student.id, student.name);
            }

            println!("Assignments:");
            if snapshot.rubric.is_empty() {
                println!("  (none)");
            }
            for assignment in snapshot.rubric.iter() {
                println!(
                    "  {} | {} | weight={} | max={}",
                    assignment.id, assignment.name, assignment.weight, assignment.max_score
                );
            }
            println!("Weights sum to {:.4}.", snapshot.rubric.weight_sum());
        }
        Commands::Totals {
            course,
            student: Some(student),
            json,
        } => {
            let snapshot = db::load_snapshot(&pool, &course).await?;
            if !snapshot.roster.iter().any(|s| s.id == student) {
                anyhow::bail!("student {student} is not enrolled in {course}");
            }
            let aggregation = aggregate::aggregate(
                &snapshot.rubric,
                &student,
                &snapshot.ledger.entries_for_student(&student),
                &engine,
            )?;

            if json {
                println!("{}", serde_json::to_string_pretty(&aggregation)?);
                return Ok(());
            }

            let result = &aggregation.result;
            println!(
                "{} total {:.2} ({})",
                result.student_id,
                result.weighted_total,
                LetterGrade::from_total(result.weighted_total).as_str()
            );
            for assignment in snapshot.rubric.iter() {
                match result.per_assignment_normalized.get(&assignment.id) {
                    Some(contribution) => println!("  {}: {:.2}", assignment.id, contribution),
                    None if result.missing.contains(&assignment.id) => {
                        println!("  {}: missing", assignment.id)
                    }
                    None => println!("  {}: excluded", assignment.id),
                }
            }
            if !aggregation.is_clean() {
                for issue in &aggregation.out_of_range {
                    println!("! {}", GradeError::from(issue.clone()));
                }
            }
        }
        Commands::Totals {
            course,
            student: None,
            json,
        } => {
            let snapshot = db::load_snapshot(&pool, &course).await?;
            let cohort = aggregate::aggregate_cohort(
                &snapshot.rubric,
                &snapshot.roster,
                &snapshot.ledger,
                &engine,
            )?;

            if json {
                println!("{}", serde_json::to_string_pretty(&cohort)?);
                return Ok(());
            }

            if cohort.results.is_empty() {
                println!("No students enrolled in {course}.");
                return Ok(());
            }

            println!("Weighted totals:");
            for result in &cohort.results {
                println!(
                    "- {} total {:.2} ({}) missing {}",
                    result.student_id,
                    result.weighted_total,
                    LetterGrade::from_total(result.weighted_total).as_str(),
                    result.missing.len()
                );
            }
            for issue in &cohort.out_of_range {
                println!("! {}", GradeError::from(issue.clone()));
            }
        }
        Commands::Anomalies {
            course,
            sigma,
            json,
        } => {
            let engine = match sigma {
                Some(sigma) => engine.with_sigma_multiplier(sigma)?,
                None => engine,
            };
            let snapshot = db::load_snapshot(&pool, &course).await?;
            let results = match aggregate::aggregate_cohort(
                &snapshot.rubric,
                &snapshot.roster,
                &snapshot.ledger,
                &engine,
            ) {
                Ok(cohort) => Some(cohort.results),
                Err(err) => {
                    tracing::warn!(course = %course, error = %err, "skipping weighted-total check");
                    None
                }
            };
            let flags = anomaly::detect_anomalies(
                &snapshot.rubric,
                &snapshot.roster,
                &snapshot.ledger.entries(),
                results.as_deref(),
                &engine,
            );

            if json {
                println!("{}", serde_json::to_string_pretty(&flags)?);
                return Ok(());
            }

            if flags.is_empty() {
                println!("No anomalies detected.");
                return Ok(());
            }

            println!("Anomalies:");
            for flag in &flags {
                println!("- {}: {}", flag.student_id, report::describe_flag(flag));
            }
        }
        Commands::Report {
            course,
            format,
            out,
        } => {
            let out = out.unwrap_or_else(|| format.default_out());
            let snapshot = db::load_snapshot(&pool, &course).await?;
            let cohort = aggregate::aggregate_cohort(
                &snapshot.rubric,
                &snapshot.roster,
                &snapshot.ledger,
                &engine,
            )?;

            match format {
                ReportFormat::Markdown => {
                    let flags = anomaly::detect_anomalies(
                        &snapshot.rubric,
                        &snapshot.roster,
                        &snapshot.ledger.entries(),
                        Some(cohort.results.as_slice()),
                        &engine,
                    );
                    let report = report::build_report(
                        &snapshot.course,
                        Utc::now().date_naive(),
                        &snapshot.rubric,
                        &snapshot.roster,
                        &snapshot.ledger,
                        &cohort,
                        &flags,
                    );
                    std::fs::write(&out, report)?;
                }
                ReportFormat::Csv => {
                    let file = std::fs::File::create(&out)
                        .with_context(|| format!("failed to create {}", out.display()))?;
                    report::write_class_csv(
                        file,
                        &snapshot.rubric,
                        &snapshot.roster,
                        &snapshot.ledger,
                        &cohort,
                    )?;
                }
            }
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
