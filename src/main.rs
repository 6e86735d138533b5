use std::path::PathBuf;

use anyhow::Context;
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use uuid::Uuid;

use gradebook::models::{BatchLine, EntryBatch, GradedEntry};
use gradebook::store::PgStore;
use gradebook::{logging, report, EngineConfig, Gradebook};

#[derive(Parser)]
#[command(name = "gradebook")]
#[command(about = "Subject averages, general averages and class rankings for a school gradebook", long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    #[arg(long, env = "GRADEBOOK_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    max_connections: u32,

    /// Highest mark on the grading scale
    #[arg(long, env = "GRADEBOOK_MAX_SCALE", default_value = "10", global = true)]
    max_scale: Decimal,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a sample class with grades
    Seed,
    /// Record or replace one graded entry
    Record {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        subject: Uuid,
        #[arg(long)]
        period: Uuid,
        #[arg(long)]
        kind: Uuid,
        #[arg(long)]
        value: Decimal,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Delete one graded entry
    Delete {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        subject: Uuid,
        #[arg(long)]
        period: Uuid,
        #[arg(long)]
        kind: Uuid,
    },
    /// Close a period; its entries become read-only
    ClosePeriod {
        #[arg(long)]
        period: Uuid,
    },
    /// Recompute every cached subject average of a period
    Recompute {
        #[arg(long)]
        period: Uuid,
    },
    /// Rank the active students of a class
    Rank {
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        period: Uuid,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Build the report card of one student
    Bulletin {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        period: Uuid,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn emit(rendered: String, out: Option<PathBuf>) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report written to {}.", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

async fn seed(engine: &Gradebook<PgStore>) -> anyhow::Result<()> {
    let summary = engine.store().seed().await?;
    let evaluated_on = summary.period_start + Duration::days(14);

    // Tenths of a point per student, per subject.
    let marks: [[i64; 3]; 4] = [[80, 75, 90], [60, 65, 55], [80, 75, 90], [45, 50, 60]];

    let mut recorded = 0usize;
    for (offset, kind_id) in summary.evaluation_kind_ids.iter().take(2).enumerate() {
        for (subject_index, subject_id) in summary.subject_ids.iter().enumerate() {
            let lines = summary
                .student_ids
                .iter()
                .zip(marks.iter())
                .map(|(student_id, row)| BatchLine {
                    student_id: *student_id,
                    value: Decimal::new((row[subject_index] + 5 * offset as i64).min(100), 1),
                    comment: None,
                })
                .collect();
            let outcome = engine
                .record_entries(EntryBatch {
                    subject_id: *subject_id,
                    period_id: summary.period_id,
                    evaluation_kind_id: *kind_id,
                    evaluated_on,
                    lines,
                })
                .await?;
            for (student_id, err) in &outcome.errors {
                eprintln!("Skipped {student_id}: {err}");
            }
            recorded += outcome.recorded.len();
        }
    }

    println!(
        "Seed data inserted: class {}, period {}, {recorded} entries.",
        summary.class_id, summary.period_id
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose, cli.log_level.as_deref(), cli.log_json)
        .map_err(|err| anyhow::anyhow!("failed to initialise logging: {err}"))?;

    let database_url = cli
        .database_url
        .context("DATABASE_URL must be set to a production Postgres instance")?;
    let store = PgStore::connect(&database_url, cli.max_connections)
        .await
        .context("failed to connect to Postgres")?;
    let config =
        EngineConfig::with_max_scale(cli.max_scale).context("invalid GRADEBOOK_MAX_SCALE")?;
    let max_scale = config.max_scale;
    let engine = Gradebook::new(store, config);

    match cli.command {
        Commands::InitDb => {
            engine.store().init_db().await?;
            println!("Schema ready.");
        }
        Commands::Seed => seed(&engine).await?,
        Commands::Record {
            student,
            subject,
            period,
            kind,
            value,
            date,
            comment,
        } => {
            let average = engine
                .record_entry(GradedEntry {
                    student_id: student,
                    subject_id: subject,
                    period_id: period,
                    evaluation_kind_id: kind,
                    value,
                    evaluated_on: date,
                    comment,
                })
                .await?;
            println!(
                "Entry recorded. Subject average: {}.",
                report::format_average(average.map(|a| a.average), max_scale)
            );
        }
        Commands::Delete {
            student,
            subject,
            period,
            kind,
        } => {
            let average = engine.delete_entry(student, subject, period, kind).await?;
            println!(
                "Entry deleted. Subject average: {}.",
                report::format_average(average.map(|a| a.average), max_scale)
            );
        }
        Commands::ClosePeriod { period } => {
            if engine.close_period(period).await? {
                println!("Period {period} closed.");
            } else {
                println!("Period {period} was already closed.");
            }
        }
        Commands::Recompute { period } => {
            let count = engine.recompute_period(period).await?;
            println!("{count} subject averages recomputed.");
        }
        Commands::Rank {
            class,
            period,
            json,
            out,
        } => {
            let ranking = engine.rank_class(class, period).await?;
            let rendered = if json {
                serde_json::to_string_pretty(&ranking)? + "\n"
            } else {
                report::build_ranking_report(&ranking, max_scale)
            };
            emit(rendered, out)?;
        }
        Commands::Bulletin {
            student,
            period,
            json,
            out,
        } => {
            let bulletin = engine.bulletin(student, period).await?;
            let rendered = if json {
                serde_json::to_string_pretty(&bulletin)? + "\n"
            } else {
                report::build_bulletin(&bulletin, max_scale)
            };
            emit(rendered, out)?;
        }
    }

    Ok(())
}
