use anyhow::Result;
use clap::{Parser, Subcommand};

use pipeline_drive::adapters::SystemClock;
use pipeline_drive::config::PipelineConfig;
use pipeline_drive::db::{connection, migrate};
use pipeline_drive::store::SqliteStore;
use pipeline_drive::{logging, sweeper};

#[derive(Parser)]
#[command(version, about = "Pipeline drive-table operations")]
struct Cli {
    /// Database URL (SQLite path) of the record store.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Log filter directives (falls back to RUST_LOG, then "info").
    #[arg(long)]
    log: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Apply pending record-store migrations.
    Migrate,
    /// Run the stale-lock sweeper once.
    Sweep {
        /// Pipeline config file (for the stale threshold).
        #[arg(long, value_name = "FILE")]
        config: String,
    },
    /// Show records for a target day.
    Status {
        /// Target day, YYYY-MM-DD.
        #[arg(long)]
        day: chrono::NaiveDate,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log.as_deref())?;

    match cli.cmd {
        Cmd::Migrate => {
            migrate::run_all(&cli.database_url)?;
            println!("migrations applied");
        }
        Cmd::Sweep { config } => {
            let settings = PipelineConfig::from_file(&config)?.resolve()?;
            let mut conn = connection::connect_sqlite(&cli.database_url)?;
            let cleaned = sweeper::sweep(
                &mut conn,
                &SqliteStore::new(),
                &SystemClock,
                settings.stale_threshold,
            );
            println!("cleaned {cleaned} stale record(s)");
        }
        Cmd::Status { day } => {
            use pipeline_drive::store::RecordStore;

            let mut conn = connection::connect_sqlite(&cli.database_url)?;
            let records = SqliteStore::new().list_for_day(&mut conn, day)?;
            if records.is_empty() {
                println!("no records for {day}");
                return Ok(());
            }
            for r in records {
                println!(
                    "{}  [{} .. {})  pipeline={} s2s={} s2t={} audit={} result={} retries={} owner={}",
                    r.pipeline_id,
                    r.window_start_time,
                    r.window_end_time,
                    r.pipeline_status,
                    r.source_to_stage_ingestion_status,
                    r.stage_to_target_ingestion_status,
                    r.audit_status,
                    r.audit_result.as_deref().unwrap_or("-"),
                    r.retry_attempt,
                    r.dag_run_id.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}
