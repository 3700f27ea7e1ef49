use anyhow::{Context, Result};
use attendo_core::RosterStore;
use attendo_store::SqliteStore;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "attendo", about = "Inspect and administer the attendo attendance database")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, env = "ATTENDO_DB_PATH", default_value_os_t = default_db_path())]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List enrolled faces
    List,
    /// Remove an enrolled face with its history (restart attendod afterwards)
    Remove {
        /// Enrolled name
        name: String,
    },
    /// Show the daily summary
    Stats {
        /// Day to summarize (YYYY-MM-DD), today by default
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show appearance records, newest first
    Records {
        /// Only records for this name
        #[arg(long)]
        name: Option<String>,
        /// Maximum number of records to print
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Write the whole database as JSON
    Export {
        /// Output file, stdout when absent
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Recompute statistics by replaying the appearance log
    RebuildStats,
}

fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attendo/face_records.db")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut store = SqliteStore::open(&cli.db)
        .with_context(|| format!("opening database {}", cli.db.display()))?;
    run(cli.command, &mut store, &mut std::io::stdout().lock())
}

fn run(command: Commands, store: &mut SqliteStore, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::List => {
            let roster = store.load_roster()?;
            if roster.is_empty() {
                writeln!(out, "No faces enrolled")?;
            }
            for entry in roster {
                writeln!(
                    out,
                    "{:<24} dim={:<4} enrolled {}",
                    entry.label,
                    entry.feature_vector.len(),
                    entry.created_at.format("%Y-%m-%d %H:%M:%S")
                )?;
            }
        }
        Commands::Remove { name } => {
            let entry = store.delete_entry(&name)?;
            if let Some(photo) = &entry.photo_ref {
                if let Err(e) = std::fs::remove_file(photo) {
                    tracing::warn!(path = %photo, error = %e, "could not remove photo");
                }
            }
            writeln!(out, "Removed {}", entry.label)?;
        }
        Commands::Stats { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let summary = store.daily_summary(date)?;
            writeln!(out, "Date:           {}", summary.date)?;
            writeln!(out, "Registered:     {}", summary.registered_count)?;
            writeln!(out, "Seen that day:  {}", summary.today_count)?;
            writeln!(out, "Avg duration:   {:.1} min", summary.avg_duration_minutes)?;
            for p in &summary.people {
                writeln!(
                    out,
                    "  {:<24} {:>4} visits {:>8.1} min  ({} that day, last {})",
                    p.name,
                    p.appearances,
                    p.total_duration_minutes,
                    p.today_count,
                    p.last_seen.format("%Y-%m-%d %H:%M:%S")
                )?;
            }
        }
        Commands::Records { name, limit } => {
            for r in store.appearances(name.as_deref())?.into_iter().take(limit) {
                writeln!(
                    out,
                    "{:<24} {} → {} {:>8.1}s conf={:.2}",
                    r.label,
                    r.start_time.format("%Y-%m-%d %H:%M:%S"),
                    r.end_time.format("%H:%M:%S"),
                    r.duration_seconds,
                    r.confidence
                )?;
            }
        }
        Commands::Export { output } => {
            let doc = store.export(Utc::now())?;
            let json = serde_json::to_string_pretty(&doc)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
                    writeln!(out, "Exported to {}", path.display())?;
                }
                None => writeln!(out, "{json}")?,
            }
        }
        Commands::RebuildStats => {
            let labels = store.rebuild_statistics()?;
            writeln!(out, "Rebuilt statistics for {labels} people")?;
        }
    }
    Ok(())
}
