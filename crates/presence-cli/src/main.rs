use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use presence_core::{Embedding, Tick};
use presence_store::{local_date, AttendanceBook, DataDir, RosterFile};
use serde::Deserialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod config;
mod engine;

use config::Config;
use engine::spawn_engine;

#[derive(Parser)]
#[command(name = "presence", about = "Recognition-driven attendance ledger")]
struct Cli {
    /// TOML config file (default: $PRESENCE_CONFIG, else built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store face embeddings for an identity
    Enroll {
        /// Identity key, "<roll>_<name>"
        identity: String,
        /// JSON file holding an array of embedding vectors
        #[arg(long)]
        vectors: PathBuf,
        /// Also make sure the group's ledger lists every roster member
        #[arg(short, long)]
        group: Option<String>,
    },
    /// Feed recorded embeddings (one JSON object per line) through recognition
    Replay {
        #[arg(short, long)]
        group: String,
        /// Lines of {"embedding": [...], "at": <epoch millis>}; "-" for stdin
        frames: PathBuf,
        /// Report matches without marking
        #[arg(long)]
        manual: bool,
    },
    /// Mark an identity present now
    Mark {
        #[arg(short, long)]
        group: String,
        identity: String,
    },
    /// Remove the most recent entry of a day
    Undo {
        #[arg(short, long)]
        group: String,
        /// YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Remove one entry by its timestamp and roll
    RemoveEntry {
        #[arg(short, long)]
        group: String,
        #[arg(long)]
        date: NaiveDate,
        /// Entry timestamp in epoch milliseconds
        #[arg(long)]
        timestamp: i64,
        #[arg(long)]
        roll: String,
    },
    /// List the entries of a day
    List {
        #[arg(short, long)]
        group: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Reconcile a group's ledger with a day's entries
    Sync {
        #[arg(short, long)]
        group: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Add missing roster members to a group's ledger
    Roster {
        #[arg(short, long)]
        group: String,
    },
    /// Drop a member's row from a group's ledger
    RemoveMember {
        #[arg(short, long)]
        group: String,
        identity: String,
        /// Delete the member's enrolled embeddings as well
        #[arg(long)]
        forget_vectors: bool,
    },
    /// Write a day's entries to a CSV file
    Export {
        #[arg(short, long)]
        group: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(Deserialize)]
struct FrameLine {
    embedding: Embedding,
    #[serde(default)]
    at: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    let roster = Arc::new(RosterFile::new(&config.roster_path));
    let book = AttendanceBook::open(DataDir::new(&config.data_dir), roster);
    let today = || local_date(Utc::now());

    match cli.command {
        Commands::Enroll {
            identity,
            vectors,
            group,
        } => {
            let samples = read_vectors(&vectors)?;
            let total = book.vectors().enroll(&identity, samples)?;
            println!("{identity}: {total} vector(s) enrolled");
            if let Some(group) = group {
                if book.ensure_roster_present(&group)? {
                    println!("ledger for {group} updated");
                }
            }
        }
        Commands::Replay {
            group,
            frames,
            manual,
        } => {
            let engine = spawn_engine(book, config.session_config())?;
            let enrolled = engine.switch_group(&group).await?;
            println!("{group}: {enrolled} identities enrolled");
            if manual {
                engine.set_auto_mark(false).await?;
            }

            let mut marked = 0usize;
            for (n, line) in open_lines(&frames)?.enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let frame: FrameLine = serde_json::from_str(&line)
                    .with_context(|| format!("frame {} in {}", n + 1, frames.display()))?;
                let at = frame.at.map(from_millis).transpose()?.unwrap_or_else(Utc::now);
                let report = engine.frame(frame.embedding, at).await?;
                print_tick(&report.tick);
                if let Some(entry) = report.marked {
                    marked += 1;
                    println!("  marked {} ({})", entry.name, entry.roll);
                }
            }
            println!("{marked} marked");
        }
        Commands::Mark { group, identity } => {
            let engine = spawn_engine(book, config.session_config())?;
            engine.switch_group(&group).await?;
            if engine.mark(&identity, Utc::now()).await?.is_marked() {
                println!("{identity} marked present in {group}");
            } else {
                println!("{identity} already marked today");
            }
        }
        Commands::Undo { group, date } => {
            let engine = spawn_engine(book, config.session_config())?;
            engine.switch_group(&group).await?;
            match engine.undo(date.unwrap_or_else(today)).await? {
                Some(entry) => println!("removed {} ({})", entry.name, entry.roll),
                None => println!("nothing to undo"),
            }
        }
        Commands::RemoveEntry {
            group,
            date,
            timestamp,
            roll,
        } => {
            if book.remove_entry(&group, date, from_millis(timestamp)?, &roll)? {
                println!("entry removed");
            } else {
                println!("no such entry");
            }
        }
        Commands::List { group, date } => {
            let entries = book.entries(&group, date.unwrap_or_else(today))?;
            if entries.is_empty() {
                println!("No entries");
            }
            for e in entries {
                println!(
                    "{}\t{}\t{}\t{}",
                    e.roll,
                    e.name,
                    e.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S"),
                    e.status
                );
            }
        }
        Commands::Sync { group, date } => {
            let engine = spawn_engine(book, config.session_config())?;
            engine.switch_group(&group).await?;
            engine.sync(date.unwrap_or_else(today)).await?;
            println!("ledger synced");
        }
        Commands::Roster { group } => {
            if book.ensure_roster_present(&group)? {
                println!("ledger for {group} updated");
            } else {
                println!("ledger for {group} already complete");
            }
        }
        Commands::RemoveMember {
            group,
            identity,
            forget_vectors,
        } => {
            if book.remove_member(&group, &identity, forget_vectors)? {
                println!("{identity} removed from {group}");
            } else {
                println!("{identity} not in the {group} ledger");
            }
        }
        Commands::Export { group, date, out } => {
            let count = book.export_day(&group, date.unwrap_or_else(today), &out)?;
            println!("{count} entries written to {}", out.display());
        }
    }

    Ok(())
}

fn read_vectors(path: &Path) -> Result<Vec<Embedding>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let vectors: Vec<Embedding> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    anyhow::ensure!(!vectors.is_empty(), "{} holds no vectors", path.display());
    Ok(vectors)
}

fn open_lines(path: &Path) -> Result<Box<dyn Iterator<Item = std::io::Result<String>>>> {
    if path == Path::new("-") {
        return Ok(Box::new(std::io::stdin().lock().lines()));
    }
    let file =
        std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(std::io::BufReader::new(file).lines()))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .with_context(|| format!("timestamp {ms} out of range"))
}

fn print_tick(tick: &Tick) {
    match tick {
        Tick::NoMatch => println!("no match"),
        Tick::Detected {
            identity,
            confidence,
        } => println!("{identity} ({confidence:.2})"),
        Tick::Accumulating {
            identity,
            confidence,
            hits,
            required,
        } => println!("{identity} ({confidence:.2}) {hits}/{required}"),
        Tick::Confirmed {
            identity,
            confidence,
        } => println!("{identity} ({confidence:.2}) confirmed"),
        Tick::RecentlyMarked {
            identity,
            confidence,
        } => println!("{identity} ({confidence:.2}) recently marked"),
    }
}
