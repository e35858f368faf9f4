mod config;
mod engine;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Parser, Subcommand};
use config::Config;
use engine::Engine;
use rollcall_ledger::{GroupFilter, Identity, Ledger, ReportScope};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition classroom attendance")]
struct Cli {
    /// Ledger database path (overrides ROLLCALL_DB_PATH and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the ledger if needed and print its status
    Init,
    /// Add or rename a group
    GroupAdd { id: String, name: String },
    /// Add or update an identity
    IdentityAdd {
        id: String,
        name: String,
        #[arg(long)]
        email: Option<String>,
        /// Home group id
        #[arg(long)]
        group: Option<String>,
    },
    /// Schedule a session for one or more groups
    SessionAdd {
        name: String,
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        #[arg(long, value_parser = parse_time)]
        start: Option<NaiveTime>,
        #[arg(long, value_parser = parse_time)]
        end: Option<NaiveTime>,
        /// Comma-separated group ids
        #[arg(long, default_value = "")]
        groups: String,
    },
    /// Enroll an identity from a photo (first detected face is used)
    Enroll { identity: String, image: PathBuf },
    /// Remove an identity's enrolled face
    Unenroll { identity: String },
    /// List face boxes found in an image
    Detect { image: PathBuf },
    /// Match faces in an image without recording attendance
    Recognize {
        image: PathBuf,
        /// Also write the image with recognized faces boxed in green and
        /// unknown ones in red (format from the extension)
        #[arg(long, value_name = "OUT")]
        annotate: Option<PathBuf>,
    },
    /// Record attendance for every recognized face in an image
    Checkin {
        image: PathBuf,
        #[arg(long)]
        session: Option<i64>,
        #[arg(long)]
        group: Option<String>,
        /// Comma-separated group ids (wins over --group)
        #[arg(long)]
        groups: Option<String>,
        /// Check-in time, e.g. 2026-03-02T08:10:00 (default: now)
        #[arg(long, value_parser = parse_datetime)]
        at: Option<NaiveDateTime>,
    },
    /// Attendance report for a session or a date, absences included
    Report {
        #[arg(long, conflicts_with = "date", required_unless_present = "date")]
        session: Option<i64>,
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        groups: Option<String>,
    },
    /// Show ledger counts and settings
    Status,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| format!("expected HH:MM[:SS]: {e}"))
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| format!("expected YYYY-MM-DDTHH:MM:SS: {e}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_image(path: &PathBuf) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    tracing::debug!(db = %config.db_path.display(), scheme = %config.key_scheme, "configuration loaded");

    let ledger = Ledger::open(&config.db_path, config.key_scheme)
        .with_context(|| format!("opening ledger {}", config.db_path.display()))?;
    let engine = Engine::new(ledger, &config);

    match cli.command {
        Commands::Init | Commands::Status => {
            print_json(&engine.ledger().stats()?)?;
        }
        Commands::GroupAdd { id, name } => {
            print_json(&engine.ledger().add_group(&id, &name)?)?;
        }
        Commands::IdentityAdd { id, name, email, group } => {
            let identity = Identity {
                identity_id: id,
                name,
                email,
                home_group: group,
            };
            engine.ledger().add_identity(&identity)?;
            print_json(&identity)?;
        }
        Commands::SessionAdd { name, date, start, end, groups } => {
            let groups = rollcall_ledger::parse_group_list(&groups);
            print_json(&engine.ledger().add_session(&name, date, start, end, &groups)?)?;
        }
        Commands::Enroll { identity, image } => {
            let bytes = read_image(&image)?;
            print_json(&engine.enroll(&identity, &bytes)?)?;
        }
        Commands::Detect { image } => {
            let bytes = read_image(&image)?;
            print_json(&engine.detect(&bytes)?)?;
        }
        Commands::Unenroll { identity } => {
            print_json(&engine.unenroll(&identity)?)?;
        }
        Commands::Recognize { image, annotate } => {
            let bytes = read_image(&image)?;
            match annotate {
                Some(out) => {
                    let (recognitions, frame) = engine.recognize_annotated(&bytes)?;
                    frame
                        .save(&out)
                        .with_context(|| format!("writing {}", out.display()))?;
                    tracing::info!(path = %out.display(), faces = recognitions.len(), "annotated image written");
                    print_json(&recognitions)?;
                }
                None => print_json(&engine.recognize(&bytes)?)?,
            }
        }
        Commands::Checkin { image, session, group, groups, at } => {
            let bytes = read_image(&image)?;
            let filter = GroupFilter::from_params(group.as_deref(), groups.as_deref());
            let at = at.unwrap_or_else(|| Local::now().naive_local());
            print_json(&engine.checkin(&bytes, session, filter, at)?)?;
        }
        Commands::Report { session, date, group, groups } => {
            let scope = match (session, date) {
                (Some(id), _) => ReportScope::Session(id),
                (None, Some(date)) => ReportScope::Date(date),
                (None, None) => anyhow::bail!("either --session or --date is required"),
            };
            let filter = GroupFilter::from_params(group.as_deref(), groups.as_deref());
            print_json(&rollcall_ledger::report(engine.ledger(), scope, &filter)?)?;
        }
    }

    Ok(())
}
