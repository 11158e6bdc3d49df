use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod db;
mod error;
mod models;
mod report;
mod risk;
mod store;

use models::{Announcement, OfferingRecord, Presence, RunOutcome, WelfareRecord};
use store::{AttendanceStore, RosterStore};

#[derive(Parser)]
#[command(name = "church-attendance")]
#[command(about = "Congregation attendance tracker with at-risk member detection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    InitDb,
    /// Load a small realistic roster and three services of attendance
    Seed,
    /// Submit attendance for one service of one home cell
    Record {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        cell: String,
        /// Members who were present, comma separated; everyone else in the
        /// cell is recorded absent
        #[arg(long, value_delimiter = ',', default_value = "")]
        present: Vec<String>,
        #[arg(long)]
        by: String,
    },
    /// Bulk-load attendance rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Re-run the at-risk detection and rewrite the summary
    Refresh,
    /// Show the persisted at-risk summary
    AtRisk {
        #[arg(long)]
        cell: Option<String>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Write a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// List or search the member roster
    Members {
        #[arg(long)]
        search: Option<String>,
    },
    /// Record a welfare contribution
    Welfare {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        member: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        by: String,
    },
    /// Welfare totals and recent contributions
    WelfareSummary,
    /// Record an offering
    Offering {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        amount: f64,
        #[arg(long, default_value = "Sunday Service")]
        kind: String,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        by: String,
    },
    /// List recent offerings
    Offerings {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Post an announcement
    Announce {
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        by: String,
    },
    /// List recent announcements
    Announcements {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

/// Fetch both engine inputs, run the detection, and print the outcome as a
/// user-facing message. The two short-circuit outcomes are informational
/// only; a young congregation simply has not logged three services yet.
async fn refresh_summary(store: &db::PgStore) -> anyhow::Result<()> {
    let roster = store.list_members().await?;
    let attendance = store.list_records().await?;
    let outcome = risk::run(&roster, &attendance, store, Utc::now()).await?;

    match outcome {
        RunOutcome::InsufficientData => {
            println!("Not enough data to update the summary yet.");
        }
        RunOutcome::InsufficientHistory(count) => {
            println!("Need at least 3 recorded services; currently have {count}.");
        }
        RunOutcome::Success(0) => {
            println!("No at-risk members found.");
        }
        RunOutcome::Success(flagged) => {
            println!("Summary updated with {flagged} at-risk member(s).");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = db::PgStore::new(pool);

    match cli.command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(store.pool()).await?;
            println!("Seed data inserted.");
        }
        Commands::Record {
            date,
            cell,
            present,
            by,
        } => {
            let roster = store.list_members().await?;
            let cell_members: Vec<_> = roster
                .iter()
                .filter(|m| m.home_cell.as_deref() == Some(cell.as_str()))
                .collect();
            if cell_members.is_empty() {
                anyhow::bail!("no members found in home cell {cell:?}");
            }

            let present: Vec<&str> = present
                .iter()
                .map(|n| n.trim())
                .filter(|n| !n.is_empty())
                .collect();
            for name in &present {
                if !cell_members.iter().any(|m| m.name == *name) {
                    anyhow::bail!("{name:?} is not on the roster of {cell:?}");
                }
            }

            let marks: Vec<(String, Presence)> = cell_members
                .iter()
                .map(|m| {
                    let presence = if present.contains(&m.name.as_str()) {
                        Presence::Yes
                    } else {
                        Presence::No
                    };
                    (m.name.clone(), presence)
                })
                .collect();
            let present_count = marks.iter().filter(|(_, p)| *p == Presence::Yes).count();

            db::submit_attendance(store.pool(), date, &cell, &marks, &by, Utc::now()).await?;
            println!(
                "Saved {} for {cell}: {present_count}/{} present.",
                date,
                marks.len()
            );
            refresh_summary(&store).await?;
        }
        Commands::Import { csv } => {
            let (inserted, skipped) = db::import_attendance_csv(store.pool(), &csv).await?;
            println!(
                "Inserted {inserted} attendance rows from {} ({skipped} skipped).",
                csv.display()
            );
            refresh_summary(&store).await?;
        }
        Commands::Refresh => {
            refresh_summary(&store).await?;
        }
        Commands::AtRisk { cell, json } => {
            let entries = db::fetch_summary(store.pool(), cell.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                match cell {
                    Some(cell) => println!("No members at risk in {cell}."),
                    None => println!("No members at risk."),
                }
            } else {
                let roster = store.list_members().await?;
                println!("Members needing contact: {}", entries.len());
                for entry in &entries {
                    let phone = roster
                        .iter()
                        .find(|m| m.name == entry.member_name)
                        .and_then(|m| m.phone.as_deref())
                        .unwrap_or("no phone");
                    println!(
                        "- {} ({}): {} (missed {} of {}, {})",
                        entry.member_name,
                        entry.home_cell.as_deref().unwrap_or("no cell"),
                        entry.statuses_display(),
                        entry.missed_count,
                        risk::SERVICE_WINDOW,
                        phone
                    );
                }
            }
        }
        Commands::Report { out } => {
            let roster = store.list_members().await?;
            let attendance = store.list_records().await?;
            let entries = db::fetch_summary(store.pool(), None).await?;
            let report = report::build_report(&roster, &attendance, &entries);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Members { search } => {
            let roster = store.list_members().await?;
            let needle = search.as_deref().map(str::to_lowercase);
            let mut shown = 0usize;
            for member in &roster {
                if let Some(needle) = &needle {
                    if !member.name.to_lowercase().contains(needle) {
                        continue;
                    }
                }
                println!(
                    "- {} ({}, {})",
                    member.name,
                    member.home_cell.as_deref().unwrap_or("no cell"),
                    member.phone.as_deref().unwrap_or("no phone")
                );
                shown += 1;
            }
            match search {
                Some(term) => println!("Found {shown} member(s) matching {term:?}."),
                None => println!("Total members: {shown}."),
            }
        }
        Commands::Welfare {
            date,
            member,
            amount,
            by,
        } => {
            if amount <= 0.0 {
                anyhow::bail!("welfare amount must be greater than zero");
            }
            let roster = store.list_members().await?;
            let home_cell = roster
                .iter()
                .find(|m| m.name == member)
                .and_then(|m| m.home_cell.clone());
            let record = WelfareRecord {
                contribution_date: date,
                member_name: member,
                home_cell,
                amount_ghs: amount,
                collected_by: by,
                recorded_at: Utc::now(),
            };
            db::add_welfare(store.pool(), &record).await?;
            println!("Recorded GHS {amount:.2} from {}.", record.member_name);
        }
        Commands::WelfareSummary => {
            let records = db::fetch_welfare(store.pool()).await?;
            if records.is_empty() {
                println!("No welfare contributions recorded yet.");
            } else {
                let total: f64 = records.iter().map(|r| r.amount_ghs).sum();
                let today = Utc::now().date_naive();
                let today_total: f64 = records
                    .iter()
                    .filter(|r| r.contribution_date == today)
                    .map(|r| r.amount_ghs)
                    .sum();
                println!("Total collected: GHS {total:.2}");
                println!("Collected today: GHS {today_total:.2}");
                println!("Recent contributions:");
                for record in records.iter().take(20) {
                    println!(
                        "- {} {} GHS {:.2} (collected by {})",
                        record.contribution_date,
                        record.member_name,
                        record.amount_ghs,
                        record.collected_by
                    );
                }
            }
        }
        Commands::Offering {
            date,
            amount,
            kind,
            note,
            by,
        } => {
            if amount <= 0.0 {
                anyhow::bail!("offering amount must be greater than zero");
            }
            let record = OfferingRecord {
                offering_date: date,
                amount_ghs: amount,
                meeting_type: kind,
                description: note,
                entered_by: by,
                recorded_at: Utc::now(),
            };
            db::add_offering(store.pool(), &record).await?;
            println!("Recorded GHS {amount:.2} ({}).", record.meeting_type);
        }
        Commands::Offerings { limit } => {
            let records = db::fetch_offerings(store.pool(), limit).await?;
            if records.is_empty() {
                println!("No offerings recorded yet.");
            } else {
                let total: f64 = records.iter().map(|r| r.amount_ghs).sum();
                for record in &records {
                    println!(
                        "- {} GHS {:.2} {} {}",
                        record.offering_date,
                        record.amount_ghs,
                        record.meeting_type,
                        record.description.as_deref().unwrap_or("")
                    );
                }
                println!("Total shown: GHS {total:.2}");
            }
        }
        Commands::Announce { title, message, by } => {
            let announcement = Announcement {
                posted_on: Utc::now().date_naive(),
                title,
                message,
                posted_by: by,
                recorded_at: Utc::now(),
            };
            db::add_announcement(store.pool(), &announcement).await?;
            println!("Posted {:?}.", announcement.title);
        }
        Commands::Announcements { limit } => {
            let announcements = db::fetch_announcements(store.pool(), limit).await?;
            if announcements.is_empty() {
                println!("No announcements yet.");
            } else {
                for announcement in &announcements {
                    println!("## {}", announcement.title);
                    println!("{}", announcement.message);
                    println!(
                        "Posted on {} by {}\n",
                        announcement.posted_on, announcement.posted_by
                    );
                }
            }
        }
    }

    Ok(())
}
