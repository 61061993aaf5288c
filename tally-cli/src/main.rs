use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tally_core::{Tracker, TrackerConfig};
use tally_source::extract_count;

#[derive(Parser)]
#[command(name = "tally", about = "Daily friend-count ledger")]
struct Cli {
    #[arg(long, short, default_value = "./tally.yaml")]
    config: PathBuf,
    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect one row, write deltas and send the report.
    Run {
        /// Observation date (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show the next row a run would write.
    Cursor,
    /// List the entities in the ledger header.
    Entities,
    /// Recompute the latest report without writing.
    Report {
        #[arg(long)]
        send: bool,
    },
    /// Run the value extractor against a saved page.
    Extract { file: PathBuf },
    /// Write a header into an empty ledger.
    Init {
        /// `key=Display Name`, repeatable.
        #[arg(long = "entity", value_parser = parse_entity, required = true)]
        entities: Vec<(String, String)>,
    },
}

fn parse_entity(raw: &str) -> Result<(String, String), String> {
    let (key, name) = raw.split_once('=').unwrap_or((raw, ""));
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in `{raw}`"));
    }
    let name = if name.trim().is_empty() { key } else { name.trim() };
    Ok((key.to_string(), name.to_string()))
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn open(path: &Path) -> anyhow::Result<Tracker> {
    let config = TrackerConfig::from_path(path)?;
    Ok(Tracker::from_config(config)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Extract { file } => {
            let page = std::fs::read_to_string(&file)
                .with_context(|| format!("read {}", file.display()))?;
            match extract_count(&page) {
                Some(value) => println!("{value}"),
                None => bail!("no count found in {}", file.display()),
            }
        }
        Command::Run { date } => {
            let tracker = open(&cli.config)?;
            let today = date.unwrap_or_else(|| Local::now().date_naive());
            let summary = tracker.run(today).await?;
            println!(
                "row {} ({}): {} collected, {} not collected",
                summary.row,
                summary.date,
                summary.collected,
                summary.failures.len()
            );
            if let Some(report) = summary.report {
                println!("\n{report}");
            }
        }
        Command::Cursor => {
            let tracker = open(&cli.config)?;
            let cursor = tracker.cursor().await?;
            match cursor.previous_row {
                Some(prev) => println!("next row {} (previous {prev})", cursor.next_row),
                None => println!("next row {} (ledger has no data rows)", cursor.next_row),
            }
        }
        Command::Entities => {
            let tracker = open(&cli.config)?;
            for e in tracker.entities().await? {
                println!("{:>4}  {:<24} {}", e.value_col, e.key, e.name);
            }
        }
        Command::Report { send } => {
            let tracker = open(&cli.config)?;
            match tracker.latest_report().await? {
                Some(report) => {
                    println!("{report}");
                    if send {
                        tracker.deliver(&report).await?;
                    }
                }
                None => println!("need at least two data rows for a report"),
            }
        }
        Command::Init { entities } => {
            let tracker = open(&cli.config)?;
            tracker.init_header(&entities).await?;
            println!("header written for {} entities", entities.len());
        }
    }

    Ok(())
}
