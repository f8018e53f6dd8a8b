use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use prettytable::{Cell, Row as PrettyRow, Table};
use std::env;

use news_pulse::config::{IndexBackend, STRICT_THRESHOLD};
use news_pulse::db::Database;
use news_pulse::logging::configure_logging;
use news_pulse::pipeline::{run_pipeline, Stages};
use news_pulse::PipelineConfig;

#[derive(Parser)]
#[clap(
    name = "news-pulse",
    about = "Reprint detection and trend analysis over preprocessed news articles"
)]
struct Cli {
    /// SQLite database file (defaults to $DATABASE_PATH, then news_pulse.db)
    #[clap(long, global = true)]
    database: Option<String>,

    /// End of the analysis window: RFC 3339, or a date meaning midnight UTC
    #[clap(long, global = true, value_parser = parse_as_of)]
    as_of: Option<DateTime<Utc>>,

    /// Raise the merge threshold to the strict value
    #[clap(long, global = true)]
    strict: bool,

    /// Maximum publication spread within one reprint event
    #[clap(long, global = true)]
    window_hours: Option<i64>,

    /// Days of history to load
    #[clap(long, global = true)]
    lookback_days: Option<i64>,

    /// Similarity index implementation
    #[clap(long, global = true, value_enum)]
    backend: Option<IndexBackend>,

    /// Number of events kept in full in a reprint snapshot
    #[clap(long, global = true)]
    top_n: Option<usize>,

    /// Also write daily rolling logs into this directory
    #[clap(long, global = true)]
    log_dir: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect reprints and trends, then print a JSON run summary
    Run,
    /// Detect reprints only
    Reprints,
    /// Detect trends and keyword bursts only
    Trends,
    /// Show the latest stored results
    Show {
        /// Number of rows per table
        #[clap(short, long, default_value = "10")]
        limit: usize,
    },
}

fn parse_as_of(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("'{}' is neither an RFC 3339 timestamp nor a YYYY-MM-DD date", raw))
}

/// Environment first, then command-line overrides.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?;
    if cli.strict {
        config.reprint.threshold = STRICT_THRESHOLD;
    }
    if let Some(hours) = cli.window_hours {
        config.reprint.window_hours = hours;
    }
    if let Some(days) = cli.lookback_days {
        config.lookback_days = days;
    }
    if let Some(backend) = cli.backend {
        config.reprint.backend = backend;
    }
    if let Some(top_n) = cli.top_n {
        config.reprint.top_n = top_n;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_logging("news-pulse", cli.log_dir.as_deref());

    let database_path = cli
        .database
        .clone()
        .or_else(|| env::var("DATABASE_PATH").ok())
        .unwrap_or_else(|| "news_pulse.db".to_string());
    let db = Database::new(&database_path)
        .await
        .with_context(|| format!("cannot open database {}", database_path))?;

    let stages = match cli.command {
        Commands::Run => Stages::All,
        Commands::Reprints => Stages::Reprints,
        Commands::Trends => Stages::Trends,
        Commands::Show { limit } => return show(&db, limit).await,
    };

    let config = build_config(&cli)?;
    let as_of = cli.as_of.unwrap_or_else(Utc::now);
    let summary = run_pipeline(&db, &db, &config, as_of, stages).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}

/// Prints the latest reprint snapshot, weekly report and keyword bursts.
async fn show(db: &Database, limit: usize) -> Result<()> {
    match db.latest_reprint_snapshot().await? {
        Some(snapshot) => {
            println!(
                "Reprint snapshot {} ({} events, reprint rate {:.3}, threshold {:.2})",
                snapshot.run_id,
                snapshot.event_count,
                snapshot.global.reprint_rate,
                snapshot.threshold
            );
            let mut table = Table::new();
            table.add_row(PrettyRow::new(vec![
                Cell::new("Size"),
                Cell::new("First outlet"),
                Cell::new("First published"),
                Cell::new("Avg delay (h)"),
                Cell::new("Outlets"),
                Cell::new("Title"),
            ]));
            for event in snapshot.top_events.iter().take(limit) {
                let title = event.titles_sample.first().map(String::as_str).unwrap_or("");
                table.add_row(PrettyRow::new(vec![
                    Cell::new(&event.size.to_string()),
                    Cell::new(&event.first_outlet),
                    Cell::new(&local_time(event.first_published_at)),
                    Cell::new(&format!("{:.1}", event.avg_delay_hours)),
                    Cell::new(&event.outlet_diversity.to_string()),
                    Cell::new(&preview(title, 60)),
                ]));
            }
            table.printstd();
        }
        None => println!("No reprint snapshot stored yet."),
    }

    match db.latest_weekly_report().await? {
        Some(report) => {
            println!("\nWeek of {}", report.week_start);
            let mut table = Table::new();
            table.add_row(PrettyRow::new(vec![
                Cell::new("Category"),
                Cell::new("Group"),
                Cell::new("Label"),
                Cell::new("This week"),
                Cell::new("Prev week"),
                Cell::new("Spikes"),
            ]));
            let categories = [
                ("new", &report.categories.new),
                ("surging", &report.categories.surging),
                ("fading", &report.categories.fading),
            ];
            for (name, groups) in categories {
                for g in groups.iter().take(limit) {
                    table.add_row(PrettyRow::new(vec![
                        Cell::new(name),
                        Cell::new(&g.group_key),
                        Cell::new(&preview(g.label.as_deref().unwrap_or(""), 40)),
                        Cell::new(&g.this_week.to_string()),
                        Cell::new(&g.prev_week.to_string()),
                        Cell::new(&g.this_week_spikes.to_string()),
                    ]));
                }
            }
            table.printstd();
        }
        None => println!("\nNo weekly report stored yet."),
    }

    let bursts = db.latest_bursts(limit as i64).await?;
    if let Some(first) = bursts.first() {
        println!("\nKeyword bursts on {}", first.date);
        let mut table = Table::new();
        table.add_row(PrettyRow::new(vec![
            Cell::new("Keyword"),
            Cell::new("Count"),
            Cell::new("Baseline"),
            Cell::new("Ratio"),
        ]));
        for b in &bursts {
            table.add_row(PrettyRow::new(vec![
                Cell::new(&b.keyword),
                Cell::new(&b.count.to_string()),
                Cell::new(&format!("{:.2}", b.baseline)),
                Cell::new(&format!("{:.1}", b.ratio)),
            ]));
        }
        table.printstd();
    }

    Ok(())
}
