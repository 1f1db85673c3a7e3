#![warn(clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::absolute_paths,
    clippy::arithmetic_side_effects,
    clippy::as_conversions,
    clippy::future_not_send,
    clippy::implicit_return,
    clippy::min_ident_chars,
    clippy::missing_trait_methods,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::pattern_type_mismatch,
    clippy::question_mark_used,
    clippy::shadow_reuse,
    clippy::shadow_unrelated,
    clippy::single_call_fn,
    clippy::std_instead_of_alloc,
    clippy::std_instead_of_core,
    clippy::unseparated_literal_suffix,
)]

mod tsv;

use core::time::Duration;
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Months, NaiveDate, Utc};
use vscr::{
    cascade::Navigator,
    journal::{self, Journal},
    path::SelectionPath,
    retry::{Backoff, RetryPolicy},
    site::Layout,
    sink::{Query, Records, Store},
    table::{self, Table},
    transport::{self, Http},
};

const OUT_DIR: &str = match option_env!("VAHAN_OUT_DIR") {
    Some(dir) => dir,
    None => "vahan_data",
};

#[derive(clap::Parser)]
#[command(version, about)]
struct Args {
    /// Directory holding records.jsonl, failures.jsonl and raw/
    #[arg(short, long, env = "VAHAN_OUT", default_value = OUT_DIR, global = true)]
    out: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Walk the whole cascade, skipping what is already recorded
    Run {
        /// Start at this `vehicle type/manufacturer/year` instead of the first option
        #[arg(long, value_name = "PATH")]
        resume_from: Option<String>,
        #[arg(long, env = "VAHAN_ENDPOINT")]
        endpoint: Option<String>,
        /// JSON component map replacing the built-in one
        #[arg(long, env = "VAHAN_LAYOUT", value_name = "FILE")]
        layout: Option<PathBuf>,
        #[arg(long, env = "VAHAN_ATTEMPTS", default_value_t = 3)]
        attempts: u32,
        #[arg(long, value_enum, default_value = "linear")]
        backoff: BackoffKind,
        /// Base delay of the backoff
        #[arg(long, env = "VAHAN_BACKOFF_MS", default_value_t = 1200)]
        backoff_ms: u64,
        /// Cap for exponential backoff
        #[arg(long, default_value_t = 30_000)]
        backoff_max_ms: u64,
        #[arg(long, env = "VAHAN_TIMEOUT", default_value_t = transport::TIMEOUT.as_secs())]
        timeout_secs: u64,
        /// Pause between result pages
        #[arg(long, default_value_t = 0)]
        page_delay_ms: u64,
    },
    /// Print stored records as TSV
    Query {
        #[arg(long)]
        vehicle_type: Option<String>,
        #[arg(long)]
        manufacturer: Option<String>,
        /// Data covering this period or later (YYYY, YYYY-MM or YYYY-MM-DD)
        #[arg(long, value_parser = period_start)]
        since: Option<NaiveDate>,
        /// Data covering this period or earlier (YYYY, YYYY-MM or YYYY-MM-DD)
        #[arg(long, value_parser = period_end)]
        until: Option<NaiveDate>,
        /// Scraped at or after (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = scraped_since)]
        scraped_since: Option<DateTime<Utc>>,
        /// Scraped at or before (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = scraped_until)]
        scraped_until: Option<DateTime<Utc>>,
    },
    /// Parse every stored results table into one TSV
    Export {
        #[arg(short = 'w', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

fn parse_time(s: &str, end_of_day: bool) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("{s:?}: {e}"))?;
    let time = if end_of_day { date.and_hms_opt(23, 59, 59) } else { date.and_hms_opt(0, 0, 0) };
    time.map(|t| t.and_utc()).ok_or_else(|| format!("{s:?}: out of range"))
}

fn scraped_since(s: &str) -> Result<DateTime<Utc>, String> {
    parse_time(s, false)
}

fn scraped_until(s: &str) -> Result<DateTime<Utc>, String> {
    parse_time(s, true)
}

/// A day, or the first (`end` false) or last day of a `YYYY-MM` month or `YYYY` year.
fn parse_period(s: &str, end: bool) -> Result<NaiveDate, String> {
    let s = s.trim();
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(day);
    }
    let bad = || format!("{s:?}: expected YYYY, YYYY-MM or YYYY-MM-DD");
    let (year, month) = match s.split_once('-') {
        Some((y, m)) => (y, Some(m.parse::<u32>().map_err(|_| bad())?)),
        None => (s, None),
    };
    let year = year.parse::<i32>().map_err(|_| bad())?;
    let first = NaiveDate::from_ymd_opt(year, month.unwrap_or(1), 1).ok_or_else(bad)?;
    if !end {
        return Ok(first);
    }
    let span = if month.is_some() { Months::new(1) } else { Months::new(12) };
    first.checked_add_months(span).and_then(|d| d.pred_opt()).ok_or_else(bad)
}

fn period_start(s: &str) -> Result<NaiveDate, String> {
    parse_period(s, false)
}

fn period_end(s: &str) -> Result<NaiveDate, String> {
    parse_period(s, true)
}

fn output(path: Option<&Path>) -> io::Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn export(records: &Records, mut w: impl Write) -> anyhow::Result<usize> {
    let mut header = false;
    let mut count = 0;
    for record in records.iter() {
        let mut table = Table::parse(&record.raw_fragment);
        for page in &record.pages {
            table.extend(table::body_rows(page));
        }
        if table.is_empty() {
            tracing::warn!(target: "export", "[{}] has no table rows", record.path());
            continue;
        }

        let source = record.path().file_stem();
        if !header {
            tsv::write_row(&mut w, core::iter::once("source").chain(table.headers.iter().map(String::as_str)))?;
            header = true;
        }
        for row in &table.rows {
            tsv::write_row(&mut w, core::iter::once(source.as_str()).chain(row.iter().map(String::as_str)))?;
        }
        count += table.rows.len();
    }
    w.flush()?;
    Ok(count)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;

    pretty_env_logger::init_timed();

    let args = Args::parse();

    match args.command {
        Commands::Run {
            resume_from,
            endpoint,
            layout,
            attempts,
            backoff,
            backoff_ms,
            backoff_max_ms,
            timeout_secs,
            page_delay_ms,
        } => {
            let mut layout = match layout {
                Some(path) => Layout::load(&path)?,
                None => Layout::default(),
            };
            if let Some(endpoint) = endpoint {
                layout.endpoint = endpoint;
            }

            let base = Duration::from_millis(backoff_ms);
            let retry = RetryPolicy {
                max_attempts: attempts,
                backoff: match backoff {
                    BackoffKind::Fixed => Backoff::Fixed(base),
                    BackoffKind::Linear => Backoff::Linear(base),
                    BackoffKind::Exponential => Backoff::Exponential {
                        base,
                        max: Duration::from_millis(backoff_max_ms),
                    },
                },
            };

            let transport = Http::new(&layout.endpoint, Duration::from_secs(timeout_secs))?;
            let store = Store::open(&args.out)?;
            let journal = Journal::open(args.out.join(journal::FILE_NAME))?;
            tracing::info!(target: "vahan", "{} records on disk, scraping {}", store.len(), layout.endpoint);

            let mut navigator = Navigator::new(transport, layout, store, journal, retry)
                .with_page_delay(Duration::from_millis(page_delay_ms));
            if let Some(hint) = resume_from {
                navigator = navigator.resume_from(SelectionPath::parse(&hint));
            }

            let report = navigator.run().await?;
            if report.failures > 0 {
                tracing::warn!(
                    target: "vahan",
                    "{} path(s) failed, see {}",
                    report.failures,
                    navigator.journal().path().display()
                );
            }
            tracing::info!(
                target: "vahan",
                "{:?}: {} written, {} skipped, {} total on disk",
                report.state,
                report.written,
                report.existing,
                navigator.sink().len()
            );
        }
        Commands::Query { vehicle_type, manufacturer, since, until, scraped_since, scraped_until } => {
            let records = Records::load(&args.out)?;
            let query = Query { vehicle_type, manufacturer, since, until, scraped_since, scraped_until };
            let mut w = output(None)?;
            tsv::write_row(&mut w, ["vehicleType", "manufacturer", "year", "month", "scrapedAt", "pages", "rows"])?;
            let mut n = 0;
            for record in records.query(&query) {
                let rows = record.fragments().map(|f| table::body_rows(f).len()).sum::<usize>();
                let (at, pages, rows) = (record.scraped_at.to_rfc3339(), (1 + record.pages.len()).to_string(), rows.to_string());
                tsv::write_row(&mut w, [
                    record.vehicle_type.as_str(),
                    record.manufacturer.as_str(),
                    record.year.as_str(),
                    record.month.as_deref().unwrap_or_default(),
                    at.as_str(),
                    pages.as_str(),
                    rows.as_str(),
                ])?;
                n += 1;
            }
            w.flush()?;
            tracing::info!(target: "vahan", "{n} of {} records matched", records.len());
        }
        Commands::Export { output: path } => {
            let records = Records::load(&args.out)?;
            let rows = export(&records, output(path.as_deref())?)?;
            tracing::info!(target: "vahan", "exported {rows} rows from {} records", records.len());
        }
    }

    Ok(())
}
