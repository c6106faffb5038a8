//! Listings ingestion orchestrator - runs fetch, parse, load pipelines

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use listings_backend::config::{self, ApiConfig, DatabaseConfig};
use listings_backend::ingestion::clean::coerce_timestamp;
use listings_backend::ingestion::fetch::{FetchOptions, ListingsApiClient};
use listings_backend::ingestion::pipeline::{self, LoadSummary, LoadWindow};
use listings_backend::ingestion::{parse, write, ListingRecord, RawData};
use listings_backend::logging;
use sqlx::PgPool;
use std::path::PathBuf;
use tracing::{error, info};

/// Key of this pipeline in `last_run_info`
const SCRIPT_NAME: &str = "listings_ingest";

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Fetch marketplace listings into CSV snapshots and upsert them into PostgreSQL."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch listings from the API into a dated CSV snapshot
    Fetch(FetchArgs),
    /// Load a CSV snapshot into PostgreSQL
    Load(LoadArgs),
    /// Fetch, snapshot and load in one run
    Sync(SyncArgs),
    /// Move the incremental watermark back, or clear it
    ResetLastRun {
        /// New watermark; omitted clears it
        #[arg(long, value_parser = parse_timestamp)]
        to: Option<NaiveDateTime>,
    },
    /// Show the last recorded run
    Status,
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Stop after this many unique listings
    #[arg(long)]
    limit: Option<usize>,
    /// Stop after this many pages
    #[arg(long)]
    max_pages: Option<u32>,
    /// Snapshot directory (defaults to LISTINGS_CSV_DIR)
    #[arg(long)]
    csv_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct WindowArgs {
    /// Only listings published after this timestamp
    #[arg(long, value_parser = parse_timestamp, conflicts_with = "incremental")]
    since: Option<NaiveDateTime>,
    /// Only listings published up to this timestamp (defaults to now)
    #[arg(long, value_parser = parse_timestamp)]
    until: Option<NaiveDateTime>,
    /// Continue from the last recorded watermark
    #[arg(long)]
    incremental: bool,
}

impl From<&WindowArgs> for LoadWindow {
    fn from(args: &WindowArgs) -> Self {
        LoadWindow {
            since: args.since,
            until: args.until,
            incremental: args.incremental,
        }
    }
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// CSV file to load; defaults to the newest snapshot in the CSV directory
    path: Option<PathBuf>,
    /// Snapshot directory (defaults to LISTINGS_CSV_DIR)
    #[arg(long)]
    csv_dir: Option<PathBuf>,
    #[command(flatten)]
    window: WindowArgs,
}

#[derive(Args, Debug)]
struct SyncArgs {
    #[command(flatten)]
    fetch: FetchArgs,
    #[command(flatten)]
    window: WindowArgs,
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, String> {
    coerce_timestamp(raw).ok_or_else(|| format!("unrecognised timestamp: {}", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init("info")?;

    info!("Starting listings ingestion");

    match cli.command {
        Command::Fetch(args) => {
            let (path, records) = run_fetch(&args).await?;
            info!("✓ Fetched {} listings into {:?}", records.len(), path);
        }
        Command::Load(args) => {
            let dir = args.csv_dir.clone().unwrap_or_else(config::csv_dir);
            let path = match args.path {
                Some(path) => path,
                None => write::latest_csv(&dir)?
                    .with_context(|| format!("No CSV snapshots in {:?}", dir))?,
            };

            let window = LoadWindow::from(&args.window);
            let db = connect().await?;
            let result = pipeline::tracked(&db, SCRIPT_NAME, run_load_csv(&db, path, &window)).await;
            db.close().await;
            report("load", result)?;
        }
        Command::Sync(args) => {
            let window = LoadWindow::from(&args.window);
            let db = connect().await?;
            let sync = async {
                let (_, records) = run_fetch(&args.fetch).await?;
                pipeline::load_records(&db, SCRIPT_NAME, records, &window).await
            };
            let result = pipeline::tracked(&db, SCRIPT_NAME, sync).await;
            db.close().await;
            report("sync", result)?;
        }
        Command::ResetLastRun { to } => {
            let db = connect().await?;
            write::ensure_run_table(&db).await?;
            write::reset_last_updated(&db, SCRIPT_NAME, to).await?;
            db.close().await;
            info!("✓ Watermark reset");
        }
        Command::Status => {
            let db = connect().await?;
            write::ensure_run_table(&db).await?;
            match write::run_info(&db, SCRIPT_NAME).await? {
                Some(run) => info!(
                    "Last run: {:?}, status: {}, watermark: {:?}, records: {}",
                    run.last_run,
                    run.status.as_deref().unwrap_or("unknown"),
                    run.last_updated_date,
                    run.records_processed.unwrap_or(0)
                ),
                None => info!("No runs recorded for {}", SCRIPT_NAME),
            }
            if let Some(latest) = write::max_created_at(&db).await? {
                info!("Newest stored listing published at {}", latest);
            }
            db.close().await;
        }
    }

    info!("Listings ingestion complete");

    Ok(())
}

async fn connect() -> Result<PgPool> {
    let db = DatabaseConfig::from_env()?
        .connect()
        .await
        .context("Failed to connect to database")?;
    info!("Database connected");
    Ok(db)
}

fn report(name: &str, result: Result<LoadSummary>) -> Result<()> {
    match result {
        Ok(summary) => {
            info!("✓ {} completed: {}", name, summary.stats);
            if let Some(watermark) = summary.watermark {
                info!("Watermark now {}", watermark);
            }
            Ok(())
        }
        Err(e) => {
            error!("✗ {} failed: {:#}", name, e);
            Err(e)
        }
    }
}

/// API -> parsed records -> dated CSV snapshot
async fn run_fetch(args: &FetchArgs) -> Result<(PathBuf, Vec<ListingRecord>)> {
    info!("=== API Fetch Pipeline ===");

    // Step 1: Fetch raw pages
    info!("Step 1/3: Fetching listings...");
    let client = ListingsApiClient::new(ApiConfig::from_env()?)?;
    let options = FetchOptions {
        max_pages: args.max_pages,
        limit: args.limit,
    };
    let raw: RawData = client.fetch_listings(&options).await?;
    info!("✓ Fetch complete");

    // Step 2: Map hits into ListingRecord structs
    info!("Step 2/3: Parsing listings...");
    let records = parse::dedupe_latest(parse::parse_api_pages(&raw)?);
    info!("✓ Parsed {} listings", records.len());

    // Step 3: Snapshot to CSV
    info!("Step 3/3: Writing CSV snapshot...");
    let dir = args.csv_dir.clone().unwrap_or_else(config::csv_dir);
    let path = write::write_listings_csv(&dir, &records, Utc::now().date_naive())?;
    info!("✓ Snapshot written");

    Ok((path, records))
}

async fn run_load_csv(db: &PgPool, path: PathBuf, window: &LoadWindow) -> Result<LoadSummary> {
    info!("=== CSV Load Pipeline ===");

    let load = parse::parse_csv_snapshot(&RawData::File(path))?;
    info!(
        "✓ Read {} listings ({} scheme, {}, {} rows skipped)",
        load.records.len(),
        load.scheme,
        load.encoding,
        load.skipped
    );

    pipeline::load_records(db, SCRIPT_NAME, load.records, window).await
}
