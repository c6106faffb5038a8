//! Load orchestration - publication window, watermark and run bookkeeping

use crate::ingestion::parse;
use crate::ingestion::types::{ListingRecord, RunStatus, WriteStats};
use crate::ingestion::write;
use anyhow::Result;
use chrono::{NaiveDateTime, Utc};
use sqlx::PgPool;
use std::future::Future;
use tracing::{info, warn};

/// Publication window for a load
#[derive(Debug, Clone, Default)]
pub struct LoadWindow {
    pub since: Option<NaiveDateTime>,
    pub until: Option<NaiveDateTime>,
    /// Start from the recorded watermark instead of `since`
    pub incremental: bool,
}

/// Outcome of one load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub stats: WriteStats,
    pub watermark: Option<NaiveDateTime>,
}

/// The watermark never moves backwards: it is the latest of the stored one
/// and the newest publication date in the batch.
pub fn next_watermark(
    stored: Option<NaiveDateTime>,
    records: &[ListingRecord],
) -> Option<NaiveDateTime> {
    let batch_latest = records.iter().filter_map(|r| r.created_at).max();
    stored.max(batch_latest)
}

/// Lower bound of the window. Incremental runs use the recorded watermark,
/// then the newest stored listing.
pub async fn resolve_since(
    db: &PgPool,
    script_name: &str,
    window: &LoadWindow,
) -> Result<Option<NaiveDateTime>> {
    if !window.incremental {
        return Ok(window.since);
    }

    let watermark = match write::last_updated_date(db, script_name).await? {
        Some(watermark) => Some(watermark),
        None => write::max_created_at(db).await?,
    };
    info!("Incremental run from {:?}", watermark);

    Ok(watermark)
}

/// Schema -> window filter -> dedupe -> upsert
pub async fn load_records(
    db: &PgPool,
    script_name: &str,
    records: Vec<ListingRecord>,
    window: &LoadWindow,
) -> Result<LoadSummary> {
    // Step 1: Tables first, incremental runs read them
    info!("Step 1/4: Preparing tables...");
    write::ensure_schema(db).await?;
    write::ensure_run_table(db).await?;
    info!("✓ Tables ready");

    // Step 2: Restrict to the requested publication window
    info!("Step 2/4: Filtering by publication date...");
    let since = resolve_since(db, script_name, window).await?;
    let records = if since.is_some() || window.until.is_some() {
        let until = window.until.unwrap_or_else(|| Utc::now().naive_utc());
        let before = records.len();
        let kept = parse::filter_by_date_range(records, since, until);
        info!("✓ Kept {} of {} listings in ({:?}, {}]", kept.len(), before, since, until);
        kept
    } else {
        info!("✓ No window requested, keeping all {} listings", records.len());
        records
    };

    // Step 3: One record per id, newest first
    info!("Step 3/4: Collapsing duplicate ids...");
    let records = parse::dedupe_latest(records);
    info!("✓ {} unique listings", records.len());

    // Step 4: Upsert
    info!("Step 4/4: Writing to database...");
    let stats = write::upsert_listings(db, &records).await?;
    info!("✓ Write complete");

    let stored = write::last_updated_date(db, script_name).await?;
    let watermark = next_watermark(stored, &records);

    Ok(LoadSummary { stats, watermark })
}

/// Run `pipeline` and record its outcome in `last_run_info`. Failures are
/// recorded as `failed` and returned.
pub async fn tracked<F>(db: &PgPool, script_name: &str, pipeline: F) -> Result<LoadSummary>
where
    F: Future<Output = Result<LoadSummary>>,
{
    write::ensure_run_table(db).await?;

    match pipeline.await {
        Ok(summary) => {
            write::record_run(
                db,
                script_name,
                RunStatus::Completed,
                summary.watermark,
                summary.stats.processed(),
            )
            .await?;
            Ok(summary)
        }
        Err(e) => {
            if let Err(record_err) = write::record_run(db, script_name, RunStatus::Failed, None, 0).await {
                warn!("Could not record failed run: {}", record_err);
            }
            Err(e)
        }
    }
}
