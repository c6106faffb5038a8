//! Write functions - CSV snapshots and PostgreSQL upserts with newer-wins conflict resolution

use crate::ingestion::columns::LISTING_COLUMNS;
use crate::ingestion::types::{ListingRecord, RunInfo, RunStatus, UpsertOutcome, WriteStats};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::{Acquire, PgConnection, PgPool};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const LISTINGS_TABLE: &str = "bayut_properties";
pub const RUN_TABLE: &str = "last_run_info";

const UNIQUE_ID_INDEX: &str = "bayut_properties_id_key";
const MAX_LOGGED_ERRORS: usize = 10;

/// SQL types, parallel to `LISTING_COLUMNS`
const COLUMN_TYPES: &[(&str, &str)] = &[
    ("id", "BIGINT"),
    ("title", "TEXT"),
    ("price", "NUMERIC"),
    ("rooms", "INTEGER"),
    ("baths", "INTEGER"),
    ("area", "NUMERIC"),
    ("rent_frequency", "TEXT"),
    ("location", "TEXT"),
    ("cover_photo_url", "TEXT"),
    ("property_url", "TEXT"),
    ("category", "TEXT"),
    ("property_type", "TEXT"),
    ("created_at", "TIMESTAMP"),
    ("updated_at", "TIMESTAMP"),
    ("furnishing_status", "TEXT"),
    ("completion_status", "TEXT"),
    ("amenities", "TEXT"),
    ("agency_name", "TEXT"),
    ("contact_info", "TEXT"),
    ("geography", "TEXT"),
    ("agency_logo_url", "TEXT"),
    ("proxy_mobile", "TEXT"),
    ("keywords", "TEXT"),
    ("is_verified", "BOOLEAN"),
    ("purpose", "TEXT"),
    ("floor_number", "INTEGER"),
    ("city_level_score", "INTEGER"),
    ("score", "INTEGER"),
    ("agency_licenses", "TEXT"),
    ("agency_rating", "NUMERIC"),
];

/// Dated snapshot name, e.g. `bayut_properties_sale_20250512.csv`
pub fn csv_file_name(date: NaiveDate) -> String {
    format!("bayut_properties_sale_{}.csv", date.format("%Y%m%d"))
}

/// Write a UTF-8 (with BOM) snapshot with every field quoted
pub fn write_listings_csv(dir: &Path, records: &[ListingRecord], date: NaiveDate) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    let path = dir.join(csv_file_name(date));

    let mut file = fs::File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
    file.write_all(b"\xEF\xBB\xBF")?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(file);

    writer.write_record(LISTING_COLUMNS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    info!("Wrote {} listings to {:?}", records.len(), path);

    Ok(path)
}

/// Newest `*.csv` in `dir`, by file name (names carry the date)
pub fn latest_csv(dir: &Path) -> Result<Option<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))?;

    let mut csv_files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("csv")) {
            csv_files.push(path);
        }
    }

    Ok(csv_files.into_iter().max_by(|a, b| a.file_name().cmp(&b.file_name())))
}

/// Comma-separated column list for SELECTs
pub fn select_columns() -> String {
    LISTING_COLUMNS.join(", ")
}

/// Bring the listings table to the current shape.
///
/// Creates it when absent, adds columns older loaders never wrote, widens a
/// legacy INTEGER id, collapses duplicate ids (newest `updated_at` survives)
/// and finally enforces uniqueness on `id`.
pub async fn ensure_schema(db: &PgPool) -> Result<()> {
    let column_defs: Vec<String> = COLUMN_TYPES
        .iter()
        .map(|(name, sql_type)| format!("{} {}", name, sql_type))
        .collect();

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        LISTINGS_TABLE,
        column_defs.join(", ")
    ))
    .execute(db)
    .await
    .context("Failed to create listings table")?;

    for (name, sql_type) in COLUMN_TYPES.iter().skip(1) {
        sqlx::query(&format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
            LISTINGS_TABLE, name, sql_type
        ))
        .execute(db)
        .await
        .with_context(|| format!("Failed to add column {}", name))?;
    }

    let id_type: Option<String> = sqlx::query_scalar(
        "SELECT data_type::TEXT FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 AND column_name = 'id'",
    )
    .bind(LISTINGS_TABLE)
    .fetch_optional(db)
    .await?;

    if id_type.as_deref() == Some("integer") {
        info!("Widening {}.id to BIGINT", LISTINGS_TABLE);
        sqlx::query(&format!("ALTER TABLE {} ALTER COLUMN id TYPE BIGINT", LISTINGS_TABLE))
            .execute(db)
            .await?;
    }

    let removed = sqlx::query(&format!(
        r#"
        DELETE FROM {table} older USING {table} newer
        WHERE older.id = newer.id
          AND (
            COALESCE(older.updated_at, '-infinity') < COALESCE(newer.updated_at, '-infinity')
            OR (
              COALESCE(older.updated_at, '-infinity') = COALESCE(newer.updated_at, '-infinity')
              AND older.ctid < newer.ctid
            )
          )
        "#,
        table = LISTINGS_TABLE
    ))
    .execute(db)
    .await
    .context("Failed to collapse duplicate listings")?
    .rows_affected();

    if removed > 0 {
        warn!("Removed {} duplicate listing rows", removed);
    }

    sqlx::query(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} (id)",
        UNIQUE_ID_INDEX, LISTINGS_TABLE
    ))
    .execute(db)
    .await
    .context("Failed to create unique index on id")?;

    debug!("Schema for {} is current", LISTINGS_TABLE);

    Ok(())
}

/// Insert-or-update keyed on `id`. An existing row is replaced only when the
/// incoming `updated_at` is not older (see `parse::is_newer_or_equal`);
/// otherwise no row comes back.
pub fn upsert_sql() -> String {
    let placeholders: Vec<String> = (1..=LISTING_COLUMNS.len()).map(|n| format!("${}", n)).collect();
    let assignments: Vec<String> = LISTING_COLUMNS
        .iter()
        .skip(1)
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();

    format!(
        "INSERT INTO {table} AS stored ({columns}) VALUES ({values}) \
         ON CONFLICT (id) DO UPDATE SET {assignments} \
         WHERE stored.updated_at IS NULL \
            OR EXCLUDED.updated_at IS NULL \
            OR EXCLUDED.updated_at >= stored.updated_at \
         RETURNING (xmax = 0) AS inserted",
        table = LISTINGS_TABLE,
        columns = LISTING_COLUMNS.join(", "),
        values = placeholders.join(", "),
        assignments = assignments.join(", "),
    )
}

/// Upsert a batch in one transaction. Each row runs in its own savepoint so
/// a failing row is rolled back alone and counted in `errors`.
pub async fn upsert_listings(db: &PgPool, records: &[ListingRecord]) -> Result<WriteStats> {
    info!("Upserting {} listings into {}", records.len(), LISTINGS_TABLE);

    let sql = upsert_sql();
    let mut stats = WriteStats::default();
    let mut tx = db.begin().await.context("Failed to open transaction")?;

    for record in records {
        let mut savepoint = Acquire::begin(&mut tx).await?;

        match upsert_one(&mut savepoint, &sql, record).await {
            Ok(outcome) => {
                savepoint.commit().await?;
                stats.record(outcome);
            }
            Err(e) => {
                savepoint.rollback().await?;
                stats.errors += 1;
                if stats.errors <= MAX_LOGGED_ERRORS {
                    warn!("Failed to upsert listing {}: {}", record.id, e);
                }
            }
        }
    }

    tx.commit().await.context("Failed to commit listings")?;

    info!("Write complete: {}", stats);

    Ok(stats)
}

async fn upsert_one(
    conn: &mut PgConnection,
    sql: &str,
    record: &ListingRecord,
) -> Result<UpsertOutcome, sqlx::Error> {
    let inserted = sqlx::query_scalar::<_, bool>(sql)
        .bind(record.id)
        .bind(&record.title)
        .bind(record.price)
        .bind(record.rooms)
        .bind(record.baths)
        .bind(record.area)
        .bind(&record.rent_frequency)
        .bind(&record.location)
        .bind(&record.cover_photo_url)
        .bind(&record.property_url)
        .bind(&record.category)
        .bind(&record.property_type)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(&record.furnishing_status)
        .bind(&record.completion_status)
        .bind(&record.amenities)
        .bind(&record.agency_name)
        .bind(&record.contact_info)
        .bind(&record.geography)
        .bind(&record.agency_logo_url)
        .bind(&record.proxy_mobile)
        .bind(&record.keywords)
        .bind(record.is_verified)
        .bind(&record.purpose)
        .bind(record.floor_number)
        .bind(record.city_level_score)
        .bind(record.score)
        .bind(&record.agency_licenses)
        .bind(record.agency_rating)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(match inserted {
        Some(true) => UpsertOutcome::Inserted,
        Some(false) => UpsertOutcome::Updated,
        None => UpsertOutcome::Stale,
    })
}

/// Newest publication timestamp stored so far
pub async fn max_created_at(db: &PgPool) -> Result<Option<NaiveDateTime>> {
    let latest = sqlx::query_scalar::<_, Option<NaiveDateTime>>(&format!(
        "SELECT MAX(created_at) FROM {}",
        LISTINGS_TABLE
    ))
    .fetch_one(db)
    .await?;

    Ok(latest)
}

pub async fn ensure_run_table(db: &PgPool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id SERIAL PRIMARY KEY,
            script_name TEXT NOT NULL UNIQUE,
            last_run TIMESTAMP,
            last_updated_date TIMESTAMP,
            status TEXT,
            records_processed INTEGER
        )
        "#,
        RUN_TABLE
    ))
    .execute(db)
    .await
    .context("Failed to create run bookkeeping table")?;

    Ok(())
}

/// Upsert for `last_run_info`. The watermark only moves forward; a NULL
/// watermark leaves the stored one alone (`GREATEST` skips NULLs).
pub fn record_run_sql() -> String {
    format!(
        r#"
        INSERT INTO {table} (script_name, last_run, last_updated_date, status, records_processed)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (script_name) DO UPDATE SET
            last_run = EXCLUDED.last_run,
            last_updated_date = GREATEST(EXCLUDED.last_updated_date, {table}.last_updated_date),
            status = EXCLUDED.status,
            records_processed = EXCLUDED.records_processed
        "#,
        table = RUN_TABLE
    )
}

/// Record the outcome of a run. Use `reset_last_updated` to move the
/// watermark back.
pub async fn record_run(
    db: &PgPool,
    script_name: &str,
    status: RunStatus,
    last_updated_date: Option<NaiveDateTime>,
    records_processed: usize,
) -> Result<()> {
    sqlx::query(&record_run_sql())
    .bind(script_name)
    .bind(Utc::now().naive_utc())
    .bind(last_updated_date)
    .bind(status.as_str())
    .bind(i32::try_from(records_processed).unwrap_or(i32::MAX))
    .execute(db)
    .await?;

    debug!("Recorded {} run for {}", status.as_str(), script_name);

    Ok(())
}

/// Watermark of the last successful incremental run
pub async fn last_updated_date(db: &PgPool, script_name: &str) -> Result<Option<NaiveDateTime>> {
    let watermark = sqlx::query_scalar::<_, Option<NaiveDateTime>>(&format!(
        "SELECT last_updated_date FROM {} WHERE script_name = $1",
        RUN_TABLE
    ))
    .bind(script_name)
    .fetch_optional(db)
    .await?;

    Ok(watermark.flatten())
}

pub async fn run_info(db: &PgPool, script_name: &str) -> Result<Option<RunInfo>> {
    let info = sqlx::query_as::<_, RunInfo>(&format!(
        "SELECT script_name, last_run, last_updated_date, status, records_processed FROM {} WHERE script_name = $1",
        RUN_TABLE
    ))
    .bind(script_name)
    .fetch_optional(db)
    .await?;

    Ok(info)
}

/// Move the watermark back (or clear it with `None`) so the next
/// incremental run reloads from there
pub async fn reset_last_updated(
    db: &PgPool,
    script_name: &str,
    to: Option<NaiveDateTime>,
) -> Result<()> {
    sqlx::query(&format!(
        r#"
        INSERT INTO {table} (script_name, last_run, last_updated_date, status, records_processed)
        VALUES ($1, $2, $3, $4, 0)
        ON CONFLICT (script_name) DO UPDATE SET
            last_updated_date = EXCLUDED.last_updated_date,
            status = EXCLUDED.status
        "#,
        table = RUN_TABLE
    ))
    .bind(script_name)
    .bind(Utc::now().naive_utc())
    .bind(to)
    .bind(RunStatus::Reset.as_str())
    .execute(db)
    .await?;

    info!("Reset watermark for {} to {:?}", script_name, to);

    Ok(())
}
