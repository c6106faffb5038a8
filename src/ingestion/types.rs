//! Core data types for the ingestion pipeline
//! Pure data structures with no behavior

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;

/// Raw input for the parser - tagged unions
#[derive(Debug)]
pub enum RawData {
    /// A CSV snapshot on disk
    File(PathBuf),
    /// One JSON document per fetched API page
    Json(Vec<serde_json::Value>),
}

impl RawData {
    pub fn as_file_path(&self) -> anyhow::Result<&PathBuf> {
        match self {
            RawData::File(path) => Ok(path),
            _ => Err(anyhow::anyhow!("Expected File, got {:?}", self)),
        }
    }

    pub fn as_json_pages(&self) -> anyhow::Result<&[serde_json::Value]> {
        match self {
            RawData::Json(pages) => Ok(pages),
            _ => Err(anyhow::anyhow!("Expected Json, got {:?}", self)),
        }
    }
}

/// One listing, shaped like a row of the listings table.
///
/// Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ListingRecord {
    pub id: i64,
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub rooms: Option<i32>,
    pub baths: Option<i32>,
    pub area: Option<Decimal>,
    pub rent_frequency: Option<String>,
    pub location: Option<String>,
    pub cover_photo_url: Option<String>,
    pub property_url: Option<String>,
    pub category: Option<String>,
    pub property_type: Option<String>,
    #[serde(serialize_with = "csv_timestamp::serialize")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(serialize_with = "csv_timestamp::serialize")]
    pub updated_at: Option<NaiveDateTime>,
    pub furnishing_status: Option<String>,
    pub completion_status: Option<String>,
    pub amenities: Option<String>,
    pub agency_name: Option<String>,
    pub contact_info: Option<String>,
    pub geography: Option<String>,
    pub agency_logo_url: Option<String>,
    pub proxy_mobile: Option<String>,
    pub keywords: Option<String>,
    pub is_verified: Option<bool>,
    pub purpose: Option<String>,
    pub floor_number: Option<i32>,
    pub city_level_score: Option<i32>,
    pub score: Option<i32>,
    pub agency_licenses: Option<String>,
    pub agency_rating: Option<Decimal>,
}

impl ListingRecord {
    /// A record carrying only its identifier
    pub fn empty(id: i64) -> Self {
        ListingRecord {
            id,
            title: None,
            price: None,
            rooms: None,
            baths: None,
            area: None,
            rent_frequency: None,
            location: None,
            cover_photo_url: None,
            property_url: None,
            category: None,
            property_type: None,
            created_at: None,
            updated_at: None,
            furnishing_status: None,
            completion_status: None,
            amenities: None,
            agency_name: None,
            contact_info: None,
            geography: None,
            agency_logo_url: None,
            proxy_mobile: None,
            keywords: None,
            is_verified: None,
            purpose: None,
            floor_number: None,
            city_level_score: None,
            score: None,
            agency_licenses: None,
            agency_rating: None,
        }
    }
}

/// Timestamps travel through CSV as `YYYY-MM-DD HH:MM:SS`
pub mod csv_timestamp {
    use chrono::NaiveDateTime;
    use serde::Serializer;

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }
}

/// Header layout a CSV file was written with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnScheme {
    /// snake_case (or normalisable camelCase) column names
    Semantic,
    /// Russian-language headers from the first exporter
    Localized,
    /// `Unnamed: N` headers
    Positional,
}

impl std::fmt::Display for ColumnScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnScheme::Semantic => write!(f, "semantic"),
            ColumnScheme::Localized => write!(f, "localized"),
            ColumnScheme::Positional => write!(f, "positional"),
        }
    }
}

/// Which decoder succeeded on a CSV file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    /// Windows-1251, used by the Russian-language exporter
    Cp1251,
    Latin1,
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextEncoding::Utf8 => write!(f, "utf-8"),
            TextEncoding::Cp1251 => write!(f, "cp1251"),
            TextEncoding::Latin1 => write!(f, "latin-1"),
        }
    }
}

/// Result of reading one CSV file
#[derive(Debug)]
pub struct CsvLoad {
    pub records: Vec<ListingRecord>,
    pub skipped: usize,
    pub scheme: ColumnScheme,
    pub encoding: TextEncoding,
}

/// What happened to a single row on upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Stored row is newer than the incoming one
    Stale,
}

/// Write operation statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteStats {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl WriteStats {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Stale => self.skipped += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }
}

impl std::fmt::Display for WriteStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inserted: {}, updated: {}, skipped: {}, errors: {}",
            self.inserted, self.updated, self.skipped, self.errors
        )
    }
}

/// Row of the `last_run_info` bookkeeping table
#[derive(Debug, sqlx::FromRow)]
pub struct RunInfo {
    pub script_name: String,
    pub last_run: Option<NaiveDateTime>,
    pub last_updated_date: Option<NaiveDateTime>,
    pub status: Option<String>,
    pub records_processed: Option<i32>,
}

/// Status written to `last_run_info`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Failed,
    Reset,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Reset => "reset",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_stats_record() {
        let mut stats = WriteStats::default();
        stats.record(UpsertOutcome::Inserted);
        stats.record(UpsertOutcome::Inserted);
        stats.record(UpsertOutcome::Updated);
        stats.record(UpsertOutcome::Stale);
        stats.errors += 1;

        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.processed(), 4);
        assert_eq!(
            stats.to_string(),
            "inserted: 2, updated: 1, skipped: 1, errors: 1"
        );
    }

    #[test]
    fn test_raw_data_accessors() {
        let raw = RawData::Json(vec![serde_json::json!({"hits": []})]);
        assert_eq!(raw.as_json_pages().unwrap().len(), 1);
        assert!(raw.as_file_path().is_err());
    }
}
