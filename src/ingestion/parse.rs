//! Parse functions - transform raw API pages and CSV snapshots into ListingRecord structs

use crate::ingestion::clean::{
    clean_json_array, clean_text, coerce_bool, coerce_decimal, coerce_id, coerce_int,
    coerce_timestamp, decode_candidates, epoch_to_timestamp, format_geography,
};
use crate::ingestion::columns::ColumnMap;
use crate::ingestion::types::{CsvLoad, ListingRecord, RawData, TextEncoding};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Public listing page for an external id
pub const PROPERTY_URL_BASE: &str = "https://www.bayut.com/property/details-";

/// Only the first few row failures are logged
const MAX_LOGGED_ERRORS: usize = 10;

/// One element of the `hits` array
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiHit {
    id: Value,
    #[serde(rename = "externalID")]
    external_id: Option<Value>,
    title: Option<String>,
    price: Option<f64>,
    rooms: Option<f64>,
    baths: Option<f64>,
    area: Option<f64>,
    rent_frequency: Option<String>,
    #[serde(default)]
    location: Vec<ApiLocation>,
    cover_photo: Option<ApiPhoto>,
    #[serde(default)]
    category: Vec<ApiCategory>,
    #[serde(alias = "type")]
    property_type: Option<String>,
    created_at: Option<f64>,
    updated_at: Option<f64>,
    furnishing_status: Option<String>,
    completion_status: Option<String>,
    #[serde(default)]
    amenities: Vec<Value>,
    agency: Option<ApiAgency>,
    phone_number: Option<ApiPhone>,
    geography: Option<ApiGeography>,
    #[serde(default)]
    keywords: Value,
    is_verified: Option<bool>,
    purpose: Option<String>,
    floor_number: Option<f64>,
    city_level_score: Option<f64>,
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiLocation {
    level: Option<i64>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPhoto {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCategory {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiAgency {
    name: Option<String>,
    logo: Option<ApiPhoto>,
    #[serde(default)]
    licenses: Value,
    rating: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPhone {
    mobile: Option<String>,
    whatsapp: Option<String>,
    proxy_mobile: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiGeography {
    lat: Option<f64>,
    lng: Option<f64>,
}

/// Map one API hit into a ListingRecord
pub fn listing_from_hit(hit: &Value) -> Result<ListingRecord> {
    let hit = ApiHit::deserialize(hit).context("Unexpected hit shape")?;

    let id = value_as_id(&hit.id).ok_or_else(|| anyhow::anyhow!("Hit has no usable id"))?;

    // Level 2 is the neighbourhood in the marketplace's hierarchy
    let location = hit
        .location
        .iter()
        .find(|l| l.level == Some(2) && l.name.is_some())
        .or_else(|| hit.location.last())
        .and_then(|l| l.name.as_deref())
        .and_then(clean_text);

    let amenities: Vec<String> = hit
        .amenities
        .iter()
        .filter_map(|a| match a {
            Value::String(s) => clean_text(s),
            Value::Object(_) => a.get("text").and_then(Value::as_str).and_then(clean_text),
            _ => None,
        })
        .collect();

    let contact_info = hit.phone_number.as_ref().map(|p| {
        format!(
            "Phone: {}; WhatsApp: {}",
            p.mobile.as_deref().unwrap_or("?"),
            p.whatsapp.as_deref().unwrap_or("?")
        )
    });

    let geography = hit
        .geography
        .as_ref()
        .and_then(|g| format_geography(g.lat, g.lng));

    let property_url = hit
        .external_id
        .as_ref()
        .and_then(value_as_string)
        .map(|external_id| format!("{}{}.html", PROPERTY_URL_BASE, external_id));

    let agency = hit.agency.as_ref();

    Ok(ListingRecord {
        id,
        title: hit.title.as_deref().and_then(clean_text),
        price: hit.price.and_then(Decimal::from_f64),
        rooms: hit.rooms.map(|r| r as i32),
        baths: hit.baths.map(|b| b as i32),
        area: hit.area.and_then(Decimal::from_f64).map(|a| a.round_dp(2)),
        rent_frequency: hit.rent_frequency.as_deref().and_then(clean_text),
        location,
        cover_photo_url: hit.cover_photo.and_then(|p| p.url),
        property_url,
        category: hit.category.first().and_then(|c| c.name.as_deref()).and_then(clean_text),
        property_type: hit.property_type.as_deref().and_then(clean_text),
        created_at: hit.created_at.and_then(epoch_to_timestamp),
        updated_at: hit.updated_at.and_then(epoch_to_timestamp),
        furnishing_status: hit.furnishing_status.as_deref().and_then(clean_text),
        completion_status: hit.completion_status.as_deref().and_then(clean_text),
        amenities: if amenities.is_empty() {
            None
        } else {
            Some(amenities.join(", "))
        },
        agency_name: agency.and_then(|a| a.name.as_deref()).and_then(clean_text),
        contact_info,
        geography,
        agency_logo_url: agency.and_then(|a| a.logo.as_ref()).and_then(|l| l.url.clone()),
        proxy_mobile: hit.phone_number.as_ref().and_then(|p| p.proxy_mobile.clone()),
        keywords: Some(json_array_text(&hit.keywords)),
        is_verified: hit.is_verified,
        purpose: hit.purpose.as_deref().and_then(clean_text),
        floor_number: hit.floor_number.map(|f| f as i32),
        city_level_score: hit.city_level_score.map(|s| s as i32),
        score: hit.score.map(|s| s as i32),
        agency_licenses: agency.map(|a| json_array_text(&a.licenses)),
        agency_rating: agency
            .and_then(|a| a.rating)
            .and_then(Decimal::from_f64)
            .map(|r| r.round_dp(2)),
    })
}

fn value_as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => coerce_id(s),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => clean_text(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_array_text(value: &Value) -> String {
    match value {
        Value::Array(_) => value.to_string(),
        _ => "[]".to_string(),
    }
}

/// Parse every hit of every fetched page. Unmappable hits are skipped.
pub fn parse_api_pages(raw: &RawData) -> Result<Vec<ListingRecord>> {
    let pages = raw.as_json_pages()?;

    let mut records = Vec::new();
    let mut parse_errors = 0;

    for (page_idx, page) in pages.iter().enumerate() {
        let hits = page
            .get("hits")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for (idx, hit) in hits.iter().enumerate() {
            match listing_from_hit(hit) {
                Ok(record) => records.push(record),
                Err(e) => {
                    parse_errors += 1;
                    if parse_errors <= MAX_LOGGED_ERRORS {
                        warn!("Failed to parse hit {} on page {}: {:#}", idx, page_idx + 1, e);
                    }
                }
            }
        }
    }

    info!(
        "Parsed {} listings from {} API pages ({} errors)",
        records.len(),
        pages.len(),
        parse_errors
    );

    Ok(records)
}

/// Parse a CSV snapshot handed over as `RawData::File`
pub fn parse_csv_snapshot(raw: &RawData) -> Result<CsvLoad> {
    read_listings_csv(raw.as_file_path()?)
}

/// Read a listings CSV written by any exporter generation.
///
/// Bytes that are not UTF-8 are decoded both as Windows-1251 and Latin-1;
/// the decoding whose header row maps the most table columns wins.
pub fn read_listings_csv(path: &Path) -> Result<CsvLoad> {
    info!("Reading listings CSV from {:?}", path);

    let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;

    let mut best: Option<(usize, String, TextEncoding)> = None;
    for (text, encoding) in decode_candidates(&bytes) {
        let recognised = recognised_columns(&text);
        debug!("{} decoding maps {} columns", encoding, recognised);
        if best.as_ref().map_or(true, |(top, _, _)| recognised > *top) {
            best = Some((recognised, text, encoding));
        }
    }

    let (_, text, encoding) = best.context("No decoding produced text")?;
    parse_listings_csv(&text).map(|mut load| {
        load.encoding = encoding;
        load
    })
}

/// Number of table columns the header row of `text` maps to
fn recognised_columns(text: &str) -> usize {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let Ok(headers) = reader.headers() else {
        return 0;
    };
    let headers: Vec<&str> = headers.iter().collect();

    ColumnMap::from_headers(&headers)
        .map(|columns| columns.recognised())
        .unwrap_or(0)
}

/// Parse decoded CSV text
pub fn parse_listings_csv(text: &str) -> Result<CsvLoad> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(str::to_string)
        .collect();

    let columns = ColumnMap::from_headers(&headers)?;
    info!("Detected {} column scheme", columns.scheme);

    let missing = columns.missing_columns();
    if !missing.is_empty() {
        warn!("CSV lacks columns, they will load as NULL: {}", missing.join(", "));
    }

    let mut records = Vec::new();
    let mut skipped = 0;

    for (idx, result) in reader.records().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                skipped += 1;
                if skipped <= MAX_LOGGED_ERRORS {
                    warn!("Failed to read CSV row {}: {}", idx, e);
                }
                continue;
            }
        };

        match record_from_row(&columns, &row) {
            Some(record) => records.push(record),
            None => {
                skipped += 1;
                if skipped <= MAX_LOGGED_ERRORS {
                    warn!("Skipping CSV row {}: no usable listing id", idx);
                }
            }
        }
    }

    info!("Parsed {} listings from CSV ({} skipped)", records.len(), skipped);

    Ok(CsvLoad {
        records,
        skipped,
        scheme: columns.scheme,
        encoding: TextEncoding::Utf8,
    })
}

fn record_from_row(columns: &ColumnMap, row: &csv::StringRecord) -> Option<ListingRecord> {
    let field = |column: &str| columns.index(column).and_then(|idx| row.get(idx));

    let text = |column: &str| field(column).and_then(clean_text);
    let int = |column: &str| field(column).and_then(coerce_int);
    let decimal = |column: &str| field(column).and_then(coerce_decimal);
    let timestamp = |column: &str| field(column).and_then(coerce_timestamp);
    let json_array = |column: &str| field(column).map(clean_json_array);

    let id = field("id").and_then(coerce_id)?;

    Some(ListingRecord {
        id,
        title: text("title"),
        price: decimal("price"),
        rooms: int("rooms"),
        baths: int("baths"),
        area: decimal("area"),
        rent_frequency: text("rent_frequency"),
        location: text("location"),
        cover_photo_url: text("cover_photo_url"),
        property_url: text("property_url"),
        category: text("category"),
        property_type: text("property_type"),
        created_at: timestamp("created_at"),
        updated_at: timestamp("updated_at"),
        furnishing_status: text("furnishing_status"),
        completion_status: text("completion_status"),
        amenities: text("amenities"),
        agency_name: text("agency_name"),
        contact_info: text("contact_info"),
        geography: text("geography"),
        agency_logo_url: text("agency_logo_url"),
        proxy_mobile: text("proxy_mobile"),
        keywords: json_array("keywords"),
        is_verified: field("is_verified").and_then(coerce_bool),
        purpose: text("purpose"),
        floor_number: int("floor_number"),
        city_level_score: int("city_level_score"),
        score: int("score"),
        agency_licenses: json_array("agency_licenses"),
        agency_rating: decimal("agency_rating"),
    })
}

/// Keep listings with `since < created_at <= until`. Listings without a
/// publication timestamp are dropped.
pub fn filter_by_date_range(
    records: Vec<ListingRecord>,
    since: Option<NaiveDateTime>,
    until: NaiveDateTime,
) -> Vec<ListingRecord> {
    records
        .into_iter()
        .filter(|r| match r.created_at {
            Some(created) => since.map_or(true, |s| created > s) && created <= until,
            None => false,
        })
        .collect()
}

/// Collapse records to one per id, keeping the newest `updated_at`.
/// On ties the later record wins. Output preserves first-seen id order.
pub fn dedupe_latest(records: Vec<ListingRecord>) -> Vec<ListingRecord> {
    let mut order: Vec<i64> = Vec::new();
    let mut latest: HashMap<i64, ListingRecord> = HashMap::new();

    for record in records {
        let replaces = latest
            .get(&record.id)
            .map(|existing| is_newer_or_equal(record.updated_at, existing.updated_at));

        match replaces {
            None => {
                order.push(record.id);
                latest.insert(record.id, record);
            }
            Some(true) => {
                latest.insert(record.id, record);
            }
            Some(false) => {}
        }
    }

    order
        .into_iter()
        .filter_map(|id| latest.remove(&id))
        .collect()
}

/// Newer-wins rule shared by in-memory dedupe and the SQL upsert predicate:
/// a missing timestamp on either side never blocks the incoming record.
pub fn is_newer_or_equal(incoming: Option<NaiveDateTime>, stored: Option<NaiveDateTime>) -> bool {
    match (incoming, stored) {
        (Some(incoming), Some(stored)) => incoming >= stored,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::types::ColumnScheme;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::io::Write;

    fn ts(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn sample_hit() -> Value {
        json!({
            "id": 7659214,
            "externalID": "9012345",
            "title": "Spacious studio | Canal view ",
            "price": 720000.0,
            "rooms": 0,
            "baths": 1,
            "area": 37.161216,
            "rentFrequency": null,
            "location": [
                {"level": 0, "name": "UAE"},
                {"level": 1, "name": "Dubai"},
                {"level": 2, "name": "Business Bay", "type": "neighbourhood"},
                {"level": 3, "name": "Urban Oasis"}
            ],
            "coverPhoto": {"url": "https://images.example/cover.jpg"},
            "category": [{"name": "Residential"}, {"name": "Apartments"}],
            "createdAt": 1747042392,
            "updatedAt": 1747128792.0,
            "furnishingStatus": "unfurnished",
            "completionStatus": "off-plan",
            "amenities": [{"text": "Balcony"}, {"text": "Gym"}, "Pool"],
            "agency": {
                "name": "Skyline Realty",
                "logo": {"url": "https://images.example/logo.png"},
                "licenses": [{"number": "1234", "authority": "RERA"}],
                "rating": 4.5
            },
            "phoneNumber": {"mobile": "+971500000000", "whatsapp": "+971500000001", "proxyMobile": "+97140000000"},
            "geography": {"lat": 25.1857, "lng": 55.2634},
            "keywords": ["canal view", "high floor"],
            "isVerified": true,
            "purpose": "for-sale",
            "floorNumber": 12,
            "cityLevelScore": 3,
            "score": 87
        })
    }

    #[test]
    fn test_listing_from_hit() {
        let record = listing_from_hit(&sample_hit()).unwrap();

        assert_eq!(record.id, 7_659_214);
        assert_eq!(record.title.as_deref(), Some("Spacious studio | Canal view"));
        assert_eq!(record.price, Some(Decimal::from(720_000)));
        assert_eq!(record.rooms, Some(0));
        assert_eq!(record.area, Some(Decimal::new(3716, 2)));
        assert_eq!(record.location.as_deref(), Some("Business Bay"));
        assert_eq!(record.category.as_deref(), Some("Residential"));
        assert_eq!(
            record.property_url.as_deref(),
            Some("https://www.bayut.com/property/details-9012345.html")
        );
        assert_eq!(record.created_at, Some(ts(12, 9) + chrono::Duration::seconds(33 * 60 + 12)));
        assert_eq!(record.amenities.as_deref(), Some("Balcony, Gym, Pool"));
        assert_eq!(
            record.contact_info.as_deref(),
            Some("Phone: +971500000000; WhatsApp: +971500000001")
        );
        assert_eq!(
            record.geography.as_deref(),
            Some("Latitude: 25.1857, Longitude: 55.2634")
        );
        assert_eq!(record.keywords.as_deref(), Some(r#"["canal view","high floor"]"#));
        assert_eq!(record.agency_name.as_deref(), Some("Skyline Realty"));
        assert_eq!(record.agency_rating, Some(Decimal::new(45, 1)));
        assert_eq!(record.proxy_mobile.as_deref(), Some("+97140000000"));
        assert_eq!(record.is_verified, Some(true));
        assert_eq!(record.floor_number, Some(12));
    }

    #[test]
    fn test_listing_from_sparse_hit() {
        let hit = json!({"id": "42", "location": [{"level": 1, "name": "Dubai"}]});
        let record = listing_from_hit(&hit).unwrap();

        assert_eq!(record.id, 42);
        assert_eq!(record.location.as_deref(), Some("Dubai"));
        assert_eq!(record.created_at, None);
        assert_eq!(record.keywords.as_deref(), Some("[]"));
        assert_eq!(record.agency_licenses, None);
        assert_eq!(record.contact_info, None);
    }

    #[test]
    fn test_hit_without_id_fails() {
        assert!(listing_from_hit(&json!({"title": "No id"})).is_err());
        assert!(listing_from_hit(&json!({"id": null})).is_err());
    }

    #[test]
    fn test_parse_api_pages_skips_bad_hits() {
        let raw = RawData::Json(vec![
            json!({"hits": [sample_hit(), {"title": "broken"}]}),
            json!({"hits": [{"id": 2}]}),
            json!({"unexpected": true}),
        ]);

        let records = parse_api_pages(&raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, 2);
    }

    #[test]
    fn test_parse_semantic_csv() {
        let csv = "\
id,title,price,rooms,area,created_at,updated_at,is_verified,keywords,location
1,Marina studio,\"650,000\",0.0,35.5,2025-05-12 09:00:00,2025-05-13 09:00:00,True,\"['sea view']\",Dubai Marina
nan,Broken row,1,1,1,,,,,
2,Loft,nan,2,,2025-05-12,,f,,
";
        let load = parse_listings_csv(csv).unwrap();

        assert_eq!(load.scheme, ColumnScheme::Semantic);
        assert_eq!(load.skipped, 1);
        assert_eq!(load.records.len(), 2);

        let first = &load.records[0];
        assert_eq!(first.price, Some(Decimal::from(650_000)));
        assert_eq!(first.rooms, Some(0));
        assert_eq!(first.is_verified, Some(true));
        assert_eq!(first.keywords.as_deref(), Some(r#"["sea view"]"#));
        assert_eq!(first.updated_at, Some(ts(13, 9)));

        let second = &load.records[1];
        assert_eq!(second.price, None);
        assert_eq!(second.created_at, Some(ts(12, 0)));
        assert_eq!(second.is_verified, Some(false));
        assert_eq!(second.keywords.as_deref(), Some("[]"));
        // Column absent from the file stays NULL
        assert_eq!(second.agency_licenses, None);
    }

    #[test]
    fn test_parse_positional_csv() {
        let mut header = vec!["id".to_string()];
        header.extend((1..=31).map(|n| format!("Unnamed: {}", n)));

        let mut row = vec![String::new(); 32];
        row[0] = "77".to_string();
        row[1] = "Positional title".to_string();
        row[2] = "990000".to_string();
        row[7] = r#"[{"level": 1, "name": "Dubai"}, {"level": 2, "name": "JLT"}]"#.to_string();
        row[13] = "2025-05-13 09:00:00".to_string();
        row[18] = "Agency".to_string();
        row[21] = "duplicate agency".to_string();

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&header).unwrap();
        writer.write_record(&row).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();

        let load = parse_listings_csv(&text).unwrap();
        assert_eq!(load.scheme, ColumnScheme::Positional);

        let record = &load.records[0];
        assert_eq!(record.id, 77);
        assert_eq!(record.title.as_deref(), Some("Positional title"));
        assert_eq!(record.price, Some(Decimal::from(990_000)));
        assert!(record.location.as_deref().unwrap().contains("JLT"));
        assert_eq!(record.updated_at, Some(ts(13, 9)));
        assert_eq!(record.agency_name.as_deref(), Some("Agency"));
    }

    #[test]
    fn test_parse_localized_csv() {
        let csv = "ID,Название,Цена,Дата публикации,Описание\n5,Студия,500000,2025-05-12 09:00:00,Текст\n";
        let load = parse_listings_csv(csv).unwrap();

        assert_eq!(load.scheme, ColumnScheme::Localized);
        assert_eq!(load.records[0].title.as_deref(), Some("Студия"));
        assert_eq!(load.records[0].created_at, Some(ts(12, 9)));
    }

    #[test]
    fn test_csv_without_id_column_fails() {
        assert!(parse_listings_csv("title,price\nA,1\n").is_err());
    }

    #[test]
    fn test_read_latin1_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"id,title\n9,Caf\xE9 Tower\n").unwrap();

        let load = read_listings_csv(file.path()).unwrap();
        assert_eq!(load.encoding, TextEncoding::Latin1);
        assert_eq!(load.records[0].title.as_deref(), Some("Café Tower"));
    }

    #[test]
    fn test_read_windows_1251_file_with_russian_headers() {
        let (bytes, _, _) = encoding_rs::WINDOWS_1251
            .encode("ID,Название,Цена,Последнее обновление\n5,Студия,500000,2025-05-13 09:00:00\n");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();

        let load = read_listings_csv(file.path()).unwrap();
        assert_eq!(load.encoding, TextEncoding::Cp1251);
        assert_eq!(load.scheme, ColumnScheme::Localized);

        let record = &load.records[0];
        assert_eq!(record.id, 5);
        assert_eq!(record.title.as_deref(), Some("Студия"));
        assert_eq!(record.price, Some(Decimal::from(500_000)));
        assert_eq!(record.updated_at, Some(ts(13, 9)));
    }

    #[test]
    fn test_parse_csv_snapshot_from_raw_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"id,title\n3,Marina Gate\n").unwrap();

        let raw = RawData::File(file.path().to_path_buf());
        let load = parse_csv_snapshot(&raw).unwrap();
        assert_eq!(load.records[0].title.as_deref(), Some("Marina Gate"));

        assert!(parse_csv_snapshot(&RawData::Json(vec![])).is_err());
    }

    #[test]
    fn test_filter_by_date_range() {
        let mut early = ListingRecord::empty(1);
        early.created_at = Some(ts(10, 0));
        let mut inside = ListingRecord::empty(2);
        inside.created_at = Some(ts(12, 0));
        let mut boundary = ListingRecord::empty(3);
        boundary.created_at = Some(ts(14, 0));
        let undated = ListingRecord::empty(4);

        let kept = filter_by_date_range(
            vec![early, inside, boundary, undated],
            Some(ts(10, 0)),
            ts(14, 0),
        );
        let ids: Vec<i64> = kept.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_dedupe_latest_keeps_newest() {
        let mut old = ListingRecord::empty(1);
        old.updated_at = Some(ts(12, 0));
        old.title = Some("old".to_string());

        let mut new = ListingRecord::empty(1);
        new.updated_at = Some(ts(13, 0));
        new.title = Some("new".to_string());

        let mut older_again = ListingRecord::empty(1);
        older_again.updated_at = Some(ts(11, 0));
        older_again.title = Some("older".to_string());

        let other = ListingRecord::empty(2);

        let deduped = dedupe_latest(vec![old, other, new, older_again]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, 1);
        assert_eq!(deduped[0].title.as_deref(), Some("new"));
        assert_eq!(deduped[1].id, 2);
    }

    #[test]
    fn test_is_newer_or_equal() {
        assert!(is_newer_or_equal(Some(ts(13, 0)), Some(ts(12, 0))));
        assert!(is_newer_or_equal(Some(ts(12, 0)), Some(ts(12, 0))));
        assert!(!is_newer_or_equal(Some(ts(11, 0)), Some(ts(12, 0))));
        assert!(is_newer_or_equal(None, Some(ts(12, 0))));
        assert!(is_newer_or_equal(Some(ts(12, 0)), None));
    }
}
