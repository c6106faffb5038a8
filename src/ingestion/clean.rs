//! Encoding repair and lenient type coercion for listing fields

use crate::ingestion::types::{csv_timestamp, TextEncoding};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Markers pandas-era exports wrote for missing values
const NULL_MARKERS: &[&str] = &["nan", "none", "null", "nat", "n/a"];

/// Decode file contents with the preferred decoder: UTF-8 (BOM stripped),
/// then Windows-1251 when the bytes read as Russian text, then Latin-1.
pub fn decode_bytes(bytes: &[u8]) -> (String, TextEncoding) {
    let mut candidates = decode_candidates(bytes);
    candidates.swap_remove(0)
}

/// Every plausible decoding, preferred first. Valid UTF-8 yields only itself;
/// other input yields Windows-1251 and Latin-1 in order of plausibility.
///
/// Neither single-byte decoder can fail, so the list is never empty.
pub fn decode_candidates(bytes: &[u8]) -> Vec<(String, TextEncoding)> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    if let Ok(text) = std::str::from_utf8(body) {
        return vec![(text.to_string(), TextEncoding::Utf8)];
    }

    let (cyrillic, _, _) = encoding_rs::WINDOWS_1251.decode(body);
    let cp1251 = (cyrillic.into_owned(), TextEncoding::Cp1251);
    let latin1 = (body.iter().map(|&b| b as char).collect(), TextEncoding::Latin1);

    if reads_as_cyrillic(&cp1251.0) {
        vec![cp1251, latin1]
    } else {
        vec![latin1, cp1251]
    }
}

/// Windows-1251 misreads of Latin-1 text produce words like `Cafй`, mixing
/// Latin and Cyrillic letters. Real Russian text has whole Cyrillic words.
fn reads_as_cyrillic(text: &str) -> bool {
    let is_cyrillic = |c: char| ('\u{0400}'..='\u{04FF}').contains(&c);
    let (mut whole, mut mixed) = (0usize, 0usize);

    for word in text.split(|c: char| !c.is_alphabetic()) {
        if !word.chars().any(is_cyrillic) {
            continue;
        }
        if word.chars().all(is_cyrillic) {
            whole += 1;
        } else {
            mixed += 1;
        }
    }

    whole > 0 && whole >= mixed
}

/// Clean a free-text field. Returns `None` for blanks and null markers.
pub fn clean_text(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != '\u{feff}' && *c != '\0')
        // Postgres WIN1251/LATIN databases reject astral-plane characters (emoji)
        .map(|c| if (c as u32) > 0xFFFF { ' ' } else { c })
        .collect();
    let trimmed = cleaned.trim();

    if trimmed.is_empty() || NULL_MARKERS.contains(&trimmed.to_lowercase().as_str()) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Normalise a JSON array field. Accepts Python-repr lists (`['a', 'b']`).
/// Unrecoverable input becomes `[]`.
pub fn clean_json_array(raw: &str) -> String {
    let Some(text) = clean_text(raw) else {
        return "[]".to_string();
    };

    let parsed = serde_json::from_str::<Value>(&text)
        .or_else(|_| serde_json::from_str::<Value>(&python_repr_to_json(&text)));

    match parsed {
        Ok(value @ Value::Array(_)) => value.to_string(),
        _ => "[]".to_string(),
    }
}

/// Rewrite a Python `repr` of lists/dicts as JSON. Quotes are converted only
/// at string boundaries and `None`/`True`/`False` only as bare words, so values
/// like `Za'abeel` or `Trueview` survive.
fn python_repr_to_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word = String::new();
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            continue;
        }
        push_bare_word(&mut out, &mut word);

        match c {
            '\'' | '"' => push_string(c, &mut chars, &mut out),
            _ => out.push(c),
        }
    }
    push_bare_word(&mut out, &mut word);

    out
}

fn push_bare_word(out: &mut String, word: &mut String) {
    out.push_str(match word.as_str() {
        "None" => "null",
        "True" => "true",
        "False" => "false",
        other => other,
    });
    word.clear();
}

/// Copy a string literal opened by `quote` as a double-quoted JSON string
fn push_string(quote: char, chars: &mut std::str::Chars<'_>, out: &mut String) {
    out.push('"');
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\'') => out.push('\''),
                Some(escaped) => {
                    out.push('\\');
                    out.push(escaped);
                }
                None => break,
            },
            c if c == quote => break,
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Parse an integer, tolerating float spellings such as `"3.0"`
pub fn coerce_int(raw: &str) -> Option<i32> {
    let text = clean_text(raw)?;
    let text = text.replace(',', "");

    if let Ok(value) = text.parse::<i32>() {
        return Some(value);
    }

    match text.parse::<f64>() {
        Ok(value) if value.is_finite() && value.abs() < i32::MAX as f64 => Some(value.trunc() as i32),
        _ => None,
    }
}

/// Parse a listing identifier
pub fn coerce_id(raw: &str) -> Option<i64> {
    let text = clean_text(raw)?;

    if let Ok(value) = text.parse::<i64>() {
        return Some(value);
    }

    match text.parse::<f64>() {
        Ok(value) if value.is_finite() && value.fract() == 0.0 && value > 0.0 => {
            Some(value as i64)
        }
        _ => None,
    }
}

/// Parse a decimal, stripping thousands separators and currency suffixes
pub fn coerce_decimal(raw: &str) -> Option<Decimal> {
    let text = clean_text(raw)?;
    let text = text
        .replace(',', "")
        .trim_end_matches("AED")
        .trim()
        .to_string();

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Parse a boolean flag
pub fn coerce_bool(raw: &str) -> Option<bool> {
    let text = clean_text(raw)?.to_lowercase();

    match text.as_str() {
        "true" | "t" | "yes" | "y" | "1" | "1.0" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "0.0" => Some(false),
        _ => None,
    }
}

/// Parse a timestamp in any of the layouts the loaders have produced,
/// or epoch seconds.
pub fn coerce_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let text = clean_text(raw)?;

    const LAYOUTS: &[&str] = &[
        csv_timestamp::FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d.%m.%Y %H:%M:%S",
    ];

    for layout in LAYOUTS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(&text, layout) {
            return Some(ts);
        }
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(&text) {
        return Some(ts.naive_utc());
    }

    if let Ok(date) = NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }

    text.parse::<f64>().ok().and_then(epoch_to_timestamp)
}

/// Convert epoch seconds (as the API reports them) to a UTC timestamp
pub fn epoch_to_timestamp(secs: f64) -> Option<NaiveDateTime> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    DateTime::from_timestamp(secs.trunc() as i64, 0).map(|dt| dt.naive_utc())
}

/// Extract a neighbourhood name from a location field.
///
/// Legacy rows store the whole location hierarchy as JSON, e.g.
/// `[{"level": 1, "name": "Dubai"}, {"level": 2, "name": "Business Bay", "type": "neighbourhood"}]`.
/// Preference: `type == "neighbourhood"`, then level 2, then level 1, then the
/// last named entry. Anything that is not a JSON array is plain text.
pub fn neighbourhood_name(location: &str) -> Option<String> {
    let text = clean_text(location)?;

    if !text.starts_with('[') {
        return Some(text);
    }

    let parsed = serde_json::from_str::<Value>(&text)
        .or_else(|_| serde_json::from_str::<Value>(&python_repr_to_json(&text)));

    let entries = match parsed {
        Ok(Value::Array(entries)) => entries,
        _ => return Some(text),
    };

    let name_of = |entry: &Value| {
        entry
            .get("name")
            .and_then(Value::as_str)
            .and_then(clean_text)
    };
    let level_of = |entry: &Value| entry.get("level").and_then(Value::as_i64);

    entries
        .iter()
        .find(|e| e.get("type").and_then(Value::as_str) == Some("neighbourhood"))
        .and_then(name_of)
        .or_else(|| entries.iter().find(|e| level_of(*e) == Some(2)).and_then(name_of))
        .or_else(|| entries.iter().find(|e| level_of(*e) == Some(1)).and_then(name_of))
        .or_else(|| entries.iter().rev().find_map(name_of))
}

/// Parse a geography field into `(latitude, longitude)`.
///
/// Accepts `Latitude: 25.1, Longitude: 55.2`, the Cyrillic-labelled form the
/// first exporter wrote, and bare `25.1, 55.2`.
pub fn parse_geography(geography: &str) -> Option<(f64, f64)> {
    let mut parts = geography.split(',');
    let lat = parts.next().and_then(strip_label)?;
    let lng = parts.next().and_then(strip_label)?;

    if parts.next().is_some() {
        return None;
    }

    let lat: f64 = lat.parse().ok()?;
    let lng: f64 = lng.parse().ok()?;

    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) {
        Some((lat, lng))
    } else {
        None
    }
}

fn strip_label(part: &str) -> Option<&str> {
    let value = match part.split_once(':') {
        Some((_, value)) => value,
        None => part,
    };
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Format a geography field the way the exporter stores it
pub fn format_geography(lat: Option<f64>, lng: Option<f64>) -> Option<String> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(format!("Latitude: {}, Longitude: {}", lat, lng)),
        _ => None,
    }
}

/// Normalise a header into a snake_case column name
pub fn normalize_column_name(header: &str) -> String {
    let mut out = String::with_capacity(header.len() + 4);
    let mut prev_lower = false;

    for c in header.trim().trim_start_matches('\u{feff}').chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        } else {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }

    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_with_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("id,title\n1,Marina Vista\n".as_bytes());

        let (text, encoding) = decode_bytes(&bytes);
        assert_eq!(encoding, TextEncoding::Utf8);
        assert!(text.starts_with("id,title"));
    }

    #[test]
    fn test_decode_falls_back_to_latin1() {
        // 0xE9 is 'é' in Latin-1 and invalid as a lone UTF-8 byte
        let bytes = b"id,title\n1,Caf\xE9 Residence\n";

        let (text, encoding) = decode_bytes(bytes);
        assert_eq!(encoding, TextEncoding::Latin1);
        assert!(text.contains("Café Residence"));
    }

    #[test]
    fn test_decode_windows_1251() {
        let (bytes, _, _) = encoding_rs::WINDOWS_1251.encode("ID,Название,Цена\n5,Студия,500000\n");

        let (text, encoding) = decode_bytes(&bytes);
        assert_eq!(encoding, TextEncoding::Cp1251);
        assert!(text.starts_with("ID,Название,Цена"));
        assert!(text.contains("Студия"));
    }

    #[test]
    fn test_decode_candidates_order() {
        assert_eq!(decode_candidates(b"id\n1\n").len(), 1);

        let latin = decode_candidates(b"id,title\n1,Caf\xE9 Residence\n");
        let order: Vec<TextEncoding> = latin.iter().map(|(_, e)| *e).collect();
        assert_eq!(order, vec![TextEncoding::Latin1, TextEncoding::Cp1251]);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Marina Gate  "), Some("Marina Gate".to_string()));
        assert_eq!(clean_text("nan"), None);
        assert_eq!(clean_text("   "), None);
        assert_eq!(clean_text("\u{feff}Sea view"), Some("Sea view".to_string()));
        assert_eq!(
            clean_text("Pool \u{1F3CA} access"),
            Some("Pool   access".to_string())
        );
    }

    #[test]
    fn test_clean_json_array() {
        assert_eq!(clean_json_array(r#"["a","b"]"#), r#"["a","b"]"#);
        assert_eq!(clean_json_array("['pool', 'gym']"), r#"["pool","gym"]"#);
        assert_eq!(clean_json_array("not json"), "[]");
        assert_eq!(clean_json_array(""), "[]");
        assert_eq!(clean_json_array(r#"{"a": 1}"#), "[]");
    }

    #[test]
    fn test_python_repr_keeps_values_intact() {
        assert_eq!(
            clean_json_array(r#"["Za'abeel", 'Trueview', None, True, False]"#),
            r#"["Za'abeel","Trueview",null,true,false]"#
        );
        assert_eq!(clean_json_array(r#"['it\'s', 'say \"hi\"']"#), r#"["it's","say \"hi\""]"#);

        let location = r#"[{'level': 1, 'name': 'Dubai'}, {'level': 2, 'name': "Za'abeel", 'active': True}]"#;
        assert_eq!(neighbourhood_name(location), Some("Za'abeel".to_string()));
    }

    #[test]
    fn test_coerce_numbers() {
        assert_eq!(coerce_int("3"), Some(3));
        assert_eq!(coerce_int("3.0"), Some(3));
        assert_eq!(coerce_int("nan"), None);
        assert_eq!(coerce_int("studio"), None);

        assert_eq!(coerce_id("7659214"), Some(7_659_214));
        assert_eq!(coerce_id("7659214.0"), Some(7_659_214));
        assert_eq!(coerce_id("abc"), None);

        assert_eq!(coerce_decimal("1,250,000"), Some(Decimal::from(1_250_000)));
        assert_eq!(coerce_decimal("850000 AED"), Some(Decimal::from(850_000)));
        assert_eq!(coerce_decimal("37.5"), Some(Decimal::new(375, 1)));
        assert_eq!(coerce_decimal("1.2e6"), Some(Decimal::from(1_200_000)));
        assert_eq!(coerce_decimal(""), None);
    }

    #[test]
    fn test_coerce_bool() {
        assert_eq!(coerce_bool("True"), Some(true));
        assert_eq!(coerce_bool("t"), Some(true));
        assert_eq!(coerce_bool("0"), Some(false));
        assert_eq!(coerce_bool("maybe"), None);
        assert_eq!(coerce_bool("nan"), None);
    }

    #[test]
    fn test_coerce_timestamp_layouts() {
        let expected = NaiveDate::from_ymd_opt(2025, 5, 12)
            .unwrap()
            .and_hms_opt(9, 33, 12)
            .unwrap();

        assert_eq!(coerce_timestamp("2025-05-12 09:33:12"), Some(expected));
        assert_eq!(coerce_timestamp("2025-05-12T09:33:12"), Some(expected));
        assert_eq!(coerce_timestamp("2025-05-12 09:33:12.000"), Some(expected));
        assert_eq!(coerce_timestamp("1747042392"), Some(expected));
        assert_eq!(
            coerce_timestamp("2025-05-12"),
            NaiveDate::from_ymd_opt(2025, 5, 12).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(coerce_timestamp("yesterday"), None);
    }

    #[test]
    fn test_epoch_zero_is_missing() {
        assert_eq!(epoch_to_timestamp(0.0), None);
    }

    #[test]
    fn test_neighbourhood_from_json_hierarchy() {
        let location = r#"[
            {"id": 1, "level": 0, "externalID": "5001", "name": "UAE"},
            {"id": 2, "level": 1, "externalID": "5002", "name": "Dubai"},
            {"id": 54, "level": 2, "externalID": "5093", "name": "Business Bay", "type": "neighbourhood"},
            {"id": 3517, "level": 3, "externalID": "11881", "name": "Urban Oasis by Missoni"}
        ]"#;

        assert_eq!(neighbourhood_name(location), Some("Business Bay".to_string()));
    }

    #[test]
    fn test_neighbourhood_fallbacks() {
        let level_two = r#"[{"level": 1, "name": "Dubai"}, {"level": 2, "name": "JVC"}]"#;
        assert_eq!(neighbourhood_name(level_two), Some("JVC".to_string()));

        let level_one = "[{'level': 0, 'name': 'UAE'}, {'level': 1, 'name': 'Dubai'}]";
        assert_eq!(neighbourhood_name(level_one), Some("Dubai".to_string()));

        let unlevelled = r#"[{"name": "UAE"}, {"name": "Dubai Marina"}]"#;
        assert_eq!(neighbourhood_name(unlevelled), Some("Dubai Marina".to_string()));

        assert_eq!(
            neighbourhood_name("Jumeirah Village Circle"),
            Some("Jumeirah Village Circle".to_string())
        );
        assert_eq!(neighbourhood_name(""), None);
    }

    #[test]
    fn test_parse_geography() {
        assert_eq!(
            parse_geography("Latitude: 25.1857, Longitude: 55.2634"),
            Some((25.1857, 55.2634))
        );
        assert_eq!(
            parse_geography("Широта: 25.08, Долгота: 55.14"),
            Some((25.08, 55.14))
        );
        assert_eq!(parse_geography("25.2, 55.3"), Some((25.2, 55.3)));
        assert_eq!(parse_geography("Latitude: None, Longitude: None"), None);
        assert_eq!(parse_geography("Latitude: 125.0, Longitude: 55.0"), None);
        assert_eq!(parse_geography(""), None);
    }

    #[test]
    fn test_format_geography() {
        assert_eq!(
            format_geography(Some(25.5), Some(55.25)),
            Some("Latitude: 25.5, Longitude: 55.25".to_string())
        );
        assert_eq!(format_geography(None, Some(55.25)), None);
    }

    #[test]
    fn test_normalize_column_name() {
        assert_eq!(normalize_column_name("rentFrequency"), "rent_frequency");
        assert_eq!(normalize_column_name("Cover Photo URL"), "cover_photo_url");
        assert_eq!(normalize_column_name("  price  "), "price");
        assert_eq!(normalize_column_name("\u{feff}id"), "id");
        assert_eq!(normalize_column_name("agency.rating"), "agency_rating");
    }
}
