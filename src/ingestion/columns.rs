//! Column mapping for the CSV header layouts found in listing snapshots

use crate::ingestion::clean::normalize_column_name;
use crate::ingestion::types::ColumnScheme;
use std::collections::HashMap;
use thiserror::Error;

/// Table columns in CSV/insert order
pub const LISTING_COLUMNS: &[&str] = &[
    "id",
    "title",
    "price",
    "rooms",
    "baths",
    "area",
    "rent_frequency",
    "location",
    "cover_photo_url",
    "property_url",
    "category",
    "property_type",
    "created_at",
    "updated_at",
    "furnishing_status",
    "completion_status",
    "amenities",
    "agency_name",
    "contact_info",
    "geography",
    "agency_logo_url",
    "proxy_mobile",
    "keywords",
    "is_verified",
    "purpose",
    "floor_number",
    "city_level_score",
    "score",
    "agency_licenses",
    "agency_rating",
];

/// `Unnamed: N` position -> column. Positions 17 and 21 held duplicated
/// fields and are ignored.
const POSITIONAL_COLUMNS: &[(usize, &str)] = &[
    (1, "title"),
    (2, "price"),
    (3, "rooms"),
    (4, "baths"),
    (5, "area"),
    (6, "rent_frequency"),
    (7, "location"),
    (8, "cover_photo_url"),
    (9, "property_url"),
    (10, "category"),
    (11, "property_type"),
    (12, "created_at"),
    (13, "updated_at"),
    (14, "furnishing_status"),
    (15, "completion_status"),
    (16, "amenities"),
    (18, "agency_name"),
    (19, "contact_info"),
    (20, "geography"),
    (22, "agency_logo_url"),
    (23, "proxy_mobile"),
    (24, "keywords"),
    (25, "is_verified"),
    (26, "purpose"),
    (27, "floor_number"),
    (28, "city_level_score"),
    (29, "score"),
    (30, "agency_licenses"),
    (31, "agency_rating"),
];

/// Russian headers written by the first exporter. Headers whose content never
/// matched a table column (description, view/photo counters) are not mapped.
const LOCALIZED_COLUMNS: &[(&str, &str)] = &[
    ("ID", "id"),
    ("Название", "title"),
    ("Цена", "price"),
    ("Комнат", "rooms"),
    ("Ванных", "baths"),
    ("Площадь", "area"),
    ("Локация", "location"),
    ("Фото", "cover_photo_url"),
    ("Ссылка на объявление", "property_url"),
    ("Категория", "category"),
    ("Тип недвижимости", "property_type"),
    ("Дата публикации", "created_at"),
    ("Последнее обновление", "updated_at"),
    ("Статус строительства", "completion_status"),
    ("Особенности", "amenities"),
    ("Застройщик", "agency_name"),
    ("Контакты", "contact_info"),
    ("Координаты", "geography"),
    ("Логотип застройщика", "agency_logo_url"),
    ("Статус верификации", "is_verified"),
    ("Ключевые слова", "keywords"),
    ("Счетчик этажей", "floor_number"),
    ("Лицензии застройщика", "agency_licenses"),
    ("Рейтинг застройщика", "agency_rating"),
];

/// Aliases seen in semantic-style exports
const SEMANTIC_ALIASES: &[(&str, &str)] = &[
    ("bedrooms", "rooms"),
    ("bathrooms", "baths"),
    ("size", "area"),
    ("type", "property_type"),
    ("cover_photo", "cover_photo_url"),
    ("url", "property_url"),
    ("agency_logo", "agency_logo_url"),
    ("floor", "floor_number"),
    ("creation_date", "created_at"),
    ("update_date", "updated_at"),
    ("verified", "is_verified"),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CsvSchemaError {
    #[error("CSV has no header row")]
    NoHeaders,

    #[error("CSV ({scheme}) has no listing id column")]
    MissingId { scheme: ColumnScheme },
}

/// Resolved header: table column -> CSV field index
#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub scheme: ColumnScheme,
    indices: HashMap<&'static str, usize>,
}

impl ColumnMap {
    /// Detect the scheme from the header row and map every known column
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> Result<Self, CsvSchemaError> {
        if headers.is_empty() {
            return Err(CsvSchemaError::NoHeaders);
        }

        let headers: Vec<&str> = headers
            .iter()
            .map(|h| h.as_ref().trim().trim_start_matches('\u{feff}'))
            .collect();

        let scheme = detect_scheme(&headers);
        let mut indices = HashMap::new();

        for (idx, header) in headers.iter().enumerate() {
            let column = match scheme {
                ColumnScheme::Positional => positional_column(header),
                ColumnScheme::Localized => localized_column(header),
                ColumnScheme::Semantic => semantic_column(header),
            };

            if let Some(column) = column {
                // First occurrence wins for duplicated headers
                indices.entry(column).or_insert(idx);
            }
        }

        if !indices.contains_key("id") {
            return Err(CsvSchemaError::MissingId { scheme });
        }

        Ok(ColumnMap { scheme, indices })
    }

    /// Field index of a table column, if the CSV carries it
    pub fn index(&self, column: &str) -> Option<usize> {
        self.indices.get(column).copied()
    }

    /// How many table columns the header maps
    pub fn recognised(&self) -> usize {
        self.indices.len()
    }

    /// Table columns this CSV does not provide
    pub fn missing_columns(&self) -> Vec<&'static str> {
        LISTING_COLUMNS
            .iter()
            .copied()
            .filter(|c| !self.indices.contains_key(c))
            .collect()
    }
}

fn detect_scheme(headers: &[&str]) -> ColumnScheme {
    if headers.iter().any(|h| h.starts_with("Unnamed:")) {
        ColumnScheme::Positional
    } else if headers
        .iter()
        .any(|h| *h != "ID" && localized_column(h).is_some())
    {
        ColumnScheme::Localized
    } else {
        ColumnScheme::Semantic
    }
}

fn positional_column(header: &str) -> Option<&'static str> {
    if let Some(position) = header.strip_prefix("Unnamed:") {
        let position: usize = position.trim().parse().ok()?;
        return POSITIONAL_COLUMNS
            .iter()
            .find(|(p, _)| *p == position)
            .map(|(_, column)| *column);
    }

    // The id column kept its name in positional exports
    semantic_column(header).filter(|c| *c == "id")
}

fn localized_column(header: &str) -> Option<&'static str> {
    LOCALIZED_COLUMNS
        .iter()
        .find(|(h, _)| *h == header)
        .map(|(_, column)| *column)
}

fn semantic_column(header: &str) -> Option<&'static str> {
    let normalized = normalize_column_name(header);

    LISTING_COLUMNS
        .iter()
        .copied()
        .find(|c| *c == normalized)
        .or_else(|| {
            SEMANTIC_ALIASES
                .iter()
                .find(|(alias, _)| *alias == normalized)
                .map(|(_, column)| *column)
        })
}
