//! Read-only HTTP API over the listings table

use crate::ingestion::clean::{neighbourhood_name, parse_geography};
use crate::ingestion::write::{select_columns, LISTINGS_TABLE};
use crate::ingestion::ListingRecord;
use crate::reports::cheapest::{self, CheapestReport};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;
use tower_http::cors::CorsLayer;
use tracing::error;

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 1000;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
}

#[derive(Serialize, Deserialize)]
pub struct ApiResponse {
    pub message: String,
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageParams {
    /// Limit clamped to `1..=MAX_PAGE_SIZE`, offset to `>= 0`
    pub fn resolve(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

#[derive(Serialize)]
pub struct ListingsPage {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub data: Vec<ListingRecord>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct LocationPrice {
    pub location: Option<String>,
    pub avg_price: Option<Decimal>,
    pub count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PropertyTypeCount {
    pub property_type: String,
    pub count: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct MapRow {
    pub id: i64,
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub area: Option<Decimal>,
    pub property_type: Option<String>,
    pub geography: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheapestParams {
    pub max_area: Option<Decimal>,
    pub per_location: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/api/health", get(health_check))
        .route("/api/properties", get(get_properties))
        .route("/api/properties/:id", get(get_property))
        .route("/api/stats/avg_price_by_location", get(avg_price_by_location))
        .route("/api/stats/count_by_property_type", get(count_by_property_type))
        .route("/api/map_data", get(map_data))
        .route("/api/reports/cheapest", get(cheapest_report))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn internal_error(e: impl std::fmt::Display) -> StatusCode {
    error!("Database error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn health_check() -> Json<ApiResponse> {
    Json(ApiResponse {
        message: "Listings API is running!".to_string(),
        status: "ok".to_string(),
    })
}

async fn get_properties(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<ListingsPage>, StatusCode> {
    let (limit, offset) = params.resolve();

    let data = sqlx::query_as::<_, ListingRecord>(&format!(
        "SELECT {} FROM {} ORDER BY id LIMIT $1 OFFSET $2",
        select_columns(),
        LISTINGS_TABLE
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await
    .map_err(internal_error)?;

    let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", LISTINGS_TABLE))
        .fetch_one(&state.db)
        .await
        .map_err(internal_error)?;

    Ok(Json(ListingsPage {
        total,
        limit,
        offset,
        data,
    }))
}

async fn get_property(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ListingRecord>, StatusCode> {
    let listing = sqlx::query_as::<_, ListingRecord>(&format!(
        "SELECT {} FROM {} WHERE id = $1",
        select_columns(),
        LISTINGS_TABLE
    ))
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(internal_error)?;

    listing.map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn avg_price_by_location(
    State(state): State<AppState>,
) -> Result<Json<Vec<LocationPrice>>, StatusCode> {
    let rows = sqlx::query_as::<_, (Option<String>, Decimal)>(&format!(
        "SELECT location, price FROM {} WHERE price > 0",
        LISTINGS_TABLE
    ))
    .fetch_all(&state.db)
    .await
    .map_err(internal_error)?;

    Ok(Json(average_price_by_location(rows)))
}

/// Average price per neighbourhood, largest groups first. Locations stored as
/// JSON hierarchies group with their plain-name spelling.
pub fn average_price_by_location(rows: Vec<(Option<String>, Decimal)>) -> Vec<LocationPrice> {
    let mut groups: BTreeMap<Option<String>, (Decimal, i64)> = BTreeMap::new();

    for (location, price) in rows {
        let key = location.as_deref().and_then(neighbourhood_name);
        let (sum, count) = groups.entry(key).or_insert((Decimal::ZERO, 0));
        *sum += price;
        *count += 1;
    }

    let mut averages: Vec<LocationPrice> = groups
        .into_iter()
        .map(|(location, (sum, count))| LocationPrice {
            location,
            avg_price: Some((sum / Decimal::from(count)).round_dp(2)),
            count,
        })
        .collect();

    averages.sort_by(|a, b| b.count.cmp(&a.count));
    averages
}

async fn count_by_property_type(
    State(state): State<AppState>,
) -> Result<Json<Vec<PropertyTypeCount>>, StatusCode> {
    let rows = sqlx::query_as::<_, PropertyTypeCount>(&format!(
        r#"
        SELECT COALESCE(property_type, 'unknown') AS property_type, COUNT(*) AS count
        FROM {}
        GROUP BY 1
        ORDER BY count DESC, 1
        "#,
        LISTINGS_TABLE
    ))
    .fetch_all(&state.db)
    .await
    .map_err(internal_error)?;

    Ok(Json(rows))
}

async fn map_data(State(state): State<AppState>) -> Result<Json<FeatureCollection>, StatusCode> {
    let rows = sqlx::query_as::<_, MapRow>(&format!(
        "SELECT id, title, price, area, property_type, geography FROM {} WHERE geography IS NOT NULL",
        LISTINGS_TABLE
    ))
    .fetch_all(&state.db)
    .await
    .map_err(internal_error)?;

    Ok(Json(feature_collection(rows)))
}

async fn cheapest_report(
    State(state): State<AppState>,
    Query(params): Query<CheapestParams>,
) -> Result<Json<CheapestReport>, StatusCode> {
    let max_area = params
        .max_area
        .unwrap_or_else(|| Decimal::from(cheapest::DEFAULT_MAX_AREA));
    let per_location = params
        .per_location
        .unwrap_or(cheapest::DEFAULT_PER_LOCATION)
        .max(1);

    let candidates = cheapest::fetch_candidates(&state.db, max_area)
        .await
        .map_err(internal_error)?;

    Ok(Json(CheapestReport::build(candidates, per_location)))
}

/// GeoJSON points for every row with a parseable geography
pub fn feature_collection(rows: Vec<MapRow>) -> FeatureCollection {
    let features = rows
        .into_iter()
        .filter_map(|row| {
            let (lat, lng) = row.geography.as_deref().and_then(parse_geography)?;

            let mut properties = JsonObject::new();
            properties.insert("id".to_string(), row.id.into());
            properties.insert("title".to_string(), serde_json::json!(row.title));
            properties.insert("price".to_string(), serde_json::json!(row.price));
            properties.insert("area".to_string(), serde_json::json!(row.area));
            properties.insert("property_type".to_string(), serde_json::json!(row.property_type));

            Some(Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::Point(vec![lng, lat]))),
                id: Some(geojson::feature::Id::Number(row.id.into())),
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
