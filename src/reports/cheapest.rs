//! Cheapest small apartments per region, for the Telegram channel and the read API

use crate::ingestion::clean::{neighbourhood_name, parse_geography};
use crate::ingestion::parse::PROPERTY_URL_BASE;
use crate::ingestion::write::LISTINGS_TABLE;
use crate::telegram::InlineKeyboardButton;
use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::BTreeMap;
use tracing::info;

pub const DEFAULT_MAX_AREA: i64 = 40;
pub const DEFAULT_PER_LOCATION: usize = 3;
pub const MAX_BUTTONS: usize = 12;

/// Listing eligible for the report
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Candidate {
    pub id: i64,
    pub title: Option<String>,
    pub location: Option<String>,
    pub area: Option<Decimal>,
    pub price: Decimal,
    pub property_url: Option<String>,
    pub cover_photo_url: Option<String>,
    pub geography: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedListing {
    pub region: String,
    /// 1-based position within the region
    pub rank: usize,
    pub id: i64,
    pub title: Option<String>,
    pub price: Decimal,
    pub area: Option<Decimal>,
    pub url: String,
    pub cover_photo_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSummary {
    pub region: String,
    pub count: usize,
    pub min_price: Decimal,
    pub avg_price: Decimal,
    pub max_price: Decimal,
    pub cheapest_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheapestReport {
    pub regions: Vec<RegionSummary>,
    pub listings: Vec<RankedListing>,
}

impl CheapestReport {
    pub fn build(candidates: Vec<Candidate>, per_location: usize) -> Self {
        let listings = rank_cheapest(candidates, per_location);
        let regions = summarize_regions(&listings);
        CheapestReport { regions, listings }
    }

    /// Cover photo of the cheapest listing that has one
    pub fn cover_photo(&self) -> Option<&str> {
        self.listings
            .iter()
            .filter(|l| l.cover_photo_url.is_some())
            .min_by(|a, b| a.price.cmp(&b.price))
            .and_then(|l| l.cover_photo_url.as_deref())
    }
}

/// Listings with a positive price and `area <= max_area`, cheapest first
pub async fn fetch_candidates(db: &PgPool, max_area: Decimal) -> Result<Vec<Candidate>> {
    let candidates = sqlx::query_as::<_, Candidate>(&format!(
        r#"
        SELECT id, title, location, area, price, property_url, cover_photo_url, geography
        FROM {}
        WHERE area <= $1 AND price > 0
        ORDER BY price ASC, id ASC
        "#,
        LISTINGS_TABLE
    ))
    .bind(max_area)
    .fetch_all(db)
    .await?;

    info!("Found {} listings up to {} sqm", candidates.len(), max_area);

    Ok(candidates)
}

/// Group by neighbourhood and keep the `per_location` cheapest of each.
/// Output is ordered by region name, then rank.
pub fn rank_cheapest(candidates: Vec<Candidate>, per_location: usize) -> Vec<RankedListing> {
    let mut by_region: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();

    for candidate in candidates {
        let Some(region) = candidate.location.as_deref().and_then(neighbourhood_name) else {
            continue;
        };
        by_region.entry(region).or_default().push(candidate);
    }

    let mut ranked = Vec::new();
    for (region, mut group) in by_region {
        group.sort_by(|a, b| a.price.cmp(&b.price).then(a.id.cmp(&b.id)));

        for (idx, candidate) in group.into_iter().take(per_location).enumerate() {
            let coordinates = candidate.geography.as_deref().and_then(parse_geography);

            ranked.push(RankedListing {
                region: region.clone(),
                rank: idx + 1,
                id: candidate.id,
                title: candidate.title,
                price: candidate.price,
                area: candidate.area,
                url: candidate
                    .property_url
                    .unwrap_or_else(|| format!("{}{}.html", PROPERTY_URL_BASE, candidate.id)),
                cover_photo_url: candidate.cover_photo_url,
                latitude: coordinates.map(|(lat, _)| lat),
                longitude: coordinates.map(|(_, lng)| lng),
            });
        }
    }

    ranked
}

/// Per-region price statistics, cheapest region first
pub fn summarize_regions(ranked: &[RankedListing]) -> Vec<RegionSummary> {
    let mut groups: BTreeMap<&str, Vec<&RankedListing>> = BTreeMap::new();
    for listing in ranked {
        groups.entry(listing.region.as_str()).or_default().push(listing);
    }

    let mut summaries: Vec<RegionSummary> = groups
        .into_iter()
        .filter_map(|(region, listings)| {
            let cheapest = listings
                .iter()
                .min_by(|a, b| a.price.cmp(&b.price).then(a.rank.cmp(&b.rank)))?;
            let total: Decimal = listings.iter().map(|l| l.price).sum();
            let max_price = listings.iter().map(|l| l.price).max()?;

            Some(RegionSummary {
                region: region.to_string(),
                count: listings.len(),
                min_price: cheapest.price,
                avg_price: (total / Decimal::from(listings.len())).round_dp(0),
                max_price,
                cheapest_url: cheapest.url.clone(),
            })
        })
        .collect();

    summaries.sort_by(|a, b| a.min_price.cmp(&b.min_price).then_with(|| a.region.cmp(&b.region)));
    summaries
}

/// One link button per region, cheapest regions first
pub fn inline_keyboard(summaries: &[RegionSummary], max_buttons: usize) -> Vec<Vec<InlineKeyboardButton>> {
    summaries
        .iter()
        .take(max_buttons)
        .map(|s| {
            vec![InlineKeyboardButton {
                text: format!("{}: {} AED", s.region, format_price(s.min_price)),
                url: s.cheapest_url.clone(),
            }]
        })
        .collect()
}

/// HTML caption listing region statistics, kept within `max_chars`
pub fn render_caption(
    summaries: &[RegionSummary],
    max_area: Decimal,
    date: NaiveDate,
    max_chars: usize,
) -> String {
    let mut caption = format!(
        "<b>Cheapest apartments up to {} sqm by region</b>\n{}\n",
        max_area.normalize(),
        date.format("%Y-%m-%d")
    );

    if summaries.is_empty() {
        caption.push_str("\nNo listings matched.");
        return caption;
    }

    let more_line = |n: usize| format!("\n…and {} more regions", n);

    for (idx, summary) in summaries.iter().enumerate() {
        let line = format!(
            "\n<b>{}</b>: min {} AED, avg {} AED",
            escape_html(&summary.region),
            format_price(summary.min_price),
            format_price(summary.avg_price)
        );

        let left_after = summaries.len() - idx - 1;
        let reserve = if left_after > 0 {
            more_line(left_after).chars().count()
        } else {
            0
        };

        if caption.chars().count() + line.chars().count() + reserve > max_chars {
            caption.push_str(&more_line(summaries.len() - idx));
            break;
        }
        caption.push_str(&line);
    }

    caption
}

/// Plain-text listing of every ranked apartment, grouped by region
pub fn render_text_report(ranked: &[RankedListing]) -> String {
    if ranked.is_empty() {
        return "No apartments matched.".to_string();
    }

    let mut out = String::new();
    let mut current_region: Option<&str> = None;

    for listing in ranked {
        if current_region != Some(listing.region.as_str()) {
            if current_region.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("Region: {}\n{}\n", listing.region, "-".repeat(30)));
            current_region = Some(listing.region.as_str());
        }

        out.push_str(&format!(
            "{}. {}\n   ID: {}\n   Price: {} AED\n   Area: {} sqm\n   Link: {}\n",
            listing.rank,
            listing.title.as_deref().unwrap_or("(untitled)"),
            listing.id,
            format_price(listing.price),
            listing
                .area
                .map(|a| a.round_dp(2).to_string())
                .unwrap_or_else(|| "?".to_string()),
            listing.url
        ));
    }

    out
}

/// Whole-unit price with thousands separators, e.g. `1,234,567`
pub fn format_price(price: Decimal) -> String {
    let digits = price.trunc().abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);

    for (idx, c) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    if price.is_sign_negative() && !price.trunc().is_zero() {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::CAPTION_LIMIT;

    fn candidate(id: i64, location: &str, price: i64) -> Candidate {
        Candidate {
            id,
            title: Some(format!("Listing {}", id)),
            location: Some(location.to_string()),
            area: Some(Decimal::from(35)),
            price: Decimal::from(price),
            property_url: Some(format!("https://www.bayut.com/property/details-{}.html", id)),
            cover_photo_url: None,
            geography: Some("Latitude: 25.05, Longitude: 55.2".to_string()),
        }
    }

    fn summary(region: &str, min_price: i64) -> RegionSummary {
        RegionSummary {
            region: region.to_string(),
            count: 1,
            min_price: Decimal::from(min_price),
            avg_price: Decimal::from(min_price),
            max_price: Decimal::from(min_price),
            cheapest_url: format!("https://example.test/{}", region),
        }
    }

    #[test]
    fn test_rank_cheapest_keeps_top_n_per_region() {
        let candidates = vec![
            candidate(1, "JVC", 500_000),
            candidate(2, "JVC", 450_000),
            candidate(3, "JVC", 700_000),
            candidate(4, "JVC", 480_000),
            candidate(5, "Dubai Marina", 900_000),
            candidate(6, r#"[{"level": 1, "name": "Dubai"}, {"level": 2, "name": "JVC"}]"#, 460_000),
        ];

        let ranked = rank_cheapest(candidates, 3);
        let jvc: Vec<(usize, i64)> = ranked
            .iter()
            .filter(|l| l.region == "JVC")
            .map(|l| (l.rank, l.id))
            .collect();

        assert_eq!(jvc, vec![(1, 2), (2, 6), (3, 4)]);
        assert_eq!(ranked[0].region, "Dubai Marina");
        assert_eq!(ranked.len(), 4);
        assert_eq!(ranked[0].latitude, Some(25.05));
    }

    #[test]
    fn test_rank_cheapest_skips_missing_location() {
        let mut orphan = candidate(1, "", 100);
        orphan.location = None;
        let blank = candidate(2, "nan", 100);

        assert!(rank_cheapest(vec![orphan, blank], 3).is_empty());
    }

    #[test]
    fn test_ranked_url_falls_back_to_id() {
        let mut c = candidate(77, "JLT", 300_000);
        c.property_url = None;

        let ranked = rank_cheapest(vec![c], 3);
        assert_eq!(ranked[0].url, "https://www.bayut.com/property/details-77.html");
    }

    #[test]
    fn test_summarize_regions() {
        let ranked = rank_cheapest(
            vec![
                candidate(1, "JVC", 400_000),
                candidate(2, "JVC", 500_001),
                candidate(3, "Arjan", 350_000),
            ],
            3,
        );

        let summaries = summarize_regions(&ranked);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].region, "Arjan");

        let jvc = &summaries[1];
        assert_eq!(jvc.count, 2);
        assert_eq!(jvc.min_price, Decimal::from(400_000));
        assert_eq!(jvc.max_price, Decimal::from(500_001));
        assert_eq!(jvc.avg_price, Decimal::from(450_000));
        assert_eq!(jvc.cheapest_url, "https://www.bayut.com/property/details-1.html");
    }

    #[test]
    fn test_inline_keyboard_limits_buttons() {
        let summaries: Vec<RegionSummary> = (0..20)
            .map(|i| summary(&format!("Region {}", i), 100_000 + i * 1_000))
            .collect();

        let keyboard = inline_keyboard(&summaries, MAX_BUTTONS);
        assert_eq!(keyboard.len(), 12);
        assert!(keyboard.iter().all(|row| row.len() == 1));
        assert_eq!(keyboard[0][0].text, "Region 0: 100,000 AED");
        assert_eq!(keyboard[0][0].url, "https://example.test/Region 0");
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(Decimal::from(1_234_567)), "1,234,567");
        assert_eq!(format_price(Decimal::from(999)), "999");
        assert_eq!(format_price(Decimal::from(1_000)), "1,000");
        assert_eq!(format_price(Decimal::new(45_000_099, 2)), "450,000");
        assert_eq!(format_price(Decimal::ZERO), "0");
        assert_eq!(format_price(Decimal::from(-12_500)), "-12,500");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("Al <Barsha> & \"Co\""), "Al &lt;Barsha&gt; &amp; &quot;Co&quot;");
    }

    #[test]
    fn test_render_caption() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 12).unwrap();
        let caption = render_caption(
            &[summary("Arjan", 350_000), summary("A&B", 400_000)],
            Decimal::from(40),
            date,
            CAPTION_LIMIT,
        );

        assert!(caption.starts_with("<b>Cheapest apartments up to 40 sqm by region</b>\n2025-05-12\n"));
        assert!(caption.contains("<b>Arjan</b>: min 350,000 AED, avg 350,000 AED"));
        assert!(caption.contains("<b>A&amp;B</b>"));
    }

    #[test]
    fn test_render_caption_stays_within_limit() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 12).unwrap();
        let summaries: Vec<RegionSummary> = (0..200)
            .map(|i| summary(&format!("Neighbourhood number {}", i), 100_000 + i))
            .collect();

        let caption = render_caption(&summaries, Decimal::from(40), date, CAPTION_LIMIT);
        assert!(caption.chars().count() <= CAPTION_LIMIT);
        assert!(caption.contains("more regions"));
    }

    #[test]
    fn test_cover_photo_picks_cheapest_with_photo() {
        let mut cheap = candidate(1, "JVC", 100_000);
        cheap.cover_photo_url = None;
        let mut pricier = candidate(2, "JLT", 200_000);
        pricier.cover_photo_url = Some("https://images.example/2.jpg".to_string());
        let mut priciest = candidate(3, "Arjan", 300_000);
        priciest.cover_photo_url = Some("https://images.example/3.jpg".to_string());

        let report = CheapestReport::build(vec![cheap, pricier, priciest], 3);
        assert_eq!(report.cover_photo(), Some("https://images.example/2.jpg"));
    }

    #[test]
    fn test_render_text_report() {
        let ranked = rank_cheapest(vec![candidate(1, "JVC", 400_000), candidate(2, "Arjan", 1_200_000)], 3);
        let text = render_text_report(&ranked);

        assert!(text.starts_with("Region: Arjan\n"));
        assert!(text.contains("   Price: 1,200,000 AED\n"));
        assert!(text.contains("Region: JVC\n"));
        assert_eq!(render_text_report(&[]), "No apartments matched.");
    }
}
