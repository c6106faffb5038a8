//! Posts the cheapest small apartments per region to the Telegram channel

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use listings_backend::config::{DatabaseConfig, TelegramConfig};
use listings_backend::logging;
use listings_backend::reports::cheapest::{self, CheapestReport};
use listings_backend::telegram::{TelegramClient, CAPTION_LIMIT, MESSAGE_LIMIT};
use rust_decimal::Decimal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Build the cheapest-apartments-by-region report and post it to Telegram."
)]
struct Cli {
    /// Largest area in square metres
    #[arg(long, default_value_t = Decimal::from(cheapest::DEFAULT_MAX_AREA))]
    max_area: Decimal,
    /// Listings kept per region
    #[arg(long, default_value_t = cheapest::DEFAULT_PER_LOCATION)]
    per_location: usize,
    /// Region buttons attached to the post
    #[arg(long, default_value_t = cheapest::MAX_BUTTONS)]
    max_buttons: usize,
    /// Log the report instead of sending it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init("info")?;

    info!("Building cheapest apartments report (area <= {} sqm)", cli.max_area);

    let db = DatabaseConfig::from_env()?
        .connect()
        .await
        .context("Failed to connect to database")?;

    let candidates = cheapest::fetch_candidates(&db, cli.max_area).await;
    db.close().await;

    let report = CheapestReport::build(candidates?, cli.per_location.max(1));
    info!(
        "✓ Ranked {} listings across {} regions",
        report.listings.len(),
        report.regions.len()
    );

    if report.listings.is_empty() {
        warn!("No listings matched, nothing to send");
        return Ok(());
    }

    let today = Utc::now().date_naive();
    let keyboard = cheapest::inline_keyboard(&report.regions, cli.max_buttons);

    let telegram = match TelegramConfig::from_env() {
        Some(config) if !cli.dry_run => Some(TelegramClient::new(config)?),
        Some(_) => None,
        None => {
            warn!("TELEGRAM_BOT_TOKEN or TELEGRAM_CHANNEL_ID not set, report will only be logged");
            None
        }
    };

    let Some(telegram) = telegram else {
        info!("\n{}", cheapest::render_text_report(&report.listings));
        return Ok(());
    };

    match report.cover_photo() {
        Some(photo) => {
            let caption = cheapest::render_caption(&report.regions, cli.max_area, today, CAPTION_LIMIT);
            telegram.send_photo(photo, &caption, Some(keyboard.as_slice())).await?;
        }
        None => {
            let text = cheapest::render_caption(&report.regions, cli.max_area, today, MESSAGE_LIMIT);
            telegram.send_message(&text, Some(keyboard.as_slice())).await?;
        }
    }

    info!("✓ Report sent with {} region buttons", keyboard.len());

    Ok(())
}
