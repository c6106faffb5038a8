use anyhow::{Context, Result};
use listings_backend::api::{self, AppState};
use listings_backend::config::{DatabaseConfig, ServerConfig};
use listings_backend::logging;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    logging::init("info")?;

    info!("🏠 Starting listings API server...");

    let db_config = DatabaseConfig::from_env()?;
    let server_config = ServerConfig::from_env()?;

    info!("📦 Connecting to database...");
    let pool = db_config
        .connect()
        .await
        .context("Failed to connect to database")?;
    info!("✅ Database connected successfully");

    let app = api::router(AppState { db: pool });

    let listener = tokio::net::TcpListener::bind(server_config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", server_config.bind_addr))?;
    info!("🚀 Server running on http://{}", server_config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
