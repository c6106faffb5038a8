//! Configuration loaded from environment variables
//!
//! Every reader has a `from_lookup` twin taking a lookup closure, so tests
//! can supply values without touching the process environment.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

fn process_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).ok_or(ConfigError::Missing(name))
}

fn or_default<F>(lookup: &F, name: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).unwrap_or_else(|| default.to_string())
}

fn parsed<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

/// PostgreSQL connection settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => format!(
                "postgresql://{}:{}@{}:{}/{}",
                or_default(&lookup, "DB_USER", "postgres"),
                required(&lookup, "DB_PASSWORD")?,
                or_default(&lookup, "DB_HOST", "localhost"),
                parsed(&lookup, "DB_PORT", 5432u16)?,
                or_default(&lookup, "DB_NAME", "postgres"),
            ),
        };

        Ok(DatabaseConfig {
            url,
            max_connections: parsed(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            connect_timeout: Duration::from_secs(parsed(&lookup, "DB_CONNECT_TIMEOUT_SECS", 10)?),
        })
    }

    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.connect_timeout)
            .connect(&self.url)
            .await
    }
}

/// Listings marketplace API settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub url: String,
    pub host: String,
    pub location_ids: String,
    pub purpose: String,
    pub category_id: String,
    pub sort: String,
    pub hits_per_page: u32,
    pub page_delay: Duration,
    pub max_retries: u32,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let hits_per_page: u32 = parsed(&lookup, "LISTINGS_HITS_PER_PAGE", 25)?;
        if hits_per_page == 0 {
            return Err(ConfigError::Invalid {
                name: "LISTINGS_HITS_PER_PAGE",
                value: "0".to_string(),
            });
        }

        Ok(ApiConfig {
            api_key: required(&lookup, "RAPIDAPI_KEY")?,
            url: or_default(&lookup, "LISTINGS_API_URL", "https://bayut.p.rapidapi.com/properties/list"),
            host: or_default(&lookup, "LISTINGS_API_HOST", "bayut.p.rapidapi.com"),
            location_ids: or_default(&lookup, "LISTINGS_LOCATION_IDS", "5002,6020"),
            purpose: or_default(&lookup, "LISTINGS_PURPOSE", "for-sale"),
            category_id: or_default(&lookup, "LISTINGS_CATEGORY_ID", "4"),
            sort: or_default(&lookup, "LISTINGS_SORT", "date-desc"),
            hits_per_page,
            page_delay: Duration::from_secs_f64(parsed(&lookup, "LISTINGS_PAGE_DELAY_SECS", 1.0f64)?.max(0.0)),
            max_retries: parsed(&lookup, "LISTINGS_MAX_RETRIES", 3)?,
        })
    }
}

/// Telegram Bot API credentials
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub channel_id: String,
}

impl TelegramConfig {
    /// `None` when either credential is absent
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Some(TelegramConfig {
            bot_token: lookup("TELEGRAM_BOT_TOKEN")?,
            channel_id: lookup("TELEGRAM_CHANNEL_ID")?,
        })
    }
}

/// Read service settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(ServerConfig {
            bind_addr: parsed(&lookup, "API_BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3001)))?,
        })
    }
}

/// Directory for dated CSV snapshots
pub fn csv_dir() -> PathBuf {
    csv_dir_from_lookup(process_env)
}

pub fn csv_dir_from_lookup<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    or_default(&lookup, "LISTINGS_CSV_DIR", "data/csv").into()
}
