//! Minimal Telegram Bot API client for report delivery

use crate::config::TelegramConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bot API length limits, in characters
pub const MESSAGE_LIMIT: usize = 4096;
pub const CAPTION_LIMIT: usize = 1024;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error {code:?}: {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
struct ReplyMarkup<'a> {
    inline_keyboard: &'a [Vec<InlineKeyboardButton>],
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyMarkup<'a>>,
}

#[derive(Debug, Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: String,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyMarkup<'a>>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    error_code: Option<i64>,
    description: Option<String>,
}

pub struct TelegramClient {
    client: Client,
    config: TelegramConfig,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Result<Self, TelegramError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(TelegramClient { client, config })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.config.bot_token, method)
    }

    /// Send an HTML message, optionally with a link keyboard
    pub async fn send_message(
        &self,
        text: &str,
        keyboard: Option<&[Vec<InlineKeyboardButton>]>,
    ) -> Result<(), TelegramError> {
        let payload = SendMessage {
            chat_id: &self.config.channel_id,
            text: truncate_chars(text, MESSAGE_LIMIT),
            parse_mode: "HTML",
            disable_web_page_preview: true,
            reply_markup: keyboard.map(|inline_keyboard| ReplyMarkup { inline_keyboard }),
        };

        self.call("sendMessage", &payload).await?;
        info!("Sent message to {}", self.config.channel_id);
        Ok(())
    }

    /// Send a photo by URL with an HTML caption
    pub async fn send_photo(
        &self,
        photo_url: &str,
        caption: &str,
        keyboard: Option<&[Vec<InlineKeyboardButton>]>,
    ) -> Result<(), TelegramError> {
        let payload = SendPhoto {
            chat_id: &self.config.channel_id,
            photo: photo_url,
            caption: truncate_chars(caption, CAPTION_LIMIT),
            parse_mode: "HTML",
            reply_markup: keyboard.map(|inline_keyboard| ReplyMarkup { inline_keyboard }),
        };

        self.call("sendPhoto", &payload).await?;
        info!("Sent photo to {}", self.config.channel_id);
        Ok(())
    }

    async fn call<T: Serialize>(&self, method: &str, payload: &T) -> Result<(), TelegramError> {
        debug!("Calling Telegram {}", method);

        let response: ApiResponse = self
            .client
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await?
            .json()
            .await?;

        if response.ok {
            Ok(())
        } else {
            Err(TelegramError::Api {
                code: response.error_code,
                description: response
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            })
        }
    }
}

/// Cut `text` to at most `max` characters, marking the cut with an ellipsis
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }

    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
