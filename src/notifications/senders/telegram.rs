use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{ensure_success, http_client, NotificationSender, SenderError};
use crate::notifications::models::{ChannelConfig, NotificationData};

const API_BASE: &str = "https://api.telegram.org";

/// A sender for pushing notifications via the Telegram Bot API.
pub struct TelegramSender {
    client: Client,
    api_base: String,
}

impl Default for TelegramSender {
    fn default() -> Self {
        Self::new()
    }
}

impl TelegramSender {
    pub fn new() -> Self {
        Self::with_api_base(API_BASE)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_base: api_base.into(),
        }
    }

    /// Escapes text for Telegram MarkdownV2.
    /// Characters to escape: _ * [ ] ( ) ~ ` > # + - = | { } . !
    fn escape_markdown_v2(text: &str) -> String {
        let mut escaped_text = String::with_capacity(text.len());
        for c in text.chars() {
            if matches!(
                c,
                '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
                    | '|' | '{' | '}' | '.' | '!'
            ) {
                escaped_text.push('\\');
            }
            escaped_text.push(c);
        }
        escaped_text
    }

    fn format_text(data: &NotificationData) -> String {
        let mut text = format!(
            "*{}* {}\n类型: {}\n时间: {}\n",
            Self::escape_markdown_v2(&data.monitor_name),
            Self::escape_markdown_v2(&data.status_text),
            Self::escape_markdown_v2(&data.monitor_type),
            Self::escape_markdown_v2(&data.time),
        );
        if let Some(failure) = &data.failure {
            text.push_str(&Self::escape_markdown_v2(&format!(
                "连续失败 {} 次, 持续 {} 分钟\n",
                failure.count, failure.duration_minutes
            )));
        }
        text.push_str(&Self::escape_markdown_v2(&data.message));
        text
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        data: &NotificationData,
    ) -> Result<(), SenderError> {
        let (bot_token, chat_id) = match config {
            ChannelConfig::Telegram { bot_token, chat_id } => (bot_token, chat_id),
            _ => {
                return Err(SenderError::InvalidConfiguration(
                    "Expected Telegram config, but found a different type.".to_string(),
                ));
            }
        };

        let api_url = format!("{}/bot{bot_token}/sendMessage", self.api_base);
        let text = Self::format_text(data);
        let payload = TelegramMessage {
            chat_id,
            text: &text,
            parse_mode: "MarkdownV2",
        };

        let response = self.client.post(&api_url).json(&payload).send().await?;
        ensure_success(response, "Telegram API").await
    }
}
