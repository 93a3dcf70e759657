use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use super::models::{ChannelConfig, NotificationData};

pub mod email;
pub mod telegram;
pub mod webhook;
pub mod wechat;

/// Upper bound for a single channel request.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Templating error: {0}")]
    TemplatingError(String),
}

/// Delivers one notification through a concrete channel type.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, config: &ChannelConfig, data: &NotificationData)
        -> Result<(), SenderError>;
}

pub(crate) fn http_client() -> Client {
    Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

pub(crate) async fn ensure_success(
    response: reqwest::Response,
    channel: &str,
) -> Result<(), SenderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let error_body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body".to_string());
    Err(SenderError::SendFailed(format!(
        "{channel} returned non-success status: {status}. Body: {error_body}"
    )))
}

/// Replaces every `{key}` placeholder with its value.
pub(crate) fn fill_placeholders(
    template: &str,
    vars: &std::collections::HashMap<String, String>,
) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_fill_placeholders_replaces_all_occurrences() {
        let mut vars = HashMap::new();
        vars.insert("monitorName".to_string(), "api".to_string());
        vars.insert("statusText".to_string(), "异常".to_string());
        let out = fill_placeholders("{monitorName}: {statusText} ({monitorName})", &vars);
        assert_eq!(out, "api: 异常 (api)");
        assert_eq!(fill_placeholders("{unknown}", &vars), "{unknown}");
    }
}
