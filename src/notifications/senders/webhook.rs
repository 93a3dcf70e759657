use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client};
use serde_json::json;
use tera::{Context, Tera};

use super::{ensure_success, http_client, NotificationSender, SenderError};
use crate::notifications::models::{ChannelConfig, NotificationData};

const USER_AGENT: &str = "monitor-engine-notification-service";

/// A sender for pushing notifications via a custom webhook.
pub struct WebhookSender {
    client: Client,
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }

    fn default_payload(data: &NotificationData) -> serde_json::Value {
        json!({
            "event": "status_change",
            "timestamp": Utc::now().to_rfc3339(),
            "monitor": {
                "name": data.monitor_name,
                "type": data.monitor_type,
                "status": data.status_text,
                "status_code": data.status_text,
                "time": data.time,
                "message": data.message,
            },
            "failure_info": data.failure.as_ref().map(|f| json!({
                "count": f.count,
                "first_failure_time": f.first_failure_time,
                "last_failure_time": f.last_failure_time,
                "duration_minutes": f.duration_minutes,
            })),
        })
    }

    fn render_body(template: &str, data: &NotificationData) -> Result<String, SenderError> {
        let mut tera_context = Context::new();
        for (key, value) in data.template_vars() {
            tera_context.insert(key, &value);
        }
        Tera::one_off(template, &tera_context, false)
            .map_err(|e| SenderError::TemplatingError(e.to_string()))
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        data: &NotificationData,
    ) -> Result<(), SenderError> {
        let (url, headers, body_template) = match config {
            ChannelConfig::Webhook {
                url,
                headers,
                body_template,
            } => (url, headers, body_template),
            _ => {
                return Err(SenderError::InvalidConfiguration(
                    "Expected Webhook config, but found a different type.".to_string(),
                ));
            }
        };
        if url.trim().is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "Webhook URL不能为空".to_string(),
            ));
        }

        let mut request_builder = self
            .client
            .post(url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::CONTENT_TYPE, "application/json");

        if let Some(h) = headers {
            let mut header_map = header::HeaderMap::new();
            for (key, value) in h {
                let header_name = header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid header name: {e}"))
                })?;
                let header_value = header::HeaderValue::from_str(value).map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid header value: {e}"))
                })?;
                header_map.insert(header_name, header_value);
            }
            request_builder = request_builder.headers(header_map);
        }

        let body = match body_template.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(template) => Self::render_body(template, data)?,
            None => Self::default_payload(data).to_string(),
        };

        let response = request_builder.body(body).send().await?;
        ensure_success(response, "Webhook").await
    }
}
