use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::enums::MonitorStatus;
use crate::db::models::PortSpec;

/// Delivery settings for one notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelConfig {
    Email {
        /// Recipient, and sender when no username is set.
        email: String,
        #[serde(alias = "smtpServer")]
        smtp_server: String,
        /// Defaults to 587. Port 465 uses implicit TLS.
        #[serde(default, alias = "smtpPort")]
        smtp_port: Option<PortSpec>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    Telegram {
        bot_token: String,
        chat_id: String,
    },
    Webhook {
        url: String,
        #[serde(default)]
        headers: Option<HashMap<String, String>>,
        /// Tera template for the request body. The default JSON payload is used when absent.
        #[serde(default)]
        body_template: Option<String>,
    },
    WechatPush {
        push_url: String,
        #[serde(default)]
        title_template: Option<String>,
        #[serde(default)]
        content_template: Option<String>,
    },
}

impl ChannelConfig {
    pub fn channel_type(&self) -> &'static str {
        match self {
            ChannelConfig::Email { .. } => "email",
            ChannelConfig::Telegram { .. } => "telegram",
            ChannelConfig::Webhook { .. } => "webhook",
            ChannelConfig::WechatPush { .. } => "wechatPush",
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A monitor-to-channel link as handed over by the notification registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelBinding {
    pub monitor_id: i32,
    pub channel_id: i32,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub config: ChannelConfig,
}

/// Aggregated failure details attached to DOWN notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    pub count: u64,
    pub first_failure_time: String,
    pub last_failure_time: String,
    pub duration_minutes: i64,
}

/// Everything a channel needs to render one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub monitor_name: String,
    pub monitor_type: String,
    pub status: MonitorStatus,
    pub status_text: String,
    pub time: String,
    pub message: String,
    #[serde(default)]
    pub failure: Option<FailureInfo>,
}

impl NotificationData {
    /// Flat variables for `{key}` and Tera templates.
    pub fn template_vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("monitorName".to_string(), self.monitor_name.clone());
        vars.insert("monitorType".to_string(), self.monitor_type.clone());
        vars.insert("status".to_string(), self.status.to_string());
        vars.insert("statusText".to_string(), self.status_text.clone());
        vars.insert("time".to_string(), self.time.clone());
        vars.insert("message".to_string(), self.message.clone());
        if let Some(failure) = &self.failure {
            vars.insert("failureCount".to_string(), failure.count.to_string());
            vars.insert("firstFailureTime".to_string(), failure.first_failure_time.clone());
            vars.insert("lastFailureTime".to_string(), failure.last_failure_time.clone());
            vars.insert("failureDuration".to_string(), failure.duration_minutes.to_string());
        }
        vars
    }
}
