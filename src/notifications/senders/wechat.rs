use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{ensure_success, fill_placeholders, http_client, NotificationSender, SenderError};
use crate::notifications::models::{ChannelConfig, NotificationData};

const DEFAULT_TITLE: &str = "监控告警 - {monitorName} 状态{statusText}";

/// Sends `{title, content}` to a WeChat-style push relay.
pub struct WechatSender {
    client: Client,
}

impl Default for WechatSender {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct WechatMessage<'a> {
    title: &'a str,
    content: &'a str,
}

impl WechatSender {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }

    fn default_content(data: &NotificationData) -> String {
        let mut content = String::from(
            "## 监控状态变更通知\n\n\
             - **监控名称**: {monitorName}\n\
             - **监控类型**: {monitorType}\n\
             - **当前状态**: {statusText}\n\
             - **变更时间**: {time}\n",
        );
        if data.failure.is_some() {
            content.push_str(
                "- **连续失败次数**: {failureCount} 次\n\
                 - **首次失败时间**: {firstFailureTime}\n\
                 - **最后失败时间**: {lastFailureTime}\n\
                 - **失败持续时间**: {failureDuration} 分钟\n",
            );
        }
        content.push_str("\n{message}");
        content
    }

    pub(crate) fn render(
        title_template: Option<&str>,
        content_template: Option<&str>,
        data: &NotificationData,
    ) -> (String, String) {
        let vars = data.template_vars();
        let title = fill_placeholders(title_template.unwrap_or(DEFAULT_TITLE), &vars);
        let content = match content_template {
            Some(template) => fill_placeholders(template, &vars),
            None => fill_placeholders(&Self::default_content(data), &vars),
        };
        (title, content)
    }
}

#[async_trait]
impl NotificationSender for WechatSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        data: &NotificationData,
    ) -> Result<(), SenderError> {
        let (push_url, title_template, content_template) = match config {
            ChannelConfig::WechatPush {
                push_url,
                title_template,
                content_template,
            } => (push_url, title_template, content_template),
            _ => {
                return Err(SenderError::InvalidConfiguration(
                    "Expected WechatPush config, but found a different type.".to_string(),
                ));
            }
        };
        if push_url.trim().is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "微信推送URL不能为空".to_string(),
            ));
        }

        let (title, content) = Self::render(
            title_template.as_deref().filter(|t| !t.is_empty()),
            content_template.as_deref().filter(|t| !t.is_empty()),
            data,
        );
        let payload = WechatMessage {
            title: &title,
            content: &content,
        };
        let response = self.client.post(push_url).json(&payload).send().await?;
        ensure_success(response, "WeChat push").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::MonitorStatus;

    fn up_data() -> NotificationData {
        NotificationData {
            monitor_name: "db".into(),
            monitor_type: "mysql".into(),
            status: MonitorStatus::Up,
            status_text: "正常".into(),
            time: "2024-05-01 10:00:00".into(),
            message: "数据库连接正常".into(),
            failure: None,
        }
    }

    #[test]
    fn test_default_templates() {
        let (title, content) = WechatSender::render(None, None, &up_data());
        assert_eq!(title, "监控告警 - db 状态正常");
        assert!(content.contains("- **监控名称**: db"));
        assert!(content.ends_with("数据库连接正常"));
        assert!(!content.contains("连续失败次数"));
    }

    #[test]
    fn test_custom_templates() {
        let (title, content) =
            WechatSender::render(Some("[{status}] {monitorName}"), Some("{message}"), &up_data());
        assert_eq!(title, "[UP] db");
        assert_eq!(content, "数据库连接正常");
    }
}
