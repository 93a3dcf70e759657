use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tera::{Context, Tera};

use super::{NotificationSender, SenderError, SEND_TIMEOUT};
use crate::db::models::PortSpec;
use crate::notifications::models::{ChannelConfig, NotificationData};

const DEFAULT_SMTP_PORT: u16 = 587;
const IMPLICIT_TLS_PORT: u16 = 465;

const HTML_TEMPLATE: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px; border: 1px solid #6366F1; border-radius: 10px;">
  <h2 style="color: #6366F1;">监控状态变更通知</h2>
  <p style="font-weight: bold; font-size: 16px;">状态: {{ statusText }}</p>
  <table style="width: 100%; border-collapse: collapse; margin: 15px 0;">
    <tr><td style="color: #666;">监控名称</td><td style="font-weight: bold;">{{ monitorName }}</td></tr>
    <tr><td style="color: #666;">监控类型</td><td>{{ monitorType }}</td></tr>
    <tr><td style="color: #666;">变更时间</td><td>{{ time }}</td></tr>
  </table>
  <div style="background-color: #f5f5f5; padding: 15px; border-radius: 8px;">
    <p style="margin: 0; white-space: pre-line;">{{ message }}</p>
  </div>
  <p style="color: #666; font-size: 12px;">此邮件由系统自动发送，请勿回复。</p>
</div>"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TlsMode {
    /// TLS from the first byte (SMTPS).
    Implicit,
    /// STARTTLS when the server offers it.
    Opportunistic,
}

pub(crate) fn tls_mode(port: u16) -> TlsMode {
    if port == IMPLICIT_TLS_PORT {
        TlsMode::Implicit
    } else {
        TlsMode::Opportunistic
    }
}

/// A resolved SMTP destination.
#[derive(Debug)]
struct SmtpTarget {
    server: String,
    port: u16,
    sender: Mailbox,
    recipient: Mailbox,
    credentials: Option<Credentials>,
}

impl SmtpTarget {
    fn from_config(
        email: &str,
        smtp_server: &str,
        smtp_port: Option<&PortSpec>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, SenderError> {
        let email = email.trim();
        let server = smtp_server.trim();
        if email.is_empty() || server.is_empty() {
            return Err(SenderError::InvalidConfiguration("邮件配置不完整".to_string()));
        }
        let port = match smtp_port {
            Some(spec) => spec
                .resolve()
                .map_err(|e| SenderError::InvalidConfiguration(e.to_string()))?,
            None => DEFAULT_SMTP_PORT,
        };
        let recipient: Mailbox = email
            .parse()
            .map_err(|e| SenderError::InvalidConfiguration(format!("收件地址无效 - {e}")))?;

        let username = username.map(str::trim).filter(|u| !u.is_empty());
        // A username that is itself an address doubles as the sender.
        let sender = username
            .and_then(|u| u.parse::<Mailbox>().ok())
            .unwrap_or_else(|| recipient.clone());
        let credentials = password
            .filter(|p| !p.is_empty())
            .map(|p| Credentials::new(username.unwrap_or(email).to_string(), p.to_string()));

        Ok(Self {
            server: server.to_string(),
            port,
            sender,
            recipient,
            credentials,
        })
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, SenderError> {
        let parameters = TlsParameters::new(self.server.clone())
            .map_err(|e| SenderError::InvalidConfiguration(e.to_string()))?;
        let tls = match tls_mode(self.port) {
            TlsMode::Implicit => Tls::Wrapper(parameters),
            TlsMode::Opportunistic => Tls::Opportunistic(parameters),
        };
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.server)
            .port(self.port)
            .tls(tls)
            .timeout(Some(SEND_TIMEOUT));
        if let Some(credentials) = &self.credentials {
            builder = builder.credentials(credentials.clone());
        }
        Ok(builder.build())
    }
}

/// Sends an HTML mail over SMTP.
#[derive(Default)]
pub struct EmailSender;

impl EmailSender {
    pub(crate) fn subject(data: &NotificationData) -> String {
        format!("监控告警 - {} 状态{}", data.monitor_name, data.status_text)
    }

    pub(crate) fn render_html(data: &NotificationData) -> Result<String, SenderError> {
        let mut context = Context::new();
        for (key, value) in data.template_vars() {
            context.insert(key, &value);
        }
        Tera::one_off(HTML_TEMPLATE, &context, true)
            .map_err(|e| SenderError::TemplatingError(e.to_string()))
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        data: &NotificationData,
    ) -> Result<(), SenderError> {
        let target = match config {
            ChannelConfig::Email {
                email,
                smtp_server,
                smtp_port,
                username,
                password,
            } => SmtpTarget::from_config(
                email,
                smtp_server,
                smtp_port.as_ref(),
                username.as_deref(),
                password.as_deref(),
            )?,
            _ => {
                return Err(SenderError::InvalidConfiguration(
                    "Expected Email config, but found a different type.".to_string(),
                ));
            }
        };

        let message = Message::builder()
            .from(target.sender.clone())
            .to(target.recipient.clone())
            .subject(Self::subject(data))
            .header(ContentType::TEXT_HTML)
            .body(Self::render_html(data)?)
            .map_err(|e| SenderError::SendFailed(e.to_string()))?;

        target
            .transport()?
            .send(message)
            .await
            .map_err(|e| SenderError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::MonitorStatus;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn data() -> NotificationData {
        NotificationData {
            monitor_name: "api <prod>".into(),
            monitor_type: "http".into(),
            status: MonitorStatus::Down,
            status_text: MonitorStatus::Down.display_text().into(),
            time: "2024-05-01 12:00:00".into(),
            message: "连接超时".into(),
            failure: None,
        }
    }

    fn email_config(port: u16) -> ChannelConfig {
        ChannelConfig::Email {
            email: "ops@example.com".into(),
            smtp_server: "127.0.0.1".into(),
            smtp_port: Some(PortSpec::Number(port as i64)),
            username: None,
            password: None,
        }
    }

    /// Speaks just enough SMTP to accept one message, recording every line it reads.
    async fn smtp_server() -> (u16, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let seen = lines.clone();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut reader = BufReader::new(read).lines();
            write.write_all(b"220 mock ESMTP\r\n").await.unwrap();
            let mut in_data = false;
            while let Ok(Some(line)) = reader.next_line().await {
                seen.lock().unwrap().push(line.clone());
                let reply: &[u8] = if in_data {
                    if line != "." {
                        continue;
                    }
                    in_data = false;
                    b"250 queued\r\n"
                } else if line.starts_with("EHLO") {
                    b"250-mock\r\n250 8BITMIME\r\n"
                } else if line == "DATA" {
                    in_data = true;
                    b"354 go ahead\r\n"
                } else if line == "QUIT" {
                    let _ = write.write_all(b"221 bye\r\n").await;
                    break;
                } else {
                    b"250 ok\r\n"
                };
                if write.write_all(reply).await.is_err() {
                    break;
                }
            }
        });
        (port, lines)
    }

    #[test]
    fn test_implicit_tls_only_on_465() {
        assert_eq!(tls_mode(465), TlsMode::Implicit);
        assert_eq!(tls_mode(587), TlsMode::Opportunistic);
        assert_eq!(tls_mode(25), TlsMode::Opportunistic);
    }

    #[test]
    fn test_target_defaults_and_credentials() {
        let target = SmtpTarget::from_config("ops@example.com", "smtp.example.com", None, None, Some("pw"))
            .unwrap();
        assert_eq!(target.port, 587);
        assert_eq!(target.sender.email.to_string(), "ops@example.com");
        assert!(target.credentials.is_some());

        let target = SmtpTarget::from_config(
            "ops@example.com",
            "smtp.example.com",
            Some(&PortSpec::Text("465".into())),
            Some("robot@example.com"),
            None,
        )
        .unwrap();
        assert_eq!(target.port, 465);
        assert_eq!(target.sender.email.to_string(), "robot@example.com");
        assert!(target.credentials.is_none());
    }

    #[test]
    fn test_incomplete_config_rejected() {
        let err = SmtpTarget::from_config("", "smtp.example.com", None, None, None).unwrap_err();
        assert!(matches!(err, SenderError::InvalidConfiguration(msg) if msg == "邮件配置不完整"));
        let err = SmtpTarget::from_config("ops@example.com", " ", None, None, None).unwrap_err();
        assert!(matches!(err, SenderError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_subject_and_escaped_html() {
        let data = data();
        assert_eq!(EmailSender::subject(&data), "监控告警 - api <prod> 状态异常");
        let html = EmailSender::render_html(&data).unwrap();
        assert!(html.contains("api &lt;prod&gt;"));
        assert!(html.contains("状态: 异常"));
        assert!(html.contains("连接超时"));
    }

    #[tokio::test]
    async fn test_send_delivers_over_smtp() {
        let (port, lines) = smtp_server().await;
        EmailSender.send(&email_config(port), &data()).await.unwrap();

        let lines = lines.lock().unwrap().clone();
        assert!(lines.iter().any(|l| l.starts_with("MAIL FROM:<ops@example.com>")));
        assert!(lines.iter().any(|l| l.starts_with("RCPT TO:<ops@example.com>")));
        assert!(lines.iter().any(|l| l.starts_with("Subject:")));
    }

    #[tokio::test]
    async fn test_wrong_config_type() {
        let config = ChannelConfig::Webhook {
            url: "https://hook".into(),
            headers: None,
            body_template: None,
        };
        assert!(matches!(
            EmailSender.send(&config, &data()).await,
            Err(SenderError::InvalidConfiguration(_))
        ));
    }
}
