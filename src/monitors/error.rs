use std::io;
use thiserror::Error;

/// Failure taxonomy shared by every checker. The `Display` strings are the
/// messages stored in history rows and shown to operators, so keep them stable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("配置无效: {0}")]
    Config(String),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("不支持的监控类型: {0}")]
    UnsupportedType(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("连接被拒绝")]
    ConnectionRefused,
    #[error("连接超时")]
    Timeout,
    #[error("无法解析主机名")]
    HostNotFound,
    #[error("网络错误: {0}")]
    Other(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("状态码不符合预期: {0}")]
    UnexpectedStatus(u16),
    #[error("未找到关键词")]
    KeywordNotFound,
    #[error("证书无效")]
    InvalidCertificate,
    #[error("证书已过期")]
    CertificateExpired,
    #[error("数据库错误: {0}")]
    Database(String),
}

impl CheckError {
    pub fn config(msg: impl Into<String>) -> Self {
        CheckError::Config(msg.into())
    }
}

impl From<io::Error> for NetworkError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => NetworkError::ConnectionRefused,
            io::ErrorKind::TimedOut => NetworkError::Timeout,
            _ => {
                // Resolver failures surface as uncategorized io errors.
                let text = err.to_string();
                if looks_like_dns_failure(&text) {
                    NetworkError::HostNotFound
                } else {
                    NetworkError::Other(text)
                }
            }
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return NetworkError::Timeout;
        }
        let text = error_chain_text(&err);
        if text.contains("Connection refused") || text.contains("connection refused") {
            NetworkError::ConnectionRefused
        } else if looks_like_dns_failure(&text) {
            NetworkError::HostNotFound
        } else {
            NetworkError::Other(text)
        }
    }
}

fn looks_like_dns_failure(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
        || lower.contains("nodename nor servname")
        || lower.contains("dns error")
}

/// Flattens an error and its sources into one line.
pub(crate) fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}
