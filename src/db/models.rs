use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::enums::{MonitorKind, MonitorStatus};
use crate::monitors::error::CheckError;

fn default_interval() -> u32 {
    60
}

fn default_retry_interval() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

/// A monitored target together with its cached last-known state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub config: MonitorConfig,
    /// Check cadence in seconds.
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub retries: u32,
    /// Seconds between retries of a failed check.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u32,
    /// DOWN-notification aggregation window in minutes. Zero means 30.
    #[serde(default)]
    pub resend_interval: u32,
    #[serde(default)]
    pub upside_down: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub last_status: Option<MonitorStatus>,
    #[serde(default)]
    pub last_check_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_check_at: Option<DateTime<Utc>>,
}

impl Monitor {
    pub fn kind(&self) -> Option<MonitorKind> {
        self.config.kind()
    }

    pub fn is_push(&self) -> bool {
        matches!(self.config, MonitorConfig::Push(_))
    }

    pub fn type_name(&self) -> String {
        match &self.config {
            MonitorConfig::Unsupported { kind, .. } => kind.clone(),
            other => other.kind().map(|k| k.as_str().to_string()).unwrap_or_default(),
        }
    }
}

/// Type-specific monitor configuration. Stored as `{"type": ..., "config": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMonitorConfig", into = "RawMonitorConfig")]
pub enum MonitorConfig {
    Http(HttpConfig),
    Keyword(KeywordConfig),
    HttpsCert(CertConfig),
    Port(PortConfig),
    Mysql(DatabaseConfig),
    Redis(DatabaseConfig),
    Push(PushConfig),
    /// A type this engine does not know. Kept so the dispatcher can report it.
    Unsupported {
        kind: String,
        config: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawMonitorConfig {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    config: serde_json::Value,
}

impl TryFrom<RawMonitorConfig> for MonitorConfig {
    type Error = serde_json::Error;

    fn try_from(raw: RawMonitorConfig) -> Result<Self, Self::Error> {
        let value = if raw.config.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            raw.config
        };
        let config = match MonitorKind::parse(&raw.kind) {
            Some(MonitorKind::Http) => MonitorConfig::Http(serde_json::from_value(value)?),
            Some(MonitorKind::Keyword) => MonitorConfig::Keyword(serde_json::from_value(value)?),
            Some(MonitorKind::HttpsCert) => {
                MonitorConfig::HttpsCert(serde_json::from_value(value)?)
            }
            Some(MonitorKind::Port) => MonitorConfig::Port(serde_json::from_value(value)?),
            Some(MonitorKind::Mysql) => MonitorConfig::Mysql(serde_json::from_value(value)?),
            Some(MonitorKind::Redis) => MonitorConfig::Redis(serde_json::from_value(value)?),
            Some(MonitorKind::Push) => MonitorConfig::Push(serde_json::from_value(value)?),
            None => MonitorConfig::Unsupported {
                kind: raw.kind,
                config: value,
            },
        };
        Ok(config)
    }
}

impl From<MonitorConfig> for RawMonitorConfig {
    fn from(config: MonitorConfig) -> Self {
        let kind = config
            .kind()
            .map(|k| k.as_str().to_string())
            .unwrap_or_default();
        let encoded = match config {
            MonitorConfig::Http(c) => serde_json::to_value(c),
            MonitorConfig::Keyword(c) => serde_json::to_value(c),
            MonitorConfig::HttpsCert(c) => serde_json::to_value(c),
            MonitorConfig::Port(c) => serde_json::to_value(c),
            MonitorConfig::Mysql(c) | MonitorConfig::Redis(c) => serde_json::to_value(c),
            MonitorConfig::Push(c) => serde_json::to_value(c),
            MonitorConfig::Unsupported { kind, config } => {
                return RawMonitorConfig { kind, config };
            }
        };
        RawMonitorConfig {
            kind,
            config: encoded.unwrap_or(serde_json::Value::Null),
        }
    }
}

impl MonitorConfig {
    pub fn kind(&self) -> Option<MonitorKind> {
        match self {
            MonitorConfig::Http(_) => Some(MonitorKind::Http),
            MonitorConfig::Keyword(_) => Some(MonitorKind::Keyword),
            MonitorConfig::HttpsCert(_) => Some(MonitorKind::HttpsCert),
            MonitorConfig::Port(_) => Some(MonitorKind::Port),
            MonitorConfig::Mysql(_) => Some(MonitorKind::Mysql),
            MonitorConfig::Redis(_) => Some(MonitorKind::Redis),
            MonitorConfig::Push(_) => Some(MonitorKind::Push),
            MonitorConfig::Unsupported { .. } => None,
        }
    }

    /// Rejects configurations that cannot be checked, before any network call.
    pub fn validate(&self) -> Result<(), CheckError> {
        match self {
            MonitorConfig::Http(c) => c.validate(),
            MonitorConfig::Keyword(c) => c.validate(),
            MonitorConfig::HttpsCert(c) => c.validate().map(|_| ()),
            MonitorConfig::Port(c) => c.validate().map(|_| ()),
            MonitorConfig::Mysql(c) | MonitorConfig::Redis(c) => c.validate().map(|_| ()),
            MonitorConfig::Push(_) => Ok(()),
            MonitorConfig::Unsupported { kind, .. } => {
                Err(CheckError::UnsupportedType(kind.clone()))
            }
        }
    }
}

fn default_http_method() -> String {
    "GET".to_string()
}

fn default_status_codes() -> String {
    "200-299".to_string()
}

fn default_max_redirects() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_http_method")]
    pub http_method: String,
    /// Status-code expression such as `200-299` or `200,201,204`.
    #[serde(default = "default_status_codes")]
    pub status_codes: String,
    /// Zero disables redirect following.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default)]
    pub ignore_tls: bool,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default)]
    pub request_headers: Option<HeadersSpec>,
    #[serde(default)]
    pub notify_cert_expiry: bool,
}

impl HttpConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http_method: default_http_method(),
            status_codes: default_status_codes(),
            max_redirects: default_max_redirects(),
            ignore_tls: false,
            request_body: None,
            request_headers: None,
            notify_cert_expiry: false,
        }
    }

    pub fn validate(&self) -> Result<(), CheckError> {
        if self.url.trim().is_empty() {
            return Err(CheckError::config("URL不能为空"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordConfig {
    #[serde(flatten)]
    pub http: HttpConfig,
    #[serde(default)]
    pub keyword: String,
}

impl KeywordConfig {
    pub fn validate(&self) -> Result<(), CheckError> {
        self.http.validate()?;
        if self.keyword.is_empty() {
            return Err(CheckError::config("关键词不能为空"));
        }
        Ok(())
    }
}

/// Headers given either as a map or as a JSON-encoded object string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeadersSpec {
    Map(HashMap<String, String>),
    Json(String),
}

impl HeadersSpec {
    pub fn to_map(&self) -> Result<HashMap<String, String>, serde_json::Error> {
        match self {
            HeadersSpec::Map(map) => Ok(map.clone()),
            HeadersSpec::Json(text) if text.trim().is_empty() => Ok(HashMap::new()),
            HeadersSpec::Json(text) => serde_json::from_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertConfig {
    #[serde(default)]
    pub url: String,
}

impl CertConfig {
    /// Returns the `(host, port)` to handshake with; the port defaults to 443.
    pub fn validate(&self) -> Result<(String, u16), CheckError> {
        if self.url.trim().is_empty() {
            return Err(CheckError::config("URL不能为空"));
        }
        if !self.url.starts_with("https://") {
            return Err(CheckError::config("仅支持HTTPS URL (必须以https://开头)"));
        }
        let parsed = reqwest::Url::parse(&self.url)
            .map_err(|e| CheckError::config(format!("URL格式错误 - {e}")))?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CheckError::config("缺少主机名"))?;
        Ok((host.to_string(), parsed.port().unwrap_or(443)))
    }
}

/// A port as entered by users: a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(i64),
    Text(String),
}

impl PortSpec {
    pub fn resolve(&self) -> Result<u16, CheckError> {
        let number = match self {
            PortSpec::Number(n) => *n,
            PortSpec::Text(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| CheckError::config(format!("端口格式错误 - {text}")))?,
        };
        if (1..=65535).contains(&number) {
            Ok(number as u16)
        } else {
            Err(CheckError::config(format!("端口号 {number} 不是有效的端口值")))
        }
    }
}

fn resolve_endpoint(hostname: &str, port: Option<&PortSpec>) -> Result<(String, u16), CheckError> {
    if hostname.trim().is_empty() {
        return Err(CheckError::config("缺少主机名"));
    }
    let port = port.ok_or_else(|| CheckError::config("缺少端口号"))?;
    Ok((hostname.trim().to_string(), port.resolve()?))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConfig {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: Option<PortSpec>,
}

impl PortConfig {
    pub fn validate(&self) -> Result<(String, u16), CheckError> {
        resolve_endpoint(&self.hostname, self.port.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: Option<PortSpec>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    /// Probe statement (SQL) or command (KV). Empty means the default probe.
    #[serde(default)]
    pub query: Option<String>,
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(String, u16), CheckError> {
        resolve_endpoint(&self.hostname, self.port.as_ref())
    }

    pub fn probe(&self) -> Option<&str> {
        self.query.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }
}

/// A push timestamp as stored by the heartbeat endpoint: RFC 3339 text or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PushTimestamp {
    Millis(i64),
    Text(String),
}

impl PushTimestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            PushTimestamp::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            PushTimestamp::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

impl From<DateTime<Utc>> for PushTimestamp {
    fn from(at: DateTime<Utc>) -> Self {
        PushTimestamp::Text(at.to_rfc3339())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub last_push_time: Option<PushTimestamp>,
    /// Allowed silence between heartbeats, in seconds. Defaults to 60.
    #[serde(default)]
    pub push_interval: Option<u64>,
}

impl PushConfig {
    pub fn interval_seconds(&self) -> u64 {
        match self.push_interval {
            Some(secs) if secs > 0 => secs,
            _ => 60,
        }
    }
}

/// One immutable row of check history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub id: Uuid,
    pub monitor_id: i32,
    pub status: MonitorStatus,
    pub message: String,
    pub latency_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(
        monitor_id: i32,
        status: MonitorStatus,
        message: impl Into<String>,
        latency_ms: Option<u64>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            monitor_id,
            status,
            message: message.into(),
            latency_ms,
            timestamp,
        }
    }
}

/// Cached state written back to a monitor after each fired check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastCheck {
    pub status: MonitorStatus,
    pub last_check_at: DateTime<Utc>,
    pub next_check_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_monitor_deserializes_tagged_config() {
        let monitor: Monitor = serde_json::from_value(json!({
            "id": 7,
            "name": "api",
            "type": "keyword",
            "config": { "url": "https://example.com", "keyword": "ok" },
            "interval": 30
        }))
        .unwrap();

        assert_eq!(monitor.kind(), Some(MonitorKind::Keyword));
        assert!(monitor.active);
        match &monitor.config {
            MonitorConfig::Keyword(c) => {
                assert_eq!(c.keyword, "ok");
                assert_eq!(c.http.status_codes, "200-299");
                assert_eq!(c.http.max_redirects, 10);
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_kept_as_unsupported() {
        let monitor: Monitor = serde_json::from_value(json!({
            "id": 1,
            "type": "smtp",
            "config": { "host": "mail" }
        }))
        .unwrap();
        assert_eq!(monitor.kind(), None);
        assert_eq!(monitor.type_name(), "smtp");
        assert_eq!(
            monitor.config.validate(),
            Err(CheckError::UnsupportedType("smtp".into()))
        );
    }

    #[test]
    fn test_config_round_trips_through_raw_form() {
        let config = MonitorConfig::Port(PortConfig {
            hostname: "db.local".into(),
            port: Some(PortSpec::Text("5432".into())),
        });
        let encoded = serde_json::to_value(&config).unwrap();
        assert_eq!(encoded["type"], "port");
        let decoded: MonitorConfig = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_port_validation() {
        let bad = PortConfig {
            hostname: "example.com".into(),
            port: Some(PortSpec::Number(-1)),
        };
        assert!(matches!(bad.validate(), Err(CheckError::Config(_))));

        let missing_host = PortConfig {
            hostname: " ".into(),
            port: Some(PortSpec::Number(80)),
        };
        assert_eq!(
            missing_host.validate(),
            Err(CheckError::config("缺少主机名"))
        );

        let text = PortConfig {
            hostname: "example.com".into(),
            port: Some(PortSpec::Text("8080".into())),
        };
        assert_eq!(text.validate().unwrap(), ("example.com".to_string(), 8080));
    }

    #[test]
    fn test_cert_config_defaults_to_443() {
        let cfg = CertConfig {
            url: "https://example.com/path".into(),
        };
        assert_eq!(cfg.validate().unwrap(), ("example.com".to_string(), 443));

        let custom = CertConfig {
            url: "https://example.com:8443".into(),
        };
        assert_eq!(custom.validate().unwrap().1, 8443);

        let plain = CertConfig {
            url: "http://example.com".into(),
        };
        assert!(plain.validate().is_err());
    }

    #[test]
    fn test_push_timestamp_parsing() {
        let text = PushTimestamp::Text("2023-01-01T12:00:00Z".into());
        assert!(text.to_datetime().is_some());
        let millis = PushTimestamp::Millis(1_672_574_400_000);
        assert_eq!(millis.to_datetime(), text.to_datetime());
        assert!(PushTimestamp::Text("invalid-date".into()).to_datetime().is_none());
    }

    #[test]
    fn test_headers_from_json_string() {
        let spec = HeadersSpec::Json(r#"{"X-Token":"abc"}"#.into());
        assert_eq!(spec.to_map().unwrap().get("X-Token").unwrap(), "abc");
        assert!(HeadersSpec::Json("not json".into()).to_map().is_err());
    }
}
