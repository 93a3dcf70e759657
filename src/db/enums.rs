use serde::{Deserialize, Serialize};
use std::fmt;

/// Tri-state outcome of a single check, stored with the same numeric codes the
/// history table uses (`DOWN = 0`, `UP = 1`, `PENDING = 2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MonitorStatus {
    Down,
    Up,
    Pending,
}

impl MonitorStatus {
    pub fn code(self) -> u8 {
        match self {
            MonitorStatus::Down => 0,
            MonitorStatus::Up => 1,
            MonitorStatus::Pending => 2,
        }
    }

    /// Swaps UP and DOWN. PENDING is left untouched.
    pub fn inverted(self) -> Self {
        match self {
            MonitorStatus::Down => MonitorStatus::Up,
            MonitorStatus::Up => MonitorStatus::Down,
            MonitorStatus::Pending => MonitorStatus::Pending,
        }
    }

    /// Label shown to people receiving notifications.
    pub fn display_text(self) -> &'static str {
        match self {
            MonitorStatus::Down => "异常",
            MonitorStatus::Up => "正常",
            MonitorStatus::Pending => "等待",
        }
    }
}

impl TryFrom<u8> for MonitorStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MonitorStatus::Down),
            1 => Ok(MonitorStatus::Up),
            2 => Ok(MonitorStatus::Pending),
            other => Err(format!("unknown monitor status code: {other}")),
        }
    }
}

impl From<MonitorStatus> for u8 {
    fn from(status: MonitorStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MonitorStatus::Down => "DOWN",
            MonitorStatus::Up => "UP",
            MonitorStatus::Pending => "PENDING",
        };
        write!(f, "{s}")
    }
}

/// Discriminant of a monitor's type-specific configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorKind {
    Http,
    Keyword,
    HttpsCert,
    Port,
    Mysql,
    Redis,
    Push,
}

impl MonitorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MonitorKind::Http => "http",
            MonitorKind::Keyword => "keyword",
            MonitorKind::HttpsCert => "https-cert",
            MonitorKind::Port => "port",
            MonitorKind::Mysql => "mysql",
            MonitorKind::Redis => "redis",
            MonitorKind::Push => "push",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" | "https" => Some(MonitorKind::Http),
            "keyword" => Some(MonitorKind::Keyword),
            "https-cert" => Some(MonitorKind::HttpsCert),
            "port" => Some(MonitorKind::Port),
            "mysql" => Some(MonitorKind::Mysql),
            "redis" => Some(MonitorKind::Redis),
            "push" => Some(MonitorKind::Push),
            _ => None,
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inversion_leaves_pending_alone() {
        assert_eq!(MonitorStatus::Up.inverted(), MonitorStatus::Down);
        assert_eq!(MonitorStatus::Down.inverted(), MonitorStatus::Up);
        assert_eq!(MonitorStatus::Pending.inverted(), MonitorStatus::Pending);
    }

    #[test]
    fn test_status_serializes_as_code() {
        assert_eq!(serde_json::to_string(&MonitorStatus::Pending).unwrap(), "2");
        let parsed: MonitorStatus = serde_json::from_str("0").unwrap();
        assert_eq!(parsed, MonitorStatus::Down);
        assert!(serde_json::from_str::<MonitorStatus>("7").is_err());
    }

    #[test]
    fn test_kind_accepts_https_alias() {
        assert_eq!(MonitorKind::parse("https"), Some(MonitorKind::Http));
        assert_eq!(MonitorKind::parse("https-cert"), Some(MonitorKind::HttpsCert));
        assert_eq!(MonitorKind::parse("ftp"), None);
    }
}
