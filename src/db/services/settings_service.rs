use serde::{Deserialize, Serialize};

pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Outbound proxy used by HTTP and keyword checks when `enabled` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxySettings {
    /// The proxy URL, or `None` when disabled or incompletely configured.
    pub fn proxy_url(&self) -> Option<String> {
        if !self.enabled || self.server.trim().is_empty() || self.port.trim().is_empty() {
            return None;
        }
        Some(format!("http://{}:{}", self.server.trim(), self.port.trim()))
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

/// Site-wide settings seeded into the bundled store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSettings {
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub data_retention_days: Option<u32>,
}

/// Retention horizon with the default applied; zero counts as unset.
pub fn effective_retention_days(configured: Option<u32>, fallback: u32) -> u32 {
    match configured {
        Some(days) if days > 0 => days,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_url_requires_server_and_port() {
        let mut settings = ProxySettings {
            enabled: true,
            server: "10.0.0.1".into(),
            port: "3128".into(),
            ..Default::default()
        };
        assert_eq!(settings.proxy_url().as_deref(), Some("http://10.0.0.1:3128"));

        settings.port.clear();
        assert_eq!(settings.proxy_url(), None);

        settings.port = "3128".into();
        settings.enabled = false;
        assert_eq!(settings.proxy_url(), None);
    }

    #[test]
    fn test_retention_defaults() {
        assert_eq!(effective_retention_days(None, DEFAULT_RETENTION_DAYS), 90);
        assert_eq!(effective_retention_days(Some(0), DEFAULT_RETENTION_DAYS), 90);
        assert_eq!(effective_retention_days(Some(14), DEFAULT_RETENTION_DAYS), 14);
    }
}
