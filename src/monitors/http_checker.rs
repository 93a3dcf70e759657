use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::redirect::Policy;
use reqwest::{header, Client, Method, Proxy, Response};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use super::cert_checker::CertChecker;
use super::checker::{CheckResult, Checker};
use super::error::{CheckError, NetworkError, ProtocolError};
use super::status_code::check_status_code;
use super::CHECK_TIMEOUT;
use crate::db::models::{HttpConfig, KeywordConfig, Monitor, MonitorConfig};
use crate::db::services::{ProxySettings, SettingsStore};

const PROXY_FAILURE_PREFIX: &str = "代理连接失败: ";

/// What a client is built from. Everything else is set per request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    ignore_tls: bool,
    max_redirects: u32,
    proxy: Option<ProxyRoute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProxyRoute {
    url: String,
    credentials: Option<(String, String)>,
}

impl ClientKey {
    fn new(config: &HttpConfig, proxy: &ProxySettings) -> Self {
        Self {
            ignore_tls: config.ignore_tls,
            max_redirects: config.max_redirects,
            proxy: proxy.proxy_url().map(|url| ProxyRoute {
                url,
                credentials: proxy
                    .credentials()
                    .map(|(u, p)| (u.to_string(), p.to_string())),
            }),
        }
    }
}

/// Shared HTTP clients, reused across checks.
///
/// One client exists per TLS and redirect setting, direct and through the
/// current proxy. Clients for an outdated proxy are dropped when the proxy
/// settings change.
#[derive(Default)]
pub struct HttpClients {
    clients: DashMap<ClientKey, Client>,
}

impl HttpClients {
    pub fn new() -> Self {
        Self::default()
    }

    fn transport(&self, config: &HttpConfig, proxy: &ProxySettings) -> Result<Transport, CheckError> {
        let key = ClientKey::new(config, proxy);
        if let Some(client) = self.clients.get(&key) {
            return Ok(Transport {
                client: client.clone(),
            });
        }

        let client = Self::build(&key)?;
        if key.proxy.is_some() {
            self.clients
                .retain(|cached, _| cached.proxy.is_none() || cached.proxy == key.proxy);
        }
        self.clients.insert(key, client.clone());
        Ok(Transport { client })
    }

    fn build(key: &ClientKey) -> Result<Client, CheckError> {
        let redirect = if key.max_redirects == 0 {
            Policy::none()
        } else {
            Policy::limited(key.max_redirects as usize)
        };
        let mut builder = Client::builder()
            .timeout(CHECK_TIMEOUT)
            .redirect(redirect)
            .danger_accept_invalid_certs(key.ignore_tls);

        match &key.proxy {
            Some(route) => {
                let mut proxy = Proxy::all(&route.url)
                    .map_err(|e| CheckError::config(format!("代理地址无效 - {e}")))?;
                if let Some((username, password)) = &route.credentials {
                    proxy = proxy.basic_auth(username, password);
                }
                builder = builder.proxy(proxy);
            }
            None => builder = builder.no_proxy(),
        }

        builder
            .build()
            .map_err(|e| NetworkError::from(e).into())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// A shared client borrowed for one check.
struct Transport {
    client: Client,
}

impl Transport {
    async fn send(&self, config: &HttpConfig) -> Result<Response, CheckError> {
        let method = Method::from_bytes(config.http_method.trim().to_uppercase().as_bytes())
            .map_err(|_| CheckError::config(format!("不支持的请求方法 - {}", config.http_method)))?;

        let mut request = self.client.request(method.clone(), config.url.trim());
        if let Some(spec) = &config.request_headers {
            match spec.to_map() {
                Ok(headers) => {
                    for (name, value) in headers {
                        request = request.header(name, value);
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring unparsable request headers."),
            }
        }
        if let Some(body) = config.request_body.as_deref().filter(|b| !b.is_empty()) {
            if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
                request = request.header(header::CONTENT_TYPE, "application/json").body(body.to_string());
            }
        }

        request
            .send()
            .await
            .map_err(|e| NetworkError::from(e).into())
    }
}

/// Converts a failed check, marking transport failures that went through the proxy.
fn failure(err: CheckError, proxied: bool, latency: Option<u64>) -> CheckResult {
    match err {
        CheckError::Network(e) if proxied => {
            CheckResult::down(format!("{PROXY_FAILURE_PREFIX}{e}"), latency)
        }
        other => CheckResult::from_error(other, latency),
    }
}

/// Checks that `config.url` answers with a status matched by `config.status_codes`.
pub async fn check_http(
    clients: &HttpClients,
    config: &HttpConfig,
    proxy: &ProxySettings,
) -> CheckResult {
    if let Err(e) = config.validate() {
        return CheckResult::from_error(e, None);
    }
    let proxied = proxy.proxy_url().is_some();
    let start = Instant::now();
    let outcome = async {
        let transport = clients.transport(config, proxy)?;
        let response = transport.send(config).await?;
        let status = response.status().as_u16();
        if check_status_code(status, &config.status_codes) {
            Ok(status)
        } else {
            Err(CheckError::from(ProtocolError::UnexpectedStatus(status)))
        }
    }
    .await;
    let latency = Some(start.elapsed().as_millis() as u64);

    match outcome {
        Ok(status) => CheckResult::up(format!("状态码: {status}"), latency),
        Err(e) => failure(e, proxied, latency),
    }
}

/// Like [`check_http`], and additionally requires `keyword` in the response body.
pub async fn check_keyword(
    clients: &HttpClients,
    config: &KeywordConfig,
    proxy: &ProxySettings,
) -> CheckResult {
    if let Err(e) = config.validate() {
        return CheckResult::from_error(e, None);
    }
    let proxied = proxy.proxy_url().is_some();
    let start = Instant::now();
    let outcome = async {
        let transport = clients.transport(&config.http, proxy)?;
        let response = transport.send(&config.http).await?;
        let status = response.status().as_u16();
        if !check_status_code(status, &config.http.status_codes) {
            return Err(CheckError::from(ProtocolError::UnexpectedStatus(status)));
        }
        let body = response.text().await.map_err(NetworkError::from)?;
        if !body.contains(&config.keyword) {
            return Err(ProtocolError::KeywordNotFound.into());
        }
        Ok(status)
    }
    .await;
    let latency = Some(start.elapsed().as_millis() as u64);

    match outcome {
        Ok(status) => {
            let suffix = if proxied { " (使用代理)" } else { "" };
            CheckResult::up(format!("找到关键词，状态码: {status}{suffix}"), latency)
        }
        Err(e) => failure(e, proxied, latency),
    }
}

/// HTTP and keyword checker. Reads the proxy toggle on every check.
pub struct HttpChecker {
    settings: Arc<dyn SettingsStore>,
    cert: Option<Arc<CertChecker>>,
    clients: HttpClients,
}

impl HttpChecker {
    pub fn new(settings: Arc<dyn SettingsStore>, cert: Option<Arc<CertChecker>>) -> Self {
        Self {
            settings,
            cert,
            clients: HttpClients::new(),
        }
    }

    async fn proxy_settings(&self) -> ProxySettings {
        match self.settings.get_all_proxy_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Failed to read proxy settings; checking directly.");
                ProxySettings::default()
            }
        }
    }

    async fn check_with_certificate(&self, monitor: &Monitor, config: &HttpConfig) -> CheckResult {
        let mut cert_note = None;
        if let Some(cert) = &self.cert {
            if config.notify_cert_expiry && config.url.starts_with("https://") {
                let cert_result = cert.check_url(monitor, &config.url).await;
                if cert_result.is_down() {
                    return cert_result;
                }
                if cert_result.message.contains("【警告】") {
                    cert_note = Some(cert_result.message);
                }
            }
        }

        let proxy = self.proxy_settings().await;
        let result = check_http(&self.clients, config, &proxy).await;
        match cert_note {
            Some(note) if !result.is_down() => CheckResult {
                message: format!("{} | {note}", result.message),
                ..result
            },
            _ => result,
        }
    }
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, monitor: &Monitor) -> CheckResult {
        match &monitor.config {
            MonitorConfig::Http(config) => self.check_with_certificate(monitor, config).await,
            MonitorConfig::Keyword(config) => {
                let proxy = self.proxy_settings().await;
                check_keyword(&self.clients, config, &proxy).await
            }
            _ => CheckResult::from_error(CheckError::UnsupportedType(monitor.type_name()), None),
        }
    }
}
