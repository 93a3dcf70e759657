use async_trait::async_trait;
use chrono::Utc;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::warn;

use super::checker::{CheckResult, Checker};
use super::error::{CheckError, NetworkError, ProtocolError};
use super::CHECK_TIMEOUT;
use crate::db::enums::MonitorStatus;
use crate::db::models::{CertConfig, Monitor, MonitorConfig};
use crate::notifications::cert_reminder::CertReminder;

/// Certificates expiring within this many days get a warning annotation.
pub const EXPIRY_WARNING_DAYS: i64 = 7;

/// What a handshake revealed about the peer certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Chain and hostname verified against the system trust store.
    pub valid: bool,
    pub days_remaining: i64,
}

impl CertificateInfo {
    pub fn status(&self) -> MonitorStatus {
        if self.valid && self.days_remaining > 0 {
            MonitorStatus::Up
        } else {
            MonitorStatus::Down
        }
    }
}

/// Maps certificate facts to a check result.
pub fn evaluate_certificate(valid: bool, days_remaining: i64) -> CheckResult {
    if days_remaining <= 0 {
        return CheckResult::from_error(ProtocolError::CertificateExpired.into(), None);
    }
    if !valid {
        return CheckResult::from_error(ProtocolError::InvalidCertificate.into(), None);
    }

    let mut message = format!("HTTPS证书有效 (剩余{days_remaining}天)");
    if days_remaining <= EXPIRY_WARNING_DAYS {
        message.push_str(&format!(". {}", expiry_warning(days_remaining)));
    }
    CheckResult::up(message, None)
}

pub(crate) fn expiry_warning(days_remaining: i64) -> String {
    format!("【警告】证书将在{days_remaining}天后过期，请及时更新")
}

fn native_roots() -> Arc<RootCertStore> {
    static ROOTS: OnceLock<Arc<RootCertStore>> = OnceLock::new();
    ROOTS
        .get_or_init(|| {
            let mut roots = RootCertStore::empty();
            let loaded = rustls_native_certs::load_native_certs();
            for err in &loaded.errors {
                warn!(error = %err, "Failed to load a native root certificate.");
            }
            roots.add_parsable_certificates(loaded.certs);
            Arc::new(roots)
        })
        .clone()
}

/// Runs the WebPKI verification but lets the handshake finish either way, so
/// the expiry date of an untrusted certificate can still be read.
#[derive(Debug)]
struct RecordingVerifier {
    provider: Arc<CryptoProvider>,
    webpki: Option<Arc<WebPkiServerVerifier>>,
    verified: AtomicBool,
}

impl RecordingVerifier {
    fn new(provider: Arc<CryptoProvider>) -> Self {
        let webpki = WebPkiServerVerifier::builder_with_provider(native_roots(), provider.clone())
            .build()
            .map_err(|e| warn!(error = %e, "No usable trust anchors; every certificate will be reported invalid."))
            .ok();
        Self {
            provider,
            webpki,
            verified: AtomicBool::new(false),
        }
    }

    fn verified(&self) -> bool {
        self.verified.load(Ordering::SeqCst)
    }
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let ok = self.webpki.as_ref().is_some_and(|v| {
            v.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
                .is_ok()
        });
        self.verified.store(ok, Ordering::SeqCst);
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Completes a TLS handshake with `host:port` and reads the leaf certificate.
pub async fn inspect_certificate(host: &str, port: u16) -> Result<CertificateInfo, CheckError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(RecordingVerifier::new(provider.clone()));
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| NetworkError::Other(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier.clone())
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| CheckError::config(format!("主机名无效 - {host}")))?;

    let handshake = async {
        let tcp = TcpStream::connect((host, port)).await?;
        connector.connect(server_name, tcp).await
    };
    let stream = tokio::time::timeout(CHECK_TIMEOUT, handshake)
        .await
        .map_err(|_| NetworkError::Timeout)?
        .map_err(NetworkError::from)?;

    let (_, session) = stream.get_ref();
    let leaf = session
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or(ProtocolError::InvalidCertificate)?;
    let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|_| ProtocolError::InvalidCertificate)?;

    let seconds_left = parsed.validity().not_after.timestamp() - Utc::now().timestamp();
    Ok(CertificateInfo {
        valid: verifier.verified(),
        days_remaining: seconds_left.div_euclid(86_400),
    })
}

/// Standalone certificate check without reminders.
pub async fn check_certificate(config: &CertConfig) -> CheckResult {
    let (host, port) = match config.validate() {
        Ok(endpoint) => endpoint,
        Err(e) => return CheckResult::from_error(e, None),
    };
    let start = Instant::now();
    let outcome = inspect_certificate(&host, port).await;
    finish(outcome, start)
}

fn finish(outcome: Result<CertificateInfo, CheckError>, start: Instant) -> CheckResult {
    let latency = Some(start.elapsed().as_millis() as u64);
    match outcome {
        Ok(info) => CheckResult {
            latency_ms: latency,
            ..evaluate_certificate(info.valid, info.days_remaining)
        },
        Err(e @ CheckError::Protocol(_)) => CheckResult::from_error(e, latency),
        Err(e) => CheckResult::down(format!("证书检查失败: {e}"), latency),
    }
}

/// Certificate checker that also feeds the daily expiry reminder.
pub struct CertChecker {
    reminder: Option<Arc<CertReminder>>,
}

impl CertChecker {
    pub fn new(reminder: Option<Arc<CertReminder>>) -> Self {
        Self { reminder }
    }

    pub async fn check_url(&self, monitor: &Monitor, url: &str) -> CheckResult {
        let config = CertConfig {
            url: url.to_string(),
        };
        let (host, port) = match config.validate() {
            Ok(endpoint) => endpoint,
            Err(e) => return CheckResult::from_error(e, None),
        };

        let start = Instant::now();
        let outcome = inspect_certificate(&host, port).await;
        if let (Ok(info), Some(reminder)) = (&outcome, &self.reminder) {
            reminder.remind(monitor, info).await;
        }
        finish(outcome, start)
    }
}

#[async_trait]
impl Checker for CertChecker {
    async fn check(&self, monitor: &Monitor) -> CheckResult {
        match &monitor.config {
            MonitorConfig::HttpsCert(config) => self.check_url(monitor, &config.url).await,
            _ => CheckResult::from_error(CheckError::UnsupportedType(monitor.type_name()), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_certificate() {
        let result = evaluate_certificate(true, 90);
        assert_eq!(result.status, MonitorStatus::Up);
        assert_eq!(result.message, "HTTPS证书有效 (剩余90天)");
    }

    #[test]
    fn test_expiring_certificate_stays_up_with_warning() {
        let result = evaluate_certificate(true, 5);
        assert_eq!(result.status, MonitorStatus::Up);
        assert!(result.message.contains("【警告】证书将在5天后过期"));
    }

    #[test]
    fn test_invalid_or_expired_is_down() {
        let invalid = evaluate_certificate(false, 30);
        assert_eq!(invalid.status, MonitorStatus::Down);
        assert_eq!(invalid.message, "证书无效");

        let expired = evaluate_certificate(true, 0);
        assert_eq!(expired.status, MonitorStatus::Down);
        assert_eq!(expired.message, "证书已过期");
        assert_eq!(evaluate_certificate(false, -3).status, MonitorStatus::Down);
    }

    #[test]
    fn test_info_status() {
        let info = CertificateInfo {
            valid: true,
            days_remaining: 3,
        };
        assert_eq!(info.status(), MonitorStatus::Up);
        let info = CertificateInfo {
            valid: false,
            days_remaining: 3,
        };
        assert_eq!(info.status(), MonitorStatus::Down);
    }

    #[tokio::test]
    async fn test_plain_http_url_is_rejected() {
        let result = check_certificate(&CertConfig {
            url: "http://example.com".into(),
        })
        .await;
        assert_eq!(result.status, MonitorStatus::Down);
        assert!(result.message.starts_with("配置无效"));
    }

    #[tokio::test]
    async fn test_handshake_against_closed_port_fails_cleanly() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = check_certificate(&CertConfig {
            url: format!("https://localhost:{port}"),
        })
        .await;
        assert_eq!(result.status, MonitorStatus::Down);
        assert!(result.message.starts_with("证书检查失败: "));
    }
}
