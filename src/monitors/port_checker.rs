use async_trait::async_trait;
use std::time::Instant;
use tokio::net::TcpStream;

use super::checker::{CheckResult, Checker};
use super::error::{CheckError, NetworkError};
use super::CHECK_TIMEOUT;
use crate::db::models::{Monitor, MonitorConfig, PortConfig};

/// Plain TCP connect check.
pub async fn check_port(config: &PortConfig) -> CheckResult {
    let (host, port) = match config.validate() {
        Ok(endpoint) => endpoint,
        Err(e) => return CheckResult::from_error(e, None),
    };

    let start = Instant::now();
    let outcome = tokio::time::timeout(CHECK_TIMEOUT, TcpStream::connect((host.as_str(), port))).await;
    let latency = Some(start.elapsed().as_millis() as u64);

    match outcome {
        Ok(Ok(_stream)) => CheckResult::up(format!("端口 {port} 开放"), latency),
        Ok(Err(e)) => CheckResult::from_error(CheckError::from(NetworkError::from(e)), latency),
        Err(_) => CheckResult::from_error(NetworkError::Timeout.into(), latency),
    }
}

pub struct PortChecker;

#[async_trait]
impl Checker for PortChecker {
    async fn check(&self, monitor: &Monitor) -> CheckResult {
        match &monitor.config {
            MonitorConfig::Port(config) => check_port(config).await,
            _ => CheckResult::from_error(CheckError::UnsupportedType(monitor.type_name()), None),
        }
    }
}
