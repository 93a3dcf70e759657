use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Executor};
use std::time::Instant;
use tracing::debug;

use super::checker::{CheckResult, Checker};
use super::error::{CheckError, NetworkError, ProtocolError};
use super::CHECK_TIMEOUT;
use crate::db::models::{DatabaseConfig, Monitor, MonitorConfig};

const DEFAULT_MYSQL_DATABASE: &str = "mysql";
const DEFAULT_SQL_PROBE: &str = "SELECT 1";

fn sql_error(err: sqlx::Error) -> CheckError {
    match err {
        sqlx::Error::Io(io) => NetworkError::from(io).into(),
        sqlx::Error::PoolTimedOut => NetworkError::Timeout.into(),
        other => ProtocolError::Database(other.to_string()).into(),
    }
}

fn redis_error(err: redis::RedisError) -> CheckError {
    if err.is_connection_refusal() {
        NetworkError::ConnectionRefused.into()
    } else if err.is_timeout() {
        NetworkError::Timeout.into()
    } else {
        ProtocolError::Database(err.to_string()).into()
    }
}

/// An open SQL connection as the probe sees it.
///
/// Methods hand back boxed futures so callers stay `Send` inside
/// `#[async_trait]` without naming the executor's lifetimes.
trait SqlSession: Send {
    fn run<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<(), sqlx::Error>>;

    fn close(self) -> BoxFuture<'static, Result<(), sqlx::Error>>;
}

impl SqlSession for MySqlConnection {
    fn run<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<(), sqlx::Error>> {
        // Plain text statements go over the simple protocol, so multi-statement probes work.
        let query = Executor::execute(self, statement);
        Box::pin(async move { query.await.map(|_| ()) })
    }

    fn close(self) -> BoxFuture<'static, Result<(), sqlx::Error>> {
        Connection::close(self)
    }
}

fn sql_probe(config: &DatabaseConfig) -> &str {
    config.probe().unwrap_or(DEFAULT_SQL_PROBE)
}

/// Runs `statement` and closes the session whether or not it succeeded.
async fn run_probe<S: SqlSession>(mut session: S, statement: &str) -> Result<(), CheckError> {
    let probe = tokio::time::timeout(CHECK_TIMEOUT, session.run(statement)).await;
    if let Err(e) = session.close().await {
        debug!(error = %e, "Closing probe connection failed.");
    }
    probe.map_err(|_| NetworkError::Timeout)?.map_err(sql_error)
}

/// Opens a fresh MySQL connection, runs the probe and closes it again.
pub async fn check_mysql(config: &DatabaseConfig) -> CheckResult {
    let (host, port) = match config.validate() {
        Ok(endpoint) => endpoint,
        Err(e) => return CheckResult::from_error(e, None),
    };

    let mut options = MySqlConnectOptions::new()
        .host(&host)
        .port(port)
        .database(
            config
                .database
                .as_deref()
                .filter(|d| !d.is_empty())
                .unwrap_or(DEFAULT_MYSQL_DATABASE),
        );
    if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
        options = options.username(username);
    }
    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        options = options.password(password);
    }

    let start = Instant::now();
    let outcome = match tokio::time::timeout(CHECK_TIMEOUT, MySqlConnection::connect_with(&options)).await
    {
        Ok(Ok(conn)) => run_probe(conn, sql_probe(config)).await,
        Ok(Err(e)) => Err(sql_error(e)),
        Err(_) => Err(NetworkError::Timeout.into()),
    };
    let latency = Some(start.elapsed().as_millis() as u64);

    match outcome {
        Ok(()) => {
            let suffix = if config.probe().is_some() { ", 查询成功" } else { "" };
            CheckResult::up(format!("数据库连接正常{suffix}"), latency)
        }
        Err(e) => CheckResult::from_error(e, latency),
    }
}

fn redis_url(host: &str, port: u16, config: &DatabaseConfig) -> String {
    let username = config.username.as_deref().unwrap_or_default();
    let auth = match config.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => format!(
            "{}:{}@",
            urlencoding::encode(username),
            urlencoding::encode(password)
        ),
        None => String::new(),
    };
    let db = config
        .database
        .as_deref()
        .and_then(|d| d.trim().parse::<u32>().ok())
        .unwrap_or(0);
    format!("redis://{auth}{host}:{port}/{db}")
}

/// Opens a fresh Redis connection, sends `PING` or the configured command, then drops it.
pub async fn check_redis(config: &DatabaseConfig) -> CheckResult {
    let (host, port) = match config.validate() {
        Ok(endpoint) => endpoint,
        Err(e) => return CheckResult::from_error(e, None),
    };
    let client = match redis::Client::open(redis_url(&host, port, config)) {
        Ok(client) => client,
        Err(e) => return CheckResult::from_error(CheckError::config(e.to_string()), None),
    };

    let start = Instant::now();
    let outcome = async {
        let mut conn = tokio::time::timeout(CHECK_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(redis_error)?;

        let result = match config.probe() {
            Some(command) => {
                let mut parts = command.split_whitespace();
                let mut cmd = redis::cmd(parts.next().unwrap_or("PING"));
                for arg in parts {
                    cmd.arg(arg);
                }
                tokio::time::timeout(CHECK_TIMEOUT, cmd.query_async::<_, redis::Value>(&mut conn))
                    .await
                    .map_err(|_| CheckError::from(NetworkError::Timeout))
                    .and_then(|reply| {
                        reply.map(|_| ()).map_err(|e| {
                            ProtocolError::Database(format!("Redis命令执行失败: {e}")).into()
                        })
                    })
            }
            None => tokio::time::timeout(
                CHECK_TIMEOUT,
                redis::cmd("PING").query_async::<_, String>(&mut conn),
            )
            .await
            .map_err(|_| CheckError::from(NetworkError::Timeout))
            .and_then(|reply| reply.map(|_| ()).map_err(redis_error)),
        };
        drop(conn);
        result
    }
    .await;
    let latency = Some(start.elapsed().as_millis() as u64);

    match outcome {
        Ok(()) => {
            let suffix = if config.probe().is_some() { ", 命令执行成功" } else { "" };
            CheckResult::up(format!("Redis连接正常{suffix}"), latency)
        }
        Err(e) => CheckResult::from_error(e, latency),
    }
}

/// SQL and key-value checker.
pub struct DatabaseChecker;

#[async_trait]
impl Checker for DatabaseChecker {
    async fn check(&self, monitor: &Monitor) -> CheckResult {
        match &monitor.config {
            MonitorConfig::Mysql(config) => check_mysql(config).await,
            MonitorConfig::Redis(config) => check_redis(config).await,
            _ => CheckResult::from_error(CheckError::UnsupportedType(monitor.type_name()), None),
        }
    }
}
