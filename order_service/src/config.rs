// medflow-orders/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
  Postgres,
  Memory,
}

impl FromStr for StoreBackend {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "postgres" | "pg" => Ok(StoreBackend::Postgres),
      "memory" | "mem" => Ok(StoreBackend::Memory),
      other => Err(AppError::Config(format!("Invalid STORE_BACKEND '{}'", other))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
  Json,
  Pretty,
}

impl FromStr for LogFormat {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "json" => Ok(LogFormat::Json),
      "pretty" | "text" => Ok(LogFormat::Pretty),
      other => Err(AppError::Config(format!("Invalid LOG_FORMAT '{}'", other))),
    }
  }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  pub database_url: Option<String>,
  pub database_max_connections: u32,
  pub store_backend: StoreBackend,
  pub run_migrations: bool,

  pub storage_dir: PathBuf,
  pub storage_public_url: String,
  pub max_payment_proof_bytes: usize,

  pub task_workers: usize,
  pub task_poll_interval: Duration,
  pub task_max_attempts: i32,
  pub task_retry_base: Duration,
  pub task_retry_max: Duration,
  pub task_lease: Duration,
  pub auto_confirm_after: Duration,

  pub log_format: LogFormat,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      server_host: "127.0.0.1".to_string(),
      server_port: 8080,
      database_url: None,
      database_max_connections: 10,
      store_backend: StoreBackend::Memory,
      run_migrations: true,
      storage_dir: PathBuf::from("./storage"),
      storage_public_url: "http://127.0.0.1:8080/files".to_string(),
      max_payment_proof_bytes: 2 * 1024 * 1024,
      task_workers: 2,
      task_poll_interval: Duration::from_millis(500),
      task_max_attempts: 5,
      task_retry_base: Duration::from_secs(5),
      task_retry_max: Duration::from_secs(300),
      task_lease: Duration::from_secs(60),
      auto_confirm_after: Duration::from_secs(7 * 24 * 60 * 60),
      log_format: LogFormat::Pretty,
    }
  }
}

fn parse_var<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
  T::Err: std::fmt::Display,
{
  match raw {
    None => Ok(default),
    Some(value) => value
      .trim()
      .parse::<T>()
      .map_err(|e| AppError::Config(format!("Invalid {}: {}", name, e))),
  }
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();
    Self::from_lookup(|name| env::var(name).ok())
  }

  /// Builds the config from any variable source; `from_env` passes the process environment.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let defaults = Self::default();

    let server_host = lookup("SERVER_HOST").unwrap_or(defaults.server_host);
    let server_port = parse_var("SERVER_PORT", lookup("SERVER_PORT"), defaults.server_port)?;
    let store_backend = parse_var("STORE_BACKEND", lookup("STORE_BACKEND"), StoreBackend::Postgres)?;
    let database_url = lookup("DATABASE_URL");
    if store_backend == StoreBackend::Postgres && database_url.is_none() {
      return Err(AppError::Config(
        "Missing environment variable 'DATABASE_URL' (required when STORE_BACKEND=postgres)".to_string(),
      ));
    }

    let secs = |name: &str, default: Duration| -> Result<Duration> {
      parse_var(name, lookup(name), default.as_secs()).map(Duration::from_secs)
    };

    let config = Self {
      database_max_connections: parse_var(
        "DATABASE_MAX_CONNECTIONS",
        lookup("DATABASE_MAX_CONNECTIONS"),
        defaults.database_max_connections,
      )?,
      run_migrations: parse_var("RUN_MIGRATIONS", lookup("RUN_MIGRATIONS"), defaults.run_migrations)?,
      storage_dir: lookup("STORAGE_DIR").map(PathBuf::from).unwrap_or(defaults.storage_dir),
      storage_public_url: lookup("STORAGE_PUBLIC_URL")
        .unwrap_or_else(|| format!("http://{}:{}/files", server_host, server_port)),
      max_payment_proof_bytes: parse_var(
        "MAX_PAYMENT_PROOF_BYTES",
        lookup("MAX_PAYMENT_PROOF_BYTES"),
        defaults.max_payment_proof_bytes,
      )?,
      task_workers: parse_var("TASK_WORKERS", lookup("TASK_WORKERS"), defaults.task_workers)?,
      task_poll_interval: Duration::from_millis(parse_var(
        "TASK_POLL_INTERVAL_MS",
        lookup("TASK_POLL_INTERVAL_MS"),
        defaults.task_poll_interval.as_millis() as u64,
      )?),
      task_max_attempts: parse_var("TASK_MAX_ATTEMPTS", lookup("TASK_MAX_ATTEMPTS"), defaults.task_max_attempts)?,
      task_retry_base: secs("TASK_RETRY_BASE_SECS", defaults.task_retry_base)?,
      task_retry_max: secs("TASK_RETRY_MAX_SECS", defaults.task_retry_max)?,
      task_lease: secs("TASK_LEASE_SECS", defaults.task_lease)?,
      auto_confirm_after: secs("AUTO_CONFIRM_AFTER_SECS", defaults.auto_confirm_after)?,
      log_format: parse_var("LOG_FORMAT", lookup("LOG_FORMAT"), defaults.log_format)?,
      server_host,
      server_port,
      database_url,
      store_backend,
    };

    if config.task_workers == 0 {
      return Err(AppError::Config("TASK_WORKERS must be at least 1".to_string()));
    }
    if config.task_max_attempts < 1 {
      return Err(AppError::Config("TASK_MAX_ATTEMPTS must be at least 1".to_string()));
    }

    tracing::info!(backend = ?config.store_backend, workers = config.task_workers, "Application configuration loaded.");
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |name| map.get(name).cloned()
  }

  #[test]
  fn postgres_backend_requires_database_url() {
    let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
    assert!(matches!(err, AppError::Config(ref m) if m.contains("DATABASE_URL")));
  }

  #[test]
  fn memory_backend_uses_defaults() {
    let config = AppConfig::from_lookup(lookup_from(&[("STORE_BACKEND", "memory")])).unwrap();
    assert_eq!(config.store_backend, StoreBackend::Memory);
    assert_eq!(config.server_port, 8080);
    assert_eq!(config.auto_confirm_after, Duration::from_secs(604_800));
    assert_eq!(config.storage_public_url, "http://127.0.0.1:8080/files");
  }

  #[test]
  fn overrides_are_parsed() {
    let config = AppConfig::from_lookup(lookup_from(&[
      ("DATABASE_URL", "postgres://localhost/medflow"),
      ("SERVER_PORT", "9000"),
      ("TASK_WORKERS", "4"),
      ("TASK_POLL_INTERVAL_MS", "50"),
      ("AUTO_CONFIRM_AFTER_SECS", "60"),
      ("LOG_FORMAT", "json"),
    ]))
    .unwrap();
    assert_eq!(config.store_backend, StoreBackend::Postgres);
    assert_eq!(config.server_port, 9000);
    assert_eq!(config.task_workers, 4);
    assert_eq!(config.task_poll_interval, Duration::from_millis(50));
    assert_eq!(config.auto_confirm_after, Duration::from_secs(60));
    assert_eq!(config.log_format, LogFormat::Json);
  }

  #[test]
  fn invalid_values_are_config_errors() {
    let err = AppConfig::from_lookup(lookup_from(&[("STORE_BACKEND", "memory"), ("SERVER_PORT", "http")])).unwrap_err();
    assert!(matches!(err, AppError::Config(ref m) if m.contains("SERVER_PORT")));
    let err = AppConfig::from_lookup(lookup_from(&[("STORE_BACKEND", "memory"), ("TASK_WORKERS", "0")])).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
  }
}
