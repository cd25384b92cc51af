//! Process configuration.
//!
//! Everything is read from the environment once at startup (after
//! `dotenvy::dotenv()` in `main`). In particular the storage backend is
//! decided here and threaded through the service container, so a running
//! worker never changes backend mid-flight.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:repodoc.db?mode=rwc";
pub const DEFAULT_BUCKET_NAME: &str = "codebase-docs";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_AGENT_URL: &str = "http://agent:8001";
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_WORK_DIR: &str = "/tmp/repodoc";
pub const DEFAULT_STORAGE_DIR: &str = "/tmp/storage";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_WORKER_CONCURRENCY: usize = 2;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
/// A claimed task older than this is assumed to belong to a dead worker.
pub const DEFAULT_TASK_LEASE_SECS: u64 = 3600;
pub const DEFAULT_CLONE_TIMEOUT_SECS: u64 = 600;

/// Object storage connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    /// Endpoint used for uploads and bucket provisioning (`None` → AWS default).
    pub endpoint_url: Option<String>,
    /// Endpoint retrieval URLs are signed against (defaults to `endpoint_url`).
    pub public_endpoint_url: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
}

/// Local-disk fallback settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSettings {
    /// Directory artifacts are moved into and served from.
    pub storage_dir: PathBuf,
    /// Externally reachable base URL of the API process.
    pub public_base_url: String,
}

/// Which storage backend this process uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    ObjectStorage(S3Settings),
    LocalDisk(LocalSettings),
}

impl StorageMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ObjectStorage(_) => "object-storage",
            Self::LocalDisk(_) => "local-disk",
        }
    }
}

/// Worker pool tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub task_lease: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_WORKER_CONCURRENCY,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            task_lease: Duration::from_secs(DEFAULT_TASK_LEASE_SECS),
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub queue_url: String,
    pub storage: StorageMode,
    /// Local storage directory, served under `/files` regardless of mode.
    pub storage_dir: PathBuf,
    pub agent_url: String,
    pub agent_timeout: Duration,
    pub clone_timeout: Duration,
    pub work_dir: PathBuf,
    pub bind_address: String,
    pub port: u16,
    pub worker: WorkerConfig,
    pub log_dir: Option<String>,
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset.
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let database_url = get_or("DATABASE_URL", DEFAULT_DATABASE_URL);
        let queue_url = get("QUEUE_URL")
            .or_else(|| get("REDIS_URL"))
            .unwrap_or_else(|| database_url.clone());

        let storage_dir = PathBuf::from(get_or("STORAGE_DIR", DEFAULT_STORAGE_DIR));
        let public_base_url = get("PUBLIC_BASE_URL")
            .or_else(|| get("RENDER_EXTERNAL_URL"))
            .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string());

        let access_key_id = get("AWS_ACCESS_KEY_ID");
        let secret_access_key = get("AWS_SECRET_ACCESS_KEY");
        let storage = match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                let endpoint_url = get("S3_ENDPOINT_URL");
                StorageMode::ObjectStorage(S3Settings {
                    public_endpoint_url: get("S3_PUBLIC_ENDPOINT_URL")
                        .or_else(|| endpoint_url.clone()),
                    endpoint_url,
                    access_key_id,
                    secret_access_key,
                    region: get_or("AWS_REGION", DEFAULT_REGION),
                    bucket: get_or("AWS_BUCKET_NAME", DEFAULT_BUCKET_NAME),
                })
            }
            _ => StorageMode::LocalDisk(LocalSettings {
                storage_dir: storage_dir.clone(),
                public_base_url,
            }),
        };

        let agent_timeout_secs =
            parse_or("AGENT_TIMEOUT_SECS", get("AGENT_TIMEOUT_SECS"), DEFAULT_AGENT_TIMEOUT_SECS)?;
        let clone_timeout_secs =
            parse_or("CLONE_TIMEOUT_SECS", get("CLONE_TIMEOUT_SECS"), DEFAULT_CLONE_TIMEOUT_SECS)?;
        let port = parse_or("API_PORT", get("API_PORT"), DEFAULT_PORT)?;
        let concurrency = parse_or(
            "WORKER_CONCURRENCY",
            get("WORKER_CONCURRENCY"),
            DEFAULT_WORKER_CONCURRENCY,
        )?;
        let poll_ms = parse_or(
            "WORKER_POLL_INTERVAL_MS",
            get("WORKER_POLL_INTERVAL_MS"),
            DEFAULT_POLL_INTERVAL_MS,
        )?;
        let lease_secs = parse_or(
            "TASK_LEASE_SECS",
            get("TASK_LEASE_SECS"),
            DEFAULT_TASK_LEASE_SECS,
        )?;

        let config = Self {
            database_url,
            queue_url,
            storage,
            storage_dir,
            agent_url: get_or("AGENT_URL", DEFAULT_AGENT_URL),
            agent_timeout: Duration::from_secs(agent_timeout_secs),
            clone_timeout: Duration::from_secs(clone_timeout_secs),
            work_dir: PathBuf::from(get_or("WORK_DIR", DEFAULT_WORK_DIR)),
            bind_address: get_or("API_BIND_ADDRESS", DEFAULT_BIND_ADDRESS),
            port,
            worker: WorkerConfig {
                concurrency,
                poll_interval: Duration::from_millis(poll_ms),
                task_lease: Duration::from_secs(lease_secs),
            },
            log_dir: get("LOG_DIR"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.worker.concurrency == 0 {
            return Err(Error::config("WORKER_CONCURRENCY must be at least 1"));
        }
        if self.agent_timeout.is_zero() {
            return Err(Error::config("AGENT_TIMEOUT_SECS must be at least 1"));
        }
        if self.clone_timeout.is_zero() {
            return Err(Error::config("CLONE_TIMEOUT_SECS must be at least 1"));
        }
        if self.worker.poll_interval.is_zero() {
            return Err(Error::config("WORKER_POLL_INTERVAL_MS must be at least 1"));
        }

        // The queue lives in SQLite, so a Redis-style broker URL cannot work.
        if !self.queue_url.starts_with("sqlite:") {
            return Err(Error::config(format!(
                "Unsupported queue URL '{}': expected a sqlite: URL",
                self.queue_url
            )));
        }

        url::Url::parse(&self.agent_url)
            .map_err(|e| Error::config(format!("Invalid AGENT_URL '{}': {}", self.agent_url, e)))?;

        match &self.storage {
            StorageMode::LocalDisk(local) => {
                url::Url::parse(&local.public_base_url).map_err(|e| {
                    Error::config(format!(
                        "Invalid PUBLIC_BASE_URL '{}': {}",
                        local.public_base_url, e
                    ))
                })?;
            }
            StorageMode::ObjectStorage(s3) => {
                if s3.bucket.is_empty() {
                    return Err(Error::config("AWS_BUCKET_NAME must not be empty"));
                }
                for endpoint in [&s3.endpoint_url, &s3.public_endpoint_url]
                    .into_iter()
                    .flatten()
                {
                    url::Url::parse(endpoint).map_err(|e| {
                        Error::config(format!("Invalid S3 endpoint '{}': {}", endpoint, e))
                    })?;
                }
            }
        }

        Ok(())
    }

    /// Address the API listens on.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| {
                Error::config(format!(
                    "Invalid bind address {}:{}: {}",
                    self.bind_address, self.port, e
                ))
            })
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .parse()
            .map_err(|e| Error::config(format!("Invalid {key} '{value}': {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_select_local_disk() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.queue_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.port, 8000);
        assert_eq!(config.agent_timeout, Duration::from_secs(300));
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.clone_timeout, Duration::from_secs(600));
        match config.storage {
            StorageMode::LocalDisk(local) => {
                assert_eq!(local.storage_dir, PathBuf::from("/tmp/storage"));
                assert_eq!(local.public_base_url, "http://localhost:8000");
            }
            other => panic!("expected local disk, got {other:?}"),
        }
    }

    #[test]
    fn empty_access_key_selects_local_disk() {
        let config = config_from(&[
            ("AWS_ACCESS_KEY_ID", ""),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
        ])
        .unwrap();
        assert_eq!(config.storage.name(), "local-disk");
    }

    #[test]
    fn credentials_select_object_storage() {
        let config = config_from(&[
            ("AWS_ACCESS_KEY_ID", "minio"),
            ("AWS_SECRET_ACCESS_KEY", "minio123"),
            ("S3_ENDPOINT_URL", "http://minio:9000"),
            ("AWS_BUCKET_NAME", "docs"),
        ])
        .unwrap();
        match config.storage {
            StorageMode::ObjectStorage(s3) => {
                assert_eq!(s3.endpoint_url.as_deref(), Some("http://minio:9000"));
                assert_eq!(s3.public_endpoint_url.as_deref(), Some("http://minio:9000"));
                assert_eq!(s3.region, "us-east-1");
                assert_eq!(s3.bucket, "docs");
            }
            other => panic!("expected object storage, got {other:?}"),
        }
    }

    #[test]
    fn render_external_url_is_a_base_url_fallback() {
        let config =
            config_from(&[("RENDER_EXTERNAL_URL", "https://docs.onrender.com")]).unwrap();
        match config.storage {
            StorageMode::LocalDisk(local) => {
                assert_eq!(local.public_base_url, "https://docs.onrender.com")
            }
            other => panic!("expected local disk, got {other:?}"),
        }
    }

    #[test]
    fn redis_url_is_a_queue_fallback() {
        let config = config_from(&[("REDIS_URL", "sqlite:queue.db")]).unwrap();
        assert_eq!(config.queue_url, "sqlite:queue.db");
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        for pairs in [
            [("API_PORT", "not-a-port")],
            [("WORKER_CONCURRENCY", "0")],
            [("AGENT_URL", "::nope::")],
            [("API_BIND_ADDRESS", "not an ip")],
            [("CLONE_TIMEOUT_SECS", "0")],
            [("QUEUE_URL", "redis://redis:6379/0")],
        ] {
            let err = config_from(&pairs).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{pairs:?}: {err}");
        }
    }
}
