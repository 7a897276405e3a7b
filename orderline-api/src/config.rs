//! Application Configuration
//!
//! Configuration is read either from a YAML file or from `ORDERLINE_*`
//! environment variables. Both paths fill the same optional sections, so a
//! missing key always falls back to the same default.
//!
//! YAML layout:
//!
//! ```yaml
//! http:
//!   host: 0.0.0.0
//!   port: 8081
//!   read_timeout_secs: 10
//!   static_dir: web/static
//! database:
//!   host: localhost
//!   port: 5432
//!   user: postgres
//!   password: secret
//!   dbname: orderline
//!   pool_size: 25
//!   timeout_secs: 30
//! cache:
//!   capacity: 1000
//!   ttl_secs: 900
//!   sweep_interval_secs: 60
//! ingest:
//!   source: kafka            # or `postgres`; defaults to kafka when built with it
//!   brokers: ["localhost:9092"]
//!   topic: orders
//!   group_id: orderline
//!   partitions: [0]
//!   poll_interval_ms: 500
//!   fetch_retry_delay_ms: 1000
//!   max_attempts: 3
//!   retry_backoff_ms: 200
//! shutdown_timeout_secs: 30
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use orderline_events::IngestConfig;
use orderline_storage::CacheConfig;
use serde::Deserialize;

use crate::db::DbConfig;
use crate::error::{ApiError, ApiResult};

/// Environment variable naming the YAML configuration file.
pub const CONFIG_PATH_ENV: &str = "ORDERLINE_CONFIG";

// ============================================================================
// RESOLVED CONFIGURATION
// ============================================================================

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on handling a single request
    pub request_timeout: Duration,
    /// Directory holding the lookup page (`index.html`) and its assets
    pub static_dir: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            request_timeout: Duration::from_secs(10),
            static_dir: PathBuf::from("web/static"),
        }
    }
}

impl HttpConfig {
    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ApiError::invalid_config(format!("Invalid bind address {}: {}", addr, e)))
    }
}

/// Where the ingestion loop reads order messages from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestSource {
    /// The producer's Kafka topic.
    Kafka,
    /// The PostgreSQL-backed message log.
    Postgres,
}

impl Default for IngestSource {
    /// Kafka when the binary is built with the `kafka` feature.
    fn default() -> Self {
        if cfg!(feature = "kafka") {
            Self::Kafka
        } else {
            Self::Postgres
        }
    }
}

impl FromStr for IngestSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(Self::Kafka),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown ingest source '{}'", other)),
        }
    }
}

/// Kafka connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    /// Minimum bytes a fetch waits for
    pub min_bytes: u32,
    /// Maximum bytes returned by one fetch
    pub max_bytes: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "orders".to_string(),
            min_bytes: 10_000,
            max_bytes: 10_000_000,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DbConfig,
    pub cache: CacheConfig,
    pub ingest: IngestConfig,
    pub ingest_source: IngestSource,
    pub kafka: KafkaConfig,
    /// Bound on draining in-flight requests and background tasks
    pub shutdown_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            database: DbConfig::default(),
            cache: CacheConfig::default(),
            ingest: IngestConfig::default(),
            ingest_source: IngestSource::default(),
            kafka: KafkaConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> ApiResult<Self> {
        let file: FileConfig = serde_yaml::from_str(yaml)?;
        file.resolve()
    }

    /// Read and parse a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            ApiError::invalid_config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Build from `ORDERLINE_*` environment variables.
    pub fn from_env() -> ApiResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> ApiResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        FileConfig::from_lookup(&lookup)?.resolve()
    }

    /// The YAML file named by `ORDERLINE_CONFIG` when set, else the environment.
    pub fn load() -> ApiResult<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                tracing::info!(path = %path, "Loading configuration file");
                Self::from_yaml_file(path.trim())
            }
            _ => Self::from_env(),
        }
    }
}

// ============================================================================
// FILE / ENVIRONMENT SECTIONS
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    http: HttpSection,
    database: DatabaseSection,
    cache: CacheSection,
    ingest: IngestSection,
    shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HttpSection {
    host: Option<String>,
    port: Option<u16>,
    read_timeout_secs: Option<u64>,
    static_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DatabaseSection {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    dbname: Option<String>,
    pool_size: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CacheSection {
    capacity: Option<usize>,
    ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IngestSection {
    source: Option<String>,
    brokers: Option<Vec<String>>,
    topic: Option<String>,
    min_bytes: Option<u32>,
    max_bytes: Option<u32>,
    group_id: Option<String>,
    partitions: Option<Vec<i32>>,
    poll_interval_ms: Option<u64>,
    fetch_retry_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

impl FileConfig {
    fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> ApiResult<Self> {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            http: HttpSection {
                host: text("ORDERLINE_HTTP_HOST"),
                port: match parsed(lookup, "PORT")? {
                    Some(port) => Some(port),
                    None => parsed(lookup, "ORDERLINE_HTTP_PORT")?,
                },
                read_timeout_secs: parsed(lookup, "ORDERLINE_HTTP_READ_TIMEOUT_SECS")?,
                static_dir: text("ORDERLINE_HTTP_STATIC_DIR").map(PathBuf::from),
            },
            database: DatabaseSection {
                host: text("ORDERLINE_DB_HOST"),
                port: parsed(lookup, "ORDERLINE_DB_PORT")?,
                user: text("ORDERLINE_DB_USER"),
                // passwords are taken verbatim
                password: lookup("ORDERLINE_DB_PASSWORD"),
                dbname: text("ORDERLINE_DB_NAME"),
                pool_size: parsed(lookup, "ORDERLINE_DB_POOL_SIZE")?,
                timeout_secs: parsed(lookup, "ORDERLINE_DB_TIMEOUT_SECS")?,
            },
            cache: CacheSection {
                capacity: parsed(lookup, "ORDERLINE_CACHE_CAPACITY")?,
                ttl_secs: parsed(lookup, "ORDERLINE_CACHE_TTL_SECS")?,
                sweep_interval_secs: parsed(lookup, "ORDERLINE_CACHE_SWEEP_INTERVAL_SECS")?,
            },
            ingest: IngestSection {
                source: text("ORDERLINE_INGEST_SOURCE"),
                brokers: text("ORDERLINE_KAFKA_BROKERS").map(|v| list(&v)),
                topic: text("ORDERLINE_KAFKA_TOPIC"),
                min_bytes: parsed(lookup, "ORDERLINE_KAFKA_MIN_BYTES")?,
                max_bytes: parsed(lookup, "ORDERLINE_KAFKA_MAX_BYTES")?,
                group_id: text("ORDERLINE_INGEST_GROUP_ID"),
                partitions: partition_list(lookup, "ORDERLINE_INGEST_PARTITIONS")?,
                poll_interval_ms: parsed(lookup, "ORDERLINE_INGEST_POLL_INTERVAL_MS")?,
                fetch_retry_delay_ms: parsed(lookup, "ORDERLINE_INGEST_FETCH_RETRY_DELAY_MS")?,
                max_attempts: parsed(lookup, "ORDERLINE_INGEST_MAX_ATTEMPTS")?,
                retry_backoff_ms: parsed(lookup, "ORDERLINE_INGEST_RETRY_BACKOFF_MS")?,
            },
            shutdown_timeout_secs: parsed(lookup, "ORDERLINE_SHUTDOWN_TIMEOUT_SECS")?,
        })
    }

    fn resolve(self) -> ApiResult<AppConfig> {
        let http_defaults = HttpConfig::default();
        let http = HttpConfig {
            host: self.http.host.unwrap_or(http_defaults.host),
            port: self.http.port.unwrap_or(http_defaults.port),
            request_timeout: self
                .http
                .read_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(http_defaults.request_timeout),
            static_dir: self.http.static_dir.unwrap_or(http_defaults.static_dir),
        };

        let db_defaults = DbConfig::default();
        let database = DbConfig {
            host: self.database.host.unwrap_or(db_defaults.host),
            port: self.database.port.unwrap_or(db_defaults.port),
            dbname: self.database.dbname.unwrap_or(db_defaults.dbname),
            user: self.database.user.unwrap_or(db_defaults.user),
            password: self.database.password.unwrap_or(db_defaults.password),
            max_size: self.database.pool_size.unwrap_or(db_defaults.max_size),
            timeout: self
                .database
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(db_defaults.timeout),
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            capacity: self.cache.capacity.unwrap_or(cache_defaults.capacity),
            ttl: self
                .cache
                .ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(cache_defaults.ttl),
            sweep_interval: self
                .cache
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(cache_defaults.sweep_interval),
        }
        .sanitized();

        let ingest_source = match self.ingest.source.as_deref() {
            Some(source) => source.parse::<IngestSource>().map_err(|e| {
                ApiError::invalid_config(format!("Invalid ingest.source: {}", e))
            })?,
            None => IngestSource::default(),
        };

        let kafka_defaults = KafkaConfig::default();
        let kafka = KafkaConfig {
            brokers: self
                .ingest
                .brokers
                .filter(|b| !b.is_empty())
                .unwrap_or(kafka_defaults.brokers),
            topic: self.ingest.topic.unwrap_or(kafka_defaults.topic),
            min_bytes: self.ingest.min_bytes.unwrap_or(kafka_defaults.min_bytes),
            max_bytes: self.ingest.max_bytes.unwrap_or(kafka_defaults.max_bytes),
        };

        let ingest_defaults = IngestConfig::default();
        let ingest = IngestConfig {
            group_id: self.ingest.group_id.unwrap_or(ingest_defaults.group_id),
            partitions: self
                .ingest
                .partitions
                .filter(|p| !p.is_empty())
                .unwrap_or(ingest_defaults.partitions),
            poll_interval: self
                .ingest
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(ingest_defaults.poll_interval),
            fetch_retry_delay: self
                .ingest
                .fetch_retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(ingest_defaults.fetch_retry_delay),
            max_attempts: self.ingest.max_attempts.unwrap_or(ingest_defaults.max_attempts),
            retry_backoff: self
                .ingest
                .retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(ingest_defaults.retry_backoff),
        };

        Ok(AppConfig {
            http,
            database,
            cache,
            ingest,
            ingest_source,
            kafka,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs.unwrap_or(30)),
        })
    }
}

fn parsed<T>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> ApiResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).map(|v| v.trim().to_string()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| ApiError::invalid_config(format!("Invalid value for {}: {} ({})", key, v, e))),
    }
}

fn list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn partition_list(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> ApiResult<Option<Vec<i32>>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let partitions = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<i32>().map_err(|e| {
                ApiError::invalid_config(format!("Invalid partition in {}: {} ({})", key, p, e))
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Some(partitions))
}
