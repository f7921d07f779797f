use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::ConflictPolicy;

/// Server settings, read once from `TIMETABLE_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends after which a tenant's log is compacted.
    pub compact_threshold: u64,
    pub policy: ConflictPolicy,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "timetable".into(),
            max_connections: 256,
            compact_threshold: 1000,
            policy: ConflictPolicy::PerDimension,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

#[derive(Debug)]
pub struct ConfigError(String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let policy = match get("TIMETABLE_CONFLICT_POLICY") {
            Some(s) => s.parse().map_err(ConfigError)?,
            None => defaults.policy,
        };
        let tls_cert = get("TIMETABLE_TLS_CERT");
        let tls_key = get("TIMETABLE_TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError(
                "both TIMETABLE_TLS_CERT and TIMETABLE_TLS_KEY must be set, or neither".into(),
            ));
        }

        Ok(Self {
            bind: get("TIMETABLE_BIND").unwrap_or(defaults.bind),
            port: parsed(&get, "TIMETABLE_PORT").unwrap_or(defaults.port),
            data_dir: get("TIMETABLE_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: get("TIMETABLE_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&get, "TIMETABLE_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&get, "TIMETABLE_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            policy,
            tls_cert,
            tls_key,
            metrics_port: parsed(&get, "TIMETABLE_METRICS_PORT"),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse().ok())
}
