//! Gateway configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/warm-gate/gateway.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `worker.command`
//!
//! Everything else has a default.  The WebSocket auth token, when configured,
//! is read from `http.token_file` (raw token on a single line; trimmed).

use crate::classify::SlowPolicy;
use crate::worker::WorkerConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config types (validated)
// ---------------------------------------------------------------------------

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub schema_version: u32,
    pub http: HttpConfig,
    pub worker: WorkerSection,
    pub pools: PoolsConfig,
    pub slow: SlowConfig,
    pub reload: ReloadConfig,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind: String,
    /// Optional directory served under `/static`.
    pub static_dir: Option<PathBuf>,
    /// Bearer token required for WebSocket upgrades (read from the file,
    /// not the file path).  None disables the check.
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerSection {
    pub command: String,
    pub entrypoint: String,
    pub marker: String,
    pub project_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PoolsConfig {
    pub fast: usize,
    pub slow: usize,
    pub max_requests: u64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SlowConfig {
    pub prefixes: Vec<String>,
    pub methods: Vec<String>,
    pub body_threshold: usize,
}

#[derive(Debug, Clone)]
pub struct ReloadConfig {
    pub enabled: bool,
    pub watch: Vec<PathBuf>,
}

impl GatewayConfig {
    /// The spawn/lifecycle settings every worker shares.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            command: self.worker.command.clone(),
            entrypoint: self.worker.entrypoint.clone(),
            marker: self.worker.marker.clone(),
            project_root: self.worker.project_root.clone(),
            max_requests: self.pools.max_requests,
            request_timeout: Duration::from_millis(self.pools.request_timeout_ms),
        }
    }

    pub fn slow_policy(&self) -> SlowPolicy {
        SlowPolicy {
            prefixes: self.slow.prefixes.clone(),
            methods: self
                .slow
                .methods
                .iter()
                .map(|m| m.to_ascii_uppercase())
                .collect::<HashSet<_>>(),
            body_threshold: self.slow.body_threshold,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    http: Option<RawHttpConfig>,
    worker: Option<RawWorkerConfig>,
    pools: Option<RawPoolsConfig>,
    slow: Option<RawSlowConfig>,
    reload: Option<RawReloadConfig>,
}

#[derive(Debug, Deserialize)]
struct RawHttpConfig {
    bind: Option<String>,
    static_dir: Option<PathBuf>,
    token_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawWorkerConfig {
    command: Option<String>,
    entrypoint: Option<String>,
    marker: Option<String>,
    project_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawPoolsConfig {
    fast: Option<usize>,
    slow: Option<usize>,
    max_requests: Option<u64>,
    request_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawSlowConfig {
    prefixes: Option<Vec<String>>,
    methods: Option<Vec<String>>,
    body_threshold: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawReloadConfig {
    enabled: Option<bool>,
    watch: Option<Vec<PathBuf>>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load gateway config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load gateway config from the default path `/etc/warm-gate/gateway.toml`.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/warm-gate/gateway.toml"))
}

/// Load gateway config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    // Validate schema_version
    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    // Validate worker (command is the one required field)
    let raw_worker = raw
        .worker
        .ok_or_else(|| ConfigError::MissingField("worker".to_owned()))?;
    let command = raw_worker
        .command
        .ok_or_else(|| ConfigError::MissingField("worker.command".to_owned()))?;
    let worker = WorkerSection {
        command,
        entrypoint: raw_worker.entrypoint.unwrap_or_else(|| "worker.php".to_owned()),
        marker: raw_worker.marker.unwrap_or_else(|| "composer.json".to_owned()),
        project_root: raw_worker.project_root.unwrap_or_else(|| PathBuf::from(".")),
    };

    // HTTP defaults + optional token file
    let http = match raw.http {
        Some(h) => HttpConfig {
            bind: h.bind.unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
            static_dir: h.static_dir,
            auth_token: match h.token_file {
                Some(path) => Some(read_token_file(&path)?),
                None => None,
            },
        },
        None => HttpConfig {
            bind: "0.0.0.0:8080".to_owned(),
            static_dir: None,
            auth_token: None,
        },
    };

    // Pool defaults
    let pools = match raw.pools {
        Some(p) => PoolsConfig {
            fast: p.fast.unwrap_or(4),
            slow: p.slow.unwrap_or(2),
            max_requests: p.max_requests.unwrap_or(500),
            request_timeout_ms: p.request_timeout_ms.unwrap_or(30_000),
        },
        None => PoolsConfig {
            fast: 4,
            slow: 2,
            max_requests: 500,
            request_timeout_ms: 30_000,
        },
    };
    if pools.fast == 0 || pools.slow == 0 {
        return Err(ConfigError::InvalidValue(
            "pool sizes must be at least 1".to_owned(),
        ));
    }
    if pools.max_requests == 0 {
        return Err(ConfigError::InvalidValue(
            "pools.max_requests must be at least 1".to_owned(),
        ));
    }

    // Slow-classification defaults
    let slow = match raw.slow {
        Some(s) => SlowConfig {
            prefixes: s.prefixes.unwrap_or_default(),
            methods: s
                .methods
                .unwrap_or_else(|| vec!["PUT".to_owned(), "DELETE".to_owned()]),
            body_threshold: s.body_threshold.unwrap_or(2_000_000),
        },
        None => SlowConfig {
            prefixes: Vec::new(),
            methods: vec!["PUT".to_owned(), "DELETE".to_owned()],
            body_threshold: 2_000_000,
        },
    };

    // Hot-reload defaults
    let reload = match raw.reload {
        Some(r) => ReloadConfig {
            enabled: r.enabled.unwrap_or(false),
            watch: r.watch.unwrap_or_default(),
        },
        None => ReloadConfig {
            enabled: false,
            watch: Vec::new(),
        },
    };

    Ok(GatewayConfig {
        schema_version,
        http,
        worker,
        pools,
        slow,
        reload,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Token file reader
// ---------------------------------------------------------------------------

fn read_token_file(path: &str) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading token file '{}': {}", path, e)))?;
    Ok(content.trim().to_owned())
}
