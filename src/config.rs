use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Endpoint value that selects the in-process store instead of KeyDB.
pub const MEMORY_ENDPOINT: &str = "memory://";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    pub keydb: KeyDbConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

// ---------------------------------------------------------------------------
// Service identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Logical service name, e.g. `order` or `inventory`.  Prefixes the node
    /// id used as lock holder token.
    #[serde(default = "default_service_name")]
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "orderbus".to_string()
}

// ---------------------------------------------------------------------------
// KeyDB / Redis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct KeyDbConfig {
    /// Connection string (e.g. `redis://keydb.local:6379`), or `memory://`
    /// for a store that lives inside this process.
    pub endpoint: String,
    /// Enable TLS for the KeyDB connection.
    #[serde(default)]
    pub tls: bool,
    /// Name of the environment variable that holds the KeyDB auth token.
    #[serde(default = "default_keydb_auth_env")]
    pub auth_token_env: String,
    /// Connections in the command pool (locks, health checks).  Publishing
    /// and each subscription get their own connection on top of these.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl KeyDbConfig {
    pub fn is_memory(&self) -> bool {
        self.endpoint == MEMORY_ENDPOINT
    }
}

fn default_keydb_auth_env() -> String {
    "KEYDB_AUTH_TOKEN".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn bool_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:3000`).
    #[serde(default = "default_http_listen")]
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_http_listen(),
        }
    }
}

fn default_http_listen() -> String {
    "0.0.0.0:3000".to_string()
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Run the deduplicating subscriber in this process.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Channel orders are published on and consumed from.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Prefix of lock keys; the message identifier is appended.
    #[serde(default = "default_lock_prefix")]
    pub lock_prefix: String,
    /// TTL (milliseconds) of the per-message lock.  Must exceed worst-case
    /// processing time, otherwise a duplicate may slip through.
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
    /// Simulated work per order in the default handler.
    #[serde(default = "default_processing_delay_ms")]
    pub processing_delay_ms: u64,
}

impl DispatchConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: default_channel(),
            lock_prefix: default_lock_prefix(),
            lock_ttl_ms: default_lock_ttl_ms(),
            processing_delay_ms: default_processing_delay_ms(),
        }
    }
}

fn default_channel() -> String {
    "order_updates".to_string()
}

fn default_lock_prefix() -> String {
    "lock:".to_string()
}

fn default_lock_ttl_ms() -> u64 {
    5000
}

fn default_processing_delay_ms() -> u64 {
    1000
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.service.name.is_empty(),
        "service.name must not be empty"
    );
    anyhow::ensure!(
        !config.keydb.endpoint.is_empty(),
        "keydb.endpoint must not be empty"
    );
    anyhow::ensure!(config.keydb.pool_size >= 1, "keydb.pool_size must be >= 1");
    anyhow::ensure!(
        config.http.enabled || config.dispatch.enabled,
        "at least one of http.enabled and dispatch.enabled must be true"
    );
    anyhow::ensure!(
        !config.dispatch.channel.is_empty(),
        "dispatch.channel must not be empty"
    );
    anyhow::ensure!(
        !config.dispatch.lock_prefix.is_empty(),
        "dispatch.lock_prefix must not be empty"
    );
    anyhow::ensure!(
        config.dispatch.lock_ttl_ms > 0,
        "dispatch.lock_ttl_ms must be > 0"
    );
    anyhow::ensure!(
        config.dispatch.processing_delay_ms < config.dispatch.lock_ttl_ms,
        "dispatch.processing_delay_ms must be below dispatch.lock_ttl_ms"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config("keydb:\n  endpoint: redis://keydb.local:6379\n");
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.service.name, "orderbus");
        assert!(!config.keydb.tls);
        assert_eq!(config.keydb.auth_token_env, "KEYDB_AUTH_TOKEN");
        assert_eq!(config.keydb.pool_size, 4);
        assert!(config.http.enabled);
        assert_eq!(config.http.listen, "0.0.0.0:3000");
        assert!(config.dispatch.enabled);
        assert_eq!(config.dispatch.channel, "order_updates");
        assert_eq!(config.dispatch.lock_prefix, "lock:");
        assert_eq!(config.dispatch.lock_ttl(), Duration::from_millis(5000));
        assert_eq!(config.dispatch.processing_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn memory_endpoint_is_detected() {
        let file = write_config("keydb:\n  endpoint: memory://\n");
        let config = load_config(file.path()).unwrap();
        assert!(config.keydb.is_memory());
    }

    #[test]
    fn processing_delay_must_fit_inside_lock_ttl() {
        let file = write_config(
            "keydb:\n  endpoint: memory://\ndispatch:\n  lock_ttl_ms: 500\n  processing_delay_ms: 500\n",
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("processing_delay_ms"));
    }

    #[test]
    fn rejects_config_with_nothing_to_run() {
        let file = write_config(
            "keydb:\n  endpoint: memory://\nhttp:\n  enabled: false\ndispatch:\n  enabled: false\n",
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config("/nonexistent/orderbus.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/orderbus.yaml"));
    }
}
