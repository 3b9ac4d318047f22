use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use stratum_observability::HealthCheckConfig;
use stratum_session::{DEFAULT_MAX_ID_ATTEMPTS, DEFAULT_TIMEOUT_MINUTES, SessionManagerConfig};
use stratum_store_memory::MemoryCacheConfig;
use stratum_store_sqlite::{SqliteStoreConfig, WriteMode};

/// Tier backed by the SQLite store
pub const DURABLE_TIER: &str = "durable";
/// Tier backed by the in-process cache
pub const CACHE_TIER: &str = "cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub stores: StoresConfig,

    #[serde(default)]
    pub health: HealthCheckConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_false")]
    pub log_sql_queries: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cookie carrying the session id
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Zero or negative means sessions never expire
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: i64,

    #[serde(default = "default_max_id_attempts")]
    pub max_id_attempts: u32,

    /// Attempts made to save a session after a transient failure
    #[serde(default = "default_save_attempts")]
    pub save_attempts: u32,

    /// Minutes between expired-session purges; zero disables the purge
    #[serde(default = "default_purge_interval_minutes")]
    pub purge_interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoresConfig {
    /// Tiers in write order
    #[serde(default = "default_write_order")]
    pub write_order: Vec<String>,

    /// Tiers in read order; defaults to the reverse of `write_order`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_order: Option<Vec<String>>,

    #[serde(default = "default_sqlite")]
    pub sqlite: SqliteStoreConfig,

    #[serde(default)]
    pub cache: MemoryCacheConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            logging: LoggingConfig::default(),
            session: SessionConfig::default(),
            stores: StoresConfig::default(),
            health: HealthCheckConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_sql_queries: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            timeout_minutes: default_timeout_minutes(),
            max_id_attempts: default_max_id_attempts(),
            save_attempts: default_save_attempts(),
            purge_interval_minutes: default_purge_interval_minutes(),
        }
    }
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            write_order: default_write_order(),
            read_order: None,
            sqlite: default_sqlite(),
            cache: MemoryCacheConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn manager_config(&self) -> SessionManagerConfig {
        SessionManagerConfig::new()
            .with_timeout_minutes(self.timeout_minutes)
            .with_max_id_attempts(self.max_id_attempts)
    }
}

impl StoresConfig {
    /// Read order after applying the default
    pub fn effective_read_order(&self) -> Vec<String> {
        match &self.read_order {
            Some(order) => order.clone(),
            None => self.write_order.iter().rev().cloned().collect(),
        }
    }

    /// Whether the named tier takes part in the chain
    pub fn uses(&self, tier: &str) -> bool {
        self.write_order.iter().any(|name| name == tier)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.write_order.is_empty() {
            return Err("stores.write_order must name at least one tier".to_string());
        }

        let mut seen = HashSet::new();
        for name in &self.write_order {
            if name != DURABLE_TIER && name != CACHE_TIER {
                return Err(format!(
                    "unknown tier '{}' in stores.write_order (expected '{}' or '{}')",
                    name, DURABLE_TIER, CACHE_TIER
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(format!("tier '{}' appears twice in stores.write_order", name));
            }
        }

        let read_order = self.effective_read_order();
        let read_set: HashSet<&str> = read_order.iter().map(String::as_str).collect();
        if read_order.len() != self.write_order.len() || read_set != seen {
            return Err(
                "stores.read_order must name the same tiers as stores.write_order".to_string(),
            );
        }

        if self.uses(DURABLE_TIER) {
            self.sqlite.validate()?;
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        // Server settings
        if let Ok(val) = std::env::var("STRATUM_HOST") {
            self.host = val;
        }

        if let Ok(val) = std::env::var("STRATUM_PORT")
            && let Ok(port) = val.parse::<u16>()
        {
            self.port = port;
        }

        // Logging settings
        if let Ok(val) = std::env::var("STRATUM_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("STRATUM_LOG_SQL_QUERIES")
            && let Ok(enabled) = val.parse::<bool>()
        {
            self.logging.log_sql_queries = enabled;
        }

        // Session settings
        if let Ok(val) = std::env::var("STRATUM_COOKIE_NAME") {
            self.session.cookie_name = val;
        }

        if let Ok(val) = std::env::var("STRATUM_SESSION_TIMEOUT_MINUTES") {
            match val.parse::<i64>() {
                Ok(minutes) => self.session.timeout_minutes = minutes,
                Err(_) => eprintln!(
                    "Warning: Invalid STRATUM_SESSION_TIMEOUT_MINUTES '{}', using {}",
                    val, self.session.timeout_minutes
                ),
            }
        }

        // Store settings
        if let Ok(val) = std::env::var("STRATUM_WRITE_ORDER") {
            self.stores.write_order = split_list(&val);
        }

        if let Ok(val) = std::env::var("STRATUM_READ_ORDER") {
            self.stores.read_order = Some(split_list(&val));
        }

        if let Ok(val) = std::env::var("STRATUM_SQLITE_PATH") {
            self.stores.sqlite.path = val.into();
        }

        if let Ok(val) = std::env::var("STRATUM_SQLITE_WRITE_MODE") {
            match val.to_lowercase().as_str() {
                "sync" => self.stores.sqlite.write_mode = WriteMode::Sync,
                "deferred" => self.stores.sqlite.write_mode = WriteMode::Deferred,
                _ => eprintln!(
                    "Warning: Invalid STRATUM_SQLITE_WRITE_MODE '{}', using default",
                    val
                ),
            }
        }

        // Health settings
        if let Ok(val) = std::env::var("STRATUM_HEALTH_CHECK_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            self.health.check_interval_secs = secs;
        }

        if let Ok(val) = std::env::var("STRATUM_DEV_MODE")
            && let Ok(enabled) = val.parse::<bool>()
        {
            self.health.dev_mode = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.session.cookie_name.is_empty() {
            return Err("session.cookie_name must not be empty".to_string());
        }
        if self.session.save_attempts == 0 {
            return Err("session.save_attempts must be at least 1".to_string());
        }
        self.session.manager_config().validate()?;
        self.stores.validate()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cookie_name() -> String {
    "JSESSIONID".to_string()
}

fn default_timeout_minutes() -> i64 {
    DEFAULT_TIMEOUT_MINUTES
}

fn default_max_id_attempts() -> u32 {
    DEFAULT_MAX_ID_ATTEMPTS
}

fn default_save_attempts() -> u32 {
    3
}

fn default_purge_interval_minutes() -> u64 {
    60
}

fn default_write_order() -> Vec<String> {
    vec![DURABLE_TIER.to_string(), CACHE_TIER.to_string()]
}

fn default_sqlite() -> SqliteStoreConfig {
    SqliteStoreConfig::new("./sessions.db")
}

fn default_false() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.session.cookie_name, "JSESSIONID");
        assert_eq!(config.session.timeout_minutes, 30);
        assert_eq!(config.session.save_attempts, 3);
        assert_eq!(config.stores.write_order, vec!["durable", "cache"]);
        assert_eq!(config.stores.effective_read_order(), vec!["cache", "durable"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "port: 9000\nsession:\n  timeout_minutes: 5\nstores:\n  write_order: [cache]\n  sqlite:\n    path: /tmp/s.db\n    write_mode: deferred\n"
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.session.timeout_minutes, 5);
        assert_eq!(config.session.cookie_name, "JSESSIONID");
        assert_eq!(config.stores.write_order, vec!["cache"]);
        assert_eq!(config.stores.sqlite.write_mode, WriteMode::Deferred);
        assert!(!config.stores.uses(DURABLE_TIER));
    }

    #[test]
    fn test_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "host = \"0.0.0.0\"\n\n[health]\ncheck_interval_secs = 10\ndev_mode = true\n"
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.health.check_interval_secs, 10);
        assert!(config.health.dev_mode);
        assert_eq!(config.health.trusted_prefixes.len(), 3);
    }

    #[test]
    fn test_store_order_validation() {
        let mut stores = StoresConfig::default();
        stores.write_order = vec!["durable".to_string(), "redis".to_string()];
        assert!(stores.validate().unwrap_err().contains("unknown tier"));

        stores.write_order = vec!["cache".to_string(), "cache".to_string()];
        assert!(stores.validate().unwrap_err().contains("twice"));

        stores.write_order = vec!["durable".to_string(), "cache".to_string()];
        stores.read_order = Some(vec!["cache".to_string()]);
        assert!(stores.validate().is_err());

        stores.read_order = Some(vec!["durable".to_string(), "cache".to_string()]);
        assert!(stores.validate().is_ok());

        stores.write_order.clear();
        assert!(stores.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_merge_env() {
        // SAFETY: serialized with other env-mutating tests
        unsafe {
            std::env::set_var("STRATUM_PORT", "9191");
            std::env::set_var("STRATUM_WRITE_ORDER", "cache, durable");
            std::env::set_var("STRATUM_SQLITE_WRITE_MODE", "Deferred");
            std::env::set_var("STRATUM_SESSION_TIMEOUT_MINUTES", "not-a-number");
        }

        let mut config = ServerConfig::default();
        config.merge_env();

        unsafe {
            std::env::remove_var("STRATUM_PORT");
            std::env::remove_var("STRATUM_WRITE_ORDER");
            std::env::remove_var("STRATUM_SQLITE_WRITE_MODE");
            std::env::remove_var("STRATUM_SESSION_TIMEOUT_MINUTES");
        }

        assert_eq!(config.port, 9191);
        assert_eq!(config.stores.write_order, vec!["cache", "durable"]);
        assert_eq!(config.stores.sqlite.write_mode, WriteMode::Deferred);
        assert_eq!(config.session.timeout_minutes, 30);
    }
}
