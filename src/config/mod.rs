use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Prefix shared by every recognised environment override.
pub const ENV_PREFIX: &str = "BUSROSTER_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Adds the `Secure` attribute to the session cookie.
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            secure_cookies: true,
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_open")]
    pub max_open: u32,
    #[serde(default = "default_max_idle")]
    pub max_idle: u32,
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    /// Deadline applied to every database operation.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_open: default_max_open(),
            max_idle: default_max_idle(),
            max_lifetime_secs: default_max_lifetime_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

impl DatabaseConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

fn default_database_url() -> String {
    "sqlite://data/busroster.db".to_string()
}

fn default_max_open() -> u32 {
    25
}

fn default_max_idle() -> u32 {
    10
}

fn default_max_lifetime_secs() -> u64 {
    300
}

fn default_operation_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_lifetime_secs")]
    pub session_lifetime_secs: u64,
    /// Minimum gap between two sliding renewals of the same session.
    #[serde(default = "default_session_renew_interval_secs")]
    pub session_renew_interval_secs: u64,
    /// Argon2 iteration count (t_cost).
    #[serde(default = "default_password_hash_cost")]
    pub password_hash_cost: u32,
    #[serde(default = "default_password_hash_memory_kib")]
    pub password_hash_memory_kib: u32,
    #[serde(default = "default_password_hash_parallelism")]
    pub password_hash_parallelism: u32,
    /// Cap on concurrent hash operations; defaults to the worker count.
    #[serde(default)]
    pub max_concurrent_hashes: Option<usize>,
    #[serde(default = "default_lockout_threshold")]
    pub lockout_threshold: u32,
    #[serde(default = "default_lockout_window_secs")]
    pub lockout_window_secs: u64,
    #[serde(default = "default_login_attempt_retention_secs")]
    pub login_attempt_retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Only ever disabled in tests.
    #[serde(default = "default_true")]
    pub csrf_enforce: bool,
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default)]
    pub admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_lifetime_secs: default_session_lifetime_secs(),
            session_renew_interval_secs: default_session_renew_interval_secs(),
            password_hash_cost: default_password_hash_cost(),
            password_hash_memory_kib: default_password_hash_memory_kib(),
            password_hash_parallelism: default_password_hash_parallelism(),
            max_concurrent_hashes: None,
            lockout_threshold: default_lockout_threshold(),
            lockout_window_secs: default_lockout_window_secs(),
            login_attempt_retention_secs: default_login_attempt_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            csrf_enforce: true,
            admin_username: default_admin_username(),
            admin_password: None,
        }
    }
}

fn default_session_lifetime_secs() -> u64 {
    8 * 60 * 60
}

fn default_session_renew_interval_secs() -> u64 {
    5 * 60
}

fn default_password_hash_cost() -> u32 {
    3
}

fn default_password_hash_memory_kib() -> u32 {
    64 * 1024
}

fn default_password_hash_parallelism() -> u32 {
    1
}

fn default_lockout_threshold() -> u32 {
    5
}

fn default_lockout_window_secs() -> u64 {
    15 * 60
}

fn default_login_attempt_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_admin_username() -> String {
    "admin".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests per window for JSON endpoints.
    #[serde(default = "default_api_requests_per_window")]
    pub api_requests_per_window: u32,
    /// Requests per window for login and registration.
    #[serde(default = "default_auth_requests_per_window")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_requests_per_window: default_api_requests_per_window(),
            auth_requests_per_window: default_auth_requests_per_window(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_api_requests_per_window() -> u32 {
    300
}

fn default_auth_requests_per_window() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| "Failed to parse configuration file")?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `BUSROSTER_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Split out so tests do not
    /// have to mutate the process environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        if let Some(url) = get("DATABASE_URL") {
            self.database.url = url;
        }
        override_parsed(&get, "DB_MAX_OPEN", &mut self.database.max_open)?;
        override_parsed(&get, "DB_MAX_IDLE", &mut self.database.max_idle)?;
        override_parsed(
            &get,
            "DB_MAX_LIFETIME_SECS",
            &mut self.database.max_lifetime_secs,
        )?;
        override_parsed(
            &get,
            "DB_TIMEOUT_SECS",
            &mut self.database.operation_timeout_secs,
        )?;
        override_parsed(
            &get,
            "SESSION_LIFETIME_SECS",
            &mut self.auth.session_lifetime_secs,
        )?;
        override_parsed(
            &get,
            "PASSWORD_HASH_COST",
            &mut self.auth.password_hash_cost,
        )?;
        override_parsed(
            &get,
            "PASSWORD_HASH_MEMORY_KIB",
            &mut self.auth.password_hash_memory_kib,
        )?;
        override_parsed(&get, "LOCKOUT_THRESHOLD", &mut self.auth.lockout_threshold)?;
        override_parsed(
            &get,
            "LOCKOUT_WINDOW_SECS",
            &mut self.auth.lockout_window_secs,
        )?;
        override_parsed(&get, "CSRF_ENFORCE", &mut self.auth.csrf_enforce)?;
        if let Some(addr) = get("BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Some(raw) = get("TRUSTED_PROXIES") {
            self.server.trusted_proxies = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<IpAddr>().map_err(|e| {
                        anyhow::anyhow!(
                            "Invalid value for {}TRUSTED_PROXIES: {} ({})",
                            ENV_PREFIX,
                            s,
                            e
                        )
                    })
                })
                .collect::<Result<_>>()?;
        }
        if let Some(password) = get("ADMIN_PASSWORD") {
            self.auth.admin_password = Some(password);
        }

        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.database.operation_timeout_secs == 0 {
            anyhow::bail!("database.operation_timeout_secs must be greater than zero");
        }
        if self.database.max_open == 0 {
            anyhow::bail!("database.max_open must be greater than zero");
        }
        if self.auth.session_lifetime_secs == 0 {
            anyhow::bail!("auth.session_lifetime_secs must be greater than zero");
        }
        if self.auth.lockout_threshold == 0 {
            anyhow::bail!("auth.lockout_threshold must be greater than zero");
        }
        if self.auth.password_hash_cost == 0 {
            anyhow::bail!("auth.password_hash_cost must be greater than zero");
        }
        Ok(())
    }
}

fn override_parsed<T, G>(get: &G, suffix: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(suffix) {
        *target = raw.trim().parse::<T>().map_err(|e| {
            anyhow::anyhow!("Invalid value for {}{}: {} ({})", ENV_PREFIX, suffix, raw, e)
        })?;
    }
    Ok(())
}
