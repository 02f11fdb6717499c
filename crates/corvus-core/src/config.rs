use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HEALTH_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_QUEUE_SIZE: usize = 20;
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_SCHEDULER_POLL_MS: u64 = 10_000;
pub const IPC_HEARTBEAT_TIMEOUT_SECS: u64 = 30;
pub const CONTAINER_STUCK_SECS: u64 = 180;

/// Top-level config (`corvus.toml` + `CORVUS_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorvusConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub assistant_name: Option<String>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub enabled_channels: Vec<String>,
}

impl Default for CorvusConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            queue: QueueConfig::default(),
            pool: PoolConfig::default(),
            container: ContainerConfig::default(),
            scheduler: SchedulerConfig::default(),
            ipc: IpcConfig::default(),
            knowledge: KnowledgeConfig::default(),
            auth: AuthConfig::default(),
            assistant_name: None,
            timezone: None,
            enabled_channels: vec!["telegram".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_knowledge_root")]
    pub knowledge_root: String,
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            knowledge_root: default_knowledge_root(),
            workspace_root: default_workspace_root(),
        }
    }
}

/// Group-queue tuning (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Warm-pool tuning (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_min")]
    pub min_size: usize,
    #[serde(default = "default_pool_max")]
    pub max_size: usize,
    #[serde(default = "default_pool_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_pool_max_reuse")]
    pub max_reuse: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: default_pool_min(),
            max_size: default_pool_max(),
            idle_timeout_ms: default_pool_idle_timeout_ms(),
            max_reuse: default_pool_max_reuse(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "default_container_timeout_ms")]
    pub timeout_ms: u64,
    pub memory_limit: Option<String>,
    pub cpu_quota: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_container_timeout_ms(),
            memory_limit: None,
            cpu_quota: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_poll_ms")]
    pub poll_ms: u64,
    pub heartbeat_interval_hours: Option<u64>,
    pub heartbeat_silence_hours: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_ms: default_scheduler_poll_ms(),
            heartbeat_interval_hours: None,
            heartbeat_silence_hours: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IpcConfig {
    /// Auto-generated at startup if absent.
    pub secret: Option<String>,
    pub fs_watch_fallback_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KnowledgeConfig {
    pub bearer_token: Option<String>,
    pub vector_store_url: Option<String>,
    pub vector_store_token: Option<String>,
    pub embedding_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Must be >= 16 chars; used to derive a key for encrypting channel
    /// session files at rest. Validated in [`CorvusConfig::load`].
    pub passphrase: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_HEALTH_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.corvus/corvus.db")
}
fn default_knowledge_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.corvus/knowledge")
}
fn default_workspace_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.corvus/groups")
}
fn default_max_queue_size() -> usize {
    MAX_QUEUE_SIZE
}
fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}
fn default_pool_min() -> usize {
    1
}
fn default_pool_max() -> usize {
    5
}
fn default_pool_idle_timeout_ms() -> u64 {
    5 * 60 * 1000
}
fn default_pool_max_reuse() -> u32 {
    50
}
fn default_container_timeout_ms() -> u64 {
    30 * 60 * 1000
}
fn default_scheduler_poll_ms() -> u64 {
    DEFAULT_SCHEDULER_POLL_MS
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.corvus/corvus.toml")
}

impl CorvusConfig {
    /// Load config from a TOML file with `CORVUS_*` env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `CONFIG` env var
    ///   3. `~/.corvus/corvus.toml`
    ///
    /// Validation failures (e.g. a too-short passphrase) are a fatal,
    /// loud-stop condition per the error handling design — they are
    /// returned as a `Config` error rather than silently defaulted.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: CorvusConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CORVUS_").split("__"))
            .extract()
            .map_err(|e| crate::error::CorvusError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::error::Result<()> {
        if let Some(p) = &self.auth.passphrase {
            if p.len() < 16 {
                return Err(crate::error::CorvusError::Config(
                    "AUTH_PASSPHRASE must be at least 16 characters".to_string(),
                ));
            }
        }
        if self.pool.min_size > self.pool.max_size {
            return Err(crate::error::CorvusError::Config(
                "POOL_MIN_SIZE must not exceed POOL_MAX_SIZE".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = CorvusConfig::default();
        assert!(cfg.pool.min_size <= cfg.pool.max_size);
        assert_eq!(cfg.queue.max_queue_size, MAX_QUEUE_SIZE);
    }

    #[test]
    fn validate_rejects_short_passphrase() {
        let mut cfg = CorvusConfig::default();
        cfg.auth.passphrase = Some("too-short".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_long_enough_passphrase() {
        let mut cfg = CorvusConfig::default();
        cfg.auth.passphrase = Some("a".repeat(16));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_pool_bounds() {
        let mut cfg = CorvusConfig::default();
        cfg.pool.min_size = 10;
        cfg.pool.max_size = 2;
        assert!(cfg.validate().is_err());
    }
}
