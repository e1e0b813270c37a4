//! Layered service configuration.
//!
//! Sources, later overriding earlier: optional `config.yaml`, a file named
//! by `TXWEAVE_CONFIG`, environment variables with the `TXWEAVE__` prefix,
//! and finally the flat legacy names (`SERVER_HOST`, `DATABASE_URL`,
//! `USER_TABLE`, ...) the deployment scripts export.

use serde::Deserialize;

/// Service role names. A receiver list is built from these; the stage
/// context's origin field carries the coordinator's own name.
pub const SERVICE_USER: &str = "user";
pub const SERVICE_EVENT: &str = "event";
pub const SERVICE_EVENT_LOG: &str = "event-log";

/// Env filter variable for log verbosity.
pub const LOG_ENV_VAR: &str = "TXWEAVE_LOG";

#[derive(Debug, thiserror::Error)]
#[error("failed to load configuration: {0}")]
pub struct ConfigError(#[from] ::config::ConfigError);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Host peers and recovery use to reach this process; defaults to a
    /// loopback-usable rendering of `host`.
    pub advertise_host: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            advertise_host: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL under which this process can call itself.
    pub fn advertise_url(&self) -> String {
        let host = match &self.advertise_host {
            Some(host) => host.clone(),
            None if self.host == "0.0.0.0" => "127.0.0.1".to_string(),
            None => self.host.clone(),
        };
        format!("http://{}:{}", host, self.port)
    }
}

/// Which backend the journal and domain stores run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Postgres,
            database_url: String::new(),
        }
    }
}

/// Table-role flags: which domain store(s) this process owns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TableRoles {
    pub user: bool,
    pub event: bool,
    pub event_log: bool,
}

/// Peer service base URLs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub user: String,
    pub event: String,
    pub event_log: String,
}

impl PeerConfig {
    /// Base URL for a receiver service name.
    pub fn url(&self, service: &str) -> Option<&str> {
        match service {
            SERVICE_USER => Some(self.user.as_str()),
            SERVICE_EVENT => Some(self.event.as_str()),
            SERVICE_EVENT_LOG => Some(self.event_log.as_str()),
            _ => None,
        }
        .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    /// Partition classes; 0 means the default (100).
    pub partitions: u64,
    pub tables: TableRoles,
    pub peers: PeerConfig,
}

impl Config {
    /// Load configuration from files and environment.
    pub fn load() -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new("config", FileFormat::Yaml).required(false))
            .add_source(File::new("config.yaml", FileFormat::Yaml).required(false));

        if let Ok(path) = std::env::var("TXWEAVE_CONFIG") {
            builder = builder.add_source(File::new(&path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("TXWEAVE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = config.try_deserialize()?;
        config.apply_legacy_env();
        Ok(config)
    }

    /// Fold in the flat legacy environment variables.
    fn apply_legacy_env(&mut self) {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        if let Some(host) = env("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env("SERVER_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(url) = env("DATABASE_URL") {
            self.storage.database_url = url;
        }
        if let Some(user) = env("USER_SERVICE") {
            self.peers.user = with_scheme(&user);
        }
        if let Some(event) = env("EVENT_SERVICE") {
            self.peers.event = with_scheme(&event);
        }
        if let Some(event_log) = env("EVENT_LOG_SERVICE") {
            self.peers.event_log = with_scheme(&event_log);
        }
        self.tables.user |= env("USER_TABLE").as_deref() == Some("true");
        self.tables.event |= env("EVENT_TABLE").as_deref() == Some("true");
        self.tables.event_log |= env("EVENT_LOG_TABLE").as_deref() == Some("true");
    }

    /// In-memory configuration for tests and embedded wiring.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                database_url: String::new(),
            },
            partitions: 10,
            ..Default::default()
        }
    }
}

fn with_scheme(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}
