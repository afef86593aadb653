//! Layered configuration for the relay server.
//!
//! Precedence, lowest first:
//! 1. built-in defaults
//! 2. TOML file (`--config`, `DBRELAY_CONFIG`, or `./dbrelay.toml`)
//! 3. environment variables
//! 4. CLI flags (applied by the binary)
//!
//! Environment variables:
//!   DATABASE_URL                     # full connection string
//!   PSQL_DB_USER / PSQL_DB_PASSWORD  # used when DATABASE_URL is unset
//!   PSQL_DB_HOST (postgres), PSQL_DB_PORT (5432), PSQL_DB_NAME (project1)
//!   DBRELAY_BIND                     # e.g. 0.0.0.0:8000
//!   DBRELAY_CORS_PERMISSIVE          # true/false
//!   DBRELAY_MAX_CONNECTIONS
//!   DBRELAY_CHANNEL / DBRELAY_GROUP

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "dbrelay.toml";

/// Channel and group name used by the shipped triggers.
pub const DEFAULT_CHANNEL: &str = "db_changes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub cors_permissive: bool,
    pub max_connections: u32,
    pub relay: RelaySettings,
}

/// Settings for the notification relay itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelaySettings {
    /// PostgreSQL channel to LISTEN on
    pub channel: String,
    /// Broadcast group subscribers join
    pub group: String,
    /// WebSocket endpoint path
    pub ws_path: String,
    /// Delay before the first upstream connect
    pub startup_grace_ms: u64,
    /// Upper bound on a single wait for notifications
    pub poll_timeout_ms: u64,
    /// Fixed delay between reconnect attempts
    pub reconnect_backoff_ms: u64,
    /// Outbound frames queued per session before events are dropped
    pub session_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            cors_permissive: false,
            max_connections: 5,
            relay: RelaySettings::default(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            group: DEFAULT_CHANNEL.to_string(),
            ws_path: "/ws/changes/".to_string(),
            startup_grace_ms: 2_000,
            poll_timeout_ms: 1_000,
            reconnect_backoff_ms: 5_000,
            session_buffer: 256,
        }
    }
}

impl RelaySettings {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

impl RelayConfig {
    /// Load defaults, then the config file (if any), then the process
    /// environment, and validate the result.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(explicit, |var| std::env::var(var).ok())
    }

    /// Same as [`RelayConfig::load`] with an injectable environment.
    pub fn load_with<F>(explicit: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match Self::resolve_path(explicit, &env) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config file");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn resolve_path<F>(explicit: Option<&Path>, env: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = env("DBRELAY_CONFIG").filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        local.exists().then_some(local)
    }

    /// Apply environment overrides on top of the current values.
    pub fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = env("DATABASE_URL").filter(|u| !u.is_empty()) {
            self.database_url = Some(url);
        } else if let Some(user) = env("PSQL_DB_USER").filter(|u| !u.is_empty()) {
            let password = env("PSQL_DB_PASSWORD").unwrap_or_default();
            let host = env("PSQL_DB_HOST").unwrap_or_else(|| "postgres".to_string());
            let port = env("PSQL_DB_PORT").unwrap_or_else(|| "5432".to_string());
            let name = env("PSQL_DB_NAME").unwrap_or_else(|| "project1".to_string());
            self.database_url = Some(format!(
                "postgres://{}:{}@{}:{}/{}",
                urlencoding::encode(&user),
                urlencoding::encode(&password),
                host,
                port,
                name
            ));
        }

        if let Some(bind) = env("DBRELAY_BIND") {
            self.bind_addr = bind
                .parse()
                .map_err(|e| ConfigError::env("DBRELAY_BIND", e))?;
        }
        if let Some(flag) = env("DBRELAY_CORS_PERMISSIVE") {
            self.cors_permissive =
                parse_bool(&flag).ok_or_else(|| ConfigError::env("DBRELAY_CORS_PERMISSIVE", "expected true or false"))?;
        }
        if let Some(max) = env("DBRELAY_MAX_CONNECTIONS") {
            self.max_connections = max
                .parse()
                .map_err(|e| ConfigError::env("DBRELAY_MAX_CONNECTIONS", e))?;
        }
        if let Some(channel) = env("DBRELAY_CHANNEL") {
            self.relay.channel = channel;
        }
        if let Some(group) = env("DBRELAY_GROUP") {
            self.relay.group = group;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let relay = &self.relay;
        if !is_identifier(&relay.channel) {
            return Err(ConfigError::Invalid {
                field: "relay.channel",
                reason: "must be a plain PostgreSQL identifier",
            });
        }
        if relay.group.is_empty() {
            return Err(ConfigError::Invalid {
                field: "relay.group",
                reason: "must not be empty",
            });
        }
        if !relay.ws_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "relay.ws_path",
                reason: "must start with '/'",
            });
        }
        if relay.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "relay.poll_timeout_ms",
                reason: "must be greater than zero",
            });
        }
        if relay.session_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "relay.session_buffer",
                reason: "must be greater than zero",
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "max_connections",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }

    /// Copy safe to print: the password in `database_url` is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.database_url = self.database_url.as_deref().map(redact_url);
        copy
    }
}

/// Which kind of process is running the startup hook.
///
/// Only the primary serving process owns the change listener; tooling
/// invocations such as `dbrelay migrate` are auxiliary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Primary,
    Auxiliary,
}

impl ProcessRole {
    /// Primary when `DBRELAY_RUN_MAIN=true` or `DBRELAY_SERVER_RUNNING`
    /// is set to anything non-empty.
    pub fn from_env() -> Self {
        Self::from_env_with(|var| std::env::var(var).ok())
    }

    pub fn from_env_with<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let run_main = env("DBRELAY_RUN_MAIN").is_some_and(|v| v == "true");
        let server_running = env("DBRELAY_SERVER_RUNNING").is_some_and(|v| !v.is_empty());
        if run_main || server_running {
            ProcessRole::Primary
        } else {
            ProcessRole::Auxiliary
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, ProcessRole::Primary)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// LISTEN takes an identifier, not a bind parameter.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let Some(at) = rest.find('@') else {
        return url.to_string();
    };
    let userinfo = &rest[..at];
    match userinfo.find(':') {
        Some(colon) => format!(
            "{}{}:****{}",
            &url[..scheme_end + 3],
            &userinfo[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}
