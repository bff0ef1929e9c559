// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the WebSocket server binds; the gateway connects here.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token the gateway must present. Empty or unset disables auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Idle time after which the watchdog force-closes the session.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

// Custom Debug impl to redact the bearer token
impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// How long a command caller waits for a correlated response.
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Upper bound on waiting for background tasks during teardown.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8095
}

fn default_max_frame_bytes() -> usize {
    1 << 26 // 64 MiB, sized for the gateway's largest media payloads
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

fn default_response_timeout_secs() -> u64 {
    30
}

fn default_grace_period_secs() -> u64 {
    15
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            token: None,
            max_frame_bytes: default_max_frame_bytes(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_response_timeout_secs(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            commands: CommandConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl Config {
    /// Find the config file, checking in order:
    /// 1. ONEBRIDGE_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("ONEBRIDGE_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        None
    }

    /// Load configuration from config.toml with environment variable overrides
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, preferring an explicit path (e.g. from the CLI)
    /// over the ONEBRIDGE_CONFIG_PATH / ./config.toml search.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::find_config_file(),
        };

        let mut config = if let Some(config_path) = config_path {
            tracing::info!(
                path = %config_path.display(),
                "Loading configuration from file"
            );
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        // Override with environment variables if present
        if let Ok(val) = std::env::var("GATEWAY_HOST") {
            config.gateway.host = val;
        }
        if let Ok(val) = std::env::var("GATEWAY_PORT") {
            config.gateway.port = val.parse().with_context(|| {
                format!("GATEWAY_PORT must be a valid port number, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("GATEWAY_TOKEN") {
            config.gateway.token = Some(val);
        }
        if let Ok(val) = std::env::var("GATEWAY_MAX_FRAME_BYTES") {
            config.gateway.max_frame_bytes = val.parse().with_context(|| {
                format!("GATEWAY_MAX_FRAME_BYTES must be a valid size, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("GATEWAY_HEARTBEAT_INTERVAL_SECS") {
            config.gateway.heartbeat_interval_secs = val.parse().with_context(|| {
                format!(
                    "GATEWAY_HEARTBEAT_INTERVAL_SECS must be a valid number, got: {}",
                    val
                )
            })?;
        }
        if let Ok(val) = std::env::var("GATEWAY_IDLE_TIMEOUT_SECS") {
            config.gateway.idle_timeout_secs = val.parse().with_context(|| {
                format!(
                    "GATEWAY_IDLE_TIMEOUT_SECS must be a valid number, got: {}",
                    val
                )
            })?;
        }
        if let Ok(val) = std::env::var("COMMANDS_RESPONSE_TIMEOUT_SECS") {
            config.commands.response_timeout_secs = val.parse().with_context(|| {
                format!(
                    "COMMANDS_RESPONSE_TIMEOUT_SECS must be a valid number, got: {}",
                    val
                )
            })?;
        }
        if let Ok(val) = std::env::var("SHUTDOWN_GRACE_PERIOD_SECS") {
            config.shutdown.grace_period_secs = val.parse().with_context(|| {
                format!(
                    "SHUTDOWN_GRACE_PERIOD_SECS must be a valid number, got: {}",
                    val
                )
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate field values; called by load, public for callers that build
    /// a Config by hand.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.port == 0 {
            anyhow::bail!("gateway.port must be non-zero");
        }
        if self.gateway.max_frame_bytes == 0 {
            anyhow::bail!("gateway.max_frame_bytes must be non-zero");
        }
        if self.gateway.heartbeat_interval_secs == 0 {
            anyhow::bail!("gateway.heartbeat_interval_secs must be non-zero");
        }
        if self.gateway.idle_timeout_secs == 0 {
            anyhow::bail!("gateway.idle_timeout_secs must be non-zero");
        }
        if self.commands.response_timeout_secs == 0 {
            anyhow::bail!("commands.response_timeout_secs must be non-zero");
        }
        if self.shutdown.grace_period_secs == 0 {
            anyhow::bail!("shutdown.grace_period_secs must be non-zero");
        }
        Ok(())
    }

    /// The Authorization header value the gateway must present, or None when
    /// auth is disabled (token unset or blank).
    pub fn expected_authorization(&self) -> Option<String> {
        match &self.gateway.token {
            Some(token) if !token.trim().is_empty() => Some(format!("Bearer {}", token)),
            _ => None,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.gateway.host, self.gateway.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.gateway.heartbeat_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.idle_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.commands.response_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown.grace_period_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.gateway.port, 8095);
        assert!(config.gateway.token.is_none());
        assert_eq!(config.gateway.max_frame_bytes, 1 << 26);
        assert_eq!(config.gateway.heartbeat_interval_secs, 30);
        assert_eq!(config.gateway.idle_timeout_secs, 1800);
        assert_eq!(config.commands.response_timeout_secs, 30);
        assert_eq!(config.shutdown.grace_period_secs, 15);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
[gateway]
port = 9001
token = "secret"
"#,
        )
        .unwrap();
        assert_eq!(config.gateway.port, 9001);
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.gateway.token.as_deref(), Some("secret"));
        assert_eq!(config.shutdown.grace_period_secs, 15);
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.gateway.port, 8095);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = Config::default();
        config.gateway.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = Config::default();
        config.commands.response_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.idle_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.shutdown.grace_period_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expected_authorization_formats_bearer() {
        let mut config = Config::default();
        config.gateway.token = Some("tok123".to_string());
        assert_eq!(
            config.expected_authorization().as_deref(),
            Some("Bearer tok123")
        );
    }

    #[test]
    fn test_expected_authorization_blank_token_disables_auth() {
        let mut config = Config::default();
        config.gateway.token = Some("   ".to_string());
        assert!(config.expected_authorization().is_none());

        config.gateway.token = None;
        assert!(config.expected_authorization().is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let mut config = Config::default();
        config.gateway.token = Some("supersecret".to_string());
        let rendered = format!("{:?}", config.gateway);
        assert!(!rendered.contains("supersecret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.idle_timeout(), Duration::from_secs(1800));
        assert_eq!(config.response_timeout(), Duration::from_secs(30));
        assert_eq!(config.grace_period(), Duration::from_secs(15));
    }

    #[test]
    fn test_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8095");
    }
}
