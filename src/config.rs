//! TOML configuration with teacher-of-record precedence: explicit path,
//! then `~/.config/embedshot/config.toml`, then built-in defaults. CLI
//! flags override whatever was loaded.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{EngineOptions, DEFAULT_STARTUP_TIMEOUT};
use crate::session::{
    SessionOptions, DEFAULT_CAPTURE_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_PROVISION_TIMEOUT,
    DEFAULT_SETTLE_DELAY, DEFAULT_TOKEN_RESEND_DELAY,
};
use crate::{Result, ShotError};

pub const DEFAULT_BIND: &str = "127.0.0.1:3001";
pub const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub node_command: String,
    pub headless: bool,
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_command: "node".to_string(),
            headless: true,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Captures allowed to run concurrently; waiters queue FIFO.
    pub concurrency: usize,
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub token_resend_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub provision_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub capture_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            token_resend_delay: DEFAULT_TOKEN_RESEND_DELAY,
            provision_timeout: DEFAULT_PROVISION_TIMEOUT,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }
}

impl Config {
    /// Loads config with priority: explicit path > central config > defaults.
    /// An explicit path that cannot be read is an error; a missing central
    /// config silently falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = match path {
            Some(explicit) => Some(explicit.to_path_buf()),
            None => Self::central_config_path().filter(|p| p.exists()),
        };

        let Some(file) = candidate else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(&file).map_err(|err| {
            ShotError::Config(format!("Failed to read config {}: {}", file.display(), err))
        })?;
        toml::from_str(&raw).map_err(|err| {
            ShotError::Config(format!("Invalid config ({}): {}", file.display(), err))
        })
    }

    pub fn central_config_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config/embedshot/config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        if self.engine.node_command.trim().is_empty() {
            return Err(ShotError::Config(
                "engine.node_command must not be empty".to_string(),
            ));
        }
        if self.capture.concurrency == 0 {
            return Err(ShotError::Config(
                "capture.concurrency must be at least 1".to_string(),
            ));
        }
        if self.capture.handshake_timeout.is_zero() {
            return Err(ShotError::Config(
                "capture.handshake_timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server.bind.parse().map_err(|_| {
            ShotError::Config(format!(
                "server.bind {:?} is not a valid socket address",
                self.server.bind
            ))
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            node_command: self.engine.node_command.clone(),
            headless: self.engine.headless,
            startup_timeout: self.engine.startup_timeout,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            handshake_timeout: self.capture.handshake_timeout,
            settle_delay: self.capture.settle_delay,
            token_resend_delay: self.capture.token_resend_delay,
            provision_timeout: self.capture.provision_timeout,
            capture_timeout: self.capture.capture_timeout,
        }
    }
}
