//! Client configuration at `~/.ha-ws/config.toml`.
//!
//! Provides the default hub URL, access token, and call timeout.
//! Environment variables override the file; CLI flags override both.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment variable holding the hub URL.
pub const ENV_SERVER: &str = "HASS_SERVER";
/// Environment variable holding the long-lived access token.
pub const ENV_TOKEN: &str = "HASS_TOKEN";
/// Token injected into Home Assistant add-ons; used when `HASS_TOKEN` is unset.
pub const ENV_SUPERVISOR_TOKEN: &str = "SUPERVISOR_TOKEN";

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Default connection settings.
    #[serde(default)]
    pub default: DefaultConfig,
}

/// Default connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultConfig {
    /// Hub URL (http, https, ws or wss).
    #[serde(default = "default_url")]
    pub url: String,

    /// Long-lived access token (empty = none).
    #[serde(default)]
    pub token: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_url() -> String {
    "http://homeassistant.local:8123".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &str) -> Result<Self> {
        let path = Path::new(path);
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

/// Default config location: `~/.ha-ws/config.toml`.
pub fn default_path() -> String {
    let home = dirs::home_dir().unwrap_or_default();
    home.join(".ha-ws")
        .join("config.toml")
        .to_string_lossy()
        .to_string()
}

/// Values given on the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Effective connection settings after layering file, environment and flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub url: String,
    pub token: String,
    pub timeout: Duration,
}

impl Settings {
    /// Resolve settings. `env` looks up an environment variable; empty
    /// values count as unset.
    pub fn resolve<E>(config: &Config, env: E, flags: Overrides) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.is_empty());
        let non_empty = |v: &String| !v.is_empty();

        let url = flags
            .url
            .filter(non_empty)
            .or_else(|| env(ENV_SERVER))
            .unwrap_or_else(|| config.default.url.clone());

        let token = flags
            .token
            .filter(non_empty)
            .or_else(|| env(ENV_TOKEN))
            .or_else(|| env(ENV_SUPERVISOR_TOKEN))
            .or_else(|| Some(config.default.token.clone()).filter(non_empty));
        let Some(token) = token else {
            bail!("no access token: pass --token, set {ENV_TOKEN}, or add `token` to the config file");
        };

        let timeout_secs = flags.timeout_secs.unwrap_or(config.default.timeout_secs);
        if timeout_secs == 0 {
            bail!("timeout must be at least one second");
        }

        Ok(Self {
            url,
            token,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}
