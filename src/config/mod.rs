//! TOML-driven runtime configuration with environment overrides.
//!
//! Precedence, lowest first: built-in defaults, the config file, `FANOUT_*`
//! environment variables.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::net::frame::DEFAULT_MAX_FRAME_BYTES;
use crate::net::EndpointOptions;

pub const DEFAULT_CONFIG_PATH: &str = "fanout.toml";
pub const CONFIG_PATH_ENV: &str = "FANOUT_CONFIG";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub control_port: u16,
    pub broadcast_port: u16,
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            control_port: 5555,
            broadcast_port: 5556,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.address, self.control_port)
    }

    pub fn broadcast_addr(&self) -> String {
        format!("{}:{}", self.address, self.broadcast_port)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// Answer a rejected announcement with `"Invalid"` instead of silence.
    pub reply_on_rejected: bool,
    pub request_queue_depth: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reply_on_rejected: true,
            request_queue_depth: 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BroadcastConfig {
    pub subscriber_queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config parse error: {0}")]
    Parse(String),
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load from `path`, else `$FANOUT_CONFIG`, else `fanout.toml` if it
    /// exists, else defaults; then apply environment overrides.
    ///
    /// An explicitly named file that cannot be read is an error.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(str::to_string)
            .or_else(|| env::var(CONFIG_PATH_ENV).ok());

        let mut config = match explicit {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(DEFAULT_CONFIG_PATH)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `FANOUT_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FANOUT_ADDRESS") {
            self.server.address = v;
        }
        if let Some(v) = lookup("FANOUT_CONTROL_PORT") {
            self.server.control_port = parse_var("FANOUT_CONTROL_PORT", &v)?;
        }
        if let Some(v) = lookup("FANOUT_BROADCAST_PORT") {
            self.server.broadcast_port = parse_var("FANOUT_BROADCAST_PORT", &v)?;
        }
        if let Some(v) = lookup("FANOUT_MAX_FRAME_BYTES") {
            self.server.max_frame_bytes = parse_var("FANOUT_MAX_FRAME_BYTES", &v)?;
        }
        if let Some(v) = lookup("FANOUT_REPLY_ON_REJECTED") {
            self.relay.reply_on_rejected = parse_flag("FANOUT_REPLY_ON_REJECTED", &v)?;
        }
        Ok(())
    }

    pub fn control_options(&self) -> EndpointOptions {
        EndpointOptions {
            max_frame_bytes: self.server.max_frame_bytes,
            queue_depth: self.relay.request_queue_depth,
        }
    }

    pub fn broadcast_options(&self) -> EndpointOptions {
        EndpointOptions {
            max_frame_bytes: self.server.max_frame_bytes,
            queue_depth: self.broadcast.subscriber_queue_capacity,
        }
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::Parse(format!("{key}: {e}")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Parse(format!("{key}: not a boolean: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_the_classic_ports() {
        let cfg = Config::default();
        assert_eq!(cfg.server.address, "127.0.0.1");
        assert_eq!(cfg.server.control_port, 5555);
        assert_eq!(cfg.server.broadcast_port, 5556);
        assert_eq!(cfg.server.control_addr(), "127.0.0.1:5555");
        assert_eq!(cfg.server.broadcast_addr(), "127.0.0.1:5556");
        assert!(cfg.relay.reply_on_rejected);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            [server]
            control_port = 7000

            [relay]
            reply_on_rejected = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.address, "127.0.0.1");
        assert_eq!(cfg.server.control_port, 7000);
        assert_eq!(cfg.server.broadcast_port, 5556);
        assert!(!cfg.relay.reply_on_rejected);
        assert_eq!(cfg.broadcast, BroadcastConfig::default());
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(matches!(
            Config::from_toml_str("[server]\ncontrol_port = \"nope\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut cfg = Config::from_toml_str("[server]\naddress = \"10.0.0.1\"").unwrap();
        let vars: HashMap<&str, &str> = [
            ("FANOUT_ADDRESS", "0.0.0.0"),
            ("FANOUT_BROADCAST_PORT", "6000"),
            ("FANOUT_REPLY_ON_REJECTED", "off"),
        ]
        .into_iter()
        .collect();

        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.server.address, "0.0.0.0");
        assert_eq!(cfg.server.control_port, 5555);
        assert_eq!(cfg.server.broadcast_port, 6000);
        assert!(!cfg.relay.reply_on_rejected);
    }

    #[test]
    fn unparseable_override_is_an_error() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_overrides(|k| (k == "FANOUT_CONTROL_PORT").then(|| "70000".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("FANOUT_CONTROL_PORT"));

        let err = cfg
            .apply_overrides(|k| (k == "FANOUT_REPLY_ON_REJECTED").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
