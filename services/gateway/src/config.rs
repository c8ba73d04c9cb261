//! Gateway configuration
//!
//! Layered with the `config` crate: optional TOML file first, then
//! `WILDLIVE__*` environment variables (`WILDLIVE__PORT=9000`,
//! `WILDLIVE__FEED__POLL_INTERVAL_SECS=30`).

use std::path::Path;
use std::time::Duration;

use live_feed::{DrainMode, FeedConfig};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "WILDLIVE";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Serve `GET /observations` and run without the emitter.
    pub pull_endpoint: bool,
    /// SSE keep-alive comment period.
    pub keep_alive_secs: u64,
    pub feed: FeedConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            pull_endpoint: false,
            keep_alive_secs: 15,
            feed: FeedConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `path` (missing file is fine) and the environment.
    pub fn load(path: &Path) -> Result<Self, ::config::ConfigError> {
        Self::from_builder(
            ::config::Config::builder().add_source(::config::File::from(path).required(false)),
        )
    }

    fn from_builder(
        builder: ::config::ConfigBuilder<::config::builder::DefaultState>,
    ) -> Result<Self, ::config::ConfigError> {
        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }

    pub fn drain_mode(&self) -> DrainMode {
        if self.pull_endpoint {
            DrainMode::Pull
        } else {
            DrainMode::Push
        }
    }
}
