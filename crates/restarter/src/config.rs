//! Process settings read from the environment

use anyhow::Result;
use config::Environment;
use serde::Deserialize;

/// Settings that are not part of the restart configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Port of the health and metrics server
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_api_port() -> u16 {
    8080
}

impl Settings {
    /// Load settings from `RESTARTER_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_env(Environment::with_prefix("RESTARTER"))
    }

    fn from_env(env: Environment) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
