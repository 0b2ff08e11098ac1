use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongodb,
    Memory,
}

/// Process settings, read from the environment (after `.env`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub port: u16,
    pub store_backend: StoreBackend,
    pub visit_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// Public prefix for short URLs. Falls back to the request host.
    pub base_url: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_env(Environment::default())
    }

    fn from_env(env: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("mongodb_uri", "mongodb://localhost:27017")?
            .set_default("mongodb_database", "url_shortener")?
            .set_default("port", 8080)?
            .set_default("store_backend", "mongodb")?
            .set_default("visit_timeout_secs", 5)?
            .set_default("request_timeout_secs", 10)?
            .set_default("shutdown_timeout_secs", 5)?
            .add_source(env)
            .build()?
            .try_deserialize()
    }

    pub fn visit_timeout(&self) -> Duration {
        Duration::from_secs(self.visit_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Builds the public short URL for `id`.
    pub fn short_url(&self, host: Option<&str>, id: &str) -> String {
        match self.base_url.as_deref() {
            Some(base) => format!("{}/{id}", base.trim_end_matches('/')),
            None => format!("http://{}/{id}", host.unwrap_or("localhost:8080")),
        }
    }
}
