// Path: crates/node/src/settings.rs
//! Hierarchical configuration loading for the service binaries.
//!
//! Values come from a configuration file (any format the `config` crate
//! understands) overridden by `ARCA_`-prefixed environment variables, e.g.
//! `ARCA_BROKER__QUEUE=ingest`.

use arca_types::config::{
    AppConfig, AuthConfig, BrokerConfig, DbConfig, ReencryptConfig, ServerConfig, StorageConfig,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Configuration of the ingest service.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    /// Broker section.
    pub broker: BrokerConfig,
    /// State store section.
    pub db: DbConfig,
    /// Inbox storage section.
    pub inbox: StorageConfig,
    /// Archive storage section.
    pub archive: StorageConfig,
    /// Key material section.
    pub app: AppConfig,
}

/// Configuration of the download service.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSettings {
    /// State store section.
    pub db: DbConfig,
    /// Archive storage section.
    pub archive: StorageConfig,
    /// Rewrap client section.
    pub reencrypt: ReencryptConfig,
    /// Key material section.
    pub app: AppConfig,
    /// HTTP server section.
    pub server: ServerConfig,
    /// Token validation section.
    pub auth: AuthConfig,
}

/// Configuration of the rewrap service.
#[derive(Debug, Clone, Deserialize)]
pub struct RewrapSettings {
    /// Key material section.
    pub app: AppConfig,
    /// HTTP server section.
    pub server: ServerConfig,
}

/// Loads one service's settings from `path` plus environment overrides.
pub fn load<T: DeserializeOwned>(path: &str) -> Result<T, anyhow::Error> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix("ARCA").separator("__"))
        .build()?;
    Ok(settings.try_deserialize()?)
}
