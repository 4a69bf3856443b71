// Path: crates/types/src/config.rs

//! Shared configuration structures for every ARCA service.
//!
//! Services load these hierarchically (file plus environment overrides) and
//! fail fast at startup when a section they require is missing or unusable.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the message broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Host of a networked broker deployment. Unused by the embedded
    /// journal broker but kept so configuration files stay portable.
    #[serde(default)]
    pub host: String,
    /// Port of a networked broker deployment.
    #[serde(default)]
    pub port: u16,
    /// Broker user.
    #[serde(default)]
    pub user: String,
    /// Broker password.
    #[serde(default)]
    pub password: String,
    /// Broker virtual host.
    #[serde(default = "default_vhost")]
    pub vhost: String,
    /// Path of the durable message journal.
    pub journal: PathBuf,
    /// Exchange that publishes are routed through.
    pub exchange: String,
    /// Routing key for outbound verification messages.
    #[serde(rename = "routingKey")]
    pub routing_key: String,
    /// Queue this service consumes from.
    pub queue: String,
    /// Directory holding the JSON schema documents.
    #[serde(rename = "schemasPath")]
    pub schemas_path: PathBuf,
    /// Per-consumer prefetch window (unacked-message bound).
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
}

fn default_vhost() -> String {
    "/".to_owned()
}

fn default_prefetch() -> usize {
    2
}

/// Configuration for the state store database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Path of the database file.
    pub path: PathBuf,
}

/// Selects and parameterizes a storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Files under a directory on a posix filesystem.
    Posix(PosixConfig),
    /// Objects in an S3-compatible store.
    S3(S3Config),
}

impl StorageConfig {
    /// The configured chunk size, regardless of backend kind.
    pub fn chunk_size(&self) -> usize {
        match self {
            StorageConfig::Posix(c) => c.chunk_size,
            StorageConfig::S3(c) => c.chunk_size,
        }
    }
}

/// Posix storage backend parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosixConfig {
    /// Directory all object names are resolved under.
    pub root: PathBuf,
    /// Read/write chunk size in bytes.
    #[serde(default = "default_chunk_size", rename = "chunkSize")]
    pub chunk_size: usize,
}

/// S3-compatible storage backend parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket all object names are resolved under.
    pub bucket: String,
    /// Region name, when the endpoint requires one.
    #[serde(default)]
    pub region: String,
    /// Endpoint URL for non-AWS deployments.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Access key id.
    #[serde(rename = "accessKey")]
    pub access_key: String,
    /// Secret access key.
    #[serde(rename = "secretKey")]
    pub secret_key: String,
    /// Whether to require TLS towards the endpoint.
    #[serde(default = "default_true")]
    pub tls: bool,
    /// Read/write chunk size in bytes.
    #[serde(default = "default_chunk_size", rename = "chunkSize")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    4 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

/// Configuration for the header rewrap client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReencryptConfig {
    /// Rewrap service host.
    pub host: String,
    /// Rewrap service port.
    pub port: u16,
    /// Per-call deadline in seconds.
    #[serde(default = "default_rewrap_timeout")]
    pub timeout: u64,
    /// CA certificate path. Absent selects an unauthenticated channel.
    #[serde(default, rename = "caCert")]
    pub ca_cert: Option<PathBuf>,
    /// Client certificate path for mutual TLS.
    #[serde(default, rename = "clientCert")]
    pub client_cert: Option<PathBuf>,
    /// Client key path for mutual TLS.
    #[serde(default, rename = "clientKey")]
    pub client_key: Option<PathBuf>,
}

fn default_rewrap_timeout() -> u64 {
    30
}

/// Application-level key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path of the service's envelope secret-key file.
    #[serde(rename = "crypt4ghKey")]
    pub crypt4gh_key: PathBuf,
    /// Passphrase unlocking the key file.
    #[serde(default, rename = "crypt4ghPassphrase")]
    pub crypt4gh_passphrase: String,
}

/// HTTP server parameters for the download service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, `host:port`.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// TLS certificate path; together with `key` enables HTTPS.
    #[serde(default)]
    pub cert: Option<PathBuf>,
    /// TLS key path.
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// Origins allowed by CORS. Empty disables CORS headers.
    #[serde(default, rename = "corsAllowedOrigins")]
    pub cors_allowed_origins: Vec<String>,
}

fn default_listen() -> String {
    "0.0.0.0:8443".to_owned()
}

/// Bearer-token validation parameters for the download service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accepted token issuers.
    pub issuers: Vec<String>,
    /// Shared HMAC secret for HS256 tokens.
    #[serde(default, rename = "jwtSecret")]
    pub jwt_secret: Option<String>,
    /// PEM public key path for RS256/ES256 tokens.
    #[serde(default, rename = "jwtPubKeyPath")]
    pub jwt_pub_key_path: Option<PathBuf>,
}
