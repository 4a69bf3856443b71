// Path: crates/reencrypt/src/client.rs
//! The rewrap client used by the download service.

use arca_api::reencrypt::HeaderRewrap;
use arca_types::config::ReencryptConfig;
use arca_types::error::RewrapError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct RewrapRequest<'a> {
    old_header: String,
    public_key: &'a str,
}

#[derive(Deserialize)]
struct RewrapResponse {
    header: String,
}

/// HTTP client towards the rewrap service. Presence of `ca_cert` in the
/// configuration selects an authenticated TLS channel (optionally mutual);
/// its absence selects a plain channel.
pub struct ReencryptClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ReencryptClient {
    /// Builds the client from the configuration section. Certificate
    /// problems are configuration errors, reported before the first call.
    pub fn new(config: &ReencryptConfig) -> Result<Self, RewrapError> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout.max(1)));

        let scheme = if let Some(ca_path) = &config.ca_cert {
            let ca_pem = std::fs::read(ca_path)
                .map_err(|e| RewrapError::Config(format!("read CA certificate: {e}")))?;
            let ca = reqwest::Certificate::from_pem(&ca_pem)
                .map_err(|e| RewrapError::Config(format!("parse CA certificate: {e}")))?;
            builder = builder.add_root_certificate(ca);

            if let (Some(cert_path), Some(key_path)) = (&config.client_cert, &config.client_key) {
                let mut identity_pem = std::fs::read(cert_path)
                    .map_err(|e| RewrapError::Config(format!("read client certificate: {e}")))?;
                let key_pem = std::fs::read(key_path)
                    .map_err(|e| RewrapError::Config(format!("read client key: {e}")))?;
                identity_pem.extend_from_slice(&key_pem);
                let identity = reqwest::Identity::from_pem(&identity_pem)
                    .map_err(|e| RewrapError::Config(format!("parse client identity: {e}")))?;
                builder = builder.identity(identity);
            }
            "https"
        } else {
            "http"
        };

        let http = builder
            .build()
            .map_err(|e| RewrapError::Config(e.to_string()))?;
        let endpoint = format!("{scheme}://{}:{}/reencrypt", config.host, config.port);
        Ok(ReencryptClient { http, endpoint })
    }
}

#[async_trait]
impl HeaderRewrap for ReencryptClient {
    async fn reencrypt_header(
        &self,
        old_header: &[u8],
        recipient_public_key: &str,
    ) -> Result<Vec<u8>, RewrapError> {
        let request = RewrapRequest {
            old_header: BASE64.encode(old_header),
            public_key: recipient_public_key,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RewrapError::Timeout
                } else {
                    RewrapError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RewrapError::Status(status.as_u16()));
        }
        let body: RewrapResponse = response
            .json()
            .await
            .map_err(|e| RewrapError::Decode(e.to_string()))?;
        BASE64
            .decode(body.header)
            .map_err(|e| RewrapError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca_crypto::header::{deconstruct_header, encrypt_header};
    use arca_crypto::keys::KeyPair;
    use std::sync::Arc;

    fn plain_config(port: u16, timeout: u64) -> ReencryptConfig {
        ReencryptConfig {
            host: "127.0.0.1".to_owned(),
            port,
            timeout,
            ca_cert: None,
            client_cert: None,
            client_key: None,
        }
    }

    #[tokio::test]
    async fn rewrap_round_trip_against_live_service() {
        let service = KeyPair::generate();
        let consumer = KeyPair::generate();

        let router = crate::server::router(Arc::new(service.secret.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        let data_key = [11u8; 32];
        let old_header = encrypt_header(&data_key, &[service.public]).unwrap();

        let client = ReencryptClient::new(&plain_config(port, 5)).unwrap();
        let new_header = client
            .reencrypt_header(&old_header, &BASE64.encode(consumer.public.as_bytes()))
            .await
            .unwrap();

        let opened = deconstruct_header(&new_header, &consumer.secret).unwrap();
        assert_eq!(*opened, data_key);
    }

    #[tokio::test]
    async fn bad_public_key_is_a_client_error() {
        let service = KeyPair::generate();
        let router = crate::server::router(Arc::new(service.secret.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        let old_header = encrypt_header(&[1u8; 32], &[service.public]).unwrap();
        let client = ReencryptClient::new(&plain_config(port, 5)).unwrap();
        let err = client
            .reencrypt_header(&old_header, "not base64!!!")
            .await
            .unwrap_err();
        assert!(matches!(err, RewrapError::Status(400)));
    }

    #[tokio::test]
    async fn deadline_is_enforced() {
        // A listener that accepts and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                // Hold the socket open without responding.
                tokio::spawn(async move {
                    let _socket = socket;
                    tokio::time::sleep(Duration::from_secs(60)).await;
                });
            }
        });

        let client = ReencryptClient::new(&plain_config(port, 1)).unwrap();
        let err = client
            .reencrypt_header(b"header", "AAAA")
            .await
            .unwrap_err();
        assert!(matches!(err, RewrapError::Timeout));
    }
}
