// Path: crates/reencrypt/src/server.rs
//! The rewrap service router and listener.
//!
//! This process is the custody boundary for the installation's long-term
//! secret key. The single endpoint takes an existing header and a recipient
//! public key and answers with a header the recipient can open. Header
//! bytes are never logged above debug.

use arca_types::error::ErrorCode;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use x25519_dalek::{PublicKey, StaticSecret};

#[derive(Deserialize)]
struct RewrapRequest {
    old_header: String,
    public_key: String,
}

#[derive(Serialize)]
struct RewrapResponse {
    header: String,
}

enum AppError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            AppError::BadRequest(s) => (StatusCode::BAD_REQUEST, s),
            AppError::Internal(s) => {
                tracing::error!(target: "reencrypt", "rewrap failed: {s}");
                (StatusCode::INTERNAL_SERVER_ERROR, "rewrap failed".to_owned())
            }
        };
        (status, Json(serde_json::json!({ "error": msg }))).into_response()
    }
}

async fn reencrypt_handler(
    State(secret): State<Arc<StaticSecret>>,
    Json(payload): Json<RewrapRequest>,
) -> Result<Json<RewrapResponse>, AppError> {
    let old_header = BASE64
        .decode(&payload.old_header)
        .map_err(|e| AppError::BadRequest(format!("old_header is not base64: {e}")))?;
    let key_bytes = BASE64
        .decode(&payload.public_key)
        .map_err(|e| AppError::BadRequest(format!("public_key is not base64: {e}")))?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| AppError::BadRequest("public_key must be 32 bytes".to_owned()))?;
    let recipient = PublicKey::from(key_bytes);

    tracing::debug!(
        target: "reencrypt",
        header_len = old_header.len(),
        "rewrapping header"
    );

    let new_header = arca_crypto::header::reencrypt_header(&old_header, &secret, &recipient)
        .map_err(|e| AppError::Internal(format!("{} ({e})", e.code())))?;

    Ok(Json(RewrapResponse {
        header: BASE64.encode(new_header),
    }))
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

/// The rewrap service router over the given secret key.
pub fn router(secret: Arc<StaticSecret>) -> Router {
    Router::new()
        .route("/reencrypt", post(reencrypt_handler))
        .route("/health", get(health_handler))
        .with_state(secret)
}

/// Serves the rewrap endpoint until the shutdown channel fires.
pub async fn run_server(
    listen: &str,
    secret: Arc<StaticSecret>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    let addr: SocketAddr = listen.parse()?;
    tracing::info!(target: "reencrypt", "rewrap service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, router(secret)).with_graceful_shutdown(async move {
        shutdown_rx.changed().await.ok();
        tracing::info!(target: "reencrypt", "shutting down gracefully");
    });
    if let Err(e) = server.await {
        tracing::error!(target: "reencrypt", error = %e, "server error");
    }
    Ok(())
}
