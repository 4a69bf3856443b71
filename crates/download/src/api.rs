// Path: crates/download/src/api.rs
//! The HTTP endpoints and the ranged read algorithm.

use crate::auth::{token_middleware, PermissionCache, TokenVerifier};
use arca_api::reencrypt::HeaderRewrap;
use arca_api::storage::StorageBackend;
use arca_crypto::stream::EnvelopeReader;
use arca_state::StateStore;
use arca_types::config::ServerConfig;
use axum::body::Body;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use x25519_dalek::StaticSecret;

/// Size of one encrypted body block: 64 KiB of plaintext plus nonce and tag.
const CIPHER_BLOCK_SIZE: u64 = arca_crypto::CIPHER_SEGMENT_SIZE as u64;
/// Fixed buffer of the response write loop.
const SEND_BUF_SIZE: usize = 4096;

/// The process-wide archive backend. The download handlers read it on every
/// request; it is installed once at startup.
static BACKEND: Lazy<RwLock<Option<Arc<dyn StorageBackend>>>> = Lazy::new(|| RwLock::new(None));

/// Installs the process-wide archive backend.
pub fn set_backend(backend: Arc<dyn StorageBackend>) {
    if let Ok(mut guard) = BACKEND.write() {
        *guard = Some(backend);
    }
}

fn backend() -> Result<Arc<dyn StorageBackend>, AppError> {
    BACKEND
        .read()
        .ok()
        .and_then(|g| g.clone())
        .ok_or_else(|| AppError::Internal("archive backend not initialized".to_owned()))
}

/// Shared dependencies of the download handlers.
#[derive(Clone)]
pub struct AppState {
    /// The state store.
    pub store: Arc<StateStore>,
    /// The header rewrap client.
    pub rewrap: Arc<dyn HeaderRewrap>,
    /// The service's envelope secret key, for serving decrypted bytes.
    pub service_key: Arc<StaticSecret>,
}

// --- Error Handling ---
enum AppError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(s) => (StatusCode::BAD_REQUEST, s).into_response(),
            AppError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "unauthorised".to_owned()).into_response()
            }
            AppError::NotFound(s) => (StatusCode::NOT_FOUND, s).into_response(),
            AppError::Internal(s) => {
                tracing::error!(target: "download", "internal error: {s}");
                (StatusCode::INTERNAL_SERVER_ERROR, s).into_response()
            }
        }
    }
}

/// Marker extension for requests arriving through the S3-compat mount.
#[derive(Clone, Copy)]
struct S3Mode;

async fn mark_s3(mut request: axum::http::Request<Body>, next: Next) -> Response {
    request.extensions_mut().insert(S3Mode);
    next.run(request).await
}

// --- Handlers ---

/// Serves the list of permitted datasets from the request cache.
async fn datasets_handler(Extension(cache): Extension<PermissionCache>) -> Json<Vec<String>> {
    tracing::debug!(target: "download", "request permitted datasets");
    Json((*cache.datasets).clone())
}

#[derive(Deserialize)]
struct SchemeQuery {
    #[serde(default)]
    scheme: Option<String>,
}

/// Serves the files of one dataset. The wildcard must end in `/files`; a
/// scheme travelling separately is joined as `scheme://dataset`.
async fn files_handler(
    State(state): State<AppState>,
    Extension(cache): Extension<PermissionCache>,
    Path(dataset): Path<String>,
    Query(query): Query<SchemeQuery>,
) -> Result<Response, AppError> {
    let Some(dataset) = dataset.strip_suffix("/files") else {
        return Err(AppError::NotFound(
            "API path not found, maybe /files is missing".to_owned(),
        ));
    };
    let mut dataset = dataset.trim_start_matches('/').to_owned();
    if let Some(scheme) = query.scheme.filter(|s| !s.is_empty()) {
        dataset = format!("{scheme}://{dataset}");
    }

    if !cache.contains(&dataset) {
        return Err(AppError::NotFound("dataset not found".to_owned()));
    }
    match state.store.get_files(&dataset) {
        Ok(files) => Ok(Json(files).into_response()),
        Err(arca_types::error::StoreError::NotFound) => {
            Err(AppError::NotFound("dataset not found".to_owned()))
        }
        Err(e) => {
            tracing::error!(target: "download", dataset = %dataset, error = %e, "database query failed");
            Err(AppError::Internal("database error".to_owned()))
        }
    }
}

#[derive(Deserialize)]
struct DownloadQuery {
    #[serde(default, rename = "type")]
    file_type: Option<String>,
    #[serde(default, rename = "startCoordinate")]
    start: Option<String>,
    #[serde(default, rename = "endCoordinate")]
    end: Option<String>,
}

/// Serves file contents as bytes, encrypted or decrypted, full or ranged.
#[allow(clippy::too_many_lines)]
async fn download_handler(
    State(state): State<AppState>,
    Extension(cache): Extension<PermissionCache>,
    Path(file_id): Path<String>,
    method: Method,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
    s3_mode: Option<Extension<S3Mode>>,
) -> Result<Response, AppError> {
    // Permission gate: resolve the dataset, then consult the cache. The
    // answer must not leak whether the file exists.
    let dataset = state
        .store
        .check_file_permission(&file_id)
        .map_err(|_| AppError::NotFound("file not found".to_owned()))?;
    if !cache.contains(&dataset) {
        tracing::debug!(
            target: "download",
            dataset = %dataset,
            "caller lacks permission for dataset"
        );
        return Err(AppError::Unauthorized);
    }

    let file_details = state
        .store
        .get_file(&file_id)
        .map_err(|_| AppError::Internal("database error".to_owned()))?;
    let header_len = file_details.header.len() as u64;

    let mut start: u64 = query
        .start
        .as_deref()
        .unwrap_or("0")
        .parse()
        .map_err(|_| AppError::BadRequest("startCoordinate must be an integer".to_owned()))?;
    let mut end: u64 = query
        .end
        .as_deref()
        .unwrap_or("0")
        .parse()
        .map_err(|_| AppError::BadRequest("endCoordinate must be an integer".to_owned()))?;
    if end < start {
        return Err(AppError::BadRequest(
            "endCoordinate must be greater than startCoordinate".to_owned(),
        ));
    }

    let encrypted = query.file_type.as_deref() == Some("encrypted");
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );

    if encrypted {
        let range = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        (start, end) = calculate_encrypted_coords(
            start,
            end,
            range,
            header_len,
            file_details.archive_size,
        )
        .map_err(AppError::BadRequest)?;
        if start > 0 {
            // Reading from an offset in an encrypted file is not supported.
            return Err(AppError::BadRequest(
                "Start coordinate for encrypted files not implemented!".to_owned(),
            ));
        }
    } else {
        let content_length = if start == 0 && end == 0 {
            file_details.decrypted_size
        } else {
            end - start
        };
        response_headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&content_length.to_string())
                .map_err(|e| AppError::Internal(e.to_string()))?,
        );
    }

    if s3_mode.is_some() {
        response_headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(&format!("filename: {file_id}"))
                .map_err(|e| AppError::Internal(e.to_string()))?,
        );
        response_headers.insert(
            header::ETAG,
            HeaderValue::from_str(&file_details.decrypted_checksum)
                .map_err(|e| AppError::Internal(e.to_string()))?,
        );
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(
                &file_details
                    .last_modified
                    .format("%a, %d %b %Y %H:%M:%S GMT")
                    .to_string(),
            )
            .map_err(|e| AppError::Internal(e.to_string()))?,
        );
        for name in ["client-public-key", "server-public-key"] {
            if let Some(value) = headers.get(name) {
                if let Ok(name) = header::HeaderName::from_bytes(name.as_bytes()) {
                    response_headers.insert(name, value.clone());
                }
            }
        }
    }

    if method == Method::HEAD {
        if encrypted {
            response_headers.insert(
                header::CONTENT_LENGTH,
                HeaderValue::from_str(&file_details.archive_size.to_string())
                    .map_err(|e| AppError::Internal(e.to_string()))?,
            );
            // The header is served in front of the body; htsget sizes its
            // requests with this.
            response_headers.insert(
                header::HeaderName::from_static("server-additional-bytes"),
                HeaderValue::from_str(&header_len.to_string())
                    .map_err(|e| AppError::Internal(e.to_string()))?,
            );
        }
        let mut response = Response::new(Body::empty());
        *response.headers_mut() = response_headers;
        return Ok(response);
    }

    let file = backend()?
        .new_file_reader(&file_details.archive_path)
        .await
        .map_err(|e| {
            tracing::error!(
                target: "download",
                archive_path = %file_details.archive_path,
                error = %e,
                "could not find archive file"
            );
            AppError::Internal("archive error".to_owned())
        })?;

    let stream = if encrypted {
        // The served header is the stored one, or a rewrap of it when the
        // client supplied a recipient key. htsget carries the key in
        // Server-Public-Key instead of Client-Public-Key.
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let key_header = if user_agent.starts_with("htsget") {
            "server-public-key"
        } else {
            "client-public-key"
        };
        let reenc_key = headers.get(key_header).and_then(|v| v.to_str().ok());

        let header_bytes = match reenc_key {
            None => file_details.header.clone(),
            Some(key) => {
                tracing::debug!(target: "download", header_len, "rewrapping header for client");
                state
                    .rewrap
                    .reencrypt_header(&file_details.header, key)
                    .await
                    .map_err(|e| {
                        tracing::error!(target: "download", error = %e, "failed to reencrypt the file header");
                        AppError::Internal("reencrypt error".to_owned())
                    })?
            }
        };
        FileStream::Encrypted {
            pending: header_bytes,
            pos: 0,
            reader: file,
        }
    } else {
        let chained = Cursor::new(file_details.header.clone()).chain(file);
        let mut reader = EnvelopeReader::new(chained, state.service_key.as_ref())
            .await
            .map_err(|e| {
                tracing::error!(target: "download", error = %e, "could not prepare file for streaming");
                AppError::Internal("file stream error".to_owned())
            })?;
        if start != 0 {
            // Skip ahead to where the range starts.
            reader
                .skip(start)
                .await
                .map_err(|e| AppError::Internal(format!("seek failed: {e}")))?;
        }
        FileStream::Decrypted(Box::new(reader))
    };

    let mut response = Response::new(send_stream(stream, start, end));
    *response.headers_mut() = response_headers;
    Ok(response)
}

/// The two shapes a response body can stream from.
enum FileStream {
    /// Header bytes followed by the raw archive object.
    Encrypted {
        pending: Vec<u8>,
        pos: usize,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    },
    /// A decrypting reader over header plus body.
    Decrypted(Box<EnvelopeReader<ChainedReader>>),
}

type ChainedReader = tokio::io::Chain<Cursor<Vec<u8>>, Box<dyn AsyncRead + Send + Unpin>>;

impl FileStream {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            FileStream::Encrypted {
                pending,
                pos,
                reader,
            } => {
                if *pos < pending.len() {
                    let n = buf.len().min(pending.len() - *pos);
                    buf[..n].copy_from_slice(&pending[*pos..*pos + n]);
                    *pos += n;
                    return Ok(n);
                }
                reader.read(buf).await
            }
            FileStream::Decrypted(reader) => reader
                .read(buf)
                .await
                .map_err(|e| std::io::Error::other(e.to_string())),
        }
    }
}

/// The response write loop: a fixed 4 KiB buffer, copying until end of
/// stream when `end == 0`, or until `end - start` bytes have been written.
/// Read errors other than end-of-stream abort the response.
fn send_stream(source: FileStream, start: u64, end: u64) -> Body {
    let togo = end.saturating_sub(start);
    let state = (source, togo, end != 0);
    Body::from_stream(futures::stream::unfold(
        state,
        |(mut source, mut togo, bounded)| async move {
            if bounded && togo == 0 {
                return None;
            }
            let want = if bounded {
                togo.min(SEND_BUF_SIZE as u64) as usize
            } else {
                SEND_BUF_SIZE
            };
            let mut buf = vec![0u8; want];
            match source.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    if bounded {
                        togo -= n as u64;
                    }
                    Some((Ok::<Bytes, std::io::Error>(Bytes::from(buf)), (source, togo, bounded)))
                }
                Err(e) => Some((Err(e), (source, 0, true))),
            }
        },
    ))
}

/// Calculates the coordinates to serve in encrypted mode. A `Range` header
/// is used verbatim; otherwise the end coordinate is clamped up to the next
/// body-block boundary and offset by the header length.
fn calculate_encrypted_coords(
    start: u64,
    end: u64,
    range_header: &str,
    header_len: u64,
    archive_size: u64,
) -> Result<(u64, u64), String> {
    if !range_header.is_empty() {
        let coords = range_header.trim_start_matches("bytes=");
        if let Some((a, b)) = coords.split_once('-') {
            let a: u64 = a
                .parse()
                .map_err(|_| "range start must be an integer".to_owned())?;
            let b: u64 = b
                .parse()
                .map_err(|_| "range end must be an integer".to_owned())?;
            if a > b {
                return Err("endCoordinate must be greater than startCoordinate".to_owned());
            }
            return Ok((a, b));
        }
    }

    let mut body_end = archive_size;
    if end > 0 {
        let togo = end - start;
        let body_size = togo.saturating_sub(header_len);
        let end_coord = CIPHER_BLOCK_SIZE * body_size.div_ceil(CIPHER_BLOCK_SIZE);
        body_end = body_end.min(end_coord);
    }
    Ok((start, header_len + body_end))
}

// --- Server ---

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/metadata/datasets", get(datasets_handler))
        .route("/metadata/datasets/*dataset", get(files_handler))
        .route("/files/:fileid", get(download_handler))
}

/// The download router: the plain API plus the S3-compat mount, behind the
/// bearer-token middleware.
pub fn router(state: AppState, verifier: TokenVerifier, config: &ServerConfig) -> Router {
    let mut app = Router::new()
        .merge(api_routes())
        .nest("/s3", api_routes().layer(middleware::from_fn(mark_s3)))
        .with_state(state)
        .layer(middleware::from_fn_with_state(verifier, token_middleware))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http());

    if !config.cors_allowed_origins.is_empty() {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::HEAD])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::RANGE,
                    header::HeaderName::from_static("client-public-key"),
                    header::HeaderName::from_static("server-public-key"),
                ]),
        );
    }
    app
}

/// Serves the download API until the shutdown channel fires.
pub async fn run_server(
    state: AppState,
    verifier: TokenVerifier,
    config: &ServerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    let addr: SocketAddr = config.listen.parse()?;
    tracing::info!(target: "download", "download service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, router(state, verifier, config)).with_graceful_shutdown(
        async move {
            shutdown_rx.changed().await.ok();
            tracing::info!(target: "download", "shutting down gracefully");
        },
    );
    if let Err(e) = server.await {
        tracing::error!(target: "download", error = %e, "server error");
    }
    Ok(())
}
