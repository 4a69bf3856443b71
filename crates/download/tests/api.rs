// Path: crates/download/tests/api.rs
//! End-to-end exercises of the download service over a live listener.
//!
//! The archive backend is process-wide state, so everything runs inside one
//! sequential test.

use arca_api::reencrypt::HeaderRewrap;
use arca_crypto::keys::KeyPair;
use arca_crypto::stream::EnvelopeReader;
use arca_download::{set_backend, AppState, TokenVerifier};
use arca_state::StateStore;
use arca_storage::PosixBackend;
use arca_types::config::{AuthConfig, ServerConfig};
use arca_types::error::RewrapError;
use arca_types::model::FileInfo;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};

const DATASET: &str = "test-dataset";
const ISSUER: &str = "https://login.example.org";
const SECRET: &str = "download-test-secret";

/// Rewraps locally with the service key, standing in for the remote
/// custody service.
struct LocalRewrap {
    secret: StaticSecret,
}

#[async_trait]
impl HeaderRewrap for LocalRewrap {
    async fn reencrypt_header(
        &self,
        old_header: &[u8],
        recipient_public_key: &str,
    ) -> Result<Vec<u8>, RewrapError> {
        let bytes: [u8; 32] = BASE64
            .decode(recipient_public_key)
            .map_err(|e| RewrapError::Decode(e.to_string()))?
            .try_into()
            .map_err(|_| RewrapError::Decode("key must be 32 bytes".to_owned()))?;
        arca_crypto::header::reencrypt_header(old_header, &self.secret, &PublicKey::from(bytes))
            .map_err(|e| RewrapError::Transport(e.to_string()))
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    exp: u64,
    datasets: Vec<&'a str>,
}

fn token(datasets: Vec<&str>) -> String {
    encode(
        &Header::default(),
        &Claims {
            iss: ISSUER,
            exp: 4102444800,
            datasets,
        },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn decrypt_with(object: &[u8], secret: &StaticSecret) -> Vec<u8> {
    let mut reader = EnvelopeReader::new(object, &secret.clone()).await.unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[tokio::test(flavor = "multi_thread")]
async fn download_service_end_to_end() {
    let dir = TempDir::new().unwrap();
    let archive_dir = dir.path().join("archive");
    std::fs::create_dir_all(&archive_dir).unwrap();

    let service = KeyPair::generate();
    let client = KeyPair::generate();
    let htsget_peer = KeyPair::generate();

    // One archived, verified, accessioned, dataset-mapped file.
    let plaintext: Vec<u8> = (0..200_000u32).map(|i| (i % 239) as u8).collect();
    let object = arca_crypto::stream::encrypt_object(&plaintext, &[service.public]).unwrap();
    let header = arca_crypto::header::read_header(&object).unwrap();
    let body = &object[header.len()..];

    let store = Arc::new(StateStore::open(dir.path().join("state.redb")).unwrap());
    let file_id = store.register_file("/alice/data.c4gh", "alice").unwrap();
    std::fs::write(archive_dir.join(&file_id), body).unwrap();
    store.store_header(&header, &file_id).unwrap();
    let corr_id = Uuid::new_v4().to_string();
    let info = FileInfo {
        checksum: "ab".repeat(32),
        size: body.len() as u64,
        path: file_id.clone(),
        decrypted_checksum: "cd".repeat(32),
        decrypted_size: plaintext.len() as u64,
    };
    store.set_archived(&info, &file_id, &corr_id).unwrap();
    store.set_verified(&info, &file_id, &corr_id).unwrap();
    store.set_accession_id("DL:0001", &file_id).unwrap();
    store.map_files_to_dataset(DATASET, &["DL:0001"]).unwrap();
    store
        .update_dataset_event(DATASET, arca_types::model::DatasetEvent::Registered, "{}")
        .unwrap();
    store
        .update_dataset_event(DATASET, arca_types::model::DatasetEvent::Released, "{}")
        .unwrap();

    set_backend(Arc::new(PosixBackend::new(&archive_dir)));

    let state = AppState {
        store: store.clone(),
        rewrap: Arc::new(LocalRewrap {
            secret: service.secret.clone(),
        }),
        service_key: Arc::new(service.secret.clone()),
    };
    let verifier = TokenVerifier::new(&AuthConfig {
        issuers: vec![ISSUER.to_owned()],
        jwt_secret: Some(SECRET.to_owned()),
        jwt_pub_key_path: None,
    })
    .unwrap();
    let server_config = ServerConfig {
        listen: "127.0.0.1:0".to_owned(),
        cert: None,
        key: None,
        cors_allowed_origins: vec![],
    };

    let app = arca_download::api::router(state, verifier, &server_config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    let http = reqwest::Client::new();
    let auth = format!("Bearer {}", token(vec![DATASET]));

    // --- Datasets listing ---
    let response = http
        .get(format!("{base}/metadata/datasets"))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let datasets: Vec<String> = response.json().await.unwrap();
    assert_eq!(datasets, vec![DATASET.to_owned()]);

    // No token at all.
    let response = http
        .get(format!("{base}/metadata/datasets"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // --- Files in dataset ---
    let response = http
        .get(format!("{base}/metadata/datasets/{DATASET}/files"))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let files: serde_json::Value = response.json().await.unwrap();
    assert_eq!(files.as_array().unwrap().len(), 1);
    assert_eq!(files[0]["fileId"], file_id);
    assert_eq!(files[0]["accessionId"], "DL:0001");
    assert_eq!(files[0]["fileStatus"], "verified");

    // Missing /files suffix.
    let response = http
        .get(format!("{base}/metadata/datasets/{DATASET}"))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Dataset outside the permission cache.
    let response = http
        .get(format!("{base}/metadata/datasets/other-dataset/files"))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // --- Encrypted HEAD ---
    let response = http
        .head(format!("{base}/files/{file_id}?type=encrypted"))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-length"],
        body.len().to_string().as_str()
    );
    assert_eq!(
        response.headers()["server-additional-bytes"],
        header.len().to_string().as_str()
    );

    // --- Encrypted full download: header || archive body ---
    let response = http
        .get(format!("{base}/files/{file_id}?type=encrypted"))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let served = response.bytes().await.unwrap();
    assert_eq!(served.as_ref(), object.as_slice());

    // --- Encrypted ranged download clamps to block boundaries ---
    let response = http
        .get(format!(
            "{base}/files/{file_id}?type=encrypted&endCoordinate=70000"
        ))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let served = response.bytes().await.unwrap();
    let expected_end = (header.len() + 2 * arca_crypto::CIPHER_SEGMENT_SIZE).min(object.len());
    assert_eq!(served.as_ref(), &object[..expected_end]);

    // Encrypted start offsets are not implemented.
    let response = http
        .get(format!(
            "{base}/files/{file_id}?type=encrypted&startCoordinate=10&endCoordinate=20"
        ))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // --- Decrypted full download ---
    let response = http
        .get(format!("{base}/files/{file_id}"))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-length"],
        plaintext.len().to_string().as_str()
    );
    let served = response.bytes().await.unwrap();
    assert_eq!(served.as_ref(), plaintext.as_slice());

    // --- Decrypted ranged download ---
    let response = http
        .get(format!(
            "{base}/files/{file_id}?startCoordinate=1000&endCoordinate=5000"
        ))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-length"], "4000");
    let served = response.bytes().await.unwrap();
    assert_eq!(served.as_ref(), &plaintext[1000..5000]);

    // --- Bad coordinates ---
    let response = http
        .get(format!("{base}/files/{file_id}?startCoordinate=abc"))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let response = http
        .get(format!(
            "{base}/files/{file_id}?startCoordinate=10&endCoordinate=2"
        ))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // --- Unknown file: 404 without leaking details ---
    let response = http
        .get(format!("{base}/files/{}", Uuid::new_v4()))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // --- Permission gate: valid token, wrong dataset ---
    let foreign = format!("Bearer {}", token(vec!["someone-elses-dataset"]));
    let response = http
        .get(format!("{base}/files/{file_id}"))
        .header("Authorization", &foreign)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // --- Header rewrap for the requesting client ---
    let response = http
        .get(format!("{base}/files/{file_id}?type=encrypted"))
        .header("Authorization", &auth)
        .header("Client-Public-Key", BASE64.encode(client.public.as_bytes()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let served = response.bytes().await.unwrap();
    assert_ne!(served.as_ref(), object.as_slice());
    assert_eq!(decrypt_with(&served, &client.secret).await, plaintext);

    // htsget clients carry the recipient key in Server-Public-Key.
    let response = http
        .get(format!("{base}/files/{file_id}?type=encrypted"))
        .header("Authorization", &auth)
        .header("User-Agent", "htsget-rs/1.0")
        .header(
            "Server-Public-Key",
            BASE64.encode(htsget_peer.public.as_bytes()),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let served = response.bytes().await.unwrap();
    assert_eq!(decrypt_with(&served, &htsget_peer.secret).await, plaintext);

    // --- S3-compat mount adds the object headers ---
    let response = http
        .get(format!("{base}/s3/files/{file_id}"))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["etag"], "cd".repeat(32).as_str());
    assert!(response.headers().contains_key("content-disposition"));
    assert!(response.headers().contains_key("last-modified"));
    let served = response.bytes().await.unwrap();
    assert_eq!(served.as_ref(), plaintext.as_slice());
}
