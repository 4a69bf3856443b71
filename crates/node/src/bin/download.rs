// Path: crates/node/src/bin/download.rs
#![forbid(unsafe_code)]

//! The download service binary.

use anyhow::{anyhow, Context, Result};
use arca_download::{set_backend, AppState, TokenVerifier};
use arca_node::settings::{load, DownloadSettings};
use arca_reencrypt::ReencryptClient;
use arca_state::StateStore;
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "arca-download")]
struct Opts {
    /// Configuration file (format by extension).
    #[clap(long, env = "ARCA_CONFIG", default_value = "config/download")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    arca_telemetry::init_tracing("download")?;
    let opts = Opts::parse();
    let settings: DownloadSettings =
        load(&opts.config).with_context(|| format!("loading configuration {}", opts.config))?;

    let store = Arc::new(
        StateStore::open(&settings.db.path).map_err(|e| anyhow!("opening state store: {e}"))?,
    );
    let service_key = arca_crypto::keys::load_key_file(
        &settings.app.crypt4gh_key,
        &settings.app.crypt4gh_passphrase,
    )
    .map_err(|e| anyhow!("loading service key: {e}"))?;
    let archive = arca_storage::new_backend(&settings.archive)
        .map_err(|e| anyhow!("building archive backend: {e}"))?;
    set_backend(archive);

    let rewrap = Arc::new(
        ReencryptClient::new(&settings.reencrypt)
            .map_err(|e| anyhow!("building rewrap client: {e}"))?,
    );
    let verifier =
        TokenVerifier::new(&settings.auth).map_err(|e| anyhow!("building token verifier: {e}"))?;

    let state = AppState {
        store,
        rewrap,
        service_key: Arc::new(service_key),
    };
    let shutdown = arca_node::shutdown_channel();
    arca_download::run_server(state, verifier, &settings.server, shutdown).await
}
