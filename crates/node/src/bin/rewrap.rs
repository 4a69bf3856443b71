// Path: crates/node/src/bin/rewrap.rs
#![forbid(unsafe_code)]

//! The rewrap service binary, custodian of the long-term secret key.

use anyhow::{anyhow, Context, Result};
use arca_node::settings::{load, RewrapSettings};
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "arca-rewrap")]
struct Opts {
    /// Configuration file (format by extension).
    #[clap(long, env = "ARCA_CONFIG", default_value = "config/rewrap")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    arca_telemetry::init_tracing("rewrap")?;
    let opts = Opts::parse();
    let settings: RewrapSettings =
        load(&opts.config).with_context(|| format!("loading configuration {}", opts.config))?;

    let secret = arca_crypto::keys::load_key_file(
        &settings.app.crypt4gh_key,
        &settings.app.crypt4gh_passphrase,
    )
    .map_err(|e| anyhow!("loading service key: {e}"))?;

    let shutdown = arca_node::shutdown_channel();
    arca_reencrypt::server::run_server(&settings.server.listen, Arc::new(secret), shutdown).await
}
