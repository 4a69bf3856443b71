// Path: crates/node/src/bin/ingest.rs
#![forbid(unsafe_code)]

//! The ingest service binary.

use anyhow::{anyhow, Context, Result};
use arca_broker::{Broker, SchemaValidator};
use arca_ingest::IngestWorker;
use arca_node::settings::{load, IngestSettings};
use arca_state::StateStore;
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "arca-ingest")]
struct Opts {
    /// Configuration file (format by extension).
    #[clap(long, env = "ARCA_CONFIG", default_value = "config/ingest")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    arca_telemetry::init_tracing("ingest")?;
    let opts = Opts::parse();
    let settings: IngestSettings =
        load(&opts.config).with_context(|| format!("loading configuration {}", opts.config))?;

    // Everything below is fatal at startup.
    let broker = Broker::from_config(&settings.broker)
        .map_err(|e| anyhow!("opening broker journal: {e}"))?;
    broker.bind(&settings.broker.exchange, "ingest", &settings.broker.queue);
    broker.bind(&settings.broker.exchange, "error", "error");
    broker.bind(
        &settings.broker.exchange,
        &settings.broker.routing_key,
        "verified",
    );

    let store = Arc::new(
        StateStore::open(&settings.db.path).map_err(|e| anyhow!("opening state store: {e}"))?,
    );
    let key = arca_crypto::keys::load_key_file(
        &settings.app.crypt4gh_key,
        &settings.app.crypt4gh_passphrase,
    )
    .map_err(|e| anyhow!("loading service key: {e}"))?;
    let inbox = arca_storage::new_backend(&settings.inbox)
        .map_err(|e| anyhow!("building inbox backend: {e}"))?;
    let archive = arca_storage::new_backend(&settings.archive)
        .map_err(|e| anyhow!("building archive backend: {e}"))?;

    let worker = IngestWorker::new(
        broker.clone(),
        SchemaValidator::new(settings.broker.schemas_path.clone()),
        store,
        inbox,
        archive,
        key,
        settings.broker.exchange.clone(),
        settings.broker.routing_key.clone(),
        settings.broker.queue.clone(),
        settings.inbox.chunk_size(),
    );

    let mut shutdown = arca_node::shutdown_channel();
    tokio::select! {
        result = worker.run() => {
            result.map_err(|e| anyhow!("consumer stopped: {e}"))?;
        }
        err = broker.connection_watcher() => {
            tracing::error!(target: "ingest", error = %err, "broker connection lost");
            return Err(anyhow!(err));
        }
        err = broker.channel_watcher() => {
            tracing::error!(target: "ingest", error = %err, "broker channel lost");
            return Err(anyhow!(err));
        }
        _ = shutdown.changed() => {
            tracing::info!(target: "ingest", "shutting down");
            broker.close();
        }
    }
    Ok(())
}
