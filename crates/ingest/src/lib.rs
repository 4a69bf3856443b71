// Path: crates/ingest/src/lib.rs
#![forbid(unsafe_code)]

//! # ARCA Ingest
//!
//! The ingestion worker accepts trigger messages for files uploaded to the
//! inbox, registers the files with their encryption headers, and stores
//! them header-stripped in the archive.
//!
//! Per file the worker drives the `registered → submitted → archived` arc
//! of the lifecycle plus the `cancel → disabled` arc; verification and
//! finalization are downstream consumers of the `ingestion-verification`
//! message it publishes. Deliveries are at-least-once, so every step here
//! is written to be re-runnable: a redelivery whose correlation id is
//! already `archived` skips straight to the verification publish.

use arca_api::storage::StorageBackend;
use arca_broker::{Broker, Delivery, SchemaValidator};
use arca_state::StateStore;
use arca_types::message::{Checksum, InfoError, IngestionTrigger, IngestionVerification, TriggerType};
use arca_types::model::{FileEvent, FileInfo};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use x25519_dalek::StaticSecret;

/// The read buffer must cover the whole header and the first body segment.
const MIN_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Everything the worker needs to run.
pub struct IngestWorker {
    broker: Broker,
    validator: SchemaValidator,
    store: Arc<StateStore>,
    inbox: Arc<dyn StorageBackend>,
    archive: Arc<dyn StorageBackend>,
    key: StaticSecret,
    exchange: String,
    routing_key: String,
    queue: String,
    chunk_size: usize,
}

impl IngestWorker {
    /// Wires the worker. `chunk_size` is the inbox chunk size; reads use at
    /// least 4 MiB regardless.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Broker,
        validator: SchemaValidator,
        store: Arc<StateStore>,
        inbox: Arc<dyn StorageBackend>,
        archive: Arc<dyn StorageBackend>,
        key: StaticSecret,
        exchange: String,
        routing_key: String,
        queue: String,
        chunk_size: usize,
    ) -> Self {
        IngestWorker {
            broker,
            validator,
            store,
            inbox,
            archive,
            key,
            exchange,
            routing_key,
            queue,
            chunk_size: chunk_size.max(MIN_CHUNK_SIZE),
        }
    }

    /// Consumes the trigger queue until the broker closes.
    pub async fn run(&self) -> Result<(), arca_types::error::BrokerError> {
        let mut deliveries = self.broker.subscribe(&self.queue)?;
        tracing::info!(target: "ingest", queue = %self.queue, "starting ingest service");
        while let Some(delivery) = deliveries.recv().await {
            self.handle_delivery(delivery).await;
        }
        Ok(())
    }

    fn publish_error(&self, delivery: &Delivery, error: &str, reason: &str) {
        let original_message = serde_json::from_slice(&delivery.body)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&delivery.body).into_owned()));
        let envelope = InfoError {
            error: error.to_owned(),
            reason: reason.to_owned(),
            original_message,
        };
        let body = match serde_json::to_vec(&envelope) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(target: "ingest", error = %e, "failed to encode error envelope");
                return;
            }
        };
        if let Err(e) = self
            .broker
            .publish(&self.exchange, "error", &delivery.correlation_id, &body)
        {
            tracing::error!(target: "ingest", error = %e, "failed to publish error envelope");
        }
    }

    fn ack(delivery: &Delivery) {
        if let Err(e) = delivery.ack() {
            tracing::error!(target: "ingest", error = %e, "failed to ack message");
        }
    }

    fn nack(delivery: &Delivery, requeue: bool) {
        if let Err(e) = delivery.nack(requeue) {
            tracing::error!(target: "ingest", error = %e, "failed to nack message");
        }
    }

    /// Validates and publishes the verification message, then acks.
    /// When validation or the publish fails the delivery is left unsettled
    /// on purpose so the broker delivers it again.
    fn publish_verification(
        &self,
        delivery: &Delivery,
        trigger: &IngestionTrigger,
        file_id: &str,
        checksum_hex: String,
    ) {
        let message = IngestionVerification {
            user: trigger.user.clone(),
            filepath: trigger.filepath.clone(),
            file_id: file_id.to_owned(),
            archive_path: file_id.to_owned(),
            encrypted_checksums: vec![Checksum::sha256(checksum_hex)],
        };
        let body = match serde_json::to_vec(&message) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(target: "ingest", error = %e, "failed to encode verification message");
                return;
            }
        };
        if let Err(e) = self.validator.validate("ingestion-verification", &body) {
            tracing::error!(
                target: "ingest",
                reason = %e.reason(),
                "validation of outgoing message failed"
            );
            return;
        }
        if let Err(e) = self.broker.publish(
            &self.exchange,
            &self.routing_key,
            &delivery.correlation_id,
            &body,
        ) {
            // Do not ack: the redelivery will find the file archived and
            // come straight back here.
            tracing::error!(target: "ingest", error = %e, "failed to publish verification message");
            return;
        }
        Self::ack(delivery);
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        tracing::debug!(
            target: "ingest",
            corr_id = %delivery.correlation_id,
            "received a message"
        );

        if let Err(e) = self.validator.validate("ingestion-trigger", &delivery.body) {
            tracing::error!(
                target: "ingest",
                reason = %e.reason(),
                "validation of incoming message failed"
            );
            self.publish_error(&delivery, "Message validation failed", &e.reason());
            Self::ack(&delivery);
            return;
        }

        // Validation guarantees the shape.
        let trigger: IngestionTrigger = match serde_json::from_slice(&delivery.body) {
            Ok(t) => t,
            Err(e) => {
                self.publish_error(&delivery, "Message validation failed", &e.to_string());
                Self::ack(&delivery);
                return;
            }
        };

        tracing::info!(
            target: "ingest",
            corr_id = %delivery.correlation_id,
            filepath = %trigger.filepath,
            user = %trigger.user,
            "received work"
        );

        match trigger.trigger_type {
            TriggerType::Cancel => self.handle_cancel(&delivery, &trigger),
            TriggerType::Ingest => self.handle_ingest(&delivery, &trigger).await,
        }
    }

    fn handle_cancel(&self, delivery: &Delivery, trigger: &IngestionTrigger) {
        let file_id = match self.store.get_file_id(&delivery.correlation_id) {
            Ok(Some(id)) => id,
            _ => {
                tracing::error!(
                    target: "ingest",
                    corr_id = %delivery.correlation_id,
                    "failed to get ID for file to cancel"
                );
                Self::nack(delivery, false);
                return;
            }
        };
        let body = String::from_utf8_lossy(&delivery.body);
        if let Err(e) = self.store.update_file_event_log(
            &file_id,
            FileEvent::Disabled,
            &delivery.correlation_id,
            &trigger.user,
            &body,
            "{}",
        ) {
            tracing::error!(
                target: "ingest",
                corr_id = %delivery.correlation_id,
                error = %e,
                "failed to set ingestion status for file"
            );
            Self::nack(delivery, false);
            return;
        }
        Self::ack(delivery);
    }

    async fn handle_ingest(&self, delivery: &Delivery, trigger: &IngestionTrigger) {
        let corr_id = delivery.correlation_id.clone();

        // Redelivery fence: an already-archived correlation id means a
        // previous attempt died between archiving and publishing. An
        // already-disabled one means the cancel won the race.
        if let Ok(Some(status)) = self.store.get_file_status(&corr_id) {
            if status == "archived" {
                if let Ok(Some(file_id)) = self.store.get_file_id(&corr_id) {
                    let checksum = self
                        .store
                        .get_file_info(&file_id)
                        .map(|i| i.checksum)
                        .unwrap_or_default();
                    tracing::info!(
                        target: "ingest",
                        corr_id = %corr_id,
                        "file already archived, skipping to verification publish"
                    );
                    self.publish_verification(delivery, trigger, &file_id, checksum);
                    return;
                }
            }
            if status == "disabled" {
                tracing::info!(
                    target: "ingest",
                    corr_id = %corr_id,
                    "file is disabled, skipping ingestion"
                );
                Self::ack(delivery);
                return;
            }
        }

        let mut reader = match self.inbox.new_file_reader(&trigger.filepath).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(target: "ingest", error = %e, "failed to open file to ingest");
                self.publish_error(delivery, "Failed to open file to ingest", &e.to_string());
                Self::ack(delivery);
                return;
            }
        };

        let file_size = match self.inbox.get_file_size(&trigger.filepath).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(target: "ingest", error = %e, "failed to get file size of file to ingest");
                // Reading the file worked, so this should eventually
                // succeed; requeue.
                Self::nack(delivery, true);
                self.publish_error(
                    delivery,
                    "Failed to get file size of file to ingest",
                    &e.to_string(),
                );
                return;
            }
        };

        let file_id = match self.store.get_file_id(&corr_id) {
            Ok(Some(existing)) => existing,
            _ => match self.store.register_file(&trigger.filepath, &trigger.user) {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(target: "ingest", error = %e, "failed to register file");
                    Self::nack(delivery, true);
                    return;
                }
            },
        };

        let body = String::from_utf8_lossy(&delivery.body).into_owned();
        if let Err(e) = self.store.update_file_event_log(
            &file_id,
            FileEvent::Submitted,
            &corr_id,
            &trigger.user,
            &body,
            "{}",
        ) {
            tracing::error!(
                target: "ingest",
                corr_id = %corr_id,
                error = %e,
                "failed to set ingestion status for file"
            );
        }

        let mut writer = match self.archive.new_file_writer(&file_id).await {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(target: "ingest", error = %e, "failed to create archive file");
                Self::nack(delivery, true);
                return;
            }
        };

        // The buffer must be large enough to hold the entire header and the
        // first body segment.
        let mut buffer = vec![0u8; self.chunk_size];
        let mut hasher = Sha256::new();
        let mut bytes_read: u64 = 0;
        let mut first_chunk = true;

        while bytes_read < file_size {
            let n = match read_full(reader.as_mut(), &mut buffer).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(target: "ingest", error = %e, "read failed while ingesting file");
                    Self::nack(delivery, true);
                    return;
                }
            };
            let chunk = &buffer[..n];
            hasher.update(chunk);
            bytes_read += n as u64;

            let payload = if first_chunk {
                first_chunk = false;
                let header = match arca_crypto::stream::try_decrypt(chunk, &self.key) {
                    Ok(h) => h,
                    Err(e) => {
                        tracing::error!(
                            target: "ingest",
                            error = %e,
                            "trying to decrypt start of file failed"
                        );
                        Self::nack(delivery, false);
                        self.publish_error(
                            delivery,
                            "Trying to decrypt start of file failed",
                            &e.to_string(),
                        );
                        return;
                    }
                };
                tracing::debug!(target: "ingest", header_len = header.len(), "store header");
                if let Err(e) = self.store.store_header(&header, &file_id) {
                    tracing::error!(target: "ingest", error = %e, "StoreHeader failed");
                    Self::nack(delivery, true);
                    return;
                }
                // Strip exactly the header bytes from the buffered prefix.
                &chunk[header.len()..]
            } else {
                chunk
            };

            if let Err(e) = writer.write_all(payload).await {
                tracing::error!(target: "ingest", error = %e, "failed to write to archive file");
                Self::nack(delivery, true);
                return;
            }
        }

        if let Err(e) = writer.shutdown().await {
            tracing::error!(target: "ingest", error = %e, "failed to close archive file");
            Self::nack(delivery, true);
            return;
        }
        drop(reader);

        let archive_size = match self.archive.get_file_size(&file_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(target: "ingest", error = %e, "couldn't get file size from archive");
                Self::nack(delivery, true);
                return;
            }
        };
        let checksum_hex = hex::encode(hasher.finalize());

        tracing::debug!(
            target: "ingest",
            corr_id = %corr_id,
            user = %trigger.user,
            filepath = %trigger.filepath,
            archivepath = %file_id,
            archivedsize = archive_size,
            "wrote archived file"
        );

        // A cancel may have landed while the body was streaming.
        match self.store.get_file_status(&corr_id) {
            Ok(Some(status)) if status == "disabled" => {
                tracing::info!(
                    target: "ingest",
                    corr_id = %corr_id,
                    "file is disabled, stopping ingestion"
                );
                Self::ack(delivery);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(target: "ingest", error = %e, "failed to get file status");
                Self::nack(delivery, true);
                return;
            }
        }

        let file_info = FileInfo {
            checksum: checksum_hex.clone(),
            size: archive_size,
            path: file_id.clone(),
            decrypted_checksum: String::new(),
            decrypted_size: 0,
        };
        if let Err(e) = self.store.set_archived(&file_info, &file_id, &corr_id) {
            match e {
                arca_types::error::StoreError::DuplicateKey(_) => {
                    // A previous attempt already archived this pair; fall
                    // through to the publish.
                    tracing::warn!(target: "ingest", corr_id = %corr_id, "archive row already present");
                }
                other => {
                    tracing::error!(target: "ingest", error = %other, "SetArchived failed");
                    self.publish_error(delivery, "SetArchived failed", &other.to_string());
                    Self::nack(delivery, false);
                    return;
                }
            }
        }

        tracing::debug!(
            target: "ingest",
            corr_id = %corr_id,
            archivepath = %file_id,
            "file marked as archived"
        );

        self.publish_verification(delivery, trigger, &file_id, checksum_hex);
    }
}

/// Reads until `buf` is full or the stream ends, returning the bytes read.
async fn read_full(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
