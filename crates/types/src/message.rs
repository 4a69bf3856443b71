// Path: crates/types/src/message.rs

//! Message envelopes carried over the broker.
//!
//! Every body is UTF-8 JSON and is validated against the JSON schema named
//! by its routing before it is acted on.

use serde::{Deserialize, Serialize};

/// The two kinds of work an ingestion trigger can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    /// Stream the inbox object into the archive.
    Ingest,
    /// Abort a pending or in-flight ingestion.
    Cancel,
}

/// Inbound `ingestion-trigger` message. The correlation id rides in the
/// delivery envelope, not in the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionTrigger {
    /// Whether to ingest or to cancel.
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    /// Submitting user.
    pub user: String,
    /// Path of the uploaded object in the inbox.
    pub filepath: String,
}

/// One checksum entry of a verification message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// Checksum algorithm, always `sha256`.
    #[serde(rename = "type")]
    pub checksum_type: String,
    /// Hex-encoded digest.
    pub value: String,
}

impl Checksum {
    /// A SHA-256 checksum entry.
    pub fn sha256(value: String) -> Self {
        Checksum {
            checksum_type: "sha256".to_owned(),
            value,
        }
    }
}

/// Outbound `ingestion-verification` message, published by the ingest worker
/// once a file has been archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionVerification {
    /// Submitting user.
    pub user: String,
    /// Path of the uploaded object in the inbox.
    pub filepath: String,
    /// Server-generated file identifier.
    pub file_id: String,
    /// Object name in the archive backend.
    pub archive_path: String,
    /// Checksums over the encrypted bytes as uploaded.
    pub encrypted_checksums: Vec<Checksum>,
}

/// Inbound `ingestion-accession` message assigning a stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionAccession {
    /// Submitting user.
    pub user: String,
    /// Path of the uploaded object in the inbox.
    pub filepath: String,
    /// The stable identifier to assign.
    pub accession_id: String,
    /// Checksums over the decrypted content.
    pub decrypted_checksums: Vec<Checksum>,
}

/// Inbound `ingestion-dataset` message mapping accessions into a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionDataset {
    /// Dataset identifier.
    pub dataset_id: String,
    /// The accessions to map into the dataset.
    pub accession_ids: Vec<String>,
}

/// Inbound `dataset-release` / `dataset-deprecate` message advancing a
/// dataset's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetLifecycle {
    /// Dataset identifier.
    pub dataset_id: String,
}

/// Error envelope republished to routing key `error` so a failed message can
/// be analyzed by operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoError {
    /// Short description of what failed.
    pub error: String,
    /// Detailed reason, typically the underlying error text.
    pub reason: String,
    /// The offending message, echoed verbatim.
    pub original_message: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_wire_format() {
        let t: IngestionTrigger = serde_json::from_str(
            r#"{"type":"ingest","user":"alice","filepath":"/alice/a.c4gh"}"#,
        )
        .unwrap();
        assert_eq!(t.trigger_type, TriggerType::Ingest);
        assert_eq!(t.user, "alice");

        let c: IngestionTrigger =
            serde_json::from_str(r#"{"type":"cancel","user":"alice","filepath":"/alice/a.c4gh"}"#)
                .unwrap();
        assert_eq!(c.trigger_type, TriggerType::Cancel);
    }

    #[test]
    fn verification_wire_format() {
        let v = IngestionVerification {
            user: "alice".into(),
            filepath: "/alice/a.c4gh".into(),
            file_id: "f-1".into(),
            archive_path: "f-1".into(),
            encrypted_checksums: vec![Checksum::sha256("ab".repeat(32))],
        };
        let j = serde_json::to_value(&v).unwrap();
        assert_eq!(j["encrypted_checksums"][0]["type"], "sha256");
    }
}
