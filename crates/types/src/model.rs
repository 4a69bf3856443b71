// Path: crates/types/src/model.rs

//! Core domain records shared between the ingestion and download sides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The lifecycle events a file can go through, in canonical forward order
/// `registered → uploaded → submitted → archived → verified → ready`, with
/// the side states `disabled` (cancel/abort) and `error`.
///
/// A file's status is not stored anywhere; it is the projection of the most
/// recent event in its event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEvent {
    /// The file row exists; nothing has been received yet.
    Registered,
    /// The inbox holds the complete upload.
    Uploaded,
    /// An ingestion trigger has been accepted for the file.
    Submitted,
    /// The header-stripped body has been written to the archive.
    Archived,
    /// The archived body decrypts cleanly and checksums match.
    Verified,
    /// The file carries an accession and is ready for dataset mapping.
    Ready,
    /// Ingestion was cancelled or the file was administratively disabled.
    Disabled,
    /// A terminal processing error was recorded.
    Error,
}

impl FileEvent {
    /// The wire spelling of the event, as stored in the event log.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileEvent::Registered => "registered",
            FileEvent::Uploaded => "uploaded",
            FileEvent::Submitted => "submitted",
            FileEvent::Archived => "archived",
            FileEvent::Verified => "verified",
            FileEvent::Ready => "ready",
            FileEvent::Disabled => "disabled",
            FileEvent::Error => "error",
        }
    }
}

impl fmt::Display for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(FileEvent::Registered),
            "uploaded" => Ok(FileEvent::Uploaded),
            "submitted" => Ok(FileEvent::Submitted),
            "archived" => Ok(FileEvent::Archived),
            "verified" => Ok(FileEvent::Verified),
            "ready" => Ok(FileEvent::Ready),
            "disabled" => Ok(FileEvent::Disabled),
            "error" => Ok(FileEvent::Error),
            other => Err(format!("unknown file event: {other}")),
        }
    }
}

/// The lifecycle events of a dataset. `Deprecated` is terminal for
/// visibility purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetEvent {
    /// The dataset mapping has been recorded.
    Registered,
    /// The dataset is visible to consumers.
    Released,
    /// The dataset has been withdrawn.
    Deprecated,
}

impl DatasetEvent {
    /// The wire spelling of the event, as stored in the dataset event log.
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetEvent::Registered => "registered",
            DatasetEvent::Released => "released",
            DatasetEvent::Deprecated => "deprecated",
        }
    }
}

impl fmt::Display for DatasetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(DatasetEvent::Registered),
            "released" => Ok(DatasetEvent::Released),
            "deprecated" => Ok(DatasetEvent::Deprecated),
            other => Err(format!("unknown dataset event: {other}")),
        }
    }
}

/// Ingestion-side metadata for a file, produced while streaming the upload
/// into the archive and completed by the verify stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Hex SHA-256 over the encrypted bytes as uploaded.
    pub checksum: String,
    /// Size in bytes of the archived (header-stripped) object.
    pub size: u64,
    /// Object name in the archive backend.
    pub path: String,
    /// Hex SHA-256 over the decrypted content.
    pub decrypted_checksum: String,
    /// Size in bytes of the decrypted content.
    pub decrypted_size: u64,
}

/// Everything the download service needs to serve one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDownload {
    /// Object name in the archive backend.
    pub archive_path: String,
    /// Size in bytes of the archived object (header already stripped).
    pub archive_size: u64,
    /// Size in bytes of the decrypted content.
    pub decrypted_size: u64,
    /// Hex SHA-256 over the decrypted content.
    pub decrypted_checksum: String,
    /// Last modification time of the file row.
    pub last_modified: DateTime<Utc>,
    /// The stored encryption header, byte for byte as parsed at ingest.
    pub header: Vec<u8>,
}

/// One file of a dataset, as listed by the download service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetFile {
    /// Server-generated file identifier.
    #[serde(rename = "fileId")]
    pub file_id: String,
    /// Accession under which the file is mapped into the dataset.
    #[serde(rename = "accessionId")]
    pub accession_id: String,
    /// Dataset the file was resolved through.
    #[serde(rename = "datasetId")]
    pub dataset_id: String,
    /// Base name of the submitted file, for display.
    #[serde(rename = "displayFileName")]
    pub display_file_name: String,
    /// Full submission path.
    #[serde(rename = "filePath")]
    pub file_path: String,
    /// Size in bytes of the archived object.
    #[serde(rename = "fileSize")]
    pub file_size: u64,
    /// Size in bytes of the decrypted content.
    #[serde(rename = "decryptedFileSize")]
    pub decrypted_file_size: u64,
    /// Hex checksum of the decrypted content.
    #[serde(rename = "decryptedFileChecksum")]
    pub decrypted_file_checksum: String,
    /// Checksum algorithm, always `sha256`.
    #[serde(rename = "decryptedFileChecksumType")]
    pub decrypted_file_checksum_type: String,
    /// Derived status of the file (latest event).
    #[serde(rename = "fileStatus")]
    pub file_status: String,
    /// Creation time of the file row, RFC 3339.
    #[serde(rename = "createdAt")]
    pub created_at: String,
    /// Last modification time of the file row, RFC 3339.
    #[serde(rename = "lastModified")]
    pub last_modified: String,
}

/// A user's submitted file as reported by the inventory projections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFile {
    /// Server-generated file identifier.
    #[serde(rename = "fileID")]
    pub file_id: String,
    /// Path of the file in the inbox, as submitted.
    #[serde(rename = "inboxPath")]
    pub inbox_path: String,
    /// Derived status of the file (latest event).
    pub status: String,
    /// Creation time of the file row, RFC 3339.
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

/// A dataset with its derived status, as reported by the list projections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    /// Dataset identifier, scheme-qualified if one was supplied.
    #[serde(rename = "datasetId")]
    pub dataset_id: String,
    /// Latest dataset event name.
    pub status: String,
    /// Time of the latest dataset event, RFC 3339.
    pub timestamp: String,
}

/// Submission facts about an accessioned file, used when mirroring archives
/// between installations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncData {
    /// Submitting user.
    pub user: String,
    /// Path of the file in the inbox, as submitted.
    pub file_path: String,
    /// Hex checksum of the decrypted content.
    pub checksum: String,
}

/// A registered encryption public-key digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHash {
    /// Hex-encoded digest of the public key.
    pub hash: String,
    /// Free-text description of the key.
    pub description: String,
    /// Registration date, RFC 3339.
    #[serde(rename = "createdAt")]
    pub created_at: String,
    /// Deprecation date, RFC 3339, if the key has been retired.
    #[serde(rename = "deprecatedAt")]
    pub deprecated_at: Option<String>,
}
