// Path: crates/state/src/store.rs
//! The redb-backed state store.

use arca_types::error::StoreError;
use arca_types::model::{
    DatasetEntry, DatasetEvent, DatasetFile, FileDownload, FileEvent, FileInfo, KeyHash, SyncData,
    UserFile,
};
use chrono::{DateTime, SecondsFormat, Utc};
use redb::{Database, ReadableTable, Table, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

/// Minimum schema version this build can operate on.
pub const REQUIRED_SCHEMA_VERSION: u32 = 8;

/// ---- Table definitions (single DB, prefix-encoded keys) ----
const SCHEMA: TableDefinition<&str, u32> = TableDefinition::new("SCHEMA_VERSION");
const META: TableDefinition<&str, u64> = TableDefinition::new("META"); // key="seq"
const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("FILES");
/// Key = file_id, 0x00, seq_be(8). Append-only.
const FILE_EVENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("FILE_EVENT_LOG");
const CORR_INDEX: TableDefinition<&str, &str> = TableDefinition::new("CORR_INDEX");
/// Key = file_id, 0x00, correlation_id. One row per pair.
const ARCHIVE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ARCHIVE_LOG");
const VERIFY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("VERIFY_LOG");
const ACCESSIONS: TableDefinition<&str, &str> = TableDefinition::new("ACCESSIONS");
const DATASETS: TableDefinition<&str, &[u8]> = TableDefinition::new("DATASETS");
/// Key = dataset_id, 0x00, accession. Value = file_id.
const DATASET_MAP: TableDefinition<&[u8], &str> = TableDefinition::new("FILE_DATASET");
/// Key = dataset_id, 0x00, seq_be(8). Append-only.
const DATASET_EVENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("DATASET_EVENT_LOG");
const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("ENCRYPTION_KEYS");

fn be<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn enc<T: Serialize>(v: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(v).map_err(|e| StoreError::Encode(e.to_string()))
}

fn dec<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Decode(e.to_string()))
}

fn k_pair(a: &str, b: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(a.len() + b.len() + 1);
    k.extend_from_slice(a.as_bytes());
    k.push(0);
    k.extend_from_slice(b.as_bytes());
    k
}

fn k_seq(id: &str, seq: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(id.len() + 9);
    k.extend_from_slice(id.as_bytes());
    k.push(0);
    k.extend_from_slice(&seq.to_be_bytes());
    k
}

fn k_prefix_range(id: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = Vec::with_capacity(id.len() + 1);
    start.extend_from_slice(id.as_bytes());
    start.push(0);
    let mut end = Vec::with_capacity(id.len() + 1);
    end.extend_from_slice(id.as_bytes());
    end.push(1);
    (start, end)
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Serialize, Deserialize)]
struct FileRow {
    submission_path: String,
    submission_user: String,
    header: Option<Vec<u8>>,
    key_hash: Option<String>,
    accession: Option<String>,
    created_at: String,
    last_modified: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EventRow {
    event: String,
    correlation_id: String,
    user: String,
    message: String,
    details: String,
    timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveRow {
    archive_path: String,
    archive_size: u64,
    checksum: String,
    seq: u64,
    timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct VerifyRow {
    decrypted_size: u64,
    decrypted_checksum: String,
    seq: u64,
    timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatasetRow {
    seq: u64,
    created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatasetEventRow {
    event: String,
    payload: String,
    timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyRow {
    description: String,
    seq: u64,
    created_at: String,
    deprecated_at: Option<String>,
}

/// The state store. Clone-free; share behind an `Arc`.
pub struct StateStore {
    db: Database,
}

impl StateStore {
    /// Opens (or creates) the database and enforces the schema-version
    /// sentinel. A fresh database is stamped with the current version; an
    /// existing one older than [`REQUIRED_SCHEMA_VERSION`] is refused.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(be)?;
        let version;
        {
            let tx = db.begin_write().map_err(be)?;
            {
                let mut schema = tx.open_table(SCHEMA).map_err(be)?;
                let existing = schema.get("version").map_err(be)?.map(|v| v.value());
                version = match existing {
                    Some(v) => v,
                    None => {
                        schema
                            .insert("version", REQUIRED_SCHEMA_VERSION)
                            .map_err(be)?;
                        REQUIRED_SCHEMA_VERSION
                    }
                };
                tx.open_table(META).map_err(be)?;
                tx.open_table(FILES).map_err(be)?;
                tx.open_table(FILE_EVENTS).map_err(be)?;
                tx.open_table(CORR_INDEX).map_err(be)?;
                tx.open_table(ARCHIVE).map_err(be)?;
                tx.open_table(VERIFY).map_err(be)?;
                tx.open_table(ACCESSIONS).map_err(be)?;
                tx.open_table(DATASETS).map_err(be)?;
                tx.open_table(DATASET_MAP).map_err(be)?;
                tx.open_table(DATASET_EVENTS).map_err(be)?;
                tx.open_table(KEYS).map_err(be)?;
            }
            tx.commit().map_err(be)?;
        }
        if version < REQUIRED_SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                required: REQUIRED_SCHEMA_VERSION,
                found: version,
            });
        }
        tracing::debug!(target: "state", version, "state store opened");
        Ok(StateStore { db })
    }

    /// The schema version recorded in the sentinel table.
    pub fn version(&self) -> Result<u32, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let schema = tx.open_table(SCHEMA).map_err(be)?;
        let v = schema
            .get("version")
            .map_err(be)?
            .ok_or(StoreError::NotFound)?
            .value();
        Ok(v)
    }

    fn next_seq(meta: &mut Table<&str, u64>) -> Result<u64, StoreError> {
        let current = meta.get("seq").map_err(be)?.map(|g| g.value()).unwrap_or(1);
        meta.insert("seq", current + 1).map_err(be)?;
        Ok(current)
    }

    #[allow(clippy::too_many_arguments)]
    fn append_event(
        events: &mut Table<&[u8], &[u8]>,
        corr_index: &mut Table<&str, &str>,
        meta: &mut Table<&str, u64>,
        file_id: &str,
        event: FileEvent,
        correlation_id: &str,
        user: &str,
        message: &str,
        details: &str,
    ) -> Result<(), StoreError> {
        let seq = Self::next_seq(meta)?;
        let row = EventRow {
            event: event.as_str().to_owned(),
            correlation_id: correlation_id.to_owned(),
            user: user.to_owned(),
            message: message.to_owned(),
            details: details.to_owned(),
            timestamp: now(),
        };
        events
            .insert(k_seq(file_id, seq).as_slice(), enc(&row)?.as_slice())
            .map_err(be)?;
        corr_index.insert(correlation_id, file_id).map_err(be)?;
        Ok(())
    }

    fn load_file(table: &impl ReadableTable<&'static str, &'static [u8]>, file_id: &str) -> Result<Option<FileRow>, StoreError> {
        match table.get(file_id).map_err(be)? {
            Some(guard) => Ok(Some(dec(guard.value())?)),
            None => Ok(None),
        }
    }

    fn latest_event(
        events: &impl ReadableTable<&'static [u8], &'static [u8]>,
        file_id: &str,
    ) -> Result<Option<EventRow>, StoreError> {
        let (start, end) = k_prefix_range(file_id);
        let mut last = None;
        for entry in events.range(start.as_slice()..end.as_slice()).map_err(be)? {
            let (_, value) = entry.map_err(be)?;
            last = Some(dec::<EventRow>(value.value())?);
        }
        Ok(last)
    }

    /// Inserts a new file and its `registered` event in one transaction,
    /// returning the generated identifier.
    pub fn register_file(&self, path: &str, user: &str) -> Result<String, StoreError> {
        let file_id = Uuid::new_v4().to_string();
        let ts = now();
        let row = FileRow {
            submission_path: path.to_owned(),
            submission_user: user.to_owned(),
            header: None,
            key_hash: None,
            accession: None,
            created_at: ts.clone(),
            last_modified: ts,
        };

        let tx = self.db.begin_write().map_err(be)?;
        {
            let mut files = tx.open_table(FILES).map_err(be)?;
            let mut events = tx.open_table(FILE_EVENTS).map_err(be)?;
            let mut corr_index = tx.open_table(CORR_INDEX).map_err(be)?;
            let mut meta = tx.open_table(META).map_err(be)?;
            files
                .insert(file_id.as_str(), enc(&row)?.as_slice())
                .map_err(be)?;
            Self::append_event(
                &mut events,
                &mut corr_index,
                &mut meta,
                &file_id,
                FileEvent::Registered,
                &file_id,
                user,
                "{}",
                "{}",
            )?;
        }
        tx.commit().map_err(be)?;
        Ok(file_id)
    }

    /// Appends one event to a file's log. Fails when the file does not
    /// exist.
    pub fn update_file_event_log(
        &self,
        file_id: &str,
        event: FileEvent,
        correlation_id: &str,
        user: &str,
        message: &str,
        details: &str,
    ) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(be)?;
        {
            let mut files = tx.open_table(FILES).map_err(be)?;
            let mut row = Self::load_file(&files, file_id)?
                .ok_or_else(|| StoreError::ForeignKey("file_event_log.file_id".into()))?;
            let mut events = tx.open_table(FILE_EVENTS).map_err(be)?;
            let mut corr_index = tx.open_table(CORR_INDEX).map_err(be)?;
            let mut meta = tx.open_table(META).map_err(be)?;
            Self::append_event(
                &mut events,
                &mut corr_index,
                &mut meta,
                file_id,
                event,
                correlation_id,
                user,
                message,
                details,
            )?;
            row.last_modified = now();
            files
                .insert(file_id, enc(&row)?.as_slice())
                .map_err(be)?;
        }
        tx.commit().map_err(be)?;
        Ok(())
    }

    /// The file a correlation id is threaded to, if any.
    pub fn get_file_id(&self, correlation_id: &str) -> Result<Option<String>, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let corr_index = tx.open_table(CORR_INDEX).map_err(be)?;
        let result = corr_index
            .get(correlation_id)
            .map_err(be)?
            .map(|g| g.value().to_owned());
        Ok(result)
    }

    /// The most recent event recorded under a correlation id.
    pub fn get_file_status(&self, correlation_id: &str) -> Result<Option<String>, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let corr_index = tx.open_table(CORR_INDEX).map_err(be)?;
        let Some(file_id) = corr_index
            .get(correlation_id)
            .map_err(be)?
            .map(|g| g.value().to_owned())
        else {
            return Ok(None);
        };
        let events = tx.open_table(FILE_EVENTS).map_err(be)?;
        let (start, end) = k_prefix_range(&file_id);
        let mut last = None;
        for entry in events.range(start.as_slice()..end.as_slice()).map_err(be)? {
            let (_, value) = entry.map_err(be)?;
            let row: EventRow = dec(value.value())?;
            if row.correlation_id == correlation_id {
                last = Some(row.event);
            }
        }
        Ok(last)
    }

    /// The derived status of a file: the name of the most recent event in
    /// its log.
    pub fn file_status(&self, file_id: &str) -> Result<Option<String>, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let events = tx.open_table(FILE_EVENTS).map_err(be)?;
        Ok(Self::latest_event(&events, file_id)?.map(|r| r.event))
    }

    /// The ordered event log of a file, oldest first, as
    /// `(event, correlation_id)` pairs.
    pub fn file_events(&self, file_id: &str) -> Result<Vec<(String, String)>, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let events = tx.open_table(FILE_EVENTS).map_err(be)?;
        let (start, end) = k_prefix_range(file_id);
        let mut out = Vec::new();
        for entry in events.range(start.as_slice()..end.as_slice()).map_err(be)? {
            let (_, value) = entry.map_err(be)?;
            let row: EventRow = dec(value.value())?;
            out.push((row.event, row.correlation_id));
        }
        Ok(out)
    }

    /// Records the encryption header for a file. Storing an identical
    /// header twice is a no-op; a different header for a file that already
    /// has one is a consistency error.
    pub fn store_header(&self, header: &[u8], file_id: &str) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(be)?;
        {
            let mut files = tx.open_table(FILES).map_err(be)?;
            let mut row =
                Self::load_file(&files, file_id)?.ok_or(StoreError::ZeroRowsChanged)?;
            match &row.header {
                Some(existing) if existing == header => {}
                Some(_) => {
                    return Err(StoreError::DuplicateKey("files.header".into()));
                }
                None => {
                    row.header = Some(header.to_vec());
                    row.last_modified = now();
                    files
                        .insert(file_id, enc(&row)?.as_slice())
                        .map_err(be)?;
                }
            }
        }
        tx.commit().map_err(be)?;
        Ok(())
    }

    /// The stored encryption header of a file.
    pub fn get_header(&self, file_id: &str) -> Result<Vec<u8>, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let files = tx.open_table(FILES).map_err(be)?;
        let row = Self::load_file(&files, file_id)?.ok_or(StoreError::NotFound)?;
        row.header.ok_or(StoreError::NotFound)
    }

    /// Records archive metadata and emits the `archived` event in one
    /// transaction. `(file_id, correlation_id)` must be unique; the file
    /// must exist.
    pub fn set_archived(
        &self,
        file_info: &FileInfo,
        file_id: &str,
        correlation_id: &str,
    ) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(be)?;
        {
            let mut files = tx.open_table(FILES).map_err(be)?;
            let mut row = Self::load_file(&files, file_id)?
                .ok_or_else(|| StoreError::ForeignKey("archive_log.file_id".into()))?;
            let mut archive = tx.open_table(ARCHIVE).map_err(be)?;
            let key = k_pair(file_id, correlation_id);
            if archive.get(key.as_slice()).map_err(be)?.is_some() {
                return Err(StoreError::DuplicateKey(
                    "archive_log(file_id, correlation_id)".into(),
                ));
            }
            let mut events = tx.open_table(FILE_EVENTS).map_err(be)?;
            let mut corr_index = tx.open_table(CORR_INDEX).map_err(be)?;
            let mut meta = tx.open_table(META).map_err(be)?;
            let seq = Self::next_seq(&mut meta)?;
            let archive_row = ArchiveRow {
                archive_path: file_info.path.clone(),
                archive_size: file_info.size,
                checksum: file_info.checksum.clone(),
                seq,
                timestamp: now(),
            };
            archive
                .insert(key.as_slice(), enc(&archive_row)?.as_slice())
                .map_err(be)?;
            let user = row.submission_user.clone();
            Self::append_event(
                &mut events,
                &mut corr_index,
                &mut meta,
                file_id,
                FileEvent::Archived,
                correlation_id,
                &user,
                "{}",
                "{}",
            )?;
            row.last_modified = now();
            files
                .insert(file_id, enc(&row)?.as_slice())
                .map_err(be)?;
        }
        tx.commit().map_err(be)?;
        Ok(())
    }

    /// Records verification metadata and emits the `verified` event in one
    /// transaction, under the same uniqueness fence as [`Self::set_archived`].
    pub fn set_verified(
        &self,
        file_info: &FileInfo,
        file_id: &str,
        correlation_id: &str,
    ) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(be)?;
        {
            let mut files = tx.open_table(FILES).map_err(be)?;
            let mut row = Self::load_file(&files, file_id)?
                .ok_or_else(|| StoreError::ForeignKey("verify_log.file_id".into()))?;
            let mut verify = tx.open_table(VERIFY).map_err(be)?;
            let key = k_pair(file_id, correlation_id);
            if verify.get(key.as_slice()).map_err(be)?.is_some() {
                return Err(StoreError::DuplicateKey(
                    "verify_log(file_id, correlation_id)".into(),
                ));
            }
            let mut events = tx.open_table(FILE_EVENTS).map_err(be)?;
            let mut corr_index = tx.open_table(CORR_INDEX).map_err(be)?;
            let mut meta = tx.open_table(META).map_err(be)?;
            let seq = Self::next_seq(&mut meta)?;
            let verify_row = VerifyRow {
                decrypted_size: file_info.decrypted_size,
                decrypted_checksum: file_info.decrypted_checksum.clone(),
                seq,
                timestamp: now(),
            };
            verify
                .insert(key.as_slice(), enc(&verify_row)?.as_slice())
                .map_err(be)?;
            let user = row.submission_user.clone();
            Self::append_event(
                &mut events,
                &mut corr_index,
                &mut meta,
                file_id,
                FileEvent::Verified,
                correlation_id,
                &user,
                "{}",
                "{}",
            )?;
            row.last_modified = now();
            files
                .insert(file_id, enc(&row)?.as_slice())
                .map_err(be)?;
        }
        tx.commit().map_err(be)?;
        Ok(())
    }

    /// Assigns a stable accession to a file.
    pub fn set_accession_id(&self, accession: &str, file_id: &str) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(be)?;
        {
            let mut files = tx.open_table(FILES).map_err(be)?;
            let mut row = Self::load_file(&files, file_id)?
                .ok_or_else(|| StoreError::ForeignKey("files.stable_id".into()))?;
            let mut accessions = tx.open_table(ACCESSIONS).map_err(be)?;
            match accessions.get(accession).map_err(be)? {
                Some(owner) if owner.value() != file_id => {
                    return Err(StoreError::DuplicateKey("files.stable_id".into()));
                }
                _ => {}
            }
            if let Some(old) = row.accession.take() {
                if old != accession {
                    accessions.remove(old.as_str()).map_err(be)?;
                }
            }
            accessions.insert(accession, file_id).map_err(be)?;
            row.accession = Some(accession.to_owned());
            row.last_modified = now();
            files
                .insert(file_id, enc(&row)?.as_slice())
                .map_err(be)?;
        }
        tx.commit().map_err(be)?;
        Ok(())
    }

    /// Reports whether an accession is free, already on this file, or taken
    /// by another: `""`, `"same"` or `"duplicate"`.
    pub fn check_accession_id_exists(
        &self,
        accession: &str,
        file_id: &str,
    ) -> Result<String, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let accessions = tx.open_table(ACCESSIONS).map_err(be)?;
        let result = match accessions.get(accession).map_err(be)? {
            None => Ok(String::new()),
            Some(owner) if owner.value() == file_id => Ok("same".to_owned()),
            Some(_) => Ok("duplicate".to_owned()),
        };
        result
    }

    /// Maps accessions into a dataset in one transaction. Every accession
    /// must already be assigned; absent accessions fail the whole mapping.
    pub fn map_files_to_dataset(
        &self,
        dataset_id: &str,
        accessions: &[&str],
    ) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(be)?;
        {
            let accession_tbl = tx.open_table(ACCESSIONS).map_err(be)?;
            let mut mapping = tx.open_table(DATASET_MAP).map_err(be)?;
            let mut datasets = tx.open_table(DATASETS).map_err(be)?;
            let mut meta = tx.open_table(META).map_err(be)?;
            if datasets.get(dataset_id).map_err(be)?.is_none() {
                let seq = Self::next_seq(&mut meta)?;
                let row = DatasetRow {
                    seq,
                    created_at: now(),
                };
                datasets
                    .insert(dataset_id, enc(&row)?.as_slice())
                    .map_err(be)?;
            }
            for accession in accessions {
                let file_id = accession_tbl
                    .get(*accession)
                    .map_err(be)?
                    .map(|g| g.value().to_owned())
                    .ok_or_else(|| {
                        StoreError::ForeignKey(format!("file_dataset.accession: {accession}"))
                    })?;
                mapping
                    .insert(k_pair(dataset_id, accession).as_slice(), file_id.as_str())
                    .map_err(be)?;
            }
        }
        tx.commit().map_err(be)?;
        Ok(())
    }

    /// Appends one event to a dataset's log. The dataset must exist.
    pub fn update_dataset_event(
        &self,
        dataset_id: &str,
        event: DatasetEvent,
        payload: &str,
    ) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(be)?;
        {
            let datasets = tx.open_table(DATASETS).map_err(be)?;
            if datasets.get(dataset_id).map_err(be)?.is_none() {
                return Err(StoreError::ForeignKey(
                    "dataset_event_log.dataset_id".into(),
                ));
            }
            let mut events = tx.open_table(DATASET_EVENTS).map_err(be)?;
            let mut meta = tx.open_table(META).map_err(be)?;
            let seq = Self::next_seq(&mut meta)?;
            let row = DatasetEventRow {
                event: event.as_str().to_owned(),
                payload: payload.to_owned(),
                timestamp: now(),
            };
            events
                .insert(k_seq(dataset_id, seq).as_slice(), enc(&row)?.as_slice())
                .map_err(be)?;
        }
        tx.commit().map_err(be)?;
        Ok(())
    }

    /// The latest event of a dataset.
    pub fn get_dataset_status(&self, dataset_id: &str) -> Result<String, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let events = tx.open_table(DATASET_EVENTS).map_err(be)?;
        let (start, end) = k_prefix_range(dataset_id);
        let mut last = None;
        for entry in events.range(start.as_slice()..end.as_slice()).map_err(be)? {
            let (_, value) = entry.map_err(be)?;
            let row: DatasetEventRow = dec(value.value())?;
            last = Some(row.event);
        }
        last.ok_or(StoreError::NotFound)
    }

    /// Whether a dataset has been registered through a mapping.
    pub fn check_if_dataset_exists(&self, dataset_id: &str) -> Result<bool, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let datasets = tx.open_table(DATASETS).map_err(be)?;
        let exists = datasets.get(dataset_id).map_err(be)?.is_some();
        Ok(exists)
    }

    fn latest_archive(
        archive: &impl ReadableTable<&'static [u8], &'static [u8]>,
        file_id: &str,
    ) -> Result<Option<ArchiveRow>, StoreError> {
        let (start, end) = k_prefix_range(file_id);
        let mut best: Option<ArchiveRow> = None;
        for entry in archive.range(start.as_slice()..end.as_slice()).map_err(be)? {
            let (_, value) = entry.map_err(be)?;
            let row: ArchiveRow = dec(value.value())?;
            if best.as_ref().map(|b| row.seq > b.seq).unwrap_or(true) {
                best = Some(row);
            }
        }
        Ok(best)
    }

    fn latest_verify(
        verify: &impl ReadableTable<&'static [u8], &'static [u8]>,
        file_id: &str,
    ) -> Result<Option<VerifyRow>, StoreError> {
        let (start, end) = k_prefix_range(file_id);
        let mut best: Option<VerifyRow> = None;
        for entry in verify.range(start.as_slice()..end.as_slice()).map_err(be)? {
            let (_, value) = entry.map_err(be)?;
            let row: VerifyRow = dec(value.value())?;
            if best.as_ref().map(|b| row.seq > b.seq).unwrap_or(true) {
                best = Some(row);
            }
        }
        Ok(best)
    }

    /// Everything the download service needs to serve one file.
    pub fn get_file(&self, file_id: &str) -> Result<FileDownload, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let files = tx.open_table(FILES).map_err(be)?;
        let row = Self::load_file(&files, file_id)?.ok_or(StoreError::NotFound)?;
        let header = row.header.clone().ok_or(StoreError::NotFound)?;
        let archive_tbl = tx.open_table(ARCHIVE).map_err(be)?;
        let archive = Self::latest_archive(&archive_tbl, file_id)?.ok_or(StoreError::NotFound)?;
        let verify_tbl = tx.open_table(VERIFY).map_err(be)?;
        let verify = Self::latest_verify(&verify_tbl, file_id)?;
        let last_modified: DateTime<Utc> = row
            .last_modified
            .parse()
            .map_err(|e| StoreError::Decode(format!("last_modified: {e}")))?;
        Ok(FileDownload {
            archive_path: archive.archive_path,
            archive_size: archive.archive_size,
            decrypted_size: verify.as_ref().map(|v| v.decrypted_size).unwrap_or(0),
            decrypted_checksum: verify.map(|v| v.decrypted_checksum).unwrap_or_default(),
            last_modified,
            header,
        })
    }

    /// The archive location of a file: `(path, size)`.
    pub fn get_archived(&self, file_id: &str) -> Result<(String, u64), StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let archive_tbl = tx.open_table(ARCHIVE).map_err(be)?;
        let row = Self::latest_archive(&archive_tbl, file_id)?.ok_or(StoreError::NotFound)?;
        Ok((row.archive_path, row.archive_size))
    }

    /// Combined archive and verification metadata of a file.
    pub fn get_file_info(&self, file_id: &str) -> Result<FileInfo, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let archive_tbl = tx.open_table(ARCHIVE).map_err(be)?;
        let archive = Self::latest_archive(&archive_tbl, file_id)?.ok_or(StoreError::NotFound)?;
        let verify_tbl = tx.open_table(VERIFY).map_err(be)?;
        let verify = Self::latest_verify(&verify_tbl, file_id)?;
        Ok(FileInfo {
            checksum: archive.checksum,
            size: archive.archive_size,
            path: archive.archive_path,
            decrypted_checksum: verify
                .as_ref()
                .map(|v| v.decrypted_checksum.clone())
                .unwrap_or_default(),
            decrypted_size: verify.map(|v| v.decrypted_size).unwrap_or(0),
        })
    }

    /// The files of a dataset, as served by the metadata endpoint.
    pub fn get_files(&self, dataset_id: &str) -> Result<Vec<DatasetFile>, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let datasets = tx.open_table(DATASETS).map_err(be)?;
        if datasets.get(dataset_id).map_err(be)?.is_none() {
            return Err(StoreError::NotFound);
        }
        let mapping = tx.open_table(DATASET_MAP).map_err(be)?;
        let files = tx.open_table(FILES).map_err(be)?;
        let events = tx.open_table(FILE_EVENTS).map_err(be)?;
        let archive_tbl = tx.open_table(ARCHIVE).map_err(be)?;
        let verify_tbl = tx.open_table(VERIFY).map_err(be)?;

        let (start, end) = k_prefix_range(dataset_id);
        let mut out = Vec::new();
        for entry in mapping.range(start.as_slice()..end.as_slice()).map_err(be)? {
            let (key, value) = entry.map_err(be)?;
            let accession = String::from_utf8_lossy(&key.value()[dataset_id.len() + 1..]).into_owned();
            let file_id = value.value().to_owned();
            let Some(row) = Self::load_file(&files, &file_id)? else {
                continue;
            };
            let status = Self::latest_event(&events, &file_id)?
                .map(|r| r.event)
                .unwrap_or_else(|| "registered".to_owned());
            let archive = Self::latest_archive(&archive_tbl, &file_id)?;
            let verify = Self::latest_verify(&verify_tbl, &file_id)?;
            let display_file_name = row
                .submission_path
                .rsplit('/')
                .next()
                .unwrap_or(row.submission_path.as_str())
                .to_owned();
            out.push(DatasetFile {
                file_id,
                accession_id: accession,
                dataset_id: dataset_id.to_owned(),
                display_file_name,
                file_path: row.submission_path,
                file_size: archive.as_ref().map(|a| a.archive_size).unwrap_or(0),
                decrypted_file_size: verify.as_ref().map(|v| v.decrypted_size).unwrap_or(0),
                decrypted_file_checksum: verify
                    .map(|v| v.decrypted_checksum)
                    .unwrap_or_default(),
                decrypted_file_checksum_type: "sha256".to_owned(),
                file_status: status,
                created_at: row.created_at,
                last_modified: row.last_modified,
            });
        }
        Ok(out)
    }

    /// The dataset a file belongs to, for the permission gate.
    pub fn check_file_permission(&self, file_id: &str) -> Result<String, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let mapping = tx.open_table(DATASET_MAP).map_err(be)?;
        for entry in mapping.iter().map_err(be)? {
            let (key, value) = entry.map_err(be)?;
            if value.value() == file_id {
                let key = key.value();
                let split = key.iter().position(|b| *b == 0).unwrap_or(key.len());
                return Ok(String::from_utf8_lossy(&key[..split]).into_owned());
            }
        }
        Err(StoreError::NotFound)
    }

    /// Registers an encryption-key hash. Re-adding a known hash is a no-op.
    pub fn add_key_hash(&self, key_hash: &str, description: &str) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(be)?;
        {
            let mut keys = tx.open_table(KEYS).map_err(be)?;
            if keys.get(key_hash).map_err(be)?.is_none() {
                let mut meta = tx.open_table(META).map_err(be)?;
                let seq = Self::next_seq(&mut meta)?;
                let row = KeyRow {
                    description: description.to_owned(),
                    seq,
                    created_at: now(),
                    deprecated_at: None,
                };
                keys.insert(key_hash, enc(&row)?.as_slice()).map_err(be)?;
            }
        }
        tx.commit().map_err(be)?;
        Ok(())
    }

    /// Every registered key hash, oldest first.
    pub fn list_key_hashes(&self) -> Result<Vec<KeyHash>, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let keys = tx.open_table(KEYS).map_err(be)?;
        let mut rows = Vec::new();
        for entry in keys.iter().map_err(be)? {
            let (hash, value) = entry.map_err(be)?;
            let row: KeyRow = dec(value.value())?;
            rows.push((row.seq, KeyHash {
                hash: hash.value().to_owned(),
                description: row.description,
                created_at: row.created_at,
                deprecated_at: row.deprecated_at,
            }));
        }
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, k)| k).collect())
    }

    /// Marks a key hash deprecated. Unknown or already-deprecated hashes
    /// fail.
    pub fn deprecate_key_hash(&self, key_hash: &str) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(be)?;
        {
            let mut keys = tx.open_table(KEYS).map_err(be)?;
            let mut row: KeyRow = match keys.get(key_hash).map_err(be)? {
                Some(guard) => dec(guard.value())?,
                None => return Err(StoreError::KeyHashDeprecation),
            };
            if row.deprecated_at.is_some() {
                return Err(StoreError::KeyHashDeprecation);
            }
            row.deprecated_at = Some(now());
            keys.insert(key_hash, enc(&row)?.as_slice()).map_err(be)?;
        }
        tx.commit().map_err(be)?;
        Ok(())
    }

    /// References a registered key hash from a file. The hash must be in
    /// the registry and the file must exist.
    pub fn set_key_hash(&self, key_hash: &str, file_id: &str) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(be)?;
        {
            let keys = tx.open_table(KEYS).map_err(be)?;
            if keys.get(key_hash).map_err(be)?.is_none() {
                return Err(StoreError::ForeignKey("files.key_hash".into()));
            }
            let mut files = tx.open_table(FILES).map_err(be)?;
            let mut row =
                Self::load_file(&files, file_id)?.ok_or(StoreError::ZeroRowsChanged)?;
            row.key_hash = Some(key_hash.to_owned());
            row.last_modified = now();
            files
                .insert(file_id, enc(&row)?.as_slice())
                .map_err(be)?;
        }
        tx.commit().map_err(be)?;
        Ok(())
    }

    /// The key hash referenced by a file, if one has been set.
    pub fn get_key_hash(&self, file_id: &str) -> Result<Option<String>, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let files = tx.open_table(FILES).map_err(be)?;
        let row = Self::load_file(&files, file_id)?.ok_or(StoreError::NotFound)?;
        Ok(row.key_hash)
    }

    /// The file ids whose accessions are mapped into any dataset.
    fn mapped_file_ids(&self) -> Result<HashSet<String>, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let mapping = tx.open_table(DATASET_MAP).map_err(be)?;
        let mut out = HashSet::new();
        for entry in mapping.iter().map_err(be)? {
            let (_, value) = entry.map_err(be)?;
            out.insert(value.value().to_owned());
        }
        Ok(out)
    }

    /// A user's submitted files with their derived status.
    pub fn get_user_files(&self, user: &str) -> Result<Vec<UserFile>, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let files = tx.open_table(FILES).map_err(be)?;
        let events = tx.open_table(FILE_EVENTS).map_err(be)?;
        let mut out = Vec::new();
        for entry in files.iter().map_err(be)? {
            let (file_id, value) = entry.map_err(be)?;
            let row: FileRow = dec(value.value())?;
            if row.submission_user != user {
                continue;
            }
            let status = Self::latest_event(&events, file_id.value())?
                .map(|r| r.event)
                .unwrap_or_else(|| "registered".to_owned());
            out.push(UserFile {
                file_id: file_id.value().to_owned(),
                inbox_path: row.submission_path,
                status,
                created_at: row.created_at,
            });
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    /// Users that still have files outside any dataset.
    pub fn list_active_users(&self) -> Result<Vec<String>, StoreError> {
        let mapped = self.mapped_file_ids()?;
        let tx = self.db.begin_read().map_err(be)?;
        let files = tx.open_table(FILES).map_err(be)?;
        let mut users = HashSet::new();
        for entry in files.iter().map_err(be)? {
            let (file_id, value) = entry.map_err(be)?;
            let row: FileRow = dec(value.value())?;
            if !mapped.contains(file_id.value()) {
                users.insert(row.submission_user);
            }
        }
        let mut out: Vec<String> = users.into_iter().collect();
        out.sort();
        Ok(out)
    }

    fn dataset_entry(
        &self,
        dataset_id: &str,
        row: &DatasetRow,
    ) -> Result<DatasetEntry, StoreError> {
        let (status, timestamp) = match self.get_dataset_status(dataset_id) {
            Ok(status) => (status, self.latest_dataset_event_time(dataset_id)?),
            Err(StoreError::NotFound) => ("registered".to_owned(), row.created_at.clone()),
            Err(e) => return Err(e),
        };
        Ok(DatasetEntry {
            dataset_id: dataset_id.to_owned(),
            status,
            timestamp,
        })
    }

    fn latest_dataset_event_time(&self, dataset_id: &str) -> Result<String, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let events = tx.open_table(DATASET_EVENTS).map_err(be)?;
        let (start, end) = k_prefix_range(dataset_id);
        let mut last = None;
        for entry in events.range(start.as_slice()..end.as_slice()).map_err(be)? {
            let (_, value) = entry.map_err(be)?;
            let row: DatasetEventRow = dec(value.value())?;
            last = Some(row.timestamp);
        }
        last.ok_or(StoreError::NotFound)
    }

    /// Every dataset in registration order with its derived status.
    pub fn list_datasets(&self) -> Result<Vec<DatasetEntry>, StoreError> {
        let mut rows = {
            let tx = self.db.begin_read().map_err(be)?;
            let datasets = tx.open_table(DATASETS).map_err(be)?;
            let mut rows = Vec::new();
            for entry in datasets.iter().map_err(be)? {
                let (dataset_id, value) = entry.map_err(be)?;
                let row: DatasetRow = dec(value.value())?;
                rows.push((dataset_id.value().to_owned(), row));
            }
            rows
        };
        rows.sort_by_key(|(_, row)| row.seq);
        let mut out = Vec::new();
        for (dataset_id, row) in rows {
            out.push(self.dataset_entry(&dataset_id, &row)?);
        }
        Ok(out)
    }

    /// The datasets that contain at least one of the user's files, hiding
    /// deprecated ones.
    pub fn list_user_datasets(&self, user: &str) -> Result<Vec<DatasetEntry>, StoreError> {
        let user_datasets = {
            let tx = self.db.begin_read().map_err(be)?;
            let mapping = tx.open_table(DATASET_MAP).map_err(be)?;
            let files = tx.open_table(FILES).map_err(be)?;
            let mut found: HashSet<String> = HashSet::new();
            for entry in mapping.iter().map_err(be)? {
                let (key, value) = entry.map_err(be)?;
                let Some(row) = Self::load_file(&files, value.value())? else {
                    continue;
                };
                if row.submission_user != user {
                    continue;
                }
                let key = key.value();
                let split = key.iter().position(|b| *b == 0).unwrap_or(key.len());
                found.insert(String::from_utf8_lossy(&key[..split]).into_owned());
            }
            found
        };
        let mut out = Vec::new();
        for entry in self.list_datasets()? {
            if user_datasets.contains(&entry.dataset_id) && entry.status != "deprecated" {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// The correlation id of a pending submission, empty once the file has
    /// moved into a dataset.
    pub fn get_corr_id(&self, user: &str, path: &str) -> Result<String, StoreError> {
        let (file_id, accession) = {
            let tx = self.db.begin_read().map_err(be)?;
            let files = tx.open_table(FILES).map_err(be)?;
            let mut found: Option<(String, FileRow)> = None;
            for entry in files.iter().map_err(be)? {
                let (file_id, value) = entry.map_err(be)?;
                let row: FileRow = dec(value.value())?;
                if row.submission_user == user && row.submission_path == path {
                    let newer = found
                        .as_ref()
                        .map(|(_, prev)| row.created_at > prev.created_at)
                        .unwrap_or(true);
                    if newer {
                        found = Some((file_id.value().to_owned(), row));
                    }
                }
            }
            let (file_id, row) = found.ok_or(StoreError::NotFound)?;
            (file_id, row.accession)
        };
        if accession.is_some() && self.mapped_file_ids()?.contains(&file_id) {
            return Err(StoreError::NotFound);
        }
        let tx = self.db.begin_read().map_err(be)?;
        let events = tx.open_table(FILE_EVENTS).map_err(be)?;
        let last = Self::latest_event(&events, &file_id)?.ok_or(StoreError::NotFound)?;
        Ok(last.correlation_id)
    }

    /// The submission path behind an accession.
    pub fn get_inbox_path(&self, accession: &str) -> Result<String, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let accessions = tx.open_table(ACCESSIONS).map_err(be)?;
        let file_id = accessions
            .get(accession)
            .map_err(be)?
            .map(|g| g.value().to_owned())
            .ok_or(StoreError::NotFound)?;
        let files = tx.open_table(FILES).map_err(be)?;
        let row = Self::load_file(&files, &file_id)?.ok_or(StoreError::NotFound)?;
        Ok(row.submission_path)
    }

    /// The archive path behind an accession.
    pub fn get_archive_path(&self, accession: &str) -> Result<String, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let accessions = tx.open_table(ACCESSIONS).map_err(be)?;
        let file_id = accessions
            .get(accession)
            .map_err(be)?
            .map(|g| g.value().to_owned())
            .ok_or(StoreError::NotFound)?;
        let archive_tbl = tx.open_table(ARCHIVE).map_err(be)?;
        let row = Self::latest_archive(&archive_tbl, &file_id)?.ok_or(StoreError::NotFound)?;
        Ok(row.archive_path)
    }

    /// The stored header behind an accession.
    pub fn get_header_for_accession(&self, accession: &str) -> Result<Vec<u8>, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let accessions = tx.open_table(ACCESSIONS).map_err(be)?;
        let file_id = accessions
            .get(accession)
            .map_err(be)?
            .map(|g| g.value().to_owned())
            .ok_or(StoreError::NotFound)?;
        drop(accessions);
        self.get_header(&file_id)
    }

    /// Submission facts for mirroring an accessioned file.
    pub fn get_sync_data(&self, accession: &str) -> Result<SyncData, StoreError> {
        let tx = self.db.begin_read().map_err(be)?;
        let accessions = tx.open_table(ACCESSIONS).map_err(be)?;
        let file_id = accessions
            .get(accession)
            .map_err(be)?
            .map(|g| g.value().to_owned())
            .ok_or(StoreError::NotFound)?;
        let files = tx.open_table(FILES).map_err(be)?;
        let row = Self::load_file(&files, &file_id)?.ok_or(StoreError::NotFound)?;
        let verify_tbl = tx.open_table(VERIFY).map_err(be)?;
        let verify = Self::latest_verify(&verify_tbl, &file_id)?.ok_or(StoreError::NotFound)?;
        Ok(SyncData {
            user: row.submission_user,
            file_path: row.submission_path,
            checksum: verify.decrypted_checksum,
        })
    }
}
