// Path: crates/state/tests/store_ops.rs
//! End-to-end exercises of the state store against a scratch database.

use arca_state::{StateStore, REQUIRED_SCHEMA_VERSION};
use arca_types::error::StoreError;
use arca_types::model::{DatasetEvent, FileEvent, FileInfo};
use tempfile::TempDir;
use uuid::Uuid;

fn open_store(dir: &TempDir) -> StateStore {
    StateStore::open(dir.path().join("state.redb")).unwrap()
}

fn archived_info(path: &str, size: u64) -> FileInfo {
    FileInfo {
        checksum: "ab".repeat(32),
        size,
        path: path.to_owned(),
        decrypted_checksum: "cd".repeat(32),
        decrypted_size: size.saturating_sub(52),
    }
}

#[test]
fn register_file_returns_uuid_and_logs_registered() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let file_id = db.register_file("/testuser/file1.c4gh", "testuser").unwrap();
    assert!(Uuid::parse_str(&file_id).is_ok(), "not a UUID: {file_id}");

    assert_eq!(db.file_status(&file_id).unwrap().as_deref(), Some("registered"));
}

#[test]
fn schema_version_sentinel_is_stamped() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);
    assert_eq!(db.version().unwrap(), REQUIRED_SCHEMA_VERSION);
}

#[test]
fn get_file_id_resolves_correlation() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let file_id = db.register_file("/testuser/file3.c4gh", "testuser").unwrap();
    let corr_id = Uuid::new_v4().to_string();
    db.update_file_event_log(&file_id, FileEvent::Uploaded, &corr_id, "testuser", "{}", "{}")
        .unwrap();

    assert_eq!(db.get_file_id(&corr_id).unwrap().as_deref(), Some(file_id.as_str()));
    assert_eq!(db.get_file_id("unknown-corr").unwrap(), None);
}

#[test]
fn update_file_event_log_requires_existing_file() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let corr_id = Uuid::new_v4().to_string();
    let err = db
        .update_file_event_log(
            "00000000-0000-0000-0000-000000000000",
            FileEvent::Uploaded,
            &corr_id,
            "testuser",
            "{}",
            "{}",
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::ForeignKey(_)));

    let file_id = db.register_file("/testuser/file4.c4gh", "testuser").unwrap();
    db.update_file_event_log(&file_id, FileEvent::Uploaded, &corr_id, "testuser", "{}", "{}")
        .unwrap();
    assert_eq!(db.file_status(&file_id).unwrap().as_deref(), Some("uploaded"));
}

#[test]
fn status_is_the_latest_event() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let file_id = db.register_file("/testuser/chain.c4gh", "testuser").unwrap();
    let corr_id = Uuid::new_v4().to_string();
    for event in [FileEvent::Uploaded, FileEvent::Submitted] {
        db.update_file_event_log(&file_id, event, &corr_id, "testuser", "{}", "{}")
            .unwrap();
    }
    assert_eq!(db.file_status(&file_id).unwrap().as_deref(), Some("submitted"));
    assert_eq!(
        db.get_file_status(&corr_id).unwrap().as_deref(),
        Some("submitted")
    );

    db.update_file_event_log(&file_id, FileEvent::Disabled, &corr_id, "testuser", "{}", "{}")
        .unwrap();
    assert_eq!(db.file_status(&file_id).unwrap().as_deref(), Some("disabled"));

    let events: Vec<String> = db
        .file_events(&file_id)
        .unwrap()
        .into_iter()
        .map(|(event, _)| event)
        .collect();
    assert_eq!(events, vec!["registered", "uploaded", "submitted", "disabled"]);
}

#[test]
fn store_header_and_get_header() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let file_id = db
        .register_file("/testuser/TestStoreHeader.c4gh", "testuser")
        .unwrap();
    db.store_header(&[15, 45, 20, 40, 48], &file_id).unwrap();
    assert_eq!(db.get_header(&file_id).unwrap(), vec![15, 45, 20, 40, 48]);

    // Unknown file: zero rows changed.
    let err = db
        .store_header(&[15, 45, 20, 40, 48], "00000000-0000-0000-0000-000000000000")
        .unwrap_err();
    assert!(matches!(err, StoreError::ZeroRowsChanged));

    // Identical re-store is tolerated, a different header is not.
    db.store_header(&[15, 45, 20, 40, 48], &file_id).unwrap();
    let err = db.store_header(&[1, 2, 3], &file_id).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey(_)));
}

#[test]
fn set_archived_enforces_fences() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let file_id = db
        .register_file("/testuser/TestSetArchived.c4gh", "testuser")
        .unwrap();
    let info = archived_info("/tmp/TestSetArchived.c4gh", 1000);
    let corr_id = Uuid::new_v4().to_string();
    db.set_archived(&info, &file_id, &corr_id).unwrap();
    assert_eq!(db.file_status(&file_id).unwrap().as_deref(), Some("archived"));

    // Foreign key towards files.
    let err = db
        .set_archived(&info, "00000000-0000-0000-0000-000000000000", &corr_id)
        .unwrap_err();
    assert!(matches!(err, StoreError::ForeignKey(_)));

    // (file_id, corr_id) is unique; the first call's state is unchanged.
    let err = db.set_archived(&info, &file_id, &corr_id).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey(_)));
    let (path, size) = db.get_archived(&file_id).unwrap();
    assert_eq!(path, "/tmp/TestSetArchived.c4gh");
    assert_eq!(size, 1000);
}

#[test]
fn set_verified_records_decrypted_facts() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let file_id = db
        .register_file("/testuser/TestSetVerified.c4gh", "testuser")
        .unwrap();
    let corr_id = Uuid::new_v4().to_string();
    let info = archived_info("/tmp/TestSetVerified.c4gh", 1000);
    db.set_archived(&info, &file_id, &corr_id).unwrap();
    db.set_verified(&info, &file_id, &corr_id).unwrap();

    assert_eq!(db.file_status(&file_id).unwrap().as_deref(), Some("verified"));
    let stored = db.get_file_info(&file_id).unwrap();
    assert_eq!(stored.size, 1000);
    assert_eq!(stored.path, "/tmp/TestSetVerified.c4gh");
    assert_eq!(stored.decrypted_size, info.decrypted_size);
    assert_eq!(stored.decrypted_checksum, info.decrypted_checksum);

    let err = db.set_verified(&info, &file_id, &corr_id).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey(_)));
}

#[test]
fn accession_same_and_duplicate() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let file_a = db
        .register_file("/testuser/TestCheckAccessionIDExists.c4gh", "testuser")
        .unwrap();
    let file_b = db
        .register_file("/testuser/TestCheckAccessionIDExists-b.c4gh", "testuser")
        .unwrap();

    db.set_accession_id("TEST:111-1234-4567", &file_a).unwrap();
    assert_eq!(
        db.check_accession_id_exists("TEST:111-1234-4567", &file_a)
            .unwrap(),
        "same"
    );
    assert_eq!(
        db.check_accession_id_exists("TEST:111-1234-4567", &file_b)
            .unwrap(),
        "duplicate"
    );
    assert_eq!(
        db.check_accession_id_exists("TEST:unassigned", &file_a).unwrap(),
        ""
    );

    let err = db.set_accession_id("TEST:111-1234-4567", &file_b).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey(_)));
}

#[test]
fn map_files_to_dataset_requires_known_accessions() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let mut accessions = Vec::new();
    for i in 1..6 {
        let file_id = db
            .register_file(&format!("/testuser/TestMapFilesToDataset-{i}.c4gh"), "testuser")
            .unwrap();
        let accession = format!("accession-{i}");
        db.set_accession_id(&accession, &file_id).unwrap();
        accessions.push(accession);
    }

    let refs: Vec<&str> = accessions.iter().map(String::as_str).collect();
    db.map_files_to_dataset("dataset1", &refs[0..3]).unwrap();
    db.map_files_to_dataset("dataset2", &refs[3..5]).unwrap();
    assert!(db.check_if_dataset_exists("dataset1").unwrap());
    assert!(!db.check_if_dataset_exists("missing dataset").unwrap());

    let err = db
        .map_files_to_dataset("dataset3", &["accession-404"])
        .unwrap_err();
    assert!(matches!(err, StoreError::ForeignKey(_)));
    assert!(!db.check_if_dataset_exists("dataset3").unwrap());
}

#[test]
fn dataset_lifecycle_status() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let file_id = db
        .register_file("/testuser/TestDatasetLifecycle.c4gh", "testuser")
        .unwrap();
    db.set_accession_id("DATASET:ACC-1", &file_id).unwrap();
    db.map_files_to_dataset("DATASET:TEST-0001", &["DATASET:ACC-1"])
        .unwrap();

    let d_id = "DATASET:TEST-0001";
    db.update_dataset_event(d_id, DatasetEvent::Registered, "{\"type\": \"mapping\"}")
        .unwrap();
    assert_eq!(db.get_dataset_status(d_id).unwrap(), "registered");

    db.update_dataset_event(d_id, DatasetEvent::Released, "{\"type\": \"release\"}")
        .unwrap();
    assert_eq!(db.get_dataset_status(d_id).unwrap(), "released");

    db.update_dataset_event(d_id, DatasetEvent::Deprecated, "{\"type\": \"deprecate\"}")
        .unwrap();
    assert_eq!(db.get_dataset_status(d_id).unwrap(), "deprecated");

    let err = db
        .update_dataset_event("unknown-dataset", DatasetEvent::Released, "{}")
        .unwrap_err();
    assert!(matches!(err, StoreError::ForeignKey(_)));
}

#[test]
fn get_file_serves_download_facts() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let file_id = db
        .register_file("/testuser/TestGetFile.c4gh", "testuser")
        .unwrap();
    db.store_header(b"HEADER".as_slice(), &file_id).unwrap();
    let corr_id = Uuid::new_v4().to_string();
    let info = archived_info(&file_id, 131_252);
    db.set_archived(&info, &file_id, &corr_id).unwrap();
    db.set_verified(&info, &file_id, &corr_id).unwrap();

    let download = db.get_file(&file_id).unwrap();
    assert_eq!(download.archive_path, file_id);
    assert_eq!(download.archive_size, 131_252);
    assert_eq!(download.decrypted_size, info.decrypted_size);
    assert_eq!(download.decrypted_checksum, info.decrypted_checksum);
    assert_eq!(download.header, b"HEADER");
}

#[test]
fn get_files_and_permission_for_dataset() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let mut file_ids = Vec::new();
    for i in 0..3 {
        let file_id = db
            .register_file(&format!("/testuser/TestGetFiles-00{i}.c4gh"), "testuser")
            .unwrap();
        let corr_id = Uuid::new_v4().to_string();
        let info = archived_info(&file_id.clone(), 2000 + i);
        db.set_archived(&info, &file_id, &corr_id).unwrap();
        db.set_verified(&info, &file_id, &corr_id).unwrap();
        db.set_accession_id(&format!("PERM:00{i}"), &file_id).unwrap();
        db.update_file_event_log(&file_id, FileEvent::Ready, &corr_id, "testuser", "{}", "{}")
            .unwrap();
        file_ids.push(file_id);
    }
    db.map_files_to_dataset("perm-dataset", &["PERM:000", "PERM:001", "PERM:002"])
        .unwrap();

    let files = db.get_files("perm-dataset").unwrap();
    assert_eq!(files.len(), 3);
    for f in &files {
        assert_eq!(f.dataset_id, "perm-dataset");
        assert_eq!(f.file_status, "ready");
        assert_eq!(f.decrypted_file_checksum_type, "sha256");
        assert!(f.display_file_name.starts_with("TestGetFiles-00"));
    }

    assert_eq!(db.check_file_permission(&file_ids[0]).unwrap(), "perm-dataset");
    let err = db.check_file_permission("not-a-file").unwrap_err();
    assert!(matches!(err, StoreError::NotFound));

    let err = db.get_files("unknown-dataset").unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[test]
fn key_hash_registry() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let key_hex = "cbd8f5cc8d936ce437a52cd7991453839581fc69ee26e0daefde6a5d2660fc23";
    db.add_key_hash(key_hex, "this is a test key").unwrap();
    db.add_key_hash(
        "cbd8f5cc8d936ce437a52cd7991453839581fc69ee26e0daefde6a5d2660fc99",
        "this is a another key",
    )
    .unwrap();

    let hashes = db.list_key_hashes().unwrap();
    assert_eq!(hashes.len(), 2);
    assert_eq!(hashes[0].hash, key_hex);
    assert_eq!(hashes[0].description, "this is a test key");
    assert!(hashes[0].deprecated_at.is_none());

    db.deprecate_key_hash(key_hex).unwrap();
    let hashes = db.list_key_hashes().unwrap();
    assert!(hashes[0].deprecated_at.is_some());

    // Unknown or already-deprecated hashes fail.
    let err = db.deprecate_key_hash("wr0n6h4sh").unwrap_err();
    assert!(matches!(err, StoreError::KeyHashDeprecation));
    let err = db.deprecate_key_hash(key_hex).unwrap_err();
    assert!(matches!(err, StoreError::KeyHashDeprecation));
}

#[test]
fn set_key_hash_requires_registered_hash() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let key_hex = "6af1407abc74656b8913a7d323c4bfd30bf7c8ca359f74ae35357acef29dc507";
    db.add_key_hash(key_hex, "this is a test key").unwrap();
    let file_id = db.register_file("/testuser/file1.c4gh", "testuser").unwrap();

    db.set_key_hash(key_hex, &file_id).unwrap();
    assert_eq!(db.get_key_hash(&file_id).unwrap().as_deref(), Some(key_hex));

    let unregistered = "6af1407abc74656b8913a7d323c4bfd30bf7c8ca359f74ae35357acef29dc502";
    let err = db.set_key_hash(unregistered, &file_id).unwrap_err();
    assert!(matches!(err, StoreError::ForeignKey(_)));
}

#[test]
fn get_user_files_projects_latest_status() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);
    let test_user = "GetFilesUser";

    for i in 0..5 {
        let file_id = db
            .register_file(&format!("/{test_user}/TestGetUserFiles-00{i}.c4gh"), test_user)
            .unwrap();
        db.update_file_event_log(&file_id, FileEvent::Uploaded, &file_id, test_user, "{}", "{}")
            .unwrap();
        db.update_file_event_log(&file_id, FileEvent::Ready, &file_id, test_user, "{}", "{}")
            .unwrap();
    }

    assert!(db.get_user_files("unknownuser").unwrap().is_empty());

    let filelist = db.get_user_files(test_user).unwrap();
    assert_eq!(filelist.len(), 5);
    for file in &filelist {
        assert_eq!(file.status, "ready");
        assert!(file.inbox_path.contains("TestGetUserFiles"));
    }
}

#[test]
fn get_corr_id_goes_empty_after_dataset_mapping() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let file_path = "/testuser/file10.c4gh";
    let user = "testuser";

    let file_id = db.register_file(file_path, user).unwrap();
    db.update_file_event_log(&file_id, FileEvent::Uploaded, &file_id, user, "{}", "{}")
        .unwrap();

    let corr_id = db.get_corr_id(user, file_path).unwrap();
    assert_eq!(corr_id, file_id);

    let info = archived_info(file_path, 1234);
    db.set_archived(&info, &file_id, &corr_id).unwrap();
    db.set_verified(&info, &file_id, &corr_id).unwrap();
    db.set_accession_id("TEST:get-corr-id", &file_id).unwrap();
    db.map_files_to_dataset("dataset-corr-id", &["TEST:get-corr-id"])
        .unwrap();

    let err = db.get_corr_id(user, file_path).unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[test]
fn list_active_users_skips_fully_mapped_users() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    for user in ["User-A", "User-B", "User-C", "User-D"] {
        for i in 0..5 {
            let file_path = format!("/{user}/TestGetUserFiles-00{i}.c4gh");
            let file_id = db.register_file(&file_path, user).unwrap();
            db.update_file_event_log(&file_id, FileEvent::Uploaded, &file_id, user, "{}", "{}")
                .unwrap();
            let corr_id = db.get_corr_id(user, &file_path).unwrap();
            assert_eq!(corr_id, file_id);
            let info = archived_info(&file_path, 1234);
            db.set_archived(&info, &file_id, &corr_id).unwrap();
            db.set_verified(&info, &file_id, &corr_id).unwrap();
            db.set_accession_id(&format!("accession_{user}_0{i}"), &file_id)
                .unwrap();
        }
    }

    db.map_files_to_dataset(
        "test-dataset-01",
        &["accession_User-A_00", "accession_User-A_01", "accession_User-A_02"],
    )
    .unwrap();
    db.map_files_to_dataset(
        "test-dataset-02",
        &[
            "accession_User-C_00",
            "accession_User-C_01",
            "accession_User-C_02",
            "accession_User-C_03",
            "accession_User-C_04",
        ],
    )
    .unwrap();

    let users = db.list_active_users().unwrap();
    assert_eq!(users, vec!["User-A", "User-B", "User-D"]);
}

#[test]
fn list_datasets_orders_by_registration() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    for i in 0..9 {
        let file_id = db
            .register_file(&format!("/User-Q/TestListDatasets-00{i}.c4gh"), "User-Q")
            .unwrap();
        db.set_accession_id(&format!("accession_User-Q_0{i}"), &file_id)
            .unwrap();
    }

    db.map_files_to_dataset(
        "test-get-dataset-01",
        &["accession_User-Q_00", "accession_User-Q_01", "accession_User-Q_02"],
    )
    .unwrap();
    db.update_dataset_event("test-get-dataset-01", DatasetEvent::Registered, "{}")
        .unwrap();
    db.update_dataset_event("test-get-dataset-01", DatasetEvent::Released, "{}")
        .unwrap();

    db.map_files_to_dataset(
        "test-get-dataset-02",
        &["accession_User-Q_03", "accession_User-Q_04", "accession_User-Q_05"],
    )
    .unwrap();
    db.update_dataset_event("test-get-dataset-02", DatasetEvent::Registered, "{}")
        .unwrap();

    db.map_files_to_dataset(
        "test-get-dataset-03",
        &["accession_User-Q_06", "accession_User-Q_07", "accession_User-Q_08"],
    )
    .unwrap();
    for event in [
        DatasetEvent::Registered,
        DatasetEvent::Released,
        DatasetEvent::Deprecated,
    ] {
        db.update_dataset_event("test-get-dataset-03", event, "{}").unwrap();
    }

    let datasets = db.list_datasets().unwrap();
    assert_eq!(datasets.len(), 3);
    assert_eq!(datasets[0].dataset_id, "test-get-dataset-01");
    assert_eq!(datasets[0].status, "released");
    assert_eq!(datasets[1].status, "registered");
    assert_eq!(datasets[2].status, "deprecated");
}

#[test]
fn list_user_datasets_hides_deprecated_and_foreign() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let user = "User-Q";
    for i in 0..6 {
        let file_id = db
            .register_file(&format!("/{user}/TestUserDatasets-00{i}.c4gh"), user)
            .unwrap();
        db.set_accession_id(&format!("accession_{user}_0{i}"), &file_id)
            .unwrap();
    }

    db.map_files_to_dataset(
        "test-user-dataset-01",
        &["accession_User-Q_00", "accession_User-Q_01", "accession_User-Q_02"],
    )
    .unwrap();
    db.update_dataset_event("test-user-dataset-01", DatasetEvent::Registered, "{}")
        .unwrap();
    db.update_dataset_event("test-user-dataset-01", DatasetEvent::Released, "{}")
        .unwrap();

    db.map_files_to_dataset(
        "test-user-dataset-02",
        &["accession_User-Q_03", "accession_User-Q_04", "accession_User-Q_05"],
    )
    .unwrap();
    db.update_dataset_event("test-user-dataset-02", DatasetEvent::Registered, "{}")
        .unwrap();

    // Another user's dataset, fully deprecated.
    let foreign = db.register_file("filePath", "user").unwrap();
    db.set_accession_id("stableID", &foreign).unwrap();
    db.map_files_to_dataset("test-wrong-user-dataset", &["stableID"])
        .unwrap();
    for event in [
        DatasetEvent::Registered,
        DatasetEvent::Released,
        DatasetEvent::Deprecated,
    ] {
        db.update_dataset_event("test-wrong-user-dataset", event, "{}")
            .unwrap();
    }

    let datasets = db.list_user_datasets(user).unwrap();
    assert_eq!(datasets.len(), 2);
    assert_eq!(datasets[0].dataset_id, "test-user-dataset-01");
}

#[test]
fn sync_and_path_projections_resolve_by_accession() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);

    let file_id = db
        .register_file("/testuser/TestGetSyncData.c4gh", "testuser")
        .unwrap();
    db.store_header(b"HEADER".as_slice(), &file_id).unwrap();
    let corr_id = Uuid::new_v4().to_string();
    let info = archived_info(&file_id.clone(), 1234);
    db.set_archived(&info, &file_id, &corr_id).unwrap();
    db.set_verified(&info, &file_id, &corr_id).unwrap();
    db.set_accession_id("TEST:000-1111-2222", &file_id).unwrap();

    let sync = db.get_sync_data("TEST:000-1111-2222").unwrap();
    assert_eq!(sync.user, "testuser");
    assert_eq!(sync.file_path, "/testuser/TestGetSyncData.c4gh");
    assert_eq!(sync.checksum, info.decrypted_checksum);

    assert_eq!(
        db.get_inbox_path("TEST:000-1111-2222").unwrap(),
        "/testuser/TestGetSyncData.c4gh"
    );
    assert_eq!(db.get_archive_path("TEST:000-1111-2222").unwrap(), file_id);
    assert_eq!(
        db.get_header_for_accession("TEST:000-1111-2222").unwrap(),
        b"HEADER"
    );
}

#[test]
fn reopening_preserves_rows_and_version() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.redb");
    let file_id;
    {
        let db = StateStore::open(&path).unwrap();
        file_id = db.register_file("/testuser/persist.c4gh", "testuser").unwrap();
        db.store_header(b"H".as_slice(), &file_id).unwrap();
    }
    let db = StateStore::open(&path).unwrap();
    assert_eq!(db.version().unwrap(), REQUIRED_SCHEMA_VERSION);
    assert_eq!(db.get_header(&file_id).unwrap(), b"H");
    assert_eq!(db.file_status(&file_id).unwrap().as_deref(), Some("registered"));
}
