use std::path::Path;

use cfi_audit_core::db::{
    ContainerRecord, DbError, ImageRecord, ProjectDb, CURRENT_SCHEMA_VERSION,
};
use cfi_audit_core::model::{BinaryArtifact, EvidenceKind};
use tempfile::tempdir;

fn artifact(path: &str, bytes: &[u8], subimage: &str) -> BinaryArtifact {
    BinaryArtifact::from_bytes(Path::new(path), bytes, subimage, "", "2024-05-01 12:00:00")
}

#[test]
fn results_db_initializes_and_reopens() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("results.db");

    let id = {
        let db = ProjectDb::open(&db_path).expect("open db");
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);

        let mut a = artifact("/img/system/bin/vold", b"vold", "a14/system");
        a.unsafe_language = true;
        a.mark_scs();
        a.add_evidence(0x40, EvidenceKind::Prologue, "0x40: str x30, [x18], #8");
        db.insert_binary(&a).expect("insert");
        a.id
    };

    let db = ProjectDb::open(&db_path).expect("re-open db");
    let version: i32 = db
        .connection()
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .expect("schema version");
    assert_eq!(version, CURRENT_SCHEMA_VERSION);

    assert!(db.binary_exists(&id).unwrap());
    let record = db.get_binary(&id).unwrap().expect("record");
    assert_eq!(record.name, "vold");
    assert_eq!(record.subimage, "a14/system");
    assert_eq!(record.path, "/img/system/bin/vold");
    assert_eq!(record.timestamp, "2024-05-01 12:00:00");
    assert!(record.unsafe_language);
    assert!(record.scs);
    assert!(!record.multi_cfi && !record.single_cfi);

    let evidence = db.load_evidence(&id).unwrap();
    assert_eq!(evidence.len(), 1);
    assert_eq!(evidence[0].kind, EvidenceKind::Prologue);
    assert_eq!(evidence[0].address, 0x40);
}

#[test]
fn newer_schema_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("future.db");
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch("PRAGMA user_version = 99;").unwrap();
    }
    match ProjectDb::open(&db_path) {
        Err(DbError::UnsupportedSchemaVersion { found, max_supported, .. }) => {
            assert_eq!(found, 99);
            assert_eq!(max_supported, CURRENT_SCHEMA_VERSION);
        }
        other => panic!("expected unsupported schema error, got {other:?}"),
    }
}

#[test]
fn version_one_database_gains_evidence_table() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("v1.db");
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE images (id TEXT PRIMARY KEY, version TEXT NOT NULL, name TEXT NOT NULL, image_type TEXT NOT NULL);
            CREATE TABLE container_files (id TEXT PRIMARY KEY, subimage TEXT NOT NULL, name TEXT NOT NULL, container_type TEXT NOT NULL, path TEXT NOT NULL);
            CREATE TABLE binaries (
                id TEXT PRIMARY KEY, name TEXT NOT NULL, subimage TEXT NOT NULL,
                container TEXT NOT NULL DEFAULT '', path TEXT NOT NULL, timestamp TEXT NOT NULL,
                checksum TEXT NOT NULL, unsafe_language INTEGER NOT NULL DEFAULT 0,
                modified INTEGER NOT NULL DEFAULT 0, error TEXT NOT NULL DEFAULT '',
                multi_cfi INTEGER NOT NULL DEFAULT 0, single_cfi INTEGER NOT NULL DEFAULT 0,
                scs INTEGER NOT NULL DEFAULT 0
            );
            PRAGMA user_version = 1;
            "#,
        )
        .unwrap();
    }
    let db = ProjectDb::open(&db_path).expect("migrate");
    assert_eq!(db.schema_version().unwrap(), 2);
    let a = artifact("/x/libc.so", b"libc", "v/system").with_flags(true, false, false);
    db.insert_binary(&a).expect("insert after migration");
    assert!(db.load_evidence(&a.id).unwrap().is_empty());
}

#[test]
fn update_replaces_results_and_evidence() {
    let db = ProjectDb::open_in_memory().unwrap();
    let mut a = artifact("/img/lib64/libgui.so", b"gui", "v/system");
    a.push_error("ERROR: Could not generate CFG because of timeout");
    db.insert_binary(&a).unwrap();
    assert!(!db.has_single_cfi(&a.id).unwrap());

    let mut fresh = artifact("/img/lib64/libgui.so", b"gui", "v/system");
    fresh.mark_single_cfi(true);
    fresh.add_evidence(0x10, EvidenceKind::BranchingNode, "0x10: cmp x8, 5");
    fresh.add_evidence(0x20, EvidenceKind::GuardBlock, "0x20: brk #0x1");
    assert!(db.update_binary_results(&fresh).unwrap());

    let record = db.get_binary(&a.id).unwrap().unwrap();
    assert!(record.single_cfi);
    assert!(record.modified);
    assert!(record.error.is_empty());
    assert!(db.has_single_cfi(&a.id).unwrap());
    let kinds: Vec<_> = db.load_evidence(&a.id).unwrap().into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EvidenceKind::BranchingNode, EvidenceKind::GuardBlock]);

    let unknown = artifact("/img/lib64/other.so", b"other", "v/system");
    assert!(!db.update_binary_results(&unknown).unwrap());
}

#[test]
fn duplicate_identity_is_a_sql_error() {
    let db = ProjectDb::open_in_memory().unwrap();
    let a = artifact("/img/bin/sh", b"sh", "v/system");
    db.insert_binary(&a).unwrap();
    assert!(matches!(db.insert_binary(&a), Err(DbError::Sql(_))));
}

#[test]
fn images_and_containers_are_registered_once() {
    let db = ProjectDb::open_in_memory().unwrap();
    let image = ImageRecord::new("android-14", "system");
    assert_eq!(image.id, "android-14/system");
    db.insert_image(&image).unwrap();
    db.insert_image(&image).unwrap();
    assert_eq!(db.list_images().unwrap(), vec![image.clone()]);

    let container =
        ContainerRecord::new(&image.id, "com.android.media.apex", "apex", "/system/apex/media.apex");
    db.insert_container(&container).unwrap();
    let listed = db.list_containers(&image.id).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "android-14/system/com.android.media.apex");
    assert!(db.list_containers("android-14/vendor").unwrap().is_empty());
}

#[test]
fn list_binaries_filters_by_subimage() {
    let db = ProjectDb::open_in_memory().unwrap();
    db.insert_binary(&artifact("/s/a", b"a", "v/system")).unwrap();
    db.insert_binary(&artifact("/s/b", b"b", "v/system")).unwrap();
    db.insert_binary(&artifact("/v/c", b"c", "v/vendor")).unwrap();
    assert_eq!(db.list_binaries(None).unwrap().len(), 3);
    assert_eq!(db.list_binaries(Some("v/system")).unwrap().len(), 2);
    assert_eq!(db.list_binaries(Some("v/product")).unwrap().len(), 0);
}

#[test]
fn hardening_summary_counts_unsafe_binaries_under_prefix() {
    let db = ProjectDb::open_in_memory().unwrap();
    let mut rows = vec![
        artifact("/s/a", b"a", "a14/system").with_flags(true, false, true),
        artifact("/s/b", b"b", "a14/system").with_flags(false, true, false),
        artifact("/v/c", b"c", "a14/vendor").with_flags(false, false, true),
        // Not memory-unsafe: counted in the total only.
        artifact("/v/d", b"d", "a14/vendor").with_flags(true, true, true),
        artifact("/o/e", b"e", "a13/system").with_flags(true, true, true),
    ];
    for a in rows.iter_mut().take(3) {
        a.unsafe_language = true;
    }
    rows[4].unsafe_language = true;
    for a in &rows {
        db.insert_binary(a).unwrap();
    }

    let summary = db.hardening_summary("a14").unwrap();
    assert_eq!(summary.prefix, "a14");
    assert_eq!(summary.binaries_total, 4);
    assert_eq!(summary.binaries_unsafe, 3);
    assert_eq!(summary.multi_cfi, 1);
    assert_eq!(summary.single_cfi, 1);
    assert_eq!(summary.scs, 2);

    let all = db.hardening_summary("").unwrap();
    assert_eq!(all.binaries_total, 5);
    assert_eq!(all.binaries_unsafe, 4);
}

#[test]
fn path_suffix_lookups_and_lib32_marking() {
    let db = ProjectDb::open_in_memory().unwrap();
    let lib64 = artifact("/img/system/lib64/libfoo.so", b"64", "v/system").with_flags(true, false, false);
    let lib32 = artifact("/img/system/lib/libfoo.so", b"32", "v/system");
    db.insert_binary(&lib64).unwrap();
    db.insert_binary(&lib32).unwrap();

    assert!(db.exists_by_path_suffix("v/system", "system/lib64/libfoo.so").unwrap());
    assert!(db.has_multi_cfi_by_path_suffix("v/system", "system/lib64/libfoo.so").unwrap());
    assert!(!db.has_multi_cfi_by_path_suffix("v/system", "system/lib/libfoo.so").unwrap());
    assert!(!db.exists_by_path_suffix("v/vendor", "system/lib64/libfoo.so").unwrap());

    assert!(db.mark_lib32("v/system", &lib32.id).unwrap());
    let record = db.get_binary(&lib32.id).unwrap().unwrap();
    assert!(record.multi_cfi);
    assert_eq!(record.error, "Lib32");
    assert!(!db.mark_lib32("v/vendor", &lib32.id).unwrap());
}

#[test]
fn sql_wildcards_in_paths_and_prefixes_match_literally() {
    let db = ProjectDb::open_in_memory().unwrap();
    let lookalike = artifact("/img/system/lib64/libXa.so", b"x", "v/system").with_flags(true, false, false);
    let percent = artifact("/img/system/lib64/lib%.so", b"p", "v/system").with_flags(true, false, false);
    db.insert_binary(&lookalike).unwrap();
    db.insert_binary(&percent).unwrap();

    assert!(!db.exists_by_path_suffix("v/system", "system/lib64/lib_a.so").unwrap());
    assert!(!db.has_multi_cfi_by_path_suffix("v/system", "system/lib64/lib_a.so").unwrap());
    assert!(!db.has_multi_cfi_by_path_suffix("v/system", "lib64/%").unwrap());
    assert!(db.has_multi_cfi_by_path_suffix("v/system", "lib64/lib%.so").unwrap());
    assert!(!db.exists_by_path_suffix("v/system", "/a/much/longer/img/system/lib64/libXa.so").unwrap());

    let mut vendor = artifact("/v/c", b"c", "a14/vendor");
    vendor.unsafe_language = true;
    db.insert_binary(&vendor).unwrap();
    assert_eq!(db.hardening_summary("a1_").unwrap().binaries_total, 0);
    assert_eq!(db.hardening_summary("%").unwrap().binaries_total, 0);
    assert_eq!(db.hardening_summary("a14/").unwrap().binaries_total, 1);
}
