use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::db::{BinaryRecord, ContainerRecord, HardeningSummary, ImageRecord};
use crate::model::{BinaryArtifact, EvidenceKind, EvidenceRecord};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Error type for results database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The database was created with a newer schema version than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

/// Convenience result type for DB operations.
pub type DbResult<T> = Result<T, DbError>;

const BINARY_COLUMNS: &str = "id, name, subimage, container, path, timestamp, checksum, \
     unsafe_language, modified, error, multi_cfi, single_cfi, scs";

/// SQLite-backed results database.
///
/// Thin wrapper around `rusqlite::Connection` that opens the file, applies
/// migrations and exposes small query helpers keyed by artifact identity.
#[derive(Debug)]
pub struct ProjectDb {
    conn: Connection,
}

impl ProjectDb {
    /// Open (or create) a results database and ensure the schema exists.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory database, for tests and one-shot analyses.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> DbResult<i32> {
        current_schema_version(&self.conn)
    }

    /// Register a subimage; existing ids are left untouched.
    pub fn insert_image(&self, record: &ImageRecord) -> DbResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO images (id, version, name, image_type) VALUES (?1, ?2, ?3, ?4)",
            params![record.id, record.version, record.name, record.image_type],
        )?;
        Ok(())
    }

    pub fn list_images(&self) -> DbResult<Vec<ImageRecord>> {
        let mut stmt =
            self.conn.prepare("SELECT id, version, name, image_type FROM images ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(ImageRecord {
                id: row.get(0)?,
                version: row.get(1)?,
                name: row.get(2)?,
                image_type: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn insert_container(&self, record: &ContainerRecord) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT OR IGNORE INTO container_files (id, subimage, name, container_type, path)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![record.id, record.subimage, record.name, record.container_type, record.path],
        )?;
        Ok(())
    }

    pub fn list_containers(&self, subimage: &str) -> DbResult<Vec<ContainerRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, subimage, name, container_type, path
            FROM container_files
            WHERE subimage = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![subimage], |row| {
            Ok(ContainerRecord {
                id: row.get(0)?,
                subimage: row.get(1)?,
                name: row.get(2)?,
                container_type: row.get(3)?,
                path: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Insert a freshly analyzed binary together with its evidence.
    pub fn insert_binary(&self, artifact: &BinaryArtifact) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO binaries ({BINARY_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                artifact.id,
                artifact.name,
                artifact.subimage,
                artifact.container,
                artifact.path.to_string_lossy(),
                artifact.timestamp,
                artifact.checksum,
                artifact.unsafe_language,
                artifact.modified,
                artifact.error,
                artifact.multi_cfi(),
                artifact.single_cfi(),
                artifact.scs(),
            ],
        )?;
        write_evidence(&tx, &artifact.id, &artifact.evidence)?;
        tx.commit()?;
        Ok(())
    }

    /// Overwrite the analysis results of an existing binary. Returns false if
    /// no row has this identity.
    pub fn update_binary_results(&self, artifact: &BinaryArtifact) -> DbResult<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            r#"
            UPDATE binaries
            SET modified = ?1, error = ?2, multi_cfi = ?3, single_cfi = ?4, scs = ?5
            WHERE id = ?6
            "#,
            params![
                artifact.modified,
                artifact.error,
                artifact.multi_cfi(),
                artifact.single_cfi(),
                artifact.scs(),
                artifact.id,
            ],
        )?;
        if changed > 0 {
            tx.execute("DELETE FROM binary_evidence WHERE binary_id = ?1", params![artifact.id])?;
            write_evidence(&tx, &artifact.id, &artifact.evidence)?;
        }
        tx.commit()?;
        Ok(changed > 0)
    }

    pub fn binary_exists(&self, id: &str) -> DbResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM binaries WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn has_single_cfi(&self, id: &str) -> DbResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM binaries WHERE id = ?1 AND single_cfi = 1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_binary(&self, id: &str) -> DbResult<Option<BinaryRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {BINARY_COLUMNS} FROM binaries WHERE id = ?1"),
                params![id],
                binary_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// List binaries, optionally restricted to one subimage (ordered by id).
    pub fn list_binaries(&self, subimage: Option<&str>) -> DbResult<Vec<BinaryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BINARY_COLUMNS} FROM binaries \
             WHERE ?1 IS NULL OR subimage = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![subimage], binary_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn load_evidence(&self, id: &str) -> DbResult<Vec<EvidenceRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT address, kind, description
            FROM binary_evidence
            WHERE binary_id = ?1
            ORDER BY seq
            "#,
        )?;
        let rows = stmt.query_map(params![id], |row| {
            let address: i64 = row.get(0)?;
            let kind: String = row.get(1)?;
            Ok(EvidenceRecord {
                address: address as u64,
                kind: EvidenceKind::parse(&kind).unwrap_or(EvidenceKind::Marker),
                description: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Any binary in `subimage` whose path ends with `path_suffix`.
    pub fn exists_by_path_suffix(&self, subimage: &str, path_suffix: &str) -> DbResult<bool> {
        self.path_suffix_query(subimage, path_suffix, "")
    }

    pub fn has_multi_cfi_by_path_suffix(&self, subimage: &str, path_suffix: &str) -> DbResult<bool> {
        self.path_suffix_query(subimage, path_suffix, " AND multi_cfi = 1")
    }

    fn path_suffix_query(&self, subimage: &str, path_suffix: &str, extra: &str) -> DbResult<bool> {
        let sql = format!(
            "SELECT 1 FROM binaries WHERE subimage = ?1 AND substr(path, -length(?2)) = ?2{extra} LIMIT 1"
        );
        let found: Option<i64> = self
            .conn
            .query_row(&sql, params![subimage, path_suffix], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Mark a 32-bit library as cross-DSO hardened because its 64-bit twin is.
    pub fn mark_lib32(&self, subimage: &str, id: &str) -> DbResult<bool> {
        let changed = self.conn.execute(
            "UPDATE binaries SET multi_cfi = 1, error = 'Lib32' WHERE subimage = ?1 AND id = ?2",
            params![subimage, id],
        )?;
        Ok(changed > 0)
    }

    /// Counts for every subimage starting with `prefix`.
    pub fn hardening_summary(&self, prefix: &str) -> DbResult<HardeningSummary> {
        let (total, unsafe_count, single, multi, scs): (i64, i64, i64, i64, i64) =
            self.conn.query_row(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(unsafe_language), 0),
                    COALESCE(SUM(unsafe_language AND single_cfi), 0),
                    COALESCE(SUM(unsafe_language AND multi_cfi), 0),
                    COALESCE(SUM(unsafe_language AND scs), 0)
                FROM binaries
                WHERE substr(subimage, 1, length(?1)) = ?1
                "#,
                params![prefix],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?;
        Ok(HardeningSummary {
            prefix: prefix.to_string(),
            binaries_total: total as u64,
            binaries_unsafe: unsafe_count as u64,
            single_cfi: single as u64,
            multi_cfi: multi as u64,
            scs: scs as u64,
        })
    }
}

fn binary_from_row(row: &Row<'_>) -> rusqlite::Result<BinaryRecord> {
    Ok(BinaryRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        subimage: row.get(2)?,
        container: row.get(3)?,
        path: row.get(4)?,
        timestamp: row.get(5)?,
        checksum: row.get(6)?,
        unsafe_language: row.get(7)?,
        modified: row.get(8)?,
        error: row.get(9)?,
        multi_cfi: row.get(10)?,
        single_cfi: row.get(11)?,
        scs: row.get(12)?,
    })
}

fn write_evidence(conn: &Connection, id: &str, evidence: &[EvidenceRecord]) -> DbResult<()> {
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO binary_evidence (binary_id, seq, address, kind, description)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )?;
    for (seq, ev) in evidence.iter().enumerate() {
        stmt.execute(params![id, seq as i64, ev.address as i64, ev.kind.as_str(), ev.description])?;
    }
    Ok(())
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: images, container_files, binaries
/// - 2: binary_evidence
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let mut current_version = current_schema_version(conn)?;

    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS images (
                id         TEXT PRIMARY KEY,
                version    TEXT NOT NULL,
                name       TEXT NOT NULL,
                image_type TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS container_files (
                id             TEXT PRIMARY KEY,
                subimage       TEXT NOT NULL,
                name           TEXT NOT NULL,
                container_type TEXT NOT NULL,
                path           TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS binaries (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                subimage        TEXT NOT NULL,
                container       TEXT NOT NULL DEFAULT '',
                path            TEXT NOT NULL,
                timestamp       TEXT NOT NULL,
                checksum        TEXT NOT NULL,
                unsafe_language INTEGER NOT NULL DEFAULT 0,
                modified        INTEGER NOT NULL DEFAULT 0,
                error           TEXT NOT NULL DEFAULT '',
                multi_cfi       INTEGER NOT NULL DEFAULT 0,
                single_cfi      INTEGER NOT NULL DEFAULT 0,
                scs             INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS binaries_subimage ON binaries (subimage);

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
        current_version = 1;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS binary_evidence (
                binary_id   TEXT NOT NULL,
                seq         INTEGER NOT NULL,
                address     INTEGER NOT NULL,
                kind        TEXT NOT NULL,
                description TEXT NOT NULL,
                PRIMARY KEY(binary_id, seq)
            );
            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
