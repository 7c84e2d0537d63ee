//! SQLite persistence: tenants, cases, artifacts, ingest tasks and the
//! dead-letter log.
//!
//! Workers open one short-lived [`IntakeDb`] per file attempt; WAL mode plus a
//! busy timeout lets those connections serialize their writes.

#![allow(missing_docs)]

pub mod dead_letter;
pub mod provision;
pub mod registrar;

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use crate::core::errors::{IntakeError, Result};

/// Milliseconds a connection waits on a locked database before failing.
pub const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Handle on the intake database.
pub struct IntakeDb {
    conn: Connection,
    path: PathBuf,
}

impl IntakeDb {
    /// Open an existing (or empty) database with per-connection pragmas.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| IntakeError::io(parent, err))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;"
        ))?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open the database, switch it to WAL and create any missing tables.
    pub fn initialize(path: &Path) -> Result<Self> {
        let db = Self::open(path)?;
        let mode: String = db
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            eprintln!("[INTAKE-SQLITE] WARNING: requested WAL mode but got '{mode}'");
        }
        apply_schema(&db.conn)?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .is_ok_and(|mode| mode.eq_ignore_ascii_case("wal"))
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tenant (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT
        );

        CREATE TABLE IF NOT EXISTS case_file (
            id TEXT PRIMARY KEY,
            tenant_id TEXT REFERENCES tenant(id) ON DELETE CASCADE,
            label TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS artifact (
            id TEXT PRIMARY KEY,
            tenant_id TEXT REFERENCES tenant(id) ON DELETE CASCADE,
            case_id TEXT NOT NULL REFERENCES case_file(id) ON DELETE CASCADE,
            drop_id TEXT,
            filename TEXT,
            src_path TEXT,
            s3_uri TEXT NOT NULL,
            mime_type TEXT,
            sha256 TEXT NOT NULL,
            size_bytes INTEGER,
            created_at TEXT NOT NULL,
            UNIQUE (case_id, sha256)
        );

        CREATE TABLE IF NOT EXISTS ingest_task (
            id TEXT PRIMARY KEY,
            artifact_id TEXT NOT NULL REFERENCES artifact(id) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending','running','success','failed','dlq')),
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dead_letter (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target TEXT,
            failed_activity TEXT,
            last_error TEXT,
            error_blob TEXT,
            failed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_case_file_tenant ON case_file(tenant_id);
        CREATE INDEX IF NOT EXISTS idx_artifact_case ON artifact(case_id);
        CREATE INDEX IF NOT EXISTS idx_ingest_task_status ON ingest_task(status);
        CREATE INDEX IF NOT EXISTS idx_dead_letter_failed_at ON dead_letter(failed_at);",
    )?;
    Ok(())
}
