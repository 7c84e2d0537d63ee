//! Tenant/case authorization and transactional artifact registration.

#![allow(missing_docs)]

use rusqlite::{OptionalExtension, TransactionBehavior, params};
use serde::Serialize;

use super::{IntakeDb, new_id, now_rfc3339};
use crate::core::errors::{Result, StageError};

/// Artifact fields supplied by the worker.
#[derive(Debug, Clone)]
pub struct NewArtifact<'a> {
    pub tenant_id: &'a str,
    pub case_id: &'a str,
    pub drop_id: &'a str,
    pub filename: &'a str,
    pub src_path: &'a str,
    pub s3_uri: &'a str,
    pub sha256: &'a str,
    pub size_bytes: u64,
}

/// Result of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Created { artifact_id: String, task_id: String },
    /// Same content already registered for this case.
    Duplicate,
}

/// An artifact joined with its ingest task, for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRow {
    pub id: String,
    pub tenant_id: Option<String>,
    pub case_id: String,
    pub drop_id: Option<String>,
    pub filename: Option<String>,
    pub src_path: Option<String>,
    pub s3_uri: String,
    pub sha256: String,
    pub size_bytes: Option<i64>,
    pub task_status: Option<String>,
}

impl IntakeDb {
    pub fn tenant_id_by_slug(&self, slug: &str) -> Result<Option<String>> {
        let id = self
            .conn()
            .query_row(
                "SELECT id FROM tenant WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Whether `case_id` exists and is owned by `tenant_id` or by no tenant.
    pub fn case_visible_to(&self, case_id: &str, tenant_id: &str) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM case_file
                 WHERE id = ?1 AND (tenant_id = ?2 OR tenant_id IS NULL)",
                params![case_id, tenant_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Resolve the tenant and confirm the case belongs to it. Returns the tenant id.
    pub fn authorize(&self, slug: &str, case_id: &str) -> std::result::Result<String, StageError> {
        let tenant_id =
            self.tenant_id_by_slug(slug)?
                .ok_or_else(|| StageError::TenantNotFound {
                    slug: slug.to_string(),
                })?;
        if !self.case_visible_to(case_id, &tenant_id)? {
            return Err(StageError::CaseTenantMismatch {
                case_id: case_id.to_string(),
                slug: slug.to_string(),
            });
        }
        Ok(tenant_id)
    }

    /// Insert the artifact and its pending task in one transaction.
    ///
    /// A conflict on `(case_id, sha256)` is reported as [`Registration::Duplicate`]
    /// and writes nothing.
    pub fn register_artifact(&mut self, artifact: &NewArtifact<'_>) -> Result<Registration> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_rfc3339();
        let artifact_id = new_id();

        let size = i64::try_from(artifact.size_bytes).unwrap_or(i64::MAX);
        let inserted = tx.execute(
            "INSERT INTO artifact (
                id, tenant_id, case_id, drop_id, filename, src_path,
                s3_uri, sha256, size_bytes, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
            ON CONFLICT (case_id, sha256) DO NOTHING",
            params![
                artifact_id,
                artifact.tenant_id,
                artifact.case_id,
                artifact.drop_id,
                artifact.filename,
                artifact.src_path,
                artifact.s3_uri,
                artifact.sha256,
                size,
                now,
            ],
        )?;
        if inserted == 0 {
            tx.commit()?;
            return Ok(Registration::Duplicate);
        }

        let task_id = new_id();
        tx.execute(
            "INSERT INTO ingest_task (id, artifact_id, status, created_at, updated_at)
             VALUES (?1, ?2, 'pending', ?3, ?3)",
            params![task_id, artifact_id, now],
        )?;
        tx.commit()?;

        Ok(Registration::Created {
            artifact_id,
            task_id,
        })
    }

    /// Artifacts registered for `case_id`, oldest first.
    pub fn artifacts_for_case(&self, case_id: &str) -> Result<Vec<ArtifactRow>> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT a.id, a.tenant_id, a.case_id, a.drop_id, a.filename, a.src_path,
                    a.s3_uri, a.sha256, a.size_bytes, t.status
             FROM artifact a LEFT JOIN ingest_task t ON t.artifact_id = a.id
             WHERE a.case_id = ?1
             ORDER BY a.created_at, a.id",
        )?;
        let rows = stmt
            .query_map(params![case_id], |row| {
                Ok(ArtifactRow {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    case_id: row.get(2)?,
                    drop_id: row.get(3)?,
                    filename: row.get(4)?,
                    src_path: row.get(5)?,
                    s3_uri: row.get(6)?,
                    sha256: row.get(7)?,
                    size_bytes: row.get(8)?,
                    task_status: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn artifact_count(&self) -> Result<u64> {
        count(self, "SELECT COUNT(*) FROM artifact")
    }

    pub fn ingest_task_count(&self) -> Result<u64> {
        count(self, "SELECT COUNT(*) FROM ingest_task")
    }
}

fn count(db: &IntakeDb, sql: &str) -> Result<u64> {
    let n: i64 = db.conn().query_row(sql, [], |row| row.get(0))?;
    Ok(u64::try_from(n).unwrap_or(0))
}
