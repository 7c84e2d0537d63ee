//! Append-only dead-letter log.

#![allow(missing_docs)]

use rusqlite::params;
use serde::Serialize;

use super::{IntakeDb, now_rfc3339};
use crate::core::errors::{DeadLetterReason, Result, StageError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetterRow {
    pub id: i64,
    pub target: String,
    pub failed_activity: String,
    pub last_error: Option<String>,
    pub error_blob: Option<serde_json::Value>,
    pub failed_at: String,
}

impl IntakeDb {
    /// Append one row. Autocommitted outside any open transaction.
    pub fn write_dead_letter(
        &self,
        target: &str,
        reason: DeadLetterReason,
        last_error: Option<&str>,
        context: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let blob = context.map(serde_json::to_string).transpose()?;
        self.conn().execute(
            "INSERT INTO dead_letter (target, failed_activity, last_error, error_blob, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![target, reason.as_str(), last_error, blob, now_rfc3339()],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Record a stage failure with its reason code and structured context.
    pub fn dead_letter_stage(&self, target: &str, err: &StageError) -> Result<i64> {
        self.write_dead_letter(
            target,
            err.reason(),
            Some(&err.to_string()),
            Some(&err.context()),
        )
    }

    /// Newest rows first, optionally only those with `reason`.
    pub fn recent_dead_letters(
        &self,
        limit: u32,
        reason: Option<DeadLetterReason>,
    ) -> Result<Vec<DeadLetterRow>> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT id, target, failed_activity, last_error, error_blob, failed_at
             FROM dead_letter
             WHERE ?2 IS NULL OR failed_activity = ?2
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit, reason.map(DeadLetterReason::as_str)], |row| {
                let blob: Option<String> = row.get(4)?;
                Ok(DeadLetterRow {
                    id: row.get(0)?,
                    target: row.get(1)?,
                    failed_activity: row.get(2)?,
                    last_error: row.get(3)?,
                    error_blob: blob.and_then(|b| serde_json::from_str(&b).ok()),
                    failed_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn dead_letter_count(&self, reason: Option<DeadLetterReason>) -> Result<u64> {
        let n: i64 = match reason {
            Some(r) => self.conn().query_row(
                "SELECT COUNT(*) FROM dead_letter WHERE failed_activity = ?1",
                params![r.as_str()],
                |row| row.get(0),
            )?,
            None => self
                .conn()
                .query_row("SELECT COUNT(*) FROM dead_letter", [], |row| row.get(0))?,
        };
        Ok(u64::try_from(n).unwrap_or(0))
    }
}
