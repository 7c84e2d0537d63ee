//! Operator provisioning of tenants and cases. The intake pipeline only reads
//! these tables.

#![allow(missing_docs)]

use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use super::{IntakeDb, new_id, now_rfc3339};
use crate::core::errors::{IntakeError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantRow {
    pub id: String,
    pub slug: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseRow {
    pub id: String,
    pub tenant_id: Option<String>,
    pub label: Option<String>,
}

impl IntakeDb {
    /// Create a tenant with a fresh id. Fails if the slug is taken.
    pub fn insert_tenant(&self, slug: &str, name: Option<&str>) -> Result<TenantRow> {
        if !is_valid_slug(slug) {
            return Err(IntakeError::InvalidConfig {
                details: format!("tenant slug {slug:?} must match [a-z0-9-]{{1,64}}"),
            });
        }
        let id = new_id();
        self.conn().execute(
            "INSERT INTO tenant (id, slug, name) VALUES (?1, ?2, ?3)",
            params![id, slug, name],
        )?;
        Ok(TenantRow {
            id,
            slug: slug.to_string(),
            name: name.map(str::to_string),
        })
    }

    /// Create a case, optionally owned by an existing tenant slug.
    pub fn insert_case(&self, tenant_slug: Option<&str>, label: Option<&str>) -> Result<CaseRow> {
        let tenant_id = match tenant_slug {
            Some(slug) => Some(self.tenant_id_by_slug(slug)?.ok_or_else(|| {
                IntakeError::InvalidConfig {
                    details: format!("unknown tenant slug {slug:?}"),
                }
            })?),
            None => None,
        };
        let id = new_id();
        self.conn().execute(
            "INSERT INTO case_file (id, tenant_id, label, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, tenant_id, label, now_rfc3339()],
        )?;
        Ok(CaseRow {
            id,
            tenant_id,
            label: label.map(str::to_string),
        })
    }

    /// Look up a case by id.
    pub fn case_by_id(&self, case_id: &str) -> Result<Option<CaseRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, tenant_id, label FROM case_file WHERE id = ?1",
                params![case_id],
                |row| {
                    Ok(CaseRow {
                        id: row.get(0)?,
                        tenant_id: row.get(1)?,
                        label: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

fn is_valid_slug(slug: &str) -> bool {
    (1..=64).contains(&slug.len())
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
