//! Client portal access tokens
//!
//! Only the sha256 of a token is persisted. Lookups hash the presented token
//! and match on the hash.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::CrmError;

#[derive(Debug, Clone, Serialize)]
pub struct AccessTokenRow {
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub client_id: String,
    pub roadmap_id: Option<String>,
    pub expires_at: String,
    pub last_accessed_at: Option<String>,
    pub created_at: String,
}

impl AccessTokenRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            token_hash: row.get("token_hash")?,
            client_id: row.get("client_id")?,
            roadmap_id: row.get("roadmap_id")?,
            expires_at: row.get("expires_at")?,
            last_accessed_at: row.get("last_accessed_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert_token(conn: &Connection, token: &AccessTokenRow) -> Result<(), CrmError> {
    conn.execute(
        r#"
        INSERT INTO client_access_tokens (
            token_hash, client_id, roadmap_id, expires_at, last_accessed_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![
            token.token_hash,
            token.client_id,
            token.roadmap_id,
            token.expires_at,
            token.last_accessed_at,
            token.created_at,
        ],
    ).map_err(|e| CrmError::db("Insert failed", e))?;
    Ok(())
}

pub fn get_by_hash(conn: &Connection, token_hash: &str) -> Result<Option<AccessTokenRow>, CrmError> {
    conn.query_row(
        "SELECT * FROM client_access_tokens WHERE token_hash = ?",
        params![token_hash],
        |row| AccessTokenRow::from_row(row),
    )
    .optional()
    .map_err(|e| CrmError::db("Query failed", e))
}

pub fn touch(conn: &Connection, token_hash: &str, now: &str) -> Result<bool, CrmError> {
    let updated = conn
        .execute(
            "UPDATE client_access_tokens SET last_accessed_at = ? WHERE token_hash = ?",
            params![now, token_hash],
        )
        .map_err(|e| CrmError::db("Update failed", e))?;
    Ok(updated > 0)
}

/// Tokens issued for a client, newest first
pub fn list_for_client(conn: &Connection, client_id: &str) -> Result<Vec<AccessTokenRow>, CrmError> {
    let mut stmt = conn
        .prepare("SELECT * FROM client_access_tokens WHERE client_id = ? ORDER BY created_at DESC")
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    let rows = stmt
        .query_map(params![client_id], |row| AccessTokenRow::from_row(row))
        .map_err(|e| CrmError::db("Query failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CrmError::db("Row parse failed", e))?;

    Ok(rows)
}

/// Expire every token of a client immediately
pub fn revoke_for_client(conn: &Connection, client_id: &str, now: &str) -> Result<usize, CrmError> {
    conn.execute(
        "UPDATE client_access_tokens SET expires_at = ? WHERE client_id = ? AND expires_at > ?",
        params![now, client_id, now],
    )
    .map_err(|e| CrmError::db("Update failed", e))
}
