//! Client document metadata

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::CrmError;

/// Uploaded document; bytes live in the blob store at `storage_path`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDocumentRow {
    pub id: String,
    pub client_id: String,
    /// `{client_id}/{uuid}-{file_name}`
    pub storage_path: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    /// `sha256-<hex>` of the stored bytes
    pub content_hash: String,
    /// "advisor" or "client"
    pub uploaded_by: String,
    pub created_at: String,
}

impl ClientDocumentRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            client_id: row.get("client_id")?,
            storage_path: row.get("storage_path")?,
            file_name: row.get("file_name")?,
            content_type: row.get("content_type")?,
            size_bytes: row.get("size_bytes")?,
            content_hash: row.get("content_hash")?,
            uploaded_by: row.get("uploaded_by")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert_document(conn: &Connection, doc: &ClientDocumentRow) -> Result<(), CrmError> {
    conn.execute(
        r#"
        INSERT INTO client_documents (
            id, client_id, storage_path, file_name, content_type,
            size_bytes, content_hash, uploaded_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            doc.id,
            doc.client_id,
            doc.storage_path,
            doc.file_name,
            doc.content_type,
            doc.size_bytes,
            doc.content_hash,
            doc.uploaded_by,
            doc.created_at,
        ],
    ).map_err(|e| CrmError::db("Insert failed", e))?;
    Ok(())
}

pub fn get_document_by_path(conn: &Connection, storage_path: &str) -> Result<Option<ClientDocumentRow>, CrmError> {
    conn.query_row(
        "SELECT * FROM client_documents WHERE storage_path = ?",
        params![storage_path],
        |row| ClientDocumentRow::from_row(row),
    )
    .optional()
    .map_err(|e| CrmError::db("Query failed", e))
}

/// Documents for a client, newest first
pub fn list_documents(conn: &Connection, client_id: &str) -> Result<Vec<ClientDocumentRow>, CrmError> {
    let mut stmt = conn
        .prepare("SELECT * FROM client_documents WHERE client_id = ? ORDER BY created_at DESC")
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    let rows = stmt
        .query_map(params![client_id], |row| ClientDocumentRow::from_row(row))
        .map_err(|e| CrmError::db("Query failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CrmError::db("Row parse failed", e))?;

    Ok(rows)
}
