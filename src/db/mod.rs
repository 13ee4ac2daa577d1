//! SQLite database module for CRM records
//!
//! ## Tables
//!
//! - `clients` - client records (root aggregate)
//! - `strategies` - strategy catalog (seeded, read-mostly)
//! - `client_strategies` - strategy assignments per client, optionally tied to a review
//! - `onboarding_tasks` / `client_onboarding` - onboarding checklist and per-client progress
//! - `quarterly_reviews` / `action_items` - review documents and their follow-ups
//! - `client_documents` - uploaded file metadata (bytes live in the blob store)
//! - `client_access_tokens` - hashed portal tokens

pub mod schema;
pub mod clients;
pub mod strategies;
pub mod onboarding;
pub mod reviews;
pub mod documents;
pub mod access_tokens;

use std::path::Path;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::CrmError;

/// SQLite database for the CRM
pub struct CrmDb {
    conn: Mutex<Connection>,
}

impl CrmDb {
    /// Open or create the CRM database
    pub fn open(storage_dir: &Path) -> Result<Self, CrmError> {
        std::fs::create_dir_all(storage_dir)?;
        let db_path = storage_dir.join("crm.db");
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)
            .map_err(|e| CrmError::db("Failed to open SQLite", e))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| CrmError::db("Failed to set PRAGMA", e))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, CrmError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| CrmError::db("Failed to open in-memory SQLite", e))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), CrmError> {
        self.with_conn_mut(|conn| {
            conn.execute_batch("PRAGMA foreign_keys=ON;")
                .map_err(|e| CrmError::db("Failed to enable foreign keys", e))?;
            schema::init_schema(conn)
        })
    }

    /// Run a read operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CrmError>
    where
        F: FnOnce(&Connection) -> Result<T, CrmError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| CrmError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access (for transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, CrmError>
    where
        F: FnOnce(&mut Connection) -> Result<T, CrmError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| CrmError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Row counts for the health endpoint
    pub fn stats(&self) -> Result<DbStats, CrmError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, CrmError> {
                let n: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                    .map_err(|e| CrmError::db("Query failed", e))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                client_count: count("clients")?,
                strategy_count: count("strategies")?,
                assignment_count: count("client_strategies")?,
                review_count: count("quarterly_reviews")?,
                document_count: count("client_documents")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub client_count: u64,
    pub strategy_count: u64,
    pub assignment_count: u64,
    pub review_count: u64,
    pub document_count: u64,
}

/// Current time as an RFC 3339 string with microsecond precision.
///
/// Stored timestamps sort lexically, which `ORDER BY created_at` relies on.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Fresh UUID v4 row id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// Re-exports
pub use clients::{ClientRow, CreateClientInput, UpdateClientInput, ClientQuery};
pub use strategies::{StrategyRow, ClientStrategyRow, AssignmentStatus, UpdateAssignmentInput};
pub use onboarding::{OnboardingTaskRow, ClientOnboardingRow, OnboardingStatus};
pub use reviews::{ReviewRow, ReviewStatus, ActionItemRow, ActionItemOwner};
pub use documents::ClientDocumentRow;
pub use access_tokens::AccessTokenRow;
