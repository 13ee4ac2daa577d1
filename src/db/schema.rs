//! Database schema definitions and catalog seeding

use rusqlite::{params, Connection};
use tracing::info;

use crate::catalog::{ONBOARDING_TASKS, STRATEGIES};
use crate::error::CrmError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema and seed reference data
pub fn init_schema(conn: &Connection) -> Result<(), CrmError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        conn.execute_batch(CRM_SCHEMA)
            .map_err(|e| CrmError::db("Failed to create tables", e))?;
        conn.execute_batch(INDEXES_SCHEMA)
            .map_err(|e| CrmError::db("Failed to create indexes", e))?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    seed_catalog(conn)
}

fn get_schema_version(conn: &Connection) -> Result<i32, CrmError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| CrmError::db("Failed to create schema_version table", e))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), CrmError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| CrmError::db("Failed to clear schema_version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| CrmError::db("Failed to set schema_version", e))?;
    Ok(())
}

/// Insert catalog rows that are missing. Existing rows are left untouched so
/// edits made through the import tooling survive restarts.
fn seed_catalog(conn: &Connection) -> Result<(), CrmError> {
    let mut inserted = 0;

    for strategy in STRATEGIES {
        inserted += conn.execute(
            r#"
            INSERT OR IGNORE INTO strategies (
                id, name, phase, irc_citation, description,
                typical_savings_low, typical_savings_high
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                strategy.id,
                strategy.name,
                strategy.phase,
                strategy.irc_citation,
                strategy.description,
                strategy.typical_savings_low,
                strategy.typical_savings_high,
            ],
        ).map_err(|e| CrmError::db("Strategy seed failed", e))?;
    }

    for task in ONBOARDING_TASKS {
        inserted += conn.execute(
            r#"
            INSERT OR IGNORE INTO onboarding_tasks (
                id, phase, task_name, owner, default_deadline_days, sort_order
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                task.id,
                task.phase,
                task.task_name,
                task.owner,
                task.default_deadline_days,
                task.sort_order,
            ],
        ).map_err(|e| CrmError::db("Onboarding task seed failed", e))?;
    }

    if inserted > 0 {
        info!(rows = inserted, "Seeded catalog reference data");
    }

    Ok(())
}

const CRM_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL DEFAULT 'S Corp',
    package_tier TEXT NOT NULL DEFAULT 'Essentials',
    tax_rate REAL NOT NULL DEFAULT 0.0,
    industry TEXT,
    advisor_email TEXT,
    next_review_date TEXT,
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Strategy catalog (shared reference data)
CREATE TABLE IF NOT EXISTS strategies (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    phase INTEGER NOT NULL,
    irc_citation TEXT NOT NULL,
    description TEXT NOT NULL,
    typical_savings_low REAL NOT NULL DEFAULT 0,
    typical_savings_high REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS quarterly_reviews (
    id TEXT PRIMARY KEY NOT NULL,
    client_id TEXT NOT NULL,
    quarter TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'scheduled',

    -- Goals
    revenue_goal REAL,
    profit_goal REAL,
    owner_draw_goal REAL,
    employee_goal INTEGER,

    -- Profit-First targets (percent of real revenue)
    profit_target_pct REAL,
    owner_pay_target_pct REAL,
    tax_target_pct REAL,
    opex_target_pct REAL,

    tax_rate_override REAL,
    advisor_name TEXT,
    hurdle_1 TEXT,
    hurdle_2 TEXT,
    hurdle_3 TEXT,

    -- Year-to-date actuals
    ytd_revenue REAL,
    ytd_profit REAL,
    ytd_owner_draw REAL,

    client_signature INTEGER NOT NULL DEFAULT 0,
    advisor_signature INTEGER NOT NULL DEFAULT 0,
    meeting_date TEXT,
    meeting_time TEXT,
    next_meeting_date TEXT,
    next_meeting_time TEXT,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE
);

-- Strategy assignments; review_id marks the snapshot a review owns
CREATE TABLE IF NOT EXISTS client_strategies (
    id TEXT PRIMARY KEY NOT NULL,
    client_id TEXT NOT NULL,
    strategy_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'not_started',
    deduction_amount REAL NOT NULL DEFAULT 0,
    tax_savings REAL NOT NULL DEFAULT 0,
    notes TEXT,
    review_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE,
    FOREIGN KEY (strategy_id) REFERENCES strategies(id),
    FOREIGN KEY (review_id) REFERENCES quarterly_reviews(id)
);

CREATE TABLE IF NOT EXISTS onboarding_tasks (
    id INTEGER PRIMARY KEY NOT NULL,
    phase TEXT NOT NULL,
    task_name TEXT NOT NULL,
    owner TEXT NOT NULL,
    default_deadline_days INTEGER NOT NULL DEFAULT 0,
    sort_order INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS client_onboarding (
    id TEXT PRIMARY KEY NOT NULL,
    client_id TEXT NOT NULL,
    task_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    completed_date TEXT,
    due_date TEXT,
    notes TEXT,
    FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE,
    FOREIGN KEY (task_id) REFERENCES onboarding_tasks(id)
);

CREATE TABLE IF NOT EXISTS action_items (
    id TEXT PRIMARY KEY NOT NULL,
    review_id TEXT NOT NULL,
    owner TEXT NOT NULL DEFAULT 'advisor',
    description TEXT NOT NULL,
    due_date TEXT,
    completed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (review_id) REFERENCES quarterly_reviews(id)
);

-- Uploaded files; bytes live in the blob store under storage_path
CREATE TABLE IF NOT EXISTS client_documents (
    id TEXT PRIMARY KEY NOT NULL,
    client_id TEXT NOT NULL,
    storage_path TEXT NOT NULL UNIQUE,
    file_name TEXT NOT NULL,
    content_type TEXT,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT NOT NULL DEFAULT '',
    uploaded_by TEXT NOT NULL DEFAULT 'advisor',
    created_at TEXT NOT NULL,
    FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE
);

-- Portal tokens; only the sha256 of the token is stored
CREATE TABLE IF NOT EXISTS client_access_tokens (
    token_hash TEXT PRIMARY KEY NOT NULL,
    client_id TEXT NOT NULL,
    roadmap_id TEXT,
    expires_at TEXT NOT NULL,
    last_accessed_at TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_clients_tier ON clients(package_tier);
CREATE INDEX IF NOT EXISTS idx_client_strategies_client ON client_strategies(client_id);
CREATE INDEX IF NOT EXISTS idx_client_strategies_review ON client_strategies(review_id);
CREATE INDEX IF NOT EXISTS idx_client_onboarding_client ON client_onboarding(client_id);
CREATE INDEX IF NOT EXISTS idx_reviews_client ON quarterly_reviews(client_id, created_at);
CREATE INDEX IF NOT EXISTS idx_action_items_review ON action_items(review_id);
CREATE INDEX IF NOT EXISTS idx_documents_client ON client_documents(client_id);
CREATE INDEX IF NOT EXISTS idx_access_tokens_client ON client_access_tokens(client_id);
"#;
