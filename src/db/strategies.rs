//! Strategy catalog and client strategy assignments

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::clients::clamp_tax_rate;
use crate::error::CrmError;

// ============================================================================
// Types
// ============================================================================

/// Catalog strategy row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRow {
    pub id: u32,
    pub name: String,
    pub phase: u32,
    pub irc_citation: String,
    pub description: String,
    pub typical_savings_low: f64,
    pub typical_savings_high: f64,
}

impl StrategyRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            phase: row.get("phase")?,
            irc_citation: row.get("irc_citation")?,
            description: row.get("description")?,
            typical_savings_low: row.get("typical_savings_low")?,
            typical_savings_high: row.get("typical_savings_high")?,
        })
    }
}

/// Progress of a strategy for one client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    NotStarted,
    InProgress,
    Complete,
    Considering,
    Active,
}

impl AssignmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::NotStarted => "not_started",
            AssignmentStatus::InProgress => "in_progress",
            AssignmentStatus::Complete => "complete",
            AssignmentStatus::Considering => "considering",
            AssignmentStatus::Active => "active",
        }
    }

    pub fn from_db_value(raw: &str) -> Option<Self> {
        match raw {
            "not_started" => Some(AssignmentStatus::NotStarted),
            "in_progress" => Some(AssignmentStatus::InProgress),
            "complete" => Some(AssignmentStatus::Complete),
            "considering" => Some(AssignmentStatus::Considering),
            "active" => Some(AssignmentStatus::Active),
            _ => None,
        }
    }

    /// Closed assignments are not carried into the next review's snapshot
    pub fn is_closed(self) -> bool {
        matches!(self, AssignmentStatus::Complete)
    }
}

/// Strategy assignment row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStrategyRow {
    pub id: String,
    pub client_id: String,
    pub strategy_id: u32,
    pub status: AssignmentStatus,
    pub deduction_amount: f64,
    /// Cached round(deduction_amount x client tax rate)
    pub tax_savings: f64,
    pub notes: Option<String>,
    pub review_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ClientStrategyRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let raw_status: String = row.get("status")?;
        let status = AssignmentStatus::from_db_value(&raw_status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("invalid assignment status '{}'", raw_status).into(),
            )
        })?;

        Ok(Self {
            id: row.get("id")?,
            client_id: row.get("client_id")?,
            strategy_id: row.get("strategy_id")?,
            status,
            deduction_amount: row.get("deduction_amount")?,
            tax_savings: row.get("tax_savings")?,
            notes: row.get("notes")?,
            review_id: row.get("review_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Values for a new assignment row
#[derive(Debug, Clone)]
pub struct NewAssignment<'a> {
    pub client_id: &'a str,
    pub strategy_id: u32,
    pub status: AssignmentStatus,
    pub deduction_amount: f64,
    pub tax_savings: f64,
    pub notes: Option<&'a str>,
    pub review_id: Option<&'a str>,
}

/// Partial update for an assignment. tax_savings is not accepted; it is derived.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAssignmentInput {
    pub status: Option<AssignmentStatus>,
    pub deduction_amount: Option<f64>,
    pub notes: Option<String>,
}

/// Tax savings for a deduction at a client's rate, rounded to whole dollars
pub fn tax_savings(deduction_amount: f64, tax_rate: f64) -> f64 {
    (deduction_amount * clamp_tax_rate(tax_rate)).round()
}

// ============================================================================
// Catalog
// ============================================================================

pub fn get_strategy(conn: &Connection, id: u32) -> Result<Option<StrategyRow>, CrmError> {
    conn.query_row("SELECT * FROM strategies WHERE id = ?", params![id], |row| StrategyRow::from_row(row))
        .optional()
        .map_err(|e| CrmError::db("Query failed", e))
}

/// List catalog strategies, optionally limited to one phase or an ID ceiling
pub fn list_strategies(
    conn: &Connection,
    phase: Option<u32>,
    max_id: Option<u32>,
) -> Result<Vec<StrategyRow>, CrmError> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT * FROM strategies
            WHERE (?1 IS NULL OR phase = ?1)
              AND (?2 IS NULL OR id <= ?2)
            ORDER BY id ASC
            "#,
        )
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    let rows = stmt
        .query_map(params![phase, max_id], |row| StrategyRow::from_row(row))
        .map_err(|e| CrmError::db("Query failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CrmError::db("Row parse failed", e))?;

    Ok(rows)
}

/// Catalog IDs in [1, max_id]
pub fn strategy_ids_up_to(conn: &Connection, max_id: u32) -> Result<Vec<u32>, CrmError> {
    let mut stmt = conn
        .prepare("SELECT id FROM strategies WHERE id >= 1 AND id <= ? ORDER BY id ASC")
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    let ids = stmt
        .query_map(params![max_id], |row| row.get(0))
        .map_err(|e| CrmError::db("Query failed", e))?
        .collect::<Result<Vec<u32>, _>>()
        .map_err(|e| CrmError::db("Row parse failed", e))?;

    Ok(ids)
}

pub fn insert_strategy(conn: &Connection, strategy: &StrategyRow) -> Result<(), CrmError> {
    conn.execute(
        r#"
        INSERT INTO strategies (
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
    ).map_err(|e| CrmError::db("Insert failed", e))?;
    Ok(())
}

/// Overwrite every mutable column of a catalog row
pub fn replace_strategy(conn: &Connection, strategy: &StrategyRow) -> Result<bool, CrmError> {
    let updated = conn.execute(
        r#"
        UPDATE strategies SET
            name = ?, phase = ?, irc_citation = ?, description = ?,
            typical_savings_low = ?, typical_savings_high = ?
        WHERE id = ?
        "#,
        params![
            strategy.name,
            strategy.phase,
            strategy.irc_citation,
            strategy.description,
            strategy.typical_savings_low,
            strategy.typical_savings_high,
            strategy.id,
        ],
    ).map_err(|e| CrmError::db("Update failed", e))?;
    Ok(updated > 0)
}

// ============================================================================
// Assignments
// ============================================================================

pub fn get_client_strategy(conn: &Connection, id: &str) -> Result<Option<ClientStrategyRow>, CrmError> {
    conn.query_row("SELECT * FROM client_strategies WHERE id = ?", params![id], |row| ClientStrategyRow::from_row(row))
        .optional()
        .map_err(|e| CrmError::db("Query failed", e))
}

fn query_assignments(
    conn: &Connection,
    sql: &str,
    key: &str,
) -> Result<Vec<ClientStrategyRow>, CrmError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    let rows = stmt
        .query_map(params![key], |row| ClientStrategyRow::from_row(row))
        .map_err(|e| CrmError::db("Query failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CrmError::db("Row parse failed", e))?;

    Ok(rows)
}

/// All assignments for a client, across every review snapshot
pub fn list_client_strategies(conn: &Connection, client_id: &str) -> Result<Vec<ClientStrategyRow>, CrmError> {
    query_assignments(
        conn,
        "SELECT * FROM client_strategies WHERE client_id = ? ORDER BY strategy_id ASC, created_at ASC",
        client_id,
    )
}

/// One row per catalog strategy: the client's live row (no review) when it
/// has one, otherwise the newest review snapshot of that strategy
pub fn list_current_client_strategies(conn: &Connection, client_id: &str) -> Result<Vec<ClientStrategyRow>, CrmError> {
    Ok(current_assignments(list_client_strategies(conn, client_id)?))
}

/// Collapse rows ordered by (strategy_id, created_at) to one per strategy.
/// Of several live rows the earliest wins; rows unlinked from a deleted
/// review never shadow the provisioned one.
pub fn current_assignments(rows: Vec<ClientStrategyRow>) -> Vec<ClientStrategyRow> {
    let mut current: Vec<ClientStrategyRow> = Vec::new();
    for row in rows {
        match current.last_mut() {
            Some(kept) if kept.strategy_id == row.strategy_id => {
                // Input is oldest first, so a later snapshot is newer
                if kept.review_id.is_some() {
                    *kept = row;
                }
            }
            _ => current.push(row),
        }
    }
    current
}

/// Assignment snapshot owned by a review
pub fn list_review_strategies(conn: &Connection, review_id: &str) -> Result<Vec<ClientStrategyRow>, CrmError> {
    query_assignments(
        conn,
        "SELECT * FROM client_strategies WHERE review_id = ? ORDER BY strategy_id ASC",
        review_id,
    )
}

pub fn count_client_strategies(conn: &Connection, client_id: &str) -> Result<u64, CrmError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM client_strategies WHERE client_id = ?",
            params![client_id],
            |row| row.get(0),
        )
        .map_err(|e| CrmError::db("Query failed", e))?;
    Ok(count as u64)
}

pub fn count_review_strategies(conn: &Connection, review_id: &str) -> Result<u64, CrmError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM client_strategies WHERE review_id = ?",
            params![review_id],
            |row| row.get(0),
        )
        .map_err(|e| CrmError::db("Query failed", e))?;
    Ok(count as u64)
}

/// Distinct catalog IDs already assigned to a client
pub fn assigned_strategy_ids(conn: &Connection, client_id: &str) -> Result<HashSet<u32>, CrmError> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT strategy_id FROM client_strategies WHERE client_id = ?")
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    let ids = stmt
        .query_map(params![client_id], |row| row.get(0))
        .map_err(|e| CrmError::db("Query failed", e))?
        .collect::<Result<HashSet<u32>, _>>()
        .map_err(|e| CrmError::db("Row parse failed", e))?;

    Ok(ids)
}

/// Insert one assignment row, returning its id
pub fn insert_assignment(conn: &Connection, new: &NewAssignment<'_>, now: &str) -> Result<String, CrmError> {
    let id = super::new_id();
    conn.execute(
        r#"
        INSERT INTO client_strategies (
            id, client_id, strategy_id, status, deduction_amount,
            tax_savings, notes, review_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            id,
            new.client_id,
            new.strategy_id,
            new.status.as_str(),
            new.deduction_amount,
            new.tax_savings,
            new.notes,
            new.review_id,
            now,
            now,
        ],
    ).map_err(|e| CrmError::db("Insert failed", e))?;
    Ok(id)
}

/// Insert fresh not_started rows for each catalog ID
pub fn insert_not_started(
    conn: &Connection,
    client_id: &str,
    strategy_ids: &[u32],
    now: &str,
) -> Result<usize, CrmError> {
    for &strategy_id in strategy_ids {
        insert_assignment(
            conn,
            &NewAssignment {
                client_id,
                strategy_id,
                status: AssignmentStatus::NotStarted,
                deduction_amount: 0.0,
                tax_savings: 0.0,
                notes: None,
                review_id: None,
            },
            now,
        )?;
    }
    Ok(strategy_ids.len())
}

/// Write status, deduction, notes and the recomputed savings of one assignment
pub fn save_assignment(conn: &Connection, row: &ClientStrategyRow, now: &str) -> Result<bool, CrmError> {
    let updated = conn.execute(
        r#"
        UPDATE client_strategies
        SET status = ?, deduction_amount = ?, tax_savings = ?, notes = ?, updated_at = ?
        WHERE id = ?
        "#,
        params![
            row.status.as_str(),
            row.deduction_amount,
            row.tax_savings,
            row.notes,
            now,
            row.id,
        ],
    ).map_err(|e| CrmError::db("Update failed", e))?;
    Ok(updated > 0)
}

/// Recompute tax_savings on every assignment of a client at a new rate
pub fn recompute_client_savings(conn: &Connection, client_id: &str, tax_rate: f64, now: &str) -> Result<usize, CrmError> {
    let rows = list_client_strategies(conn, client_id)?;
    let mut stmt = conn
        .prepare("UPDATE client_strategies SET tax_savings = ?, updated_at = ? WHERE id = ?")
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    for row in &rows {
        stmt.execute(params![tax_savings(row.deduction_amount, tax_rate), now, row.id])
            .map_err(|e| CrmError::db("Update failed", e))?;
    }

    Ok(rows.len())
}

/// Detach every assignment from a review, keeping the rows on the client
pub fn unlink_review(conn: &Connection, review_id: &str) -> Result<usize, CrmError> {
    conn.execute(
        "UPDATE client_strategies SET review_id = NULL WHERE review_id = ?",
        params![review_id],
    ).map_err(|e| CrmError::db("Update failed", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_savings_rounds() {
        assert_eq!(tax_savings(20_000.0, 0.32), 6_400.0);
        assert_eq!(tax_savings(1_001.0, 0.5), 501.0);
        assert_eq!(tax_savings(10_000.0, 0.9), 5_000.0);
        assert_eq!(tax_savings(0.0, 0.32), 0.0);
    }

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            AssignmentStatus::NotStarted,
            AssignmentStatus::InProgress,
            AssignmentStatus::Complete,
            AssignmentStatus::Considering,
            AssignmentStatus::Active,
        ] {
            assert_eq!(AssignmentStatus::from_db_value(status.as_str()), Some(status));
        }
        assert!(AssignmentStatus::Complete.is_closed());
        assert!(!AssignmentStatus::Active.is_closed());
    }

    fn assignment(id: &str, strategy_id: u32, review_id: Option<&str>, created_at: &str) -> ClientStrategyRow {
        ClientStrategyRow {
            id: id.into(),
            client_id: "c-1".into(),
            strategy_id,
            status: AssignmentStatus::NotStarted,
            deduction_amount: 0.0,
            tax_savings: 0.0,
            notes: None,
            review_id: review_id.map(String::from),
            created_at: created_at.into(),
            updated_at: created_at.into(),
        }
    }

    #[test]
    fn test_current_assignments_prefers_live_then_newest_snapshot() {
        let rows = vec![
            assignment("live-1", 1, None, "2026-01-01"),
            assignment("r1-1", 1, Some("r1"), "2026-02-01"),
            assignment("r2-1", 1, Some("r2"), "2026-05-01"),
            assignment("unlinked-1", 1, None, "2026-06-01"),
            assignment("r1-40", 40, Some("r1"), "2026-02-01"),
            assignment("r2-40", 40, Some("r2"), "2026-05-01"),
        ];
        let ids: Vec<String> = current_assignments(rows).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["live-1", "r2-40"]);
    }

    #[test]
    fn test_catalog_is_seeded() {
        let db = crate::db::CrmDb::open_in_memory().unwrap();
        let all = db.with_conn(|conn| list_strategies(conn, None, None)).unwrap();
        assert_eq!(all.len(), 70);

        let phase_two = db.with_conn(|conn| list_strategies(conn, Some(2), None)).unwrap();
        assert!(phase_two.iter().all(|s| s.phase == 2));
        assert_eq!(phase_two.first().map(|s| s.id), Some(7));

        let ids = db.with_conn(|conn| strategy_ids_up_to(conn, 13)).unwrap();
        assert_eq!(ids, (1..=13).collect::<Vec<_>>());
    }
}
