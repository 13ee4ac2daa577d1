//! Onboarding checklist catalog and per-client progress

use chrono::{DateTime, Duration, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::CrmError;

/// Catalog onboarding task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingTaskRow {
    pub id: u32,
    pub phase: String,
    pub task_name: String,
    pub owner: String,
    pub default_deadline_days: u32,
    pub sort_order: u32,
}

impl OnboardingTaskRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            phase: row.get("phase")?,
            task_name: row.get("task_name")?,
            owner: row.get("owner")?,
            default_deadline_days: row.get("default_deadline_days")?,
            sort_order: row.get("sort_order")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    Pending,
    Complete,
}

impl OnboardingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OnboardingStatus::Pending => "pending",
            OnboardingStatus::Complete => "complete",
        }
    }

    pub fn from_db_value(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(OnboardingStatus::Pending),
            "complete" => Some(OnboardingStatus::Complete),
            _ => None,
        }
    }
}

/// A client's progress on one task, joined with the task definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOnboardingRow {
    pub id: String,
    pub client_id: String,
    pub task_id: u32,
    pub status: OnboardingStatus,
    pub completed_date: Option<String>,
    /// Explicit override; when absent the task default applies
    pub due_date: Option<String>,
    pub notes: Option<String>,
    pub phase: String,
    pub task_name: String,
    pub owner: String,
    pub default_deadline_days: u32,
    pub sort_order: u32,
    /// due_date, or client creation date + default_deadline_days
    pub effective_due_date: Option<String>,
}

impl ClientOnboardingRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let raw_status: String = row.get("status")?;
        let status = OnboardingStatus::from_db_value(&raw_status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("invalid onboarding status '{}'", raw_status).into(),
            )
        })?;

        let due_date: Option<String> = row.get("due_date")?;
        let default_deadline_days: u32 = row.get("default_deadline_days")?;
        let client_created_at: String = row.get("client_created_at")?;

        Ok(Self {
            id: row.get("id")?,
            client_id: row.get("client_id")?,
            task_id: row.get("task_id")?,
            status,
            completed_date: row.get("completed_date")?,
            effective_due_date: effective_due_date(&client_created_at, default_deadline_days, due_date.as_deref())
                .map(|d| d.format("%Y-%m-%d").to_string()),
            due_date,
            notes: row.get("notes")?,
            phase: row.get("phase")?,
            task_name: row.get("task_name")?,
            owner: row.get("owner")?,
            default_deadline_days,
            sort_order: row.get("sort_order")?,
        })
    }
}

/// Partial update for a client's onboarding row
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOnboardingInput {
    pub status: Option<OnboardingStatus>,
    /// YYYY-MM-DD; empty string clears the override
    pub due_date: Option<String>,
    pub notes: Option<String>,
}

/// Completion counts for one onboarding phase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseProgress {
    pub phase: String,
    pub complete: u32,
    pub total: u32,
}

/// Resolve the due date of a task: explicit override first, then the default offset
pub fn effective_due_date(
    client_created_at: &str,
    default_deadline_days: u32,
    due_date: Option<&str>,
) -> Option<NaiveDate> {
    if let Some(raw) = due_date {
        return NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok();
    }
    let created = DateTime::parse_from_rfc3339(client_created_at).ok()?.date_naive();
    created.checked_add_signed(Duration::days(i64::from(default_deadline_days)))
}

pub fn list_tasks(conn: &Connection) -> Result<Vec<OnboardingTaskRow>, CrmError> {
    let mut stmt = conn
        .prepare("SELECT * FROM onboarding_tasks ORDER BY sort_order ASC, id ASC")
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    let rows = stmt
        .query_map([], |row| OnboardingTaskRow::from_row(row))
        .map_err(|e| CrmError::db("Query failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CrmError::db("Row parse failed", e))?;

    Ok(rows)
}

/// Create one pending row per catalog task for a client
pub fn insert_all_for_client(conn: &Connection, client_id: &str) -> Result<usize, CrmError> {
    let tasks = list_tasks(conn)?;
    let mut stmt = conn
        .prepare("INSERT INTO client_onboarding (id, client_id, task_id, status) VALUES (?, ?, ?, 'pending')")
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    for task in &tasks {
        stmt.execute(params![super::new_id(), client_id, task.id])
            .map_err(|e| CrmError::db("Insert failed", e))?;
    }

    Ok(tasks.len())
}

const ONBOARDING_SELECT: &str = r#"
    SELECT co.*, t.phase, t.task_name, t.owner, t.default_deadline_days, t.sort_order,
           c.created_at AS client_created_at
    FROM client_onboarding co
    INNER JOIN onboarding_tasks t ON t.id = co.task_id
    INNER JOIN clients c ON c.id = co.client_id
"#;

pub fn get_client_onboarding(conn: &Connection, id: &str) -> Result<Option<ClientOnboardingRow>, CrmError> {
    conn.query_row(
        &format!("{} WHERE co.id = ?", ONBOARDING_SELECT),
        params![id],
        |row| ClientOnboardingRow::from_row(row),
    )
    .optional()
    .map_err(|e| CrmError::db("Query failed", e))
}

pub fn list_client_onboarding(conn: &Connection, client_id: &str) -> Result<Vec<ClientOnboardingRow>, CrmError> {
    let mut stmt = conn
        .prepare(&format!("{} WHERE co.client_id = ? ORDER BY t.sort_order ASC", ONBOARDING_SELECT))
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    let rows = stmt
        .query_map(params![client_id], |row| ClientOnboardingRow::from_row(row))
        .map_err(|e| CrmError::db("Query failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CrmError::db("Row parse failed", e))?;

    Ok(rows)
}

/// Apply an update. Completing stamps `today`; reopening clears the completion date.
pub fn update_client_onboarding(
    conn: &Connection,
    id: &str,
    input: &UpdateOnboardingInput,
    today: NaiveDate,
) -> Result<bool, CrmError> {
    let mut sets: Vec<&str> = vec![];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

    match input.status {
        Some(OnboardingStatus::Complete) => {
            sets.push("status = 'complete'");
            sets.push("completed_date = ?");
            params.push(Box::new(today.format("%Y-%m-%d").to_string()));
        }
        Some(OnboardingStatus::Pending) => {
            sets.push("status = 'pending'");
            sets.push("completed_date = NULL");
        }
        None => {}
    }

    if let Some(ref due) = input.due_date {
        sets.push("due_date = ?");
        if due.is_empty() {
            params.push(Box::new(Option::<String>::None));
        } else {
            params.push(Box::new(due.clone()));
        }
    }

    if let Some(ref notes) = input.notes {
        sets.push("notes = ?");
        params.push(Box::new(notes.clone()));
    }

    if sets.is_empty() {
        return Ok(get_client_onboarding(conn, id)?.is_some());
    }

    params.push(Box::new(id.to_string()));
    let sql = format!("UPDATE client_onboarding SET {} WHERE id = ?", sets.join(", "));
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let updated = conn
        .execute(&sql, param_refs.as_slice())
        .map_err(|e| CrmError::db("Update failed", e))?;

    Ok(updated > 0)
}

/// Per-phase completion counts, in checklist order
pub fn progress_by_phase(rows: &[ClientOnboardingRow]) -> Vec<PhaseProgress> {
    let mut progress: Vec<PhaseProgress> = vec![];
    for row in rows {
        let idx = match progress.iter().position(|p| p.phase == row.phase) {
            Some(idx) => idx,
            None => {
                progress.push(PhaseProgress { phase: row.phase.clone(), complete: 0, total: 0 });
                progress.len() - 1
            }
        };
        let entry = &mut progress[idx];
        entry.total += 1;
        if row.status == OnboardingStatus::Complete {
            entry.complete += 1;
        }
    }
    progress
}
