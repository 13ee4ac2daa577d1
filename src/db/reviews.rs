//! Quarterly review and action item CRUD operations

use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};

use crate::error::CrmError;

// ============================================================================
// Types
// ============================================================================

/// Review lifecycle: scheduled -> in-progress -> completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReviewStatus {
    #[serde(rename = "scheduled")]
    Scheduled,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Scheduled => "scheduled",
            ReviewStatus::InProgress => "in-progress",
            ReviewStatus::Completed => "completed",
        }
    }

    pub fn from_db_value(raw: &str) -> Option<Self> {
        match raw {
            "scheduled" => Some(ReviewStatus::Scheduled),
            "in-progress" => Some(ReviewStatus::InProgress),
            "completed" => Some(ReviewStatus::Completed),
            _ => None,
        }
    }

    /// Status only moves forward; staying put is allowed
    pub fn can_transition_to(self, next: ReviewStatus) -> bool {
        next >= self
    }
}

/// Quarterly review row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRow {
    pub id: String,
    pub client_id: String,
    /// "Qn YYYY"
    pub quarter: String,
    pub status: ReviewStatus,

    pub revenue_goal: Option<f64>,
    pub profit_goal: Option<f64>,
    pub owner_draw_goal: Option<f64>,
    pub employee_goal: Option<i64>,

    pub profit_target_pct: Option<f64>,
    pub owner_pay_target_pct: Option<f64>,
    pub tax_target_pct: Option<f64>,
    pub opex_target_pct: Option<f64>,

    pub tax_rate_override: Option<f64>,
    pub advisor_name: Option<String>,
    pub hurdle_1: Option<String>,
    pub hurdle_2: Option<String>,
    pub hurdle_3: Option<String>,

    pub ytd_revenue: Option<f64>,
    pub ytd_profit: Option<f64>,
    pub ytd_owner_draw: Option<f64>,

    pub client_signature: bool,
    pub advisor_signature: bool,
    pub meeting_date: Option<String>,
    pub meeting_time: Option<String>,
    pub next_meeting_date: Option<String>,
    pub next_meeting_time: Option<String>,

    pub created_at: String,
    pub updated_at: String,
}

impl ReviewRow {
    /// Empty review with every optional field unset
    pub fn blank(id: String, client_id: String, quarter: String, status: ReviewStatus, now: &str) -> Self {
        Self {
            id,
            client_id,
            quarter,
            status,
            revenue_goal: None,
            profit_goal: None,
            owner_draw_goal: None,
            employee_goal: None,
            profit_target_pct: None,
            owner_pay_target_pct: None,
            tax_target_pct: None,
            opex_target_pct: None,
            tax_rate_override: None,
            advisor_name: None,
            hurdle_1: None,
            hurdle_2: None,
            hurdle_3: None,
            ytd_revenue: None,
            ytd_profit: None,
            ytd_owner_draw: None,
            client_signature: false,
            advisor_signature: false,
            meeting_date: None,
            meeting_time: None,
            next_meeting_date: None,
            next_meeting_time: None,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }

    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let raw_status: String = row.get("status")?;
        let status = ReviewStatus::from_db_value(&raw_status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("invalid review status '{}'", raw_status).into(),
            )
        })?;

        Ok(Self {
            id: row.get("id")?,
            client_id: row.get("client_id")?,
            quarter: row.get("quarter")?,
            status,
            revenue_goal: row.get("revenue_goal")?,
            profit_goal: row.get("profit_goal")?,
            owner_draw_goal: row.get("owner_draw_goal")?,
            employee_goal: row.get("employee_goal")?,
            profit_target_pct: row.get("profit_target_pct")?,
            owner_pay_target_pct: row.get("owner_pay_target_pct")?,
            tax_target_pct: row.get("tax_target_pct")?,
            opex_target_pct: row.get("opex_target_pct")?,
            tax_rate_override: row.get("tax_rate_override")?,
            advisor_name: row.get("advisor_name")?,
            hurdle_1: row.get("hurdle_1")?,
            hurdle_2: row.get("hurdle_2")?,
            hurdle_3: row.get("hurdle_3")?,
            ytd_revenue: row.get("ytd_revenue")?,
            ytd_profit: row.get("ytd_profit")?,
            ytd_owner_draw: row.get("ytd_owner_draw")?,
            client_signature: row.get("client_signature")?,
            advisor_signature: row.get("advisor_signature")?,
            meeting_date: row.get("meeting_date")?,
            meeting_time: row.get("meeting_time")?,
            next_meeting_date: row.get("next_meeting_date")?,
            next_meeting_time: row.get("next_meeting_time")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Editable review fields; absent fields are left alone. Status changes go
/// through the lifecycle check in the review service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateReviewInput {
    pub status: Option<ReviewStatus>,
    pub revenue_goal: Option<f64>,
    pub profit_goal: Option<f64>,
    pub owner_draw_goal: Option<f64>,
    pub employee_goal: Option<i64>,
    pub profit_target_pct: Option<f64>,
    pub owner_pay_target_pct: Option<f64>,
    pub tax_target_pct: Option<f64>,
    pub opex_target_pct: Option<f64>,
    pub tax_rate_override: Option<f64>,
    pub advisor_name: Option<String>,
    pub hurdle_1: Option<String>,
    pub hurdle_2: Option<String>,
    pub hurdle_3: Option<String>,
    pub ytd_revenue: Option<f64>,
    pub ytd_profit: Option<f64>,
    pub ytd_owner_draw: Option<f64>,
    pub client_signature: Option<bool>,
    pub advisor_signature: Option<bool>,
    pub meeting_date: Option<String>,
    pub meeting_time: Option<String>,
    pub next_meeting_date: Option<String>,
    pub next_meeting_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionItemOwner {
    Client,
    Advisor,
}

impl ActionItemOwner {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionItemOwner::Client => "client",
            ActionItemOwner::Advisor => "advisor",
        }
    }

    pub fn from_db_value(raw: &str) -> Option<Self> {
        match raw {
            "client" => Some(ActionItemOwner::Client),
            "advisor" => Some(ActionItemOwner::Advisor),
            _ => None,
        }
    }
}

/// Follow-up owned by one review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItemRow {
    pub id: String,
    pub review_id: String,
    pub owner: ActionItemOwner,
    pub description: String,
    pub due_date: Option<String>,
    pub completed: bool,
    pub created_at: String,
}

impl ActionItemRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let raw_owner: String = row.get("owner")?;
        let owner = ActionItemOwner::from_db_value(&raw_owner).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("invalid action item owner '{}'", raw_owner).into(),
            )
        })?;

        Ok(Self {
            id: row.get("id")?,
            review_id: row.get("review_id")?,
            owner,
            description: row.get("description")?,
            due_date: row.get("due_date")?,
            completed: row.get("completed")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Input for adding an action item
#[derive(Debug, Clone, Deserialize)]
pub struct CreateActionItemInput {
    #[serde(default = "default_owner")]
    pub owner: ActionItemOwner,
    pub description: String,
    #[serde(default)]
    pub due_date: Option<String>,
}

fn default_owner() -> ActionItemOwner { ActionItemOwner::Advisor }

// ============================================================================
// Reviews
// ============================================================================

pub fn get_review(conn: &Connection, id: &str) -> Result<Option<ReviewRow>, CrmError> {
    conn.query_row("SELECT * FROM quarterly_reviews WHERE id = ?", params![id], |row| ReviewRow::from_row(row))
        .optional()
        .map_err(|e| CrmError::db("Query failed", e))
}

/// Reviews for a client, newest first
pub fn list_reviews(conn: &Connection, client_id: &str) -> Result<Vec<ReviewRow>, CrmError> {
    let mut stmt = conn
        .prepare("SELECT * FROM quarterly_reviews WHERE client_id = ? ORDER BY created_at DESC, rowid DESC")
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    let rows = stmt
        .query_map(params![client_id], |row| ReviewRow::from_row(row))
        .map_err(|e| CrmError::db("Query failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CrmError::db("Row parse failed", e))?;

    Ok(rows)
}

/// Most recently created review for a client
pub fn latest_review(conn: &Connection, client_id: &str) -> Result<Option<ReviewRow>, CrmError> {
    conn.query_row(
        "SELECT * FROM quarterly_reviews WHERE client_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
        params![client_id],
        |row| ReviewRow::from_row(row),
    )
    .optional()
    .map_err(|e| CrmError::db("Query failed", e))
}

pub fn insert_review(conn: &Connection, review: &ReviewRow) -> Result<(), CrmError> {
    conn.execute(
        r#"
        INSERT INTO quarterly_reviews (
            id, client_id, quarter, status,
            revenue_goal, profit_goal, owner_draw_goal, employee_goal,
            profit_target_pct, owner_pay_target_pct, tax_target_pct, opex_target_pct,
            tax_rate_override, advisor_name, hurdle_1, hurdle_2, hurdle_3,
            ytd_revenue, ytd_profit, ytd_owner_draw,
            client_signature, advisor_signature,
            meeting_date, meeting_time, next_meeting_date, next_meeting_time,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            review.id,
            review.client_id,
            review.quarter,
            review.status.as_str(),
            review.revenue_goal,
            review.profit_goal,
            review.owner_draw_goal,
            review.employee_goal,
            review.profit_target_pct,
            review.owner_pay_target_pct,
            review.tax_target_pct,
            review.opex_target_pct,
            review.tax_rate_override,
            review.advisor_name,
            review.hurdle_1,
            review.hurdle_2,
            review.hurdle_3,
            review.ytd_revenue,
            review.ytd_profit,
            review.ytd_owner_draw,
            review.client_signature,
            review.advisor_signature,
            review.meeting_date,
            review.meeting_time,
            review.next_meeting_date,
            review.next_meeting_time,
            review.created_at,
            review.updated_at,
        ],
    ).map_err(|e| CrmError::db("Insert failed", e))?;

    Ok(())
}

fn push_set<T: ToSql + Clone + 'static>(
    sets: &mut Vec<&'static str>,
    params: &mut Vec<Box<dyn ToSql>>,
    clause: &'static str,
    value: &Option<T>,
) {
    if let Some(v) = value {
        sets.push(clause);
        params.push(Box::new(v.clone()));
    }
}

/// Apply a partial update. Returns false when the review does not exist.
pub fn update_review(conn: &Connection, id: &str, input: &UpdateReviewInput, now: &str) -> Result<bool, CrmError> {
    let mut sets: Vec<&'static str> = vec![];
    let mut params: Vec<Box<dyn ToSql>> = vec![];

    let status = input.status.map(|s| s.as_str().to_string());
    push_set(&mut sets, &mut params, "status = ?", &status);
    push_set(&mut sets, &mut params, "revenue_goal = ?", &input.revenue_goal);
    push_set(&mut sets, &mut params, "profit_goal = ?", &input.profit_goal);
    push_set(&mut sets, &mut params, "owner_draw_goal = ?", &input.owner_draw_goal);
    push_set(&mut sets, &mut params, "employee_goal = ?", &input.employee_goal);
    push_set(&mut sets, &mut params, "profit_target_pct = ?", &input.profit_target_pct);
    push_set(&mut sets, &mut params, "owner_pay_target_pct = ?", &input.owner_pay_target_pct);
    push_set(&mut sets, &mut params, "tax_target_pct = ?", &input.tax_target_pct);
    push_set(&mut sets, &mut params, "opex_target_pct = ?", &input.opex_target_pct);
    push_set(&mut sets, &mut params, "tax_rate_override = ?", &input.tax_rate_override);
    push_set(&mut sets, &mut params, "advisor_name = ?", &input.advisor_name);
    push_set(&mut sets, &mut params, "hurdle_1 = ?", &input.hurdle_1);
    push_set(&mut sets, &mut params, "hurdle_2 = ?", &input.hurdle_2);
    push_set(&mut sets, &mut params, "hurdle_3 = ?", &input.hurdle_3);
    push_set(&mut sets, &mut params, "ytd_revenue = ?", &input.ytd_revenue);
    push_set(&mut sets, &mut params, "ytd_profit = ?", &input.ytd_profit);
    push_set(&mut sets, &mut params, "ytd_owner_draw = ?", &input.ytd_owner_draw);
    push_set(&mut sets, &mut params, "client_signature = ?", &input.client_signature);
    push_set(&mut sets, &mut params, "advisor_signature = ?", &input.advisor_signature);
    push_set(&mut sets, &mut params, "meeting_date = ?", &input.meeting_date);
    push_set(&mut sets, &mut params, "meeting_time = ?", &input.meeting_time);
    push_set(&mut sets, &mut params, "next_meeting_date = ?", &input.next_meeting_date);
    push_set(&mut sets, &mut params, "next_meeting_time = ?", &input.next_meeting_time);

    sets.push("updated_at = ?");
    params.push(Box::new(now.to_string()));
    params.push(Box::new(id.to_string()));

    let sql = format!("UPDATE quarterly_reviews SET {} WHERE id = ?", sets.join(", "));
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let updated = conn
        .execute(&sql, param_refs.as_slice())
        .map_err(|e| CrmError::db("Update failed", e))?;

    Ok(updated > 0)
}

pub fn delete_review_row(conn: &Connection, id: &str) -> Result<bool, CrmError> {
    let deleted = conn
        .execute("DELETE FROM quarterly_reviews WHERE id = ?", params![id])
        .map_err(|e| CrmError::db("Delete failed", e))?;
    Ok(deleted > 0)
}

// ============================================================================
// Action Items
// ============================================================================

pub fn get_action_item(conn: &Connection, id: &str) -> Result<Option<ActionItemRow>, CrmError> {
    conn.query_row("SELECT * FROM action_items WHERE id = ?", params![id], |row| ActionItemRow::from_row(row))
        .optional()
        .map_err(|e| CrmError::db("Query failed", e))
}

pub fn list_action_items(conn: &Connection, review_id: &str) -> Result<Vec<ActionItemRow>, CrmError> {
    let mut stmt = conn
        .prepare("SELECT * FROM action_items WHERE review_id = ? ORDER BY created_at ASC, rowid ASC")
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    let rows = stmt
        .query_map(params![review_id], |row| ActionItemRow::from_row(row))
        .map_err(|e| CrmError::db("Query failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CrmError::db("Row parse failed", e))?;

    Ok(rows)
}

pub fn count_action_items(conn: &Connection, review_id: &str) -> Result<u64, CrmError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM action_items WHERE review_id = ?",
            params![review_id],
            |row| row.get(0),
        )
        .map_err(|e| CrmError::db("Query failed", e))?;
    Ok(count as u64)
}

pub fn insert_action_item(conn: &Connection, item: &ActionItemRow) -> Result<(), CrmError> {
    conn.execute(
        r#"
        INSERT INTO action_items (id, review_id, owner, description, due_date, completed, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            item.id,
            item.review_id,
            item.owner.as_str(),
            item.description,
            item.due_date,
            item.completed,
            item.created_at,
        ],
    ).map_err(|e| CrmError::db("Insert failed", e))?;
    Ok(())
}

pub fn set_action_item_completed(conn: &Connection, id: &str, completed: bool) -> Result<bool, CrmError> {
    let updated = conn
        .execute("UPDATE action_items SET completed = ? WHERE id = ?", params![completed, id])
        .map_err(|e| CrmError::db("Update failed", e))?;
    Ok(updated > 0)
}

pub fn delete_action_item(conn: &Connection, id: &str) -> Result<bool, CrmError> {
    let deleted = conn
        .execute("DELETE FROM action_items WHERE id = ?", params![id])
        .map_err(|e| CrmError::db("Delete failed", e))?;
    Ok(deleted > 0)
}

pub fn delete_action_items_for_review(conn: &Connection, review_id: &str) -> Result<usize, CrmError> {
    conn.execute("DELETE FROM action_items WHERE review_id = ?", params![review_id])
        .map_err(|e| CrmError::db("Delete failed", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        assert!(ReviewStatus::Scheduled.can_transition_to(ReviewStatus::InProgress));
        assert!(ReviewStatus::InProgress.can_transition_to(ReviewStatus::Completed));
        assert!(ReviewStatus::Completed.can_transition_to(ReviewStatus::Completed));
        assert!(!ReviewStatus::Completed.can_transition_to(ReviewStatus::InProgress));
        assert!(!ReviewStatus::InProgress.can_transition_to(ReviewStatus::Scheduled));
    }

    #[test]
    fn test_status_serializes_with_hyphen() {
        let json = serde_json::to_string(&ReviewStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
        assert_eq!(ReviewStatus::from_db_value("in-progress"), Some(ReviewStatus::InProgress));
    }
}
