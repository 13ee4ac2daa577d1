//! Review service - quarterly review lifecycle
//!
//! A new review copies planning fields, open strategy snapshot rows and
//! action items forward from the client's latest review. Review status only
//! moves forward. Deleting a completed review takes a typed confirmation.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::benchmarks;
use crate::db::{self, clients, reviews, strategies, CrmDb};
use crate::db::clients::{ClientRow, MAX_TAX_RATE};
use crate::db::reviews::{
    ActionItemRow, CreateActionItemInput, ReviewRow, ReviewStatus, UpdateReviewInput,
};
use crate::db::strategies::{AssignmentStatus, ClientStrategyRow, NewAssignment};
use crate::error::CrmError;

use super::client_service::{with_catalog_detail, AssignmentView};
use super::events::{CrmEvent, EventBus};

/// Literal an advisor must type to delete a completed review
pub const DELETE_CONFIRMATION: &str = "DELETE";

/// What a delete would remove; shown before asking for confirmation
#[derive(Debug, Clone, Serialize)]
pub struct DeletePlan {
    pub review_id: String,
    pub client_id: String,
    pub quarter: String,
    pub status: ReviewStatus,
    pub action_items: u64,
    pub linked_strategies: u64,
    pub requires_typed_confirmation: bool,
}

/// Input for recording a strategy snapshot row on a review
#[derive(Debug, Clone, Deserialize)]
pub struct AddReviewStrategyInput {
    pub strategy_id: u32,
    #[serde(default = "default_snapshot_status")]
    pub status: AssignmentStatus,
    #[serde(default)]
    pub deduction_amount: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_snapshot_status() -> AssignmentStatus {
    AssignmentStatus::NotStarted
}

/// "Qn YYYY" for the calendar quarter containing `date`
pub fn quarter_label(date: NaiveDate) -> String {
    format!("Q{} {}", (date.month0() / 3) + 1, date.year())
}

/// Build a new review from the client's previous one.
///
/// Goals, Profit-First targets, tax rate override, advisor name and hurdles
/// carry over. Signatures, YTD actuals and meeting details start empty.
/// Without a previous review the targets come from the industry benchmark.
pub fn carry_forward(
    id: String,
    client: &ClientRow,
    prior: Option<&ReviewRow>,
    quarter: String,
    now: &str,
) -> ReviewRow {
    let mut review = ReviewRow::blank(id, client.id.clone(), quarter, ReviewStatus::InProgress, now);

    match prior {
        Some(prev) => {
            review.revenue_goal = prev.revenue_goal;
            review.profit_goal = prev.profit_goal;
            review.owner_draw_goal = prev.owner_draw_goal;
            review.employee_goal = prev.employee_goal;
            review.profit_target_pct = prev.profit_target_pct;
            review.owner_pay_target_pct = prev.owner_pay_target_pct;
            review.tax_target_pct = prev.tax_target_pct;
            review.opex_target_pct = prev.opex_target_pct;
            review.tax_rate_override = prev.tax_rate_override;
            review.advisor_name = prev.advisor_name.clone();
            review.hurdle_1 = prev.hurdle_1.clone();
            review.hurdle_2 = prev.hurdle_2.clone();
            review.hurdle_3 = prev.hurdle_3.clone();
        }
        None => {
            if let Some(targets) = client.industry.as_deref().and_then(benchmarks::targets_for_industry) {
                review.profit_target_pct = Some(targets.profit_pct);
                review.owner_pay_target_pct = Some(targets.owner_pay_pct);
                review.tax_target_pct = Some(targets.tax_pct);
                review.opex_target_pct = Some(targets.opex_pct);
            }
        }
    }

    review
}

pub struct ReviewService {
    db: Arc<CrmDb>,
    events: Arc<EventBus>,
}

impl ReviewService {
    pub fn new(db: Arc<CrmDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    pub fn get(&self, id: &str) -> Result<Option<ReviewRow>, CrmError> {
        self.db.with_conn(|conn| reviews::get_review(conn, id))
    }

    pub fn require(&self, id: &str) -> Result<ReviewRow, CrmError> {
        self.get(id)?
            .ok_or_else(|| CrmError::NotFound(format!("review {}", id)))
    }

    /// Reviews for a client, newest first
    pub fn list(&self, client_id: &str) -> Result<Vec<ReviewRow>, CrmError> {
        self.db.with_conn(|conn| {
            require_client(conn, client_id)?;
            reviews::list_reviews(conn, client_id)
        })
    }

    /// Create this quarter's review for a client
    pub fn create_review(&self, client_id: &str) -> Result<ReviewRow, CrmError> {
        self.create_review_on(client_id, Utc::now().date_naive())
    }

    /// Create a review dated `today`, copying forward from the latest review
    pub fn create_review_on(&self, client_id: &str, today: NaiveDate) -> Result<ReviewRow, CrmError> {
        let now = db::now_timestamp();
        let id = db::new_id();

        let (review, prior_id) = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()
                .map_err(|e| CrmError::db("Transaction failed", e))?;

            let client = require_client(&tx, client_id)?;
            let prior = reviews::latest_review(&tx, client_id)?;
            let review = carry_forward(id.clone(), &client, prior.as_ref(), quarter_label(today), &now);
            reviews::insert_review(&tx, &review)?;

            if let Some(ref prev) = prior {
                let (strategies_copied, items_copied) = copy_open_work(&tx, prev, &review, &now)?;
                debug!(
                    review_id = %review.id,
                    from = %prev.id,
                    strategies = strategies_copied,
                    action_items = items_copied,
                    "Copied open work forward"
                );
            }

            tx.commit()
                .map_err(|e| CrmError::db("Commit failed", e))?;
            Ok((review, prior.map(|p| p.id)))
        })?;

        self.events.emit(CrmEvent::ReviewCreated {
            id: review.id.clone(),
            client_id: review.client_id.clone(),
            quarter: review.quarter.clone(),
            copied_from: prior_id,
        });

        Ok(review)
    }

    /// Update review fields. Status may stay put or move forward only.
    pub fn update(&self, id: &str, input: UpdateReviewInput) -> Result<ReviewRow, CrmError> {
        validate_review_update(&input)?;
        let now = db::now_timestamp();

        let review = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()
                .map_err(|e| CrmError::db("Transaction failed", e))?;

            let current = reviews::get_review(&tx, id)?
                .ok_or_else(|| CrmError::NotFound(format!("review {}", id)))?;
            if let Some(next) = input.status {
                if !current.status.can_transition_to(next) {
                    return Err(CrmError::InvalidInput(format!(
                        "review status cannot move from {} to {}",
                        current.status.as_str(),
                        next.as_str()
                    )));
                }
            }

            reviews::update_review(&tx, id, &input, &now)?;
            let updated = reviews::get_review(&tx, id)?
                .ok_or_else(|| CrmError::NotFound(format!("review {}", id)))?;

            tx.commit()
                .map_err(|e| CrmError::db("Commit failed", e))?;
            Ok(updated)
        })?;

        self.events.emit(CrmEvent::ReviewUpdated { id: id.to_string() });
        Ok(review)
    }

    /// First step of deletion: report what would be removed
    pub fn prepare_delete(&self, id: &str) -> Result<DeletePlan, CrmError> {
        self.db.with_conn(|conn| delete_plan(conn, id))
    }

    /// Delete a review. Linked strategy rows stay on the client with their
    /// review link cleared; action items go with the review. The completed
    /// check reads the review inside the delete transaction.
    pub fn delete_review(&self, id: &str, confirmation: Option<&str>) -> Result<DeletePlan, CrmError> {
        let plan = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()
                .map_err(|e| CrmError::db("Transaction failed", e))?;

            let plan = delete_plan(&tx, id)?;
            check_delete_confirmation(&plan, confirmation)?;

            strategies::unlink_review(&tx, id)?;
            reviews::delete_action_items_for_review(&tx, id)?;
            reviews::delete_review_row(&tx, id)?;

            tx.commit()
                .map_err(|e| CrmError::db("Commit failed", e))?;
            Ok(plan)
        })?;

        self.events.emit(CrmEvent::ReviewDeleted {
            id: id.to_string(),
            client_id: plan.client_id.clone(),
            was_completed: plan.requires_typed_confirmation,
        });

        Ok(plan)
    }

    // =========================================================================
    // Strategy snapshot
    // =========================================================================

    pub fn review_strategies(&self, review_id: &str) -> Result<Vec<AssignmentView>, CrmError> {
        self.db.with_conn(|conn| {
            require_review(conn, review_id)?;
            let rows = strategies::list_review_strategies(conn, review_id)?;
            with_catalog_detail(conn, rows)
        })
    }

    /// Record a strategy row on a review's snapshot
    pub fn add_review_strategy(&self, review_id: &str, input: AddReviewStrategyInput) -> Result<ClientStrategyRow, CrmError> {
        if !input.deduction_amount.is_finite() || input.deduction_amount < 0.0 {
            return Err(CrmError::InvalidInput("deduction_amount must be a non-negative number".into()));
        }
        let now = db::now_timestamp();

        self.db.with_conn(|conn| {
            let review = require_review(conn, review_id)?;
            let client = require_client(conn, &review.client_id)?;
            if strategies::get_strategy(conn, input.strategy_id)?.is_none() {
                return Err(CrmError::InvalidInput(format!("unknown strategy {}", input.strategy_id)));
            }

            let id = strategies::insert_assignment(
                conn,
                &NewAssignment {
                    client_id: &client.id,
                    strategy_id: input.strategy_id,
                    status: input.status,
                    deduction_amount: input.deduction_amount,
                    tax_savings: strategies::tax_savings(input.deduction_amount, client.tax_rate),
                    notes: input.notes.as_deref(),
                    review_id: Some(review_id),
                },
                &now,
            )?;

            strategies::get_client_strategy(conn, &id)?
                .ok_or_else(|| CrmError::Internal("Assignment not found after insert".to_string()))
        })
    }

    // =========================================================================
    // Action items
    // =========================================================================

    pub fn action_items(&self, review_id: &str) -> Result<Vec<ActionItemRow>, CrmError> {
        self.db.with_conn(|conn| {
            require_review(conn, review_id)?;
            reviews::list_action_items(conn, review_id)
        })
    }

    pub fn add_action_item(&self, review_id: &str, input: CreateActionItemInput) -> Result<ActionItemRow, CrmError> {
        if input.description.trim().is_empty() {
            return Err(CrmError::InvalidInput("description is required".into()));
        }
        if let Some(ref due) = input.due_date {
            validate_date("due_date", due)?;
        }

        let item = ActionItemRow {
            id: db::new_id(),
            review_id: review_id.to_string(),
            owner: input.owner,
            description: input.description.trim().to_string(),
            due_date: input.due_date,
            completed: false,
            created_at: db::now_timestamp(),
        };

        self.db.with_conn(|conn| {
            require_review(conn, review_id)?;
            reviews::insert_action_item(conn, &item)
        })?;

        Ok(item)
    }

    pub fn set_action_item_completed(&self, id: &str, completed: bool) -> Result<ActionItemRow, CrmError> {
        self.db.with_conn(|conn| {
            if !reviews::set_action_item_completed(conn, id, completed)? {
                return Err(CrmError::NotFound(format!("action item {}", id)));
            }
            reviews::get_action_item(conn, id)?
                .ok_or_else(|| CrmError::NotFound(format!("action item {}", id)))
        })
    }

    pub fn delete_action_item(&self, id: &str) -> Result<bool, CrmError> {
        self.db.with_conn(|conn| reviews::delete_action_item(conn, id))
    }
}

fn delete_plan(conn: &Connection, id: &str) -> Result<DeletePlan, CrmError> {
    let review = require_review(conn, id)?;

    Ok(DeletePlan {
        action_items: reviews::count_action_items(conn, id)?,
        linked_strategies: strategies::count_review_strategies(conn, id)?,
        requires_typed_confirmation: review.status == ReviewStatus::Completed,
        review_id: review.id,
        client_id: review.client_id,
        quarter: review.quarter,
        status: review.status,
    })
}

/// A completed review needs the literal confirmation; anything else needs none
fn check_delete_confirmation(plan: &DeletePlan, confirmation: Option<&str>) -> Result<(), CrmError> {
    if plan.requires_typed_confirmation && confirmation != Some(DELETE_CONFIRMATION) {
        return Err(CrmError::ConfirmationRequired(format!(
            "review {} is completed; type {} to confirm",
            plan.quarter, DELETE_CONFIRMATION
        )));
    }
    Ok(())
}

/// Copy open snapshot rows and every action item from `prev` onto `next`
fn copy_open_work(
    conn: &Connection,
    prev: &ReviewRow,
    next: &ReviewRow,
    now: &str,
) -> Result<(usize, usize), CrmError> {
    let mut strategies_copied = 0;
    for row in strategies::list_review_strategies(conn, &prev.id)? {
        if row.status.is_closed() {
            continue;
        }
        strategies::insert_assignment(
            conn,
            &NewAssignment {
                client_id: &next.client_id,
                strategy_id: row.strategy_id,
                status: row.status,
                deduction_amount: row.deduction_amount,
                tax_savings: row.tax_savings,
                notes: row.notes.as_deref(),
                review_id: Some(&next.id),
            },
            now,
        )?;
        strategies_copied += 1;
    }

    let items = reviews::list_action_items(conn, &prev.id)?;
    for item in &items {
        reviews::insert_action_item(
            conn,
            &ActionItemRow {
                id: db::new_id(),
                review_id: next.id.clone(),
                owner: item.owner,
                description: item.description.clone(),
                due_date: item.due_date.clone(),
                completed: false,
                created_at: now.to_string(),
            },
        )?;
    }

    Ok((strategies_copied, items.len()))
}

fn require_client(conn: &Connection, id: &str) -> Result<ClientRow, CrmError> {
    clients::get_client(conn, id)?
        .ok_or_else(|| CrmError::NotFound(format!("client {}", id)))
}

fn require_review(conn: &Connection, id: &str) -> Result<ReviewRow, CrmError> {
    reviews::get_review(conn, id)?
        .ok_or_else(|| CrmError::NotFound(format!("review {}", id)))
}

fn validate_date(field: &str, value: &str) -> Result<(), CrmError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| CrmError::InvalidInput(format!("{} '{}' is not YYYY-MM-DD", field, value)))
}

fn validate_review_update(input: &UpdateReviewInput) -> Result<(), CrmError> {
    let pcts = [
        ("profit_target_pct", input.profit_target_pct),
        ("owner_pay_target_pct", input.owner_pay_target_pct),
        ("tax_target_pct", input.tax_target_pct),
        ("opex_target_pct", input.opex_target_pct),
    ];
    for (field, value) in pcts {
        if let Some(v) = value {
            if !(0.0..=100.0).contains(&v) {
                return Err(CrmError::InvalidInput(format!("{} must be between 0 and 100", field)));
            }
        }
    }

    if let Some(rate) = input.tax_rate_override {
        if !(0.0..=MAX_TAX_RATE).contains(&rate) {
            return Err(CrmError::InvalidInput(format!(
                "tax_rate_override must be between 0 and {}",
                MAX_TAX_RATE
            )));
        }
    }

    if let Some(goal) = input.employee_goal {
        if goal < 0 {
            return Err(CrmError::InvalidInput("employee_goal must not be negative".into()));
        }
    }

    for (field, value) in [
        ("meeting_date", &input.meeting_date),
        ("next_meeting_date", &input.next_meeting_date),
    ] {
        if let Some(date) = value {
            validate_date(field, date)?;
        }
    }

    Ok(())
}
