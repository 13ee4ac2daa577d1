//! Client service - client records, strategy assignments and onboarding
//!
//! Creating a client provisions its strategies and onboarding checklist in
//! the same transaction as the client row. Tier upgrades provision the newly
//! reachable strategies; downgrades keep existing assignments. Any write to a
//! client's tax rate or an assignment's deduction recomputes tax savings.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::db::{self, clients, onboarding, strategies, CrmDb};
use crate::db::clients::{ClientQuery, ClientRow, CreateClientInput, UpdateClientInput};
use crate::db::onboarding::{ClientOnboardingRow, PhaseProgress, UpdateOnboardingInput};
use crate::db::strategies::{ClientStrategyRow, UpdateAssignmentInput};
use crate::error::CrmError;
use crate::tier::PackageTier;

use super::events::{CrmEvent, EventBus};
use super::provisioning::{self, ProvisionResult};

/// Created client plus what was provisioned for it
#[derive(Debug, Clone, Serialize)]
pub struct CreatedClient {
    pub client: ClientRow,
    pub provisioned: ProvisionResult,
}

/// Assignment joined with its catalog entry
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentView {
    #[serde(flatten)]
    pub assignment: ClientStrategyRow,
    pub strategy_name: String,
    pub phase: u32,
    pub irc_citation: String,
}

/// Totals across a client's current assignments (one row per strategy)
#[derive(Debug, Clone, Serialize)]
pub struct ClientSummary {
    pub client: ClientRow,
    pub assigned_strategies: usize,
    pub total_deductions: f64,
    pub total_tax_savings: f64,
    pub onboarding: Vec<PhaseProgress>,
}

pub struct ClientService {
    db: Arc<CrmDb>,
    events: Arc<EventBus>,
}

impl ClientService {
    pub fn new(db: Arc<CrmDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Clients
    // =========================================================================

    pub fn get(&self, id: &str) -> Result<Option<ClientRow>, CrmError> {
        self.db.with_conn(|conn| clients::get_client(conn, id))
    }

    pub fn require(&self, id: &str) -> Result<ClientRow, CrmError> {
        self.get(id)?
            .ok_or_else(|| CrmError::NotFound(format!("client {}", id)))
    }

    pub fn list(&self, query: &ClientQuery) -> Result<Vec<ClientRow>, CrmError> {
        self.db.with_conn(|conn| clients::list_clients(conn, query))
    }

    /// Create a client and provision its strategies and onboarding checklist
    pub fn create(&self, mut input: CreateClientInput) -> Result<CreatedClient, CrmError> {
        self.validate_create(&input)?;
        let tier: PackageTier = input.package_tier.parse()?;
        input.package_tier = tier.as_str().to_string();

        let id = db::new_id();
        let now = db::now_timestamp();

        let (client, provisioned) = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()
                .map_err(|e| CrmError::db("Transaction failed", e))?;

            clients::insert_client(&tx, &id, &input, &now)?;
            let client = clients::get_client(&tx, &id)?
                .ok_or_else(|| CrmError::Internal("Client not found after insert".to_string()))?;
            let provisioned = provisioning::provision_new_client(&tx, &client, &now)?;

            tx.commit()
                .map_err(|e| CrmError::db("Commit failed", e))?;
            Ok((client, provisioned))
        })?;

        self.events.emit(CrmEvent::ClientCreated {
            id: client.id.clone(),
            name: client.name.clone(),
            package_tier: client.package_tier.clone(),
        });
        self.events.emit(CrmEvent::StrategiesProvisioned {
            client_id: client.id.clone(),
            strategies: provisioned.strategies,
            onboarding_tasks: provisioned.onboarding_tasks,
        });

        Ok(CreatedClient { client, provisioned })
    }

    /// Update a client. Tier upgrades provision missing strategies; tax rate
    /// changes recompute every assignment's savings.
    pub fn update(&self, id: &str, mut input: UpdateClientInput) -> Result<ClientRow, CrmError> {
        if let Some(ref name) = input.name {
            if name.trim().is_empty() {
                return Err(CrmError::InvalidInput("name is required".into()));
            }
        }
        if let Some(ref raw_tier) = input.package_tier {
            let tier: PackageTier = raw_tier.parse()?;
            input.package_tier = Some(tier.as_str().to_string());
        }
        if let Some(rate) = input.tax_rate {
            if !rate.is_finite() {
                return Err(CrmError::InvalidInput("tax_rate must be a number".into()));
            }
        }

        let now = db::now_timestamp();
        let client = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()
                .map_err(|e| CrmError::db("Transaction failed", e))?;

            if !clients::update_client(&tx, id, &input, &now)? {
                return Err(CrmError::NotFound(format!("client {}", id)));
            }
            let client = clients::get_client(&tx, id)?
                .ok_or_else(|| CrmError::NotFound(format!("client {}", id)))?;

            if input.package_tier.is_some() {
                provisioning::provision_tier_strategies(&tx, &client, &now)?;
            }
            if input.tax_rate.is_some() {
                strategies::recompute_client_savings(&tx, id, client.tax_rate, &now)?;
            }

            tx.commit()
                .map_err(|e| CrmError::db("Commit failed", e))?;
            Ok(client)
        })?;

        self.events.emit(CrmEvent::ClientUpdated { id: id.to_string() });
        Ok(client)
    }

    /// Delete a client and everything it owns. Blob cleanup is left to the caller.
    pub fn delete(&self, id: &str) -> Result<bool, CrmError> {
        let deleted = self.db.with_conn_mut(|conn| clients::delete_client(conn, id))?;
        if deleted {
            self.events.emit(CrmEvent::ClientDeleted { id: id.to_string() });
        }
        Ok(deleted)
    }

    pub fn summary(&self, id: &str) -> Result<ClientSummary, CrmError> {
        let client = self.require(id)?;
        let (assignments, onboarding_rows) = self.db.with_conn(|conn| {
            Ok((
                strategies::list_current_client_strategies(conn, id)?,
                onboarding::list_client_onboarding(conn, id)?,
            ))
        })?;

        Ok(ClientSummary {
            client,
            assigned_strategies: assignments.len(),
            total_deductions: assignments.iter().map(|a| a.deduction_amount).sum(),
            total_tax_savings: assignments.iter().map(|a| a.tax_savings).sum(),
            onboarding: onboarding::progress_by_phase(&onboarding_rows),
        })
    }

    // =========================================================================
    // Strategy assignments
    // =========================================================================

    /// All assignments for a client with catalog detail
    pub fn strategies(&self, client_id: &str) -> Result<Vec<AssignmentView>, CrmError> {
        self.require(client_id)?;
        self.db.with_conn(|conn| {
            let rows = strategies::list_client_strategies(conn, client_id)?;
            with_catalog_detail(conn, rows)
        })
    }

    /// Update status, deduction or notes. Savings are always recomputed from
    /// the client's current rate.
    pub fn update_assignment(&self, id: &str, input: UpdateAssignmentInput) -> Result<ClientStrategyRow, CrmError> {
        if let Some(amount) = input.deduction_amount {
            if !amount.is_finite() || amount < 0.0 {
                return Err(CrmError::InvalidInput("deduction_amount must be a non-negative number".into()));
            }
        }

        let now = db::now_timestamp();
        let row = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()
                .map_err(|e| CrmError::db("Transaction failed", e))?;

            let mut row = strategies::get_client_strategy(&tx, id)?
                .ok_or_else(|| CrmError::NotFound(format!("client strategy {}", id)))?;
            let client = clients::get_client(&tx, &row.client_id)?
                .ok_or_else(|| CrmError::NotFound(format!("client {}", row.client_id)))?;

            if let Some(status) = input.status {
                row.status = status;
            }
            if let Some(amount) = input.deduction_amount {
                row.deduction_amount = amount;
            }
            if let Some(notes) = input.notes {
                row.notes = Some(notes);
            }
            row.tax_savings = strategies::tax_savings(row.deduction_amount, client.tax_rate);
            row.updated_at = now.clone();

            strategies::save_assignment(&tx, &row, &now)?;
            tx.commit()
                .map_err(|e| CrmError::db("Commit failed", e))?;
            Ok(row)
        })?;

        self.events.emit(CrmEvent::AssignmentUpdated {
            id: row.id.clone(),
            client_id: row.client_id.clone(),
        });
        Ok(row)
    }

    // =========================================================================
    // Onboarding
    // =========================================================================

    pub fn onboarding(&self, client_id: &str) -> Result<Vec<ClientOnboardingRow>, CrmError> {
        self.require(client_id)?;
        self.db.with_conn(|conn| onboarding::list_client_onboarding(conn, client_id))
    }

    pub fn update_onboarding(&self, id: &str, input: UpdateOnboardingInput) -> Result<ClientOnboardingRow, CrmError> {
        if let Some(ref due) = input.due_date {
            if !due.is_empty() && chrono::NaiveDate::parse_from_str(due, "%Y-%m-%d").is_err() {
                return Err(CrmError::InvalidInput(format!("due_date '{}' is not YYYY-MM-DD", due)));
            }
        }

        let today = Utc::now().date_naive();
        self.db.with_conn(|conn| {
            if !onboarding::update_client_onboarding(conn, id, &input, today)? {
                return Err(CrmError::NotFound(format!("onboarding row {}", id)));
            }
            onboarding::get_client_onboarding(conn, id)?
                .ok_or_else(|| CrmError::NotFound(format!("onboarding row {}", id)))
        })
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn validate_create(&self, input: &CreateClientInput) -> Result<(), CrmError> {
        if input.name.trim().is_empty() {
            return Err(CrmError::InvalidInput("name is required".into()));
        }
        if input.name.len() > 500 {
            return Err(CrmError::InvalidInput("name must be <= 500 characters".into()));
        }
        if !input.tax_rate.is_finite() {
            return Err(CrmError::InvalidInput("tax_rate must be a number".into()));
        }
        if let Some(ref date) = input.next_review_date {
            if chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
                return Err(CrmError::InvalidInput(format!("next_review_date '{}' is not YYYY-MM-DD", date)));
            }
        }
        Ok(())
    }
}

/// Attach catalog name, phase and citation to assignment rows
pub fn with_catalog_detail(
    conn: &rusqlite::Connection,
    rows: Vec<ClientStrategyRow>,
) -> Result<Vec<AssignmentView>, CrmError> {
    let catalog: HashMap<u32, strategies::StrategyRow> = strategies::list_strategies(conn, None, None)?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    Ok(rows
        .into_iter()
        .map(|assignment| {
            let (strategy_name, phase, irc_citation) = match catalog.get(&assignment.strategy_id) {
                Some(s) => (s.name.clone(), s.phase, s.irc_citation.clone()),
                None => (format!("Strategy {}", assignment.strategy_id), 0, String::new()),
            };
            AssignmentView {
                assignment,
                strategy_name,
                phase,
                irc_citation,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ClientService {
        let db = Arc::new(CrmDb::open_in_memory().unwrap());
        ClientService::new(db, Arc::new(EventBus::new()))
    }

    fn input(name: &str, tier: &str, rate: f64) -> CreateClientInput {
        CreateClientInput {
            name: name.into(),
            entity_type: "S Corp".into(),
            package_tier: tier.into(),
            tax_rate: rate,
            industry: None,
            advisor_email: None,
            next_review_date: None,
            notes: None,
        }
    }

    #[test]
    fn test_create_rejects_unknown_tier_and_blank_name() {
        let svc = service();
        assert!(matches!(svc.create(input("Acme", "Platinum", 0.3)), Err(CrmError::InvalidInput(_))));
        assert!(matches!(svc.create(input("  ", "Premium", 0.3)), Err(CrmError::InvalidInput(_))));
        assert!(svc.list(&ClientQuery { limit: 10, ..Default::default() }).unwrap().is_empty());
    }

    #[test]
    fn test_deduction_update_recomputes_savings() {
        let svc = service();
        let created = svc.create(input("Acme", "Foundation", 0.32)).unwrap();
        let first = svc.strategies(&created.client.id).unwrap().remove(0);

        let updated = svc.update_assignment(&first.assignment.id, UpdateAssignmentInput {
            deduction_amount: Some(20_000.0),
            ..Default::default()
        }).unwrap();
        assert_eq!(updated.tax_savings, 6_400.0);
    }

    #[test]
    fn test_tax_rate_change_recomputes_all_savings() {
        let svc = service();
        let created = svc.create(input("Acme", "Foundation", 0.32)).unwrap();
        let first = svc.strategies(&created.client.id).unwrap().remove(0);
        svc.update_assignment(&first.assignment.id, UpdateAssignmentInput {
            deduction_amount: Some(10_000.0),
            ..Default::default()
        }).unwrap();

        svc.update(&created.client.id, UpdateClientInput { tax_rate: Some(0.24), ..Default::default() }).unwrap();
        let rows = svc.strategies(&created.client.id).unwrap();
        let row = rows.iter().find(|r| r.assignment.id == first.assignment.id).unwrap();
        assert_eq!(row.assignment.tax_savings, 2_400.0);
    }

    #[test]
    fn test_negative_deduction_rejected() {
        let svc = service();
        let created = svc.create(input("Acme", "Foundation", 0.32)).unwrap();
        let first = svc.strategies(&created.client.id).unwrap().remove(0);
        let err = svc.update_assignment(&first.assignment.id, UpdateAssignmentInput {
            deduction_amount: Some(-1.0),
            ..Default::default()
        }).unwrap_err();
        assert!(matches!(err, CrmError::InvalidInput(_)));
    }
}
