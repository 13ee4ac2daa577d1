//! Strategy and onboarding provisioning
//!
//! New clients get one `not_started` assignment per catalog strategy their
//! tier reaches, and one `pending` row per onboarding task regardless of
//! tier. The backfill sweep catches clients that never got assignments; it
//! only touches clients with zero assignment rows, so running it again is a
//! no-op.

use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{self, clients, onboarding, strategies, ClientRow, CrmDb};
use crate::error::CrmError;
use crate::tier;

use super::events::{CrmEvent, EventBus};

/// Rows created for one client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionResult {
    pub strategies: usize,
    pub onboarding_tasks: usize,
}

/// Outcome of a backfill sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    pub clients_scanned: usize,
    pub clients_provisioned: usize,
    pub rows_inserted: usize,
    pub failures: Vec<BackfillFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillFailure {
    pub client_id: String,
    pub error: String,
}

/// Insert assignments for every strategy in the client's tier range that it
/// does not already have. Returns the number of rows inserted.
pub fn provision_tier_strategies(conn: &Connection, client: &ClientRow, now: &str) -> Result<usize, CrmError> {
    let max_id = tier::max_strategy_id(&client.package_tier);
    if max_id == 0 {
        return Ok(0);
    }

    let existing = strategies::assigned_strategy_ids(conn, &client.id)?;
    let missing: Vec<u32> = strategies::strategy_ids_up_to(conn, max_id)?
        .into_iter()
        .filter(|id| !existing.contains(id))
        .collect();

    strategies::insert_not_started(conn, &client.id, &missing, now)
}

/// Client-creation path: tier-range strategies plus the full onboarding checklist
pub fn provision_new_client(conn: &Connection, client: &ClientRow, now: &str) -> Result<ProvisionResult, CrmError> {
    let strategies = provision_tier_strategies(conn, client, now)?;
    let onboarding_tasks = onboarding::insert_all_for_client(conn, &client.id)?;

    Ok(ProvisionResult {
        strategies,
        onboarding_tasks,
    })
}

/// Runs the backfill sweep
pub struct ProvisioningService {
    db: Arc<CrmDb>,
    events: Arc<EventBus>,
}

impl ProvisioningService {
    pub fn new(db: Arc<CrmDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    /// Provision strategies for every client that has none.
    ///
    /// Each client is committed on its own. A failing client is logged and
    /// reported but does not stop the sweep or undo earlier clients.
    pub fn backfill_missing_strategies(&self) -> Result<BackfillReport, CrmError> {
        let pending = self.db.with_conn(clients::list_clients_without_strategies)?;
        let mut report = BackfillReport {
            clients_scanned: pending.len(),
            ..Default::default()
        };

        for client in &pending {
            let result = self.db.with_conn_mut(|conn| {
                let tx = conn.transaction()
                    .map_err(|e| CrmError::db("Transaction failed", e))?;
                let inserted = provision_tier_strategies(&tx, client, &db::now_timestamp())?;
                tx.commit()
                    .map_err(|e| CrmError::db("Commit failed", e))?;
                Ok(inserted)
            });

            match result {
                Ok(0) => {}
                Ok(inserted) => {
                    report.clients_provisioned += 1;
                    report.rows_inserted += inserted;
                    self.events.emit(CrmEvent::StrategiesProvisioned {
                        client_id: client.id.clone(),
                        strategies: inserted,
                        onboarding_tasks: 0,
                    });
                }
                Err(e) => {
                    warn!(client_id = %client.id, error = %e, "Backfill failed for client");
                    report.failures.push(BackfillFailure {
                        client_id: client.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            scanned = report.clients_scanned,
            provisioned = report.clients_provisioned,
            rows = report.rows_inserted,
            failures = report.failures.len(),
            "Strategy backfill finished"
        );

        Ok(report)
    }
}
