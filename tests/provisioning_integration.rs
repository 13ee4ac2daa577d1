//! Integration tests for tier provisioning and the backfill sweep

use std::sync::Arc;

use taxplan_crm::catalog::ONBOARDING_TASKS;
use taxplan_crm::db::clients::{self, CreateClientInput, UpdateClientInput};
use taxplan_crm::db::strategies::{self, AssignmentStatus, UpdateAssignmentInput};
use taxplan_crm::db::{self, CrmDb};
use taxplan_crm::services::{ClientService, EventBus, ProvisioningService};
use tempfile::TempDir;

fn client_input(name: &str, tier: &str) -> CreateClientInput {
    CreateClientInput {
        name: name.into(),
        entity_type: "S Corp".into(),
        package_tier: tier.into(),
        tax_rate: 0.32,
        industry: None,
        advisor_email: None,
        next_review_date: None,
        notes: None,
    }
}

/// Helper to open a database in a temporary storage directory
fn open_db() -> (Arc<CrmDb>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(CrmDb::open(temp_dir.path()).unwrap());
    (db, temp_dir)
}

#[test]
fn test_foundation_client_gets_strategies_1_to_13_and_full_onboarding() {
    let (db, _temp) = open_db();
    let svc = ClientService::new(db.clone(), Arc::new(EventBus::new()));

    let created = svc.create(client_input("Acme Dental", "Foundation")).unwrap();
    assert_eq!(created.provisioned.strategies, 13);
    assert_eq!(created.provisioned.onboarding_tasks, ONBOARDING_TASKS.len());

    let rows = svc.strategies(&created.client.id).unwrap();
    let mut ids: Vec<u32> = rows.iter().map(|r| r.assignment.strategy_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=13).collect::<Vec<_>>());
    assert!(rows.iter().all(|r| r.assignment.status == AssignmentStatus::NotStarted));
    assert!(rows.iter().all(|r| r.assignment.review_id.is_none()));

    let onboarding = svc.onboarding(&created.client.id).unwrap();
    assert_eq!(onboarding.len(), ONBOARDING_TASKS.len());
}

#[test]
fn test_essentials_client_gets_onboarding_only() {
    let (db, _temp) = open_db();
    let svc = ClientService::new(db, Arc::new(EventBus::new()));

    let created = svc.create(client_input("Solo LLC", "essentials")).unwrap();
    assert_eq!(created.client.package_tier, "Essentials");
    assert_eq!(created.provisioned.strategies, 0);
    assert_eq!(created.provisioned.onboarding_tasks, ONBOARDING_TASKS.len());
}

#[test]
fn test_backfill_provisions_missing_and_is_idempotent() {
    let (db, _temp) = open_db();
    let now = db::now_timestamp();

    // Clients inserted without going through the service have no assignments
    db.with_conn(|conn| {
        clients::insert_client(conn, "c-complete", &client_input("Complete Co", "Complete"), &now)?;
        clients::insert_client(conn, "c-premium", &client_input("Premium Co", "Premium"), &now)?;
        clients::insert_client(conn, "c-essentials", &client_input("Basic Co", "Essentials"), &now)
    })
    .unwrap();

    let svc = ProvisioningService::new(db.clone(), Arc::new(EventBus::new()));
    let first = svc.backfill_missing_strategies().unwrap();
    assert_eq!(first.clients_scanned, 3);
    assert_eq!(first.clients_provisioned, 2);
    assert_eq!(first.rows_inserted, 30 + 59);
    assert!(first.failures.is_empty());

    let counts = |db: &CrmDb| {
        db.with_conn(|conn| {
            Ok((
                strategies::count_client_strategies(conn, "c-complete")?,
                strategies::count_client_strategies(conn, "c-premium")?,
                strategies::count_client_strategies(conn, "c-essentials")?,
            ))
        })
        .unwrap()
    };
    assert_eq!(counts(&db), (30, 59, 0));

    let second = svc.backfill_missing_strategies().unwrap();
    assert_eq!(second.rows_inserted, 0);
    assert_eq!(second.clients_provisioned, 0);
    assert_eq!(counts(&db), (30, 59, 0));
}

#[test]
fn test_tier_upgrade_adds_new_range_and_downgrade_keeps_rows() {
    let (db, _temp) = open_db();
    let svc = ClientService::new(db, Arc::new(EventBus::new()));
    let created = svc.create(client_input("Growing Co", "Foundation")).unwrap();
    let id = created.client.id.clone();

    let first = svc.strategies(&id).unwrap().remove(0);
    svc.update_assignment(&first.assignment.id, UpdateAssignmentInput {
        status: Some(AssignmentStatus::InProgress),
        deduction_amount: Some(20_000.0),
        notes: Some("Started paperwork".into()),
    })
    .unwrap();

    svc.update(&id, UpdateClientInput {
        package_tier: Some("Complete".into()),
        ..Default::default()
    })
    .unwrap();
    let rows = svc.strategies(&id).unwrap();
    assert_eq!(rows.len(), 30);
    let kept = rows.iter().find(|r| r.assignment.id == first.assignment.id).unwrap();
    assert_eq!(kept.assignment.status, AssignmentStatus::InProgress);
    assert_eq!(kept.assignment.tax_savings, 6_400.0);

    svc.update(&id, UpdateClientInput {
        package_tier: Some("Essentials".into()),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(svc.strategies(&id).unwrap().len(), 30);
}

#[test]
fn test_client_delete_removes_owned_rows() {
    let (db, _temp) = open_db();
    let svc = ClientService::new(db.clone(), Arc::new(EventBus::new()));
    let created = svc.create(client_input("Gone Co", "Premium")).unwrap();

    assert!(svc.delete(&created.client.id).unwrap());
    assert!(svc.get(&created.client.id).unwrap().is_none());
    assert!(!svc.delete(&created.client.id).unwrap());

    let stats = db.stats().unwrap();
    assert_eq!(stats.client_count, 0);
    assert_eq!(stats.assignment_count, 0);
}
