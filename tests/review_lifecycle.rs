//! Integration tests for quarterly review copy-forward and deletion

use std::sync::Arc;

use chrono::NaiveDate;
use taxplan_crm::db::clients::CreateClientInput;
use taxplan_crm::db::reviews::{ActionItemOwner, CreateActionItemInput, ReviewStatus, UpdateReviewInput};
use taxplan_crm::db::strategies::{AssignmentStatus, UpdateAssignmentInput};
use taxplan_crm::db::CrmDb;
use taxplan_crm::error::CrmError;
use taxplan_crm::services::review_service::AddReviewStrategyInput;
use taxplan_crm::services::{ClientService, EventBus, ReviewService};
use tempfile::TempDir;

struct Fixture {
    clients: ClientService,
    reviews: ReviewService,
    client_id: String,
    _temp: TempDir,
}

fn fixture(industry: Option<&str>) -> Fixture {
    let temp = TempDir::new().unwrap();
    let db = Arc::new(CrmDb::open(temp.path()).unwrap());
    let events = Arc::new(EventBus::new());
    let clients = ClientService::new(db.clone(), events.clone());
    let reviews = ReviewService::new(db, events);

    let created = clients
        .create(CreateClientInput {
            name: "Harbor Landscaping".into(),
            entity_type: "S Corp".into(),
            package_tier: "Foundation".into(),
            tax_rate: 0.3,
            industry: industry.map(String::from),
            advisor_email: None,
            next_review_date: None,
            notes: None,
        })
        .unwrap();

    Fixture {
        clients,
        reviews,
        client_id: created.client.id,
        _temp: temp,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn snapshot(strategy_id: u32, status: AssignmentStatus, deduction: f64) -> AddReviewStrategyInput {
    AddReviewStrategyInput {
        strategy_id,
        status,
        deduction_amount: deduction,
        notes: Some(format!("strategy {}", strategy_id)),
    }
}

#[test]
fn test_copy_forward_r1_to_r2() {
    let f = fixture(None);

    let r1 = f.reviews.create_review_on(&f.client_id, date(2026, 2, 10)).unwrap();
    assert_eq!(r1.quarter, "Q1 2026");
    assert_eq!(r1.status, ReviewStatus::InProgress);

    f.reviews
        .update(&r1.id, UpdateReviewInput {
            revenue_goal: Some(750_000.0),
            profit_goal: Some(100_000.0),
            owner_draw_goal: Some(90_000.0),
            employee_goal: Some(12),
            profit_target_pct: Some(10.0),
            owner_pay_target_pct: Some(35.0),
            tax_target_pct: Some(15.0),
            opex_target_pct: Some(40.0),
            tax_rate_override: Some(0.28),
            advisor_name: Some("Dana".into()),
            hurdle_1: Some("Cash flow in winter".into()),
            hurdle_2: Some("Bookkeeping backlog".into()),
            hurdle_3: Some("Hiring a crew lead".into()),
            ytd_revenue: Some(180_000.0),
            ytd_profit: Some(21_000.0),
            ytd_owner_draw: Some(15_000.0),
            client_signature: Some(true),
            advisor_signature: Some(true),
            meeting_date: Some("2026-03-28".into()),
            meeting_time: Some("10:00".into()),
            next_meeting_date: Some("2026-06-27".into()),
            next_meeting_time: Some("09:30".into()),
            ..Default::default()
        })
        .unwrap();

    f.reviews.add_review_strategy(&r1.id, snapshot(1, AssignmentStatus::InProgress, 10_000.0)).unwrap();
    f.reviews.add_review_strategy(&r1.id, snapshot(2, AssignmentStatus::Complete, 5_000.0)).unwrap();
    f.reviews.add_review_strategy(&r1.id, snapshot(3, AssignmentStatus::Considering, 0.0)).unwrap();

    let item = f.reviews
        .add_action_item(&r1.id, CreateActionItemInput {
            owner: ActionItemOwner::Client,
            description: "Send mileage log".into(),
            due_date: Some("2026-04-15".into()),
        })
        .unwrap();
    f.reviews.set_action_item_completed(&item.id, true).unwrap();

    let r2 = f.reviews.create_review_on(&f.client_id, date(2026, 5, 2)).unwrap();
    assert_eq!(r2.quarter, "Q2 2026");
    assert_eq!(r2.status, ReviewStatus::InProgress);
    let r1 = f.reviews.require(&r1.id).unwrap();
    assert!(r1.client_signature && r1.ytd_profit == Some(21_000.0));

    // Planning fields carry over unchanged
    assert_eq!(r2.revenue_goal, Some(750_000.0));
    assert_eq!(r2.profit_goal, Some(100_000.0));
    assert_eq!(r2.owner_draw_goal, Some(90_000.0));
    assert_eq!(r2.employee_goal, Some(12));
    assert_eq!(r2.profit_target_pct, Some(10.0));
    assert_eq!(r2.owner_pay_target_pct, Some(35.0));
    assert_eq!(r2.tax_target_pct, Some(15.0));
    assert_eq!(r2.opex_target_pct, Some(40.0));
    assert_eq!(r2.tax_rate_override, Some(0.28));
    assert_eq!(r2.advisor_name.as_deref(), Some("Dana"));
    assert_eq!(r2.hurdle_1.as_deref(), Some("Cash flow in winter"));
    assert_eq!(r2.hurdle_2.as_deref(), Some("Bookkeeping backlog"));
    assert_eq!(r2.hurdle_3.as_deref(), Some("Hiring a crew lead"));

    // Per-quarter fields start empty
    assert!(!r2.client_signature);
    assert!(!r2.advisor_signature);
    assert_eq!(r2.ytd_revenue, None);
    assert_eq!(r2.ytd_profit, None);
    assert_eq!(r2.ytd_owner_draw, None);
    assert_eq!(r2.meeting_date, None);
    assert_eq!(r2.meeting_time, None);
    assert_eq!(r2.next_meeting_date, None);
    assert_eq!(r2.next_meeting_time, None);

    // Closed snapshot rows stay behind
    let copied = f.reviews.review_strategies(&r2.id).unwrap();
    let mut ids: Vec<u32> = copied.iter().map(|r| r.assignment.strategy_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 3]);
    let first = copied.iter().find(|r| r.assignment.strategy_id == 1).unwrap();
    assert_eq!(first.assignment.status, AssignmentStatus::InProgress);
    assert_eq!(first.assignment.deduction_amount, 10_000.0);
    assert_eq!(first.assignment.tax_savings, 3_000.0);
    assert_eq!(first.assignment.notes.as_deref(), Some("strategy 1"));

    let items = f.reviews.action_items(&r2.id).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].description, "Send mileage log");
    assert!(!items[0].completed);

    // Newest first
    let listed = f.reviews.list(&f.client_id).unwrap();
    assert_eq!(listed[0].id, r2.id);
    assert_eq!(listed[1].id, r1.id);
}

#[test]
fn test_totals_count_each_strategy_once_across_quarters() {
    let f = fixture(None);

    let live = f.clients.strategies(&f.client_id).unwrap()
        .into_iter()
        .find(|r| r.assignment.strategy_id == 1)
        .unwrap();
    f.clients
        .update_assignment(&live.assignment.id, UpdateAssignmentInput {
            status: Some(AssignmentStatus::InProgress),
            deduction_amount: Some(10_000.0),
            notes: None,
        })
        .unwrap();

    let r1 = f.reviews.create_review_on(&f.client_id, date(2026, 2, 10)).unwrap();
    f.reviews.add_review_strategy(&r1.id, snapshot(1, AssignmentStatus::InProgress, 10_000.0)).unwrap();
    f.reviews.create_review_on(&f.client_id, date(2026, 5, 2)).unwrap();
    f.reviews.create_review_on(&f.client_id, date(2026, 8, 3)).unwrap();

    // Live row plus three quarterly snapshots
    let rows = f.clients.strategies(&f.client_id).unwrap();
    assert_eq!(rows.iter().filter(|r| r.assignment.strategy_id == 1).count(), 4);

    let summary = f.clients.summary(&f.client_id).unwrap();
    assert_eq!(summary.assigned_strategies, 13);
    assert_eq!(summary.total_deductions, 10_000.0);
    assert_eq!(summary.total_tax_savings, 3_000.0);
}

#[test]
fn test_first_review_uses_industry_benchmark() {
    let f = fixture(Some("construction"));
    let review = f.reviews.create_review_on(&f.client_id, date(2026, 7, 1)).unwrap();
    assert_eq!(review.quarter, "Q3 2026");
    assert_eq!(review.profit_target_pct, Some(5.0));
    assert_eq!(review.owner_pay_target_pct, Some(20.0));
    assert_eq!(review.tax_target_pct, Some(15.0));
    assert_eq!(review.opex_target_pct, Some(60.0));
    assert_eq!(review.profit_goal, None);
}

#[test]
fn test_delete_open_review_unlinks_strategies_and_drops_action_items() {
    let f = fixture(None);
    let review = f.reviews.create_review_on(&f.client_id, date(2026, 2, 10)).unwrap();
    let row = f.reviews.add_review_strategy(&review.id, snapshot(4, AssignmentStatus::Active, 2_000.0)).unwrap();
    f.reviews
        .add_action_item(&review.id, CreateActionItemInput {
            owner: ActionItemOwner::Advisor,
            description: "File election".into(),
            due_date: None,
        })
        .unwrap();

    let before = f.clients.strategies(&f.client_id).unwrap().len();

    let plan = f.reviews.prepare_delete(&review.id).unwrap();
    assert_eq!(plan.action_items, 1);
    assert_eq!(plan.linked_strategies, 1);
    assert!(!plan.requires_typed_confirmation);

    f.reviews.delete_review(&review.id, None).unwrap();

    assert!(f.reviews.get(&review.id).unwrap().is_none());
    let after = f.clients.strategies(&f.client_id).unwrap();
    assert_eq!(after.len(), before);
    let kept = after.iter().find(|r| r.assignment.id == row.id).unwrap();
    assert!(kept.assignment.review_id.is_none());
    assert!(matches!(f.reviews.action_items(&review.id), Err(CrmError::NotFound(_))));
}

#[test]
fn test_completed_review_requires_typed_confirmation() {
    let f = fixture(None);
    let review = f.reviews.create_review_on(&f.client_id, date(2026, 2, 10)).unwrap();
    f.reviews
        .update(&review.id, UpdateReviewInput {
            status: Some(ReviewStatus::Completed),
            ..Default::default()
        })
        .unwrap();

    assert!(f.reviews.prepare_delete(&review.id).unwrap().requires_typed_confirmation);

    let err = f.reviews.delete_review(&review.id, None).unwrap_err();
    assert!(matches!(err, CrmError::ConfirmationRequired(_)));
    let err = f.reviews.delete_review(&review.id, Some("delete")).unwrap_err();
    assert!(matches!(err, CrmError::ConfirmationRequired(_)));
    assert!(f.reviews.get(&review.id).unwrap().is_some());

    let plan = f.reviews.delete_review(&review.id, Some("DELETE")).unwrap();
    assert_eq!(plan.status, ReviewStatus::Completed);
    assert!(f.reviews.get(&review.id).unwrap().is_none());
}

#[test]
fn test_review_completed_after_plan_still_needs_confirmation() {
    let f = fixture(None);
    let review = f.reviews.create_review_on(&f.client_id, date(2026, 2, 10)).unwrap();

    let plan = f.reviews.prepare_delete(&review.id).unwrap();
    assert!(!plan.requires_typed_confirmation);

    // Finalized between showing the plan and confirming the delete
    f.reviews
        .update(&review.id, UpdateReviewInput {
            status: Some(ReviewStatus::Completed),
            ..Default::default()
        })
        .unwrap();

    let err = f.reviews.delete_review(&review.id, None).unwrap_err();
    assert!(matches!(err, CrmError::ConfirmationRequired(_)));
    assert!(f.reviews.get(&review.id).unwrap().is_some());
}

#[test]
fn test_review_for_unknown_client_is_not_found() {
    let f = fixture(None);
    let err = f.reviews.create_review_on("missing", date(2026, 1, 1)).unwrap_err();
    assert!(matches!(err, CrmError::NotFound(_)));
}
