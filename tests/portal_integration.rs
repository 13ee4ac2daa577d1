//! Integration tests for the client portal access gate

use std::sync::Arc;

use chrono::{Duration, SecondsFormat, Utc};
use taxplan_crm::blob_store::BlobStore;
use taxplan_crm::config::Config;
use taxplan_crm::db::access_tokens::{self, AccessTokenRow};
use taxplan_crm::db::clients::CreateClientInput;
use taxplan_crm::db::strategies::AssignmentStatus;
use taxplan_crm::db::CrmDb;
use taxplan_crm::error::{CrmError, INVALID_TOKEN_MESSAGE};
use taxplan_crm::mailer::{Mailer, RecordingMailer};
use taxplan_crm::services::portal::{hash_token, IssueTokenInput, PortalSession};
use taxplan_crm::services::review_service::AddReviewStrategyInput;
use taxplan_crm::Services;
use tempfile::TempDir;

struct Fixture {
    services: Services,
    db: Arc<CrmDb>,
    mailer: Arc<RecordingMailer>,
    _temp: TempDir,
}

async fn fixture(max_upload_bytes: usize) -> Fixture {
    let temp = TempDir::new().unwrap();
    let config = Config {
        storage_dir: temp.path().to_path_buf(),
        signing_secret: "s".repeat(40),
        portal_base_url: "https://crm.example/portal".into(),
        max_upload_bytes,
        ..Config::default()
    };

    let db = Arc::new(CrmDb::open(&config.storage_dir).unwrap());
    let blobs = Arc::new(BlobStore::new(&config.storage_dir).await.unwrap());
    let mailer = Arc::new(RecordingMailer::new());
    let services = Services::new(db.clone(), blobs, mailer.clone() as Arc<dyn Mailer>, &config);

    Fixture {
        services,
        db,
        mailer,
        _temp: temp,
    }
}

fn create_client(f: &Fixture, name: &str, advisor_email: Option<&str>) -> String {
    f.services
        .clients
        .create(CreateClientInput {
            name: name.into(),
            entity_type: "LLC".into(),
            package_tier: "Foundation".into(),
            tax_rate: 0.25,
            industry: None,
            advisor_email: advisor_email.map(String::from),
            next_review_date: None,
            notes: Some("internal advisor note".into()),
        })
        .unwrap()
        .client
        .id
}

fn ticket_from_url(url: &str) -> String {
    let query = url.split_once('?').map(|(_, q)| q).unwrap();
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "ticket")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

#[tokio::test]
async fn test_issue_token_emails_link_and_authorizes() {
    let f = fixture(1024).await;
    let client_id = create_client(&f, "Maple Bakery", None);

    let issued = f.services.portal
        .issue_token(&client_id, IssueTokenInput {
            email: Some("owner@maple.example".into()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(issued.token.len(), 64);
    assert!(issued.emailed);
    assert!(issued.link.starts_with("https://crm.example/portal?token="));

    let sent = f.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "owner@maple.example");
    assert!(sent[0].body.contains(&issued.link));

    // Only the hash is stored
    let stored = f.db.with_conn(|conn| access_tokens::list_for_client(conn, &client_id)).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].token_hash, hash_token(&issued.token));
    assert_ne!(stored[0].token_hash, issued.token);

    let validation = f.services.portal.validate_client_token(&issued.token).unwrap().unwrap();
    assert!(validation.is_valid);
    assert_eq!(validation.client_id, client_id);

    let session = f.services.portal.authorize(&issued.token).unwrap();
    assert_eq!(session.client_id, client_id);

    let touched = f.db.with_conn(|conn| access_tokens::list_for_client(conn, &client_id)).unwrap();
    assert!(touched[0].last_accessed_at.is_some());
}

#[tokio::test]
async fn test_expired_and_unknown_tokens_fail_identically() {
    let f = fixture(1024).await;
    let client_id = create_client(&f, "Maple Bakery", None);

    let past = (Utc::now() - Duration::hours(1)).to_rfc3339_opts(SecondsFormat::Micros, true);
    f.db.with_conn(|conn| {
        access_tokens::insert_token(conn, &AccessTokenRow {
            token_hash: hash_token("expired-token"),
            client_id: client_id.clone(),
            roadmap_id: None,
            expires_at: past.clone(),
            last_accessed_at: None,
            created_at: past.clone(),
        })
    })
    .unwrap();

    let expired = f.services.portal.validate_client_token("expired-token").unwrap().unwrap();
    assert!(!expired.is_valid);
    assert!(f.services.portal.validate_client_token("never-issued").unwrap().is_none());

    let expired_err = f.services.portal.authorize("expired-token").unwrap_err();
    let unknown_err = f.services.portal.authorize("never-issued").unwrap_err();
    assert!(matches!(expired_err, CrmError::InvalidToken));
    assert!(matches!(unknown_err, CrmError::InvalidToken));
    assert_eq!(expired_err.to_string(), unknown_err.to_string());
    assert_eq!(expired_err.to_string(), INVALID_TOKEN_MESSAGE);
}

#[tokio::test]
async fn test_revoked_tokens_stop_authorizing() {
    let f = fixture(1024).await;
    let client_id = create_client(&f, "Maple Bakery", None);
    let other_id = create_client(&f, "Other Co", None);

    let first = f.services.portal.issue_token(&client_id, IssueTokenInput::default()).await.unwrap();
    let second = f.services.portal.issue_token(&client_id, IssueTokenInput::default()).await.unwrap();
    let other = f.services.portal.issue_token(&other_id, IssueTokenInput::default()).await.unwrap();

    assert_eq!(f.services.portal.revoke_tokens(&client_id).unwrap(), 2);
    for token in [&first.token, &second.token] {
        assert!(matches!(f.services.portal.authorize(token), Err(CrmError::InvalidToken)));
        assert!(!f.services.portal.validate_client_token(token).unwrap().unwrap().is_valid);
    }
    assert!(f.services.portal.authorize(&other.token).is_ok());

    // Nothing left to revoke
    assert_eq!(f.services.portal.revoke_tokens(&client_id).unwrap(), 0);
    assert!(matches!(f.services.portal.revoke_tokens("missing"), Err(CrmError::NotFound(_))));
}

#[tokio::test]
async fn test_path_outside_session_client_is_permission_denied() {
    let f = fixture(1024).await;
    let mine = create_client(&f, "Mine", None);
    let theirs = create_client(&f, "Theirs", None);

    let session = PortalSession {
        client_id: mine.clone(),
        roadmap_id: None,
    };

    assert!(f.services.portal.authorize_path(&session, &format!("{}/abc-w2.pdf", mine)).is_ok());
    let err = f.services.portal
        .authorize_path(&session, &format!("{}/abc-w2.pdf", theirs))
        .unwrap_err();
    assert!(matches!(err, CrmError::PermissionDenied(_)));

    let err = f.services.portal
        .authorize_path(&session, &format!("{}/../{}/x.pdf", mine, theirs))
        .unwrap_err();
    assert!(matches!(err, CrmError::InvalidInput(_)));
}

#[tokio::test]
async fn test_upload_list_and_signed_download() {
    let f = fixture(1024).await;
    let client_id = create_client(&f, "Maple Bakery", Some("advisor@firm.example"));
    let token = f.services.portal
        .issue_token(&client_id, IssueTokenInput::default())
        .await
        .unwrap()
        .token;
    let session = f.services.portal.authorize(&token).unwrap();

    let doc = f.services.portal
        .upload(&session, "../../w2 2025.pdf", Some("application/pdf".into()), b"%PDF-1.7 test")
        .await
        .unwrap();
    assert!(doc.storage_path.starts_with(&format!("{}/", client_id)));
    assert_eq!(doc.file_name, "w2 2025.pdf");
    assert_eq!(doc.uploaded_by, "client");
    assert_eq!(doc.content_hash, BlobStore::compute_hash(b"%PDF-1.7 test"));

    let listed = f.services.portal.list_documents(&session).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].content_hash, doc.content_hash);

    // Advisor is told about the upload
    let sent = f.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "advisor@firm.example");

    let signed = f.services.portal.signed_download_url(&session, &doc.storage_path).unwrap();
    assert_eq!(signed.expires_in, 300);
    let ticket = ticket_from_url(&signed.url);

    let claims = f.services.portal.verify_download(&ticket).unwrap();
    assert_eq!(claims.sub, client_id);
    assert_eq!(claims.path, doc.storage_path);

    let (meta, bytes) = f.services.portal.download(&ticket).await.unwrap();
    assert_eq!(meta.id, doc.id);
    assert_eq!(bytes, b"%PDF-1.7 test");

    let mut tampered = ticket.clone();
    tampered.push('x');
    assert!(matches!(f.services.portal.verify_download(&tampered), Err(CrmError::InvalidToken)));
}

#[tokio::test]
async fn test_upload_size_limit_and_empty_upload() {
    let f = fixture(8).await;
    let client_id = create_client(&f, "Maple Bakery", None);
    let session = PortalSession {
        client_id,
        roadmap_id: None,
    };

    let err = f.services.portal.upload(&session, "big.bin", None, &[0u8; 9]).await.unwrap_err();
    assert!(matches!(err, CrmError::InvalidInput(_)));
    let err = f.services.portal.upload(&session, "empty.bin", None, &[]).await.unwrap_err();
    assert!(matches!(err, CrmError::InvalidInput(_)));
    assert!(f.services.portal.list_documents(&session).unwrap().is_empty());
}

#[tokio::test]
async fn test_roadmap_token_shows_review_snapshot() {
    let f = fixture(1024).await;
    let client_id = create_client(&f, "Maple Bakery", None);

    let review = f.services.reviews.create_review(&client_id).unwrap();
    f.services.reviews
        .add_review_strategy(&review.id, AddReviewStrategyInput {
            strategy_id: 5,
            status: AssignmentStatus::Active,
            deduction_amount: 8_000.0,
            notes: None,
        })
        .unwrap();

    let scoped = f.services.portal
        .issue_token(&client_id, IssueTokenInput {
            roadmap_id: Some(review.id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    let session = f.services.portal.authorize(&scoped.token).unwrap();
    assert_eq!(session.roadmap_id.as_deref(), Some(review.id.as_str()));

    let view = f.services.portal.roadmap(&session).unwrap();
    assert_eq!(view.quarter.as_deref(), Some(review.quarter.as_str()));
    assert_eq!(view.strategies.len(), 1);
    assert_eq!(view.strategies[0].assignment.strategy_id, 5);
    assert_eq!(view.total_tax_savings, 2_000.0);
    assert_eq!(view.client.name, "Maple Bakery");

    // Without a roadmap: one current row per strategy, the live provisioned
    // row winning over the review snapshot of strategy 5
    let full = f.services.portal.issue_token(&client_id, IssueTokenInput::default()).await.unwrap();
    let full_session = f.services.portal.authorize(&full.token).unwrap();
    let view = f.services.portal.roadmap(&full_session).unwrap();
    assert_eq!(view.quarter, None);
    assert_eq!(view.strategies.len(), 13);
    assert_eq!(view.total_tax_savings, 0.0);
    assert!(!view.onboarding.is_empty());

    // Deleting the review leaves the scoped token with nothing to show
    f.services.reviews.delete_review(&review.id, None).unwrap();
    let view = f.services.portal.roadmap(&session).unwrap();
    assert_eq!(view.quarter, None);
    assert!(view.strategies.is_empty());
    assert_eq!(view.total_tax_savings, 0.0);
}

#[tokio::test]
async fn test_roadmap_must_belong_to_client() {
    let f = fixture(1024).await;
    let a = create_client(&f, "A", None);
    let b = create_client(&f, "B", None);
    let review_b = f.services.reviews.create_review(&b).unwrap();

    let err = f.services.portal
        .issue_token(&a, IssueTokenInput {
            roadmap_id: Some(review_b.id),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::InvalidInput(_)));
}
