//! Client portal access gate
//!
//! Clients reach the portal through a magic link carrying an opaque token.
//! The token is the only credential: the client and roadmap it grants are
//! read from the stored token row, never from request input. Unknown and
//! expired tokens fail identically.
//!
//! Documents are addressed by `{client_id}/...` paths. A session may only
//! touch paths whose first segment is its own client. Downloads go through
//! short-lived HS256 tickets so the raw token never appears in file URLs.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::blob_store::{self, BlobStore};
use crate::config::Config;
use crate::db::{self, access_tokens, clients, documents, onboarding, reviews, strategies, CrmDb};
use crate::db::access_tokens::AccessTokenRow;
use crate::db::clients::ClientRow;
use crate::db::documents::ClientDocumentRow;
use crate::db::onboarding::PhaseProgress;
use crate::db::reviews::ReviewRow;
use crate::error::CrmError;
use crate::mailer::{self, Mailer};

use super::client_service::{with_catalog_detail, AssignmentView};
use super::events::{CrmEvent, EventBus};

/// Secret used for download tickets when none is configured (dev mode only)
const DEV_SIGNING_SECRET: &str = "dev-mode-signing-secret-not-for-production";

/// Random bytes in a portal token before hex encoding
const TOKEN_BYTES: usize = 32;

/// Result of looking up a presented token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenValidation {
    pub client_id: String,
    pub roadmap_id: Option<String>,
    pub is_valid: bool,
}

/// Access granted by a valid token
#[derive(Debug, Clone, PartialEq)]
pub struct PortalSession {
    pub client_id: String,
    pub roadmap_id: Option<String>,
}

/// Options for issuing a token
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueTokenInput {
    #[serde(default)]
    pub roadmap_id: Option<String>,
    #[serde(default)]
    pub ttl_days: Option<u32>,
    /// Where to send the magic link; no mail is sent when absent
    #[serde(default)]
    pub email: Option<String>,
}

/// A freshly issued token. The raw token exists only here.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub link: String,
    pub expires_at: String,
    pub emailed: bool,
}

/// Claims inside a download ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadClaims {
    /// Client the ticket was issued to
    pub sub: String,
    pub path: String,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_in: u64,
}

/// The parts of a client record a client may see
#[derive(Debug, Clone, Serialize)]
pub struct PortalClient {
    pub name: String,
    pub entity_type: String,
    pub package_tier: String,
    pub next_review_date: Option<String>,
}

impl From<&ClientRow> for PortalClient {
    fn from(client: &ClientRow) -> Self {
        Self {
            name: client.name.clone(),
            entity_type: client.entity_type.clone(),
            package_tier: client.package_tier.clone(),
            next_review_date: client.next_review_date.clone(),
        }
    }
}

/// What the portal shows a client
#[derive(Debug, Clone, Serialize)]
pub struct RoadmapView {
    pub client: PortalClient,
    pub quarter: Option<String>,
    pub strategies: Vec<AssignmentView>,
    pub onboarding: Vec<PhaseProgress>,
    pub total_deductions: f64,
    pub total_tax_savings: f64,
}

/// sha256 of a token, hex encoded; the only form tokens are stored in
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn unix_now() -> Result<u64, CrmError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| CrmError::Internal(format!("System time error: {}", e)))
}

/// A token is valid strictly before its expiry. Unparseable expiry is expired.
fn is_unexpired(expires_at: &str, now: DateTime<Utc>) -> bool {
    DateTime::parse_from_rfc3339(expires_at)
        .map(|exp| now < exp.with_timezone(&Utc))
        .unwrap_or(false)
}

pub struct PortalService {
    db: Arc<CrmDb>,
    blobs: Arc<BlobStore>,
    mailer: Arc<dyn Mailer>,
    events: Arc<EventBus>,
    signing_secret: String,
    portal_base_url: String,
    mail_from: String,
    token_ttl_days: u32,
    download_url_ttl_secs: u64,
    max_upload_bytes: usize,
}

impl PortalService {
    pub fn new(
        db: Arc<CrmDb>,
        blobs: Arc<BlobStore>,
        mailer: Arc<dyn Mailer>,
        events: Arc<EventBus>,
        config: &Config,
    ) -> Self {
        let signing_secret = if config.signing_secret.is_empty() {
            warn!("No signing secret configured, using dev-mode secret for download tickets");
            DEV_SIGNING_SECRET.to_string()
        } else {
            config.signing_secret.clone()
        };

        Self {
            db,
            blobs,
            mailer,
            events,
            signing_secret,
            portal_base_url: config.portal_base_url.clone(),
            mail_from: config.mail_from.clone(),
            token_ttl_days: config.token_ttl_days,
            download_url_ttl_secs: config.download_url_ttl_secs,
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    /// Issue a portal token for a client and email the magic link when an
    /// address is given. Mail failure does not fail the issue.
    pub async fn issue_token(&self, client_id: &str, input: IssueTokenInput) -> Result<IssuedToken, CrmError> {
        let ttl_days = input.ttl_days.unwrap_or(self.token_ttl_days);
        if ttl_days == 0 {
            return Err(CrmError::InvalidInput("ttl_days must be positive".into()));
        }

        let token = generate_token();
        let now = db::now_timestamp();
        let expires_at = (Utc::now() + Duration::days(i64::from(ttl_days)))
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let client = self.db.with_conn(|conn| {
            let client = clients::get_client(conn, client_id)?
                .ok_or_else(|| CrmError::NotFound(format!("client {}", client_id)))?;

            if let Some(ref roadmap_id) = input.roadmap_id {
                let owned = reviews::get_review(conn, roadmap_id)?
                    .map(|r| r.client_id == client.id)
                    .unwrap_or(false);
                if !owned {
                    return Err(CrmError::InvalidInput(format!(
                        "roadmap {} is not a review of this client",
                        roadmap_id
                    )));
                }
            }

            access_tokens::insert_token(conn, &AccessTokenRow {
                token_hash: hash_token(&token),
                client_id: client.id.clone(),
                roadmap_id: input.roadmap_id.clone(),
                expires_at: expires_at.clone(),
                last_accessed_at: None,
                created_at: now.clone(),
            })?;
            Ok(client)
        })?;

        self.events.emit(CrmEvent::AccessTokenIssued {
            client_id: client.id.clone(),
            expires_at: expires_at.clone(),
        });

        let link = mailer::magic_link_url(&self.portal_base_url, &token);
        let mut emailed = false;
        if let Some(ref to) = input.email {
            let message = mailer::magic_link_message(&self.mail_from, to, &client.name, &link, ttl_days);
            match self.mailer.send(&message).await {
                Ok(()) => emailed = true,
                Err(e) => warn!(client_id = %client.id, error = %e, "Failed to send magic link"),
            }
        }

        Ok(IssuedToken {
            token,
            link,
            expires_at,
            emailed,
        })
    }

    /// Look up a token. Unknown tokens give None; expired ones give
    /// `is_valid: false`.
    pub fn validate_client_token(&self, token: &str) -> Result<Option<TokenValidation>, CrmError> {
        let row = self.db.with_conn(|conn| access_tokens::get_by_hash(conn, &hash_token(token)))?;

        Ok(row.map(|row| TokenValidation {
            is_valid: is_unexpired(&row.expires_at, Utc::now()),
            client_id: row.client_id,
            roadmap_id: row.roadmap_id,
        }))
    }

    /// Expire every outstanding token of a client. Returns how many were live.
    pub fn revoke_tokens(&self, client_id: &str) -> Result<usize, CrmError> {
        let now = db::now_timestamp();
        let revoked = self.db.with_conn(|conn| {
            clients::get_client(conn, client_id)?
                .ok_or_else(|| CrmError::NotFound(format!("client {}", client_id)))?;
            access_tokens::revoke_for_client(conn, client_id, &now)
        })?;

        self.events.emit(CrmEvent::AccessTokensRevoked {
            client_id: client_id.to_string(),
            revoked,
        });
        Ok(revoked)
    }

    /// Turn a presented token into a session, or fail with InvalidToken
    pub fn authorize(&self, token: &str) -> Result<PortalSession, CrmError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CrmError::InvalidToken);
        }

        let token_hash = hash_token(token);
        let row = self.db.with_conn(|conn| access_tokens::get_by_hash(conn, &token_hash))?;
        let row = match row {
            Some(row) if is_unexpired(&row.expires_at, Utc::now()) => row,
            _ => return Err(CrmError::InvalidToken),
        };

        let now = db::now_timestamp();
        if let Err(e) = self.db.with_conn(|conn| access_tokens::touch(conn, &token_hash, &now)) {
            warn!(client_id = %row.client_id, error = %e, "Failed to record portal access");
        }

        self.events.emit(CrmEvent::PortalAccessed {
            client_id: row.client_id.clone(),
        });

        Ok(PortalSession {
            client_id: row.client_id,
            roadmap_id: row.roadmap_id,
        })
    }

    /// A session may only address paths under its own client
    pub fn authorize_path(&self, session: &PortalSession, path: &str) -> Result<(), CrmError> {
        blob_store::validate_relative_path(path)?;
        match blob_store::path_client_id(path) {
            Some(owner) if owner == session.client_id => Ok(()),
            _ => {
                warn!(client_id = %session.client_id, path = %path, "Portal path outside session client");
                Err(CrmError::PermissionDenied("document belongs to another client".into()))
            }
        }
    }

    // =========================================================================
    // Download tickets
    // =========================================================================

    /// Short-lived download URL for one of the session's documents
    pub fn signed_download_url(&self, session: &PortalSession, path: &str) -> Result<SignedUrl, CrmError> {
        self.authorize_path(session, path)?;
        let known = self.db.with_conn(|conn| documents::get_document_by_path(conn, path))?;
        if known.is_none() {
            return Err(CrmError::NotFound(format!("document {}", path)));
        }

        let ticket = self.sign_ticket(&session.client_id, path)?;
        Ok(SignedUrl {
            url: format!(
                "/files?ticket={}",
                url::form_urlencoded::byte_serialize(ticket.as_bytes()).collect::<String>()
            ),
            expires_in: self.download_url_ttl_secs,
        })
    }

    fn sign_ticket(&self, client_id: &str, path: &str) -> Result<String, CrmError> {
        let now = unix_now()?;
        let claims = DownloadClaims {
            sub: client_id.to_string(),
            path: path.to_string(),
            iat: now,
            exp: now + self.download_url_ttl_secs,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.signing_secret.as_bytes()),
        )
        .map_err(|e| CrmError::Internal(format!("Failed to sign download ticket: {}", e)))
    }

    /// Check a ticket's signature and expiry
    pub fn verify_download(&self, ticket: &str) -> Result<DownloadClaims, CrmError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = decode::<DownloadClaims>(
            ticket,
            &DecodingKey::from_secret(self.signing_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| {
            debug!(error = %e, "Rejected download ticket");
            CrmError::InvalidToken
        })?;

        if blob_store::path_client_id(&claims.path) != Some(claims.sub.as_str()) {
            return Err(CrmError::PermissionDenied("ticket path does not match its client".into()));
        }
        Ok(claims)
    }

    /// Resolve a ticket to the document and its bytes
    pub async fn download(&self, ticket: &str) -> Result<(ClientDocumentRow, Vec<u8>), CrmError> {
        let claims = self.verify_download(ticket)?;
        let doc = self.db.with_conn(|conn| documents::get_document_by_path(conn, &claims.path))?
            .ok_or_else(|| CrmError::NotFound(format!("document {}", claims.path)))?;
        let bytes = self.blobs.read(&doc.storage_path).await?;
        Ok((doc, bytes))
    }

    // =========================================================================
    // Portal views
    // =========================================================================

    /// Client summary, strategies, onboarding progress and savings totals.
    /// With a roadmap review on the token, strategies are that review's
    /// snapshot (empty once the review is deleted); otherwise one current
    /// row per strategy.
    pub fn roadmap(&self, session: &PortalSession) -> Result<RoadmapView, CrmError> {
        self.db.with_conn(|conn| {
            let client = clients::get_client(conn, &session.client_id)?
                .ok_or(CrmError::InvalidToken)?;

            let review: Option<ReviewRow> = match session.roadmap_id {
                Some(ref id) => reviews::get_review(conn, id)?
                    .filter(|r| r.client_id == client.id),
                None => None,
            };

            let rows = match (&session.roadmap_id, &review) {
                (_, Some(r)) => strategies::list_review_strategies(conn, &r.id)?,
                // A scoped token never widens to the whole roadmap
                (Some(gone), None) => {
                    warn!(client_id = %client.id, roadmap_id = %gone, "Portal roadmap review no longer exists");
                    Vec::new()
                }
                (None, None) => strategies::list_current_client_strategies(conn, &client.id)?,
            };
            let onboarding_rows = onboarding::list_client_onboarding(conn, &client.id)?;

            let total_deductions = rows.iter().map(|r| r.deduction_amount).sum();
            let total_tax_savings = rows.iter().map(|r| r.tax_savings).sum();

            Ok(RoadmapView {
                client: PortalClient::from(&client),
                quarter: review.map(|r| r.quarter),
                strategies: with_catalog_detail(conn, rows)?,
                onboarding: onboarding::progress_by_phase(&onboarding_rows),
                total_deductions,
                total_tax_savings,
            })
        })
    }

    pub fn list_documents(&self, session: &PortalSession) -> Result<Vec<ClientDocumentRow>, CrmError> {
        self.db.with_conn(|conn| documents::list_documents(conn, &session.client_id))
    }

    /// Store a client upload and notify the advisor
    pub async fn upload(
        &self,
        session: &PortalSession,
        file_name: &str,
        content_type: Option<String>,
        data: &[u8],
    ) -> Result<ClientDocumentRow, CrmError> {
        if data.is_empty() {
            return Err(CrmError::InvalidInput("upload is empty".into()));
        }
        if data.len() > self.max_upload_bytes {
            return Err(CrmError::InvalidInput(format!(
                "upload exceeds {} bytes",
                self.max_upload_bytes
            )));
        }

        let path = BlobStore::document_path(&session.client_id, file_name)?;
        self.authorize_path(session, &path)?;
        let stored = self.blobs.upload(&path, data).await?;

        let doc = ClientDocumentRow {
            id: db::new_id(),
            client_id: session.client_id.clone(),
            storage_path: stored.path,
            file_name: blob_store::sanitize_file_name(file_name)?,
            content_type,
            size_bytes: stored.size_bytes as i64,
            content_hash: stored.hash,
            uploaded_by: "client".to_string(),
            created_at: db::now_timestamp(),
        };

        let inserted = self.db.with_conn(|conn| {
            documents::insert_document(conn, &doc)?;
            clients::get_client(conn, &session.client_id)
        });
        let client = match inserted {
            Ok(client) => client,
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&doc.storage_path).await {
                    warn!(path = %doc.storage_path, error = %cleanup, "Failed to remove orphaned upload");
                }
                return Err(e);
            }
        };

        self.events.emit(CrmEvent::DocumentUploaded {
            client_id: doc.client_id.clone(),
            path: doc.storage_path.clone(),
            uploaded_by: doc.uploaded_by.clone(),
        });

        if let Some(client) = client {
            if let Some(ref advisor) = client.advisor_email {
                let message = mailer::upload_notification_message(&self.mail_from, advisor, &client.name, &doc.file_name);
                if let Err(e) = self.mailer.send(&message).await {
                    warn!(client_id = %client.id, error = %e, "Failed to notify advisor of upload");
                }
            }
        }

        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_hex_sha256() {
        let hash = hash_token("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn test_generated_tokens_are_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let past = (now - Duration::seconds(1)).to_rfc3339_opts(SecondsFormat::Micros, true);
        let future = (now + Duration::days(1)).to_rfc3339_opts(SecondsFormat::Micros, true);
        assert!(!is_unexpired(&past, now));
        assert!(is_unexpired(&future, now));
        assert!(!is_unexpired(&now.to_rfc3339_opts(SecondsFormat::Micros, true), now));
        assert!(!is_unexpired("not a date", now));
    }
}
