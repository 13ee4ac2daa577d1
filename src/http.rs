//! HTTP API for the CRM
//!
//! ## Advisor API
//! - `GET /health` - status and row counts
//! - `GET|POST /clients` - list (`?tier=&search=&limit=&offset=`) / create with provisioning
//! - `GET|PATCH|DELETE /clients/{id}` - client record
//! - `GET /clients/{id}/summary` - savings totals and onboarding progress
//! - `GET /clients/{id}/strategies`, `PATCH /client-strategies/{id}`
//! - `GET /clients/{id}/onboarding`, `PATCH /client-onboarding/{id}`
//! - `GET|POST /clients/{id}/reviews` - list / create with copy-forward
//! - `GET|PATCH /reviews/{id}`, `DELETE /reviews/{id}?confirm=DELETE`
//! - `GET /reviews/{id}/delete-plan`
//! - `GET|POST /reviews/{id}/strategies`, `GET|POST /reviews/{id}/action-items`
//! - `PATCH|DELETE /action-items/{id}`
//! - `GET /strategies?phase=&max_id=`, `POST /strategies/import`
//! - `POST|DELETE /clients/{id}/access-tokens` - issue a portal link / revoke all
//! - `POST /rpc/validate_client_token`
//! - `POST /admin/backfill`
//!
//! ## Portal API (`Authorization: Bearer <token>`)
//! - `GET /portal/roadmap`
//! - `GET|POST /portal/documents` - list / upload raw body with `?name=`
//! - `GET /portal/documents/url?path=` - signed download URL
//! - `GET /files?ticket=` - download through a signed ticket
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:8095/clients \
//!      -d '{"name": "Acme Dental", "package_tier": "Foundation", "tax_rate": 0.32}'
//!
//! curl -H "Authorization: Bearer $TOKEN" http://localhost:8095/portal/roadmap
//!
//! curl -X POST -H "Authorization: Bearer $TOKEN" -H "Content-Type: application/pdf" \
//!      --data-binary @w2.pdf "http://localhost:8095/portal/documents?name=w2.pdf"
//! ```

use crate::blob_store::BlobStore;
use crate::db::{documents, CrmDb};
use crate::db::clients::{ClientQuery, CreateClientInput, UpdateClientInput};
use crate::db::onboarding::UpdateOnboardingInput;
use crate::db::reviews::{CreateActionItemInput, UpdateReviewInput};
use crate::db::strategies::UpdateAssignmentInput;
use crate::error::CrmError;
use crate::services::portal::{IssueTokenInput, PortalSession};
use crate::services::review_service::AddReviewStrategyInput;
use crate::services::{self, Services};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::http::request::Parts;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Largest JSON request body
const MAX_JSON_BODY: usize = 1024 * 1024;

type HttpResponse = Response<Full<Bytes>>;

/// First path segments the router serves; other methods on these get 405
const ROUTE_ROOTS: &[&str] = &[
    "health",
    "clients",
    "client-strategies",
    "client-onboarding",
    "reviews",
    "action-items",
    "strategies",
    "rpc",
    "admin",
    "portal",
    "files",
];

#[derive(Debug, Default, Deserialize)]
struct StrategyFilter {
    phase: Option<u32>,
    max_id: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteQuery {
    confirm: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionItemPatch {
    completed: bool,
}

#[derive(Debug, Deserialize)]
struct ValidateTokenRequest {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
struct PortalQuery {
    token: Option<String>,
    name: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileQuery {
    ticket: Option<String>,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    db: Arc<CrmDb>,
    blobs: Arc<BlobStore>,
    bind_addr: SocketAddr,
    max_upload_bytes: usize,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(
        services: Arc<Services>,
        db: Arc<CrmDb>,
        blobs: Arc<BlobStore>,
        bind_addr: SocketAddr,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            services,
            db,
            blobs,
            bind_addr,
            max_upload_bytes,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), CrmError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    pub async fn handle_request(&self, req: Request<Incoming>) -> Result<HttpResponse, hyper::Error> {
        let (parts, body) = req.into_parts();
        let method = parts.method.clone();
        let path = parts.uri.path().to_string();
        debug!(method = %method, path = %path, "Incoming request");

        let limit = if path.starts_with("/portal/documents") {
            self.max_upload_bytes
        } else {
            MAX_JSON_BODY
        };
        let body = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!(error = %e, "Rejected request body");
                return Ok(services::bad_request("Request body too large or unreadable"));
            }
        };

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let result = self.route(&method, &segments, &parts, body).await;

        Ok(result.unwrap_or_else(services::error_response))
    }

    async fn route(&self, method: &Method, segments: &[&str], parts: &Parts, body: Bytes) -> services::HandlerResult {
        let svc = &self.services;

        match (method, segments) {
            (&Method::GET, ["health"]) => self.handle_health(),

            // Clients
            (&Method::GET, ["clients"]) => {
                let query: ClientQuery = parse_query(parts)?;
                Ok(services::ok(&svc.clients.list(&query)?))
            }
            (&Method::POST, ["clients"]) => {
                let input: CreateClientInput = parse_json(&body)?;
                Ok(services::created(&svc.clients.create(input)?))
            }
            (&Method::GET, ["clients", id]) => Ok(services::from_option(svc.clients.get(id), "Client not found")),
            (&Method::PATCH, ["clients", id]) => {
                let input: UpdateClientInput = parse_json(&body)?;
                Ok(services::ok(&svc.clients.update(id, input)?))
            }
            (&Method::DELETE, ["clients", id]) => self.handle_delete_client(id).await,
            (&Method::GET, ["clients", id, "summary"]) => Ok(services::ok(&svc.clients.summary(id)?)),

            // Strategy assignments
            (&Method::GET, ["clients", id, "strategies"]) => Ok(services::ok(&svc.clients.strategies(id)?)),
            (&Method::PATCH, ["client-strategies", id]) => {
                let input: UpdateAssignmentInput = parse_json(&body)?;
                Ok(services::ok(&svc.clients.update_assignment(id, input)?))
            }

            // Onboarding
            (&Method::GET, ["clients", id, "onboarding"]) => Ok(services::ok(&svc.clients.onboarding(id)?)),
            (&Method::PATCH, ["client-onboarding", id]) => {
                let input: UpdateOnboardingInput = parse_json(&body)?;
                Ok(services::ok(&svc.clients.update_onboarding(id, input)?))
            }

            // Reviews
            (&Method::GET, ["clients", id, "reviews"]) => Ok(services::ok(&svc.reviews.list(id)?)),
            (&Method::POST, ["clients", id, "reviews"]) => Ok(services::created(&svc.reviews.create_review(id)?)),
            (&Method::GET, ["reviews", id]) => Ok(services::from_option(svc.reviews.get(id), "Review not found")),
            (&Method::PATCH, ["reviews", id]) => {
                let input: UpdateReviewInput = parse_json(&body)?;
                Ok(services::ok(&svc.reviews.update(id, input)?))
            }
            (&Method::GET, ["reviews", id, "delete-plan"]) => Ok(services::ok(&svc.reviews.prepare_delete(id)?)),
            (&Method::DELETE, ["reviews", id]) => {
                let query: DeleteQuery = parse_query(parts)?;
                Ok(services::ok(&svc.reviews.delete_review(id, query.confirm.as_deref())?))
            }
            (&Method::GET, ["reviews", id, "strategies"]) => Ok(services::ok(&svc.reviews.review_strategies(id)?)),
            (&Method::POST, ["reviews", id, "strategies"]) => {
                let input: AddReviewStrategyInput = parse_json(&body)?;
                Ok(services::created(&svc.reviews.add_review_strategy(id, input)?))
            }
            (&Method::GET, ["reviews", id, "action-items"]) => Ok(services::ok(&svc.reviews.action_items(id)?)),
            (&Method::POST, ["reviews", id, "action-items"]) => {
                let input: CreateActionItemInput = parse_json(&body)?;
                Ok(services::created(&svc.reviews.add_action_item(id, input)?))
            }
            (&Method::PATCH, ["action-items", id]) => {
                let input: ActionItemPatch = parse_json(&body)?;
                Ok(services::ok(&svc.reviews.set_action_item_completed(id, input.completed)?))
            }
            (&Method::DELETE, ["action-items", id]) => Ok(services::from_delete_bool_result(
                svc.reviews.delete_action_item(id),
                "Action item not found",
            )),

            // Catalog
            (&Method::GET, ["strategies"]) => {
                let filter: StrategyFilter = parse_query(parts)?;
                Ok(services::ok(&svc.catalog.list(filter.phase, filter.max_id)?))
            }
            (&Method::POST, ["strategies", "import"]) => {
                let payload: serde_json::Value = parse_json(&body)?;
                Ok(services::ok(&svc.catalog.import(&payload)?))
            }

            // Portal tokens
            (&Method::POST, ["clients", id, "access-tokens"]) => {
                let input: IssueTokenInput = parse_json_or_default(&body)?;
                Ok(services::created(&svc.portal.issue_token(id, input).await?))
            }
            (&Method::DELETE, ["clients", id, "access-tokens"]) => {
                let revoked = svc.portal.revoke_tokens(id)?;
                Ok(services::ok(&serde_json::json!({ "revoked": revoked })))
            }
            (&Method::POST, ["rpc", "validate_client_token"]) => {
                let input: ValidateTokenRequest = parse_json(&body)?;
                Ok(services::ok(&svc.portal.validate_client_token(&input.token)?))
            }

            // Admin
            (&Method::POST, ["admin", "backfill"]) => Ok(services::ok(&svc.provisioning.backfill_missing_strategies()?)),

            // Portal
            (&Method::GET, ["portal", "roadmap"]) => {
                let session = self.portal_session(parts)?;
                Ok(services::ok(&svc.portal.roadmap(&session)?))
            }
            (&Method::GET, ["portal", "documents"]) => {
                let session = self.portal_session(parts)?;
                Ok(services::ok(&svc.portal.list_documents(&session)?))
            }
            (&Method::POST, ["portal", "documents"]) => {
                let session = self.portal_session(parts)?;
                let query: PortalQuery = parse_query(parts)?;
                let name = query
                    .name
                    .ok_or_else(|| CrmError::InvalidInput("missing ?name= for upload".into()))?;
                let content_type = parts
                    .headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                Ok(services::created(&svc.portal.upload(&session, &name, content_type, &body).await?))
            }
            (&Method::GET, ["portal", "documents", "url"]) => {
                let session = self.portal_session(parts)?;
                let query: PortalQuery = parse_query(parts)?;
                let path = query
                    .path
                    .ok_or_else(|| CrmError::InvalidInput("missing ?path=".into()))?;
                Ok(services::ok(&svc.portal.signed_download_url(&session, &path)?))
            }
            (&Method::GET, ["files"]) => {
                let query: FileQuery = parse_query(parts)?;
                let ticket = query.ticket.ok_or(CrmError::InvalidToken)?;
                let (doc, data) = svc.portal.download(&ticket).await?;
                let content_type = doc.content_type.as_deref().unwrap_or("application/octet-stream");
                Ok(services::binary_response(StatusCode::OK, content_type, data))
            }

            (_, [root, ..]) if ROUTE_ROOTS.contains(root) => Ok(services::method_not_allowed()),
            _ => Ok(services::not_found("Not found")),
        }
    }

    /// Health check endpoint
    fn handle_health(&self) -> services::HandlerResult {
        let stats = self.db.stats()?;
        Ok(services::ok(&serde_json::json!({
            "status": "ok",
            "clients": stats.client_count,
            "strategies": stats.strategy_count,
            "assignments": stats.assignment_count,
            "reviews": stats.review_count,
            "documents": stats.document_count,
        })))
    }

    /// DELETE /clients/{id} - removes rows, then the client's stored files
    async fn handle_delete_client(&self, id: &str) -> services::HandlerResult {
        let paths: Vec<String> = self
            .db
            .with_conn(|conn| documents::list_documents(conn, id))?
            .into_iter()
            .map(|doc| doc.storage_path)
            .collect();

        if !self.services.clients.delete(id)? {
            return Ok(services::not_found("Client not found"));
        }

        for path in &paths {
            if let Err(e) = self.blobs.delete(path).await {
                warn!(client_id = %id, path = %path, error = %e, "Failed to remove client document");
            }
        }
        Ok(services::no_content())
    }

    /// Session for the token in the Authorization header, or `?token=`
    fn portal_session(&self, parts: &Parts) -> Result<PortalSession, CrmError> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match extract_token_from_header(header_value) {
            Some(token) => token.to_string(),
            None => {
                let query: PortalQuery = parse_query(parts)?;
                query.token.ok_or(CrmError::InvalidToken)?
            }
        };

        self.services.portal.authorize(&token)
    }
}

/// Extract token from Authorization header.
/// Supports "Bearer <token>" format and raw tokens.
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?.trim();
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn parse_query<T: DeserializeOwned>(parts: &Parts) -> Result<T, CrmError> {
    serde_urlencoded::from_str(parts.uri.query().unwrap_or(""))
        .map_err(|e| CrmError::InvalidInput(format!("invalid query string: {}", e)))
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, CrmError> {
    serde_json::from_slice(body).map_err(|e| CrmError::InvalidInput(format!("invalid JSON body: {}", e)))
}

/// Empty bodies deserialize to the type's default
fn parse_json_or_default<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, CrmError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(T::default())
    } else {
        parse_json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_token_from_header(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(Some("abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(Some("Bearer ")), None);
        assert_eq!(extract_token_from_header(None), None);
    }

    #[test]
    fn test_empty_body_uses_default() {
        let input: IssueTokenInput = parse_json_or_default(&Bytes::new()).unwrap();
        assert!(input.roadmap_id.is_none());

        let input: IssueTokenInput = parse_json_or_default(&Bytes::from_static(br#"{"ttl_days": 7}"#)).unwrap();
        assert_eq!(input.ttl_days, Some(7));
    }

    async fn test_server() -> (HttpServer, tempfile::TempDir) {
        let temp = tempfile::TempDir::new().unwrap();
        let config = crate::Config {
            storage_dir: temp.path().to_path_buf(),
            ..crate::Config::default()
        };
        let db = Arc::new(CrmDb::open_in_memory().unwrap());
        let blobs = Arc::new(BlobStore::new(temp.path()).await.unwrap());
        let services = Arc::new(Services::new(db.clone(), blobs.clone(), Arc::new(crate::LogMailer), &config));
        let server = HttpServer::new(services, db, blobs, "127.0.0.1:0".parse().unwrap(), 1024);
        (server, temp)
    }

    async fn status_of(server: &HttpServer, method: Method, uri: &str) -> StatusCode {
        let (parts, ()) = Request::builder().method(method).uri(uri).body(()).unwrap().into_parts();
        let path = parts.uri.path().to_string();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match server.route(&parts.method, &segments, &parts, Bytes::new()).await {
            Ok(resp) => resp.status(),
            Err(e) => services::status_for(&e),
        }
    }

    #[tokio::test]
    async fn test_wrong_method_on_known_paths_is_405() {
        let (server, _temp) = test_server().await;
        for uri in [
            "/action-items/a-1",
            "/client-strategies/s-1",
            "/client-onboarding/o-1",
            "/strategies",
            "/rpc/validate_client_token",
            "/admin/backfill",
            "/files",
        ] {
            assert_eq!(status_of(&server, Method::PUT, uri).await, StatusCode::METHOD_NOT_ALLOWED, "{}", uri);
        }
        assert_eq!(status_of(&server, Method::GET, "/nope").await, StatusCode::NOT_FOUND);
        assert_eq!(status_of(&server, Method::GET, "/health").await, StatusCode::OK);
    }

    #[test]
    fn test_bad_json_is_invalid_input() {
        let err = parse_json::<ActionItemPatch>(&Bytes::from_static(b"{nope")).unwrap_err();
        assert!(matches!(err, CrmError::InvalidInput(_)));
    }
}
