//! Service layer for taxplan-crm
//!
//! Services encapsulate business logic between HTTP handlers and repositories.
//! Each service wraps database operations with:
//! - Input validation
//! - Cross-entity orchestration (provisioning, copy-forward)
//! - Event emission for audit logging
//! - Transaction boundaries
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (business logic)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod response;
pub mod events;
pub mod provisioning;
pub mod client_service;
pub mod review_service;
pub mod portal;
pub mod catalog_import;

// Re-exports
pub use response::*;
pub use events::{CrmEvent, EventBus, EventListener};
pub use provisioning::{BackfillReport, ProvisionResult, ProvisioningService};
pub use client_service::{AssignmentView, ClientService, ClientSummary, CreatedClient};
pub use review_service::{DeletePlan, ReviewService, DELETE_CONFIRMATION};
pub use portal::{PortalService, PortalSession, TokenValidation};
pub use catalog_import::{CatalogImportService, ImportReport};

use std::sync::Arc;

use crate::blob_store::BlobStore;
use crate::config::Config;
use crate::db::CrmDb;
use crate::mailer::Mailer;

/// Service container for dependency injection
///
/// Holds all services with shared database connection.
/// Pass this to HttpServer for handler access.
pub struct Services {
    pub clients: Arc<ClientService>,
    pub reviews: Arc<ReviewService>,
    pub portal: Arc<PortalService>,
    pub provisioning: Arc<ProvisioningService>,
    pub catalog: Arc<CatalogImportService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with shared database, blob store and mailer
    pub fn new(db: Arc<CrmDb>, blobs: Arc<BlobStore>, mailer: Arc<dyn Mailer>, config: &Config) -> Self {
        let events = Arc::new(EventBus::new());

        Self {
            clients: Arc::new(ClientService::new(db.clone(), events.clone())),
            reviews: Arc::new(ReviewService::new(db.clone(), events.clone())),
            portal: Arc::new(PortalService::new(db.clone(), blobs, mailer, events.clone(), config)),
            provisioning: Arc::new(ProvisioningService::new(db.clone(), events.clone())),
            catalog: Arc::new(CatalogImportService::new(db, events.clone())),
            events,
        }
    }
}
