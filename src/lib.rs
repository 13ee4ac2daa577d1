//! taxplan-crm - client records and portal for a tax advisory practice
//!
//! Tracks clients, the tax strategies assigned to them by package tier, their
//! onboarding checklist and quarterly reviews, and gives each client a
//! token-gated portal for their roadmap and document uploads.
//!
//! ## Architecture
//!
//! - **Tier policy** (`tier`): which catalog strategies a package reaches
//! - **Catalog** (`catalog`, `benchmarks`): seeded reference data
//! - **Store** (`db`): SQLite, one connection behind a mutex
//! - **Services** (`services`): provisioning, reviews, portal access, catalog import
//! - **HTTP** (`http`): JSON API for the advisor app and the client portal
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/taxplan-crm/
//! ├── crm.db                 # SQLite database
//! ├── documents/             # Client uploads, one directory per client
//! │   └── {client_id}/{uuid}-{file_name}
//! └── config.toml            # Configuration
//! ```

pub mod tier;
pub mod catalog;
pub mod benchmarks;
pub mod config;
pub mod error;
pub mod db;
pub mod blob_store;
pub mod mailer;
pub mod services;
pub mod http;

// Re-exports
pub use blob_store::BlobStore;
pub use config::Config;
pub use db::CrmDb;
pub use error::CrmError;
pub use http::HttpServer;
pub use mailer::{LogMailer, Mailer, WebhookMailer};
pub use services::Services;
pub use tier::PackageTier;
