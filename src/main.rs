//! taxplan-crm daemon
//!
//! Serves the advisor API and the client portal over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (dev mode allows an empty signing secret)
//! taxplan-crm --dev
//!
//! # Start with custom config
//! taxplan-crm --config /path/to/config.toml
//!
//! # Production: secret from the environment, mail through a relay
//! TAXPLAN_SIGNING_SECRET=... taxplan-crm --mail-relay-url https://relay.internal/send
//!
//! # Provision strategies for clients that have none, then exit
//! taxplan-crm --backfill
//! ```

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use taxplan_crm::services::events::spawn_logging_listener;
use taxplan_crm::{BlobStore, Config, CrmDb, HttpServer, LogMailer, Mailer, Services, WebhookMailer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "taxplan-crm")]
#[command(about = "Client records and portal for a tax advisory practice")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "TAXPLAN_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory (database and documents)
    #[arg(long, env = "TAXPLAN_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "TAXPLAN_HTTP_PORT")]
    http_port: Option<u16>,

    /// Secret for signing download tickets (at least 32 characters)
    #[arg(long, env = "TAXPLAN_SIGNING_SECRET", hide_env_values = true)]
    signing_secret: Option<String>,

    /// HTTP mail relay; mail is only logged when unset
    #[arg(long, env = "TAXPLAN_MAIL_RELAY_URL")]
    mail_relay_url: Option<String>,

    /// Run the strategy backfill sweep and exit
    #[arg(long)]
    backfill: bool,

    /// Emit logs as JSON
    #[arg(long, env = "TAXPLAN_LOG_JSON")]
    log_json: bool,

    /// Dev mode (allows a missing signing secret)
    #[arg(long, env = "TAXPLAN_DEV_MODE")]
    dev: bool,
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("taxplan_crm=info".parse()?);
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(args.log_json)?;

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(secret) = args.signing_secret {
        config.signing_secret = secret;
    }
    if let Some(relay) = args.mail_relay_url {
        config.mail_relay_url = Some(relay);
    }

    config.validate(args.dev)?;
    if args.dev {
        warn!("Running in dev mode");
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        "Starting taxplan-crm"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist. The signing secret is not written out.
    let config_path = config.config_path();
    if !config_path.exists() {
        let on_disk = Config {
            signing_secret: String::new(),
            ..config.clone()
        };
        on_disk.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(CrmDb::open(&config.storage_dir)?);
    let blobs = Arc::new(BlobStore::new(&config.storage_dir).await?);

    let mailer: Arc<dyn Mailer> = match config.mail_relay_url {
        Some(ref url) => {
            info!(relay = %url, "Mail delivery via relay");
            Arc::new(WebhookMailer::new(url.clone()))
        }
        None => {
            info!("No mail relay configured, outbound mail will be logged only");
            Arc::new(LogMailer)
        }
    };

    let services = Arc::new(Services::new(db.clone(), blobs.clone(), mailer, &config));
    let listener_handle = spawn_logging_listener(services.events.clone());

    if args.backfill {
        let report = services.provisioning.backfill_missing_strategies()?;
        info!(
            scanned = report.clients_scanned,
            provisioned = report.clients_provisioned,
            failures = report.failures.len(),
            "Backfill complete"
        );
        listener_handle.abort();
        return Ok(());
    }

    let http_addr: SocketAddr = format!("{}:{}", config.bind_address, config.http_port)
        .parse()
        .context("invalid bind address")?;
    let http_server = Arc::new(HttpServer::new(
        services.clone(),
        db.clone(),
        blobs,
        http_addr,
        config.max_upload_bytes,
    ));

    info!("HTTP API available at http://{}", http_addr);
    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    listener_handle.abort();

    if let Ok(stats) = db.stats() {
        info!(
            clients = stats.client_count,
            reviews = stats.review_count,
            documents = stats.document_count,
            "Final database stats"
        );
    }

    Ok(())
}
