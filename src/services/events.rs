//! Event bus for CRM operations
//!
//! Services publish what they changed; listeners use it for audit logging.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Events emitted by services
#[derive(Debug, Clone)]
pub enum CrmEvent {
    ClientCreated {
        id: String,
        name: String,
        package_tier: String,
    },
    ClientUpdated {
        id: String,
    },
    ClientDeleted {
        id: String,
    },
    StrategiesProvisioned {
        client_id: String,
        strategies: usize,
        onboarding_tasks: usize,
    },
    AssignmentUpdated {
        id: String,
        client_id: String,
    },
    ReviewCreated {
        id: String,
        client_id: String,
        quarter: String,
        copied_from: Option<String>,
    },
    ReviewUpdated {
        id: String,
    },
    ReviewDeleted {
        id: String,
        client_id: String,
        was_completed: bool,
    },
    AccessTokenIssued {
        client_id: String,
        expires_at: String,
    },
    AccessTokensRevoked {
        client_id: String,
        revoked: usize,
    },
    PortalAccessed {
        client_id: String,
    },
    DocumentUploaded {
        client_id: String,
        path: String,
        uploaded_by: String,
    },
    CatalogImported {
        inserted: usize,
        updated: usize,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &CrmEvent);
}

/// Event bus for broadcasting CRM events
pub struct EventBus {
    sender: broadcast::Sender<CrmEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: CrmEvent) {
        trace!(event = ?event, "Emitting CRM event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CrmEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Audit trail listener
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &CrmEvent) {
        match event {
            CrmEvent::ClientCreated { id, name, package_tier } => {
                info!(client_id = %id, name = %name, tier = %package_tier, "Client created");
            }
            CrmEvent::ClientDeleted { id } => {
                info!(client_id = %id, "Client deleted");
            }
            CrmEvent::ReviewCreated { id, client_id, quarter, copied_from } => {
                info!(
                    review_id = %id,
                    client_id = %client_id,
                    quarter = %quarter,
                    copied_from = ?copied_from,
                    "Review created"
                );
            }
            CrmEvent::ReviewDeleted { id, client_id, was_completed } => {
                info!(review_id = %id, client_id = %client_id, was_completed, "Review deleted");
            }
            CrmEvent::AccessTokenIssued { client_id, expires_at } => {
                info!(client_id = %client_id, expires_at = %expires_at, "Portal token issued");
            }
            CrmEvent::AccessTokensRevoked { client_id, revoked } => {
                info!(client_id = %client_id, revoked, "Portal tokens revoked");
            }
            CrmEvent::DocumentUploaded { client_id, path, uploaded_by } => {
                info!(client_id = %client_id, path = %path, uploaded_by = %uploaded_by, "Document uploaded");
            }
            _ => {
                trace!(event = ?event, "CRM event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
