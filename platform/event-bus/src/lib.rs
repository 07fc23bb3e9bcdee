//! # Event Bus
//!
//! Shared event plumbing for the organization sync pipeline.
//!
//! ## Contents
//!
//! - **DomainEvent**: Immutable, versioned envelope for one aggregate change
//! - **HandlerRegistry**: `event_type` → handlers, built once at startup and shared read-only
//! - **InMemoryBus**: In-process publish/subscribe router with bounded async dispatch
//! - **InlineDispatcher**: Synchronous dispatch through the same registry
//! - **retry_with_backoff**: Exponential backoff helper for unreliable transports
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use event_bus::{BusConfig, DomainEvent, EventHandler, HandlerError, HandlerRegistry, InMemoryBus};
//! use std::sync::Arc;
//!
//! struct AuditLog;
//!
//! #[async_trait]
//! impl EventHandler for AuditLog {
//!     fn name(&self) -> &str {
//!         "audit_log"
//!     }
//!
//!     async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
//!         println!("{} {}", event.event_type(), event.aggregate_id());
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = HandlerRegistry::new();
//! registry.subscribe("organization.created", Arc::new(AuditLog));
//!
//! let bus = InMemoryBus::new(Arc::new(registry), BusConfig::default());
//! bus.start()?;
//! bus.publish(DomainEvent::new(
//!     "organization.created",
//!     "organization",
//!     "org-1",
//!     "tenant-1",
//!     serde_json::json!({ "name": "Engineering" }),
//! ))
//! .await?;
//! bus.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod consumer_retry;
mod envelope;
pub mod event_types;
mod handler;
mod inmemory_bus;

pub use consumer_retry::{retry_with_backoff, retry_with_backoff_if, RetryConfig};
pub use envelope::{validate_envelope_fields, DomainEvent};
pub use handler::{
    DispatchError, DispatchOutcome, EventHandler, HandlerError, HandlerRegistry, InlineDispatcher,
};
pub use inmemory_bus::{BusConfig, BusStats, InMemoryBus};

use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event bus is not running")]
    NotRunning,

    #[error("event bus is already running")]
    AlreadyRunning,

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("handler '{handler}' failed for event {event_id}: {reason}")]
    HandlerFailed {
        event_id: Uuid,
        handler: String,
        retriable: bool,
        reason: String,
    },

    #[error("internal error: {0}")]
    InternalError(String),
}

impl BusError {
    /// Whether retrying the same publish may succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            BusError::HandlerFailed { retriable, .. } => *retriable,
            BusError::InvalidEvent(_) => false,
            BusError::NotRunning | BusError::AlreadyRunning | BusError::InternalError(_) => true,
        }
    }
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Anything domain events can be handed to
///
/// Implemented by [`InMemoryBus`] (fire-and-forget) and [`InlineDispatcher`]
/// (handlers run before `publish` returns).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> BusResult<()>;
}

impl fmt::Debug for dyn EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventPublisher")
    }
}
