//! Handler registration and synchronous dispatch.
//!
//! The registry is built once at startup, then frozen behind an `Arc` and shared
//! read-only by every dispatch path (outbox processor, event bus, CDC consumer).

use crate::{BusError, BusResult, DomainEvent, EventPublisher};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Error returned by an event handler
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// Infrastructure failure (store unreachable, timeout). Safe to retry.
    #[error("retriable: {0}")]
    Retriable(String),

    /// The event itself cannot be applied (malformed payload). Retrying will not help.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, HandlerError::Retriable(_))
    }
}

/// A consumer of domain events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name used in logs and dead-letter records
    fn name(&self) -> &str;

    /// Apply one event. Must be idempotent: the same event may arrive more than once.
    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError>;
}

/// Result of dispatching one event through the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No handler is registered for the event type
    NoHandler,
    /// Every registered handler succeeded
    Handled { handlers: usize },
}

/// A handler failed while dispatching an event
#[derive(Debug, Clone, thiserror::Error)]
#[error("handler '{handler}' failed: {source}")]
pub struct DispatchError {
    pub handler: String,
    #[source]
    pub source: HandlerError,
}

/// Mapping from event type to the handlers subscribed to it
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to an exact event type. Multiple handlers per type are allowed.
    pub fn subscribe(
        &mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        let event_type = event_type.into();
        tracing::debug!(
            event_type = %event_type,
            handler = handler.name(),
            "Handler subscribed"
        );
        self.handlers.entry(event_type).or_default().push(handler);
        self
    }

    /// Subscribe one handler to several event types
    pub fn subscribe_all(&mut self, event_types: &[&str], handler: Arc<dyn EventHandler>) -> &mut Self {
        for event_type in event_types {
            self.subscribe(*event_type, handler.clone());
        }
        self
    }

    pub fn handlers_for(&self, event_type: &str) -> &[Arc<dyn EventHandler>] {
        self.handlers
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_handler(&self, event_type: &str) -> bool {
        !self.handlers_for(event_type).is_empty()
    }

    /// Registered event types, sorted
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Invoke every handler for the event, in registration order.
    ///
    /// Stops at the first failing handler. Handlers that ran before it are not
    /// rolled back; they are idempotent and will see the event again on retry.
    pub async fn dispatch(&self, event: &DomainEvent) -> Result<DispatchOutcome, DispatchError> {
        let handlers = self.handlers_for(event.event_type());
        if handlers.is_empty() {
            return Ok(DispatchOutcome::NoHandler);
        }

        for handler in handlers {
            handler.handle(event).await.map_err(|source| DispatchError {
                handler: handler.name().to_string(),
                source,
            })?;
        }

        Ok(DispatchOutcome::Handled {
            handlers: handlers.len(),
        })
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

/// Publisher that runs handlers inline and reports their failure to the caller.
///
/// Used by producers that own their own retry loop (the CDC consumer), where
/// fire-and-forget delivery would hide failures.
#[derive(Clone)]
pub struct InlineDispatcher {
    registry: Arc<HandlerRegistry>,
}

impl InlineDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl EventPublisher for InlineDispatcher {
    async fn publish(&self, event: DomainEvent) -> BusResult<()> {
        match self.registry.dispatch(&event).await {
            Ok(DispatchOutcome::NoHandler) => {
                tracing::warn!(
                    event_id = %event.event_id(),
                    event_type = %event.event_type(),
                    "No handler subscribed, event dropped"
                );
                Ok(())
            }
            Ok(DispatchOutcome::Handled { .. }) => Ok(()),
            Err(e) => Err(BusError::HandlerFailed {
                event_id: event.event_id(),
                handler: e.handler,
                retriable: e.source.is_retriable(),
                reason: e.source.to_string(),
            }),
        }
    }
}
