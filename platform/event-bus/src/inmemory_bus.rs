//! In-process event bus with asynchronous, bounded dispatch

use crate::{BusError, BusResult, DomainEvent, EventPublisher, HandlerRegistry};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

/// Configuration for the in-memory bus
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Events that may wait in the queue before `publish` applies backpressure
    pub queue_capacity: usize,
    /// Maximum handler tasks running at once
    pub max_in_flight: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            max_in_flight: 32,
        }
    }
}

/// Counters exposed for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BusStats {
    pub published: u64,
    pub dropped_unmatched: u64,
    pub handled: u64,
    pub handler_failures: u64,
}

#[derive(Default)]
struct BusCounters {
    published: AtomicU64,
    dropped_unmatched: AtomicU64,
    handled: AtomicU64,
    handler_failures: AtomicU64,
}

#[derive(Default)]
struct BusState {
    sender: Option<mpsc::Sender<DomainEvent>>,
    dispatcher: Option<JoinHandle<()>>,
}

/// Event bus that fans published events out to type-matched handlers
///
/// `publish` only enqueues; a dispatcher task hands each event to every
/// subscribed handler as a separate task. Delivery is at-least-once from the
/// caller's point of view and unordered across events, so handlers must be
/// idempotent and order-tolerant.
///
/// Handlers are taken from a frozen [`HandlerRegistry`] built at startup.
///
/// # Example
/// ```rust
/// use event_bus::{BusConfig, DomainEvent, HandlerRegistry, InMemoryBus};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = Arc::new(HandlerRegistry::new());
/// let bus = InMemoryBus::new(registry, BusConfig::default());
/// bus.start()?;
///
/// let event = DomainEvent::new(
///     "organization.created",
///     "organization",
///     "org-1",
///     "tenant-1",
///     serde_json::json!({}),
/// );
/// bus.publish(event).await?;
///
/// // Waits for every dispatched handler before returning
/// bus.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct InMemoryBus {
    registry: Arc<HandlerRegistry>,
    config: BusConfig,
    state: Mutex<BusState>,
    counters: Arc<BusCounters>,
}

impl InMemoryBus {
    pub fn new(registry: Arc<HandlerRegistry>, config: BusConfig) -> Self {
        Self {
            registry,
            config,
            state: Mutex::new(BusState::default()),
            counters: Arc::new(BusCounters::default()),
        }
    }

    /// Spawn the dispatcher task. Must be called from within a Tokio runtime.
    pub fn start(&self) -> BusResult<()> {
        let mut state = self.lock_state()?;
        if state.sender.is_some() {
            return Err(BusError::AlreadyRunning);
        }

        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));

        state.dispatcher = Some(tokio::spawn(run_dispatcher(
            self.registry.clone(),
            receiver,
            semaphore,
            self.counters.clone(),
        )));
        state.sender = Some(sender);

        tracing::info!(
            queue_capacity = self.config.queue_capacity,
            max_in_flight = self.config.max_in_flight,
            event_types = ?self.registry.event_types(),
            "Event bus started"
        );
        Ok(())
    }

    /// Stop accepting events, drain the queue, and wait for in-flight handlers.
    ///
    /// Handlers already running are not cancelled, so a slow handler delays shutdown.
    pub async fn stop(&self) {
        let dispatcher = match self.lock_state() {
            Ok(mut state) => {
                // Dropping the sender closes the queue once queued events are consumed
                state.sender.take();
                state.dispatcher.take()
            }
            Err(e) => {
                tracing::error!(error = %e, "Event bus state unavailable during stop");
                None
            }
        };

        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Event bus dispatcher terminated abnormally");
            }
            tracing::info!("Event bus stopped");
        }
    }

    /// `Ok` while the bus accepts events
    pub fn health(&self) -> BusResult<()> {
        let state = self.lock_state()?;
        match (&state.sender, &state.dispatcher) {
            (Some(_), Some(handle)) if !handle.is_finished() => Ok(()),
            _ => Err(BusError::NotRunning),
        }
    }

    /// Hand an event to every handler subscribed to its exact type.
    ///
    /// Returns once the event is queued; handler execution happens later.
    /// Events with no subscriber are dropped with a warning.
    pub async fn publish(&self, event: DomainEvent) -> BusResult<()> {
        event.validate().map_err(BusError::InvalidEvent)?;

        let sender = self
            .lock_state()?
            .sender
            .clone()
            .ok_or(BusError::NotRunning)?;

        if !self.registry.has_handler(event.event_type()) {
            self.counters.dropped_unmatched.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                event_id = %event.event_id(),
                event_type = %event.event_type(),
                "No handler subscribed, event dropped"
            );
            return Ok(());
        }

        sender.send(event).await.map_err(|_| BusError::NotRunning)?;
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Publish events one by one. The first failure aborts the rest of the batch.
    pub async fn publish_batch(&self, events: Vec<DomainEvent>) -> BusResult<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            dropped_unmatched: self.counters.dropped_unmatched.load(Ordering::Relaxed),
            handled: self.counters.handled.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
        }
    }

    fn lock_state(&self) -> BusResult<std::sync::MutexGuard<'_, BusState>> {
        self.state
            .lock()
            .map_err(|_| BusError::InternalError("bus state lock poisoned".to_string()))
    }
}

#[async_trait]
impl EventPublisher for InMemoryBus {
    async fn publish(&self, event: DomainEvent) -> BusResult<()> {
        InMemoryBus::publish(self, event).await
    }
}

async fn run_dispatcher(
    registry: Arc<HandlerRegistry>,
    mut receiver: mpsc::Receiver<DomainEvent>,
    semaphore: Arc<Semaphore>,
    counters: Arc<BusCounters>,
) {
    let mut in_flight = JoinSet::new();

    while let Some(event) = receiver.recv().await {
        for handler in registry.handlers_for(event.event_type()).iter().cloned() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let event = event.clone();
            let counters = counters.clone();
            let span = tracing::info_span!(
                "bus_dispatch",
                event_id = %event.event_id(),
                event_type = %event.event_type(),
                tenant_id = %event.tenant_id(),
                handler = handler.name()
            );

            in_flight.spawn(
                async move {
                    let _permit = permit;
                    match handler.handle(&event).await {
                        Ok(()) => {
                            counters.handled.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(error = %e, "Handler failed on bus dispatch");
                        }
                    }
                }
                .instrument(span),
            );
        }

        // Reap finished tasks so the set stays small
        while let Some(result) = in_flight.try_join_next() {
            if let Err(e) = result {
                tracing::error!(error = %e, "Handler task panicked");
            }
        }
    }

    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Handler task panicked");
        }
    }
}
