//! Organization sync service
//!
//! Wires the graph consumers into one handler registry, shared by the outbox
//! processor and the in-memory bus the CDC consumer publishes to.

pub mod config;
pub mod routes;

use event_bus::{event_types, HandlerRegistry};
use graph_sync::{EmployeeConsumer, GraphStore, OrganizationConsumer};
use std::sync::Arc;
use std::time::Duration;

/// Registry with both graph consumers subscribed to every event type they own
pub fn build_registry(graph: Arc<dyn GraphStore>, write_timeout: Duration) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.subscribe_all(
        event_types::ORGANIZATION_EVENT_TYPES,
        Arc::new(OrganizationConsumer::new(graph.clone(), write_timeout)),
    );
    registry.subscribe_all(
        event_types::EMPLOYEE_EVENT_TYPES,
        Arc::new(EmployeeConsumer::new(graph, write_timeout)),
    );
    registry
}
