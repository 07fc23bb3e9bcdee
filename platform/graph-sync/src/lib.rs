//! # Graph Sync
//!
//! Keeps a graph read model of the organization hierarchy in step with
//! domain events.
//!
//! - [`OrganizationConsumer`]: `Organization` nodes and `PARENT_OF` edges
//! - [`EmployeeConsumer`]: `Employee` nodes and `BELONGS_TO` edges
//! - [`GraphStore`]: the graph capability, backed by [`InMemoryGraph`] or
//!   [`HttpCypherGraph`]
//!
//! Consumers are idempotent: node writes are keyed by `(id, tenant_id)` and
//! edges are replaced rather than diffed, so replaying an event converges to
//! the same graph. Each write runs detached under its own timeout
//! (see [`GraphWriter`]).

mod employee;
mod fields;
mod graph;
mod http_graph;
mod memory_graph;
mod organization;
mod outcome;
mod writer;

pub use employee::{EmployeeConsumer, EMPLOYEE_FIELDS, STATUS_TERMINATED};
pub use graph::{GraphKey, GraphNode, GraphStore, LinkStatus, NodeLabel, Properties, Relation};
pub use http_graph::{HttpCypherGraph, HttpGraphConfig};
pub use memory_graph::InMemoryGraph;
pub use organization::{OrganizationConsumer, ORGANIZATION_FIELDS};
pub use outcome::{LinkState, NodeWrite, SyncError, SyncOutcome, SyncResult, SyncState};
pub use writer::{GraphWriter, DEFAULT_WRITE_TIMEOUT};

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("graph {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("graph request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("graph server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("cypher error {code}: {message}")]
    Query { code: String, message: String },

    #[error("unexpected graph response: {0}")]
    Decode(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type GraphResult<T> = Result<T, GraphError>;
