//! Result of applying one event to the graph

use crate::GraphError;
use event_bus::{DomainEvent, HandlerError};
use serde::Serialize;

/// What happened to the event's own node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeWrite {
    Upserted,
    /// `affected` is 0 when the node did not exist
    Patched { affected: u64 },
    Deleted { affected: u64 },
    /// No recognized attribute to write
    Unchanged,
}

/// What happened to the node's parent edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkState {
    NotRequested,
    Linked,
    Unlinked { removed: u64 },
    /// Node written, edge not; a later event or replay can complete it
    Pending { parent_id: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    FullySynced,
    LinkPending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub node: NodeWrite,
    pub link: LinkState,
}

impl SyncOutcome {
    pub fn node_only(node: NodeWrite) -> Self {
        Self {
            node,
            link: LinkState::NotRequested,
        }
    }

    pub fn state(&self) -> SyncState {
        match self.link {
            LinkState::Pending { .. } => SyncState::LinkPending,
            _ => SyncState::FullySynced,
        }
    }

    pub fn is_fully_synced(&self) -> bool {
        self.state() == SyncState::FullySynced
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl From<SyncError> for HandlerError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::InvalidPayload(_) => HandlerError::Permanent(e.to_string()),
            SyncError::Graph(_) => HandlerError::Retriable(e.to_string()),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Log what a consumer did with an event; a pending link logs at warn
pub(crate) fn report(consumer: &str, event: &DomainEvent, outcome: &SyncOutcome) {
    match &outcome.link {
        LinkState::Pending { parent_id, reason } => tracing::warn!(
            consumer,
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            aggregate_id = %event.aggregate_id(),
            parent_id = %parent_id,
            reason = %reason,
            "Node synced, parent link pending"
        ),
        link => tracing::debug!(
            consumer,
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            node = ?outcome.node,
            link = ?link,
            "Graph synced"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pending_link_is_not_fully_synced() {
        let outcome = SyncOutcome {
            node: NodeWrite::Upserted,
            link: LinkState::Pending {
                parent_id: "org-p".into(),
                reason: "parent node not found".into(),
            },
        };
        assert_eq!(outcome.state(), SyncState::LinkPending);
        assert!(!outcome.is_fully_synced());
        assert!(SyncOutcome::node_only(NodeWrite::Unchanged).is_fully_synced());
    }

    #[test]
    fn test_error_classification() {
        let err: HandlerError = SyncError::InvalidPayload("not an object".into()).into();
        assert!(!err.is_retriable());

        let err: HandlerError = SyncError::Graph(GraphError::Timeout {
            operation: "patch_node",
            timeout: Duration::from_secs(1),
        })
        .into();
        assert!(err.is_retriable());
    }
}
