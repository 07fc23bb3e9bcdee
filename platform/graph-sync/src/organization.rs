//! Organization graph consumer
//!
//! Maintains `Organization` nodes and the `PARENT_OF` hierarchy from
//! `organization.*` events.

use crate::fields::{
    activity, changed_fields, event_stamp, parent_reference, payload_object, pick,
};
use crate::graph::{GraphKey, GraphStore, LinkStatus, NodeLabel, Properties, Relation};
use crate::outcome::{report, LinkState, NodeWrite, SyncOutcome, SyncResult};
use crate::writer::GraphWriter;
use async_trait::async_trait;
use event_bus::{event_types, DomainEvent, EventHandler, HandlerError};
use std::sync::Arc;
use std::time::Duration;

/// Attributes an update event may change
pub const ORGANIZATION_FIELDS: &[&str] = &[
    "name",
    "unit_type",
    "description",
    "status",
    "is_active",
    "level",
    "profile",
    "employee_count",
];

const PARENT_FIELD: &str = "parent_unit_id";

#[derive(Debug, Clone)]
pub struct OrganizationConsumer {
    writer: GraphWriter,
}

impl OrganizationConsumer {
    pub fn new(graph: Arc<dyn GraphStore>, write_timeout: Duration) -> Self {
        Self {
            writer: GraphWriter::new(graph, write_timeout),
        }
    }

    /// Apply one event to the graph. Event types this consumer does not own
    /// leave the graph untouched.
    pub async fn apply(&self, event: &DomainEvent) -> SyncResult<SyncOutcome> {
        let key = GraphKey::of(event);

        match event.event_type() {
            event_types::ORGANIZATION_CREATED => self.created(event, key).await,
            event_types::ORGANIZATION_UPDATED => self.updated(event, key).await,
            event_types::ORGANIZATION_MOVED | event_types::ORGANIZATION_RESTRUCTURED => {
                self.moved(event, key).await
            }
            event_types::ORGANIZATION_ACTIVATED => self.set_active(event, key, true).await,
            event_types::ORGANIZATION_DEACTIVATED => self.set_active(event, key, false).await,
            event_types::ORGANIZATION_DELETED => {
                let affected = self.writer.delete(NodeLabel::Organization, key).await?;
                Ok(SyncOutcome::node_only(NodeWrite::Deleted { affected }))
            }
            other => {
                tracing::warn!(
                    event_type = %other,
                    event_id = %event.event_id(),
                    "Organization consumer received unsupported event type"
                );
                Ok(SyncOutcome::node_only(NodeWrite::Unchanged))
            }
        }
    }

    async fn created(&self, event: &DomainEvent, key: GraphKey) -> SyncResult<SyncOutcome> {
        let payload = payload_object(event)?;
        let parent = parent_reference(payload, PARENT_FIELD)?;

        let mut props = payload.clone();
        props.remove(PARENT_FIELD);
        props.extend(event_stamp(event, payload));
        self.writer
            .upsert(NodeLabel::Organization, key.clone(), props)
            .await?;

        let link = match parent {
            Some(Some(parent_id)) => self.link(&key, parent_id).await,
            _ => LinkState::NotRequested,
        };
        Ok(SyncOutcome {
            node: NodeWrite::Upserted,
            link,
        })
    }

    async fn updated(&self, event: &DomainEvent, key: GraphKey) -> SyncResult<SyncOutcome> {
        let changes = changed_fields(event)?;
        let mut props = pick(changes, ORGANIZATION_FIELDS);
        let parent = parent_reference(changes, PARENT_FIELD)?;

        if props.is_empty() && parent.is_none() {
            tracing::debug!(
                event_id = %event.event_id(),
                aggregate_id = %event.aggregate_id(),
                "Update carries no recognized fields"
            );
            return Ok(SyncOutcome::node_only(NodeWrite::Unchanged));
        }

        let node = if props.is_empty() {
            NodeWrite::Unchanged
        } else {
            props.extend(event_stamp(event, changes));
            let affected = self
                .writer
                .patch(NodeLabel::Organization, key.clone(), props)
                .await?;
            NodeWrite::Patched { affected }
        };

        let link = match parent {
            None => LinkState::NotRequested,
            Some(None) => {
                let removed = self.writer.unlink(Relation::ParentOf, key).await?;
                LinkState::Unlinked { removed }
            }
            Some(Some(parent_id)) => self.link(&key, parent_id).await,
        };
        Ok(SyncOutcome { node, link })
    }

    /// Re-parent: drop the old edge, rewrite the level, link the new parent
    async fn moved(&self, event: &DomainEvent, key: GraphKey) -> SyncResult<SyncOutcome> {
        let payload = payload_object(event)?;
        let new_parent = match parent_reference(payload, "new_parent_id")? {
            Some(parent) => parent,
            None => parent_reference(payload, PARENT_FIELD)?.flatten(),
        };

        let removed = self
            .writer
            .unlink(Relation::ParentOf, key.clone())
            .await?;

        let mut props = Properties::new();
        if let Some(level) = payload.get("new_level").or_else(|| payload.get("level")) {
            props.insert("level".into(), level.clone());
        }
        props.extend(event_stamp(event, payload));
        let affected = self
            .writer
            .patch(NodeLabel::Organization, key.clone(), props)
            .await?;

        let link = match new_parent {
            Some(parent_id) => self.link(&key, parent_id).await,
            None => LinkState::Unlinked { removed },
        };
        Ok(SyncOutcome {
            node: NodeWrite::Patched { affected },
            link,
        })
    }

    async fn set_active(
        &self,
        event: &DomainEvent,
        key: GraphKey,
        active: bool,
    ) -> SyncResult<SyncOutcome> {
        let payload = payload_object(event)?;
        let mut props = activity(active);
        props.extend(event_stamp(event, payload));
        let affected = self
            .writer
            .patch(NodeLabel::Organization, key, props)
            .await?;
        Ok(SyncOutcome::node_only(NodeWrite::Patched { affected }))
    }

    /// Best-effort: a failed link leaves the node in place with the link pending
    async fn link(&self, child: &GraphKey, parent_id: String) -> LinkState {
        let parent = child.sibling(parent_id.clone());
        match self
            .writer
            .link(Relation::ParentOf, child.clone(), parent)
            .await
        {
            Ok(LinkStatus::Linked) => LinkState::Linked,
            Ok(LinkStatus::ParentMissing) => LinkState::Pending {
                parent_id,
                reason: "parent organization not found".into(),
            },
            Ok(LinkStatus::ChildMissing) => LinkState::Pending {
                parent_id,
                reason: "organization node not found".into(),
            },
            Err(e) => LinkState::Pending {
                parent_id,
                reason: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl EventHandler for OrganizationConsumer {
    fn name(&self) -> &str {
        "organization_graph_sync"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        let outcome = self.apply(event).await?;
        report(self.name(), event, &outcome);
        Ok(())
    }
}
