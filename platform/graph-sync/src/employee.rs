//! Employee graph consumer
//!
//! Maintains `Employee` nodes and their `BELONGS_TO` edge to an organization.

use crate::fields::{
    activity, changed_fields, event_stamp, parent_reference, payload_object, pick,
};
use crate::graph::{GraphKey, GraphStore, LinkStatus, NodeLabel, Properties, Relation};
use crate::outcome::{report, LinkState, NodeWrite, SyncOutcome, SyncResult};
use crate::writer::GraphWriter;
use async_trait::async_trait;
use event_bus::{event_types, DomainEvent, EventHandler, HandlerError};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Attributes an update event may change
pub const EMPLOYEE_FIELDS: &[&str] = &[
    "employee_number",
    "first_name",
    "last_name",
    "email",
    "phone",
    "position",
    "hire_date",
    "status",
    "is_active",
];

pub const STATUS_TERMINATED: &str = "TERMINATED";

const ORGANIZATION_FIELD: &str = "organization_id";

#[derive(Debug, Clone)]
pub struct EmployeeConsumer {
    writer: GraphWriter,
}

impl EmployeeConsumer {
    pub fn new(graph: Arc<dyn GraphStore>, write_timeout: Duration) -> Self {
        Self {
            writer: GraphWriter::new(graph, write_timeout),
        }
    }

    pub async fn apply(&self, event: &DomainEvent) -> SyncResult<SyncOutcome> {
        let key = GraphKey::of(event);

        match event.event_type() {
            event_types::EMPLOYEE_CREATED | event_types::EMPLOYEE_HIRED => {
                self.created(event, key).await
            }
            event_types::EMPLOYEE_UPDATED => self.updated(event, key).await,
            event_types::EMPLOYEE_PHONE_UPDATED => {
                let payload = payload_object(event)?;
                self.patch(event, payload, key, pick(payload, &["phone"])).await
            }
            event_types::EMPLOYEE_ACTIVATED => {
                self.patch(event, payload_object(event)?, key, activity(true)).await
            }
            event_types::EMPLOYEE_DEACTIVATED => {
                self.patch(event, payload_object(event)?, key, activity(false)).await
            }
            event_types::EMPLOYEE_TERMINATED => {
                let payload = payload_object(event)?;
                let mut props = pick(payload, &["termination_date", "termination_reason"]);
                props.insert("status".into(), Value::String(STATUS_TERMINATED.into()));
                props.insert("is_active".into(), Value::Bool(false));
                self.patch(event, payload, key, props).await
            }
            event_types::EMPLOYEE_DELETED => {
                let affected = self.writer.delete(NodeLabel::Employee, key).await?;
                Ok(SyncOutcome::node_only(NodeWrite::Deleted { affected }))
            }
            other => {
                tracing::warn!(
                    event_type = %other,
                    event_id = %event.event_id(),
                    "Employee consumer received unsupported event type"
                );
                Ok(SyncOutcome::node_only(NodeWrite::Unchanged))
            }
        }
    }

    async fn created(&self, event: &DomainEvent, key: GraphKey) -> SyncResult<SyncOutcome> {
        let payload = payload_object(event)?;
        let organization = parent_reference(payload, ORGANIZATION_FIELD)?;

        let mut props = payload.clone();
        props.remove(ORGANIZATION_FIELD);
        props.extend(event_stamp(event, payload));
        self.writer
            .upsert(NodeLabel::Employee, key.clone(), props)
            .await?;

        let link = match organization {
            Some(Some(org_id)) => self.link(&key, org_id).await,
            _ => LinkState::NotRequested,
        };
        Ok(SyncOutcome {
            node: NodeWrite::Upserted,
            link,
        })
    }

    async fn updated(&self, event: &DomainEvent, key: GraphKey) -> SyncResult<SyncOutcome> {
        let changes = changed_fields(event)?;
        let props = pick(changes, EMPLOYEE_FIELDS);
        let organization = parent_reference(changes, ORGANIZATION_FIELD)?;

        if props.is_empty() && organization.is_none() {
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
            self.patch(event, changes, key.clone(), props).await?.node
        };

        let link = match organization {
            None => LinkState::NotRequested,
            Some(None) => {
                let removed = self.writer.unlink(Relation::BelongsTo, key).await?;
                LinkState::Unlinked { removed }
            }
            Some(Some(org_id)) => self.link(&key, org_id).await,
        };
        Ok(SyncOutcome { node, link })
    }

    /// Patch the given attributes; nothing to patch is a no-op
    async fn patch(
        &self,
        event: &DomainEvent,
        source: &Map<String, Value>,
        key: GraphKey,
        mut props: Properties,
    ) -> SyncResult<SyncOutcome> {
        if props.is_empty() {
            return Ok(SyncOutcome::node_only(NodeWrite::Unchanged));
        }
        props.extend(event_stamp(event, source));
        let affected = self.writer.patch(NodeLabel::Employee, key, props).await?;
        Ok(SyncOutcome::node_only(NodeWrite::Patched { affected }))
    }

    async fn link(&self, employee: &GraphKey, org_id: String) -> LinkState {
        let organization = employee.sibling(org_id.clone());
        match self
            .writer
            .link(Relation::BelongsTo, employee.clone(), organization)
            .await
        {
            Ok(LinkStatus::Linked) => LinkState::Linked,
            Ok(LinkStatus::ParentMissing) => LinkState::Pending {
                parent_id: org_id,
                reason: "organization not found".into(),
            },
            Ok(LinkStatus::ChildMissing) => LinkState::Pending {
                parent_id: org_id,
                reason: "employee node not found".into(),
            },
            Err(e) => LinkState::Pending {
                parent_id: org_id,
                reason: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl EventHandler for EmployeeConsumer {
    fn name(&self) -> &str {
        "employee_graph_sync"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        let outcome = self.apply(event).await?;
        report(self.name(), event, &outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryGraph;
    use serde_json::json;

    const TENANT: &str = "t1";

    fn setup() -> (Arc<InMemoryGraph>, EmployeeConsumer) {
        let graph = Arc::new(InMemoryGraph::new());
        let consumer = EmployeeConsumer::new(graph.clone(), Duration::from_secs(5));
        (graph, consumer)
    }

    fn event(event_type: &str, id: &str, payload: Value) -> DomainEvent {
        DomainEvent::new(event_type, "employee", id, TENANT, payload)
    }

    async fn props(graph: &InMemoryGraph, id: &str) -> Properties {
        graph
            .get_node(NodeLabel::Employee, &GraphKey::new(id, TENANT))
            .await
            .unwrap()
            .unwrap()
            .properties
    }

    async fn seed_org(graph: &InMemoryGraph, id: &str) {
        graph
            .upsert_node(NodeLabel::Organization, &GraphKey::new(id, TENANT), Properties::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_created_belongs_to_organization() {
        let (graph, consumer) = setup();
        seed_org(&graph, "org-1").await;

        let outcome = consumer
            .apply(&event(
                event_types::EMPLOYEE_CREATED,
                "emp-1",
                json!({ "first_name": "Ada", "organization_id": "org-1" }),
            ))
            .await
            .unwrap();

        assert!(outcome.is_fully_synced());
        assert_eq!(outcome.link, LinkState::Linked);
        assert_eq!(
            graph
                .parent_of(Relation::BelongsTo, &GraphKey::new("emp-1", TENANT))
                .await
                .unwrap(),
            Some(GraphKey::new("org-1", TENANT))
        );
    }

    #[tokio::test]
    async fn test_hired_creates_employee_node() {
        let (graph, consumer) = setup();
        seed_org(&graph, "org-1").await;

        let outcome = consumer
            .apply(&event(
                event_types::EMPLOYEE_HIRED,
                "emp-2",
                json!({ "first_name": "Grace", "organization_id": "org-1" }),
            ))
            .await
            .unwrap();

        assert_eq!(outcome.node, NodeWrite::Upserted);
        assert_eq!(outcome.link, LinkState::Linked);
        assert_eq!(props(&graph, "emp-2").await["first_name"], json!("Grace"));
    }

    #[tokio::test]
    async fn test_update_reassigns_organization() {
        let (graph, consumer) = setup();
        seed_org(&graph, "org-1").await;
        seed_org(&graph, "org-2").await;
        consumer
            .apply(&event(
                event_types::EMPLOYEE_CREATED,
                "emp-1",
                json!({ "organization_id": "org-1" }),
            ))
            .await
            .unwrap();

        let outcome = consumer
            .apply(&event(
                event_types::EMPLOYEE_UPDATED,
                "emp-1",
                json!({ "changed_fields": { "position": "Lead", "organization_id": "org-2" } }),
            ))
            .await
            .unwrap();

        assert_eq!(outcome.node, NodeWrite::Patched { affected: 1 });
        assert_eq!(outcome.link, LinkState::Linked);
        assert_eq!(graph.edge_count(Relation::BelongsTo).await, 1);
        assert_eq!(props(&graph, "emp-1").await["position"], json!("Lead"));
    }

    #[tokio::test]
    async fn test_phone_updated() {
        let (graph, consumer) = setup();
        consumer
            .apply(&event(
                event_types::EMPLOYEE_CREATED,
                "emp-1",
                json!({ "phone": "111", "email": "a@example.com" }),
            ))
            .await
            .unwrap();

        consumer
            .apply(&event(event_types::EMPLOYEE_PHONE_UPDATED, "emp-1", json!({ "phone": "222" })))
            .await
            .unwrap();

        let p = props(&graph, "emp-1").await;
        assert_eq!(p["phone"], json!("222"));
        assert_eq!(p["email"], json!("a@example.com"));

        let outcome = consumer
            .apply(&event(event_types::EMPLOYEE_PHONE_UPDATED, "emp-1", json!({})))
            .await
            .unwrap();
        assert_eq!(outcome.node, NodeWrite::Unchanged);
    }

    #[tokio::test]
    async fn test_terminated_marks_inactive() {
        let (graph, consumer) = setup();
        consumer
            .apply(&event(event_types::EMPLOYEE_CREATED, "emp-1", json!({ "status": "ACTIVE" })))
            .await
            .unwrap();

        consumer
            .apply(&event(
                event_types::EMPLOYEE_TERMINATED,
                "emp-1",
                json!({ "termination_date": "2024-06-30" }),
            ))
            .await
            .unwrap();

        let p = props(&graph, "emp-1").await;
        assert_eq!(p["status"], json!("TERMINATED"));
        assert_eq!(p["is_active"], json!(false));
        assert_eq!(p["termination_date"], json!("2024-06-30"));
    }

    #[tokio::test]
    async fn test_deleted_detaches_from_organization() {
        let (graph, consumer) = setup();
        seed_org(&graph, "org-1").await;
        consumer
            .apply(&event(
                event_types::EMPLOYEE_CREATED,
                "emp-1",
                json!({ "organization_id": "org-1" }),
            ))
            .await
            .unwrap();

        let outcome = consumer
            .apply(&event(event_types::EMPLOYEE_DELETED, "emp-1", json!({})))
            .await
            .unwrap();

        assert_eq!(outcome.node, NodeWrite::Deleted { affected: 1 });
        assert_eq!(graph.edge_count(Relation::BelongsTo).await, 0);
        assert_eq!(graph.node_count(NodeLabel::Organization).await, 1);
    }
}
