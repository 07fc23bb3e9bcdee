//! Graph consumers: idempotency and ordering
//!
//! Validates:
//! 1. Applying the same event twice yields the same graph
//! 2. Updates and deletes for absent nodes are successful no-ops
//! 3. Moves replace the parent edge
//! 4. A write outlives a cancelled caller
//! 5. Update-before-create followed by an in-order replay converges with in-order delivery
//!
//! Run with: cargo test -p graph-sync --test graph_sync_test
//! Live graph: GRAPH_URL=http://localhost:7474 cargo test -p graph-sync -- --ignored

use event_bus::{event_types, DomainEvent, EventHandler, HandlerRegistry};
use graph_sync::{
    EmployeeConsumer, GraphKey, GraphStore, HttpCypherGraph, HttpGraphConfig, InMemoryGraph,
    LinkState, LinkStatus, NodeLabel, NodeWrite, OrganizationConsumer, Properties, Relation,
};
use serde_json::{json, Value};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TENANT: &str = "tenant-1";

fn org_event(event_type: &str, id: &str, payload: Value) -> DomainEvent {
    DomainEvent::new(event_type, event_types::AGGREGATE_ORGANIZATION, id, TENANT, payload)
}

fn emp_event(event_type: &str, id: &str, payload: Value) -> DomainEvent {
    DomainEvent::new(event_type, event_types::AGGREGATE_EMPLOYEE, id, TENANT, payload)
}

fn key(id: &str) -> GraphKey {
    GraphKey::new(id, TENANT)
}

/// TEST 1: Re-delivered create converges to one node and one edge
#[tokio::test]
async fn test_duplicate_create_is_idempotent() {
    let graph = Arc::new(InMemoryGraph::new());
    let consumer = OrganizationConsumer::new(graph.clone(), Duration::from_secs(5));

    consumer
        .apply(&org_event(event_types::ORGANIZATION_CREATED, "org-root", json!({ "name": "HQ" })))
        .await
        .unwrap();
    let create = org_event(
        event_types::ORGANIZATION_CREATED,
        "org-eng",
        json!({ "name": "Engineering", "parent_unit_id": "org-root" }),
    );

    consumer.apply(&create).await.unwrap();
    let first = graph.get_node(NodeLabel::Organization, &key("org-eng")).await.unwrap();
    consumer.apply(&create).await.unwrap();
    let second = graph.get_node(NodeLabel::Organization, &key("org-eng")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(graph.node_count(NodeLabel::Organization).await, 2);
    assert_eq!(graph.edge_count(Relation::ParentOf).await, 1);
}

/// TEST 2: Update before create and delete of a missing node do not fail
#[tokio::test]
async fn test_out_of_order_events_are_noops() {
    let graph = Arc::new(InMemoryGraph::new());
    let consumer = OrganizationConsumer::new(graph.clone(), Duration::from_secs(5));

    let outcome = consumer
        .apply(&org_event(
            event_types::ORGANIZATION_UPDATED,
            "org-late",
            json!({ "changed_fields": { "name": "Renamed" } }),
        ))
        .await
        .unwrap();
    assert_eq!(outcome.node, NodeWrite::Patched { affected: 0 });

    let outcome = consumer
        .apply(&org_event(event_types::ORGANIZATION_DELETED, "org-gone", json!({})))
        .await
        .unwrap();
    assert_eq!(outcome.node, NodeWrite::Deleted { affected: 0 });

    // Through the handler interface both still succeed
    consumer
        .handle(&org_event(event_types::ORGANIZATION_DELETED, "org-gone", json!({})))
        .await
        .unwrap();
    assert_eq!(graph.node_count(NodeLabel::Organization).await, 0);
}

/// TEST 3: Move replaces the parent edge and rewrites the level
#[tokio::test]
async fn test_move_replaces_parent() {
    let graph = Arc::new(InMemoryGraph::new());
    let consumer = OrganizationConsumer::new(graph.clone(), Duration::from_secs(5));

    for (id, payload) in [
        ("org-a", json!({ "level": 1 })),
        ("org-b", json!({ "level": 1 })),
        ("org-c", json!({ "level": 2, "parent_unit_id": "org-a" })),
    ] {
        consumer
            .apply(&org_event(event_types::ORGANIZATION_CREATED, id, payload))
            .await
            .unwrap();
    }

    let outcome = consumer
        .apply(&org_event(
            event_types::ORGANIZATION_MOVED,
            "org-c",
            json!({ "new_parent_id": "org-b", "new_level": 3 }),
        ))
        .await
        .unwrap();

    assert_eq!(outcome.link, LinkState::Linked);
    assert_eq!(
        graph.parent_of(Relation::ParentOf, &key("org-c")).await.unwrap(),
        Some(key("org-b"))
    );
    assert!(graph.children(Relation::ParentOf, &key("org-a")).await.unwrap().is_empty());
    let node = graph
        .get_node(NodeLabel::Organization, &key("org-c"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(node.properties["level"], json!(3));

    // Restructure to the root: edge removed, nothing pending
    let outcome = consumer
        .apply(&org_event(
            event_types::ORGANIZATION_RESTRUCTURED,
            "org-c",
            json!({ "new_parent_id": null, "new_level": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(outcome.link, LinkState::Unlinked { removed: 1 });
    assert!(outcome.is_fully_synced());
    assert_eq!(graph.edge_count(Relation::ParentOf).await, 0);
}

/// TEST 4: Employee created before its organization links on a later update
#[tokio::test]
async fn test_pending_link_completed_later() {
    let graph = Arc::new(InMemoryGraph::new());
    let orgs = OrganizationConsumer::new(graph.clone(), Duration::from_secs(5));
    let employees = EmployeeConsumer::new(graph.clone(), Duration::from_secs(5));

    let outcome = employees
        .apply(&emp_event(
            event_types::EMPLOYEE_CREATED,
            "emp-1",
            json!({ "first_name": "Grace", "organization_id": "org-1" }),
        ))
        .await
        .unwrap();
    assert!(!outcome.is_fully_synced());

    orgs.apply(&org_event(event_types::ORGANIZATION_CREATED, "org-1", json!({})))
        .await
        .unwrap();
    let outcome = employees
        .apply(&emp_event(
            event_types::EMPLOYEE_UPDATED,
            "emp-1",
            json!({ "changed_fields": { "organization_id": "org-1" } }),
        ))
        .await
        .unwrap();

    assert!(outcome.is_fully_synced());
    assert_eq!(
        graph.children(Relation::BelongsTo, &key("org-1")).await.unwrap(),
        vec![key("emp-1")]
    );
}

/// TEST 5: Registry routes each aggregate's events to its consumer
#[tokio::test]
async fn test_registry_dispatch() {
    let graph = Arc::new(InMemoryGraph::new());
    let mut registry = HandlerRegistry::new();
    registry.subscribe_all(
        event_types::ORGANIZATION_EVENT_TYPES,
        Arc::new(OrganizationConsumer::new(graph.clone(), Duration::from_secs(5))),
    );
    registry.subscribe_all(
        event_types::EMPLOYEE_EVENT_TYPES,
        Arc::new(EmployeeConsumer::new(graph.clone(), Duration::from_secs(5))),
    );

    registry
        .dispatch(&org_event(event_types::ORGANIZATION_CREATED, "org-1", json!({})))
        .await
        .unwrap();
    registry
        .dispatch(&emp_event(
            event_types::EMPLOYEE_CREATED,
            "emp-1",
            json!({ "organization_id": "org-1" }),
        ))
        .await
        .unwrap();
    registry
        .dispatch(&emp_event(event_types::EMPLOYEE_TERMINATED, "emp-1", json!({})))
        .await
        .unwrap();

    let emp = graph
        .get_node(NodeLabel::Employee, &key("emp-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(emp.properties["status"], json!("TERMINATED"));
    assert_eq!(graph.edge_count(Relation::BelongsTo).await, 1);
}

/// TEST 6: Cancelling event processing mid-write does not abort the write
#[tokio::test(start_paused = true)]
async fn test_cancelled_handler_still_writes() {
    let graph = Arc::new(InMemoryGraph::new().with_write_delay(Duration::from_secs(3)));
    let consumer = OrganizationConsumer::new(graph.clone(), Duration::from_secs(10));
    let event = org_event(event_types::ORGANIZATION_CREATED, "org-1", json!({ "name": "Ops" }));

    let handling = tokio::time::timeout(Duration::from_secs(1), consumer.handle(&event)).await;
    assert!(handling.is_err());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(graph
        .get_node(NodeLabel::Organization, &key("org-1"))
        .await
        .unwrap()
        .is_some());
}

/// TEST 7: Cypher graph round trip against a live server
#[tokio::test]
#[ignore]
#[serial]
async fn test_http_graph_live() {
    let config = HttpGraphConfig {
        url: std::env::var("GRAPH_URL").unwrap_or_else(|_| "http://localhost:7474".into()),
        user: std::env::var("GRAPH_USER").ok(),
        password: std::env::var("GRAPH_PASSWORD").ok(),
        ..HttpGraphConfig::default()
    };
    let graph = HttpCypherGraph::new(config).unwrap();
    let tenant = Uuid::new_v4().to_string();
    let parent = GraphKey::new("org-parent", tenant.clone());
    let child = GraphKey::new("org-child", tenant.clone());

    let mut props = Properties::new();
    props.insert("name".into(), json!("Parent"));
    props.insert("profile".into(), json!({ "cost_center": "CC-9" }));
    graph.upsert_node(NodeLabel::Organization, &parent, props).await.unwrap();

    assert_eq!(
        graph.link_parent(Relation::ParentOf, &child, &parent).await.unwrap(),
        LinkStatus::ChildMissing
    );
    graph
        .upsert_node(NodeLabel::Organization, &child, Properties::new())
        .await
        .unwrap();
    assert_eq!(
        graph.link_parent(Relation::ParentOf, &child, &parent).await.unwrap(),
        LinkStatus::Linked
    );
    assert_eq!(
        graph.children(Relation::ParentOf, &parent).await.unwrap(),
        vec![child.clone()]
    );

    let mut patch = Properties::new();
    patch.insert("level".into(), json!(2));
    assert_eq!(
        graph.patch_node(NodeLabel::Organization, &child, patch).await.unwrap(),
        1
    );

    assert_eq!(graph.delete_node(NodeLabel::Organization, &parent).await.unwrap(), 1);
    assert_eq!(graph.delete_node(NodeLabel::Organization, &parent).await.unwrap(), 0);
    assert_eq!(graph.unlink_parent(Relation::ParentOf, &child).await.unwrap(), 0);
    assert_eq!(graph.delete_node(NodeLabel::Organization, &child).await.unwrap(), 1);
}

/// TEST 8: Reordered delivery plus in-order replay matches in-order delivery
#[tokio::test]
async fn test_reordered_then_replayed_matches_in_order() {
    let create = org_event(
        event_types::ORGANIZATION_CREATED,
        "org-x",
        json!({ "name": "A", "unit_type": "DEPARTMENT", "level": 2 }),
    );
    let update = org_event(
        event_types::ORGANIZATION_UPDATED,
        "org-x",
        json!({ "changed_fields": { "name": "B" } }),
    );

    let in_order = Arc::new(InMemoryGraph::new());
    let consumer = OrganizationConsumer::new(in_order.clone(), Duration::from_secs(5));
    for event in [&create, &update] {
        consumer.apply(event).await.unwrap();
    }

    let reordered = Arc::new(InMemoryGraph::new());
    let consumer = OrganizationConsumer::new(reordered.clone(), Duration::from_secs(5));
    for event in [&update, &create, &create, &update] {
        consumer.apply(event).await.unwrap();
    }

    let expected = in_order
        .get_node(NodeLabel::Organization, &key("org-x"))
        .await
        .unwrap()
        .unwrap();
    let actual = reordered
        .get_node(NodeLabel::Organization, &key("org-x"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(actual, expected);
    assert_eq!(actual.properties["name"], json!("B"));
    assert_eq!(actual.properties["unit_type"], json!("DEPARTMENT"));
    assert_eq!(reordered.node_count(NodeLabel::Organization).await, 1);
}
