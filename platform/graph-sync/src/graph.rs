//! Graph read model capability

use crate::GraphResult;
use async_trait::async_trait;
use event_bus::DomainEvent;
use serde::Serialize;
use serde_json::{Map, Value};

/// Node attributes
pub type Properties = Map<String, Value>;

/// Identity of a node within its label
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GraphKey {
    pub id: String,
    pub tenant_id: String,
}

impl GraphKey {
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
        }
    }

    /// Key of the aggregate an event describes
    pub fn of(event: &DomainEvent) -> Self {
        Self::new(event.aggregate_id(), event.tenant_id())
    }

    /// Another node in the same tenant
    pub fn sibling(&self, id: impl Into<String>) -> Self {
        Self::new(id, self.tenant_id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NodeLabel {
    Organization,
    Employee,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Organization => "Organization",
            NodeLabel::Employee => "Employee",
        }
    }
}

/// Hierarchy relations. Each child has at most one edge per relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Relation {
    /// `(parent:Organization)-[:PARENT_OF]->(child:Organization)`
    ParentOf,
    /// `(child:Employee)-[:BELONGS_TO]->(parent:Organization)`
    BelongsTo,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::ParentOf => "PARENT_OF",
            Relation::BelongsTo => "BELONGS_TO",
        }
    }

    pub fn child_label(&self) -> NodeLabel {
        match self {
            Relation::ParentOf => NodeLabel::Organization,
            Relation::BelongsTo => NodeLabel::Employee,
        }
    }

    pub fn parent_label(&self) -> NodeLabel {
        NodeLabel::Organization
    }
}

/// Stamp the key onto the attribute set so it cannot be overwritten
pub(crate) fn with_identity(key: &GraphKey, mut properties: Properties) -> Properties {
    properties.insert("id".into(), Value::String(key.id.clone()));
    properties.insert("tenant_id".into(), Value::String(key.tenant_id.clone()));
    properties
}

/// Attributes a patch may touch; identity is never rewritten
pub(crate) fn without_identity(mut properties: Properties) -> Properties {
    properties.remove("id");
    properties.remove("tenant_id");
    properties
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub label: NodeLabel,
    pub key: GraphKey,
    pub properties: Properties,
}

/// Result of attaching a child to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Linked,
    /// Parent node does not exist (yet); nothing was changed
    ParentMissing,
    /// Child node does not exist; nothing was changed
    ChildMissing,
}

/// Write and read operations the sync consumers need from a graph store.
///
/// Every write is keyed by `(label, id, tenant_id)` and safe to repeat.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the node or replace its whole attribute set
    async fn upsert_node(
        &self,
        label: NodeLabel,
        key: &GraphKey,
        properties: Properties,
    ) -> GraphResult<()>;

    /// Overwrite only the given attributes. Returns 0 when the node does not exist.
    async fn patch_node(
        &self,
        label: NodeLabel,
        key: &GraphKey,
        properties: Properties,
    ) -> GraphResult<u64>;

    /// Remove the node and every relationship touching it. Returns the number of
    /// nodes removed; 0 for an absent node.
    async fn delete_node(&self, label: NodeLabel, key: &GraphKey) -> GraphResult<u64>;

    /// Replace the child's edge of `relation` with one to `parent`
    async fn link_parent(
        &self,
        relation: Relation,
        child: &GraphKey,
        parent: &GraphKey,
    ) -> GraphResult<LinkStatus>;

    /// Remove the child's edge of `relation`, if any. Returns edges removed.
    async fn unlink_parent(&self, relation: Relation, child: &GraphKey) -> GraphResult<u64>;

    async fn get_node(&self, label: NodeLabel, key: &GraphKey) -> GraphResult<Option<GraphNode>>;

    /// Parent of `child` along `relation`
    async fn parent_of(&self, relation: Relation, child: &GraphKey) -> GraphResult<Option<GraphKey>>;

    /// Children of `parent` along `relation`, sorted by id
    async fn children(&self, relation: Relation, parent: &GraphKey) -> GraphResult<Vec<GraphKey>>;
}
