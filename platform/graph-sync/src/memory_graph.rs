//! In-process graph for tests and local runs

use crate::graph::{
    with_identity, without_identity, GraphKey, GraphNode, GraphStore, LinkStatus, NodeLabel,
    Properties, Relation,
};
use crate::GraphResult;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Edge {
    relation: Relation,
    child: GraphKey,
    parent: GraphKey,
}

impl Edge {
    fn touches(&self, label: NodeLabel, key: &GraphKey) -> bool {
        (self.relation.child_label() == label && &self.child == key)
            || (self.relation.parent_label() == label && &self.parent == key)
    }
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<(NodeLabel, GraphKey), Properties>,
    edges: BTreeSet<Edge>,
}

#[derive(Debug, Default)]
pub struct InMemoryGraph {
    state: RwLock<GraphState>,
    write_delay: Option<Duration>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a slow backend: every write sleeps first
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub async fn node_count(&self, label: NodeLabel) -> usize {
        self.state
            .read()
            .await
            .nodes
            .keys()
            .filter(|(l, _)| *l == label)
            .count()
    }

    pub async fn edge_count(&self, relation: Relation) -> usize {
        self.state
            .read()
            .await
            .edges
            .iter()
            .filter(|e| e.relation == relation)
            .count()
    }

    async fn delay(&self) {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn upsert_node(
        &self,
        label: NodeLabel,
        key: &GraphKey,
        properties: Properties,
    ) -> GraphResult<()> {
        self.delay().await;
        self.state
            .write()
            .await
            .nodes
            .insert((label, key.clone()), with_identity(key, properties));
        Ok(())
    }

    async fn patch_node(
        &self,
        label: NodeLabel,
        key: &GraphKey,
        properties: Properties,
    ) -> GraphResult<u64> {
        self.delay().await;
        let mut state = self.state.write().await;
        let Some(existing) = state.nodes.get_mut(&(label, key.clone())) else {
            return Ok(0);
        };
        existing.extend(without_identity(properties));
        Ok(1)
    }

    async fn delete_node(&self, label: NodeLabel, key: &GraphKey) -> GraphResult<u64> {
        self.delay().await;
        let mut state = self.state.write().await;
        if state.nodes.remove(&(label, key.clone())).is_none() {
            return Ok(0);
        }
        state.edges.retain(|edge| !edge.touches(label, key));
        Ok(1)
    }

    async fn link_parent(
        &self,
        relation: Relation,
        child: &GraphKey,
        parent: &GraphKey,
    ) -> GraphResult<LinkStatus> {
        self.delay().await;
        let mut state = self.state.write().await;
        if !state
            .nodes
            .contains_key(&(relation.parent_label(), parent.clone()))
        {
            return Ok(LinkStatus::ParentMissing);
        }
        if !state
            .nodes
            .contains_key(&(relation.child_label(), child.clone()))
        {
            return Ok(LinkStatus::ChildMissing);
        }

        state
            .edges
            .retain(|edge| !(edge.relation == relation && &edge.child == child));
        state.edges.insert(Edge {
            relation,
            child: child.clone(),
            parent: parent.clone(),
        });
        Ok(LinkStatus::Linked)
    }

    async fn unlink_parent(&self, relation: Relation, child: &GraphKey) -> GraphResult<u64> {
        self.delay().await;
        let mut state = self.state.write().await;
        let before = state.edges.len();
        state
            .edges
            .retain(|edge| !(edge.relation == relation && &edge.child == child));
        Ok((before - state.edges.len()) as u64)
    }

    async fn get_node(&self, label: NodeLabel, key: &GraphKey) -> GraphResult<Option<GraphNode>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .get(&(label, key.clone()))
            .map(|properties| GraphNode {
                label,
                key: key.clone(),
                properties: properties.clone(),
            }))
    }

    async fn parent_of(&self, relation: Relation, child: &GraphKey) -> GraphResult<Option<GraphKey>> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .iter()
            .find(|edge| edge.relation == relation && &edge.child == child)
            .map(|edge| edge.parent.clone()))
    }

    async fn children(&self, relation: Relation, parent: &GraphKey) -> GraphResult<Vec<GraphKey>> {
        let state = self.state.read().await;
        // BTreeSet iteration is ordered by (relation, child, ..), so ids come out sorted
        Ok(state
            .edges
            .iter()
            .filter(|edge| edge.relation == relation && &edge.parent == parent)
            .map(|edge| edge.child.clone())
            .collect())
    }
}
