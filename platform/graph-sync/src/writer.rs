//! Detached graph writes
//!
//! Each mutation runs in its own spawned task under its own timeout. Dropping
//! the caller (for example a cancelled event-processing future) does not drop
//! the write; it runs to completion or to its timeout.

use crate::graph::{GraphKey, GraphStore, LinkStatus, NodeLabel, Properties, Relation};
use crate::{GraphError, GraphResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct GraphWriter {
    graph: Arc<dyn GraphStore>,
    timeout: Duration,
}

impl GraphWriter {
    pub fn new(graph: Arc<dyn GraphStore>, timeout: Duration) -> Self {
        Self { graph, timeout }
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn detached<T, F, Fut>(&self, operation: &'static str, write: F) -> GraphResult<T>
    where
        F: FnOnce(Arc<dyn GraphStore>) -> Fut,
        Fut: Future<Output = GraphResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.timeout;
        let fut = write(self.graph.clone());
        let handle = tokio::spawn(async move { tokio::time::timeout(timeout, fut).await });

        match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GraphError::Timeout { operation, timeout }),
            Err(e) => Err(GraphError::Internal(format!(
                "graph {operation} task failed: {e}"
            ))),
        }
    }

    pub async fn upsert(
        &self,
        label: NodeLabel,
        key: GraphKey,
        properties: Properties,
    ) -> GraphResult<()> {
        self.detached("upsert_node", move |graph| async move {
            graph.upsert_node(label, &key, properties).await
        })
        .await
    }

    pub async fn patch(
        &self,
        label: NodeLabel,
        key: GraphKey,
        properties: Properties,
    ) -> GraphResult<u64> {
        self.detached("patch_node", move |graph| async move {
            graph.patch_node(label, &key, properties).await
        })
        .await
    }

    pub async fn delete(&self, label: NodeLabel, key: GraphKey) -> GraphResult<u64> {
        self.detached("delete_node", move |graph| async move {
            graph.delete_node(label, &key).await
        })
        .await
    }

    pub async fn link(
        &self,
        relation: Relation,
        child: GraphKey,
        parent: GraphKey,
    ) -> GraphResult<LinkStatus> {
        self.detached("link_parent", move |graph| async move {
            graph.link_parent(relation, &child, &parent).await
        })
        .await
    }

    pub async fn unlink(&self, relation: Relation, child: GraphKey) -> GraphResult<u64> {
        self.detached("unlink_parent", move |graph| async move {
            graph.unlink_parent(relation, &child).await
        })
        .await
    }
}

impl std::fmt::Debug for GraphWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphWriter")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
