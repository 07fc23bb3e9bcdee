//! Graph store over the Neo4j HTTP transactional endpoint
//!
//! Every operation is a single `POST {url}/db/{database}/tx/commit`, so the
//! statements it carries commit or roll back together.

use crate::graph::{
    with_identity, without_identity, GraphKey, GraphNode, GraphStore, LinkStatus, NodeLabel,
    Properties, Relation,
};
use crate::{GraphError, GraphResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Connection settings for [`HttpCypherGraph`]
#[derive(Debug, Clone)]
pub struct HttpGraphConfig {
    /// Base URL, e.g. `http://localhost:7474`
    pub url: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub request_timeout: Duration,
}

impl Default for HttpGraphConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7474".to_string(),
            database: "neo4j".to_string(),
            user: None,
            password: None,
            request_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Serialize)]
struct Statement {
    statement: String,
    parameters: Value,
}

impl Statement {
    fn new(statement: String, parameters: Value) -> Self {
        Self {
            statement,
            parameters,
        }
    }
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    statements: &'a [Statement],
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<CypherError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    data: Vec<ResultRow>,
}

#[derive(Debug, Deserialize)]
struct ResultRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CypherError {
    code: String,
    message: String,
}

/// Node pattern matching one node by key
fn node(var: &str, label: NodeLabel, id_param: &str) -> String {
    format!(
        "({var}:{} {{id: ${id_param}, tenant_id: $tenant_id}})",
        label.as_str()
    )
}

/// Edge pattern oriented the way `relation` is stored
fn edge(relation: Relation, child: &str, parent: &str, rel_var: &str) -> String {
    match relation {
        Relation::ParentOf => format!("{parent}-[{rel_var}:PARENT_OF]->{child}"),
        Relation::BelongsTo => format!("{child}-[{rel_var}:BELONGS_TO]->{parent}"),
    }
}

/// Neo4j properties hold scalars and scalar lists only; nested values are
/// stored as JSON text.
fn storable(properties: Properties) -> Properties {
    properties
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::Object(_) => Value::String(value.to_string()),
                Value::Array(ref items) if items.iter().any(|v| v.is_object() || v.is_array()) => {
                    Value::String(value.to_string())
                }
                other => other,
            };
            (name, value)
        })
        .collect()
}

fn first_count(results: &[StatementResult], index: usize) -> GraphResult<u64> {
    results
        .get(index)
        .and_then(|r| r.data.first())
        .and_then(|row| row.row.first())
        .and_then(Value::as_u64)
        .ok_or_else(|| GraphError::Decode(format!("statement {index} returned no count")))
}

pub struct HttpCypherGraph {
    config: HttpGraphConfig,
    http_client: Client,
}

impl HttpCypherGraph {
    pub fn new(config: HttpGraphConfig) -> GraphResult<Self> {
        let http_client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &HttpGraphConfig {
        &self.config
    }

    fn commit_url(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.config.url.trim_end_matches('/'),
            self.config.database
        )
    }

    async fn run(&self, statements: &[Statement]) -> GraphResult<Vec<StatementResult>> {
        let mut request = self
            .http_client
            .post(self.commit_url())
            .json(&CommitRequest { statements });

        if let Some(user) = &self.config.user {
            request = request.basic_auth(user, self.config.password.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(GraphError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: CommitResponse = response.json().await?;
        if let Some(error) = body.errors.into_iter().next() {
            return Err(GraphError::Query {
                code: error.code,
                message: error.message,
            });
        }
        Ok(body.results)
    }

    async fn count(&self, statement: String, parameters: Value) -> GraphResult<u64> {
        let results = self.run(&[Statement::new(statement, parameters)]).await?;
        first_count(&results, 0)
    }
}

#[async_trait]
impl GraphStore for HttpCypherGraph {
    async fn upsert_node(
        &self,
        label: NodeLabel,
        key: &GraphKey,
        properties: Properties,
    ) -> GraphResult<()> {
        let statement = format!(
            "MERGE {} SET n = $props RETURN count(n)",
            node("n", label, "id")
        );
        let props = storable(with_identity(key, properties));
        self.count(
            statement,
            json!({ "id": key.id, "tenant_id": key.tenant_id, "props": props }),
        )
        .await
        .map(|_| ())
    }

    async fn patch_node(
        &self,
        label: NodeLabel,
        key: &GraphKey,
        properties: Properties,
    ) -> GraphResult<u64> {
        let statement = format!(
            "OPTIONAL MATCH {} SET n += $props RETURN count(n)",
            node("n", label, "id")
        );
        let props = storable(without_identity(properties));
        self.count(
            statement,
            json!({ "id": key.id, "tenant_id": key.tenant_id, "props": props }),
        )
        .await
    }

    async fn delete_node(&self, label: NodeLabel, key: &GraphKey) -> GraphResult<u64> {
        let statement = format!(
            "OPTIONAL MATCH {} WITH n, count(n) AS found DETACH DELETE n RETURN sum(found)",
            node("n", label, "id")
        );
        self.count(statement, json!({ "id": key.id, "tenant_id": key.tenant_id }))
            .await
    }

    async fn link_parent(
        &self,
        relation: Relation,
        child: &GraphKey,
        parent: &GraphKey,
    ) -> GraphResult<LinkStatus> {
        let child_node = node("c", relation.child_label(), "child_id");
        let parent_node = node("p", relation.parent_label(), "parent_id");
        let parameters = json!({
            "child_id": child.id,
            "parent_id": parent.id,
            "tenant_id": child.tenant_id,
        });

        let probe = format!(
            "OPTIONAL MATCH {parent_node} OPTIONAL MATCH {child_node} \
             RETURN p IS NOT NULL, c IS NOT NULL"
        );
        // Matches nothing, and so changes nothing, unless both endpoints exist
        let relink = format!(
            "MATCH {parent_node} MATCH {child_node} \
             OPTIONAL MATCH {} DELETE old \
             WITH DISTINCT c, p MERGE {} RETURN count(*)",
            edge(relation, "(c)", &format!("(:{})", relation.parent_label().as_str()), "old"),
            edge(relation, "(c)", "(p)", ""),
        );

        let results = self
            .run(&[
                Statement::new(probe, parameters.clone()),
                Statement::new(relink, parameters),
            ])
            .await?;

        let flags = results
            .first()
            .and_then(|r| r.data.first())
            .map(|row| row.row.as_slice())
            .ok_or_else(|| GraphError::Decode("link probe returned no row".into()))?;
        let parent_exists = flags.first().and_then(Value::as_bool).unwrap_or(false);
        let child_exists = flags.get(1).and_then(Value::as_bool).unwrap_or(false);

        Ok(match (parent_exists, child_exists) {
            (false, _) => LinkStatus::ParentMissing,
            (true, false) => LinkStatus::ChildMissing,
            (true, true) => LinkStatus::Linked,
        })
    }

    async fn unlink_parent(&self, relation: Relation, child: &GraphKey) -> GraphResult<u64> {
        let statement = format!(
            "OPTIONAL MATCH {} WITH r, count(r) AS found DELETE r RETURN sum(found)",
            edge(
                relation,
                &node("c", relation.child_label(), "id"),
                &format!("(:{})", relation.parent_label().as_str()),
                "r"
            ),
        );
        self.count(statement, json!({ "id": child.id, "tenant_id": child.tenant_id }))
            .await
    }

    async fn get_node(&self, label: NodeLabel, key: &GraphKey) -> GraphResult<Option<GraphNode>> {
        let statement = format!("MATCH {} RETURN properties(n)", node("n", label, "id"));
        let results = self
            .run(&[Statement::new(
                statement,
                json!({ "id": key.id, "tenant_id": key.tenant_id }),
            )])
            .await?;

        let properties = results
            .into_iter()
            .next()
            .and_then(|r| r.data.into_iter().next())
            .and_then(|row| row.row.into_iter().next());

        match properties {
            None => Ok(None),
            Some(Value::Object(properties)) => Ok(Some(GraphNode {
                label,
                key: key.clone(),
                properties,
            })),
            Some(other) => Err(GraphError::Decode(format!(
                "expected node properties, got {other}"
            ))),
        }
    }

    async fn parent_of(&self, relation: Relation, child: &GraphKey) -> GraphResult<Option<GraphKey>> {
        let statement = format!(
            "MATCH {} RETURN p.id LIMIT 1",
            edge(
                relation,
                &node("c", relation.child_label(), "id"),
                &format!("(p:{})", relation.parent_label().as_str()),
                ""
            ),
        );
        let results = self
            .run(&[Statement::new(
                statement,
                json!({ "id": child.id, "tenant_id": child.tenant_id }),
            )])
            .await?;

        Ok(results
            .first()
            .and_then(|r| r.data.first())
            .and_then(|row| row.row.first())
            .and_then(Value::as_str)
            .map(|id| child.sibling(id)))
    }

    async fn children(&self, relation: Relation, parent: &GraphKey) -> GraphResult<Vec<GraphKey>> {
        let statement = format!(
            "MATCH {} RETURN c.id ORDER BY c.id",
            edge(
                relation,
                &format!("(c:{} {{tenant_id: $tenant_id}})", relation.child_label().as_str()),
                &node("p", relation.parent_label(), "id"),
                ""
            ),
        );
        let results = self
            .run(&[Statement::new(
                statement,
                json!({ "id": parent.id, "tenant_id": parent.tenant_id }),
            )])
            .await?;

        Ok(results
            .first()
            .map(|r| {
                r.data
                    .iter()
                    .filter_map(|row| row.row.first().and_then(Value::as_str))
                    .map(|id| parent.sibling(id))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_orientation() {
        assert_eq!(
            edge(Relation::ParentOf, "(c)", "(p)", ""),
            "(p)-[:PARENT_OF]->(c)"
        );
        assert_eq!(
            edge(Relation::BelongsTo, "(c)", "(p)", "r"),
            "(c)-[r:BELONGS_TO]->(p)"
        );
    }

    #[test]
    fn test_node_pattern_is_keyed_by_tenant() {
        assert_eq!(
            node("n", NodeLabel::Employee, "id"),
            "(n:Employee {id: $id, tenant_id: $tenant_id})"
        );
    }

    #[test]
    fn test_nested_values_stored_as_text() {
        let props = json!({
            "name": "Engineering",
            "level": 2,
            "profile": { "cost_center": "CC-1" },
            "tags": ["a", "b"],
        })
        .as_object()
        .cloned()
        .unwrap();

        let stored = storable(props);
        assert_eq!(stored["name"], json!("Engineering"));
        assert_eq!(stored["level"], json!(2));
        assert_eq!(stored["profile"], json!(r#"{"cost_center":"CC-1"}"#));
        assert_eq!(stored["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_commit_url() {
        let graph = HttpCypherGraph::new(HttpGraphConfig {
            url: "http://graph:7474/".into(),
            database: "hr".into(),
            ..HttpGraphConfig::default()
        })
        .unwrap();
        assert_eq!(graph.commit_url(), "http://graph:7474/db/hr/tx/commit");
    }

    #[test]
    fn test_response_errors_decoded() {
        let body: CommitResponse = serde_json::from_value(json!({
            "results": [],
            "errors": [{ "code": "Neo.ClientError.Statement.SyntaxError", "message": "bad" }]
        }))
        .unwrap();
        assert_eq!(body.errors.len(), 1);
        assert_eq!(body.errors[0].code, "Neo.ClientError.Statement.SyntaxError");
    }

    #[test]
    fn test_first_count_reads_single_cell() {
        let body: CommitResponse = serde_json::from_value(json!({
            "results": [{ "columns": ["count(n)"], "data": [{ "row": [1], "meta": [null] }] }],
            "errors": []
        }))
        .unwrap();
        assert_eq!(first_count(&body.results, 0).unwrap(), 1);
        assert!(first_count(&body.results, 1).is_err());
    }
}
