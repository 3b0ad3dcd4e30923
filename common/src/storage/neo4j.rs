//! Neo4j engine for the graph model.
//!
//! Properties go through APOC JSON conversion in both directions, so the server
//! needs the APOC core plugin.
use super::{
    graph::{check_identifier, GraphEdge, GraphNode, GraphStore, StoredNode},
    Selection,
};
use crate::{Error, Result};
use async_trait::async_trait;
use neo4rs::{query, Graph, Query};
use tracing::*;

pub struct Neo4jGraph {
    graph: Graph,
}

impl Neo4jGraph {
    pub async fn connect(uri: &str, username: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, username, password).await?;
        debug!("Connected to Neo4j at {uri}");
        Ok(Self { graph })
    }

    async fn read(&self, query: Query) -> Result<Vec<StoredNode>> {
        let mut rows = self.graph.execute(query).await?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            let json: String = row.get("json").map_err(|e| Error::RowError(e.to_string()))?;
            let mut node: StoredNode = serde_json::from_str(&json)?;
            node.properties.remove("_uid");
            nodes.push(node);
        }
        Ok(nodes)
    }
}

const RETURN_NODE: &str = "
OPTIONAL MATCH (n)-[r]->(t)
WITH n, collect(CASE WHEN r IS NULL THEN null ELSE {relationship: type(r), uid: t._uid} END) AS edges
RETURN apoc.convert.toJson({uid: n._uid, labels: labels(n), properties: properties(n), edges: edges}) AS json";

fn write_node(node: &GraphNode) -> Result<Query> {
    let label = check_identifier(node.label)?;
    let mut cypher = format!(
        "MERGE (n:{label} {{_uid: $uid}}) SET n = apoc.convert.fromJsonMap($properties), n._uid = $uid"
    );
    if let Some(extra) = &node.extra_label {
        cypher.push_str(&format!(" SET n:{}", check_identifier(extra)?));
    }
    let properties = serde_json::to_string(&node.properties)?;
    Ok(query(&cypher)
        .param("uid", node.uid.as_str())
        .param("properties", properties))
}

fn write_edge(label: &str, uid: &str, edge: &GraphEdge) -> Result<Query> {
    let relationship = check_identifier(edge.relationship)?;
    let target = check_identifier(edge.target_label)?;
    let cypher = format!(
        "MATCH (n:{label} {{_uid: $uid}})
MERGE (t:{target} {{_uid: $target}})
MERGE (n)-[:{relationship}]->(t)
WITH n, t
OPTIONAL MATCH (n)-[old:{relationship}]->(other) WHERE other <> t
DELETE old"
    );
    Ok(query(&cypher)
        .param("uid", uid)
        .param("target", edge.target_uid.as_str()))
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    async fn write(&self, node: GraphNode, edges: Vec<GraphEdge>) -> Result<()> {
        let mut queries = vec![write_node(&node)?];
        for edge in &edges {
            queries.push(write_edge(node.label, &node.uid, edge)?);
        }
        let mut txn = self.graph.start_txn().await?;
        for q in queries {
            if let Err(e) = txn.run(q).await {
                warn!(uid = node.uid.as_str(), "Rolling back write of {}: {e}", node.label);
                txn.rollback().await?;
                return Err(e.into());
            }
        }
        txn.commit().await?;
        Ok(())
    }

    async fn find_node(&self, label: &str, uid: &str) -> Result<Option<StoredNode>> {
        let label = check_identifier(label)?;
        let cypher = format!("MATCH (n:{label} {{_uid: $uid}}){RETURN_NODE}");
        let mut nodes = self.read(query(&cypher).param("uid", uid)).await?;
        if nodes.len() > 1 {
            return Err(Error::MoreThanOneRecord(format!("{label} {uid}")));
        }
        Ok(nodes.pop())
    }

    async fn find_nodes(&self, label: &str, selection: Selection) -> Result<Vec<StoredNode>> {
        let label = check_identifier(label)?;
        let filter = match selection {
            Selection::All => String::new(),
            Selection::Unset(property) => format!(" WHERE n.{} IS NULL", check_identifier(property)?),
        };
        let cypher = format!("MATCH (n:{label}){filter} WITH n ORDER BY n._uid{RETURN_NODE}");
        self.read(query(&cypher)).await
    }

    async fn delete_all(&self) -> Result<()> {
        self.graph.run(query("MATCH (n) DETACH DELETE n")).await?;
        Ok(())
    }
}
