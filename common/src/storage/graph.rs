//! Graph model: one node label per family, one relationship type per link.
//!
//! Writing an entity merges its node, replaces its properties and merges every
//! linked target as a stub node if it does not exist yet. A node has at most one
//! outgoing relationship of each type: writing a link to a new target removes
//! the edge to the previous one.
use super::{Backend, Selection};
use crate::{
    entities::{Family, Record},
    Error, Result,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

/// Node written by one transaction
#[derive(Clone, Debug, PartialEq)]
pub struct GraphNode {
    pub label: &'static str,
    /// Concrete type label, when it differs from the family label
    pub extra_label: Option<String>,
    pub uid: String,
    pub properties: Map<String, Value>,
}

/// Outgoing relationship of a written node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphEdge {
    pub relationship: &'static str,
    pub target_label: &'static str,
    pub target_uid: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct StoredEdge {
    pub relationship: String,
    pub uid: String,
}

/// A node as read back, with its outgoing relationships
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct StoredNode {
    pub uid: String,
    pub labels: Vec<String>,
    /// Without the `_uid` key
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub edges: Vec<StoredEdge>,
}

/// A graph database engine
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Writes the node and its edges in one transaction
    async fn write(&self, node: GraphNode, edges: Vec<GraphEdge>) -> Result<()>;
    async fn find_node(&self, label: &str, uid: &str) -> Result<Option<StoredNode>>;
    async fn find_nodes(&self, label: &str, selection: Selection) -> Result<Vec<StoredNode>>;
    async fn delete_all(&self) -> Result<()>;
}

/// Labels, relationship types and property names are interpolated into queries
pub fn check_identifier(identifier: &str) -> Result<&str> {
    if !identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(identifier)
    } else {
        Err(Error::InvalidGraphIdentifier(identifier.to_string()))
    }
}

pub struct GraphBackend<S> {
    store: S,
}

impl<S: GraphStore> GraphBackend<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Stub nodes have no properties and are not entities yet
    fn to_record(family: Family, node: StoredNode) -> Option<Record> {
        if node.properties.is_empty() {
            return None;
        }
        let kind = node
            .labels
            .iter()
            .find(|label| label.as_str() != family.label())
            .cloned()
            .unwrap_or_else(|| family.label().to_string());
        let links = node
            .edges
            .into_iter()
            .filter_map(|edge| {
                let link = family.links().iter().find(|l| l.relationship == edge.relationship)?;
                Some((link.name.to_string(), edge.uid))
            })
            .collect();
        Some(Record {
            uid: node.uid,
            kind,
            properties: node.properties,
            links,
        })
    }
}

#[async_trait]
impl<S: GraphStore> Backend for GraphBackend<S> {
    async fn set(&self, family: Family, record: Record) -> Result<()> {
        let mut edges = Vec::with_capacity(record.links.len());
        for (name, target_uid) in record.links {
            let link = family
                .link(&name)
                .ok_or_else(|| Error::Other(format!("{family} has no link named {name}")))?;
            edges.push(GraphEdge {
                relationship: link.relationship,
                target_label: link.target.label(),
                target_uid,
            });
        }
        let extra_label = if record.kind == family.label() {
            None
        } else {
            Some(check_identifier(&record.kind)?.to_string())
        };
        let node = GraphNode {
            label: family.label(),
            extra_label,
            uid: record.uid,
            properties: record.properties,
        };
        self.store.write(node, edges).await
    }

    async fn get(&self, family: Family, uid: &str) -> Result<Option<Record>> {
        let node = self.store.find_node(family.label(), uid).await?;
        Ok(node.and_then(|node| Self::to_record(family, node)))
    }

    async fn list(&self, family: Family, selection: Selection) -> Result<Vec<Record>> {
        let nodes = self.store.find_nodes(family.label(), selection).await?;
        Ok(nodes
            .into_iter()
            .filter_map(|node| Self::to_record(family, node))
            .collect())
    }

    async fn drop_all(&self) -> Result<()> {
        self.store.delete_all().await
    }
}

#[derive(Default, Clone, Debug)]
struct MemoryNode {
    labels: BTreeSet<String>,
    properties: Map<String, Value>,
    /// Relationship type to target key
    edges: BTreeMap<String, (String, String)>,
}

impl MemoryNode {
    fn stored(&self, uid: &str) -> StoredNode {
        StoredNode {
            uid: uid.to_string(),
            labels: self.labels.iter().cloned().collect(),
            properties: self.properties.clone(),
            edges: self
                .edges
                .iter()
                .map(|(relationship, (_, uid))| StoredEdge {
                    relationship: relationship.clone(),
                    uid: uid.clone(),
                })
                .collect(),
        }
    }
}

/// Graph kept in process memory, nodes keyed by their family label and uid
#[derive(Default)]
pub struct MemoryGraph {
    nodes: RwLock<BTreeMap<(String, String), MemoryNode>>,
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn write(&self, node: GraphNode, edges: Vec<GraphEdge>) -> Result<()> {
        let label = node.label;
        let mut nodes = self.nodes.write().await;
        for edge in &edges {
            nodes
                .entry((edge.target_label.to_string(), edge.target_uid.clone()))
                .or_insert_with(|| MemoryNode {
                    labels: BTreeSet::from([edge.target_label.to_string()]),
                    ..MemoryNode::default()
                });
        }
        let stored = nodes.entry((label.to_string(), node.uid)).or_default();
        stored.labels.insert(label.to_string());
        stored.labels.extend(node.extra_label);
        // Null properties are not stored, as in property graphs
        stored.properties = node.properties.into_iter().filter(|(_, v)| !v.is_null()).collect();
        for edge in edges {
            stored.edges.insert(
                edge.relationship.to_string(),
                (edge.target_label.to_string(), edge.target_uid),
            );
        }
        Ok(())
    }

    async fn find_node(&self, label: &str, uid: &str) -> Result<Option<StoredNode>> {
        let nodes = self.nodes.read().await;
        Ok(nodes
            .get(&(label.to_string(), uid.to_string()))
            .map(|node| node.stored(uid)))
    }

    async fn find_nodes(&self, label: &str, selection: Selection) -> Result<Vec<StoredNode>> {
        let nodes = self.nodes.read().await;
        Ok(nodes
            .iter()
            .filter(|((first, _), node)| first == label && selection.matches(&node.properties))
            .map(|((_, uid), node)| node.stored(uid))
            .collect())
    }

    async fn delete_all(&self) -> Result<()> {
        self.nodes.write().await.clear();
        Ok(())
    }
}
