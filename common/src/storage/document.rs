//! Document model: one collection per family, one document per entity.
//!
//! Documents are `{_id, _type, properties, links}`. Links are stored as plain
//! UIDs and only resolved when read, so a dangling reference is never an error.
use super::{Backend, Selection};
use crate::{
    entities::{Family, Record},
    Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// A document database engine
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts or replaces the document with the given `_id`
    async fn upsert(&self, collection: &str, id: &str, document: Value) -> Result<()>;
    async fn find_one(&self, collection: &str, id: &str) -> Result<Option<Value>>;
    /// Documents sorted by `_id`
    async fn find_all(&self, collection: &str, selection: Selection) -> Result<Vec<Value>>;
    async fn drop_all(&self) -> Result<()>;
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
struct Document {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_type")]
    kind: String,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    links: BTreeMap<String, String>,
}

impl From<Record> for Document {
    fn from(record: Record) -> Self {
        Self {
            id: record.uid,
            kind: record.kind,
            properties: record.properties,
            links: record.links,
        }
    }
}

impl From<Document> for Record {
    fn from(document: Document) -> Self {
        Self {
            uid: document.id,
            kind: document.kind,
            properties: document.properties,
            links: document.links,
        }
    }
}

pub struct DocumentBackend<S> {
    store: S,
}

impl<S: DocumentStore> DocumentBackend<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DocumentStore> Backend for DocumentBackend<S> {
    async fn set(&self, family: Family, record: Record) -> Result<()> {
        let id = record.uid.clone();
        let document = serde_json::to_value(Document::from(record))?;
        self.store.upsert(family.collection(), &id, document).await
    }

    async fn get(&self, family: Family, uid: &str) -> Result<Option<Record>> {
        match self.store.find_one(family.collection(), uid).await? {
            Some(document) => Ok(Some(serde_json::from_value::<Document>(document)?.into())),
            None => Ok(None),
        }
    }

    async fn list(&self, family: Family, selection: Selection) -> Result<Vec<Record>> {
        let documents = self.store.find_all(family.collection(), selection).await?;
        documents
            .into_iter()
            .map(|document| Ok(serde_json::from_value::<Document>(document)?.into()))
            .collect()
    }

    async fn drop_all(&self) -> Result<()> {
        self.store.drop_all().await
    }
}

/// Documents kept in process memory
#[derive(Default)]
pub struct MemoryDocuments {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

#[async_trait]
impl DocumentStore for MemoryDocuments {
    async fn upsert(&self, collection: &str, id: &str, document: Value) -> Result<()> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
        Ok(())
    }

    async fn find_one(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn find_all(&self, collection: &str, selection: Selection) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let empty = Map::new();
        Ok(documents
            .values()
            .filter(|document| {
                let properties = document.get("properties").and_then(Value::as_object);
                selection.matches(properties.unwrap_or(&empty))
            })
            .cloned()
            .collect())
    }

    async fn drop_all(&self) -> Result<()> {
        self.collections.write().await.clear();
        Ok(())
    }
}
