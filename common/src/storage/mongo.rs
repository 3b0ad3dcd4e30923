//! MongoDB engine for the document model.
use super::{document::DocumentStore, Selection};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Bson, Document},
    Client, Database,
};
use serde_json::Value;
use tracing::*;

pub struct MongoDocuments {
    database: Database,
}

impl MongoDocuments {
    /// Uses `database` when given, otherwise the one named in the connection string
    pub async fn connect(uri: &str, database: Option<&str>) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let database = match database {
            Some(name) => client.database(name),
            None => client.default_database().ok_or_else(|| {
                Error::Other("the MongoDB connection string names no database".to_string())
            })?,
        };
        debug!("Using MongoDB database {}", database.name());
        Ok(Self { database })
    }
}

fn filter(selection: Selection) -> Document {
    let mut filter = Document::new();
    if let Selection::Unset(property) = selection {
        // Matches both missing and null fields
        filter.insert(format!("properties.{property}"), Bson::Null);
    }
    filter
}

fn to_json(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

#[async_trait]
impl DocumentStore for MongoDocuments {
    async fn upsert(&self, collection: &str, id: &str, document: Value) -> Result<()> {
        let document = bson::to_document(&document)?;
        self.database
            .collection::<Document>(collection)
            .replace_one(doc! { "_id": id }, document)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn find_one(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let document = self
            .database
            .collection::<Document>(collection)
            .find_one(doc! { "_id": id })
            .await?;
        Ok(document.map(to_json))
    }

    async fn find_all(&self, collection: &str, selection: Selection) -> Result<Vec<Value>> {
        let documents: Vec<Document> = self
            .database
            .collection::<Document>(collection)
            .find(filter(selection))
            .sort(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(documents.into_iter().map(to_json).collect())
    }

    async fn drop_all(&self) -> Result<()> {
        warn!("Dropping MongoDB database {}", self.database.name());
        self.database.drop().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_filter() {
        assert_eq!(filter(Selection::All), Document::new());
        assert_eq!(filter(Selection::Unset("stopped")), doc! { "properties.stopped": null });
    }

    #[test]
    fn test_document_to_json() {
        let json = to_json(doc! { "_id": "t1", "properties": { "count": 3 } });
        assert_eq!(json, serde_json::json!({"_id": "t1", "properties": {"count": 3}}));
    }
}
