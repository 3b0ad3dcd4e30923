//! Persistence of fleet entities.
//!
//! Handlers talk to one typed repository per entity family. Every repository
//! goes through the same record-level [`Backend`], which is either the document
//! model (one collection per family) or the graph model (one node label per
//! family, one relationship type per link).
use crate::{
    entities::{
        Application, Artifact, ArtifactConfiguration, ArtifactVersion, Customer, Deployment,
        DeploymentInstance, Entity, Environment, Event, Family, Node, Record, RuntimeConfiguration,
        RuntimeVersion,
    },
    Error, Result,
};
use async_trait::async_trait;
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::*;

pub mod document;
pub mod graph;
#[cfg(feature = "mongodb")]
pub mod mongo;
#[cfg(feature = "neo4j")]
pub mod neo4j;

pub use document::{DocumentBackend, DocumentStore, MemoryDocuments};
pub use graph::{GraphBackend, GraphStore, MemoryGraph};

/// Which records of a family to list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    All,
    /// Records where the property is missing or null
    Unset(&'static str),
}

impl Selection {
    #[must_use]
    pub fn matches(&self, properties: &Map<String, Value>) -> bool {
        match self {
            Selection::All => true,
            Selection::Unset(property) => properties.get(*property).map_or(true, Value::is_null),
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Inserts or replaces the record keyed by its uid
    async fn set(&self, family: Family, record: Record) -> Result<()>;
    async fn get(&self, family: Family, uid: &str) -> Result<Option<Record>>;
    async fn list(&self, family: Family, selection: Selection) -> Result<Vec<Record>>;
    /// Removes every stored record of every family
    async fn drop_all(&self) -> Result<()>;
}

#[async_trait]
pub trait Nodes: Send + Sync {
    async fn set(&self, node: &Node) -> Result<()>;
    async fn list(&self) -> Result<Vec<Node>>;
}

#[async_trait]
pub trait Customers: Send + Sync {
    async fn set(&self, customer: &Customer) -> Result<()>;
    async fn get(&self, uid: &str) -> Result<Option<Customer>>;
    async fn list(&self) -> Result<Vec<Customer>>;
}

#[async_trait]
pub trait Applications: Send + Sync {
    async fn set(&self, application: &Application) -> Result<()>;
    async fn get(&self, uid: &str) -> Result<Option<Application>>;
    async fn list(&self) -> Result<Vec<Application>>;
}

#[async_trait]
pub trait Environments: Send + Sync {
    async fn set(&self, environment: &Environment) -> Result<()>;
    async fn get(&self, uid: &str) -> Result<Option<Environment>>;
    async fn list(&self) -> Result<Vec<Environment>>;
}

#[async_trait]
pub trait Artifacts: Send + Sync {
    async fn set(&self, artifact: &Artifact) -> Result<()>;
    async fn list(&self) -> Result<Vec<Artifact>>;
    async fn set_version(&self, version: &ArtifactVersion) -> Result<()>;
    async fn list_versions(&self) -> Result<Vec<ArtifactVersion>>;
}

#[async_trait]
pub trait Runtimes: Send + Sync {
    async fn set_version(&self, version: &RuntimeVersion) -> Result<()>;
    async fn list_versions(&self) -> Result<Vec<RuntimeVersion>>;
}

#[async_trait]
pub trait Deployments: Send + Sync {
    async fn set(&self, deployment: &Deployment) -> Result<()>;
    async fn get(&self, uid: &str) -> Result<Option<Deployment>>;
    async fn list(&self) -> Result<Vec<Deployment>>;
    async fn set_instance(&self, instance: &DeploymentInstance) -> Result<()>;
    async fn get_instance(&self, uid: &str) -> Result<Option<DeploymentInstance>>;
    async fn list_instances(&self) -> Result<Vec<DeploymentInstance>>;
    /// Instances without a `stopped` time
    async fn list_running_instances(&self) -> Result<Vec<DeploymentInstance>>;
}

#[async_trait]
pub trait Configurations: Send + Sync {
    async fn set_artifact(&self, configuration: &ArtifactConfiguration) -> Result<()>;
    async fn list_artifacts(&self) -> Result<Vec<ArtifactConfiguration>>;
    async fn set_runtime(&self, configuration: &RuntimeConfiguration) -> Result<()>;
    async fn list_runtimes(&self) -> Result<Vec<RuntimeConfiguration>>;
}

#[async_trait]
pub trait Events: Send + Sync {
    async fn set(&self, event: &Event) -> Result<()>;
    async fn get(&self, uid: &str) -> Result<Option<Event>>;
    async fn list(&self) -> Result<Vec<Event>>;
}

/// Typed access to a backend, implementing every repository
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn Backend>,
}

impl Storage {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    async fn store<E: Entity>(&self, entity: &E) -> Result<()> {
        trace!(uid = entity.uid(), "Storing {}", E::FAMILY);
        self.backend.set(E::FAMILY, entity.to_record()?).await
    }

    async fn fetch<E: Entity>(&self, uid: &str) -> Result<Option<E>> {
        match self.backend.get(E::FAMILY, uid).await? {
            Some(record) => Ok(Some(E::from_record(record)?)),
            None => Ok(None),
        }
    }

    async fn select<E: Entity>(&self, selection: Selection) -> Result<Vec<E>> {
        self.backend
            .list(E::FAMILY, selection)
            .await?
            .into_iter()
            .map(E::from_record)
            .collect()
    }
}

#[async_trait]
impl Nodes for Storage {
    async fn set(&self, node: &Node) -> Result<()> {
        self.store(node).await
    }

    async fn list(&self) -> Result<Vec<Node>> {
        self.select(Selection::All).await
    }
}

#[async_trait]
impl Customers for Storage {
    async fn set(&self, customer: &Customer) -> Result<()> {
        self.store(customer).await
    }

    async fn get(&self, uid: &str) -> Result<Option<Customer>> {
        self.fetch(uid).await
    }

    async fn list(&self) -> Result<Vec<Customer>> {
        self.select(Selection::All).await
    }
}

#[async_trait]
impl Applications for Storage {
    async fn set(&self, application: &Application) -> Result<()> {
        self.store(application).await
    }

    async fn get(&self, uid: &str) -> Result<Option<Application>> {
        self.fetch(uid).await
    }

    async fn list(&self) -> Result<Vec<Application>> {
        self.select(Selection::All).await
    }
}

#[async_trait]
impl Environments for Storage {
    async fn set(&self, environment: &Environment) -> Result<()> {
        self.store(environment).await
    }

    async fn get(&self, uid: &str) -> Result<Option<Environment>> {
        self.fetch(uid).await
    }

    async fn list(&self) -> Result<Vec<Environment>> {
        self.select(Selection::All).await
    }
}

#[async_trait]
impl Artifacts for Storage {
    async fn set(&self, artifact: &Artifact) -> Result<()> {
        self.store(artifact).await
    }

    async fn list(&self) -> Result<Vec<Artifact>> {
        self.select(Selection::All).await
    }

    async fn set_version(&self, version: &ArtifactVersion) -> Result<()> {
        self.store(version).await
    }

    async fn list_versions(&self) -> Result<Vec<ArtifactVersion>> {
        self.select(Selection::All).await
    }
}

#[async_trait]
impl Runtimes for Storage {
    async fn set_version(&self, version: &RuntimeVersion) -> Result<()> {
        self.store(version).await
    }

    async fn list_versions(&self) -> Result<Vec<RuntimeVersion>> {
        self.select(Selection::All).await
    }
}

#[async_trait]
impl Deployments for Storage {
    async fn set(&self, deployment: &Deployment) -> Result<()> {
        self.store(deployment).await
    }

    async fn get(&self, uid: &str) -> Result<Option<Deployment>> {
        self.fetch(uid).await
    }

    async fn list(&self) -> Result<Vec<Deployment>> {
        self.select(Selection::All).await
    }

    async fn set_instance(&self, instance: &DeploymentInstance) -> Result<()> {
        self.store(instance).await
    }

    async fn get_instance(&self, uid: &str) -> Result<Option<DeploymentInstance>> {
        self.fetch(uid).await
    }

    async fn list_instances(&self) -> Result<Vec<DeploymentInstance>> {
        self.select(Selection::All).await
    }

    async fn list_running_instances(&self) -> Result<Vec<DeploymentInstance>> {
        self.select(Selection::Unset("stopped")).await
    }
}

#[async_trait]
impl Configurations for Storage {
    async fn set_artifact(&self, configuration: &ArtifactConfiguration) -> Result<()> {
        self.store(configuration).await
    }

    async fn list_artifacts(&self) -> Result<Vec<ArtifactConfiguration>> {
        self.select(Selection::All).await
    }

    async fn set_runtime(&self, configuration: &RuntimeConfiguration) -> Result<()> {
        self.store(configuration).await
    }

    async fn list_runtimes(&self) -> Result<Vec<RuntimeConfiguration>> {
        self.select(Selection::All).await
    }
}

#[async_trait]
impl Events for Storage {
    async fn set(&self, event: &Event) -> Result<()> {
        self.store(event).await
    }

    async fn get(&self, uid: &str) -> Result<Option<Event>> {
        self.fetch(uid).await
    }

    async fn list(&self) -> Result<Vec<Event>> {
        self.select(Selection::All).await
    }
}

/// One repository per entity family, all sharing the same backend
#[derive(Clone)]
pub struct Repositories {
    pub nodes: Arc<dyn Nodes>,
    pub customers: Arc<dyn Customers>,
    pub applications: Arc<dyn Applications>,
    pub environments: Arc<dyn Environments>,
    pub artifacts: Arc<dyn Artifacts>,
    pub runtimes: Arc<dyn Runtimes>,
    pub deployments: Arc<dyn Deployments>,
    pub configurations: Arc<dyn Configurations>,
    pub events: Arc<dyn Events>,
    backend: Arc<dyn Backend>,
}

impl Repositories {
    #[must_use]
    pub fn from_backend(backend: Arc<dyn Backend>) -> Self {
        let storage = Arc::new(Storage::new(backend.clone()));
        Self {
            nodes: storage.clone(),
            customers: storage.clone(),
            applications: storage.clone(),
            environments: storage.clone(),
            artifacts: storage.clone(),
            runtimes: storage.clone(),
            deployments: storage.clone(),
            configurations: storage.clone(),
            events: storage,
            backend,
        }
    }

    /// Document model kept in process memory
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(DocumentBackend::new(MemoryDocuments::default())))
    }

    #[must_use]
    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub async fn drop_all(&self) -> Result<()> {
        self.backend.drop_all().await
    }
}

/// Connection parameters of the storage engines
#[derive(Args, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageParameters {
    /// MongoDB connection string
    #[arg(long, env = "MONGODB_CONNECTION_STRING")]
    pub mongodb_connection_string: Option<String>,
    /// MongoDB database, defaults to the one named in the connection string
    #[arg(long, env = "MONGODB_DATABASE")]
    pub mongodb_database: Option<String>,
    /// Neo4j connection string, takes precedence over MongoDB
    #[arg(long, env = "NEO4J_CONNECTION_STRING")]
    pub neo4j_connection_string: Option<String>,
    /// Neo4j username
    #[arg(long, env = "NEO4J_USERNAME")]
    pub neo4j_username: Option<String>,
    /// Neo4j password
    #[arg(long, env = "NEO4J_PASSWORD", hide_env_values = true)]
    pub neo4j_password: Option<String>,
}

impl StorageParameters {
    /// Keeps every value set here, taking the others from `fallback`
    #[must_use]
    pub fn or(self, fallback: StorageParameters) -> Self {
        Self {
            mongodb_connection_string: self
                .mongodb_connection_string
                .or(fallback.mongodb_connection_string),
            mongodb_database: self.mongodb_database.or(fallback.mongodb_database),
            neo4j_connection_string: self.neo4j_connection_string.or(fallback.neo4j_connection_string),
            neo4j_username: self.neo4j_username.or(fallback.neo4j_username),
            neo4j_password: self.neo4j_password.or(fallback.neo4j_password),
        }
    }
}

/// Connects to the configured engine, Neo4j first then MongoDB
pub async fn connect(parameters: &StorageParameters) -> Result<Repositories> {
    let backend = if let Some(uri) = &parameters.neo4j_connection_string {
        info!("Using the Neo4j graph storage");
        connect_neo4j(parameters, uri).await?
    } else if let Some(uri) = &parameters.mongodb_connection_string {
        info!("Using the MongoDB document storage");
        connect_mongodb(parameters, uri).await?
    } else {
        return Err(Error::NoStorageConfigured);
    };
    Ok(Repositories::from_backend(backend))
}

#[cfg(feature = "neo4j")]
async fn connect_neo4j(parameters: &StorageParameters, uri: &str) -> Result<Arc<dyn Backend>> {
    let graph = neo4j::Neo4jGraph::connect(
        uri,
        parameters.neo4j_username.as_deref().unwrap_or("neo4j"),
        parameters.neo4j_password.as_deref().unwrap_or_default(),
    )
    .await?;
    Ok(Arc::new(GraphBackend::new(graph)))
}

#[cfg(not(feature = "neo4j"))]
async fn connect_neo4j(_parameters: &StorageParameters, _uri: &str) -> Result<Arc<dyn Backend>> {
    Err(Error::EngineNotAvailable("neo4j"))
}

#[cfg(feature = "mongodb")]
async fn connect_mongodb(parameters: &StorageParameters, uri: &str) -> Result<Arc<dyn Backend>> {
    let documents = mongo::MongoDocuments::connect(uri, parameters.mongodb_database.as_deref()).await?;
    Ok(Arc::new(DocumentBackend::new(documents)))
}

#[cfg(not(feature = "mongodb"))]
async fn connect_mongodb(_parameters: &StorageParameters, _uri: &str) -> Result<Arc<dyn Backend>> {
    Err(Error::EngineNotAvailable("mongodb"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{
        ArtifactConfigurationUid, DeploymentUid, EventKind, EventUid, RuntimeConfigurationUid,
    };
    use chrono::{TimeZone, Utc};

    fn repositories() -> Vec<Repositories> {
        vec![
            Repositories::in_memory(),
            Repositories::from_backend(Arc::new(GraphBackend::new(MemoryGraph::default()))),
        ]
    }

    fn instance(pod: &str) -> DeploymentInstance {
        DeploymentInstance::new(
            &DeploymentUid::new("t1", "a1", "Dev", "1"),
            pod,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            &ArtifactConfigurationUid::new("t1", "a1", "Dev", "m1", "aa"),
            &RuntimeConfigurationUid::new("t1", "a1", "Dev", "m1", "bb"),
            None,
        )
    }

    #[test]
    fn test_unset_selection() {
        let mut properties = Map::new();
        assert!(Selection::Unset("stopped").matches(&properties));
        properties.insert("stopped".to_string(), Value::Null);
        assert!(Selection::Unset("stopped").matches(&properties));
        properties.insert("stopped".to_string(), Value::from("2024-01-01T00:00:00Z"));
        assert!(!Selection::Unset("stopped").matches(&properties));
        assert!(Selection::All.matches(&properties));
    }

    #[tokio::test]
    async fn test_set_is_idempotent() {
        for repositories in repositories() {
            let customer = Customer::new("t1", "Acme");
            repositories.customers.set(&customer).await.unwrap();
            repositories.customers.set(&customer).await.unwrap();
            assert_eq!(repositories.customers.list().await.unwrap(), vec![customer.clone()]);
            assert_eq!(repositories.customers.get("t1").await.unwrap(), Some(customer));
            assert_eq!(repositories.customers.get("t2").await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_running_instances_exclude_stopped() {
        for repositories in repositories() {
            let running = instance("p1");
            let mut stopped = instance("p2");
            stopped.stop(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
            repositories.deployments.set_instance(&running).await.unwrap();
            repositories.deployments.set_instance(&stopped).await.unwrap();

            assert_eq!(repositories.deployments.list_instances().await.unwrap().len(), 2);
            assert_eq!(
                repositories.deployments.list_running_instances().await.unwrap(),
                vec![running]
            );
            let found = repositories
                .deployments
                .get_instance(stopped.uid.as_str())
                .await
                .unwrap()
                .unwrap();
            assert!(found.is_stopped());
        }
    }

    #[tokio::test]
    async fn test_event_keeps_its_concrete_type() {
        for repositories in repositories() {
            let target = instance("p1");
            let event = Event::new(
                EventUid::restart(&target.uid, false),
                EventKind::Restart,
                3,
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
                false,
                &target.uid,
            );
            repositories.events.set(&event).await.unwrap();
            let stored = repositories.events.get(event.uid.as_str()).await.unwrap().unwrap();
            assert_eq!(stored.kind, "RestartEvent");
            assert_eq!(stored, event);
        }
    }

    #[tokio::test]
    async fn test_drop_all() {
        for repositories in repositories() {
            repositories.nodes.set(&Node::new("n1", "h1", "img", "std")).await.unwrap();
            repositories.drop_all().await.unwrap();
            assert!(repositories.nodes.list().await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_connect_without_engine() {
        let result = connect(&StorageParameters::default()).await;
        assert!(matches!(result, Err(Error::NoStorageConfigured)));
    }

    #[test]
    fn test_parameters_fallback() {
        let flags = StorageParameters {
            neo4j_password: Some("flag".to_string()),
            ..StorageParameters::default()
        };
        let file = StorageParameters {
            neo4j_password: Some("file".to_string()),
            neo4j_connection_string: Some("bolt://graph:7687".to_string()),
            ..StorageParameters::default()
        };
        let merged = flags.or(file);
        assert_eq!(merged.neo4j_password.as_deref(), Some("flag"));
        assert_eq!(merged.neo4j_connection_string.as_deref(), Some("bolt://graph:7687"));
        assert_eq!(merged.mongodb_connection_string, None);
    }
}
