//! Fleet entities.
//!
//! Every entity shares the `{uid, type, properties, links}` envelope. UIDs are
//! slash-delimited composite keys built by calling the parent's UID builder, and
//! links reference other entities by UID only.
use crate::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

macro_rules! uid_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(uid: String) -> Self {
                Self(uid)
            }
        }
    };
}

mod application;
mod artifact;
mod configuration;
mod customer;
mod deployment;
mod environment;
mod event;
mod node;
mod runtime;

pub use application::{Application, ApplicationLinks, ApplicationProperties, ApplicationUid};
pub use artifact::{
    Artifact, ArtifactLinks, ArtifactProperties, ArtifactUid, ArtifactVersion, ArtifactVersionLinks,
    ArtifactVersionProperties, ArtifactVersionUid,
};
pub use configuration::{
    ArtifactConfiguration, ArtifactConfigurationUid, ConfigurationProperties, RuntimeConfiguration,
    RuntimeConfigurationUid,
};
pub use customer::{Customer, CustomerProperties, CustomerUid};
pub use deployment::{
    Deployment, DeploymentInstance, DeploymentInstanceLinks, DeploymentInstanceProperties,
    DeploymentInstanceUid, DeploymentLinks, DeploymentProperties, DeploymentUid,
};
pub use environment::{Environment, EnvironmentLinks, EnvironmentProperties, EnvironmentUid};
pub use event::{Event, EventKind, EventLinks, EventProperties, EventUid};
pub use node::{Node, NodeProperties, NodeUid};
pub use runtime::{RuntimeVersion, RuntimeVersionProperties, RuntimeVersionUid};

/// Links of entities that reference nothing
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct NoLinks {}

/// One storage family: a collection in the document model, a node label in the graph model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    Node,
    Customer,
    Application,
    Environment,
    Artifact,
    ArtifactVersion,
    RuntimeVersion,
    Deployment,
    ArtifactConfiguration,
    RuntimeConfiguration,
    DeploymentInstance,
    Event,
}

/// A named link from one family to another
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkSpec {
    /// Name of the link in the entity envelope
    pub name: &'static str,
    /// Relationship type in the graph model
    pub relationship: &'static str,
    pub target: Family,
}

const fn link(name: &'static str, relationship: &'static str, target: Family) -> LinkSpec {
    LinkSpec {
        name,
        relationship,
        target,
    }
}

impl Family {
    /// All families, in export order
    pub const ALL: [Family; 12] = [
        Family::Node,
        Family::Customer,
        Family::Application,
        Family::Environment,
        Family::Artifact,
        Family::ArtifactVersion,
        Family::RuntimeVersion,
        Family::Deployment,
        Family::ArtifactConfiguration,
        Family::RuntimeConfiguration,
        Family::DeploymentInstance,
        Family::Event,
    ];

    #[must_use]
    pub fn collection(&self) -> &'static str {
        match self {
            Family::Node => "nodes",
            Family::Customer => "customers",
            Family::Application => "applications",
            Family::Environment => "environments",
            Family::Artifact => "artifacts",
            Family::ArtifactVersion => "artifact-versions",
            Family::RuntimeVersion => "runtime-versions",
            Family::Deployment => "deployments",
            Family::ArtifactConfiguration => "artifact-configurations",
            Family::RuntimeConfiguration => "runtime-configurations",
            Family::DeploymentInstance => "deployment-instances",
            Family::Event => "events",
        }
    }

    /// Node label, also the type tag of every entity in the family except events
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Family::Node => "Node",
            Family::Customer => "Customer",
            Family::Application => "Application",
            Family::Environment => "Environment",
            Family::Artifact => "Artifact",
            Family::ArtifactVersion => "ArtifactVersion",
            Family::RuntimeVersion => "RuntimeVersion",
            Family::Deployment => "Deployment",
            Family::ArtifactConfiguration => "ArtifactConfiguration",
            Family::RuntimeConfiguration => "RuntimeConfiguration",
            Family::DeploymentInstance => "DeploymentInstance",
            Family::Event => "Event",
        }
    }

    #[must_use]
    pub fn links(&self) -> &'static [LinkSpec] {
        static APPLICATION: [LinkSpec; 1] = [link("ownedBy", "OwnedBy", Family::Customer)];
        static ENVIRONMENT: [LinkSpec; 1] = [link("environmentOf", "EnvironmentOf", Family::Application)];
        static ARTIFACT: [LinkSpec; 1] = [link("developedBy", "DevelopedBy", Family::Customer)];
        static ARTIFACT_VERSION: [LinkSpec; 1] = [link("versionOf", "VersionOf", Family::Artifact)];
        static DEPLOYMENT: [LinkSpec; 3] = [
            link("deployedIn", "DeployedIn", Family::Environment),
            link("usesArtifact", "UsesArtifact", Family::ArtifactVersion),
            link("usesRuntime", "UsesRuntime", Family::RuntimeVersion),
        ];
        static DEPLOYMENT_INSTANCE: [LinkSpec; 4] = [
            link("instanceOf", "InstanceOf", Family::Deployment),
            link(
                "usesArtifactConfiguration",
                "UsesArtifactConfiguration",
                Family::ArtifactConfiguration,
            ),
            link(
                "usesRuntimeConfiguration",
                "UsesRuntimeConfiguration",
                Family::RuntimeConfiguration,
            ),
            link("scheduledOn", "ScheduledOn", Family::Node),
        ];
        static EVENT: [LinkSpec; 1] = [link("happenedTo", "HappenedTo", Family::DeploymentInstance)];
        match self {
            Family::Application => &APPLICATION,
            Family::Environment => &ENVIRONMENT,
            Family::Artifact => &ARTIFACT,
            Family::ArtifactVersion => &ARTIFACT_VERSION,
            Family::Deployment => &DEPLOYMENT,
            Family::DeploymentInstance => &DEPLOYMENT_INSTANCE,
            Family::Event => &EVENT,
            _ => &[],
        }
    }

    #[must_use]
    pub fn link(&self, name: &str) -> Option<&'static LinkSpec> {
        self.links().iter().find(|l| l.name == name)
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Untyped entity envelope as handled by the storage backends
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Record {
    pub uid: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, String>,
}

/// A typed entity stored in one family
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync {
    const FAMILY: Family;

    fn uid(&self) -> &str;

    fn to_record(&self) -> Result<Record> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::to_value(record)?)?)
    }
}

macro_rules! entity {
    ($entity:ty, $family:expr) => {
        impl $crate::entities::Entity for $entity {
            const FAMILY: $crate::entities::Family = $family;

            fn uid(&self) -> &str {
                self.uid.as_str()
            }
        }
    };
}
pub(crate) use entity;
