use super::{
    entity, ArtifactConfigurationUid, ArtifactVersionUid, EnvironmentUid, Family, NodeUid,
    RuntimeConfigurationUid, RuntimeVersionUid,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

uid_type!(
    /// `customer/application/environment/revision`
    DeploymentUid
);

impl DeploymentUid {
    #[must_use]
    pub fn new(customer_id: &str, application_id: &str, environment: &str, deployment_id: &str) -> Self {
        Self(format!(
            "{}/{}",
            EnvironmentUid::new(customer_id, application_id, environment),
            deployment_id
        ))
    }
}

uid_type!(
    /// `customer/application/environment/revision/pod`
    DeploymentInstanceUid
);

impl DeploymentInstanceUid {
    #[must_use]
    pub fn new(deployment: &DeploymentUid, instance_id: &str) -> Self {
        Self(format!("{deployment}/{instance_id}"))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeploymentProperties {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentLinks {
    pub deployed_in: EnvironmentUid,
    pub uses_artifact: ArtifactVersionUid,
    pub uses_runtime: RuntimeVersionUid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Deployment {
    pub uid: DeploymentUid,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: DeploymentProperties,
    pub links: DeploymentLinks,
}
entity!(Deployment, Family::Deployment);

impl Deployment {
    #[must_use]
    pub fn new(
        customer_id: &str,
        application_id: &str,
        environment: &str,
        id: &str,
        name: &str,
        created: DateTime<Utc>,
        artifact: &ArtifactVersionUid,
        runtime: &RuntimeVersionUid,
    ) -> Self {
        Self {
            uid: DeploymentUid::new(customer_id, application_id, environment, id),
            kind: Family::Deployment.label().to_string(),
            properties: DeploymentProperties {
                id: id.to_string(),
                name: name.to_string(),
                created,
            },
            links: DeploymentLinks {
                deployed_in: EnvironmentUid::new(customer_id, application_id, environment),
                uses_artifact: artifact.clone(),
                uses_runtime: runtime.clone(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeploymentInstanceProperties {
    /// UID of the backing pod
    pub id: String,
    pub started: DateTime<Utc>,
    /// Set once, when the backing pod is gone
    pub stopped: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInstanceLinks {
    pub instance_of: DeploymentUid,
    pub uses_artifact_configuration: ArtifactConfigurationUid,
    pub uses_runtime_configuration: RuntimeConfigurationUid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_on: Option<NodeUid>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeploymentInstance {
    pub uid: DeploymentInstanceUid,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: DeploymentInstanceProperties,
    pub links: DeploymentInstanceLinks,
}
entity!(DeploymentInstance, Family::DeploymentInstance);

impl DeploymentInstance {
    #[must_use]
    pub fn new(
        deployment: &DeploymentUid,
        id: &str,
        started: DateTime<Utc>,
        artifact: &ArtifactConfigurationUid,
        runtime: &RuntimeConfigurationUid,
        node: Option<NodeUid>,
    ) -> Self {
        Self {
            uid: DeploymentInstanceUid::new(deployment, id),
            kind: Family::DeploymentInstance.label().to_string(),
            properties: DeploymentInstanceProperties {
                id: id.to_string(),
                started,
                stopped: None,
            },
            links: DeploymentInstanceLinks {
                instance_of: deployment.clone(),
                uses_artifact_configuration: artifact.clone(),
                uses_runtime_configuration: runtime.clone(),
                scheduled_on: node,
            },
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.properties.stopped.is_some()
    }

    /// Marks the instance stopped at `at`, unless it already is.
    /// Returns whether anything changed.
    pub fn stop(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.properties.stopped = Some(at);
        true
    }
}
