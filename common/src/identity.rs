//! Fleet coordinates of cluster objects.
//!
//! Only objects carrying the tenant, application, environment and microservice
//! markers are part of the fleet. Anything else resolves to `None`, which callers
//! treat as "not applicable" rather than as an error.
use crate::entities::{DeploymentInstanceUid, DeploymentUid};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub const TENANT_ID_ANNOTATION: &str = "dolittle.io/tenant-id";
pub const APPLICATION_ID_ANNOTATION: &str = "dolittle.io/application-id";
pub const MICROSERVICE_ID_ANNOTATION: &str = "dolittle.io/microservice-id";
pub const TENANT_LABEL: &str = "tenant";
pub const APPLICATION_LABEL: &str = "application";
pub const ENVIRONMENT_LABEL: &str = "environment";
pub const MICROSERVICE_LABEL: &str = "microservice";

#[must_use]
pub fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations.as_ref()?.get(key).map(String::as_str)
}

#[must_use]
pub fn label<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels.as_ref()?.get(key).map(String::as_str)
}

/// Coordinates of a tenant application, as carried by its namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tenancy {
    pub tenant_id: String,
    pub application_id: String,
}

impl Tenancy {
    #[must_use]
    pub fn from_metadata(meta: &ObjectMeta) -> Option<Self> {
        Some(Self {
            tenant_id: annotation(meta, TENANT_ID_ANNOTATION)?.to_string(),
            application_id: annotation(meta, APPLICATION_ID_ANNOTATION)?.to_string(),
        })
    }
}

/// Coordinates of a microservice
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub tenant_id: String,
    pub application_id: String,
    pub environment: String,
    pub microservice_id: String,
}

impl Identity {
    /// Stops at the first missing coordinate
    #[must_use]
    pub fn from_metadata(meta: &ObjectMeta) -> Option<Self> {
        let Tenancy {
            tenant_id,
            application_id,
        } = Tenancy::from_metadata(meta)?;
        Some(Self {
            tenant_id,
            application_id,
            environment: label(meta, ENVIRONMENT_LABEL)?.to_string(),
            microservice_id: annotation(meta, MICROSERVICE_ID_ANNOTATION)?.to_string(),
        })
    }

    #[must_use]
    pub fn deployment_uid(&self, revision: &str) -> DeploymentUid {
        DeploymentUid::new(&self.tenant_id, &self.application_id, &self.environment, revision)
    }

    #[must_use]
    pub fn instance_uid(&self, revision: &str, pod_uid: &str) -> DeploymentInstanceUid {
        DeploymentInstanceUid::new(&self.deployment_uid(revision), pod_uid)
    }
}
