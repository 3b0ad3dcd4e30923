use super::{revision, runtime_and_head};
use crate::{patterns::ImagePatterns, Handler, Result};
use async_trait::async_trait;
use chrono::Utc;
use common::{
    entities::{Artifact, ArtifactVersion, Deployment, Environment},
    identity::{label, MICROSERVICE_LABEL},
    storage::{Artifacts, Deployments, Environments, Runtimes},
    Identity, Repositories,
};
use k8s_openapi::api::apps::v1::ReplicaSet;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::*;

/// ReplicaSet to Environment, Artifact, ArtifactVersion, RuntimeVersion and Deployment
pub struct ReplicaSetsHandler {
    environments: Arc<dyn Environments>,
    artifacts: Arc<dyn Artifacts>,
    runtimes: Arc<dyn Runtimes>,
    deployments: Arc<dyn Deployments>,
    patterns: Arc<ImagePatterns>,
}

impl ReplicaSetsHandler {
    #[must_use]
    pub fn new(repositories: &Repositories, patterns: Arc<ImagePatterns>) -> Self {
        Self {
            environments: repositories.environments.clone(),
            artifacts: repositories.artifacts.clone(),
            runtimes: repositories.runtimes.clone(),
            deployments: repositories.deployments.clone(),
            patterns,
        }
    }
}

#[async_trait]
impl Handler<ReplicaSet> for ReplicaSetsHandler {
    #[instrument(skip(self, replicaset), fields(namespace = %replicaset.namespace().unwrap_or_default(), name = %replicaset.name_any()))]
    async fn handle(&self, replicaset: Arc<ReplicaSet>, deleted: bool) -> Result<()> {
        if deleted {
            trace!("Skipping deleted replicaset");
            return Ok(());
        }
        let meta = &replicaset.metadata;
        let Some(identity) = Identity::from_metadata(meta) else {
            trace!("Skipping replicaset because it is missing microservice identifiers");
            return Ok(());
        };
        let Some(name) = label(meta, MICROSERVICE_LABEL) else {
            trace!("Skipping replicaset because it is missing the microservice name");
            return Ok(());
        };
        let Some(revision) = revision(&replicaset) else {
            trace!("Skipping replicaset because it has no deployment revision");
            return Ok(());
        };
        let Some(containers) = replicaset
            .spec
            .as_ref()
            .and_then(|spec| spec.template.as_ref())
            .and_then(|template| template.spec.as_ref())
            .and_then(runtime_and_head)
        else {
            trace!("Skipping replicaset because it does not have a runtime and head container");
            return Ok(());
        };
        let (Some(head_image), Some(runtime_image)) =
            (containers.head.image.as_deref(), containers.runtime.image.as_deref())
        else {
            trace!("Skipping replicaset because a container has no image");
            return Ok(());
        };
        let runtime_version = self.patterns.runtime_version(runtime_image)?;

        let Identity {
            tenant_id,
            application_id,
            environment,
            microservice_id,
        } = &identity;

        let environment = Environment::new(tenant_id, application_id, environment);
        self.environments.set(&environment).await?;
        debug!(uid = %environment.uid, "Updated environment");

        let artifact = Artifact::new(tenant_id, microservice_id);
        self.artifacts.set(&artifact).await?;
        debug!(uid = %artifact.uid, "Updated artifact");

        let version = ArtifactVersion::new(
            tenant_id,
            microservice_id,
            self.patterns.artifact_version_name(head_image),
            None,
        );
        self.artifacts.set_version(&version).await?;
        debug!(uid = %version.uid, "Updated artifact version");

        self.runtimes.set_version(&runtime_version).await?;
        debug!(uid = %runtime_version.uid, "Updated runtime version");

        let deployment = Deployment::new(
            tenant_id,
            application_id,
            &identity.environment,
            revision,
            name,
            replicaset.creation_timestamp().map_or_else(Utc::now, |created| created.0),
            &version.uid,
            &runtime_version.uid,
        );
        self.deployments.set(&deployment).await?;
        debug!(uid = %deployment.uid, "Updated deployment");
        Ok(())
    }
}
