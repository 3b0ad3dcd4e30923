use super::{pod_owner, revision, runtime_and_head, RUNTIME_CONTAINER};
use crate::{cache::Lister, Error, Handler, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    entities::{
        ArtifactConfiguration, DeploymentInstance, DeploymentInstanceUid, Event, EventKind, EventUid,
        NodeUid, RuntimeConfiguration,
    },
    storage::{Configurations, Deployments, Events},
    ConfigHasher, Identity, Repositories,
};
use k8s_openapi::api::{
    apps::v1::ReplicaSet,
    core::v1::{ConfigMap, Container, Pod, PodSpec, Secret},
};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::*;

const TENANTS_CONFIG_VOLUME: &str = "tenants-config";
const DOLITTLE_CONFIG_VOLUME: &str = "dolittle-config";
const CONFIG_FILES_VOLUME: &str = "config-files";
const ENV_VARIABLES_SUFFIX: &str = "-env-variables";
const SECRET_ENV_VARIABLES_SUFFIX: &str = "-secret-env-variables";

/// Names of the configuration objects a microservice pod mounts
struct ConfigurationRefs<'a> {
    tenants: &'a str,
    dolittle: &'a str,
    files: &'a str,
    env: &'a str,
    secret_env: &'a str,
}

impl<'a> ConfigurationRefs<'a> {
    fn of(spec: &'a PodSpec, head: &'a Container) -> Option<Self> {
        let volume = move |name: &str| {
            spec.volumes
                .iter()
                .flatten()
                .filter(|volume| volume.name == name)
                .find_map(|volume| volume.config_map.as_ref())
                .map(|source| source.name.as_str())
        };
        let sources = head.env_from.as_deref().unwrap_or_default();
        let env = sources
            .iter()
            .filter_map(|source| source.config_map_ref.as_ref())
            .map(|source| source.name.as_str())
            .find(|name| name.ends_with(ENV_VARIABLES_SUFFIX));
        let secret_env = sources
            .iter()
            .filter_map(|source| source.secret_ref.as_ref())
            .map(|source| source.name.as_str())
            .find(|name| name.ends_with(SECRET_ENV_VARIABLES_SUFFIX));
        Some(Self {
            tenants: volume(TENANTS_CONFIG_VOLUME)?,
            dolittle: volume(DOLITTLE_CONFIG_VOLUME)?,
            files: volume(CONFIG_FILES_VOLUME)?,
            env: env?,
            secret_env: secret_env?,
        })
    }
}

/// Restarts of a group of containers
#[derive(Default)]
struct Restarts {
    count: i32,
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
}

impl Restarts {
    fn add(&mut self, count: i32, terminated: DateTime<Utc>) {
        self.count = self.count.saturating_add(count);
        self.first = Some(self.first.map_or(terminated, |first| first.min(terminated)));
        self.last = Some(self.last.map_or(terminated, |last| last.max(terminated)));
    }

    fn into_event(self, instance: &DeploymentInstanceUid, platform: bool) -> Option<Event> {
        Some(Event::new(
            EventUid::restart(instance, platform),
            EventKind::Restart,
            self.count,
            self.first?,
            self.last?,
            platform,
            instance,
        ))
    }
}

/// Splits the restarts of the pod into the platform and the customer containers
fn restarts(pod: &Pod) -> (Restarts, Restarts) {
    let mut platform = Restarts::default();
    let mut customer = Restarts::default();
    let statuses = pod
        .status
        .iter()
        .flat_map(|status| status.container_statuses.iter().flatten());
    for status in statuses {
        if status.restart_count <= 0 {
            continue;
        }
        let terminated = status
            .last_state
            .as_ref()
            .and_then(|state| state.terminated.as_ref())
            .or_else(|| status.state.as_ref().and_then(|state| state.terminated.as_ref()));
        let Some(finished) = terminated.and_then(|terminated| terminated.finished_at.as_ref()) else {
            continue;
        };
        let bucket = if status.name == RUNTIME_CONTAINER {
            &mut platform
        } else {
            &mut customer
        };
        bucket.add(status.restart_count, finished.0);
    }
    (platform, customer)
}

/// Pod to configurations, DeploymentInstance and restart events
pub struct PodsHandler {
    configurations: Arc<dyn Configurations>,
    deployments: Arc<dyn Deployments>,
    events: Arc<dyn Events>,
    configmaps: Arc<dyn Lister<ConfigMap>>,
    secrets: Arc<dyn Lister<Secret>>,
    replicasets: Arc<dyn Lister<ReplicaSet>>,
}

impl PodsHandler {
    #[must_use]
    pub fn new(
        repositories: &Repositories,
        configmaps: Arc<dyn Lister<ConfigMap>>,
        secrets: Arc<dyn Lister<Secret>>,
        replicasets: Arc<dyn Lister<ReplicaSet>>,
    ) -> Self {
        Self {
            configurations: repositories.configurations.clone(),
            deployments: repositories.deployments.clone(),
            events: repositories.events.clone(),
            configmaps,
            secrets,
            replicasets,
        }
    }

    fn config_map(&self, namespace: &str, name: &str) -> Result<Arc<ConfigMap>> {
        self.configmaps
            .get(namespace, name)
            .ok_or_else(|| Error::MissingConfiguration(format!("ConfigMap {namespace}/{name}")))
    }

    fn secret(&self, namespace: &str, name: &str) -> Result<Arc<Secret>> {
        self.secrets
            .get(namespace, name)
            .ok_or_else(|| Error::MissingConfiguration(format!("Secret {namespace}/{name}")))
    }

    async fn update(&self, pod: &Pod) -> Result<()> {
        let Some(identity) = Identity::from_metadata(&pod.metadata) else {
            trace!("Skipping pod because it is missing microservice identifiers");
            return Ok(());
        };
        let Some(spec) = pod.spec.as_ref() else {
            trace!("Skipping pod without spec");
            return Ok(());
        };
        let Some(containers) = runtime_and_head(spec) else {
            trace!("Skipping pod because it does not have a runtime and head container");
            return Ok(());
        };
        let Some(refs) = ConfigurationRefs::of(spec, containers.head) else {
            trace!("Skipping pod because it is missing configuration references");
            return Ok(());
        };
        let namespace = pod.namespace().unwrap_or_default();

        let mut runtime_hasher = ConfigHasher::new();
        runtime_hasher.write_config_map(&*self.config_map(&namespace, refs.tenants)?);
        runtime_hasher.write_config_map(&*self.config_map(&namespace, refs.dolittle)?);

        let mut artifact_hasher = ConfigHasher::new();
        artifact_hasher.write_config_map(&*self.config_map(&namespace, refs.files)?);
        artifact_hasher.write_config_map(&*self.config_map(&namespace, refs.env)?);
        artifact_hasher.write_secret(&*self.secret(&namespace, refs.secret_env)?);

        let owner = pod_owner(pod, self.replicasets.as_ref())?;
        let Some(revision) = revision(&owner) else {
            trace!("Skipping pod because its replicaset has no deployment revision");
            return Ok(());
        };

        let runtime_config = RuntimeConfiguration::new(
            &identity.tenant_id,
            &identity.application_id,
            &identity.environment,
            &identity.microservice_id,
            &runtime_hasher.finish(),
        );
        self.configurations.set_runtime(&runtime_config).await?;
        debug!(uid = %runtime_config.uid, "Updated runtime configuration");

        let artifact_config = ArtifactConfiguration::new(
            &identity.tenant_id,
            &identity.application_id,
            &identity.environment,
            &identity.microservice_id,
            &artifact_hasher.finish(),
        );
        self.configurations.set_artifact(&artifact_config).await?;
        debug!(uid = %artifact_config.uid, "Updated artifact configuration");

        let pod_uid = pod.uid().unwrap_or_default();
        let mut instance = DeploymentInstance::new(
            &identity.deployment_uid(revision),
            &pod_uid,
            pod.creation_timestamp().map_or_else(Utc::now, |created| created.0),
            &artifact_config.uid,
            &runtime_config.uid,
            spec.node_name.as_deref().map(NodeUid::new),
        );
        let stored = self.deployments.get_instance(instance.uid.as_str()).await?;
        instance.properties.stopped = stored.and_then(|stored| stored.properties.stopped);
        self.deployments.set_instance(&instance).await?;
        debug!(uid = %instance.uid, "Updated deployment instance");

        let (platform, customer) = restarts(pod);
        for event in [
            platform.into_event(&instance.uid, true),
            customer.into_event(&instance.uid, false),
        ]
        .into_iter()
        .flatten()
        {
            let stored = self.events.get(event.uid.as_str()).await?;
            match event.merge_counter(stored.as_ref()) {
                Some(event) => {
                    self.events.set(&event).await?;
                    debug!(uid = %event.uid, count = event.properties.count, "Updated restart event");
                }
                None => trace!("Restart count did not grow"),
            }
        }
        Ok(())
    }

    async fn stop(&self, pod: &Pod) -> Result<()> {
        let Some(identity) = Identity::from_metadata(&pod.metadata) else {
            trace!("Skipping deleted pod because it is missing microservice identifiers");
            return Ok(());
        };
        let owner = match pod_owner(pod, self.replicasets.as_ref()) {
            Ok(owner) => owner,
            Err(e) => {
                // The sweep stops the instance once the owner is gone
                trace!(error = %e, "Skipping deleted pod without resolvable owner");
                return Ok(());
            }
        };
        let Some(revision) = revision(&owner) else {
            trace!("Skipping deleted pod because its replicaset has no deployment revision");
            return Ok(());
        };
        let uid = identity.instance_uid(revision, &pod.uid().unwrap_or_default());
        let Some(mut instance) = self.deployments.get_instance(uid.as_str()).await? else {
            trace!(uid = %uid, "Deleted pod has no stored instance");
            return Ok(());
        };
        if instance.stop(Utc::now()) {
            self.deployments.set_instance(&instance).await?;
            info!(uid = %instance.uid, "Marked deployment instance as stopped");
        }
        Ok(())
    }
}

#[async_trait]
impl Handler<Pod> for PodsHandler {
    #[instrument(skip(self, pod), fields(namespace = %pod.namespace().unwrap_or_default(), name = %pod.name_any()))]
    async fn handle(&self, pod: Arc<Pod>, deleted: bool) -> Result<()> {
        if deleted {
            self.stop(&pod).await
        } else {
            self.update(&pod).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handlers::fixtures::*, observer::tests::store_of};
    use k8s_openapi::{
        api::core::v1::{ContainerState, ContainerStateTerminated, ContainerStatus, PodStatus},
        apimachinery::pkg::apis::meta::v1::Time,
    };

    struct Cluster {
        repositories: Repositories,
        handler: PodsHandler,
    }

    fn cluster(config_maps: Vec<ConfigMap>, replicasets: Vec<ReplicaSet>) -> Cluster {
        let repositories = Repositories::in_memory();
        let handler = PodsHandler::new(
            &repositories,
            Arc::new(store_of(config_maps)),
            Arc::new(store_of(vec![secret()])),
            Arc::new(store_of(replicasets)),
        );
        Cluster { repositories, handler }
    }

    fn terminated(finished: DateTime<Utc>) -> Option<ContainerState> {
        Some(ContainerState {
            terminated: Some(ContainerStateTerminated {
                finished_at: Some(Time(finished)),
                ..ContainerStateTerminated::default()
            }),
            ..ContainerState::default()
        })
    }

    fn status(name: &str, restart_count: i32, finished: DateTime<Utc>) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            restart_count,
            last_state: terminated(finished),
            ..ContainerStatus::default()
        }
    }

    fn restarted_pod(statuses: Vec<ContainerStatus>) -> Pod {
        let mut pod = pod();
        pod.status = Some(PodStatus {
            container_statuses: Some(statuses),
            ..PodStatus::default()
        });
        pod
    }

    const INSTANCE: &str = "t1/a1/Dev/4/0b6a3f52-pod";

    #[tokio::test]
    async fn test_pod_yields_configurations_and_instance() {
        let cluster = cluster(config_maps(), vec![replicaset()]);
        cluster.handler.handle(Arc::new(pod()), false).await.unwrap();

        let instance = cluster
            .repositories
            .deployments
            .get_instance(INSTANCE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.properties.id, POD_UID);
        assert_eq!(instance.properties.started, at(8));
        assert_eq!(instance.properties.stopped, None);
        assert_eq!(instance.links.instance_of.as_str(), "t1/a1/Dev/4");
        assert_eq!(
            instance.links.scheduled_on.as_ref().map(|node| node.as_str()),
            Some("aks-node-0")
        );

        let artifacts = cluster.repositories.configurations.list_artifacts().await.unwrap();
        let runtimes = cluster.repositories.configurations.list_runtimes().await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(runtimes.len(), 1);
        assert_eq!(instance.links.uses_artifact_configuration, artifacts[0].uid);
        assert_eq!(instance.links.uses_runtime_configuration, runtimes[0].uid);
        assert!(artifacts[0].uid.as_str().starts_with("t1/a1/Dev/m1/"));
        assert_ne!(
            artifacts[0].properties.content_hash,
            runtimes[0].properties.content_hash
        );
    }

    #[tokio::test]
    async fn test_changed_configuration_changes_fingerprint() {
        let cluster = cluster(config_maps(), vec![replicaset()]);
        cluster.handler.handle(Arc::new(pod()), false).await.unwrap();

        let mut changed = config_maps();
        changed[2] = config_map("dev-shop-config-files", &[("appsettings.json", "{\"a\":2}")]);
        let other = cluster_with_repositories(&cluster.repositories, changed);
        other.handle(Arc::new(pod()), false).await.unwrap();

        let artifacts = cluster.repositories.configurations.list_artifacts().await.unwrap();
        let runtimes = cluster.repositories.configurations.list_runtimes().await.unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(runtimes.len(), 1);
    }

    fn cluster_with_repositories(repositories: &Repositories, config_maps: Vec<ConfigMap>) -> PodsHandler {
        PodsHandler::new(
            repositories,
            Arc::new(store_of(config_maps)),
            Arc::new(store_of(vec![secret()])),
            Arc::new(store_of(vec![replicaset()])),
        )
    }

    #[tokio::test]
    async fn test_missing_config_map_is_irrecoverable() {
        let mut config_maps = config_maps();
        config_maps.remove(0);
        let cluster = cluster(config_maps, vec![replicaset()]);
        let error = cluster.handler.handle(Arc::new(pod()), false).await.unwrap_err();
        assert!(matches!(error, Error::MissingConfiguration(_)));
        assert!(error.is_irrecoverable());
        assert!(cluster.repositories.deployments.list_instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_configuration_reference_is_skipped() {
        let cluster = cluster(config_maps(), vec![replicaset()]);
        let mut pod = pod();
        pod.spec.as_mut().unwrap().volumes = None;
        cluster.handler.handle(Arc::new(pod), false).await.unwrap();
        assert!(cluster.repositories.deployments.list_instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_owner_not_cached_is_retried() {
        let cluster = cluster(config_maps(), vec![]);
        let error = cluster.handler.handle(Arc::new(pod()), false).await.unwrap_err();
        assert!(matches!(error, Error::OwnerNotCached(_)));
        assert!(!error.is_irrecoverable());
    }

    #[tokio::test]
    async fn test_deletion_stops_instance_once() {
        let cluster = cluster(config_maps(), vec![replicaset()]);
        cluster.handler.handle(Arc::new(pod()), false).await.unwrap();
        cluster.handler.handle(Arc::new(pod()), true).await.unwrap();
        let stopped = cluster
            .repositories
            .deployments
            .get_instance(INSTANCE)
            .await
            .unwrap()
            .unwrap()
            .properties
            .stopped;
        assert!(stopped.is_some());

        // Neither a second deletion nor a stale update clears or moves it
        cluster.handler.handle(Arc::new(pod()), true).await.unwrap();
        cluster.handler.handle(Arc::new(pod()), false).await.unwrap();
        let instance = cluster
            .repositories
            .deployments
            .get_instance(INSTANCE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.properties.stopped, stopped);
        assert!(cluster.repositories.deployments.list_running_instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restarts_are_bucketed_and_monotonic() {
        let cluster = cluster(config_maps(), vec![replicaset()]);
        let pod = restarted_pod(vec![
            status("runtime", 2, at(10)),
            status("head", 1, at(11)),
            status("sidecar", 3, at(9)),
            status("healthy", 0, at(12)),
        ]);
        cluster.handler.handle(Arc::new(pod), false).await.unwrap();

        let platform = cluster
            .repositories
            .events
            .get(&format!("restart/{INSTANCE}/platform"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(platform.kind, "RestartEvent");
        assert!(platform.properties.platform);
        assert_eq!(platform.properties.count, 2);
        assert_eq!(platform.links.happened_to.as_str(), INSTANCE);

        let customer_uid = format!("restart/{INSTANCE}/customer");
        let customer = cluster.repositories.events.get(&customer_uid).await.unwrap().unwrap();
        assert!(!customer.properties.platform);
        assert_eq!(customer.properties.count, 4);
        assert_eq!(customer.properties.first_time, at(9));
        assert_eq!(customer.properties.last_time, at(11));

        // A stale redelivery with fewer restarts keeps the stored event
        let stale = restarted_pod(vec![status("head", 1, at(13))]);
        cluster.handler.handle(Arc::new(stale), false).await.unwrap();
        let kept = cluster.repositories.events.get(&customer_uid).await.unwrap().unwrap();
        assert_eq!(kept, customer);

        // More restarts in a narrower window keep the stored window
        let grown = restarted_pod(vec![status("head", 6, at(10))]);
        cluster.handler.handle(Arc::new(grown), false).await.unwrap();
        let grown = cluster.repositories.events.get(&customer_uid).await.unwrap().unwrap();
        assert_eq!(grown.properties.count, 6);
        assert_eq!(grown.properties.first_time, at(9));
        assert_eq!(grown.properties.last_time, at(11));
    }

    #[test]
    fn test_restarts_need_termination_info() {
        let mut running = status("head", 2, at(1));
        running.last_state = None;
        let (platform, customer) = restarts(&restarted_pod(vec![running]));
        assert_eq!(platform.count, 0);
        assert_eq!(customer.count, 0);
        assert!(customer.into_event(&DeploymentInstanceUid::from(INSTANCE.to_string()), false).is_none());
    }
}
