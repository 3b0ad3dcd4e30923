//! Periodic reconciliation of the instances still considered running.
//!
//! Pods can vanish without the observer ever seeing their deletion, for instance
//! while the watch was being re-established. The cleanup marks the instances of
//! such pods as stopped.
use crate::{cache::Lister, manager::Context, Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use common::{storage::Deployments, Repositories};
use k8s_openapi::api::core::v1::Pod;
use kube::{runtime::reflector::Store, ResourceExt};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::*;

const FIRST_RUN_DELAY: Duration = Duration::from_secs(1);

#[async_trait]
pub trait Cleaner: Send + Sync {
    /// One pass, aborted with [`Error::Cancelled`] once shutdown is requested
    async fn cleanup(&self, shutdown: &watch::Receiver<bool>) -> Result<()>;
}

fn cancelled(shutdown: &watch::Receiver<bool>) -> Result<()> {
    if *shutdown.borrow() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Pods in a terminal phase no longer back a running instance
fn is_live(pod: &Pod) -> bool {
    !matches!(
        pod.status.as_ref().and_then(|status| status.phase.as_deref()),
        Some("Failed" | "Succeeded")
    )
}

/// Stops the instances whose pod is gone
pub struct Instances {
    deployments: Arc<dyn Deployments>,
    pods: Arc<dyn Lister<Pod>>,
    ctx: Arc<Context>,
}

impl Instances {
    #[must_use]
    pub fn new(repositories: &Repositories, pods: Arc<dyn Lister<Pod>>, ctx: Arc<Context>) -> Self {
        Self {
            deployments: repositories.deployments.clone(),
            pods,
            ctx,
        }
    }
}

#[async_trait]
impl Cleaner for Instances {
    async fn cleanup(&self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        cancelled(shutdown)?;
        let running = self.deployments.list_running_instances().await?;
        // Listed after the instances, so an instance never predates the pod listing
        let live: HashSet<String> = self
            .pods
            .list_all()
            .iter()
            .filter(|pod| is_live(pod))
            .filter_map(|pod| pod.uid())
            .collect();

        for mut instance in running {
            cancelled(shutdown)?;
            if instance.is_stopped() {
                warn!(uid = %instance.uid, "DeploymentInstance already stopped");
                continue;
            }
            if live.contains(&instance.properties.id) {
                continue;
            }
            info!(uid = %instance.uid, "Marking DeploymentInstance as stopped since its pod doesn't exist anymore");
            instance.stop(Utc::now());
            self.deployments.set_instance(&instance).await?;
            self.ctx.metrics.instances_stopped(1);
        }
        Ok(())
    }
}

/// Runs the cleaner one second after the pod cache is ready, then every `period`
pub async fn run_cleaner(
    name: &'static str,
    cleaner: Arc<dyn Cleaner>,
    pods: Store<Pod>,
    period: Duration,
    ctx: Arc<Context>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut delay = FIRST_RUN_DELAY;
    while !*shutdown.borrow() {
        tokio::select! {
            ready = pods.wait_until_ready() => if ready.is_err() {
                warn!(cleanup = name, "Pod cache dropped, stopping cleanup");
                return;
            },
            _ = shutdown.changed() => break,
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = shutdown.changed() => break,
        }

        debug!(cleanup = name, "Running cleanup");
        ctx.metrics.cleanup_run();
        match cleaner.cleanup(&shutdown).await {
            Ok(()) => ctx.diagnostics.write().await.last_cleanup = Some(Utc::now()),
            Err(Error::Cancelled) => break,
            Err(e) => error!(cleanup = name, error = %e, "Cleanup failed"),
        }
        delay = period;
    }
    debug!(cleanup = name, "Stopping cleanup");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handlers::fixtures::*, observer::tests::store_of};
    use common::entities::{
        ArtifactConfigurationUid, DeploymentInstance, DeploymentUid, RuntimeConfigurationUid,
    };
    use k8s_openapi::{api::core::v1::PodStatus, apimachinery::pkg::apis::meta::v1::ObjectMeta};

    fn instance(pod_uid: &str) -> DeploymentInstance {
        DeploymentInstance::new(
            &DeploymentUid::new("t1", "a1", "Dev", "4"),
            pod_uid,
            at(8),
            &ArtifactConfigurationUid::new("t1", "a1", "Dev", "m1", "aa"),
            &RuntimeConfigurationUid::new("t1", "a1", "Dev", "m1", "bb"),
            None,
        )
    }

    fn live_pod(uid: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(format!("pod-{uid}")),
                namespace: Some(NAMESPACE.to_string()),
                uid: Some(uid.to_string()),
                ..ObjectMeta::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    async fn stored(repositories: &Repositories, instances: &[DeploymentInstance]) {
        for instance in instances {
            repositories.deployments.set_instance(instance).await.unwrap();
        }
    }

    async fn stopped_at(repositories: &Repositories, pod_uid: &str) -> Option<chrono::DateTime<Utc>> {
        repositories
            .deployments
            .get_instance(instance(pod_uid).uid.as_str())
            .await
            .unwrap()
            .unwrap()
            .properties
            .stopped
    }

    fn cleaner(repositories: &Repositories, pods: Vec<Pod>) -> Instances {
        Instances::new(
            repositories,
            Arc::new(store_of(pods)),
            Arc::new(Context::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_instances_without_live_pod_are_stopped() {
        let repositories = Repositories::in_memory();
        stored(&repositories, &[instance("alive"), instance("gone"), instance("failed")]).await;
        let cleaner = cleaner(
            &repositories,
            vec![live_pod("alive", "Running"), live_pod("failed", "Failed")],
        );
        let (_tx, shutdown) = watch::channel(false);
        cleaner.cleanup(&shutdown).await.unwrap();

        assert_eq!(stopped_at(&repositories, "alive").await, None);
        assert!(stopped_at(&repositories, "gone").await.is_some());
        assert!(stopped_at(&repositories, "failed").await.is_some());
        assert_eq!(cleaner.ctx.metrics.cleanup_stopped.get(), 2);
        let running = repositories.deployments.list_running_instances().await.unwrap();
        assert_eq!(running.len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_instance_is_not_rewritten() {
        let repositories = Repositories::in_memory();
        let mut done = instance("done");
        done.stop(at(9));
        stored(&repositories, &[done]).await;
        let (_tx, shutdown) = watch::channel(false);
        cleaner(&repositories, vec![]).cleanup(&shutdown).await.unwrap();
        assert_eq!(stopped_at(&repositories, "done").await, Some(at(9)));
    }

    #[tokio::test]
    async fn test_cancelled_cleanup_writes_nothing() {
        let repositories = Repositories::in_memory();
        stored(&repositories, &[instance("gone")]).await;
        let (tx, shutdown) = watch::channel(false);
        tx.send(true).unwrap();
        let error = cleaner(&repositories, vec![]).cleanup(&shutdown).await.unwrap_err();
        assert!(matches!(error, Error::Cancelled));
        assert_eq!(stopped_at(&repositories, "gone").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_sweeps_then_stops_on_shutdown() {
        let repositories = Repositories::in_memory();
        stored(&repositories, &[instance("gone")]).await;
        let ctx = Arc::new(Context::new().unwrap());
        let pods = store_of(Vec::<Pod>::new());
        let cleaner = Arc::new(Instances::new(&repositories, Arc::new(pods.clone()), ctx.clone()));
        let (tx, shutdown) = watch::channel(false);
        let runner = tokio::spawn(run_cleaner(
            "instances",
            cleaner,
            pods,
            Duration::from_secs(60),
            ctx.clone(),
            shutdown,
        ));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(stopped_at(&repositories, "gone").await.is_some());
        assert_eq!(ctx.metrics.cleanup_runs.get(), 1);
        assert!(ctx.diagnostics.read().await.last_cleanup.is_some());

        tx.send(true).unwrap();
        runner.await.unwrap();
        assert_eq!(ctx.metrics.cleanup_runs.get(), 1);
    }
}
