use crate::{
    cache::spawn_cache,
    cleanup::{run_cleaner, Instances},
    handlers::{EventsHandler, NamespacesHandler, NodesHandler, PodsHandler, ReplicaSetsHandler},
    patterns::ImagePatterns,
    Error, Metrics, Observer, Result,
};
use chrono::{DateTime, Utc};
use common::Repositories;
use futures::{future::BoxFuture, FutureExt};
use k8s_openapi::api::{
    apps::v1::ReplicaSet,
    core::v1::{ConfigMap, Event, Namespace, Node, Pod, Secret},
};
use kube::{api::Api, client::Client};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::sync::{watch, RwLock};
use tracing::*;

// Context shared by the observers and the cleanup
pub struct Context {
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

impl Context {
    pub fn new() -> Result<Self> {
        Ok(Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            metrics: Metrics::new()?,
        })
    }
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub started: DateTime<Utc>,
    pub last_event: Option<DateTime<Utc>>,
    pub last_cleanup: Option<DateTime<Utc>>,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            started: Utc::now(),
            last_event: None,
            last_cleanup: None,
        }
    }
}

/// Data owned by the Manager
#[derive(Clone)]
pub struct Manager {
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Metrics,
}

/// Manager that owns the observers and the cleanup
impl Manager {
    /// Lifecycle initialization interface for app
    ///
    /// Waits for the configuration caches, then starts every observer and the
    /// cleanup. The returned future completes once all of them stopped after
    /// `shutdown` was signaled.
    pub async fn new(
        client: Client,
        repositories: Repositories,
        cleanup_period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, BoxFuture<'static, ()>)> {
        let ctx = Arc::new(Context::new()?);
        let manager = Manager {
            diagnostics: ctx.diagnostics.clone(),
            metrics: ctx.metrics.clone(),
        };
        let patterns = Arc::new(ImagePatterns::new()?);

        let configmaps = spawn_cache("configmaps", Api::<ConfigMap>::all(client.clone()), shutdown.clone());
        let secrets = spawn_cache("secrets", Api::<Secret>::all(client.clone()), shutdown.clone());

        let namespaces = Observer::new("namespaces", Api::<Namespace>::all(client.clone()), ctx.clone());
        let replicasets = Observer::new("replicasets", Api::<ReplicaSet>::all(client.clone()), ctx.clone());
        let pods = Observer::new("pods", Api::<Pod>::all(client.clone()), ctx.clone());
        let events = Observer::new("events", Api::<Event>::all(client.clone()), ctx.clone());
        let nodes = Observer::new("nodes", Api::<Node>::all(client), ctx.clone());
        let replicaset_store = replicasets.store();
        let pod_store = pods.store();

        // Pods are fingerprinted from these, never against a partial cache
        info!("Waiting for the configuration caches");
        tokio::select! {
            ready = futures::future::try_join(configmaps.wait_until_ready(), secrets.wait_until_ready()) => {
                if ready.is_err() {
                    return Err(Error::Cancelled);
                }
            },
            _ = shutdown.changed() => return Err(Error::Cancelled),
        }

        let handles = vec![
            namespaces.start(Arc::new(NamespacesHandler::new(&repositories)), shutdown.clone()),
            replicasets.start(
                Arc::new(ReplicaSetsHandler::new(&repositories, patterns)),
                shutdown.clone(),
            ),
            pods.start(
                Arc::new(PodsHandler::new(
                    &repositories,
                    Arc::new(configmaps),
                    Arc::new(secrets),
                    Arc::new(replicaset_store.clone()),
                )),
                shutdown.clone(),
            ),
            events.start(
                Arc::new(EventsHandler::new(
                    &repositories,
                    Arc::new(pod_store.clone()),
                    Arc::new(replicaset_store),
                )),
                shutdown.clone(),
            ),
            nodes.start(Arc::new(NodesHandler::new(&repositories)), shutdown.clone()),
            tokio::spawn(run_cleaner(
                "instances",
                Arc::new(Instances::new(&repositories, Arc::new(pod_store.clone()), ctx.clone())),
                pod_store,
                cleanup_period,
                ctx,
                shutdown,
            )),
        ];
        let stopped = futures::future::join_all(handles)
            .map(|results| {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Observer task failed");
                    }
                }
            })
            .boxed();
        Ok((manager, stopped))
    }

    /// Metrics getter
    pub fn metrics(&self) -> Result<String> {
        self.metrics.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}
