use super::{pod_owner, revision, runtime_and_head};
use crate::{cache::Lister, Handler, Result};
use async_trait::async_trait;
use common::{
    entities::{Event, EventKind, EventUid},
    storage::Events,
    Identity, Repositories,
};
use k8s_openapi::api::{
    apps::v1::ReplicaSet,
    core::v1::{Event as ClusterEvent, Pod},
};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::*;

/// Reasons of pod events that say nothing about failures
const IGNORED_REASONS: &[&str] = &[
    "Created", "Failed", "Killed", "Pulled", "Pulling", "RELOAD", "Scheduled", "Started",
];

/// Kind of a `BackOff` event, from its message
fn back_off_kind(message: &str) -> Option<EventKind> {
    if message.contains("restarting") {
        Some(EventKind::FailedToStart)
    } else if message.contains("pulling") {
        Some(EventKind::FailedToPull)
    } else {
        None
    }
}

/// Cluster events of microservice pods to FailedToStart and FailedToPull events
pub struct EventsHandler {
    events: Arc<dyn Events>,
    pods: Arc<dyn Lister<Pod>>,
    replicasets: Arc<dyn Lister<ReplicaSet>>,
}

impl EventsHandler {
    #[must_use]
    pub fn new(
        repositories: &Repositories,
        pods: Arc<dyn Lister<Pod>>,
        replicasets: Arc<dyn Lister<ReplicaSet>>,
    ) -> Self {
        Self {
            events: repositories.events.clone(),
            pods,
            replicasets,
        }
    }
}

#[async_trait]
impl Handler<ClusterEvent> for EventsHandler {
    #[instrument(skip(self, event), fields(namespace = %event.namespace().unwrap_or_default(), name = %event.name_any()))]
    async fn handle(&self, event: Arc<ClusterEvent>, deleted: bool) -> Result<()> {
        if deleted {
            trace!("Skipping expired event");
            return Ok(());
        }
        let involved = &event.involved_object;
        if involved.kind.as_deref() != Some("Pod") {
            trace!("Skipping event because it does not involve a pod");
            return Ok(());
        }
        let Some(pod) = self.pods.get(
            involved.namespace.as_deref().unwrap_or_default(),
            involved.name.as_deref().unwrap_or_default(),
        ) else {
            trace!("Skipping event because the pod no longer exists");
            return Ok(());
        };
        let Some(identity) = Identity::from_metadata(&pod.metadata) else {
            trace!("Skipping event because the pod is missing microservice identifiers");
            return Ok(());
        };
        if pod.spec.as_ref().and_then(runtime_and_head).is_none() {
            trace!("Skipping event because the pod does not have a runtime and head container");
            return Ok(());
        }
        let owner = match pod_owner(&pod, self.replicasets.as_ref()) {
            Ok(owner) => owner,
            Err(e) => {
                trace!(error = %e, "Skipping event because the pod owner could not be found");
                return Ok(());
            }
        };
        let Some(revision) = revision(&owner) else {
            trace!("Skipping event because the pod owner has no deployment revision");
            return Ok(());
        };

        let reason = event.reason.as_deref().unwrap_or_default();
        if reason != "BackOff" {
            if !IGNORED_REASONS.contains(&reason) {
                warn!(reason, "Skipping event with unhandled reason");
            }
            return Ok(());
        }
        let message = event.message.as_deref().unwrap_or_default();
        let Some(kind) = back_off_kind(message) else {
            warn!(message, "Skipping BackOff event with unhandled message");
            return Ok(());
        };

        let first = event
            .first_timestamp
            .as_ref()
            .map(|time| time.0)
            .or_else(|| event.event_time.as_ref().map(|time| time.0));
        let last = event.last_timestamp.as_ref().map(|time| time.0).or(first);
        let (Some(first), Some(last)) = (first, last) else {
            trace!("Skipping event without timestamps");
            return Ok(());
        };
        let platform = involved
            .field_path
            .as_deref()
            .is_some_and(|path| path.contains("runtime"));

        let instance = identity.instance_uid(revision, &pod.uid().unwrap_or_default());
        let event = Event::new(
            EventUid::kubernetes(&event.uid().unwrap_or_default()),
            kind,
            event.count.unwrap_or(1),
            first,
            last,
            platform,
            &instance,
        );
        self.events.set(&event).await?;
        debug!(uid = %event.uid, "Updated event");
        Ok(())
    }
}
