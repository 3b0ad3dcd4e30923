//! Handlers deriving fleet entities from cluster objects.
//!
//! Every handler skips objects that are not part of the fleet without error, and
//! returns storage failures to its observer so the key gets retried.
use crate::{cache::Lister, Error, Result};
use k8s_openapi::api::{
    apps::v1::ReplicaSet,
    core::v1::{Container, Pod, PodSpec},
};
use kube::ResourceExt;
use std::sync::Arc;

pub mod events;
pub mod namespaces;
pub mod nodes;
pub mod pods;
pub mod replicasets;

pub use events::EventsHandler;
pub use namespaces::NamespacesHandler;
pub use nodes::NodesHandler;
pub use pods::PodsHandler;
pub use replicasets::ReplicaSetsHandler;

pub const RUNTIME_CONTAINER: &str = "runtime";
pub const HEAD_CONTAINER: &str = "head";
pub const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// The two containers every microservice pod runs
pub struct Containers<'a> {
    pub runtime: &'a Container,
    pub head: &'a Container,
}

#[must_use]
pub fn runtime_and_head(spec: &PodSpec) -> Option<Containers<'_>> {
    let find = |name: &str| spec.containers.iter().find(|container| container.name == name);
    Some(Containers {
        runtime: find(RUNTIME_CONTAINER)?,
        head: find(HEAD_CONTAINER)?,
    })
}

/// Deployment revision the ReplicaSet was rolled out for
#[must_use]
pub fn revision(replicaset: &ReplicaSet) -> Option<&str> {
    replicaset.annotations().get(REVISION_ANNOTATION).map(String::as_str)
}

/// Finds the single ReplicaSet owning the pod in the cache
pub fn pod_owner(pod: &Pod, replicasets: &dyn Lister<ReplicaSet>) -> Result<Arc<ReplicaSet>> {
    let namespace = pod.namespace().unwrap_or_default();
    let mut owners = pod
        .owner_references()
        .iter()
        .filter(|owner| owner.kind == "ReplicaSet");
    let owner = owners
        .next()
        .ok_or_else(|| Error::PodOwnerNotFound(format!("{namespace}/{}", pod.name_any())))?;
    if owners.next().is_some() {
        return Err(Error::AmbiguousPodOwner(format!("{namespace}/{}", pod.name_any())));
    }
    replicasets
        .get(&namespace, &owner.name)
        .ok_or_else(|| Error::OwnerNotCached(format!("{namespace}/{}", owner.name)))
}
