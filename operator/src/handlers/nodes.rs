use crate::{Handler, Result};
use async_trait::async_trait;
use common::{entities::Node, identity::label, storage::Nodes, Repositories};
use k8s_openapi::api::core::v1::Node as ClusterNode;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::*;

pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";
pub const IMAGE_LABEL: &str = "kubernetes.azure.com/node-image-version";
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";

pub struct NodesHandler {
    nodes: Arc<dyn Nodes>,
}

impl NodesHandler {
    #[must_use]
    pub fn new(repositories: &Repositories) -> Self {
        Self {
            nodes: repositories.nodes.clone(),
        }
    }
}

#[async_trait]
impl Handler<ClusterNode> for NodesHandler {
    #[instrument(skip(self, node), fields(node = %node.name_any()))]
    async fn handle(&self, node: Arc<ClusterNode>, deleted: bool) -> Result<()> {
        if deleted {
            trace!("Skipping deleted node");
            return Ok(());
        }
        let meta = &node.metadata;
        let Some(hostname) = label(meta, HOSTNAME_LABEL) else {
            trace!("Skipping node because it does not have a hostname label");
            return Ok(());
        };
        let Some(image) = label(meta, IMAGE_LABEL) else {
            trace!("Skipping node because it does not have a node-image-version label");
            return Ok(());
        };
        let Some(node_type) = label(meta, INSTANCE_TYPE_LABEL) else {
            trace!("Skipping node because it does not have an instance-type label");
            return Ok(());
        };

        let entity = Node::new(&node.name_any(), hostname, image, node_type);
        self.nodes.set(&entity).await?;
        debug!(uid = %entity.uid, "Updated node");
        Ok(())
    }
}
