use super::{entity, Family, NoLinks};
use serde::{Deserialize, Serialize};

uid_type!(
    /// Cluster node name
    NodeUid
);

impl NodeUid {
    #[must_use]
    pub fn new(node_name: &str) -> Self {
        Self(node_name.to_string())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NodeProperties {
    pub hostname: String,
    pub image: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub uid: NodeUid,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: NodeProperties,
    #[serde(default)]
    pub links: NoLinks,
}
entity!(Node, Family::Node);

impl Node {
    #[must_use]
    pub fn new(node_name: &str, hostname: &str, image: &str, node_type: &str) -> Self {
        Self {
            uid: NodeUid::new(node_name),
            kind: Family::Node.label().to_string(),
            properties: NodeProperties {
                hostname: hostname.to_string(),
                image: image.to_string(),
                node_type: node_type.to_string(),
            },
            links: NoLinks::default(),
        }
    }
}
