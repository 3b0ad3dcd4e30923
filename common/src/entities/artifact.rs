use super::{entity, CustomerUid, Family};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

uid_type!(
    /// `customer/artifact`
    ArtifactUid
);

impl ArtifactUid {
    #[must_use]
    pub fn new(customer_id: &str, artifact_id: &str) -> Self {
        Self(format!("{}/{}", CustomerUid::new(customer_id), artifact_id))
    }
}

uid_type!(
    /// `customer/artifact/version`
    ArtifactVersionUid
);

impl ArtifactVersionUid {
    #[must_use]
    pub fn new(customer_id: &str, artifact_id: &str, version: &str) -> Self {
        Self(format!("{}/{}", ArtifactUid::new(customer_id, artifact_id), version))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ArtifactProperties {
    pub id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactLinks {
    pub developed_by: CustomerUid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub uid: ArtifactUid,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: ArtifactProperties,
    pub links: ArtifactLinks,
}
entity!(Artifact, Family::Artifact);

impl Artifact {
    #[must_use]
    pub fn new(customer_id: &str, id: &str) -> Self {
        Self {
            uid: ArtifactUid::new(customer_id, id),
            kind: Family::Artifact.label().to_string(),
            properties: ArtifactProperties { id: id.to_string() },
            links: ArtifactLinks {
                developed_by: CustomerUid::new(customer_id),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ArtifactVersionProperties {
    pub name: String,
    /// Unknown when observed from a cluster
    pub released: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactVersionLinks {
    pub version_of: ArtifactUid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ArtifactVersion {
    pub uid: ArtifactVersionUid,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: ArtifactVersionProperties,
    pub links: ArtifactVersionLinks,
}
entity!(ArtifactVersion, Family::ArtifactVersion);

impl ArtifactVersion {
    #[must_use]
    pub fn new(customer_id: &str, artifact_id: &str, name: &str, released: Option<DateTime<Utc>>) -> Self {
        Self {
            uid: ArtifactVersionUid::new(customer_id, artifact_id, name),
            kind: Family::ArtifactVersion.label().to_string(),
            properties: ArtifactVersionProperties {
                name: name.to_string(),
                released,
            },
            links: ArtifactVersionLinks {
                version_of: ArtifactUid::new(customer_id, artifact_id),
            },
        }
    }
}
