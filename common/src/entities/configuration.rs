use super::{entity, EnvironmentUid, Family, NoLinks};
use serde::{Deserialize, Serialize};

fn configuration_uid(customer_id: &str, application_id: &str, environment: &str, artifact_id: &str, hash: &str) -> String {
    format!(
        "{}/{}/{}",
        EnvironmentUid::new(customer_id, application_id, environment),
        artifact_id,
        hash
    )
}

uid_type!(
    /// `customer/application/environment/artifact/hash`
    ArtifactConfigurationUid
);

impl ArtifactConfigurationUid {
    #[must_use]
    pub fn new(customer_id: &str, application_id: &str, environment: &str, artifact_id: &str, hash: &str) -> Self {
        Self(configuration_uid(customer_id, application_id, environment, artifact_id, hash))
    }
}

uid_type!(
    /// `customer/application/environment/artifact/hash`
    RuntimeConfigurationUid
);

impl RuntimeConfigurationUid {
    #[must_use]
    pub fn new(customer_id: &str, application_id: &str, environment: &str, artifact_id: &str, hash: &str) -> Self {
        Self(configuration_uid(customer_id, application_id, environment, artifact_id, hash))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationProperties {
    pub content_hash: String,
}

/// Fingerprint of the customer facing configuration of a microservice
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ArtifactConfiguration {
    pub uid: ArtifactConfigurationUid,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: ConfigurationProperties,
    #[serde(default)]
    pub links: NoLinks,
}
entity!(ArtifactConfiguration, Family::ArtifactConfiguration);

impl ArtifactConfiguration {
    #[must_use]
    pub fn new(customer_id: &str, application_id: &str, environment: &str, artifact_id: &str, hash: &str) -> Self {
        Self {
            uid: ArtifactConfigurationUid::new(customer_id, application_id, environment, artifact_id, hash),
            kind: Family::ArtifactConfiguration.label().to_string(),
            properties: ConfigurationProperties {
                content_hash: hash.to_string(),
            },
            links: NoLinks::default(),
        }
    }
}

/// Fingerprint of the platform facing configuration of a microservice
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfiguration {
    pub uid: RuntimeConfigurationUid,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: ConfigurationProperties,
    #[serde(default)]
    pub links: NoLinks,
}
entity!(RuntimeConfiguration, Family::RuntimeConfiguration);

impl RuntimeConfiguration {
    #[must_use]
    pub fn new(customer_id: &str, application_id: &str, environment: &str, artifact_id: &str, hash: &str) -> Self {
        Self {
            uid: RuntimeConfigurationUid::new(customer_id, application_id, environment, artifact_id, hash),
            kind: Family::RuntimeConfiguration.label().to_string(),
            properties: ConfigurationProperties {
                content_hash: hash.to_string(),
            },
            links: NoLinks::default(),
        }
    }
}
