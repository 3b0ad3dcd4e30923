use super::{entity, ApplicationUid, Family};
use serde::{Deserialize, Serialize};

uid_type!(
    /// `customer/application/environment`
    EnvironmentUid
);

impl EnvironmentUid {
    #[must_use]
    pub fn new(customer_id: &str, application_id: &str, environment: &str) -> Self {
        Self(format!(
            "{}/{}",
            ApplicationUid::new(customer_id, application_id),
            environment
        ))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentProperties {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentLinks {
    pub environment_of: ApplicationUid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    pub uid: EnvironmentUid,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: EnvironmentProperties,
    pub links: EnvironmentLinks,
}
entity!(Environment, Family::Environment);

impl Environment {
    #[must_use]
    pub fn new(customer_id: &str, application_id: &str, name: &str) -> Self {
        Self {
            uid: EnvironmentUid::new(customer_id, application_id, name),
            kind: Family::Environment.label().to_string(),
            properties: EnvironmentProperties {
                name: name.to_string(),
            },
            links: EnvironmentLinks {
                environment_of: ApplicationUid::new(customer_id, application_id),
            },
        }
    }
}
