use super::{entity, CustomerUid, Family};
use serde::{Deserialize, Serialize};

uid_type!(
    /// `customer/application`
    ApplicationUid
);

impl ApplicationUid {
    #[must_use]
    pub fn new(customer_id: &str, application_id: &str) -> Self {
        Self(format!("{}/{}", CustomerUid::new(customer_id), application_id))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ApplicationProperties {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationLinks {
    pub owned_by: CustomerUid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Application {
    pub uid: ApplicationUid,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: ApplicationProperties,
    pub links: ApplicationLinks,
}
entity!(Application, Family::Application);

impl Application {
    #[must_use]
    pub fn new(customer_id: &str, id: &str, name: &str) -> Self {
        Self {
            uid: ApplicationUid::new(customer_id, id),
            kind: Family::Application.label().to_string(),
            properties: ApplicationProperties {
                id: id.to_string(),
                name: name.to_string(),
            },
            links: ApplicationLinks {
                owned_by: CustomerUid::new(customer_id),
            },
        }
    }
}
