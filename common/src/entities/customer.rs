use super::{entity, Family, NoLinks};
use serde::{Deserialize, Serialize};

uid_type!(
    /// Tenant ID
    CustomerUid
);

impl CustomerUid {
    #[must_use]
    pub fn new(customer_id: &str) -> Self {
        Self(customer_id.to_string())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CustomerProperties {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Customer {
    pub uid: CustomerUid,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: CustomerProperties,
    #[serde(default)]
    pub links: NoLinks,
}
entity!(Customer, Family::Customer);

impl Customer {
    #[must_use]
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            uid: CustomerUid::new(id),
            kind: Family::Customer.label().to_string(),
            properties: CustomerProperties {
                id: id.to_string(),
                name: name.to_string(),
            },
            links: NoLinks::default(),
        }
    }
}
