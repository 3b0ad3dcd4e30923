use super::{entity, Family, NoLinks};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

uid_type!(
    /// `major.minor.patch[-prerelease]`, shared by every tenant
    RuntimeVersionUid
);

impl RuntimeVersionUid {
    #[must_use]
    pub fn new(major: u32, minor: u32, patch: u32, prerelease: Option<&str>) -> Self {
        match prerelease {
            Some(pre) if !pre.is_empty() => Self(format!("{major}.{minor}.{patch}-{pre}")),
            _ => Self(format!("{major}.{minor}.{patch}")),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RuntimeVersionProperties {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<String>,
    pub released: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RuntimeVersion {
    pub uid: RuntimeVersionUid,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: RuntimeVersionProperties,
    #[serde(default)]
    pub links: NoLinks,
}
entity!(RuntimeVersion, Family::RuntimeVersion);

impl RuntimeVersion {
    #[must_use]
    pub fn new(
        major: u32,
        minor: u32,
        patch: u32,
        prerelease: Option<&str>,
        released: Option<DateTime<Utc>>,
    ) -> Self {
        let prerelease = prerelease.filter(|p| !p.is_empty());
        Self {
            uid: RuntimeVersionUid::new(major, minor, patch, prerelease),
            kind: Family::RuntimeVersion.label().to_string(),
            properties: RuntimeVersionProperties {
                major,
                minor,
                patch,
                prerelease: prerelease.map(str::to_string),
                released,
            },
            links: NoLinks::default(),
        }
    }
}
