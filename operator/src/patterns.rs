use crate::{Error, Result};
use common::entities::RuntimeVersion;
use regex::Regex;

/// Image patterns, compiled once at startup and shared by the handlers
#[derive(Clone, Debug)]
pub struct ImagePatterns {
    artifact: Regex,
    runtime: Regex,
}

impl ImagePatterns {
    pub fn new() -> Result<Self> {
        Ok(Self {
            artifact: Regex::new(r"^([A-Za-z0-9]+\.azurecr\.io/)?(.+)$")?,
            runtime: Regex::new(r"^dolittle/runtime:(\d+)\.(\d+)\.(\d+)(-(.+))?$")?,
        })
    }

    /// Head image without its Azure container registry host
    #[must_use]
    pub fn artifact_version_name<'a>(&self, image: &'a str) -> &'a str {
        self.artifact
            .captures(image)
            .and_then(|captures| captures.get(2))
            .map_or(image, |name| name.as_str())
    }

    pub fn runtime_version(&self, image: &str) -> Result<RuntimeVersion> {
        let unparsable = || Error::CouldNotParseRuntimeVersion(image.to_string());
        let captures = self.runtime.captures(image).ok_or_else(unparsable)?;
        let number = |index: usize| -> Result<u32> {
            captures
                .get(index)
                .and_then(|m| m.as_str().parse().ok())
                .ok_or_else(unparsable)
        };
        Ok(RuntimeVersion::new(
            number(1)?,
            number(2)?,
            number(3)?,
            captures.get(5).map(|m| m.as_str()),
            None,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_azure_registry_host_is_stripped() {
        let patterns = ImagePatterns::new().unwrap();
        assert_eq!(
            patterns.artifact_version_name("myregistry.azurecr.io/shop-service:1.2.0"),
            "shop-service:1.2.0"
        );
        assert_eq!(
            patterns.artifact_version_name("localhost:5000/team/shop:2"),
            "localhost:5000/team/shop:2"
        );
        assert_eq!(
            patterns.artifact_version_name("docker.io/library/nginx:1"),
            "docker.io/library/nginx:1"
        );
        assert_eq!(patterns.artifact_version_name("ghcr.io/dolittle/shop:1"), "ghcr.io/dolittle/shop:1");
        assert_eq!(patterns.artifact_version_name("localhost/shop:1"), "localhost/shop:1");
        assert_eq!(patterns.artifact_version_name("dolittle/shop:1"), "dolittle/shop:1");
        assert_eq!(patterns.artifact_version_name("shop:1"), "shop:1");
    }

    #[test]
    fn test_runtime_version_with_prerelease() {
        let patterns = ImagePatterns::new().unwrap();
        let version = patterns.runtime_version("dolittle/runtime:7.8.1-rc2").unwrap();
        assert_eq!(version.uid.as_str(), "7.8.1-rc2");
        assert_eq!(version.properties.major, 7);
        assert_eq!(version.properties.minor, 8);
        assert_eq!(version.properties.patch, 1);
        assert_eq!(version.properties.prerelease.as_deref(), Some("rc2"));
    }

    #[test]
    fn test_runtime_version_without_prerelease() {
        let patterns = ImagePatterns::new().unwrap();
        let version = patterns.runtime_version("dolittle/runtime:8.0.0").unwrap();
        assert_eq!(version.uid.as_str(), "8.0.0");
        assert_eq!(version.properties.prerelease, None);
    }

    #[test]
    fn test_unparsable_runtime_is_irrecoverable() {
        let patterns = ImagePatterns::new().unwrap();
        for image in [
            "dolittle/runtime:latest",
            "other/runtime:1.2.3",
            "dolittle/runtime:99999999999.0.0",
        ] {
            let error = patterns.runtime_version(image).unwrap_err();
            assert!(matches!(error, Error::CouldNotParseRuntimeVersion(_)));
            assert!(error.is_irrecoverable());
        }
    }
}
