use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage Error: {0}")]
    StorageError(#[from] common::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Could not parse runtime version from image {0}")]
    CouldNotParseRuntimeVersion(String),

    #[error("Pod {0} has no owning ReplicaSet")]
    PodOwnerNotFound(String),

    #[error("Pod {0} has more than one owning ReplicaSet")]
    AmbiguousPodOwner(String),

    #[error("ReplicaSet {0} is not cached yet")]
    OwnerNotCached(String),

    #[error("Missing configuration {0}")]
    MissingConfiguration(String),

    #[error("Invalid image pattern: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Metrics Error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("Server Error: {0}")]
    ServerError(#[from] std::io::Error),

    #[error("Configuration file error: {0}")]
    ConfigError(String),

    #[error("Cancelled")]
    Cancelled,
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Bounded `result` label of the handled counter
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::StorageError(_) => "storage_error",
            Error::KubeError(_) => "kube_error",
            Error::CouldNotParseRuntimeVersion(_) => "could_not_parse_runtime_version",
            Error::PodOwnerNotFound(_) => "pod_owner_not_found",
            Error::AmbiguousPodOwner(_) => "ambiguous_pod_owner",
            Error::OwnerNotCached(_) => "owner_not_cached",
            Error::MissingConfiguration(_) => "missing_configuration",
            Error::RegexError(_) => "regex_error",
            Error::MetricsError(_) => "metrics_error",
            Error::ServerError(_) => "server_error",
            Error::ConfigError(_) => "config_error",
            Error::Cancelled => "cancelled",
        }
    }

    /// Errors that no retry can fix without a change of code or data
    #[must_use]
    pub fn is_irrecoverable(&self) -> bool {
        matches!(
            self,
            Error::CouldNotParseRuntimeVersion(_)
                | Error::PodOwnerNotFound(_)
                | Error::AmbiguousPodOwner(_)
                | Error::MissingConfiguration(_)
        )
    }
}

/// Per-key single-flight queue with backoff
pub mod workqueue;
pub use workqueue::WorkQueue;

/// Notification stream to handler plumbing
pub mod observer;
pub use observer::{Handler, Observer};

/// Read-only lookups into the watch caches
pub mod cache;

pub mod patterns;
pub mod handlers;
pub mod cleanup;
pub mod config;

/// State machinery for kube, as exposeable to actix
pub mod manager;
pub use manager::Manager;

/// Metrics
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irrecoverable_routing() {
        assert!(Error::CouldNotParseRuntimeVersion("img".into()).is_irrecoverable());
        assert!(Error::PodOwnerNotFound("p".into()).is_irrecoverable());
        assert!(Error::MissingConfiguration("cm".into()).is_irrecoverable());
        assert!(!Error::StorageError(common::Error::Other("down".into())).is_irrecoverable());
        assert!(!Error::OwnerNotCached("rs".into()).is_irrecoverable());
        assert!(!Error::Cancelled.is_irrecoverable());
    }

    #[test]
    fn test_metric_label_ignores_payload() {
        assert_eq!(
            Error::MissingConfiguration("tenants-a".into()).metric_label(),
            Error::MissingConfiguration("tenants-b".into()).metric_label()
        );
        assert_eq!(Error::OwnerNotCached("rs".into()).metric_label(), "owner_not_cached");
    }
}
