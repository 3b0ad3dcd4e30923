//! Content fingerprint of the configuration objects of a microservice.
//!
//! Entries of every source are fed key then value, sorted by key, into one running
//! SHA-512. The order of the sources themselves is part of the fingerprint, so
//! callers feed them in a fixed order.
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use sha2::{Digest, Sha512};

#[derive(Clone, Default)]
pub struct ConfigHasher {
    hasher: Sha512,
}

impl ConfigHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds entries sorted by key
    pub fn write_entries<'a, I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut entries: Vec<_> = entries.into_iter().collect();
        entries.sort_by(|(left, _), (right, _)| left.cmp(right));
        for (key, value) in entries {
            self.hasher.update(key.as_bytes());
            self.hasher.update(value);
        }
    }

    pub fn write_config_map(&mut self, config_map: &ConfigMap) {
        if let Some(data) = &config_map.data {
            self.write_entries(data.iter().map(|(k, v)| (k.as_str(), v.as_bytes())));
        }
        if let Some(binary) = &config_map.binary_data {
            self.write_entries(binary.iter().map(|(k, v)| (k.as_str(), v.0.as_slice())));
        }
    }

    /// Raw bytes of the secret values, not their text form
    pub fn write_secret(&mut self, secret: &Secret) {
        if let Some(data) = &secret.data {
            self.write_entries(data.iter().map(|(k, v)| (k.as_str(), v.0.as_slice())));
        }
    }

    /// Lowercase hex digest
    #[must_use]
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}
