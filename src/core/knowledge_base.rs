//! Static, read-only reference data for the parking heuristic.
//!
//! The registry lists third-party services known to serve advertising on
//! parked domains. It is built once at startup, wrapped in an `Arc` and shared
//! by every worker without locking; nothing mutates it after construction.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info};

use crate::errors::FatalError;

/// Providers that ship with the binary. Extra entries can be merged in from a
/// file with [`ParkingRegistry::extend_from_file`].
static PARKING_PROVIDERS: &[&str] = &[
    "smartname.com",
    "sedo.com",
    "sedoparking.com",
    "parkingcrew.com",
    "parkingcrew.net",
    "uniregistry.com",
    "hugedomains.com",
    "bodis.com",
    "above.com",
    "parklogic.com",
    "domainsponsor.com",
    "dan.com",
    "afternic.com",
    "undeveloped.com",
    "namebright.com",
];

#[derive(Debug, Clone, Default)]
pub struct ParkingRegistry {
    providers: BTreeSet<String>,
}

impl ParkingRegistry {
    /// The built-in provider list.
    pub fn builtin() -> Self {
        Self::from_domains(PARKING_PROVIDERS.iter().copied())
    }

    pub fn from_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let providers = domains
            .into_iter()
            .filter_map(|d| normalize_entry(d.as_ref()))
            .collect();
        Self { providers }
    }

    /// Merges a newline-delimited provider file into the registry.
    /// Blank lines and `#` comments are ignored.
    pub fn extend_from_file(&mut self, path: &Path) -> Result<usize, FatalError> {
        let raw = std::fs::read_to_string(path).map_err(|source| FatalError::UnreadableRegistry {
            path: path.to_path_buf(),
            source,
        })?;
        let before = self.providers.len();
        self.providers.extend(raw.lines().filter_map(normalize_entry));
        let added = self.providers.len() - before;
        info!(path = %path.display(), added, "Loaded parking providers from file.");
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Returns the provider `host` belongs to, if any. A host matches when it
    /// equals a provider or is one of its subdomains. `exclude` is skipped so a
    /// provider's own site is never reported as parked on itself.
    pub fn provider_for(&self, host: &str, exclude: &str) -> Option<&str> {
        let host = host.trim_end_matches('.');
        self.providers
            .iter()
            .filter(|provider| provider.as_str() != exclude)
            .find(|provider| {
                host == provider.as_str()
                    || host
                        .strip_suffix(provider.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
            .map(|provider| {
                debug!(host, provider = %provider, "Resource host matched a parking provider.");
                provider.as_str()
            })
    }
}

fn normalize_entry(line: &str) -> Option<String> {
    let entry = line.split('#').next().unwrap_or_default().trim();
    if entry.is_empty() {
        return None;
    }
    Some(entry.trim_end_matches('.').to_ascii_lowercase())
}
