//! Routing policy for DoH resolution.
//!
//! A flat list of domain names, one per line. Listed names are resolved over
//! DNS-over-HTTPS, everything else goes to the plain upstream chain. Matching
//! is exact: listing `example.com` does not cover `www.example.com`.

use rustc_hash::FxHashSet;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::domain::DomainName;

/// The set of names routed to DoH. Immutable once loaded.
#[derive(Debug, Default, Clone)]
pub struct RoutingPolicy {
    domains: FxHashSet<DomainName>,
}

impl RoutingPolicy {
    /// An empty policy: every name uses the plain upstream chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from a list of names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = names
            .into_iter()
            .filter_map(|line| {
                let line = line.as_ref().trim();
                if line.is_empty() {
                    return None;
                }
                Some(DomainName::new(line))
            })
            .collect();

        Self { domains }
    }

    /// Load the policy file at `path`.
    ///
    /// A missing or unreadable file yields an empty policy.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let policy = Self::from_names(contents.lines());
                info!("loaded {} policy domains from {}", policy.len(), path.display());
                debug!("policy domains: {:?}", policy.domains);
                policy
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("policy file {} not found, routing nothing to DoH", path.display());
                Self::new()
            }
            Err(e) => {
                warn!("failed to read policy file {}: {}", path.display(), e);
                Self::new()
            }
        }
    }

    /// Whether `name` should be resolved over DoH.
    pub fn matches(&self, name: &DomainName) -> bool {
        self.domains.contains(name)
    }

    /// Returns the number of domains in the policy.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
