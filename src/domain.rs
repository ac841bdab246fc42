//! Fully-qualified domain names.

use std::fmt;

/// A lower-cased domain name that always ends with a dot.
///
/// Used as the key for both the record cache and the routing policy, so
/// `Example.COM` and `example.com.` refer to the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainName(String);

impl DomainName {
    pub fn new(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() || name == "." {
            return Self(".".to_string());
        }

        let mut fqdn = name.to_ascii_lowercase();
        if !fqdn.ends_with('.') {
            fqdn.push('.');
        }
        Self(fqdn)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
