//! Request identity used to address stored responses.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::cache::hash::compute_request_key;

/// Method plus absolute URL of an intercepted request.
///
/// Two requests with the same identity share one stored entry in a
/// generation. Callers are expected to pass a canonical URL; see
/// `offcache_client::fetch::canonicalize`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestIdentity {
    method: String,
    url: Url,
}

impl RequestIdentity {
    /// Build an identity, upper-casing the method.
    pub fn new(method: impl AsRef<str>, url: Url) -> Self {
        Self { method: method.as_ref().trim().to_ascii_uppercase(), url }
    }

    /// Identity for a plain `GET`.
    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// SHA-256 storage key for this identity.
    pub fn key(&self) -> String {
        compute_request_key(&self.method, self.url.as_str())
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
