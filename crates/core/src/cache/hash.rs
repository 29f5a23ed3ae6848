//! Request-addressed cache key generation.

use sha2::{Digest, Sha256};

/// Compute the storage key for a request identity.
///
/// The method is expected upper-cased and the URL canonical; the key is only
/// as stable as its inputs.
pub fn compute_request_key(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
