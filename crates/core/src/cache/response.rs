//! Stored response snapshots.

use serde::{Deserialize, Serialize};

/// Status code a response must carry to be written into a generation.
pub const CACHEABLE_STATUS: u16 = 200;

/// An immutable snapshot of a network response.
///
/// The same shape is used for what the network returns and for what a
/// generation holds, so a cache hit and a network pass-through look identical
/// to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    /// Header name/value pairs in arrival order.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// RFC 3339 timestamp of the network fetch that produced this snapshot.
    pub fetched_at: String,
}

impl StoredResponse {
    /// Whether this response may overwrite a stored entry.
    ///
    /// Only an exact 200 qualifies; error pages, redirects and partial
    /// content never reach the store.
    pub fn is_cacheable(&self) -> bool {
        self.status == CACHEABLE_STATUS
    }

    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
