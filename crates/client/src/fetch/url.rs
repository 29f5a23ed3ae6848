//! URL canonicalization so equal requests share one cache entry.

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("path must start with '/': {0}")]
    RelativePath(String),
}

/// Canonicalize a URL string into a request identity URL.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Default scheme to https:// if missing
/// 3. Lowercase the host
/// 4. Remove fragment (#...)
/// 5. Keep query string intact (do not reorder)
pub fn canonicalize(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let parsed = match url::Url::parse(trimmed) {
        Ok(url) if url.has_host() => url,
        _ => url::Url::parse(&format!("https://{trimmed}")).map_err(|e| UrlError::InvalidUrl(e.to_string()))?,
    };

    normalize(parsed)
}

/// Resolve a request target against the worker's origin.
///
/// `target` is either an absolute http(s) URL or a path starting with `/`.
/// Asset lists and intercepted paths both go through here, so `/a` and
/// `https://origin/a` land on the same cache key.
pub fn resolve(origin: &url::Url, target: &str) -> Result<url::Url, UrlError> {
    let trimmed = target.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    if !trimmed.starts_with('/') {
        if let Ok(absolute) = url::Url::parse(trimmed)
            && absolute.has_host()
        {
            return normalize(absolute);
        }
        return Err(UrlError::RelativePath(trimmed.to_string()));
    }

    let joined = origin.join(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    normalize(joined)
}

fn normalize(mut parsed: url::Url) -> Result<url::Url, UrlError> {
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str() {
        let host = host.to_lowercase();
        parsed
            .set_host(Some(&host))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);

    Ok(parsed)
}
