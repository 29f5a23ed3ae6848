//! HTTP fetch pipeline for intercepted and pre-cached requests.
//!
//! ### URL Canonicalization
//! - Trim whitespace, resolve paths against the configured origin
//! - Lowercase host, remove fragments
//! - Preserve query string
//!
//! ### Status Handling
//! - Any HTTP status is a successful fetch; deciding what to store is the
//!   caller's job
//! - Transport failures, timeouts and oversized bodies are errors
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable)

pub mod url;

use async_trait::async_trait;
use reqwest::{Client, Method, header};
use std::time::{Duration, Instant};

pub use url::{UrlError, canonicalize, resolve};

use offcache_core::{AppConfig, Error, RequestIdentity, StoredResponse};

/// Source of network responses.
///
/// The lifecycle controller and fetch interceptor only see this trait, so
/// tests can script the network without a server.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform the request for real.
    ///
    /// Returns `Ok` for every HTTP status; `Err` only when no response was
    /// received at all.
    async fn fetch(&self, request: &RequestIdentity) -> Result<StoredResponse, Error>;
}

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "offcache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "offcache/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            ..Default::default()
        }
    }
}

/// HTTP fetch client backed by reqwest.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn too_large(&self, len: usize) -> Error {
        Error::FetchTooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes))
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::NetworkFailed(format!("timeout: {}", err))
    } else {
        Error::NetworkFailed(format!("network error: {}", err))
    }
}

#[async_trait]
impl Network for FetchClient {
    async fn fetch(&self, request: &RequestIdentity) -> Result<StoredResponse, Error> {
        let start = Instant::now();
        let method = Method::from_bytes(request.method().as_bytes())
            .map_err(|_| Error::InvalidInput(format!("invalid method: {}", request.method())))?;

        let response = self
            .http
            .request(method, request.url().as_str())
            .send()
            .await
            .map_err(transport_error)?;

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(self.too_large(len as usize));
        }

        let status = response.status();
        let final_url = response.url().to_string();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.bytes().await.map_err(transport_error)?;

        if body.len() > self.config.max_bytes {
            return Err(self.too_large(body.len()));
        }

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            request = %request,
            final_url = %final_url,
            status = status.as_u16(),
            bytes = body.len(),
            fetch_ms,
            "network fetch complete"
        );

        Ok(StoredResponse {
            url: final_url,
            status: status.as_u16(),
            content_type,
            headers,
            body: body.to_vec(),
            fetched_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn identity(server: &MockServer, method: &str, path: &str) -> RequestIdentity {
        RequestIdentity::new(method, canonicalize(&server.url(path)).unwrap())
    }

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "offcache/0.1");
        assert_eq!(config.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_fetch_config_from_app_config() {
        let app = AppConfig { user_agent: "site/2".into(), max_bytes: 1024, timeout_ms: 500, ..Default::default() };
        let config = FetchConfig::from(&app);
        assert_eq!(config.user_agent, "site/2");
        assert_eq!(config.max_bytes, 1024);
        assert_eq!(config.timeout, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_fetch_client_new() {
        let client = FetchClient::new(FetchConfig::default());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_success_captures_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/a").header("user-agent", "offcache/0.1");
                then.status(200).header("content-type", "text/plain").body("X");
            })
            .await;

        let client = FetchClient::new(FetchConfig::default()).unwrap();
        let response = client.fetch(&identity(&server, "GET", "/a")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"X");
        assert_eq!(response.content_type.as_deref(), Some("text/plain"));
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert!(response.is_cacheable());
    }

    #[tokio::test]
    async fn test_fetch_error_status_is_not_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404).body("Not Found");
            })
            .await;

        let client = FetchClient::new(FetchConfig::default()).unwrap();
        let response = client.fetch(&identity(&server, "GET", "/missing")).await.unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(response.body_text(), "Not Found");
        assert!(!response.is_cacheable());
    }

    #[tokio::test]
    async fn test_fetch_uses_request_method() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/submit");
                then.status(201);
            })
            .await;

        let client = FetchClient::new(FetchConfig::default()).unwrap();
        let response = client.fetch(&identity(&server, "post", "/submit")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_fetch_too_large() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/big");
                then.status(200).body("0123456789");
            })
            .await;

        let config = FetchConfig { max_bytes: 4, ..Default::default() };
        let client = FetchClient::new(config).unwrap();
        let result = client.fetch(&identity(&server, "GET", "/big")).await;

        assert!(matches!(result, Err(Error::FetchTooLarge(_))));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_network_failure() {
        let url = canonicalize("http://127.0.0.1:1/unreachable").unwrap();
        let client = FetchClient::new(FetchConfig { timeout: Duration::from_secs(2), ..Default::default() }).unwrap();

        let result = client.fetch(&RequestIdentity::get(url)).await;

        assert!(matches!(result, Err(Error::NetworkFailed(_))));
    }
}
