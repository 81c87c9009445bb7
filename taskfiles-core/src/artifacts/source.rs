//! Network access for artifact resolution.
//!
//! All fetches go through the [`ArtifactSource`] trait. [`HttpSource`] is the
//! `reqwest` implementation; tests substitute an in-memory source.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use super::error::ArtifactError;

// ============================================================================
// URL Security Validation
// ============================================================================

/// Domains downloads may come from by default (subdomains included).
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "github.com",
    "githubusercontent.com",
    "dl.k8s.io",
    "get.helm.sh",
];

/// Which URLs the resolver may fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPolicy {
    pub allowed_domains: Vec<String>,
    pub require_https: bool,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            allowed_domains: DEFAULT_ALLOWED_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            require_https: true,
        }
    }
}

impl UrlPolicy {
    pub fn allow_domain(mut self, domain: impl Into<String>) -> Self {
        self.allowed_domains.push(domain.into());
        self
    }

    /// Checks the scheme and host of a URL.
    pub fn validate(&self, url_str: &str) -> Result<(), ArtifactError> {
        let disallowed = |reason: String| ArtifactError::DisallowedUrl {
            url: url_str.to_string(),
            reason,
        };

        let url = Url::parse(url_str).map_err(|e| disallowed(format!("invalid URL: {}", e)))?;

        if self.require_https && url.scheme() != "https" {
            return Err(disallowed("HTTPS is required".to_string()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| disallowed("URL has no host".to_string()))?;

        let is_allowed = self
            .allowed_domains
            .iter()
            .any(|domain| host == domain || host.ends_with(&format!(".{}", domain)));

        if !is_allowed {
            return Err(disallowed(format!("domain `{}` is not allowed", host)));
        }
        Ok(())
    }
}

// ============================================================================
// Fetch Errors
// ============================================================================

/// A failed fetch, classified as transient or fatal.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("response from {url} was interrupted: {message}")]
    Body { url: String, message: String },

    #[error("failed to write download: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Transient: connect/timeout, interrupted bodies, HTTP 5xx/408/429.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Connect { .. } | Self::Timeout { .. } | Self::Body { .. } => true,
            Self::Io(_) => false,
        }
    }

    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = e.status() {
            Self::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else if e.is_body() || e.is_decode() {
            Self::Body {
                url: url.to_string(),
                message: e.to_string(),
            }
        } else {
            Self::Connect {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }
}

// ============================================================================
// Source Trait
// ============================================================================

/// Fetches remote resources.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Fetches a small text resource (version endpoints, checksum files).
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;

    /// Streams `url` into `dest`, replacing its contents. Returns bytes written.
    async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

// ============================================================================
// HTTP Source
// ============================================================================

const USER_AGENT: &str = concat!("taskfiles/", env!("CARGO_PKG_VERSION"));

/// `reqwest`-backed source.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new() -> Result<Self, ArtifactError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| ArtifactError::Network {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
                attempts: 0,
                retryable: false,
            })?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ArtifactSource for HttpSource {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        debug!("Fetching {}", url);
        let response = self.get(url).await?;
        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }

    async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        info!("Downloading {} to {}", url, dest.display());
        let response = self.get(url).await?;
        debug!("Content-Length: {:?}", response.content_length());

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::from_reqwest(url, e))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        info!("Download complete: {} bytes from {}", written, url);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url_https_required() {
        let policy = UrlPolicy::default();
        assert!(policy.validate("http://github.com/file").is_err());
        assert!(policy.validate("https://github.com/file").is_ok());
    }

    #[test]
    fn test_validate_url_allowed_domains() {
        let policy = UrlPolicy::default();
        assert!(policy.validate("https://dl.k8s.io/release/stable.txt").is_ok());
        assert!(policy.validate("https://get.helm.sh/helm.tar.gz").is_ok());
        assert!(policy
            .validate("https://objects.githubusercontent.com/release")
            .is_ok());
        assert!(policy.validate("https://api.github.com/repos/a/b").is_ok());
        assert!(policy.validate("https://evil.com/file").is_err());
        assert!(policy.validate("https://github.com.evil.com/file").is_err());
        assert!(policy.validate("https://notgithub.com/file").is_err());
        assert!(policy.validate("not a url").is_err());
    }

    #[test]
    fn test_custom_domain() {
        let policy = UrlPolicy::default().allow_domain("mirror.internal");
        assert!(policy.validate("https://mirror.internal/kubectl").is_ok());
    }

    #[test]
    fn test_transient_classification() {
        let status = |status| FetchError::Status {
            url: String::new(),
            status,
        };
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(408).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(403).is_transient());
        assert!(FetchError::Timeout { url: String::new() }.is_transient());
        assert!(!FetchError::Io(std::io::Error::other("disk full")).is_transient());
    }
}
