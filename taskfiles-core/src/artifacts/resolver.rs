//! Artifact resolver.
//!
//! Drives one request through
//! `requested → cache-checked → (hit → verified) | (miss → downloading →
//! checksum-checking → verified | failed)`.
//! Everything after the cache check runs while holding the entry lock, so
//! concurrent resolutions of the same key download at most once.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::cache::{ArtifactCache, Promotion};
use super::catalog::{download_file_name, Catalog, LatestSource, ToolDefinition};
use super::checksum::{normalize_sha256, parse_checksum, sha256_file};
use super::error::{ArtifactError, ArtifactResult};
use super::retry::RetryPolicy;
use super::source::{ArtifactSource, FetchError, HttpSource, UrlPolicy};
use super::types::{
    is_valid_version, normalize_version, ArtifactSpec, CacheKey, CachedArtifact, ChecksumSource,
    VersionRequest,
};

/// Resolves [`ArtifactSpec`]s to verified local executables.
#[derive(Clone)]
pub struct ArtifactResolver {
    catalog: Arc<Catalog>,
    cache: ArtifactCache,
    source: Arc<dyn ArtifactSource>,
    retry: RetryPolicy,
    url_policy: UrlPolicy,
}

impl std::fmt::Debug for ArtifactResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactResolver")
            .field("cache", &self.cache)
            .field("tools", &self.catalog.len())
            .field("retry", &self.retry)
            .finish()
    }
}

/// Where a download comes from and how to check it.
#[derive(Debug)]
struct DownloadPlan<'a> {
    tool: &'a ToolDefinition,
    key: CacheKey,
    url: String,
    checksum: ChecksumSource,
}

impl ArtifactResolver {
    pub fn new(catalog: Catalog, cache: ArtifactCache, source: Arc<dyn ArtifactSource>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            cache,
            source,
            retry: RetryPolicy::default(),
            url_policy: UrlPolicy::default(),
        }
    }

    /// Built-in catalog over HTTP.
    pub fn http(cache: ArtifactCache) -> ArtifactResult<Self> {
        Ok(Self::new(Catalog::builtin(), cache, Arc::new(HttpSource::new()?)))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_url_policy(mut self, policy: UrlPolicy) -> Self {
        self.url_policy = policy;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Resolves `spec` to a verified executable, downloading it if needed.
    pub async fn resolve(&self, spec: &ArtifactSpec) -> ArtifactResult<CachedArtifact> {
        debug!(tool = %spec.tool, version = %spec.version, platform = %spec.platform, "Artifact requested");

        let tool = self
            .catalog
            .get(&spec.tool)
            .ok_or_else(|| ArtifactError::UnknownTool(spec.tool.clone()))?;
        if !tool.supports(spec.platform) {
            return Err(ArtifactError::UnsupportedPlatform {
                tool: tool.id.clone(),
                platform: spec.platform,
            });
        }

        let version = match &spec.version {
            VersionRequest::Exact(v) => normalize_version(v),
            VersionRequest::Latest => self.latest_version(tool).await?,
        };
        if !is_valid_version(&version) {
            return Err(ArtifactError::InvalidVersion {
                tool: tool.id.clone(),
                version,
            });
        }

        let plan = self.plan(tool, spec, version)?;

        let _lock = self.cache.lock(&plan.key).await?;

        let direct = match &plan.checksum {
            ChecksumSource::Sha256(hash) => Some(hash.as_str()),
            ChecksumSource::Url(_) => None,
        };
        if let Some(artifact) = self.cache.lookup(&plan.key, spec, direct).await? {
            info!("Using cached {} at {}", plan.key, artifact.path.display());
            return Ok(artifact);
        }
        debug!(key = %plan.key, "Cache checked: miss");

        let result = self.download(&plan, spec).await;
        if result.is_err() {
            self.cache.remove_empty_entry(&plan.key);
        }
        result
    }

    /// Fails fast on everything that does not need the network.
    fn plan<'a>(
        &self,
        tool: &'a ToolDefinition,
        spec: &ArtifactSpec,
        version: String,
    ) -> ArtifactResult<DownloadPlan<'a>> {
        let url = tool.download_url(&version, spec.platform);
        self.url_policy.validate(&url)?;

        let checksum = match spec
            .checksum
            .clone()
            .or_else(|| tool.checksum_source(&version, spec.platform))
        {
            Some(ChecksumSource::Sha256(hash)) => {
                let normalized =
                    normalize_sha256(&hash).ok_or(ArtifactError::InvalidChecksum(hash))?;
                ChecksumSource::Sha256(normalized)
            }
            Some(ChecksumSource::Url(checksum_url)) => {
                self.url_policy.validate(&checksum_url)?;
                ChecksumSource::Url(checksum_url)
            }
            None => {
                return Err(ArtifactError::MissingChecksum {
                    tool: tool.id.clone(),
                    version,
                })
            }
        };

        Ok(DownloadPlan {
            tool,
            key: CacheKey::new(&tool.id, &version, spec.platform),
            url,
            checksum,
        })
    }

    /// Downloads, verifies and promotes. Caller holds the entry lock.
    async fn download(
        &self,
        plan: &DownloadPlan<'_>,
        spec: &ArtifactSpec,
    ) -> ArtifactResult<CachedArtifact> {
        let expected = match &plan.checksum {
            ChecksumSource::Sha256(hash) => hash.clone(),
            ChecksumSource::Url(checksum_url) => {
                let body = self.fetch_text(checksum_url).await?;
                let file_name = download_file_name(&plan.url);
                parse_checksum(&body, file_name).ok_or_else(|| ArtifactError::MissingChecksum {
                    tool: plan.tool.id.clone(),
                    version: plan.key.version.clone(),
                })?
            }
        };

        let staging = self.cache.staging_file(&plan.key)?;
        let staging_path = staging.path().to_path_buf();
        debug!(url = %plan.url, "Downloading");

        let source = self.source.clone();
        let url = plan.url.clone();
        let size = self
            .retry
            .run(&plan.url, || {
                let source = source.clone();
                let url = url.clone();
                let dest = staging_path.clone();
                async move { source.download_to(&url, &dest).await }
            })
            .await
            .map_err(|(e, attempts)| network_error(&plan.url, e, attempts))?;

        debug!(url = %plan.url, "Checking checksum");
        let hash_path = staging_path.clone();
        let actual = tokio::task::spawn_blocking(move || sha256_file(&hash_path))
            .await
            .map_err(|e| ArtifactError::io("hash task failed", std::io::Error::other(e)))?
            .map_err(|e| ArtifactError::io("failed to hash download", e))?;

        if actual != expected {
            warn!(
                "Checksum mismatch for {}: expected {}, got {}",
                plan.url, expected, actual
            );
            // Dropping the staging file deletes it.
            drop(staging);
            return Err(ArtifactError::ChecksumMismatch {
                url: plan.url.clone(),
                expected,
                actual,
            });
        }
        debug!(key = %plan.key, "Verified");

        self.cache
            .promote(
                &plan.key,
                staging,
                Promotion {
                    spec: spec.clone(),
                    executable_name: plan.tool.executable_name(spec.platform),
                    archive_member: plan.tool.archive_member(&plan.key.version, spec.platform),
                    source_url: plan.url.clone(),
                    download_sha256: actual,
                    size,
                },
            )
            .await
    }

    async fn fetch_text(&self, url: &str) -> ArtifactResult<String> {
        let source = self.source.clone();
        let owned = url.to_string();
        self.retry
            .run(url, || {
                let source = source.clone();
                let url = owned.clone();
                async move { source.fetch_text(&url).await }
            })
            .await
            .map_err(|(e, attempts)| network_error(url, e, attempts))
    }

    /// Asks the tool's version source what `latest` currently is.
    pub async fn latest_version(&self, tool: &ToolDefinition) -> ArtifactResult<String> {
        let discovery = |message: String| ArtifactError::VersionDiscovery {
            tool: tool.id.clone(),
            message,
        };

        let latest = tool
            .latest
            .as_ref()
            .ok_or_else(|| discovery("tool has no version source".to_string()))?;
        let url = latest.url();
        self.url_policy.validate(&url)?;

        let body = self.fetch_text(&url).await?;
        let raw = match latest {
            LatestSource::StableText { .. } => body.trim().to_string(),
            LatestSource::GithubRelease { .. } => {
                let value: serde_json::Value = serde_json::from_str(&body)
                    .map_err(|e| discovery(format!("invalid release JSON: {}", e)))?;
                value
                    .get("tag_name")
                    .and_then(|t| t.as_str())
                    .ok_or_else(|| discovery("release has no tag_name".to_string()))?
                    .to_string()
            }
        };

        let version = normalize_version(&raw);
        if !is_valid_version(&version) {
            return Err(discovery(format!("unusable version `{}`", raw)));
        }
        info!("Latest {} is {}", tool.id, version);
        Ok(version)
    }
}

fn network_error(url: &str, e: FetchError, attempts: u32) -> ArtifactError {
    ArtifactError::Network {
        url: url.to_string(),
        message: e.to_string(),
        attempts,
        retryable: e.is_transient(),
    }
}
