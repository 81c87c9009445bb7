//! Artifact resolution errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::types::Platform;

/// Everything that can go wrong while resolving an artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("tool `{tool}` is not available for {platform}")]
    UnsupportedPlatform { tool: String, platform: Platform },

    #[error("invalid version `{version}` for tool `{tool}`")]
    InvalidVersion { tool: String, version: String },

    #[error("network error fetching {url} after {attempts} attempt(s): {message}")]
    Network {
        url: String,
        message: String,
        attempts: u32,
        retryable: bool,
    },

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("no checksum available for `{tool}` {version}; pass one explicitly")]
    MissingChecksum { tool: String, version: String },

    #[error("`{0}` is not a sha256 digest")]
    InvalidChecksum(String),

    #[error("failed to discover the latest version of `{tool}`: {message}")]
    VersionDiscovery { tool: String, message: String },

    #[error("URL not allowed: {url} ({reason})")]
    DisallowedUrl { url: String, reason: String },

    #[error("failed to extract `{member}`: {message}")]
    Extraction { member: String, message: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArtifactError {
    /// True for failures that a later attempt may not hit again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { retryable: true, .. })
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;
