//! Core types for artifact resolution: platforms, versions, specs and
//! cached artifacts.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Platform
// ============================================================================

/// Operating system, named the way release URLs usually name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

impl Os {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }

    /// Suffix of executables on this OS.
    pub fn exe_suffix(&self) -> &'static str {
        match self {
            Self::Windows => ".exe",
            _ => "",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linux" => Some(Self::Linux),
            "darwin" | "macos" | "mac" | "osx" => Some(Self::Darwin),
            "windows" | "win" => Some(Self::Windows),
            _ => None,
        }
    }
}

/// CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "amd64" | "x86_64" | "x64" => Some(Self::Amd64),
            "arm64" | "aarch64" => Some(Self::Arm64),
            _ => None,
        }
    }
}

/// An OS/architecture pair, written `linux/amd64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Detects the platform this process runs on.
    ///
    /// Returns `None` on unsupported platforms.
    pub fn detect() -> Option<Self> {
        let os = Os::parse(std::env::consts::OS)?;
        let arch = Arch::parse(std::env::consts::ARCH)?;
        Some(Self { os, arch })
    }

    /// Parses `os/arch` (also accepts `os-arch`).
    pub fn parse(s: &str) -> Option<Self> {
        let (os, arch) = s.split_once('/').or_else(|| s.split_once('-'))?;
        Some(Self {
            os: Os::parse(os.trim())?,
            arch: Arch::parse(arch.trim())?,
        })
    }

    /// Directory name used in the cache layout (`linux-amd64`).
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.os.as_str(), self.arch.as_str())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os.as_str(), self.arch.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid platform `{}` (expected os/arch)", s))
    }
}

impl TryFrom<String> for Platform {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Platform> for String {
    fn from(p: Platform) -> Self {
        p.to_string()
    }
}

// ============================================================================
// Versions
// ============================================================================

/// Strips a leading `v` from a version string.
pub fn normalize_version(version: &str) -> String {
    let version = version.trim();
    version
        .strip_prefix('v')
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(version)
        .to_string()
}

/// Versions may only use characters that are safe as a path segment.
pub fn is_valid_version(version: &str) -> bool {
    !version.is_empty()
        && version != "."
        && version != ".."
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_'))
}

/// The version a caller asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionRequest {
    /// A specific version, already normalized.
    Exact(String),
    /// Whatever the tool's version source reports as current.
    Latest,
}

impl VersionRequest {
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("latest") {
            Self::Latest
        } else {
            Self::Exact(normalize_version(s))
        }
    }
}

impl fmt::Display for VersionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{}", v),
            Self::Latest => write!(f, "latest"),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Where the expected sha256 of the fetched bytes comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChecksumSource {
    /// A lowercase hex digest.
    Sha256(String),
    /// A companion resource containing the digest.
    Url(String),
}

/// A request for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactSpec {
    pub tool: String,
    pub version: VersionRequest,
    pub platform: Platform,
    /// Overrides the catalog's checksum source.
    pub checksum: Option<ChecksumSource>,
}

impl ArtifactSpec {
    pub fn new(tool: impl Into<String>, version: VersionRequest, platform: Platform) -> Self {
        Self {
            tool: tool.into(),
            version,
            platform,
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: ChecksumSource) -> Self {
        self.checksum = Some(checksum);
        self
    }
}

/// Verification state of a cached file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationState {
    Unverified,
    Verified,
    Failed,
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unverified => "unverified",
            Self::Verified => "verified",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A ready-to-execute artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub spec: ArtifactSpec,
    pub version: String,
    pub path: PathBuf,
    pub state: VerificationState,
    /// sha256 of the executable on disk.
    pub sha256: String,
    pub source_url: String,
}

impl CachedArtifact {
    /// Directory holding the executable, for `PATH`.
    pub fn bin_dir(&self) -> Option<&std::path::Path> {
        self.path.parent()
    }
}

/// Deterministic identity of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub tool: String,
    pub version: String,
    pub platform: Platform,
}

impl CacheKey {
    pub fn new(tool: impl Into<String>, version: impl Into<String>, platform: Platform) -> Self {
        Self {
            tool: tool.into(),
            version: version.into(),
            platform,
        }
    }

    /// Flat name used for the lock file.
    pub fn lock_name(&self) -> String {
        format!("{}-{}-{}", self.tool, self.version, self.platform.dir_name())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.tool, self.version, self.platform)
    }
}
