//! Binary artifact resolution.
//!
//! Turns a request for a tool at a version on a platform into a verified
//! executable on local disk. Downloads are checksum-verified before they
//! become visible in the cache, and concurrent resolutions of the same key
//! download at most once.
//!
//! # Architecture
//!
//! - `types`: Platforms, versions, requests and resolved artifacts
//! - `catalog`: Known tools and their URL templates
//! - `source`: Network access behind the `ArtifactSource` trait
//! - `retry`: Backoff for transient network failures
//! - `checksum`: sha256 hashing and checksum-file parsing
//! - `extractor`: Single-member `.tar.gz` extraction
//! - `cache`: On-disk layout, locking and atomic promotion
//! - `resolver`: The resolution state machine
//! - `env`: PATH composition for subprocesses
//!
//! # Example
//!
//! ```ignore
//! use taskfiles_core::artifacts::{ArtifactCache, ArtifactResolver, ArtifactSpec, Platform, VersionRequest};
//!
//! let resolver = ArtifactResolver::http(ArtifactCache::new("/tmp/taskfiles-cache"))?;
//! let spec = ArtifactSpec::new("kind", VersionRequest::parse("v0.19.0"), Platform::detect().unwrap());
//! let kind = resolver.resolve(&spec).await?;
//! println!("kind at {}", kind.path.display());
//! ```

pub mod cache;
pub mod catalog;
pub mod checksum;
pub mod env;
pub mod error;
pub mod extractor;
pub mod resolver;
pub mod retry;
pub mod source;
pub mod types;

pub use cache::{ArtifactCache, CacheListing, CacheRecord, RECORD_FILE};
pub use catalog::{Catalog, LatestSource, ToolDefinition};
pub use env::{bin_dirs, prepend_to_path};
pub use error::{ArtifactError, ArtifactResult};
pub use resolver::ArtifactResolver;
pub use retry::RetryPolicy;
pub use source::{ArtifactSource, FetchError, HttpSource, UrlPolicy, DEFAULT_ALLOWED_DOMAINS};
pub use types::{
    Arch, ArtifactSpec, CacheKey, CachedArtifact, ChecksumSource, Os, Platform,
    VerificationState, VersionRequest,
};
