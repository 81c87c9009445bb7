//! On-disk artifact cache.
//!
//! Layout:
//! ```text
//! <cache>/<tool>/<version>/<os>-<arch>/<executable>
//! <cache>/<tool>/<version>/<os>-<arch>/artifact.json
//! <cache>/.locks/<tool>-<version>-<os>-<arch>.lock
//! ```
//!
//! Every entry is guarded by an exclusive advisory lock on its lock file.
//! Lock files are only deleted by their holder, and a waiter that ends up
//! locking a deleted file retries on the new one.
//! Files are staged as uniquely named temp files inside the entry directory
//! and moved into place with an atomic rename, so readers never see a
//! partial executable.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, trace, warn};

use super::checksum::sha256_file;
use super::error::{ArtifactError, ArtifactResult};
use super::extractor::{extract_tar_gz_member, make_executable};
use super::types::{ArtifactSpec, CacheKey, CachedArtifact, Platform, VerificationState};

/// Metadata file of a cache entry.
pub const RECORD_FILE: &str = "artifact.json";

/// Bumped whenever [`CacheRecord`] changes incompatibly.
pub const RECORD_SCHEMA_VERSION: u32 = 1;

const LOCKS_DIR: &str = ".locks";

// ============================================================================
// Records
// ============================================================================

/// Contents of `artifact.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub schema_version: u32,
    pub tool: String,
    pub version: String,
    pub platform: Platform,
    /// File name of the executable inside the entry directory.
    pub executable: String,
    /// sha256 of the executable.
    pub sha256: String,
    /// sha256 of the bytes that were downloaded.
    pub download_sha256: String,
    pub source_url: String,
    pub size: u64,
    pub fetched_at: DateTime<Utc>,
}

impl CacheRecord {
    /// Why this record cannot serve `key`, if it cannot.
    fn inconsistency(&self, key: &CacheKey) -> Option<String> {
        if self.schema_version != RECORD_SCHEMA_VERSION {
            return Some(format!("schema version {}", self.schema_version));
        }
        if self.tool != key.tool || self.version != key.version || self.platform != key.platform {
            return Some("record does not match its location".to_string());
        }
        if self.executable.is_empty()
            || self.executable.contains(['/', '\\'])
            || self.executable.starts_with('.')
        {
            return Some(format!("bad executable name `{}`", self.executable));
        }
        None
    }
}

/// One entry as reported by [`ArtifactCache::list`].
#[derive(Debug, Clone)]
pub struct CacheListing {
    pub record: CacheRecord,
    pub path: PathBuf,
    pub state: VerificationState,
}

/// What to store for a freshly downloaded, verified artifact.
#[derive(Debug, Clone)]
pub struct Promotion {
    pub spec: ArtifactSpec,
    pub executable_name: String,
    pub archive_member: Option<String>,
    pub source_url: String,
    pub download_sha256: String,
    pub size: u64,
}

// ============================================================================
// Locks
// ============================================================================

/// Exclusive lock on one cache key. Released on drop.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

fn acquire_lock(path: PathBuf) -> ArtifactResult<CacheLock> {
    loop {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ArtifactError::Lock {
                path: path.clone(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(&path)
            .map_err(|source| ArtifactError::Lock {
                path: path.clone(),
                source,
            })?;

        file.lock_exclusive().map_err(|source| ArtifactError::Lock {
            path: path.clone(),
            source,
        })?;

        if is_linked(&file, &path) {
            trace!("Locked {}", path.display());
            return Ok(CacheLock { file, path });
        }
        // Closing the handle releases the lock on the unlinked file.
        trace!("Lock file {} was removed while waiting, retrying", path.display());
    }
}

/// True while `path` still names the locked file.
#[cfg(unix)]
fn is_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

/// Open files cannot be deleted on this platform.
#[cfg(not(unix))]
fn is_linked(_file: &File, _path: &Path) -> bool {
    true
}

/// Runs blocking filesystem work off the async runtime.
async fn blocking<T, F>(f: F) -> ArtifactResult<T>
where
    F: FnOnce() -> ArtifactResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ArtifactError::io("blocking cache task failed", io::Error::other(e)))?
}

// ============================================================================
// Cache
// ============================================================================

/// Handle on a cache root directory.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<cache>/<tool>/<version>/<os>-<arch>`.
    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(&key.tool)
            .join(&key.version)
            .join(key.platform.dir_name())
    }

    pub fn lock_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(LOCKS_DIR)
            .join(format!("{}.lock", key.lock_name()))
    }

    /// Blocks (on a worker thread) until the exclusive lock for `key` is held.
    pub async fn lock(&self, key: &CacheKey) -> ArtifactResult<CacheLock> {
        let path = self.lock_path(key);
        blocking(move || acquire_lock(path)).await
    }

    /// Returns the entry for `key` if it is present and re-verifies.
    ///
    /// A corrupted or inconsistent entry is deleted and reported as a miss.
    /// An entry downloaded with a different sha256 than `expected_download`
    /// is a miss but stays in place. Leftover staging files of the entry are
    /// removed. The caller must hold the lock for `key`.
    pub async fn lookup(
        &self,
        key: &CacheKey,
        spec: &ArtifactSpec,
        expected_download: Option<&str>,
    ) -> ArtifactResult<Option<CachedArtifact>> {
        let entry = self.entry_dir(key);
        let key = key.clone();
        let spec = spec.clone();
        let expected = expected_download.map(str::to_string);
        blocking(move || lookup_entry(&entry, &key, spec, expected.as_deref())).await
    }

    /// Creates a uniquely named staging file inside the entry directory.
    pub fn staging_file(&self, key: &CacheKey) -> ArtifactResult<NamedTempFile> {
        let entry = self.entry_dir(key);
        fs::create_dir_all(&entry).map_err(|e| {
            ArtifactError::io(format!("failed to create {}", entry.display()), e)
        })?;
        tempfile::Builder::new()
            .prefix(".staging-")
            .tempfile_in(&entry)
            .map_err(|e| ArtifactError::io("failed to create staging file", e))
    }

    /// Removes the entry directory of `key` if a failed download left it empty.
    pub fn remove_empty_entry(&self, key: &CacheKey) {
        let entry = self.entry_dir(key);
        if fs::remove_dir(&entry).is_ok() {
            trace!("Removed empty entry {}", entry.display());
        }
    }

    /// Moves a verified download into place and writes its record.
    ///
    /// The caller must hold the lock for `key`.
    pub async fn promote(
        &self,
        key: &CacheKey,
        staging: NamedTempFile,
        promotion: Promotion,
    ) -> ArtifactResult<CachedArtifact> {
        let entry = self.entry_dir(key);
        let key = key.clone();
        blocking(move || promote_entry(&entry, &key, staging, promotion)).await
    }

    /// Lists cached entries, optionally re-hashing each executable.
    pub async fn list(&self, verify: bool) -> ArtifactResult<Vec<CacheListing>> {
        let root = self.root.clone();
        blocking(move || list_entries(&root, verify)).await
    }

    /// Removes every cached version of `tool`. Returns the number of entries removed.
    pub async fn remove_tool(&self, tool: &str) -> ArtifactResult<usize> {
        if !is_plain_segment(tool) {
            return Ok(0);
        }
        let tool_dir = self.root.join(tool);
        let dir = tool_dir.clone();
        let entries = blocking(move || entry_dirs(&dir)).await?;
        let removed = self.remove_entries(entries).await?;

        blocking(move || {
            prune_empty_dirs(&tool_dir);
            Ok(())
        })
        .await?;
        info!("Removed {} cached entr(ies) of {}", removed, tool);
        Ok(removed)
    }

    /// Removes every cached entry and unused lock file. Returns the number of entries removed.
    pub async fn purge(&self) -> ArtifactResult<usize> {
        let root = self.root.clone();
        let entries = blocking(move || {
            let mut entries = Vec::new();
            for tool_dir in sorted_subdirs(&root)? {
                entries.extend(entry_dirs(&tool_dir)?);
            }
            Ok(entries)
        })
        .await?;
        let removed = self.remove_entries(entries).await?;

        let locks_dir = self.root.join(LOCKS_DIR);
        for path in blocking(move || lock_files(&locks_dir)).await? {
            let lock = blocking(move || acquire_lock(path)).await?;
            let path = lock.path().to_path_buf();
            blocking(move || {
                remove_lock_file(&path);
                Ok(())
            })
            .await?;
        }

        let root = self.root.clone();
        blocking(move || {
            for tool_dir in sorted_subdirs(&root)? {
                prune_empty_dirs(&tool_dir);
            }
            Ok(())
        })
        .await?;

        info!("Purged {} cached entr(ies)", removed);
        Ok(removed)
    }

    /// Removes entry directories. Recognized entries are removed under their lock.
    async fn remove_entries(
        &self,
        entries: Vec<(PathBuf, Option<CacheKey>)>,
    ) -> ArtifactResult<usize> {
        let mut removed = 0;
        for (entry, key) in entries {
            match key {
                Some(key) => {
                    if self.remove_entry(&key).await? {
                        removed += 1;
                    }
                }
                None => {
                    debug!("Removing unrecognized cache directory {}", entry.display());
                    blocking(move || remove_dir_if_exists(&entry)).await?;
                }
            }
        }
        Ok(removed)
    }

    /// Deletes the entry of `key` and its lock file. Returns whether it had a record.
    async fn remove_entry(&self, key: &CacheKey) -> ArtifactResult<bool> {
        let lock = self.lock(key).await?;
        let entry = self.entry_dir(key);
        let lock_path = lock.path().to_path_buf();
        let had_record = blocking(move || {
            let had_record = entry.join(RECORD_FILE).is_file();
            invalidate(&entry)?;
            remove_lock_file(&lock_path);
            Ok(had_record)
        })
        .await?;
        drop(lock);
        Ok(had_record)
    }
}

// ============================================================================
// Blocking Implementations
// ============================================================================

fn lookup_entry(
    entry: &Path,
    key: &CacheKey,
    spec: ArtifactSpec,
    expected_download: Option<&str>,
) -> ArtifactResult<Option<CachedArtifact>> {
    remove_stale_staging(entry);

    let record_path = entry.join(RECORD_FILE);
    let raw = match fs::read_to_string(&record_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Cache miss for {}", key);
            return Ok(None);
        }
        Err(e) => {
            return Err(ArtifactError::io(
                format!("failed to read {}", record_path.display()),
                e,
            ))
        }
    };

    let record: CacheRecord = match serde_json::from_str(&raw) {
        Ok(record) => record,
        Err(e) => {
            warn!("Discarding unreadable cache record {}: {}", record_path.display(), e);
            invalidate(entry)?;
            return Ok(None);
        }
    };

    if let Some(reason) = record.inconsistency(key) {
        warn!("Discarding cache entry for {}: {}", key, reason);
        invalidate(entry)?;
        return Ok(None);
    }

    if let Some(expected) = expected_download {
        if expected != record.download_sha256 {
            debug!(
                "Not using cached {}: downloaded with sha256 {}, requested {}",
                key, record.download_sha256, expected
            );
            return Ok(None);
        }
    }

    let path = entry.join(&record.executable);
    let actual = match sha256_file(&path) {
        Ok(hash) => hash,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Discarding cache entry for {}: executable missing", key);
            invalidate(entry)?;
            return Ok(None);
        }
        Err(e) => {
            return Err(ArtifactError::io(
                format!("failed to hash {}", path.display()),
                e,
            ))
        }
    };

    if actual != record.sha256 {
        warn!(
            "Discarding corrupted cache entry for {}: expected {}, found {}",
            key, record.sha256, actual
        );
        invalidate(entry)?;
        return Ok(None);
    }

    debug!("Cache hit for {} at {}", key, path.display());
    Ok(Some(CachedArtifact {
        spec,
        version: record.version,
        path,
        state: VerificationState::Verified,
        sha256: record.sha256,
        source_url: record.source_url,
    }))
}

fn promote_entry(
    entry: &Path,
    key: &CacheKey,
    staging: NamedTempFile,
    promotion: Promotion,
) -> ArtifactResult<CachedArtifact> {
    let executable = match &promotion.archive_member {
        Some(member) => {
            let mut out = tempfile::Builder::new()
                .prefix(".staging-")
                .tempfile_in(entry)
                .map_err(|e| ArtifactError::io("failed to create staging file", e))?;
            extract_tar_gz_member(staging.path(), member, out.as_file_mut())?;
            drop(staging);
            out
        }
        None => staging,
    };

    executable
        .as_file()
        .sync_all()
        .map_err(|e| ArtifactError::io("failed to sync staged executable", e))?;
    make_executable(executable.path())?;
    let sha256 = sha256_file(executable.path())
        .map_err(|e| ArtifactError::io("failed to hash staged executable", e))?;

    let path = entry.join(&promotion.executable_name);
    executable.persist(&path).map_err(|e| {
        ArtifactError::io(format!("failed to move executable to {}", path.display()), e.error)
    })?;

    let record = CacheRecord {
        schema_version: RECORD_SCHEMA_VERSION,
        tool: key.tool.clone(),
        version: key.version.clone(),
        platform: key.platform,
        executable: promotion.executable_name,
        sha256: sha256.clone(),
        download_sha256: promotion.download_sha256,
        source_url: promotion.source_url.clone(),
        size: promotion.size,
        fetched_at: Utc::now(),
    };
    write_record(entry, &record)?;

    info!("Cached {} at {}", key, path.display());
    Ok(CachedArtifact {
        spec: promotion.spec,
        version: key.version.clone(),
        path,
        state: VerificationState::Verified,
        sha256,
        source_url: promotion.source_url,
    })
}

fn write_record(entry: &Path, record: &CacheRecord) -> ArtifactResult<()> {
    let body = serde_json::to_vec_pretty(record)
        .map_err(|e| ArtifactError::io("failed to serialize cache record", io::Error::other(e)))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".staging-")
        .tempfile_in(entry)
        .map_err(|e| ArtifactError::io("failed to create record temp file", e))?;
    tmp.write_all(&body)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ArtifactError::io("failed to write cache record", e))?;

    let path = entry.join(RECORD_FILE);
    tmp.persist(&path).map_err(|e| {
        ArtifactError::io(format!("failed to move record to {}", path.display()), e.error)
    })?;
    Ok(())
}

fn invalidate(entry: &Path) -> ArtifactResult<()> {
    remove_dir_if_exists(entry)
}

fn remove_dir_if_exists(dir: &Path) -> ArtifactResult<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ArtifactError::io(
            format!("failed to remove {}", dir.display()),
            e,
        )),
    }
}

/// Staging files only exist while their lock is held, so any found under the lock are stale.
fn remove_stale_staging(entry: &Path) {
    let Ok(read) = fs::read_dir(entry) else {
        return;
    };
    for item in read.filter_map(Result::ok) {
        if !item.file_name().to_string_lossy().starts_with(".staging-") {
            continue;
        }
        match fs::remove_file(item.path()) {
            Ok(()) => debug!("Removed stale staging file {}", item.path().display()),
            Err(e) => warn!("Failed to remove stale staging file {}: {}", item.path().display(), e),
        }
    }
}

/// Deletes a lock file. The caller must hold the lock.
fn remove_lock_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => trace!("Removed lock file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!("Keeping lock file {}: {}", path.display(), e),
    }
}

/// Lock files under the locks directory, sorted.
fn lock_files(dir: &Path) -> ArtifactResult<Vec<PathBuf>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ArtifactError::io(
                format!("failed to read {}", dir.display()),
                e,
            ))
        }
    };

    let mut files: Vec<PathBuf> = read
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "lock") && p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Removes the version directories of `tool_dir` and `tool_dir` itself when empty.
fn prune_empty_dirs(tool_dir: &Path) {
    if let Ok(versions) = sorted_subdirs(tool_dir) {
        for version_dir in versions {
            fs::remove_dir(&version_dir).ok();
        }
    }
    if fs::remove_dir(tool_dir).is_ok() {
        trace!("Removed {}", tool_dir.display());
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Entry directories below one tool directory, with the key each belongs to.
///
/// Directories whose names do not form a cache key map to `None`.
fn entry_dirs(tool_dir: &Path) -> ArtifactResult<Vec<(PathBuf, Option<CacheKey>)>> {
    let tool = file_name_of(tool_dir);
    let mut entries = Vec::new();
    for version_dir in sorted_subdirs(tool_dir)? {
        let version = file_name_of(&version_dir);
        for entry in sorted_subdirs(&version_dir)? {
            let name = file_name_of(&entry);
            let key = Platform::parse(&name)
                .filter(|p| p.dir_name() == name)
                .map(|p| CacheKey::new(tool.clone(), version.clone(), p));
            entries.push((entry, key));
        }
    }
    Ok(entries)
}

fn is_plain_segment(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

/// Visible subdirectories of `dir`, sorted. Missing `dir` yields none.
fn sorted_subdirs(dir: &Path) -> ArtifactResult<Vec<PathBuf>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ArtifactError::io(
                format!("failed to read {}", dir.display()),
                e,
            ))
        }
    };

    let mut dirs: Vec<PathBuf> = read
        .filter_map(Result::ok)
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn list_entries(root: &Path, verify: bool) -> ArtifactResult<Vec<CacheListing>> {
    let mut listings = Vec::new();

    for tool_dir in sorted_subdirs(root)? {
        for version_dir in sorted_subdirs(&tool_dir)? {
            for entry in sorted_subdirs(&version_dir)? {
                let record_path = entry.join(RECORD_FILE);
                let record: CacheRecord = match fs::read_to_string(&record_path)
                    .map_err(|e| e.to_string())
                    .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
                {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("Skipping cache entry {}: {}", entry.display(), e);
                        continue;
                    }
                };

                let path = entry.join(&record.executable);
                let state = if verify {
                    match sha256_file(&path) {
                        Ok(hash) if hash == record.sha256 => VerificationState::Verified,
                        _ => VerificationState::Failed,
                    }
                } else {
                    VerificationState::Unverified
                };

                listings.push(CacheListing {
                    record,
                    path,
                    state,
                });
            }
        }
    }

    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::checksum::sha256_bytes;
    use crate::artifacts::types::{Arch, Os, VersionRequest};
    use tempfile::TempDir;

    fn key() -> CacheKey {
        CacheKey::new("example-tool", "1.2.3", Platform::new(Os::Linux, Arch::Amd64))
    }

    fn spec() -> ArtifactSpec {
        ArtifactSpec::new(
            "example-tool",
            VersionRequest::Exact("1.2.3".into()),
            Platform::new(Os::Linux, Arch::Amd64),
        )
    }

    async fn store(cache: &ArtifactCache, bytes: &[u8]) -> CachedArtifact {
        let mut staging = cache.staging_file(&key()).unwrap();
        staging.write_all(bytes).unwrap();
        cache
            .promote(
                &key(),
                staging,
                Promotion {
                    spec: spec(),
                    executable_name: "example-tool".into(),
                    archive_member: None,
                    source_url: "https://github.com/example/example-tool".into(),
                    download_sha256: sha256_bytes(bytes),
                    size: bytes.len() as u64,
                },
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_layout() {
        let cache = ArtifactCache::new("/cache");
        assert_eq!(
            cache.entry_dir(&key()),
            PathBuf::from("/cache/example-tool/1.2.3/linux-amd64")
        );
        assert_eq!(
            cache.lock_path(&key()),
            PathBuf::from("/cache/.locks/example-tool-1.2.3-linux-amd64.lock")
        );
    }

    #[tokio::test]
    async fn test_promote_then_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());

        let stored = store(&cache, b"binary").await;
        assert_eq!(stored.state, VerificationState::Verified);
        assert_eq!(fs::read(&stored.path).unwrap(), b"binary");
        assert!(cache.entry_dir(&key()).join(RECORD_FILE).exists());

        let found = cache.lookup(&key(), &spec(), None).await.unwrap().unwrap();
        assert_eq!(found.path, stored.path);
        assert_eq!(found.sha256, sha256_bytes(b"binary"));
    }

    #[tokio::test]
    async fn test_no_staging_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());
        store(&cache, b"binary").await;

        let mut names: Vec<_> = fs::read_dir(cache.entry_dir(&key()))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["artifact.json", "example-tool"]);
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_discarded() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());
        let stored = store(&cache, b"binary").await;

        fs::write(&stored.path, b"tampered").unwrap();
        assert!(cache.lookup(&key(), &spec(), None).await.unwrap().is_none());
        assert!(!cache.entry_dir(&key()).exists());
    }

    #[tokio::test]
    async fn test_unreadable_record_is_discarded() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());
        store(&cache, b"binary").await;

        fs::write(cache.entry_dir(&key()).join(RECORD_FILE), b"{not json").unwrap();
        assert!(cache.lookup(&key(), &spec(), None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expected_download_mismatch_is_miss() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());
        store(&cache, b"binary").await;

        let other = sha256_bytes(b"something else");
        assert!(cache
            .lookup(&key(), &spec(), Some(&other))
            .await
            .unwrap()
            .is_none());

        // The entry is kept for callers asking for the hash it was stored with.
        assert!(cache.entry_dir(&key()).join(RECORD_FILE).exists());
        let recorded = sha256_bytes(b"binary");
        let found = cache.lookup(&key(), &spec(), Some(&recorded)).await.unwrap();
        assert_eq!(fs::read(found.unwrap().path).unwrap(), b"binary");
    }

    #[tokio::test]
    async fn test_promotion_replaces_entry_with_other_download() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());
        store(&cache, b"binary").await;

        let newer = sha256_bytes(b"newer");
        assert!(cache.lookup(&key(), &spec(), Some(&newer)).await.unwrap().is_none());
        let replaced = store(&cache, b"newer").await;

        let found = cache.lookup(&key(), &spec(), Some(&newer)).await.unwrap().unwrap();
        assert_eq!(found.path, replaced.path);
        assert_eq!(fs::read(&found.path).unwrap(), b"newer");
    }

    #[tokio::test]
    async fn test_lookup_removes_stale_staging_files() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());
        store(&cache, b"binary").await;
        let stale = cache.entry_dir(&key()).join(".staging-crashed");
        fs::write(&stale, b"partial").unwrap();

        assert!(cache.lookup(&key(), &spec(), None).await.unwrap().is_some());
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_list_remove_purge() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());
        store(&cache, b"binary").await;

        let listings = cache.list(true).await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].record.tool, "example-tool");
        assert_eq!(listings[0].state, VerificationState::Verified);

        let unverified = cache.list(false).await.unwrap();
        assert_eq!(unverified[0].state, VerificationState::Unverified);

        assert_eq!(cache.remove_tool("other").await.unwrap(), 0);
        assert_eq!(cache.remove_tool("example-tool").await.unwrap(), 1);
        assert!(cache.list(false).await.unwrap().is_empty());
        assert!(!dir.path().join("example-tool").exists());

        store(&cache, b"binary").await;
        assert_eq!(cache.purge().await.unwrap(), 1);
        assert!(cache.list(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_clears_leftovers_and_lock_files() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());
        store(&cache, b"binary").await;

        let orphan = dir.path().join("example-tool/0.9.0/linux-amd64");
        fs::create_dir_all(&orphan).unwrap();
        fs::write(orphan.join(".staging-abc123"), b"partial").unwrap();
        drop(cache.lock(&key()).await.unwrap());
        fs::write(dir.path().join(".locks/gone-0.1.0-linux-amd64.lock"), b"").unwrap();

        assert_eq!(cache.purge().await.unwrap(), 1);
        assert!(!dir.path().join("example-tool").exists());
        assert_eq!(fs::read_dir(dir.path().join(".locks")).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_purge_waits_for_entry_lock() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());
        store(&cache, b"binary").await;

        let held = cache.lock(&key()).await.unwrap();
        let purging = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.purge().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!purging.is_finished());
        assert!(cache.entry_dir(&key()).join("example-tool").exists());

        drop(held);
        assert_eq!(purging.await.unwrap().unwrap(), 1);
        assert!(!cache.entry_dir(&key()).exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_waiter_relocks_after_lock_file_removal() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());

        let first = cache.lock(&key()).await.unwrap();
        let waiting = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.lock(&key()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        fs::remove_file(first.path()).unwrap();
        drop(first);

        let second = waiting.await.unwrap().unwrap();
        let other = OpenOptions::new().write(true).open(second.path()).unwrap();
        assert!(other.try_lock_exclusive().is_err());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_across_handles() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());

        let first = cache.lock(&key()).await.unwrap();
        let lock_path = first.path().to_path_buf();
        let other = OpenOptions::new().write(true).open(&lock_path).unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(first);
        assert!(other.try_lock_exclusive().is_ok());
    }
}
