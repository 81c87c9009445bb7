//! Extraction of a single executable from a `.tar.gz` download, and
//! executable permissions.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Component, Path};

use tracing::{debug, warn};

use super::error::ArtifactError;

fn extraction(member: &str, message: impl Into<String>) -> ArtifactError {
    ArtifactError::Extraction {
        member: member.to_string(),
        message: message.into(),
    }
}

/// Copies `member` out of the gzip-compressed tar at `archive_path` into `dest`.
///
/// Only a regular-file entry whose path equals `member` (ignoring a leading
/// `./`) is accepted. Links, absolute paths and `..` components are skipped.
pub fn extract_tar_gz_member(
    archive_path: &Path,
    member: &str,
    dest: &mut File,
) -> Result<u64, ArtifactError> {
    let file = File::open(archive_path)
        .map_err(|e| ArtifactError::io(format!("failed to open {}", archive_path.display()), e))?;
    let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);

    let wanted = Path::new(member.trim_start_matches("./"));
    let entries = archive
        .entries()
        .map_err(|e| extraction(member, format!("unreadable archive: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| extraction(member, format!("corrupt entry: {}", e)))?;
        let entry_type = entry.header().entry_type();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("Skipping symlink/hardlink in tar archive");
            continue;
        }
        if !entry_type.is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| extraction(member, format!("bad entry path: {}", e)))?
            .into_owned();

        if path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            warn!("Skipping unsafe path in tar: {:?}", path);
            continue;
        }

        let normalized: std::path::PathBuf = path
            .components()
            .filter(|c| *c != Component::CurDir)
            .collect();
        if normalized != wanted {
            continue;
        }

        let written = io::copy(&mut entry, dest)
            .map_err(|e| extraction(member, format!("failed to copy: {}", e)))?;
        dest.flush()
            .map_err(|e| ArtifactError::io("failed to flush extracted file", e))?;
        debug!("Extracted {} ({} bytes)", member, written);
        return Ok(written);
    }

    Err(extraction(member, "not found in archive"))
}

/// Sets executable permission on a file. No-op off Unix.
#[allow(unused_variables)]
pub fn make_executable(path: &Path) -> Result<(), ArtifactError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            ArtifactError::io(format!("failed to get metadata for {}", path.display()), e)
        })?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        fs::set_permissions(path, permissions).map_err(|e| {
            ArtifactError::io(
                format!("failed to set executable permission on {}", path.display()),
                e,
            )
        })?;
        debug!("Set executable permission on {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Read;
    use tempfile::TempDir;

    /// Builds an in-memory `.tar.gz` from `(path, contents)` pairs.
    pub(crate) fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn extract(archive: &[u8], member: &str) -> Result<Vec<u8>, ArtifactError> {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("a.tar.gz");
        fs::write(&archive_path, archive).unwrap();

        let out_path = dir.path().join("out");
        let mut out = File::create(&out_path).unwrap();
        extract_tar_gz_member(&archive_path, member, &mut out)?;
        drop(out);

        let mut data = Vec::new();
        File::open(&out_path).unwrap().read_to_end(&mut data).unwrap();
        Ok(data)
    }

    #[test]
    fn test_extracts_named_member() {
        let archive = tar_gz(&[
            ("linux-amd64/README.md", b"readme"),
            ("linux-amd64/helm", b"#!/bin/sh\necho helm\n"),
        ]);
        let data = extract(&archive, "linux-amd64/helm").unwrap();
        assert_eq!(data, b"#!/bin/sh\necho helm\n");
    }

    #[test]
    fn test_leading_dot_slash_matches() {
        let archive = tar_gz(&[("./ctlptl", b"bin")]);
        assert_eq!(extract(&archive, "ctlptl").unwrap(), b"bin");
    }

    #[test]
    fn test_missing_member() {
        let archive = tar_gz(&[("other", b"x")]);
        let err = extract(&archive, "helm").unwrap_err();
        assert!(matches!(err, ArtifactError::Extraction { .. }));
    }

    #[test]
    fn test_not_an_archive() {
        let err = extract(b"plain bytes", "helm").unwrap_err();
        assert!(matches!(err, ArtifactError::Extraction { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_make_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool");
        fs::write(&path, b"x").unwrap();
        make_executable(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o755, 0o755);
    }
}
