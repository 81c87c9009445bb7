//! SHA-256 helpers and checksum-file parsing.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Formats a digest as lowercase hex.
fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// sha256 of an in-memory buffer.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

/// sha256 of a file, streamed.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(to_hex(&hasher.finalize()))
}

/// Returns the lowercase form of a 64-digit hex string.
pub fn normalize_sha256(value: &str) -> Option<String> {
    let value = value.trim();
    (value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| value.to_ascii_lowercase())
}

/// Extracts the digest for `file_name` from a checksum resource.
///
/// Accepts a bare hash, a single `hash  file` line, or a multi-line listing
/// (`sha256sum` output, optionally with `*` binary markers or path prefixes).
pub fn parse_checksum(body: &str, file_name: &str) -> Option<String> {
    let lines: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    for line in &lines {
        let mut parts = line.split_whitespace();
        let Some(hash) = parts.next() else {
            continue;
        };
        let Some(hash) = normalize_sha256(hash) else {
            continue;
        };
        match parts.next() {
            None if lines.len() == 1 => return Some(hash),
            None => continue,
            Some(name) => {
                let name = name.trim_start_matches('*');
                let base = name.rsplit('/').next().unwrap_or(name);
                if name == file_name || base == file_name || lines.len() == 1 {
                    return Some(hash);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HASH_A: &str = "a3f1c2e4b5d6978877665544332211ffeeddccbbaa99887766554433221100ff";
    const HASH_B: &str = "0000000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_bytes(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_sha256_file_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        let data = vec![7u8; 200_000];
        std::fs::write(&path, &data).unwrap();
        assert_eq!(sha256_file(&path).unwrap(), sha256_bytes(&data));
    }

    #[test]
    fn test_parse_bare_hash() {
        assert_eq!(parse_checksum(&format!("{}\n", HASH_A), "kubectl"), Some(HASH_A.into()));
    }

    #[test]
    fn test_parse_single_line_with_name() {
        let body = format!("{}  kind-linux-amd64\n", HASH_A.to_uppercase());
        assert_eq!(parse_checksum(&body, "kind-linux-amd64"), Some(HASH_A.into()));
    }

    #[test]
    fn test_parse_listing_by_name() {
        let body = format!(
            "{a}  _dist/k3d-darwin-arm64\n{b} *_dist/k3d-linux-amd64\n",
            a = HASH_A,
            b = HASH_B
        );
        assert_eq!(parse_checksum(&body, "k3d-linux-amd64"), Some(HASH_B.into()));
        assert_eq!(parse_checksum(&body, "k3d-darwin-arm64"), Some(HASH_A.into()));
        assert_eq!(parse_checksum(&body, "k3d-windows-amd64"), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_checksum("<html>not found</html>", "x"), None);
        assert_eq!(parse_checksum("", "x"), None);
        assert_eq!(normalize_sha256("abc"), None);
    }
}
