//! Tool catalog.
//!
//! Each [`ToolDefinition`] describes how to build the download URL, checksum
//! location and archive layout of one tool for a given version and platform.
//! Templates understand `{version}`, `{os}`, `{arch}` and `{exe}`; checksum
//! templates additionally understand `{url}` and `{file}` (the download URL
//! and its last path segment).

use std::collections::BTreeMap;

use super::types::{Arch, ChecksumSource, Os, Platform};

// ============================================================================
// Definitions
// ============================================================================

/// How to find out which version `latest` means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatestSource {
    /// A plain-text endpoint whose body is the version (`v1.28.0`).
    StableText { url: String },
    /// GitHub's latest-release API for `owner/repo`.
    GithubRelease { repo: String },
}

impl LatestSource {
    /// URL queried for the current version.
    pub fn url(&self) -> String {
        match self {
            Self::StableText { url } => url.clone(),
            Self::GithubRelease { repo } => {
                format!("https://api.github.com/repos/{}/releases/latest", repo)
            }
        }
    }
}

/// Complete definition of a downloadable tool.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub id: String,
    pub description: String,
    pub default_version: String,
    pub url_template: String,
    /// Companion checksum resource: a bare hash, `hash  file`, or a listing.
    pub checksum_url: Option<String>,
    /// Path of the executable inside a `.tar.gz` download. `None` means the
    /// download is the executable itself.
    pub archive_member: Option<String>,
    pub platforms: Vec<Platform>,
    /// Per-tool OS spellings, e.g. `darwin` → `mac`.
    pub os_names: BTreeMap<Os, String>,
    /// Per-tool architecture spellings, e.g. `amd64` → `x86_64`.
    pub arch_names: BTreeMap<Arch, String>,
    pub latest: Option<LatestSource>,
}

impl ToolDefinition {
    /// Starts a definition supporting linux and darwin on amd64 and arm64.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        default_version: impl Into<String>,
        url_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            default_version: default_version.into(),
            url_template: url_template.into(),
            checksum_url: None,
            archive_member: None,
            platforms: unix_platforms(),
            os_names: BTreeMap::new(),
            arch_names: BTreeMap::new(),
            latest: None,
        }
    }

    pub fn with_checksum_url(mut self, template: impl Into<String>) -> Self {
        self.checksum_url = Some(template.into());
        self
    }

    pub fn with_archive_member(mut self, template: impl Into<String>) -> Self {
        self.archive_member = Some(template.into());
        self
    }

    pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn with_os_name(mut self, os: Os, name: impl Into<String>) -> Self {
        self.os_names.insert(os, name.into());
        self
    }

    pub fn with_arch_name(mut self, arch: Arch, name: impl Into<String>) -> Self {
        self.arch_names.insert(arch, name.into());
        self
    }

    pub fn with_latest(mut self, latest: LatestSource) -> Self {
        self.latest = Some(latest);
        self
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }

    /// Renders a template for one version and platform.
    pub fn render(&self, template: &str, version: &str, platform: Platform) -> String {
        let os = self
            .os_names
            .get(&platform.os)
            .map(String::as_str)
            .unwrap_or(platform.os.as_str());
        let arch = self
            .arch_names
            .get(&platform.arch)
            .map(String::as_str)
            .unwrap_or(platform.arch.as_str());

        template
            .replace("{version}", version)
            .replace("{os}", os)
            .replace("{arch}", arch)
            .replace("{exe}", platform.os.exe_suffix())
    }

    pub fn download_url(&self, version: &str, platform: Platform) -> String {
        self.render(&self.url_template, version, platform)
    }

    /// Checksum source from the catalog, if the tool publishes one.
    pub fn checksum_source(&self, version: &str, platform: Platform) -> Option<ChecksumSource> {
        let template = self.checksum_url.as_ref()?;
        let url = self.download_url(version, platform);
        let rendered = self
            .render(template, version, platform)
            .replace("{file}", download_file_name(&url))
            .replace("{url}", &url);
        Some(ChecksumSource::Url(rendered))
    }

    pub fn archive_member(&self, version: &str, platform: Platform) -> Option<String> {
        self.archive_member
            .as_ref()
            .map(|t| self.render(t, version, platform))
    }

    /// File name of the executable in the cache.
    pub fn executable_name(&self, platform: Platform) -> String {
        format!("{}{}", self.id, platform.os.exe_suffix())
    }
}

/// Last path segment of a URL.
pub fn download_file_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

fn unix_platforms() -> Vec<Platform> {
    vec![
        Platform::new(Os::Linux, Arch::Amd64),
        Platform::new(Os::Linux, Arch::Arm64),
        Platform::new(Os::Darwin, Arch::Amd64),
        Platform::new(Os::Darwin, Arch::Arm64),
    ]
}

// ============================================================================
// Built-in Tools
// ============================================================================

fn kubectl() -> ToolDefinition {
    let mut platforms = unix_platforms();
    platforms.push(Platform::new(Os::Windows, Arch::Amd64));

    ToolDefinition::new(
        "kubectl",
        "Kubernetes command-line client",
        "1.27.2",
        "https://dl.k8s.io/release/v{version}/bin/{os}/{arch}/kubectl{exe}",
    )
    .with_checksum_url("{url}.sha256")
    .with_platforms(platforms)
    .with_latest(LatestSource::StableText {
        url: "https://dl.k8s.io/release/stable.txt".to_string(),
    })
}

fn kind() -> ToolDefinition {
    ToolDefinition::new(
        "kind",
        "Kubernetes in Docker",
        "0.19.0",
        "https://github.com/kubernetes-sigs/kind/releases/download/v{version}/kind-{os}-{arch}",
    )
    .with_checksum_url("{url}.sha256sum")
    .with_latest(LatestSource::GithubRelease {
        repo: "kubernetes-sigs/kind".to_string(),
    })
}

fn k3d() -> ToolDefinition {
    ToolDefinition::new(
        "k3d",
        "k3s clusters in Docker",
        "5.5.1",
        "https://github.com/k3d-io/k3d/releases/download/v{version}/k3d-{os}-{arch}",
    )
    .with_checksum_url("https://github.com/k3d-io/k3d/releases/download/v{version}/checksums.txt")
    .with_latest(LatestSource::GithubRelease {
        repo: "k3d-io/k3d".to_string(),
    })
}

fn helm() -> ToolDefinition {
    ToolDefinition::new(
        "helm",
        "Kubernetes package manager",
        "3.12.1",
        "https://get.helm.sh/helm-v{version}-{os}-{arch}.tar.gz",
    )
    .with_checksum_url("{url}.sha256sum")
    .with_archive_member("{os}-{arch}/helm{exe}")
    .with_latest(LatestSource::GithubRelease {
        repo: "helm/helm".to_string(),
    })
}

fn ctlptl() -> ToolDefinition {
    ToolDefinition::new(
        "ctlptl",
        "Declarative local Kubernetes cluster setup",
        "0.8.19",
        "https://github.com/tilt-dev/ctlptl/releases/download/v{version}/ctlptl.{version}.{os}.{arch}.tar.gz",
    )
    .with_checksum_url(
        "https://github.com/tilt-dev/ctlptl/releases/download/v{version}/checksums.txt",
    )
    .with_archive_member("ctlptl")
    .with_os_name(Os::Darwin, "mac")
    .with_arch_name(Arch::Amd64, "x86_64")
    .with_latest(LatestSource::GithubRelease {
        repo: "tilt-dev/ctlptl".to_string(),
    })
}

// ============================================================================
// Catalog
// ============================================================================

/// Set of known tools, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tools: BTreeMap<String, ToolDefinition>,
}

impl Catalog {
    /// An empty catalog.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in tools.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for tool in [kubectl(), kind(), k3d(), helm(), ctlptl()] {
            catalog.register(tool);
        }
        catalog
    }

    /// Adds or replaces a tool.
    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.id.clone(), tool);
    }

    pub fn get(&self, id: &str) -> Option<&ToolDefinition> {
        self.tools.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_amd64() -> Platform {
        Platform::new(Os::Linux, Arch::Amd64)
    }

    #[test]
    fn test_builtin_tools() {
        let catalog = Catalog::builtin();
        let ids: Vec<_> = catalog.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["ctlptl", "helm", "k3d", "kind", "kubectl"]);
    }

    #[test]
    fn test_kubectl_urls() {
        let catalog = Catalog::builtin();
        let kubectl = catalog.get("kubectl").unwrap();
        assert_eq!(
            kubectl.download_url("1.27.2", linux_amd64()),
            "https://dl.k8s.io/release/v1.27.2/bin/linux/amd64/kubectl"
        );
        assert_eq!(
            kubectl.checksum_source("1.27.2", linux_amd64()),
            Some(ChecksumSource::Url(
                "https://dl.k8s.io/release/v1.27.2/bin/linux/amd64/kubectl.sha256".into()
            ))
        );

        let windows = Platform::new(Os::Windows, Arch::Amd64);
        assert!(kubectl.supports(windows));
        assert!(kubectl.download_url("1.27.2", windows).ends_with("kubectl.exe"));
        assert_eq!(kubectl.executable_name(windows), "kubectl.exe");
    }

    #[test]
    fn test_helm_archive_member() {
        let catalog = Catalog::builtin();
        let helm = catalog.get("helm").unwrap();
        let arm = Platform::new(Os::Darwin, Arch::Arm64);
        assert_eq!(
            helm.download_url("3.12.1", arm),
            "https://get.helm.sh/helm-v3.12.1-darwin-arm64.tar.gz"
        );
        assert_eq!(helm.archive_member("3.12.1", arm).as_deref(), Some("darwin-arm64/helm"));
        assert!(!helm.supports(Platform::new(Os::Windows, Arch::Amd64)));
    }

    #[test]
    fn test_ctlptl_naming_overrides() {
        let catalog = Catalog::builtin();
        let ctlptl = catalog.get("ctlptl").unwrap();
        assert_eq!(
            ctlptl.download_url("0.8.19", Platform::new(Os::Darwin, Arch::Amd64)),
            "https://github.com/tilt-dev/ctlptl/releases/download/v0.8.19/ctlptl.0.8.19.mac.x86_64.tar.gz"
        );
        assert_eq!(
            ctlptl.download_url("0.8.19", Platform::new(Os::Linux, Arch::Arm64)),
            "https://github.com/tilt-dev/ctlptl/releases/download/v0.8.19/ctlptl.0.8.19.linux.arm64.tar.gz"
        );
    }

    #[test]
    fn test_register_custom_tool() {
        let mut catalog = Catalog::empty();
        catalog.register(
            ToolDefinition::new(
                "example-tool",
                "Example",
                "1.0.0",
                "https://github.com/example/releases/download/v{version}/example-{os}-{arch}",
            )
            .with_checksum_url("https://github.com/example/releases/download/v{version}/{file}.sha256"),
        );
        let tool = catalog.get("example-tool").unwrap();
        assert_eq!(
            tool.checksum_source("1.2.3", linux_amd64()),
            Some(ChecksumSource::Url(
                "https://github.com/example/releases/download/v1.2.3/example-linux-amd64.sha256"
                    .into()
            ))
        );
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_latest_source_urls() {
        let gh = LatestSource::GithubRelease {
            repo: "helm/helm".into(),
        };
        assert_eq!(gh.url(), "https://api.github.com/repos/helm/helm/releases/latest");
    }
}
