//! Local artifact store
//!
//! Filesystem view of built packages under
//! `<output-dir>/<platform>/<name>-<version>-<build>.tar.gz`. The store is
//! written only by the build dispatcher; the test runner and publish
//! coordinator treat artifacts as read-only.

use crate::core::error::ForgeError;
use crate::core::types::Platform;
use std::path::{Path, PathBuf};

/// File extension of built packages
pub const ARTIFACT_EXTENSION: &str = ".tar.gz";

/// A built, immutable package file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub version: String,
    pub build_string: String,
    pub platform: Platform,
    pub path: PathBuf,
    pub size: u64,
}

impl Artifact {
    /// Canonical file name, also used as the remote object key suffix
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}{}",
            self.name, self.version, self.build_string, ARTIFACT_EXTENSION
        )
    }
}

/// Parse `<name>-<version>-<build>.tar.gz` into its components. The package
/// name may itself contain dashes, so parsing works from the right.
pub fn parse_artifact_file_name(file_name: &str) -> Option<(String, String, String)> {
    let stem = file_name.strip_suffix(ARTIFACT_EXTENSION)?;
    let (rest, build_string) = stem.rsplit_once('-')?;
    let (name, version) = rest.rsplit_once('-')?;
    if name.is_empty() || version.is_empty() || build_string.is_empty() {
        return None;
    }
    Some((name.to_string(), version.to_string(), build_string.to_string()))
}

/// Filesystem store of built artifacts keyed by name, version and platform
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the builder writes a platform's artifacts into
    pub fn platform_dir(&self, platform: Platform) -> PathBuf {
        self.root.join(platform.as_str())
    }

    /// Scan one platform directory for artifacts. Files that do not follow
    /// the naming scheme are ignored.
    pub fn scan(&self, platform: Platform) -> Result<Vec<Artifact>, ForgeError> {
        let dir = self.platform_dir(platform);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some((name, version, build_string)) = parse_artifact_file_name(file_name) {
                artifacts.push(Artifact {
                    name,
                    version,
                    build_string,
                    platform,
                    path: entry.path(),
                    size: entry.metadata()?.len(),
                });
            }
        }

        artifacts.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(artifacts)
    }

    /// Find artifacts for a package, optionally pinned to one version
    pub fn find(
        &self,
        name: &str,
        version: Option<&str>,
        platform: Platform,
    ) -> Result<Vec<Artifact>, ForgeError> {
        Ok(self
            .scan(platform)?
            .into_iter()
            .filter(|a| a.name == name)
            .filter(|a| version.is_none_or(|v| a.version == v))
            .collect())
    }

    /// Register a file the builder produced, validating its name and
    /// location against the store layout.
    pub fn register(&self, path: &Path, platform: Platform) -> Result<Artifact, ForgeError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ForgeError::Configuration {
                message: format!("アーティファクトのパスが不正です: {}", path.display()),
            })?;

        let (name, version, build_string) =
            parse_artifact_file_name(file_name).ok_or_else(|| ForgeError::Configuration {
                message: format!(
                    "アーティファクト名が命名規則に従っていません: {}",
                    file_name
                ),
            })?;

        let metadata = std::fs::metadata(path)?;

        Ok(Artifact {
            name,
            version,
            build_string,
            platform,
            path: path.to_path_buf(),
            size: metadata.len(),
        })
    }
}
