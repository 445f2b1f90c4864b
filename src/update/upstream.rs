//! Upstream version sources
//!
//! Queries release feeds (GitHub releases and tags, RubyGems) for the newest
//! published version of a package, filtered through recipe-declared version
//! patterns. Pre-releases and drafts are skipped; candidates are ordered by
//! semver with a lexicographic fallback.

use crate::core::error::ForgeError;
use crate::core::types::compare_versions;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Default pattern accepted when a recipe declares none
pub const DEFAULT_VERSION_PATTERN: &str = r"^(\d+\.\d+\.\d+)$";

/// Where a package's upstream versions are published
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamSource {
    GithubReleases { owner: String, repo: String },
    GithubTags { owner: String, repo: String },
    RubyGems { gem: String },
}

impl UpstreamSource {
    /// Infer the source from a recipe's source URL
    pub fn detect(url: &str) -> Option<Self> {
        if let Some(rest) = url.split("github.com/").nth(1) {
            let mut parts = rest.split('/');
            let owner = parts.next()?.to_string();
            let repo = parts.next()?.trim_end_matches(".git").to_string();
            if owner.is_empty() || repo.is_empty() {
                return None;
            }
            return Some(UpstreamSource::GithubReleases { owner, repo });
        }

        if url.contains("rubygems.org") {
            let gem = url.split("/gems/").nth(1)?.split('/').next()?.to_string();
            if gem.is_empty() {
                return None;
            }
            return Some(UpstreamSource::RubyGems { gem });
        }

        None
    }
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
}

#[derive(Debug, Deserialize)]
struct GithubTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GemVersion {
    number: String,
    #[serde(default)]
    prerelease: bool,
}

/// HTTP client over the upstream version feeds
pub struct UpstreamClient {
    client: reqwest::Client,
    github_token: Option<String>,
}

impl UpstreamClient {
    pub fn new(github_token: Option<String>) -> Result<Self, ForgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ForgeError::Configuration {
                message: format!("HTTPクライアントを初期化できません: {}", e),
            })?;

        Ok(Self {
            client,
            github_token,
        })
    }

    /// Newest upstream version matching the patterns, or `None` when the
    /// feed has no matching entries.
    pub async fn latest_version(
        &self,
        package: &str,
        source: &UpstreamSource,
        patterns: &[Regex],
    ) -> Result<Option<String>, ForgeError> {
        let candidates = match source {
            UpstreamSource::GithubReleases { owner, repo } => {
                self.github_releases(package, owner, repo).await?
            }
            UpstreamSource::GithubTags { owner, repo } => {
                self.github_tags(package, owner, repo).await?
            }
            UpstreamSource::RubyGems { gem } => self.gem_versions(package, gem).await?,
        };

        let mut versions: Vec<String> = candidates
            .iter()
            .filter_map(|raw| {
                let cleaned = clean_tag(package, raw);
                match_version(patterns, &cleaned)
            })
            .collect();

        versions.sort_by(|a, b| compare_versions(b, a));
        versions.dedup();
        Ok(versions.into_iter().next())
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        package: &str,
        url: &str,
    ) -> Result<Option<T>, ForgeError> {
        let mut request = self.client.get(url).header("User-Agent", "recipe-forge");
        if let Some(token) = &self.github_token {
            request = request.header("Authorization", format!("token {}", token));
        }

        let response = request.send().await.map_err(|e| ForgeError::UpstreamLookup {
            package: package.to_string(),
            message: e.to_string(),
        })?;

        match response.status().as_u16() {
            200 => {
                let body = response
                    .json::<T>()
                    .await
                    .map_err(|e| ForgeError::UpstreamLookup {
                        package: package.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(Some(body))
            }
            404 => Ok(None),
            status => Err(ForgeError::UpstreamLookup {
                package: package.to_string(),
                message: format!("HTTP {} from {}", status, url),
            }),
        }
    }

    async fn github_releases(
        &self,
        package: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<String>, ForgeError> {
        let url = format!("https://api.github.com/repos/{}/{}/releases", owner, repo);
        let releases: Option<Vec<GithubRelease>> = self.fetch_json(package, &url).await?;

        Ok(releases
            .unwrap_or_default()
            .into_iter()
            .filter(|r| !r.draft && !r.prerelease)
            .map(|r| r.tag_name)
            .collect())
    }

    async fn github_tags(
        &self,
        package: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<String>, ForgeError> {
        let url = format!("https://api.github.com/repos/{}/{}/tags", owner, repo);
        let tags: Option<Vec<GithubTag>> = self.fetch_json(package, &url).await?;

        Ok(tags.unwrap_or_default().into_iter().map(|t| t.name).collect())
    }

    /// Stream a source tarball and return its SHA256 hex digest
    pub async fn sha256_of_url(&self, package: &str, url: &str) -> Result<String, ForgeError> {
        let mut response = self
            .client
            .get(url)
            .header("User-Agent", "recipe-forge")
            .send()
            .await
            .map_err(|e| ForgeError::UpstreamLookup {
                package: package.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ForgeError::UpstreamLookup {
                package: package.to_string(),
                message: format!("HTTP {} from {}", response.status().as_u16(), url),
            });
        }

        let mut hasher = Sha256::new();
        while let Some(chunk) =
            response
                .chunk()
                .await
                .map_err(|e| ForgeError::UpstreamLookup {
                    package: package.to_string(),
                    message: e.to_string(),
                })?
        {
            hasher.update(&chunk);
        }

        Ok(hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect())
    }

    async fn gem_versions(&self, package: &str, gem: &str) -> Result<Vec<String>, ForgeError> {
        let url = format!("https://rubygems.org/api/v1/versions/{}.json", gem);
        let versions: Option<Vec<GemVersion>> = self.fetch_json(package, &url).await?;

        Ok(versions
            .unwrap_or_default()
            .into_iter()
            .filter(|v| !v.prerelease)
            .map(|v| v.number)
            .collect())
    }
}

/// Strip a package-name prefix and a leading `v` from a tag name
pub fn clean_tag(package: &str, tag: &str) -> String {
    let mut cleaned = tag;
    if let Some(rest) = cleaned.strip_prefix(package) {
        cleaned = rest.strip_prefix('-').or(rest.strip_prefix('_')).unwrap_or(rest);
    }
    cleaned.strip_prefix('v').unwrap_or(cleaned).to_string()
}

/// First pattern match wins; the first capture group is the version when the
/// pattern declares one, otherwise the whole match.
pub fn match_version(patterns: &[Regex], cleaned: &str) -> Option<String> {
    for pattern in patterns {
        if let Some(captures) = pattern.captures(cleaned) {
            let matched = captures
                .get(1)
                .or_else(|| captures.get(0))
                .map(|m| m.as_str().to_string());
            if matched.is_some() {
                return matched;
            }
        }
    }
    None
}

/// Compile recipe-declared patterns, falling back to the default
pub fn compile_patterns(raw: &[String]) -> Result<Vec<Regex>, ForgeError> {
    let raw: Vec<&str> = if raw.is_empty() {
        vec![DEFAULT_VERSION_PATTERN]
    } else {
        raw.iter().map(String::as_str).collect()
    };

    raw.into_iter()
        .map(|p| {
            Regex::new(p).map_err(|e| ForgeError::Configuration {
                message: format!("バージョンパターン '{}' が不正です: {}", p, e),
            })
        })
        .collect()
}
