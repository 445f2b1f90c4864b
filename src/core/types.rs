//! Core value types shared across the orchestrator
//!
//! Target platforms, backend kinds and the retraction version selector are
//! all parsed once at the boundary into these strict types; downstream code
//! never re-interprets raw strings.

use crate::core::error::ForgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Target Platforms
// ============================================================================

/// Target platform for a build or a published artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "linux-64")]
    Linux64,
    #[serde(rename = "linux-aarch64")]
    LinuxAarch64,
    #[serde(rename = "win-64")]
    Win64,
    #[serde(rename = "osx-64")]
    Osx64,
    #[serde(rename = "osx-arm64")]
    OsxArm64,
}

impl Platform {
    /// Every platform the orchestrator can target
    pub const ALL: [Platform; 5] = [
        Platform::Linux64,
        Platform::LinuxAarch64,
        Platform::Win64,
        Platform::Osx64,
        Platform::OsxArm64,
    ];

    /// Get string representation of the platform
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux64 => "linux-64",
            Platform::LinuxAarch64 => "linux-aarch64",
            Platform::Win64 => "win-64",
            Platform::Osx64 => "osx-64",
            Platform::OsxArm64 => "osx-arm64",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ForgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "linux-64" => Ok(Platform::Linux64),
            "linux-aarch64" => Ok(Platform::LinuxAarch64),
            "win-64" => Ok(Platform::Win64),
            "osx-64" => Ok(Platform::Osx64),
            "osx-arm64" => Ok(Platform::OsxArm64),
            other => Err(ForgeError::UnknownPlatform {
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Backend Kinds
// ============================================================================

/// The remote system implementation behind a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Token-authenticated channel HTTP API
    Prefix,
    /// S3-compatible object store
    S3,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Prefix => "prefix",
            BackendKind::S3 => "s3",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ForgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "prefix" => Ok(BackendKind::Prefix),
            "s3" => Ok(BackendKind::S3),
            other => Err(ForgeError::Configuration {
                message: format!("未対応のバックエンド種別です: {}", other),
            }),
        }
    }
}

// ============================================================================
// Version Selectors
// ============================================================================

/// Retraction version selector: a single version, an explicit list, or a
/// bounded range. Ranges include both endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Single(String),
    List(Vec<String>),
    Range { start: String, end: String },
}

impl VersionSelector {
    /// Parse a selector from operator input.
    ///
    /// Accepted forms: `1.0.0`, `1.0.0,1.0.1,1.1.0`, `1.0.0..1.2.0`.
    pub fn parse(input: &str) -> Result<Self, ForgeError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ForgeError::InvalidSelector {
                selector: input.to_string(),
                message: "空のセレクタは受け付けません".to_string(),
            });
        }

        if let Some((start, end)) = input.split_once("..") {
            let (start, end) = (start.trim(), end.trim());
            if start.is_empty() || end.is_empty() {
                return Err(ForgeError::InvalidSelector {
                    selector: input.to_string(),
                    message: "範囲には両端の指定が必要です".to_string(),
                });
            }
            if end.contains("..") {
                return Err(ForgeError::InvalidSelector {
                    selector: input.to_string(),
                    message: "範囲指定は1つだけ使用できます".to_string(),
                });
            }
            if compare_versions(start, end) == std::cmp::Ordering::Greater {
                return Err(ForgeError::InvalidSelector {
                    selector: input.to_string(),
                    message: "範囲の下限が上限を超えています".to_string(),
                });
            }
            return Ok(VersionSelector::Range {
                start: start.to_string(),
                end: end.to_string(),
            });
        }

        if input.contains(',') {
            let versions: Vec<String> = input
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if versions.is_empty() {
                return Err(ForgeError::InvalidSelector {
                    selector: input.to_string(),
                    message: "リストに有効なバージョンがありません".to_string(),
                });
            }
            return Ok(VersionSelector::List(versions));
        }

        Ok(VersionSelector::Single(input.to_string()))
    }

    /// Check whether a concrete version is selected.
    pub fn matches(&self, version: &str) -> bool {
        match self {
            VersionSelector::Single(v) => v == version,
            VersionSelector::List(vs) => vs.iter().any(|v| v == version),
            VersionSelector::Range { start, end } => {
                compare_versions(version, start) != std::cmp::Ordering::Less
                    && compare_versions(version, end) != std::cmp::Ordering::Greater
            }
        }
    }

    /// The explicitly requested versions, when the selector names them.
    /// Ranges select against the live listing instead and return `None`.
    pub fn requested_versions(&self) -> Option<Vec<String>> {
        match self {
            VersionSelector::Single(v) => Some(vec![v.clone()]),
            VersionSelector::List(vs) => Some(vs.clone()),
            VersionSelector::Range { .. } => None,
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Single(v) => f.write_str(v),
            VersionSelector::List(vs) => f.write_str(&vs.join(",")),
            VersionSelector::Range { start, end } => write!(f, "{}..{}", start, end),
        }
    }
}

/// Compare two version strings, preferring semver ordering and falling back
/// to lexicographic comparison for non-semver versions.
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    match (
        semver::Version::parse(a.trim_start_matches('v')),
        semver::Version::parse(b.trim_start_matches('v')),
    ) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}
