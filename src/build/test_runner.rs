//! Artifact validation
//!
//! Two stages: structural checks (the file is a well-formed gzipped tar
//! archive carrying the mandatory `info/index.json` metadata entry that
//! matches the artifact), then the recipe-declared functional test commands.
//! A single failing sub-test fails the whole validation.

use crate::store::Artifact;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::io::Read;
use std::process::Stdio;
use tokio::process::Command;

/// Archive entry every package must carry
pub const METADATA_ENTRY: &str = "info/index.json";

/// Result of validating one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Pass,
    Fail(String),
}

impl Validation {
    pub fn passed(&self) -> bool {
        matches!(self, Validation::Pass)
    }
}

/// Mandatory package metadata inside the archive
#[derive(Debug, Deserialize)]
struct PackageMetadata {
    name: String,
    version: String,
}

/// Runs structural and functional validation against built artifacts
#[derive(Default)]
pub struct TestRunner {
    _private: (),
}

impl TestRunner {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Validate one artifact, running the recipe's functional test commands
    /// after the structural checks.
    pub async fn validate(&self, artifact: &Artifact, test_commands: &[String]) -> Validation {
        if let Err(reason) = check_archive(artifact) {
            return Validation::Fail(reason);
        }

        let mut failures = Vec::new();
        for command in test_commands {
            match self.run_test_command(artifact, command).await {
                Ok(0) => {}
                Ok(code) => failures.push(format!("'{}' は終了コード {} で失敗", command, code)),
                Err(e) => failures.push(format!("'{}' を実行できません: {}", command, e)),
            }
        }

        if failures.is_empty() {
            Validation::Pass
        } else {
            Validation::Fail(failures.join("; "))
        }
    }

    async fn run_test_command(
        &self,
        artifact: &Artifact,
        command: &str,
    ) -> Result<i32, std::io::Error> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("FORGE_ARTIFACT", &artifact.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(output.status.code().unwrap_or(-1))
    }
}

/// Structural check: well-formed archive with a matching metadata entry
fn check_archive(artifact: &Artifact) -> Result<(), String> {
    let file = std::fs::File::open(&artifact.path)
        .map_err(|e| format!("アーカイブを開けません: {}", e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let entries = archive
        .entries()
        .map_err(|e| format!("アーカイブ形式が不正です: {}", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| format!("アーカイブ形式が不正です: {}", e))?;
        let is_metadata = entry
            .path()
            .map(|p| p.as_ref() == std::path::Path::new(METADATA_ENTRY))
            .unwrap_or(false);
        if !is_metadata {
            continue;
        }

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| format!("{} を読み込めません: {}", METADATA_ENTRY, e))?;
        let metadata: PackageMetadata = serde_json::from_str(&content)
            .map_err(|e| format!("{} を解析できません: {}", METADATA_ENTRY, e))?;

        if metadata.name != artifact.name {
            return Err(format!(
                "メタデータのパッケージ名が一致しません: {} != {}",
                metadata.name, artifact.name
            ));
        }
        if metadata.version != artifact.version {
            return Err(format!(
                "メタデータのバージョンが一致しません: {} != {}",
                metadata.version, artifact.version
            ));
        }
        return Ok(());
    }

    Err(format!("{} がアーカイブに含まれていません", METADATA_ENTRY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Platform;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn write_archive(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (entry_path, content) in entries {
            let bytes = content.as_bytes();
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, entry_path, bytes).unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap();
    }

    fn artifact(path: PathBuf) -> Artifact {
        Artifact {
            name: "mypackage".to_string(),
            version: "1.0.0".to_string(),
            build_string: "0".to_string(),
            platform: Platform::Linux64,
            path,
            size: 0,
        }
    }

    #[tokio::test]
    async fn test_valid_archive_passes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mypackage-1.0.0-0.tar.gz");
        write_archive(
            &path,
            &[
                (METADATA_ENTRY, r#"{"name":"mypackage","version":"1.0.0"}"#),
                ("bin/mypackage", "#!/bin/sh\n"),
            ],
        );

        let runner = TestRunner::new();
        let result = runner.validate(&artifact(path), &[]).await;

        assert_eq!(result, Validation::Pass);
    }

    #[tokio::test]
    async fn test_missing_metadata_entry_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mypackage-1.0.0-0.tar.gz");
        write_archive(&path, &[("bin/mypackage", "#!/bin/sh\n")]);

        let runner = TestRunner::new();
        let result = runner.validate(&artifact(path), &[]).await;

        match result {
            Validation::Fail(reason) => assert!(reason.contains(METADATA_ENTRY)),
            Validation::Pass => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_metadata_name_mismatch_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mypackage-1.0.0-0.tar.gz");
        write_archive(
            &path,
            &[(METADATA_ENTRY, r#"{"name":"impostor","version":"1.0.0"}"#)],
        );

        let runner = TestRunner::new();
        let result = runner.validate(&artifact(path), &[]).await;

        assert!(!result.passed());
    }

    #[tokio::test]
    async fn test_metadata_version_mismatch_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mypackage-1.0.0-0.tar.gz");
        write_archive(
            &path,
            &[(METADATA_ENTRY, r#"{"name":"mypackage","version":"9.9.9"}"#)],
        );

        let runner = TestRunner::new();
        let result = runner.validate(&artifact(path), &[]).await;

        assert!(!result.passed());
    }

    #[tokio::test]
    async fn test_corrupt_archive_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mypackage-1.0.0-0.tar.gz");
        std::fs::write(&path, b"this is not a gzip archive").unwrap();

        let runner = TestRunner::new();
        let result = runner.validate(&artifact(path), &[]).await;

        assert!(!result.passed());
    }

    #[tokio::test]
    async fn test_failing_functional_test_fails_validation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mypackage-1.0.0-0.tar.gz");
        write_archive(
            &path,
            &[(METADATA_ENTRY, r#"{"name":"mypackage","version":"1.0.0"}"#)],
        );

        let runner = TestRunner::new();
        let commands = vec!["true".to_string(), "exit 7".to_string()];
        let result = runner.validate(&artifact(path), &commands).await;

        match result {
            Validation::Fail(reason) => assert!(reason.contains("7")),
            Validation::Pass => panic!("one failing sub-test must fail validation"),
        }
    }

    #[tokio::test]
    async fn test_passing_functional_tests_pass() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mypackage-1.0.0-0.tar.gz");
        write_archive(
            &path,
            &[(METADATA_ENTRY, r#"{"name":"mypackage","version":"1.0.0"}"#)],
        );

        let runner = TestRunner::new();
        let commands = vec!["test -n \"$FORGE_ARTIFACT\"".to_string()];
        let result = runner.validate(&artifact(path), &commands).await;

        assert_eq!(result, Validation::Pass);
    }
}
