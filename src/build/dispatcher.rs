//! Build dispatcher: drives the external builder, one job per
//! (recipe, platform) pair
//!
//! The dispatcher is the only writer to the artifact store. Each job runs the
//! builder as a child process, captures its output and classifies the result;
//! a job failure never propagates past the job boundary, so sibling jobs in a
//! batch are unaffected. Builds for the same recipe and platform are
//! serialized through a per-key lock.

use crate::core::config::BuilderConfig;
use crate::core::types::Platform;
use crate::store::{ArtifactStore, RecipeUnit};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;

/// Lines of combined builder output kept in the job log excerpt
const LOG_EXCERPT_LINES: usize = 30;

/// Options for a build job. `force` wins when both flags are given.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Rebuild even if a matching artifact already exists locally
    pub force: bool,
    /// Skip the builder entirely when a matching artifact already exists
    pub skip_existing: bool,
}

/// Lifecycle state of a build job; terminal once it leaves `Running`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// One (recipe, platform) build submitted to the dispatcher
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub package: String,
    pub platform: Platform,
    pub status: JobStatus,
    pub artifact_paths: Vec<PathBuf>,
    pub exit_code: Option<i32>,
    pub log_excerpt: String,
}

impl BuildJob {
    fn new(package: &str, platform: Platform) -> Self {
        Self {
            package: package.to_string(),
            platform,
            status: JobStatus::Pending,
            artifact_paths: Vec::new(),
            exit_code: None,
            log_excerpt: String::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded | JobStatus::Skipped)
    }

    fn failed(mut self, message: &str) -> Self {
        self.status = JobStatus::Failed;
        if self.log_excerpt.is_empty() {
            self.log_excerpt = message.to_string();
        } else {
            self.log_excerpt = format!("{}\n{}", message, self.log_excerpt);
        }
        self
    }
}

/// Keep only the tail of the builder output for the job record
pub(crate) fn tail_excerpt(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// Invokes the external builder and registers produced artifacts
pub struct BuildDispatcher {
    builder: BuilderConfig,
    store: ArtifactStore,
    locks: Mutex<HashMap<(String, Platform), Arc<tokio::sync::Mutex<()>>>>,
}

impl BuildDispatcher {
    pub fn new(builder: BuilderConfig, store: ArtifactStore) -> Self {
        Self {
            builder,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn lock_for(&self, package: &str, platform: Platform) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks
            .entry((package.to_string(), platform))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Run one build job to a terminal state. Never returns an error: every
    /// failure mode is captured in the job record.
    pub async fn build(
        &self,
        unit: &RecipeUnit,
        platform: Platform,
        options: &BuildOptions,
    ) -> BuildJob {
        let mut job = BuildJob::new(&unit.name, platform);

        if !unit.recipe_path.is_file() {
            return job.failed(&format!(
                "レシピを読み込めません: {}",
                unit.recipe_path.display()
            ));
        }

        // Concurrent builds for the same recipe and platform would race on
        // the same artifact path; serialize them.
        let lock = self.lock_for(&unit.name, platform);
        let _guard = lock.lock().await;

        if options.skip_existing && !options.force {
            match self
                .store
                .find(&unit.name, unit.version.as_deref(), platform)
            {
                Ok(existing) if !existing.is_empty() => {
                    job.status = JobStatus::Skipped;
                    job.artifact_paths = existing.into_iter().map(|a| a.path).collect();
                    return job;
                }
                Ok(_) => {}
                Err(e) => return job.failed(&e.to_string()),
            }
        }

        job.status = JobStatus::Running;

        let mut command = Command::new(&self.builder.command);
        command
            .arg("build")
            .arg("--recipe")
            .arg(&unit.recipe_path)
            .arg("--output-dir")
            .arg(self.store.root())
            .arg("--target-platform")
            .arg(platform.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if options.force {
            command.arg("--force");
        }

        let timeout = Duration::from_secs(self.builder.timeout_secs);
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return job.failed(&format!(
                    "ビルダー '{}' を起動できません: {}",
                    self.builder.command, e
                ));
            }
            Err(_) => {
                return job.failed(&format!(
                    "ビルドが {} 秒以内に完了しませんでした",
                    self.builder.timeout_secs
                ));
            }
        };

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        job.log_excerpt = tail_excerpt(&combined, LOG_EXCERPT_LINES);
        job.exit_code = output.status.code();

        if !output.status.success() {
            job.status = JobStatus::Failed;
            return job;
        }

        // A zero exit with no output files is still a failure: a build that
        // produced nothing is not trustworthy.
        let artifacts = match self
            .store
            .find(&unit.name, unit.version.as_deref(), platform)
        {
            Ok(artifacts) => artifacts,
            Err(e) => return job.failed(&e.to_string()),
        };

        if artifacts.is_empty() {
            return job.failed("ビルダーは成功を報告しましたが、アーティファクトが生成されていません");
        }

        job.status = JobStatus::Succeeded;
        job.artifact_paths = artifacts.into_iter().map(|a| a.path).collect();
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_recipe(dir: &TempDir) -> RecipeUnit {
        let recipe_dir = dir.path().join("recipes").join("mypackage");
        std::fs::create_dir_all(&recipe_dir).unwrap();
        let recipe_path = recipe_dir.join("recipe.yaml");
        std::fs::write(
            &recipe_path,
            "context:\n  version: \"1.0.0\"\npackage:\n  name: mypackage\n",
        )
        .unwrap();

        RecipeUnit {
            name: "mypackage".to_string(),
            version: Some("1.0.0".to_string()),
            platforms: vec![Platform::Linux64],
            recipe_path,
            test_commands: Vec::new(),
        }
    }

    /// Write an executable stand-in for the external builder
    fn write_builder(dir: &TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("fake-builder");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{}", body).unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn dispatcher(dir: &TempDir, command: String) -> BuildDispatcher {
        let store = ArtifactStore::new(dir.path().join("output"));
        BuildDispatcher::new(
            BuilderConfig {
                command,
                timeout_secs: 30,
            },
            store,
        )
    }

    fn seed_artifact(dir: &TempDir) {
        let platform_dir = dir.path().join("output").join("linux-64");
        std::fs::create_dir_all(&platform_dir).unwrap();
        std::fs::write(platform_dir.join("mypackage-1.0.0-0.tar.gz"), b"seed").unwrap();
    }

    #[tokio::test]
    async fn test_successful_build_registers_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let unit = write_recipe(&temp_dir);
        // Builder invocation: build --recipe $3 --output-dir $5 --target-platform $7
        let command = write_builder(
            &temp_dir,
            "mkdir -p \"$5/$7\" && echo artifact > \"$5/$7/mypackage-1.0.0-0.tar.gz\"",
        );
        let dispatcher = dispatcher(&temp_dir, command);

        let job = dispatcher
            .build(&unit, Platform::Linux64, &BuildOptions::default())
            .await;

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.exit_code, Some(0));
        assert_eq!(job.artifact_paths.len(), 1);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let temp_dir = TempDir::new().unwrap();
        let unit = write_recipe(&temp_dir);
        let command = write_builder(&temp_dir, "echo compile error >&2; exit 3");
        let dispatcher = dispatcher(&temp_dir, command);

        let job = dispatcher
            .build(&unit, Platform::Linux64, &BuildOptions::default())
            .await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.exit_code, Some(3));
        assert!(job.log_excerpt.contains("compile error"));
    }

    #[tokio::test]
    async fn test_zero_exit_without_artifacts_is_failure() {
        let temp_dir = TempDir::new().unwrap();
        let unit = write_recipe(&temp_dir);
        let command = write_builder(&temp_dir, "exit 0");
        let dispatcher = dispatcher(&temp_dir, command);

        let job = dispatcher
            .build(&unit, Platform::Linux64, &BuildOptions::default())
            .await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_missing_builder_is_failure_not_panic() {
        let temp_dir = TempDir::new().unwrap();
        let unit = write_recipe(&temp_dir);
        let dispatcher = dispatcher(&temp_dir, "/nonexistent/builder".to_string());

        let job = dispatcher
            .build(&unit, Platform::Linux64, &BuildOptions::default())
            .await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.exit_code.is_none());
    }

    #[tokio::test]
    async fn test_skip_existing_never_invokes_builder() {
        let temp_dir = TempDir::new().unwrap();
        let unit = write_recipe(&temp_dir);
        seed_artifact(&temp_dir);
        let marker = temp_dir.path().join("calls.txt");
        let command = write_builder(&temp_dir, &format!("echo run >> {}", marker.display()));
        let dispatcher = dispatcher(&temp_dir, command);

        let job = dispatcher
            .build(
                &unit,
                Platform::Linux64,
                &BuildOptions {
                    skip_existing: true,
                    force: false,
                },
            )
            .await;

        assert_eq!(job.status, JobStatus::Skipped);
        assert_eq!(job.artifact_paths.len(), 1);
        assert!(!marker.exists(), "builder must not run when skipping");
    }

    #[tokio::test]
    async fn test_force_always_invokes_builder() {
        let temp_dir = TempDir::new().unwrap();
        let unit = write_recipe(&temp_dir);
        seed_artifact(&temp_dir);
        let marker = temp_dir.path().join("calls.txt");
        let command = write_builder(&temp_dir, &format!("echo run >> {}", marker.display()));
        let dispatcher = dispatcher(&temp_dir, command);

        // force wins even when skip_existing is also set
        let job = dispatcher
            .build(
                &unit,
                Platform::Linux64,
                &BuildOptions {
                    skip_existing: true,
                    force: true,
                },
            )
            .await;

        assert_eq!(job.status, JobStatus::Succeeded);
        let calls = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(calls.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_missing_recipe_fails_at_the_job_boundary() {
        let temp_dir = TempDir::new().unwrap();
        let mut unit = write_recipe(&temp_dir);
        unit.recipe_path = temp_dir.path().join("gone.yaml");
        let dispatcher = dispatcher(&temp_dir, "true".to_string());

        let job = dispatcher
            .build(&unit, Platform::Linux64, &BuildOptions::default())
            .await;

        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_tail_excerpt_keeps_last_lines() {
        let output: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        let excerpt = tail_excerpt(&output, 5);

        assert_eq!(excerpt.lines().count(), 5);
        assert!(excerpt.starts_with("line 45"));
        assert!(excerpt.ends_with("line 49"));
    }
}
