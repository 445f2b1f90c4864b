//! Publish coordinator
//!
//! Pushes validated artifacts through a channel backend, one record per
//! artifact. Credentials are resolved fresh for each artifact, transient
//! failures are retried with bounded backoff, and `already-exists` outcomes
//! are success: publishing is idempotent end to end.

use crate::auth::CredentialResolver;
use crate::backend::{
    create_backend, ChannelBackend, PublishOutcome, PublishRecord, DEFAULT_REQUEST_TIMEOUT,
};
use crate::core::error::ForgeError;
use crate::core::retry::RetryManager;
use crate::core::types::BackendKind;
use crate::store::Artifact;
use std::time::Duration;

/// Where a publish run pushes to: backend kind, channel name, optional URL
/// override
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub kind: BackendKind,
    pub channel: String,
    pub url: Option<String>,
}

/// Aggregated result of a publish run
#[derive(Debug, Clone, Default)]
pub struct PublishSummary {
    pub records: Vec<PublishRecord>,
}

impl PublishSummary {
    pub fn published_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome == PublishOutcome::Published)
            .count()
    }

    pub fn already_exists_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome == PublishOutcome::AlreadyExists)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_failure()).count()
    }

    /// The run failed iff any record failed; `already-exists` never counts
    pub fn is_failure(&self) -> bool {
        self.failed_count() > 0
    }

    /// CI exit code: 0 success, 1 everything failed, 2 partial failure
    pub fn exit_code(&self) -> i32 {
        if !self.is_failure() {
            0
        } else if self.failed_count() == self.records.len() {
            1
        } else {
            2
        }
    }
}

/// Coordinates credential resolution, retries and record aggregation
pub struct PublishCoordinator {
    resolver: CredentialResolver,
    retry: RetryManager,
    timeout: Duration,
}

impl PublishCoordinator {
    pub fn new(resolver: CredentialResolver, retry: RetryManager) -> Self {
        Self {
            resolver,
            retry,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publish every artifact to the target channel. Credential failures
    /// abort before any push; per-artifact remote failures are recorded and
    /// the run continues.
    pub async fn publish_all(
        &self,
        target: &PublishTarget,
        artifacts: &[Artifact],
    ) -> Result<PublishSummary, ForgeError> {
        let mut summary = PublishSummary::default();

        for artifact in artifacts {
            let record = match self.publish_via_target(target, artifact).await {
                Ok(record) => record,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => PublishRecord::new(
                    artifact,
                    &target.channel,
                    target.kind,
                    PublishOutcome::Failed(e.to_string()),
                ),
            };

            match &record.outcome {
                PublishOutcome::Published => {
                    println!("  ✅ {}: published", artifact.file_name());
                }
                PublishOutcome::AlreadyExists => {
                    println!("  ⏭️  {}: already exists", artifact.file_name());
                }
                PublishOutcome::Failed(reason) => {
                    println!("  ❌ {}: {}", artifact.file_name(), reason);
                }
            }

            summary.records.push(record);
        }

        Ok(summary)
    }

    async fn publish_via_target(
        &self,
        target: &PublishTarget,
        artifact: &Artifact,
    ) -> Result<PublishRecord, ForgeError> {
        // Fresh credential per artifact; nothing is cached across pushes
        let credential = self.resolver.resolve(target.kind)?;
        let backend = create_backend(target.kind, target.url.as_deref(), credential, self.timeout)?;
        self.publish_one(backend.as_ref(), artifact, &target.channel)
            .await
    }

    /// Publish one artifact through an already-built backend, retrying
    /// transient failures only.
    pub async fn publish_one(
        &self,
        backend: &dyn ChannelBackend,
        artifact: &Artifact,
        channel: &str,
    ) -> Result<PublishRecord, ForgeError> {
        self.retry
            .retry(|| backend.publish(artifact, channel))
            .await
    }
}
