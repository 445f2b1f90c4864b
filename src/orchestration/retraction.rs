//! Retraction engine
//!
//! Deleting published artifacts is irreversible, so the engine walks a strict
//! state machine: Requested → Resolving → Previewed → Confirmed → Executing →
//! Completed | Aborted | PartiallyFailed. The plan is fully materialized
//! against the channel's live listing before any side effect: no delete call
//! is ever issued for a target that was not explicitly resolved, previewed
//! and (absent `force`) confirmed. Deletes run sequentially so the audit
//! trail stays strictly ordered.

use crate::backend::{ChannelBackend, DeleteOutcome, PackageEntry};
use crate::core::error::ForgeError;
use crate::core::types::{BackendKind, Platform, VersionSelector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Operator input for one retraction run
#[derive(Debug, Clone)]
pub struct RetractionRequest {
    pub package: String,
    pub channel: String,
    pub selector: VersionSelector,
    /// Restrict the plan to one platform
    pub platform: Option<Platform>,
    /// Halt after the preview, issuing zero delete calls
    pub dry_run: bool,
    /// Skip the interactive confirmation gate
    pub force: bool,
    pub verbose: bool,
}

/// Engine states; terminal once Completed, Aborted or PartiallyFailed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetractionState {
    Requested,
    Resolving,
    Previewed,
    Confirmed,
    Executing,
    Completed,
    Aborted,
    PartiallyFailed,
}

impl RetractionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetractionState::Requested => "requested",
            RetractionState::Resolving => "resolving",
            RetractionState::Previewed => "previewed",
            RetractionState::Confirmed => "confirmed",
            RetractionState::Executing => "executing",
            RetractionState::Completed => "completed",
            RetractionState::Aborted => "aborted",
            RetractionState::PartiallyFailed => "partially-failed",
        }
    }
}

/// One concrete deletion target, resolved against the live listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetractionTarget {
    pub package: String,
    pub version: String,
    pub platform: Platform,
}

/// The fully materialized plan shown to the operator before any side effect
#[derive(Debug, Clone)]
pub struct RetractionPlan {
    pub package: String,
    pub channel: String,
    pub backend: BackendKind,
    pub targets: Vec<RetractionTarget>,
    /// Requested versions that are absent from the channel: reported,
    /// excluded from the plan, never silently assumed deleted
    pub missing: Vec<String>,
}

impl RetractionPlan {
    /// Render the plan for operator review
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Retraction plan for '{}' on channel '{}' ({} backend):\n",
            self.package, self.channel, self.backend
        ));
        for target in &self.targets {
            out.push_str(&format!(
                "  - {} {} [{}]\n",
                target.package, target.version, target.platform
            ));
        }
        if !self.missing.is_empty() {
            out.push_str(&format!(
                "  ⚠️  not present on the channel (excluded): {}\n",
                self.missing.join(", ")
            ));
        }
        out.push_str(&format!("  total: {} delete target(s)", self.targets.len()));
        out
    }
}

/// Outcome of one sequential delete call
#[derive(Debug, Clone)]
pub struct TargetResult {
    pub target: RetractionTarget,
    pub outcome: DeleteOutcome,
}

/// Final report of a retraction run
#[derive(Debug, Clone)]
pub struct RetractionReport {
    pub state: RetractionState,
    pub plan: RetractionPlan,
    pub results: Vec<TargetResult>,
    pub dry_run: bool,
}

impl RetractionReport {
    pub fn deleted_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.is_success())
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.deleted_count()
    }

    /// CI exit code: 0 clean completion, 1 aborted or nothing deleted,
    /// 2 partial failure or unresolved-but-requested targets
    pub fn exit_code(&self) -> i32 {
        match self.state {
            RetractionState::Aborted => 1,
            RetractionState::PartiallyFailed => {
                if self.deleted_count() == 0 {
                    1
                } else {
                    2
                }
            }
            RetractionState::Completed => {
                if self.plan.missing.is_empty() {
                    0
                } else {
                    2
                }
            }
            _ => 1,
        }
    }
}

/// Interactive gate between preview and execution
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, plan: &RetractionPlan) -> Result<bool, ForgeError>;
}

/// Reads a yes/no answer from the operator's terminal
pub struct StdinGate;

#[async_trait]
impl ConfirmationGate for StdinGate {
    async fn confirm(&self, plan: &RetractionPlan) -> Result<bool, ForgeError> {
        let prompt = format!(
            "⚠️  {} 件の削除は取り消せません。実行しますか？ (yes/no): ",
            plan.targets.len()
        );
        io::stdout().write_all(prompt.as_bytes()).await?;
        io::stdout().flush().await?;

        let mut answer = String::new();
        let mut reader = BufReader::new(io::stdin());
        reader.read_line(&mut answer).await?;

        let answer = answer.trim().to_lowercase();
        Ok(answer == "yes" || answer == "y")
    }
}

/// The retraction state machine
pub struct RetractionEngine {
    state: RetractionState,
    transitions: Vec<(RetractionState, RetractionState, DateTime<Utc>)>,
}

impl Default for RetractionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RetractionEngine {
    pub fn new() -> Self {
        Self {
            state: RetractionState::Requested,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> RetractionState {
        self.state
    }

    /// Transition history as a human-readable audit trail
    pub fn history(&self) -> String {
        self.transitions
            .iter()
            .map(|(from, to, at)| {
                format!("{}: {} → {}", at.to_rfc3339(), from.as_str(), to.as_str())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn transition(&mut self, to: RetractionState) {
        self.transitions.push((self.state, to, Utc::now()));
        self.state = to;
    }

    /// Run one retraction to a terminal state.
    ///
    /// Single-flight: delete calls are issued sequentially within the plan,
    /// and one target's failure never aborts the remaining deletes.
    pub async fn run(
        &mut self,
        request: &RetractionRequest,
        backend: &dyn ChannelBackend,
        gate: &dyn ConfirmationGate,
    ) -> Result<RetractionReport, ForgeError> {
        // Resolving: expand the selector against what is actually present
        self.transition(RetractionState::Resolving);
        let listing = backend.list(&request.package, &request.channel).await?;

        if request.verbose {
            println!(
                "📋 {} entries on channel '{}' for '{}'",
                listing.len(),
                request.channel,
                request.package
            );
        }

        let plan = resolve_plan(request, backend.kind(), &listing);

        if plan.targets.is_empty() {
            // An empty resolution is an error, never a silent no-op
            return Err(ForgeError::Configuration {
                message: format!(
                    "セレクタ '{}' はチャンネル '{}' 上の '{}' に一致しません",
                    request.selector, request.channel, request.package
                ),
            });
        }

        // Previewed: the full plan is rendered before any side effect
        self.transition(RetractionState::Previewed);
        println!("{}", plan.render());

        if request.dry_run {
            println!("🧪 dry-run: no delete calls were issued");
            self.transition(RetractionState::Completed);
            return Ok(RetractionReport {
                state: self.state,
                plan,
                results: Vec::new(),
                dry_run: true,
            });
        }

        // Confirmed: the primary safety control against accidental deletion
        if !request.force {
            if !gate.confirm(&plan).await? {
                println!("Retraction aborted by operator; zero deletes issued");
                self.transition(RetractionState::Aborted);
                return Ok(RetractionReport {
                    state: self.state,
                    plan,
                    results: Vec::new(),
                    dry_run: false,
                });
            }
        }
        self.transition(RetractionState::Confirmed);

        // Executing: sequential deletes, outcomes recorded independently
        self.transition(RetractionState::Executing);
        let mut results = Vec::with_capacity(plan.targets.len());
        for target in &plan.targets {
            let outcome = match backend
                .delete(
                    &target.package,
                    &target.version,
                    target.platform,
                    &request.channel,
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(ForgeError::RemoteForbidden { subject, .. }) => {
                    DeleteOutcome::Forbidden(subject)
                }
                Err(ForgeError::RemoteNotFound { .. }) => DeleteOutcome::NotFound,
                // Deletion is not safe to retry blindly: surface immediately
                Err(e) => DeleteOutcome::Transient(e.to_string()),
            };

            match &outcome {
                DeleteOutcome::Deleted => {
                    println!("  ✅ deleted {} {} [{}]", target.package, target.version, target.platform);
                }
                DeleteOutcome::NotFound => {
                    println!("  ⚠️  {} {} [{}]: already absent", target.package, target.version, target.platform);
                }
                DeleteOutcome::Forbidden(reason) => {
                    println!("  ❌ {} {} [{}]: forbidden ({})", target.package, target.version, target.platform, reason);
                }
                DeleteOutcome::Transient(reason) => {
                    println!("  ❌ {} {} [{}]: {}", target.package, target.version, target.platform, reason);
                }
            }

            results.push(TargetResult {
                target: target.clone(),
                outcome,
            });
        }

        let all_succeeded = results.iter().all(|r| r.outcome.is_success());
        self.transition(if all_succeeded {
            RetractionState::Completed
        } else {
            RetractionState::PartiallyFailed
        });

        Ok(RetractionReport {
            state: self.state,
            plan,
            results,
            dry_run: false,
        })
    }
}

/// Expand the selector into concrete targets, confirming each against the
/// live listing. Every target in the returned plan is a member of `listing`.
fn resolve_plan(
    request: &RetractionRequest,
    backend: BackendKind,
    listing: &[PackageEntry],
) -> RetractionPlan {
    let filtered: Vec<&PackageEntry> = listing
        .iter()
        .filter(|entry| request.platform.is_none_or(|p| entry.platform == p))
        .collect();

    let mut targets: Vec<RetractionTarget> = Vec::new();
    for entry in &filtered {
        if !request.selector.matches(&entry.version) {
            continue;
        }
        let target = RetractionTarget {
            package: request.package.clone(),
            version: entry.version.clone(),
            platform: entry.platform,
        };
        // Several builds of one version collapse into a single target
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    let missing = match request.selector.requested_versions() {
        Some(requested) => requested
            .into_iter()
            .filter(|version| !filtered.iter().any(|e| &e.version == version))
            .collect(),
        // A range selects against the listing; nothing explicit can be missing
        None => Vec::new(),
    };

    RetractionPlan {
        package: request.package.clone(),
        channel: request.channel.clone(),
        backend,
        targets,
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PublishOutcome, PublishRecord};
    use crate::store::Artifact;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn entry(version: &str, platform: Platform) -> PackageEntry {
        PackageEntry {
            version: version.to_string(),
            platform,
            build_string: Some("0".to_string()),
        }
    }

    fn request(selector: &str) -> RetractionRequest {
        RetractionRequest {
            package: "mypackage".to_string(),
            channel: "test".to_string(),
            selector: VersionSelector::parse(selector).unwrap(),
            platform: None,
            dry_run: false,
            force: false,
            verbose: false,
        }
    }

    /// Channel double: serves a fixed listing and records delete calls
    struct MockBackend {
        listing: Vec<PackageEntry>,
        delete_calls: Mutex<Vec<(String, String, Platform)>>,
        deny_version: Option<String>,
    }

    impl MockBackend {
        fn with_listing(listing: Vec<PackageEntry>) -> Self {
            Self {
                listing,
                delete_calls: Mutex::new(Vec::new()),
                deny_version: None,
            }
        }

        fn delete_count(&self) -> usize {
            self.delete_calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChannelBackend for MockBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Prefix
        }

        async fn list(
            &self,
            _package: &str,
            _channel: &str,
        ) -> Result<Vec<PackageEntry>, ForgeError> {
            Ok(self.listing.clone())
        }

        async fn publish(
            &self,
            artifact: &Artifact,
            channel: &str,
        ) -> Result<PublishRecord, ForgeError> {
            Ok(PublishRecord::new(
                artifact,
                channel,
                self.kind(),
                PublishOutcome::Published,
            ))
        }

        async fn delete(
            &self,
            package: &str,
            version: &str,
            platform: Platform,
            _channel: &str,
        ) -> Result<DeleteOutcome, ForgeError> {
            self.delete_calls
                .lock()
                .unwrap()
                .push((package.to_string(), version.to_string(), platform));

            if self.deny_version.as_deref() == Some(version) {
                return Ok(DeleteOutcome::Forbidden("HTTP 403".to_string()));
            }
            Ok(DeleteOutcome::Deleted)
        }
    }

    struct AlwaysConfirm;

    #[async_trait]
    impl ConfirmationGate for AlwaysConfirm {
        async fn confirm(&self, _plan: &RetractionPlan) -> Result<bool, ForgeError> {
            Ok(true)
        }
    }

    struct NeverConfirm;

    #[async_trait]
    impl ConfirmationGate for NeverConfirm {
        async fn confirm(&self, _plan: &RetractionPlan) -> Result<bool, ForgeError> {
            Ok(false)
        }
    }

    /// Fails the test if the gate is ever consulted
    struct PanicGate(AtomicU32);

    #[async_trait]
    impl ConfirmationGate for PanicGate {
        async fn confirm(&self, _plan: &RetractionPlan) -> Result<bool, ForgeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("confirmation gate must not be consulted");
        }
    }

    #[tokio::test]
    async fn test_dry_run_issues_zero_delete_calls() {
        let backend = MockBackend::with_listing(vec![
            entry("1.0.0", Platform::Linux64),
            entry("1.0.1", Platform::Linux64),
        ]);
        let mut engine = RetractionEngine::new();
        let mut request = request("1.0.0,1.0.1");
        request.dry_run = true;

        let report = engine
            .run(&request, &backend, &PanicGate(AtomicU32::new(0)))
            .await
            .unwrap();

        assert_eq!(backend.delete_count(), 0);
        assert_eq!(report.state, RetractionState::Completed);
        assert!(report.dry_run);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.plan.targets.len(), 2);
    }

    #[tokio::test]
    async fn test_plan_is_subset_of_live_listing() {
        let backend = MockBackend::with_listing(vec![
            entry("1.0.0", Platform::Linux64),
            entry("1.1.0", Platform::Linux64),
            entry("2.0.0", Platform::Linux64),
        ]);
        let mut engine = RetractionEngine::new();
        let request = request("0.5.0..1.5.0");

        let report = engine
            .run(&request, &backend, &AlwaysConfirm)
            .await
            .unwrap();

        for target in &report.plan.targets {
            assert!(
                backend
                    .listing
                    .iter()
                    .any(|e| e.version == target.version && e.platform == target.platform),
                "plan target {:?} not in the pre-call listing",
                target
            );
        }
        assert_eq!(report.plan.targets.len(), 2);
    }

    #[tokio::test]
    async fn test_absent_version_excluded_and_reported() {
        // Two requested, one absent remotely: the plan resolves to exactly
        // one target and one delete call is issued.
        let backend = MockBackend::with_listing(vec![entry("1.0.0", Platform::Linux64)]);
        let mut engine = RetractionEngine::new();
        let request = request("1.0.0,1.0.1");

        let report = engine
            .run(&request, &backend, &AlwaysConfirm)
            .await
            .unwrap();

        assert_eq!(report.plan.targets.len(), 1);
        assert_eq!(report.plan.missing, vec!["1.0.1".to_string()]);
        assert_eq!(backend.delete_count(), 1);
        assert_eq!(report.state, RetractionState::Completed);
        // Unresolved-but-requested targets keep the exit code non-zero
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_empty_resolution_is_an_error_not_a_noop() {
        let backend = MockBackend::with_listing(vec![entry("2.0.0", Platform::Linux64)]);
        let mut engine = RetractionEngine::new();
        let request = request("1.0.0");

        let result = engine.run(&request, &backend, &AlwaysConfirm).await;

        assert!(matches!(result, Err(ForgeError::Configuration { .. })));
        assert_eq!(backend.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_declined_confirmation_aborts_with_zero_deletes() {
        let backend = MockBackend::with_listing(vec![entry("1.0.0", Platform::Linux64)]);
        let mut engine = RetractionEngine::new();
        let request = request("1.0.0");

        let report = engine.run(&request, &backend, &NeverConfirm).await.unwrap();

        assert_eq!(report.state, RetractionState::Aborted);
        assert_eq!(backend.delete_count(), 0);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_force_skips_the_confirmation_gate() {
        let backend = MockBackend::with_listing(vec![entry("1.0.0", Platform::Linux64)]);
        let mut engine = RetractionEngine::new();
        let mut request = request("1.0.0");
        request.force = true;

        let report = engine
            .run(&request, &backend, &PanicGate(AtomicU32::new(0)))
            .await
            .unwrap();

        assert_eq!(report.state, RetractionState::Completed);
        assert_eq!(backend.delete_count(), 1);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_single_failure_does_not_abort_remaining_deletes() {
        let mut backend = MockBackend::with_listing(vec![
            entry("1.0.0", Platform::Linux64),
            entry("1.0.1", Platform::Linux64),
            entry("1.0.2", Platform::Linux64),
        ]);
        backend.deny_version = Some("1.0.1".to_string());
        let mut engine = RetractionEngine::new();
        let request = request("1.0.0,1.0.1,1.0.2");

        let report = engine
            .run(&request, &backend, &AlwaysConfirm)
            .await
            .unwrap();

        // All three targets were attempted despite the middle failure
        assert_eq!(backend.delete_count(), 3);
        assert_eq!(report.state, RetractionState::PartiallyFailed);
        assert_eq!(report.deleted_count(), 2);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_platform_filter_restricts_the_plan() {
        let backend = MockBackend::with_listing(vec![
            entry("1.0.0", Platform::Linux64),
            entry("1.0.0", Platform::Osx64),
        ]);
        let mut engine = RetractionEngine::new();
        let mut request = request("1.0.0");
        request.platform = Some(Platform::Linux64);

        let report = engine
            .run(&request, &backend, &AlwaysConfirm)
            .await
            .unwrap();

        assert_eq!(report.plan.targets.len(), 1);
        assert_eq!(report.plan.targets[0].platform, Platform::Linux64);
        assert_eq!(backend.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_builds_collapse_into_one_target() {
        let backend = MockBackend::with_listing(vec![
            PackageEntry {
                version: "1.0.0".to_string(),
                platform: Platform::Linux64,
                build_string: Some("0".to_string()),
            },
            PackageEntry {
                version: "1.0.0".to_string(),
                platform: Platform::Linux64,
                build_string: Some("1".to_string()),
            },
        ]);
        let mut engine = RetractionEngine::new();
        let request = request("1.0.0");

        let report = engine
            .run(&request, &backend, &AlwaysConfirm)
            .await
            .unwrap();

        assert_eq!(report.plan.targets.len(), 1);
        assert_eq!(backend.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_transitions_are_recorded_in_order() {
        let backend = MockBackend::with_listing(vec![entry("1.0.0", Platform::Linux64)]);
        let mut engine = RetractionEngine::new();
        let mut request = request("1.0.0");
        request.force = true;

        engine
            .run(&request, &backend, &PanicGate(AtomicU32::new(0)))
            .await
            .unwrap();

        let history = engine.history();
        assert!(history.contains("requested → resolving"));
        assert!(history.contains("resolving → previewed"));
        assert!(history.contains("previewed → confirmed"));
        assert!(history.contains("confirmed → executing"));
        assert!(history.contains("executing → completed"));
    }

    #[test]
    fn test_plan_render_lists_every_target() {
        let plan = RetractionPlan {
            package: "mypackage".to_string(),
            channel: "test".to_string(),
            backend: BackendKind::Prefix,
            targets: vec![
                RetractionTarget {
                    package: "mypackage".to_string(),
                    version: "1.0.0".to_string(),
                    platform: Platform::Linux64,
                },
                RetractionTarget {
                    package: "mypackage".to_string(),
                    version: "1.0.1".to_string(),
                    platform: Platform::Osx64,
                },
            ],
            missing: vec!["1.0.2".to_string()],
        };

        let rendered = plan.render();
        assert!(rendered.contains("mypackage 1.0.0 [linux-64]"));
        assert!(rendered.contains("mypackage 1.0.1 [osx-64]"));
        assert!(rendered.contains("1.0.2"));
        assert!(rendered.contains("2 delete target(s)"));
    }
}
