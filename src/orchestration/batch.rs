//! Batch orchestrator
//!
//! Iterates the discovered recipe units and runs Build → Test → Publish for
//! each, with bounded worker concurrency. When continue-on-error is off, the
//! first failure stops further scheduling but already-dispatched units run to
//! completion. The final summary is tabular (unit, status) with a CI exit
//! code.

use crate::build::{BuildDispatcher, BuildJob, BuildOptions, TestRunner, Validation};
use crate::backend::PublishRecord;
use crate::orchestration::publisher::{PublishCoordinator, PublishTarget};
use crate::store::RecipeUnit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Options for one batch run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Keep scheduling units after a failure (default: stop scheduling)
    pub continue_on_error: bool,
    /// Maximum concurrently dispatched units
    pub max_workers: usize,
    /// Options forwarded to every build job
    pub build: BuildOptions,
    /// Publish destination; `None` builds and tests only
    pub publish: Option<PublishTarget>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            max_workers: 2,
            build: BuildOptions::default(),
            publish: None,
        }
    }
}

/// Terminal status of one unit's pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded,
    BuildFailed,
    TestFailed,
    PublishFailed,
    Skipped,
}

impl UnitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitOutcome::Succeeded => "succeeded",
            UnitOutcome::BuildFailed => "build-failed",
            UnitOutcome::TestFailed => "test-failed",
            UnitOutcome::PublishFailed => "publish-failed",
            UnitOutcome::Skipped => "skipped",
        }
    }
}

/// Result of one unit's Build → Test → Publish pipeline
#[derive(Debug)]
pub struct UnitReport {
    pub unit: String,
    pub outcome: UnitOutcome,
    pub jobs: Vec<BuildJob>,
    pub records: Vec<PublishRecord>,
    pub detail: Option<String>,
}

impl UnitReport {
    fn bare(unit: String, outcome: UnitOutcome) -> Self {
        Self {
            unit,
            outcome,
            jobs: Vec::new(),
            records: Vec::new(),
            detail: None,
        }
    }
}

/// Aggregated batch result
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub reports: Vec<UnitReport>,
}

impl BatchSummary {
    pub fn succeeded_count(&self) -> usize {
        self.count(UnitOutcome::Succeeded)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(UnitOutcome::Skipped)
    }

    pub fn failed_count(&self) -> usize {
        self.reports.len() - self.succeeded_count() - self.skipped_count()
    }

    fn count(&self, outcome: UnitOutcome) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }

    /// CI exit code: 0 iff every unit succeeded, 1 when nothing did,
    /// 2 for a mixed result
    pub fn exit_code(&self) -> i32 {
        if self.reports.is_empty() || self.succeeded_count() == self.reports.len() {
            0
        } else if self.succeeded_count() == 0 {
            1
        } else {
            2
        }
    }

    /// Tabular (unit, status) summary for CI consumption
    pub fn render_table(&self) -> String {
        let width = self
            .reports
            .iter()
            .map(|r| r.unit.len())
            .chain(std::iter::once("unit".len()))
            .max()
            .unwrap_or(4);

        let mut out = String::new();
        out.push_str(&format!("{:<width$}  status\n", "unit", width = width));
        for report in &self.reports {
            out.push_str(&format!(
                "{:<width$}  {}\n",
                report.unit,
                report.outcome.as_str(),
                width = width
            ));
        }
        out.push_str(&format!(
            "\n✅ {} succeeded, ❌ {} failed, ⏭️  {} skipped",
            self.succeeded_count(),
            self.failed_count(),
            self.skipped_count()
        ));
        out
    }
}

/// Runs the per-unit pipelines with bounded concurrency
pub struct BatchOrchestrator {
    dispatcher: Arc<BuildDispatcher>,
    runner: Arc<TestRunner>,
    coordinator: Arc<PublishCoordinator>,
}

enum Slot {
    Ready(UnitReport),
    Running(JoinHandle<UnitReport>),
}

impl BatchOrchestrator {
    pub fn new(
        dispatcher: BuildDispatcher,
        runner: TestRunner,
        coordinator: PublishCoordinator,
    ) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            runner: Arc::new(runner),
            coordinator: Arc::new(coordinator),
        }
    }

    /// Run the batch over the given units and print the summary table
    pub async fn run(&self, units: &[RecipeUnit], options: &BatchOptions) -> BatchSummary {
        println!(
            "📦 Batch over {} unit(s), {} worker(s), continue-on-error: {}\n",
            units.len(),
            options.max_workers.max(1),
            if options.continue_on_error { "yes" } else { "no" }
        );

        let semaphore = Arc::new(Semaphore::new(options.max_workers.max(1)));
        let failure_seen = Arc::new(AtomicBool::new(false));
        let mut slots: Vec<(String, Slot)> = Vec::with_capacity(units.len());

        for unit in units {
            // Waiting for a worker slot here bounds dispatch, and means the
            // failure flag below reflects units that actually finished.
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore closed");

            if failure_seen.load(Ordering::SeqCst) && !options.continue_on_error {
                drop(permit);
                println!("⏭️  {}: skipped after earlier failure", unit.name);
                slots.push((
                    unit.name.clone(),
                    Slot::Ready(UnitReport::bare(unit.name.clone(), UnitOutcome::Skipped)),
                ));
                continue;
            }

            let dispatcher = Arc::clone(&self.dispatcher);
            let runner = Arc::clone(&self.runner);
            let coordinator = Arc::clone(&self.coordinator);
            let failure = Arc::clone(&failure_seen);
            let unit_clone = unit.clone();
            let unit_options = options.clone();

            let handle = tokio::spawn(async move {
                let report =
                    run_unit(dispatcher, runner, coordinator, unit_clone, unit_options).await;
                if report.outcome != UnitOutcome::Succeeded {
                    failure.store(true, Ordering::SeqCst);
                }
                drop(permit);
                report
            });
            slots.push((unit.name.clone(), Slot::Running(handle)));
        }

        let mut summary = BatchSummary::default();
        for (name, slot) in slots {
            let report = match slot {
                Slot::Ready(report) => report,
                Slot::Running(handle) => match handle.await {
                    Ok(report) => report,
                    Err(e) => {
                        let mut report = UnitReport::bare(name, UnitOutcome::BuildFailed);
                        report.detail = Some(format!("ワーカータスクが異常終了しました: {}", e));
                        report
                    }
                },
            };
            summary.reports.push(report);
        }

        println!("\n{}", summary.render_table());
        summary
    }
}

async fn run_unit(
    dispatcher: Arc<BuildDispatcher>,
    runner: Arc<TestRunner>,
    coordinator: Arc<PublishCoordinator>,
    unit: RecipeUnit,
    options: BatchOptions,
) -> UnitReport {
    let name = unit.name.clone();
    println!("🔨 {}: building {} platform(s)", name, unit.platforms.len());

    let mut jobs = Vec::new();
    for platform in &unit.platforms {
        jobs.push(dispatcher.build(&unit, *platform, &options.build).await);
    }

    if jobs.iter().any(|job| !job.succeeded()) {
        let detail = jobs
            .iter()
            .filter(|job| !job.succeeded())
            .map(|job| format!("[{}] {}", job.platform, job.log_excerpt))
            .collect::<Vec<_>>()
            .join("\n");
        println!("❌ {}: build failed", name);
        return UnitReport {
            unit: name,
            outcome: UnitOutcome::BuildFailed,
            jobs,
            records: Vec::new(),
            detail: Some(detail),
        };
    }

    let mut artifacts = Vec::new();
    for job in &jobs {
        for path in &job.artifact_paths {
            match dispatcher.store().register(path, job.platform) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    return UnitReport {
                        unit: name,
                        outcome: UnitOutcome::TestFailed,
                        jobs,
                        records: Vec::new(),
                        detail: Some(e.to_string()),
                    };
                }
            }
        }
    }

    for artifact in &artifacts {
        if let Validation::Fail(reason) = runner.validate(artifact, &unit.test_commands).await {
            println!("❌ {}: validation failed", name);
            return UnitReport {
                unit: name,
                outcome: UnitOutcome::TestFailed,
                jobs,
                records: Vec::new(),
                detail: Some(format!("{}: {}", artifact.file_name(), reason)),
            };
        }
    }

    if let Some(target) = &options.publish {
        println!("📤 {}: publishing {} artifact(s)", name, artifacts.len());
        return match coordinator.publish_all(target, &artifacts).await {
            Ok(publish_summary) => {
                let outcome = if publish_summary.is_failure() {
                    UnitOutcome::PublishFailed
                } else {
                    UnitOutcome::Succeeded
                };
                UnitReport {
                    unit: name,
                    outcome,
                    jobs,
                    records: publish_summary.records,
                    detail: None,
                }
            }
            Err(e) => UnitReport {
                unit: name,
                outcome: UnitOutcome::PublishFailed,
                jobs,
                records: Vec::new(),
                detail: Some(e.to_string()),
            },
        };
    }

    println!("✅ {}: succeeded", name);
    UnitReport {
        unit: name,
        outcome: UnitOutcome::Succeeded,
        jobs,
        records: Vec::new(),
        detail: None,
    }
}
