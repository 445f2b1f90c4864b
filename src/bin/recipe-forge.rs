//! recipe-forge CLI
//!
//! Release lifecycle orchestrator for a directory of package recipes:
//! build, validate, publish and retract.

use anyhow::Result;
use clap::{Parser, Subcommand};
use recipe_forge::auth::CredentialResolver;
use recipe_forge::backend::{create_backend, DEFAULT_REQUEST_TIMEOUT};
use recipe_forge::build::{BuildDispatcher, BuildOptions, TestRunner, Validation};
use recipe_forge::core::{
    BackendKind, ForgeConfig, ForgeError, Platform, RetryManager, RetryOptions, VersionSelector,
};
use recipe_forge::orchestration::{
    BatchOptions, BatchOrchestrator, PublishCoordinator, PublishTarget, RetractionEngine,
    RetractionRequest, StdinGate,
};
use recipe_forge::store::{ArtifactStore, RecipeIndex, RecipeUnit};
use recipe_forge::update::{UpdateStats, UpstreamClient, VersionUpdater};
use std::path::PathBuf;
use std::process;
use std::str::FromStr;

/// Package release lifecycle orchestrator
#[derive(Parser)]
#[command(name = "recipe-forge")]
#[command(version = "0.1.0")]
#[command(about = "Build, validate, publish and retract recipe packages", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./forge.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build recipes into local artifacts
    Build {
        /// Package names (defaults to none; use --all for every recipe)
        packages: Vec<String>,

        /// Build every discovered recipe
        #[arg(long)]
        all: bool,

        /// Recipe directory override
        #[arg(long)]
        recipes_dir: Option<PathBuf>,

        /// Artifact output directory override
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Restrict builds to these platforms
        #[arg(long = "target-platform")]
        target_platform: Vec<String>,

        /// Rebuild even when a matching artifact exists
        #[arg(long)]
        force: bool,

        /// Skip the builder when a matching artifact exists
        #[arg(long)]
        skip_existing: bool,

        /// Keep going after a unit fails
        #[arg(long)]
        continue_on_error: bool,

        /// Maximum concurrently dispatched units
        #[arg(long, default_value = "2")]
        max_workers: usize,
    },

    /// Validate built artifacts
    Test {
        /// Package names (use --all for every recipe)
        packages: Vec<String>,

        #[arg(long)]
        all: bool,

        #[arg(long)]
        recipes_dir: Option<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Publish built artifacts to a channel
    Publish {
        /// Package names (use --all for every recipe)
        packages: Vec<String>,

        #[arg(long)]
        all: bool,

        #[arg(long)]
        recipes_dir: Option<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Destination channel
        #[arg(long)]
        channel: Option<String>,

        /// Backend kind (prefix | s3)
        #[arg(long, default_value = "prefix")]
        method: String,

        /// Backend URL override
        #[arg(long)]
        url: Option<String>,

        /// List what would be published without pushing
        #[arg(long)]
        dry_run: bool,
    },

    /// Build, test and publish in one pass
    Batch {
        /// Package names (use --all for every recipe)
        packages: Vec<String>,

        #[arg(long)]
        all: bool,

        #[arg(long)]
        recipes_dir: Option<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long = "target-platform")]
        target_platform: Vec<String>,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        skip_existing: bool,

        #[arg(long)]
        continue_on_error: bool,

        #[arg(long, default_value = "2")]
        max_workers: usize,

        /// Destination channel (omit to build and test only)
        #[arg(long)]
        channel: Option<String>,

        #[arg(long, default_value = "prefix")]
        method: String,

        #[arg(long)]
        url: Option<String>,
    },

    /// Delete published versions from a channel
    Retract {
        /// Package name
        package: String,

        /// Channel to retract from
        #[arg(long)]
        channel: Option<String>,

        /// Version selector: single, comma-list, or inclusive range a..b
        #[arg(long)]
        versions: String,

        /// Backend kind (prefix | s3)
        #[arg(long, default_value = "prefix")]
        method: String,

        /// Backend URL override
        #[arg(long)]
        url: Option<String>,

        /// Restrict to one platform
        #[arg(long = "target-platform")]
        target_platform: Option<String>,

        /// Preview the plan without issuing any delete
        #[arg(long)]
        dry_run: bool,

        /// Skip the interactive confirmation
        #[arg(long)]
        force: bool,

        #[arg(short, long)]
        verbose: bool,
    },

    /// List every recipe in the recipe directory
    ListRecipes {
        #[arg(long)]
        recipes_dir: Option<PathBuf>,
    },

    /// Check recipes for newer upstream versions
    CheckUpdates {
        /// Package names (use --all for every recipe)
        packages: Vec<String>,

        #[arg(long)]
        all: bool,

        #[arg(long)]
        recipes_dir: Option<PathBuf>,

        /// Rewrite recipes to the newest upstream version
        #[arg(long)]
        update: bool,

        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\n❌ {}", e);
            process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = ForgeConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Build {
            packages,
            all,
            recipes_dir,
            output_dir,
            target_platform,
            force,
            skip_existing,
            continue_on_error,
            max_workers,
        } => {
            let config = override_dirs(config, recipes_dir, output_dir);
            let units = select_units(&config, &packages, all, &target_platform)?;
            let options = BatchOptions {
                continue_on_error,
                max_workers,
                build: BuildOptions {
                    force,
                    skip_existing,
                },
                publish: None,
            };
            let summary = orchestrator(&config).run(&units, &options).await;
            Ok(summary.exit_code())
        }

        Commands::Test {
            packages,
            all,
            recipes_dir,
            output_dir,
        } => {
            let config = override_dirs(config, recipes_dir, output_dir);
            let units = select_units(&config, &packages, all, &[])?;
            test_command(&config, &units).await
        }

        Commands::Publish {
            packages,
            all,
            recipes_dir,
            output_dir,
            channel,
            method,
            url,
            dry_run,
        } => {
            let config = override_dirs(config, recipes_dir, output_dir);
            let units = select_units(&config, &packages, all, &[])?;
            let target = publish_target(&config, channel, &method, url)?;
            publish_command(&config, &units, &target, dry_run).await
        }

        Commands::Batch {
            packages,
            all,
            recipes_dir,
            output_dir,
            target_platform,
            force,
            skip_existing,
            continue_on_error,
            max_workers,
            channel,
            method,
            url,
        } => {
            let config = override_dirs(config, recipes_dir, output_dir);
            let units = select_units(&config, &packages, all, &target_platform)?;
            let publish = match channel.or_else(|| config.default_channel.clone()) {
                Some(channel) => Some(PublishTarget {
                    kind: BackendKind::from_str(&method)?,
                    channel,
                    url,
                }),
                None => None,
            };
            let options = BatchOptions {
                continue_on_error,
                max_workers,
                build: BuildOptions {
                    force,
                    skip_existing,
                },
                publish,
            };
            let summary = orchestrator(&config).run(&units, &options).await;
            Ok(summary.exit_code())
        }

        Commands::Retract {
            package,
            channel,
            versions,
            method,
            url,
            target_platform,
            dry_run,
            force,
            verbose,
        } => {
            retract_command(
                &config,
                package,
                channel,
                versions,
                method,
                url,
                target_platform,
                dry_run,
                force,
                verbose,
            )
            .await
        }

        Commands::ListRecipes { recipes_dir } => {
            let config = override_dirs(config, recipes_dir, None);
            list_recipes_command(&config)
        }

        Commands::CheckUpdates {
            packages,
            all,
            recipes_dir,
            update,
            dry_run,
        } => {
            let config = override_dirs(config, recipes_dir, None);
            let units = select_units(&config, &packages, all, &[])?;
            check_updates_command(&units, update && !dry_run).await
        }
    }
}

fn override_dirs(
    mut config: ForgeConfig,
    recipes_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> ForgeConfig {
    if let Some(dir) = recipes_dir {
        config.recipes_dir = dir;
    }
    if let Some(dir) = output_dir {
        config.output_dir = dir;
    }
    config
}

/// Resolve the unit set from CLI selection, applying a platform override
fn select_units(
    config: &ForgeConfig,
    packages: &[String],
    all: bool,
    target_platforms: &[String],
) -> Result<Vec<RecipeUnit>, ForgeError> {
    let index = RecipeIndex::new(&config.recipes_dir);

    let mut units = if !packages.is_empty() {
        index.find(packages)?
    } else if all {
        let (units, skipped) = index.discover()?;
        for warning in &skipped {
            eprintln!("⚠️  skipping unreadable recipe: {}", warning);
        }
        units
    } else {
        return Err(ForgeError::Configuration {
            message: "パッケージ名または --all を指定してください".to_string(),
        });
    };

    if units.is_empty() {
        return Err(ForgeError::Configuration {
            message: format!(
                "{} にレシピが見つかりません",
                config.recipes_dir.display()
            ),
        });
    }

    if !target_platforms.is_empty() {
        let platforms = target_platforms
            .iter()
            .map(|p| Platform::from_str(p))
            .collect::<Result<Vec<_>, _>>()?;
        for unit in &mut units {
            unit.platforms = platforms.clone();
        }
    }

    Ok(units)
}

fn orchestrator(config: &ForgeConfig) -> BatchOrchestrator {
    let store = ArtifactStore::new(&config.output_dir);
    let dispatcher = BuildDispatcher::new(config.builder.clone(), store);
    let coordinator = PublishCoordinator::new(
        CredentialResolver::new(config.credentials.clone()),
        RetryManager::new(RetryOptions::default()),
    );
    BatchOrchestrator::new(dispatcher, TestRunner::new(), coordinator)
}

fn publish_target(
    config: &ForgeConfig,
    channel: Option<String>,
    method: &str,
    url: Option<String>,
) -> Result<PublishTarget, ForgeError> {
    let channel = channel
        .or_else(|| config.default_channel.clone())
        .ok_or_else(|| ForgeError::Configuration {
            message: "--channel または設定の default_channel が必要です".to_string(),
        })?;

    Ok(PublishTarget {
        kind: BackendKind::from_str(method)?,
        channel,
        url,
    })
}

async fn test_command(config: &ForgeConfig, units: &[RecipeUnit]) -> Result<i32> {
    let store = ArtifactStore::new(&config.output_dir);
    let runner = TestRunner::new();
    let mut failures = 0usize;
    let mut total = 0usize;

    for unit in units {
        for platform in &unit.platforms {
            let artifacts = store.find(&unit.name, unit.version.as_deref(), *platform)?;
            if artifacts.is_empty() {
                println!("⚠️  {} [{}]: no artifacts to validate", unit.name, platform);
                continue;
            }
            for artifact in artifacts {
                total += 1;
                match runner.validate(&artifact, &unit.test_commands).await {
                    Validation::Pass => println!("✅ {}: valid", artifact.file_name()),
                    Validation::Fail(reason) => {
                        failures += 1;
                        println!("❌ {}: {}", artifact.file_name(), reason);
                    }
                }
            }
        }
    }

    println!("\n{} validated, {} failed", total, failures);
    if failures == 0 {
        Ok(0)
    } else if failures == total {
        Ok(1)
    } else {
        Ok(2)
    }
}

async fn publish_command(
    config: &ForgeConfig,
    units: &[RecipeUnit],
    target: &PublishTarget,
    dry_run: bool,
) -> Result<i32> {
    let store = ArtifactStore::new(&config.output_dir);

    let mut artifacts = Vec::new();
    for unit in units {
        for platform in &unit.platforms {
            artifacts.extend(store.find(&unit.name, unit.version.as_deref(), *platform)?);
        }
    }

    if artifacts.is_empty() {
        return Err(ForgeError::Configuration {
            message: "公開対象のアーティファクトがありません".to_string(),
        }
        .into());
    }

    println!(
        "📤 Publishing {} artifact(s) to '{}' ({} backend)\n",
        artifacts.len(),
        target.channel,
        target.kind
    );

    if dry_run {
        for artifact in &artifacts {
            println!("  🧪 would publish {}", artifact.file_name());
        }
        println!("\n🧪 dry-run: nothing was pushed");
        return Ok(0);
    }

    let coordinator = PublishCoordinator::new(
        CredentialResolver::new(config.credentials.clone()),
        RetryManager::new(RetryOptions::default()),
    );
    let summary = coordinator.publish_all(target, &artifacts).await?;

    println!(
        "\n✅ {} published, ⏭️  {} already existed, ❌ {} failed",
        summary.published_count(),
        summary.already_exists_count(),
        summary.failed_count()
    );
    Ok(summary.exit_code())
}

#[allow(clippy::too_many_arguments)]
async fn retract_command(
    config: &ForgeConfig,
    package: String,
    channel: Option<String>,
    versions: String,
    method: String,
    url: Option<String>,
    target_platform: Option<String>,
    dry_run: bool,
    force: bool,
    verbose: bool,
) -> Result<i32> {
    let channel = channel
        .or_else(|| config.default_channel.clone())
        .ok_or_else(|| ForgeError::Configuration {
            message: "--channel または設定の default_channel が必要です".to_string(),
        })?;
    let kind = BackendKind::from_str(&method)?;
    let selector = VersionSelector::parse(&versions)?;
    let platform = target_platform
        .map(|p| Platform::from_str(&p))
        .transpose()?;

    let request = RetractionRequest {
        package,
        channel: channel.clone(),
        selector,
        platform,
        dry_run,
        force,
        verbose,
    };

    // Fresh credential, valid for this invocation only
    let resolver = CredentialResolver::new(config.credentials.clone());
    let credential = resolver.resolve(kind)?;
    if verbose {
        println!("🔑 credential: {} via {}", credential.masked(), credential.source);
    }
    let backend = create_backend(kind, url.as_deref(), credential, DEFAULT_REQUEST_TIMEOUT)?;

    let mut engine = RetractionEngine::new();
    let report = engine.run(&request, backend.as_ref(), &StdinGate).await?;

    if verbose {
        println!("\nstate history:\n{}", engine.history());
    }

    println!(
        "\n{}: {} deleted, {} failed",
        report.state.as_str(),
        report.deleted_count(),
        report.failed_count()
    );
    Ok(report.exit_code())
}

fn list_recipes_command(config: &ForgeConfig) -> Result<i32> {
    let index = RecipeIndex::new(&config.recipes_dir);
    let (units, skipped) = index.discover()?;

    println!("📦 {} recipe(s) in {}:\n", units.len(), config.recipes_dir.display());
    for unit in &units {
        let version = unit.version.as_deref().unwrap_or("-");
        let platforms = unit
            .platforms
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {:<24} {:<12} [{}]", unit.name, version, platforms);
    }
    for warning in &skipped {
        eprintln!("⚠️  unreadable recipe: {}", warning);
    }

    Ok(if skipped.is_empty() { 0 } else { 1 })
}

async fn check_updates_command(units: &[RecipeUnit], apply: bool) -> Result<i32> {
    // GitHub rate limits are generous with a token; read it once here
    let github_token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
    let client = UpstreamClient::new(github_token)?;
    let updater = VersionUpdater::new(client);
    let mut stats = UpdateStats::default();

    for unit in units {
        updater.process(&unit.recipe_path, apply, &mut stats).await;
    }

    println!("\n{}", stats.render_summary());
    Ok(if stats.has_errors() { 1 } else { 0 })
}
