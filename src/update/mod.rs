//! Recipe version maintenance
//!
//! Checks each recipe's upstream source for newer releases and, on request,
//! rewrites the recipe's `version:` line and source `sha256` in place. Only
//! those two fields are ever touched; recipe structure and templating are
//! left alone.

pub mod upstream;

use crate::core::error::ForgeError;
use crate::core::types::compare_versions;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
pub use upstream::{
    clean_tag, compile_patterns, match_version, UpstreamClient, UpstreamSource,
    DEFAULT_VERSION_PATTERN,
};

/// Counters for one check-updates run
#[derive(Debug, Default)]
pub struct UpdateStats {
    pub total: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub upstream_newer: usize,
    pub unsupported: usize,
    pub errors: Vec<String>,
}

impl UpdateStats {
    pub fn add_error(&mut self, package: &str, message: &str) {
        self.errors.push(format!("{}: {}", package, message));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("📦 checked: {}\n", self.total));
        out.push_str(&format!("🆙 updated: {}\n", self.updated));
        out.push_str(&format!("✅ up to date: {}\n", self.up_to_date));
        out.push_str(&format!("📈 upstream newer: {}\n", self.upstream_newer));
        if self.unsupported > 0 {
            out.push_str(&format!("🚫 unsupported sources: {}\n", self.unsupported));
        }
        if !self.errors.is_empty() {
            out.push_str(&format!("❌ errors: {}\n", self.errors.len()));
            for error in &self.errors {
                out.push_str(&format!("   - {}\n", error));
            }
        }
        out
    }
}

#[derive(Debug, Deserialize)]
struct UpdateRecipe {
    #[serde(default)]
    context: Option<UpdateRecipeContext>,
    package: UpdateRecipePackage,
    #[serde(default)]
    source: Option<serde_yaml::Value>,
    #[serde(default)]
    extra: Option<UpdateRecipeExtra>,
}

#[derive(Debug, Deserialize)]
struct UpdateRecipeContext {
    #[serde(default)]
    version: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct UpdateRecipePackage {
    name: String,
}

#[derive(Debug, Deserialize)]
struct UpdateRecipeExtra {
    /// `extra.version.<mode>: [patterns]` as the recipes declare it
    #[serde(default)]
    version: Option<BTreeMap<String, Vec<String>>>,
}

/// Everything the updater needs from one recipe
#[derive(Debug)]
struct UpdateContext {
    name: String,
    current_version: String,
    url_template: Option<String>,
    sha256: Option<String>,
    source: Option<UpstreamSource>,
    patterns: Vec<Regex>,
}

/// Checks recipes against their upstream and rewrites versions on request
pub struct VersionUpdater {
    client: UpstreamClient,
}

impl VersionUpdater {
    pub fn new(client: UpstreamClient) -> Self {
        Self { client }
    }

    /// Check one recipe, applying the update when `apply` is set. Outcomes
    /// land in `stats`; a broken recipe never aborts the run.
    pub async fn process(&self, recipe_path: &Path, apply: bool, stats: &mut UpdateStats) {
        stats.total += 1;

        let content = match std::fs::read_to_string(recipe_path) {
            Ok(content) => content,
            Err(e) => {
                stats.add_error(&recipe_path.display().to_string(), &e.to_string());
                return;
            }
        };

        let context = match parse_update_context(&content) {
            Ok(context) => context,
            Err(message) => {
                stats.add_error(&recipe_path.display().to_string(), &message);
                return;
            }
        };

        let Some(source) = &context.source else {
            println!("🚫 {}: unsupported upstream source", context.name);
            stats.unsupported += 1;
            return;
        };

        let latest = match self
            .client
            .latest_version(&context.name, source, &context.patterns)
            .await
        {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                stats.add_error(&context.name, "一致する上流バージョンがありません");
                return;
            }
            Err(e) => {
                stats.add_error(&context.name, &e.to_string());
                return;
            }
        };

        if compare_versions(&context.current_version, &latest) != std::cmp::Ordering::Less {
            println!("✅ {}: {} is up to date", context.name, context.current_version);
            stats.up_to_date += 1;
            return;
        }

        stats.upstream_newer += 1;
        if !apply {
            println!(
                "📈 {}: {} → {} (use --update to apply)",
                context.name, context.current_version, latest
            );
            return;
        }

        match self.apply_update(recipe_path, &content, &context, &latest).await {
            Ok(()) => {
                println!("🆙 {}: updated to {}", context.name, latest);
                stats.updated += 1;
            }
            Err(e) => stats.add_error(&context.name, &e.to_string()),
        }
    }

    async fn apply_update(
        &self,
        recipe_path: &Path,
        content: &str,
        context: &UpdateContext,
        latest: &str,
    ) -> Result<(), ForgeError> {
        let mut updated = replace_version_string(content, latest);

        // New source hash only when the recipe pins one
        if let (Some(template), Some(old_hash)) = (&context.url_template, &context.sha256) {
            let new_url = template
                .replace("${{ version }}", latest)
                .replace("{{ version }}", latest);
            let new_hash = self.client.sha256_of_url(&context.name, &new_url).await?;
            updated = updated.replace(old_hash.as_str(), &new_hash);
        }

        std::fs::write(recipe_path, updated)?;
        Ok(())
    }
}

fn parse_update_context(content: &str) -> Result<UpdateContext, String> {
    let recipe: UpdateRecipe =
        serde_yaml::from_str(content).map_err(|e| format!("YAML解析エラー: {}", e))?;

    let current_version = recipe
        .context
        .as_ref()
        .and_then(|c| c.version.as_ref())
        .and_then(|v| match v {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| "context.version がありません".to_string())?;

    let url_template = recipe
        .source
        .as_ref()
        .and_then(|s| find_source_field(s, "url"));
    let sha256 = recipe
        .source
        .as_ref()
        .and_then(|s| find_source_field(s, "sha256"));

    // Recipes may pin the lookup mode and patterns via extra.version
    let mode_config = recipe
        .extra
        .as_ref()
        .and_then(|e| e.version.as_ref())
        .and_then(|modes| modes.iter().next().map(|(k, v)| (k.clone(), v.clone())));

    let detected = url_template.as_deref().and_then(UpstreamSource::detect);
    let (source, raw_patterns) = match mode_config {
        Some((mode, patterns)) => {
            let source = match (mode.as_str(), &detected) {
                ("github-tags", Some(UpstreamSource::GithubReleases { owner, repo })) => {
                    Some(UpstreamSource::GithubTags {
                        owner: owner.clone(),
                        repo: repo.clone(),
                    })
                }
                ("rubygems-api", Some(UpstreamSource::RubyGems { gem })) => {
                    Some(UpstreamSource::RubyGems { gem: gem.clone() })
                }
                ("rubygems-api", _) => Some(UpstreamSource::RubyGems {
                    gem: recipe.package.name.clone(),
                }),
                _ => detected.clone(),
            };
            (source, patterns)
        }
        None => (detected, Vec::new()),
    };

    let patterns = compile_patterns(&raw_patterns).map_err(|e| e.to_string())?;

    Ok(UpdateContext {
        name: recipe.package.name,
        current_version,
        url_template,
        sha256,
        source,
        patterns,
    })
}

/// Look up a scalar field inside the recipe's source section, which may be a
/// single mapping, a list of mappings, or a conditional `if`/`then` block.
fn find_source_field(value: &serde_yaml::Value, key: &str) -> Option<String> {
    match value {
        serde_yaml::Value::Mapping(_) => {
            if let Some(then) = value.get("then") {
                if let Some(found) = find_source_field(then, key) {
                    return Some(found);
                }
            }
            value
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        }
        serde_yaml::Value::Sequence(items) => {
            items.iter().find_map(|item| find_source_field(item, key))
        }
        _ => None,
    }
}

/// Rewrite the first `version:` line in place, preserving its indentation
pub fn replace_version_string(content: &str, new_version: &str) -> String {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    for line in lines.iter_mut() {
        if line.trim_start().starts_with("version:") {
            let indent_len = line.len() - line.trim_start().len();
            let indent = line[..indent_len].to_string();
            *line = format!("{}version: \"{}\"", indent, new_version);
            break;
        }
    }

    let mut out = lines.join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    out
}
