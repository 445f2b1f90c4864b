//! Recipe index: the filesystem view of buildable packages
//!
//! Recipes live one directory per package under the recipes directory, each
//! with a `recipe.yaml`. The index scans that tree into immutable
//! `RecipeUnit`s; everything downstream works from those, never from raw
//! YAML.

use crate::core::error::ForgeError;
use crate::core::types::Platform;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

/// One buildable package, created by scanning the recipe tree. Immutable for
/// the duration of a batch run.
#[derive(Debug, Clone)]
pub struct RecipeUnit {
    /// Unique package name, matches the recipe directory
    pub name: String,
    /// Resolved version, absent when the recipe does not declare one
    pub version: Option<String>,
    /// Target platforms declared by the recipe
    pub platforms: Vec<Platform>,
    /// Path to the recipe.yaml
    pub recipe_path: PathBuf,
    /// Functional test commands declared by the recipe
    pub test_commands: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RecipeFile {
    #[serde(default)]
    context: Option<RecipeContext>,
    package: RecipePackage,
    #[serde(default)]
    extra: Option<RecipeExtra>,
    #[serde(default)]
    tests: Vec<RecipeTest>,
}

#[derive(Debug, Deserialize)]
struct RecipeContext {
    #[serde(default)]
    version: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RecipePackage {
    name: String,
    #[serde(default)]
    version: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RecipeExtra {
    #[serde(default)]
    platforms: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RecipeTest {
    #[serde(default)]
    script: Vec<String>,
}

/// Scanner over the recipe directory tree
pub struct RecipeIndex {
    recipes_dir: PathBuf,
}

impl RecipeIndex {
    pub fn new<P: Into<PathBuf>>(recipes_dir: P) -> Self {
        Self {
            recipes_dir: recipes_dir.into(),
        }
    }

    pub fn recipes_dir(&self) -> &Path {
        &self.recipes_dir
    }

    /// Discover every recipe under the recipes directory. Recipes that fail
    /// to parse are skipped and reported in the second return value so a
    /// broken recipe never hides the rest of the batch.
    pub fn discover(&self) -> Result<(Vec<RecipeUnit>, Vec<String>), ForgeError> {
        if !self.recipes_dir.exists() {
            return Err(ForgeError::Configuration {
                message: format!(
                    "レシピディレクトリが存在しません: {}",
                    self.recipes_dir.display()
                ),
            });
        }

        let mut units = Vec::new();
        let mut skipped = Vec::new();

        for entry in WalkDir::new(&self.recipes_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && entry.file_name() == "recipe.yaml" {
                match load_unit(entry.path()) {
                    Ok(unit) => units.push(unit),
                    Err(e) => skipped.push(format!("{}: {}", entry.path().display(), e)),
                }
            }
        }

        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok((units, skipped))
    }

    /// Load specific packages by name. A missing package is a hard error,
    /// reported with the path that was expected.
    pub fn find(&self, names: &[String]) -> Result<Vec<RecipeUnit>, ForgeError> {
        let mut units = Vec::new();
        for name in names {
            let path = self.recipes_dir.join(name).join("recipe.yaml");
            if !path.exists() {
                return Err(ForgeError::RecipeNotFound {
                    name: name.clone(),
                    path,
                });
            }
            units.push(load_unit(&path)?);
        }
        Ok(units)
    }
}

fn load_unit(path: &Path) -> Result<RecipeUnit, ForgeError> {
    let content = std::fs::read_to_string(path)?;
    let recipe: RecipeFile =
        serde_yaml::from_str(&content).map_err(|e| ForgeError::Configuration {
            message: format!("{} の形式が不正です: {}", path.display(), e),
        })?;

    let version = resolve_version(&recipe);

    let platforms = match recipe.extra.as_ref().and_then(|e| e.platforms.as_ref()) {
        Some(raw) => raw
            .iter()
            .map(|p| Platform::from_str(p))
            .collect::<Result<Vec<_>, _>>()?,
        None => vec![Platform::Linux64],
    };

    let test_commands = recipe
        .tests
        .iter()
        .flat_map(|t| t.script.iter().cloned())
        .collect();

    Ok(RecipeUnit {
        name: recipe.package.name,
        version,
        platforms,
        recipe_path: path.to_path_buf(),
        test_commands,
    })
}

/// Pick the recipe version: `context.version` first, then a literal
/// `package.version`. Templated package versions resolve through context.
fn resolve_version(recipe: &RecipeFile) -> Option<String> {
    if let Some(version) = recipe
        .context
        .as_ref()
        .and_then(|c| c.version.as_ref())
        .and_then(yaml_scalar)
    {
        return Some(version);
    }

    recipe
        .package
        .version
        .as_ref()
        .and_then(yaml_scalar)
        .filter(|v| !v.contains("${{"))
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
