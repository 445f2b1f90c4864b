//! Configuration structures for recipe-forge
//!
//! Everything the orchestrator needs from the outside world (directories,
//! builder command, channel defaults, credential sources) lives in one
//! explicit struct loaded at startup and passed down. Components never read
//! the process environment ad hoc.

use crate::core::error::ForgeError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable carrying an explicit channel API token
pub const TOKEN_ENV_VAR: &str = "PREFIX_API_TOKEN";

/// Environment variable carrying an explicit auth-file path
pub const AUTH_FILE_ENV_VAR: &str = "RECIPE_FORGE_AUTH_FILE";

/// Root configuration object, read from `forge.yaml` when present
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForgeConfig {
    /// Directory containing one recipe directory per package
    #[serde(default = "default_recipes_dir")]
    pub recipes_dir: PathBuf,

    /// Directory the builder writes artifacts into
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// External builder invocation settings
    #[serde(default)]
    pub builder: BuilderConfig,

    /// Default publish/retract channel (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_channel: Option<String>,

    /// Credential sources, resolved in a fixed priority order
    #[serde(default)]
    pub credentials: CredentialSettings,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            recipes_dir: default_recipes_dir(),
            output_dir: default_output_dir(),
            builder: BuilderConfig::default(),
            default_channel: None,
            credentials: CredentialSettings::default(),
        }
    }
}

fn default_recipes_dir() -> PathBuf {
    PathBuf::from("./pkgs")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

/// External builder invocation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuilderConfig {
    /// Builder command name or path (must produce artifacts under
    /// `<output-dir>/<platform>/`)
    pub command: String,

    /// Per-job timeout in seconds
    pub timeout_secs: u64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            command: "rattler-build".to_string(),
            timeout_secs: 3600,
        }
    }
}

/// Credential sources in resolution priority order: explicit token, explicit
/// auth-file path, then default well-known locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CredentialSettings {
    /// Explicit in-process token value (highest priority)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Explicit auth-file path; missing file is a hard error when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_file: Option<PathBuf>,

    /// Ordered default locations; first existing, parseable file wins
    #[serde(default)]
    pub default_locations: Vec<PathBuf>,

    /// Explicit S3 key pair (object-store backend only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_secret_key: Option<String>,
}

impl CredentialSettings {
    /// Capture credential sources from the process environment. This is the
    /// single place environment variables are read.
    pub fn from_env() -> Self {
        let mut settings = Self {
            token: env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()),
            auth_file: env::var(AUTH_FILE_ENV_VAR).ok().map(PathBuf::from),
            default_locations: Vec::new(),
            s3_access_key: env::var("AWS_ACCESS_KEY_ID").ok().filter(|k| !k.is_empty()),
            s3_secret_key: env::var("AWS_SECRET_ACCESS_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
        };
        settings.default_locations = default_credential_locations();
        settings
    }
}

/// Well-known credential file locations, checked in order
pub fn default_credential_locations() -> Vec<PathBuf> {
    let home = env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    vec![
        home.join(".recipe-forge").join("credentials.json"),
        home.join(".config")
            .join("recipe-forge")
            .join("credentials.json"),
    ]
}

impl ForgeConfig {
    /// Load configuration from a YAML file, or fall back to defaults when no
    /// file exists. Credential environment variables overlay the file values
    /// (explicit environment wins).
    pub fn load(path: Option<&Path>) -> Result<Self, ForgeError> {
        let mut config = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|e| ForgeError::Configuration {
                        message: format!("{} を読み込めません: {}", path.display(), e),
                    })?;
                serde_yaml::from_str(&content).map_err(|e| ForgeError::Configuration {
                    message: format!("{} の形式が不正です: {}", path.display(), e),
                })?
            }
            None => {
                let default_path = Path::new("forge.yaml");
                if default_path.exists() {
                    return Self::load(Some(default_path));
                }
                Self::default()
            }
        };

        let env_settings = CredentialSettings::from_env();
        if env_settings.token.is_some() {
            config.credentials.token = env_settings.token;
        }
        if env_settings.auth_file.is_some() {
            config.credentials.auth_file = env_settings.auth_file;
        }
        if env_settings.s3_access_key.is_some() {
            config.credentials.s3_access_key = env_settings.s3_access_key;
        }
        if env_settings.s3_secret_key.is_some() {
            config.credentials.s3_secret_key = env_settings.s3_secret_key;
        }
        if config.credentials.default_locations.is_empty() {
            config.credentials.default_locations = default_credential_locations();
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ForgeConfig::default();
        assert_eq!(config.recipes_dir, PathBuf::from("./pkgs"));
        assert_eq!(config.builder.command, "rattler-build");
        assert!(config.default_channel.is_none());
    }

    #[test]
    fn test_deserialize_minimal_config() {
        let yaml = r#"
recipes_dir: ./recipes
default_channel: meso-forge
"#;
        let config: ForgeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.recipes_dir, PathBuf::from("./recipes"));
        assert_eq!(config.default_channel, Some("meso-forge".to_string()));
        // Unspecified sections keep their defaults
        assert_eq!(config.builder.timeout_secs, 3600);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("forge.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "output_dir: /tmp/forge-output").unwrap();

        let config = ForgeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/forge-output"));
        assert!(!config.credentials.default_locations.is_empty());
    }

    #[test]
    fn test_load_rejects_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("forge.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "recipes_dir: [not: valid").unwrap();

        let result = ForgeConfig::load(Some(&path));
        assert!(matches!(result, Err(ForgeError::Configuration { .. })));
    }

    #[test]
    fn test_default_locations_are_ordered() {
        let locations = default_credential_locations();
        assert_eq!(locations.len(), 2);
        assert!(locations[0].ends_with(".recipe-forge/credentials.json"));
    }
}
