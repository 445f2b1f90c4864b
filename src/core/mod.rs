pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::{BuilderConfig, CredentialSettings, ForgeConfig, AUTH_FILE_ENV_VAR, TOKEN_ENV_VAR};
pub use error::ForgeError;
pub use retry::{RetryManager, RetryOptions};
pub use types::{compare_versions, BackendKind, Platform, VersionSelector};
