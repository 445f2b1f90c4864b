//! Error handling for the release lifecycle orchestrator
//!
//! This module provides the error taxonomy shared by every component,
//! using the thiserror crate for ergonomic error handling. Components
//! return these at their boundaries; batch and retraction summaries
//! aggregate them instead of letting them unwind.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for build, publish and retraction operations
#[derive(Error, Debug)]
pub enum ForgeError {
    // Configuration errors (bad flags, unresolvable selectors)
    #[error("設定が不正です: {message}")]
    Configuration { message: String },

    #[error("バージョンセレクタ '{selector}' を解釈できません: {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("対象プラットフォーム '{value}' は未対応です")]
    UnknownPlatform { value: String },

    #[error("レシピ '{name}' が見つかりません（確認したパス: {}）", .path.display())]
    RecipeNotFound { name: String, path: PathBuf },

    // Credential errors
    #[error("[{backend}] 認証トークンの形式が不正です（期待される接頭辞: {expected_prefix}）")]
    MalformedToken {
        backend: String,
        expected_prefix: String,
    },

    #[error("[{backend}] 認証ファイルを読み込めません: {}: {message}", .path.display())]
    AuthFileUnreadable {
        backend: String,
        path: PathBuf,
        message: String,
    },

    #[error("[{backend}] 使用可能な認証情報が見つかりません（確認した場所: {}）", .checked.join(", "))]
    NoCredentialFound {
        backend: String,
        checked: Vec<String>,
    },

    // Per-job build failures
    #[error("[{package}:{platform}] ビルドに失敗しました: {message}")]
    BuildFailure {
        package: String,
        platform: String,
        message: String,
    },

    // Artifact validation failures
    #[error("[{artifact}] アーティファクトの検証に失敗しました: {reason}")]
    ValidationFailure { artifact: String, reason: String },

    // Remote channel errors
    #[error("[{channel}] リモートに存在しません: {subject}")]
    RemoteNotFound { channel: String, subject: String },

    #[error("[{channel}] アクセスが拒否されました: {subject}")]
    RemoteForbidden { channel: String, subject: String },

    #[error("[{channel}] リモートAPIがエラーを返しました（HTTP {status}）: {message}")]
    RemoteApi {
        channel: String,
        status: u16,
        message: String,
    },

    #[error("[{channel}] 一時的な通信エラーが発生しました: {message}")]
    Transient { channel: String, message: String },

    // Upstream version lookup errors
    #[error("[{package}] 上流バージョンを取得できません: {message}")]
    UpstreamLookup { package: String, message: String },

    #[error("入出力エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    /// Check if this error is a transient remote failure worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Check if this error must abort before any side effect occurs
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::InvalidSelector { .. }
                | Self::UnknownPlatform { .. }
                | Self::MalformedToken { .. }
                | Self::AuthFileUnreadable { .. }
                | Self::NoCredentialFound { .. }
        )
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION",
            Self::InvalidSelector { .. } => "INVALID_SELECTOR",
            Self::UnknownPlatform { .. } => "UNKNOWN_PLATFORM",
            Self::RecipeNotFound { .. } => "RECIPE_NOT_FOUND",
            Self::MalformedToken { .. } => "MALFORMED_TOKEN",
            Self::AuthFileUnreadable { .. } => "AUTH_FILE_UNREADABLE",
            Self::NoCredentialFound { .. } => "NO_CREDENTIAL_FOUND",
            Self::BuildFailure { .. } => "BUILD_FAILURE",
            Self::ValidationFailure { .. } => "VALIDATION_FAILURE",
            Self::RemoteNotFound { .. } => "REMOTE_NOT_FOUND",
            Self::RemoteForbidden { .. } => "REMOTE_FORBIDDEN",
            Self::RemoteApi { .. } => "REMOTE_API",
            Self::Transient { .. } => "TRANSIENT",
            Self::UpstreamLookup { .. } => "UPSTREAM_LOOKUP",
            Self::Io(..) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_credential_found_lists_every_location() {
        let error = ForgeError::NoCredentialFound {
            backend: "prefix".to_string(),
            checked: vec![
                "PREFIX_API_TOKEN (未設定)".to_string(),
                "/home/op/.recipe-forge/credentials.json".to_string(),
            ],
        };

        let display = error.to_string();
        assert!(display.contains("PREFIX_API_TOKEN"));
        assert!(display.contains("/home/op/.recipe-forge/credentials.json"));
        assert_eq!(error.code(), "NO_CREDENTIAL_FOUND");
        assert!(error.is_fatal());
    }

    #[test]
    fn test_malformed_token_is_fatal() {
        let error = ForgeError::MalformedToken {
            backend: "prefix".to_string(),
            expected_prefix: "pfx_".to_string(),
        };

        assert!(error.is_fatal());
        assert!(!error.is_transient());
        assert!(error.to_string().contains("pfx_"));
    }

    #[test]
    fn test_transient_is_retryable() {
        let error = ForgeError::Transient {
            channel: "test".to_string(),
            message: "connection reset".to_string(),
        };

        assert!(error.is_transient());
        assert!(!error.is_fatal());
        assert_eq!(error.code(), "TRANSIENT");
    }

    #[test]
    fn test_remote_forbidden_is_not_retryable() {
        let error = ForgeError::RemoteForbidden {
            channel: "test".to_string(),
            subject: "mypackage-1.0.0".to_string(),
        };

        assert!(!error.is_transient());
        assert_eq!(error.code(), "REMOTE_FORBIDDEN");
    }

    #[test]
    fn test_build_failure_is_isolated_not_fatal() {
        let error = ForgeError::BuildFailure {
            package: "mypackage".to_string(),
            platform: "linux-64".to_string(),
            message: "exit code 1".to_string(),
        };

        assert!(!error.is_fatal());
        let display = error.to_string();
        assert!(display.contains("mypackage"));
        assert!(display.contains("linux-64"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: ForgeError = io.into();
        assert_eq!(error.code(), "IO");
    }
}
