//! Error types and result aliases for sqlhelper

use std::path::PathBuf;

use thiserror::Error;

use crate::database::HookKind;

/// Main error type returned by [`OpenHelper`](crate::OpenHelper) and its collaborators
#[derive(Error, Debug)]
pub enum HelperError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Reentrant access: {0}")]
    Reentrancy(&'static str),

    #[error("Couldn't open database '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Can't upgrade read-only database from version {from} to {to}: {name}")]
    UpgradeOnReadOnly { name: String, from: u32, to: u32 },

    #[error("Can't downgrade database from version {from} to {to}")]
    DowngradeUnsupported { from: u32, to: u32 },

    #[error("{hook} hook failed: {source:#}")]
    Hook {
        hook: HookKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("Database handle is closed")]
    HandleClosed,

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
}

/// Result type used throughout sqlhelper
pub type HelperResult<T> = Result<T, HelperError>;

/// Coarse classification of [`HelperError`], stable for matching and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Reentrancy,
    OpenFailure,
    UpgradeOnReadOnly,
    DowngradeUnsupported,
    MigrationHook,
    HandleClosed,
    Storage,
}

impl HelperError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::Config(_) => ErrorKind::Configuration,
            Self::Reentrancy(_) => ErrorKind::Reentrancy,
            Self::Open { .. } => ErrorKind::OpenFailure,
            Self::UpgradeOnReadOnly { .. } => ErrorKind::UpgradeOnReadOnly,
            Self::DowngradeUnsupported { .. } => ErrorKind::DowngradeUnsupported,
            Self::Hook { .. } => ErrorKind::MigrationHook,
            Self::HandleClosed => ErrorKind::HandleClosed,
            Self::Sqlite(_) | Self::Io(_) => ErrorKind::Storage,
        }
    }

    /// Whether a later call may succeed without changing the configuration.
    ///
    /// Only open failures qualify (bad permissions, full disk). The helper
    /// itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::OpenFailure)
    }

    pub(crate) fn hook(hook: HookKind) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Hook { hook, source }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Reentrancy => "reentrancy",
            ErrorKind::OpenFailure => "open failure",
            ErrorKind::UpgradeOnReadOnly => "upgrade on read-only",
            ErrorKind::DowngradeUnsupported => "downgrade unsupported",
            ErrorKind::MigrationHook => "migration hook",
            ErrorKind::HandleClosed => "handle closed",
            ErrorKind::Storage => "storage",
        };
        write!(f, "{}", name)
    }
}
