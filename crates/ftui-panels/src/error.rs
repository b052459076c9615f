#![forbid(unsafe_code)]

//! Error taxonomy for panel operations.
//!
//! Every failure inside the runtime is converted to the nearest
//! [`PanelError`] variant at the boundary where it happens and surfaced
//! through a `Result` or the caller's failure callback. Scheduler failures
//! (duplicate, timeout) and asset failures use the same type so callers do
//! not need to distinguish the source.

use web_time::Duration;

use crate::config::OpenStrategy;

/// Coarse category of a [`PanelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigNotFound,
    AssetLoadFailure,
    DuplicateRequest,
    Timeout,
    CreationFailure,
    StrategyRejected,
    InvalidArgument,
    Cancelled,
}

/// Failure reported by an open, load, or lifecycle operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PanelError {
    /// No registered config and synthesis of a default is disabled.
    #[error("no panel config registered for `{ui_name}`")]
    ConfigNotFound { ui_name: String },

    /// The asset source returned nothing or reported a failure.
    #[error("failed to load panel `{ui_name}`: {reason}")]
    AssetLoadFailure { ui_name: String, reason: String },

    /// An identical request is already waiting or loading.
    #[error("duplicate load request for `{ui_name}`")]
    DuplicateRequest { ui_name: String },

    /// The asynchronous load exceeded its budget.
    #[error("loading `{ui_name}` timed out after {waited:?}")]
    Timeout { ui_name: String, waited: Duration },

    /// The asset loaded but could not become an instance.
    #[error("failed to create instance of `{ui_name}`: {reason}")]
    CreationFailure { ui_name: String, reason: String },

    /// The open strategy refused another instance.
    #[error("{strategy:?} strategy rejected `{ui_name}` with {active} active instances")]
    StrategyRejected {
        ui_name: String,
        strategy: OpenStrategy,
        active: usize,
    },

    /// Empty name or otherwise unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The request was cancelled before it produced an instance.
    #[error("load of `{ui_name}` was cancelled")]
    Cancelled { ui_name: String },
}

impl PanelError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigNotFound { .. } => ErrorKind::ConfigNotFound,
            Self::AssetLoadFailure { .. } => ErrorKind::AssetLoadFailure,
            Self::DuplicateRequest { .. } => ErrorKind::DuplicateRequest,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CreationFailure { .. } => ErrorKind::CreationFailure,
            Self::StrategyRejected { .. } => ErrorKind::StrategyRejected,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn asset(ui_name: &str, reason: impl Into<String>) -> Self {
        Self::AssetLoadFailure {
            ui_name: ui_name.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn creation(ui_name: &str, reason: impl Into<String>) -> Self {
        Self::CreationFailure {
            ui_name: ui_name.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Result alias for panel operations.
pub type Result<T> = std::result::Result<T, PanelError>;

/// Failure while loading or validating a [`RuntimeConfig`](crate::config::RuntimeConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "config-file")]
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[cfg(feature = "config-file")]
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}
