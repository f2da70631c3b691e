//! QC-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, QcError>;

/// Top-level error type for the quarantine crawler.
#[derive(Debug, Error)]
pub enum QcError {
    #[error("[QC-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[QC-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[QC-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[QC-2001] path {path} is outside crawl root {root}")]
    PathOutsideRoot { path: PathBuf, root: PathBuf },

    #[error("[QC-2002] path {path} cannot be stored in the tree: {details}")]
    UnrepresentablePath { path: PathBuf, details: String },

    #[error("[QC-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[QC-2102] checkpoint {path} is corrupt: {details}")]
    CheckpointCorrupt { path: PathBuf, details: String },

    #[error("[QC-2103] checkpoint {path} does not match this run: {details}")]
    CheckpointMismatch { path: PathBuf, details: String },

    #[error("[QC-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[QC-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[QC-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[QC-3004] destination root {path} is unavailable: {details}")]
    DestinationUnavailable { path: PathBuf, details: String },

    #[error("[QC-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl QcError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "QC-1001",
            Self::MissingConfig { .. } => "QC-1002",
            Self::ConfigParse { .. } => "QC-1003",
            Self::PathOutsideRoot { .. } => "QC-2001",
            Self::UnrepresentablePath { .. } => "QC-2002",
            Self::Serialization { .. } => "QC-2101",
            Self::CheckpointCorrupt { .. } => "QC-2102",
            Self::CheckpointMismatch { .. } => "QC-2103",
            Self::PermissionDenied { .. } => "QC-3001",
            Self::Io { .. } => "QC-3002",
            Self::ChannelClosed { .. } => "QC-3003",
            Self::DestinationUnavailable { .. } => "QC-3004",
            Self::Runtime { .. } => "QC-3900",
        }
    }

    /// Whether a rerun might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::PermissionDenied { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    ///
    /// `PermissionDenied` IO failures are mapped to the dedicated variant.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied {
                path: path.as_ref().to_path_buf(),
            };
        }
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for QcError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for QcError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
