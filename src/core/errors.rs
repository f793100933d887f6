//! SWD-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SwdError>;

/// Top-level error type for Signature Warden.
#[derive(Debug, Error)]
pub enum SwdError {
    #[error("[SWD-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SWD-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SWD-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SWD-1101] invalid signature: {details}")]
    InvalidSignature { details: String },

    #[error("[SWD-1102] invalid status code {code} for finding {finding_id}")]
    InvalidStatus { finding_id: i64, code: i64 },

    #[error("[SWD-1103] path is not valid UTF-8: {path}")]
    NonUtf8Path { path: PathBuf },

    #[error("[SWD-2001] {entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("[SWD-2002] duplicate {entity} record for {key}")]
    DuplicateRecord { entity: &'static str, key: String },

    #[error("[SWD-2003] signature bytes no longer present at offset {offset} in {path}")]
    SignatureMismatch { path: PathBuf, offset: u64 },

    #[error("[SWD-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SWD-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[SWD-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[SWD-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SWD-3003] cannot buffer {requested} bytes for {path}")]
    Allocation { path: PathBuf, requested: u64 },

    #[error("[SWD-3004] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[SWD-3005] directory {path} lies below scanner.max_depth ({max_depth}); not walked")]
    DepthLimit { path: PathBuf, max_depth: usize },

    #[error("[SWD-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SwdError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SWD-1001",
            Self::MissingConfig { .. } => "SWD-1002",
            Self::ConfigParse { .. } => "SWD-1003",
            Self::InvalidSignature { .. } => "SWD-1101",
            Self::InvalidStatus { .. } => "SWD-1102",
            Self::NonUtf8Path { .. } => "SWD-1103",
            Self::NotFound { .. } => "SWD-2001",
            Self::DuplicateRecord { .. } => "SWD-2002",
            Self::SignatureMismatch { .. } => "SWD-2003",
            Self::Serialization { .. } => "SWD-2101",
            Self::Sql { .. } => "SWD-2102",
            Self::PermissionDenied { .. } => "SWD-3001",
            Self::Io { .. } => "SWD-3002",
            Self::Allocation { .. } => "SWD-3003",
            Self::ChannelClosed { .. } => "SWD-3004",
            Self::DepthLimit { .. } => "SWD-3005",
            Self::Runtime { .. } => "SWD-3900",
        }
    }

    /// Whether retrying on a later pass might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Allocation { .. }
                | Self::ChannelClosed { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    ///
    /// `PermissionDenied` gets its own variant so operators can tell a
    /// privilege problem from a vanished file.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied { path };
        }
        Self::Io { path, source }
    }

    /// Convenience constructor for a missing finding.
    #[must_use]
    pub fn finding_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "finding",
            key: id.to_string(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for SwdError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for SwdError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SwdError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
