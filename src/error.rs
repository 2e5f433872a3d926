//! Crate-wide error type.
//!
//! Every fallible operation in `devnetd` returns [`Result`]. The single
//! [`Error`] enum carries the taxonomy from the daemon's error-handling
//! design: validation, not-found, precondition, and infrastructure failures
//! each map to one [`tonic::Code`] at the gRPC boundary via [`Error::code`].

use displaydoc::Display;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Display, Error)]
pub enum Error {
    /// {0}
    Validation(String),

    /// {kind} {namespace}/{name} not found
    NotFound { kind: &'static str, namespace: String, name: String },

    /// {kind} {namespace}/{name} already exists
    AlreadyExists { kind: &'static str, namespace: String, name: String },

    /// operation not valid in current state: {0}
    FailedPrecondition(String),

    /// collaborator unavailable: {0}
    Unavailable(String),

    /// internal error: {0}
    Internal(String),

    /// io error: {0}
    Io(#[from] std::io::Error),

    /// json error: {0}
    Json(#[from] serde_json::Error),

    /// yaml error: {0}
    Yaml(#[from] serde_yaml::Error),

    /// toml decode error: {0}
    TomlDecode(#[from] toml::de::Error),

    /// uuid parse error: {0}
    Uuid(#[from] uuid::Error),

    /// http client error: {0}
    Http(#[from] reqwest::Error),

    /// unexpected error: {0}
    Unexpected(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound { kind, namespace: namespace.into(), name: name.into() }
    }

    pub fn already_exists(
        kind: &'static str,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists { kind, namespace: namespace.into(), name: name.into() }
    }

    pub fn validation(msg: impl std::fmt::Display) -> Self {
        Self::Validation(msg.to_string())
    }

    pub fn precondition(msg: impl std::fmt::Display) -> Self {
        Self::FailedPrecondition(msg.to_string())
    }

    /// The single comparable sentinel §4.1 requires for the Store contract.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    /// Maps the error taxonomy onto the wire error codes from the external
    /// interface contract.
    pub fn code(&self) -> tonic::Code {
        match self {
            Error::Validation(_) => tonic::Code::InvalidArgument,
            Error::NotFound { .. } => tonic::Code::NotFound,
            Error::AlreadyExists { .. } => tonic::Code::AlreadyExists,
            Error::FailedPrecondition(_) => tonic::Code::FailedPrecondition,
            Error::Unavailable(_) | Error::Http(_) | Error::Io(_) => tonic::Code::Unavailable,
            _ => tonic::Code::Internal,
        }
    }
}

impl From<Error> for tonic::Status {
    fn from(e: Error) -> Self {
        tonic::Status::new(e.code(), e.to_string())
    }
}

/// Shorthand used throughout `Error::NotFound`/`AlreadyExists` sites where
/// the sentinel check (rather than the variant's fields) is what matters.
pub fn is_not_found(err: &Error) -> bool {
    err.is_not_found()
}
