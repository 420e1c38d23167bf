use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("The Secret {0} does not exist")]
    SecretNotFound(String),
    #[error("The Secret key {0} in {1} does not exist")]
    SecretKeyNotFound(String, String),

    #[error("{0} is missing {1} in its metadata")]
    MissingObjectKey(String, &'static str),

    #[error("Invalid Pulp configuration: {0}")]
    InvalidPulpConfig(String),

    #[error("Failed to generate key material: {0}")]
    KeyGeneration(#[from] rcgen::Error),

    #[error("Reconciliation did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Command `{command}` failed in pod {pod}: {message}")]
    ExecFailed {
        pod: String,
        command: String,
        message: String,
    },

    #[error("Invalid database URI: bad {0}")]
    InvalidDatabaseUri(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::KubeError(_) => "KubeError",
            Error::SecretNotFound(_) => "SecretNotFound",
            Error::SecretKeyNotFound(_, _) => "SecretKeyNotFound",
            Error::MissingObjectKey(_, _) => "MissingObjectKey",
            Error::InvalidPulpConfig(_) => "InvalidPulpConfig",
            Error::KeyGeneration(_) => "KeyGeneration",
            Error::DeadlineExceeded(_) => "DeadlineExceeded",
            Error::ExecFailed { .. } => "ExecFailed",
            Error::InvalidDatabaseUri(_) => "InvalidDatabaseUri",
        }
    }

    /// A failed in-container command. Only the program name is kept; arguments can carry
    /// credentials.
    pub fn exec_failed(pod: &str, command: &[String], message: impl Into<String>) -> Self {
        Error::ExecFailed {
            pod: pod.to_owned(),
            command: command.first().cloned().unwrap_or_default(),
            message: message.into(),
        }
    }

    /// Missing credential data degrades content generation instead of failing the pass
    pub fn is_missing_credentials(&self) -> bool {
        matches!(self, Error::SecretNotFound(_) | Error::SecretKeyNotFound(_, _))
    }
}

pub mod controllers;

pub use controllers::{run, State};

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::Metrics;

/// Custom resource definitions
pub mod resources;
