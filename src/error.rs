//! Error types for the recording channels and session

use thiserror::Error;

use crate::data::ArtifactKind;

/// Errors surfaced by channels and the session orchestrator
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Download or upload requested before the channel produced an artifact
    #[error("There is no {kind} recorded yet")]
    NoArtifact { kind: ArtifactKind },

    /// Upload requested without any callback to carry it
    #[error("Missing upload URL or upload callback")]
    MissingCallback,

    /// Screen or microphone could not be acquired
    #[error("Failed to acquire capture device: {0}")]
    DeviceAcquisition(String),

    /// Upload transport failed
    #[error("Upload transport error: {0}")]
    Transport(String),

    /// Error returned by a caller-supplied upload callback, passed through untouched
    #[error(transparent)]
    Callback(anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecorderError {
    /// Whether the error comes from a missing artifact
    pub fn is_no_artifact(&self) -> bool {
        matches!(self, Self::NoArtifact { .. })
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
