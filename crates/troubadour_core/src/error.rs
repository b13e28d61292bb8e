//! Engine Error Types
//!
//! Control-plane failures are typed by what the caller can do about
//! them: fix the parameters (Validation), reference something that
//! exists (NotFound), resolve a collision (Conflict), or look at the
//! hardware (Device). Fatal is reserved for conditions the engine cannot
//! recover from (a dead engine thread, a poisoned lock).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by mixer commands and engine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MixerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

/// Wire-level discriminant for [`MixerError`], used by the command
/// transport's error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Device,
    Fatal,
}

impl MixerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn device(message: impl Into<String>) -> Self {
        Self::Device(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Device(_) => ErrorKind::Device,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

impl From<troubadour_dsp::DspError> for MixerError {
    fn from(err: troubadour_dsp::DspError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type alias for mixer operations
pub type MixerResult<T> = Result<T, MixerError>;
