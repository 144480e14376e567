// src/error.rs

use thiserror::Error;

/// Errors raised by the detection core.
///
/// None of these are fatal: the worst outcome of any of them is that a
/// frame produces no event, or a profile is left out of tracking.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// Malformed or empty frame. The frame is skipped with no state change.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A color profile that cannot be used. Rejected at load time; the
    /// remaining profiles keep running.
    #[error("invalid color profile '{name}': {reason}")]
    InvalidProfile { name: String, reason: String },

    /// Configuration the pipeline cannot run with at all.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type DetectionResult<T> = std::result::Result<T, DetectionError>;
