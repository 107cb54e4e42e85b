// src/error.rs

//! Unified error handling for the sync pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Remote listing endpoint unreachable or returned a malformed response.
    /// Aborts the run before any state mutation.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Batch job could not be created. Aborts before the in-flight job
    /// record is persisted, so no partial state remains.
    #[error("Submission error: {0}")]
    Submission(String),

    /// Poll retries for a job exhausted the attempt ceiling. The in-flight
    /// record is kept, so the next invocation resumes the same job.
    #[error("Polling job {job_id} failed after {attempts} attempts: {message}")]
    PollRetriesExhausted {
        job_id: String,
        attempts: u32,
        message: String,
    },

    /// Two distinct identifiers normalized to the same document slug.
    /// Fatal for the run: neither identifier is written.
    #[error("Slug collision on '{slug}': {first} vs {second}")]
    SlugCollision {
        slug: String,
        first: String,
        second: String,
    },

    /// Another run already holds the lock for this site.
    #[error("A sync run for '{site}' is already in progress")]
    RunInProgress { site: String },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a discovery error.
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery(message.into())
    }

    /// Create a submission error.
    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission(message.into())
    }

    /// Create a poll-exhaustion error for a job.
    pub fn poll_exhausted(
        job_id: impl Into<String>,
        attempts: u32,
        message: impl fmt::Display,
    ) -> Self {
        Self::PollRetriesExhausted {
            job_id: job_id.into(),
            attempts,
            message: message.to_string(),
        }
    }
}
