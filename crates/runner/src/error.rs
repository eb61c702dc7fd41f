//! Error types for the run coordinator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid coordinator config: {0}")]
    Config(String),

    #[error("Invalid repository reference '{0}', expected owner/name")]
    InvalidRepo(String),

    #[error("Failed to fetch repository {repo}: {reason}")]
    RepoFetch { repo: String, reason: String },

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Run store error: {0}")]
    Store(#[from] playdeck_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
