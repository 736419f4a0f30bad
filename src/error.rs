//! Error types callers need to branch on.
//!
//! Plumbing errors travel as `anyhow::Error` with context attached. The enums
//! here cover the cases where the variant matters: the retry layer asks a
//! [`RemoteError`] whether it is transient, the binary reports which pipeline
//! [`Stage`] failed, and config problems abort before any remote call.

use std::path::PathBuf;

use thiserror::Error;

/// Failure talking to the remote music service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network failure, timeout, rate limiting or a 5xx. Worth retrying.
    #[error("transient remote failure: {0}")]
    Transient(String),
    /// Credentials were refused.
    #[error("remote service refused our credentials (re-run with --authorize)")]
    Unauthorized,
    /// Any other non-success HTTP status.
    #[error("remote service rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    /// The call went through but the service reported an error.
    #[error("remote API error: {0}")]
    Api(String),
}

impl RemoteError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 => RemoteError::Unauthorized,
            429 | 500..=599 => RemoteError::Transient(format!("HTTP {}: {}", status, truncate(&body, 200))),
            _ => RemoteError::Rejected {
                status,
                body: truncate(&body, 200).to_string(),
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// True if any error in the chain is a transient [`RemoteError`].
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<RemoteError>())
        .any(RemoteError::is_transient)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Problems with the configuration file. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing `{0}` in config file")]
    MissingCredential(&'static str),
}

/// Pipeline stage, used to tell the user where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Identify,
    Sync,
    Reconcile,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Identify => write!(f, "identify"),
            Stage::Sync => write!(f, "sync"),
            Stage::Reconcile => write!(f, "reconcile"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{stage} stage failed: {cause:#}")]
pub struct PipelineError {
    pub stage: Stage,
    pub cause: anyhow::Error,
}

impl PipelineError {
    pub fn new(stage: Stage, cause: anyhow::Error) -> Self {
        Self { stage, cause }
    }
}
