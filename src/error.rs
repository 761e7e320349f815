//! Error types for the reqwest-session-proxies crate.

use crate::user_agents::UserAgentMode;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building a pool or controller from configuration.
///
/// These are fatal at startup: a crawl cannot run without a usable pool.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The proxy or user-agent source could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A structured proxy list was not valid JSON or had the wrong shape.
    #[error("malformed proxy list: {0}")]
    Json(#[from] serde_json::Error),
    /// A proxy record carried a port that is not a number in `0..=65535`.
    #[error("invalid port {port:?} for proxy {host}")]
    InvalidPort { host: String, port: String },
    /// The file extension does not select a known parser.
    #[error("unsupported proxy source {0}, expected a .txt or .json file")]
    UnsupportedSource(PathBuf),
    /// The source parsed fine but contained no proxies.
    #[error("proxy source contains no proxies")]
    EmptySource,
    /// The user-agent corpus is empty after filtering by mode.
    #[error("no user agents available for mode {0}")]
    NoUserAgents(UserAgentMode),
    /// No proxy source was configured.
    #[error("no proxy source configured")]
    MissingProxySource,
}

/// Error returned when no live (or proven) proxy is left in the pool.
#[derive(Debug, Error)]
#[error("No proxy available in pool")]
pub struct PoolExhausted;

/// A logical request used up its retry budget and must not be dispatched.
#[derive(Debug, Error)]
#[error("request to {url} abandoned after {retry_times} retries")]
pub struct RequestAbandoned {
    pub url: String,
    pub retry_times: u32,
}

/// Reasons `RotationController::bind` refuses to hand out a binding.
#[derive(Debug, Error)]
pub enum BindError {
    #[error(transparent)]
    Exhausted(#[from] PoolExhausted),
    #[error(transparent)]
    Abandoned(#[from] RequestAbandoned),
}
