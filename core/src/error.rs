//! Error types for the orchestration engine.
//!
//! # Design
//! `RequestError` is never returned across the async boundary: it travels
//! inside a `Failure` through a request's error callback, exactly once per
//! terminal failure. `ConfigError` is the only error surfaced through
//! `Result` and only while the manager is being set up.

use std::path::PathBuf;

use thiserror::Error;

use crate::request::RequestTag;

/// Terminal failure reasons delivered to error callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The transport failed before or while producing a response.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The server certificate did not match a required pin.
    #[error("server trust rejected for {host}")]
    TrustRejected { host: String },

    /// The request URL could not be resolved against the base URL.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A child request was cancelled on its own while its compound request ran.
    #[error("request {0} was cancelled")]
    Cancelled(RequestTag),

    /// A child request had already been started or cancelled when its turn came.
    #[error("request {0} cannot be executed again")]
    NotExecutable(RequestTag),
}

/// Errors raised while loading configuration or constructing a manager.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid base url '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}
