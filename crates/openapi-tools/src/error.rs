//! Error types for `myob-openapi-tools`.

use myob_http_tools::error::HttpToolsError;
use thiserror::Error;

/// Main error type for the ERP tool source.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// Configuration errors (invalid config, missing fields, conflicts).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Startup errors (no base URL, source used before `start`).
    #[error("Startup error: {0}")]
    Startup(String),

    /// Runtime errors (unknown tool).
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// `OpenAPI` document errors (missing `paths`, wrong shape).
    #[error("OpenAPI error: {0}")]
    OpenApi(String),

    #[error("OpenAPI error: no spec path configured and none of {candidates:?} exists")]
    SpecNotFound { candidates: Vec<String> },

    #[error("OpenAPI error: failed to read spec file '{path}': {source}")]
    OpenApiSpecReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OpenAPI error: failed to parse OpenAPI spec from '{location}': {source}")]
    OpenApiSpecParse {
        location: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Request construction failed (e.g. a missing path parameter). Nothing was sent.
    #[error(transparent)]
    Http(#[from] HttpToolsError),
}

/// Result type alias for tool source operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;
