//! Error types for `myob-http-tools`.
//!
//! Only request construction can fail. Once a request has been handed to the execution engine,
//! every outcome (including transport failures) is reported as data in an
//! [`ExecutionResult`](crate::runtime::ExecutionResult).

use crate::safety::sanitize_reqwest_error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpToolsError {
    /// A `{name}` placeholder in the path template has no (non-null) value in `pathParams`.
    #[error("Missing path param: {0}")]
    MissingPathParameter(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("http transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, HttpToolsError>;

impl From<reqwest::Error> for HttpToolsError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(sanitize_reqwest_error(&value))
    }
}
