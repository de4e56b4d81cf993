use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("{what} not found")]
    #[diagnostic(code(latchkey::not_found))]
    NotFound { what: String },

    #[error("conflict: {0}")]
    #[diagnostic(code(latchkey::conflict))]
    Conflict(String),

    #[error("relation `{from}` -> `{to}` would create a cycle")]
    #[diagnostic(
        code(latchkey::cyclic_dependency),
        help("Nesting edges must form a DAG; the target already reaches the source")
    )]
    CyclicDependency { from: String, to: String },

    #[error("forbidden: {verb} on `{resource}` requires the `{required}` capability")]
    #[diagnostic(code(latchkey::forbidden))]
    Forbidden {
        resource: String,
        verb: String,
        required: String,
    },

    #[error("invalid, expired or already-consumed state token")]
    #[diagnostic(
        code(latchkey::invalid_state),
        help("State tokens are single-use and expire after the configured TTL")
    )]
    InvalidState,

    #[error("invalid token: {0}")]
    #[diagnostic(code(latchkey::invalid_token))]
    InvalidToken(String),

    #[error("bad request: {0}")]
    #[diagnostic(code(latchkey::bad_request))]
    BadRequest(String),

    #[error("upstream identity provider error ({status}): {message}")]
    #[diagnostic(code(latchkey::upstream))]
    Upstream { status: u16, message: String },

    #[error("config error: {0}")]
    #[diagnostic(code(latchkey::config))]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    #[diagnostic(code(latchkey::serde))]
    Serde(#[from] serde_json::Error),

    #[error("http error: {0}")]
    #[diagnostic(code(latchkey::http))]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    #[diagnostic(code(latchkey::io))]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }
}
