use thiserror::Error;

/// The result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the coordinator.
#[derive(Debug, Error)]
pub enum Error {
    /// The coordinator rejected the request as malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The resource is currently locked by someone else.
    #[error("resource is locked: {0}")]
    Locked(String),

    /// HTTP transport error.
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// The coordinator answered with a status this client does not expect.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// Status code received.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// Invalid coordinator URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
