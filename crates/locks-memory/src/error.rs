use latch_locks::LockTableError;
use thiserror::Error;

/// Errors that can occur when using the in-memory lock table.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The resource name was missing or empty.
    #[error("missing resource")]
    MissingResource,

    /// A TTL was supplied but was not positive.
    #[error("invalid ttl: must be greater than zero")]
    InvalidTtl,
}

impl LockTableError for Error {}
