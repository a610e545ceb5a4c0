use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the rating engine.
///
/// Every operation that returns an error leaves the ledger and the rating projections exactly as
/// they were before the call.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input, rejected before the ledger is touched.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A referenced player or match does not exist.
    #[error("{0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
