use thiserror::Error;

/// The stable error surface callers of [`crate::Engine`] see. Internal
/// causes (sqlx errors, lock failures) are still preserved as `#[source]`
/// for logging, mirroring the `StoreError` -> surface-error translation the
/// storage layer always did, but the variant set here matches the error
/// kinds operations are specified to return.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("amount must be a positive integer no greater than 10^15")]
    InvalidAmount,
    #[error("insufficient available balance")]
    InsufficientBalance,
    #[error("a bid at this amount already exists for this round")]
    DuplicateAmount,
    #[error("bid amount is below the minimum required bid")]
    BelowMinimum,
    #[error("auction is not currently accepting bids")]
    AuctionNotBiddable,
    #[error("operation lost a concurrent update race and exhausted its retries")]
    ConcurrencyConflict,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("operation timed out")]
    Timeout,
    #[error("unique constraint violation")]
    NotUnique(#[source] sqlx::Error),
    #[error("database error")]
    Database(#[source] sqlx::Error),
    #[error("unexpected error")]
    UnexpectedError(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether a caller retrying the same call (after the jittered backoff
    /// used internally for storage CAS retries) has a chance of succeeding.
    pub fn retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict | EngineError::Timeout)
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return EngineError::NotUnique(err);
            }
        }
        EngineError::Database(err)
    }
}
