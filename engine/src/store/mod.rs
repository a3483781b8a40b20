//! Storage abstraction for the auction engine.
//!
//! The only contract callers of [`Engine`](crate::Engine) ever see is the
//! [`Storage`] trait; [`postgres::PostgresStore`] is the production
//! backend and [`memory::MemoryStore`] is an in-process backend used by
//! tests (and available behind the `test-utils` feature for anyone
//! embedding the engine without a database).
//!
//! Row updates that can race with a concurrent caller (round extensions,
//! account balance changes, auction status transitions) use optimistic
//! concurrency control: every mutating call takes the value it read
//! earlier and the backend performs a conditional `UPDATE ... WHERE ...`
//! that only succeeds if nothing else moved the row first. A backend
//! returns [`crate::error::EngineError::ConcurrencyConflict`] on a lost
//! race; callers retry through [`with_cas_retry`].

#[cfg(feature = "test-utils")]
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use jiff::Timestamp;
use payloads::{
    Amount, AuctionConfig, AuctionId, AuctionStatus, BidId, BidStatus, TransactionType, TxId,
    UserId,
};

use crate::error::EngineError;
use crate::model::{AccountRow, AuctionRow, BidRow, RoundRow, TransactionRow};

pub struct NewBid {
    pub id: BidId,
    pub auction_id: AuctionId,
    pub round_number: u32,
    pub bidder_id: UserId,
    pub amount: Amount,
    pub created_at: Timestamp,
}

pub struct NewTransaction {
    pub id: TxId,
    pub user_id: UserId,
    pub kind: TransactionType,
    pub amount: Amount,
    pub related_auction_id: Option<AuctionId>,
    pub related_bid_id: Option<BidId>,
    pub created_at: Timestamp,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn create_auction(
        &self,
        id: AuctionId,
        config: &AuctionConfig,
        now: Timestamp,
    ) -> Result<AuctionRow, EngineError>;

    async fn get_auction(&self, id: AuctionId) -> Result<AuctionRow, EngineError>;

    /// Conditional status transition; fails with `ConcurrencyConflict` if
    /// the auction's status no longer matches `expected`.
    async fn update_auction_status(
        &self,
        id: AuctionId,
        expected: AuctionStatus,
        new_status: AuctionStatus,
    ) -> Result<AuctionRow, EngineError>;

    /// Bumps the auction's optimistic-concurrency `version`, failing
    /// `ConcurrencyConflict` if it no longer matches `expected_version` or
    /// the auction is no longer `active`. The first step of `placeBid`
    /// (confirming the auction is still biddable) and part of
    /// `completeRound`'s settlement both go through this, the same CAS
    /// shape `cas_update_account` uses for balances.
    async fn bump_auction_version(
        &self,
        id: AuctionId,
        expected_version: i64,
    ) -> Result<AuctionRow, EngineError>;

    async fn create_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        items_count: u32,
        start_time: Timestamp,
        end_time: Timestamp,
    ) -> Result<RoundRow, EngineError>;

    async fn get_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
    ) -> Result<RoundRow, EngineError>;

    async fn list_rounds(&self, auction_id: AuctionId) -> Result<Vec<RoundRow>, EngineError>;

    /// Conditional end-time push-out for the anti-sniping extension;
    /// fails with `ConcurrencyConflict` if `extensions_count` has moved on.
    async fn extend_round_end_time(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        expected_extensions_count: u32,
        new_end_time: Timestamp,
    ) -> Result<RoundRow, EngineError>;

    async fn complete_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        actual_end_time: Timestamp,
    ) -> Result<RoundRow, EngineError>;

    /// Fails with `EngineError::NotUnique` if a bid at this exact amount
    /// already exists among this auction's active bids (the
    /// duplicate-amount rule).
    async fn insert_bid(&self, bid: NewBid) -> Result<BidRow, EngineError>;

    /// The bidder's standing active bid on this auction, if any — an
    /// auction has at most one active bid per user regardless of round.
    async fn get_active_bid(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
    ) -> Result<Option<BidRow>, EngineError>;

    /// The auction's active bid at this exact amount, if any — used to
    /// reject a duplicate amount before any funds are frozen rather than
    /// relying solely on the unique-index violation to unwind one after
    /// the fact.
    async fn find_active_bid_by_amount(
        &self,
        auction_id: AuctionId,
        amount: Amount,
    ) -> Result<Option<BidRow>, EngineError>;

    /// Updates an existing bid's amount in place (the proxy-bidding raise
    /// path): re-stamps `updated_at` and `round_number` and bumps
    /// `version`, but leaves `created_at` untouched.
    async fn update_bid_amount(
        &self,
        bid_id: BidId,
        round_number: u32,
        amount: Amount,
        now: Timestamp,
    ) -> Result<BidRow, EngineError>;

    async fn list_bids_for_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
    ) -> Result<Vec<BidRow>, EngineError>;

    async fn list_user_bids(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
    ) -> Result<Vec<BidRow>, EngineError>;

    async fn set_bid_statuses(
        &self,
        ids: &[BidId],
        status: BidStatus,
    ) -> Result<(), EngineError>;

    /// Marks a bid as won, ranked `item_number` (1-indexed) within
    /// `won_round`.
    async fn mark_bid_won(
        &self,
        bid_id: BidId,
        won_round: u32,
        item_number: u32,
    ) -> Result<(), EngineError>;

    async fn get_or_create_account(&self, user_id: UserId) -> Result<AccountRow, EngineError>;

    /// Conditional balance update; fails with `ConcurrencyConflict` if
    /// `expected_version` no longer matches the stored version.
    async fn cas_update_account(
        &self,
        user_id: UserId,
        expected_version: i64,
        new_available: Amount,
        new_frozen: Amount,
    ) -> Result<AccountRow, EngineError>;

    async fn insert_transaction(
        &self,
        tx: NewTransaction,
    ) -> Result<TransactionRow, EngineError>;

    /// Most-recent-first, per `transactions{userId, createdAt desc}`.
    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionRow>, EngineError>;
}

/// Retry a storage operation that may lose an optimistic-concurrency race,
/// with jittered exponential backoff, per the 3-attempt retry policy.
/// Grounded on the retryable-conflict handling the scheduler's auction
/// processing loop always did around advisory-lock contention.
pub async fn with_cas_retry<T, F, Fut>(mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, EngineError>>,
{
    use rand::Rng;

    const MAX_ATTEMPTS: u32 = 3;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.retryable() && attempt < MAX_ATTEMPTS => {
                let base_ms = 10u64 * (1 << (attempt - 1));
                let jitter_ms = rand::thread_rng().gen_range(0..base_ms.max(1));
                tokio::time::sleep(std::time::Duration::from_millis(base_ms + jitter_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Bound a storage or lock operation by a hard deadline,
/// surfacing `EngineError::Timeout` instead of letting a bid or
/// round-completion task hang on a stalled connection indefinitely.
pub async fn with_timeout<T>(
    deadline: std::time::Duration,
    fut: impl std::future::Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout),
    }
}
