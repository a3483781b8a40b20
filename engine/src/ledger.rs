//! The Balance Ledger: per-user available/frozen funds under optimistic
//! concurrency control, with every mutation appended to the transaction
//! log. Grounded on `currency::create_entry` — read the account, validate
//! the resulting balances, write the journal row — generalized from
//! arbitrary multi-account double-entry lines down to the single-user
//! freeze/unfreeze/win/refund operations this spec actually needs.

use std::time::Duration;

use jiff::Timestamp;
use payloads::{Amount, AuctionId, BidId, TransactionType, TxId, UserId};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{AccountRow, TransactionRow};
use crate::store::{with_cas_retry, with_timeout, NewTransaction, Storage};
use crate::time::TimeSource;

/// How long a ledger mutation (including its bounded CAS retries) may run
/// before surfacing `EngineError::Timeout`, when no caller-supplied
/// deadline applies.
const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Ledger<'a> {
    store: &'a dyn Storage,
    time_source: &'a TimeSource,
    storage_timeout: Duration,
}

impl<'a> Ledger<'a> {
    pub fn new(store: &'a dyn Storage, time_source: &'a TimeSource) -> Self {
        Self {
            store,
            time_source,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn new_with_timeout(
        store: &'a dyn Storage,
        time_source: &'a TimeSource,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            time_source,
            storage_timeout,
        }
    }

    async fn record(
        &self,
        user_id: UserId,
        kind: TransactionType,
        amount: Amount,
        related_auction_id: Option<AuctionId>,
        related_bid_id: Option<BidId>,
        now: Timestamp,
    ) -> Result<TransactionRow, EngineError> {
        self.store
            .insert_transaction(NewTransaction {
                id: TxId(Uuid::new_v4()),
                user_id,
                kind,
                amount,
                related_auction_id,
                related_bid_id,
                created_at: now,
            })
            .await
    }

    pub async fn get_balance(&self, user_id: UserId) -> Result<AccountRow, EngineError> {
        self.store.get_or_create_account(user_id).await
    }

    pub async fn get_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionRow>, EngineError> {
        self.store.list_transactions(user_id, limit, offset).await
    }

    pub async fn deposit(&self, user_id: UserId, amount: Amount) -> Result<AccountRow, EngineError> {
        if !amount.is_valid() {
            return Err(EngineError::InvalidAmount);
        }
        let now = self.time_source.now();
        with_timeout(
            self.storage_timeout,
            with_cas_retry(|| async {
                let account = self.store.get_or_create_account(user_id).await?;
                let new_available = account
                    .available
                    .checked_add(amount)
                    .ok_or(EngineError::InvalidAmount)?;
                let updated = self
                    .store
                    .cas_update_account(user_id, account.version, new_available, account.frozen)
                    .await?;
                self.record(user_id, TransactionType::Deposit, amount, None, None, now)
                    .await?;
                Ok(updated)
            }),
        )
        .await
    }

    pub async fn withdraw(&self, user_id: UserId, amount: Amount) -> Result<AccountRow, EngineError> {
        if !amount.is_valid() {
            return Err(EngineError::InvalidAmount);
        }
        let now = self.time_source.now();
        with_timeout(
            self.storage_timeout,
            with_cas_retry(|| async {
                let account = self.store.get_or_create_account(user_id).await?;
                let new_available = account
                    .available
                    .checked_sub(amount)
                    .filter(|a| a.0 >= 0)
                    .ok_or(EngineError::InsufficientBalance)?;
                let updated = self
                    .store
                    .cas_update_account(user_id, account.version, new_available, account.frozen)
                    .await?;
                self.record(user_id, TransactionType::Withdraw, amount, None, None, now)
                    .await?;
                Ok(updated)
            }),
        )
        .await
    }

    /// Moves `delta` (signed, in minor units) from `available` to `frozen`.
    /// A negative `delta` shrinks an existing bid's frozen amount, mirroring
    /// `freezeForBid`'s ability to handle a bid that was lowered.
    pub async fn freeze_for_bid(
        &self,
        user_id: UserId,
        auction_id: AuctionId,
        bid_id: BidId,
        delta: i64,
    ) -> Result<AccountRow, EngineError> {
        let now = self.time_source.now();
        with_timeout(
            self.storage_timeout,
            with_cas_retry(|| async {
                let account = self.store.get_or_create_account(user_id).await?;
                let new_available = account
                    .available
                    .apply_delta(-delta)
                    .filter(|a| a.0 >= 0)
                    .ok_or(EngineError::InsufficientBalance)?;
                let new_frozen = account
                    .frozen
                    .apply_delta(delta)
                    .filter(|f| f.0 >= 0)
                    .ok_or(EngineError::InsufficientBalance)?;
                let updated = self
                    .store
                    .cas_update_account(user_id, account.version, new_available, new_frozen)
                    .await?;
                let kind = if delta >= 0 {
                    TransactionType::BidFreeze
                } else {
                    TransactionType::BidUnfreeze
                };
                self.record(
                    user_id,
                    kind,
                    Amount(delta.abs()),
                    Some(auction_id),
                    Some(bid_id),
                    now,
                )
                .await?;
                Ok(updated)
            }),
        )
        .await
    }

    /// Consumes `amount` out of `frozen` permanently (the winning bid's
    /// funds leave the ledger rather than returning to `available`).
    pub async fn confirm_win(
        &self,
        user_id: UserId,
        auction_id: AuctionId,
        bid_id: BidId,
        amount: Amount,
    ) -> Result<AccountRow, EngineError> {
        let now = self.time_source.now();
        with_timeout(
            self.storage_timeout,
            with_cas_retry(|| async {
                let account = self.store.get_or_create_account(user_id).await?;
                let new_frozen = account
                    .frozen
                    .checked_sub(amount)
                    .filter(|f| f.0 >= 0)
                    .ok_or(EngineError::InsufficientBalance)?;
                let updated = self
                    .store
                    .cas_update_account(user_id, account.version, account.available, new_frozen)
                    .await?;
                self.record(
                    user_id,
                    TransactionType::BidWin,
                    amount,
                    Some(auction_id),
                    Some(bid_id),
                    now,
                )
                .await?;
                Ok(updated)
            }),
        )
        .await
    }

    /// Moves `amount` back from `frozen` to `available` for a losing bid.
    pub async fn refund(
        &self,
        user_id: UserId,
        auction_id: AuctionId,
        bid_id: BidId,
        amount: Amount,
    ) -> Result<AccountRow, EngineError> {
        let now = self.time_source.now();
        with_timeout(
            self.storage_timeout,
            with_cas_retry(|| async {
                let account = self.store.get_or_create_account(user_id).await?;
                let new_frozen = account
                    .frozen
                    .checked_sub(amount)
                    .filter(|f| f.0 >= 0)
                    .ok_or(EngineError::InsufficientBalance)?;
                let new_available = account
                    .available
                    .checked_add(amount)
                    .ok_or(EngineError::InvalidAmount)?;
                let updated = self
                    .store
                    .cas_update_account(user_id, account.version, new_available, new_frozen)
                    .await?;
                self.record(
                    user_id,
                    TransactionType::BidRefund,
                    amount,
                    Some(auction_id),
                    Some(bid_id),
                    now,
                )
                .await?;
                Ok(updated)
            }),
        )
        .await
    }
}
