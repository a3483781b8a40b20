//! In-process [`Storage`] backend. Used by the engine's own test suite
//! (under `test-utils`) so scenario tests can drive the scheduler through
//! many rounds without a live Postgres instance, the way the scheduler's
//! own `#[cfg(test)] mod tests` block drove `get_eligibility_for_round_num`
//! against plain in-memory fixtures rather than the database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use jiff::Timestamp;
use payloads::{Amount, AuctionConfig, AuctionId, AuctionStatus, BidId, BidStatus, UserId};

use crate::error::EngineError;
use crate::model::{AccountRow, AuctionRow, BidRow, RoundRow, TransactionRow};

use super::{NewBid, NewTransaction, Storage};

#[derive(Default)]
struct State {
    auctions: HashMap<AuctionId, AuctionRow>,
    rounds: HashMap<(AuctionId, u32), RoundRow>,
    bids: HashMap<BidId, BidRow>,
    accounts: HashMap<UserId, AccountRow>,
    transactions: Vec<TransactionRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn create_auction(
        &self,
        id: AuctionId,
        config: &AuctionConfig,
        now: Timestamp,
    ) -> Result<AuctionRow, EngineError> {
        let row = AuctionRow {
            id,
            config: config.clone(),
            status: AuctionStatus::Pending,
            created_at: now,
            version: 0,
        };
        let mut state = self.state.lock().unwrap();
        if state.auctions.contains_key(&id) {
            return Err(EngineError::NotUnique(sqlx::Error::RowNotFound));
        }
        state.auctions.insert(id, row.clone());
        Ok(row)
    }

    async fn get_auction(&self, id: AuctionId) -> Result<AuctionRow, EngineError> {
        self.state
            .lock()
            .unwrap()
            .auctions
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound("auction"))
    }

    async fn update_auction_status(
        &self,
        id: AuctionId,
        expected: AuctionStatus,
        new_status: AuctionStatus,
    ) -> Result<AuctionRow, EngineError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .auctions
            .get_mut(&id)
            .ok_or(EngineError::NotFound("auction"))?;
        if row.status != expected {
            return Err(EngineError::ConcurrencyConflict);
        }
        row.status = new_status;
        row.version += 1;
        Ok(row.clone())
    }

    async fn bump_auction_version(
        &self,
        id: AuctionId,
        expected_version: i64,
    ) -> Result<AuctionRow, EngineError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .auctions
            .get_mut(&id)
            .ok_or(EngineError::NotFound("auction"))?;
        if row.status != AuctionStatus::Active || row.version != expected_version {
            return Err(EngineError::ConcurrencyConflict);
        }
        row.version += 1;
        Ok(row.clone())
    }

    async fn create_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        items_count: u32,
        start_time: Timestamp,
        end_time: Timestamp,
    ) -> Result<RoundRow, EngineError> {
        let row = RoundRow {
            auction_id,
            round_number: round_number as i32,
            items_count: items_count as i32,
            start_time,
            end_time,
            actual_end_time: None,
            extensions_count: 0,
            completed: false,
        };
        let mut state = self.state.lock().unwrap();
        state.rounds.insert((auction_id, round_number), row.clone());
        Ok(row)
    }

    async fn get_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
    ) -> Result<RoundRow, EngineError> {
        self.state
            .lock()
            .unwrap()
            .rounds
            .get(&(auction_id, round_number))
            .cloned()
            .ok_or(EngineError::NotFound("round"))
    }

    async fn list_rounds(&self, auction_id: AuctionId) -> Result<Vec<RoundRow>, EngineError> {
        let state = self.state.lock().unwrap();
        let mut rounds: Vec<RoundRow> = state
            .rounds
            .values()
            .filter(|r| r.auction_id == auction_id)
            .cloned()
            .collect();
        rounds.sort_by_key(|r| r.round_number);
        Ok(rounds)
    }

    async fn extend_round_end_time(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        expected_extensions_count: u32,
        new_end_time: Timestamp,
    ) -> Result<RoundRow, EngineError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .rounds
            .get_mut(&(auction_id, round_number))
            .ok_or(EngineError::NotFound("round"))?;
        if row.extensions_count as u32 != expected_extensions_count {
            return Err(EngineError::ConcurrencyConflict);
        }
        row.end_time = new_end_time;
        row.extensions_count += 1;
        Ok(row.clone())
    }

    async fn complete_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        actual_end_time: Timestamp,
    ) -> Result<RoundRow, EngineError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .rounds
            .get_mut(&(auction_id, round_number))
            .ok_or(EngineError::NotFound("round"))?;
        if row.completed {
            return Err(EngineError::ConcurrencyConflict);
        }
        row.completed = true;
        row.actual_end_time = Some(actual_end_time);
        Ok(row.clone())
    }

    async fn insert_bid(&self, bid: NewBid) -> Result<BidRow, EngineError> {
        let mut state = self.state.lock().unwrap();
        let dup = state.bids.values().any(|b| {
            b.auction_id == bid.auction_id
                && b.status == BidStatus::Active
                && b.amount == bid.amount
        });
        if dup {
            return Err(EngineError::NotUnique(sqlx::Error::RowNotFound));
        }
        let row = BidRow {
            id: bid.id,
            auction_id: bid.auction_id,
            round_number: bid.round_number as i32,
            bidder_id: bid.bidder_id,
            amount: bid.amount,
            status: BidStatus::Active,
            won_round: None,
            item_number: None,
            created_at: bid.created_at,
            updated_at: bid.created_at,
            version: 0,
        };
        state.bids.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_active_bid(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
    ) -> Result<Option<BidRow>, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bids
            .values()
            .find(|b| {
                b.auction_id == auction_id
                    && b.bidder_id == user_id
                    && b.status == BidStatus::Active
            })
            .cloned())
    }

    async fn find_active_bid_by_amount(
        &self,
        auction_id: AuctionId,
        amount: Amount,
    ) -> Result<Option<BidRow>, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bids
            .values()
            .find(|b| {
                b.auction_id == auction_id && b.amount == amount && b.status == BidStatus::Active
            })
            .cloned())
    }

    async fn update_bid_amount(
        &self,
        bid_id: BidId,
        round_number: u32,
        amount: Amount,
        now: Timestamp,
    ) -> Result<BidRow, EngineError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .bids
            .get_mut(&bid_id)
            .ok_or(EngineError::NotFound("bid"))?;
        row.amount = amount;
        row.round_number = round_number as i32;
        row.updated_at = now;
        row.version += 1;
        Ok(row.clone())
    }

    async fn list_bids_for_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
    ) -> Result<Vec<BidRow>, EngineError> {
        let state = self.state.lock().unwrap();
        let mut bids: Vec<BidRow> = state
            .bids
            .values()
            .filter(|b| b.auction_id == auction_id && b.round_number == round_number as i32)
            .cloned()
            .collect();
        bids.sort_by(|a, b| {
            b.amount
                .cmp(&a.amount)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(bids)
    }

    async fn list_user_bids(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
    ) -> Result<Vec<BidRow>, EngineError> {
        let state = self.state.lock().unwrap();
        let mut bids: Vec<BidRow> = state
            .bids
            .values()
            .filter(|b| b.auction_id == auction_id && b.bidder_id == user_id)
            .cloned()
            .collect();
        bids.sort_by(|a, b| {
            a.round_number
                .cmp(&b.round_number)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(bids)
    }

    async fn set_bid_statuses(&self, ids: &[BidId], status: BidStatus) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        for id in ids {
            if let Some(row) = state.bids.get_mut(id) {
                row.status = status;
            }
        }
        Ok(())
    }

    async fn mark_bid_won(
        &self,
        bid_id: BidId,
        won_round: u32,
        item_number: u32,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .bids
            .get_mut(&bid_id)
            .ok_or(EngineError::NotFound("bid"))?;
        row.status = BidStatus::Won;
        row.won_round = Some(won_round as i32);
        row.item_number = Some(item_number as i32);
        Ok(())
    }

    async fn get_or_create_account(&self, user_id: UserId) -> Result<AccountRow, EngineError> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .accounts
            .entry(user_id)
            .or_insert(AccountRow {
                user_id,
                available: Amount::ZERO,
                frozen: Amount::ZERO,
                version: 0,
            })
            .clone())
    }

    async fn cas_update_account(
        &self,
        user_id: UserId,
        expected_version: i64,
        new_available: Amount,
        new_frozen: Amount,
    ) -> Result<AccountRow, EngineError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .accounts
            .get_mut(&user_id)
            .ok_or(EngineError::NotFound("account"))?;
        if row.version != expected_version {
            return Err(EngineError::ConcurrencyConflict);
        }
        row.available = new_available;
        row.frozen = new_frozen;
        row.version += 1;
        Ok(row.clone())
    }

    async fn insert_transaction(&self, tx: NewTransaction) -> Result<TransactionRow, EngineError> {
        let row = TransactionRow {
            id: tx.id,
            user_id: tx.user_id,
            kind: tx.kind,
            amount: tx.amount,
            related_auction_id: tx.related_auction_id,
            related_bid_id: tx.related_bid_id,
            created_at: tx.created_at,
        };
        self.state.lock().unwrap().transactions.push(row.clone());
        Ok(row)
    }

    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionRow>, EngineError> {
        let state = self.state.lock().unwrap();
        let mut txs: Vec<TransactionRow> = state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(txs.into_iter().skip(offset).take(limit).collect())
    }
}
