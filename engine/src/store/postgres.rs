use async_trait::async_trait;
use jiff::Timestamp;
use jiff_sqlx::{Timestamp as SqlxTs, ToSqlx};
use payloads::{
    Amount, AuctionConfig, AuctionId, AuctionStatus, BidId, BidStatus, TransactionType, TxId,
    UserId,
};
use sqlx::PgPool;

use crate::error::EngineError;
use crate::model::{AccountRow, AuctionRow, BidRow, RoundRow, TransactionRow};

use super::{NewBid, NewTransaction, Storage};

/// The production storage backend: everything goes through Postgres, with
/// conditional `UPDATE ... WHERE ... = $expected` statements standing in
/// for the row locks the space/auction tables always relied on.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PostgresStore {
    async fn create_auction(
        &self,
        id: AuctionId,
        config: &AuctionConfig,
        now: Timestamp,
    ) -> Result<AuctionRow, EngineError> {
        let config_json = serde_json::to_value(config).map_err(|e| anyhow::anyhow!(e))?;
        sqlx::query_as::<_, AuctionRow>(
            "INSERT INTO auctions (id, config, status, created_at, version)
             VALUES ($1, $2, $3, $4, 0)
             RETURNING id, config, status, created_at, version",
        )
        .bind(id)
        .bind(config_json)
        .bind(AuctionStatus::Pending)
        .bind(now.to_sqlx())
        .fetch_one(&self.pool)
        .await
        .map_err(EngineError::from)
    }

    async fn get_auction(&self, id: AuctionId) -> Result<AuctionRow, EngineError> {
        sqlx::query_as::<_, AuctionRow>("SELECT * FROM auctions WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => EngineError::NotFound("auction"),
                e => EngineError::from(e),
            })
    }

    async fn update_auction_status(
        &self,
        id: AuctionId,
        expected: AuctionStatus,
        new_status: AuctionStatus,
    ) -> Result<AuctionRow, EngineError> {
        let row = sqlx::query_as::<_, AuctionRow>(
            "UPDATE auctions SET status = $1, version = version + 1
             WHERE id = $2 AND status = $3
             RETURNING id, config, status, created_at, version",
        )
        .bind(new_status)
        .bind(id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(EngineError::ConcurrencyConflict)
    }

    async fn bump_auction_version(
        &self,
        id: AuctionId,
        expected_version: i64,
    ) -> Result<AuctionRow, EngineError> {
        let row = sqlx::query_as::<_, AuctionRow>(
            "UPDATE auctions SET version = version + 1
             WHERE id = $1 AND status = 'active' AND version = $2
             RETURNING id, config, status, created_at, version",
        )
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(EngineError::ConcurrencyConflict)
    }

    async fn create_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        items_count: u32,
        start_time: Timestamp,
        end_time: Timestamp,
    ) -> Result<RoundRow, EngineError> {
        sqlx::query_as::<_, RoundRow>(
            "INSERT INTO auction_rounds
                (auction_id, round_number, items_count, start_time, end_time,
                 actual_end_time, extensions_count, completed)
             VALUES ($1, $2, $3, $4, $5, NULL, 0, false)
             RETURNING *",
        )
        .bind(auction_id)
        .bind(round_number as i32)
        .bind(items_count as i32)
        .bind(start_time.to_sqlx())
        .bind(end_time.to_sqlx())
        .fetch_one(&self.pool)
        .await
        .map_err(EngineError::from)
    }

    async fn get_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
    ) -> Result<RoundRow, EngineError> {
        sqlx::query_as::<_, RoundRow>(
            "SELECT * FROM auction_rounds WHERE auction_id = $1 AND round_number = $2",
        )
        .bind(auction_id)
        .bind(round_number as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => EngineError::NotFound("round"),
            e => EngineError::from(e),
        })
    }

    async fn list_rounds(&self, auction_id: AuctionId) -> Result<Vec<RoundRow>, EngineError> {
        sqlx::query_as::<_, RoundRow>(
            "SELECT * FROM auction_rounds WHERE auction_id = $1 ORDER BY round_number",
        )
        .bind(auction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::from)
    }

    async fn extend_round_end_time(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        expected_extensions_count: u32,
        new_end_time: Timestamp,
    ) -> Result<RoundRow, EngineError> {
        let row = sqlx::query_as::<_, RoundRow>(
            "UPDATE auction_rounds
             SET end_time = $1, extensions_count = extensions_count + 1
             WHERE auction_id = $2 AND round_number = $3 AND extensions_count = $4
             RETURNING *",
        )
        .bind(new_end_time.to_sqlx())
        .bind(auction_id)
        .bind(round_number as i32)
        .bind(expected_extensions_count as i32)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(EngineError::ConcurrencyConflict)
    }

    async fn complete_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        actual_end_time: Timestamp,
    ) -> Result<RoundRow, EngineError> {
        let row = sqlx::query_as::<_, RoundRow>(
            "UPDATE auction_rounds
             SET completed = true, actual_end_time = $1
             WHERE auction_id = $2 AND round_number = $3 AND completed = false
             RETURNING *",
        )
        .bind(actual_end_time.to_sqlx())
        .bind(auction_id)
        .bind(round_number as i32)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(EngineError::ConcurrencyConflict)
    }

    async fn insert_bid(&self, bid: NewBid) -> Result<BidRow, EngineError> {
        sqlx::query_as::<_, BidRow>(
            "INSERT INTO bids
                (id, auction_id, round_number, bidder_id, amount, status,
                 created_at, updated_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7, 0)
             RETURNING *",
        )
        .bind(bid.id)
        .bind(bid.auction_id)
        .bind(bid.round_number as i32)
        .bind(bid.bidder_id)
        .bind(bid.amount)
        .bind(BidStatus::Active)
        .bind(bid.created_at.to_sqlx())
        .fetch_one(&self.pool)
        .await
        .map_err(EngineError::from)
    }

    async fn get_active_bid(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
    ) -> Result<Option<BidRow>, EngineError> {
        sqlx::query_as::<_, BidRow>(
            "SELECT * FROM bids WHERE auction_id = $1 AND bidder_id = $2 AND status = $3",
        )
        .bind(auction_id)
        .bind(user_id)
        .bind(BidStatus::Active)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::from)
    }

    async fn find_active_bid_by_amount(
        &self,
        auction_id: AuctionId,
        amount: Amount,
    ) -> Result<Option<BidRow>, EngineError> {
        sqlx::query_as::<_, BidRow>(
            "SELECT * FROM bids WHERE auction_id = $1 AND amount = $2 AND status = $3",
        )
        .bind(auction_id)
        .bind(amount)
        .bind(BidStatus::Active)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::from)
    }

    async fn update_bid_amount(
        &self,
        bid_id: BidId,
        round_number: u32,
        amount: Amount,
        now: Timestamp,
    ) -> Result<BidRow, EngineError> {
        sqlx::query_as::<_, BidRow>(
            "UPDATE bids SET amount = $1, round_number = $2, updated_at = $3,
                 version = version + 1
             WHERE id = $4
             RETURNING *",
        )
        .bind(amount)
        .bind(round_number as i32)
        .bind(now.to_sqlx())
        .bind(bid_id)
        .fetch_one(&self.pool)
        .await
        .map_err(EngineError::from)
    }

    async fn list_bids_for_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
    ) -> Result<Vec<BidRow>, EngineError> {
        sqlx::query_as::<_, BidRow>(
            "SELECT * FROM bids WHERE auction_id = $1 AND round_number = $2
             ORDER BY amount DESC, created_at ASC",
        )
        .bind(auction_id)
        .bind(round_number as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::from)
    }

    async fn list_user_bids(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
    ) -> Result<Vec<BidRow>, EngineError> {
        sqlx::query_as::<_, BidRow>(
            "SELECT * FROM bids WHERE auction_id = $1 AND bidder_id = $2
             ORDER BY round_number, created_at",
        )
        .bind(auction_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::from)
    }

    async fn set_bid_statuses(&self, ids: &[BidId], status: BidStatus) -> Result<(), EngineError> {
        let raw_ids: Vec<uuid::Uuid> = ids.iter().map(|id| id.0).collect();
        sqlx::query("UPDATE bids SET status = $1 WHERE id = ANY($2)")
            .bind(status)
            .bind(&raw_ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_bid_won(
        &self,
        bid_id: BidId,
        won_round: u32,
        item_number: u32,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE bids SET status = $1, won_round = $2, item_number = $3 WHERE id = $4",
        )
        .bind(BidStatus::Won)
        .bind(won_round as i32)
        .bind(item_number as i32)
        .bind(bid_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_or_create_account(&self, user_id: UserId) -> Result<AccountRow, EngineError> {
        if let Some(row) = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(row);
        }
        // Racing creators fall back to a re-read on the unique violation,
        // the same pattern currency::create_account_tx always used.
        let inserted = sqlx::query_as::<_, AccountRow>(
            "INSERT INTO accounts (user_id, available, frozen, version)
             VALUES ($1, 0, 0, 0)
             ON CONFLICT (user_id) DO NOTHING
             RETURNING *",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = inserted {
            return Ok(row);
        }
        sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(EngineError::from)
    }

    async fn cas_update_account(
        &self,
        user_id: UserId,
        expected_version: i64,
        new_available: Amount,
        new_frozen: Amount,
    ) -> Result<AccountRow, EngineError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "UPDATE accounts
             SET available = $1, frozen = $2, version = version + 1
             WHERE user_id = $3 AND version = $4
             RETURNING *",
        )
        .bind(new_available)
        .bind(new_frozen)
        .bind(user_id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(EngineError::ConcurrencyConflict)
    }

    async fn insert_transaction(&self, tx: NewTransaction) -> Result<TransactionRow, EngineError> {
        sqlx::query_as::<_, TransactionRow>(
            "INSERT INTO transactions
                (id, user_id, kind, amount, related_auction_id, related_bid_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(tx.id)
        .bind(tx.user_id)
        .bind(tx.kind)
        .bind(tx.amount)
        .bind(tx.related_auction_id)
        .bind(tx.related_bid_id)
        .bind(tx.created_at.to_sqlx())
        .fetch_one(&self.pool)
        .await
        .map_err(EngineError::from)
    }

    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionRow>, EngineError> {
        sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::from)
    }
}
