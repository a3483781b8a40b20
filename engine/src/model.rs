//! Row types returned by [`crate::store::Storage`]. These mirror the shape
//! of the Postgres tables one-for-one (the way the store's `FromRow`
//! structs always have) and are converted into `payloads` view types at
//! the [`crate::Engine`] boundary.

use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTs;
use payloads::{
    Amount, AuctionConfig, AuctionId, AuctionStatus, BidId, BidStatus, RoundState,
    TransactionType, TxId, UserId,
};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct AuctionRow {
    pub id: AuctionId,
    #[sqlx(json)]
    pub config: AuctionConfig,
    pub status: AuctionStatus,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
    /// Optimistic-concurrency counter, bumped by
    /// `Storage::bump_auction_version` at the start of `placeBid` and
    /// during `completeRound`'s settlement.
    pub version: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct RoundRow {
    pub auction_id: AuctionId,
    pub round_number: i32,
    pub items_count: i32,
    #[sqlx(try_from = "SqlxTs")]
    pub start_time: Timestamp,
    #[sqlx(try_from = "SqlxTs")]
    pub end_time: Timestamp,
    #[sqlx(try_from = "Option<SqlxTs>")]
    pub actual_end_time: Option<Timestamp>,
    pub extensions_count: i32,
    pub completed: bool,
}

impl RoundRow {
    pub fn time_left(&self, now: Timestamp) -> jiff::Span {
        if now >= self.end_time {
            jiff::Span::new()
        } else {
            now.until(self.end_time).unwrap_or_default()
        }
    }

    pub fn into_state(self, winner_bid_ids: Vec<BidId>) -> RoundState {
        RoundState {
            round_number: self.round_number as u32,
            items_count: self.items_count as u32,
            start_time: self.start_time,
            end_time: self.end_time,
            actual_end_time: self.actual_end_time,
            extensions_count: self.extensions_count as u32,
            completed: self.completed,
            winner_bid_ids,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BidRow {
    pub id: BidId,
    pub auction_id: AuctionId,
    pub round_number: i32,
    pub bidder_id: UserId,
    pub amount: Amount,
    pub status: BidStatus,
    pub won_round: Option<i32>,
    pub item_number: Option<i32>,
    /// Stamped once, at insert, and never rewritten by a later raise — the
    /// timestamp the leaderboard score's earliness tie-break encodes.
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
    /// Re-stamped by `update_bid_amount` on every raise; equals
    /// `created_at` for a bid that has never been raised.
    #[sqlx(try_from = "SqlxTs")]
    pub updated_at: Timestamp,
    /// Bumped by `update_bid_amount`; starts at 0 on insert.
    pub version: i64,
}

impl BidRow {
    pub fn into_view(self) -> payloads::BidView {
        payloads::BidView {
            id: self.id,
            auction_id: self.auction_id,
            round_number: self.round_number as u32,
            bidder_id: self.bidder_id,
            amount: self.amount,
            status: self.status,
            won_round: self.won_round.map(|r| r as u32),
            item_number: self.item_number.map(|n| n as u32),
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        }
    }
}

/// One leg of the double-entry ledger for a user's auction balance.
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub user_id: UserId,
    pub available: Amount,
    pub frozen: Amount,
    pub version: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    pub id: TxId,
    pub user_id: UserId,
    pub kind: TransactionType,
    pub amount: Amount,
    pub related_auction_id: Option<AuctionId>,
    pub related_bid_id: Option<BidId>,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
}
