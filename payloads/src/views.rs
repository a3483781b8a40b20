use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::{
    Amount, AuctionConfig, AuctionId, AuctionStatus, BidId, BidStatus, RoundState,
    TransactionType, TxId, UserId,
};

/// Returned by `createAuction`/`startAuction`/`cancelAuction` and by any
/// read that needs the current auction snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionView {
    pub id: AuctionId,
    pub status: AuctionStatus,
    pub config: AuctionConfig,
    pub current_round: Option<RoundState>,
    pub created_at: Timestamp,
}

/// Returned by `placeBid` and `getUserBids`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidView {
    pub id: BidId,
    pub auction_id: AuctionId,
    pub round_number: u32,
    pub bidder_id: UserId,
    pub amount: Amount,
    pub status: BidStatus,
    pub won_round: Option<u32>,
    pub item_number: Option<u32>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub version: i64,
}

/// One row of `getLeaderboard`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntryView {
    pub rank: u32,
    pub bid_id: BidId,
    pub bidder_id: UserId,
    pub amount: Amount,
    pub placed_at: Timestamp,
}

/// Full result of `getLeaderboard`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardSnapshot {
    pub auction_id: AuctionId,
    pub round_number: u32,
    pub entries: Vec<LeaderboardEntryView>,
    /// Total number of entries indexed for this round (the cache's `card`),
    /// independent of the `limit`/`offset` window `entries` was sliced from.
    pub total_count: usize,
}

/// Returned by `getBalance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceView {
    pub user_id: UserId,
    pub available: Amount,
    pub frozen: Amount,
}

/// One row of `getTransactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    pub id: TxId,
    pub user_id: UserId,
    pub kind: TransactionType,
    pub amount: Amount,
    pub related_auction_id: Option<AuctionId>,
    pub related_bid_id: Option<BidId>,
    pub created_at: Timestamp,
}
