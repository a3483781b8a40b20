use jiff::{Span, Timestamp};
use serde::{Deserialize, Serialize};

use crate::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "use-sqlx", sqlx(type_name = "auction_status", rename_all = "snake_case"))]
pub enum AuctionStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "use-sqlx", sqlx(type_name = "bid_status", rename_all = "snake_case"))]
pub enum BidStatus {
    Active,
    Won,
    Lost,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "use-sqlx", sqlx(type_name = "transaction_type", rename_all = "snake_case"))]
pub enum TransactionType {
    Deposit,
    Withdraw,
    BidFreeze,
    BidUnfreeze,
    BidWin,
    BidRefund,
}

/// One entry of `Auction.roundsConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundConfig {
    pub items_count: u32,
    pub duration_minutes: i64,
}

/// `Auction.settings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionSettings {
    pub min_bid_amount: Amount,
    pub min_bid_increment: Amount,
    pub anti_sniping_window_minutes: i64,
    pub anti_sniping_extension_minutes: i64,
    pub max_extensions: u32,
}

/// Input to `createAuction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionConfig {
    pub rounds_config: Vec<RoundConfig>,
    pub settings: AuctionSettings,
}

impl AuctionConfig {
    /// Boundary validation rules for auction creation.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.rounds_config.is_empty() {
            return Err("rounds must be non-empty");
        }
        for round in &self.rounds_config {
            if round.items_count < 1 {
                return Err("itemsCount must be >= 1");
            }
            if round.duration_minutes < 1 {
                return Err("durationMinutes must be >= 1");
            }
        }
        if !self.settings.min_bid_amount.is_valid() {
            return Err("minBidAmount must be a positive integer <= 10^15");
        }
        Ok(())
    }

    pub fn total_items(&self) -> u64 {
        self.rounds_config.iter().map(|r| r.items_count as u64).sum()
    }
}

/// `RoundState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundState {
    pub round_number: u32,
    pub items_count: u32,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub actual_end_time: Option<Timestamp>,
    pub extensions_count: u32,
    pub completed: bool,
    pub winner_bid_ids: Vec<crate::BidId>,
}

impl RoundState {
    pub fn time_left(&self, now: Timestamp) -> Span {
        if now >= self.end_time {
            Span::new()
        } else {
            now.until(self.end_time).unwrap_or_default()
        }
    }
}
