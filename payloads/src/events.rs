use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::{Amount, AuctionId, BidId, UserId};

/// Payload for the `new-bid` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBidEvent {
    pub auction_id: AuctionId,
    pub round_number: u32,
    pub bid_id: BidId,
    pub user_id: UserId,
    pub amount: Amount,
    pub placed_at: Timestamp,
}

/// Payload for the `auction-update` event: broadcast whenever the leaderboard
/// changes shape (new bid accepted, round rolled over).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionUpdateEvent {
    pub auction_id: AuctionId,
    pub current_round: u32,
    pub active_bids_count: u32,
    pub top_amount: Option<Amount>,
}

/// Payload for the `countdown` event, emitted on every Timer Service tick
/// for each round still in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountdownEvent {
    pub auction_id: AuctionId,
    pub round_number: u32,
    pub seconds_remaining: i64,
    pub server_time: Timestamp,
}

/// Payload for the `anti-sniping` event, emitted each time a round's end
/// time is pushed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiSnipingEvent {
    pub auction_id: AuctionId,
    pub round_number: u32,
    /// How many minutes `end_time` was just pushed out by.
    pub extension_minutes: i64,
    pub new_end_time: Timestamp,
    /// The round's running `extensionsCount` after this push-out.
    pub extensions_count: u32,
}

/// Payload for the `round-start` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundStartEvent {
    pub auction_id: AuctionId,
    pub round_number: u32,
    pub items_count: u32,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
}

/// One awarded item within a completed round's `winners` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundWinner {
    pub bid_id: BidId,
    pub user_id: UserId,
    pub amount: Amount,
    pub item_number: u32,
}

/// Payload for the `round-complete` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundCompleteEvent {
    pub auction_id: AuctionId,
    pub round_number: u32,
    pub winners: Vec<RoundWinner>,
}

/// Payload for the `auction-complete` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionCompleteEvent {
    pub auction_id: AuctionId,
    pub total_rounds: u32,
    pub winner_user_ids: Vec<UserId>,
    pub finished_at: Timestamp,
}

/// The full event catalog, as fanned out over the
/// `auction:{auctionId}` broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    NewBid(NewBidEvent),
    AuctionUpdate(AuctionUpdateEvent),
    Countdown(CountdownEvent),
    AntiSniping(AntiSnipingEvent),
    RoundStart(RoundStartEvent),
    RoundComplete(RoundCompleteEvent),
    AuctionComplete(AuctionCompleteEvent),
}

impl Event {
    pub fn auction_id(&self) -> AuctionId {
        match self {
            Event::NewBid(e) => e.auction_id,
            Event::AuctionUpdate(e) => e.auction_id,
            Event::Countdown(e) => e.auction_id,
            Event::AntiSniping(e) => e.auction_id,
            Event::RoundStart(e) => e.auction_id,
            Event::RoundComplete(e) => e.auction_id,
            Event::AuctionComplete(e) => e.auction_id,
        }
    }
}
