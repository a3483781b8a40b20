//! The Leaderboard Index: a per-`(auctionId, roundNumber)` sorted set keyed
//! on bidder, ordered by a composite score that lets higher amounts win and
//! earlier bids break ties, so top-K can be served directly off the sorted
//! structure instead of re-sorting on every read.
//!
//! Exposed as the [`Cache`] trait the way [`crate::store::Storage`] is the
//! only contract on persistence: a production deployment could back this
//! with Redis sorted sets, but the in-memory backend here is what every
//! scheduler tick and `placeBid` call actually exercises today.

use async_trait::async_trait;
use jiff::Timestamp;
use payloads::{AuctionId, BidId, UserId};

const MAX_TS_MILLIS: i128 = 9_999_999_999_999;

/// Composite leaderboard score: `amount * 10^13 + (MAX_TS - createdAtMillis)`.
/// Uses `i128` so the `10^15`-bounded `amount` never overflows the way a
/// 64-bit score would for amounts above roughly `9.2 * 10^5`.
pub fn encode_score(amount: i64, created_at: Timestamp) -> i128 {
    let millis = created_at.as_millisecond() as i128;
    (amount as i128) * 10i128.pow(13) + (MAX_TS_MILLIS - millis)
}

#[derive(Debug, Clone)]
pub struct LeaderboardEntry {
    pub bid_id: BidId,
    pub bidder_id: UserId,
    pub amount: i64,
    pub created_at: Timestamp,
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Removes any existing entry for `bidder_id` in this round, then
    /// inserts the new one.
    async fn upsert(&self, auction_id: AuctionId, round_number: u32, entry: LeaderboardEntry);

    async fn top_k(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        k: usize,
        offset: usize,
    ) -> Vec<LeaderboardEntry>;

    /// `card` — the number of entries currently indexed for this round,
    /// used to report `totalCount` alongside a `topK` page.
    async fn count_round(&self, auction_id: AuctionId, round_number: u32) -> usize;

    /// `getEntry` — a single bidder's standing within the round: their
    /// entry plus its 1-indexed rank, without paging through `top_k`.
    async fn get_entry(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        bidder_id: UserId,
    ) -> Option<(LeaderboardEntry, usize)>;

    async fn clear_round(&self, auction_id: AuctionId, round_number: u32);
}

#[cfg(feature = "test-utils")]
#[derive(Default)]
pub struct InMemoryCache {
    rounds: std::sync::Mutex<
        std::collections::HashMap<(AuctionId, u32), Vec<LeaderboardEntry>>,
    >,
}

#[cfg(feature = "test-utils")]
impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "test-utils")]
#[async_trait]
impl Cache for InMemoryCache {
    async fn upsert(&self, auction_id: AuctionId, round_number: u32, entry: LeaderboardEntry) {
        let mut rounds = self.rounds.lock().unwrap();
        let entries = rounds.entry((auction_id, round_number)).or_default();
        entries.retain(|e| e.bidder_id != entry.bidder_id);
        entries.push(entry);
        entries.sort_by(|a, b| {
            encode_score(b.amount, b.created_at).cmp(&encode_score(a.amount, a.created_at))
        });
    }

    async fn top_k(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        k: usize,
        offset: usize,
    ) -> Vec<LeaderboardEntry> {
        let rounds = self.rounds.lock().unwrap();
        rounds
            .get(&(auction_id, round_number))
            .map(|entries| entries.iter().skip(offset).take(k).cloned().collect())
            .unwrap_or_default()
    }

    async fn count_round(&self, auction_id: AuctionId, round_number: u32) -> usize {
        self.rounds
            .lock()
            .unwrap()
            .get(&(auction_id, round_number))
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    async fn get_entry(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        bidder_id: UserId,
    ) -> Option<(LeaderboardEntry, usize)> {
        let rounds = self.rounds.lock().unwrap();
        let entries = rounds.get(&(auction_id, round_number))?;
        entries
            .iter()
            .position(|e| e.bidder_id == bidder_id)
            .map(|i| (entries[i].clone(), i + 1))
    }

    async fn clear_round(&self, auction_id: AuctionId, round_number: u32) {
        self.rounds.lock().unwrap().remove(&(auction_id, round_number));
    }
}
