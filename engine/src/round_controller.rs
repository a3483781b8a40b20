//! `completeRound` — settles a round's winners and refunds its losers,
//! then either arms the next round or closes the auction. Grounded on
//! `update_round_space_results_within_tx`: read the winners, pay them out,
//! advance `currentRound` or mark the auction finished, emit the
//! lifecycle events.

use std::time::Duration;

use payloads::{
    AuctionCompleteEvent, AuctionId, AuctionStatus, Event, RoundCompleteEvent, RoundStartEvent,
};

use crate::broadcast::Broadcast;
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::leaderboard::{Cache, LeaderboardEntry};
use crate::lock::Lock;
use crate::store::{with_timeout, Storage};
use crate::time::TimeSource;

pub struct RoundController<'a> {
    pub store: &'a dyn Storage,
    pub cache: &'a dyn Cache,
    pub lock: &'a dyn Lock,
    pub broadcast: &'a Broadcast,
    pub time_source: &'a TimeSource,
    pub storage_timeout: Duration,
    pub lock_timeout: Duration,
}

impl<'a> RoundController<'a> {
    /// Forces settlement even if the round hasn't reached its `end_time`,
    /// for administrative calls; the Timer Service always calls this only
    /// after expiry.
    #[tracing::instrument(skip(self), fields(auction_id = %auction_id, force))]
    pub async fn complete_round(
        &self,
        auction_id: AuctionId,
        force: bool,
    ) -> Result<(), EngineError> {
        let _guard = tokio::time::timeout(self.lock_timeout, self.lock.acquire(auction_id))
            .await
            .map_err(|_| EngineError::Timeout)??;

        with_timeout(self.storage_timeout, self.complete_round_locked(auction_id, force)).await
    }

    async fn complete_round_locked(
        &self,
        auction_id: AuctionId,
        force: bool,
    ) -> Result<(), EngineError> {
        let auction = self.store.get_auction(auction_id).await?;
        // A finished auction has no current round left to complete; a
        // duplicate call (or a racing timer tick) after the final round
        // already settled is a no-op rather than `AuctionNotBiddable`.
        if auction.status != AuctionStatus::Active {
            return Ok(());
        }
        let round_number = crate::bid_engine::current_round_number(self.store, auction_id).await?;
        let round = self.store.get_round(auction_id, round_number).await?;
        let now = self.time_source.now();

        if !force && now < round.end_time {
            return Ok(());
        }
        if round.completed {
            return Ok(());
        }

        let all_bids = self.store.list_bids_for_round(auction_id, round_number).await?;
        let winners = self
            .winners_for_round(auction_id, round_number, round.items_count, &all_bids)
            .await;
        let winner_ids: std::collections::HashSet<_> =
            winners.iter().map(|w| w.bid_id).collect();

        let ledger = Ledger::new_with_timeout(self.store, self.time_source, self.storage_timeout);
        let mut round_winners = Vec::with_capacity(winners.len());
        for (i, winner) in winners.iter().enumerate() {
            let item_number = (i + 1) as u32;
            self.store
                .mark_bid_won(winner.bid_id, round_number, item_number)
                .await?;
            ledger
                .confirm_win(
                    winner.bidder_id,
                    auction_id,
                    winner.bid_id,
                    payloads::Amount(winner.amount),
                )
                .await?;
            round_winners.push(payloads::RoundWinner {
                bid_id: winner.bid_id,
                user_id: winner.bidder_id,
                amount: payloads::Amount(winner.amount),
                item_number,
            });
        }

        for bid in all_bids
            .iter()
            .filter(|b| b.status == payloads::BidStatus::Active && !winner_ids.contains(&b.id))
        {
            self.store
                .set_bid_statuses(&[bid.id], payloads::BidStatus::Refunded)
                .await?;
            ledger
                .refund(bid.bidder_id, auction_id, bid.id, bid.amount)
                .await?;
        }

        self.store.complete_round(auction_id, round_number, now).await?;
        // Part of settlement's CAS discipline, the same step `placeBid`
        // takes at the start of its own lock window; guards against a racing
        // timer tick re-entering `complete_round_locked` for an auction
        // whose version moved since this call read it.
        self.store
            .bump_auction_version(auction_id, auction.version)
            .await?;
        self.cache.clear_round(auction_id, round_number).await;

        self.broadcast.publish(Event::RoundComplete(RoundCompleteEvent {
            auction_id,
            round_number,
            winners: round_winners,
        }));

        let total_rounds = auction.config.rounds_config.len() as u32;
        if round_number + 1 < total_rounds {
            let next_round_number = round_number + 1;
            let next_config = &auction.config.rounds_config[next_round_number as usize];
            let duration: jiff::Span =
                jiff::ToSpan::minutes(next_config.duration_minutes);
            let end_time = now
                .checked_add(duration)
                .map_err(|e| EngineError::UnexpectedError(anyhow::anyhow!(e)))?;
            self.store
                .create_round(
                    auction_id,
                    next_round_number,
                    next_config.items_count,
                    now,
                    end_time,
                )
                .await?;

            self.broadcast.publish(Event::RoundStart(RoundStartEvent {
                auction_id,
                round_number: next_round_number,
                items_count: next_config.items_count,
                start_time: now,
                end_time,
            }));
        } else {
            self.store
                .update_auction_status(auction_id, AuctionStatus::Active, AuctionStatus::Completed)
                .await?;

            let mut winner_user_ids = Vec::new();
            for completed_round in self.store.list_rounds(auction_id).await? {
                let round_bids = self
                    .store
                    .list_bids_for_round(auction_id, completed_round.round_number as u32)
                    .await?;
                winner_user_ids.extend(
                    round_bids
                        .into_iter()
                        .filter(|b| b.status == payloads::BidStatus::Won)
                        .map(|b| b.bidder_id),
                );
            }

            self.broadcast.publish(Event::AuctionComplete(AuctionCompleteEvent {
                auction_id,
                total_rounds,
                winner_user_ids,
                finished_at: now,
            }));
        }

        Ok(())
    }

    /// Top-`items_count` bids for the round, preferring the Leaderboard
    /// Index's cache and falling back to the Bid Store's own ordering
    /// (`amount DESC, created_at ASC`, the same tie-break the cache's score
    /// encodes) when the cache comes back short of what the store's active
    /// bids can supply — a cold-start/drift reconciliation.
    async fn winners_for_round(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        items_count: i32,
        all_bids: &[crate::model::BidRow],
    ) -> Vec<LeaderboardEntry> {
        let k = items_count as usize;
        let winners = self.cache.top_k(auction_id, round_number, k, 0).await;

        let active_count = all_bids
            .iter()
            .filter(|b| b.status == payloads::BidStatus::Active)
            .count();
        if winners.len() >= k.min(active_count) {
            return winners;
        }

        tracing::warn!(
            auction_id = %auction_id,
            round_number,
            cache_hits = winners.len(),
            active_bids = active_count,
            "leaderboard cache came back short of the bid store; reconciling from storage"
        );
        all_bids
            .iter()
            .filter(|b| b.status == payloads::BidStatus::Active)
            .take(k)
            .map(|b| LeaderboardEntry {
                bid_id: b.id,
                bidder_id: b.bidder_id,
                amount: b.amount.0,
                created_at: b.created_at,
            })
            .collect()
    }
}
