//! `placeBid` — validates and commits a bid under the per-auction lock,
//! then updates the leaderboard and applies the anti-sniping extension.
//! Grounded on `create_bid_tx`'s validation order (space/round
//! availability, timing window, eligibility, credit check, insert) with
//! credit checking replaced by [`crate::ledger::Ledger::freeze_for_bid`].

use std::time::Duration;

use jiff::{Span, ToSpan};
use payloads::{AuctionId, AuctionStatus, BidId, Event, NewBidEvent, UserId};
use uuid::Uuid;

use crate::broadcast::Broadcast;
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::leaderboard::{Cache, LeaderboardEntry};
use crate::lock::Lock;
use crate::model::BidRow;
use crate::store::{with_timeout, NewBid, Storage};
use crate::time::TimeSource;

pub struct BidEngine<'a> {
    pub store: &'a dyn Storage,
    pub cache: &'a dyn Cache,
    pub lock: &'a dyn Lock,
    pub broadcast: &'a Broadcast,
    pub time_source: &'a TimeSource,
    pub storage_timeout: Duration,
    pub lock_timeout: Duration,
}

impl<'a> BidEngine<'a> {
    /// Validates and commits a bid, logging the accept/reject outcome.
    #[tracing::instrument(skip(self), fields(auction_id = %auction_id, user_id = %user_id, amount = %amount))]
    pub async fn place_bid(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
        amount: payloads::Amount,
    ) -> Result<BidRow, EngineError> {
        if !amount.is_valid() {
            tracing::warn!("bid rejected: invalid amount");
            return Err(EngineError::InvalidAmount);
        }

        let _guard = tokio::time::timeout(self.lock_timeout, self.lock.acquire(auction_id))
            .await
            .map_err(|_| EngineError::Timeout)??;

        let result = with_timeout(
            self.storage_timeout,
            self.place_bid_locked(auction_id, user_id, amount),
        )
        .await;

        match &result {
            Ok(bid) => tracing::info!(bid_id = %bid.id, "bid accepted"),
            Err(e) => tracing::warn!(error = %e, "bid rejected"),
        }
        result
    }

    async fn place_bid_locked(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
        amount: payloads::Amount,
    ) -> Result<BidRow, EngineError> {
        let auction = self.store.get_auction(auction_id).await?;
        if auction.status != AuctionStatus::Active {
            return Err(EngineError::AuctionNotBiddable);
        }
        // Confirms the auction is still live and bumps its version, the same
        // CAS step `completeRound`'s settlement performs; a concurrent
        // `completeRound` that slipped in just before this lock was acquired
        // loses the race here instead of silently accepting a bid against a
        // round that's already closing out.
        let auction = self
            .store
            .bump_auction_version(auction_id, auction.version)
            .await?;

        let round_number = current_round_number(self.store, auction_id).await?;
        let round = self.store.get_round(auction_id, round_number).await?;
        let now = self.time_source.now();
        if round.completed || now >= round.end_time {
            return Err(EngineError::AuctionNotBiddable);
        }

        let existing = self.store.get_active_bid(auction_id, user_id).await?;
        let min_bid_amount = auction.config.settings.min_bid_amount;
        let min_increment = auction.config.settings.min_bid_increment;

        let prev_amount = existing.as_ref().map(|b| b.amount).unwrap_or(payloads::Amount::ZERO);
        let floor = match &existing {
            Some(_) => prev_amount
                .checked_add(min_increment)
                .ok_or(EngineError::InvalidAmount)?,
            None => min_bid_amount,
        };
        if amount < floor {
            return Err(EngineError::BelowMinimum);
        }

        // Reject a duplicate amount before any funds move. Race-free because
        // bid placement on this auction is serialized under the per-auction
        // lock held by `place_bid`; the unique index on
        // `bids{auctionId, amount, status=active}` remains as a last-resort
        // invariant, guarded below by a compensating unfreeze.
        if let Some(dup) = self.store.find_active_bid_by_amount(auction_id, amount).await? {
            if existing.as_ref().map(|b| b.id) != Some(dup.id) {
                return Err(EngineError::DuplicateAmount);
            }
        }

        let delta = amount.0 - prev_amount.0;

        let ledger = Ledger::new_with_timeout(self.store, self.time_source, self.storage_timeout);
        let placeholder_bid_id = existing.as_ref().map(|b| b.id).unwrap_or(BidId(Uuid::new_v4()));
        ledger
            .freeze_for_bid(user_id, auction_id, placeholder_bid_id, delta)
            .await?;

        let bid = match existing {
            Some(b) => match self
                .store
                .update_bid_amount(b.id, round_number, amount, now)
                .await
            {
                Ok(bid) => bid,
                Err(e) => {
                    ledger
                        .freeze_for_bid(user_id, auction_id, placeholder_bid_id, -delta)
                        .await
                        .ok();
                    return Err(duplicate_amount_on_conflict(e));
                }
            },
            None => match self
                .store
                .insert_bid(NewBid {
                    id: placeholder_bid_id,
                    auction_id,
                    round_number,
                    bidder_id: user_id,
                    amount,
                    created_at: now,
                })
                .await
            {
                Ok(bid) => bid,
                Err(e) => {
                    ledger
                        .freeze_for_bid(user_id, auction_id, placeholder_bid_id, -delta)
                        .await
                        .ok();
                    return Err(duplicate_amount_on_conflict(e));
                }
            },
        };

        self.cache
            .upsert(
                auction_id,
                round_number,
                LeaderboardEntry {
                    bid_id: bid.id,
                    bidder_id: user_id,
                    amount: amount.0,
                    created_at: bid.created_at,
                },
            )
            .await;

        self.broadcast.publish(Event::NewBid(NewBidEvent {
            auction_id,
            round_number,
            bid_id: bid.id,
            user_id,
            amount,
            placed_at: now,
        }));

        let active_bids_count = self.cache.count_round(auction_id, round_number).await as u32;
        let top_amount = self
            .cache
            .top_k(auction_id, round_number, 1, 0)
            .await
            .first()
            .map(|e| payloads::Amount(e.amount));
        self.broadcast.publish(Event::AuctionUpdate(payloads::AuctionUpdateEvent {
            auction_id,
            current_round: round_number,
            active_bids_count,
            top_amount,
        }));

        self.maybe_extend_for_anti_sniping(auction_id, round_number, now).await?;

        Ok(bid)
    }

    async fn maybe_extend_for_anti_sniping(
        &self,
        auction_id: AuctionId,
        round_number: u32,
        now: jiff::Timestamp,
    ) -> Result<(), EngineError> {
        let auction = self.store.get_auction(auction_id).await?;
        let round = self.store.get_round(auction_id, round_number).await?;
        let settings = &auction.config.settings;

        if round.extensions_count >= settings.max_extensions as i32 {
            return Ok(());
        }

        let window_secs = (settings.anti_sniping_window_minutes * 60) as f64;
        let remaining_secs = round
            .end_time
            .since(now)
            .map_err(|e| EngineError::UnexpectedError(anyhow::anyhow!(e)))?
            .total(jiff::Unit::Second)
            .map_err(|e| EngineError::UnexpectedError(anyhow::anyhow!(e)))?;
        if remaining_secs > window_secs {
            return Ok(());
        }

        let extension: Span = settings.anti_sniping_extension_minutes.minutes();
        let new_end_time = round
            .end_time
            .checked_add(extension)
            .map_err(|e| EngineError::UnexpectedError(anyhow::anyhow!(e)))?;

        let updated = self
            .store
            .extend_round_end_time(
                auction_id,
                round_number,
                round.extensions_count as u32,
                new_end_time,
            )
            .await?;

        self.broadcast.publish(Event::AntiSniping(payloads::AntiSnipingEvent {
            auction_id,
            round_number,
            extension_minutes: settings.anti_sniping_extension_minutes,
            new_end_time,
            extensions_count: updated.extensions_count as u32,
        }));

        Ok(())
    }
}

/// Translates the store's generic unique-violation error into the
/// surface-level `DuplicateAmount` kind for the
/// `bids{auctionId, amount, status=active}` constraint.
fn duplicate_amount_on_conflict(err: EngineError) -> EngineError {
    match err {
        EngineError::NotUnique(_) => EngineError::DuplicateAmount,
        other => other,
    }
}

/// The round currently accepting bids: the highest round number that
/// hasn't completed yet.
pub async fn current_round_number(
    store: &dyn Storage,
    auction_id: AuctionId,
) -> Result<u32, EngineError> {
    let rounds = store.list_rounds(auction_id).await?;
    rounds
        .iter()
        .find(|r| !r.completed)
        .map(|r| r.round_number as u32)
        .ok_or(EngineError::AuctionNotBiddable)
}
