//! A real-time, multi-round sealed-bid auction engine exposed as a plain
//! Rust library: no HTTP or WebSocket framing, just the operations a
//! caller needs to run auctions end to end. Wire those surfaces on top of
//! [`Engine`] the way this crate's own integration tests drive it
//! directly.

pub mod bid_engine;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod ledger;
pub mod leaderboard;
pub mod lock;
pub mod model;
pub mod round_controller;
pub mod store;
pub mod telemetry;
pub mod time;
pub mod timer;

use std::sync::Arc;
use std::time::Duration;

use payloads::{
    AuctionConfig, AuctionId, AuctionStatus, AuctionView, BalanceView, BidStatus, BidView, Event,
    LeaderboardEntryView, LeaderboardSnapshot, TransactionView, UserId,
};
use uuid::Uuid;

use bid_engine::BidEngine;
use broadcast::{Broadcast, EventReceiver};
use error::EngineError;
use leaderboard::Cache;
use ledger::Ledger;
use lock::Lock;
use round_controller::RoundController;
use store::Storage;
use time::TimeSource;
use timer::Timer;

/// The whole of the auction engine's external interface, backed by
/// whichever [`Storage`]/[`Cache`]/[`Lock`] implementations are wired in
/// at construction.
pub struct Engine {
    store: Arc<dyn Storage>,
    cache: Arc<dyn Cache>,
    lock: Arc<dyn Lock>,
    broadcast: Arc<Broadcast>,
    time_source: TimeSource,
    timer: Arc<Timer>,
    storage_timeout: Duration,
    lock_timeout: Duration,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Storage>,
        cache: Arc<dyn Cache>,
        lock: Arc<dyn Lock>,
        time_source: TimeSource,
        tick_interval: Duration,
    ) -> Self {
        Self::with_timeouts(
            store,
            cache,
            lock,
            time_source,
            tick_interval,
            Duration::from_secs(5),
            Duration::from_secs(2),
        )
    }

    /// Same as [`Engine::new`], but with explicit storage/lock deadlines
    /// instead of the defaults — wired from [`config::EngineConfig`]
    /// in a real deployment.
    pub fn with_timeouts(
        store: Arc<dyn Storage>,
        cache: Arc<dyn Cache>,
        lock: Arc<dyn Lock>,
        time_source: TimeSource,
        tick_interval: Duration,
        storage_timeout: Duration,
        lock_timeout: Duration,
    ) -> Self {
        let broadcast = Arc::new(Broadcast::new());
        let timer = Arc::new(Timer::new(
            store.clone(),
            cache.clone(),
            lock.clone(),
            broadcast.clone(),
            time_source.clone(),
            tick_interval,
            storage_timeout,
            lock_timeout,
        ));
        Self {
            store,
            cache,
            lock,
            broadcast,
            time_source,
            timer,
            storage_timeout,
            lock_timeout,
        }
    }

    /// Spawns the Timer Service's background tick loop. The caller is
    /// expected to keep the returned handle alive for the engine's
    /// lifetime, the way `main` spawns the scheduler before serving
    /// requests.
    pub fn spawn_timer(&self) -> tokio::task::JoinHandle<()> {
        let timer = self.timer.clone();
        tokio::spawn(async move { timer.run().await })
    }

    fn bid_engine(&self) -> BidEngine<'_> {
        BidEngine {
            store: self.store.as_ref(),
            cache: self.cache.as_ref(),
            lock: self.lock.as_ref(),
            broadcast: &self.broadcast,
            time_source: &self.time_source,
            storage_timeout: self.storage_timeout,
            lock_timeout: self.lock_timeout,
        }
    }

    fn round_controller(&self) -> RoundController<'_> {
        RoundController {
            store: self.store.as_ref(),
            cache: self.cache.as_ref(),
            lock: self.lock.as_ref(),
            broadcast: &self.broadcast,
            time_source: &self.time_source,
            storage_timeout: self.storage_timeout,
            lock_timeout: self.lock_timeout,
        }
    }

    fn ledger(&self) -> Ledger<'_> {
        Ledger::new_with_timeout(self.store.as_ref(), &self.time_source, self.storage_timeout)
    }

    pub async fn create_auction(&self, config: AuctionConfig) -> Result<AuctionView, EngineError> {
        config
            .validate()
            .map_err(|_| EngineError::InvalidAmount)?;
        let id = AuctionId(Uuid::new_v4());
        let now = self.time_source.now();
        self.store.create_auction(id, &config, now).await?;
        self.auction_view(id).await
    }

    pub async fn start_auction(&self, auction_id: AuctionId) -> Result<AuctionView, EngineError> {
        let auction = self.store.get_auction(auction_id).await?;
        self.store
            .update_auction_status(auction_id, AuctionStatus::Pending, AuctionStatus::Active)
            .await?;

        let now = self.time_source.now();
        let first = &auction.config.rounds_config[0];
        let duration: jiff::Span = jiff::ToSpan::minutes(first.duration_minutes);
        let end_time = now
            .checked_add(duration)
            .map_err(|e| EngineError::UnexpectedError(anyhow::anyhow!(e)))?;
        self.store
            .create_round(auction_id, 0, first.items_count, now, end_time)
            .await?;

        self.timer.track(auction_id);

        self.broadcast
            .publish(Event::RoundStart(payloads::RoundStartEvent {
                auction_id,
                round_number: 0,
                items_count: first.items_count,
                start_time: now,
                end_time,
            }));
        self.auction_view(auction_id).await
    }

    /// Builds the `Auction` read view: the auction row plus its currently
    /// in-flight (or most recently settled) round, with `winnerBidIds`
    /// populated once that round has completed.
    async fn auction_view(&self, auction_id: AuctionId) -> Result<AuctionView, EngineError> {
        let auction = self.store.get_auction(auction_id).await?;
        let rounds = self.store.list_rounds(auction_id).await?;
        let current_round = match rounds.into_iter().last() {
            Some(round) => {
                let winner_bid_ids = if round.completed {
                    self.store
                        .list_bids_for_round(auction_id, round.round_number as u32)
                        .await?
                        .into_iter()
                        .filter(|b| b.status == BidStatus::Won)
                        .map(|b| b.id)
                        .collect()
                } else {
                    Vec::new()
                };
                Some(round.into_state(winner_bid_ids))
            }
            None => None,
        };
        Ok(AuctionView {
            id: auction.id,
            status: auction.status,
            config: auction.config,
            current_round,
            created_at: auction.created_at,
        })
    }

    pub async fn cancel_auction(&self, auction_id: AuctionId) -> Result<AuctionView, EngineError> {
        let auction = self.store.get_auction(auction_id).await?;
        self.store
            .update_auction_status(auction_id, auction.status, AuctionStatus::Cancelled)
            .await?;
        self.timer.untrack(auction_id);

        let ledger = self.ledger();
        if let Ok(round_number) =
            bid_engine::current_round_number(self.store.as_ref(), auction_id).await
        {
            for bid in self
                .store
                .list_bids_for_round(auction_id, round_number)
                .await?
            {
                if bid.status == payloads::BidStatus::Active {
                    self.store
                        .set_bid_statuses(&[bid.id], payloads::BidStatus::Refunded)
                        .await?;
                    ledger
                        .refund(bid.bidder_id, auction_id, bid.id, bid.amount)
                        .await?;
                }
            }
            self.cache.clear_round(auction_id, round_number).await;
        }
        self.auction_view(auction_id).await
    }

    pub async fn place_bid(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
        amount: payloads::Amount,
    ) -> Result<BidView, EngineError> {
        let bid = self.bid_engine().place_bid(auction_id, user_id, amount).await?;
        Ok(bid.into_view())
    }

    /// Forces round completion regardless of `end_time`; the Timer
    /// Service calls the equivalent non-forced path itself every tick.
    /// Never returns `NotYet` — `force = true` bypasses exactly the check
    /// that would otherwise produce it; the Timer Service's own unforced
    /// sweep (`timer::Timer::tick`) is the path that can legitimately skip
    /// a round that hasn't expired yet.
    pub async fn complete_round(&self, auction_id: AuctionId) -> Result<AuctionView, EngineError> {
        self.round_controller().complete_round(auction_id, true).await?;
        self.auction_view(auction_id).await
    }

    pub async fn get_leaderboard(
        &self,
        auction_id: AuctionId,
        k: usize,
        offset: usize,
    ) -> Result<LeaderboardSnapshot, EngineError> {
        let round_number =
            bid_engine::current_round_number(self.store.as_ref(), auction_id).await?;
        let entries = self.cache.top_k(auction_id, round_number, k, offset).await;
        let total_count = self.cache.count_round(auction_id, round_number).await;
        Ok(LeaderboardSnapshot {
            auction_id,
            round_number,
            entries: entries
                .into_iter()
                .enumerate()
                .map(|(i, e)| LeaderboardEntryView {
                    rank: (offset + i + 1) as u32,
                    bid_id: e.bid_id,
                    bidder_id: e.bidder_id,
                    amount: payloads::Amount(e.amount),
                    placed_at: e.created_at,
                })
                .collect(),
            total_count,
        })
    }

    /// A single bidder's standing in the current round, without paging
    /// through `get_leaderboard`'s `top_k`. `None` if they have no active
    /// bid in the round.
    pub async fn get_entry(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
    ) -> Result<Option<LeaderboardEntryView>, EngineError> {
        let round_number =
            bid_engine::current_round_number(self.store.as_ref(), auction_id).await?;
        Ok(self
            .cache
            .get_entry(auction_id, round_number, user_id)
            .await
            .map(|(entry, rank)| LeaderboardEntryView {
                rank: rank as u32,
                bid_id: entry.bid_id,
                bidder_id: entry.bidder_id,
                amount: payloads::Amount(entry.amount),
                placed_at: entry.created_at,
            }))
    }

    pub async fn get_user_bids(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
    ) -> Result<Vec<BidView>, EngineError> {
        let bids = self.store.list_user_bids(auction_id, user_id).await?;
        Ok(bids.into_iter().map(|b| b.into_view()).collect())
    }

    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: payloads::Amount,
    ) -> Result<BalanceView, EngineError> {
        let account = self.ledger().deposit(user_id, amount).await?;
        Ok(BalanceView {
            user_id,
            available: account.available,
            frozen: account.frozen,
        })
    }

    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: payloads::Amount,
    ) -> Result<BalanceView, EngineError> {
        let account = self.ledger().withdraw(user_id, amount).await?;
        Ok(BalanceView {
            user_id,
            available: account.available,
            frozen: account.frozen,
        })
    }

    pub async fn get_balance(&self, user_id: UserId) -> Result<BalanceView, EngineError> {
        let account = self.ledger().get_balance(user_id).await?;
        Ok(BalanceView {
            user_id,
            available: account.available,
            frozen: account.frozen,
        })
    }

    pub async fn get_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionView>, EngineError> {
        let txs = self.ledger().get_transactions(user_id, limit, offset).await?;
        Ok(txs
            .into_iter()
            .map(|t| TransactionView {
                id: t.id,
                user_id: t.user_id,
                kind: t.kind,
                amount: t.amount,
                related_auction_id: t.related_auction_id,
                related_bid_id: t.related_bid_id,
                created_at: t.created_at,
            })
            .collect())
    }

    /// Subscribe to `auction:{auctionId}`'s event stream.
    pub fn subscribe(&self, auction_id: AuctionId) -> EventReceiver {
        self.broadcast.subscribe(auction_id)
    }
}
