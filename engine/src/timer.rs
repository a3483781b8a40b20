//! Timer Service: ticks once per second per active round, delegating
//! expired rounds to the Round Controller and emitting a `countdown`
//! event for every round still in flight. Grounded on `Scheduler::run`'s
//! `tokio::time::interval` tick loop, generalized from a single
//! database-wide sweep into the same sweep driven through the
//! [`Storage`]/[`Cache`] trait boundary.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use payloads::{AuctionId, CountdownEvent, Event};

use crate::broadcast::Broadcast;
use crate::leaderboard::Cache;
use crate::lock::Lock;
use crate::round_controller::RoundController;
use crate::store::Storage;
use crate::telemetry::log_error;
use crate::time::TimeSource;

pub struct Timer {
    store: Arc<dyn Storage>,
    cache: Arc<dyn Cache>,
    lock: Arc<dyn Lock>,
    broadcast: Arc<Broadcast>,
    time_source: TimeSource,
    tick_interval: Duration,
    storage_timeout: Duration,
    lock_timeout: Duration,
    known_auctions: Mutex<HashSet<AuctionId>>,
}

impl Timer {
    pub fn new(
        store: Arc<dyn Storage>,
        cache: Arc<dyn Cache>,
        lock: Arc<dyn Lock>,
        broadcast: Arc<Broadcast>,
        time_source: TimeSource,
        tick_interval: Duration,
        storage_timeout: Duration,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            lock,
            broadcast,
            time_source,
            tick_interval,
            storage_timeout,
            lock_timeout,
            known_auctions: Mutex::new(HashSet::new()),
        }
    }

    pub fn track(&self, auction_id: AuctionId) {
        self.known_auctions.lock().unwrap().insert(auction_id);
    }

    pub fn untrack(&self, auction_id: AuctionId) {
        self.known_auctions.lock().unwrap().remove(&auction_id);
    }

    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                log_error(&e);
            }
        }
    }

    /// Sweeps every active auction's current round once: fires a
    /// `countdown` event if within the anti-sniping window, or hands the
    /// round to the Round Controller if its `end_time` has passed.
    #[tracing::instrument(skip(self), err)]
    pub async fn tick(&self) -> anyhow::Result<()> {
        let now = self.time_source.now();
        let active_auctions = self.list_active_auction_ids().await?;

        let controller = RoundController {
            store: self.store.as_ref(),
            cache: self.cache.as_ref(),
            lock: self.lock.as_ref(),
            broadcast: &self.broadcast,
            time_source: &self.time_source,
            storage_timeout: self.storage_timeout,
            lock_timeout: self.lock_timeout,
        };

        for auction_id in active_auctions {
            let round_number =
                match crate::bid_engine::current_round_number(self.store.as_ref(), auction_id).await
                {
                    Ok(n) => n,
                    Err(_) => continue,
                };
            let round = match self.store.get_round(auction_id, round_number).await {
                Ok(r) => r,
                Err(_) => continue,
            };

            if now >= round.end_time {
                if let Err(e) = controller.complete_round(auction_id, false).await {
                    tracing::warn!(auction_id = %auction_id, error = %e, "round completion failed this tick, will retry next tick");
                }
                continue;
            }

            let remaining_secs = round
                .end_time
                .since(now)?
                .total(jiff::Unit::Second)?;
            let seconds_remaining = remaining_secs.ceil().max(0.0) as i64;
            self.broadcast.publish(Event::Countdown(CountdownEvent {
                auction_id,
                round_number,
                seconds_remaining,
                server_time: now,
            }));
        }

        Ok(())
    }

    /// A real deployment would push this through a dedicated
    /// `list_active_auctions` storage query; the engine instead tracks the
    /// small working set of auctions currently in play in memory, since
    /// the scheduler only ever needs ids, not full rows.
    async fn list_active_auction_ids(&self) -> anyhow::Result<Vec<AuctionId>> {
        Ok(self
            .known_auctions
            .lock()
            .unwrap()
            .iter()
            .copied()
            .collect())
    }
}
