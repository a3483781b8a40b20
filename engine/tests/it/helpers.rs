use std::sync::Arc;
use std::time::Duration;

use engine::lock::InProcessLock;
use engine::store::memory::MemoryStore;
use engine::leaderboard::InMemoryCache;
use engine::time::TimeSource;
use engine::Engine;
use jiff::Timestamp;
use payloads::{Amount, AuctionConfig, AuctionSettings, RoundConfig, UserId};
use uuid::Uuid;

pub struct TestApp {
    pub engine: Engine,
    pub time_source: TimeSource,
}

pub fn spawn_app() -> TestApp {
    let time_source = TimeSource::new(Timestamp::now());
    let engine = Engine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(InMemoryCache::new()),
        Arc::new(InProcessLock::new()),
        time_source.clone(),
        Duration::from_secs(1),
    );
    TestApp { engine, time_source }
}

pub fn new_user() -> UserId {
    UserId(Uuid::new_v4())
}

pub fn single_round_config(min_bid_amount: i64, min_bid_increment: i64, items_count: u32) -> AuctionConfig {
    AuctionConfig {
        rounds_config: vec![RoundConfig {
            items_count,
            duration_minutes: 1,
        }],
        settings: AuctionSettings {
            min_bid_amount: Amount(min_bid_amount),
            min_bid_increment: Amount(min_bid_increment),
            anti_sniping_window_minutes: 0,
            anti_sniping_extension_minutes: 1,
            max_extensions: 0,
        },
    }
}

impl TestApp {
    /// Advance mock time past the end of whatever round is active, then
    /// force-complete it — the deterministic equivalent of letting the
    /// Timer Service's tick loop discover the expiry itself.
    pub async fn advance_and_complete_round(&self, auction_id: payloads::AuctionId) {
        self.time_source.advance(jiff::Span::new().minutes(2));
        self.engine.complete_round(auction_id).await.unwrap();
    }
}
