use std::time::Duration;

use engine::error::EngineError;
use payloads::{Amount, AuctionConfig, AuctionSettings, BidStatus, Event, RoundConfig};

use crate::helpers::{new_user, single_round_config, spawn_app};

/// S1: three items, four bidders, one round. Winners take the top three
/// amounts in descending order; the loser is refunded in full.
#[tokio::test]
async fn s1_top_k_winners_settle_and_loser_is_refunded() {
    let app = spawn_app();
    let config = single_round_config(100, 10, 3);
    let auction_id = app.engine.create_auction(config).await.unwrap().id;
    app.engine.start_auction(auction_id).await.unwrap();

    let u1 = new_user();
    let u2 = new_user();
    let u3 = new_user();
    let u4 = new_user();
    for u in [u1, u2, u3, u4] {
        app.engine.deposit(u, Amount(10_000)).await.unwrap();
    }

    app.engine.place_bid(auction_id, u1, Amount(300)).await.unwrap();
    app.engine.place_bid(auction_id, u2, Amount(200)).await.unwrap();
    app.engine.place_bid(auction_id, u3, Amount(250)).await.unwrap();
    app.engine.place_bid(auction_id, u4, Amount(100)).await.unwrap();

    app.advance_and_complete_round(auction_id).await;

    let b1 = app.engine.get_balance(u1).await.unwrap();
    let b2 = app.engine.get_balance(u2).await.unwrap();
    let b3 = app.engine.get_balance(u3).await.unwrap();
    let b4 = app.engine.get_balance(u4).await.unwrap();

    assert_eq!(b1.available, Amount(9_700));
    assert_eq!(b2.available, Amount(9_800));
    assert_eq!(b3.available, Amount(9_750));
    assert_eq!(b4.available, Amount(10_000));
    for b in [&b1, &b2, &b3, &b4] {
        assert_eq!(b.frozen, Amount::ZERO);
    }

    let u1_bids = app.engine.get_user_bids(auction_id, u1).await.unwrap();
    assert_eq!(u1_bids.len(), 1);
    assert_eq!(u1_bids[0].status, BidStatus::Won);
    assert_eq!(u1_bids[0].item_number, Some(1));

    let u4_bids = app.engine.get_user_bids(auction_id, u4).await.unwrap();
    assert_eq!(u4_bids[0].status, BidStatus::Refunded);
}

/// S2: raising an existing bid leaves exactly one active bid for that user
/// and only freezes the delta, not the new total.
#[tokio::test]
async fn s2_raising_a_bid_freezes_only_the_delta() {
    let app = spawn_app();
    let config = single_round_config(100, 10, 3);
    let auction_id = app.engine.create_auction(config).await.unwrap().id;
    app.engine.start_auction(auction_id).await.unwrap();

    let u1 = new_user();
    app.engine.deposit(u1, Amount(10_000)).await.unwrap();

    app.engine.place_bid(auction_id, u1, Amount(300)).await.unwrap();
    app.engine.place_bid(auction_id, u1, Amount(400)).await.unwrap();

    let bids = app.engine.get_user_bids(auction_id, u1).await.unwrap();
    let active: Vec<_> = bids.iter().filter(|b| b.status == BidStatus::Active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].amount, Amount(400));

    let balance = app.engine.get_balance(u1).await.unwrap();
    assert_eq!(balance.frozen, Amount(400));
    assert_eq!(balance.available, Amount(9_600));

    let freezes: Vec<_> = app
        .engine
        .get_transactions(u1, 100, 0)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.kind == payloads::TransactionType::BidFreeze)
        .collect();
    assert_eq!(freezes.len(), 2);
    assert_eq!(freezes.iter().map(|t| t.amount.0).sum::<i64>(), 400);
}

/// S3: two bidders racing for the same amount — exactly one wins the slot,
/// the other is rejected with `DuplicateAmount`, and the leaderboard only
/// ever shows the one bid that landed.
#[tokio::test]
async fn s3_duplicate_amount_is_rejected_for_the_loser() {
    let app = spawn_app();
    let config = single_round_config(100, 10, 3);
    let auction_id = app.engine.create_auction(config).await.unwrap().id;
    app.engine.start_auction(auction_id).await.unwrap();

    let u1 = new_user();
    let u2 = new_user();
    app.engine.deposit(u1, Amount(10_000)).await.unwrap();
    app.engine.deposit(u2, Amount(10_000)).await.unwrap();

    app.engine.place_bid(auction_id, u1, Amount(500)).await.unwrap();
    let err = app.engine.place_bid(auction_id, u2, Amount(500)).await.unwrap_err();
    assert!(matches!(err, EngineError::DuplicateAmount));

    let leaderboard = app.engine.get_leaderboard(auction_id, 10, 0).await.unwrap();
    assert_eq!(leaderboard.entries.len(), 1);
    assert_eq!(leaderboard.entries[0].bidder_id, u1);

    // The rejected bid must never leave u2's funds stuck mid-freeze.
    let u2_balance = app.engine.get_balance(u2).await.unwrap();
    assert_eq!(u2_balance.frozen, Amount(0));
    assert_eq!(u2_balance.available, Amount(10_000));
}

/// S4: a bid inside the anti-sniping window pushes `endTime` out and bumps
/// `extensionsCount`; once `maxExtensions` is reached, further in-window
/// bids still succeed but stop extending.
#[tokio::test]
async fn s4_anti_sniping_extends_until_the_cap_then_stops() {
    let app = spawn_app();
    let config = AuctionConfig {
        rounds_config: vec![RoundConfig {
            items_count: 5,
            duration_minutes: 5,
        }],
        settings: AuctionSettings {
            min_bid_amount: Amount(100),
            min_bid_increment: Amount(10),
            anti_sniping_window_minutes: 1,
            anti_sniping_extension_minutes: 2,
            max_extensions: 3,
        },
    };
    let auction_id = app.engine.create_auction(config).await.unwrap().id;
    let mut events = app.engine.subscribe(auction_id);
    app.engine.start_auction(auction_id).await.unwrap();

    let bidders: Vec<_> = (0..5).map(|_| new_user()).collect();
    for u in &bidders {
        app.engine.deposit(*u, Amount(10_000)).await.unwrap();
    }

    // Put the clock 30s inside the 1-minute anti-sniping window (round runs
    // 5m). Each accepted bid pushes `endTime` out by the 2-minute extension,
    // so advancing the clock by the same 2 minutes before the next bid keeps
    // it exactly 30s inside the (now later) window too, for as long as
    // extensions keep firing.
    app.time_source.advance(jiff::Span::new().minutes(4).seconds(30));

    let mut amount = 100i64;
    for (i, u) in bidders.iter().enumerate() {
        amount += 10;
        if i > 0 {
            app.time_source.advance(jiff::Span::new().minutes(2));
        }
        // Every bid must be accepted, including the two that land after the
        // extension cap is hit.
        app.engine.place_bid(auction_id, *u, Amount(amount)).await.unwrap();
    }

    let mut extensions = 0u32;
    while let Ok(event) = events.try_recv() {
        if let Event::AntiSniping(e) = event {
            extensions = extensions.max(e.extensions_count);
        }
    }
    assert_eq!(extensions, 3, "extensions must saturate at maxExtensions");
}

/// S5: a user's frozen funds from one auction reduce the available balance
/// they can draw on for a second, unrelated auction.
#[tokio::test]
async fn s5_frozen_balance_is_shared_across_auctions() {
    let app = spawn_app();
    let config_a = single_round_config(100, 10, 1);
    let config_b = single_round_config(100, 10, 1);
    let auction_a = app.engine.create_auction(config_a).await.unwrap().id;
    let auction_b = app.engine.create_auction(config_b).await.unwrap().id;
    app.engine.start_auction(auction_a).await.unwrap();
    app.engine.start_auction(auction_b).await.unwrap();

    let user = new_user();
    app.engine.deposit(user, Amount(1_000)).await.unwrap();

    app.engine.place_bid(auction_a, user, Amount(400)).await.unwrap();
    app.engine.place_bid(auction_b, user, Amount(300)).await.unwrap();

    let balance = app.engine.get_balance(user).await.unwrap();
    assert_eq!(balance.available, Amount(300));
    assert_eq!(balance.frozen, Amount(700));

    let err = app.engine.withdraw(user, Amount(400)).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientBalance));
}

/// S6: subscribers joined before `startAuction` keep receiving `countdown`
/// events as the Timer Service's tick loop advances, without needing to
/// resubscribe.
#[tokio::test(start_paused = true)]
async fn s6_subscribers_receive_countdown_events_every_tick() {
    let app = spawn_app();
    let config = single_round_config(100, 10, 1);
    // Long enough that none of our ticks complete the round.
    let config = AuctionConfig {
        rounds_config: vec![RoundConfig {
            items_count: 1,
            duration_minutes: 10,
        }],
        ..config
    };
    let auction_id = app.engine.create_auction(config).await.unwrap().id;

    let mut rx1 = app.engine.subscribe(auction_id);
    let mut rx2 = app.engine.subscribe(auction_id);
    let mut rx3 = app.engine.subscribe(auction_id);

    app.engine.start_auction(auction_id).await.unwrap();
    let _timer = app.engine.spawn_timer();

    for _ in 0..3 {
        app.time_source.advance(jiff::Span::new().seconds(1));
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
    }

    for rx in [&mut rx1, &mut rx2, &mut rx3] {
        let mut countdowns = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::Countdown(_)) {
                countdowns += 1;
            }
        }
        assert!(countdowns >= 3, "expected at least 3 countdown events, got {countdowns}");
    }
}

/// Invoking `completeRound` twice is idempotent: the second call is a
/// no-op rather than double-paying winners or double-refunding losers.
#[tokio::test]
async fn complete_round_twice_is_idempotent() {
    let app = spawn_app();
    let config = single_round_config(100, 10, 1);
    let auction_id = app.engine.create_auction(config).await.unwrap().id;
    app.engine.start_auction(auction_id).await.unwrap();

    let user = new_user();
    app.engine.deposit(user, Amount(1_000)).await.unwrap();
    app.engine.place_bid(auction_id, user, Amount(200)).await.unwrap();

    app.advance_and_complete_round(auction_id).await;
    let after_first = app.engine.get_balance(user).await.unwrap();

    app.engine.complete_round(auction_id).await.unwrap();
    let after_second = app.engine.get_balance(user).await.unwrap();

    assert_eq!(after_first.available, after_second.available);
    assert_eq!(after_first.frozen, after_second.frozen);
    assert_eq!(after_first.available, Amount(800));
}

/// Cancelling an auction refunds every still-active bid in full.
#[tokio::test]
async fn cancel_auction_restores_balances() {
    let app = spawn_app();
    let config = single_round_config(100, 10, 2);
    let auction_id = app.engine.create_auction(config).await.unwrap().id;
    app.engine.start_auction(auction_id).await.unwrap();

    let u1 = new_user();
    let u2 = new_user();
    app.engine.deposit(u1, Amount(1_000)).await.unwrap();
    app.engine.deposit(u2, Amount(1_000)).await.unwrap();
    app.engine.place_bid(auction_id, u1, Amount(200)).await.unwrap();
    app.engine.place_bid(auction_id, u2, Amount(300)).await.unwrap();

    app.engine.cancel_auction(auction_id).await.unwrap();

    let b1 = app.engine.get_balance(u1).await.unwrap();
    let b2 = app.engine.get_balance(u2).await.unwrap();
    assert_eq!(b1.available, Amount(1_000));
    assert_eq!(b2.available, Amount(1_000));
    assert_eq!(b1.frozen, Amount::ZERO);
    assert_eq!(b2.frozen, Amount::ZERO);
}

/// A round with zero bids completes normally with no winners.
#[tokio::test]
async fn zero_bid_round_completes_with_no_winners() {
    let app = spawn_app();
    // Two rounds so the auction is still active (with a current round to
    // query) after the first, bid-less round settles.
    let config = AuctionConfig {
        rounds_config: vec![
            RoundConfig {
                items_count: 3,
                duration_minutes: 1,
            },
            RoundConfig {
                items_count: 3,
                duration_minutes: 1,
            },
        ],
        settings: single_round_config(100, 10, 3).settings,
    };
    let auction_id = app.engine.create_auction(config).await.unwrap().id;
    let mut events = app.engine.subscribe(auction_id);
    app.engine.start_auction(auction_id).await.unwrap();

    app.advance_and_complete_round(auction_id).await;

    let mut saw_empty_round_complete = false;
    let mut saw_next_round_start = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::RoundComplete(e) if e.round_number == 0 => {
                assert!(e.winners.is_empty());
                saw_empty_round_complete = true;
            }
            Event::RoundStart(e) if e.round_number == 1 => saw_next_round_start = true,
            _ => {}
        }
    }
    assert!(saw_empty_round_complete);
    assert!(saw_next_round_start);

    let leaderboard = app.engine.get_leaderboard(auction_id, 10, 0).await.unwrap();
    assert_eq!(leaderboard.round_number, 1);
    assert!(leaderboard.entries.is_empty());
}

/// A bid placed exactly at `endTime` is rejected, not accepted.
#[tokio::test]
async fn bid_at_exact_end_time_is_rejected() {
    let app = spawn_app();
    let config = single_round_config(100, 10, 1);
    let auction_id = app.engine.create_auction(config).await.unwrap().id;
    app.engine.start_auction(auction_id).await.unwrap();

    // single_round_config uses a 1-minute round.
    app.time_source.advance(jiff::Span::new().minutes(1));

    let user = new_user();
    app.engine.deposit(user, Amount(1_000)).await.unwrap();
    let err = app.engine.place_bid(auction_id, user, Amount(200)).await.unwrap_err();
    assert!(matches!(err, EngineError::AuctionNotBiddable));
}
