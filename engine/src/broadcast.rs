//! Room-scoped event fan-out (`auction:{auctionId}`), using
//! `tokio::sync::broadcast` as the ecosystem-standard primitive for this
//! shape of best-effort, at-most-once push delivery.
//!
//! Each room is actually two channels, not one. `Countdown` fires once a
//! second for every open round and is only ever a UI tick — losing one to
//! a slow subscriber is harmless, the next tick supersedes it. Every other
//! event kind (`NewBid`, `RoundComplete`, `AuctionComplete`, ...) carries
//! state a client can't reconstruct from the next message, so it goes on
//! its own channel with a deeper buffer. Mixing both into one
//! fixed-capacity ring, as an earlier version of this room did, meant a
//! burst of countdown ticks from several open rounds could lap and evict
//! a `RoundComplete` before a slow subscriber got to it.

use std::collections::HashMap;
use std::sync::Mutex;

use payloads::{AuctionId, Event};
use tokio::sync::broadcast::{self, error::RecvError, Receiver, Sender};

/// Deliberately small: a missed tick is superseded by the next one a
/// second later, so there's no point buffering more than a couple.
const COUNTDOWN_CAPACITY: usize = 8;
/// Deep enough that a subscriber reading at a normal pace never loses a
/// `NewBid`/`RoundComplete`/`AuctionComplete` to a burst of bids.
const GUARANTEED_CAPACITY: usize = 256;

struct Room {
    guaranteed: Sender<Event>,
    countdown: Sender<Event>,
}

#[derive(Default)]
pub struct Broadcast {
    rooms: Mutex<HashMap<AuctionId, Room>>,
}

/// A subscriber's view of a room: two `tokio::sync::broadcast::Receiver`s
/// merged so callers see a single event stream without having to know
/// about the split. `recv`/`try_recv` always drain `guaranteed` first so
/// a burst of countdown ticks can't starve a pending state-changing event
/// when both are ready.
pub struct EventReceiver {
    guaranteed: Receiver<Event>,
    countdown: Receiver<Event>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<Event, RecvError> {
        tokio::select! {
            biased;
            ev = self.guaranteed.recv() => ev,
            ev = self.countdown.recv() => ev,
        }
    }

    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        match self.guaranteed.try_recv() {
            Ok(ev) => Ok(ev),
            Err(broadcast::error::TryRecvError::Empty) => self.countdown.try_recv(),
            Err(e) => Err(e),
        }
    }
}

impl Broadcast {
    pub fn new() -> Self {
        Self::default()
    }

    fn room_for(&self, auction_id: AuctionId) -> (Sender<Event>, Sender<Event>) {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms.entry(auction_id).or_insert_with(|| Room {
            guaranteed: broadcast::channel(GUARANTEED_CAPACITY).0,
            countdown: broadcast::channel(COUNTDOWN_CAPACITY).0,
        });
        (room.guaranteed.clone(), room.countdown.clone())
    }

    /// Subscribe to `auction:{auctionId}`. A room is created lazily on
    /// first subscribe or first publish.
    pub fn subscribe(&self, auction_id: AuctionId) -> EventReceiver {
        let (guaranteed, countdown) = self.room_for(auction_id);
        EventReceiver {
            guaranteed: guaranteed.subscribe(),
            countdown: countdown.subscribe(),
        }
    }

    /// Publish an event to its auction's room. A no-op if nobody's
    /// subscribed (`send` failing with no receivers is expected, not an
    /// error).
    pub fn publish(&self, event: Event) {
        let (guaranteed, countdown) = self.room_for(event.auction_id());
        let sender = match &event {
            Event::Countdown(_) => countdown,
            _ => guaranteed,
        };
        let _ = sender.send(event);
    }
}
