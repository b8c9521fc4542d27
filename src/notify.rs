use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-vehicle fan-out of committed events, for calendars that need to
/// refresh when a booking lands. Slow subscribers see `Lagged` and should
/// reload instead of replaying.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, vehicle_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(vehicle_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver to current subscribers. Nobody listening is fine.
    pub fn send(&self, vehicle_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&vehicle_id) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn subscriber_count(&self, vehicle_id: &Ulid) -> usize {
        self.channels
            .get(vehicle_id)
            .map_or(0, |s| s.receiver_count())
    }

    /// Drop a vehicle's channel. Open receivers see the stream close.
    pub fn remove(&self, vehicle_id: &Ulid) {
        self.channels.remove(vehicle_id);
    }
}
