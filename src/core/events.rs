use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::time::Duration;

use crate::core::geo::{GeoPoint, TileIndex};
use crate::tiles::source::ProviderId;

/// Change notifications delivered to subscribers in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    PositionChanged(GeoPoint),
    ZoomChanged { zoom: f64 },
    ProviderChanged(ProviderId),
    /// Position moved by a drag gesture
    MapDrag,
    TileLoadStart,
    ProgressChanged { tiles_remaining: usize },
    TileLoadComplete { elapsed: Duration },
    /// A provider reported that it has no data for this tile
    EmptyTile { index: TileIndex, provider: ProviderId },
    TileLoadFailed { index: TileIndex, provider: ProviderId, error: String },
    /// The persistent cache backend failed; tiles keep loading from the network
    CacheFault(String),
    /// Something visible changed, take a new snapshot
    Invalidate,
}

/// Fan-out of [`MapEvent`]s to any number of channel subscribers.
///
/// Each subscriber gets its own unbounded channel, so one slow consumer
/// never blocks the workers and every subscriber sees every event once.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<MapEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<MapEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, dropping disconnected ones
    pub fn emit(&self, event: MapEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
