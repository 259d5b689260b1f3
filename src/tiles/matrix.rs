//! In-memory tile store shared between the renderer and the loader workers.
//!
//! A single `parking_lot::RwLock` guards the whole map. Every write replaces
//! one (tile, layer) slot while holding the write lock, so readers never see
//! a half-updated overlay list. Nothing is evicted unless the owner asks.

use fxhash::FxHashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::core::geo::TileIndex;
use crate::tiles::image::TileImage;

/// Registration position of a provider layer, 0 being the bottom one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub usize);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer {}", self.0)
    }
}

/// Content of one (tile, layer) slot
#[derive(Debug, Clone, PartialEq)]
pub enum TileSlot {
    Image(TileImage),
    /// The provider has no data here; don't ask again
    Empty,
}

#[derive(Debug, Clone)]
struct Entry {
    slot: TileSlot,
    loaded_at: Instant,
}

type Layers = Vec<Option<Entry>>;

#[derive(Debug, Default)]
pub struct TileMatrix {
    tiles: RwLock<FxHashMap<TileIndex, Layers>>,
}

impl TileMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loaded overlays at `index`, bottom layer first. Known-empty layers
    /// are skipped.
    pub fn get(&self, index: TileIndex) -> Vec<TileImage> {
        self.read().overlays(index)
    }

    pub fn put(&self, index: TileIndex, layer: LayerId, image: TileImage) {
        self.put_if(index, layer, TileSlot::Image(image), || true);
    }

    pub fn mark_empty(&self, index: TileIndex, layer: LayerId) {
        self.put_if(index, layer, TileSlot::Empty, || true);
    }

    /// Store `slot` only if `admit` still holds once the write lock is held.
    /// Returns whether the slot was written.
    pub fn put_if<F>(&self, index: TileIndex, layer: LayerId, slot: TileSlot, admit: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut tiles = self.tiles.write();
        if !admit() {
            return false;
        }
        let layers = tiles.entry(index).or_default();
        if layers.len() <= layer.0 {
            layers.resize(layer.0 + 1, None);
        }
        layers[layer.0] = Some(Entry {
            slot,
            loaded_at: Instant::now(),
        });
        true
    }

    /// Drop every slot of `layer`. Returns the number of tiles left without
    /// any layer, which are removed entirely.
    pub fn clear_provider(&self, layer: LayerId) -> usize {
        self.remove_where(|l, _| l == layer.0)
    }

    pub fn evict_older_than(&self, age: Duration) -> usize {
        match Instant::now().checked_sub(age) {
            Some(cutoff) => self.evict_loaded_before(cutoff),
            None => 0,
        }
    }

    pub fn evict_loaded_before(&self, cutoff: Instant) -> usize {
        self.remove_where(|_, entry| entry.loaded_at < cutoff)
    }

    /// Keep only tiles within `keep` zoom levels of `zoom`
    pub fn retain_levels(&self, zoom: u8, keep: u8) -> usize {
        let mut tiles = self.tiles.write();
        let before = tiles.len();
        tiles.retain(|index, _| index.zoom.abs_diff(zoom) <= keep);
        before - tiles.len()
    }

    fn remove_where<F>(&self, mut pred: F) -> usize
    where
        F: FnMut(usize, &Entry) -> bool,
    {
        let mut tiles = self.tiles.write();
        let before = tiles.len();
        tiles.retain(|_, layers| {
            for (l, slot) in layers.iter_mut().enumerate() {
                if slot.as_ref().map_or(false, |entry| pred(l, entry)) {
                    *slot = None;
                }
            }
            layers.iter().any(Option::is_some)
        });
        before - tiles.len()
    }

    /// Whether any layer of `index` is loaded or known-empty
    pub fn contains(&self, index: TileIndex) -> bool {
        self.tiles.read().contains_key(&index)
    }

    pub fn has_layer(&self, index: TileIndex, layer: LayerId) -> bool {
        self.slot(index, layer).is_some()
    }

    pub fn is_known_empty(&self, index: TileIndex, layer: LayerId) -> bool {
        matches!(self.slot(index, layer), Some(TileSlot::Empty))
    }

    /// Every one of the first `layers` layers is loaded or known-empty
    pub fn is_complete(&self, index: TileIndex, layers: usize) -> bool {
        let tiles = self.tiles.read();
        tiles.get(&index).map_or(false, |slots| {
            slots.len() >= layers && slots[..layers].iter().all(Option::is_some)
        })
    }

    pub fn slot(&self, index: TileIndex, layer: LayerId) -> Option<TileSlot> {
        let tiles = self.tiles.read();
        tiles
            .get(&index)
            .and_then(|layers| layers.get(layer.0))
            .and_then(|entry| entry.as_ref())
            .map(|entry| entry.slot.clone())
    }

    pub fn len(&self) -> usize {
        self.tiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.tiles.write().clear();
    }

    /// Hold the read lock for a batch of lookups, e.g. one frame's snapshot
    pub fn read(&self) -> MatrixView<'_> {
        MatrixView {
            tiles: self.tiles.read(),
        }
    }
}

/// Consistent read-only view of the matrix; holds the read lock until dropped
pub struct MatrixView<'a> {
    tiles: RwLockReadGuard<'a, FxHashMap<TileIndex, Layers>>,
}

impl MatrixView<'_> {
    pub fn overlays(&self, index: TileIndex) -> Vec<TileImage> {
        self.tiles
            .get(&index)
            .map(|layers| {
                layers
                    .iter()
                    .flatten()
                    .filter_map(|entry| match &entry.slot {
                        TileSlot::Image(image) => Some(image.clone()),
                        TileSlot::Empty => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, index: TileIndex) -> bool {
        self.tiles.contains_key(&index)
    }

    /// Every one of the first `layers` layers reported no data
    pub fn is_known_empty(&self, index: TileIndex, layers: usize) -> bool {
        self.tiles.get(&index).map_or(false, |slots| {
            layers > 0
                && slots.len() >= layers
                && slots[..layers]
                    .iter()
                    .all(|entry| matches!(entry, Some(Entry { slot: TileSlot::Empty, .. })))
        })
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::image::DecodedTile;
    use std::sync::Arc;
    use std::thread;

    fn image(tag: u8) -> TileImage {
        TileImage::new(DecodedTile::Encoded(vec![tag]))
    }

    #[test]
    fn test_overlays_follow_layer_order() {
        let matrix = TileMatrix::new();
        let index = TileIndex::new(3, 1, 2);
        matrix.put(index, LayerId(1), image(2));
        matrix.put(index, LayerId(0), image(1));

        let overlays = matrix.get(index);
        assert_eq!(overlays.len(), 2);
        assert_eq!(overlays[0].data().bytes(), &[1]);
        assert_eq!(overlays[1].data().bytes(), &[2]);
        assert!(matrix.get(TileIndex::new(3, 0, 0)).is_empty());
    }

    #[test]
    fn test_known_empty_counts_as_present() {
        let matrix = TileMatrix::new();
        let index = TileIndex::new(5, 3, 3);
        matrix.mark_empty(index, LayerId(0));

        assert!(matrix.contains(index));
        assert!(matrix.is_known_empty(index, LayerId(0)));
        assert!(matrix.is_complete(index, 1));
        assert!(!matrix.is_complete(index, 2));
        assert!(matrix.get(index).is_empty());
    }

    #[test]
    fn test_put_if_respects_predicate() {
        let matrix = TileMatrix::new();
        let index = TileIndex::new(1, 0, 0);
        assert!(!matrix.put_if(index, LayerId(0), TileSlot::Image(image(1)), || false));
        assert!(matrix.is_empty());
        assert!(matrix.put_if(index, LayerId(0), TileSlot::Image(image(1)), || true));
        assert_eq!(matrix.len(), 1);
    }

    #[test]
    fn test_clear_provider_keeps_other_layers() {
        let matrix = TileMatrix::new();
        let shared = TileIndex::new(2, 1, 1);
        let only_top = TileIndex::new(2, 2, 2);
        matrix.put(shared, LayerId(0), image(1));
        matrix.put(shared, LayerId(1), image(2));
        matrix.put(only_top, LayerId(1), image(3));

        assert_eq!(matrix.clear_provider(LayerId(1)), 1);
        assert_eq!(matrix.len(), 1);
        assert!(matrix.has_layer(shared, LayerId(0)));
        assert!(!matrix.has_layer(shared, LayerId(1)));
    }

    #[test]
    fn test_age_eviction() {
        let matrix = TileMatrix::new();
        matrix.put(TileIndex::new(4, 0, 0), LayerId(0), image(1));
        let cutoff = Instant::now();
        thread::sleep(Duration::from_millis(5));
        matrix.put(TileIndex::new(4, 1, 0), LayerId(0), image(2));

        assert_eq!(matrix.evict_loaded_before(cutoff), 1);
        assert!(matrix.contains(TileIndex::new(4, 1, 0)));
        assert_eq!(matrix.evict_older_than(Duration::from_secs(3600)), 0);
    }

    #[test]
    fn test_retain_levels() {
        let matrix = TileMatrix::new();
        for zoom in 0..10 {
            matrix.put(TileIndex::new(zoom, 0, 0), LayerId(0), image(zoom));
        }
        assert_eq!(matrix.retain_levels(5, 2), 5);
        assert!(matrix.contains(TileIndex::new(3, 0, 0)));
        assert!(!matrix.contains(TileIndex::new(2, 0, 0)));
        assert!(matrix.contains(TileIndex::new(7, 0, 0)));
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let matrix = Arc::new(TileMatrix::new());
        let writers = 8;
        let per_writer = 50;

        let mut handles = Vec::new();
        for w in 0..writers {
            let matrix = Arc::clone(&matrix);
            handles.push(thread::spawn(move || {
                for i in 0..per_writer {
                    let index = TileIndex::new(10, w, i);
                    matrix.put(index, LayerId(0), image(0));
                    matrix.put(index, LayerId(1), image(1));
                }
            }));
        }
        for _ in 0..4 {
            let matrix = Arc::clone(&matrix);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let view = matrix.read();
                    for w in 0..writers {
                        for i in 0..per_writer {
                            let overlays = view.overlays(TileIndex::new(10, w, i));
                            // layers land in order, so a reader sees 0, [0] or [0, 1]
                            for (layer, overlay) in overlays.iter().enumerate() {
                                assert_eq!(overlay.data().bytes(), &[layer as u8]);
                            }
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(matrix.len(), (writers * per_writer) as usize);
    }
}
