//! Background tile loading.
//!
//! A fixed pool of worker threads drains a shared priority queue. Each task
//! walks the provider layer stack and, per layer, tries the matrix, then the
//! persistent cache, then the provider. Every viewport change bumps a
//! generation counter: queued tasks that are no longer wanted are dropped,
//! in-flight tasks that are still wanted are re-tagged, and everything else
//! notices it is stale at its next check and quietly stops.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::thread::{self, JoinHandle};

use crate::core::config::TileLoadingConfig;
use crate::core::events::{EventBus, MapEvent};
use crate::core::geo::TileIndex;
use crate::prelude::{Arc, Duration, HashMap, HashSet, Instant};
use crate::tiles::cache::{CacheKey, CacheProvider};
use crate::tiles::image::{DecodedTile, TileDecoder, TileImage};
use crate::tiles::matrix::{LayerId, TileMatrix, TileSlot};
use crate::tiles::source::MapProvider;
use crate::{MapError, Result};

/// Priority class of a wanted tile (higher number = higher priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TilePriority {
    /// Visible area one zoom level up, feeds substitutes
    ParentLevel = 1,
    /// Margin ring around the visible area
    Prefetch = 10,
    /// Currently visible tiles
    Visible = 100,
}

/// One entry of the wanted set handed to [`TileLoader::schedule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRequest {
    pub index: TileIndex,
    pub priority: TilePriority,
    /// Squared pixel distance from the view center, nearer loads first
    pub distance: u64,
}

impl TileRequest {
    pub fn new(index: TileIndex, priority: TilePriority, distance: u64) -> Self {
        Self {
            index,
            priority,
            distance,
        }
    }
}

/// A queued request together with the generation it is wanted for
#[derive(Debug, Clone)]
struct TileTask {
    index: TileIndex,
    priority: TilePriority,
    distance: u64,
    generation: u64,
    sequence: u64,
    /// Generation this request is currently wanted for; bumped in place
    /// when a newer viewport still wants the tile
    ticket: Arc<AtomicU64>,
}

impl PartialEq for TileTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TileTask {}

impl PartialOrd for TileTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TileTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Newest generation first, then priority class, then nearest to the
        // view center, then submission order
        self.generation
            .cmp(&other.generation)
            .then(self.priority.cmp(&other.priority))
            .then(other.distance.cmp(&self.distance))
            .then(other.sequence.cmp(&self.sequence))
    }
}

type LayerStack = Arc<[Arc<dyn MapProvider>]>;

struct QueueState {
    heap: BinaryHeap<TileTask>,
    queued: HashSet<TileIndex>,
    in_flight: HashMap<TileIndex, Arc<AtomicU64>>,
    layers: LayerStack,
    batch_started: Option<Instant>,
    sequence: u64,
    shutdown: bool,
}

impl QueueState {
    fn remaining(&self) -> usize {
        self.heap.len() + self.in_flight.len()
    }

    fn is_idle(&self) -> bool {
        self.heap.is_empty() && self.in_flight.is_empty()
    }
}

struct Shared {
    state: Mutex<QueueState>,
    work_available: Condvar,
    idle: Condvar,
    generation: AtomicU64,
    matrix: Arc<TileMatrix>,
    cache: Arc<dyn CacheProvider>,
    decoder: Arc<dyn TileDecoder>,
    events: Arc<EventBus>,
    config: TileLoadingConfig,
}

enum FetchOutcome {
    Loaded { tile: DecodedTile, payload: Vec<u8> },
    NoData,
    Failed(MapError),
    Stale,
}

/// Fixed-size worker pool feeding the [`TileMatrix`]
pub struct TileLoader {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl TileLoader {
    pub fn new(
        config: TileLoadingConfig,
        matrix: Arc<TileMatrix>,
        cache: Arc<dyn CacheProvider>,
        decoder: Arc<dyn TileDecoder>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let worker_count = config.worker_count.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                queued: HashSet::default(),
                in_flight: HashMap::default(),
                layers: Arc::from(Vec::new()),
                batch_started: None,
                sequence: 0,
                shutdown: false,
            }),
            work_available: Condvar::new(),
            idle: Condvar::new(),
            generation: AtomicU64::new(0),
            matrix,
            cache,
            decoder,
            events,
            config,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("tile-worker-{}", id))
                .spawn(move || TileWorker { id, shared }.run())?;
            workers.push(handle);
        }
        log::debug!("started {} tile workers", worker_count);

        Ok(Self { shared, workers })
    }

    /// Replace the provider layer stack (bottom first). Everything queued or
    /// in flight belongs to the old stack and is abandoned.
    pub fn set_layers(&self, layers: Vec<Arc<dyn MapProvider>>) {
        let mut state = self.shared.state.lock();
        self.shared.generation.fetch_add(1, AtomicOrdering::SeqCst);
        state.layers = Arc::from(layers);
        state.heap.clear();
        state.queued.clear();
        state.in_flight.clear();
        finish_batch_if_idle(&self.shared, &mut state);
    }

    pub fn layer_count(&self) -> usize {
        self.shared.state.lock().layers.len()
    }

    /// Make `wanted` the set of tiles to load, superseding every earlier
    /// call. Returns the new generation.
    pub fn schedule(&self, wanted: Vec<TileRequest>) -> u64 {
        let mut state = self.shared.state.lock();
        let generation = self.shared.generation.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let layer_count = state.layers.len();

        let dropped = state.heap.len();
        state.heap.clear();
        state.queued.clear();

        let mut retagged = 0;
        for request in wanted {
            if layer_count == 0 || self.shared.matrix.is_complete(request.index, layer_count) {
                continue;
            }
            if let Some(ticket) = state.in_flight.get(&request.index) {
                ticket.store(generation, AtomicOrdering::SeqCst);
                retagged += 1;
                continue;
            }
            if !state.queued.insert(request.index) {
                continue;
            }
            let sequence = state.sequence;
            state.sequence += 1;
            state.heap.push(TileTask {
                index: request.index,
                priority: request.priority,
                distance: request.distance,
                generation,
                sequence,
                ticket: Arc::new(AtomicU64::new(generation)),
            });
        }

        log::debug!(
            "generation {}: {} queued, {} in flight re-tagged, {} replaced",
            generation,
            state.heap.len(),
            retagged,
            dropped
        );

        if !state.is_idle() {
            if state.batch_started.is_none() {
                state.batch_started = Some(Instant::now());
                self.shared.events.emit(MapEvent::TileLoadStart);
            }
            self.shared.events.emit(MapEvent::ProgressChanged {
                tiles_remaining: state.remaining(),
            });
            self.shared.work_available.notify_all();
        } else {
            finish_batch_if_idle(&self.shared, &mut state);
        }
        generation
    }

    /// Drop everything queued and invalidate everything in flight
    pub fn cancel_all(&self) {
        let mut state = self.shared.state.lock();
        self.shared.generation.fetch_add(1, AtomicOrdering::SeqCst);
        state.heap.clear();
        state.queued.clear();
        state.in_flight.clear();
        finish_batch_if_idle(&self.shared, &mut state);
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(AtomicOrdering::SeqCst)
    }

    /// Tiles queued or being fetched
    pub fn pending(&self) -> usize {
        self.shared.state.lock().remaining()
    }

    /// Block until nothing is queued or in flight, or `timeout` passes.
    /// Returns whether the loader went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.is_idle() {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for TileLoader {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.heap.clear();
            self.shared.generation.fetch_add(1, AtomicOrdering::SeqCst);
        }
        self.shared.work_available.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("tile worker panicked");
            }
        }
    }
}

fn finish_batch_if_idle(shared: &Shared, state: &mut QueueState) {
    if !state.is_idle() {
        return;
    }
    if let Some(started) = state.batch_started.take() {
        shared.events.emit(MapEvent::TileLoadComplete {
            elapsed: started.elapsed(),
        });
    }
    shared.idle.notify_all();
}

struct TileWorker {
    id: usize,
    shared: Arc<Shared>,
}

impl TileWorker {
    fn run(self) {
        log::debug!("tile worker {} started", self.id);
        while let Some((task, layers)) = self.next_task() {
            self.process(&task, &layers);
            self.complete(&task);
        }
        log::debug!("tile worker {} exiting", self.id);
    }

    fn next_task(&self) -> Option<(TileTask, LayerStack)> {
        let mut state = self.shared.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(task) = state.heap.pop() {
                state.queued.remove(&task.index);
                state.in_flight.insert(task.index, Arc::clone(&task.ticket));
                let layers = Arc::clone(&state.layers);
                return Some((task, layers));
            }
            self.shared.work_available.wait(&mut state);
        }
    }

    fn complete(&self, task: &TileTask) {
        let mut state = self.shared.state.lock();
        let ours = state
            .in_flight
            .get(&task.index)
            .map_or(false, |ticket| Arc::ptr_eq(ticket, &task.ticket));
        if ours {
            state.in_flight.remove(&task.index);
        }
        if state.batch_started.is_some() {
            self.shared.events.emit(MapEvent::ProgressChanged {
                tiles_remaining: state.remaining(),
            });
        }
        finish_batch_if_idle(&self.shared, &mut state);
    }

    fn is_current(&self, task: &TileTask) -> bool {
        task.ticket.load(AtomicOrdering::SeqCst) == self.shared.generation.load(AtomicOrdering::SeqCst)
    }

    fn process(&self, task: &TileTask, layers: &[Arc<dyn MapProvider>]) {
        let index = task.index;
        for (position, provider) in layers.iter().enumerate() {
            let layer = LayerId(position);
            if self.shared.matrix.has_layer(index, layer) {
                continue;
            }
            if !self.is_current(task) {
                log::trace!("dropping stale request for {}", index);
                return;
            }

            let key = CacheKey::new(provider.id().clone(), index);
            if let Some(tile) = self.load_cached(&key) {
                if !self.store(task, layer, TileSlot::Image(TileImage::new(tile))) {
                    return;
                }
                continue;
            }

            match self.fetch_from_network(task, provider.as_ref()) {
                FetchOutcome::Loaded { tile, payload } => {
                    if !self.store(task, layer, TileSlot::Image(TileImage::new(tile))) {
                        return;
                    }
                    if !self.is_current(task) {
                        return;
                    }
                    if let Err(e) = self.shared.cache.put(&key, &payload) {
                        self.cache_fault("put", &key, e);
                    }
                }
                FetchOutcome::NoData => {
                    if !self.store(task, layer, TileSlot::Empty) {
                        return;
                    }
                    log::debug!("{} has no data for {}", provider.id(), index);
                    self.shared.events.emit(MapEvent::EmptyTile {
                        index,
                        provider: provider.id().clone(),
                    });
                }
                FetchOutcome::Failed(e) => {
                    log::error!("giving up on tile {} from {}: {}", index, provider.id(), e);
                    self.shared.events.emit(MapEvent::TileLoadFailed {
                        index,
                        provider: provider.id().clone(),
                        error: e.to_string(),
                    });
                }
                FetchOutcome::Stale => {
                    log::trace!("dropping stale request for {}", index);
                    return;
                }
            }
        }
    }

    /// Decoded cache payload, or `None` to fall through to the network.
    /// Corrupt payloads are deleted so they are not served again.
    fn load_cached(&self, key: &CacheKey) -> Option<DecodedTile> {
        let bytes = match self.shared.cache.try_get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                self.cache_fault("read", key, e);
                return None;
            }
        };
        match self.shared.decoder.decode(&bytes) {
            Ok(tile) => {
                log::trace!("cache hit for {} from {}", key.index, key.provider);
                Some(tile)
            }
            Err(e) => {
                log::warn!("corrupt cached tile {} from {}: {}", key.index, key.provider, e);
                if let Err(e) = self.shared.cache.remove(key) {
                    self.cache_fault("remove", key, e);
                }
                None
            }
        }
    }

    fn fetch_from_network(&self, task: &TileTask, provider: &dyn MapProvider) -> FetchOutcome {
        let max_retries = self.shared.config.max_retries;
        let mut attempt = 0;
        loop {
            if !self.is_current(task) {
                return FetchOutcome::Stale;
            }
            log::debug!(
                "fetch tile {} from {} attempt {}",
                task.index,
                provider.id(),
                attempt + 1
            );
            let result = provider.fetch_tile(task.index).and_then(|payload| match payload {
                Some(bytes) => self
                    .shared
                    .decoder
                    .decode(&bytes)
                    .map(|tile| Some((tile, bytes))),
                None => Ok(None),
            });
            match result {
                Ok(Some((tile, payload))) => return FetchOutcome::Loaded { tile, payload },
                Ok(None) => return FetchOutcome::NoData,
                Err(e) if attempt >= max_retries => return FetchOutcome::Failed(e),
                Err(e) => {
                    attempt += 1;
                    log::warn!(
                        "tile {} download failed on attempt {}: {}",
                        task.index,
                        attempt,
                        e
                    );
                    thread::sleep(self.shared.config.retry_delay(attempt));
                }
            }
        }
    }

    /// Write `slot` unless the task went stale. Returns whether it was written.
    fn store(&self, task: &TileTask, layer: LayerId, slot: TileSlot) -> bool {
        let written = self
            .shared
            .matrix
            .put_if(task.index, layer, slot, || self.is_current(task));
        if written {
            self.shared.events.emit(MapEvent::Invalidate);
        }
        written
    }

    fn cache_fault(&self, op: &str, key: &CacheKey, error: MapError) {
        log::warn!("cache {} failed for {} from {}: {}", op, key.index, key.provider, error);
        self.shared
            .events
            .emit(MapEvent::CacheFault(format!("{} {}: {}", op, key.index, error)));
    }
}
