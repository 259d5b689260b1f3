use crossbeam_channel::{bounded, Receiver, Sender};
use mapcore::core::map::DEFAULT_POSITION;
use mapcore::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// End-to-end scenarios driving the engine the way a UI adapter would
#[cfg(test)]
mod engine_tests {
    use super::*;

    const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

    #[derive(Clone, Copy)]
    enum Behaviour {
        Solid,
        NoData,
        Failing,
    }

    struct TestProvider {
        id: ProviderId,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl TestProvider {
        fn new(id: &str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                id: ProviderId::new(id),
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl MapProvider for TestProvider {
        fn id(&self) -> &ProviderId {
            &self.id
        }

        fn name(&self) -> &str {
            "test"
        }

        fn fetch_tile(&self, index: TileIndex) -> Result<Option<Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Solid => Ok(Some(index.to_string().into_bytes())),
                Behaviour::NoData => Ok(None),
                Behaviour::Failing => Err(MapError::FetchFailed("connection reset".into())),
            }
        }
    }

    /// Blocks inside its first fetch until released
    struct GateProvider {
        id: ProviderId,
        first: AtomicBool,
        started: Sender<TileIndex>,
        release: Receiver<()>,
    }

    impl MapProvider for GateProvider {
        fn id(&self) -> &ProviderId {
            &self.id
        }

        fn name(&self) -> &str {
            "gate"
        }

        fn fetch_tile(&self, index: TileIndex) -> Result<Option<Vec<u8>>> {
            if self.first.swap(false, Ordering::SeqCst) {
                let _ = self.started.send(index);
                let _ = self.release.recv_timeout(IDLE_TIMEOUT);
            }
            Ok(Some(vec![7; 16]))
        }
    }

    /// Lets a gated fetch of the previous provider finish while the map is
    /// still resolving this provider's layer stack
    struct LateSwitchProvider {
        id: ProviderId,
        release: Sender<()>,
        released: AtomicBool,
    }

    impl MapProvider for LateSwitchProvider {
        fn id(&self) -> &ProviderId {
            &self.id
        }

        fn name(&self) -> &str {
            "late switch"
        }

        fn fetch_tile(&self, index: TileIndex) -> Result<Option<Vec<u8>>> {
            Ok(Some(index.to_string().into_bytes()))
        }

        fn overlays(&self) -> Vec<Arc<dyn MapProvider>> {
            if !self.released.swap(true, Ordering::SeqCst) {
                let _ = self.release.try_send(());
                std::thread::sleep(Duration::from_millis(300));
            }
            Vec::new()
        }
    }

    /// Zoom is set before the size so nothing at the initial zoom gets loaded
    fn open(
        config: MapConfig,
        provider: Arc<dyn MapProvider>,
        cache: Arc<dyn CacheProvider>,
        size: (u32, u32),
    ) -> MapCore {
        let mut map = MapCore::new(config, provider, cache, Arc::new(PassthroughDecoder)).unwrap();
        map.set_zoom(10.0);
        map.on_viewport_changed(size.0, size.1);
        map
    }

    /// A tile already in the persistent cache never reaches the provider
    #[test]
    fn test_cache_fallback_without_provider_calls() {
        let dir = tempfile::tempdir().unwrap();

        let warm = TestProvider::new("osm", Behaviour::Solid);
        let cache: Arc<dyn CacheProvider> = Arc::new(FileCache::new(dir.path()));
        let map = open(MapConfig::for_testing(), warm.clone(), cache, (800, 600));
        assert!(map.wait_idle(IDLE_TIMEOUT));
        let loaded = map.matrix().len();
        assert!(loaded > 0);
        assert_eq!(warm.calls(), loaded);
        drop(map);

        let cold = TestProvider::new("osm", Behaviour::Solid);
        let cache: Arc<dyn CacheProvider> = Arc::new(FileCache::new(dir.path()));
        let map = open(MapConfig::for_testing(), cold.clone(), cache, (800, 600));
        assert!(map.wait_idle(IDLE_TIMEOUT));

        assert_eq!(cold.calls(), 0);
        assert_eq!(map.matrix().len(), loaded);
        let snapshot = map.render_snapshot();
        assert_eq!(snapshot.missing().count(), 0);
        let first = &snapshot.tiles[0];
        assert_eq!(
            first.overlays[0].image.data().bytes(),
            first.index.to_string().as_bytes()
        );
    }

    /// A request superseded while its fetch is running writes nothing
    #[test]
    fn test_superseded_request_writes_nothing() {
        let (started_tx, started_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let provider = Arc::new(GateProvider {
            id: ProviderId::new("gate"),
            first: AtomicBool::new(true),
            started: started_tx,
            release: release_rx,
        });
        let cache = Arc::new(MemoryCache::new(1024));

        let mut config = MapConfig::for_testing();
        config.tile_loader.worker_count = 1;
        let mut map = open(config, provider, cache.clone(), (256, 256));

        let blocked = started_rx.recv_timeout(IDLE_TIMEOUT).unwrap();
        map.set_position(GeoPoint::new(-33.8688, 151.2093));
        assert!(!map.wanted_tiles().iter().any(|r| r.index == blocked));
        release_tx.send(()).unwrap();

        assert!(map.wait_idle(IDLE_TIMEOUT));
        assert!(!map.matrix().contains(blocked));
        let key = CacheKey::new(ProviderId::new("gate"), blocked);
        assert_eq!(cache.try_get(&key).unwrap(), None);
        assert!(!map.matrix().is_empty());
    }

    /// Tiles of the previous provider never survive a provider switch
    #[test]
    fn test_provider_switch_drops_old_tiles() {
        let (started_tx, started_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let old = Arc::new(GateProvider {
            id: ProviderId::new("old"),
            first: AtomicBool::new(true),
            started: started_tx,
            release: release_rx,
        });
        let cache = Arc::new(MemoryCache::new(1024));
        let mut map = open(MapConfig::for_testing(), old, cache, (512, 512));
        started_rx.recv_timeout(IDLE_TIMEOUT).unwrap();

        map.set_provider(Arc::new(LateSwitchProvider {
            id: ProviderId::new("new"),
            release: release_tx,
            released: AtomicBool::new(false),
        }));
        assert!(map.wait_idle(IDLE_TIMEOUT));

        let snapshot = map.render_snapshot();
        assert!(!snapshot.tiles.is_empty());
        for tile in &snapshot.tiles {
            assert_eq!(tile.overlays.len(), 1, "{} not loaded", tile.index);
            assert_eq!(
                tile.overlays[0].image.data().bytes(),
                tile.index.to_string().as_bytes(),
                "{} kept the old provider's tile",
                tile.index
            );
        }
    }

    /// Dragging right from the default position moves west at fixed latitude
    #[test]
    fn test_pan_scenario() {
        let provider = TestProvider::new("osm", Behaviour::Solid);
        let mut map = open(MapConfig::for_testing(), provider, Arc::new(NoCache), (800, 600));
        assert_eq!(map.position(), DEFAULT_POSITION);
        let events = map.subscribe();

        map.pointer_down(Point::new(400.0, 300.0));
        let mut longitudes = vec![map.position().lng];
        for step in 1..=10 {
            map.pointer_move(Point::new(400.0 + step as f64 * 15.0, 300.0));
            longitudes.push(map.position().lng);
            assert!((map.position().lat - DEFAULT_POSITION.lat).abs() < 1e-9);
        }
        map.pointer_up();

        assert!(longitudes.windows(2).all(|w| w[1] < w[0]));
        let drags = events
            .try_iter()
            .filter(|e| matches!(e, MapEvent::MapDrag))
            .count();
        assert_eq!(drags, 10);
        assert_eq!(map.gesture_state(), GestureState::Idle);
    }

    /// Many workers loading at once leave exactly one entry per wanted tile
    #[test]
    fn test_parallel_load_fills_matrix_once() {
        let provider = TestProvider::new("osm", Behaviour::Solid);
        let mut config = MapConfig::high_performance();
        config.tile_loader.prefetch_parent_level = false;
        config.tile_loader.retry_delay_ms = 1;
        let map = open(config, provider.clone(), Arc::new(NoCache), (1024, 768));
        assert_eq!(map.loader().worker_count(), 8);

        assert!(map.wait_idle(IDLE_TIMEOUT));
        let expected = map.viewport().visible_tiles().expand(2).len();
        assert_eq!(map.matrix().len(), expected);
        assert_eq!(provider.calls(), expected);
    }

    /// Loading events arrive in order and bracket the batch
    #[test]
    fn test_load_events() {
        let provider = TestProvider::new("osm", Behaviour::Solid);
        let mut map = MapCore::new(
            MapConfig::for_testing(),
            provider,
            Arc::new(NoCache),
            Arc::new(PassthroughDecoder),
        )
        .unwrap();
        let events = map.subscribe();
        map.set_zoom(10.0);
        map.on_viewport_changed(512, 512);
        assert!(map.wait_idle(IDLE_TIMEOUT));

        let received: Vec<MapEvent> = events.try_iter().collect();
        assert_eq!(received[0], MapEvent::ZoomChanged { zoom: 10.0 });
        let start = received
            .iter()
            .position(|e| *e == MapEvent::TileLoadStart)
            .unwrap();
        let complete = received
            .iter()
            .rposition(|e| matches!(e, MapEvent::TileLoadComplete { .. }))
            .unwrap();
        assert!(start < complete);
        assert!(received.contains(&MapEvent::ProgressChanged { tiles_remaining: 0 }));
        assert!(received.contains(&MapEvent::Invalidate));
    }

    #[test]
    fn test_empty_tiles_are_remembered() {
        let provider = TestProvider::new("sparse", Behaviour::NoData);
        let map = open(MapConfig::for_testing(), provider.clone(), Arc::new(NoCache), (256, 256));
        assert!(map.wait_idle(IDLE_TIMEOUT));

        let snapshot = map.render_snapshot();
        assert!(snapshot.tiles.iter().all(|t| t.known_empty && t.overlays.is_empty()));
        assert_eq!(snapshot.missing().count(), 0);
        assert_eq!(provider.calls(), snapshot.tiles.len());
    }

    /// Failing tiles stay absent and are reported, the view keeps working
    #[test]
    fn test_failures_degrade_to_events() {
        let provider = TestProvider::new("down", Behaviour::Failing);
        let mut map = MapCore::new(
            MapConfig::for_testing(),
            provider.clone(),
            Arc::new(NoCache),
            Arc::new(PassthroughDecoder),
        )
        .unwrap();
        let events = map.subscribe();
        map.set_zoom(10.0);
        map.on_viewport_changed(256, 256);
        assert!(map.wait_idle(IDLE_TIMEOUT));

        let failed = events
            .try_iter()
            .filter(|e| matches!(e, MapEvent::TileLoadFailed { .. }))
            .count();
        let tiles = map.viewport().visible_tiles().len();
        assert_eq!(failed, tiles);
        let attempts = map.config().tile_loader.max_retries as usize + 1;
        assert_eq!(provider.calls(), tiles * attempts);
        assert!(map.matrix().is_empty());
        assert_eq!(map.render_snapshot().tiles.len(), tiles);
    }

    /// After zooming in, tiles not yet loaded are covered by their parents
    #[test]
    fn test_zoom_in_uses_parent_substitutes() {
        let provider = TestProvider::new("osm", Behaviour::Solid);
        let mut map = open(MapConfig::for_testing(), provider, Arc::new(NoCache), (800, 600));
        assert!(map.wait_idle(IDLE_TIMEOUT));

        map.set_zoom(11.0);
        let snapshot = map.render_snapshot();
        assert_eq!(snapshot.tile_zoom, 11);
        for tile in &snapshot.tiles {
            assert!(!tile.overlays.is_empty(), "tile {} has nothing to draw", tile.index);
            for overlay in tile.overlays.iter().filter(|o| o.is_substitute()) {
                let frame = overlay.image.substitute().unwrap();
                assert_eq!(frame.source, tile.index.parent().unwrap());
                assert_eq!(overlay.draw_rect.width, tile.rect.width * 2.0);
            }
        }
    }

    /// The fitted zoom shows the whole rectangle and the next one does not
    #[test]
    fn test_zoom_to_fit_is_tight() {
        let mut viewport = Viewport::new(
            ProjectionKind::SphericalMercator.projection(),
            DEFAULT_POSITION,
            10.0,
        );
        viewport.set_size(800, 600);
        viewport.set_zoom_range(2, 19);

        let rects = [
            GeoRect::from_ltrb(-10.0, 60.0, 30.0, 35.0),
            GeoRect::from_ltrb(61.0, 55.5, 62.0, 55.0),
            GeoRect::from_ltrb(2.29, 48.86, 2.30, 48.855),
            GeoRect::from_ltrb(-179.0, 80.0, 179.0, -80.0),
        ];
        for rect in &rects {
            let zoom = viewport.max_zoom_to_fit(rect);
            if zoom > viewport.min_zoom() {
                assert!(viewport.fits_at(rect, zoom), "{:?} at {}", rect, zoom);
            }
            if zoom < viewport.max_zoom() {
                assert!(!viewport.fits_at(rect, zoom + 1), "{:?} at {}", rect, zoom);
            }
        }

        let point = GeoRect::from_ltrb(61.0, 55.0, 61.0, 55.0);
        assert_eq!(viewport.max_zoom_to_fit(&point), 19);
    }

    /// Local to geo and back lands on the same screen point
    #[test]
    fn test_local_geo_round_trip_at_fractional_zoom() {
        let provider = TestProvider::new("osm", Behaviour::Solid);
        let mut map = open(MapConfig::for_testing(), provider, Arc::new(NoCache), (800, 600));
        for zoom in [4.3, 10.0, 12.6, 16.9] {
            map.set_zoom(zoom);
            for local in [Point::new(0.0, 0.0), Point::new(400.0, 300.0), Point::new(777.0, 12.0)] {
                let geo = map.from_local_to_geo(local);
                let back = map.from_geo_to_local(geo);
                assert!(back.distance_to(&local) < 1e-6, "zoom {} at {:?}", zoom, local);
            }
        }
        let area = map.view_area();
        assert!(area.contains(&map.position()));
    }

    #[test]
    fn test_cache_cleanup_per_provider() {
        let dir = tempfile::tempdir().unwrap();
        let provider = TestProvider::new("osm", Behaviour::Solid);
        let cache: Arc<dyn CacheProvider> = Arc::new(FileCache::new(dir.path()));
        let map = open(MapConfig::for_testing(), provider, cache, (256, 256));
        assert!(map.wait_idle(IDLE_TIMEOUT));

        let stored = map.matrix().len();
        let far_future = std::time::SystemTime::now() + Duration::from_secs(3600);
        assert_eq!(map.delete_cached_older_than(far_future).unwrap(), stored);
        assert_eq!(map.delete_cached_older_than(far_future).unwrap(), 0);
    }
}
