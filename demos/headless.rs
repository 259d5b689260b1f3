//! Drives the engine without a UI: load a view, pan it, zoom in, and print
//! what a renderer would paint.
//!
//! Run with `RUST_LOG=debug cargo run --example headless` to watch the
//! loader at work. With the `http` feature tiles come from OpenStreetMap,
//! otherwise (or with `MAPCORE_OFFLINE` set) from a synthetic provider.

use mapcore::prelude::*;

struct Checkerboard {
    id: ProviderId,
}

impl MapProvider for Checkerboard {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn name(&self) -> &str {
        "Checkerboard"
    }

    fn fetch_tile(&self, index: TileIndex) -> Result<Option<Vec<u8>>> {
        std::thread::sleep(Duration::from_millis(20));
        if (index.x + index.y) % 2 == 0 {
            Ok(Some(format!("tile {}", index).into_bytes()))
        } else {
            Ok(None)
        }
    }
}

fn checkerboard() -> Arc<dyn MapProvider> {
    Arc::new(Checkerboard {
        id: ProviderId::new("checkerboard"),
    })
}

/// Offline tiles are plain text, so they skip raster decoding
fn offline() -> (Arc<dyn MapProvider>, Arc<dyn TileDecoder>) {
    (checkerboard(), Arc::new(PassthroughDecoder))
}

#[cfg(feature = "http")]
fn source() -> (Arc<dyn MapProvider>, Arc<dyn TileDecoder>) {
    if std::env::var_os("MAPCORE_OFFLINE").is_some() {
        return offline();
    }
    (Arc::new(UrlTemplateProvider::openstreetmap()), raster_decoder())
}

#[cfg(not(feature = "http"))]
fn source() -> (Arc<dyn MapProvider>, Arc<dyn TileDecoder>) {
    offline()
}

#[cfg(all(feature = "http", feature = "decode"))]
fn raster_decoder() -> Arc<dyn TileDecoder> {
    Arc::new(RasterDecoder)
}

#[cfg(all(feature = "http", not(feature = "decode")))]
fn raster_decoder() -> Arc<dyn TileDecoder> {
    Arc::new(PassthroughDecoder)
}

fn report(map: &MapCore, label: &str) {
    let snapshot = map.render_snapshot();
    let substitutes = snapshot
        .tiles
        .iter()
        .filter(|t| t.overlays.iter().any(RenderOverlay::is_substitute))
        .count();
    let empty = snapshot.tiles.iter().filter(|t| t.known_empty).count();
    println!(
        "{label}: {} at zoom {:.2} (tiles z{}, scale {:.3}): {} tiles, {} substituted, {} empty, {} missing",
        map.position(),
        snapshot.zoom,
        snapshot.tile_zoom,
        snapshot.scale,
        snapshot.tiles.len(),
        substitutes,
        empty,
        snapshot.missing().count(),
    );
}

fn main() -> Result<()> {
    env_logger::init();

    let cache_dir = std::env::temp_dir().join("mapcore-headless");
    let cache: Arc<dyn CacheProvider> =
        Arc::new(TieredCache::new(512, Arc::new(FileCache::new(&cache_dir))));
    log::info!("{}", cache.info());

    let (provider, decoder) = source();
    let mut map = MapCore::new(MapConfig::default(), provider, cache, decoder)?;
    let events = map.subscribe();

    map.set_zoom(10.0);
    map.on_viewport_changed(1024, 768);
    map.wait_idle(Duration::from_secs(30));
    report(&map, "initial");

    map.pointer_down(Point::new(512.0, 384.0));
    for step in 1..=8 {
        map.pointer_move(Point::new(512.0 + step as f64 * 25.0, 384.0));
    }
    map.pointer_up();
    report(&map, "after drag");

    map.wheel_zoom(1.0, Point::new(700.0, 300.0));
    report(&map, "right after zoom");
    map.wait_idle(Duration::from_secs(30));
    report(&map, "zoom settled");

    map.set_zoom(11.6);
    map.wait_idle(Duration::from_secs(30));
    report(&map, "fractional zoom");
    println!("trimmed {} tiles from distant levels", map.trim_levels());

    for event in events.try_iter() {
        match event {
            MapEvent::TileLoadComplete { elapsed } => println!("batch finished in {:?}", elapsed),
            MapEvent::TileLoadFailed { index, error, .. } => println!("{} failed: {}", index, error),
            MapEvent::CacheFault(reason) => println!("cache fault: {}", reason),
            _ => {}
        }
    }
    Ok(())
}
