use crossbeam_channel::Receiver;
use std::time::SystemTime;

use crate::core::config::{InteractionConfig, MapConfig};
use crate::core::events::{EventBus, MapEvent};
use crate::core::geo::{GeoPoint, GeoPolygon, GeoRect, Point, TileIndex};
use crate::core::viewport::{ScaleMode, TileRange, Viewport};
use crate::input::gestures::{
    wheel_step_zoom, GestureState, GestureTracker, MouseWheelZoomType, PointerAction,
};
use crate::prelude::{Arc, Duration, HashSet};
use crate::rendering::snapshot::RenderSnapshot;
use crate::tiles::cache::CacheProvider;
use crate::tiles::image::TileDecoder;
use crate::tiles::loader::{TileLoader, TilePriority, TileRequest};
use crate::tiles::matrix::TileMatrix;
use crate::tiles::source::{layer_stack, MapProvider};
use crate::{MapError, Result};

/// Where a new map is centered until the host says otherwise
pub const DEFAULT_POSITION: GeoPoint = GeoPoint::new(55.1644, 61.4368);

/// The map engine.
///
/// Owns the viewport, the gesture state, the tile matrix and the loader
/// feeding it. Every mutation goes through `&mut self` on the UI thread;
/// after each one the wanted tile set is recomputed and handed to the
/// loader, which supersedes whatever it was doing before.
pub struct MapCore {
    config: MapConfig,
    viewport: Viewport,
    gestures: GestureTracker,
    provider: Arc<dyn MapProvider>,
    bounds: Option<GeoPolygon>,
    matrix: Arc<TileMatrix>,
    cache: Arc<dyn CacheProvider>,
    events: Arc<EventBus>,
    loader: TileLoader,
}

impl MapCore {
    pub fn new(
        config: MapConfig,
        provider: Arc<dyn MapProvider>,
        cache: Arc<dyn CacheProvider>,
        decoder: Arc<dyn TileDecoder>,
    ) -> Result<Self> {
        config.validate()?;

        let events = Arc::new(EventBus::new());
        let matrix = Arc::new(TileMatrix::new());
        let loader = TileLoader::new(
            config.tile_loader.clone(),
            Arc::clone(&matrix),
            Arc::clone(&cache),
            decoder,
            Arc::clone(&events),
        )?;
        loader.set_layers(layer_stack(&provider));

        let mut viewport = Viewport::new(
            provider.projection_kind().projection(),
            DEFAULT_POSITION,
            config.interaction.min_zoom as f64,
        );
        viewport.set_scale_mode(config.interaction.scale_mode);
        let (min_zoom, max_zoom) = zoom_range(&config.interaction, provider.as_ref());
        viewport.set_zoom_range(min_zoom, max_zoom);

        log::info!("map engine ready with provider {}", provider.id());

        Ok(Self {
            gestures: GestureTracker::new(config.interaction.gestures.clone()),
            config,
            viewport,
            provider,
            bounds: None,
            matrix,
            cache,
            events,
            loader,
        })
    }

    pub fn subscribe(&self) -> Receiver<MapEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn provider(&self) -> &Arc<dyn MapProvider> {
        &self.provider
    }

    pub fn matrix(&self) -> &Arc<TileMatrix> {
        &self.matrix
    }

    pub fn loader(&self) -> &TileLoader {
        &self.loader
    }

    pub fn cache(&self) -> &Arc<dyn CacheProvider> {
        &self.cache
    }

    pub fn position(&self) -> GeoPoint {
        self.viewport.position()
    }

    pub fn zoom(&self) -> f64 {
        self.viewport.zoom()
    }

    pub fn gesture_state(&self) -> GestureState {
        self.gestures.state()
    }

    /// Replace the interaction settings. Zoom is re-clamped to the new range.
    pub fn set_interaction(&mut self, interaction: InteractionConfig) {
        let old_zoom = self.viewport.zoom();
        self.gestures.set_config(interaction.gestures.clone());
        self.viewport.set_scale_mode(interaction.scale_mode);
        self.config.interaction = interaction;
        let (min_zoom, max_zoom) = zoom_range(&self.config.interaction, self.provider.as_ref());
        self.viewport.set_zoom_range(min_zoom, max_zoom);
        if self.viewport.zoom() != old_zoom {
            self.emit_zoom();
        }
        self.refresh();
    }

    pub fn set_scale_mode(&mut self, mode: ScaleMode) {
        self.config.interaction.scale_mode = mode;
        self.viewport.set_scale_mode(mode);
        self.refresh();
    }

    /// Restrict where a drag may leave the map. `None` lifts the restriction.
    pub fn set_bounds(&mut self, bounds: Option<GeoPolygon>) {
        self.bounds = bounds;
        self.remember_if_in_bounds();
    }

    pub fn bounds(&self) -> Option<&GeoPolygon> {
        self.bounds.as_ref()
    }

    /// The host widget was resized
    pub fn on_viewport_changed(&mut self, width: u32, height: u32) {
        if self.viewport.size() == (width, height) {
            return;
        }
        self.viewport.set_size(width, height);
        self.refresh();
    }

    pub fn set_position(&mut self, position: GeoPoint) {
        if position == self.viewport.position() {
            return;
        }
        self.viewport.set_position(position);
        self.remember_if_in_bounds();
        self.emit_position();
        self.refresh();
    }

    /// Clamp and apply `zoom`; returns whether it changed
    pub fn set_zoom(&mut self, zoom: f64) -> bool {
        if !self.viewport.set_zoom(zoom) {
            return false;
        }
        self.emit_zoom();
        self.refresh();
        true
    }

    pub fn pointer_down(&mut self, at: Point) {
        self.gestures.pointer_down(at);
    }

    pub fn pointer_move(&mut self, at: Point) {
        match self.gestures.pointer_move(at) {
            PointerAction::BeginDrag(anchor) => {
                self.begin_drag(anchor);
                self.drag(at);
            }
            PointerAction::Drag(at) => self.drag(at),
            PointerAction::None => {}
        }
    }

    pub fn pointer_up(&mut self) {
        if self.gestures.is_dragging() {
            self.end_drag();
        }
        self.gestures.pointer_up();
    }

    pub fn begin_drag(&mut self, anchor: Point) {
        self.gestures.begin_drag(anchor, self.viewport.center_pixel());
        log::debug!("drag started at ({:.1}, {:.1})", anchor.x, anchor.y);
    }

    /// Move the map so the point grabbed at the anchor follows the pointer
    pub fn drag(&mut self, at: Point) {
        let Some(target) = self.gestures.drag_target(at, self.viewport.scale()) else {
            return;
        };
        let before = self.viewport.position();
        self.viewport.set_center_pixel(target);
        if self.viewport.position() == before {
            return;
        }
        self.remember_if_in_bounds();
        self.emit_position();
        self.events.emit(MapEvent::MapDrag);
        self.refresh();
    }

    /// Leave the dragging state, snapping back into the allowed bounds
    pub fn end_drag(&mut self) {
        if !self.gestures.end_drag() {
            return;
        }
        let outside = self
            .bounds
            .as_ref()
            .is_some_and(|bounds| !bounds.contains(&self.viewport.position()));
        if outside {
            if let Some(last) = self.gestures.last_location_in_bounds() {
                log::debug!("drag ended outside bounds, returning to {:?}", last);
                self.set_position(last);
            }
        }
    }

    /// Zoom one step for a wheel `delta` with the cursor at `at`.
    /// Returns whether the view changed.
    pub fn wheel_zoom(&mut self, delta: f64, at: Point) -> bool {
        if !self.config.interaction.mouse_wheel_zoom_enabled || !self.gestures.begin_wheel() {
            return false;
        }
        let target = wheel_step_zoom(
            self.viewport.zoom(),
            delta,
            self.config.interaction.inverted_mouse_wheel_zooming,
        );
        let Some(target) = target else {
            self.gestures.end_wheel();
            return false;
        };

        let before = self.viewport.position();
        let zoom_changed = match self.config.interaction.mouse_wheel_zoom_type {
            MouseWheelZoomType::MousePositionAndCenter => {
                let cursor = self.viewport.from_local_to_geo(at);
                self.viewport.set_position(cursor);
                self.viewport.set_zoom(target)
            }
            MouseWheelZoomType::ViewCenter => self.viewport.set_zoom(target),
            MouseWheelZoomType::MousePositionWithoutCenter => {
                let cursor = self.viewport.from_local_to_geo(at);
                let changed = self.viewport.set_zoom(target);
                let landed = self.viewport.from_geo_to_local(cursor);
                let shift = landed.subtract(&at).multiply(1.0 / self.viewport.scale());
                let center = self.viewport.center_pixel().add(&shift);
                self.viewport.set_center_pixel(center);
                changed
            }
        };
        self.gestures.end_wheel();

        let moved = self.viewport.position() != before;
        if moved {
            self.remember_if_in_bounds();
            self.emit_position();
        }
        if zoom_changed {
            self.emit_zoom();
        }
        if moved || zoom_changed {
            self.refresh();
        }
        moved || zoom_changed
    }

    /// Switch to another provider. Loaded tiles belong to the old provider
    /// and are dropped; with `zoom_to_area` the old visible area is fitted
    /// again.
    pub fn set_provider(&mut self, provider: Arc<dyn MapProvider>) {
        let area = self.viewport.view_area();
        let old_zoom = self.viewport.zoom();
        log::info!("switching provider {} -> {}", self.provider.id(), provider.id());

        let layers = layer_stack(&provider);
        self.provider = provider;
        // Old tasks must be stale before the matrix empties, or they refill it
        self.loader.set_layers(layers);
        self.matrix.clear();
        self.viewport
            .set_projection(self.provider.projection_kind().projection());
        let (min_zoom, max_zoom) = zoom_range(&self.config.interaction, self.provider.as_ref());
        self.viewport.set_zoom_range(min_zoom, max_zoom);

        self.events
            .emit(MapEvent::ProviderChanged(self.provider.id().clone()));

        if self.config.interaction.zoom_to_area && !area.is_empty() {
            self.zoom_and_center_rect(&area);
        } else {
            if self.viewport.zoom() != old_zoom {
                self.emit_zoom();
            }
            self.refresh();
        }
    }

    /// Set the highest zoom at which `rect` fits the screen
    pub fn set_zoom_to_fit_rect(&mut self, rect: &GeoRect) -> bool {
        let zoom = self.viewport.max_zoom_to_fit(rect);
        self.set_zoom(zoom as f64)
    }

    /// Center on `rect` and zoom to fit it
    pub fn zoom_and_center_rect(&mut self, rect: &GeoRect) {
        let zoom = self.viewport.max_zoom_to_fit(rect);
        let center = rect.center();
        let moved = center != self.viewport.position();
        self.viewport.set_position(center);
        let zoom_changed = self.viewport.set_zoom(zoom as f64);

        if moved {
            self.remember_if_in_bounds();
            self.emit_position();
        }
        if zoom_changed {
            self.emit_zoom();
        }
        self.refresh();
    }

    pub fn from_local_to_geo(&self, local: Point) -> GeoPoint {
        self.viewport.from_local_to_geo(local)
    }

    pub fn from_geo_to_local(&self, point: GeoPoint) -> Point {
        self.viewport.from_geo_to_local(point)
    }

    pub fn view_area(&self) -> GeoRect {
        self.viewport.view_area()
    }

    /// Copy out what to paint for the current frame
    pub fn render_snapshot(&self) -> RenderSnapshot {
        let levels = if self.config.tile_loader.show_substitutes {
            self.config.tile_loader.max_substitute_levels
        } else {
            0
        };
        RenderSnapshot::build(&self.viewport, &self.matrix, self.loader.layer_count(), levels)
    }

    /// Load `tiles` in addition to the current view, ahead of everything
    /// else. Indices outside the tile matrix are rejected before any
    /// request is queued; the extra tiles are superseded by the next view
    /// change like any other request.
    pub fn request_tiles(&mut self, tiles: &[TileIndex]) -> Result<u64> {
        let projection = self.viewport.projection();
        for &index in tiles {
            projection.validate(index)?;
            if index.zoom < self.provider.min_zoom() || index.zoom > self.provider.max_zoom() {
                return Err(MapError::ProjectionOutOfRange(index));
            }
        }

        let mut wanted: Vec<TileRequest> = tiles
            .iter()
            .map(|&index| TileRequest::new(index, TilePriority::Visible, 0))
            .collect();
        wanted.extend(self.wanted_tiles());
        Ok(self.loader.schedule(wanted))
    }

    /// Drop tiles more than `levels_keep_in_memory` zooms away from the
    /// current tile zoom
    pub fn trim_levels(&self) -> usize {
        self.matrix.retain_levels(
            self.viewport.tile_zoom(),
            self.config.tile_loader.levels_keep_in_memory,
        )
    }

    pub fn evict_older_than(&mut self, age: Duration) -> usize {
        let evicted = self.matrix.evict_older_than(age);
        if evicted > 0 {
            self.events.emit(MapEvent::Invalidate);
            self.refresh();
        }
        evicted
    }

    /// Forget every loaded tile and load the view again
    pub fn reload(&mut self) {
        self.loader.cancel_all();
        self.matrix.clear();
        self.events.emit(MapEvent::Invalidate);
        self.refresh();
    }

    /// Remove this provider's cache records written before `cutoff`
    pub fn delete_cached_older_than(&self, cutoff: SystemTime) -> Result<usize> {
        let mut removed = 0;
        for layer in layer_stack(&self.provider) {
            removed += self.cache.delete_older_than(cutoff, Some(layer.id()))?;
        }
        Ok(removed)
    }

    /// Block until the loader has nothing left to do, or `timeout` passes
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.loader.wait_idle(timeout)
    }

    /// Visible tiles, the prefetch ring around them and optionally the
    /// level above, nearest to the view center first within each class
    pub fn wanted_tiles(&self) -> Vec<TileRequest> {
        let visible = self.viewport.visible_tiles();
        if visible.is_empty() || !self.zoom_supported(visible.zoom) {
            return Vec::new();
        }

        let center = self.viewport.center_pixel();
        let mut seen = HashSet::default();
        let mut wanted = Vec::with_capacity(visible.len());

        let margin = self.config.tile_loader.prefetch_margin as i64;
        self.collect(visible.expand(margin), center, &mut seen, &mut wanted, |x, y| {
            if visible.contains(x, y) {
                TilePriority::Visible
            } else {
                TilePriority::Prefetch
            }
        });

        if self.config.tile_loader.prefetch_parent_level {
            if let Some(parent) = visible.parent().filter(|p| self.zoom_supported(p.zoom)) {
                let center = center.multiply(0.5);
                self.collect(parent, center, &mut seen, &mut wanted, |_, _| {
                    TilePriority::ParentLevel
                });
            }
        }

        wanted.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.distance.cmp(&b.distance)));
        wanted
    }

    fn collect(
        &self,
        range: TileRange,
        center: Point,
        seen: &mut HashSet<TileIndex>,
        wanted: &mut Vec<TileRequest>,
        priority: impl Fn(i64, i64) -> TilePriority,
    ) {
        let projection = self.viewport.projection();
        let ts = projection.tile_size() as f64;
        let (_, rows) = projection.tile_matrix_size(range.zoom);
        for (x, y) in range.positions() {
            if !(0..rows).contains(&y) {
                continue;
            }
            let index = self.viewport.wrap_tile(range.zoom, x, y);
            if !seen.insert(index) {
                continue;
            }
            let tile_center = Point::new((x as f64 + 0.5) * ts, (y as f64 + 0.5) * ts);
            let dx = tile_center.x - center.x;
            let dy = tile_center.y - center.y;
            let distance = (dx * dx + dy * dy).min(u64::MAX as f64) as u64;
            wanted.push(TileRequest::new(index, priority(x, y), distance));
        }
    }

    fn zoom_supported(&self, zoom: u8) -> bool {
        (self.provider.min_zoom()..=self.provider.max_zoom()).contains(&zoom)
    }

    fn refresh(&mut self) {
        let wanted = self.wanted_tiles();
        self.loader.schedule(wanted);
        self.events.emit(MapEvent::Invalidate);
    }

    fn remember_if_in_bounds(&mut self) {
        let position = self.viewport.position();
        let inside = self
            .bounds
            .as_ref()
            .map_or(true, |bounds| bounds.contains(&position));
        if inside {
            self.gestures.remember_in_bounds(position);
        }
    }

    fn emit_position(&self) {
        self.events
            .emit(MapEvent::PositionChanged(self.viewport.position()));
    }

    fn emit_zoom(&self) {
        self.events.emit(MapEvent::ZoomChanged {
            zoom: self.viewport.zoom(),
        });
    }
}

/// Interaction zoom range narrowed to what the provider serves. A provider
/// whose range misses the configured one wins outright.
fn zoom_range(interaction: &InteractionConfig, provider: &dyn MapProvider) -> (u8, u8) {
    let min_zoom = interaction.min_zoom.max(provider.min_zoom());
    let max_zoom = interaction.max_zoom.min(provider.max_zoom());
    if min_zoom > max_zoom {
        (provider.min_zoom(), provider.max_zoom())
    } else {
        (min_zoom, max_zoom)
    }
}
