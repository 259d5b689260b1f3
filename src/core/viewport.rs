use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::constants::{DYNAMIC_SCALE_THRESHOLD, MAX_SUPPORTED_ZOOM};
use crate::core::geo::{GeoPoint, GeoRect, Point, TileIndex};
use crate::core::projection::Projection;

/// How a fractional zoom is rendered from integer-zoom tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ScaleMode {
    /// Ignore the fraction, draw tiles at `floor(zoom)` unscaled
    Integer,
    /// Draw `floor(zoom)` tiles scaled up
    ScaleUp,
    /// Draw `ceil(zoom)` tiles scaled down
    ScaleDown,
    /// Scale up for small fractions, down past the threshold
    #[default]
    Dynamic,
}

/// Rectangle of tiles at one zoom. Columns are not wrapped, so a range may
/// extend past the antimeridian; rows are clamped to the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub min_x: i64,
    pub max_x: i64,
    pub min_y: i64,
    pub max_y: i64,
}

impl TileRange {
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            ((self.max_x - self.min_x + 1) * (self.max_y - self.min_y + 1)) as usize
        }
    }

    /// Unwrapped (x, y) positions, row by row
    pub fn positions(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        (self.min_y..=self.max_y).flat_map(move |y| (self.min_x..=self.max_x).map(move |x| (x, y)))
    }

    /// Grow by `margin` tiles on every side
    pub fn expand(&self, margin: i64) -> TileRange {
        TileRange {
            min_x: self.min_x - margin,
            max_x: self.max_x + margin,
            min_y: self.min_y - margin,
            max_y: self.max_y + margin,
            ..*self
        }
    }

    /// The range one zoom level up covering the same area
    pub fn parent(&self) -> Option<TileRange> {
        let zoom = self.zoom.checked_sub(1)?;
        Some(TileRange {
            zoom,
            min_x: self.min_x.div_euclid(2),
            max_x: self.max_x.div_euclid(2),
            min_y: self.min_y.div_euclid(2),
            max_y: self.max_y.div_euclid(2),
        })
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }
}

/// The visible window onto the map: center, zoom and screen size.
///
/// Zoom is real-valued. The tile zoom actually fetched and the scale
/// factor the renderer applies about the screen center are derived from
/// it according to the [`ScaleMode`].
#[derive(Debug, Clone)]
pub struct Viewport {
    position: GeoPoint,
    zoom: f64,
    min_zoom: u8,
    max_zoom: u8,
    scale_mode: ScaleMode,
    width: u32,
    height: u32,
    projection: Arc<dyn Projection>,
    tile_zoom: u8,
    scale: f64,
}

impl Viewport {
    pub fn new(projection: Arc<dyn Projection>, position: GeoPoint, zoom: f64) -> Self {
        let mut viewport = Self {
            position,
            zoom: 0.0,
            min_zoom: 0,
            max_zoom: MAX_SUPPORTED_ZOOM,
            scale_mode: ScaleMode::default(),
            width: 0,
            height: 0,
            projection,
            tile_zoom: 0,
            scale: 1.0,
        };
        viewport.set_zoom(zoom);
        viewport
    }

    pub fn position(&self) -> GeoPoint {
        self.position
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Integer zoom of the tiles drawn for the current zoom
    pub fn tile_zoom(&self) -> u8 {
        self.tile_zoom
    }

    /// Scale the renderer applies about the screen center
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn scale_mode(&self) -> ScaleMode {
        self.scale_mode
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn projection(&self) -> &Arc<dyn Projection> {
        &self.projection
    }

    pub fn set_position(&mut self, position: GeoPoint) {
        self.position = position;
    }

    /// Clamp and apply `zoom`; returns whether the zoom changed
    pub fn set_zoom(&mut self, zoom: f64) -> bool {
        let zoom = if zoom.is_finite() { zoom } else { self.min_zoom as f64 };
        let zoom = zoom.clamp(self.min_zoom as f64, self.max_zoom as f64);
        let changed = zoom != self.zoom;
        self.zoom = zoom;
        self.update_scale();
        changed
    }

    pub fn set_zoom_range(&mut self, min_zoom: u8, max_zoom: u8) {
        let max_zoom = max_zoom.min(MAX_SUPPORTED_ZOOM);
        self.min_zoom = min_zoom.min(max_zoom);
        self.max_zoom = max_zoom;
        self.set_zoom(self.zoom);
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.update_scale();
    }

    pub fn set_scale_mode(&mut self, mode: ScaleMode) {
        self.scale_mode = mode;
        self.update_scale();
    }

    pub fn set_projection(&mut self, projection: Arc<dyn Projection>) {
        self.projection = projection;
    }

    fn update_scale(&mut self) {
        let remainder = self.zoom % 1.0;
        if self.scale_mode != ScaleMode::Integer && remainder != 0.0 && self.width > 0 {
            let scale_down = match self.scale_mode {
                ScaleMode::ScaleDown => true,
                ScaleMode::Dynamic => remainder > DYNAMIC_SCALE_THRESHOLD,
                ScaleMode::ScaleUp | ScaleMode::Integer => false,
            };
            if scale_down {
                self.scale = 2f64.powf(remainder - 1.0);
                self.tile_zoom = self.zoom.ceil() as u8;
            } else {
                self.scale = 2f64.powf(remainder);
                self.tile_zoom = (self.zoom - remainder).round() as u8;
            }
        } else {
            self.scale = 1.0;
            self.tile_zoom = self.zoom.floor() as u8;
        }
    }

    fn half_size(&self) -> Point {
        Point::new(self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    /// Sub-pixel world position of the view center at the tile zoom
    pub fn center_pixel(&self) -> Point {
        self.projection.to_pixel_f(self.position, self.tile_zoom)
    }

    /// Move the center to a world pixel at the tile zoom
    pub fn set_center_pixel(&mut self, pixel: Point) {
        self.position = self.projection.to_geo_f(pixel, self.tile_zoom);
    }

    /// World pixel (at the tile zoom) under the screen point `local`
    pub fn local_to_world(&self, local: Point) -> Point {
        let offset = local.subtract(&self.half_size()).multiply(1.0 / self.scale);
        self.center_pixel().add(&offset)
    }

    pub fn world_to_local(&self, world: Point) -> Point {
        let offset = world.subtract(&self.center_pixel()).multiply(self.scale);
        self.half_size().add(&offset)
    }

    pub fn from_local_to_geo(&self, local: Point) -> GeoPoint {
        self.projection
            .to_geo_f(self.local_to_world(local), self.tile_zoom)
    }

    pub fn from_geo_to_local(&self, point: GeoPoint) -> Point {
        self.world_to_local(self.projection.to_pixel_f(point, self.tile_zoom))
    }

    /// Geographic area currently on screen
    pub fn view_area(&self) -> GeoRect {
        if self.width == 0 || self.height == 0 {
            return GeoRect::EMPTY;
        }
        let top_left = self.from_local_to_geo(Point::new(0.0, 0.0));
        let bottom_right =
            self.from_local_to_geo(Point::new(self.width as f64, self.height as f64));
        GeoRect::from_ltrb(top_left.lng, top_left.lat, bottom_right.lng, bottom_right.lat)
    }

    /// Offset that maps world pixels at the tile zoom to unscaled local
    /// pixels, before the renderer's scale about the screen center
    pub fn render_offset(&self) -> Point {
        self.center_pixel().subtract(&self.half_size())
    }

    /// Tiles intersecting the screen at the tile zoom
    pub fn visible_tiles(&self) -> TileRange {
        let zoom = self.tile_zoom;
        let ts = self.projection.tile_size() as f64;
        let (_, rows) = self.projection.tile_matrix_size(zoom);
        if self.width == 0 || self.height == 0 {
            return TileRange {
                zoom,
                min_x: 0,
                max_x: -1,
                min_y: 0,
                max_y: -1,
            };
        }
        let top_left = self.local_to_world(Point::new(0.0, 0.0));
        let bottom_right = self.local_to_world(Point::new(self.width as f64, self.height as f64));
        TileRange {
            zoom,
            min_x: (top_left.x / ts).floor() as i64,
            max_x: ((bottom_right.x / ts).ceil() as i64 - 1).max((top_left.x / ts).floor() as i64),
            min_y: ((top_left.y / ts).floor() as i64).max(0),
            max_y: ((bottom_right.y / ts).ceil() as i64 - 1).min(rows - 1),
        }
    }

    /// Wrap an unwrapped tile position into a real index
    pub fn wrap_tile(&self, zoom: u8, x: i64, y: i64) -> TileIndex {
        let (cols, _) = self.projection.tile_matrix_size(zoom);
        TileIndex::new(zoom, x.rem_euclid(cols), y)
    }

    /// Highest integer zoom at which `rect` fits on screen, `min_zoom` when
    /// it never does. A rectangle without area fits at `max_zoom`.
    pub fn max_zoom_to_fit(&self, rect: &GeoRect) -> u8 {
        if rect.is_empty() {
            return self.max_zoom;
        }
        (self.min_zoom..=self.max_zoom)
            .rev()
            .find(|&zoom| self.fits_at(rect, zoom))
            .unwrap_or(self.min_zoom)
    }

    /// Whether the projected size of `rect` at `zoom` fits the screen
    pub fn fits_at(&self, rect: &GeoRect, zoom: u8) -> bool {
        let top_left = self.projection.to_pixel_f(rect.top_left(), zoom);
        let bottom_right = self.projection.to_pixel_f(rect.bottom_right(), zoom);
        let width = (bottom_right.x - top_left.x).abs();
        let height = (bottom_right.y - top_left.y).abs();
        width <= self.width as f64 && height <= self.height as f64
    }
}
