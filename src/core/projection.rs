//! Map projections: geographic ↔ pixel ↔ tile index at a given zoom.
//!
//! Each provider declares a [`ProjectionKind`]; everything else in the
//! engine works against the [`Projection`] trait, so the tile scheme
//! (square pyramid, 2×1 pyramid, ellipsoidal y axis) only matters here.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use crate::core::constants::{
    EARTH_RADIUS, MAX_ELLIPTICAL_LATITUDE, MAX_MERCATOR_LATITUDE, MAX_SUPPORTED_ZOOM, TILE_SIZE,
    WGS84_ECCENTRICITY,
};
use crate::core::geo::{GeoPoint, GeoRect, PixelPoint, Point, TileIndex};
use crate::{MapError, Result};

/// Projection variants a provider can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProjectionKind {
    /// EPSG:3857 square pyramid, one tile at zoom 0
    #[default]
    SphericalMercator,
    /// Mercator on the WGS84 ellipsoid
    EllipticalMercator,
    /// Equirectangular, two tiles wide and one tall at zoom 0
    PlateCarree,
}

impl ProjectionKind {
    /// Build the projection implementing this kind
    pub fn projection(self) -> Arc<dyn Projection> {
        match self {
            ProjectionKind::SphericalMercator => Arc::new(SphericalMercator),
            ProjectionKind::EllipticalMercator => Arc::new(EllipticalMercator),
            ProjectionKind::PlateCarree => Arc::new(PlateCarree),
        }
    }
}

/// Coordinate conversions for one tile scheme
pub trait Projection: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProjectionKind;

    /// Tile edge length in pixels
    fn tile_size(&self) -> u32 {
        TILE_SIZE
    }

    /// Geographic area the projection can represent
    fn bounds(&self) -> GeoRect;

    /// Number of tile (columns, rows) at `zoom`
    fn tile_matrix_size(&self, zoom: u8) -> (i64, i64);

    /// Sub-pixel world position of `point` at `zoom`
    fn to_pixel_f(&self, point: GeoPoint, zoom: u8) -> Point;

    /// Geographic position of a sub-pixel world position at `zoom`
    fn to_geo_f(&self, pixel: Point, zoom: u8) -> GeoPoint;

    /// Size of the whole map in pixels at `zoom`
    fn world_size_pixels(&self, zoom: u8) -> (i64, i64) {
        let (cols, rows) = self.tile_matrix_size(zoom);
        let ts = self.tile_size() as i64;
        (cols * ts, rows * ts)
    }

    /// Rounded world pixel of `point`, clipped to the map
    fn to_pixel(&self, point: GeoPoint, zoom: u8) -> PixelPoint {
        let p = self.to_pixel_f(point, zoom);
        let (w, h) = self.world_size_pixels(zoom);
        PixelPoint::new(
            (p.x.round() as i64).clamp(0, w - 1),
            (p.y.round() as i64).clamp(0, h - 1),
        )
    }

    fn to_geo(&self, pixel: PixelPoint, zoom: u8) -> GeoPoint {
        self.to_geo_f(pixel.to_point(), zoom)
    }

    /// Tile containing `pixel`. Columns wrap around the antimeridian; rows
    /// do not, so pixels beyond the poles produce an invalid index.
    fn tile_of(&self, pixel: PixelPoint, zoom: u8) -> TileIndex {
        let ts = self.tile_size() as i64;
        let (cols, _) = self.tile_matrix_size(zoom);
        TileIndex::new(
            zoom,
            pixel.x.div_euclid(ts).rem_euclid(cols),
            pixel.y.div_euclid(ts),
        )
    }

    /// World pixel of the tile's top-left corner
    fn tile_origin(&self, tile: TileIndex) -> PixelPoint {
        let ts = self.tile_size() as i64;
        PixelPoint::new(tile.x * ts, tile.y * ts)
    }

    fn is_valid_tile(&self, tile: TileIndex) -> bool {
        if tile.zoom > MAX_SUPPORTED_ZOOM {
            return false;
        }
        let (cols, rows) = self.tile_matrix_size(tile.zoom);
        (0..cols).contains(&tile.x) && (0..rows).contains(&tile.y)
    }

    /// Reject indices outside the tile matrix before any I/O happens
    fn validate(&self, tile: TileIndex) -> Result<TileIndex> {
        if self.is_valid_tile(tile) {
            Ok(tile)
        } else {
            Err(MapError::ProjectionOutOfRange(tile))
        }
    }

    /// Meters per pixel at `lat` and `zoom`
    fn ground_resolution(&self, zoom: u8, lat: f64) -> f64 {
        let (w, _) = self.world_size_pixels(zoom);
        let lat = lat.clamp(self.bounds().bottom(), self.bounds().top());
        lat.to_radians().cos() * 2.0 * PI * EARTH_RADIUS / w as f64
    }
}

/// Tiles along one axis of a square pyramid. Zooms past the deepest
/// supported level saturate there.
fn tiles_across(zoom: u8) -> i64 {
    1i64.checked_shl(u32::from(zoom.min(MAX_SUPPORTED_ZOOM))).unwrap_or(i64::MAX)
}

fn map_size(tile_size: u32, zoom: u8) -> f64 {
    (tile_size as i64 * tiles_across(zoom)) as f64
}

fn clip(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// EPSG:3857 web mercator
#[derive(Debug, Clone, Copy, Default)]
pub struct SphericalMercator;

impl Projection for SphericalMercator {
    fn kind(&self) -> ProjectionKind {
        ProjectionKind::SphericalMercator
    }

    fn bounds(&self) -> GeoRect {
        GeoRect::from_ltrb(-180.0, MAX_MERCATOR_LATITUDE, 180.0, -MAX_MERCATOR_LATITUDE)
    }

    fn tile_matrix_size(&self, zoom: u8) -> (i64, i64) {
        (tiles_across(zoom), tiles_across(zoom))
    }

    fn to_pixel_f(&self, point: GeoPoint, zoom: u8) -> Point {
        let lat = clip(point.lat, -MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
        let lng = clip(point.lng, -180.0, 180.0);

        let x = (lng + 180.0) / 360.0;
        let sin_lat = lat.to_radians().sin();
        let y = 0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI);

        let size = map_size(self.tile_size(), zoom);
        Point::new(x * size, y * size)
    }

    fn to_geo_f(&self, pixel: Point, zoom: u8) -> GeoPoint {
        let size = map_size(self.tile_size(), zoom);
        let xx = pixel.x / size - 0.5;
        let yy = 0.5 - clip(pixel.y, 0.0, size) / size;

        let lat = 90.0 - 360.0 * (-yy * 2.0 * PI).exp().atan() / PI;
        let lng = GeoPoint::wrap_lng(360.0 * xx);
        GeoPoint::new(lat, lng)
    }
}

/// Mercator on the WGS84 ellipsoid
#[derive(Debug, Clone, Copy, Default)]
pub struct EllipticalMercator;

impl EllipticalMercator {
    const MAX_ITERATIONS: usize = 15;
    const TOLERANCE: f64 = 1e-12;

    fn conformal_factor(phi: f64) -> f64 {
        let e_sin = WGS84_ECCENTRICITY * phi.sin();
        ((1.0 - e_sin) / (1.0 + e_sin)).powf(WGS84_ECCENTRICITY / 2.0)
    }
}

impl Projection for EllipticalMercator {
    fn kind(&self) -> ProjectionKind {
        ProjectionKind::EllipticalMercator
    }

    fn bounds(&self) -> GeoRect {
        GeoRect::from_ltrb(
            -180.0,
            MAX_ELLIPTICAL_LATITUDE,
            180.0,
            -MAX_ELLIPTICAL_LATITUDE,
        )
    }

    fn tile_matrix_size(&self, zoom: u8) -> (i64, i64) {
        (tiles_across(zoom), tiles_across(zoom))
    }

    fn to_pixel_f(&self, point: GeoPoint, zoom: u8) -> Point {
        let lat = clip(point.lat, -MAX_ELLIPTICAL_LATITUDE, MAX_ELLIPTICAL_LATITUDE);
        let lng = clip(point.lng, -180.0, 180.0);

        let phi = lat.to_radians();
        let merc_y = ((PI / 4.0 + phi / 2.0).tan() * Self::conformal_factor(phi)).ln();

        let size = map_size(self.tile_size(), zoom);
        let x = (lng + 180.0) / 360.0;
        let y = 0.5 - merc_y / (2.0 * PI);
        Point::new(x * size, y * size)
    }

    fn to_geo_f(&self, pixel: Point, zoom: u8) -> GeoPoint {
        let size = map_size(self.tile_size(), zoom);
        let merc_y = (0.5 - clip(pixel.y, 0.0, size) / size) * 2.0 * PI;
        let t = (-merc_y).exp();

        let mut phi = PI / 2.0 - 2.0 * t.atan();
        for _ in 0..Self::MAX_ITERATIONS {
            let next = PI / 2.0 - 2.0 * (t * Self::conformal_factor(phi)).atan();
            let done = (next - phi).abs() < Self::TOLERANCE;
            phi = next;
            if done {
                break;
            }
        }

        let lng = GeoPoint::wrap_lng((pixel.x / size - 0.5) * 360.0);
        GeoPoint::new(phi.to_degrees(), lng)
    }
}

/// Equirectangular projection with a 2×1 tile pyramid
#[derive(Debug, Clone, Copy, Default)]
pub struct PlateCarree;

impl Projection for PlateCarree {
    fn kind(&self) -> ProjectionKind {
        ProjectionKind::PlateCarree
    }

    fn bounds(&self) -> GeoRect {
        GeoRect::from_ltrb(-180.0, 90.0, 180.0, -90.0)
    }

    fn tile_matrix_size(&self, zoom: u8) -> (i64, i64) {
        (2 * tiles_across(zoom), tiles_across(zoom))
    }

    fn to_pixel_f(&self, point: GeoPoint, zoom: u8) -> Point {
        let (w, h) = self.world_size_pixels(zoom);
        let lat = clip(point.lat, -90.0, 90.0);
        let lng = clip(point.lng, -180.0, 180.0);
        Point::new(
            (lng + 180.0) / 360.0 * w as f64,
            (90.0 - lat) / 180.0 * h as f64,
        )
    }

    fn to_geo_f(&self, pixel: Point, zoom: u8) -> GeoPoint {
        let (w, h) = self.world_size_pixels(zoom);
        let y = clip(pixel.y, 0.0, h as f64);
        GeoPoint::new(
            90.0 - y / h as f64 * 180.0,
            GeoPoint::wrap_lng(pixel.x / w as f64 * 360.0 - 180.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [ProjectionKind; 3] = [
        ProjectionKind::SphericalMercator,
        ProjectionKind::EllipticalMercator,
        ProjectionKind::PlateCarree,
    ];

    fn sample_points(bounds: &GeoRect) -> Vec<GeoPoint> {
        let mut points = Vec::new();
        for i in 0..=8 {
            for j in 0..=8 {
                // stay clear of the map edges, where pixels are clipped
                let margin = bounds.height_lat * 0.05;
                let lat = bounds.bottom() + margin + (bounds.height_lat - 2.0 * margin) * i as f64 / 8.0;
                let lng = -170.0 + 340.0 * j as f64 / 8.0;
                points.push(GeoPoint::new(lat, lng));
            }
        }
        points.push(GeoPoint::new(55.1644, 61.4368));
        points
    }

    #[test]
    fn test_round_trip_within_a_pixel() {
        for kind in KINDS {
            let proj = kind.projection();
            for zoom in [0u8, 1, 5, 10, 15, 18] {
                for p in sample_points(&proj.bounds()) {
                    let pixel = proj.to_pixel(p, zoom);
                    let back = proj.to_geo(pixel, zoom);

                    let exact = proj.to_pixel_f(p, zoom);
                    let again = proj.to_pixel_f(back, zoom);
                    assert!(
                        (exact.x - again.x).abs() <= 0.5 + 1e-6
                            && (exact.y - again.y).abs() <= 0.5 + 1e-6,
                        "{:?} z{} {} -> {:?} -> {}",
                        kind,
                        zoom,
                        p,
                        pixel,
                        back
                    );
                    assert_eq!(proj.to_pixel(back, zoom), pixel);
                }
            }
        }
    }

    #[test]
    fn test_subpixel_round_trip_is_exact() {
        for kind in KINDS {
            let proj = kind.projection();
            let p = GeoPoint::new(55.1644, 61.4368);
            let back = proj.to_geo_f(proj.to_pixel_f(p, 10), 10);
            assert!((back.lat - p.lat).abs() < 1e-9, "{:?}", kind);
            assert!((back.lng - p.lng).abs() < 1e-9, "{:?}", kind);
        }
    }

    #[test]
    fn test_mercator_known_values() {
        let proj = SphericalMercator;
        assert_eq!(proj.to_pixel(GeoPoint::new(0.0, 0.0), 0), PixelPoint::new(128, 128));
        assert_eq!(proj.world_size_pixels(3), (2048, 2048));

        // Tile covering Chelyabinsk at zoom 10
        let pixel = proj.to_pixel(GeoPoint::new(55.1644, 61.4368), 10);
        let tile = proj.tile_of(pixel, 10);
        assert_eq!(tile.x, 686);
        assert_eq!(tile.y, 323);
    }

    #[test]
    fn test_plate_carree_scheme() {
        let proj = PlateCarree;
        assert_eq!(proj.tile_matrix_size(0), (2, 1));
        assert_eq!(proj.world_size_pixels(1), (1024, 512));
        let tile = proj.tile_of(proj.to_pixel(GeoPoint::new(45.0, 90.0), 0), 0);
        assert_eq!(tile, TileIndex::new(0, 1, 0));
    }

    #[test]
    fn test_elliptical_differs_from_spherical() {
        let p = GeoPoint::new(60.0, 30.0);
        let s = SphericalMercator.to_pixel_f(p, 10);
        let e = EllipticalMercator.to_pixel_f(p, 10);
        assert_eq!(s.x, e.x);
        // The ellipsoid pulls high latitudes towards the equator
        assert!(e.y > s.y + 100.0);
    }

    #[test]
    fn test_tile_of_wraps_columns_not_rows() {
        let proj = SphericalMercator;
        let tile = proj.tile_of(PixelPoint::new(-1, 10), 1);
        assert_eq!(tile, TileIndex::new(1, 1, 0));

        let tile = proj.tile_of(PixelPoint::new(600, 10), 1);
        assert_eq!(tile.x, 0);

        let beyond_pole = proj.tile_of(PixelPoint::new(10, 512), 1);
        assert_eq!(beyond_pole.y, 2);
        assert!(!proj.is_valid_tile(beyond_pole));
        assert!(matches!(
            proj.validate(beyond_pole),
            Err(MapError::ProjectionOutOfRange(t)) if t == beyond_pole
        ));
        assert!(proj.validate(TileIndex::new(1, 1, 1)).is_ok());
    }

    #[test]
    fn test_validate_rejects_unsupported_zoom() {
        for kind in KINDS {
            let proj = kind.projection();
            for zoom in [MAX_SUPPORTED_ZOOM + 1, 63, 64, 70, u8::MAX] {
                let tile = TileIndex::new(zoom, 0, 0);
                assert!(!proj.is_valid_tile(tile));
                assert!(matches!(
                    proj.validate(tile),
                    Err(MapError::ProjectionOutOfRange(t)) if t == tile
                ));
            }
            assert!(proj.validate(TileIndex::new(MAX_SUPPORTED_ZOOM, 0, 0)).is_ok());
            // sizes stay finite past the pyramid
            assert!(proj.world_size_pixels(u8::MAX).0 > 0);
            assert!(proj.to_pixel_f(GeoPoint::new(10.0, 10.0), u8::MAX).x.is_finite());
        }
    }

    #[test]
    fn test_ground_resolution_shrinks_with_latitude() {
        let proj = SphericalMercator;
        let equator = proj.ground_resolution(10, 0.0);
        let north = proj.ground_resolution(10, 60.0);
        assert!((equator - 152.87).abs() < 0.1);
        assert!((north - equator / 2.0).abs() < 0.1);
    }
}
