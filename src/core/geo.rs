use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::constants::EARTH_RADIUS;

/// A geographical coordinate in degrees.
///
/// Equality is exact on the two doubles. [`GeoPoint::EMPTY`] stands in for
/// "no position" and never compares equal to a real coordinate, including
/// `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    empty: bool,
}

impl GeoPoint {
    /// Sentinel for "no position".
    pub const EMPTY: GeoPoint = GeoPoint {
        lat: 0.0,
        lng: 0.0,
        empty: true,
    };

    /// Creates a new coordinate
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            empty: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Validates that the coordinates are within valid ranges
    pub fn is_valid(&self) -> bool {
        !self.empty
            && self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance in meters (haversine)
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let lat1_rad = self.lat.to_radians();
        let lat2_rad = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lng = (other.lng - self.lng).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS * c
    }

    /// Wraps longitude to [-180, 180] range
    pub fn wrap_lng(lng: f64) -> f64 {
        let wrapped = lng % 360.0;
        if wrapped > 180.0 {
            wrapped - 360.0
        } else if wrapped < -180.0 {
            wrapped + 360.0
        } else {
            wrapped
        }
    }
}

impl Default for GeoPoint {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.empty {
            write!(f, "(empty)")
        } else {
            write!(f, "({:.6}, {:.6})", self.lat, self.lng)
        }
    }
}

/// A point in local (screen) or sub-pixel world coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn add(&self, other: &Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    pub fn subtract(&self, other: &Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    pub fn multiply(&self, scalar: f64) -> Point {
        Point::new(self.x * scalar, self.y * scalar)
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn round(&self) -> PixelPoint {
        PixelPoint::new(self.x.round() as i64, self.y.round() as i64)
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Integer pixel in the full-map coordinate space of one zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: i64,
    pub y: i64,
}

impl PixelPoint {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn to_point(self) -> Point {
        Point::new(self.x as f64, self.y as f64)
    }
}

/// A geographic rectangle anchored at its top-left (north-west) corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoRect {
    /// Latitude of the top edge
    pub lat: f64,
    /// Longitude of the left edge
    pub lng: f64,
    pub width_lng: f64,
    pub height_lat: f64,
}

impl GeoRect {
    pub const EMPTY: GeoRect = GeoRect {
        lat: 0.0,
        lng: 0.0,
        width_lng: 0.0,
        height_lat: 0.0,
    };

    pub fn new(top_left: GeoPoint, width_lng: f64, height_lat: f64) -> Self {
        Self {
            lat: top_left.lat,
            lng: top_left.lng,
            width_lng,
            height_lat,
        }
    }

    /// Creates a rectangle from its left, top, right and bottom edges
    pub fn from_ltrb(left_lng: f64, top_lat: f64, right_lng: f64, bottom_lat: f64) -> Self {
        Self {
            lat: top_lat,
            lng: left_lng,
            width_lng: right_lng - left_lng,
            height_lat: top_lat - bottom_lat,
        }
    }

    pub fn top(&self) -> f64 {
        self.lat
    }

    pub fn left(&self) -> f64 {
        self.lng
    }

    pub fn right(&self) -> f64 {
        self.lng + self.width_lng
    }

    pub fn bottom(&self) -> f64 {
        self.lat - self.height_lat
    }

    pub fn top_left(&self) -> GeoPoint {
        GeoPoint::new(self.top(), self.left())
    }

    pub fn bottom_right(&self) -> GeoPoint {
        GeoPoint::new(self.bottom(), self.right())
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            self.lat - self.height_lat / 2.0,
            self.lng + self.width_lng / 2.0,
        )
    }

    /// True when the rectangle has no area
    pub fn is_empty(&self) -> bool {
        self.width_lng == 0.0 || self.height_lat == 0.0
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        !point.is_empty()
            && point.lng >= self.left()
            && point.lng <= self.right()
            && point.lat <= self.top()
            && point.lat >= self.bottom()
    }

    /// Smallest rectangle covering all `points`; `None` when there are none
    pub fn bounding(points: &[GeoPoint]) -> Option<GeoRect> {
        let mut iter = points.iter().filter(|p| !p.is_empty());
        let first = iter.next()?;
        let (mut top, mut left, mut bottom, mut right) = (first.lat, first.lng, first.lat, first.lng);
        for p in iter {
            top = top.max(p.lat);
            bottom = bottom.min(p.lat);
            left = left.min(p.lng);
            right = right.max(p.lng);
        }
        Some(GeoRect::from_ltrb(left, top, right, bottom))
    }
}

/// Closed polygon used to keep the map position inside an allowed area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPolygon {
    points: Vec<GeoPoint>,
}

impl GeoPolygon {
    pub fn new(points: Vec<GeoPoint>) -> Self {
        Self { points }
    }

    pub fn from_rect(rect: &GeoRect) -> Self {
        Self::new(vec![
            rect.top_left(),
            GeoPoint::new(rect.top(), rect.right()),
            rect.bottom_right(),
            GeoPoint::new(rect.bottom(), rect.left()),
        ])
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    /// Even-odd ray casting test; points on an edge count as inside.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        if point.is_empty() || self.points.len() < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = self.points.len() - 1;
        for i in 0..self.points.len() {
            let (a, b) = (&self.points[i], &self.points[j]);
            if on_segment(a, b, point) {
                return true;
            }
            if (a.lat > point.lat) != (b.lat > point.lat) {
                let cross_lng = (b.lng - a.lng) * (point.lat - a.lat) / (b.lat - a.lat) + a.lng;
                if point.lng < cross_lng {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

fn on_segment(a: &GeoPoint, b: &GeoPoint, p: &GeoPoint) -> bool {
    let cross = (b.lng - a.lng) * (p.lat - a.lat) - (b.lat - a.lat) * (p.lng - a.lng);
    if cross.abs() > 1e-12 {
        return false;
    }
    p.lng >= a.lng.min(b.lng)
        && p.lng <= a.lng.max(b.lng)
        && p.lat >= a.lat.min(b.lat)
        && p.lat <= a.lat.max(b.lat)
}

/// Address of one tile in the pyramid.
///
/// `x` is normally kept inside `0..columns` by the projection; `y` is never
/// wrapped, so an index past the poles stays representable and is rejected
/// by [`crate::Projection::validate`] before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileIndex {
    pub zoom: u8,
    pub x: i64,
    pub y: i64,
}

impl TileIndex {
    pub const fn new(zoom: u8, x: i64, y: i64) -> Self {
        Self { zoom, x, y }
    }

    /// The tile `levels` zooms up that covers this one
    pub fn ancestor(&self, levels: u8) -> Option<TileIndex> {
        if levels > self.zoom {
            return None;
        }
        Some(TileIndex::new(
            self.zoom - levels,
            self.x >> levels,
            self.y >> levels,
        ))
    }

    /// Gets the parent tile at a lower zoom level
    pub fn parent(&self) -> Option<TileIndex> {
        self.ancestor(1)
    }

    /// Gets the child tiles at a higher zoom level, if one exists
    pub fn children(&self) -> Option<[TileIndex; 4]> {
        let z = self.zoom.checked_add(1)?;
        let (x, y) = (self.x.checked_mul(2)?, self.y.checked_mul(2)?);
        let (x1, y1) = (x.checked_add(1)?, y.checked_add(1)?);
        Some([
            TileIndex::new(z, x, y),
            TileIndex::new(z, x1, y),
            TileIndex::new(z, x, y1),
            TileIndex::new(z, x1, y1),
        ])
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}
