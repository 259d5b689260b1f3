//! Core constants shared by the projections, the pipeline and the viewport.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Default square tile size in pixels.
pub const TILE_SIZE: u32 = 256;

/// WGS84 semi-major axis in meters.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// WGS84 first eccentricity.
pub const WGS84_ECCENTRICITY: f64 = 0.081_819_190_842_6;

/// Latitude limit of the spherical mercator tile pyramid.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_78;

/// Latitude limit of the elliptical mercator tile pyramid.
pub const MAX_ELLIPTICAL_LATITUDE: f64 = 85.084_059_03;

/// Highest zoom any projection is asked to handle.
pub const MAX_SUPPORTED_ZOOM: u8 = 24;

/// Fractional zoom remainder above which `Dynamic` scaling rounds the tile zoom up.
pub const DYNAMIC_SCALE_THRESHOLD: f64 = 0.25;

/// Zoom-out wheel steps use `floor(zoom + WHEEL_ZOOM_OUT_BIAS) - 1`.
pub const WHEEL_ZOOM_OUT_BIAS: f64 = 0.99;

/// Upper bound on a single retry backoff, whatever the configured base.
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;
