//! # mapcore
//!
//! The tile, projection and caching engine behind a slippy-map control.
//!
//! The engine converts between geographic, pixel and tile coordinates,
//! keeps a concurrently readable matrix of loaded tiles, feeds that matrix
//! from a worker pool that consults a persistent cache before the network,
//! and owns the pan/zoom/drag state that drives it all. UI adapters call
//! into [`MapCore`] and paint the [`RenderSnapshot`]s it hands out.

pub mod core;
pub mod input;
pub mod prelude;
pub mod rendering;
pub mod tiles;

pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    config::{InteractionConfig, MapConfig, TileLoadingConfig},
    events::{EventBus, MapEvent},
    geo::{GeoPoint, GeoPolygon, GeoRect, PixelPoint, Point, TileIndex},
    map::MapCore,
    projection::{Projection, ProjectionKind},
    viewport::{ScaleMode, TileRange, Viewport},
};

pub use input::gestures::{GestureConfig, GestureState, GestureTracker, MouseWheelZoomType};

pub use rendering::snapshot::{PixelRect, RenderOverlay, RenderSnapshot, RenderTile};

pub use tiles::{
    cache::{CacheKey, CacheProvider, FileCache, MemoryCache, NoCache, TieredCache},
    image::{DecodedTile, PassthroughDecoder, SubstituteFrame, TileDecoder, TileImage},
    loader::{TileLoader, TilePriority, TileRequest},
    matrix::{LayerId, MatrixView, TileMatrix, TileSlot},
    source::{layer_stack, MapProvider, ProviderId},
};

#[cfg(feature = "decode")]
pub use tiles::image::RasterDecoder;

#[cfg(feature = "http")]
pub use tiles::source::UrlTemplateProvider;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MapError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("tile {0} is outside the projection's tile matrix")]
    ProjectionOutOfRange(TileIndex),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "http")]
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl MapError {
    /// Errors that end up in front of the renderer instead of degrading to
    /// a substitute tile.
    pub fn is_surfaced(&self) -> bool {
        matches!(
            self,
            MapError::ProjectionOutOfRange(_) | MapError::Cache(_) | MapError::Io(_)
        )
    }
}

/// Error type alias for convenience
pub type Error = MapError;
