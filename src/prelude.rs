//! Prelude module for common mapcore types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use mapcore::prelude::*;`

pub use crate::core::{
    config::{InteractionConfig, MapConfig, TileLoadingConfig},
    events::{EventBus, MapEvent},
    geo::{GeoPoint, GeoPolygon, GeoRect, PixelPoint, Point, TileIndex},
    map::MapCore,
    projection::{Projection, ProjectionKind},
    viewport::{ScaleMode, TileRange, Viewport},
};

pub use crate::input::gestures::{GestureConfig, GestureState, MouseWheelZoomType};

pub use crate::rendering::snapshot::{PixelRect, RenderOverlay, RenderSnapshot, RenderTile};

pub use crate::tiles::{
    cache::{CacheKey, CacheProvider, FileCache, MemoryCache, NoCache, TieredCache},
    image::{DecodedTile, PassthroughDecoder, SubstituteFrame, TileDecoder, TileImage},
    loader::{TileLoader, TilePriority, TileRequest},
    matrix::{LayerId, TileMatrix, TileSlot},
    source::{MapProvider, ProviderId},
};

#[cfg(feature = "decode")]
pub use crate::tiles::image::RasterDecoder;

#[cfg(feature = "http")]
pub use crate::tiles::source::UrlTemplateProvider;

pub use crate::{Error as MapError, Result};

pub use std::{
    sync::Arc,
    time::{Duration, Instant},
};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet, FxHasher};
