//! Configuration for tile loading and interaction behavior
//!
//! Follows a preset style: `MapConfig::default()` is balanced, and
//! `low_resource()`, `high_performance()` and `for_testing()` cover the
//! common alternatives. All structs are serde-friendly so hosts can keep
//! them in whatever settings format they already use.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::constants::MAX_RETRY_DELAY_MS;
use crate::core::viewport::ScaleMode;
use crate::input::gestures::{GestureConfig, MouseWheelZoomType};
use crate::{MapError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub tile_loader: TileLoadingConfig,
    pub interaction: InteractionConfig,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            tile_loader: TileLoadingConfig::default(),
            interaction: InteractionConfig::default(),
        }
    }
}

impl MapConfig {
    pub fn low_resource() -> Self {
        Self {
            tile_loader: TileLoadingConfig {
                worker_count: 2,
                max_retries: 1,
                retry_delay_ms: 250,
                prefetch_margin: 0,
                prefetch_parent_level: false,
                levels_keep_in_memory: 2,
                ..TileLoadingConfig::default()
            },
            interaction: InteractionConfig::default(),
        }
    }

    pub fn high_performance() -> Self {
        Self {
            tile_loader: TileLoadingConfig {
                worker_count: 8,
                max_retries: 3,
                retry_delay_ms: 50,
                prefetch_margin: 2,
                levels_keep_in_memory: 8,
                ..TileLoadingConfig::default()
            },
            interaction: InteractionConfig::default(),
        }
    }

    pub fn for_testing() -> Self {
        Self {
            tile_loader: TileLoadingConfig {
                worker_count: 2,
                max_retries: 2,
                retry_delay_ms: 1,
                prefetch_margin: 0,
                prefetch_parent_level: false,
                ..TileLoadingConfig::default()
            },
            interaction: InteractionConfig::default(),
        }
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MapConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tile_loader.worker_count == 0 {
            return Err(MapError::Config("worker_count must be at least 1".into()));
        }
        if self.interaction.min_zoom > self.interaction.max_zoom {
            return Err(MapError::Config(format!(
                "min_zoom {} is above max_zoom {}",
                self.interaction.min_zoom, self.interaction.max_zoom
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileLoadingConfig {
    /// Size of the fixed background worker pool
    pub worker_count: usize,
    /// Retries after the first failed network attempt
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub exponential_backoff: bool,
    /// Ring of tiles around the visible area fetched at lower priority
    pub prefetch_margin: u32,
    /// Also fetch the visible area one zoom level up, for substitutes
    pub prefetch_parent_level: bool,
    /// Zoom levels either side of the current one kept in the matrix
    pub levels_keep_in_memory: u8,
    /// Paint scaled ancestors while exact tiles are missing
    pub show_substitutes: bool,
    /// How many zoom levels up to search for a substitute
    pub max_substitute_levels: u8,
}

impl TileLoadingConfig {
    /// Backoff before retry number `attempt` (1-based), capped at
    /// [`MAX_RETRY_DELAY_MS`]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.retry_delay_ms);
        let delay = if self.exponential_backoff {
            let factor = 2u32.saturating_pow(attempt.saturating_sub(1)).min(1 << 10);
            base.checked_mul(factor).unwrap_or(Duration::MAX)
        } else {
            base
        };
        delay.min(Duration::from_millis(MAX_RETRY_DELAY_MS))
    }
}

impl Default for TileLoadingConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_retries: 2,
            retry_delay_ms: 100,
            exponential_backoff: true,
            prefetch_margin: 1,
            prefetch_parent_level: true,
            levels_keep_in_memory: 5,
            show_substitutes: true,
            max_substitute_levels: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub scale_mode: ScaleMode,
    pub mouse_wheel_zoom_enabled: bool,
    pub mouse_wheel_zoom_type: MouseWheelZoomType,
    pub inverted_mouse_wheel_zooming: bool,
    /// Restore the visible area with zoom-to-fit when the provider changes
    pub zoom_to_area: bool,
    pub gestures: GestureConfig,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            min_zoom: 2,
            max_zoom: 19,
            scale_mode: ScaleMode::Dynamic,
            mouse_wheel_zoom_enabled: true,
            mouse_wheel_zoom_type: MouseWheelZoomType::MousePositionAndCenter,
            inverted_mouse_wheel_zooming: false,
            zoom_to_area: true,
            gestures: GestureConfig::default(),
        }
    }
}
