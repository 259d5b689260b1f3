use serde::{Deserialize, Serialize};

use crate::core::constants::WHEEL_ZOOM_OUT_BIAS;
use crate::core::geo::{GeoPoint, Point};

/// Interaction state of the map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GestureState {
    #[default]
    Idle,
    Dragging,
    WheelZooming,
}

/// Where the map zooms towards on a wheel step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MouseWheelZoomType {
    /// Recenter on the cursor, then zoom
    #[default]
    MousePositionAndCenter,
    /// Zoom about the current view center
    ViewCenter,
    /// Zoom so the point under the cursor stays under the cursor
    MousePositionWithoutCenter,
}

/// Drag recognition thresholds in screen pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub min_horizontal_drag_distance: f64,
    pub min_vertical_drag_distance: f64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            min_horizontal_drag_distance: 4.0,
            min_vertical_drag_distance: 4.0,
        }
    }
}

/// What the engine should do in response to a pointer move
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerAction {
    None,
    /// Movement passed the threshold; start dragging from this anchor
    BeginDrag(Point),
    Drag(Point),
}

/// Pointer bookkeeping behind the drag state machine.
///
/// The tracker only decides transitions and remembers anchors; moving the
/// map is left to the engine.
#[derive(Debug, Clone, Default)]
pub struct GestureTracker {
    config: GestureConfig,
    state: GestureState,
    anchor: Option<Point>,
    /// World pixel of the view center when the drag began
    drag_origin: Option<Point>,
    last_location_in_bounds: Option<GeoPoint>,
}

impl GestureTracker {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn is_dragging(&self) -> bool {
        self.state == GestureState::Dragging
    }

    pub fn set_config(&mut self, config: GestureConfig) {
        self.config = config;
    }

    pub fn pointer_down(&mut self, at: Point) {
        if self.state == GestureState::Idle {
            self.anchor = Some(at);
        }
    }

    pub fn pointer_move(&mut self, at: Point) -> PointerAction {
        match (self.state, self.anchor) {
            (GestureState::Idle, Some(anchor)) => {
                let dx = (at.x - anchor.x).abs();
                let dy = (at.y - anchor.y).abs();
                if dx * 2.0 >= self.config.min_horizontal_drag_distance
                    || dy * 2.0 >= self.config.min_vertical_drag_distance
                {
                    PointerAction::BeginDrag(anchor)
                } else {
                    PointerAction::None
                }
            }
            (GestureState::Dragging, Some(_)) => PointerAction::Drag(at),
            _ => PointerAction::None,
        }
    }

    /// Forget the pointer; returns whether a drag was in progress
    pub fn pointer_up(&mut self) -> bool {
        self.anchor = None;
        self.end_drag()
    }

    pub fn begin_drag(&mut self, anchor: Point, center_pixel: Point) {
        self.state = GestureState::Dragging;
        self.anchor = Some(anchor);
        self.drag_origin = Some(center_pixel);
    }

    /// New center world pixel for a pointer at `at`, given the render scale
    pub fn drag_target(&self, at: Point, scale: f64) -> Option<Point> {
        if self.state != GestureState::Dragging {
            return None;
        }
        let anchor = self.anchor?;
        let origin = self.drag_origin?;
        Some(origin.subtract(&at.subtract(&anchor).multiply(1.0 / scale)))
    }

    /// Leave the dragging state; returns whether a drag was in progress
    pub fn end_drag(&mut self) -> bool {
        let was_dragging = self.is_dragging();
        if was_dragging {
            self.state = GestureState::Idle;
        }
        self.drag_origin = None;
        was_dragging
    }

    /// Enter wheel zooming unless a drag is in progress
    pub fn begin_wheel(&mut self) -> bool {
        if self.is_dragging() {
            return false;
        }
        self.state = GestureState::WheelZooming;
        true
    }

    pub fn end_wheel(&mut self) {
        if self.state == GestureState::WheelZooming {
            self.state = GestureState::Idle;
        }
    }

    pub fn remember_in_bounds(&mut self, position: GeoPoint) {
        self.last_location_in_bounds = Some(position);
    }

    pub fn last_location_in_bounds(&self) -> Option<GeoPoint> {
        self.last_location_in_bounds
    }
}

/// Zoom after one wheel step. Zooming in goes to the next integer level,
/// zooming out to the previous one, rounding near-integers up first.
pub fn wheel_step_zoom(zoom: f64, delta: f64, inverted: bool) -> Option<f64> {
    if delta == 0.0 || !delta.is_finite() {
        return None;
    }
    let zoom_in = (delta > 0.0) != inverted;
    Some(if zoom_in {
        zoom.floor() + 1.0
    } else {
        (zoom + WHEEL_ZOOM_OUT_BIAS).floor() - 1.0
    })
}
