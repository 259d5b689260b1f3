pub mod gestures;

pub use gestures::{
    wheel_step_zoom, GestureConfig, GestureState, GestureTracker, MouseWheelZoomType, PointerAction,
};
