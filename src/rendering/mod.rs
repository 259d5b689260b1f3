pub mod snapshot;

pub use snapshot::{PixelRect, RenderOverlay, RenderSnapshot, RenderTile};
