//! Decoded tile payloads and the decoders that produce them

use std::fmt;
use std::sync::Arc;

use crate::core::geo::TileIndex;
use crate::{MapError, Result};

/// Result of decoding one tile payload
#[derive(Clone, PartialEq, Eq)]
pub enum DecodedTile {
    /// Raw RGBA8 pixels, row-major
    Rgba {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    /// Still-encoded bytes, left for the renderer to decode
    Encoded(Vec<u8>),
}

impl DecodedTile {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            DecodedTile::Rgba { width, height, .. } => Some((*width, *height)),
            DecodedTile::Encoded(_) => None,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            DecodedTile::Rgba { pixels, .. } => pixels,
            DecodedTile::Encoded(bytes) => bytes,
        }
    }
}

impl fmt::Debug for DecodedTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedTile::Rgba { width, height, .. } => {
                write!(f, "DecodedTile::Rgba({}x{})", width, height)
            }
            DecodedTile::Encoded(bytes) => write!(f, "DecodedTile::Encoded({} bytes)", bytes.len()),
        }
    }
}

/// Placement of an ancestor tile scaled up to cover a missing descendant.
///
/// The ancestor is drawn `scale` times larger than a tile and shifted by
/// `(x_offset, y_offset)` tile widths, then clipped to the missing tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubstituteFrame {
    pub source: TileIndex,
    pub scale: i64,
    pub x_offset: i64,
    pub y_offset: i64,
}

impl SubstituteFrame {
    /// Frame for drawing `ancestor` in place of `tile`; `None` when `ancestor`
    /// does not cover `tile`
    pub fn between(tile: TileIndex, ancestor: TileIndex) -> Option<Self> {
        let levels = tile.zoom.checked_sub(ancestor.zoom)?;
        if levels == 0 || tile.ancestor(levels)? != ancestor {
            return None;
        }
        let scale = 1i64 << levels;
        Some(Self {
            source: ancestor,
            scale,
            x_offset: tile.x.rem_euclid(scale),
            y_offset: tile.y.rem_euclid(scale),
        })
    }

    pub fn levels(&self) -> u32 {
        self.scale.trailing_zeros()
    }
}

/// One overlay layer of a tile as handed to the renderer.
///
/// Cloning is cheap; the pixel data is shared.
#[derive(Debug, Clone)]
pub struct TileImage {
    data: Arc<DecodedTile>,
    substitute: Option<SubstituteFrame>,
}

impl TileImage {
    pub fn new(data: DecodedTile) -> Self {
        Self {
            data: Arc::new(data),
            substitute: None,
        }
    }

    pub fn data(&self) -> &Arc<DecodedTile> {
        &self.data
    }

    pub fn substitute(&self) -> Option<&SubstituteFrame> {
        self.substitute.as_ref()
    }

    pub fn is_substitute(&self) -> bool {
        self.substitute.is_some()
    }

    /// The same pixels marked as a scaled stand-in
    pub fn as_substitute(&self, frame: SubstituteFrame) -> Self {
        Self {
            data: Arc::clone(&self.data),
            substitute: Some(frame),
        }
    }
}

impl PartialEq for TileImage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data) && self.substitute == other.substitute
    }
}

/// Turns raw provider or cache bytes into a [`DecodedTile`]
pub trait TileDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedTile>;
}

/// Keeps payloads encoded; only rejects empty ones
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDecoder;

impl TileDecoder for PassthroughDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedTile> {
        if bytes.is_empty() {
            return Err(MapError::DecodeFailed("empty tile payload".into()));
        }
        Ok(DecodedTile::Encoded(bytes.to_vec()))
    }
}

/// Decodes PNG/JPEG payloads to RGBA8 with the `image` crate
#[cfg(feature = "decode")]
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterDecoder;

#[cfg(feature = "decode")]
impl TileDecoder for RasterDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedTile> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| MapError::DecodeFailed(format!("failed to load image: {}", e)))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Ok(DecodedTile::Rgba {
            width,
            height,
            pixels: img.into_raw(),
        })
    }
}
