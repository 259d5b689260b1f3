//! Copy-out list of tiles to paint for one frame

use crate::core::geo::TileIndex;
use crate::core::viewport::Viewport;
use crate::tiles::image::{SubstituteFrame, TileImage};
use crate::tiles::matrix::{MatrixView, TileMatrix};

/// Axis-aligned rectangle in unscaled local pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn intersects(&self, other: &PixelRect) -> bool {
        self.x < other.right() && other.x < self.right() && self.y < other.bottom() && other.y < self.bottom()
    }
}

/// One image to draw for a tile
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOverlay {
    pub image: TileImage,
    /// Where to draw the whole image. Larger than the tile for substitutes,
    /// which must be clipped to [`RenderTile::rect`].
    pub draw_rect: PixelRect,
}

impl RenderOverlay {
    pub fn is_substitute(&self) -> bool {
        self.image.is_substitute()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderTile {
    /// Wrapped index; columns past the antimeridian repeat real tiles
    pub index: TileIndex,
    pub rect: PixelRect,
    /// Bottom layer first
    pub overlays: Vec<RenderOverlay>,
    /// Every provider layer reported no data here
    pub known_empty: bool,
}

/// Everything the renderer needs for one frame.
///
/// The renderer draws each tile rect as given, then scales the whole
/// frame by `scale` about the screen center.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSnapshot {
    pub tile_zoom: u8,
    pub zoom: f64,
    pub scale: f64,
    pub size: (u32, u32),
    pub tiles: Vec<RenderTile>,
}

impl RenderSnapshot {
    /// Build the frame under one read lock of `matrix`. A tile counts as
    /// known-empty only once all `layer_count` layers reported no data.
    pub fn build(
        viewport: &Viewport,
        matrix: &TileMatrix,
        layer_count: usize,
        max_substitute_levels: u8,
    ) -> Self {
        let view = matrix.read();
        let range = viewport.visible_tiles();
        let offset = viewport.render_offset();
        let ts = viewport.projection().tile_size() as f64;

        let mut tiles = Vec::with_capacity(range.len());
        for (x, y) in range.positions() {
            let index = viewport.wrap_tile(range.zoom, x, y);
            let rect = PixelRect::new(x as f64 * ts - offset.x, y as f64 * ts - offset.y, ts, ts);

            let exact: Vec<RenderOverlay> = view
                .overlays(index)
                .into_iter()
                .map(|image| RenderOverlay {
                    image,
                    draw_rect: rect,
                })
                .collect();
            let known_empty = exact.is_empty() && view.is_known_empty(index, layer_count);
            let overlays = if exact.is_empty() && !known_empty {
                substitute(&view, index, rect, max_substitute_levels)
            } else {
                exact
            };

            tiles.push(RenderTile {
                index,
                rect,
                overlays,
                known_empty,
            });
        }

        Self {
            tile_zoom: viewport.tile_zoom(),
            zoom: viewport.zoom(),
            scale: viewport.scale(),
            size: viewport.size(),
            tiles,
        }
    }

    /// Tiles with nothing exact to draw yet
    pub fn missing(&self) -> impl Iterator<Item = &RenderTile> {
        self.tiles
            .iter()
            .filter(|tile| !tile.known_empty && tile.overlays.iter().all(RenderOverlay::is_substitute))
    }
}

/// Overlays of the nearest loaded ancestor, framed to cover `index`
fn substitute(view: &MatrixView<'_>, index: TileIndex, rect: PixelRect, max_levels: u8) -> Vec<RenderOverlay> {
    for levels in 1..=max_levels {
        let Some(ancestor) = index.ancestor(levels) else {
            break;
        };
        let images = view.overlays(ancestor);
        if images.is_empty() {
            continue;
        }
        let Some(frame) = SubstituteFrame::between(index, ancestor) else {
            break;
        };
        let scale = frame.scale as f64;
        let draw_rect = PixelRect::new(
            rect.x - rect.width * frame.x_offset as f64,
            rect.y - rect.height * frame.y_offset as f64,
            rect.width * scale,
            rect.height * scale,
        );
        return images
            .into_iter()
            .map(|image| RenderOverlay {
                image: image.as_substitute(frame),
                draw_rect,
            })
            .collect();
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::GeoPoint;
    use crate::core::projection::ProjectionKind;
    use crate::tiles::image::DecodedTile;
    use crate::tiles::matrix::LayerId;

    fn viewport() -> Viewport {
        let mut viewport = Viewport::new(
            ProjectionKind::SphericalMercator.projection(),
            GeoPoint::new(55.1644, 61.4368),
            10.0,
        );
        viewport.set_size(800, 600);
        viewport
    }

    fn image(tag: u8) -> TileImage {
        TileImage::new(DecodedTile::Encoded(vec![tag]))
    }

    fn tile(snapshot: &RenderSnapshot, index: TileIndex) -> &RenderTile {
        snapshot.tiles.iter().find(|t| t.index == index).unwrap()
    }

    #[test]
    fn test_snapshot_covers_viewport() {
        let v = viewport();
        let snapshot = RenderSnapshot::build(&v, &TileMatrix::new(), 1, 5);
        let screen = PixelRect::new(0.0, 0.0, 800.0, 600.0);

        assert_eq!(snapshot.tile_zoom, 10);
        assert_eq!(snapshot.tiles.len(), v.visible_tiles().len());
        assert!(snapshot.tiles.iter().all(|t| t.rect.intersects(&screen)));
        assert_eq!(snapshot.missing().count(), snapshot.tiles.len());
    }

    #[test]
    fn test_exact_tiles_stack_layers() {
        let v = viewport();
        let matrix = TileMatrix::new();
        let index = TileIndex::new(10, 686, 323);
        matrix.put(index, LayerId(0), image(1));
        matrix.put(index, LayerId(1), image(2));

        let snapshot = RenderSnapshot::build(&v, &matrix, 2, 5);
        let t = tile(&snapshot, index);
        assert_eq!(t.overlays.len(), 2);
        assert_eq!(t.overlays[0].image.data().bytes(), &[1]);
        assert!(t.overlays.iter().all(|o| o.draw_rect == t.rect && !o.is_substitute()));
    }

    #[test]
    fn test_missing_tile_uses_nearest_ancestor() {
        let v = viewport();
        let matrix = TileMatrix::new();
        let index = TileIndex::new(10, 686, 323);
        let grandparent = index.ancestor(2).unwrap();
        matrix.put(grandparent, LayerId(0), image(7));

        let snapshot = RenderSnapshot::build(&v, &matrix, 1, 5);
        let t = tile(&snapshot, index);
        assert_eq!(t.overlays.len(), 1);
        let overlay = &t.overlays[0];
        let frame = overlay.image.substitute().unwrap();
        assert_eq!(frame.source, grandparent);
        assert_eq!(frame.scale, 4);
        assert_eq!((frame.x_offset, frame.y_offset), (2, 3));
        assert_eq!(overlay.draw_rect.width, 1024.0);
        assert_eq!(overlay.draw_rect.x, t.rect.x - 512.0);
        assert_eq!(overlay.draw_rect.y, t.rect.y - 768.0);

        // too far up to be used
        let shallow = RenderSnapshot::build(&v, &matrix, 1, 1);
        assert!(tile(&shallow, index).overlays.is_empty());
    }

    #[test]
    fn test_known_empty_is_not_substituted() {
        let v = viewport();
        let matrix = TileMatrix::new();
        let index = TileIndex::new(10, 686, 323);
        matrix.mark_empty(index, LayerId(0));
        matrix.put(index.parent().unwrap(), LayerId(0), image(1));

        let snapshot = RenderSnapshot::build(&v, &matrix, 1, 5);
        let t = tile(&snapshot, index);
        assert!(t.known_empty);
        assert!(t.overlays.is_empty());
    }

    #[test]
    fn test_partly_empty_tile_is_substituted() {
        let v = viewport();
        let matrix = TileMatrix::new();
        let index = TileIndex::new(10, 686, 323);
        let parent = index.parent().unwrap();
        matrix.mark_empty(index, LayerId(0));
        matrix.put(parent, LayerId(0), image(1));
        matrix.put(parent, LayerId(1), image(2));

        // the top layer is still loading or failed
        let snapshot = RenderSnapshot::build(&v, &matrix, 2, 5);
        let t = tile(&snapshot, index);
        assert!(!t.known_empty);
        assert_eq!(t.overlays.len(), 2);
        assert!(t.overlays.iter().all(RenderOverlay::is_substitute));
        assert!(snapshot.missing().any(|m| m.index == index));

        matrix.mark_empty(index, LayerId(1));
        let snapshot = RenderSnapshot::build(&v, &matrix, 2, 5);
        let t = tile(&snapshot, index);
        assert!(t.known_empty);
        assert!(t.overlays.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached_from_matrix() {
        let v = viewport();
        let matrix = TileMatrix::new();
        let index = TileIndex::new(10, 686, 323);
        matrix.put(index, LayerId(0), image(1));

        let snapshot = RenderSnapshot::build(&v, &matrix, 1, 5);
        matrix.clear();
        assert_eq!(tile(&snapshot, index).overlays.len(), 1);
    }
}
