use serde::{Deserialize, Serialize};

/// Pixel rectangle of one tile inside its source image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Regular grid over a `width x height` image with square cells of side
/// `tile_size`.
///
/// Origins sit at multiples of `tile_size` starting at `(0, 0)`. When a
/// dimension is not a multiple of the tile size, the last column/row is
/// narrower: the grid never extends past the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    width: u32,
    height: u32,
    tile_size: u32,
}

impl TileGrid {
    /// `None` when `tile_size` is zero.
    pub fn new(width: u32, height: u32, tile_size: u32) -> Option<Self> {
        (tile_size > 0).then_some(Self {
            width,
            height,
            tile_size,
        })
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn cols(&self) -> u32 {
        self.width.div_ceil(self.tile_size)
    }

    pub fn rows(&self) -> u32 {
        self.height.div_ceil(self.tile_size)
    }

    pub fn len(&self) -> usize {
        self.cols() as usize * self.rows() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tile rectangles in row-major order.
    pub fn rects(&self) -> Vec<TileRect> {
        let mut out = Vec::with_capacity(self.len());
        for row in 0..self.rows() {
            let y = row * self.tile_size;
            for col in 0..self.cols() {
                let x = col * self.tile_size;
                out.push(TileRect {
                    x,
                    y,
                    width: self.tile_size.min(self.width - x),
                    height: self.tile_size.min(self.height - y),
                });
            }
        }
        out
    }
}
