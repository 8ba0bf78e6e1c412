//! Block decomposition of a raster.

use serde::{Deserialize, Serialize};

/// Pixel rectangle `[x, x + width) × [y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub fn x_bound(&self) -> usize {
        self.x + self.width
    }

    pub fn y_bound(&self) -> usize {
        self.y + self.height
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.x_bound() && y >= self.y && y < self.y_bound()
    }

    /// Grow by `margin` on every side, clipped to a `cols × rows` raster.
    pub fn expand(&self, margin: usize, cols: usize, rows: usize) -> Rect {
        let x = self.x.saturating_sub(margin);
        let y = self.y.saturating_sub(margin);
        let x_bound = (self.x_bound() + margin).min(cols);
        let y_bound = (self.y_bound() + margin).min(rows);
        Rect::new(x, y, x_bound.saturating_sub(x), y_bound.saturating_sub(y))
    }
}

/// One unit of work.
///
/// The engine runs on `extended`; only `core` is written to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: usize,
    pub core: Rect,
    pub extended: Rect,
}

/// Regular grid of blocks covering a raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockLayout {
    pub cols: usize,
    pub rows: usize,
    pub block_width: usize,
    pub block_height: usize,
    pub blocks_x: usize,
    pub blocks_y: usize,
    /// Margin added around each block core.
    pub overlap: usize,
    blocks: Vec<Block>,
}

impl BlockLayout {
    /// Split a `cols × rows` raster into blocks of at most `max_block_pixels`.
    ///
    /// Starting from the full raster, the larger block side (the width on
    /// ties) is halved, rounding up, until a block fits. The overlap is the
    /// larger of `min_overlap` and `overlap_percent` of the smaller block
    /// side, capped at half of it.
    pub fn compute(
        cols: usize,
        rows: usize,
        max_block_pixels: usize,
        overlap_percent: u32,
        min_overlap: usize,
    ) -> Self {
        let budget = max_block_pixels.max(1);
        let (mut width, mut height) = (cols.max(1), rows.max(1));
        while width * height > budget && (width > 1 || height > 1) {
            if width >= height {
                width = width.div_ceil(2);
            } else {
                height = height.div_ceil(2);
            }
        }

        let blocks_x = cols.div_ceil(width);
        let blocks_y = rows.div_ceil(height);
        let overlap = if blocks_x * blocks_y <= 1 {
            0
        } else {
            let side = width.min(height);
            let by_percent = (side * overlap_percent as usize).div_ceil(100);
            min_overlap.max(by_percent).min(side / 2)
        };

        let mut blocks = Vec::with_capacity(blocks_x * blocks_y);
        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                let x = bx * width;
                let y = by * height;
                let core = Rect::new(x, y, width.min(cols - x), height.min(rows - y));
                blocks.push(Block {
                    index: blocks.len(),
                    core,
                    extended: core.expand(overlap, cols, rows),
                });
            }
        }

        BlockLayout {
            cols,
            rows,
            block_width: width,
            block_height: height,
            blocks_x,
            blocks_y,
            overlap,
            blocks,
        }
    }

    /// The whole raster as one block.
    pub fn single(cols: usize, rows: usize) -> Self {
        Self::compute(cols, rows, cols.saturating_mul(rows), 0, 0)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Strips straddling the block seams, `2 · margin` wide, one per block
    /// row for vertical seams and one per block column for horizontal seams.
    pub fn seam_strips(&self) -> Vec<Rect> {
        let margin = self.overlap.max(1);
        let mut strips = Vec::new();

        for bx in 1..self.blocks_x {
            let seam = bx * self.block_width;
            let x = seam.saturating_sub(margin);
            let x_bound = (seam + margin).min(self.cols);
            for by in 0..self.blocks_y {
                let y = by * self.block_height;
                let height = self.block_height.min(self.rows - y);
                strips.push(Rect::new(x, y, x_bound - x, height));
            }
        }

        for by in 1..self.blocks_y {
            let seam = by * self.block_height;
            let y = seam.saturating_sub(margin);
            let y_bound = (seam + margin).min(self.rows);
            for bx in 0..self.blocks_x {
                let x = bx * self.block_width;
                let width = self.block_width.min(self.cols - x);
                strips.push(Rect::new(x, y, width, y_bound - y));
            }
        }
        strips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block_when_budget_fits() {
        let layout = BlockLayout::compute(10, 8, 80, 10, 3);

        assert_eq!(layout.len(), 1);
        assert_eq!(layout.overlap, 0);
        assert_eq!(layout.blocks()[0].core, Rect::new(0, 0, 10, 8));
        assert_eq!(layout.blocks()[0].extended, layout.blocks()[0].core);
        assert!(layout.seam_strips().is_empty());
    }

    #[test]
    fn test_halving_prefers_width_on_ties() {
        let layout = BlockLayout::compute(4, 4, 8, 50, 1);

        assert_eq!((layout.block_width, layout.block_height), (2, 4));
        assert_eq!((layout.blocks_x, layout.blocks_y), (2, 1));
        assert_eq!(layout.overlap, 1);

        let blocks = layout.blocks();
        assert_eq!(blocks[0].core, Rect::new(0, 0, 2, 4));
        assert_eq!(blocks[0].extended, Rect::new(0, 0, 3, 4));
        assert_eq!(blocks[1].core, Rect::new(2, 0, 2, 4));
        assert_eq!(blocks[1].extended, Rect::new(1, 0, 3, 4));
    }

    #[test]
    fn test_uneven_grid_covers_raster() {
        let layout = BlockLayout::compute(10, 7, 20, 10, 1);
        assert!(layout.block_width * layout.block_height <= 20);

        let mut covered = vec![0u8; 70];
        for block in layout.blocks() {
            assert!(block.core.area() > 0);
            for y in block.core.y..block.core.y_bound() {
                for x in block.core.x..block.core.x_bound() {
                    covered[y * 10 + x] += 1;
                }
            }
            assert!(block.extended.x_bound() <= 10);
            assert!(block.extended.y_bound() <= 7);
        }
        assert!(covered.iter().all(|&count| count == 1));
    }

    #[test]
    fn test_seam_strips() {
        let layout = BlockLayout::compute(8, 8, 16, 50, 1);
        assert_eq!((layout.blocks_x, layout.blocks_y), (2, 2));
        assert_eq!(layout.overlap, 2);

        let strips = layout.seam_strips();
        assert_eq!(strips.len(), 4);
        assert_eq!(strips[0], Rect::new(2, 0, 4, 4));
        assert_eq!(strips[1], Rect::new(2, 4, 4, 4));
        assert_eq!(strips[2], Rect::new(0, 2, 4, 4));
        assert_eq!(strips[3], Rect::new(4, 2, 4, 4));
    }

    #[test]
    fn test_rect_expand_clips() {
        let rect = Rect::new(1, 1, 2, 2);
        assert_eq!(rect.expand(3, 5, 4), Rect::new(0, 0, 5, 4));
        assert!(rect.contains(2, 2));
        assert!(!rect.contains(3, 2));
    }
}
