//! Regular tile grids over a bounding box.

use super::region::{cell_count, Region};

/// Vertex grid of `rows x cols` cells, stored row-major with shape
/// `(rows + 1, cols + 1)`.
///
/// Row index `j` runs along y, column index `i` along x. The last row and
/// column are clamped to the bounding box and may be narrower than the
/// nominal split size.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TileGrid {
    pub rows: usize,
    pub cols: usize,
    vertices: Vec<[f64; 2]>,
}

impl TileGrid {
    /// Build the clamped vertex grid of `bounds` split into cells of
    /// `split_width x split_height`.
    ///
    /// Degenerate bounds or non-positive split sizes give a grid with no
    /// cells.
    pub fn new(bounds: &Region, split_width: f64, split_height: f64) -> Self {
        let cols = cell_count(bounds.width(), split_width);
        let rows = cell_count(bounds.height(), split_height);
        let xs = edges(bounds.xmin, bounds.xmax, split_width, cols);
        let ys = edges(bounds.ymin, bounds.ymax, split_height, rows);

        let mut vertices = Vec::with_capacity(xs.len() * ys.len());
        for &y in &ys {
            for &x in &xs {
                vertices.push([x, y]);
            }
        }
        Self {
            rows,
            cols,
            vertices,
        }
    }

    /// Vertex at row `j`, column `i`.
    pub fn vertex(&self, j: usize, i: usize) -> [f64; 2] {
        self.vertices[j * (self.cols + 1) + i]
    }

    /// All vertices, row-major.
    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.vertices
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Cell spanned by vertices `(j, i)` and `(j + 1, i + 1)`.
    pub fn cell(&self, j: usize, i: usize) -> Region {
        let lo = self.vertex(j, i);
        let hi = self.vertex(j + 1, i + 1);
        Region::new(lo[0], lo[1], hi[0], hi[1])
    }

    /// Cells in row-major order as `(j, i, region)`.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, Region)> + '_ {
        (0..self.rows).flat_map(move |j| (0..self.cols).map(move |i| (j, i, self.cell(j, i))))
    }

    /// Vertex indices (flat, row-major) of the four corners of cell `(j, i)`.
    pub(crate) fn cell_corner_indices(&self, j: usize, i: usize) -> [usize; 4] {
        let stride = self.cols + 1;
        [
            j * stride + i,
            (j + 1) * stride + i,
            (j + 1) * stride + i + 1,
            j * stride + i + 1,
        ]
    }
}

/// Split `bounds` into cells of `split_width x split_height`, enumerated
/// x-major (all rows of the first column, then the next column), each
/// cropped to `bounds`.
pub fn split(bounds: &Region, split_width: f64, split_height: f64) -> Vec<Region> {
    let cols = cell_count(bounds.width(), split_width);
    let rows = cell_count(bounds.height(), split_height);
    let xs = edges(bounds.xmin, bounds.xmax, split_width, cols);
    let ys = edges(bounds.ymin, bounds.ymax, split_height, rows);

    let mut out = Vec::with_capacity(rows * cols);
    for i in 0..cols {
        for j in 0..rows {
            out.push(Region::new(xs[i], ys[j], xs[i + 1], ys[j + 1]).crop(bounds));
        }
    }
    out
}

/// `n + 1` edge coordinates from `lo` in steps of `step`, clamped to `hi`,
/// with the final edge pinned to `hi`.
fn edges(lo: f64, hi: f64, step: f64, n: usize) -> Vec<f64> {
    if n == 0 {
        return vec![lo];
    }
    let mut out: Vec<f64> = (0..n).map(|k| hi.min(lo + k as f64 * step)).collect();
    out.push(hi);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn grid_is_clamped_to_bounds() {
        let g = TileGrid::new(&Region::new(0.0, 0.0, 100.0, 50.0), 30.0, 20.0);
        assert_eq!((g.rows, g.cols), (3, 4));
        assert_eq!(g.vertex_count(), 4 * 5);
        assert_eq!(g.vertex(0, 0), [0.0, 0.0]);
        assert_eq!(g.vertex(0, 3), [90.0, 0.0]);
        assert_eq!(g.vertex(0, 4), [100.0, 0.0]);
        assert_eq!(g.vertex(3, 4), [100.0, 50.0]);
        assert_eq!(g.cell(2, 3), Region::new(90.0, 40.0, 100.0, 50.0));
    }

    #[test]
    fn degenerate_bounds_yield_nothing() {
        assert!(split(&Region::new(0.0, 0.0, 0.0, 10.0), 5.0, 5.0).is_empty());
        assert!(split(&Region::new(0.0, 0.0, 10.0, 10.0), 0.0, 5.0).is_empty());
        let g = TileGrid::new(&Region::new(3.0, 3.0, 3.0, 3.0), 1.0, 1.0);
        assert_eq!(g.cell_count(), 0);
        assert_eq!(g.cells().count(), 0);
    }

    #[test]
    fn split_order_is_x_major() {
        let tiles = split(&Region::new(0.0, 0.0, 20.0, 20.0), 10.0, 10.0);
        assert_eq!(
            tiles,
            vec![
                Region::new(0.0, 0.0, 10.0, 10.0),
                Region::new(0.0, 10.0, 10.0, 20.0),
                Region::new(10.0, 0.0, 20.0, 10.0),
                Region::new(10.0, 10.0, 20.0, 20.0),
            ]
        );
    }

    #[test]
    fn split_matches_grid_cells() {
        let b = Region::new(-3.0, 7.0, 61.5, 40.0);
        let g = TileGrid::new(&b, 7.0, 9.0);
        let mut from_grid: Vec<_> = g.cells().map(|(_, _, r)| r.to_array()).collect();
        let mut from_split: Vec<_> = split(&b, 7.0, 9.0).iter().map(|r| r.to_array()).collect();
        from_grid.sort_by(|a, b| a.partial_cmp(b).unwrap());
        from_split.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(from_grid, from_split);
    }

    #[test]
    fn split_reconstructs_bounds_without_gaps_or_overlaps() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let xmin = rng.gen_range(-500.0..500.0);
            let ymin = rng.gen_range(-500.0..500.0);
            let b = Region::new(
                xmin,
                ymin,
                xmin + rng.gen_range(0.5..300.0),
                ymin + rng.gen_range(0.5..300.0),
            );
            let (sw, sh) = (rng.gen_range(0.7..80.0), rng.gen_range(0.7..80.0));
            let tiles = split(&b, sw, sh);

            assert!(tiles.iter().all(|t| !t.is_empty()));
            let area: f64 = tiles.iter().map(Region::area).sum();
            assert!(
                (area - b.area()).abs() <= 1e-9 * b.area(),
                "area {area} vs {}",
                b.area()
            );
            assert_eq!(Region::union(&tiles).unwrap(), b);
            for (k, a) in tiles.iter().enumerate() {
                for c in &tiles[k + 1..] {
                    assert!(!a.intersects(c), "{a:?} overlaps {c:?}");
                }
            }
        }
    }
}
