use std::collections::BTreeMap;

use image::{ImageBuffer, Luma};

use crate::srs::Epsg;
use crate::tiling::{OriginWindow, Region, TileKey};

/// Single-band `f32` raster.
pub type Band = ImageBuffer<Luma<f32>, Vec<f32>>;
/// Single-band `u16` raster.
pub type CountBand = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Which disparity map a set of points comes from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DisparityMode {
    /// Left-to-right disparity, referenced on the left image.
    Primary,
    /// Right-to-left disparity, referenced on the right image.
    Secondary,
}

/// 3D points with per-band colors.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    pub epsg: Epsg,
    pub points: Vec<[f64; 3]>,
    /// Band-major colors: `colors[band][point]`.
    pub colors: Vec<Vec<f32>>,
}

impl PointCloud {
    pub fn new(epsg: Epsg, bands: usize) -> Self {
        Self {
            epsg,
            points: Vec::new(),
            colors: vec![Vec::new(); bands],
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn band_count(&self) -> usize {
        self.colors.len()
    }

    pub fn push(&mut self, point: [f64; 3], color: &[f32]) {
        self.points.push(point);
        for (band, &c) in self.colors.iter_mut().zip(color) {
            band.push(c);
        }
    }

    /// Keep the points whose flag is set.
    pub fn retain_mask(&mut self, keep: &[bool]) {
        let mut k = keep.iter();
        self.points.retain(|_| *k.next().unwrap_or(&false));
        for band in &mut self.colors {
            let mut k = keep.iter();
            band.retain(|_| *k.next().unwrap_or(&false));
        }
    }
}

/// Stage-1 output: the point clouds triangulated from one epipolar tile.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloudTile {
    pub pair_id: String,
    pub key: TileKey,
    /// Epipolar region the points come from.
    pub region: Region,
    pub clouds: BTreeMap<DisparityMode, PointCloud>,
}

impl PointCloudTile {
    pub fn cloud(&self, mode: DisparityMode) -> Option<&PointCloud> {
        self.clouds.get(&mode)
    }

    pub fn point_count(&self) -> usize {
        self.clouds.values().map(PointCloud::len).sum()
    }
}

/// Per-cell statistics of a rasterized tile.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterStats {
    pub mean: Band,
    pub std_dev: Band,
    /// Points within the rasterization radius of the cell.
    pub n_pts: CountBand,
    /// Points falling inside the cell.
    pub pts_in_cell: CountBand,
}

/// Stage-2 output: one terrain tile on the output grid.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    /// Top-left corner and size in cells.
    pub window: OriginWindow,
    pub resolution: f64,
    pub height: Band,
    pub color: Vec<Band>,
    pub stats: Option<RasterStats>,
}

impl RasterTile {
    pub fn width(&self) -> usize {
        self.height.width() as usize
    }

    pub fn rows(&self) -> usize {
        self.height.height() as usize
    }

    /// Bounds of the cell centres, `[min_x, min_y, max_x, max_y]`.
    pub fn center_bounds(&self) -> Region {
        let half = self.resolution / 2.0;
        let w = self.width() as f64;
        let h = self.rows() as f64;
        Region::new(
            self.window.xstart + half,
            self.window.ystart - (h - 0.5) * self.resolution,
            self.window.xstart + (w - 0.5) * self.resolution,
            self.window.ystart - half,
        )
    }

    /// Every band must share the height band's dimensions.
    pub fn check_shape(&self) -> Result<(), String> {
        let dims = self.height.dimensions();
        let mut bands: Vec<(&str, (u32, u32))> =
            self.color.iter().map(|b| ("color", b.dimensions())).collect();
        if let Some(s) = &self.stats {
            bands.push(("mean", s.mean.dimensions()));
            bands.push(("std_dev", s.std_dev.dimensions()));
            bands.push(("n_pts", s.n_pts.dimensions()));
            bands.push(("pts_in_cell", s.pts_in_cell.dimensions()));
        }
        for (name, d) in bands {
            if d != dims {
                return Err(format!("{name} band is {}x{}, height band is {}x{}", d.0, d.1, dims.0, dims.1));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retain_mask_keeps_colors_aligned() {
        let mut c = PointCloud::new(Epsg(32631), 2);
        for k in 0..4 {
            c.push([k as f64, 0.0, 0.0], &[k as f32, 10.0 + k as f32]);
        }
        c.retain_mask(&[true, false, true, false]);
        assert_eq!(c.points, vec![[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
        assert_eq!(c.colors, vec![vec![0.0, 2.0], vec![10.0, 12.0]]);
    }

    #[test]
    fn center_bounds_are_half_a_cell_inside() {
        let tile = RasterTile {
            window: OriginWindow {
                xstart: 100.0,
                ystart: 50.0,
                xsize: 4,
                ysize: 2,
            },
            resolution: 0.5,
            height: Band::new(4, 2),
            color: vec![],
            stats: None,
        };
        assert_eq!(tile.center_bounds(), Region::new(100.25, 49.25, 101.75, 49.75));
        assert!(tile.check_shape().is_ok());
    }
}
