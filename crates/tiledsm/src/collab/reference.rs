use std::sync::Arc;

use super::filters::{remove_small_components, remove_statistical_outliers};
use super::types::{Band, CountBand, PointCloud, RasterStats, RasterTile};
use super::{Projector, RasterizationRequest, Rasterizer};
use crate::error::{DsmError, Result};
use crate::srs::Epsg;

/// Projector that only knows the identity (plus the geocentric
/// conversions provided by [`Projector::project_points_3d`]).
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProjector;

impl Projector for IdentityProjector {
    fn project_points(&self, points: &[[f64; 2]], from: Epsg, to: Epsg) -> Result<Vec<[f64; 2]>> {
        if from == to {
            Ok(points.to_vec())
        } else {
            Err(DsmError::Geometry(format!(
                "no projection from {from} to {to} (enable the `proj` feature)"
            )))
        }
    }
}

/// Gaussian-weighted gridding of points on a north-up window.
///
/// Every point contributes to the cells within `radius` cells of the cell
/// it falls in, with weight `exp(-d² / 2σ²)` on its distance to the cell
/// centre. σ defaults to the resolution.
pub struct GaussianRasterizer {
    projector: Arc<dyn Projector>,
}

impl GaussianRasterizer {
    pub fn new(projector: Arc<dyn Projector>) -> Self {
        Self { projector }
    }

    /// Concatenate the clouds in the frame of the first one.
    fn merge(&self, clouds: &[&PointCloud]) -> Result<Option<PointCloud>> {
        let Some(first) = clouds.first() else {
            return Ok(None);
        };
        let bands = first.band_count();
        let mut merged = PointCloud::new(first.epsg, bands);
        for cloud in clouds {
            if cloud.band_count() != bands {
                return Err(DsmError::Raster(format!(
                    "cannot merge clouds with {} and {} color bands",
                    bands,
                    cloud.band_count()
                )));
            }
            let points = self.projector.project_points_3d(&cloud.points, cloud.epsg, merged.epsg)?;
            merged.points.extend(points);
            for (dst, src) in merged.colors.iter_mut().zip(&cloud.colors) {
                dst.extend_from_slice(src);
            }
        }
        Ok(Some(merged))
    }
}

/// Weighted sums for the window rows `row0..row0 + rows`.
struct Accumulator {
    w: usize,
    row0: usize,
    rows: usize,
    sum_w: Vec<f64>,
    sum_wz: Vec<f64>,
    sum_wc: Vec<Vec<f64>>,
    n: Vec<u32>,
    in_cell: Vec<u32>,
    sum_z: Vec<f64>,
    sum_z2: Vec<f64>,
}

impl Accumulator {
    fn new(w: usize, row0: usize, rows: usize, bands: usize) -> Self {
        let len = w * rows;
        Self {
            w,
            row0,
            rows,
            sum_w: vec![0.0; len],
            sum_wz: vec![0.0; len],
            sum_wc: vec![vec![0.0; len]; bands],
            n: vec![0; len],
            in_cell: vec![0; len],
            sum_z: vec![0.0; len],
            sum_z2: vec![0.0; len],
        }
    }

    /// Add every point whose neighbourhood reaches the covered rows.
    fn accumulate(&mut self, points: &[[f64; 3]], colors: &[Vec<f32>], req: &RasterizationRequest) {
        let res = req.resolution;
        let sigma = req.sigma.unwrap_or(res);
        let inv_two_sigma2 = 1.0 / (2.0 * sigma * sigma);
        let r = req.radius as i64;
        let (lo, hi) = (self.row0 as i64, (self.row0 + self.rows) as i64);
        let last_col = self.w as i64 - 1;

        for (idx, p) in points.iter().enumerate() {
            let row = ((req.window.ystart - p[1]) / res).floor() as i64;
            if row + r < lo || row - r >= hi {
                continue;
            }
            let col = ((p[0] - req.window.xstart) / res).floor() as i64;
            for rr in (row - r).max(lo)..=(row + r).min(hi - 1) {
                for cc in (col - r).max(0)..=(col + r).min(last_col) {
                    let cell = (rr - lo) as usize * self.w + cc as usize;
                    let cx = req.window.xstart + (cc as f64 + 0.5) * res;
                    let cy = req.window.ystart - (rr as f64 + 0.5) * res;
                    let d2 = (p[0] - cx).powi(2) + (p[1] - cy).powi(2);
                    let wgt = (-d2 * inv_two_sigma2).exp();
                    self.sum_w[cell] += wgt;
                    self.sum_wz[cell] += wgt * p[2];
                    for (sums, band) in self.sum_wc.iter_mut().zip(colors) {
                        sums[cell] += wgt * band[idx] as f64;
                    }
                    self.n[cell] += 1;
                    self.sum_z[cell] += p[2];
                    self.sum_z2[cell] += p[2] * p[2];
                    if rr == row && cc == col {
                        self.in_cell[cell] += 1;
                    }
                }
            }
        }
    }

    /// Write the cell values into their rows of `out`. Returns whether any
    /// cell received a point.
    fn drain_into(self, out: &mut TileBands, req: &RasterizationRequest) -> bool {
        let nodata = req.dsm_no_data as f32;
        let base = self.row0 * self.w;
        let mut any = false;
        for c in 0..self.w * self.rows {
            let n = self.n[c];
            any |= n > 0;
            let filled = n > 0 && self.sum_w[c] > 0.0;
            out.height[base + c] = if filled {
                (self.sum_wz[c] / self.sum_w[c]) as f32
            } else {
                nodata
            };
            for (dst, sums) in out.color.iter_mut().zip(&self.sum_wc) {
                dst[base + c] = if filled {
                    (sums[c] / self.sum_w[c]) as f32
                } else {
                    req.color_no_data as f32
                };
            }
            if let Some(s) = out.stats.as_mut() {
                if n > 0 {
                    let mean = self.sum_z[c] / n as f64;
                    s.mean[base + c] = mean as f32;
                    s.std_dev[base + c] = (self.sum_z2[c] / n as f64 - mean * mean).max(0.0).sqrt() as f32;
                } else {
                    s.mean[base + c] = nodata;
                    s.std_dev[base + c] = nodata;
                }
                s.n_pts[base + c] = n.min(u16::MAX as u32) as u16;
                s.pts_in_cell[base + c] = self.in_cell[c].min(u16::MAX as u32) as u16;
            }
        }
        any
    }
}

/// Rows per rasterization pass when the window is split `factor` ways.
fn rows_per_pass(height: usize, factor: Option<usize>) -> usize {
    match factor {
        Some(f) if f > 1 => height.div_ceil(f).max(1),
        _ => height,
    }
}

struct StatsBuffers {
    mean: Vec<f32>,
    std_dev: Vec<f32>,
    n_pts: Vec<u16>,
    pts_in_cell: Vec<u16>,
}

/// Row-major output samples of a whole tile.
struct TileBands {
    height: Vec<f32>,
    color: Vec<Vec<f32>>,
    stats: Option<StatsBuffers>,
}

impl TileBands {
    fn new(len: usize, bands: usize, with_stats: bool) -> Self {
        Self {
            height: vec![0.0; len],
            color: vec![vec![0.0; len]; bands],
            stats: with_stats.then(|| StatsBuffers {
                mean: vec![0.0; len],
                std_dev: vec![0.0; len],
                n_pts: vec![0; len],
                pts_in_cell: vec![0; len],
            }),
        }
    }

    fn into_tile(self, req: &RasterizationRequest) -> Result<RasterTile> {
        let (w, h) = (req.window.xsize as u32, req.window.ysize as u32);
        let short = || DsmError::Raster(format!("band buffer too small for a {w}x{h} tile"));
        let band = |v: Vec<f32>| Band::from_raw(w, h, v).ok_or_else(short);
        let counts = |v: Vec<u16>| CountBand::from_raw(w, h, v).ok_or_else(short);
        let stats = match self.stats {
            Some(s) => Some(RasterStats {
                mean: band(s.mean)?,
                std_dev: band(s.std_dev)?,
                n_pts: counts(s.n_pts)?,
                pts_in_cell: counts(s.pts_in_cell)?,
            }),
            None => None,
        };
        Ok(RasterTile {
            window: req.window,
            resolution: req.resolution,
            height: band(self.height)?,
            color: self.color.into_iter().map(band).collect::<Result<_>>()?,
            stats,
        })
    }
}

impl Rasterizer for GaussianRasterizer {
    /// The window is gridded in horizontal passes of
    /// `ceil(rows / grid_points_division_factor)` rows; only one pass holds
    /// weighted sums at a time.
    fn rasterize(
        &self,
        clouds: &[&PointCloud],
        req: &RasterizationRequest,
    ) -> Result<Option<RasterTile>> {
        let Some(mut cloud) = self.merge(clouds)? else {
            return Ok(None);
        };
        if let Some(p) = &req.filters.small_components {
            remove_small_components(&mut cloud, p);
        }
        if let Some(p) = &req.filters.statistical_outliers {
            remove_statistical_outliers(&mut cloud, p);
        }
        let points = self.projector.project_points_3d(&cloud.points, cloud.epsg, req.epsg)?;

        let (w, h) = (req.window.xsize, req.window.ysize);
        if w == 0 || h == 0 || points.is_empty() {
            return Ok(None);
        }
        let bands = cloud.band_count();
        let mut out = TileBands::new(w * h, bands, req.with_stats);
        let step = rows_per_pass(h, req.grid_points_division_factor);
        let mut any = false;
        for row0 in (0..h).step_by(step) {
            let mut acc = Accumulator::new(w, row0, step.min(h - row0), bands);
            acc.accumulate(&points, &cloud.colors, req);
            any |= acc.drain_into(&mut out, req);
        }
        if !any {
            return Ok(None);
        }
        out.into_tile(req).map(Some)
    }
}
