//! Axis-aligned rectangular regions in pixel or projected coordinates.

use crate::error::{DsmError, Result};

/// Relative slack used when counting whole cells in an extent, so that
/// `30.000000000001 / 0.5` still counts as 60 cells.
const CELL_COUNT_EPS: f64 = 1e-9;

/// Rectangle `{xmin, ymin, xmax, ymax}`.
///
/// A region with `xmin >= xmax` or `ymin >= ymax` is empty. Serialized as
/// `[xmin, ymin, xmax, ymax]`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Region {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl From<[f64; 4]> for Region {
    fn from(b: [f64; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }
}

impl From<Region> for [f64; 4] {
    fn from(r: Region) -> Self {
        r.to_array()
    }
}

/// Raster origin window handed to the rasterizer: top-left corner plus
/// size in cells.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OriginWindow {
    /// Left edge (xmin of the region).
    pub xstart: f64,
    /// Top edge (ymax of the region).
    pub ystart: f64,
    /// Columns.
    pub xsize: usize,
    /// Rows.
    pub ysize: usize,
}

impl Region {
    pub const fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Area, zero for empty regions.
    pub fn area(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    /// True iff `xmin >= xmax` or `ymin >= ymax`.
    ///
    /// NaN bounds never compare as ordered, so they count as empty too.
    pub fn is_empty(&self) -> bool {
        !(self.xmin < self.xmax && self.ymin < self.ymax)
    }

    /// Clamp every bound of `self` into `container`.
    ///
    /// When `self` lies outside `container` the result is empty; callers
    /// check [`Region::is_empty`].
    pub fn crop(&self, container: &Region) -> Region {
        let clamp_x = |v: f64| container.xmax.min(container.xmin.max(v));
        let clamp_y = |v: f64| container.ymax.min(container.ymin.max(v));
        Region {
            xmin: clamp_x(self.xmin),
            ymin: clamp_y(self.ymin),
            xmax: clamp_x(self.xmax),
            ymax: clamp_y(self.ymax),
        }
    }

    /// Expand by per-edge margins given in `[xmin, ymin, xmax, ymax]` order.
    /// Positive margins grow the region on every side.
    pub fn pad(&self, margins: [f64; 4]) -> Region {
        Region {
            xmin: self.xmin - margins[0],
            ymin: self.ymin - margins[1],
            xmax: self.xmax + margins[2],
            ymax: self.ymax + margins[3],
        }
    }

    /// Positive-area overlap test.
    pub fn intersects(&self, other: &Region) -> bool {
        self.xmin < other.xmax
            && other.xmin < self.xmax
            && self.ymin < other.ymax
            && other.ymin < self.ymax
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }

    /// Floor the minimum bounds and ceil the maximum bounds to multiples of
    /// `resolution`.
    pub fn snap_to_grid(&self, resolution: f64) -> Region {
        Region {
            xmin: (self.xmin / resolution).floor() * resolution,
            ymin: (self.ymin / resolution).floor() * resolution,
            xmax: (self.xmax / resolution).ceil() * resolution,
            ymax: (self.ymax / resolution).ceil() * resolution,
        }
    }

    /// Top-left corner and size in cells of a north-up raster covering the
    /// region at `resolution`.
    pub fn origin_window(&self, resolution: f64) -> OriginWindow {
        OriginWindow {
            xstart: self.xmin,
            ystart: self.ymax,
            xsize: cell_count(self.width(), resolution),
            ysize: cell_count(self.height(), resolution),
        }
    }

    /// Smallest region enclosing every input region.
    pub fn union<'a, I>(regions: I) -> Result<Region>
    where
        I: IntoIterator<Item = &'a Region>,
    {
        let mut iter = regions.into_iter();
        let first = *iter
            .next()
            .ok_or_else(|| DsmError::EmptyInput("no regions to union".into()))?;
        Ok(iter.fold(first, |acc, r| Region {
            xmin: acc.xmin.min(r.xmin),
            ymin: acc.ymin.min(r.ymin),
            xmax: acc.xmax.max(r.xmax),
            ymax: acc.ymax.max(r.ymax),
        }))
    }

    /// Bounding box of a set of 2D points.
    pub fn from_points<'a, I>(points: I) -> Option<Region>
    where
        I: IntoIterator<Item = &'a [f64; 2]>,
    {
        let mut iter = points.into_iter();
        let p = iter.next()?;
        let mut r = Region::new(p[0], p[1], p[0], p[1]);
        for p in iter {
            r.xmin = r.xmin.min(p[0]);
            r.ymin = r.ymin.min(p[1]);
            r.xmax = r.xmax.max(p[0]);
            r.ymax = r.ymax.max(p[1]);
        }
        Some(r)
    }

    /// Corner polygon, counter-clockwise from `(xmin, ymin)`.
    pub fn corners(&self) -> [[f64; 2]; 4] {
        [
            [self.xmin, self.ymin],
            [self.xmax, self.ymin],
            [self.xmax, self.ymax],
            [self.xmin, self.ymax],
        ]
    }
}

/// Number of `step`-sized cells needed to cover `extent`.
pub(crate) fn cell_count(extent: f64, step: f64) -> usize {
    if !(extent > 0.0) || !(step > 0.0) {
        return 0;
    }
    let ratio = extent / step;
    (ratio - ratio * CELL_COUNT_EPS).ceil().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn empty_iff_degenerate_axis() {
        assert!(!Region::new(0.0, 0.0, 1.0, 1.0).is_empty());
        assert!(Region::new(1.0, 0.0, 1.0, 1.0).is_empty());
        assert!(Region::new(0.0, 2.0, 1.0, 1.0).is_empty());
        assert!(Region::new(0.0, 0.0, f64::NAN, 1.0).is_empty());
    }

    #[test]
    fn crop_clamps_into_container() {
        let c = Region::new(0.0, 0.0, 100.0, 50.0);
        let r = Region::new(-10.0, 10.0, 40.0, 80.0);
        assert_eq!(r.crop(&c), Region::new(0.0, 10.0, 40.0, 50.0));

        let outside = Region::new(120.0, 0.0, 130.0, 10.0);
        let cropped = outside.crop(&c);
        assert!(cropped.is_empty());
        assert_eq!(cropped.xmin, 100.0);
    }

    #[test]
    fn crop_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let c = Region::new(
                rng.gen_range(-50.0..0.0),
                rng.gen_range(-50.0..0.0),
                rng.gen_range(0.0..50.0),
                rng.gen_range(0.0..50.0),
            );
            let r = Region::new(
                rng.gen_range(-100.0..100.0),
                rng.gen_range(-100.0..100.0),
                rng.gen_range(-100.0..100.0),
                rng.gen_range(-100.0..100.0),
            );
            let once = r.crop(&c);
            assert_eq!(once.crop(&c), once);
        }
    }

    #[test]
    fn union_of_nothing_is_empty_input() {
        let err = Region::union(&[] as &[Region]).expect_err("union of empty list must fail");
        assert!(matches!(err, DsmError::EmptyInput(_)));

        let u = Region::union(&[
            Region::new(0.0, 5.0, 1.0, 6.0),
            Region::new(-2.0, 7.0, 0.5, 9.0),
        ])
        .unwrap();
        assert_eq!(u, Region::new(-2.0, 5.0, 1.0, 9.0));
    }

    #[test]
    fn pad_grows_each_edge() {
        let r = Region::new(10.0, 20.0, 30.0, 40.0).pad([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(r, Region::new(9.0, 18.0, 33.0, 44.0));
    }

    #[test]
    fn snap_and_origin_window() {
        let r = Region::new(10.2, -3.7, 20.1, 4.2).snap_to_grid(0.5);
        assert_relative_eq!(r.xmin, 10.0);
        assert_relative_eq!(r.ymin, -4.0);
        assert_relative_eq!(r.xmax, 20.5);
        assert_relative_eq!(r.ymax, 4.5);

        let w = r.origin_window(0.5);
        assert_eq!(w.xstart, 10.0);
        assert_eq!(w.ystart, 4.5);
        assert_eq!((w.xsize, w.ysize), (21, 17));
    }

    #[test]
    fn cell_count_tolerates_float_noise() {
        assert_eq!(cell_count(30.000_000_000_001, 0.5), 60);
        assert_eq!(cell_count(30.1, 0.5), 61);
        assert_eq!(cell_count(0.0, 0.5), 0);
        assert_eq!(cell_count(-3.0, 0.5), 0);
    }

    #[test]
    fn serializes_as_bounds_array() {
        let r = Region::new(1.0, 2.0, 3.0, 4.0);
        let s = serde_json::to_string(&r).unwrap();
        assert_eq!(s, "[1.0,2.0,3.0,4.0]");
        let back: Region = serde_json::from_str(&s).unwrap();
        assert_eq!(back, r);
    }
}
