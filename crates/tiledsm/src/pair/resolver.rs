use std::sync::Arc;

use tracing::{info, warn};

use super::tile_size::{optimal_epipolar_tile_size, optimal_terrain_tile_size};
use super::PairGeometry;
use crate::collab::Collaborators;
use crate::config::{DsmParams, PairInput, StaticParams};
use crate::error::{DsmError, Result};
use crate::polygon::Polygon;
use crate::srs::Epsg;
use crate::tiling::{split, Region, TileGrid};

/// Disparity search range of a pair, pixels.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct DisparityRange {
    pub min: f64,
    pub max: f64,
}

/// Turns preprocessing metadata and run parameters into per-pair
/// geometry and the common terrain tiling.
pub struct DisparityBoundsResolver<'a> {
    params: &'a DsmParams,
    static_params: &'a StaticParams,
    collab: &'a Collaborators,
}

impl<'a> DisparityBoundsResolver<'a> {
    pub fn new(params: &'a DsmParams, static_params: &'a StaticParams, collab: &'a Collaborators) -> Self {
        Self {
            params,
            static_params,
            collab,
        }
    }

    /// Estimated range, narrowed by the elevation offsets.
    ///
    /// The minimum override only applies when it is tighter than the
    /// estimate; the maximum override always replaces the estimate.
    pub fn disparity_range(&self, pair: &PairInput) -> DisparityRange {
        let out = pair.config.output();
        let ratio = out.disp_to_alt_ratio;
        let mut min = out.minimum_disparity;
        let mut max = out.maximum_disparity;

        if let Some(offset) = self.params.min_elevation_offset {
            let user_min = offset / ratio;
            if user_min > min {
                warn!(
                    "pair {}: min elevation offset {offset:.2} m is less permissive than the \
                     estimated disparity minimum, using {user_min:.3} px instead of {min:.3} px",
                    pair.id
                );
                min = user_min;
            }
        }
        if let Some(offset) = self.params.max_elevation_offset {
            let user_max = offset / ratio;
            if user_max < max {
                warn!(
                    "pair {}: max elevation offset {offset:.2} m is less permissive than the \
                     estimated disparity maximum, using {user_max:.3} px instead of {max:.3} px",
                    pair.id
                );
            }
            max = user_max;
        }

        info!(
            "pair {}: disparity range [{min:.3}, {max:.3}] px ([{:.2}, {:.2}] m)",
            pair.id,
            min * ratio,
            max * ratio
        );
        DisparityRange { min, max }
    }

    /// Output spatial reference: the requested one, or the UTM zone of the
    /// first pair's epipolar corners at the minimum of its already resolved
    /// `ranges[0]`.
    pub fn output_epsg(&self, pairs: &[Arc<PairInput>], ranges: &[DisparityRange]) -> Result<Epsg> {
        if let Some(epsg) = self.params.epsg {
            return Ok(epsg);
        }
        let (Some(first), Some(range)) = (pairs.first(), ranges.first()) else {
            return Err(DsmError::EmptyInput("no input pairs".into()));
        };
        let corners = self.collab.geometry.epipolar_to_terrain(
            first,
            &epipolar_corners(first),
            range.min,
            Epsg::WGS84,
        )?;
        let n = corners.len() as f64;
        let lon = corners.iter().map(|c| c[0]).sum::<f64>() / n;
        let lat = corners.iter().map(|c| c[1]).sum::<f64>() / n;
        let epsg = Epsg::utm_for(lon, lat);
        info!("no output EPSG given, using {epsg} (scene centre {lon:.4}, {lat:.4})");
        Ok(epsg)
    }

    /// Resolve one pair in the output spatial reference.
    pub fn resolve(&self, pair: Arc<PairInput>, epsg: Epsg) -> Result<PairGeometry> {
        let disparity = self.disparity_range(&pair);
        self.resolve_with_range(pair, disparity, epsg)
    }

    /// [`Self::resolve`] with the disparity range already computed.
    pub fn resolve_with_range(
        &self,
        pair: Arc<PairInput>,
        disparity: DisparityRange,
        epsg: Epsg,
    ) -> Result<PairGeometry> {
        let out = pair.config.output().clone();
        let corners = epipolar_corners(&pair);

        let geometry = &self.collab.geometry;
        let at_min = geometry.epipolar_to_terrain(&pair, &corners, disparity.min, epsg)?;
        let at_max = geometry.epipolar_to_terrain(&pair, &corners, disparity.max, epsg)?;
        let swept: Vec<[f64; 2]> = at_min.iter().chain(&at_max).copied().collect();
        let terrain_envelope = Region::from_points(&swept)
            .ok_or_else(|| DsmError::Geometry(format!("pair {}: no terrain corners", pair.id)))?;

        let coverage = match &out.envelopes_intersection {
            Some(env) => self
                .collab
                .projector
                .project_polygon(&env.polygon, env.epsg, epsg)?,
            None => Polygon::convex_hull(&swept),
        };
        let terrain_bbox = coverage
            .bounds()
            .ok_or_else(|| DsmError::Geometry(format!("pair {}: empty coverage polygon", pair.id)))?
            .snap_to_grid(self.params.resolution);

        let epi_tile_size = match self.params.epi_tile_size {
            Some(size) => size,
            None => optimal_epipolar_tile_size(
                disparity.min,
                disparity.max,
                &self.static_params.epipolar_tiling,
            ),
        };
        let largest_epipolar_region =
            Region::new(0.0, 0.0, out.epipolar_size_x as f64, out.epipolar_size_y as f64);
        let ts = epi_tile_size as f64;
        let epipolar_grid = TileGrid::new(&largest_epipolar_region, ts, ts);
        let epipolar_regions = split(&largest_epipolar_region, ts, ts);

        info!(
            "pair {}: terrain bbox {:?}, epipolar tiles {}x{} px ({} tiles)",
            pair.id,
            terrain_bbox.to_array(),
            epi_tile_size,
            epi_tile_size,
            epipolar_regions.len()
        );

        Ok(PairGeometry {
            pair,
            disparity,
            epipolar_size: [out.epipolar_size_x, out.epipolar_size_y],
            epipolar_origin: [out.epipolar_origin_x, out.epipolar_origin_y],
            epipolar_spacing: [out.epipolar_spacing_x, out.epipolar_spacing_y],
            largest_epipolar_region,
            terrain_envelope,
            coverage,
            terrain_bbox,
            epi_tile_size,
            epipolar_grid,
            epipolar_regions,
        })
    }

    /// Terrain extent of the run: union of the pair boxes, or the snapped
    /// region of interest when one is set.
    pub fn terrain_bounds(&self, pairs: &[PairGeometry], epsg: Epsg) -> Result<Region> {
        let union = Region::union(pairs.iter().map(|p| &p.terrain_bbox))?;
        info!("terrain bounding box of all pairs: {:?}", union.to_array());

        let Some(roi) = &self.params.roi else {
            return Ok(union);
        };
        let roi_epsg = roi.epsg.unwrap_or(epsg);
        let roi_poly = self
            .collab
            .projector
            .project_polygon(&Polygon::from(&roi.bounds), roi_epsg, epsg)?;

        let mut hits = 0;
        for p in pairs {
            if roi_poly.intersects(&p.coverage) {
                hits += 1;
            } else {
                warn!("pair {} does not intersect the requested ROI", p.id());
            }
        }
        if hits == 0 {
            return Err(DsmError::EmptyInput(
                "none of the input pairs intersect the requested ROI".into(),
            ));
        }
        let bounds = roi_poly
            .bounds()
            .ok_or_else(|| DsmError::Geometry("empty ROI polygon".into()))?
            .snap_to_grid(self.params.resolution);
        info!("terrain bounding box restricted to ROI: {:?}", bounds.to_array());
        Ok(bounds)
    }

    /// Terrain tile width shared by all pairs.
    pub fn terrain_tile_size(&self, pairs: &[PairGeometry]) -> Result<f64> {
        let stats: Vec<(&str, f64, usize)> = pairs
            .iter()
            .map(|p| (p.id(), p.terrain_area(), p.epipolar_regions.len()))
            .collect();
        let size = optimal_terrain_tile_size(&stats, self.params.resolution).ok_or_else(|| {
            DsmError::EmptyInput("no pair has a non-empty terrain footprint".into())
        })?;
        info!("optimal terrain tile size: {size:.3}");
        Ok(size)
    }

    /// Warn about options that cannot be honoured for these inputs.
    pub fn check_options(&self, pairs: &[Arc<PairInput>]) {
        if self.params.snap_to_img1 {
            if let Some(first) = pairs.first() {
                if pairs.iter().any(|p| p.config.input.img1 != first.config.input.img1) {
                    warn!(
                        "snap_to_img1 is set but the pairs do not share the same left image; \
                         points will not be snapped to one common geometry"
                    );
                }
            }
        }
        if self.params.align {
            for p in pairs {
                if p.config.output().lowres_dem_splines_fit.is_none() {
                    warn!(
                        "align is set but pair {} has no low resolution DEM splines; \
                         its points will not be aligned",
                        p.id
                    );
                }
            }
        }
    }
}

/// Epipolar image corners `(0,0) (0,H) (W,H) (W,0)`.
fn epipolar_corners(pair: &PairInput) -> [[f64; 2]; 4] {
    let out = pair.config.output();
    let (w, h) = (out.epipolar_size_x as f64, out.epipolar_size_y as f64);
    [[0.0, 0.0], [0.0, h], [w, h], [w, 0.0]]
}
