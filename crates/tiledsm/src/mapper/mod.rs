//! Terrain grid vertex to epipolar footprint correspondence.
//!
//! The epipolar tile grid of a pair is projected to terrain at both ends of
//! its disparity range. Each projection is triangulated; a terrain vertex
//! then maps to the epipolar bounding box of the triangle containing it,
//! or to the nearest projected vertex when it falls outside the surface.
//! Taking the union over both disparity ends gives a conservative
//! epipolar footprint for every terrain tile.

mod lookup;

use rayon::prelude::*;

use crate::collab::Collaborators;
use crate::error::{DsmError, Result};
use crate::pair::PairGeometry;
use crate::srs::Epsg;
use crate::tiling::{Region, TileGrid};

use lookup::{Hit, TerrainLookup};

/// Scale applied to geographic coordinates before triangulation, so that
/// degree-sized cells do not collapse numerically.
pub const GEOGRAPHIC_PRECISION: f64 = 1000.0;

/// Per terrain grid vertex epipolar bounds, row-major like the terrain
/// grid's vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct EpipolarFootprints {
    pub points_min: Vec<[f64; 2]>,
    pub points_max: Vec<[f64; 2]>,
    /// Terrain vertices that fell outside both triangulated surfaces.
    pub outside_count: usize,
}

impl EpipolarFootprints {
    /// Epipolar bounding box of terrain tile `(j, i)`: extremes over the
    /// four corner vertices of both bound sets. Not cropped.
    pub fn tile_footprint(&self, grid: &TileGrid, j: usize, i: usize) -> Region {
        let mut lo = [f64::INFINITY; 2];
        let mut hi = [f64::NEG_INFINITY; 2];
        for k in grid.cell_corner_indices(j, i) {
            for p in [self.points_min[k], self.points_max[k]] {
                lo = [lo[0].min(p[0]), lo[1].min(p[1])];
                hi = [hi[0].max(p[0]), hi[1].max(p[1])];
            }
        }
        Region::new(lo[0], lo[1], hi[0], hi[1])
    }
}

/// A resolved pair plus its terrain correspondence.
#[derive(Debug, Clone)]
pub struct StereoPairContext {
    pub geometry: PairGeometry,
    pub footprints: EpipolarFootprints,
}

/// Maps terrain grid vertices to epipolar bounds for one pair at a time.
pub struct EpipolarTerrainMapper<'a> {
    collaborators: &'a Collaborators,
}

impl<'a> EpipolarTerrainMapper<'a> {
    pub fn new(collaborators: &'a Collaborators) -> Self {
        Self { collaborators }
    }

    pub fn map(
        &self,
        geometry: &PairGeometry,
        terrain_grid: &TileGrid,
        epsg: Epsg,
    ) -> Result<EpipolarFootprints> {
        let epipolar = geometry.epipolar_grid.vertices();
        let model = &self.collaborators.geometry;
        let at_min =
            model.epipolar_to_terrain(&geometry.pair, epipolar, geometry.disparity.min, epsg)?;
        let at_max =
            model.epipolar_to_terrain(&geometry.pair, epipolar, geometry.disparity.max, epsg)?;
        if at_min.len() != epipolar.len() || at_max.len() != epipolar.len() {
            return Err(DsmError::Geometry(format!(
                "pair {}: {} epipolar vertices projected to {} / {} terrain points",
                geometry.id(),
                epipolar.len(),
                at_min.len(),
                at_max.len()
            )));
        }

        let scale = if self.collaborators.projector.is_geographic(epsg) {
            GEOGRAPHIC_PRECISION
        } else {
            1.0
        };
        let triangulation_error = |reason: String| DsmError::Triangulation {
            pair: geometry.id().to_string(),
            reason,
        };
        let lookup_min = TerrainLookup::build(&at_min, scale).map_err(triangulation_error)?;
        let lookup_max = TerrainLookup::build(&at_max, scale).map_err(triangulation_error)?;

        let per_vertex: Vec<([f64; 2], [f64; 2], bool)> = terrain_grid
            .vertices()
            .par_iter()
            .map(|&v| {
                let mut lo = [f64::INFINITY; 2];
                let mut hi = [f64::NEG_INFINITY; 2];
                let mut outside = true;
                for lookup in [&lookup_min, &lookup_max] {
                    let hit = lookup.locate(v);
                    let indices: &[usize] = match &hit {
                        Some(Hit::Triangle(t)) => {
                            outside = false;
                            t
                        }
                        Some(Hit::Nearest(n)) => std::slice::from_ref(n),
                        None => &[],
                    };
                    for &k in indices {
                        let p = epipolar[k];
                        lo = [lo[0].min(p[0]), lo[1].min(p[1])];
                        hi = [hi[0].max(p[0]), hi[1].max(p[1])];
                    }
                }
                (lo, hi, outside)
            })
            .collect();

        let outside_count = per_vertex.iter().filter(|v| v.2).count();
        tracing::debug!(
            "pair {}: mapped {} terrain vertices, {} outside the projected grid",
            geometry.id(),
            per_vertex.len(),
            outside_count
        );
        let (points_min, points_max) = per_vertex.into_iter().map(|(lo, hi, _)| (lo, hi)).unzip();
        Ok(EpipolarFootprints {
            points_min,
            points_max,
            outside_count,
        })
    }

    /// Map a pair and bundle the result with its geometry.
    pub fn context(
        &self,
        geometry: PairGeometry,
        terrain_grid: &TileGrid,
        epsg: Epsg,
    ) -> Result<StereoPairContext> {
        let footprints = self.map(&geometry, terrain_grid, epsg)?;
        Ok(StereoPairContext {
            geometry,
            footprints,
        })
    }
}
