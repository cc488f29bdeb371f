//! Per-pair geometry: disparity range, terrain footprint, epipolar tiling.

mod resolver;
mod tile_size;

use std::sync::Arc;

use crate::config::PairInput;
use crate::polygon::Polygon;
use crate::tiling::{Region, TileGrid};

pub use resolver::{DisparityBoundsResolver, DisparityRange};
pub use tile_size::{optimal_epipolar_tile_size, optimal_terrain_tile_size};

/// Everything known about a pair before the common terrain grid exists.
#[derive(Debug, Clone)]
pub struct PairGeometry {
    pub pair: Arc<PairInput>,
    pub disparity: DisparityRange,
    /// `[width, height]` of the epipolar images.
    pub epipolar_size: [usize; 2],
    pub epipolar_origin: [f64; 2],
    pub epipolar_spacing: [f64; 2],
    /// Whole epipolar image, `[0, 0, width, height]`.
    pub largest_epipolar_region: Region,
    /// Bounding box of the epipolar corners swept over the disparity range,
    /// in the output spatial reference.
    pub terrain_envelope: Region,
    /// Coverage polygon in the output spatial reference.
    pub coverage: Polygon,
    /// Coverage bounds snapped to the output resolution.
    pub terrain_bbox: Region,
    pub epi_tile_size: usize,
    pub epipolar_grid: TileGrid,
    /// Epipolar tiles in stage-1 submission order.
    pub epipolar_regions: Vec<Region>,
}

impl PairGeometry {
    pub fn id(&self) -> &str {
        &self.pair.id
    }

    /// Area of the swept terrain envelope.
    pub fn terrain_area(&self) -> f64 {
        self.terrain_envelope.area()
    }
}
