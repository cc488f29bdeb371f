//! Interfaces to the numeric collaborators of the engine.
//!
//! The engine never triangulates, rasterizes or reprojects by itself; it
//! calls these traits. [`AffineStereoModel`], [`GaussianRasterizer`] and
//! [`IdentityProjector`] are small reference implementations that make
//! the pipeline runnable end to end.

mod affine;
mod filters;
#[cfg(feature = "proj")]
mod proj;
mod reference;
mod types;

use std::sync::Arc;

use crate::config::{GeoidGrid, PairInput, SmallComponentsParams, StatisticalOutliersParams};
use crate::error::Result;
use crate::polygon::Polygon;
use crate::srs::{ecef_to_geodetic, geodetic_to_ecef, Epsg};
use crate::tiling::{OriginWindow, Region, TileKey};

pub use affine::{AffineModelSpec, AffineStereoModel};
pub use filters::{remove_small_components, remove_statistical_outliers};
#[cfg(feature = "proj")]
pub use proj::ProjProjector;
pub use reference::{GaussianRasterizer, IdentityProjector};
pub use types::{
    Band, CountBand, DisparityMode, PointCloud, PointCloudTile, RasterStats, RasterTile,
};

/// Epipolar geometry of a stereo pair.
pub trait StereoGeometry: Send + Sync {
    /// Terrain positions, in `epsg`, of epipolar image positions observed
    /// at a constant `disparity`.
    fn epipolar_to_terrain(
        &self,
        pair: &PairInput,
        points: &[[f64; 2]],
        disparity: f64,
        epsg: Epsg,
    ) -> Result<Vec<[f64; 2]>>;
}

/// Coordinate conversion between spatial references.
pub trait Projector: Send + Sync {
    fn project_points(&self, points: &[[f64; 2]], from: Epsg, to: Epsg) -> Result<Vec<[f64; 2]>>;

    fn project_polygon(&self, polygon: &Polygon, from: Epsg, to: Epsg) -> Result<Polygon> {
        Ok(Polygon::new(self.project_points(&polygon.exterior, from, to)?))
    }

    /// 3D conversion. Geocentric (ECEF) endpoints go through WGS84
    /// longitude/latitude/height; heights pass through every other step.
    fn project_points_3d(
        &self,
        points: &[[f64; 3]],
        from: Epsg,
        to: Epsg,
    ) -> Result<Vec<[f64; 3]>> {
        if from == to {
            return Ok(points.to_vec());
        }
        let (planar, planar_epsg) = if from == Epsg::ECEF {
            let geodetic: Vec<[f64; 3]> = points.iter().map(|p| ecef_to_geodetic(*p)).collect();
            (geodetic, Epsg::WGS84)
        } else {
            (points.to_vec(), from)
        };
        let target = if to == Epsg::ECEF { Epsg::WGS84 } else { to };
        let moved = if planar_epsg == target {
            planar
        } else {
            let xy: Vec<[f64; 2]> = planar.iter().map(|p| [p[0], p[1]]).collect();
            self.project_points(&xy, planar_epsg, target)?
                .iter()
                .zip(&planar)
                .map(|(q, p)| [q[0], q[1], p[2]])
                .collect()
        };
        if to == Epsg::ECEF {
            Ok(moved.into_iter().map(geodetic_to_ecef).collect())
        } else {
            Ok(moved)
        }
    }

    fn is_geographic(&self, epsg: Epsg) -> bool {
        epsg.is_geographic()
    }
}

/// Stage-1 unit of work: triangulate one epipolar tile of one pair.
#[derive(Debug, Clone)]
pub struct TriangulationRequest {
    pub pair: Arc<PairInput>,
    pub region: Region,
    pub key: TileKey,
    pub disp_min: f64,
    pub disp_max: f64,
    /// Spatial reference of the produced points.
    pub epsg: Epsg,
    pub modes: Vec<DisparityMode>,
    /// Opaque correlator settings.
    pub correlator: Arc<serde_json::Value>,
    pub snap_to_img1: bool,
    pub align: bool,
    pub geoid: Option<Arc<GeoidGrid>>,
}

/// Produces point clouds from epipolar tiles.
pub trait Triangulator: Send + Sync {
    fn triangulate(&self, request: &TriangulationRequest) -> Result<PointCloudTile>;

    /// Number of color bands the pair produces.
    fn color_band_count(&self, pair: &PairInput) -> Result<usize>;
}

/// Point cloud filters to run before gridding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterParams {
    pub small_components: Option<SmallComponentsParams>,
    pub statistical_outliers: Option<StatisticalOutliersParams>,
}

/// Stage-2 unit of work parameters: grid one terrain tile.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterizationRequest {
    pub resolution: f64,
    /// Output spatial reference.
    pub epsg: Epsg,
    pub window: OriginWindow,
    /// Neighbourhood radius in cells.
    pub radius: usize,
    pub sigma: Option<f64>,
    pub dsm_no_data: f64,
    pub color_no_data: f64,
    pub with_stats: bool,
    pub filters: FilterParams,
    pub grid_points_division_factor: Option<usize>,
}

/// Grids point clouds onto a terrain tile.
pub trait Rasterizer: Send + Sync {
    /// `Ok(None)` when no point contributes to the window.
    fn rasterize(
        &self,
        clouds: &[&PointCloud],
        request: &RasterizationRequest,
    ) -> Result<Option<RasterTile>>;
}

/// The set of collaborators a run is wired with.
#[derive(Clone)]
pub struct Collaborators {
    pub geometry: Arc<dyn StereoGeometry>,
    pub projector: Arc<dyn Projector>,
    pub triangulator: Arc<dyn Triangulator>,
    pub rasterizer: Arc<dyn Rasterizer>,
}

impl Collaborators {
    /// Affine stereo model + Gaussian rasterizer over the given projector.
    pub fn reference(projector: Arc<dyn Projector>) -> Self {
        let model = Arc::new(AffineStereoModel::new(Arc::clone(&projector)));
        Self {
            geometry: model.clone(),
            triangulator: model,
            rasterizer: Arc::new(GaussianRasterizer::new(Arc::clone(&projector))),
            projector,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Collaborators { .. }")
    }
}
