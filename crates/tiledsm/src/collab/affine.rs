//! Affine stereo model: a pair whose epipolar geometry is a plain affine
//! map from (column, row, disparity) to terrain coordinates.
//!
//! Used for synthetic scenes and as the default geometry of the CLI.

use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::{Matrix2, Matrix2x3, Vector2, Vector3};

use super::types::{DisparityMode, PointCloud, PointCloudTile};
use super::{Projector, StereoGeometry, TriangulationRequest, Triangulator};
use crate::config::PairInput;
use crate::error::{DsmError, Result};
use crate::srs::Epsg;

/// Parameters of an affine stereo pair.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AffineModelSpec {
    /// Spatial reference the model is expressed in.
    pub epsg: Epsg,
    /// Terrain position of epipolar position (0, 0) at zero disparity.
    pub origin: [f64; 2],
    /// Terrain displacement for one epipolar column.
    pub column_step: [f64; 2],
    /// Terrain displacement for one epipolar row.
    pub row_step: [f64; 2],
    /// Terrain displacement for one pixel of disparity.
    pub disparity_step: [f64; 2],
    /// Observed disparity surface `d = s0 + s1 * col + s2 * row`.
    #[serde(default)]
    pub surface: [f64; 3],
    /// Number of color bands produced.
    #[serde(default = "default_color_bands")]
    pub color_bands: usize,
}

fn default_color_bands() -> usize {
    3
}

impl AffineModelSpec {
    /// North-up model with square pixels of `gsd` and disparity shifting
    /// points eastwards by `gsd` per pixel.
    pub fn north_up(epsg: Epsg, origin: [f64; 2], gsd: f64) -> Self {
        Self {
            epsg,
            origin,
            column_step: [gsd, 0.0],
            row_step: [0.0, -gsd],
            disparity_step: [gsd, 0.0],
            surface: [0.0; 3],
            color_bands: 3,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut values = self
            .origin
            .iter()
            .chain(&self.column_step)
            .chain(&self.row_step)
            .chain(&self.disparity_step)
            .chain(&self.surface);
        if values.any(|v| !v.is_finite()) {
            return Err("affine_model has non-finite coefficients".to_string());
        }
        if self.axes().determinant().abs() < 1e-12 {
            return Err("affine_model column_step and row_step are collinear".to_string());
        }
        if !(1..=4).contains(&self.color_bands) {
            return Err(format!(
                "affine_model color_bands must be in 1..=4, got {}",
                self.color_bands
            ));
        }
        Ok(())
    }

    fn axes(&self) -> Matrix2<f64> {
        Matrix2::new(
            self.column_step[0],
            self.row_step[0],
            self.column_step[1],
            self.row_step[1],
        )
    }

    /// `[col, row, disparity]` to terrain coordinates in the model frame.
    fn transform(&self) -> (Matrix2x3<f64>, Vector2<f64>) {
        let axes = self.axes();
        let m = Matrix2x3::from_columns(&[
            axes.column(0).into_owned(),
            axes.column(1).into_owned(),
            Vector2::new(self.disparity_step[0], self.disparity_step[1]),
        ]);
        (m, Vector2::new(self.origin[0], self.origin[1]))
    }

    fn disparity_at(&self, col: f64, row: f64) -> f64 {
        self.surface[0] + self.surface[1] * col + self.surface[2] * row
    }
}

/// Geometry + triangulation backend driven by each pair's
/// [`AffineModelSpec`].
pub struct AffineStereoModel {
    projector: Arc<dyn Projector>,
}

impl AffineStereoModel {
    pub fn new(projector: Arc<dyn Projector>) -> Self {
        Self { projector }
    }

    fn spec<'a>(&self, pair: &'a PairInput) -> Result<&'a AffineModelSpec> {
        pair.config
            .affine_model
            .as_ref()
            .ok_or_else(|| DsmError::Geometry(format!("pair '{}' has no affine_model", pair.id)))
    }
}

impl StereoGeometry for AffineStereoModel {
    fn epipolar_to_terrain(
        &self,
        pair: &PairInput,
        points: &[[f64; 2]],
        disparity: f64,
        epsg: Epsg,
    ) -> Result<Vec<[f64; 2]>> {
        let spec = self.spec(pair)?;
        let (m, t) = spec.transform();
        let native: Vec<[f64; 2]> = points
            .iter()
            .map(|p| {
                let q = m * Vector3::new(p[0], p[1], disparity) + t;
                [q.x, q.y]
            })
            .collect();
        if epsg == spec.epsg {
            Ok(native)
        } else {
            self.projector.project_points(&native, spec.epsg, epsg)
        }
    }
}

impl Triangulator for AffineStereoModel {
    fn triangulate(&self, req: &TriangulationRequest) -> Result<PointCloudTile> {
        let spec = self.spec(&req.pair)?;
        let ratio = req.pair.config.output().disp_to_alt_ratio;
        let (m, t) = spec.transform();

        let col_range = (req.region.xmin.floor() as i64).max(0)..(req.region.xmax.ceil() as i64);
        let row_range = (req.region.ymin.floor() as i64).max(0)..(req.region.ymax.ceil() as i64);

        let mut clouds = BTreeMap::new();
        for &mode in &req.modes {
            // Secondary points are referenced on pixel corners of the
            // right image rather than pixel centres of the left one.
            let offset = match mode {
                DisparityMode::Primary => 0.5,
                DisparityMode::Secondary => 0.0,
            };
            let mut native = PointCloud::new(spec.epsg, spec.color_bands);
            for row in row_range.clone() {
                for col in col_range.clone() {
                    let (c, r) = (col as f64 + offset, row as f64 + offset);
                    let d = spec.disparity_at(c, r);
                    if d < req.disp_min || d > req.disp_max {
                        continue;
                    }
                    let q = m * Vector3::new(c, r, d) + t;
                    let color: Vec<f32> = (0..spec.color_bands)
                        .map(|b| ((col + row) as f32 * 0.5 + b as f32 * 10.0) % 256.0)
                        .collect();
                    native.push([q.x, q.y, d * ratio], &color);
                }
            }

            if let Some(geoid) = &req.geoid {
                let lonlat = self
                    .projector
                    .project_points_3d(&native.points, spec.epsg, Epsg::WGS84)?;
                for (p, g) in native.points.iter_mut().zip(&lonlat) {
                    p[2] -= geoid.undulation(g[0], g[1]);
                }
            }

            let points = self
                .projector
                .project_points_3d(&native.points, spec.epsg, req.epsg)?;
            clouds.insert(
                mode,
                PointCloud {
                    epsg: req.epsg,
                    points,
                    colors: native.colors,
                },
            );
        }

        Ok(PointCloudTile {
            pair_id: req.pair.id.clone(),
            key: req.key,
            region: req.region,
            clouds,
        })
    }

    fn color_band_count(&self, pair: &PairInput) -> Result<usize> {
        Ok(self.spec(pair)?.color_bands)
    }
}
