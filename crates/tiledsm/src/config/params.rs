//! Run parameters of a DSM computation.

use std::path::PathBuf;

use crate::srs::Epsg;
use crate::tiling::Region;

/// Region of interest restricting the output extent.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Roi {
    /// `[xmin, ymin, xmax, ymax]`.
    pub bounds: Region,
    /// Spatial reference of `bounds`; the output reference when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epsg: Option<Epsg>,
}

/// What to do when a tile task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run at the first failed tile.
    #[default]
    Abort,
    /// Leave the tile as no-data and record it in the manifest.
    NoData,
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// `"sequential"` or `"local"`.
    pub mode: String,
    /// Worker threads for the `local` mode.
    pub workers: usize,
    /// Wall-clock budget of one task, in seconds.
    pub task_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            mode: "local".to_string(),
            workers: 4,
            task_timeout_secs: 600,
        }
    }
}

/// Parameters of one DSM run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DsmParams {
    /// Output cell size in output spatial reference units.
    pub resolution: f64,
    /// Lower elevation bound relative to the reference, metres.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_elevation_offset: Option<f64>,
    /// Upper elevation bound relative to the reference, metres.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_elevation_offset: Option<f64>,
    /// Output spatial reference; UTM zone of the scene when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epsg: Option<Epsg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roi: Option<Roi>,
    /// Gaussian sigma of the rasterization weights; resolution when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
    /// Rasterization neighbourhood radius in cells.
    pub dsm_radius: usize,
    pub dsm_no_data: f64,
    pub color_no_data: f64,
    /// Also rasterize the secondary disparity map points.
    pub use_sec_disp: bool,
    pub small_components_filter: bool,
    pub statistical_outliers_filter: bool,
    /// Write mean / std-dev / count rasters next to the DSM.
    pub output_stats: bool,
    /// Epipolar tile size override in pixels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epi_tile_size: Option<usize>,
    /// Snap secondary points onto the left image geometry.
    pub snap_to_img1: bool,
    /// Align points on the low-resolution DEM.
    pub align: bool,
    /// Geoid undulation grid (JSON); heights are ellipsoidal when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geoid: Option<PathBuf>,
    /// Opaque correlator settings handed to every triangulation task.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub correlator: serde_json::Value,
    pub pool: PoolConfig,
    pub on_tile_failure: FailurePolicy,
}

impl Default for DsmParams {
    fn default() -> Self {
        Self {
            resolution: 0.5,
            min_elevation_offset: None,
            max_elevation_offset: None,
            epsg: None,
            roi: None,
            sigma: None,
            dsm_radius: 1,
            dsm_no_data: -32768.0,
            color_no_data: 0.0,
            use_sec_disp: false,
            small_components_filter: false,
            statistical_outliers_filter: false,
            output_stats: false,
            epi_tile_size: None,
            snap_to_img1: false,
            align: false,
            geoid: None,
            correlator: serde_json::Value::Null,
            pool: PoolConfig::default(),
            on_tile_failure: FailurePolicy::Abort,
        }
    }
}

impl DsmParams {
    /// Spatial reference of triangulated points: ECEF whenever a point
    /// cloud filter runs, the output reference otherwise.
    pub fn triangulation_epsg(&self, output: Epsg) -> Epsg {
        if self.small_components_filter || self.statistical_outliers_filter {
            Epsg::ECEF
        } else {
            output
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(format!("resolution must be positive, got {}", self.resolution));
        }
        if let Some(s) = self.sigma {
            if !(s.is_finite() && s > 0.0) {
                return Err(format!("sigma must be positive, got {s}"));
            }
        }
        for (name, v) in [
            ("min_elevation_offset", self.min_elevation_offset),
            ("max_elevation_offset", self.max_elevation_offset),
        ] {
            if v.is_some_and(|v| !v.is_finite()) {
                return Err(format!("{name} must be finite"));
            }
        }
        if self.epi_tile_size == Some(0) {
            return Err("epi_tile_size must be positive".to_string());
        }
        if let Some(roi) = &self.roi {
            if roi.bounds.is_empty() {
                return Err(format!("roi is empty: {:?}", roi.bounds.to_array()));
            }
        }
        if self.pool.workers == 0 {
            return Err("pool.workers must be at least 1".to_string());
        }
        if self.pool.task_timeout_secs == 0 {
            return Err("pool.task_timeout_secs must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let p = DsmParams::default();
        assert_eq!(p.resolution, 0.5);
        assert_eq!(p.dsm_radius, 1);
        assert_eq!(p.dsm_no_data, -32768.0);
        assert_eq!(p.color_no_data, 0.0);
        assert_eq!(p.pool.workers, 4);
        assert_eq!(p.pool.task_timeout_secs, 600);
        assert_eq!(p.on_tile_failure, FailurePolicy::Abort);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let p: DsmParams =
            serde_json::from_str(r#"{"resolution": 2.0, "on_tile_failure": "no_data"}"#).unwrap();
        assert_eq!(p.resolution, 2.0);
        assert_eq!(p.on_tile_failure, FailurePolicy::NoData);
        assert_eq!(p.pool.mode, "local");
    }

    #[test]
    fn filters_switch_triangulation_to_ecef() {
        let mut p = DsmParams::default();
        assert_eq!(p.triangulation_epsg(Epsg(32631)), Epsg(32631));
        p.statistical_outliers_filter = true;
        assert_eq!(p.triangulation_epsg(Epsg(32631)), Epsg::ECEF);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let p = DsmParams {
            resolution: 0.0,
            ..DsmParams::default()
        };
        assert!(p.validate().expect_err("zero resolution").contains("resolution"));

        let p = DsmParams {
            roi: Some(Roi {
                bounds: Region::new(5.0, 0.0, 1.0, 1.0),
                epsg: None,
            }),
            ..DsmParams::default()
        };
        assert!(p.validate().expect_err("empty roi").contains("roi"));
    }
}
