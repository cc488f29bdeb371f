//! Static processing parameters, passed explicitly through the run.

use std::path::Path;

use crate::error::{DsmError, Result};

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RasterizationStatic {
    /// Split the point list in this many chunks when gridding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_points_division_factor: Option<usize>,
}

/// Small connected components removal.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SmallComponentsParams {
    pub on_ground_margin: usize,
    pub connection_distance: f64,
    pub nb_points_threshold: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clusters_distance_threshold: Option<f64>,
    pub removed_elt_mask: bool,
}

impl Default for SmallComponentsParams {
    fn default() -> Self {
        Self {
            on_ground_margin: 10,
            connection_distance: 3.0,
            nb_points_threshold: 50,
            clusters_distance_threshold: None,
            removed_elt_mask: false,
        }
    }
}

/// k-nearest-neighbour statistical outlier removal.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StatisticalOutliersParams {
    pub k: usize,
    pub std_dev_factor: f64,
}

impl Default for StatisticalOutliersParams {
    fn default() -> Self {
        Self {
            k: 50,
            std_dev_factor: 5.0,
        }
    }
}

/// Memory model for the epipolar tile size.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EpipolarTilingParams {
    /// Memory available to one correlation task, MiB.
    pub max_ram_mb: f64,
    /// Memory reserved for libraries and inputs, MiB.
    pub reserved_ram_mb: f64,
    pub min_tile_size: usize,
    pub max_tile_size: usize,
    /// Tile sizes are rounded down to a multiple of this step.
    pub tile_size_rounding: usize,
    /// Correlation margin in pixels on each side.
    pub margin: usize,
}

impl Default for EpipolarTilingParams {
    fn default() -> Self {
        Self {
            max_ram_mb: 2000.0,
            reserved_ram_mb: 200.0,
            min_tile_size: 300,
            max_tile_size: 1500,
            tile_size_rounding: 50,
            margin: 0,
        }
    }
}

/// Sample type of the color mosaic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorDtype {
    Uint8,
    Uint16,
    #[default]
    Float32,
}

/// Parameters that are fixed for a deployment rather than chosen per run.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StaticParams {
    pub rasterization: RasterizationStatic,
    pub small_components: SmallComponentsParams,
    pub statistical_outliers: StatisticalOutliersParams,
    pub epipolar_tiling: EpipolarTilingParams,
    pub color_dtype: ColorDtype,
}

impl StaticParams {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DsmError::file(path, e))?;
        let params: StaticParams = serde_json::from_str(&text)
            .map_err(|e| DsmError::schema(path.display().to_string(), e.to_string()))?;
        params
            .validate()
            .map_err(|reason| DsmError::schema(path.display().to_string(), reason))?;
        Ok(params)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let t = &self.epipolar_tiling;
        if t.min_tile_size == 0 || t.min_tile_size > t.max_tile_size {
            return Err(format!(
                "epipolar_tiling: need 0 < min_tile_size <= max_tile_size, got {} / {}",
                t.min_tile_size, t.max_tile_size
            ));
        }
        if t.tile_size_rounding == 0 {
            return Err("epipolar_tiling.tile_size_rounding must be positive".to_string());
        }
        if self.statistical_outliers.k == 0 {
            return Err("statistical_outliers.k must be positive".to_string());
        }
        if self.rasterization.grid_points_division_factor == Some(0) {
            return Err("rasterization.grid_points_division_factor must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("static.json");
        std::fs::write(
            &path,
            r#"{"color_dtype": "uint16", "epipolar_tiling": {"max_tile_size": 800}}"#,
        )
        .unwrap();
        let p = StaticParams::load(&path).unwrap();
        assert_eq!(p.color_dtype, ColorDtype::Uint16);
        assert_eq!(p.epipolar_tiling.max_tile_size, 800);
        assert_eq!(p.epipolar_tiling.min_tile_size, 300);
        assert_eq!(p.statistical_outliers.k, 50);
    }

    #[test]
    fn load_rejects_inconsistent_tiling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("static.json");
        std::fs::write(&path, r#"{"epipolar_tiling": {"min_tile_size": 900}}"#).unwrap();
        let err = StaticParams::load(&path).expect_err("min > max");
        assert!(matches!(err, DsmError::ConfigurationSchema { .. }));
    }
}
