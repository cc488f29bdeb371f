//! Upstream preprocessing content files describing one stereo pair.

use std::path::{Path, PathBuf};

use crate::collab::AffineModelSpec;
use crate::error::{DsmError, Result};
use crate::polygon::Polygon;
use crate::srs::Epsg;

/// Input images of a stereo pair.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PairInputs {
    /// Left (reference) image.
    pub img1: String,
    /// Right (secondary) image.
    pub img2: String,
    /// Optional color image registered on `img1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodata1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodata2: Option<f64>,
}

/// Footprint shared by both images of a pair, in its own spatial reference.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CoverageEnvelope {
    pub epsg: Epsg,
    pub polygon: Polygon,
}

/// Outputs of the preprocessing step that the DSM run depends on.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PreprocessingOutput {
    /// Epipolar image width in pixels.
    pub epipolar_size_x: usize,
    /// Epipolar image height in pixels.
    pub epipolar_size_y: usize,
    pub epipolar_origin_x: f64,
    pub epipolar_origin_y: f64,
    /// Spacing of the epipolar resampling grid.
    pub epipolar_spacing_x: f64,
    pub epipolar_spacing_y: f64,
    /// Estimated minimum disparity in pixels.
    pub minimum_disparity: f64,
    /// Estimated maximum disparity in pixels.
    pub maximum_disparity: f64,
    /// Metres of elevation per pixel of disparity.
    pub disp_to_alt_ratio: f64,
    /// Intersection of the left and right image envelopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelopes_intersection: Option<CoverageEnvelope>,
    /// Low-resolution DEM splines used by the `align` option.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lowres_dem_splines_fit: Option<String>,
}

impl Default for PreprocessingOutput {
    fn default() -> Self {
        Self {
            epipolar_size_x: 0,
            epipolar_size_y: 0,
            epipolar_origin_x: 0.0,
            epipolar_origin_y: 0.0,
            epipolar_spacing_x: 30.0,
            epipolar_spacing_y: 30.0,
            minimum_disparity: 0.0,
            maximum_disparity: 0.0,
            disp_to_alt_ratio: 1.0,
            envelopes_intersection: None,
            lowres_dem_splines_fit: None,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Preprocessing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub output: PreprocessingOutput,
}

/// One preprocessing content file.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PairConfiguration {
    pub input: PairInputs,
    pub preprocessing: Preprocessing,
    /// Built-in affine stereo geometry, used when no photogrammetric
    /// backend is plugged in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affine_model: Option<AffineModelSpec>,
}

impl PairConfiguration {
    pub fn output(&self) -> &PreprocessingOutput {
        &self.preprocessing.output
    }
}

/// A validated pair configuration with its identity.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PairInput {
    /// Pair identifier used in logs, task labels and the manifest.
    pub id: String,
    /// File the configuration was read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    pub config: PairConfiguration,
}

impl PairInput {
    /// Wrap an in-memory configuration, validating it.
    pub fn new(id: impl Into<String>, config: PairConfiguration) -> Result<Self> {
        let id = id.into();
        validate_pair_configuration(&config).map_err(|reason| DsmError::schema(&id, reason))?;
        Ok(Self {
            id,
            source: None,
            config,
        })
    }

    /// Read and validate a content file. The pair id is the file stem.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DsmError::file(path, e))?;
        let config: PairConfiguration = serde_json::from_str(&text)
            .map_err(|e| DsmError::schema(path.display().to_string(), e.to_string()))?;
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut pair = Self::new(id, config)?;
        pair.source = Some(path.to_path_buf());
        Ok(pair)
    }
}

/// Structural checks on a content file.
pub fn validate_pair_configuration(cfg: &PairConfiguration) -> std::result::Result<(), String> {
    if cfg.input.img1.trim().is_empty() {
        return Err("input.img1 must not be empty".to_string());
    }
    if cfg.input.img2.trim().is_empty() {
        return Err("input.img2 must not be empty".to_string());
    }
    let out = cfg.output();
    if out.epipolar_size_x == 0 || out.epipolar_size_y == 0 {
        return Err(format!(
            "epipolar size must be positive, got {}x{}",
            out.epipolar_size_x, out.epipolar_size_y
        ));
    }
    for (name, v) in [
        ("epipolar_spacing_x", out.epipolar_spacing_x),
        ("epipolar_spacing_y", out.epipolar_spacing_y),
        ("disp_to_alt_ratio", out.disp_to_alt_ratio),
    ] {
        if !v.is_finite() || v == 0.0 {
            return Err(format!("{name} must be finite and non-zero, got {v}"));
        }
    }
    if !out.epipolar_origin_x.is_finite() || !out.epipolar_origin_y.is_finite() {
        return Err("epipolar origin must be finite".to_string());
    }
    if !out.minimum_disparity.is_finite() || !out.maximum_disparity.is_finite() {
        return Err("disparity range must be finite".to_string());
    }
    if out.minimum_disparity > out.maximum_disparity {
        return Err(format!(
            "minimum_disparity ({}) exceeds maximum_disparity ({})",
            out.minimum_disparity, out.maximum_disparity
        ));
    }
    if let Some(env) = &out.envelopes_intersection {
        if env.polygon.exterior.len() < 3 {
            return Err("envelopes_intersection polygon needs at least 3 vertices".to_string());
        }
        if env.polygon.exterior.iter().flatten().any(|v| !v.is_finite()) {
            return Err("envelopes_intersection polygon has non-finite vertices".to_string());
        }
    }
    if let Some(model) = &cfg.affine_model {
        model.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::affine_pair_config;

    #[test]
    fn synthetic_pair_is_valid() {
        let cfg = affine_pair_config(600, 600, [-3.0, 4.0], 30.0);
        assert!(validate_pair_configuration(&cfg).is_ok());
    }

    #[test]
    fn rejects_inverted_disparity_range() {
        let mut cfg = affine_pair_config(100, 100, [-3.0, 4.0], 1.0);
        cfg.preprocessing.output.minimum_disparity = 5.0;
        let err = validate_pair_configuration(&cfg).expect_err("inverted range");
        assert!(err.contains("exceeds"));
    }

    #[test]
    fn rejects_zero_ratio_and_empty_image() {
        let mut cfg = affine_pair_config(100, 100, [-3.0, 4.0], 1.0);
        cfg.preprocessing.output.disp_to_alt_ratio = 0.0;
        assert!(validate_pair_configuration(&cfg)
            .expect_err("zero ratio")
            .contains("disp_to_alt_ratio"));

        let mut cfg = affine_pair_config(100, 100, [-3.0, 4.0], 1.0);
        cfg.preprocessing.output.epipolar_size_y = 0;
        assert!(PairInput::new("p0", cfg).is_err());
    }

    #[test]
    fn load_reports_schema_errors_with_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("left_right.json");
        std::fs::write(&path, "{\"input\": {\"img1\": 3}}").unwrap();
        match PairInput::load(&path) {
            Err(DsmError::ConfigurationSchema { source_name, .. }) => {
                assert!(source_name.ends_with("left_right.json"))
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn load_uses_file_stem_as_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair_a.json");
        let cfg = affine_pair_config(64, 48, [-1.0, 2.0], 2.0);
        std::fs::write(&path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();
        let pair = PairInput::load(&path).unwrap();
        assert_eq!(pair.id, "pair_a");
        assert_eq!(pair.config.output().epipolar_size_x, 64);
        assert_eq!(pair.source.as_deref(), Some(path.as_path()));
    }
}
