//! Run manifest (`content.json`) describing the inputs, parameters and
//! outputs of a DSM run.
//!
//! The manifest is checked against a versioned structural schema before
//! it is written. A mismatch is logged and the file is written anyway.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::{DsmParams, PairInput, StaticParams};
use crate::error::{DsmError, Result};
use crate::mosaic::MosaicOutputs;
use crate::srs::Epsg;
use crate::tiling::Region;

pub const MANIFEST_FILE: &str = "content.json";
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Reference surface of the output heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AltReference {
    Geoid,
    Ellipsoid,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StereoParameters {
    pub resolution: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
    pub dsm_radius: usize,
    /// Output reference requested by the caller, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epsg: Option<Epsg>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StereoOutput {
    pub alt_reference: AltReference,
    pub epsg: Epsg,
    pub dsm: PathBuf,
    pub dsm_no_data: f64,
    pub color_no_data: f64,
    pub color: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsm_mean: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsm_std: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsm_n_pts: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsm_points_in_cell: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StereoSection {
    pub version: String,
    pub parameters: StereoParameters,
    pub static_parameters: StaticParams,
    pub output: StereoOutput,
}

/// A terrain tile left as no-data after a task failure.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FailedTile {
    pub j: usize,
    pub i: usize,
    pub region: Region,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    /// Pair configurations as they were used.
    pub input_configurations: Vec<Value>,
    pub stereo: StereoSection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tiles: Vec<FailedTile>,
}

impl RunManifest {
    pub fn new(
        pairs: &[std::sync::Arc<PairInput>],
        params: &DsmParams,
        statics: &StaticParams,
        epsg: Epsg,
        outputs: &MosaicOutputs,
        failed_tiles: Vec<FailedTile>,
    ) -> Result<Self> {
        let input_configurations = pairs
            .iter()
            .map(|p| serde_json::to_value(p.as_ref()))
            .collect::<std::result::Result<_, _>>()?;
        Ok(Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            input_configurations,
            stereo: StereoSection {
                version: env!("CARGO_PKG_VERSION").to_string(),
                parameters: StereoParameters {
                    resolution: params.resolution,
                    sigma: params.sigma,
                    dsm_radius: params.dsm_radius,
                    epsg: params.epsg,
                },
                static_parameters: statics.clone(),
                output: StereoOutput {
                    alt_reference: if params.geoid.is_some() {
                        AltReference::Geoid
                    } else {
                        AltReference::Ellipsoid
                    },
                    epsg,
                    dsm: outputs.dsm.clone(),
                    dsm_no_data: params.dsm_no_data,
                    color_no_data: params.color_no_data,
                    color: outputs.color.clone(),
                    dsm_mean: outputs.mean.clone(),
                    dsm_std: outputs.std_dev.clone(),
                    dsm_n_pts: outputs.n_pts.clone(),
                    dsm_points_in_cell: outputs.pts_in_cell.clone(),
                },
            },
            failed_tiles,
        })
    }

    /// Write `content.json` into `out_dir`, warning on schema drift.
    pub fn write(&self, out_dir: &Path) -> Result<PathBuf> {
        let value = serde_json::to_value(self)?;
        if let Err(problems) = check_schema(&value) {
            tracing::warn!(
                "{MANIFEST_FILE} does not comply with schema v{MANIFEST_SCHEMA_VERSION}: {}",
                problems.join("; ")
            );
        }
        let path = out_dir.join(MANIFEST_FILE);
        let text = serde_json::to_string_pretty(&value)?;
        std::fs::write(&path, text).map_err(|e| DsmError::file(&path, e))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DsmError::file(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Number,
    String,
    Array,
    Object,
}

impl Kind {
    fn matches(self, v: &Value) -> bool {
        match self {
            Kind::Number => v.is_number(),
            Kind::String => v.is_string(),
            Kind::Array => v.is_array(),
            Kind::Object => v.is_object(),
        }
    }
}

const REQUIRED: &[(&str, Kind)] = &[
    ("/schema_version", Kind::Number),
    ("/input_configurations", Kind::Array),
    ("/stereo/version", Kind::String),
    ("/stereo/parameters/resolution", Kind::Number),
    ("/stereo/parameters/dsm_radius", Kind::Number),
    ("/stereo/static_parameters", Kind::Object),
    ("/stereo/output/alt_reference", Kind::String),
    ("/stereo/output/epsg", Kind::Number),
    ("/stereo/output/dsm", Kind::String),
    ("/stereo/output/dsm_no_data", Kind::Number),
    ("/stereo/output/color_no_data", Kind::Number),
    ("/stereo/output/color", Kind::String),
];

const STATS_KEYS: [&str; 4] = ["dsm_mean", "dsm_std", "dsm_n_pts", "dsm_points_in_cell"];

/// Structural check of a manifest document. Returns every problem found.
pub fn check_schema(doc: &Value) -> std::result::Result<(), Vec<String>> {
    let mut problems = Vec::new();
    for (pointer, kind) in REQUIRED {
        match doc.pointer(pointer) {
            None => problems.push(format!("missing {pointer}")),
            Some(v) if !kind.matches(v) => problems.push(format!("{pointer} is not a {kind:?}")),
            Some(_) => {}
        }
    }
    match doc.pointer("/schema_version").and_then(Value::as_u64) {
        Some(v) if v != u64::from(MANIFEST_SCHEMA_VERSION) => {
            problems.push(format!("schema_version {v}, expected {MANIFEST_SCHEMA_VERSION}"))
        }
        _ => {}
    }
    if doc
        .pointer("/input_configurations")
        .and_then(Value::as_array)
        .is_some_and(Vec::is_empty)
    {
        problems.push("input_configurations is empty".to_string());
    }
    if let Some(alt) = doc.pointer("/stereo/output/alt_reference").and_then(Value::as_str) {
        if alt != "geoid" && alt != "ellipsoid" {
            problems.push(format!("unknown alt_reference '{alt}'"));
        }
    }
    let stats = STATS_KEYS
        .iter()
        .filter(|k| doc.pointer(&format!("/stereo/output/{k}")).is_some())
        .count();
    if stats != 0 && stats != STATS_KEYS.len() {
        problems.push(format!("{stats} of {} statistics outputs present", STATS_KEYS.len()));
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}
