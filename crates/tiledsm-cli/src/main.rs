//! tiledsm CLI: multi-pair stereo DSM production from preprocessing content files.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tiledsm::collab::Projector;
use tiledsm::config::Roi;
use tiledsm::{
    Collaborators, DsmParams, Epsg, FailurePolicy, PairInput, PoolConfig, Region, StaticParams,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "tiledsm")]
#[command(about = "Compute a digital surface model from several rectified stereo pairs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Triangulate, rasterize and mosaic every pair into one DSM.
    ComputeDsm(CliComputeArgs),

    /// Write the terrain tiling plan as JSON without running any task.
    Plan(CliPlanArgs),
}

#[derive(Debug, Clone, Args)]
struct CliComputeArgs {
    /// Pair content files (JSON).
    #[arg(required = true)]
    pairs: Vec<PathBuf>,

    /// Output directory.
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    geometry: GeometryArgs,

    /// Worker pool mode.
    #[arg(long, value_enum, default_value_t = PoolModeArg::Local)]
    mode: PoolModeArg,

    /// Worker threads in local mode.
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Wall-clock budget of one task, in seconds.
    #[arg(long, default_value = "600")]
    timeout_secs: u64,

    /// What to do when a tile task fails.
    #[arg(long, value_enum, default_value_t = FailurePolicyArg::Abort)]
    on_tile_failure: FailurePolicyArg,

    /// Rasterize secondary disparity points too.
    #[arg(long)]
    use_sec_disp: bool,

    /// Remove small connected components before gridding.
    #[arg(long)]
    small_components_filter: bool,

    /// Remove statistical outliers before gridding.
    #[arg(long)]
    statistical_outliers_filter: bool,

    /// Write mean, std-dev and point count rasters.
    #[arg(long)]
    output_stats: bool,

    /// Gaussian sigma of the rasterization (default: resolution).
    #[arg(long)]
    sigma: Option<f64>,

    /// Rasterization radius in cells.
    #[arg(long, default_value = "1")]
    dsm_radius: usize,

    #[arg(long, default_value = "-32768")]
    dsm_no_data: f64,

    #[arg(long, default_value = "0")]
    color_no_data: f64,

    /// Geoid undulation grid (JSON). Heights stay ellipsoidal without it.
    #[arg(long)]
    geoid: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliPlanArgs {
    /// Pair content files (JSON).
    #[arg(required = true)]
    pairs: Vec<PathBuf>,

    /// Path to write the plan (JSON).
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    geometry: GeometryArgs,
}

/// Options shared by `compute-dsm` and `plan`.
#[derive(Debug, Clone, Args)]
struct GeometryArgs {
    /// Output cell size in output SRS units.
    #[arg(long, default_value = "0.5")]
    resolution: f64,

    /// Lower elevation bound relative to the reference, metres.
    #[arg(long, allow_hyphen_values = true)]
    min_elevation_offset: Option<f64>,

    /// Upper elevation bound relative to the reference, metres.
    #[arg(long, allow_hyphen_values = true)]
    max_elevation_offset: Option<f64>,

    /// Output EPSG code (default: UTM zone of the first pair).
    #[arg(long)]
    epsg: Option<u32>,

    /// Region of interest: XMIN YMIN XMAX YMAX.
    #[arg(long, num_args = 4, value_names = ["XMIN", "YMIN", "XMAX", "YMAX"], allow_hyphen_values = true)]
    roi: Option<Vec<f64>>,

    /// EPSG code of --roi (default: output EPSG).
    #[arg(long, requires = "roi")]
    roi_epsg: Option<u32>,

    /// Epipolar tile size in pixels (default: derived from memory budget).
    #[arg(long)]
    epi_tile_size: Option<usize>,

    /// Static parameters file (JSON).
    #[arg(long)]
    static_params: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PoolModeArg {
    Sequential,
    Local,
}

impl PoolModeArg {
    fn name(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FailurePolicyArg {
    Abort,
    NoData,
}

impl FailurePolicyArg {
    fn to_core(self) -> FailurePolicy {
        match self {
            Self::Abort => FailurePolicy::Abort,
            Self::NoData => FailurePolicy::NoData,
        }
    }
}

impl GeometryArgs {
    fn to_params(&self) -> CliResult<DsmParams> {
        let roi = match self.roi.as_deref() {
            Some(&[xmin, ymin, xmax, ymax]) => Some(Roi {
                bounds: Region::new(xmin, ymin, xmax, ymax),
                epsg: self.roi_epsg.map(Epsg),
            }),
            Some(other) => {
                return Err(format!("--roi takes 4 values, got {}", other.len()).into());
            }
            None => None,
        };
        Ok(DsmParams {
            resolution: self.resolution,
            min_elevation_offset: self.min_elevation_offset,
            max_elevation_offset: self.max_elevation_offset,
            epsg: self.epsg.map(Epsg),
            roi,
            epi_tile_size: self.epi_tile_size,
            ..DsmParams::default()
        })
    }

    fn static_params(&self) -> CliResult<StaticParams> {
        match &self.static_params {
            Some(path) => {
                tracing::info!("Loading static parameters: {}", path.display());
                Ok(StaticParams::load(path)?)
            }
            None => Ok(StaticParams::default()),
        }
    }
}

impl CliComputeArgs {
    fn to_params(&self) -> CliResult<DsmParams> {
        // Filtered points are triangulated in ECEF, which only `proj` reaches.
        if !cfg!(feature = "proj") && (self.small_components_filter || self.statistical_outliers_filter) {
            return Err("--small-components-filter and --statistical-outliers-filter need a build \
                        with the `proj` feature"
                .into());
        }
        Ok(DsmParams {
            sigma: self.sigma,
            dsm_radius: self.dsm_radius,
            dsm_no_data: self.dsm_no_data,
            color_no_data: self.color_no_data,
            use_sec_disp: self.use_sec_disp,
            small_components_filter: self.small_components_filter,
            statistical_outliers_filter: self.statistical_outliers_filter,
            output_stats: self.output_stats,
            geoid: self.geoid.clone(),
            pool: PoolConfig {
                mode: self.mode.name().to_string(),
                workers: self.workers,
                task_timeout_secs: self.timeout_secs,
            },
            on_tile_failure: self.on_tile_failure.to_core(),
            ..self.geometry.to_params()?
        })
    }
}

fn load_pairs(paths: &[PathBuf]) -> CliResult<Vec<Arc<PairInput>>> {
    paths
        .iter()
        .map(|p| {
            tracing::info!("Loading pair configuration: {}", p.display());
            Ok(Arc::new(PairInput::load(p)?))
        })
        .collect()
}

fn collaborators() -> Collaborators {
    #[cfg(feature = "proj")]
    let projector: Arc<dyn Projector> = Arc::new(tiledsm::collab::ProjProjector);
    #[cfg(not(feature = "proj"))]
    let projector: Arc<dyn Projector> = Arc::new(tiledsm::collab::IdentityProjector);
    Collaborators::reference(projector)
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ComputeDsm(args) => run_compute_dsm(&args),
        Commands::Plan(args) => run_plan(&args),
    }
}

// ── compute-dsm ────────────────────────────────────────────────────────

fn run_compute_dsm(args: &CliComputeArgs) -> CliResult<()> {
    let params = args.to_params()?;
    let statics = args.geometry.static_params()?;
    let pairs = load_pairs(&args.pairs)?;

    let out = tiledsm::compute_dsm(&pairs, &params, &statics, &collaborators(), &args.out)?;

    tracing::info!(
        "Wrote {} of {} terrain tiles ({} empty, {} failed) from {} triangulations",
        out.tiles_written,
        out.tiles_planned,
        out.empty_tiles,
        out.failed_tiles.len(),
        out.stage1_tasks,
    );
    tracing::info!("Manifest written to {}", out.manifest.display());
    Ok(())
}

// ── plan ───────────────────────────────────────────────────────────────

fn run_plan(args: &CliPlanArgs) -> CliResult<()> {
    let params = args.geometry.to_params()?;
    let statics = args.geometry.static_params()?;
    let pairs = load_pairs(&args.pairs)?;

    let plan = tiledsm::plan(&pairs, &params, &statics, &collaborators())?;
    tracing::info!(
        "Terrain grid {}x{} ({} tiles to rasterize, {} skipped, {} triangulations)",
        plan.rows,
        plan.cols,
        plan.tiles.len(),
        plan.skipped_tiles,
        plan.stage1_count(),
    );
    write_json(&args.out, &plan)?;
    tracing::info!("Plan written to {}", args.out.display());
    Ok(())
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> CliResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_dsm_flags_reach_the_parameters() {
        let cli = Cli::try_parse_from([
            "tiledsm",
            "compute-dsm",
            "a.json",
            "b.json",
            "--out",
            "out",
            "--resolution",
            "2",
            "--roi",
            "0",
            "-10",
            "100",
            "50",
            "--roi-epsg",
            "4326",
            "--mode",
            "sequential",
            "--on-tile-failure",
            "no-data",
            "--min-elevation-offset",
            "-20",
            "--output-stats",
        ])
        .unwrap();
        let Commands::ComputeDsm(args) = cli.command else {
            panic!("expected compute-dsm");
        };
        assert_eq!(args.pairs.len(), 2);
        let p = args.to_params().unwrap();
        assert_eq!(p.resolution, 2.0);
        assert_eq!(p.min_elevation_offset, Some(-20.0));
        assert_eq!(p.pool.mode, "sequential");
        assert_eq!(p.on_tile_failure, FailurePolicy::NoData);
        assert!(p.output_stats);
        let roi = p.roi.unwrap();
        assert_eq!(roi.bounds, Region::new(0.0, -10.0, 100.0, 50.0));
        assert_eq!(roi.epsg, Some(Epsg(4326)));
        assert!(p.validate().is_ok());
    }

    #[cfg(not(feature = "proj"))]
    #[test]
    fn point_cloud_filters_need_proj() {
        for flag in ["--small-components-filter", "--statistical-outliers-filter"] {
            let cli = Cli::try_parse_from(["tiledsm", "compute-dsm", "a.json", "--out", "out", flag])
                .unwrap();
            let Commands::ComputeDsm(args) = cli.command else {
                panic!("expected compute-dsm");
            };
            let err = args.to_params().expect_err("filters without proj");
            assert!(err.to_string().contains("proj"), "{err}");
        }
    }

    #[test]
    fn plan_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let pair = dir.path().join("left_right.json");
        std::fs::write(
            &pair,
            r#"{
                "input": {"img1": "left.tif", "img2": "right.tif"},
                "preprocessing": {"output": {
                    "epipolar_size_x": 60, "epipolar_size_y": 40,
                    "minimum_disparity": -1.0, "maximum_disparity": 1.0,
                    "disp_to_alt_ratio": 2.5
                }},
                "affine_model": {
                    "epsg": 32631, "origin": [500000.0, 4800000.0],
                    "column_step": [1.0, 0.0], "row_step": [0.0, -1.0],
                    "disparity_step": [1.0, 0.0], "surface": [1.0, 0.0, 0.0]
                }
            }"#,
        )
        .unwrap();
        let out = dir.path().join("plan.json");
        let (pair, out_arg) = (pair.display().to_string(), out.display().to_string());
        let cli = Cli::try_parse_from([
            "tiledsm",
            "plan",
            pair.as_str(),
            "--out",
            out_arg.as_str(),
            "--resolution",
            "1",
            "--epsg",
            "32631",
            "--epi-tile-size",
            "20",
        ])
        .unwrap();
        let Commands::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        run_plan(&args).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(doc["epsg"], 32631);
        assert_eq!(doc["pairs"][0]["id"], "left_right");
        assert_eq!(doc["pairs"][0]["epipolar_tiles"], 6);
        assert!(doc["tiles"].as_array().is_some_and(|t| !t.is_empty()));
    }
}
