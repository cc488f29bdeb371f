//! End-to-end DSM run: resolve pairs, map terrain tiles to epipolar tiles,
//! schedule both stages and assemble the mosaic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::collab::Collaborators;
use crate::config::{DsmParams, FailurePolicy, GeoidGrid, PairInput, StaticParams};
use crate::error::{DsmError, Result};
use crate::manifest::{FailedTile, RunManifest};
use crate::mapper::{EpipolarTerrainMapper, StereoPairContext};
use crate::mosaic::{MosaicLayout, MosaicOptions, MosaicOutputs, MosaicWriter};
use crate::pair::DisparityBoundsResolver;
use crate::pool::{TaskError, WorkerPool};
use crate::scheduler::{plan_tiles, TaskScheduler, TerrainTilePlan, TilingPlan};
use crate::srs::Epsg;
use crate::tiling::{Region, TileGrid};

/// Per-pair contexts and the terrain tiling of a run.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub epsg: Epsg,
    pub terrain_bounds: Region,
    pub terrain_grid: TileGrid,
    pub contexts: Vec<StereoPairContext>,
    pub plan: TilingPlan,
}

/// Summary of a finished run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DsmOutput {
    pub epsg: Epsg,
    pub terrain_bounds: Region,
    pub outputs: MosaicOutputs,
    pub manifest: PathBuf,
    pub stage1_tasks: usize,
    /// Terrain tiles submitted for rasterization.
    pub tiles_planned: usize,
    pub tiles_written: usize,
    /// Rasterization tasks that produced no raster.
    pub empty_tiles: usize,
    pub failed_tiles: Vec<FailedTile>,
}

fn validate(params: &DsmParams, statics: &StaticParams) -> Result<()> {
    params
        .validate()
        .map_err(|reason| DsmError::schema("dsm parameters", reason))?;
    statics
        .validate()
        .map_err(|reason| DsmError::schema("static parameters", reason))
}

/// Resolve every pair and build the terrain tiling plan. Runs no task.
pub fn prepare(
    pairs: &[Arc<PairInput>],
    params: &DsmParams,
    statics: &StaticParams,
    collab: &Collaborators,
) -> Result<PreparedRun> {
    validate(params, statics)?;
    if pairs.is_empty() {
        return Err(DsmError::EmptyInput("no input pair configuration".into()));
    }
    let resolver = DisparityBoundsResolver::new(params, statics, collab);
    resolver.check_options(pairs);
    let ranges: Vec<_> = pairs.iter().map(|p| resolver.disparity_range(p)).collect();
    let epsg = resolver.output_epsg(pairs, &ranges)?;

    let geometries = pairs
        .iter()
        .zip(ranges)
        .map(|(p, range)| resolver.resolve_with_range(Arc::clone(p), range, epsg))
        .collect::<Result<Vec<_>>>()?;
    let terrain_bounds = resolver.terrain_bounds(&geometries, epsg)?;
    let tile_size = resolver.terrain_tile_size(&geometries)?;
    let terrain_grid = TileGrid::new(&terrain_bounds, tile_size, tile_size);
    tracing::info!(
        "terrain grid: {} rows x {} columns of {tile_size:.3} tiles ({} tiles)",
        terrain_grid.rows,
        terrain_grid.cols,
        terrain_grid.cell_count()
    );

    let mapper = EpipolarTerrainMapper::new(collab);
    let contexts = geometries
        .into_iter()
        .map(|g| mapper.context(g, &terrain_grid, epsg))
        .collect::<Result<Vec<_>>>()?;
    let plan = plan_tiles(
        &contexts,
        &terrain_grid,
        terrain_bounds,
        tile_size,
        params.resolution,
        epsg,
    );
    Ok(PreparedRun {
        epsg,
        terrain_bounds,
        terrain_grid,
        contexts,
        plan,
    })
}

/// Dry run: the tiling plan a [`compute_dsm`] call would execute.
pub fn plan(
    pairs: &[Arc<PairInput>],
    params: &DsmParams,
    statics: &StaticParams,
    collab: &Collaborators,
) -> Result<TilingPlan> {
    Ok(prepare(pairs, params, statics, collab)?.plan)
}

fn color_band_count(pairs: &[Arc<PairInput>], collab: &Collaborators) -> Result<usize> {
    let mut counts = pairs
        .iter()
        .map(|p| Ok((p.id.as_str(), collab.triangulator.color_band_count(p)?)))
        .collect::<Result<Vec<_>>>()?
        .into_iter();
    let Some((first_id, first)) = counts.next() else {
        return Err(DsmError::EmptyInput("no input pair configuration".into()));
    };
    if let Some((id, n)) = counts.find(|(_, n)| *n != first) {
        return Err(DsmError::Raster(format!(
            "pair {first_id} has {first} color bands but pair {id} has {n}"
        )));
    }
    tracing::info!("number of bands in color image: {first}");
    Ok(first)
}

/// Compute the DSM of `pairs` into `out_dir`.
pub fn compute_dsm(
    pairs: &[Arc<PairInput>],
    params: &DsmParams,
    statics: &StaticParams,
    collab: &Collaborators,
    out_dir: &Path,
) -> Result<DsmOutput> {
    validate(params, statics)?;
    let pool = WorkerPool::from_config(&params.pool)?;
    let geoid = match &params.geoid {
        Some(path) => Some(pool.broadcast("geoid", GeoidGrid::load(path)?)),
        None => None,
    };

    let run = prepare(pairs, params, statics, collab)?;
    let color_bands = color_band_count(pairs, collab)?;
    let mut writer = MosaicWriter::new(
        MosaicLayout::new(run.terrain_bounds, params.resolution, run.epsg),
        MosaicOptions {
            dsm_no_data: params.dsm_no_data,
            color_no_data: params.color_no_data,
            color_bands,
            color_dtype: statics.color_dtype,
            with_stats: params.output_stats,
        },
        out_dir,
    )?;

    let schedule = TaskScheduler::new(&pool, collab, params, statics).submit(
        &run.plan,
        &run.contexts,
        geoid,
    );
    let tiles_planned = schedule.tiles.len();
    let mut by_id: HashMap<u64, TerrainTilePlan> = HashMap::with_capacity(tiles_planned);
    let mut handles = Vec::with_capacity(tiles_planned);
    for t in schedule.tiles {
        by_id.insert(t.handle.id(), t.plan);
        handles.push(t.handle);
    }

    let mut failed_tiles = Vec::new();
    let mut empty_tiles = 0;
    for (handle, result) in pool.as_completed(handles) {
        let outcome = match result {
            Ok(tile) => {
                if tile.is_none() {
                    tracing::debug!("{}: no point contributes, tile left empty", handle.label());
                    empty_tiles += 1;
                }
                writer.push(tile.as_ref()).map_err(|e| TaskError::Failed {
                    label: handle.label().to_string(),
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        };
        let Err(error) = outcome else {
            continue;
        };
        match params.on_tile_failure {
            FailurePolicy::Abort => {
                tracing::error!("{error}; aborting the run");
                return Err(error.into());
            }
            FailurePolicy::NoData => {
                tracing::warn!("{error}; tile left as no-data");
                let (j, i, region) = by_id
                    .get(&handle.id())
                    .map(|p| (p.j, p.i, p.region))
                    .unwrap_or((0, 0, Region::new(0.0, 0.0, 0.0, 0.0)));
                failed_tiles.push(FailedTile {
                    j,
                    i,
                    region,
                    error: error.to_string(),
                });
            }
        }
    }
    if !failed_tiles.is_empty() {
        tracing::warn!("{} terrain tiles failed and are left as no-data", failed_tiles.len());
    }

    let tiles_written = writer.tiles_written();
    let outputs = writer.finish()?;
    let manifest = RunManifest::new(
        pairs,
        params,
        statics,
        run.epsg,
        &outputs,
        failed_tiles.clone(),
    )?
    .write(out_dir)?;
    tracing::info!(
        "DSM written to {} ({tiles_written} tiles, {empty_tiles} empty, {} failed)",
        outputs.dsm.display(),
        failed_tiles.len()
    );

    Ok(DsmOutput {
        epsg: run.epsg,
        terrain_bounds: run.terrain_bounds,
        outputs,
        manifest,
        stage1_tasks: schedule.stage1_tasks,
        tiles_planned,
        tiles_written,
        empty_tiles,
        failed_tiles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::IdentityProjector;
    use crate::config::PoolConfig;
    use crate::test_utils::affine_pair;

    fn pairs() -> Vec<Arc<PairInput>> {
        vec![Arc::new(affine_pair("p0", 40, 40, [-1.0, 1.0], 1.0))]
    }

    fn collab() -> Collaborators {
        Collaborators::reference(Arc::new(IdentityProjector))
    }

    #[test]
    fn unknown_pool_mode_fails_before_any_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let params = DsmParams {
            pool: PoolConfig {
                mode: "cluster".into(),
                ..PoolConfig::default()
            },
            ..DsmParams::default()
        };
        let err = compute_dsm(&pairs(), &params, &StaticParams::default(), &collab(), &out)
            .expect_err("unsupported mode");
        assert!(matches!(err, DsmError::UnsupportedMode(ref m) if m == "cluster"));
        assert!(!out.exists());
    }

    #[test]
    fn invalid_parameters_are_schema_errors() {
        let params = DsmParams {
            resolution: -1.0,
            ..DsmParams::default()
        };
        let err = plan(&pairs(), &params, &StaticParams::default(), &collab()).expect_err("negative resolution");
        assert!(matches!(err, DsmError::ConfigurationSchema { .. }));
        assert!(err.to_string().contains("resolution"));
    }

    #[test]
    fn no_pairs_is_empty_input() {
        let err = plan(&[], &DsmParams::default(), &StaticParams::default(), &collab()).expect_err("no pairs");
        assert!(matches!(err, DsmError::EmptyInput(_)));
    }

    #[test]
    fn plan_covers_the_pair() {
        let params = DsmParams {
            resolution: 1.0,
            epi_tile_size: Some(10),
            epsg: Some(crate::test_utils::TEST_EPSG),
            ..DsmParams::default()
        };
        let run = prepare(&pairs(), &params, &StaticParams::default(), &collab()).unwrap();
        assert_eq!(run.plan.tiles.len() + run.plan.skipped_tiles, run.terrain_grid.cell_count());
        assert!(!run.plan.tiles.is_empty());
        assert_eq!(run.plan.pairs[0].epipolar_tiles, 16);
        assert_eq!((run.plan.tiles[0].j, run.plan.tiles[0].i), (0, 0));
    }
}
