//! Two-stage task submission.
//!
//! Stage 1 triangulates every epipolar tile a terrain tile depends on,
//! once per pair and key. Stage 2 submits one rasterization task per
//! covered terrain tile; each task receives the stage-1 handles it needs
//! and waits on them inside the worker. Every stage-1 task is submitted
//! before the first stage-2 task.

mod plan;

use std::collections::HashMap;
use std::sync::Arc;

use crate::collab::{
    Collaborators, DisparityMode, FilterParams, PointCloud, PointCloudTile, RasterTile,
    RasterizationRequest, TriangulationRequest,
};
use crate::config::{DsmParams, GeoidGrid, StaticParams};
use crate::mapper::StereoPairContext;
use crate::pool::{wait_all, TaskHandle, WorkerPool};
use crate::tiling::{OriginWindow, TileKey};

pub use plan::{
    plan_tiles, required_epipolar_tiles, PairPlan, RequiredTile, TerrainTilePlan, TilingPlan,
    FOOTPRINT_MARGIN,
};

/// A submitted terrain tile.
#[derive(Debug)]
pub struct ScheduledTile {
    pub plan: TerrainTilePlan,
    pub handle: TaskHandle<Option<RasterTile>>,
}

/// Handles of one run, stage-2 in submission order.
#[derive(Debug)]
pub struct Schedule {
    pub stage1_tasks: usize,
    pub tiles: Vec<ScheduledTile>,
}

type CloudLedger = HashMap<TileKey, TaskHandle<Arc<PointCloudTile>>>;

pub struct TaskScheduler<'a> {
    pool: &'a WorkerPool,
    collaborators: &'a Collaborators,
    params: &'a DsmParams,
    statics: &'a StaticParams,
}

impl<'a> TaskScheduler<'a> {
    pub fn new(
        pool: &'a WorkerPool,
        collaborators: &'a Collaborators,
        params: &'a DsmParams,
        statics: &'a StaticParams,
    ) -> Self {
        Self {
            pool,
            collaborators,
            params,
            statics,
        }
    }

    fn modes(&self) -> Vec<DisparityMode> {
        if self.params.use_sec_disp {
            vec![DisparityMode::Primary, DisparityMode::Secondary]
        } else {
            vec![DisparityMode::Primary]
        }
    }

    fn filters(&self) -> FilterParams {
        FilterParams {
            small_components: self
                .params
                .small_components_filter
                .then(|| self.statics.small_components.clone()),
            statistical_outliers: self
                .params
                .statistical_outliers_filter
                .then(|| self.statics.statistical_outliers.clone()),
        }
    }

    /// Submit both stages of `plan`.
    pub fn submit(
        &self,
        plan: &TilingPlan,
        contexts: &[StereoPairContext],
        geoid: Option<Arc<GeoidGrid>>,
    ) -> Schedule {
        let ledgers = self.submit_stage1(plan, contexts, geoid);
        let stage1_tasks = ledgers.iter().map(HashMap::len).sum();
        let tiles = self.submit_stage2(plan, &ledgers);
        tracing::info!(
            "submitted {stage1_tasks} triangulation and {} rasterization tasks",
            tiles.len()
        );
        Schedule {
            stage1_tasks,
            tiles,
        }
    }

    fn submit_stage1(
        &self,
        plan: &TilingPlan,
        contexts: &[StereoPairContext],
        geoid: Option<Arc<GeoidGrid>>,
    ) -> Vec<CloudLedger> {
        let modes = self.modes();
        let correlator = Arc::new(self.params.correlator.clone());
        let epsg = self.params.triangulation_epsg(plan.epsg);

        contexts
            .iter()
            .enumerate()
            .map(|(pair, ctx)| {
                let geometry = &ctx.geometry;
                let mut ledger = CloudLedger::new();
                for (key, region) in plan.stage1_regions(pair, ctx) {
                    if ledger.contains_key(&key) {
                        continue;
                    }
                    let request = TriangulationRequest {
                        pair: Arc::clone(&geometry.pair),
                        region,
                        key,
                        disp_min: geometry.disparity.min,
                        disp_max: geometry.disparity.max,
                        epsg,
                        modes: modes.clone(),
                        correlator: Arc::clone(&correlator),
                        snap_to_img1: self.params.snap_to_img1,
                        align: self.params.align,
                        geoid: geoid.clone(),
                    };
                    let triangulator = Arc::clone(&self.collaborators.triangulator);
                    let handle = self.pool.submit(
                        format!("triangulate pair {} tile {key}", geometry.id()),
                        move || triangulator.triangulate(&request).map(Arc::new),
                    );
                    ledger.insert(key, handle);
                }
                tracing::info!(
                    "pair {}: {} of {} epipolar tiles submitted",
                    geometry.id(),
                    ledger.len(),
                    geometry.epipolar_regions.len()
                );
                ledger
            })
            .collect()
    }

    fn rasterization_request(&self, plan: &TilingPlan, window: OriginWindow) -> RasterizationRequest {
        RasterizationRequest {
            resolution: plan.resolution,
            epsg: plan.epsg,
            window,
            radius: self.params.dsm_radius,
            sigma: self.params.sigma,
            dsm_no_data: self.params.dsm_no_data,
            color_no_data: self.params.color_no_data,
            with_stats: self.params.output_stats,
            filters: self.filters(),
            grid_points_division_factor: self.statics.rasterization.grid_points_division_factor,
        }
    }

    fn submit_stage2(&self, plan: &TilingPlan, ledgers: &[CloudLedger]) -> Vec<ScheduledTile> {
        let timeout = self.pool.task_timeout();

        plan.tiles
            .iter()
            .map(|tile| {
                let deps: Vec<TaskHandle<Arc<PointCloudTile>>> = tile
                    .required
                    .iter()
                    .filter_map(|r| ledgers.get(r.pair)?.get(&r.key).cloned())
                    .collect();
                let request = self.rasterization_request(plan, tile.window);
                let rasterizer = Arc::clone(&self.collaborators.rasterizer);
                let label = format!(
                    "rasterize terrain tile ({}, {}) {}",
                    tile.j,
                    tile.i,
                    TileKey::of(&tile.region)
                );
                let handle = self.pool.submit(label, move || {
                    let clouds = wait_all(&deps, timeout)?;
                    let ordered = clouds_in_mode_order(&clouds);
                    rasterizer.rasterize(&ordered, &request)
                });
                ScheduledTile {
                    plan: tile.clone(),
                    handle,
                }
            })
            .collect()
    }
}

/// Primary clouds of every tile, then secondary clouds of every tile.
fn clouds_in_mode_order(tiles: &[Arc<PointCloudTile>]) -> Vec<&PointCloud> {
    [DisparityMode::Primary, DisparityMode::Secondary]
        .into_iter()
        .flat_map(|mode| tiles.iter().filter_map(move |t| t.cloud(mode)))
        .collect()
}
