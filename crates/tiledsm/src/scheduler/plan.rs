//! Terrain tile to epipolar tile dependencies, computed without running
//! any task.

use std::collections::{BTreeSet, HashSet};

use crate::mapper::StereoPairContext;
use crate::pair::DisparityRange;
use crate::srs::Epsg;
use crate::tiling::{list_tiles, OriginWindow, Region, TileGrid, TileKey};

/// Margin, in tiles, added around each epipolar footprint.
pub const FOOTPRINT_MARGIN: usize = 1;

/// One epipolar tile of one pair needed by a terrain tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct RequiredTile {
    /// Index of the pair in the run.
    pub pair: usize,
    pub key: TileKey,
}

/// A terrain tile with at least one contributing epipolar tile.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TerrainTilePlan {
    /// Row in the terrain grid.
    pub j: usize,
    /// Column in the terrain grid.
    pub i: usize,
    pub region: Region,
    pub window: OriginWindow,
    /// Grouped by pair, in each pair's tile order.
    pub required: Vec<RequiredTile>,
}

impl TerrainTilePlan {
    /// Submission priority; tiles near the grid origin go first.
    pub fn rank(&self) -> usize {
        self.i * self.i + self.j * self.j
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PairPlan {
    pub id: String,
    pub disparity: DisparityRange,
    pub epi_tile_size: usize,
    pub epipolar_tiles: usize,
    /// Epipolar tiles referenced by at least one terrain tile.
    pub required_tiles: usize,
    pub terrain_bbox: Region,
}

/// Everything the scheduler will submit, in submission order.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TilingPlan {
    pub epsg: Epsg,
    pub resolution: f64,
    pub terrain_bounds: Region,
    pub terrain_tile_size: f64,
    pub rows: usize,
    pub cols: usize,
    pub pairs: Vec<PairPlan>,
    /// Sorted by [`TerrainTilePlan::rank`].
    pub tiles: Vec<TerrainTilePlan>,
    /// Terrain tiles no pair contributes to.
    pub skipped_tiles: usize,
    pub avg_epipolar_tiles_per_terrain_tile: f64,
    pub max_epipolar_tiles_per_terrain_tile: usize,
}

impl TilingPlan {
    /// Stage-1 tasks of pair `pair`, in its epipolar split order.
    pub fn stage1_regions<'a>(
        &'a self,
        pair: usize,
        context: &'a StereoPairContext,
    ) -> impl Iterator<Item = (TileKey, Region)> + 'a {
        let needed: HashSet<TileKey> = self
            .tiles
            .iter()
            .flat_map(|t| &t.required)
            .filter(|r| r.pair == pair)
            .map(|r| r.key)
            .collect();
        context
            .geometry
            .epipolar_regions
            .iter()
            .map(|r| (TileKey::of(r), *r))
            .filter(move |(k, _)| needed.contains(k))
    }

    pub fn stage1_count(&self) -> usize {
        self.pairs.iter().map(|p| p.required_tiles).sum()
    }
}

/// Epipolar tiles of one pair needed by terrain tile `(j, i)`.
///
/// Empty when the tile's footprint misses the pair's epipolar image.
pub fn required_epipolar_tiles(
    context: &StereoPairContext,
    terrain_grid: &TileGrid,
    j: usize,
    i: usize,
    ledger: &HashSet<TileKey>,
) -> Vec<TileKey> {
    let geometry = &context.geometry;
    let footprint = context
        .footprints
        .tile_footprint(terrain_grid, j, i)
        .crop(&geometry.largest_epipolar_region);
    if footprint.is_empty() {
        return Vec::new();
    }
    list_tiles(
        &footprint,
        &geometry.largest_epipolar_region,
        geometry.epi_tile_size as f64,
        FOOTPRINT_MARGIN,
    )
    .iter()
    .map(TileKey::of)
    .filter(|k| ledger.contains(k))
    .collect()
}

/// Build the full stage-2 dependency plan.
pub fn plan_tiles(
    contexts: &[StereoPairContext],
    terrain_grid: &TileGrid,
    terrain_bounds: Region,
    terrain_tile_size: f64,
    resolution: f64,
    epsg: Epsg,
) -> TilingPlan {
    let ledgers: Vec<HashSet<TileKey>> = contexts
        .iter()
        .map(|c| c.geometry.epipolar_regions.iter().map(TileKey::of).collect())
        .collect();

    let mut tiles = Vec::new();
    let mut skipped_tiles = 0;
    for (j, i, region) in terrain_grid.cells() {
        let mut required = Vec::new();
        for (pair, (context, ledger)) in contexts.iter().zip(&ledgers).enumerate() {
            let keys = required_epipolar_tiles(context, terrain_grid, j, i, ledger);
            if keys.is_empty() {
                tracing::trace!(
                    "terrain tile ({j}, {i}): footprint misses pair {}",
                    context.geometry.id()
                );
            }
            required.extend(keys.into_iter().map(|key| RequiredTile { pair, key }));
        }
        if required.is_empty() {
            tracing::debug!("terrain tile ({j}, {i}) has no contributing epipolar tile, skipped");
            skipped_tiles += 1;
            continue;
        }
        tiles.push(TerrainTilePlan {
            j,
            i,
            region,
            window: region.origin_window(resolution),
            required,
        });
    }
    // Stable: equal ranks keep row-major order.
    tiles.sort_by_key(TerrainTilePlan::rank);

    let pairs = contexts
        .iter()
        .enumerate()
        .map(|(pair, c)| {
            let used: BTreeSet<TileKey> = tiles
                .iter()
                .flat_map(|t| &t.required)
                .filter(|r| r.pair == pair)
                .map(|r| r.key)
                .collect();
            PairPlan {
                id: c.geometry.id().to_string(),
                disparity: c.geometry.disparity,
                epi_tile_size: c.geometry.epi_tile_size,
                epipolar_tiles: c.geometry.epipolar_regions.len(),
                required_tiles: used.len(),
                terrain_bbox: c.geometry.terrain_bbox,
            }
        })
        .collect();

    let counts: Vec<usize> = tiles.iter().map(|t| t.required.len()).collect();
    let max = counts.iter().copied().max().unwrap_or(0);
    let avg = if counts.is_empty() {
        0.0
    } else {
        counts.iter().sum::<usize>() as f64 / counts.len() as f64
    };
    if counts.is_empty() {
        tracing::warn!("no terrain tile is covered by any pair");
    } else {
        tracing::info!(
            "average number of epipolar tiles for each terrain tile: {}",
            avg.round() as usize
        );
        tracing::info!("max number of epipolar tiles for each terrain tile: {max}");
    }

    TilingPlan {
        epsg,
        resolution,
        terrain_bounds,
        terrain_tile_size,
        rows: terrain_grid.rows,
        cols: terrain_grid.cols,
        pairs,
        tiles,
        skipped_tiles,
        avg_epipolar_tiles_per_terrain_tile: avg,
        max_epipolar_tiles_per_terrain_tile: max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{Collaborators, IdentityProjector};
    use crate::config::{DsmParams, StaticParams};
    use crate::mapper::EpipolarTerrainMapper;
    use crate::pair::DisparityBoundsResolver;
    use crate::test_utils::{affine_pair, TEST_EPSG};
    use std::sync::Arc;

    fn contexts(grid_of: impl Fn(&Region) -> (Region, f64)) -> (Vec<StereoPairContext>, TileGrid, Region, f64) {
        let collab = Collaborators::reference(Arc::new(IdentityProjector));
        let params = DsmParams {
            epi_tile_size: Some(20),
            resolution: 1.0,
            ..DsmParams::default()
        };
        let statics = StaticParams::default();
        let resolver = DisparityBoundsResolver::new(&params, &statics, &collab);
        let geometry = resolver
            .resolve(Arc::new(affine_pair("p0", 100, 80, [-2.0, 2.0], 1.0)), TEST_EPSG)
            .unwrap();
        let (bounds, tile) = grid_of(&geometry.terrain_bbox);
        let grid = TileGrid::new(&bounds, tile, tile);
        let ctx = EpipolarTerrainMapper::new(&collab)
            .context(geometry, &grid, TEST_EPSG)
            .unwrap();
        (vec![ctx], grid, bounds, tile)
    }

    #[test]
    fn tiles_are_ranked_by_distance_to_grid_origin() {
        let (ctx, grid, bounds, tile) = contexts(|b| (*b, 25.0));
        let plan = plan_tiles(&ctx, &grid, bounds, tile, 1.0, TEST_EPSG);
        assert_eq!(plan.skipped_tiles, 0);
        assert_eq!(plan.tiles.len(), grid.cell_count());
        let ranks: Vec<usize> = plan.tiles.iter().map(TerrainTilePlan::rank).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "{ranks:?}");
        assert!(plan.max_epipolar_tiles_per_terrain_tile >= 1);
        assert!(plan.avg_epipolar_tiles_per_terrain_tile >= 1.0);
    }

    #[test]
    fn required_keys_belong_to_the_ledger() {
        let (ctx, grid, bounds, tile) = contexts(|b| (*b, 25.0));
        let plan = plan_tiles(&ctx, &grid, bounds, tile, 1.0, TEST_EPSG);
        let ledger: HashSet<TileKey> = ctx[0]
            .geometry
            .epipolar_regions
            .iter()
            .map(TileKey::of)
            .collect();
        for t in &plan.tiles {
            assert!(t.required.iter().all(|r| r.pair == 0 && ledger.contains(&r.key)));
            assert_eq!(t.window, t.region.origin_window(1.0));
        }
        let stage1: Vec<_> = plan.stage1_regions(0, &ctx[0]).collect();
        assert_eq!(stage1.len(), plan.stage1_count());
        assert!(stage1.len() <= ledger.len());
    }

    #[test]
    fn tiles_beyond_the_pair_are_skipped() {
        // Extend the terrain bounds far east of the pair.
        let (ctx, grid, bounds, tile) = contexts(|b| {
            (Region::new(b.xmin, b.ymin, b.xmax + 500.0, b.ymax), 25.0)
        });
        let plan = plan_tiles(&ctx, &grid, bounds, tile, 1.0, TEST_EPSG);
        assert!(plan.skipped_tiles > 0);
        let east = ctx[0].geometry.terrain_bbox.xmax + 25.0;
        assert!(plan.tiles.iter().all(|t| t.region.xmin < east));
        assert_eq!(plan.tiles.len() + plan.skipped_tiles, grid.cell_count());
    }
}
