//! tiledsm: tile-correspondence and scheduling engine for multi-pair
//! stereo DSM production.
//!
//! A run turns several rectified stereo pairs into one north-up digital
//! surface model. The stages are:
//!
//! 1. **Resolve** – disparity bounds, epipolar tiling and terrain footprint
//!    of every pair ([`DisparityBoundsResolver`]).
//! 2. **Tile** – a common terrain grid over the union of the footprints
//!    ([`TileGrid`], [`list_tiles`]).
//! 3. **Map** – which epipolar tiles can see each terrain tile
//!    ([`EpipolarTerrainMapper`]).
//! 4. **Schedule** – triangulation tasks per epipolar tile, then
//!    rasterization tasks per terrain tile, on a [`WorkerPool`]
//!    ([`TaskScheduler`]).
//! 5. **Mosaic** – terrain rasters assembled into GeoTIFF outputs
//!    ([`MosaicWriter`]) next to a `content.json` run manifest.
//!
//! # Public API
//! - [`compute_dsm`] and [`plan`] as primary entry points
//! - [`DsmParams`] / [`StaticParams`] for tuning
//! - collaborator traits ([`StereoGeometry`], [`Projector`],
//!   [`Triangulator`], [`Rasterizer`]) with reference implementations

pub mod collab;
pub mod config;
mod error;
pub mod manifest;
pub mod mapper;
pub mod mosaic;
pub mod pair;
mod pipeline;
pub mod polygon;
pub mod pool;
pub mod scheduler;
pub mod srs;
pub mod tiling;

#[cfg(test)]
pub(crate) mod test_utils;

pub use collab::{
    Collaborators, DisparityMode, PointCloud, PointCloudTile, Projector, RasterTile, Rasterizer,
    StereoGeometry, Triangulator,
};
pub use config::{DsmParams, FailurePolicy, PairConfiguration, PairInput, PoolConfig, StaticParams};
pub use error::{DsmError, Result};
pub use manifest::{RunManifest, MANIFEST_FILE};
pub use mapper::{EpipolarTerrainMapper, StereoPairContext};
pub use mosaic::{MosaicLayout, MosaicOutputs, MosaicWriter};
pub use pair::{DisparityBoundsResolver, DisparityRange, PairGeometry};
pub use pipeline::{compute_dsm, plan, prepare, DsmOutput, PreparedRun};
pub use pool::{TaskError, TaskHandle, WorkerPool};
pub use scheduler::{TaskScheduler, TilingPlan};
pub use srs::Epsg;
pub use tiling::{list_tiles, split, Region, TileGrid, TileKey};
