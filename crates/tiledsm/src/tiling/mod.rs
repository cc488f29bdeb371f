//! Rectangular tiling in epipolar and terrain space.
//!
//! - [`Region`] is the value type shared by both spaces.
//! - [`TileGrid`] / [`split`] partition a bounding box into cells.
//! - [`TileKey`] / [`list_tiles`] identify tiles and enumerate the ones
//!   covering a footprint.

mod grid;
mod index;
mod region;

pub use grid::{split, TileGrid};
pub use index::{list_tiles, TileKey};
pub use region::{OriginWindow, Region};

pub(crate) use region::cell_count;
