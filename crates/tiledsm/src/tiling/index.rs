//! Tile identity and neighbour enumeration.

use std::fmt;

use super::region::Region;

/// Canonical identity of a tile, derived from its four bounds.
///
/// Equality and hashing use the IEEE-754 bit patterns of the bounds after
/// folding `-0.0` onto `0.0` and every NaN onto one quiet NaN, so two tiles
/// built with identical bounds always share a key. `Display` renders the
/// bounds with Rust's shortest round-trip float formatting
/// (`xmin_ymin_xmax_ymax`), which is equally canonical.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey([u64; 4]);

impl TileKey {
    pub fn of(region: &Region) -> Self {
        let b = region.to_array();
        Self([
            canonical_bits(b[0]),
            canonical_bits(b[1]),
            canonical_bits(b[2]),
            canonical_bits(b[3]),
        ])
    }

    /// Bounds the key was built from.
    pub fn region(&self) -> Region {
        Region::new(
            f64::from_bits(self.0[0]),
            f64::from_bits(self.0[1]),
            f64::from_bits(self.0[2]),
            f64::from_bits(self.0[3]),
        )
    }
}

fn canonical_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0.0f64.to_bits()
    } else {
        v.to_bits()
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.region();
        write!(f, "{}_{}_{}_{}", r.xmin, r.ymin, r.xmax, r.ymax)
    }
}

impl fmt::Debug for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TileKey({self})")
    }
}

impl From<&Region> for TileKey {
    fn from(r: &Region) -> Self {
        Self::of(r)
    }
}

impl serde::Serialize for TileKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// Tiles of a fixed `tile_size` grid anchored at the origin of
/// `largest_region` that cover `region` expanded by `margin` tiles on every
/// side, cropped to `largest_region`. Empty crops are dropped.
///
/// Enumeration is x-major, matching [`super::grid::split`], so the
/// returned regions carry the same bounds (and keys) as the tiles produced
/// by splitting `largest_region` with the same size.
pub fn list_tiles(
    region: &Region,
    largest_region: &Region,
    tile_size: f64,
    margin: usize,
) -> Vec<Region> {
    if !(tile_size > 0.0) || region.is_empty() {
        return Vec::new();
    }
    let ox = largest_region.xmin;
    let oy = largest_region.ymin;
    let m = margin as i64;

    let min_x = ((region.xmin - ox) / tile_size).floor() as i64 - m;
    let max_x = ((region.xmax - ox) / tile_size).ceil() as i64 + m;
    let min_y = ((region.ymin - oy) / tile_size).floor() as i64 - m;
    let max_y = ((region.ymax - oy) / tile_size).ceil() as i64 + m;

    let mut out = Vec::new();
    for x in min_x..max_x {
        for y in min_y..max_y {
            let tile = Region::new(
                ox + x as f64 * tile_size,
                oy + y as f64 * tile_size,
                ox + (x + 1) as f64 * tile_size,
                oy + (y + 1) as f64 * tile_size,
            )
            .crop(largest_region);
            if !tile.is_empty() {
                out.push(tile);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::grid::split;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    #[test]
    fn key_is_pure_function_of_bounds() {
        let a = Region::new(0.0, 30.0, 30.0, 60.0);
        let b = Region::new(0.0, 30.0, 30.0, 60.0);
        assert_eq!(TileKey::of(&a), TileKey::of(&b));
        assert_eq!(TileKey::of(&a).to_string(), "0_30_30_60");
        assert_ne!(TileKey::of(&a), TileKey::of(&Region::new(30.0, 0.0, 60.0, 30.0)));
        assert_eq!(
            TileKey::of(&Region::new(-0.0, 0.0, 1.0, 1.0)),
            TileKey::of(&Region::new(0.0, 0.0, 1.0, 1.0))
        );
        assert_eq!(TileKey::of(&a).region(), a);
    }

    #[test]
    fn key_survives_serialization_boundary() {
        let r = Region::new(0.1 + 0.2, 1.0 / 3.0, 12.5, 1e-17);
        let json = serde_json::to_string(&r).unwrap();
        let back: Region = serde_json::from_str(&json).unwrap();
        assert_eq!(TileKey::of(&r), TileKey::of(&back));
    }

    #[test]
    fn listed_tiles_share_keys_with_split() {
        let largest = Region::new(0.0, 0.0, 610.0, 445.0);
        let keys: HashSet<TileKey> = split(&largest, 30.0, 30.0).iter().map(TileKey::of).collect();
        let listed = list_tiles(&Region::new(95.0, 12.0, 605.0, 440.0), &largest, 30.0, 1);
        assert!(!listed.is_empty());
        for t in &listed {
            assert!(keys.contains(&TileKey::of(t)), "{t:?} not in split");
        }
    }

    #[test]
    fn list_tiles_covers_region_with_margin() {
        let largest = Region::new(0.0, 0.0, 300.0, 300.0);
        let tiles = list_tiles(&Region::new(100.0, 100.0, 110.0, 110.0), &largest, 50.0, 1);
        // One covering tile plus one ring of neighbours.
        assert_eq!(tiles.len(), 9);
        assert_eq!(Region::union(&tiles).unwrap(), Region::new(50.0, 50.0, 200.0, 200.0));

        let corner = list_tiles(&Region::new(0.0, 0.0, 10.0, 10.0), &largest, 50.0, 1);
        assert_eq!(corner.len(), 4);
    }

    #[test]
    fn list_tiles_is_monotonic_in_margin() {
        let mut rng = StdRng::seed_from_u64(3);
        let largest = Region::new(0.0, 0.0, 777.0, 512.0);
        for _ in 0..200 {
            let x0 = rng.gen_range(-50.0..800.0);
            let y0 = rng.gen_range(-50.0..550.0);
            let r = Region::new(x0, y0, x0 + rng.gen_range(0.1..200.0), y0 + rng.gen_range(0.1..200.0));
            let ts = rng.gen_range(16.0..128.0f64).round();
            let narrow: HashSet<TileKey> =
                list_tiles(&r, &largest, ts, 0).iter().map(TileKey::of).collect();
            let wide: HashSet<TileKey> =
                list_tiles(&r, &largest, ts, 1).iter().map(TileKey::of).collect();
            assert!(narrow.is_subset(&wide));
        }
    }
}
