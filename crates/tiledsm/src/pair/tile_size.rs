//! Tile sizing in epipolar and terrain space.

use crate::config::EpipolarTilingParams;

// Bits held per epipolar pixel by one correlation task.
const IMAGE_BITS: f64 = 32.0 * 2.0;
const DISPARITY_BITS: f64 = 32.0;
const VALIDITY_MASK_BITS: f64 = 16.0;
const CONFIDENCE_BITS: f64 = 32.0;
const PENALTY_BITS: f64 = 8.0 * 32.0 * 2.0;
const CROP_BITS: f64 = 32.0 * 2.0;
// Per disparity level: float cost, NaN mask and integer cost.
const COST_BITS_PER_LEVEL: f64 = 32.0 + 8.0 + 8.0;

const BITS_PER_MIB: f64 = 8.0 * 1024.0 * 1024.0;

/// Square epipolar tile side that fits one correlation task in memory.
pub fn optimal_epipolar_tile_size(disp_min: f64, disp_max: f64, p: &EpipolarTilingParams) -> usize {
    let levels = (disp_max - disp_min).max(1.0);
    let bits_per_pixel = IMAGE_BITS
        + DISPARITY_BITS
        + VALIDITY_MASK_BITS
        + CONFIDENCE_BITS
        + PENALTY_BITS
        + CROP_BITS
        + levels * COST_BITS_PER_LEVEL;
    let budget = (p.max_ram_mb - p.reserved_ram_mb).max(0.0) * BITS_PER_MIB;
    let pixels_per_side = (budget / bits_per_pixel).sqrt();
    let margin = p.margin as f64;

    let size = if pixels_per_side <= 2.0 * margin {
        p.min_tile_size
    } else {
        let raw = (pixels_per_side - 2.0 * margin).floor() as usize;
        let step = p.tile_size_rounding.max(1);
        (raw / step) * step
    };
    size.clamp(p.min_tile_size, p.max_tile_size.max(p.min_tile_size))
}

/// Common terrain tile width: mean over pairs of the side of a square
/// covering the pair's terrain area divided by its epipolar tile count,
/// rounded up to a multiple of the resolution.
///
/// Entries are `(pair id, terrain area, epipolar tile count)`. Pairs with no
/// area or no tile have no meaningful side and are left out of the mean.
pub fn optimal_terrain_tile_size(pairs: &[(&str, f64, usize)], resolution: f64) -> Option<f64> {
    let sides: Vec<f64> = pairs
        .iter()
        .filter(|(id, area, n)| {
            let keep = *n > 0 && *area > 0.0;
            if !keep {
                tracing::debug!(
                    "pair {id}: terrain area {area} over {n} epipolar tiles, \
                     left out of the terrain tile size"
                );
            }
            keep
        })
        .map(|&(_, area, n)| (area / n as f64).sqrt())
        .collect();
    if sides.is_empty() {
        return None;
    }
    let mean = sides.iter().sum::<f64>() / sides.len() as f64;
    Some((mean / resolution).ceil().max(1.0) * resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wider_disparity_range_means_smaller_tiles() {
        let p = EpipolarTilingParams::default();
        let narrow = optimal_epipolar_tile_size(-5.0, 5.0, &p);
        let wide = optimal_epipolar_tile_size(-200.0, 200.0, &p);
        assert!(narrow >= wide, "{narrow} < {wide}");
        for s in [narrow, wide] {
            assert_eq!(s % p.tile_size_rounding, 0);
            assert!((p.min_tile_size..=p.max_tile_size).contains(&s));
        }
    }

    #[test]
    fn memory_starved_tasks_fall_back_to_min_size() {
        let p = EpipolarTilingParams {
            max_ram_mb: 100.0,
            ..EpipolarTilingParams::default()
        };
        assert_eq!(optimal_epipolar_tile_size(0.0, 10.0, &p), p.min_tile_size);
    }

    #[test]
    fn terrain_tile_is_resolution_multiple() {
        let s = optimal_terrain_tile_size(&[("a", 18_120.0 * 18_210.0, 400), ("b", 900.0, 1)], 0.5)
            .unwrap();
        let expected = ((18_120.0f64 * 18_210.0 / 400.0).sqrt() + 30.0) / 2.0;
        assert_relative_eq!(s, (expected / 0.5).ceil() * 0.5);
        assert_eq!(optimal_terrain_tile_size(&[], 0.5), None);
    }

    #[test]
    fn degenerate_pairs_do_not_shrink_the_terrain_tile() {
        let kept = optimal_terrain_tile_size(&[("a", 1600.0, 4), ("b", 900.0, 1)], 1.0);
        assert_eq!(kept, Some(25.0));
        let with_degenerate = optimal_terrain_tile_size(
            &[("a", 1600.0, 4), ("flat", 0.0, 9), ("b", 900.0, 1), ("untiled", 400.0, 0)],
            1.0,
        );
        assert_eq!(with_degenerate, kept);
        assert_eq!(optimal_terrain_tile_size(&[("flat", 0.0, 3), ("untiled", 10.0, 0)], 1.0), None);
    }
}
