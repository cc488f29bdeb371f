//! Geoid undulation grid.

use std::path::Path;

use crate::error::{DsmError, Result};

/// Regular longitude/latitude grid of geoid heights above the ellipsoid.
///
/// `values` is row-major, row 0 at `origin[1]` (southernmost latitude).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeoidGrid {
    /// `[lon, lat]` of the first sample, degrees.
    pub origin: [f64; 2],
    /// `[dlon, dlat]`, degrees.
    pub step: [f64; 2],
    pub width: usize,
    pub height: usize,
    pub values: Vec<f32>,
}

impl GeoidGrid {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DsmError::file(path, e))?;
        let grid: GeoidGrid = serde_json::from_str(&text)
            .map_err(|e| DsmError::schema(path.display().to_string(), e.to_string()))?;
        if grid.width < 2 || grid.height < 2 || grid.values.len() != grid.width * grid.height {
            return Err(DsmError::schema(
                path.display().to_string(),
                format!(
                    "geoid grid {}x{} does not match {} values",
                    grid.width,
                    grid.height,
                    grid.values.len()
                ),
            ));
        }
        if !(grid.step[0] > 0.0 && grid.step[1] > 0.0) {
            return Err(DsmError::schema(
                path.display().to_string(),
                "geoid grid step must be positive",
            ));
        }
        Ok(grid)
    }

    /// Bilinear undulation at `lon, lat`; clamped at the grid border.
    pub fn undulation(&self, lon: f64, lat: f64) -> f64 {
        let fx = ((lon - self.origin[0]) / self.step[0]).clamp(0.0, (self.width - 1) as f64);
        let fy = ((lat - self.origin[1]) / self.step[1]).clamp(0.0, (self.height - 1) as f64);
        let x0 = (fx.floor() as usize).min(self.width - 2);
        let y0 = (fy.floor() as usize).min(self.height - 2);
        let tx = fx - x0 as f64;
        let ty = fy - y0 as f64;
        let at = |x: usize, y: usize| self.values[y * self.width + x] as f64;
        let top = at(x0, y0) * (1.0 - tx) + at(x0 + 1, y0) * tx;
        let bottom = at(x0, y0 + 1) * (1.0 - tx) + at(x0 + 1, y0 + 1) * tx;
        top * (1.0 - ty) + bottom * ty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp() -> GeoidGrid {
        GeoidGrid {
            origin: [0.0, 40.0],
            step: [1.0, 1.0],
            width: 3,
            height: 2,
            values: vec![10.0, 12.0, 14.0, 20.0, 22.0, 24.0],
        }
    }

    #[test]
    fn bilinear_inside_and_clamped_outside() {
        let g = ramp();
        assert_abs_diff_eq!(g.undulation(0.0, 40.0), 10.0);
        assert_abs_diff_eq!(g.undulation(1.5, 40.5), 18.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g.undulation(2.0, 41.0), 24.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g.undulation(-5.0, 30.0), 10.0);
    }

    #[test]
    fn load_checks_value_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geoid.json");
        let mut g = ramp();
        g.values.pop();
        std::fs::write(&path, serde_json::to_string(&g).unwrap()).unwrap();
        assert!(GeoidGrid::load(&path).is_err());

        std::fs::write(&path, serde_json::to_string(&ramp()).unwrap()).unwrap();
        assert_eq!(GeoidGrid::load(&path).unwrap(), ramp());
    }
}
