use proj::Proj;

use super::Projector;
use crate::error::{DsmError, Result};
use crate::srs::Epsg;

/// PROJ-backed projector. A transformation object is built per call since
/// `Proj` handles cannot be shared between worker threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjProjector;

impl Projector for ProjProjector {
    fn project_points(&self, points: &[[f64; 2]], from: Epsg, to: Epsg) -> Result<Vec<[f64; 2]>> {
        if from == to {
            return Ok(points.to_vec());
        }
        let transform = Proj::new_known_crs(&from.to_string(), &to.to_string(), None)
            .map_err(|e| DsmError::Geometry(format!("{from} -> {to}: {e}")))?;
        points
            .iter()
            .map(|p| {
                transform
                    .convert((p[0], p[1]))
                    .map(|(x, y)| [x, y])
                    .map_err(|e| {
                        DsmError::Geometry(format!("{from} -> {to} at ({}, {}): {e}", p[0], p[1]))
                    })
            })
            .collect()
    }
}
