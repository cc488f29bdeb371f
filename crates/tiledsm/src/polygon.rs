//! Minimal polygon support for coverage envelopes and regions of interest.

use crate::tiling::Region;

/// Closed ring of vertices (first vertex not repeated).
///
/// Intersection tests treat both operands as convex, which holds for
/// stereo coverage envelopes and rectangular regions of interest.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Polygon {
    pub exterior: Vec<[f64; 2]>,
}

impl Polygon {
    pub fn new(exterior: Vec<[f64; 2]>) -> Self {
        let mut exterior = exterior;
        if exterior.len() > 1 && exterior.first() == exterior.last() {
            exterior.pop();
        }
        Self { exterior }
    }

    /// Convex hull of a point set, counter-clockwise.
    pub fn convex_hull(points: &[[f64; 2]]) -> Self {
        let mut pts: Vec<[f64; 2]> = points.iter().copied().filter(|p| p.iter().all(|v| v.is_finite())).collect();
        pts.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
        pts.dedup();
        if pts.len() < 3 {
            return Self { exterior: pts };
        }
        let cross = |o: [f64; 2], a: [f64; 2], b: [f64; 2]| {
            (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
        };
        let mut hull: Vec<[f64; 2]> = Vec::with_capacity(2 * pts.len());
        for pass in [pts.clone(), pts.iter().rev().copied().collect()] {
            let start = hull.len();
            for p in pass {
                while hull.len() >= start + 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
                    hull.pop();
                }
                hull.push(p);
            }
            hull.pop();
        }
        Self { exterior: hull }
    }

    pub fn is_empty(&self) -> bool {
        self.exterior.is_empty()
    }

    pub fn bounds(&self) -> Option<Region> {
        Region::from_points(&self.exterior)
    }

    /// Separating-axis test; touching boundaries count as intersecting.
    pub fn intersects(&self, other: &Polygon) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        !(has_separating_edge(self, other) || has_separating_edge(other, self))
    }
}

impl From<&Region> for Polygon {
    fn from(r: &Region) -> Self {
        Self {
            exterior: r.corners().to_vec(),
        }
    }
}

fn has_separating_edge(a: &Polygon, b: &Polygon) -> bool {
    let n = a.exterior.len();
    if n == 1 {
        return false;
    }
    (0..n).any(|k| {
        let p = a.exterior[k];
        let q = a.exterior[(k + 1) % n];
        let axis = [q[1] - p[1], p[0] - q[0]];
        if axis[0] == 0.0 && axis[1] == 0.0 {
            return false;
        }
        let (amin, amax) = project(&a.exterior, axis);
        let (bmin, bmax) = project(&b.exterior, axis);
        amax < bmin || bmax < amin
    })
}

fn project(points: &[[f64; 2]], axis: [f64; 2]) -> (f64, f64) {
    points
        .iter()
        .map(|p| p[0] * axis[0] + p[1] * axis[1])
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond(cx: f64, cy: f64, r: f64) -> Polygon {
        Polygon::new(vec![[cx + r, cy], [cx, cy + r], [cx - r, cy], [cx, cy - r]])
    }

    #[test]
    fn closing_vertex_is_dropped() {
        let p = Polygon::new(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]);
        assert_eq!(p.exterior.len(), 3);
        assert_eq!(p.bounds(), Some(Region::new(0.0, 0.0, 1.0, 1.0)));
    }

    #[test]
    fn hull_of_swept_rectangle() {
        let pts = [
            [0.0, 0.0],
            [10.0, 0.0],
            [10.0, 10.0],
            [0.0, 10.0],
            [5.0, 5.0],
            [3.0, 0.0],
            [13.0, 0.0],
            [13.0, 10.0],
            [3.0, 10.0],
        ];
        let hull = Polygon::convex_hull(&pts);
        assert_eq!(hull.exterior, vec![[0.0, 0.0], [13.0, 0.0], [13.0, 10.0], [0.0, 10.0]]);
    }

    #[test]
    fn separating_axis_intersection() {
        let square = Polygon::from(&Region::new(0.0, 0.0, 10.0, 10.0));
        assert!(square.intersects(&diamond(5.0, 5.0, 1.0)));
        assert!(square.intersects(&diamond(12.0, 5.0, 2.0)));
        // Bounding boxes overlap but the diamond sits off the corner.
        assert!(!square.intersects(&diamond(11.9, 11.9, 3.0)));
        assert!(!square.intersects(&Polygon::default()));
    }
}
