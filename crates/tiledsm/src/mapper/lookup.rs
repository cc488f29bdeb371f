//! Terrain-space lookup over projected epipolar grid vertices.

use rstar::primitives::GeomWithData;
use rstar::RTree;
use spade::{DelaunayTriangulation, HasPosition, Point2, PositionInTriangulation, Triangulation};

#[derive(Debug, Clone, Copy)]
struct GridVertex {
    position: Point2<f64>,
    index: usize,
}

impl HasPosition for GridVertex {
    type Scalar = f64;

    fn position(&self) -> Point2<f64> {
        self.position
    }
}

/// Where a terrain position landed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Hit {
    /// Grid vertices of the triangle containing the position.
    Triangle([usize; 3]),
    /// Outside the triangulated surface: nearest grid vertex.
    Nearest(usize),
}

/// Delaunay triangulation of projected grid vertices with a
/// nearest-neighbour index for positions outside its hull.
pub(crate) struct TerrainLookup {
    delaunay: DelaunayTriangulation<GridVertex>,
    nearest: RTree<GeomWithData<[f64; 2], usize>>,
    scale: f64,
}

impl TerrainLookup {
    /// `positions[k]` is the terrain position of grid vertex `k`. Positions
    /// are multiplied by `scale` before indexing.
    pub(crate) fn build(positions: &[[f64; 2]], scale: f64) -> Result<Self, String> {
        let scaled: Vec<[f64; 2]> = positions.iter().map(|p| [p[0] * scale, p[1] * scale]).collect();
        let vertices: Vec<GridVertex> = scaled
            .iter()
            .enumerate()
            .map(|(index, p)| GridVertex {
                position: Point2::new(p[0], p[1]),
                index,
            })
            .collect();
        let delaunay = DelaunayTriangulation::bulk_load(vertices).map_err(|e| format!("{e:?}"))?;
        let nearest = RTree::bulk_load(
            scaled
                .into_iter()
                .enumerate()
                .map(|(i, p)| GeomWithData::new(p, i))
                .collect(),
        );
        Ok(Self {
            delaunay,
            nearest,
            scale,
        })
    }

    pub(crate) fn locate(&self, position: [f64; 2]) -> Option<Hit> {
        let q = [position[0] * self.scale, position[1] * self.scale];
        let inner = match self.delaunay.locate(Point2::new(q[0], q[1])) {
            PositionInTriangulation::OnFace(f) => Some(self.delaunay.face(f).vertices()),
            PositionInTriangulation::OnEdge(e) => {
                let edge = self.delaunay.directed_edge(e);
                edge.face()
                    .as_inner()
                    .or_else(|| edge.rev().face().as_inner())
                    .map(|f| f.vertices())
            }
            PositionInTriangulation::OnVertex(v) => self
                .delaunay
                .vertex(v)
                .out_edges()
                .find_map(|e| e.face().as_inner())
                .map(|f| f.vertices()),
            PositionInTriangulation::OutsideOfConvexHull(_)
            | PositionInTriangulation::NoTriangulation => None,
        };
        match inner {
            Some(vs) => Some(Hit::Triangle(vs.map(|v| v.data().index))),
            None => self.nearest.nearest_neighbor(&q).map(|n| Hit::Nearest(n.data)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_grid() -> Vec<[f64; 2]> {
        let mut out = Vec::new();
        for j in 0..3 {
            for i in 0..3 {
                out.push([i as f64 * 10.0, j as f64 * 10.0]);
            }
        }
        out
    }

    #[test]
    fn inside_point_hits_a_triangle_around_it() {
        let lookup = TerrainLookup::build(&square_grid(), 1.0).unwrap();
        match lookup.locate([12.0, 3.0]) {
            Some(Hit::Triangle(mut vs)) => {
                vs.sort();
                // Triangle lies in the cell spanned by vertices 1, 2, 4, 5.
                assert!(vs.iter().all(|v| [1, 2, 4, 5].contains(v)), "{vs:?}");
            }
            other => panic!("expected triangle, got {other:?}"),
        }
    }

    #[test]
    fn vertices_and_edges_still_resolve_to_triangles() {
        let lookup = TerrainLookup::build(&square_grid(), 1.0).unwrap();
        assert!(matches!(lookup.locate([10.0, 10.0]), Some(Hit::Triangle(_))));
        assert!(matches!(lookup.locate([0.0, 5.0]), Some(Hit::Triangle(_))));
    }

    #[test]
    fn outside_point_falls_back_to_nearest_vertex() {
        let lookup = TerrainLookup::build(&square_grid(), 1.0).unwrap();
        assert_eq!(lookup.locate([35.0, 21.0]), Some(Hit::Nearest(8)));
        assert_eq!(lookup.locate([-100.0, -1.0]), Some(Hit::Nearest(0)));
    }

    #[test]
    fn scaled_geographic_positions() {
        let degrees: Vec<[f64; 2]> = square_grid()
            .into_iter()
            .map(|p| [1.0 + p[0] * 1e-6, 43.0 + p[1] * 1e-6])
            .collect();
        let lookup = TerrainLookup::build(&degrees, 1000.0).unwrap();
        assert!(matches!(
            lookup.locate([1.0 + 12e-6, 43.0 + 3e-6]),
            Some(Hit::Triangle(_))
        ));
    }

    #[test]
    fn nan_positions_are_rejected() {
        let mut grid = square_grid();
        grid[4] = [f64::NAN, 0.0];
        assert!(TerrainLookup::build(&grid, 1.0).is_err());
    }
}
