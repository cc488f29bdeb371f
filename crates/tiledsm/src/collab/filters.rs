//! Point cloud cleaning applied before gridding.
//!
//! Both filters work on metric 3D coordinates, which is why triangulation
//! switches to a geocentric frame when one of them is enabled.

use rstar::primitives::GeomWithData;
use rstar::RTree;

use super::types::PointCloud;
use crate::config::{SmallComponentsParams, StatisticalOutliersParams};

type IndexedPoint = GeomWithData<[f64; 3], usize>;

fn build_tree(cloud: &PointCloud) -> RTree<IndexedPoint> {
    RTree::bulk_load(
        cloud
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedPoint::new(*p, i))
            .collect(),
    )
}

/// Remove points whose mean distance to their `k` nearest neighbours
/// exceeds the cloud-wide mean by more than `std_dev_factor` standard
/// deviations. Returns the number of removed points.
pub fn remove_statistical_outliers(cloud: &mut PointCloud, params: &StatisticalOutliersParams) -> usize {
    let n = cloud.len();
    if n < 3 || params.k == 0 {
        return 0;
    }
    let tree = build_tree(cloud);
    let mean_dist: Vec<f64> = cloud
        .points
        .iter()
        .map(|p| {
            let (sum, count) = tree
                .nearest_neighbor_iter(p)
                .skip(1)
                .take(params.k)
                .fold((0.0, 0usize), |(s, c), q| (s + dist(p, q.geom()), c + 1));
            if count == 0 {
                0.0
            } else {
                sum / count as f64
            }
        })
        .collect();

    let mu = mean_dist.iter().sum::<f64>() / n as f64;
    let var = mean_dist.iter().map(|d| (d - mu).powi(2)).sum::<f64>() / n as f64;
    let limit = mu + params.std_dev_factor * var.sqrt();
    let keep: Vec<bool> = mean_dist.iter().map(|&d| d <= limit).collect();
    let removed = keep.iter().filter(|k| !**k).count();
    if removed > 0 {
        cloud.retain_mask(&keep);
    }
    tracing::trace!("statistical outlier filter removed {removed}/{n} points");
    removed
}

/// Remove connected components (points linked when closer than
/// `connection_distance`) with fewer than `nb_points_threshold` points.
///
/// With `clusters_distance_threshold`, a small component is kept when it
/// lies within that distance of a kept component.
pub fn remove_small_components(cloud: &mut PointCloud, params: &SmallComponentsParams) -> usize {
    let n = cloud.len();
    if n == 0 {
        return 0;
    }
    let tree = build_tree(cloud);
    let mut uf = UnionFind::new(n);
    let r2 = params.connection_distance * params.connection_distance;
    for (i, p) in cloud.points.iter().enumerate() {
        for q in tree.locate_within_distance(*p, r2) {
            uf.union(i, q.data);
        }
    }

    let mut sizes = vec![0usize; n];
    for i in 0..n {
        sizes[uf.find(i)] += 1;
    }
    let mut keep: Vec<bool> = (0..n)
        .map(|i| sizes[uf.find(i)] >= params.nb_points_threshold)
        .collect();

    if let Some(threshold) = params.clusters_distance_threshold {
        let big: Vec<IndexedPoint> = (0..n)
            .filter(|&i| keep[i])
            .map(|i| IndexedPoint::new(cloud.points[i], i))
            .collect();
        if !big.is_empty() {
            let big_tree = RTree::bulk_load(big);
            let t2 = threshold * threshold;
            let mut rescued_roots = Vec::new();
            for i in (0..n).filter(|&i| !keep[i]) {
                if big_tree.locate_within_distance(cloud.points[i], t2).next().is_some() {
                    rescued_roots.push(uf.find(i));
                }
            }
            for i in 0..n {
                if !keep[i] && rescued_roots.contains(&uf.find(i)) {
                    keep[i] = true;
                }
            }
        }
    }

    let removed = keep.iter().filter(|k| !**k).count();
    if removed > 0 {
        cloud.retain_mask(&keep);
    }
    tracing::trace!("small components filter removed {removed}/{n} points");
    removed
}

fn dist(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srs::Epsg;

    fn lattice(origin: [f64; 3], side: usize, step: f64) -> Vec<[f64; 3]> {
        let mut out = Vec::new();
        for a in 0..side {
            for b in 0..side {
                out.push([origin[0] + a as f64 * step, origin[1] + b as f64 * step, origin[2]]);
            }
        }
        out
    }

    fn cloud_of(points: Vec<[f64; 3]>) -> PointCloud {
        let mut c = PointCloud::new(Epsg::ECEF, 1);
        for (i, p) in points.into_iter().enumerate() {
            c.push(p, &[i as f32]);
        }
        c
    }

    #[test]
    fn isolated_point_is_an_outlier() {
        let mut pts = lattice([0.0, 0.0, 0.0], 10, 1.0);
        pts.push([50.0, 50.0, 50.0]);
        let mut c = cloud_of(pts);
        let removed = remove_statistical_outliers(
            &mut c,
            &StatisticalOutliersParams {
                k: 8,
                std_dev_factor: 3.0,
            },
        );
        assert_eq!(removed, 1);
        assert_eq!(c.len(), 100);
        assert!(c.points.iter().all(|p| p[0] < 10.0));
        assert_eq!(c.colors[0].len(), 100);
    }

    #[test]
    fn small_cluster_removed_unless_close_to_big_one() {
        let mut pts = lattice([0.0, 0.0, 0.0], 8, 1.0);
        pts.extend(lattice([20.0, 0.0, 0.0], 2, 1.0));
        let params = SmallComponentsParams {
            connection_distance: 1.5,
            nb_points_threshold: 10,
            ..SmallComponentsParams::default()
        };

        let mut c = cloud_of(pts.clone());
        assert_eq!(remove_small_components(&mut c, &params), 4);
        assert_eq!(c.len(), 64);

        let mut c = cloud_of(pts);
        let rescue = SmallComponentsParams {
            clusters_distance_threshold: Some(15.0),
            ..params
        };
        assert_eq!(remove_small_components(&mut c, &rescue), 0);
    }
}
