use nalgebra::Point2;

use crate::grid::SpatialGrid;

/// Group points into maximal sets connected by chains of hops of length at
/// most `eps`.
///
/// This is density clustering with a minimum cluster size of one: a point
/// with no neighbor still forms its own cluster, nothing is discarded as
/// noise. Each returned cluster lists member indices in ascending order;
/// clusters are ordered by their smallest member.
pub fn cluster_points(points: &[Point2<f64>], eps: f64) -> Vec<Vec<usize>> {
    let mut grid = SpatialGrid::build(points, eps);
    let mut assigned = vec![false; points.len()];
    let mut clusters = Vec::new();

    for start in 0..points.len() {
        if assigned[start] {
            continue;
        }

        let mut component = vec![start];
        assigned[start] = true;
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            for neighbor in grid.take_within(&points[node], points) {
                if assigned[neighbor] {
                    continue;
                }
                assigned[neighbor] = true;
                component.push(neighbor);
                stack.push(neighbor);
            }
        }

        component.sort_unstable();
        clusters.push(component);
    }

    clusters
}
