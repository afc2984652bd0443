use std::collections::HashMap;

use nalgebra::Point2;

/// Uniform bucket grid over 2D points for fixed-radius neighbor queries.
///
/// Cells are at least as wide as the query radius, so every neighbor of a
/// point lies in the 3x3 block of cells around it. Queries *take* their
/// matches out of the grid: during cluster expansion each point is handed
/// out exactly once, which keeps the total work linear in the number of
/// points even when one cell holds all of them.
#[derive(Debug)]
pub struct SpatialGrid {
    cell: f64,
    radius_sq: f64,
    buckets: HashMap<(i64, i64), Vec<usize>>,
}

impl SpatialGrid {
    /// Index `points` for queries of the given radius.
    ///
    /// Points with a non-finite coordinate are not indexed and are never
    /// returned as anyone's neighbor.
    pub fn build(points: &[Point2<f64>], radius: f64) -> Self {
        // Slight widening absorbs rounding in `x / cell`.
        let cell = radius * (1.0 + 1e-9);
        let mut grid = Self {
            cell,
            radius_sq: radius * radius,
            buckets: HashMap::new(),
        };
        for (i, p) in points.iter().enumerate() {
            if let Some(key) = grid.key(p) {
                grid.buckets.entry(key).or_default().push(i);
            }
        }
        grid
    }

    fn key(&self, p: &Point2<f64>) -> Option<(i64, i64)> {
        if !(p.x.is_finite() && p.y.is_finite()) {
            return None;
        }
        // `as` saturates, which keeps neighboring keys adjacent for huge
        // ratios and maps everything to cell 0 for an infinite radius.
        Some(((p.x / self.cell).floor() as i64, (p.y / self.cell).floor() as i64))
    }

    /// Remove and return every indexed point within the radius of `query`
    /// (inclusive).
    pub fn take_within(&mut self, query: &Point2<f64>, points: &[Point2<f64>]) -> Vec<usize> {
        let Some((kx, ky)) = self.key(query) else {
            return Vec::new();
        };

        let mut keys: Vec<(i64, i64)> = Vec::with_capacity(9);
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let key = (kx.saturating_add(dx), ky.saturating_add(dy));
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }

        let radius_sq = self.radius_sq;
        let mut found = Vec::new();
        for key in keys {
            let Some(bucket) = self.buckets.get_mut(&key) else {
                continue;
            };
            bucket.retain(|&i| {
                let d = points[i] - *query;
                if d.norm_squared() <= radius_sq {
                    found.push(i);
                    false
                } else {
                    true
                }
            });
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        found
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
