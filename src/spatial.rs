use std::collections::HashMap;

use crate::entity::Position;

/// Uniform bucket grid over the indices of a slice of positions.
///
/// Queries return exactly the points a brute-force scan would: everything
/// strictly closer than the radius. Buckets only prune the scan.
#[derive(Clone, Debug)]
pub struct NeighborGrid {
    cell_size: f64,
    buckets: HashMap<(i64, i64), Vec<usize>>,
}

impl NeighborGrid {
    /// `cell_size` must be finite and positive (callers pass a validated radius).
    pub fn new(cell_size: f64) -> Self {
        debug_assert!(cell_size.is_finite() && cell_size > 0.0);
        Self {
            cell_size,
            buckets: HashMap::new(),
        }
    }

    pub fn build<'a>(cell_size: f64, positions: impl IntoIterator<Item = &'a Position>) -> Self {
        let mut grid = Self::new(cell_size);
        for (idx, p) in positions.into_iter().enumerate() {
            grid.insert(idx, *p);
        }
        grid
    }

    fn key(&self, p: Position) -> (i64, i64) {
        (
            (p.x / self.cell_size).floor() as i64,
            (p.y / self.cell_size).floor() as i64,
        )
    }

    pub fn insert(&mut self, idx: usize, p: Position) {
        let key = self.key(p);
        self.buckets.entry(key).or_default().push(idx);
    }

    /// Calls `visit` for every index whose position lies strictly within
    /// `radius` of `center`. Visit order is unspecified.
    pub fn for_each_within(
        &self,
        center: Position,
        radius: f64,
        position_of: impl Fn(usize) -> Position,
        mut visit: impl FnMut(usize),
    ) {
        let r_sq = radius * radius;
        let span = (radius / self.cell_size).ceil() as i64;
        let (cx, cy) = self.key(center);
        for gx in cx - span..=cx + span {
            for gy in cy - span..=cy + span {
                let Some(bucket) = self.buckets.get(&(gx, gy)) else {
                    continue;
                };
                for &idx in bucket {
                    if position_of(idx).distance_sq(&center) < r_sq {
                        visit(idx);
                    }
                }
            }
        }
    }

    /// Indices strictly within `radius` of `center`, in ascending order.
    pub fn within(
        &self,
        center: Position,
        radius: f64,
        position_of: impl Fn(usize) -> Position,
    ) -> Vec<usize> {
        let mut found = Vec::new();
        self.for_each_within(center, radius, position_of, |idx| found.push(idx));
        found.sort_unstable();
        found
    }

    pub fn count_within(
        &self,
        center: Position,
        radius: f64,
        position_of: impl Fn(usize) -> Position,
    ) -> usize {
        let mut count = 0;
        self.for_each_within(center, radius, position_of, |_| count += 1);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::RandomSource;

    #[test]
    fn finds_points_strictly_within_radius() {
        let points = vec![
            Position::new(0.0, 0.0),
            Position::new(0.5, 0.0),
            Position::new(1.0, 0.0), // on the boundary: excluded
            Position::new(-0.3, 0.4),
            Position::new(5.0, 5.0),
        ];
        let grid = NeighborGrid::build(1.0, &points);
        let found = grid.within(Position::ORIGIN, 1.0, |i| points[i]);
        assert_eq!(found, vec![0, 1, 3]);
    }

    #[test]
    fn matches_brute_force_on_random_cloud() {
        let mut rng = RandomSource::seeded(99);
        let points: Vec<Position> = (0..500)
            .map(|_| rng.point_in_disk(Position::ORIGIN, 6.0))
            .collect();
        let grid = NeighborGrid::build(1.5, &points);
        for center in points.iter().take(50) {
            let expected: Vec<usize> = points
                .iter()
                .enumerate()
                .filter(|(_, p)| p.distance_sq(center) < 1.5 * 1.5)
                .map(|(i, _)| i)
                .collect();
            assert_eq!(grid.within(*center, 1.5, |i| points[i]), expected);
        }
    }

    #[test]
    fn handles_query_radius_larger_than_cells() {
        let points = vec![Position::new(0.0, 0.0), Position::new(2.5, 0.0)];
        let grid = NeighborGrid::build(1.0, &points);
        assert_eq!(grid.count_within(Position::ORIGIN, 3.0, |i| points[i]), 2);
    }

    #[test]
    fn incremental_inserts_are_visible() {
        let mut points: Vec<Position> = Vec::new();
        let mut grid = NeighborGrid::new(1.0);
        assert_eq!(grid.count_within(Position::ORIGIN, 5.0, |i| points[i]), 0);
        for k in 0..4 {
            let p = Position::new(0.1 * k as f64, 0.0);
            grid.insert(points.len(), p);
            points.push(p);
        }
        assert_eq!(grid.count_within(Position::ORIGIN, 0.25, |i| points[i]), 3);
    }
}
