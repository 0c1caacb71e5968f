//! Breadth-first flood fill over block positions.

use std::collections::{HashSet, VecDeque};

use crate::schema::{BlockPos, Connectivity, FloodFillConfig};

/// Neighbor offsets for a connectivity: faces first, then edges, then corners.
pub fn neighbor_offsets(connectivity: Connectivity) -> Vec<[i32; 3]> {
    let mut offsets: Vec<[i32; 3]> = Vec::with_capacity(26);
    for nonzero in 1..=3 {
        for dy in -1..=1 {
            for dz in -1..=1 {
                for dx in -1..=1 {
                    let count = [dx, dy, dz].iter().filter(|v| **v != 0).count();
                    if count == nonzero {
                        offsets.push([dx, dy, dz]);
                    }
                }
            }
        }
    }
    offsets.truncate(connectivity.neighbor_count());
    offsets
}

/// Flood outward from `seed` through positions accepted by `predicate`,
/// calling `visit` once per reached position.
///
/// Positions more than `max_depth` steps from the seed are not reached.
/// Returns the number of visited positions.
pub fn flood_fill(
    seed: BlockPos,
    config: &FloodFillConfig,
    mut predicate: impl FnMut(BlockPos) -> bool,
    mut visit: impl FnMut(BlockPos),
) -> usize {
    if !predicate(seed) {
        return 0;
    }

    let offsets = neighbor_offsets(config.connectivity);
    let mut seen = HashSet::from([seed]);
    let mut queue = VecDeque::from([(seed, 0u32)]);
    let mut visited = 0;

    while let Some((pos, depth)) = queue.pop_front() {
        visit(pos);
        visited += 1;
        if depth >= config.max_depth {
            continue;
        }
        for [dx, dy, dz] in &offsets {
            let next = pos.add(*dx, *dy, *dz);
            if seen.insert(next) && predicate(next) {
                queue.push_back((next, depth + 1));
            }
        }
    }

    visited
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(connectivity: Connectivity, max_depth: u32) -> FloodFillConfig {
        FloodFillConfig {
            connectivity,
            max_depth,
        }
    }

    #[test]
    fn test_offset_counts() {
        assert_eq!(neighbor_offsets(Connectivity::Faces).len(), 6);
        assert_eq!(neighbor_offsets(Connectivity::Edges).len(), 18);
        assert_eq!(neighbor_offsets(Connectivity::Corners).len(), 26);
        assert!(
            neighbor_offsets(Connectivity::Faces)
                .iter()
                .all(|o| o.iter().map(|v| v.abs()).sum::<i32>() == 1)
        );
    }

    #[test]
    fn test_fill_stays_in_region() {
        let inside = |p: BlockPos| (0..4).contains(&p.x) && (0..2).contains(&p.y) && p.z == 0;
        let mut reached = Vec::new();
        let count = flood_fill(BlockPos::new(0, 0, 0), &config(Connectivity::Faces, 100), inside, |p| {
            reached.push(p)
        });
        assert_eq!(count, 8);
        assert_eq!(reached.len(), 8);
    }

    #[test]
    fn test_diagonal_needs_corners() {
        let cells = [BlockPos::new(0, 0, 0), BlockPos::new(1, 1, 1)];
        let inside = |p: BlockPos| cells.contains(&p);

        assert_eq!(flood_fill(cells[0], &config(Connectivity::Faces, 10), inside, |_| {}), 1);
        assert_eq!(flood_fill(cells[0], &config(Connectivity::Edges, 10), inside, |_| {}), 1);
        assert_eq!(flood_fill(cells[0], &config(Connectivity::Corners, 10), inside, |_| {}), 2);
    }

    #[test]
    fn test_depth_limit() {
        let line = |p: BlockPos| p.y == 0 && p.z == 0 && p.x >= 0;
        assert_eq!(flood_fill(BlockPos::new(0, 0, 0), &config(Connectivity::Faces, 5), line, |_| {}), 6);
    }

    #[test]
    fn test_rejected_seed() {
        assert_eq!(flood_fill(BlockPos::new(0, 0, 0), &config(Connectivity::Faces, 5), |_| false, |_| {}), 0);
    }
}
