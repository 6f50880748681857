//! Road network over the anchors of one road region.
//!
//! A minimum spanning tree (greedy O(n^2) Prim) keeps every anchor
//! connected; a handful of extra edges from random anchors to their nearest
//! unconnected anchor add redundancy without turning the network into a dense graph.

use std::collections::HashSet;

use bevy::math::IVec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::params::RoadBuilderParams;

/// Planning weight between two anchors: squared XZ distance plus a linear
/// penalty on the height difference.
pub fn edge_weight(a: IVec3, b: IVec3, vertical_penalty: i64) -> i64 {
    let dx = i64::from(a.x - b.x);
    let dz = i64::from(a.z - b.z);
    dx * dx + dz * dz + vertical_penalty * i64::from((a.y - b.y).abs())
}

/// Edges as index pairs into `anchors`, smaller index first. Tree edges come
/// first, in the order Prim adds them.
pub fn plan_network(anchors: &[IVec3], seed: u64, params: &RoadBuilderParams) -> Vec<(usize, usize)> {
    let n = anchors.len();
    if n < 2 {
        return Vec::new();
    }
    let weight = |i: usize, j: usize| edge_weight(anchors[i], anchors[j], params.planner_vertical_penalty);

    let mut in_tree = vec![false; n];
    let mut best = vec![i64::MAX; n];
    let mut parent = vec![0usize; n];
    let mut edges = Vec::with_capacity(n - 1 + n / params.extra_edge_divisor.max(1));
    let mut seen = HashSet::new();

    in_tree[0] = true;
    for j in 1..n {
        best[j] = weight(0, j);
    }
    for _ in 1..n {
        let Some(next) = (0..n).filter(|&j| !in_tree[j]).min_by_key(|&j| (best[j], j)) else {
            break;
        };
        in_tree[next] = true;
        let edge = ordered(parent[next], next);
        seen.insert(edge);
        edges.push(edge);
        for j in 0..n {
            if !in_tree[j] {
                let w = weight(next, j);
                if w < best[j] {
                    best[j] = w;
                    parent[j] = next;
                }
            }
        }
    }

    if params.extra_edge_divisor == 0 {
        return edges;
    }
    let extra = n / params.extra_edge_divisor;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut added = 0;
    for _ in 0..extra * 4 {
        if added >= extra {
            break;
        }
        let i = rng.gen_range(0..n);
        // The nearest neighbour is always a tree edge, so look past anchors
        // already connected to `i`.
        let Some(j) = (0..n)
            .filter(|&j| j != i && !seen.contains(&ordered(i, j)))
            .min_by_key(|&j| (weight(i, j), j))
        else {
            continue;
        };
        let edge = ordered(i, j);
        if seen.insert(edge) {
            edges.push(edge);
            added += 1;
        }
    }
    edges
}

fn ordered(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_connected(n: usize, edges: &[(usize, usize)]) -> bool {
        let mut reached = vec![false; n];
        let mut stack = vec![0];
        reached[0] = true;
        while let Some(i) = stack.pop() {
            for &(a, b) in edges {
                let other = if a == i { b } else if b == i { a } else { continue };
                if !reached[other] {
                    reached[other] = true;
                    stack.push(other);
                }
            }
        }
        reached.into_iter().all(|r| r)
    }

    #[test]
    fn test_fewer_than_two_anchors() {
        let params = RoadBuilderParams::default();
        assert!(plan_network(&[], 1, &params).is_empty());
        assert!(plan_network(&[IVec3::ZERO], 1, &params).is_empty());
    }

    #[test]
    fn test_line_of_anchors_chains_neighbors() {
        let anchors: Vec<IVec3> = (0..4).map(|i| IVec3::new(i * 20, 64, 0)).collect();
        let params = RoadBuilderParams {
            extra_edge_divisor: 0,
            ..Default::default()
        };
        let edges = plan_network(&anchors, 7, &params);
        assert_eq!(edges, vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn test_vertical_penalty_prefers_level_neighbor() {
        let anchors = [
            IVec3::new(0, 64, 0),
            IVec3::new(10, 90, 0),
            IVec3::new(0, 64, 12),
        ];
        let params = RoadBuilderParams {
            extra_edge_divisor: 0,
            planner_vertical_penalty: 64,
            ..Default::default()
        };
        let edges = plan_network(&anchors, 7, &params);
        assert_eq!(edges[0], (0, 2));
    }

    #[test]
    fn test_spanning_plus_extra_edges_deterministic() {
        let anchors: Vec<IVec3> = (0..18)
            .map(|i| IVec3::new((i * 37) % 200, 64 + i % 3, (i * 53) % 170))
            .collect();
        let params = RoadBuilderParams::default();
        let edges = plan_network(&anchors, 99, &params);
        let extra = anchors.len() / params.extra_edge_divisor;
        assert!(extra > 0);
        assert_eq!(edges.len(), anchors.len() - 1 + extra);
        assert!(is_connected(anchors.len(), &edges));
        assert_eq!(edges, plan_network(&anchors, 99, &params));

        let unique: HashSet<_> = edges.iter().collect();
        assert_eq!(unique.len(), edges.len());
        assert!(edges.iter().all(|(a, b)| a < b));
    }
}
