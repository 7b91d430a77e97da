//! Recursive sliding-midpoint tree construction.
//!
//! The builder operates on a mutable permutation of point identifiers,
//! partitioning it in place with a two-pointer swap pass and writing nodes
//! into pre-allocated arena slots. Filling a caller-supplied slot (instead of
//! returning a fresh index) lets incremental insertion resplit an overgrown
//! leaf in place without touching the parent's child reference.

use crate::kdtree::constants::MAX_TREE_DEPTH;
use crate::kdtree::node::{BoundingBox, LeafNode, Node, NodeArena, SplitNode};
use crate::r#type::IndexableNum;

/// Build a tree over `ids` into a fresh arena, returning the root index.
pub(crate) fn build_tree<N: IndexableNum>(
    arena: &mut NodeArena<N>,
    points: &[&[N]],
    ids: &mut [u32],
    leaf_size: usize,
    dim: usize,
) -> u32 {
    let root = arena.push(placeholder(dim));
    build_subtree(arena, root, points, ids, leaf_size, dim, 0);
    root
}

/// Rebuild the subtree rooted at `slot` over exactly `ids`.
///
/// Used when an incremental append pushes a leaf past the size threshold.
pub(crate) fn resplit_leaf<N: IndexableNum>(
    arena: &mut NodeArena<N>,
    slot: u32,
    points: &[&[N]],
    ids: &mut [u32],
    leaf_size: usize,
    dim: usize,
) {
    build_subtree(arena, slot, points, ids, leaf_size, dim, 0);
}

fn placeholder<N: IndexableNum>(dim: usize) -> Node<N> {
    Node::Leaf(LeafNode {
        ids: Vec::new(),
        reorder_base: 0,
        reorder_len: 0,
        bounds: BoundingBox::zeroed(dim),
    })
}

/// The tight bounding box of the listed points.
pub(crate) fn bounding_box<N: IndexableNum>(
    points: &[&[N]],
    ids: &[u32],
    dim: usize,
) -> BoundingBox<N> {
    match ids.split_first() {
        None => BoundingBox::zeroed(dim),
        Some((&first, rest)) => {
            let mut bounds = BoundingBox::from_point(points[first as usize]);
            for &id in rest {
                bounds.extend(points[id as usize]);
            }
            bounds
        }
    }
}

fn build_subtree<N: IndexableNum>(
    arena: &mut NodeArena<N>,
    slot: u32,
    points: &[&[N]],
    ids: &mut [u32],
    leaf_size: usize,
    dim: usize,
    depth: usize,
) {
    let bounds = bounding_box(points, ids, dim);

    if ids.len() <= leaf_size || depth >= MAX_TREE_DEPTH {
        *arena.get_mut(slot) = leaf(ids, bounds);
        return;
    }

    let (cut_dim, extent) = bounds.widest_dim();
    if extent <= N::zero() {
        // all points identical; further splitting is impossible
        *arena.get_mut(slot) = leaf(ids, bounds);
        return;
    }

    // sliding midpoint: start at the middle of the widest axis
    let two = N::one() + N::one();
    let mut cut_val = bounds.min[cut_dim] + extent / two;
    let mut left_count = partition_ids(points, ids, cut_dim, cut_val);

    if left_count == 0 || left_count == ids.len() {
        // degenerate midpoint; slide to the positional median so both
        // children are non-empty
        let m = ids.len() / 2;
        ids.select_nth_unstable_by(m, |&a, &b| {
            points[a as usize][cut_dim]
                .partial_cmp(&points[b as usize][cut_dim])
                .unwrap()
        });
        cut_val = points[ids[m] as usize][cut_dim];
        left_count = m;
    }

    let left = arena.push(placeholder(dim));
    let right = arena.push(placeholder(dim));

    let (left_ids, right_ids) = ids.split_at_mut(left_count);
    build_subtree(arena, left, points, left_ids, leaf_size, dim, depth + 1);
    build_subtree(arena, right, points, right_ids, leaf_size, dim, depth + 1);

    *arena.get_mut(slot) = Node::Split(SplitNode {
        cut_dim: cut_dim as u32,
        cut_val,
        left,
        right,
        bounds,
    });
}

fn leaf<N: IndexableNum>(ids: &[u32], bounds: BoundingBox<N>) -> Node<N> {
    Node::Leaf(LeafNode {
        ids: ids.to_vec(),
        reorder_base: 0,
        reorder_len: 0,
        bounds,
    })
}

/// Two-pointer in-place partition: identifiers whose `cut_dim` coordinate is
/// `< cut_val` end up in the prefix. Returns the prefix length.
fn partition_ids<N: IndexableNum>(
    points: &[&[N]],
    ids: &mut [u32],
    cut_dim: usize,
    cut_val: N,
) -> usize {
    let mut left = 0;
    let mut right = ids.len();
    while left < right {
        if points[ids[left] as usize][cut_dim] < cut_val {
            left += 1;
        } else {
            right -= 1;
            ids.swap(left, right);
        }
    }
    left
}

#[cfg(test)]
mod test {
    use super::*;

    fn rows(coords: &[Vec<f64>]) -> Vec<&[f64]> {
        coords.iter().map(|r| r.as_slice()).collect()
    }

    #[test]
    fn partition_splits_around_value() {
        let coords: Vec<Vec<f64>> = vec![
            vec![5.0],
            vec![1.0],
            vec![9.0],
            vec![3.0],
            vec![7.0],
        ];
        let points = rows(&coords);
        let mut ids: Vec<u32> = (0..5).collect();
        let count = partition_ids(&points, &mut ids, 0, 5.0);
        assert_eq!(count, 2);
        for &id in &ids[..count] {
            assert!(points[id as usize][0] < 5.0);
        }
        for &id in &ids[count..] {
            assert!(points[id as usize][0] >= 5.0);
        }
    }

    #[test]
    fn builds_leaf_when_small() {
        let coords: Vec<Vec<f64>> = vec![vec![0.0, 0.0], vec![1.0, 2.0]];
        let points = rows(&coords);
        let mut ids: Vec<u32> = vec![0, 1];
        let mut arena = NodeArena::new();
        let root = build_tree(&mut arena, &points, &mut ids, 4, 2);
        assert_eq!(arena.len(), 1);
        match arena.get(root) {
            Node::Leaf(leaf) => {
                assert_eq!(leaf.ids.len(), 2);
                assert_eq!(leaf.bounds.max, vec![1.0, 2.0]);
            }
            Node::Split(_) => panic!("expected a leaf root"),
        }
    }

    #[test]
    fn splits_on_widest_axis() {
        // x spans 100, y spans 1; the root split must cut on x
        let coords: Vec<Vec<f64>> = (0..10)
            .map(|i| vec![i as f64 * 10.0, i as f64 * 0.1])
            .collect();
        let points = rows(&coords);
        let mut ids: Vec<u32> = (0..10).collect();
        let mut arena = NodeArena::new();
        let root = build_tree(&mut arena, &points, &mut ids, 2, 2);
        match arena.get(root) {
            Node::Split(split) => assert_eq!(split.cut_dim, 0),
            Node::Leaf(_) => panic!("expected a split root"),
        }
    }

    #[test]
    fn identical_points_become_one_leaf() {
        let coords: Vec<Vec<f64>> = (0..20).map(|_| vec![3.0, 3.0]).collect();
        let points = rows(&coords);
        let mut ids: Vec<u32> = (0..20).collect();
        let mut arena = NodeArena::new();
        let root = build_tree(&mut arena, &points, &mut ids, 4, 2);
        match arena.get(root) {
            Node::Leaf(leaf) => assert_eq!(leaf.ids.len(), 20),
            Node::Split(_) => panic!("identical points must not recurse"),
        }
    }

    #[test]
    fn duplicate_heavy_input_terminates_with_covering_leaves() {
        // half the points identical, half spread out
        let mut coords: Vec<Vec<f64>> = (0..16).map(|_| vec![1.0]).collect();
        coords.extend((0..16).map(|i| vec![i as f64]));
        let points = rows(&coords);
        let mut ids: Vec<u32> = (0..32).collect();
        let mut arena = NodeArena::new();
        let root = build_tree(&mut arena, &points, &mut ids, 4, 1);

        // every id appears in exactly one leaf
        let mut seen = vec![0u32; 32];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            match arena.get(id) {
                Node::Leaf(leaf) => {
                    for &pid in &leaf.ids {
                        seen[pid as usize] += 1;
                    }
                }
                Node::Split(split) => {
                    stack.push(split.left);
                    stack.push(split.right);
                }
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
    }
}
