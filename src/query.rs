//! Branch-and-bound proximity queries.
//!
//! Every query shares one frame: a priority frontier over `(node, bound)`
//! pairs, where the bound is what the node's subtree could still
//! contribute: `max(0, dist - maxdist_ub)` from below for the nearest
//! family, `dist + maxdist_ub` from above for the furthest search. A
//! popped node whose bound cannot beat the current result set terminates
//! the walk; otherwise its children are scored and pushed.
//!
//! Queries hold the tree's global read lock for their duration and take
//! per-node read locks only long enough to snapshot children, so they
//! never block each other and never block descents that don't lift the
//! root.
//!
//! A lifted root shares its UID with the copy below it; result sets
//! deduplicate on UID so a point is reported once no matter how many
//! levels it spans.

use ordered_float::OrderedFloat;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use crate::node::Node;
use crate::tree::SGTree;
use crate::vector::Point;

/// Frontier entry ordered by the subtree bound.
struct Candidate {
    bound: OrderedFloat<f64>,
    child_idx: usize,
    node: Arc<Node>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.bound == other.bound
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bound.cmp(&other.bound)
    }
}

/// Result-heap entry for the k-nearest family. Max-heap on `(dist, seq)`
/// so eviction under ties drops the latest arrival and the sorted output
/// is stable.
struct KnnEntry {
    dist: OrderedFloat<f64>,
    seq: usize,
    node: Arc<Node>,
}

impl PartialEq for KnnEntry {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.seq == other.seq
    }
}

impl Eq for KnnEntry {}

impl PartialOrd for KnnEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KnnEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.cmp(&other.dist).then(self.seq.cmp(&other.seq))
    }
}

fn lower_bound(dist: f64, maxdist_ub: f64) -> f64 {
    (dist - maxdist_ub).max(0.0)
}

impl SGTree {
    /// Exact nearest neighbour of `p`, with its distance.
    ///
    /// Returns `None` on an empty tree or a dimension mismatch.
    /// Tie-break: the first node encountered wins.
    pub fn nearest(&self, p: &Point) -> Option<(Arc<Node>, f64)> {
        self.nearest_impl(p, None)
    }

    /// [`nearest`](Self::nearest), additionally recording the
    /// `(level, child index)` of every expanded node. Diagnostic.
    pub fn nearest_with_trace(
        &self,
        p: &Point,
        trace: &mut Vec<(i32, usize)>,
    ) -> Option<(Arc<Node>, f64)> {
        self.nearest_impl(p, Some(trace))
    }

    fn nearest_impl(
        &self,
        p: &Point,
        mut trace: Option<&mut Vec<(i32, usize)>>,
    ) -> Option<(Arc<Node>, f64)> {
        let guard = self.root.read();
        let root = guard.as_ref()?.clone();
        if p.dim() != self.dim() {
            return None;
        }

        let d0 = root.dist_to_point(p);
        let mut best = (root.clone(), d0);
        let mut frontier = BinaryHeap::new();
        frontier.push(Reverse(Candidate {
            bound: OrderedFloat(lower_bound(d0, root.maxdist_ub())),
            child_idx: 0,
            node: root,
        }));

        while let Some(Reverse(cand)) = frontier.pop() {
            if cand.bound.into_inner() >= best.1 {
                break; // nothing left can improve on the best
            }
            if let Some(t) = trace.as_mut() {
                t.push((cand.node.level(), cand.child_idx));
            }
            for (idx, child) in cand.node.children().iter().enumerate() {
                let d = child.dist_to_point(p);
                if d < best.1 {
                    best = (child.clone(), d);
                }
                let lb = lower_bound(d, child.maxdist_ub());
                if lb < best.1 {
                    frontier.push(Reverse(Candidate {
                        bound: OrderedFloat(lb),
                        child_idx: idx,
                        node: child.clone(),
                    }));
                }
            }
        }
        Some(best)
    }

    /// The `k` nearest neighbours of `p`, sorted ascending by distance.
    pub fn knn(&self, p: &Point, k: usize) -> Vec<(Arc<Node>, f64)> {
        let guard = self.root.read();
        let root = match guard.as_ref() {
            Some(root) => root.clone(),
            None => return Vec::new(),
        };
        if k == 0 || p.dim() != self.dim() {
            return Vec::new();
        }

        let mut results: BinaryHeap<KnnEntry> = BinaryHeap::new();
        let mut seen: HashSet<u64> = HashSet::new();
        let mut seq = 0usize;

        let d0 = root.dist_to_point(p);
        seen.insert(root.uid());
        results.push(KnnEntry {
            dist: OrderedFloat(d0),
            seq: bump(&mut seq),
            node: root.clone(),
        });

        let mut frontier = BinaryHeap::new();
        frontier.push(Reverse(Candidate {
            bound: OrderedFloat(lower_bound(d0, root.maxdist_ub())),
            child_idx: 0,
            node: root,
        }));

        while let Some(Reverse(cand)) = frontier.pop() {
            let threshold = knn_threshold(&results, k);
            if cand.bound.into_inner() >= threshold {
                break;
            }
            for child in cand.node.children() {
                let d = child.dist_to_point(p);
                if seen.insert(child.uid()) {
                    offer(&mut results, k, &mut seq, d, &child);
                }
                let lb = lower_bound(d, child.maxdist_ub());
                if lb < knn_threshold(&results, k) {
                    frontier.push(Reverse(Candidate {
                        bound: OrderedFloat(lb),
                        child_idx: 0,
                        node: child,
                    }));
                }
            }
        }

        results
            .into_sorted_vec()
            .into_iter()
            .map(|e| (e.node, e.dist.into_inner()))
            .collect()
    }

    /// Approximate k-nearest neighbours: at every level only the
    /// `beam_size` most promising subtrees stay on the frontier, so the
    /// walk is cheap but may miss true neighbours.
    pub fn knn_beam(&self, p: &Point, k: usize, beam_size: usize) -> Vec<(Arc<Node>, f64)> {
        let guard = self.root.read();
        let root = match guard.as_ref() {
            Some(root) => root.clone(),
            None => return Vec::new(),
        };
        if k == 0 || p.dim() != self.dim() {
            return Vec::new();
        }

        let mut results: BinaryHeap<KnnEntry> = BinaryHeap::new();
        let mut seen: HashSet<u64> = HashSet::new();
        let mut seq = 0usize;

        let d0 = root.dist_to_point(p);
        seen.insert(root.uid());
        results.push(KnnEntry {
            dist: OrderedFloat(d0),
            seq: bump(&mut seq),
            node: root.clone(),
        });

        let mut layer = vec![Candidate {
            bound: OrderedFloat(lower_bound(d0, root.maxdist_ub())),
            child_idx: 0,
            node: root,
        }];

        while !layer.is_empty() {
            let mut next = Vec::new();
            for cand in &layer {
                if cand.bound.into_inner() >= knn_threshold(&results, k) {
                    continue;
                }
                for child in cand.node.children() {
                    let d = child.dist_to_point(p);
                    if seen.insert(child.uid()) {
                        offer(&mut results, k, &mut seq, d, &child);
                    }
                    let lb = lower_bound(d, child.maxdist_ub());
                    if lb < knn_threshold(&results, k) {
                        next.push(Candidate {
                            bound: OrderedFloat(lb),
                            child_idx: 0,
                            node: child,
                        });
                    }
                }
            }
            next.sort_by(|a, b| a.bound.cmp(&b.bound));
            next.truncate(beam_size);
            layer = next;
        }

        results
            .into_sorted_vec()
            .into_iter()
            .map(|e| (e.node, e.dist.into_inner()))
            .collect()
    }

    /// All points within `radius` of `p`, with their distances.
    /// Result order is unspecified.
    pub fn range(&self, p: &Point, radius: f64) -> Vec<(Arc<Node>, f64)> {
        let guard = self.root.read();
        let root = match guard.as_ref() {
            Some(root) => root.clone(),
            None => return Vec::new(),
        };
        if p.dim() != self.dim() {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut seen: HashSet<u64> = HashSet::new();

        let d0 = root.dist_to_point(p);
        if d0 <= radius {
            seen.insert(root.uid());
            out.push((root.clone(), d0));
        }

        let mut frontier = BinaryHeap::new();
        let lb0 = lower_bound(d0, root.maxdist_ub());
        if lb0 <= radius {
            frontier.push(Reverse(Candidate {
                bound: OrderedFloat(lb0),
                child_idx: 0,
                node: root,
            }));
        }

        while let Some(Reverse(cand)) = frontier.pop() {
            if cand.bound.into_inner() > radius {
                break;
            }
            for child in cand.node.children() {
                let d = child.dist_to_point(p);
                if d <= radius && seen.insert(child.uid()) {
                    out.push((child.clone(), d));
                }
                let lb = lower_bound(d, child.maxdist_ub());
                if lb <= radius {
                    frontier.push(Reverse(Candidate {
                        bound: OrderedFloat(lb),
                        child_idx: 0,
                        node: child,
                    }));
                }
            }
        }
        out
    }

    /// The point furthest from `p`, with its distance.
    ///
    /// Branch-and-bound from above: subtrees are expanded by largest
    /// `dist + maxdist_ub` and the walk stops when no remaining upper
    /// bound exceeds the best distance seen.
    pub fn furthest(&self, p: &Point) -> Option<(Arc<Node>, f64)> {
        let guard = self.root.read();
        let root = guard.as_ref()?.clone();
        if p.dim() != self.dim() {
            return None;
        }

        let d0 = root.dist_to_point(p);
        let mut best = (root.clone(), d0);
        let mut frontier = BinaryHeap::new();
        frontier.push(Candidate {
            bound: OrderedFloat(d0 + root.maxdist_ub()),
            child_idx: 0,
            node: root,
        });

        while let Some(cand) = frontier.pop() {
            if cand.bound.into_inner() <= best.1 {
                break; // no subtree can reach further
            }
            for child in cand.node.children() {
                let d = child.dist_to_point(p);
                if d > best.1 {
                    best = (child.clone(), d);
                }
                let ub = d + child.maxdist_ub();
                if ub > best.1 {
                    frontier.push(Candidate {
                        bound: OrderedFloat(ub),
                        child_idx: 0,
                        node: child,
                    });
                }
            }
        }
        Some(best)
    }
}

fn bump(seq: &mut usize) -> usize {
    let s = *seq;
    *seq += 1;
    s
}

/// Offer a candidate to the size-`k` result heap, evicting the current
/// worst entry when the newcomer beats it.
fn offer(
    results: &mut BinaryHeap<KnnEntry>,
    k: usize,
    seq: &mut usize,
    dist: f64,
    node: &Arc<Node>,
) {
    if results.len() < k {
        results.push(KnnEntry {
            dist: OrderedFloat(dist),
            seq: bump(seq),
            node: node.clone(),
        });
        return;
    }
    let worst = results
        .peek()
        .map_or(f64::INFINITY, |w| w.dist.into_inner());
    if dist < worst {
        results.pop();
        results.push(KnnEntry {
            dist: OrderedFloat(dist),
            seq: bump(seq),
            node: node.clone(),
        });
    }
}

fn knn_threshold(results: &BinaryHeap<KnnEntry>, k: usize) -> f64 {
    if results.len() < k {
        f64::INFINITY
    } else {
        results
            .peek()
            .map_or(f64::INFINITY, |worst| worst.dist.into_inner())
    }
}
