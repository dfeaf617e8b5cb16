//! The concurrent scapegoat-style cover tree.
//!
//! ## Structure
//!
//! Points live in a leveled hierarchy. A node at level `L` keeps all of its
//! children within `base^(L+1)` of itself (covering) and any two of its
//! children further than `base^L` apart (separation). Those two facts are
//! what let every query prune whole subtrees with a triangle-inequality
//! bound.
//!
//! ## Insertion
//!
//! 1. An empty tree seeds its root at level 0 under the global write lock.
//! 2. A point outside the root's covering radius lifts the root: a copy of
//!    the root's point is installed one level up and adopts the old root
//!    as its only child, repeated until the point is covered.
//! 3. The descent walks down per-node read locks, following the first
//!    child whose covering radius contains the point, and attaches a new
//!    child under a single node's write lock once no child qualifies.
//!
//! Concurrent inserts contend only on the global lock (root changes) and
//! on the write lock of the one node being extended. Queries share the
//! global read lock and are never blocked by descents.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::errors::{Result, SgTreeError};
use crate::node::Node;
use crate::powtable::PowTable;
use crate::vector::Point;

/// Default expansion base, matching the classic cover-tree trade-off
/// between depth and fanout.
pub const DEFAULT_BASE: f64 = 1.3;

/// Construction-time options for [`SGTree`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SgTreeConfig {
    /// Expansion base for level scales. Must be > 1.
    pub base: f64,
    /// Relative level floor. `Some(t)` forbids nodes more than `t` levels
    /// below the highest materialized level; inserts that would need one
    /// are refused. `None` disables truncation.
    pub truncate_level: Option<i32>,
    /// Worker threads for the bulk build. `None` uses the global rayon
    /// pool.
    pub cores: Option<usize>,
}

impl Default for SgTreeConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            truncate_level: None,
            cores: None,
        }
    }
}

/// A cover tree over [`Point`]s supporting concurrent insertion and
/// branch-and-bound proximity queries.
pub struct SGTree {
    pub(crate) pows: PowTable,
    truncate_level: Option<i32>,
    /// Root handle. The lock is the tree's global lock: writers change the
    /// root's identity (seeding, lifting); readers are everything else.
    pub(crate) root: RwLock<Option<Arc<Node>>>,
    /// Most negative level currently materialized. Monotonically
    /// non-increasing; a conservative hint, not authoritative.
    min_scale: AtomicI32,
    /// Most positive level currently materialized. Monotonically
    /// non-decreasing.
    max_scale: AtomicI32,
    /// Number of points inserted. Lifted root copies do not count.
    count: AtomicUsize,
    /// Point dimension; 0 until the first point arrives.
    dim: AtomicUsize,
    next_id: AtomicU32,
}

impl Default for SGTree {
    fn default() -> Self {
        Self::new(SgTreeConfig::default())
    }
}

impl SGTree {
    /// Create an empty tree. The first insert seeds the root at level 0.
    pub fn new(config: SgTreeConfig) -> Self {
        Self {
            pows: PowTable::new(config.base),
            // A negative floor can never be reached; treat it as disabled.
            truncate_level: config.truncate_level.filter(|t| *t >= 0),
            root: RwLock::new(None),
            min_scale: AtomicI32::new(0),
            max_scale: AtomicI32::new(0),
            count: AtomicUsize::new(0),
            dim: AtomicUsize::new(0),
            next_id: AtomicU32::new(0),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        pows: PowTable,
        truncate_level: Option<i32>,
        root: RwLock<Option<Arc<Node>>>,
        min_scale: i32,
        max_scale: i32,
        count: usize,
        dim: usize,
        next_id: u32,
    ) -> Self {
        Self {
            pows,
            truncate_level,
            root,
            min_scale: AtomicI32::new(min_scale),
            max_scale: AtomicI32::new(max_scale),
            count: AtomicUsize::new(count),
            dim: AtomicUsize::new(dim),
            next_id: AtomicU32::new(next_id),
        }
    }

    /// Create a tree holding a single point as its level-0 root.
    pub fn with_root(point: Point, uid: u64, config: SgTreeConfig) -> Self {
        let tree = Self::new(config);
        tree.dim.store(point.dim(), Ordering::SeqCst);
        *tree.root.write() = Some(Node::new(point, 0, uid, 0));
        tree.next_id.store(1, Ordering::SeqCst);
        tree.count.store(1, Ordering::SeqCst);
        tree
    }

    /// Bulk-build from a row-major matrix: row 0 becomes the root, the
    /// remaining rows are inserted in parallel, then descendant bounds are
    /// tightened once.
    ///
    /// Row `i` gets UID `uids[i]`, or `i as u64` when `uids` is `None`.
    /// Duplicate rows are skipped.
    pub fn from_matrix(
        points: ArrayView2<'_, f64>,
        uids: Option<&[u64]>,
        config: SgTreeConfig,
    ) -> Result<Self> {
        let rows = points.nrows();
        if rows == 0 {
            return Err(SgTreeError::EmptyInput);
        }
        if let Some(u) = uids {
            if u.len() != rows {
                return Err(SgTreeError::UidMismatch {
                    expected: rows,
                    actual: u.len(),
                });
            }
        }

        let cores = config.cores;
        let root_uid = uids.map_or(0, |u| u[0]);
        let tree = Self::with_root(Point::new(points.row(0).to_vec()), root_uid, config);
        tracing::info!(rows, dim = points.ncols(), base = tree.base(), "bulk-building tree");

        let insert_rows = || {
            (1..rows).into_par_iter().for_each(|i| {
                let p = Point::new(points.row(i).to_vec());
                let uid = uids.map_or(i as u64, |u| u[i]);
                if !tree.insert(p, uid) {
                    tracing::debug!(row = i, "row not inserted (duplicate or truncated)");
                }
            });
        };
        match cores {
            Some(n) => rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| SgTreeError::ThreadPool(e.to_string()))?
                .install(insert_rows),
            None => insert_rows(),
        }

        tree.calc_maxdist();
        Ok(tree)
    }

    /// Expansion base.
    pub fn base(&self) -> f64 {
        self.pows.base()
    }

    /// Point dimension, or 0 while the tree is still empty.
    pub fn dim(&self) -> usize {
        self.dim.load(Ordering::SeqCst)
    }

    /// Number of points in the tree.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Whether the tree holds no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lowest materialized level (hint; see [`SGTree`] field docs).
    pub fn min_scale(&self) -> i32 {
        self.min_scale.load(Ordering::SeqCst)
    }

    /// Highest materialized level.
    pub fn max_scale(&self) -> i32 {
        self.max_scale.load(Ordering::SeqCst)
    }

    /// The configured truncation floor, if any.
    pub fn truncate_level(&self) -> Option<i32> {
        self.truncate_level
    }

    /// A handle to the current root, if the tree is non-empty.
    pub fn get_root(&self) -> Option<Arc<Node>> {
        self.root.read().clone()
    }

    /// Insert `point` under the given UID.
    ///
    /// Returns `false` without touching the tree when the point is already
    /// present (distance zero to an existing node), when its dimension
    /// disagrees with the tree's, or when attaching it would require a
    /// level below the truncation floor.
    pub fn insert(&self, point: Point, uid: u64) -> bool {
        self.insert_with_props(point, uid, Vec::new())
    }

    /// [`insert`](Self::insert) with opaque property bytes attached to the
    /// new node.
    pub fn insert_with_props(&self, point: Point, uid: u64, ext_prop: Vec<u8>) -> bool {
        let d = point.dim();
        if d == 0 {
            return false;
        }
        match self.dim.compare_exchange(0, d, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => {}
            Err(existing) if existing == d => {}
            Err(_) => return false,
        }

        loop {
            {
                let root_guard = self.root.read();
                if let Some(root) = root_guard.as_ref() {
                    let d0 = root.dist_to_point(&point);
                    if d0 <= self.pows.covdist(root.level()) {
                        // The global read lock stays held for the whole
                        // descent so the root cannot be lifted under us.
                        return self.insert_at(root.clone(), point, uid, ext_prop, d0);
                    }
                }
            }

            let mut root_guard = self.root.write();
            if root_guard.is_none() {
                *root_guard = Some(Node::with_children(
                    point,
                    0,
                    uid,
                    self.next_id.fetch_add(1, Ordering::SeqCst),
                    ext_prop,
                    Vec::new(),
                ));
                self.min_scale.store(0, Ordering::SeqCst);
                self.max_scale.store(0, Ordering::SeqCst);
                self.count.fetch_add(1, Ordering::SeqCst);
                return true;
            }
            // Re-verify under the write lock; another writer may already
            // have lifted the root far enough.
            while let Some(root) = root_guard.as_ref() {
                if root.dist_to_point(&point) <= self.pows.covdist(root.level()) {
                    break;
                }
                let lifted = Node::with_children(
                    root.point().clone(),
                    root.level() + 1,
                    root.uid(),
                    self.next_id.fetch_add(1, Ordering::SeqCst),
                    root.ext_prop(),
                    vec![root.clone()],
                );
                self.max_scale.fetch_max(lifted.level(), Ordering::SeqCst);
                *root_guard = Some(lifted);
            }
            // Retry the descent under a fresh read lock.
        }
    }

    /// Recursive descent. The caller holds the global read lock; `current`
    /// is read-locked only while its children are scanned.
    fn insert_at(
        &self,
        current: Arc<Node>,
        point: Point,
        uid: u64,
        ext_prop: Vec<u8>,
        curr_dist: f64,
    ) -> bool {
        if curr_dist == 0.0 {
            return false; // duplicate point
        }
        let level = current.level();
        // Covering radius of a child of `current`, i.e. base^level.
        let candidate_radius = self.pows.sepdist(level);

        let mut descend: Option<(Arc<Node>, f64)> = None;
        {
            let state = current.state.read();
            for child in state.children.iter() {
                let d = child.dist_to_point(&point);
                if d == 0.0 {
                    return false;
                }
                if d <= candidate_radius {
                    descend = Some((child.clone(), d));
                    break;
                }
            }
        }
        if let Some((child, d)) = descend {
            return self.insert_at(child, point, uid, ext_prop, d);
        }

        let (child, d) = {
            let mut state = current.state.write();
            let mut appeared: Option<(Arc<Node>, f64)> = None;
            for child in state.children.iter() {
                let d = child.dist_to_point(&point);
                if d == 0.0 {
                    return false;
                }
                if d <= candidate_radius {
                    // A concurrent writer attached a covering child while
                    // we waited for the write lock; resume the descent.
                    appeared = Some((child.clone(), d));
                    break;
                }
            }
            match appeared {
                Some(hit) => hit,
                None => {
                    let new_level = level - 1;
                    if let Some(truncate) = self.truncate_level {
                        if self.max_scale.load(Ordering::SeqCst) - new_level > truncate {
                            return false; // below the truncation floor
                        }
                    }
                    state.attach(
                        level,
                        point,
                        uid,
                        self.next_id.fetch_add(1, Ordering::SeqCst),
                        ext_prop,
                    );
                    self.min_scale.fetch_min(new_level, Ordering::SeqCst);
                    self.count.fetch_add(1, Ordering::SeqCst);
                    return true;
                }
            }
        };
        self.insert_at(child, point, uid, ext_prop, d)
    }

    /// Deletion is not supported; always returns `false`.
    ///
    /// Removing a point cannot preserve the covering and separation
    /// invariants without a rebuild, so the operation is a declared no-op.
    pub fn remove(&self, _point: &Point) -> bool {
        false
    }

    /// Tighten every node's cached descendant bound with a post-order
    /// sweep: `maxdist_ub = max over children c of (dist(n, c) + c.ub)`.
    ///
    /// Insertion leaves fresh nodes at 0 and never touches ancestors, so
    /// this must run after a batch of inserts before queries can rely on
    /// the bounds for pruning.
    pub fn calc_maxdist(&self) {
        let guard = self.root.read();
        if let Some(root) = guard.as_ref() {
            tracing::debug!(points = self.len(), "tightening descendant bounds");
            Self::calc_maxdist_rec(root);
        }
    }

    fn calc_maxdist_rec(node: &Arc<Node>) -> f64 {
        let children = node.children();
        let mut bound: f64 = 0.0;
        for child in &children {
            let child_ub = Self::calc_maxdist_rec(child);
            bound = bound.max(node.dist_to_node(child) + child_ub);
        }
        node.state.write().maxdist_ub = bound;
        bound
    }

    /// Verify the covering, separation and level-consistency invariants on
    /// every reachable node.
    pub fn check_covering(&self) -> bool {
        let guard = self.root.read();
        match guard.as_ref() {
            Some(root) => self.check_covering_rec(root),
            None => true,
        }
    }

    fn check_covering_rec(&self, node: &Arc<Node>) -> bool {
        let children = node.children();
        let level = node.level();
        let covdist = self.pows.covdist(level);
        let sepdist = self.pows.sepdist(level);
        for (i, child) in children.iter().enumerate() {
            if child.level() != level - 1 {
                tracing::warn!(uid = child.uid(), "child level is not parent level - 1");
                return false;
            }
            if node.dist_to_node(child) > covdist {
                tracing::warn!(uid = child.uid(), "child outside covering radius");
                return false;
            }
            for other in &children[i + 1..] {
                if child.dist_to_node(other) <= sepdist {
                    tracing::warn!(
                        uid_a = child.uid(),
                        uid_b = other.uid(),
                        "children violate separation"
                    );
                    return false;
                }
            }
        }
        children.iter().all(|c| self.check_covering_rec(c))
    }

    /// Up to `k` UIDs drawn breadth-first from the top of the tree.
    ///
    /// Nodes near the root are far apart by construction, which makes
    /// these good seeds for downstream clustering.
    pub fn best_initial_points(&self, k: usize) -> Vec<u64> {
        let mut out = Vec::new();
        if k == 0 {
            return out;
        }
        let guard = self.root.read();
        let root = match guard.as_ref() {
            Some(root) => root.clone(),
            None => return out,
        };
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(root);
        while let Some(node) = queue.pop_front() {
            if seen.insert(node.uid()) {
                out.push(node.uid());
                if out.len() == k {
                    break;
                }
            }
            for child in node.children() {
                queue.push_back(child);
            }
        }
        out
    }
}

impl fmt::Display for SGTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get_root() {
            Some(root) => fmt_subtree(&root, 0, f),
            None => writeln!(f, "(empty tree)"),
        }
    }
}

fn fmt_subtree(node: &Arc<Node>, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{:indent$}{node}", "", indent = 2 * depth)?;
    for child in node.children() {
        fmt_subtree(&child, depth + 1, f)?;
    }
    Ok(())
}
