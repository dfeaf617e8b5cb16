//! Tree vertex: a point pinned to a level, plus its mutable state.
//!
//! A node's point, level and UID never change after creation. Everything
//! mutable (children, the cached descendant bound, the internal ID and the
//! caller-attached property bytes) lives behind a per-node reader/writer
//! lock so that many descents can pass through a node while a single
//! writer attaches a child to it.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::vector::Point;

/// Mutable per-node state, guarded by [`Node::state`].
pub(crate) struct NodeState {
    /// Owned children; every child sits exactly one level below the node.
    pub children: Vec<Arc<Node>>,
    /// Conservative upper bound on the distance from this node's point to
    /// any descendant's point. Fresh nodes start at 0 (no descendants);
    /// `calc_maxdist` tightens the bound tree-wide after a batch.
    pub maxdist_ub: f64,
    /// Internal sequence number, assigned at insertion and renumbered on
    /// deserialization. Not stable; use the UID externally.
    pub id: u32,
    /// Opaque property bytes attached by the caller.
    pub ext_prop: Vec<u8>,
}

impl NodeState {
    /// Append a fresh child one level below `parent_level` while the
    /// state lock is already held. Single attach point for both
    /// [`Node::add_child`] and the insertion engine, which re-verifies
    /// and attaches under one write hold.
    pub(crate) fn attach(
        &mut self,
        parent_level: i32,
        point: Point,
        uid: u64,
        id: u32,
        ext_prop: Vec<u8>,
    ) -> Arc<Node> {
        let child = Node::with_children(point, parent_level - 1, uid, id, ext_prop, Vec::new());
        self.children.push(child.clone());
        child
    }
}

/// A single vertex of the cover tree.
pub struct Node {
    point: Point,
    level: i32,
    uid: u64,
    pub(crate) state: RwLock<NodeState>,
}

impl Node {
    pub(crate) fn new(point: Point, level: i32, uid: u64, id: u32) -> Arc<Self> {
        Self::with_children(point, level, uid, id, Vec::new(), Vec::new())
    }

    pub(crate) fn with_children(
        point: Point,
        level: i32,
        uid: u64,
        id: u32,
        ext_prop: Vec<u8>,
        children: Vec<Arc<Node>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            point,
            level,
            uid,
            state: RwLock::new(NodeState {
                children,
                maxdist_ub: 0.0,
                id,
                ext_prop,
            }),
        })
    }

    /// The point stored at this node.
    pub fn point(&self) -> &Point {
        &self.point
    }

    /// The node's level. Children sit at `level - 1`.
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Externally supplied unique identifier, immutable after insertion.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Internal mutable identifier. Diagnostic only.
    pub fn id(&self) -> u32 {
        self.state.read().id
    }

    /// Cached upper bound on the distance to any descendant.
    pub fn maxdist_ub(&self) -> f64 {
        self.state.read().maxdist_ub
    }

    /// Opaque caller-attached bytes.
    pub fn ext_prop(&self) -> Vec<u8> {
        self.state.read().ext_prop.clone()
    }

    /// Replace the caller-attached bytes.
    pub fn set_ext_prop(&self, bytes: Vec<u8>) {
        self.state.write().ext_prop = bytes;
    }

    /// L2 distance from this node's point to `p`.
    pub fn dist_to_point(&self, p: &Point) -> f64 {
        self.point.dist(p)
    }

    /// L2 distance from this node's point to another node's point.
    pub fn dist_to_node(&self, other: &Node) -> f64 {
        self.point.dist(&other.point)
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.state.read().children.len()
    }

    /// Snapshot of the current children.
    pub fn children(&self) -> Vec<Arc<Node>> {
        self.state.read().children.clone()
    }

    /// Snapshot of the descendant bound and the children in one lock hold.
    pub(crate) fn snapshot(&self) -> (f64, Vec<Arc<Node>>) {
        let state = self.state.read();
        (state.maxdist_ub, state.children.clone())
    }

    /// Append a new child holding `point` one level below this node and
    /// return it.
    ///
    /// Low-level primitive: it takes this node's write lock and attaches
    /// unconditionally, so keeping the covering and separation invariants
    /// is the caller's responsibility.
    pub fn add_child(&self, point: Point, uid: u64, id: u32) -> Arc<Node> {
        self.state
            .write()
            .attach(self.level, point, uid, id, Vec::new())
    }

    /// Swap-remove the child at `pos`.
    ///
    /// Unused by the insert-only flow; kept for contract completeness.
    pub fn swap_remove_child(&self, pos: usize) -> Arc<Node> {
        self.state.write().children.swap_remove(pos)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        let coords = self.point.as_slice();
        if coords.len() < 6 {
            let joined: Vec<String> = coords.iter().map(|x| format!("{x}")).collect();
            write!(
                f,
                "([{}]:{}:{}:{})",
                joined.join(", "),
                self.level,
                state.maxdist_ub,
                state.id
            )
        } else {
            let head: Vec<String> = coords[..3].iter().map(|x| format!("{x}")).collect();
            let tail: Vec<String> = coords[coords.len() - 3..].iter().map(|x| format!("{x}")).collect();
            write!(
                f,
                "([{}, ..., {}]:{}:{}:{})",
                head.join(", "),
                tail.join(", "),
                self.level,
                state.maxdist_ub,
                state.id
            )
        }
    }
}
