//! Packed buffer serialization.
//!
//! Layout, all little-endian, `f64` written as raw IEEE-754 bits:
//!
//! ```text
//! header:    dim u32 | count u64 | nodes u64 | base f64
//!          | min_scale i32 | max_scale i32 | truncate i32 (-1 = none)
//! pre-order, per node:  point (dim × f64) | level i32 | uid u64
//!                     | ext_len u32 | ext bytes
//! post-order, per node: child_count u32
//! ```
//!
//! `count` is the number of points, `nodes` the number of tree vertices;
//! the two differ when the root has been lifted. The pre-order stream
//! carries the payloads, the post-order stream the shape; together they
//! pin down the ordered tree exactly. This is a memory-layout contract
//! for same-architecture round-trips, not a portable interchange format.

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::errors::{Result, SgTreeError};
use crate::node::Node;
use crate::powtable::PowTable;
use crate::tree::SGTree;
use crate::vector::Point;

/// Fixed header size in bytes.
const HEADER_LEN: usize = 4 + 8 + 8 + 8 + 4 + 4 + 4;

/// Per-node payload size excluding point coordinates and property bytes.
const RECORD_FIXED: usize = 4 + 8 + 4;

struct PreRecord {
    point: Point,
    level: i32,
    uid: u64,
    ext: Vec<u8>,
    id: u32,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(SgTreeError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    let mut b = [0u8; 4];
    LittleEndian::write_u32(&mut b, v);
    buf.extend_from_slice(&b);
}

fn put_i32(buf: &mut Vec<u8>, v: i32) {
    let mut b = [0u8; 4];
    LittleEndian::write_i32(&mut b, v);
    buf.extend_from_slice(&b);
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    let mut b = [0u8; 8];
    LittleEndian::write_u64(&mut b, v);
    buf.extend_from_slice(&b);
}

fn put_f64(buf: &mut Vec<u8>, v: f64) {
    let mut b = [0u8; 8];
    LittleEndian::write_f64(&mut b, v);
    buf.extend_from_slice(&b);
}

/// Vertex count and total property-byte count of a subtree.
fn subtree_extent(node: &Arc<Node>) -> (usize, usize) {
    let mut nodes = 1;
    let mut ext = node.ext_prop().len();
    for child in node.children() {
        let (n, e) = subtree_extent(&child);
        nodes += n;
        ext += e;
    }
    (nodes, ext)
}

fn preorder_pack(buf: &mut Vec<u8>, node: &Arc<Node>) {
    for x in node.point().as_slice() {
        put_f64(buf, *x);
    }
    put_i32(buf, node.level());
    put_u64(buf, node.uid());
    let ext = node.ext_prop();
    put_u32(buf, ext.len() as u32);
    buf.extend_from_slice(&ext);
    for child in node.children() {
        preorder_pack(buf, &child);
    }
}

fn postorder_pack(buf: &mut Vec<u8>, node: &Arc<Node>) {
    let children = node.children();
    for child in &children {
        postorder_pack(buf, child);
    }
    put_u32(buf, children.len() as u32);
}

/// Rebuild one subtree from the reversed payload and count streams.
///
/// Reversing both streams turns the problem into "counts in pre-order,
/// payloads in post-order" over the mirrored tree, which a single
/// recursion consumes; un-mirroring is one `reverse` per child list.
fn build_subtree(
    recs: &mut impl Iterator<Item = PreRecord>,
    counts: &mut impl Iterator<Item = usize>,
) -> Result<Arc<Node>> {
    let n_children = counts
        .next()
        .ok_or_else(|| SgTreeError::Corrupt("child-count stream exhausted".into()))?;
    let mut children = Vec::with_capacity(n_children);
    for _ in 0..n_children {
        children.push(build_subtree(recs, counts)?);
    }
    children.reverse();
    let rec = recs
        .next()
        .ok_or_else(|| SgTreeError::Corrupt("payload stream exhausted".into()))?;
    for child in &children {
        if child.level() != rec.level - 1 {
            return Err(SgTreeError::Corrupt(format!(
                "child level {} under parent level {}",
                child.level(),
                rec.level
            )));
        }
    }
    Ok(Node::with_children(
        rec.point, rec.level, rec.uid, rec.id, rec.ext, children,
    ))
}

impl SGTree {
    /// Exact size in bytes of the buffer [`serialize`](Self::serialize)
    /// would produce right now. Requires a traversal pre-pass.
    pub fn msg_size(&self) -> usize {
        let guard = self.root.read();
        let (nodes, ext_total) = match guard.as_ref() {
            Some(root) => subtree_extent(root),
            None => (0, 0),
        };
        HEADER_LEN + nodes * (self.dim() * 8 + RECORD_FIXED) + ext_total + nodes * 4
    }

    /// Serialize the tree into a contiguous buffer.
    ///
    /// Takes the global lock exclusively so concurrent descents cannot
    /// tear the pre-order and post-order streams apart.
    pub fn serialize(&self) -> Vec<u8> {
        let guard = self.root.write();
        let (nodes, ext_total) = match guard.as_ref() {
            Some(root) => subtree_extent(root),
            None => (0, 0),
        };
        let dim = self.dim();
        let total = HEADER_LEN + nodes * (dim * 8 + RECORD_FIXED) + ext_total + nodes * 4;

        let mut buf = Vec::with_capacity(total);
        put_u32(&mut buf, dim as u32);
        put_u64(&mut buf, self.len() as u64);
        put_u64(&mut buf, nodes as u64);
        put_f64(&mut buf, self.base());
        put_i32(&mut buf, self.min_scale());
        put_i32(&mut buf, self.max_scale());
        put_i32(&mut buf, self.truncate_level().unwrap_or(-1));
        if let Some(root) = guard.as_ref() {
            preorder_pack(&mut buf, root);
            postorder_pack(&mut buf, root);
        }
        buf
    }

    /// Reconstruct a tree from a [`serialize`](Self::serialize) buffer.
    ///
    /// Internal IDs are renumbered in pre-order and descendant bounds are
    /// re-tightened; the result answers every query identically to the
    /// original tree.
    pub fn deserialize(buff: &[u8]) -> Result<SGTree> {
        let mut cur = Cursor::new(buff);
        let dim = cur.u32()? as usize;
        let count = cur.u64()? as usize;
        let nodes = cur.u64()? as usize;
        let base = cur.f64()?;
        let min_scale = cur.i32()?;
        let max_scale = cur.i32()?;
        let truncate_raw = cur.i32()?;

        if !(base > 1.0) || !base.is_finite() {
            return Err(SgTreeError::Corrupt(format!("invalid base {base}")));
        }
        if count > nodes {
            return Err(SgTreeError::Corrupt(format!(
                "point count {count} exceeds node count {nodes}"
            )));
        }
        // Cheap plausibility bound before any allocation.
        let min_needed = nodes
            .saturating_mul(dim.saturating_mul(8) + RECORD_FIXED)
            .saturating_add(nodes.saturating_mul(4));
        if min_needed > cur.remaining() {
            return Err(SgTreeError::Truncated {
                needed: min_needed,
                available: cur.remaining(),
            });
        }

        let mut records = Vec::with_capacity(nodes);
        for id in 0..nodes {
            let coords = cur.take(dim * 8)?;
            let mut data = Vec::with_capacity(dim);
            for i in 0..dim {
                data.push(LittleEndian::read_f64(&coords[i * 8..]));
            }
            let level = cur.i32()?;
            if level <= -crate::powtable::POW_BIAS || level >= crate::powtable::POW_BIAS {
                return Err(SgTreeError::Corrupt(format!(
                    "level {level} outside the representable scale range"
                )));
            }
            let uid = cur.u64()?;
            let ext_len = cur.u32()? as usize;
            let ext = cur.take(ext_len)?.to_vec();
            records.push(PreRecord {
                point: Point::new(data),
                level,
                uid,
                ext,
                id: id as u32,
            });
        }
        let mut counts = Vec::with_capacity(nodes);
        for _ in 0..nodes {
            counts.push(cur.u32()? as usize);
        }
        if cur.remaining() != 0 {
            return Err(SgTreeError::Corrupt(format!(
                "{} trailing bytes",
                cur.remaining()
            )));
        }

        let root = if nodes == 0 {
            None
        } else {
            let mut recs = records.into_iter().rev();
            let mut cnts = counts.into_iter().rev();
            let root = build_subtree(&mut recs, &mut cnts)?;
            if recs.next().is_some() || cnts.next().is_some() {
                return Err(SgTreeError::Corrupt(
                    "streams describe more than one tree".into(),
                ));
            }
            Some(root)
        };

        let tree = SGTree::from_parts(
            PowTable::new(base),
            (truncate_raw >= 0).then_some(truncate_raw),
            RwLock::new(root),
            min_scale,
            max_scale,
            count,
            dim,
            nodes as u32,
        );
        tree.calc_maxdist();
        Ok(tree)
    }
}
