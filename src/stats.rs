//! Tree diagnostics: level populations, fanout and inter-level distance
//! summaries, and a dump-to-file report.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::errors::Result;
use crate::node::Node;
use crate::tree::SGTree;

/// Per-level aggregates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LevelStats {
    /// Nodes sitting at this level.
    pub nodes: usize,
    /// Total children hanging off this level's nodes.
    pub fanout_total: usize,
    /// Largest fanout at this level.
    pub fanout_max: usize,
    /// Sum of parent-to-child distances out of this level.
    pub child_dist_sum: f64,
    /// Largest parent-to-child distance out of this level.
    pub child_dist_max: f64,
}

impl LevelStats {
    /// Mean fanout of this level's nodes.
    pub fn fanout_avg(&self) -> f64 {
        if self.nodes == 0 {
            0.0
        } else {
            self.fanout_total as f64 / self.nodes as f64
        }
    }

    /// Mean parent-to-child distance out of this level.
    pub fn child_dist_avg(&self) -> f64 {
        if self.fanout_total == 0 {
            0.0
        } else {
            self.child_dist_sum / self.fanout_total as f64
        }
    }
}

/// Whole-tree diagnostics snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TreeStats {
    /// Number of points (lifted root copies not counted).
    pub points: usize,
    /// Number of tree vertices, lifted copies included.
    pub nodes: usize,
    pub min_scale: i32,
    pub max_scale: i32,
    /// Aggregates keyed by level.
    pub levels: BTreeMap<i32, LevelStats>,
    /// Fanout histogram: child count -> number of nodes with that count.
    pub degrees: BTreeMap<usize, usize>,
}

fn collect(node: &Arc<Node>, stats: &mut TreeStats) {
    stats.nodes += 1;
    let children = node.children();
    let entry = stats.levels.entry(node.level()).or_default();
    entry.nodes += 1;
    entry.fanout_total += children.len();
    entry.fanout_max = entry.fanout_max.max(children.len());
    for child in &children {
        let d = node.dist_to_node(child);
        entry.child_dist_sum += d;
        entry.child_dist_max = entry.child_dist_max.max(d);
    }
    *stats.degrees.entry(children.len()).or_default() += 1;
    for child in &children {
        collect(child, stats);
    }
}

impl SGTree {
    /// Collect a diagnostics snapshot of the current tree.
    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            points: self.len(),
            min_scale: self.min_scale(),
            max_scale: self.max_scale(),
            ..Default::default()
        };
        if let Some(root) = self.get_root() {
            collect(&root, &mut stats);
        }
        stats
    }

    /// Print a one-screen summary of the tree shape.
    pub fn print_stats(&self) {
        let stats = self.stats();
        println!(
            "points: {}  nodes: {}  dim: {}  base: {}",
            stats.points,
            stats.nodes,
            self.dim(),
            self.base()
        );
        println!(
            "scales: [{}, {}]  levels: {}",
            stats.min_scale,
            stats.max_scale,
            stats.levels.len()
        );
    }

    /// Print node counts per level, top level first.
    pub fn print_levels(&self) {
        for (level, ls) in self.stats().levels.iter().rev() {
            println!("level {level:>5}: {} nodes", ls.nodes);
        }
    }

    /// Print the fanout histogram.
    pub fn print_degrees(&self) {
        for (degree, count) in self.stats().degrees.iter() {
            println!("fanout {degree:>4}: {count} nodes");
        }
    }

    /// Write per-level fanout and inter-level distance summaries to a
    /// file.
    pub fn dump_tree<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let stats = self.stats();
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "points {}  nodes {}  dim {}  base {}", stats.points, stats.nodes, self.dim(), self.base())?;
        writeln!(w, "level nodes fanout_avg fanout_max dist_avg dist_max")?;
        for (level, ls) in stats.levels.iter().rev() {
            writeln!(
                w,
                "{level} {} {:.4} {} {:.4} {:.4}",
                ls.nodes,
                ls.fanout_avg(),
                ls.fanout_max,
                ls.child_dist_avg(),
                ls.child_dist_max
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::SgTreeConfig;
    use crate::vector::Point;

    fn fixture() -> SGTree {
        let tree = SGTree::new(SgTreeConfig {
            base: 2.0,
            ..Default::default()
        });
        for (i, xy) in [[0.0, 0.0], [3.0, 0.0], [0.0, 4.0], [6.0, 0.0]]
            .iter()
            .enumerate()
        {
            assert!(tree.insert(Point::new(xy.to_vec()), i as u64));
        }
        tree
    }

    #[test]
    fn test_stats_counts() {
        let tree = fixture();
        let stats = tree.stats();
        assert_eq!(stats.points, 4);
        // Two root lifts leave two extra copies of point 0.
        assert_eq!(stats.nodes, 6);
        assert_eq!(stats.max_scale, 2);
        assert_eq!(stats.levels[&2].nodes, 1);
        assert_eq!(stats.levels[&1].nodes, 2);
        assert_eq!(stats.levels[&0].nodes, 3);
        let total_children: usize = stats.levels.values().map(|l| l.fanout_total).sum();
        assert_eq!(total_children, stats.nodes - 1);
    }

    #[test]
    fn test_stats_empty() {
        let tree = SGTree::default();
        let stats = tree.stats();
        assert_eq!(stats.points, 0);
        assert_eq!(stats.nodes, 0);
        assert!(stats.levels.is_empty());
    }

    #[test]
    fn test_dump_tree() {
        let tree = fixture();
        let path = std::env::temp_dir().join("sg_tree_dump_test.txt");
        tree.dump_tree(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("points 4"));
        assert!(text.lines().count() >= 2 + tree.stats().levels.len());
        std::fs::remove_file(&path).ok();
    }
}
