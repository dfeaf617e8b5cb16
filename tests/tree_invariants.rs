//! End-to-end checks of the geometric invariants, the query laws, the
//! serialization round-trip and concurrent insertion.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::sync::Arc;

use sg_tree::{Node, Point, SGTree, SgTreeConfig};

fn base2() -> SgTreeConfig {
    SgTreeConfig {
        base: 2.0,
        ..Default::default()
    }
}

fn random_points(n: usize, dim: usize, seed: u64) -> Vec<Point> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| Point::new((0..dim).map(|_| rng.gen_range(0.0..1.0)).collect()))
        .collect()
}

fn build_random(n: usize, dim: usize, seed: u64) -> (SGTree, Vec<Point>) {
    let points = random_points(n, dim, seed);
    let tree = SGTree::default();
    for (i, p) in points.iter().enumerate() {
        assert!(tree.insert(p.clone(), i as u64));
    }
    tree.calc_maxdist();
    (tree, points)
}

fn all_nodes(tree: &SGTree) -> Vec<Arc<Node>> {
    fn walk(node: &Arc<Node>, out: &mut Vec<Arc<Node>>) {
        out.push(node.clone());
        for child in node.children() {
            walk(&child, out);
        }
    }
    let mut out = Vec::new();
    if let Some(root) = tree.get_root() {
        walk(&root, &mut out);
    }
    out
}

#[test]
fn scenario_small_2d_tree() {
    let tree = SGTree::new(base2());
    for (i, xy) in [[0.0, 0.0], [3.0, 0.0], [0.0, 4.0], [6.0, 0.0]]
        .iter()
        .enumerate()
    {
        assert!(tree.insert(Point::new(xy.to_vec()), i as u64));
    }
    tree.calc_maxdist();
    assert_eq!(tree.len(), 4);

    let (node, d) = tree.nearest(&Point::new(vec![1.0, 0.0])).unwrap();
    assert_eq!((node.uid(), d), (0, 1.0));

    let knn: Vec<(u64, f64)> = tree
        .knn(&Point::new(vec![1.0, 0.0]), 2)
        .iter()
        .map(|(n, d)| (n.uid(), *d))
        .collect();
    assert_eq!(knn, vec![(0, 1.0), (1, 2.0)]);

    let mut range: Vec<(u64, f64)> = tree
        .range(&Point::new(vec![0.0, 0.0]), 5.0)
        .iter()
        .map(|(n, d)| (n.uid(), *d))
        .collect();
    range.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(range, vec![(0, 0.0), (1, 3.0), (2, 4.0)]);

    let (node, d) = tree.furthest(&Point::new(vec![0.0, 0.0])).unwrap();
    assert_eq!((node.uid(), d), (3, 6.0));
}

#[test]
fn covering_separation_and_levels_hold() {
    let (tree, _) = build_random(400, 3, 17);
    assert!(tree.check_covering());

    // Direct re-verification, independent of check_covering.
    let base = tree.base();
    for node in all_nodes(&tree) {
        let children = node.children();
        let covdist = base.powi(node.level() + 1);
        let sepdist = base.powi(node.level());
        for (i, child) in children.iter().enumerate() {
            assert_eq!(child.level(), node.level() - 1);
            assert!(node.dist_to_node(child) <= covdist);
            for other in &children[i + 1..] {
                assert!(child.dist_to_node(other) > sepdist);
            }
        }
    }
}

#[test]
fn maxdist_ub_dominates_descendants() {
    let (tree, _) = build_random(250, 4, 5);
    fn max_descendant_dist(origin: &Arc<Node>, node: &Arc<Node>) -> f64 {
        let mut best: f64 = 0.0;
        for child in node.children() {
            best = best
                .max(origin.dist_to_node(&child))
                .max(max_descendant_dist(origin, &child));
        }
        best
    }
    for node in all_nodes(&tree) {
        assert!(node.maxdist_ub() >= max_descendant_dist(&node, &node));
    }
}

#[test]
fn uid_set_matches_and_count_is_exact() {
    let (tree, points) = build_random(300, 2, 23);
    let mut uids: HashSet<u64> = HashSet::new();
    for node in all_nodes(&tree) {
        uids.insert(node.uid());
    }
    assert_eq!(uids.len(), points.len());
    assert_eq!(tree.len(), points.len());
    let expected: HashSet<u64> = (0..points.len() as u64).collect();
    assert_eq!(uids, expected);
}

#[test]
fn self_nn_over_1000_random_points() {
    let points = random_points(1000, 10, 99);
    let tree = SGTree::default();
    for (i, p) in points.iter().enumerate() {
        assert!(tree.insert(p.clone(), i as u64));
    }
    tree.calc_maxdist();
    for (i, p) in points.iter().enumerate() {
        let (node, d) = tree.nearest(p).unwrap();
        assert_eq!(d, 0.0, "point {i} not its own nearest neighbour");
        assert_eq!(node.uid(), i as u64);
    }
}

#[test]
fn knn_smaller_k_is_prefix_of_larger() {
    let (tree, _) = build_random(300, 5, 31);
    let q = Point::new(vec![0.4, 0.6, 0.1, 0.9, 0.5]);
    let small: Vec<u64> = tree.knn(&q, 5).iter().map(|(n, _)| n.uid()).collect();
    let large: Vec<u64> = tree.knn(&q, 15).iter().map(|(n, _)| n.uid()).collect();
    assert_eq!(small.as_slice(), &large[..5]);
}

#[test]
fn range_contains_knn() {
    let (tree, _) = build_random(300, 5, 31);
    let q = Point::new(vec![0.2, 0.3, 0.8, 0.5, 0.7]);
    let knn = tree.knn(&q, 10);
    let d_k = knn[knn.len() - 1].1;
    let in_range: HashSet<u64> = tree.range(&q, d_k).iter().map(|(n, _)| n.uid()).collect();
    for (node, _) in &knn {
        assert!(in_range.contains(&node.uid()));
    }
}

#[test]
fn beam_is_exact_when_wide_and_bounded_when_narrow() {
    let (tree, _) = build_random(200, 3, 7);
    let q = Point::new(vec![0.5, 0.5, 0.5]);
    let exact: Vec<u64> = tree.knn(&q, 8).iter().map(|(n, _)| n.uid()).collect();
    let wide: Vec<u64> = tree
        .knn_beam(&q, 8, 10_000)
        .iter()
        .map(|(n, _)| n.uid())
        .collect();
    assert_eq!(exact, wide);

    let narrow = tree.knn_beam(&q, 8, 1);
    assert!(narrow.len() <= 8);
    assert!(!narrow.is_empty());
}

#[test]
fn serialization_roundtrip_preserves_queries() {
    let points = random_points(100, 5, 41);
    let tree = SGTree::default();
    for (i, p) in points.iter().enumerate() {
        assert!(tree.insert(p.clone(), i as u64));
    }
    tree.calc_maxdist();

    let buf = tree.serialize();
    assert_eq!(buf.len(), tree.msg_size());
    let back = SGTree::deserialize(&buf).unwrap();
    assert!(back.check_covering());
    assert_eq!(back.len(), tree.len());

    for q in random_points(50, 5, 42) {
        let orig: Vec<(u64, f64)> = tree.knn(&q, 5).iter().map(|(n, d)| (n.uid(), *d)).collect();
        let rest: Vec<(u64, f64)> = back.knn(&q, 5).iter().map(|(n, d)| (n.uid(), *d)).collect();
        assert_eq!(orig, rest);
    }
}

#[test]
fn concurrent_inserts_preserve_invariants() {
    const THREADS: usize = 8;
    const TOTAL: usize = 10_000;

    // Distinct by construction: the first coordinate encodes the index.
    let points: Vec<Point> = (0..TOTAL)
        .map(|i| {
            Point::new(vec![
                i as f64 / TOTAL as f64,
                (i * 31 % 997) as f64 / 997.0,
                (i * 17 % 641) as f64 / 641.0,
            ])
        })
        .collect();

    let tree = SGTree::default();
    std::thread::scope(|scope| {
        for chunk in 0..THREADS {
            let tree = &tree;
            let points = &points;
            scope.spawn(move || {
                for i in (chunk..TOTAL).step_by(THREADS) {
                    assert!(tree.insert(points[i].clone(), i as u64));
                }
            });
        }
    });

    assert_eq!(tree.len(), TOTAL);
    assert!(tree.check_covering());

    let uids: HashSet<u64> = all_nodes(&tree).iter().map(|n| n.uid()).collect();
    let expected: HashSet<u64> = (0..TOTAL as u64).collect();
    assert_eq!(uids, expected);

    tree.calc_maxdist();
    let (_, d) = tree.nearest(&points[1234]).unwrap();
    assert_eq!(d, 0.0);
}

#[test]
fn bulk_matrix_build_with_workers() {
    use ndarray::Array2;
    let n = 500;
    let dim = 6;
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let data =
        Array2::from_shape_vec((n, dim), (0..n * dim).map(|_| rng.gen_range(0.0..1.0)).collect())
            .unwrap();

    let config = SgTreeConfig {
        base: 1.5,
        cores: Some(4),
        ..Default::default()
    };
    let tree = SGTree::from_matrix(data.view(), None, config).unwrap();
    assert_eq!(tree.len(), n);
    assert_eq!(tree.dim(), dim);
    assert!(tree.check_covering());

    // Bounds are tightened by the bulk path; self-NN must already work.
    for i in (0..n).step_by(50) {
        let q = Point::new(data.row(i).to_vec());
        let (node, d) = tree.nearest(&q).unwrap();
        assert_eq!(d, 0.0);
        assert_eq!(node.uid(), i as u64);
    }

    let back = SGTree::deserialize(&tree.serialize()).unwrap();
    assert_eq!(back.base(), 1.5);
}

#[test]
fn truncation_refuses_floor_violations() {
    let config = SgTreeConfig {
        truncate_level: Some(2),
        base: 2.0,
        cores: None,
    };
    let tree = SGTree::with_root(Point::new(vec![0.0, 0.0]), 0, config);
    // Far points lift the root, shallow structure stays legal.
    assert!(tree.insert(Point::new(vec![8.0, 0.0]), 1));
    // A point this close to the root needs a node far below the floor.
    assert!(!tree.insert(Point::new(vec![1e-6, 0.0]), 2));
    assert_eq!(tree.len(), 2);
    assert!(tree.check_covering());
}

#[test]
fn ext_props_survive_roundtrip() {
    let tree = SGTree::new(base2());
    assert!(tree.insert_with_props(Point::new(vec![0.0, 0.0]), 0, b"origin".to_vec()));
    assert!(tree.insert_with_props(Point::new(vec![3.0, 0.0]), 1, b"east".to_vec()));
    tree.calc_maxdist();

    let back = SGTree::deserialize(&tree.serialize()).unwrap();
    let (node, d) = back.nearest(&Point::new(vec![3.0, 0.0])).unwrap();
    assert_eq!(d, 0.0);
    assert_eq!(node.ext_prop(), b"east");
}

#[test]
fn empty_and_single_point_boundaries() {
    let empty = SGTree::default();
    let q = Point::new(vec![0.5, 0.5]);
    assert_eq!(empty.len(), 0);
    assert!(empty.nearest(&q).is_none());
    assert!(empty.furthest(&q).is_none());
    assert!(empty.knn(&q, 4).is_empty());
    assert!(empty.range(&q, 10.0).is_empty());
    assert!(empty.best_initial_points(4).is_empty());
    assert!(empty.check_covering());

    let one = SGTree::with_root(Point::new(vec![1.0, 0.0]), 7, SgTreeConfig::default());
    let (n, d) = one.nearest(&q).unwrap();
    assert_eq!(n.uid(), 7);
    assert!((d - q.dist(n.point())).abs() < 1e-15);
    let (n, _) = one.furthest(&q).unwrap();
    assert_eq!(n.uid(), 7);
}
