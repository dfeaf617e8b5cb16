//! Point representation: a fixed-dimension real vector under the L2 metric.

use serde::{Deserialize, Serialize};
use std::ops::Sub;

/// A point in a `D`-dimensional Euclidean space.
///
/// The tree only ever needs subtraction and the L2 norm, so this stays a
/// thin wrapper over a `Vec<f64>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub data: Vec<f64>,
}

impl Point {
    /// Create a new point from raw coordinates.
    pub fn new(data: Vec<f64>) -> Self {
        Self { data }
    }

    /// Create a zero point of the given dimension.
    pub fn zeros(dim: usize) -> Self {
        Self { data: vec![0.0; dim] }
    }

    /// Create a random point (uniform in [0, 1)).
    pub fn random(dim: usize) -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let data: Vec<f64> = (0..dim).map(|_| rng.gen_range(0.0..1.0)).collect();
        Self { data }
    }

    /// Dimension of the point.
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    /// L2 norm.
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// Euclidean distance to another point.
    pub fn dist(&self, other: &Point) -> f64 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    /// Coordinates as a slice.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

impl From<Vec<f64>> for Point {
    fn from(data: Vec<f64>) -> Self {
        Self { data }
    }
}

impl Sub for &Point {
    type Output = Point;

    fn sub(self, other: &Point) -> Point {
        Point {
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| a - b)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dist() {
        let a = Point::new(vec![0.0, 0.0]);
        let b = Point::new(vec![3.0, 4.0]);
        assert_eq!(a.dist(&b), 5.0);
        assert_eq!(b.dist(&a), 5.0);
        assert_eq!(a.dist(&a), 0.0);
    }

    #[test]
    fn test_sub_norm() {
        let a = Point::new(vec![1.0, 2.0]);
        let b = Point::new(vec![0.0, 2.0]);
        let d = &a - &b;
        assert_eq!(d.data, vec![1.0, 0.0]);
        assert_eq!(d.norm(), 1.0);
        assert_eq!(a.dist(&b), d.norm());
    }

    #[test]
    fn test_random_dim() {
        let p = Point::random(16);
        assert_eq!(p.dim(), 16);
        assert!(p.as_slice().iter().all(|x| (0.0..1.0).contains(x)));
    }
}
