//! Precomputed powers of the tree base.
//!
//! Level-scale computations happen on every insertion and every query
//! expansion, so `base^L` is tabulated once at construction over a wide
//! symmetric range of levels and looked up by biased array index.

/// Bias applied to levels so index 0 corresponds to level `-POW_BIAS`.
pub(crate) const POW_BIAS: i32 = 1024;

/// Lookup table of `base^L` for `L` in `[-POW_BIAS, POW_BIAS]`.
#[derive(Debug, Clone)]
pub struct PowTable {
    base: f64,
    pows: Vec<f64>,
}

impl PowTable {
    /// Tabulate powers of `base`. Requires `base > 1`.
    pub fn new(base: f64) -> Self {
        assert!(base > 1.0, "tree base must be > 1, got {base}");
        let pows = (0..=2 * POW_BIAS).map(|i| base.powi(i - POW_BIAS)).collect();
        Self { base, pows }
    }

    /// The base the table was built for.
    pub fn base(&self) -> f64 {
        self.base
    }

    /// Covering distance of a node at `level`: `base^(level + 1)`.
    ///
    /// Children of the node must sit within this radius of it.
    pub fn covdist(&self, level: i32) -> f64 {
        self.pows[(level + POW_BIAS + 1) as usize]
    }

    /// Separation distance at `level`: `base^level`.
    ///
    /// Children of a node at `level` are pairwise further apart than this,
    /// and it is the covering radius of each of those children.
    pub fn sepdist(&self, level: i32) -> f64 {
        self.pows[(level + POW_BIAS) as usize]
    }
}
