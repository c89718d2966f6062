use nalgebra::{DMatrix, SymmetricEigen};

use super::log_sum_exp;

/// Gauss–Hermite rule rescaled for expectations under a centred normal.
///
/// Nodes and weights come from the Golub–Welsch eigenproblem of the
/// Hermite Jacobi matrix; weights are normalised to sum to one so that
/// ```text
/// E[f(b)], b ~ N(0, σ²)  ≈  Σ_k w_k f(√2 σ x_k)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GaussHermite {
    nodes: Vec<f64>,
    log_weights: Vec<f64>,
}

impl GaussHermite {
    /// Rule with `n` nodes (at least one).
    pub fn new(n: usize) -> Self {
        let n = n.max(1);
        let jacobi = DMatrix::from_fn(n, n, |i, j| {
            if i.abs_diff(j) == 1 {
                (i.max(j) as f64 / 2.0).sqrt()
            } else {
                0.0
            }
        });
        let eig = SymmetricEigen::new(jacobi);

        let mut pairs: Vec<(f64, f64)> = eig
            .eigenvalues
            .iter()
            .zip(eig.eigenvectors.row(0).iter())
            .map(|(&x, &v)| (x, v * v))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let total: f64 = pairs.iter().map(|p| p.1).sum();
        Self {
            nodes: pairs.iter().map(|p| p.0 * std::f64::consts::SQRT_2).collect(),
            log_weights: pairs.iter().map(|p| (p.1 / total).ln()).collect(),
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; a rule has at least one node.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Standard-normal abscissae (already multiplied by √2).
    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    /// Log of the normalised weights.
    pub fn log_weights(&self) -> &[f64] {
        &self.log_weights
    }

    /// `ln E[exp(g(b))]` for `b ~ N(0, sd²)`.
    ///
    /// With `sd == 0` the expectation collapses to `g(0)`.
    pub fn log_expectation<G>(&self, sd: f64, mut log_g: G) -> f64
    where
        G: FnMut(f64) -> f64,
    {
        if sd == 0.0 {
            return log_g(0.0);
        }
        let terms: Vec<f64> = self
            .nodes
            .iter()
            .zip(&self.log_weights)
            .map(|(&z, &lw)| lw + log_g(sd * z))
            .collect();
        log_sum_exp(terms.iter().copied())
    }
}

impl Default for GaussHermite {
    fn default() -> Self {
        Self::new(40)
    }
}
