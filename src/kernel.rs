//! RBF kernel between particles and its bandwidth heuristic.
//!
//! The kernel is `k(x, y) = exp(-‖x − y‖² / h)`. With the median
//! heuristic the bandwidth follows the spread of the particle set,
//! `h = median(D) / ln(n)`, where `D` holds all `n²` squared pairwise
//! distances.

use faer::{Mat, MatRef};
use rayon::prelude::*;

use crate::{
    math::{copy_rows_into, first_non_finite, median, squared_distance},
    svgd::{Result, SvgdError},
};

/// How the kernel bandwidth is chosen in each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Bandwidth {
    /// `median(D) / ln(n)`, recomputed from the current particles.
    #[default]
    Median,
    /// Use the same bandwidth in every iteration.
    Fixed(f64),
}

/// Settings for the particle interaction kernel.
#[derive(Debug, Clone, Copy)]
pub struct KernelOptions {
    pub bandwidth: Bandwidth,
    /// Lower bound for the bandwidth. Used whenever the heuristic
    /// produces a smaller or non-finite value, for example when all
    /// particles coincide.
    pub min_bandwidth: f64,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            bandwidth: Bandwidth::Median,
            min_bandwidth: 1e-8,
        }
    }
}

impl KernelOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.min_bandwidth.is_finite() && self.min_bandwidth > 0.) {
            return Err(SvgdError::InvalidBandwidth(self.min_bandwidth));
        }
        if let Bandwidth::Fixed(h) = self.bandwidth {
            if !(h.is_finite() && h > 0.) {
                return Err(SvgdError::InvalidBandwidth(h));
            }
        }
        Ok(())
    }

    fn select_bandwidth(&self, sq_dists: &[f64], n: usize) -> (f64, bool) {
        let h = match self.bandwidth {
            Bandwidth::Median => {
                let mut scratch = sq_dists.to_vec();
                median(&mut scratch) / (n as f64).ln()
            }
            Bandwidth::Fixed(h) => h,
        };
        if h.is_finite() && h >= self.min_bandwidth {
            (h, false)
        } else {
            (self.min_bandwidth, true)
        }
    }

    /// Compute the kernel matrix and the summed kernel gradients for the
    /// rows of `particles`.
    ///
    /// Fails if there are fewer than two particles or if a coordinate is
    /// not finite.
    pub fn evaluate(&self, particles: MatRef<'_, f64>) -> Result<KernelEval> {
        let n = particles.nrows();
        let dim = particles.ncols();
        if n < 2 {
            return Err(SvgdError::TooFewParticles(n));
        }
        if let Some((particle, coord)) = first_non_finite(particles) {
            return Err(SvgdError::NonFiniteParticles { particle, coord });
        }

        let mut rows = vec![0f64; n * dim];
        copy_rows_into(particles, &mut rows);

        let sq_dists = pairwise_sq_dists(&rows, n, dim);
        let (bandwidth, floored) = self.select_bandwidth(&sq_dists, n);

        let values: Vec<f64> = sq_dists.iter().map(|d| (-d / bandwidth).exp()).collect();
        let kernel = Mat::from_fn(n, n, |i, j| values[i * n + j]);

        if dim == 0 {
            return Ok(KernelEval {
                kernel,
                repulsion: Mat::zeros(n, 0),
                bandwidth,
                floored,
            });
        }

        // Row i: Σ_j ∇_{x_j} k(x_j, x_i) = (2 / h) Σ_j k_ij (x_i − x_j)
        let scale = 2. / bandwidth;
        let mut repulsion = vec![0f64; n * dim];
        repulsion
            .par_chunks_exact_mut(dim)
            .enumerate()
            .for_each(|(i, out)| {
                let x_i = &rows[i * dim..(i + 1) * dim];
                for (x_j, &k_ij) in rows.chunks_exact(dim).zip(&values[i * n..(i + 1) * n]) {
                    for ((out, a), b) in out.iter_mut().zip(x_i).zip(x_j) {
                        *out += k_ij * (a - b);
                    }
                }
                out.iter_mut().for_each(|val| *val *= scale);
            });

        Ok(KernelEval {
            kernel,
            repulsion: Mat::from_fn(n, dim, |i, k| repulsion[i * dim + k]),
            bandwidth,
            floored,
        })
    }
}

/// Kernel quantities for one particle configuration.
#[derive(Debug, Clone)]
pub struct KernelEval {
    /// `n × n` symmetric kernel matrix with unit diagonal.
    pub kernel: Mat<f64>,
    /// `n × d`; row `i` is `Σ_j ∇_{x_j} k(x_j, x_i)`.
    pub repulsion: Mat<f64>,
    pub bandwidth: f64,
    /// The bandwidth floor replaced the heuristic value.
    pub floored: bool,
}

/// Squared euclidean distances between all rows, row-major `n × n`.
pub(crate) fn pairwise_sq_dists(rows: &[f64], n: usize, dim: usize) -> Vec<f64> {
    assert!(rows.len() == n * dim);
    let mut out = vec![0f64; n * n];
    if dim == 0 {
        return out;
    }
    out.par_chunks_exact_mut(n)
        .enumerate()
        .for_each(|(i, out_row)| {
            let x_i = &rows[i * dim..(i + 1) * dim];
            for (out, x_j) in out_row.iter_mut().zip(rows.chunks_exact(dim)) {
                *out = squared_distance(x_i, x_j);
            }
        });
    out
}

/// The RBF kernel for a fixed bandwidth, evaluated for a single pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RbfKernel {
    bandwidth: f64,
}

impl RbfKernel {
    pub fn new(bandwidth: f64) -> Self {
        Self { bandwidth }
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn value(&self, x: &[f64], y: &[f64]) -> f64 {
        (-squared_distance(x, y) / self.bandwidth).exp()
    }

    /// Write `∇_x k(x, y)` into `out` and return `k(x, y)`.
    pub fn gradient(&self, x: &[f64], y: &[f64], out: &mut [f64]) -> f64 {
        assert!(out.len() == x.len());
        let value = self.value(x, y);
        let scale = -2. * value / self.bandwidth;
        for ((out, a), b) in out.iter_mut().zip(x).zip(y) {
            *out = scale * (a - b);
        }
        value
    }
}
