//! Summaries of particle sets for comparing results against a target.
//!
//! Nothing in here is used while particles are transported.

use faer::MatRef;
use thiserror::Error;

use crate::{
    kernel::pairwise_sq_dists,
    math::{axpy, copy_rows_into, logaddexp, squared_distance},
};

#[non_exhaustive]
#[derive(Error, Debug, PartialEq)]
pub enum DiagnosticsError {
    #[error("At least two particles are required, got {0}")]
    TooFewParticles(usize),
    #[error("Coordinate {0} has no spread")]
    ZeroSpread(usize),
}

fn rows_of(particles: MatRef<'_, f64>) -> Vec<f64> {
    let mut rows = vec![0f64; particles.nrows() * particles.ncols()];
    copy_rows_into(particles, &mut rows);
    rows
}

/// Per-coordinate mean of the particles.
pub fn mean(particles: MatRef<'_, f64>) -> Vec<f64> {
    let n = particles.nrows();
    let dim = particles.ncols();
    let mut sum = vec![0f64; dim];
    if (n == 0) | (dim == 0) {
        return sum;
    }
    let rows = rows_of(particles);
    let weight = (n as f64).recip();
    rows.chunks_exact(dim)
        .for_each(|row| axpy(row, &mut sum, weight));
    sum
}

/// Per-coordinate population variance of the particles.
pub fn variance(particles: MatRef<'_, f64>) -> Vec<f64> {
    let n = particles.nrows();
    let mean = mean(particles);
    (0..particles.ncols())
        .map(|k| {
            let sum_sq: f64 = (0..n)
                .map(|i| {
                    let diff = particles[(i, k)] - mean[k];
                    diff * diff
                })
                .sum();
            sum_sq / n as f64
        })
        .collect()
}

/// Smallest euclidean distance between two different particles.
pub fn min_pairwise_distance(particles: MatRef<'_, f64>) -> Result<f64, DiagnosticsError> {
    let n = particles.nrows();
    if n < 2 {
        return Err(DiagnosticsError::TooFewParticles(n));
    }
    let sq_dists = pairwise_sq_dists(&rows_of(particles), n, particles.ncols());
    let min = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .map(|(i, j)| sq_dists[i * n + j])
        .fold(f64::INFINITY, f64::min);
    Ok(min.sqrt())
}

/// For each centre, the fraction of particles that are closer to it than
/// to any other centre.
pub fn fraction_nearest(particles: MatRef<'_, f64>, centres: &[&[f64]]) -> Vec<f64> {
    let n = particles.nrows();
    let dim = particles.ncols();
    let mut counts = vec![0usize; centres.len()];
    if (n == 0) | centres.is_empty() {
        return vec![0f64; centres.len()];
    }
    let rows = rows_of(particles);
    for i in 0..n {
        let row = &rows[i * dim..(i + 1) * dim];
        let nearest = centres
            .iter()
            .map(|centre| squared_distance(row, centre))
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(idx, _)| idx);
        if let Some(idx) = nearest {
            counts[idx] += 1;
        }
    }
    counts
        .into_iter()
        .map(|count| count as f64 / n as f64)
        .collect()
}

/// Gaussian kernel density estimate of a particle set.
///
/// Uses a product kernel with one bandwidth per coordinate, Scott's factor
/// `n^(-1 / (d + 4))` times the sample standard deviation.
#[derive(Debug, Clone)]
pub struct GaussianKde {
    rows: Vec<f64>,
    dim: usize,
    bandwidths: Vec<f64>,
    /// `-ln n - Σ_k ln(h_k √(2π))`
    log_norm: f64,
}

impl GaussianKde {
    pub fn new(particles: MatRef<'_, f64>) -> Result<Self, DiagnosticsError> {
        let n = particles.nrows();
        let dim = particles.ncols();
        if n < 2 {
            return Err(DiagnosticsError::TooFewParticles(n));
        }

        let factor = (n as f64).powf(-1. / (dim as f64 + 4.));
        let bias_correction = n as f64 / (n - 1) as f64;
        let bandwidths = variance(particles)
            .into_iter()
            .enumerate()
            .map(|(k, var)| {
                let h = factor * (var * bias_correction).sqrt();
                if h > 0. {
                    Ok(h)
                } else {
                    Err(DiagnosticsError::ZeroSpread(k))
                }
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let log_norm = -(n as f64).ln()
            - bandwidths
                .iter()
                .map(|h| (h * (2. * std::f64::consts::PI).sqrt()).ln())
                .sum::<f64>();

        Ok(Self {
            rows: rows_of(particles),
            dim,
            bandwidths,
            log_norm,
        })
    }

    pub fn bandwidths(&self) -> &[f64] {
        &self.bandwidths
    }

    pub fn log_density(&self, point: &[f64]) -> f64 {
        assert!(point.len() == self.dim);
        if self.dim == 0 {
            return 0.;
        }
        let log_sum = self
            .rows
            .chunks_exact(self.dim)
            .map(|row| {
                -0.5 * row
                    .iter()
                    .zip(point)
                    .zip(self.bandwidths.iter())
                    .map(|((x, p), h)| {
                        let z = (p - x) / h;
                        z * z
                    })
                    .sum::<f64>()
            })
            .fold(f64::NEG_INFINITY, logaddexp);
        log_sum + self.log_norm
    }

    pub fn density(&self, point: &[f64]) -> f64 {
        self.log_density(point).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use faer::Mat;
    use pretty_assertions::assert_eq;

    fn line(points: &[f64]) -> Mat<f64> {
        Mat::from_fn(points.len(), 1, |i, _| points[i])
    }

    #[test]
    fn moments() {
        let particles = Mat::from_fn(4, 2, |i, k| if k == 0 { i as f64 } else { 2. });
        assert_eq!(mean(particles.as_ref()), vec![1.5, 2.]);
        assert_eq!(variance(particles.as_ref()), vec![1.25, 0.]);
    }

    #[test]
    fn pairwise_distance() {
        let particles = line(&[0., 3., 1.5, 10.]);
        assert_eq!(min_pairwise_distance(particles.as_ref()).unwrap(), 1.5);
        assert_eq!(
            min_pairwise_distance(line(&[1.]).as_ref()).unwrap_err(),
            DiagnosticsError::TooFewParticles(1)
        );
    }

    #[test]
    fn nearest_centres() {
        let particles = line(&[-3., -1.9, 0.5, 2., 2.2, 7.]);
        let fractions = fraction_nearest(particles.as_ref(), &[&[-2.], &[2.]]);
        assert_eq!(fractions, vec![2. / 6., 4. / 6.]);
    }

    #[test]
    fn kde_integrates_to_one() {
        let kde = GaussianKde::new(line(&[-1., 0., 0.5, 2., 2.5]).as_ref()).unwrap();
        let step = 0.01;
        let total: f64 = (0..4000)
            .map(|i| kde.density(&[-20. + step * i as f64]) * step)
            .sum();
        assert_abs_diff_eq!(total, 1., epsilon = 1e-6);
    }

    #[test]
    fn kde_scott_bandwidth() {
        let kde = GaussianKde::new(line(&[0., 2.]).as_ref()).unwrap();
        // sample std is √2, Scott's factor is 2^(-1/5)
        assert_abs_diff_eq!(
            kde.bandwidths()[0],
            2f64.sqrt() * 2f64.powf(-0.2),
            epsilon = 1e-12
        );
        assert_eq!(
            GaussianKde::new(line(&[1., 1., 1.]).as_ref()).unwrap_err(),
            DiagnosticsError::ZeroSpread(0)
        );
    }
}
