//! Gaussian targets with analytic scores.
//!
//! Useful as reference distributions for tests, benchmarks and demos.

use std::{convert::Infallible, f64::consts::PI};

use thiserror::Error;

use crate::{math::logaddexp, score::ParticleScore};

#[non_exhaustive]
#[derive(Error, Debug, PartialEq)]
pub enum TargetError {
    #[error("Variance must be positive and finite, got {0}")]
    InvalidVariance(f64),
    #[error("Mixture weights must be positive and finite, got {0}")]
    InvalidWeight(f64),
    #[error("Mean must be finite")]
    NonFiniteMean,
    #[error("Component mean has {found} coordinates, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("A mixture needs at least one component")]
    NoComponents,
}

fn check_normal(mean: &[f64], variance: f64) -> Result<(), TargetError> {
    if !(variance.is_finite() && variance > 0.) {
        return Err(TargetError::InvalidVariance(variance));
    }
    if !mean.iter().all(|x| x.is_finite()) {
        return Err(TargetError::NonFiniteMean);
    }
    Ok(())
}

/// `N(mean, variance · I)`
#[derive(Debug, Clone)]
pub struct IsotropicNormal {
    mean: Box<[f64]>,
    variance: f64,
}

impl IsotropicNormal {
    pub fn new(mean: impl Into<Box<[f64]>>, variance: f64) -> Result<Self, TargetError> {
        let mean = mean.into();
        check_normal(&mean, variance)?;
        Ok(Self { mean, variance })
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    pub fn log_density(&self, position: &[f64]) -> f64 {
        normal_log_density(position, &self.mean, self.variance)
    }
}

impl ParticleScore for IsotropicNormal {
    type ScoreError = Infallible;

    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn score_particle(&self, position: &[f64], score: &mut [f64]) -> Result<(), Infallible> {
        assert!(position.len() == self.mean.len());
        assert!(score.len() == self.mean.len());
        position
            .iter()
            .zip(self.mean.iter())
            .zip(score.iter_mut())
            .for_each(|((&x, &mu), score)| *score = -(x - mu) / self.variance);
        Ok(())
    }
}

fn normal_log_density(position: &[f64], mean: &[f64], variance: f64) -> f64 {
    let sq_dist: f64 = position
        .iter()
        .zip(mean)
        .map(|(x, mu)| (x - mu) * (x - mu))
        .sum();
    -sq_dist / (2. * variance) - 0.5 * (mean.len() as f64) * (2. * PI * variance).ln()
}

/// One component of a [`GaussianMixture`].
#[derive(Debug, Clone)]
pub struct MixtureComponent {
    pub weight: f64,
    pub mean: Box<[f64]>,
    pub variance: f64,
}

impl MixtureComponent {
    pub fn new(weight: f64, mean: impl Into<Box<[f64]>>, variance: f64) -> Self {
        Self {
            weight,
            mean: mean.into(),
            variance,
        }
    }
}

#[derive(Debug, Clone)]
struct Component {
    log_weight: f64,
    mean: Box<[f64]>,
    variance: f64,
}

/// A weighted mixture of isotropic normal distributions.
///
/// The score is `Σ_c r_c(x) · (−(x − μ_c) / σ_c²)`, where the
/// responsibilities `r_c(x)` are normalized in log space. Far in the tails,
/// where every component density underflows to zero, the score is still
/// that of the nearest component instead of `0 / 0`.
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    components: Vec<Component>,
    dim: usize,
}

impl GaussianMixture {
    /// Weights need not sum to one, they are normalized here.
    pub fn new(components: impl IntoIterator<Item = MixtureComponent>) -> Result<Self, TargetError> {
        let components: Vec<MixtureComponent> = components.into_iter().collect();
        let dim = components
            .first()
            .ok_or(TargetError::NoComponents)?
            .mean
            .len();

        let mut total = 0f64;
        for component in components.iter() {
            if !(component.weight.is_finite() && component.weight > 0.) {
                return Err(TargetError::InvalidWeight(component.weight));
            }
            if component.mean.len() != dim {
                return Err(TargetError::DimensionMismatch {
                    expected: dim,
                    found: component.mean.len(),
                });
            }
            check_normal(&component.mean, component.variance)?;
            total += component.weight;
        }

        let components = components
            .into_iter()
            .map(|component| Component {
                log_weight: (component.weight / total).ln(),
                mean: component.mean,
                variance: component.variance,
            })
            .collect();
        Ok(Self { components, dim })
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    fn component_log_density(component: &Component, position: &[f64]) -> f64 {
        component.log_weight + normal_log_density(position, &component.mean, component.variance)
    }

    pub fn log_density(&self, position: &[f64]) -> f64 {
        self.components
            .iter()
            .map(|component| Self::component_log_density(component, position))
            .fold(f64::NEG_INFINITY, logaddexp)
    }

    pub fn density(&self, position: &[f64]) -> f64 {
        self.log_density(position).exp()
    }
}

impl ParticleScore for GaussianMixture {
    type ScoreError = Infallible;

    fn dim(&self) -> usize {
        self.dim
    }

    fn score_particle(&self, position: &[f64], score: &mut [f64]) -> Result<(), Infallible> {
        assert!(position.len() == self.dim);
        assert!(score.len() == self.dim);

        let log_total = self.log_density(position);
        score.fill(0.);
        for component in self.components.iter() {
            let responsibility =
                (Self::component_log_density(component, position) - log_total).exp();
            let scale = responsibility / component.variance;
            score
                .iter_mut()
                .zip(position)
                .zip(component.mean.iter())
                .for_each(|((score, x), mu)| *score -= scale * (x - mu));
        }
        Ok(())
    }
}
