use std::{convert::Infallible, error::Error, fmt::Debug};

use faer::{Mat, MatRef};
use rayon::prelude::*;

use crate::math::copy_rows_into;

/// Gradient of the log density of the target distribution.
///
/// This needs to be implemented by users of the library to define
/// which distribution the particles should be transported to. The
/// normalizing constant of the density is never needed.
///
/// The function is evaluated once per iteration on the whole particle
/// set. It should be deterministic; an error stops the run.
pub trait ScoreFunc {
    type ScoreError: Debug + Send + Sync + Error + 'static;

    /// The number of coordinates of each particle.
    fn dim(&self) -> usize;

    /// Return `∇ log p` evaluated at every row of `particles`.
    ///
    /// The returned matrix must have the same shape as `particles`.
    fn score(&mut self, particles: MatRef<'_, f64>) -> Result<Mat<f64>, Self::ScoreError>;
}

impl<S: ScoreFunc + ?Sized> ScoreFunc for &mut S {
    type ScoreError = S::ScoreError;

    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn score(&mut self, particles: MatRef<'_, f64>) -> Result<Mat<f64>, Self::ScoreError> {
        (**self).score(particles)
    }
}

/// Gradient of the log density, evaluated one particle at a time.
///
/// Use [`PerParticle`] to turn this into a [`ScoreFunc`] that evaluates
/// all particles of an iteration on the rayon thread pool.
pub trait ParticleScore: Sync {
    type ScoreError: Debug + Send + Sync + Error + 'static;

    fn dim(&self) -> usize;

    /// Write `∇ log p(position)` into `score`. Both slices have length `dim`.
    fn score_particle(&self, position: &[f64], score: &mut [f64])
        -> Result<(), Self::ScoreError>;
}

/// Evaluate a [`ParticleScore`] row by row.
#[derive(Debug, Clone)]
pub struct PerParticle<S> {
    inner: S,
    parallel: bool,
}

impl<S: ParticleScore> PerParticle<S> {
    /// Evaluate particles in parallel.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            parallel: true,
        }
    }

    /// Evaluate particles one after the other on the calling thread.
    pub fn sequential(inner: S) -> Self {
        Self {
            inner,
            parallel: false,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ParticleScore> ScoreFunc for PerParticle<S> {
    type ScoreError = S::ScoreError;

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn score(&mut self, particles: MatRef<'_, f64>) -> Result<Mat<f64>, Self::ScoreError> {
        let n = particles.nrows();
        let dim = particles.ncols();
        if dim == 0 {
            return Ok(Mat::zeros(n, 0));
        }

        let mut positions = vec![0f64; n * dim];
        copy_rows_into(particles, &mut positions);
        let mut scores = vec![0f64; n * dim];

        let inner = &self.inner;
        if self.parallel {
            positions
                .par_chunks_exact(dim)
                .zip(scores.par_chunks_exact_mut(dim))
                .try_for_each(|(position, score)| inner.score_particle(position, score))?;
        } else {
            positions
                .chunks_exact(dim)
                .zip(scores.chunks_exact_mut(dim))
                .try_for_each(|(position, score)| inner.score_particle(position, score))?;
        }

        Ok(Mat::from_fn(n, dim, |i, k| scores[i * dim + k]))
    }
}

/// A [`ScoreFunc`] backed by an infallible closure.
pub struct FnScore<F> {
    dim: usize,
    func: F,
}

impl<F> FnScore<F>
where
    F: FnMut(MatRef<'_, f64>) -> Mat<f64>,
{
    pub fn new(dim: usize, func: F) -> Self {
        Self { dim, func }
    }
}

impl<F> ScoreFunc for FnScore<F>
where
    F: FnMut(MatRef<'_, f64>) -> Mat<f64>,
{
    type ScoreError = Infallible;

    fn dim(&self) -> usize {
        self.dim
    }

    fn score(&mut self, particles: MatRef<'_, f64>) -> Result<Mat<f64>, Self::ScoreError> {
        Ok((self.func)(particles))
    }
}
