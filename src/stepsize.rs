//! Per-coordinate step sizes for the particle updates.
//!
//! Every coordinate of every particle keeps a running accumulator of its
//! squared update directions. The step applied to that coordinate is
//! `base_step_size / (fudge_factor + sqrt(accumulator))`, so coordinates
//! with consistently large directions move with smaller steps.

use faer::Mat;
use itertools::izip;

use crate::svgd::{Result, SvgdError};

/// How squared directions are folded into the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Accumulation {
    /// `accum ← accum + φ²`. The accumulator grows monotonically.
    #[default]
    AdaGrad,
    /// `accum ← alpha · accum + (1 − alpha) · φ²`, starting from `φ²`
    /// in the first iteration.
    RmsProp { alpha: f64 },
}

/// Settings for step size adaptation
#[derive(Debug, Clone, Copy)]
pub struct StepSizeOptions {
    pub base_step_size: f64,
    /// Small constant for numerical stability (default: 1e-6)
    pub fudge_factor: f64,
    pub accumulation: Accumulation,
}

impl Default for StepSizeOptions {
    fn default() -> Self {
        Self {
            base_step_size: 1e-3,
            fudge_factor: 1e-6,
            accumulation: Accumulation::AdaGrad,
        }
    }
}

impl StepSizeOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.base_step_size.is_finite() && self.base_step_size > 0.) {
            return Err(SvgdError::InvalidStepSize(self.base_step_size));
        }
        if !(self.fudge_factor.is_finite() && self.fudge_factor > 0.) {
            return Err(SvgdError::InvalidFudgeFactor(self.fudge_factor));
        }
        if let Accumulation::RmsProp { alpha } = self.accumulation {
            if !(alpha > 0. && alpha < 1.) {
                return Err(SvgdError::InvalidDecay(alpha));
            }
        }
        Ok(())
    }
}

pub(crate) struct StepSizeAdapt {
    accumulator: Mat<f64>,
    count: u64,
    options: StepSizeOptions,
    arch: pulp::Arch,
}

impl StepSizeAdapt {
    pub(crate) fn new(options: StepSizeOptions, num_particles: usize, dim: usize) -> Self {
        Self {
            accumulator: Mat::zeros(num_particles, dim),
            count: 0,
            options,
            arch: pulp::Arch::new(),
        }
    }

    /// Fold `direction` into the accumulator and move `particles` along it
    /// with the adapted step sizes.
    ///
    /// Returns the largest absolute change of a single coordinate.
    pub(crate) fn advance(&mut self, particles: &mut Mat<f64>, direction: &Mat<f64>) -> f64 {
        assert!(particles.nrows() == direction.nrows());
        assert!(particles.ncols() == direction.ncols());
        assert!(particles.nrows() == self.accumulator.nrows());
        assert!(particles.ncols() == self.accumulator.ncols());

        let (decay, weight) = match self.options.accumulation {
            Accumulation::AdaGrad => (1f64, 1f64),
            Accumulation::RmsProp { .. } if self.count == 0 => (0f64, 1f64),
            Accumulation::RmsProp { alpha } => (alpha, 1f64 - alpha),
        };
        let base = self.options.base_step_size;
        let fudge = self.options.fudge_factor;

        let mut max_change = 0f64;
        for k in 0..particles.ncols() {
            let accumulator = self.accumulator.col_as_slice_mut(k);
            let position = particles.col_as_slice_mut(k);
            let phis = direction.col_as_slice(k);

            max_change = self.arch.dispatch(|| {
                izip!(accumulator.iter_mut(), position.iter_mut(), phis.iter()).fold(
                    max_change,
                    |max_change, (accum, x, &phi)| {
                        *accum = decay * *accum + weight * phi * phi;
                        let change = base / (fudge + accum.sqrt()) * phi;
                        *x += change;
                        max_change.max(change.abs())
                    },
                )
            });
        }
        self.count += 1;
        max_change
    }

    /// Root mean square of the current step sizes.
    pub(crate) fn rms_step_size(&self) -> f64 {
        let base = self.options.base_step_size;
        let fudge = self.options.fudge_factor;
        let (n, dim) = (self.accumulator.nrows(), self.accumulator.ncols());
        if n * dim == 0 {
            return base / fudge;
        }
        let sum: f64 = (0..dim)
            .flat_map(|k| self.accumulator.col_as_slice(k).iter())
            .map(|accum| {
                let step = base / (fudge + accum.sqrt());
                step * step
            })
            .sum();
        (sum / (n * dim) as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn column(values: &[f64]) -> Mat<f64> {
        Mat::from_fn(values.len(), 1, |i, _| values[i])
    }

    #[test]
    fn adagrad_accumulates() {
        let options = StepSizeOptions {
            base_step_size: 0.5,
            ..Default::default()
        };
        let mut adapt = StepSizeAdapt::new(options, 2, 1);
        let mut x = column(&[0., 0.]);
        let phi = column(&[2., -1.]);

        let change = adapt.advance(&mut x, &phi);
        assert_relative_eq!(x[(0, 0)], 0.5 * 2. / (1e-6 + 2.), max_relative = 1e-12);
        assert_relative_eq!(x[(1, 0)], -0.5 / (1e-6 + 1.), max_relative = 1e-12);
        assert_relative_eq!(change, 0.5 * 2. / (1e-6 + 2.), max_relative = 1e-12);

        adapt.advance(&mut x, &phi);
        let second = 0.5 * 2. / (1e-6 + 8f64.sqrt());
        assert_relative_eq!(x[(0, 0)], 0.5 * 2. / (1e-6 + 2.) + second, max_relative = 1e-12);
        assert_eq!(adapt.count, 2);
        assert_eq!(adapt.accumulator[(0, 0)], 8.);
        assert_eq!(adapt.accumulator[(1, 0)], 2.);
    }

    #[test]
    fn rmsprop_starts_from_first_direction() {
        let options = StepSizeOptions {
            base_step_size: 1.,
            accumulation: Accumulation::RmsProp { alpha: 0.9 },
            ..Default::default()
        };
        let mut adapt = StepSizeAdapt::new(options, 1, 1);
        let mut x = column(&[0.]);

        adapt.advance(&mut x, &column(&[3.]));
        assert_eq!(adapt.accumulator[(0, 0)], 9.);

        adapt.advance(&mut x, &column(&[1.]));
        assert_relative_eq!(adapt.accumulator[(0, 0)], 0.9 * 9. + 0.1, max_relative = 1e-12);
    }

    #[test]
    fn zero_direction_does_not_move() {
        let mut adapt = StepSizeAdapt::new(StepSizeOptions::default(), 3, 2);
        let mut x = Mat::from_fn(3, 2, |i, k| (i + k) as f64);
        let change = adapt.advance(&mut x, &Mat::zeros(3, 2));
        assert_eq!(change, 0.);
        assert_eq!(x[(2, 1)], 3.);
        assert_relative_eq!(adapt.rms_step_size(), 1e-3 / 1e-6, max_relative = 1e-12);
    }

    #[test]
    fn invalid_options() {
        let bad_step = StepSizeOptions {
            base_step_size: 0.,
            ..Default::default()
        };
        assert!(matches!(
            bad_step.validate(),
            Err(SvgdError::InvalidStepSize(_))
        ));
        let bad_fudge = StepSizeOptions {
            fudge_factor: -1.,
            ..Default::default()
        };
        assert!(matches!(
            bad_fudge.validate(),
            Err(SvgdError::InvalidFudgeFactor(_))
        ));
        let bad_alpha = StepSizeOptions {
            accumulation: Accumulation::RmsProp { alpha: 1. },
            ..Default::default()
        };
        assert!(matches!(bad_alpha.validate(), Err(SvgdError::InvalidDecay(_))));
        assert!(StepSizeOptions::default().validate().is_ok());
    }
}
