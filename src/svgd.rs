use std::time::{Duration, Instant};

use faer::{Mat, MatRef};
use thiserror::Error;

use crate::{
    kernel::{KernelEval, KernelOptions},
    math::first_non_finite,
    score::ScoreFunc,
    stepsize::{StepSizeAdapt, StepSizeOptions},
};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SvgdError {
    #[error("At least two particles are required, got {0}")]
    TooFewParticles(usize),
    #[error("Base step size must be positive and finite, got {0}")]
    InvalidStepSize(f64),
    #[error("Fudge factor must be positive and finite, got {0}")]
    InvalidFudgeFactor(f64),
    #[error("Accumulator decay must lie strictly between 0 and 1, got {0}")]
    InvalidDecay(f64),
    #[error("Kernel bandwidth must be positive and finite, got {0}")]
    InvalidBandwidth(f64),
    #[error("Convergence tolerance must be positive, got {0}")]
    InvalidTolerance(f64),
    #[error("Particles have {found} coordinates, but the score function expects {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Particle {particle} has a non-finite value in coordinate {coord}")]
    NonFiniteParticles { particle: usize, coord: usize },
    #[error(
        "Score function returned a {found_rows}x{found_cols} matrix for {rows}x{cols} particles"
    )]
    ScoreShape {
        rows: usize,
        cols: usize,
        found_rows: usize,
        found_cols: usize,
    },
    #[error("Kernel matrix is {rows}x{cols} for {particles} particles")]
    KernelShape {
        particles: usize,
        rows: usize,
        cols: usize,
    },
    #[error("Score function returned a non-finite value for particle {particle} in iteration {iteration}")]
    NonFiniteScore { iteration: u64, particle: usize },
    #[error("Score function returned an error")]
    ScoreFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Particle {particle} became non-finite in iteration {iteration}")]
    Diverged { iteration: u64, particle: usize },
    #[error("The run has already finished or failed")]
    Finished,
}

pub type Result<T> = std::result::Result<T, SvgdError>;

/// Settings for an SVGD run
#[derive(Debug, Clone, Copy)]
pub struct SvgdSettings {
    /// The number of particle updates.
    pub num_iterations: u64,
    /// Settings for the adaptive per-coordinate step sizes.
    pub step_size: StepSizeOptions,
    /// Settings for the particle interaction kernel.
    pub kernel: KernelOptions,
    /// Check the scores and the updated particles for NaN and infinity
    /// in every iteration.
    pub check_finite: bool,
    /// Stop early once no coordinate moved by more than this amount
    /// during an iteration.
    pub tolerance: Option<f64>,
    /// Stop after the first iteration that ends past this wall-clock budget.
    pub max_duration: Option<Duration>,
}

impl Default for SvgdSettings {
    fn default() -> Self {
        Self {
            num_iterations: 1000,
            step_size: StepSizeOptions::default(),
            kernel: KernelOptions::default(),
            check_finite: true,
            tolerance: None,
            max_duration: None,
        }
    }
}

impl SvgdSettings {
    pub fn validate(&self) -> Result<()> {
        self.step_size.validate()?;
        self.kernel.validate()?;
        if let Some(tolerance) = self.tolerance {
            if !(tolerance > 0.) {
                return Err(SvgdError::InvalidTolerance(tolerance));
            }
        }
        Ok(())
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// All configured iterations were performed.
    Completed,
    /// The largest coordinate change fell below the tolerance.
    Converged,
    /// The wall-clock budget was used up.
    DeadlineReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Validated and ready, no iteration performed yet.
    Initialized,
    Iterating { completed: u64 },
    Done {
        completed: u64,
        termination: Termination,
    },
    /// An iteration returned an error. The particles are those left by
    /// the failed iteration and can not be advanced any further.
    Failed { completed: u64 },
}

/// Diagnostic information about one iteration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Progress {
    /// Zero-based index of the iteration.
    pub iteration: u64,
    pub bandwidth: f64,
    /// The bandwidth floor was used instead of the heuristic.
    pub bandwidth_floored: bool,
    /// Largest absolute change of a single particle coordinate.
    pub max_change: f64,
    /// Root mean square of the Stein direction.
    pub direction_rms: f64,
    /// Root mean square of the per-coordinate step sizes after the update.
    pub step_size_rms: f64,
    /// Time since the first iteration started.
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct SvgdOutput {
    /// The transported particles, one per row.
    pub particles: Mat<f64>,
    /// The number of iterations that were performed.
    pub iterations: u64,
    pub termination: Termination,
    pub last_progress: Option<Progress>,
}

/// The Stein variational direction for every particle,
///
/// `φ(x_i) = 1/n Σ_j [k(x_j, x_i) ∇ log p(x_j) + ∇_{x_j} k(x_j, x_i)]`.
///
/// The first term pulls particles towards regions of high density, the
/// second pushes them away from each other.
///
/// `scores` must have the shape of `kernel.repulsion`, and `kernel.kernel`
/// must be square with one row per particle.
pub fn stein_direction(kernel: &KernelEval, scores: &Mat<f64>) -> Result<Mat<f64>> {
    let n = kernel.repulsion.nrows();
    if (scores.nrows() != n) | (scores.ncols() != kernel.repulsion.ncols()) {
        return Err(SvgdError::ScoreShape {
            rows: n,
            cols: kernel.repulsion.ncols(),
            found_rows: scores.nrows(),
            found_cols: scores.ncols(),
        });
    }
    if (kernel.kernel.nrows() != n) | (kernel.kernel.ncols() != n) {
        return Err(SvgdError::KernelShape {
            particles: n,
            rows: kernel.kernel.nrows(),
            cols: kernel.kernel.ncols(),
        });
    }

    // The kernel matrix is symmetric, so K·G sums k(x_j, x_i) ∇ log p(x_j).
    let driving = &kernel.kernel * scores;
    let scale = (n as f64).recip();
    Ok(Mat::from_fn(n, scores.ncols(), |i, k| {
        scale * (driving[(i, k)] + kernel.repulsion[(i, k)])
    }))
}

fn rms(mat: &Mat<f64>) -> f64 {
    let count = mat.nrows() * mat.ncols();
    if count == 0 {
        return 0.;
    }
    let sum: f64 = (0..mat.ncols())
        .flat_map(|k| mat.col_as_slice(k).iter())
        .map(|val| val * val)
        .sum();
    (sum / count as f64).sqrt()
}

/// A single SVGD run over a fixed particle set.
///
/// The particles are copied on construction and owned by the run. Call
/// [`Svgd::step`] for one iteration at a time or [`Svgd::run`] to use up
/// the iteration budget.
pub struct Svgd<F: ScoreFunc> {
    score: F,
    settings: SvgdSettings,
    particles: Mat<f64>,
    step_size: StepSizeAdapt,
    termination: Option<Termination>,
    completed: u64,
    failed: bool,
    start_time: Option<Instant>,
    warned_floor: bool,
    last_progress: Option<Progress>,
}

impl<F: ScoreFunc> Svgd<F> {
    /// Validate the settings and the initial particles and set up a run.
    ///
    /// The score function is not called here.
    pub fn new(particles: MatRef<'_, f64>, score: F, settings: SvgdSettings) -> Result<Self> {
        settings.validate()?;

        let n = particles.nrows();
        let dim = particles.ncols();
        if n < 2 {
            return Err(SvgdError::TooFewParticles(n));
        }
        if dim != score.dim() {
            return Err(SvgdError::DimensionMismatch {
                expected: score.dim(),
                found: dim,
            });
        }
        if let Some((particle, coord)) = first_non_finite(particles) {
            return Err(SvgdError::NonFiniteParticles { particle, coord });
        }

        log::debug!(
            "Starting SVGD with {} particles in {} dimensions for {} iterations: {:?}",
            n,
            dim,
            settings.num_iterations,
            settings
        );

        let termination = if settings.num_iterations == 0 {
            Some(Termination::Completed)
        } else {
            None
        };

        Ok(Self {
            score,
            settings,
            particles: particles.to_owned(),
            step_size: StepSizeAdapt::new(settings.step_size, n, dim),
            termination,
            completed: 0,
            failed: false,
            start_time: None,
            warned_floor: false,
            last_progress: None,
        })
    }

    pub fn state(&self) -> RunState {
        let completed = self.completed_iterations();
        if self.failed {
            return RunState::Failed { completed };
        }
        match self.termination {
            Some(termination) => RunState::Done {
                completed,
                termination,
            },
            None if completed == 0 => RunState::Initialized,
            None => RunState::Iterating { completed },
        }
    }

    /// The number of iterations that finished without an error.
    pub fn completed_iterations(&self) -> u64 {
        self.completed
    }

    /// The current particle positions, one particle per row.
    pub fn particles(&self) -> MatRef<'_, f64> {
        self.particles.as_ref()
    }

    pub fn settings(&self) -> &SvgdSettings {
        &self.settings
    }

    pub fn last_progress(&self) -> Option<&Progress> {
        self.last_progress.as_ref()
    }

    /// Perform one iteration and move every particle.
    ///
    /// Fails with [`SvgdError::Finished`] once the run is done. Any other
    /// error ends the run in [`RunState::Failed`].
    pub fn step(&mut self) -> Result<Progress> {
        if self.termination.is_some() | self.failed {
            return Err(SvgdError::Finished);
        }
        let result = self.advance();
        if let Err(err) = result.as_ref() {
            log::debug!(
                "SVGD failed after {} iterations: {}",
                self.completed,
                err
            );
            self.failed = true;
        }
        result
    }

    fn advance(&mut self) -> Result<Progress> {
        let start_time = *self.start_time.get_or_insert_with(Instant::now);
        let iteration = self.completed_iterations();
        let n = self.particles.nrows();
        let dim = self.particles.ncols();

        let scores = self
            .score
            .score(self.particles.as_ref())
            .map_err(|err| SvgdError::ScoreFailure(Box::new(err)))?;
        if (scores.nrows() != n) | (scores.ncols() != dim) {
            return Err(SvgdError::ScoreShape {
                rows: n,
                cols: dim,
                found_rows: scores.nrows(),
                found_cols: scores.ncols(),
            });
        }
        if self.settings.check_finite {
            if let Some((particle, _)) = first_non_finite(scores.as_ref()) {
                return Err(SvgdError::NonFiniteScore {
                    iteration,
                    particle,
                });
            }
        }

        let kernel = self.settings.kernel.evaluate(self.particles.as_ref())?;
        if kernel.floored & !self.warned_floor {
            log::warn!(
                "Kernel bandwidth fell below {} in iteration {}, using the floor value",
                self.settings.kernel.min_bandwidth,
                iteration
            );
            self.warned_floor = true;
        }

        let direction = stein_direction(&kernel, &scores)?;
        let max_change = self.step_size.advance(&mut self.particles, &direction);

        if self.settings.check_finite {
            if let Some((particle, _)) = first_non_finite(self.particles.as_ref()) {
                return Err(SvgdError::Diverged {
                    iteration,
                    particle,
                });
            }
        }

        let progress = Progress {
            iteration,
            bandwidth: kernel.bandwidth,
            bandwidth_floored: kernel.floored,
            max_change,
            direction_rms: rms(&direction),
            step_size_rms: self.step_size.rms_step_size(),
            elapsed: start_time.elapsed(),
        };
        log::trace!("{:?}", progress);

        self.completed += 1;
        let completed = self.completed;
        let termination = if completed >= self.settings.num_iterations {
            Some(Termination::Completed)
        } else if self.settings.tolerance.is_some_and(|tol| max_change < tol) {
            Some(Termination::Converged)
        } else if self
            .settings
            .max_duration
            .is_some_and(|budget| progress.elapsed >= budget)
        {
            Some(Termination::DeadlineReached)
        } else {
            None
        };
        if let Some(termination) = termination {
            log::debug!(
                "SVGD stopped after {} iterations ({:?}), final bandwidth {}",
                completed,
                termination,
                kernel.bandwidth
            );
        }
        self.termination = termination;
        self.last_progress = Some(progress.clone());
        Ok(progress)
    }

    /// Iterate until the run is done and return the final particles.
    pub fn run(mut self) -> Result<SvgdOutput> {
        while self.termination.is_none() {
            self.step()?;
        }
        let termination = self.termination.unwrap_or(Termination::Completed);
        Ok(SvgdOutput {
            iterations: self.completed_iterations(),
            particles: self.particles,
            termination,
            last_progress: self.last_progress,
        })
    }

    pub fn into_particles(self) -> Mat<f64> {
        self.particles
    }
}

/// Transport `particles` towards the target with full control over the
/// settings.
///
/// The caller's matrix is not modified.
pub fn run<F: ScoreFunc>(
    particles: MatRef<'_, f64>,
    score: F,
    settings: &SvgdSettings,
) -> Result<SvgdOutput> {
    Svgd::new(particles, score, *settings)?.run()
}

/// Transport `particles` towards the target for exactly `num_iterations`
/// iterations with AdaGrad step sizes based on `step_size`.
///
/// Returns a new matrix of the same shape. The score function is called
/// once per iteration.
pub fn update<F: ScoreFunc>(
    particles: MatRef<'_, f64>,
    score: F,
    num_iterations: u64,
    step_size: f64,
) -> Result<Mat<f64>> {
    let settings = SvgdSettings {
        num_iterations,
        step_size: StepSizeOptions {
            base_step_size: step_size,
            ..Default::default()
        },
        ..Default::default()
    };
    Ok(run(particles, score, &settings)?.particles)
}
