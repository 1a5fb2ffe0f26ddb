//! Stein variational gradient descent.
//!
//! A set of particles is transported towards a target distribution that is
//! only known through the gradient of its log density, the score. In every
//! iteration each particle moves along
//!
//! ```text
//! φ(x_i) = 1/n Σ_j [ k(x_j, x_i) ∇ log p(x_j) + ∇_{x_j} k(x_j, x_i) ]
//! ```
//!
//! where `k` is an RBF kernel whose bandwidth follows the spread of the
//! particles. The first term pulls particles towards high density, the
//! second keeps them apart. Steps are scaled per coordinate with AdaGrad.
//!
//! ```
//! use faer::Mat;
//! use svgd_rs::{targets::IsotropicNormal, update, PerParticle};
//!
//! let start = Mat::from_fn(20, 1, |i, _| -3. + 0.1 * i as f64);
//! let target = IsotropicNormal::new(vec![1.], 1.).unwrap();
//! let particles = update(start.as_ref(), PerParticle::new(target), 500, 0.5).unwrap();
//! assert_eq!(particles.nrows(), 20);
//! ```

pub mod diagnostics;
pub mod init;
pub(crate) mod kernel;
pub(crate) mod math;
pub(crate) mod score;
pub(crate) mod stepsize;
pub(crate) mod svgd;
pub mod targets;

pub use kernel::{Bandwidth, KernelEval, KernelOptions, RbfKernel};
pub use score::{FnScore, ParticleScore, PerParticle, ScoreFunc};
pub use stepsize::{Accumulation, StepSizeOptions};
pub use svgd::{
    run, stein_direction, update, Progress, Result, RunState, Svgd, SvgdError, SvgdOutput,
    SvgdSettings, Termination,
};
