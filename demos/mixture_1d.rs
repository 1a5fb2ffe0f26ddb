//! Transport ten particles from around −10 to a two component mixture and
//! compare a density estimate of the result with the target.

use anyhow::Result;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use svgd_rs::{
    diagnostics::{fraction_nearest, mean, variance, GaussianKde},
    init::normal_particles,
    run,
    targets::{GaussianMixture, MixtureComponent},
    Accumulation, PerParticle, StepSizeOptions, SvgdSettings,
};

fn main() -> Result<()> {
    let target = GaussianMixture::new([
        MixtureComponent::new(1. / 3., vec![-2.], 1.),
        MixtureComponent::new(2. / 3., vec![2.], 1.),
    ])?;

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let start = normal_particles(&mut rng, 10, &[-10.], 1.);

    let settings = SvgdSettings {
        num_iterations: 2000,
        step_size: StepSizeOptions {
            base_step_size: 0.1,
            accumulation: Accumulation::RmsProp { alpha: 0.9 },
            ..Default::default()
        },
        ..Default::default()
    };
    let output = run(start.as_ref(), PerParticle::new(target.clone()), &settings)?;
    let particles = output.particles.as_ref();

    println!(
        "{} iterations ({:?})",
        output.iterations, output.termination
    );
    if let Some(progress) = output.last_progress.as_ref() {
        println!(
            "final bandwidth {:.4}, largest change {:.2e}, took {:?}",
            progress.bandwidth, progress.max_change, progress.elapsed
        );
    }
    println!(
        "mean before {:.3}, after {:.3}",
        mean(start.as_ref())[0],
        mean(particles)[0]
    );
    println!("variance after {:.3}", variance(particles)[0]);
    let fractions = fraction_nearest(particles, &[&[-2.], &[2.]]);
    println!(
        "near -2: {:.2}, near +2: {:.2} (target 0.33 / 0.67)",
        fractions[0], fractions[1]
    );

    let mut sorted: Vec<f64> = (0..particles.nrows()).map(|i| particles[(i, 0)]).collect();
    sorted.sort_by(f64::total_cmp);
    println!("particles: {:.3?}", sorted);

    let kde = GaussianKde::new(particles)?;
    println!("\n{:>6} {:>8} {:>8}", "x", "kde", "target");
    for step in 0..=24 {
        let x = -6. + 0.5 * step as f64;
        println!(
            "{:>6.2} {:>8.4} {:>8.4}",
            x,
            kde.density(&[x]),
            target.density(&[x])
        );
    }
    Ok(())
}
