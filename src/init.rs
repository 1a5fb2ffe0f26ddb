use faer::Mat;
use rand::Rng;

/// Draw `num_particles` initial positions from `N(centre, scale² · I)`.
///
/// Draws are taken particle by particle, so the first rows agree for
/// different `num_particles` and the same seed.
pub fn normal_particles<R: Rng + ?Sized>(
    rng: &mut R,
    num_particles: usize,
    centre: &[f64],
    scale: f64,
) -> Mat<f64> {
    let dim = centre.len();
    let dist = rand_distr::StandardNormal;
    let draws: Vec<f64> = (0..num_particles * dim)
        .map(|idx| {
            let norm: f64 = rng.sample(dist);
            centre[idx % dim] + scale * norm
        })
        .collect();
    Mat::from_fn(num_particles, dim, |i, k| draws[i * dim + k])
}
