use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// clamp limits x to the closed interval [lo, hi].
pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    lo.max(hi.min(x))
}

/// uniform_jitter draws a value from the uniform distribution on [-half_width, half_width].
pub fn uniform_jitter<R: Rng + ?Sized>(half_width: f64, rng: &mut R) -> f64 {
    let half_width = half_width.abs();
    Uniform::new_inclusive(-half_width, half_width).sample(rng)
}

/// random_walk moves value by a symmetric uniform step of at most `step` and clamps the result
/// to [lo, hi].
pub fn random_walk<R: Rng + ?Sized>(value: f64, step: f64, lo: f64, hi: f64, rng: &mut R) -> f64 {
    clamp(value + uniform_jitter(step, rng), lo, hi)
}

/// argsort returns the indices that would sort x in ascending order. The sort is stable, i.e.
/// equal values keep their relative input order.
pub fn argsort(x: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..x.len()).collect();
    indices.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
    indices
}
