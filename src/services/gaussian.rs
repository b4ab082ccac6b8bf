use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// Source of uniform variates in `[0, 1)`.
pub trait UniformSource {
    fn next_uniform(&mut self) -> f64;
}

impl<F> UniformSource for F
where
    F: FnMut() -> f64,
{
    fn next_uniform(&mut self) -> f64 {
        self()
    }
}

/// Adapts any `rand` generator to a `UniformSource`.
pub struct RandSource<R: Rng>(pub R);

impl<R: Rng> UniformSource for RandSource<R> {
    fn next_uniform(&mut self) -> f64 {
        self.0.gen::<f64>()
    }
}

impl RandSource<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        RandSource(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        RandSource(StdRng::from_entropy())
    }
}

/// Box-Muller normal generator.
///
/// Each transform yields two independent standard normals; the second is held
/// in `cached` and handed out by the next call.
pub struct GaussianSampler<U: UniformSource> {
    uniform: U,
    cached: Option<f64>,
}

impl<U: UniformSource> GaussianSampler<U> {
    pub fn new(uniform: U) -> Self {
        Self {
            uniform,
            cached: None,
        }
    }

    pub fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached.take() {
            return z;
        }
        let theta = 2.0 * PI * self.uniform.next_uniform();
        let rho = (-2.0 * (1.0 - self.uniform.next_uniform()).ln()).sqrt();
        self.cached = Some(rho * theta.sin());
        rho * theta.cos()
    }

    pub fn sample(&mut self, mean: f64, stddev: f64) -> f64 {
        mean + stddev * self.standard_normal()
    }

    pub fn has_cached(&self) -> bool {
        self.cached.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_draw_comes_from_cache() {
        let mut calls = 0;
        let mut sampler = GaussianSampler::new(|| {
            calls += 1;
            0.25
        });

        let first = sampler.standard_normal();
        assert!(sampler.has_cached());
        let second = sampler.standard_normal();
        assert!(!sampler.has_cached());
        drop(sampler);

        // theta = pi/2, rho = sqrt(-2 ln 0.75)
        let rho = (-2.0 * 0.75_f64.ln()).sqrt();
        assert!(first.abs() < 1e-12);
        assert!((second - rho).abs() < 1e-12);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_sample_scales_and_shifts() {
        let mut sampler = GaussianSampler::new(|| 0.0);
        // theta = 0, rho = 0 → every draw is the mean
        assert_eq!(sampler.sample(70.0, 5.0), 70.0);
    }

    #[test]
    fn test_seeded_draws_look_standard() {
        let mut sampler = GaussianSampler::new(RandSource::seeded(7));
        let draws: Vec<f64> = (0..20_000).map(|_| sampler.standard_normal()).collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / draws.len() as f64;
        assert!(mean.abs() < 0.05);
        assert!((var - 1.0).abs() < 0.05);
    }
}
