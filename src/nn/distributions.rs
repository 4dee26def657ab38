//! Batched categorical and normal distributions with a seedable host sampler.
//!
//! Densities, log-probabilities and entropies stay on the tensor side so they
//! remain differentiable. Draws are made on the host from a [`Sampler`], which
//! keeps the random stream reproducible from a single seed regardless of the
//! compute device.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tch::{Device, Kind, Tensor};

use crate::error::Result;

/// Seeded source of the uniform and Gaussian variates used for sampling.
#[derive(Debug, Clone)]
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Restarts the random stream.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Draws one index per row of a `(batch, k)` probability matrix by
    /// inverse-CDF lookup. Zero-probability and NaN entries are never drawn.
    pub fn categorical(&mut self, probs: &Tensor) -> Result<Vec<i64>> {
        let k = probs.size()[1] as usize;
        let host = Vec::<f32>::try_from(&probs.detach().to_device(Device::Cpu).reshape([-1]))?;
        let draws = host
            .chunks(k.max(1))
            .map(|row| {
                let u: f32 = self.rng.gen();
                let mut cumulative = 0.0f32;
                let mut last_valid = 0usize;
                for (i, &p) in row.iter().enumerate() {
                    if p.is_nan() || p <= 0.0 {
                        continue;
                    }
                    last_valid = i;
                    cumulative += p;
                    if u < cumulative {
                        return i as i64;
                    }
                }
                // Rounding left the row sum slightly under `u`.
                last_valid as i64
            })
            .collect();
        Ok(draws)
    }

    /// `n` standard normal variates.
    pub fn standard_normal(&mut self, n: usize) -> Vec<f32> {
        (0..n).map(|_| self.rng.sample(StandardNormal)).collect()
    }
}

/// Categorical distribution over the last dimension of a `(batch, k)` tensor.
#[derive(Debug)]
pub struct Categorical {
    probs: Tensor,
    log_probs: Tensor,
}

impl Categorical {
    /// From probabilities that may contain exact zeros (masked entries).
    pub fn from_probs(probs: Tensor) -> Self {
        let tiny = f64::from(f32::MIN_POSITIVE);
        let log_probs = probs.clamp_min(tiny).log();
        Self { probs, log_probs }
    }

    /// From unnormalised logits.
    pub fn from_logits(logits: &Tensor) -> Self {
        Self {
            probs: logits.softmax(-1, Kind::Float),
            log_probs: logits.log_softmax(-1, Kind::Float),
        }
    }

    /// `(batch, 1)` log-probability of `(batch, 1)` integer choices.
    pub fn log_prob(&self, choices: &Tensor) -> Tensor {
        self.log_probs.gather(-1, choices, false)
    }

    /// `(batch, 1)` entropy; zero-probability entries contribute nothing.
    pub fn entropy(&self) -> Tensor {
        -(&self.probs * &self.log_probs).sum_dim_intlist([-1].as_slice(), true, Kind::Float)
    }

    /// `(batch, 1)` most likely choice.
    pub fn mode(&self) -> Tensor {
        self.probs.argmax(-1, true)
    }

    /// `(batch, 1)` random choice.
    pub fn sample(&self, sampler: &mut Sampler) -> Result<Tensor> {
        let draws = sampler.categorical(&self.probs)?;
        Ok(Tensor::from_slice(&draws)
            .view([-1, 1])
            .to_device(self.probs.device()))
    }
}

/// Independent normal distribution per row.
#[derive(Debug)]
pub struct Normal {
    mean: Tensor,
    std: Tensor,
}

impl Normal {
    /// `mean` is `(batch, 1)`; `std` broadcasts against it.
    pub fn new(mean: Tensor, std: Tensor) -> Self {
        Self { mean, std }
    }

    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    pub fn log_prob(&self, value: &Tensor) -> Tensor {
        let var = self.std.square();
        let half_log_two_pi = 0.5 * (2.0 * std::f64::consts::PI).ln();
        -(value - &self.mean).square() / (var * 2.0) - self.std.log() - half_log_two_pi
    }

    pub fn entropy(&self) -> Tensor {
        let constant = 0.5 + 0.5 * (2.0 * std::f64::consts::PI).ln();
        (self.std.log() + constant) * self.mean.ones_like()
    }

    /// `mean + std · ε` with `ε` drawn from the sampler.
    pub fn sample(&self, sampler: &mut Sampler) -> Tensor {
        let n = self.mean.numel();
        let eps = Tensor::from_slice(&sampler.standard_normal(n))
            .view(self.mean.size().as_slice())
            .to_device(self.mean.device());
        (&self.mean + &self.std * eps).detach()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::ops::masked_softmax;

    fn scalar(t: &Tensor) -> f64 {
        t.double_value(&[])
    }

    #[test]
    fn categorical_never_samples_masked_entries() {
        let logits = Tensor::from_slice(&[0.0f32, 3.0, 0.0, 0.0, 0.0, 0.0]).view([2, 3]);
        let mask = Tensor::from_slice(&[1i64, 0, 1, 0, 1, 0]).view([2, 3]);
        let dist = Categorical::from_probs(masked_softmax(&logits, &mask));
        let mut sampler = Sampler::new(7);
        for _ in 0..200 {
            let draws = Vec::<i64>::try_from(&dist.sample(&mut sampler).unwrap().view([-1])).unwrap();
            assert_ne!(draws[0], 1);
            assert_eq!(draws[1], 1);
        }
    }

    #[test]
    fn sampler_skips_non_finite_entries() {
        let probs = Tensor::from_slice(&[f32::NAN, 1.0, 0.0]).view([1, 3]);
        let mut sampler = Sampler::new(5);
        for _ in 0..50 {
            assert_eq!(sampler.categorical(&probs).unwrap(), vec![1]);
        }
    }

    #[test]
    fn sampling_is_reproducible_from_seed() {
        let probs = Tensor::from_slice(&[0.2f32, 0.3, 0.5]).view([1, 3]).repeat([16, 1]);
        let mut a = Sampler::new(42);
        let mut b = Sampler::new(42);
        assert_eq!(a.categorical(&probs).unwrap(), b.categorical(&probs).unwrap());
        assert_eq!(a.standard_normal(8), b.standard_normal(8));
    }

    #[test]
    fn masked_entries_add_no_entropy() {
        let dist = Categorical::from_probs(Tensor::from_slice(&[0.5f32, 0.5, 0.0]).view([1, 3]));
        let expected = std::f64::consts::LN_2;
        assert!((scalar(&dist.entropy().view([-1]).get(0)) - expected).abs() < 1e-6);
    }

    #[test]
    fn categorical_log_prob_and_mode() {
        let dist = Categorical::from_logits(&Tensor::from_slice(&[0.0f32, 1.0]).view([1, 2]));
        let choice = Tensor::from_slice(&[1i64]).view([1, 1]);
        let p1 = 1.0f64.exp() / (1.0 + 1.0f64.exp());
        assert!((scalar(&dist.log_prob(&choice).view([-1]).get(0)) - p1.ln()).abs() < 1e-6);
        assert_eq!(Vec::<i64>::try_from(&dist.mode().view([-1])).unwrap(), vec![1]);
    }

    #[test]
    fn normal_log_prob_and_entropy() {
        let dist = Normal::new(
            Tensor::from_slice(&[1.0f32]).view([1, 1]),
            Tensor::from_slice(&[2.0f32]),
        );
        let x = Tensor::from_slice(&[2.0f32]).view([1, 1]);
        let two_pi = 2.0 * std::f64::consts::PI;
        let expected = -0.125 - 2.0f64.ln() - 0.5 * two_pi.ln();
        assert!((scalar(&dist.log_prob(&x).view([-1]).get(0)) - expected).abs() < 1e-5);
        let entropy = 0.5 + 0.5 * two_pi.ln() + 2.0f64.ln();
        assert!((scalar(&dist.entropy().view([-1]).get(0)) - entropy).abs() < 1e-5);
        assert_eq!(dist.entropy().size(), vec![1, 1]);
    }

    #[test]
    fn normal_sample_has_mean_shape() {
        let dist = Normal::new(
            Tensor::zeros([4, 1], (Kind::Float, Device::Cpu)),
            Tensor::from_slice(&[0.1f32]),
        );
        let mut sampler = Sampler::new(1);
        let x = dist.sample(&mut sampler);
        assert_eq!(x.size(), vec![4, 1]);
        assert!(x.abs().max().double_value(&[]) < 1.0);
    }
}
