//! Weight initialisation schemes.

use crate::error::{AeError, Result};
use ndarray::{ArrayD, IxDyn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

/// Named initialisation method for weights and biases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightInit {
    /// `N(0, std)`.
    Gaussian,
    /// `N(0, std)` with draws beyond two standard deviations re-sampled.
    TruncatedNormal,
    /// Glorot uniform: `U(-l, l)` with `l = sqrt(6 / (fan_in + fan_out))`.
    Xavier,
    /// He normal: `N(0, sqrt(2 / fan_in))`.
    XavierImproved,
}

/// Random source plus the configured scheme.
pub struct Initializer {
    method: WeightInit,
    std: f32,
    rng: StdRng,
}

impl Initializer {
    pub fn new(method: WeightInit, std: f32, seed: Option<u64>) -> Result<Self> {
        if !(std.is_finite() && std > 0.0) {
            return Err(AeError::config(format!(
                "weight standard deviation must be positive, got {std}"
            )));
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self { method, std, rng })
    }

    pub fn method(&self) -> WeightInit {
        self.method
    }

    /// Draw a tensor of `shape`.
    ///
    /// The last axis is the fan-out and the product of the others the fan-in.
    /// One-dimensional shapes (biases) always draw from `N(0, std)`.
    pub fn sample(&mut self, shape: &[usize]) -> Result<ArrayD<f32>> {
        let len: usize = shape.iter().product();
        let (fan_in, fan_out) = fans(shape);
        let std = self.std;
        let values: Vec<f32> = match (self.method, shape.len()) {
            (_, 0 | 1) | (WeightInit::Gaussian, _) => {
                let normal = normal(std)?;
                (0..len).map(|_| normal.sample(&mut self.rng)).collect()
            }
            (WeightInit::TruncatedNormal, _) => {
                let normal = normal(std)?;
                (0..len)
                    .map(|_| truncated(&normal, std, &mut self.rng))
                    .collect()
            }
            (WeightInit::Xavier, _) => {
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                let uniform = Uniform::new_inclusive(-limit, limit);
                (0..len).map(|_| uniform.sample(&mut self.rng)).collect()
            }
            (WeightInit::XavierImproved, _) => {
                let normal = normal((2.0 / fan_in as f32).sqrt())?;
                (0..len).map(|_| normal.sample(&mut self.rng)).collect()
            }
        };
        Ok(ArrayD::from_shape_vec(IxDyn(shape), values)?)
    }
}

fn fans(shape: &[usize]) -> (usize, usize) {
    match shape.split_last() {
        Some((&out, rest)) if !rest.is_empty() => {
            (rest.iter().product::<usize>().max(1), out.max(1))
        }
        Some((&out, _)) => (out.max(1), out.max(1)),
        None => (1, 1),
    }
}

fn normal(std: f32) -> Result<Normal<f32>> {
    Normal::new(0.0, std).map_err(|e| AeError::config(format!("invalid normal std {std}: {e}")))
}

fn truncated(normal: &Normal<f32>, std: f32, rng: &mut StdRng) -> f32 {
    loop {
        let v = normal.sample(rng);
        if v.abs() <= 2.0 * std {
            return v;
        }
    }
}
