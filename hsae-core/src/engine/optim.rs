//! Optimisers and learning-rate schedules.

use crate::engine::graph::Gradients;
use crate::engine::params::{ParamId, ParamStore};
use crate::error::{AeError, Result};
use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizerMethod {
    #[serde(rename = "Adam", alias = "adam")]
    Adam,
    #[serde(rename = "SGD", alias = "sgd", alias = "GradientDescent")]
    Sgd,
    #[serde(rename = "Momentum", alias = "momentum")]
    Momentum,
    #[serde(rename = "RMSProp", alias = "rmsprop")]
    RmsProp,
}

/// Learning rate as a function of the number of completed epochs.
#[derive(Debug, Clone, PartialEq)]
pub enum LearningRateSchedule {
    Constant(f64),
    /// Staircase exponential decay: `base * rate^(epoch / steps)`.
    StepDecay {
        base: f64,
        decay_steps: usize,
        decay_rate: f64,
    },
    /// `base` until the first bound is passed, then `values[i]` while the
    /// epoch lies in `(bounds[i], bounds[i + 1]]`.
    Piecewise {
        base: f64,
        bounds: Vec<usize>,
        values: Vec<f64>,
    },
}

impl LearningRateSchedule {
    /// Build a schedule from the loose set of options a train op accepts.
    pub fn from_options(
        learning_rate: f64,
        decay_steps: Option<usize>,
        decay_rate: Option<f64>,
        piecewise_bounds: Option<&[usize]>,
        piecewise_values: Option<&[f64]>,
    ) -> Result<Self> {
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(AeError::config(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }
        let step = match (decay_steps, decay_rate) {
            (None, None) => None,
            (Some(0), _) => return Err(AeError::config("decay_steps must be at least 1")),
            (Some(steps), Some(rate)) => Some((steps, rate)),
            _ => {
                return Err(AeError::config(
                    "decay_steps and decay_rate must be given together",
                ));
            }
        };
        let piecewise = match (piecewise_bounds, piecewise_values) {
            (None, None) => None,
            (Some(bounds), Some(values)) => {
                if bounds.len() != values.len() {
                    return Err(AeError::config(format!(
                        "piecewise_bounds has {} entries but piecewise_values has {}",
                        bounds.len(),
                        values.len()
                    )));
                }
                if bounds.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(AeError::config("piecewise_bounds must be strictly increasing"));
                }
                Some((bounds.to_vec(), values.to_vec()))
            }
            _ => {
                return Err(AeError::config(
                    "piecewise_bounds and piecewise_values must be given together",
                ));
            }
        };
        match (step, piecewise) {
            (Some(_), Some(_)) => Err(AeError::config(
                "step decay and piecewise schedule are alternatives; give only one",
            )),
            (Some((decay_steps, decay_rate)), None) => Ok(Self::StepDecay {
                base: learning_rate,
                decay_steps,
                decay_rate,
            }),
            (None, Some((bounds, values))) => Ok(Self::Piecewise {
                base: learning_rate,
                bounds,
                values,
            }),
            (None, None) => Ok(Self::Constant(learning_rate)),
        }
    }

    pub fn rate(&self, epoch: usize) -> f64 {
        match self {
            Self::Constant(rate) => *rate,
            Self::StepDecay {
                base,
                decay_steps,
                decay_rate,
            } => base * decay_rate.powi((epoch / decay_steps) as i32),
            Self::Piecewise {
                base,
                bounds,
                values,
            } => bounds
                .iter()
                .rposition(|&bound| epoch > bound)
                .map_or(*base, |i| values[i]),
        }
    }
}

const MOMENTUM: f32 = 0.9;
const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-8;
const RMS_DECAY: f32 = 0.9;
const RMS_EPS: f32 = 1e-10;

/// Per-parameter optimiser state.
#[derive(Debug, Clone)]
struct Slots {
    first: ArrayD<f32>,
    second: ArrayD<f32>,
}

#[derive(Debug, Clone)]
pub struct Optimizer {
    method: OptimizerMethod,
    slots: HashMap<ParamId, Slots>,
    steps: u64,
}

impl Optimizer {
    pub fn new(method: OptimizerMethod) -> Self {
        Self {
            method,
            slots: HashMap::new(),
            steps: 0,
        }
    }

    pub fn method(&self) -> OptimizerMethod {
        self.method
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Apply one update to every parameter that received a gradient.
    pub fn apply(&mut self, params: &mut ParamStore, grads: &Gradients, learning_rate: f64) -> Result<()> {
        self.steps += 1;
        let lr = learning_rate as f32;
        let t = self.steps as i32;
        for (id, grad) in grads.iter() {
            let value = params.value_mut(id)?;
            if value.shape() != grad.shape() {
                return Err(AeError::shape_mismatch(format!(
                    "gradient {:?} does not match parameter {:?}",
                    grad.shape(),
                    value.shape()
                )));
            }
            let slots = self.slots.entry(id).or_insert_with(|| Slots {
                first: ArrayD::zeros(value.raw_dim()),
                second: ArrayD::zeros(value.raw_dim()),
            });
            match self.method {
                OptimizerMethod::Sgd => value.scaled_add(-lr, grad),
                OptimizerMethod::Momentum => {
                    Zip::from(&mut slots.first).and(grad).for_each(|v, &g| {
                        *v = MOMENTUM * *v + g;
                    });
                    value.scaled_add(-lr, &slots.first);
                }
                OptimizerMethod::RmsProp => {
                    Zip::from(value)
                        .and(&mut slots.second)
                        .and(grad)
                        .for_each(|w, ms, &g| {
                            *ms = RMS_DECAY * *ms + (1.0 - RMS_DECAY) * g * g;
                            *w -= lr * g / (*ms + RMS_EPS).sqrt();
                        });
                }
                OptimizerMethod::Adam => {
                    let correction = (1.0 - BETA2.powi(t)).sqrt() / (1.0 - BETA1.powi(t));
                    Zip::from(value)
                        .and(&mut slots.first)
                        .and(&mut slots.second)
                        .and(grad)
                        .for_each(|w, m, v, &g| {
                            *m = BETA1 * *m + (1.0 - BETA1) * g;
                            *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                            *w -= lr * correction * *m / (v.sqrt() + ADAM_EPS);
                        });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_step_decay_is_staircase() {
        let schedule =
            LearningRateSchedule::from_options(0.1, Some(10), Some(0.5), None, None).unwrap();
        assert_eq!(schedule.rate(0), 0.1);
        assert_eq!(schedule.rate(9), 0.1);
        assert_eq!(schedule.rate(10), 0.05);
        assert_eq!(schedule.rate(25), 0.025);
    }

    #[test]
    fn test_piecewise_prepends_base_rate() {
        let schedule = LearningRateSchedule::from_options(
            1e-3,
            None,
            None,
            Some(&[100, 200]),
            Some(&[1e-4, 1e-5]),
        )
        .unwrap();
        assert_eq!(schedule.rate(0), 1e-3);
        assert_eq!(schedule.rate(100), 1e-3);
        assert_eq!(schedule.rate(101), 1e-4);
        assert_eq!(schedule.rate(500), 1e-5);
    }

    #[test]
    fn test_schedules_are_exclusive() {
        let err = LearningRateSchedule::from_options(
            1e-3,
            Some(10),
            Some(0.9),
            Some(&[5]),
            Some(&[1e-4]),
        )
        .unwrap_err();
        assert!(matches!(err, AeError::Config(_)));
        assert!(LearningRateSchedule::from_options(1e-3, None, None, Some(&[5]), None).is_err());
        assert!(LearningRateSchedule::from_options(1e-3, Some(3), None, None, None).is_err());
    }

    #[test]
    fn test_every_method_descends() {
        for method in [
            OptimizerMethod::Sgd,
            OptimizerMethod::Momentum,
            OptimizerMethod::RmsProp,
            OptimizerMethod::Adam,
        ] {
            let mut params = ParamStore::new();
            let id = params
                .insert("w", ArrayD::from_elem(IxDyn(&[2]), 1.0))
                .unwrap();
            let mut grads = Gradients::default();
            grads.accumulate(id, ArrayD::from_elem(IxDyn(&[2]), 0.5));
            let mut optimizer = Optimizer::new(method);
            optimizer.apply(&mut params, &grads, 0.01).unwrap();
            let value = params.value(id).unwrap();
            assert!(value.iter().all(|&v| v < 1.0), "{method:?} did not descend");
            assert_eq!(optimizer.steps(), 1);
        }
    }
}
