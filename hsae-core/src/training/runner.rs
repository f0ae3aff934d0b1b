//! Mini-batch epoch loop.

use crate::engine::checkpoint;
use crate::engine::params::ParamStore;
use crate::error::{AeError, Result};
use crate::network::assemble::NetworkGraph;
use crate::network::train_op::TrainOp;
use crate::training::dataset::Dataset;
use crate::training::metrics::TrainingMetrics;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Options of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainConfig {
    pub n_epochs: usize,
    /// Directory receiving `epoch_<n>` checkpoints.
    pub save_addr: Option<PathBuf>,
    /// Log the training loss every this many epochs; 0 disables.
    pub visualise_rate_train: usize,
    /// Log the validation loss every this many epochs; 0 disables.
    pub visualise_rate_val: usize,
    /// Epochs (counted from 1) after which a checkpoint is written.
    pub save_epochs: Vec<usize>,
    pub batch_size: usize,
    pub shuffle: bool,
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            n_epochs: 1000,
            save_addr: None,
            visualise_rate_train: 0,
            visualise_rate_val: 0,
            save_epochs: vec![1000],
            batch_size: 100,
            shuffle: true,
            seed: None,
        }
    }
}

impl TrainConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(AeError::config("batchSize must be at least 1"));
        }
        if self.save_addr.is_none() && self.save_epochs.iter().any(|&e| e <= self.n_epochs) {
            return Err(AeError::config("saveEpochs requires saveAddr"));
        }
        Ok(())
    }
}

/// Checkpoint address for `epoch` under `save_addr`.
pub fn epoch_addr(save_addr: &Path, epoch: usize) -> PathBuf {
    save_addr.join(format!("epoch_{epoch}"))
}

/// Train `params` in place with `op` for `config.n_epochs` epochs.
pub fn run(
    net: &NetworkGraph,
    params: &mut ParamStore,
    op: &mut TrainOp,
    data_train: &Dataset,
    data_val: Option<&Dataset>,
    config: &TrainConfig,
) -> Result<TrainingMetrics> {
    config.validate()?;
    if data_train.is_empty() {
        return Err(AeError::training("training data is empty"));
    }
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let started = Instant::now();
    let mut metrics = TrainingMetrics::default();
    info!(
        op = op.name(),
        epochs = config.n_epochs,
        samples = data_train.len(),
        batch_size = config.batch_size,
        "Training started"
    );

    for epoch in 1..=config.n_epochs {
        let learning_rate = op.learning_rate(epoch - 1);
        let batches = if config.shuffle {
            data_train.shuffled_batches(config.batch_size, &mut rng)?
        } else {
            data_train.batches(config.batch_size)?
        };
        let mut weighted = 0.0f64;
        for batch in batches {
            let step = op.step(
                net,
                params,
                batch.inputs.view(),
                batch.targets.view(),
                epoch - 1,
            )?;
            if !step.total.is_finite() {
                warn!(epoch, loss = step.total, "Non-finite loss");
                return Err(AeError::training(format!(
                    "loss became {} at epoch {epoch}",
                    step.total
                )));
            }
            weighted += f64::from(step.loss) * batch.len() as f64;
        }
        let loss = weighted / data_train.len() as f64;

        let val_loss = match data_val {
            Some(val) if !val.is_empty() => Some(evaluate(net, params, op, val, config.batch_size)?),
            _ => None,
        };
        metrics.record_epoch(loss, val_loss, learning_rate);

        if config.visualise_rate_train > 0 && epoch % config.visualise_rate_train == 0 {
            info!(epoch, loss, learning_rate, "Training loss");
        }
        if let Some(val_loss) = val_loss {
            if config.visualise_rate_val > 0 && epoch % config.visualise_rate_val == 0 {
                info!(epoch, val_loss, "Validation loss");
            }
        }
        if config.save_epochs.contains(&epoch) {
            if let Some(save_addr) = &config.save_addr {
                let addr = epoch_addr(save_addr, epoch);
                checkpoint::save(&addr, params, epoch, Some(loss))?;
                info!(epoch, addr = %addr.display(), "Checkpoint saved");
            }
        }
        debug!(epoch, loss, ?val_loss, "Epoch finished");
    }

    metrics.total_training_time_secs = started.elapsed().as_secs_f64();
    info!(
        op = op.name(),
        epochs = metrics.epochs_completed,
        best_epoch = ?metrics.best_epoch,
        best_loss = ?metrics.best_loss,
        "Training finished"
    );
    Ok(metrics)
}

/// Sample-weighted mean reconstruction loss over `data`.
pub fn evaluate(
    net: &NetworkGraph,
    params: &ParamStore,
    op: &TrainOp,
    data: &Dataset,
    batch_size: usize,
) -> Result<f64> {
    let mut weighted = 0.0f64;
    for batch in data.batches(batch_size)? {
        let loss = op.evaluate(net, params, batch.inputs.view(), batch.targets.view())?;
        weighted += f64::from(loss) * batch.len() as f64;
    }
    Ok(weighted / data.len().max(1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::init::{Initializer, WeightInit};
    use crate::engine::loss::LossKind;
    use crate::engine::ops::Activation;
    use crate::network::assemble::{AssemblyOptions, assemble};
    use crate::network::params::allocate;
    use crate::network::shape::plan_mlp;
    use crate::network::train_op::TrainOpConfig;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn setup(config: TrainOpConfig) -> (NetworkGraph, ParamStore, TrainOp) {
        let plan = plan_mlp(Some(8), &[4, 2]).unwrap();
        let mut init = Initializer::new(WeightInit::Xavier, 0.1, Some(2)).unwrap();
        let mut store = ParamStore::new();
        let (table, decay) = allocate(&plan, None, &mut init, &mut store).unwrap();
        let options = AssemblyOptions {
            activation: Activation::Sigmoid,
            activation_final: Activation::Linear,
            skip_connect: false,
        };
        let mut net = assemble(&plan, &table, &store, options).unwrap();
        let config = TrainOpConfig {
            loss_func: config.loss_func.or(Some(LossKind::Sse)),
            ..config
        };
        let op = TrainOp::bind(&mut net, &decay, "train", config).unwrap();
        (net, store, op)
    }

    fn spectra(n: usize) -> Dataset {
        Dataset::new(Array2::from_shape_fn((n, 8), |(i, j)| {
            let peak = (i % 3) as f32 * 2.0 + 1.0;
            (-((j as f32 - peak).powi(2)) / 4.0).exp()
        }))
    }

    #[test]
    fn test_training_reduces_loss_and_saves() {
        let (net, mut store, mut op) = setup(TrainOpConfig {
            learning_rate: 0.02,
            ..TrainOpConfig::default()
        });
        let dir = TempDir::new().unwrap();
        let config = TrainConfig {
            n_epochs: 60,
            save_addr: Some(dir.path().to_path_buf()),
            save_epochs: vec![10, 60],
            batch_size: 4,
            seed: Some(9),
            visualise_rate_train: 20,
            ..TrainConfig::default()
        };
        let val = spectra(6);
        let metrics = run(&net, &mut store, &mut op, &spectra(12), Some(&val), &config).unwrap();
        assert_eq!(metrics.epochs_completed, 60);
        assert_eq!(metrics.val_loss_history.len(), 60);
        assert!(metrics.loss_history[59] < metrics.loss_history[0]);
        assert!(epoch_addr(dir.path(), 10).join(checkpoint::MANIFEST_FILE).exists());
        assert!(epoch_addr(dir.path(), 60).join(checkpoint::PARAMS_FILE).exists());
        assert!(!epoch_addr(dir.path(), 30).exists());
    }

    #[test]
    fn test_save_epochs_need_an_address() {
        let (net, mut store, mut op) = setup(TrainOpConfig::default());
        let config = TrainConfig {
            n_epochs: 2,
            save_epochs: vec![1],
            ..TrainConfig::default()
        };
        let err = run(&net, &mut store, &mut op, &spectra(4), None, &config).unwrap_err();
        assert!(matches!(err, AeError::Config(_)));
    }

    #[test]
    fn test_divergence_stops_training() {
        let (net, mut store, mut op) = setup(TrainOpConfig {
            learning_rate: 1e30,
            method: crate::engine::optim::OptimizerMethod::Sgd,
            ..TrainOpConfig::default()
        });
        let config = TrainConfig {
            n_epochs: 50,
            save_epochs: Vec::new(),
            batch_size: 12,
            shuffle: false,
            ..TrainConfig::default()
        };
        let err = run(&net, &mut store, &mut op, &spectra(12), None, &config).unwrap_err();
        assert!(matches!(err, AeError::Training(_)));
    }

    #[test]
    fn test_empty_training_data() {
        let (net, mut store, mut op) = setup(TrainOpConfig::default());
        let config = TrainConfig {
            save_epochs: Vec::new(),
            ..TrainConfig::default()
        };
        let empty = Dataset::new(Array2::zeros((0, 8)));
        let err = run(&net, &mut store, &mut op, &empty, None, &config).unwrap_err();
        assert!(matches!(err, AeError::Training(_)));
    }
}
