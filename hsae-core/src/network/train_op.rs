//! Named (loss, optimiser) pairs bound to a network graph.

use crate::engine::graph::{Feeds, NodeId};
use crate::engine::loss::LossKind;
use crate::engine::optim::{LearningRateSchedule, Optimizer, OptimizerMethod};
use crate::engine::params::ParamStore;
use crate::error::{AeError, Result};
use crate::network::assemble::NetworkGraph;
use crate::network::autoencoder::NetworkKind;
use crate::network::params::WeightDecay;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainOpConfig {
    /// Unset means the network's default: CSA for MLP, SSE for CNN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss_func: Option<LossKind>,
    pub learning_rate: f64,
    /// Epochs between learning-rate decays.
    pub decay_steps: Option<usize>,
    pub decay_rate: Option<f64>,
    /// Epoch bounds of a piecewise-constant schedule; alternative to decay.
    pub piecewise_bounds: Option<Vec<usize>>,
    pub piecewise_values: Option<Vec<f64>>,
    pub method: OptimizerMethod,
    /// Weight of the L2 weight-decay term in the total loss.
    pub wd_lambda: f64,
}

impl Default for TrainOpConfig {
    fn default() -> Self {
        Self {
            loss_func: None,
            learning_rate: 1e-3,
            decay_steps: None,
            decay_rate: None,
            piecewise_bounds: None,
            piecewise_values: None,
            method: OptimizerMethod::Adam,
            wd_lambda: 0.0,
        }
    }
}

impl TrainOpConfig {
    /// Defaults with the loss `kind` trains on unless told otherwise.
    pub fn for_kind(kind: NetworkKind) -> Self {
        Self::default().resolve(kind)
    }

    /// Fill an unset loss with the default of `kind`.
    pub fn resolve(mut self, kind: NetworkKind) -> Self {
        self.loss_func.get_or_insert(kind.default_loss());
        self
    }
}

/// Loss values of one optimiser step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLoss {
    /// Reconstruction loss alone.
    pub loss: f32,
    /// Reconstruction loss plus weighted weight decay.
    pub total: f32,
}

#[derive(Debug, Clone)]
pub struct TrainOp {
    name: String,
    config: TrainOpConfig,
    loss: NodeId,
    total: NodeId,
    schedule: LearningRateSchedule,
    optimizer: Optimizer,
}

impl TrainOp {
    /// Add the loss nodes of `config` to `net` and prepare an optimiser.
    ///
    /// `config.loss_func` must be set; see [`TrainOpConfig::resolve`].
    pub fn bind(
        net: &mut NetworkGraph,
        decay: &WeightDecay,
        name: &str,
        config: TrainOpConfig,
    ) -> Result<Self> {
        if !(config.wd_lambda.is_finite() && config.wd_lambda >= 0.0) {
            return Err(AeError::config(format!(
                "wd_lambda must be non-negative, got {}",
                config.wd_lambda
            )));
        }
        let schedule = LearningRateSchedule::from_options(
            config.learning_rate,
            config.decay_steps,
            config.decay_rate,
            config.piecewise_bounds.as_deref(),
            config.piecewise_values.as_deref(),
        )?;

        let (loss, total) = add_loss_nodes(net, decay, name, &config)?;

        Ok(Self {
            name: name.to_string(),
            optimizer: Optimizer::new(config.method),
            config,
            loss,
            total,
            schedule,
        })
    }

    /// Recreate this op's loss nodes after the graph dropped them, keeping
    /// the optimiser state.
    pub fn rebind(&mut self, net: &mut NetworkGraph, decay: &WeightDecay) -> Result<()> {
        (self.loss, self.total) = add_loss_nodes(net, decay, &self.name, &self.config)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &TrainOpConfig {
        &self.config
    }

    pub fn loss_node(&self) -> NodeId {
        self.loss
    }

    pub fn total_node(&self) -> NodeId {
        self.total
    }

    pub fn learning_rate(&self, epoch: usize) -> f64 {
        self.schedule.rate(epoch)
    }

    /// Run one optimiser step on a batch.
    pub fn step<'a>(
        &mut self,
        net: &NetworkGraph,
        params: &mut ParamStore,
        inputs: ArrayView2<'a, f32>,
        targets: ArrayView2<'a, f32>,
        epoch: usize,
    ) -> Result<StepLoss> {
        let feeds = Feeds::new()
            .with(net.x, inputs.into_dyn())
            .with(net.y_target, targets.into_dyn());
        let eval = net.graph.forward(params, &feeds, &[self.total])?;
        let step = StepLoss {
            loss: eval.scalar(self.loss)?,
            total: eval.scalar(self.total)?,
        };
        let grads = net.graph.backward(&eval, params, self.total)?;
        self.optimizer
            .apply(params, &grads, self.schedule.rate(epoch))?;
        Ok(step)
    }

    /// Reconstruction loss of a batch without updating anything.
    pub fn evaluate<'a>(
        &self,
        net: &NetworkGraph,
        params: &ParamStore,
        inputs: ArrayView2<'a, f32>,
        targets: ArrayView2<'a, f32>,
    ) -> Result<f32> {
        let feeds = Feeds::new()
            .with(net.x, inputs.into_dyn())
            .with(net.y_target, targets.into_dyn());
        net.graph.forward(params, &feeds, &[self.loss])?.scalar(self.loss)
    }
}

fn add_loss_nodes(
    net: &mut NetworkGraph,
    decay: &WeightDecay,
    name: &str,
    config: &TrainOpConfig,
) -> Result<(NodeId, NodeId)> {
    let kind = config
        .loss_func
        .ok_or_else(|| AeError::config(format!("train op '{name}' has no lossFunc")))?;
    let loss = net.graph.loss(kind, net.y_recon, net.y_target)?;
    net.graph.set_name(loss, format!("{name}_loss"))?;
    let total = if config.wd_lambda > 0.0 && !decay.is_empty() {
        let wd = net
            .graph
            .weight_decay(decay.params().to_vec(), config.wd_lambda as f32);
        net.graph.add(loss, wd)?
    } else {
        loss
    };
    Ok((loss, total))
}

/// Train ops by name. Adding an existing name replaces it.
#[derive(Debug, Clone, Default)]
pub struct TrainOpSet {
    ops: HashMap<String, TrainOp>,
}

impl TrainOpSet {
    pub fn insert(&mut self, op: TrainOp) -> Option<TrainOp> {
        self.ops.insert(op.name.clone(), op)
    }

    pub fn get(&self, name: &str) -> Option<&TrainOp> {
        self.ops.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut TrainOp> {
        self.ops
            .get_mut(name)
            .ok_or_else(|| AeError::lookup(format!("no train op named '{name}'")))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrainOp> {
        self.ops.values_mut()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
