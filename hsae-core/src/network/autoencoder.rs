//! Autoencoder networks: construction, training and inference.

use crate::config::{CnnConfig, MlpConfig};
use crate::engine::checkpoint::{self, Checkpoint};
use crate::engine::graph::{Feeds, NodeId};
use crate::engine::init::{Initializer, WeightInit};
use crate::engine::loss::LossKind;
use crate::engine::ops::Activation;
use crate::engine::params::ParamStore;
use crate::engine::session::Session;
use crate::error::{AeError, Result};
use crate::network::assemble::{AssemblyOptions, NetworkGraph, assemble};
use crate::network::params::{ParameterTable, WeightDecay, allocate};
use crate::network::registry::ModelRegistry;
use crate::network::shape::{ArchitecturePlan, plan_cnn, plan_mlp};
use crate::network::train_op::{TrainOp, TrainOpConfig, TrainOpSet};
use crate::training::{Dataset, TrainConfig, TrainingMetrics, runner};
use ndarray::{Array2, ArrayD, ArrayView2, Ix2};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    #[default]
    Mlp,
    Cnn,
}

impl NetworkKind {
    /// Loss a train op uses when its config leaves `lossFunc` unset.
    pub fn default_loss(self) -> LossKind {
        match self {
            Self::Mlp => LossKind::Csa,
            Self::Cnn => LossKind::Sse,
        }
    }
}

/// Options shared by every network kind once the plan is known.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    pub activation: Activation,
    pub activation_final: Activation,
    pub skip_connect: bool,
    pub tied_weights: Option<Vec<i64>>,
    pub weight_init: WeightInit,
    pub weight_std: f32,
    pub seed: Option<u64>,
}

impl From<&MlpConfig> for BuildOptions {
    fn from(config: &MlpConfig) -> Self {
        Self {
            activation: config.activation_func,
            activation_final: config.activation_func_final,
            skip_connect: config.skip_connect,
            tied_weights: config.tied_weights.clone(),
            weight_init: config.weight_init_opt,
            weight_std: config.weight_std,
            seed: config.seed,
        }
    }
}

impl From<&CnnConfig> for BuildOptions {
    fn from(config: &CnnConfig) -> Self {
        Self {
            activation: config.activation_func,
            activation_final: config.activation_func_final,
            skip_connect: config.skip_connect,
            tied_weights: config.tied_weights.clone(),
            weight_init: config.weight_init_opt,
            weight_std: config.weight_std,
            seed: config.seed,
        }
    }
}

/// A built autoencoder with its parameters, train ops and registered models.
#[derive(Debug)]
pub struct Autoencoder {
    kind: NetworkKind,
    plan: ArchitecturePlan,
    table: ParameterTable,
    decay: WeightDecay,
    params: ParamStore,
    net: NetworkGraph,
    train_ops: TrainOpSet,
    models: ModelRegistry,
}

impl Autoencoder {
    /// Fully-connected autoencoder.
    pub fn mlp(config: &MlpConfig) -> Result<Self> {
        let plan = plan_mlp(config.input_size, &config.encoder_size)?;
        Self::from_plan(NetworkKind::Mlp, plan, &config.into())
    }

    /// 1-D convolutional autoencoder.
    pub fn cnn(config: &CnnConfig) -> Result<Self> {
        let plan = plan_cnn(
            config.input_size,
            &config.encoder_filter_size,
            &config.encoder_num_filters,
            &config.encoder_stride,
            config.padding,
            config.z_dim,
        )?;
        Self::from_plan(NetworkKind::Cnn, plan, &config.into())
    }

    /// Build from an explicit plan.
    pub fn from_plan(kind: NetworkKind, plan: ArchitecturePlan, options: &BuildOptions) -> Result<Self> {
        let mut init = Initializer::new(options.weight_init, options.weight_std, options.seed)?;
        let mut params = ParamStore::new();
        let (table, decay) = allocate(&plan, options.tied_weights.as_deref(), &mut init, &mut params)?;
        let net = assemble(
            &plan,
            &table,
            &params,
            AssemblyOptions {
                activation: options.activation,
                activation_final: options.activation_final,
                skip_connect: options.skip_connect,
            },
        )?;
        info!(
            ?kind,
            layers = plan.num_layers(),
            latent = ?plan.latent(),
            params = params.num_values(),
            "Built autoencoder"
        );
        Ok(Self {
            kind,
            plan,
            table,
            decay,
            params,
            net,
            train_ops: TrainOpSet::default(),
            models: ModelRegistry::default(),
        })
    }

    pub fn kind(&self) -> NetworkKind {
        self.kind
    }

    pub fn plan(&self) -> &ArchitecturePlan {
        &self.plan
    }

    pub fn table(&self) -> &ParameterTable {
        &self.table
    }

    pub fn weight_decay(&self) -> &WeightDecay {
        &self.decay
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }

    pub fn graph(&self) -> &NetworkGraph {
        &self.net
    }

    pub fn train_ops(&self) -> &TrainOpSet {
        &self.train_ops
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn input_size(&self) -> usize {
        self.plan.input_size()
    }

    /// The weight layer `k` actually uses, after any tied view.
    pub fn effective_weight(&self, k: usize) -> Result<ArrayD<f32>> {
        let node = self
            .net
            .layer(k)
            .ok_or_else(|| AeError::lookup(format!("network has no layer {k}")))?
            .weight;
        let session = Session::new(&self.net.graph, self.params.clone());
        session.run(&Feeds::new(), node)
    }

    /// Add or replace the train op `name`. An unset loss takes the
    /// default of this network's kind.
    ///
    /// Replacing an op drops the loss nodes of every op and rebinds the
    /// survivors, so the graph does not grow with repeated replacement.
    pub fn add_train_op(&mut self, name: &str, config: TrainOpConfig) -> Result<()> {
        let config = config.resolve(self.kind);
        if self.train_ops.contains(name) {
            self.net.clear_train_ops();
            for op in self.train_ops.iter_mut().filter(|op| op.name() != name) {
                op.rebind(&mut self.net, &self.decay)?;
            }
        }
        let op = TrainOp::bind(&mut self.net, &self.decay, name, config)?;
        if self.train_ops.insert(op).is_some() {
            info!(name, nodes = self.net.graph.len(), "Replaced train op");
        }
        Ok(())
    }

    /// Train the network's parameters in place with the op `op_name`.
    pub fn train(
        &mut self,
        data_train: &Dataset,
        data_val: Option<&Dataset>,
        op_name: &str,
        config: &TrainConfig,
    ) -> Result<TrainingMetrics> {
        let op = self.train_ops.get_mut(op_name)?;
        runner::run(&self.net, &mut self.params, op, data_train, data_val, config)
    }

    /// Write the current parameters to the checkpoint address `addr`.
    pub fn save(&self, addr: &Path, epoch: usize, loss: Option<f64>) -> Result<Checkpoint> {
        checkpoint::save(addr, &self.params, epoch, loss)
    }

    /// Register the checkpoint at `addr` as `model_name`.
    pub fn add_model(&mut self, addr: impl Into<PathBuf>, model_name: &str) {
        let addr = addr.into();
        tracing::debug!(model = model_name, addr = %addr.display(), "Registered model");
        self.models.add(model_name, addr);
    }

    /// Latent codes of `samples` under the model `model_name`.
    pub fn encoder(&self, model_name: &str, samples: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        self.infer(model_name, self.net.x, samples, self.net.z)
    }

    /// Reconstructions of latent codes under the model `model_name`.
    pub fn decoder(&self, model_name: &str, latent: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        self.infer(model_name, self.net.z, latent, self.net.y_recon)
    }

    /// Reconstructions of `samples` under the model `model_name`.
    pub fn encoder_decoder(
        &self,
        model_name: &str,
        samples: ArrayView2<'_, f32>,
    ) -> Result<Array2<f32>> {
        self.infer(model_name, self.net.x, samples, self.net.y_recon)
    }

    fn infer(
        &self,
        model_name: &str,
        feed: NodeId,
        data: ArrayView2<'_, f32>,
        fetch: NodeId,
    ) -> Result<Array2<f32>> {
        let addr = self.models.resolve(model_name)?;
        let mut session = Session::new(&self.net.graph, self.params.clone());
        session.load_params(addr)?;
        let out = session.run(&Feeds::new().with(feed, data.into_dyn()), fetch)?;
        Ok(out.into_dimensionality::<Ix2>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_mlp() -> Autoencoder {
        Autoencoder::mlp(&MlpConfig {
            input_size: Some(12),
            encoder_size: vec![8, 4],
            seed: Some(1),
            ..MlpConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_missing_input_size() {
        let err = Autoencoder::mlp(&MlpConfig::default()).unwrap_err();
        assert!(matches!(err, AeError::Config(_)));
    }

    #[test]
    fn test_inference_round_trip_through_registry() {
        let mut ae = small_mlp();
        let dir = TempDir::new().unwrap();
        ae.save(dir.path(), 0, None).unwrap();
        ae.add_model(dir.path(), "m");

        let samples = Array2::<f32>::zeros((3, 12));
        let z = ae.encoder("m", samples.view()).unwrap();
        assert_eq!(z.dim(), (3, 4));
        let y = ae.decoder("m", z.view()).unwrap();
        assert_eq!(y.dim(), (3, 12));
        assert_eq!(ae.encoder_decoder("m", samples.view()).unwrap(), y);
    }

    #[test]
    fn test_unregistered_model() {
        let ae = small_mlp();
        let samples = Array2::<f32>::zeros((1, 12));
        assert!(matches!(
            ae.encoder("unknown", samples.view()),
            Err(AeError::Lookup(_))
        ));
    }

    #[test]
    fn test_inference_uses_checkpoint_not_live_params() {
        let mut ae = small_mlp();
        let dir = TempDir::new().unwrap();
        ae.save(dir.path(), 0, None).unwrap();
        ae.add_model(dir.path(), "m");
        let samples = Array2::<f32>::from_elem((2, 12), 0.5);
        let before = ae.encoder_decoder("m", samples.view()).unwrap();

        let weights: Vec<_> = ae.table().iter().map(|(_, p)| p.weight.param()).collect();
        for id in weights {
            ae.params_mut().value_mut(id).unwrap().fill(0.0);
        }
        assert_eq!(ae.encoder_decoder("m", samples.view()).unwrap(), before);
    }

    #[test]
    fn test_train_requires_known_op() {
        let mut ae = small_mlp();
        let data = Dataset::new(Array2::zeros((4, 12)));
        let err = ae
            .train(&data, None, "missing", &TrainConfig::default())
            .unwrap_err();
        assert!(matches!(err, AeError::Lookup(_)));
    }

    #[test]
    fn test_train_op_default_loss_follows_kind() {
        let mut mlp = small_mlp();
        mlp.add_train_op("t", TrainOpConfig::default()).unwrap();
        let op = mlp.train_ops().get("t").unwrap();
        assert_eq!(op.config().loss_func, Some(LossKind::Csa));

        let mut cnn = Autoencoder::cnn(&CnnConfig {
            input_size: Some(30),
            encoder_num_filters: vec![2],
            encoder_filter_size: vec![5],
            encoder_stride: vec![1],
            seed: Some(2),
            ..CnnConfig::default()
        })
        .unwrap();
        cnn.add_train_op("t", TrainOpConfig::default()).unwrap();
        let op = cnn.train_ops().get("t").unwrap();
        assert_eq!(op.config().loss_func, Some(LossKind::Sse));
    }

    #[test]
    fn test_replacing_train_op_keeps_graph_bounded() {
        let mut ae = small_mlp();
        ae.add_train_op("keep", TrainOpConfig::default()).unwrap();
        ae.add_train_op("swap", TrainOpConfig::default()).unwrap();
        let size = ae.graph().graph.len();
        for _ in 0..3 {
            let wd = TrainOpConfig {
                wd_lambda: 0.01,
                ..TrainOpConfig::default()
            };
            ae.add_train_op("swap", wd).unwrap();
            ae.add_train_op("swap", TrainOpConfig::default()).unwrap();
        }
        assert_eq!(ae.graph().graph.len(), size);

        let data = Dataset::new(Array2::from_elem((4, 12), 0.25));
        let config = TrainConfig {
            n_epochs: 2,
            save_epochs: Vec::new(),
            batch_size: 2,
            seed: Some(1),
            ..TrainConfig::default()
        };
        for name in ["keep", "swap"] {
            let metrics = ae.train(&data, None, name, &config).unwrap();
            assert_eq!(metrics.epochs_completed, 2);
        }
    }
}
