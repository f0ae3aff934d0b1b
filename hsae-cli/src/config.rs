//! Run configuration: network, train op and training options in one
//! document, overridable from `HSAE_` environment variables.

use figment::providers::Env;
use hsae_core::network::{ArchitecturePlan, NetworkKind, plan_cnn, plan_mlp};
use hsae_core::{Autoencoder, CnnConfig, MlpConfig, TrainConfig, TrainOpConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything one CLI invocation needs. Only the section named by `network`
/// is used to build the autoencoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    pub network: NetworkKind,
    pub mlp: MlpConfig,
    pub cnn: CnnConfig,
    pub train_op: TrainOpConfig,
    pub train: TrainConfig,
}

impl RunConfig {
    /// Defaults, then the document at `path`, then the environment
    /// (`HSAE_train__nEpochs=50`, `HSAE_mlp__inputSize=100`, ...).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let figment = hsae_core::config::figment_for::<Self>(path)?
            .merge(Env::prefixed("HSAE_").lowercase(false).split("__"));
        figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Configuration error: {e}"))
    }

    pub fn plan(&self) -> hsae_core::Result<ArchitecturePlan> {
        match self.network {
            NetworkKind::Mlp => plan_mlp(self.mlp.input_size, &self.mlp.encoder_size),
            NetworkKind::Cnn => plan_cnn(
                self.cnn.input_size,
                &self.cnn.encoder_filter_size,
                &self.cnn.encoder_num_filters,
                &self.cnn.encoder_stride,
                self.cnn.padding,
                self.cnn.z_dim,
            ),
        }
    }

    /// The train op settings, with an unset loss filled in for `network`.
    pub fn resolved_train_op(&self) -> TrainOpConfig {
        self.train_op.clone().resolve(self.network)
    }

    pub fn build(&self) -> hsae_core::Result<Autoencoder> {
        match self.network {
            NetworkKind::Mlp => Autoencoder::mlp(&self.mlp),
            NetworkKind::Cnn => Autoencoder::cnn(&self.cnn),
        }
    }
}
