//! # hsae-core: parametric 1-D autoencoders for spectral data
//!
//! Fully-connected and 1-D convolutional autoencoders for reducing fixed-length
//! spectra to a small latent code. A network is described by an
//! [`network::ArchitecturePlan`] (every layer and the data shape between
//! layers), its parameters are allocated with optional tying between mirrored
//! encoder and decoder layers, and the forward graph is assembled on the small
//! numeric engine in [`engine`].
//!
//! ```no_run
//! use hsae_core::{Autoencoder, MlpConfig, TrainOpConfig};
//!
//! # fn main() -> hsae_core::Result<()> {
//! let mut ae = Autoencoder::mlp(&MlpConfig {
//!     input_size: Some(100),
//!     encoder_size: vec![50, 10],
//!     ..MlpConfig::default()
//! })?;
//! ae.add_train_op("pretrain", TrainOpConfig::default())?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod network;
pub mod persistence;
pub mod training;

pub use config::{CnnConfig, MlpConfig};
pub use engine::{Activation, LossKind, OptimizerMethod, Padding, WeightInit};
pub use error::{AeError, Result};
pub use network::{Autoencoder, NetworkKind, TrainOpConfig, conv_output_shape};
pub use training::{Dataset, TrainConfig, TrainingMetrics};
