//! Network configuration.
//!
//! Configuration is a two-stage builder: built-in defaults, then an optional
//! JSON or TOML document whose keys override them. Keys are camelCase
//! (`inputSize`, `encoderSize`, `tiedWeights`, ...).

use crate::engine::init::WeightInit;
use crate::engine::ops::{Activation, Padding};
use crate::error::{AeError, Result};
use figment::{
    Figment,
    providers::{Format, Json, Serialized, Toml},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::Path;

/// Fully-connected autoencoder options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MlpConfig {
    pub input_size: Option<usize>,
    /// Widths of the encoder layers; the last one is the latent size.
    pub encoder_size: Vec<usize>,
    pub activation_func: Activation,
    /// One 0/1 flag per decoder layer; `None` ties nothing.
    pub tied_weights: Option<Vec<i64>>,
    pub weight_init_opt: WeightInit,
    pub weight_std: f32,
    pub skip_connect: bool,
    pub activation_func_final: Activation,
    /// Seed for weight initialisation; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            input_size: None,
            encoder_size: vec![50, 30, 10],
            activation_func: Activation::Sigmoid,
            tied_weights: None,
            weight_init_opt: WeightInit::TruncatedNormal,
            weight_std: 0.1,
            skip_connect: false,
            activation_func_final: Activation::Linear,
            seed: None,
        }
    }
}

/// 1-D convolutional autoencoder options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CnnConfig {
    pub input_size: Option<usize>,
    pub z_dim: usize,
    pub encoder_num_filters: Vec<usize>,
    pub encoder_filter_size: Vec<usize>,
    pub encoder_stride: Vec<usize>,
    pub activation_func: Activation,
    /// One 0/1 flag per transposed-convolution layer; `None` ties nothing.
    pub tied_weights: Option<Vec<i64>>,
    pub weight_init_opt: WeightInit,
    pub weight_std: f32,
    pub skip_connect: bool,
    pub padding: Padding,
    pub activation_func_final: Activation,
    pub seed: Option<u64>,
}

impl Default for CnnConfig {
    fn default() -> Self {
        Self {
            input_size: None,
            z_dim: 5,
            encoder_num_filters: vec![10, 10, 10],
            encoder_filter_size: vec![20, 10, 10],
            encoder_stride: vec![1, 1, 1],
            activation_func: Activation::Sigmoid,
            tied_weights: None,
            weight_init_opt: WeightInit::TruncatedNormal,
            weight_std: 0.1,
            skip_connect: false,
            padding: Padding::Valid,
            activation_func_final: Activation::Linear,
            seed: None,
        }
    }
}

impl MlpConfig {
    /// Defaults overridden by the document at `path`, if any.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        load_layered(path)
    }
}

impl CnnConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        load_layered(path)
    }
}

/// Start a figment from `T::default()` and merge the document at `path`.
///
/// The format follows the file extension: `.toml` or `.json`.
pub fn figment_for<T: Serialize + Default>(path: Option<&Path>) -> Result<Figment> {
    let figment = Figment::from(Serialized::defaults(T::default()));
    let Some(path) = path else {
        return Ok(figment);
    };
    if !path.is_file() {
        return Err(AeError::config(format!(
            "configuration file '{}' not found",
            path.display()
        )));
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Ok(figment.merge(Toml::file(path))),
        Some("json") => Ok(figment.merge(Json::file(path))),
        _ => Err(AeError::config(format!(
            "unsupported configuration format '{}': expected .toml or .json",
            path.display()
        ))),
    }
}

pub fn load_layered<T: Serialize + DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    Ok(figment_for::<T>(path)?.extract()?)
}
