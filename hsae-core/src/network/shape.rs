//! Shape planning: the static layer list and the shape at every layer
//! boundary, from the input through the latent code back to the
//! reconstruction.
//!
//! Layers are numbered from 1. Encoder layers are `1..=E`, decoder layers
//! `E+1..=2E`, and layer `k` maps `trace[k - 1]` to `trace[k]`, so a plan
//! always satisfies `trace.len() == 2E + 1`.

use crate::engine::ops::Padding;
use crate::error::{AeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of one sample at a layer boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataShape {
    Flat(usize),
    Channels { width: usize, channels: usize },
}

impl DataShape {
    pub fn dims(&self) -> Vec<usize> {
        match *self {
            Self::Flat(width) => vec![width],
            Self::Channels { width, channels } => vec![width, channels],
        }
    }

    /// Number of scalar values per sample.
    pub fn size(&self) -> usize {
        match *self {
            Self::Flat(width) => width,
            Self::Channels { width, channels } => width * channels,
        }
    }
}

impl fmt::Display for DataShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat(width) => write!(f, "{width}"),
            Self::Channels { width, channels } => write!(f, "{width}x{channels}"),
        }
    }
}

/// Static configuration of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSpec {
    Dense {
        inputs: usize,
        outputs: usize,
    },
    Conv1d {
        filter_size: usize,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        padding: Padding,
    },
    Deconv1d {
        filter_size: usize,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        padding: Padding,
    },
}

impl LayerSpec {
    /// Shape of the weight tensor. A transposed convolution stores its
    /// filter as `[filter, out_channels, in_channels]`, the layout of the
    /// convolution it mirrors.
    pub fn weight_shape(&self) -> Vec<usize> {
        match *self {
            Self::Dense { inputs, outputs } => vec![inputs, outputs],
            Self::Conv1d {
                filter_size,
                in_channels,
                out_channels,
                ..
            } => vec![filter_size, in_channels, out_channels],
            Self::Deconv1d {
                filter_size,
                in_channels,
                out_channels,
                ..
            } => vec![filter_size, out_channels, in_channels],
        }
    }

    pub fn bias_len(&self) -> usize {
        match *self {
            Self::Dense { outputs, .. } => outputs,
            Self::Conv1d { out_channels, .. } | Self::Deconv1d { out_channels, .. } => {
                out_channels
            }
        }
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, Self::Dense { .. })
    }
}

/// The full static description of one autoencoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitecturePlan {
    /// Encoder layers followed by decoder layers; `layers[k - 1]` is layer `k`.
    pub layers: Vec<LayerSpec>,
    pub num_encoder_layers: usize,
    pub trace: Vec<DataShape>,
    /// Decoder layers that accept a tying flag, in flag order.
    pub tieable: Vec<usize>,
}

impl ArchitecturePlan {
    pub fn num_decoder_layers(&self) -> usize {
        self.layers.len().saturating_sub(self.num_encoder_layers)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Layer `k`, numbered from 1.
    pub fn layer(&self, k: usize) -> Option<&LayerSpec> {
        k.checked_sub(1).and_then(|i| self.layers.get(i))
    }

    pub fn is_encoder(&self, k: usize) -> bool {
        (1..=self.num_encoder_layers).contains(&k)
    }

    /// Encoder layer whose weight mirrors decoder layer `k`.
    pub fn mirror_of(&self, k: usize) -> Option<usize> {
        let depth = k.checked_sub(self.num_encoder_layers)?;
        if depth == 0 || k > self.layers.len() {
            return None;
        }
        Some(self.num_encoder_layers + 1 - depth)
    }

    /// Encoder boundary whose pre-activation feeds the skip connection into
    /// decoder layer `k`. `Some(0)` means the expanded input.
    pub fn skip_source(&self, k: usize) -> Option<usize> {
        let depth = k.checked_sub(self.num_encoder_layers)?;
        if depth == 0 || k > self.layers.len() {
            return None;
        }
        self.num_encoder_layers.checked_sub(depth)
    }

    pub fn input_size(&self) -> usize {
        self.trace.first().map_or(0, DataShape::size)
    }

    pub fn latent(&self) -> Option<DataShape> {
        self.trace.get(self.num_encoder_layers).copied()
    }
}

/// Output width of a convolution over `input_width` samples.
pub fn conv_output_shape(
    input_width: usize,
    filter: usize,
    padding: Padding,
    stride: usize,
) -> Result<usize> {
    padding
        .output_width(input_width, filter, stride)
        .ok_or_else(|| {
            AeError::config(format!(
                "filter {filter} with stride {stride} and {padding:?} padding does not fit width {input_width}"
            ))
        })
}

fn require_input(input_size: Option<usize>) -> Result<usize> {
    match input_size {
        Some(0) => Err(AeError::config("inputSize must be positive")),
        Some(size) => Ok(size),
        None => Err(AeError::config("inputSize is required")),
    }
}

/// Plan a fully-connected autoencoder.
///
/// The trace is `[input, e1, .., en, .., e1, input]`.
pub fn plan_mlp(input_size: Option<usize>, encoder_size: &[usize]) -> Result<ArchitecturePlan> {
    let input = require_input(input_size)?;
    if encoder_size.is_empty() {
        return Err(AeError::config("encoderSize must name at least one layer"));
    }
    if let Some(pos) = encoder_size.iter().position(|&w| w == 0) {
        return Err(AeError::config(format!(
            "encoderSize[{pos}] must be positive"
        )));
    }

    let mut widths = Vec::with_capacity(encoder_size.len() + 1);
    widths.push(input);
    widths.extend_from_slice(encoder_size);
    let mut trace: Vec<DataShape> = widths.iter().map(|&w| DataShape::Flat(w)).collect();
    trace.extend(widths.iter().rev().skip(1).map(|&w| DataShape::Flat(w)));

    let layers: Vec<LayerSpec> = trace
        .windows(2)
        .map(|pair| LayerSpec::Dense {
            inputs: pair[0].size(),
            outputs: pair[1].size(),
        })
        .collect();
    let num_encoder_layers = encoder_size.len();
    let tieable = (num_encoder_layers + 1..=layers.len()).collect();

    Ok(ArchitecturePlan {
        layers,
        num_encoder_layers,
        trace,
        tieable,
    })
}

/// Plan a 1-D convolutional autoencoder.
///
/// Encoder: `n` convolutions, then a dense layer from the flattened last
/// convolution output to `z_dim`. Decoder: a dense layer back to the
/// flattened width, reshaped to `(width, channels)`, then `n` transposed
/// convolutions retracing the encoder widths. Only the transposed
/// convolutions accept tying flags.
pub fn plan_cnn(
    input_size: Option<usize>,
    filter_size: &[usize],
    num_filters: &[usize],
    stride: &[usize],
    padding: Padding,
    z_dim: usize,
) -> Result<ArchitecturePlan> {
    if filter_size.len() != num_filters.len() || filter_size.len() != stride.len() {
        return Err(AeError::config(format!(
            "encoderFilterSize ({}), encoderNumFilters ({}) and encoderStride ({}) must have the same length",
            filter_size.len(),
            num_filters.len(),
            stride.len()
        )));
    }
    let input = require_input(input_size)?;
    if filter_size.is_empty() {
        return Err(AeError::config("at least one convolution layer is required"));
    }
    if z_dim == 0 {
        return Err(AeError::config("zDim must be positive"));
    }
    if let Some(pos) = num_filters.iter().position(|&f| f == 0) {
        return Err(AeError::config(format!(
            "encoderNumFilters[{pos}] must be positive"
        )));
    }

    let n = filter_size.len();
    let (mut width, mut channels) = (input, 1);
    let mut encoder = vec![DataShape::Channels { width, channels }];
    let mut in_channels = Vec::with_capacity(n);
    let mut layers = Vec::with_capacity(2 * n + 2);
    for i in 0..n {
        let out = padding
            .output_width(width, filter_size[i], stride[i])
            .ok_or_else(|| {
                AeError::config(format!(
                    "convolution layer {}: filter {} with stride {} does not fit width {width}",
                    i + 1,
                    filter_size[i],
                    stride[i]
                ))
            })?;
        layers.push(LayerSpec::Conv1d {
            filter_size: filter_size[i],
            in_channels: channels,
            out_channels: num_filters[i],
            stride: stride[i],
            padding,
        });
        in_channels.push(channels);
        (width, channels) = (out, num_filters[i]);
        encoder.push(DataShape::Channels { width, channels });
    }
    let flattened = width * channels;
    layers.push(LayerSpec::Dense {
        inputs: flattened,
        outputs: z_dim,
    });
    layers.push(LayerSpec::Dense {
        inputs: z_dim,
        outputs: flattened,
    });
    for i in (0..n).rev() {
        layers.push(LayerSpec::Deconv1d {
            filter_size: filter_size[i],
            in_channels: num_filters[i],
            out_channels: in_channels[i],
            stride: stride[i],
            padding,
        });
    }

    let mut trace = encoder.clone();
    trace.push(DataShape::Flat(z_dim));
    trace.extend(encoder.iter().rev().copied());
    let num_encoder_layers = n + 1;
    let tieable = (num_encoder_layers + 2..=layers.len()).collect();

    Ok(ArchitecturePlan {
        layers,
        num_encoder_layers,
        trace,
        tieable,
    })
}
