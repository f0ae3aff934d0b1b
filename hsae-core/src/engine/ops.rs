//! Layer kernels: fully-connected, 1-D convolution, 1-D transposed
//! convolution and element-wise activations, each with its backward pass.
//!
//! Layouts follow the usual "width, channels" convention:
//! - activations are `[batch, width, channels]`,
//! - convolution filters are `[filter, in_channels, out_channels]`,
//! - transposed-convolution filters are `[filter, out_channels, in_channels]`,
//!   i.e. exactly the filter of the convolution they invert.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, s};
use serde::{Deserialize, Serialize};

/// Element-wise nonlinearity applied after each layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Sigmoid,
    Relu,
    Linear,
}

impl Activation {
    pub fn forward(self, h: f32) -> f32 {
        match self {
            Self::Sigmoid => 1.0 / (1.0 + (-h).exp()),
            Self::Relu => h.max(0.0),
            Self::Linear => h,
        }
    }

    /// Derivative expressed through the activation's output `a`.
    pub fn derivative_from_output(self, a: f32) -> f32 {
        match self {
            Self::Sigmoid => a * (1.0 - a),
            Self::Relu => {
                if a > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Linear => 1.0,
        }
    }
}

/// Convolution boundary handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Padding {
    /// No padding: the output shrinks by `filter - 1` before striding.
    #[serde(rename = "VALID", alias = "valid")]
    Valid,
    /// Zero padding so that `out = ceil(in / stride)`.
    #[serde(rename = "SAME", alias = "same")]
    Same,
}

impl Padding {
    /// Output width of a convolution, or `None` when the filter does not fit.
    pub fn output_width(self, input: usize, filter: usize, stride: usize) -> Option<usize> {
        if input == 0 || filter == 0 || stride == 0 {
            return None;
        }
        match self {
            Self::Valid => input.checked_sub(filter).map(|d| d / stride + 1),
            Self::Same => Some(input.div_ceil(stride)),
        }
    }

    /// Zeros inserted before the first input sample for a convolution
    /// mapping `input` samples to `output` samples.
    pub fn left_pad(self, input: usize, output: usize, filter: usize, stride: usize) -> usize {
        match self {
            Self::Valid => 0,
            Self::Same => {
                let needed = (output.saturating_sub(1) * stride + filter).saturating_sub(input);
                needed / 2
            }
        }
    }
}

/// Position in the (unpadded) input read by output `o` through filter tap `k`.
fn tap(o: usize, k: usize, stride: usize, pad: usize, width: usize) -> Option<usize> {
    (o * stride + k)
        .checked_sub(pad)
        .filter(|&pos| pos < width)
}

fn outer(a: ArrayView1<f32>, b: ArrayView1<f32>) -> Array2<f32> {
    let a = a.insert_axis(Axis(1));
    let b = b.insert_axis(Axis(0));
    a.dot(&b)
}

/// `y = x · W + b` with `x: [batch, in]`, `W: [in, out]`.
pub fn dense_forward(x: ArrayView2<f32>, w: ArrayView2<f32>, b: ArrayView1<f32>) -> Array2<f32> {
    x.dot(&w) + &b
}

/// Gradients of [`dense_forward`] as `(dx, dW, db)`.
pub fn dense_backward(
    x: ArrayView2<f32>,
    w: ArrayView2<f32>,
    dy: ArrayView2<f32>,
) -> (Array2<f32>, Array2<f32>, Array1<f32>) {
    let dx = dy.dot(&w.t());
    let dw = x.t().dot(&dy);
    let db = dy.sum_axis(Axis(0));
    (dx, dw, db)
}

/// Geometry shared by the convolution kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub stride: usize,
    /// Left zero padding applied to the wide side of the convolution.
    pub pad: usize,
}

/// 1-D convolution. `x: [batch, width, in_ch]`, `w: [filter, in_ch, out_ch]`.
pub fn conv1d_forward(
    x: ArrayView3<f32>,
    w: ArrayView3<f32>,
    b: ArrayView1<f32>,
    geometry: ConvGeometry,
    out_width: usize,
) -> Array3<f32> {
    let (batch, width, _) = x.dim();
    let (filter, _, out_ch) = w.dim();
    let mut y = Array3::<f32>::zeros((batch, out_width, out_ch));
    for n in 0..batch {
        for o in 0..out_width {
            let mut acc = y.slice_mut(s![n, o, ..]);
            for k in 0..filter {
                if let Some(pos) = tap(o, k, geometry.stride, geometry.pad, width) {
                    acc += &x.slice(s![n, pos, ..]).dot(&w.slice(s![k, .., ..]));
                }
            }
            acc += &b;
        }
    }
    y
}

/// Gradients of [`conv1d_forward`] as `(dx, dW, db)`.
pub fn conv1d_backward(
    x: ArrayView3<f32>,
    w: ArrayView3<f32>,
    dy: ArrayView3<f32>,
    geometry: ConvGeometry,
) -> (Array3<f32>, Array3<f32>, Array1<f32>) {
    let (batch, width, _) = x.dim();
    let (filter, _, _) = w.dim();
    let out_width = dy.dim().1;
    let mut dx = Array3::<f32>::zeros(x.raw_dim());
    let mut dw = Array3::<f32>::zeros(w.raw_dim());
    for n in 0..batch {
        for o in 0..out_width {
            let g = dy.slice(s![n, o, ..]);
            for k in 0..filter {
                if let Some(pos) = tap(o, k, geometry.stride, geometry.pad, width) {
                    let wk = w.slice(s![k, .., ..]);
                    let mut dxn = dx.slice_mut(s![n, pos, ..]);
                    dxn += &wk.dot(&g);
                    let mut dwk = dw.slice_mut(s![k, .., ..]);
                    dwk += &outer(x.slice(s![n, pos, ..]), g);
                }
            }
        }
    }
    let db = dy.sum_axis(Axis(0)).sum_axis(Axis(0));
    (dx, dw, db)
}

/// 1-D transposed convolution.
///
/// `u: [batch, width_in, in_ch]`, `w: [filter, out_ch, in_ch]`, producing
/// `[batch, out_width, out_ch]`. This is the adjoint of [`conv1d_forward`]
/// mapping `out_width` samples to `width_in` samples with the same filter.
pub fn deconv1d_forward(
    u: ArrayView3<f32>,
    w: ArrayView3<f32>,
    b: ArrayView1<f32>,
    geometry: ConvGeometry,
    out_width: usize,
) -> Array3<f32> {
    let (batch, width_in, _) = u.dim();
    let (filter, out_ch, _) = w.dim();
    let mut v = Array3::<f32>::zeros((batch, out_width, out_ch));
    for n in 0..batch {
        for o in 0..width_in {
            let un = u.slice(s![n, o, ..]);
            for k in 0..filter {
                if let Some(pos) = tap(o, k, geometry.stride, geometry.pad, out_width) {
                    let mut vn = v.slice_mut(s![n, pos, ..]);
                    vn += &w.slice(s![k, .., ..]).dot(&un);
                }
            }
        }
    }
    v += &b;
    v
}

/// Gradients of [`deconv1d_forward`] as `(du, dW, db)`.
pub fn deconv1d_backward(
    u: ArrayView3<f32>,
    w: ArrayView3<f32>,
    dv: ArrayView3<f32>,
    geometry: ConvGeometry,
) -> (Array3<f32>, Array3<f32>, Array1<f32>) {
    let (batch, width_in, _) = u.dim();
    let (filter, _, _) = w.dim();
    let out_width = dv.dim().1;
    let mut du = Array3::<f32>::zeros(u.raw_dim());
    let mut dw = Array3::<f32>::zeros(w.raw_dim());
    for n in 0..batch {
        for o in 0..width_in {
            for k in 0..filter {
                if let Some(pos) = tap(o, k, geometry.stride, geometry.pad, out_width) {
                    let g = dv.slice(s![n, pos, ..]);
                    let mut dun = du.slice_mut(s![n, o, ..]);
                    dun += &g.dot(&w.slice(s![k, .., ..]));
                    let mut dwk = dw.slice_mut(s![k, .., ..]);
                    dwk += &outer(g, u.slice(s![n, o, ..]));
                }
            }
        }
    }
    let db = dv.sum_axis(Axis(0)).sum_axis(Axis(0));
    (du, dw, db)
}
