//! Computation graph.
//!
//! Nodes live in an arena and may only reference nodes created before them,
//! so node order is already a topological order: forward evaluation walks
//! ids upwards, back-propagation walks them downwards.
//!
//! Every node has a static shape. Batched nodes (placeholders and anything
//! computed from them) carry an implicit leading batch axis that is not part
//! of the recorded shape; parameter-derived nodes and losses do not.

use crate::engine::loss::LossKind;
use crate::engine::ops::{self, Activation, ConvGeometry, Padding};
use crate::engine::params::{ParamId, ParamStore};
use crate::error::{AeError, Result};
use ndarray::{ArrayD, ArrayViewD, Axis, Ix1, Ix2, Ix3, IxDyn};
use std::collections::HashMap;

/// Index of a node in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Placeholder,
    Parameter(ParamId),
    /// Transposed view of a 2-D node, materialised only when evaluated.
    Transpose(NodeId),
    Reshape(NodeId),
    Dense {
        input: NodeId,
        weight: NodeId,
        bias: NodeId,
    },
    Conv1d {
        input: NodeId,
        weight: NodeId,
        bias: NodeId,
        stride: usize,
        padding: Padding,
    },
    Deconv1d {
        input: NodeId,
        weight: NodeId,
        bias: NodeId,
        stride: usize,
        padding: Padding,
    },
    Add(NodeId, NodeId),
    Activation(Activation, NodeId),
    /// Scalar batch-mean reconstruction loss.
    Loss {
        kind: LossKind,
        prediction: NodeId,
        target: NodeId,
    },
    /// Scalar `lambda * sum(w^2) / 2` over the listed parameters.
    WeightDecay { params: Vec<ParamId>, lambda: f32 },
}

impl Op {
    fn inputs(&self) -> Vec<NodeId> {
        match self {
            Self::Placeholder | Self::Parameter(_) | Self::WeightDecay { .. } => Vec::new(),
            Self::Transpose(input) | Self::Reshape(input) | Self::Activation(_, input) => {
                vec![*input]
            }
            Self::Dense {
                input,
                weight,
                bias,
            }
            | Self::Conv1d {
                input,
                weight,
                bias,
                ..
            }
            | Self::Deconv1d {
                input,
                weight,
                bias,
                ..
            } => vec![*input, *weight, *bias],
            Self::Add(a, b) => vec![*a, *b],
            Self::Loss {
                prediction, target, ..
            } => vec![*prediction, *target],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub op: Op,
    /// Per-sample shape for batched nodes, full shape otherwise.
    pub dims: Vec<usize>,
    pub batched: bool,
    pub name: Option<String>,
}

/// Values fed into the graph for one evaluation.
#[derive(Debug, Default)]
pub struct Feeds<'a> {
    values: HashMap<NodeId, ArrayViewD<'a, f32>>,
}

impl<'a> Feeds<'a> {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, node: NodeId, value: ArrayViewD<'a, f32>) -> Self {
        self.values.insert(node, value);
        self
    }

    pub fn insert(&mut self, node: NodeId, value: ArrayViewD<'a, f32>) {
        self.values.insert(node, value);
    }

    fn get(&self, node: NodeId) -> Option<&ArrayViewD<'a, f32>> {
        self.values.get(&node)
    }
}

/// Node values computed by one forward pass.
#[derive(Debug)]
pub struct Evaluation {
    values: Vec<Option<ArrayD<f32>>>,
    fed: Vec<bool>,
}

impl Evaluation {
    pub fn get(&self, node: NodeId) -> Result<&ArrayD<f32>> {
        self.values
            .get(node.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| AeError::graph(format!("node #{} was not evaluated", node.0)))
    }

    pub fn take(mut self, node: NodeId) -> Result<ArrayD<f32>> {
        self.values
            .get_mut(node.0)
            .and_then(Option::take)
            .ok_or_else(|| AeError::graph(format!("node #{} was not evaluated", node.0)))
    }

    /// The value of a scalar node.
    pub fn scalar(&self, node: NodeId) -> Result<f32> {
        self.get(node)?
            .iter()
            .next()
            .copied()
            .ok_or_else(|| AeError::graph(format!("node #{} is empty", node.0)))
    }
}

/// Parameter gradients produced by [`Graph::backward`].
#[derive(Debug, Default)]
pub struct Gradients {
    grads: HashMap<ParamId, ArrayD<f32>>,
}

impl Gradients {
    pub fn accumulate(&mut self, id: ParamId, grad: ArrayD<f32>) {
        match self.grads.get_mut(&id) {
            Some(existing) => *existing += &grad,
            None => {
                self.grads.insert(id, grad);
            }
        }
    }

    pub fn get(&self, id: ParamId) -> Option<&ArrayD<f32>> {
        self.grads.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &ArrayD<f32>)> {
        self.grads.iter().map(|(id, g)| (*id, g))
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| AeError::graph(format!("unknown node #{}", id.0)))
    }

    pub fn dims(&self, id: NodeId) -> Result<&[usize]> {
        Ok(&self.node(id)?.dims)
    }

    fn push(&mut self, op: Op, dims: Vec<usize>, batched: bool) -> NodeId {
        self.nodes.push(Node {
            op,
            dims,
            batched,
            name: None,
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Drop every node created after the first `len`. Ids of dropped nodes
    /// become invalid.
    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    /// Attach a human-readable name used in error messages.
    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id.0)
            .ok_or_else(|| AeError::graph(format!("unknown node #{}", id.0)))?;
        node.name = Some(name.into());
        Ok(())
    }

    fn label(&self, id: NodeId) -> String {
        match self.nodes.get(id.0).and_then(|n| n.name.as_deref()) {
            Some(name) => format!("'{name}'"),
            None => format!("#{}", id.0),
        }
    }

    fn expect_batched(&self, id: NodeId, rank: usize, role: &str) -> Result<&[usize]> {
        let node = self.node(id)?;
        if !node.batched || node.dims.len() != rank {
            return Err(AeError::shape_mismatch(format!(
                "{role} {} must be a batch of rank-{rank} samples, got {:?}",
                self.label(id),
                node.dims
            )));
        }
        Ok(&node.dims)
    }

    fn expect_fixed(&self, id: NodeId, dims: &[usize], role: &str) -> Result<()> {
        let node = self.node(id)?;
        if node.batched || node.dims != dims {
            return Err(AeError::shape_mismatch(format!(
                "{role} {} has shape {:?}, expected {dims:?}",
                self.label(id),
                node.dims
            )));
        }
        Ok(())
    }

    pub fn placeholder(&mut self, name: &str, dims: &[usize]) -> NodeId {
        let id = self.push(Op::Placeholder, dims.to_vec(), true);
        self.nodes[id.0].name = Some(name.to_string());
        id
    }

    pub fn parameter(&mut self, id: ParamId, params: &ParamStore) -> Result<NodeId> {
        let param = params
            .get(id)
            .ok_or_else(|| AeError::graph(format!("unknown parameter #{}", id.index())))?;
        let dims = param.value.shape().to_vec();
        let name = param.name.clone();
        let node = self.push(Op::Parameter(id), dims, false);
        self.nodes[node.0].name = Some(name);
        Ok(node)
    }

    pub fn transpose(&mut self, input: NodeId) -> Result<NodeId> {
        let node = self.node(input)?;
        if node.batched || node.dims.len() != 2 {
            return Err(AeError::shape_mismatch(format!(
                "only 2-D parameters can be transposed, {} is {:?}",
                self.label(input),
                node.dims
            )));
        }
        let dims = vec![node.dims[1], node.dims[0]];
        Ok(self.push(Op::Transpose(input), dims, false))
    }

    /// Reshape every sample of a batched node; the element count must match.
    pub fn reshape(&mut self, input: NodeId, dims: &[usize]) -> Result<NodeId> {
        let node = self.node(input)?;
        let from: usize = node.dims.iter().product();
        let to: usize = dims.iter().product();
        if !node.batched || from != to {
            return Err(AeError::shape_mismatch(format!(
                "cannot reshape {} from {:?} to {dims:?}",
                self.label(input),
                node.dims
            )));
        }
        Ok(self.push(Op::Reshape(input), dims.to_vec(), true))
    }

    pub fn dense(&mut self, input: NodeId, weight: NodeId, bias: NodeId) -> Result<NodeId> {
        let width = self.expect_batched(input, 1, "dense input")?[0];
        let w = self.node(weight)?;
        if w.batched || w.dims.len() != 2 || w.dims[0] != width {
            return Err(AeError::shape_mismatch(format!(
                "dense weight {} has shape {:?} but the input has {width} features",
                self.label(weight),
                w.dims
            )));
        }
        let out = w.dims[1];
        self.expect_fixed(bias, &[out], "dense bias")?;
        Ok(self.push(
            Op::Dense {
                input,
                weight,
                bias,
            },
            vec![out],
            true,
        ))
    }

    pub fn conv1d(
        &mut self,
        input: NodeId,
        weight: NodeId,
        bias: NodeId,
        stride: usize,
        padding: Padding,
    ) -> Result<NodeId> {
        let (width, channels) = {
            let dims = self.expect_batched(input, 2, "conv1d input")?;
            (dims[0], dims[1])
        };
        let w = self.node(weight)?;
        if w.batched || w.dims.len() != 3 || w.dims[1] != channels {
            return Err(AeError::shape_mismatch(format!(
                "conv1d filter {} has shape {:?} but the input has {channels} channels",
                self.label(weight),
                w.dims
            )));
        }
        let (filter, out_channels) = (w.dims[0], w.dims[2]);
        let out_width = padding
            .output_width(width, filter, stride)
            .ok_or_else(|| {
                AeError::shape_mismatch(format!(
                    "conv1d filter {filter} with stride {stride} does not fit width {width}"
                ))
            })?;
        self.expect_fixed(bias, &[out_channels], "conv1d bias")?;
        Ok(self.push(
            Op::Conv1d {
                input,
                weight,
                bias,
                stride,
                padding,
            },
            vec![out_width, out_channels],
            true,
        ))
    }

    /// Transposed convolution producing `out_width` samples.
    ///
    /// The convolution with the same filter, stride and padding must map
    /// `out_width` back to the input width; anything else is a shape mismatch.
    pub fn deconv1d(
        &mut self,
        input: NodeId,
        weight: NodeId,
        bias: NodeId,
        out_width: usize,
        stride: usize,
        padding: Padding,
    ) -> Result<NodeId> {
        let (width, channels) = {
            let dims = self.expect_batched(input, 2, "deconv1d input")?;
            (dims[0], dims[1])
        };
        let w = self.node(weight)?;
        if w.batched || w.dims.len() != 3 || w.dims[2] != channels {
            return Err(AeError::shape_mismatch(format!(
                "deconv1d filter {} has shape {:?} but the input has {channels} channels",
                self.label(weight),
                w.dims
            )));
        }
        let (filter, out_channels) = (w.dims[0], w.dims[1]);
        if padding.output_width(out_width, filter, stride) != Some(width) {
            return Err(AeError::shape_mismatch(format!(
                "deconv1d cannot expand width {width} to {out_width} with filter {filter} and stride {stride}"
            )));
        }
        self.expect_fixed(bias, &[out_channels], "deconv1d bias")?;
        Ok(self.push(
            Op::Deconv1d {
                input,
                weight,
                bias,
                stride,
                padding,
            },
            vec![out_width, out_channels],
            true,
        ))
    }

    /// Element-wise sum. Shapes must match exactly; nothing is broadcast.
    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        let (na, nb) = (self.node(a)?, self.node(b)?);
        if na.batched != nb.batched || na.dims != nb.dims {
            return Err(AeError::shape_mismatch(format!(
                "cannot add {} {:?} and {} {:?}",
                self.label(a),
                na.dims,
                self.label(b),
                nb.dims
            )));
        }
        let (dims, batched) = (na.dims.clone(), na.batched);
        Ok(self.push(Op::Add(a, b), dims, batched))
    }

    pub fn activation(&mut self, kind: Activation, input: NodeId) -> Result<NodeId> {
        let node = self.node(input)?;
        let (dims, batched) = (node.dims.clone(), node.batched);
        Ok(self.push(Op::Activation(kind, input), dims, batched))
    }

    pub fn loss(&mut self, kind: LossKind, prediction: NodeId, target: NodeId) -> Result<NodeId> {
        let (np, nt) = (self.node(prediction)?, self.node(target)?);
        if !np.batched || !nt.batched || np.dims != nt.dims {
            return Err(AeError::shape_mismatch(format!(
                "loss compares {} {:?} with {} {:?}",
                self.label(prediction),
                np.dims,
                self.label(target),
                nt.dims
            )));
        }
        Ok(self.push(
            Op::Loss {
                kind,
                prediction,
                target,
            },
            Vec::new(),
            false,
        ))
    }

    pub fn weight_decay(&mut self, params: Vec<ParamId>, lambda: f32) -> NodeId {
        self.push(Op::WeightDecay { params, lambda }, Vec::new(), false)
    }

    /// Nodes that must be computed to produce `fetches`, stopping at feeds.
    fn required(&self, fetches: &[NodeId], feeds: &Feeds<'_>) -> Result<Vec<bool>> {
        let mut needed = vec![false; self.nodes.len()];
        let mut stack = fetches.to_vec();
        while let Some(id) = stack.pop() {
            let node = self.node(id)?;
            if needed[id.0] {
                continue;
            }
            needed[id.0] = true;
            if feeds.get(id).is_none() {
                stack.extend(node.op.inputs());
            }
        }
        Ok(needed)
    }

    /// Evaluate `fetches` given parameter values and fed nodes.
    ///
    /// Any node may be fed, not just placeholders; a fed node's inputs are
    /// not evaluated.
    pub fn forward(
        &self,
        params: &ParamStore,
        feeds: &Feeds<'_>,
        fetches: &[NodeId],
    ) -> Result<Evaluation> {
        let needed = self.required(fetches, feeds)?;
        let mut values: Vec<Option<ArrayD<f32>>> = vec![None; self.nodes.len()];
        let mut fed = vec![false; self.nodes.len()];
        let mut batch: Option<usize> = None;

        for (index, node) in self.nodes.iter().enumerate() {
            if !needed[index] {
                continue;
            }
            let id = NodeId(index);
            if let Some(value) = feeds.get(id) {
                self.check_feed(id, node, value, &mut batch)?;
                values[index] = Some(value.to_owned());
                fed[index] = true;
                continue;
            }
            let value = self.compute(id, node, params, &values, batch)?;
            values[index] = Some(value);
        }
        Ok(Evaluation { values, fed })
    }

    fn check_feed(
        &self,
        id: NodeId,
        node: &Node,
        value: &ArrayViewD<'_, f32>,
        batch: &mut Option<usize>,
    ) -> Result<()> {
        let shape = value.shape();
        let expected_rank = node.dims.len() + usize::from(node.batched);
        let sample = if node.batched { &shape[1.min(shape.len())..] } else { shape };
        if shape.len() != expected_rank || sample != node.dims.as_slice() {
            return Err(AeError::shape_mismatch(format!(
                "value fed to {} has shape {shape:?}, expected {}{:?}",
                self.label(id),
                if node.batched { "[batch] + " } else { "" },
                node.dims
            )));
        }
        if node.batched {
            match batch {
                Some(size) if *size != shape[0] => {
                    return Err(AeError::shape_mismatch(format!(
                        "value fed to {} has batch size {}, other feeds have {size}",
                        self.label(id),
                        shape[0]
                    )));
                }
                _ => *batch = Some(shape[0]),
            }
        }
        Ok(())
    }

    fn compute(
        &self,
        id: NodeId,
        node: &Node,
        params: &ParamStore,
        values: &[Option<ArrayD<f32>>],
        batch: Option<usize>,
    ) -> Result<ArrayD<f32>> {
        let input = |n: NodeId| -> Result<&ArrayD<f32>> {
            values[n.0]
                .as_ref()
                .ok_or_else(|| AeError::graph(format!("node {} has no value", self.label(n))))
        };
        let value = match &node.op {
            Op::Placeholder => {
                return Err(AeError::graph(format!(
                    "placeholder {} must be fed",
                    self.label(id)
                )));
            }
            Op::Parameter(param) => params.value(*param)?.clone(),
            Op::Transpose(src) => input(*src)?.t().to_owned(),
            Op::Reshape(src) => {
                let src = input(*src)?;
                let mut shape = vec![src.shape()[0]];
                shape.extend_from_slice(&node.dims);
                ArrayD::from_shape_vec(IxDyn(&shape), src.iter().copied().collect())?
            }
            Op::Dense {
                input: x,
                weight,
                bias,
            } => {
                let x = input(*x)?.view().into_dimensionality::<Ix2>()?;
                let w = input(*weight)?.view().into_dimensionality::<Ix2>()?;
                let b = input(*bias)?.view().into_dimensionality::<Ix1>()?;
                ops::dense_forward(x, w, b).into_dyn()
            }
            Op::Conv1d {
                input: x,
                weight,
                bias,
                stride,
                padding,
            } => {
                let x = input(*x)?.view().into_dimensionality::<Ix3>()?;
                let w = input(*weight)?.view().into_dimensionality::<Ix3>()?;
                let b = input(*bias)?.view().into_dimensionality::<Ix1>()?;
                let geometry = conv_geometry(*padding, x.dim().1, node.dims[0], w.dim().0, *stride);
                ops::conv1d_forward(x, w, b, geometry, node.dims[0]).into_dyn()
            }
            Op::Deconv1d {
                input: u,
                weight,
                bias,
                stride,
                padding,
            } => {
                let u = input(*u)?.view().into_dimensionality::<Ix3>()?;
                let w = input(*weight)?.view().into_dimensionality::<Ix3>()?;
                let b = input(*bias)?.view().into_dimensionality::<Ix1>()?;
                let geometry = conv_geometry(*padding, node.dims[0], u.dim().1, w.dim().0, *stride);
                ops::deconv1d_forward(u, w, b, geometry, node.dims[0]).into_dyn()
            }
            Op::Add(a, b) => input(*a)? + input(*b)?,
            Op::Activation(kind, src) => input(*src)?.mapv(|h| kind.forward(h)),
            Op::Loss {
                kind,
                prediction,
                target,
            } => {
                let y = flatten_samples(input(*prediction)?)?;
                let t = flatten_samples(input(*target)?)?;
                let (loss, _) = kind.evaluate(y.view(), t.view());
                ArrayD::from_elem(IxDyn(&[]), loss)
            }
            Op::WeightDecay { params: ids, lambda } => {
                let mut total = 0.0f32;
                for param in ids {
                    total += params.value(*param)?.iter().map(|w| w * w).sum::<f32>() / 2.0;
                }
                ArrayD::from_elem(IxDyn(&[]), lambda * total)
            }
        };
        if node.batched && batch.is_none() {
            return Err(AeError::graph(format!(
                "batched node {} evaluated without any batched feed",
                self.label(id)
            )));
        }
        Ok(value)
    }

    /// Back-propagate from the scalar node `seed` and collect parameter
    /// gradients. Gradients stop at fed nodes.
    pub fn backward(
        &self,
        eval: &Evaluation,
        params: &ParamStore,
        seed: NodeId,
    ) -> Result<Gradients> {
        let seed_node = self.node(seed)?;
        if seed_node.batched || !seed_node.dims.is_empty() {
            return Err(AeError::graph(format!(
                "gradients are taken from scalar nodes, {} is {:?}",
                self.label(seed),
                seed_node.dims
            )));
        }
        let mut upstream: Vec<Option<ArrayD<f32>>> = vec![None; seed.0 + 1];
        upstream[seed.0] = Some(ArrayD::from_elem(IxDyn(&[]), 1.0));
        let mut grads = Gradients::default();

        for index in (0..=seed.0).rev() {
            let Some(grad) = upstream[index].take() else {
                continue;
            };
            if eval.fed.get(index).copied().unwrap_or(false) {
                continue;
            }
            let node = &self.nodes[index];
            let value = |n: NodeId| eval.get(n);
            let mut send = |n: NodeId, g: ArrayD<f32>| match upstream[n.0].as_mut() {
                Some(existing) => *existing += &g,
                None => upstream[n.0] = Some(g),
            };
            match &node.op {
                Op::Placeholder => {}
                Op::Parameter(param) => grads.accumulate(*param, grad),
                Op::Transpose(src) => send(*src, grad.t().to_owned()),
                Op::Reshape(src) => {
                    let shape = value(*src)?.shape().to_vec();
                    send(
                        *src,
                        ArrayD::from_shape_vec(IxDyn(&shape), grad.iter().copied().collect())?,
                    );
                }
                Op::Dense {
                    input,
                    weight,
                    bias,
                } => {
                    let x = value(*input)?.view().into_dimensionality::<Ix2>()?;
                    let w = value(*weight)?.view().into_dimensionality::<Ix2>()?;
                    let dy = grad.view().into_dimensionality::<Ix2>()?;
                    let (dx, dw, db) = ops::dense_backward(x, w, dy);
                    send(*input, dx.into_dyn());
                    send(*weight, dw.into_dyn());
                    send(*bias, db.into_dyn());
                }
                Op::Conv1d {
                    input,
                    weight,
                    bias,
                    stride,
                    padding,
                } => {
                    let x = value(*input)?.view().into_dimensionality::<Ix3>()?;
                    let w = value(*weight)?.view().into_dimensionality::<Ix3>()?;
                    let dy = grad.view().into_dimensionality::<Ix3>()?;
                    let geometry =
                        conv_geometry(*padding, x.dim().1, node.dims[0], w.dim().0, *stride);
                    let (dx, dw, db) = ops::conv1d_backward(x, w, dy, geometry);
                    send(*input, dx.into_dyn());
                    send(*weight, dw.into_dyn());
                    send(*bias, db.into_dyn());
                }
                Op::Deconv1d {
                    input,
                    weight,
                    bias,
                    stride,
                    padding,
                } => {
                    let u = value(*input)?.view().into_dimensionality::<Ix3>()?;
                    let w = value(*weight)?.view().into_dimensionality::<Ix3>()?;
                    let dv = grad.view().into_dimensionality::<Ix3>()?;
                    let geometry =
                        conv_geometry(*padding, node.dims[0], u.dim().1, w.dim().0, *stride);
                    let (du, dw, db) = ops::deconv1d_backward(u, w, dv, geometry);
                    send(*input, du.into_dyn());
                    send(*weight, dw.into_dyn());
                    send(*bias, db.into_dyn());
                }
                Op::Add(a, b) => {
                    send(*a, grad.clone());
                    send(*b, grad);
                }
                Op::Activation(kind, src) => {
                    let out = value(NodeId(index))?;
                    let mut g = grad;
                    g.zip_mut_with(out, |g, &a| *g *= kind.derivative_from_output(a));
                    send(*src, g);
                }
                Op::Loss {
                    kind,
                    prediction,
                    target,
                } => {
                    let scale = scalar_of(&grad);
                    let y_value = value(*prediction)?;
                    let y = flatten_samples(y_value)?;
                    let t = flatten_samples(value(*target)?)?;
                    let (_, dy) = kind.evaluate(y.view(), t.view());
                    let dy = ArrayD::from_shape_vec(
                        IxDyn(y_value.shape()),
                        dy.iter().map(|g| g * scale).collect(),
                    )?;
                    send(*prediction, dy);
                }
                Op::WeightDecay { params: ids, lambda } => {
                    let scale = scalar_of(&grad) * lambda;
                    for param in ids {
                        grads.accumulate(*param, params.value(*param)?.mapv(|w| w * scale));
                    }
                }
            }
        }
        Ok(grads)
    }
}

fn scalar_of(value: &ArrayD<f32>) -> f32 {
    value.iter().next().copied().unwrap_or(0.0)
}

/// View a batch of samples of any rank as `[batch, features]`.
fn flatten_samples(value: &ArrayD<f32>) -> Result<ndarray::Array2<f32>> {
    let batch = value.shape().first().copied().unwrap_or(0);
    let features = value.len().checked_div(batch).unwrap_or(0);
    Ok(ndarray::Array2::from_shape_vec(
        (batch, features),
        value.iter().copied().collect(),
    )?)
}

/// Padding for a convolution from `wide` to `narrow` samples.
fn conv_geometry(padding: Padding, wide: usize, narrow: usize, filter: usize, stride: usize) -> ConvGeometry {
    ConvGeometry {
        stride,
        pad: padding.left_pad(wide, narrow, filter, stride),
    }
}

/// Remove the batch axis of a single-sample value.
pub fn first_sample(value: &ArrayD<f32>) -> ArrayViewD<'_, f32> {
    value.index_axis(Axis(0), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn store_with(values: &[(&str, ArrayD<f32>)]) -> (ParamStore, Vec<ParamId>) {
        let mut store = ParamStore::new();
        let ids = values
            .iter()
            .map(|(name, value)| store.insert(*name, value.clone()).unwrap())
            .collect();
        (store, ids)
    }

    #[test]
    fn test_dense_chain_forward() {
        let (store, ids) = store_with(&[
            ("w", array![[1.0f32, -1.0], [2.0, 0.0]].into_dyn()),
            ("b", array![0.0f32, 1.0].into_dyn()),
        ]);
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[2]);
        let w = graph.parameter(ids[0], &store).unwrap();
        let b = graph.parameter(ids[1], &store).unwrap();
        let h = graph.dense(x, w, b).unwrap();
        let a = graph.activation(Activation::Relu, h).unwrap();

        let input = array![[1.0f32, 1.0]].into_dyn();
        let feeds = Feeds::new().with(x, input.view());
        let eval = graph.forward(&store, &feeds, &[a]).unwrap();
        assert_eq!(eval.get(a).unwrap(), &array![[3.0f32, 0.0]].into_dyn());
    }

    #[test]
    fn test_unfed_placeholder_is_an_error() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[3]);
        let a = graph.activation(Activation::Sigmoid, x).unwrap();
        let err = graph.forward(&ParamStore::new(), &Feeds::new(), &[a]).unwrap_err();
        assert!(matches!(err, AeError::Graph(_)));
    }

    #[test]
    fn test_add_never_broadcasts() {
        let mut graph = Graph::new();
        let a = graph.placeholder("a", &[4]);
        let b = graph.placeholder("b", &[3]);
        assert!(matches!(graph.add(a, b), Err(AeError::ShapeMismatch(_))));
    }

    #[test]
    fn test_feed_shape_is_checked() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[3]);
        let wrong = Array2::<f32>::zeros((2, 4)).into_dyn();
        let feeds = Feeds::new().with(x, wrong.view());
        let err = graph.forward(&ParamStore::new(), &feeds, &[x]).unwrap_err();
        assert!(matches!(err, AeError::ShapeMismatch(_)));
    }

    #[test]
    fn test_transpose_gradient_reaches_source_parameter() {
        // loss = SSE(x · Wᵀ, t); the gradient must land on W itself
        let (store, ids) = store_with(&[
            ("w", array![[0.5f32, -0.25, 0.1], [0.3, 0.2, -0.4]].into_dyn()),
            ("b", array![0.0f32, 0.0, 0.0].into_dyn()),
        ]);
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[2]);
        let t = graph.placeholder("t", &[3]);
        let w = graph.parameter(ids[0], &store).unwrap();
        let wt = graph.transpose(w).unwrap();
        let b = graph.parameter(ids[1], &store).unwrap();
        assert!(graph.dense(x, wt, b).is_err());
        let wtt = graph.transpose(wt).unwrap();
        let y = graph.dense(x, wtt, b).unwrap();
        let loss = graph.loss(LossKind::Sse, y, t).unwrap();

        let xv = array![[1.0f32, 2.0]].into_dyn();
        let tv = array![[0.0f32, 1.0, 0.0]].into_dyn();
        let feeds = Feeds::new().with(x, xv.view()).with(t, tv.view());
        let eval = graph.forward(&store, &feeds, &[loss]).unwrap();
        let grads = graph.backward(&eval, &store, loss).unwrap();
        let dw = grads.get(ids[0]).unwrap();
        assert_eq!(dw.shape(), &[2, 3]);

        let eps = 1e-3;
        let base = eval.scalar(loss).unwrap();
        let mut bumped = store.clone();
        bumped.value_mut(ids[0]).unwrap()[[1, 2]] += eps;
        let moved = graph
            .forward(&bumped, &feeds, &[loss])
            .unwrap()
            .scalar(loss)
            .unwrap();
        assert!(((moved - base) / eps - dw[[1, 2]]).abs() < 1e-2);
    }

    #[test]
    fn test_weight_decay_gradient() {
        let (store, ids) = store_with(&[("w", array![1.0f32, -2.0].into_dyn())]);
        let mut graph = Graph::new();
        let decay = graph.weight_decay(vec![ids[0]], 0.5);
        let eval = graph.forward(&store, &Feeds::new(), &[decay]).unwrap();
        assert!((eval.scalar(decay).unwrap() - 1.25).abs() < 1e-6);
        let grads = graph.backward(&eval, &store, decay).unwrap();
        assert_eq!(grads.get(ids[0]).unwrap(), &array![0.5f32, -1.0].into_dyn());
    }

    #[test]
    fn test_fed_intermediate_blocks_upstream() {
        let (store, ids) = store_with(&[
            ("w", array![[2.0f32]].into_dyn()),
            ("b", array![0.0f32].into_dyn()),
        ]);
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[1]);
        let w = graph.parameter(ids[0], &store).unwrap();
        let b = graph.parameter(ids[1], &store).unwrap();
        let h = graph.dense(x, w, b).unwrap();
        let a = graph.activation(Activation::Linear, h).unwrap();

        // feeding `h` means `x` is not required at all
        let hv = array![[5.0f32]].into_dyn();
        let feeds = Feeds::new().with(h, hv.view());
        let eval = graph.forward(&store, &feeds, &[a]).unwrap();
        assert_eq!(first_sample(eval.get(a).unwrap())[[0]], 5.0);
    }
}
