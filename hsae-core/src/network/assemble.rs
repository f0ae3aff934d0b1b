//! Wiring allocated parameters into the forward graph.

use crate::engine::graph::{Graph, NodeId};
use crate::engine::ops::Activation;
use crate::engine::params::{ParamId, ParamStore};
use crate::error::{AeError, Result};
use crate::network::params::{ParameterTable, TiedView, WeightBinding};
use crate::network::shape::{ArchitecturePlan, LayerSpec};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyOptions {
    pub activation: Activation,
    pub activation_final: Activation,
    pub skip_connect: bool,
}

/// Pre- and post-activation nodes of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerNodes {
    pub h: NodeId,
    pub a: NodeId,
    /// Effective weight, after any tied view.
    pub weight: NodeId,
}

/// The forward graph of one network.
#[derive(Debug, Clone)]
pub struct NetworkGraph {
    pub graph: Graph,
    pub x: NodeId,
    pub y_target: NodeId,
    /// The input reshaped to the first layer's layout.
    pub a0: NodeId,
    pub z: NodeId,
    pub y_recon: NodeId,
    layers: Vec<LayerNodes>,
    /// Node count of the forward network alone, before any train op.
    network_len: usize,
}

impl NetworkGraph {
    /// Nodes of layer `k`, numbered from 1.
    pub fn layer(&self, k: usize) -> Option<&LayerNodes> {
        k.checked_sub(1).and_then(|i| self.layers.get(i))
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Drop the loss nodes every train op added, leaving the forward network.
    pub fn clear_train_ops(&mut self) {
        self.graph.truncate(self.network_len);
    }
}

struct Builder<'a> {
    graph: Graph,
    store: &'a ParamStore,
    param_nodes: HashMap<ParamId, NodeId>,
}

impl Builder<'_> {
    /// One graph node per parameter, shared by every layer that reads it.
    fn param(&mut self, id: ParamId) -> Result<NodeId> {
        if let Some(node) = self.param_nodes.get(&id) {
            return Ok(*node);
        }
        let node = self.graph.parameter(id, self.store)?;
        self.param_nodes.insert(id, node);
        Ok(node)
    }

    fn weight(&mut self, binding: WeightBinding) -> Result<NodeId> {
        match binding {
            WeightBinding::Owned(id) => self.param(id),
            WeightBinding::Tied {
                source,
                view: TiedView::Identity,
            } => self.param(source),
            WeightBinding::Tied {
                source,
                view: TiedView::Transpose,
            } => {
                let node = self.param(source)?;
                self.graph.transpose(node)
            }
        }
    }

    /// Reshape a batched node to a flat vector per sample, if it is not one.
    fn flatten(&mut self, node: NodeId) -> Result<NodeId> {
        let dims = self.graph.dims(node)?;
        if dims.len() == 1 {
            return Ok(node);
        }
        let size = dims.iter().product::<usize>();
        self.graph.reshape(node, &[size])
    }
}

/// Build encoder and decoder for `plan` from the allocated `table`.
pub fn assemble(
    plan: &ArchitecturePlan,
    table: &ParameterTable,
    store: &ParamStore,
    options: AssemblyOptions,
) -> Result<NetworkGraph> {
    if table.len() != plan.num_layers() || plan.trace.len() != plan.num_layers() + 1 {
        return Err(AeError::shape_mismatch(format!(
            "plan has {} layers and {} boundaries, parameter table has {} layers",
            plan.num_layers(),
            plan.trace.len(),
            table.len()
        )));
    }
    let input_size = plan.input_size();
    let mut b = Builder {
        graph: Graph::new(),
        store,
        param_nodes: HashMap::new(),
    };
    let x = b.graph.placeholder("x", &[input_size]);
    let y_target = b.graph.placeholder("y_target", &[input_size]);
    let first = plan.trace[0].dims();
    let a0 = if first.len() == 1 {
        x
    } else {
        let a0 = b.graph.reshape(x, &first)?;
        b.graph.set_name(a0, "a0")?;
        a0
    };

    let last = plan.num_layers();
    let mut layers: Vec<LayerNodes> = Vec::with_capacity(last);
    let mut prev = a0;
    for (index, spec) in plan.layers.iter().enumerate() {
        let k = index + 1;
        let params = table
            .layer(k)
            .ok_or_else(|| AeError::graph(format!("layer {k} has no parameters")))?;
        let weight = b.weight(params.weight)?;
        let bias = b.param(params.bias)?;
        let target = plan.trace[k].dims();

        let mut h = match *spec {
            LayerSpec::Dense { .. } => {
                let input = b.flatten(prev)?;
                b.graph.dense(input, weight, bias)?
            }
            LayerSpec::Conv1d {
                stride, padding, ..
            } => b.graph.conv1d(prev, weight, bias, stride, padding)?,
            LayerSpec::Deconv1d {
                stride, padding, ..
            } => b.graph.deconv1d(prev, weight, bias, target[0], stride, padding)?,
        };

        if options.skip_connect {
            if let Some(source) = plan.skip_source(k) {
                let mut skip = match source {
                    0 => a0,
                    m => layers[m - 1].h,
                };
                if spec.is_dense() {
                    skip = b.flatten(skip)?;
                }
                h = b.graph.add(h, skip).map_err(|e| match e {
                    AeError::ShapeMismatch(msg) => AeError::shape_mismatch(format!(
                        "skip connection into layer {k}: {msg}"
                    )),
                    other => other,
                })?;
            }
        }
        b.graph.set_name(h, format!("h{k}"))?;

        let kind = if k == last {
            options.activation_final
        } else {
            options.activation
        };
        let mut a = b.graph.activation(kind, h)?;
        if b.graph.dims(a)? != target.as_slice() {
            a = b.graph.reshape(a, &target)?;
        }
        b.graph.set_name(a, format!("a{k}"))?;

        debug!(layer = k, shape = %plan.trace[k], ?kind, "Assembled layer");
        layers.push(LayerNodes { h, a, weight });
        prev = a;
    }

    let z = plan
        .num_encoder_layers
        .checked_sub(1)
        .and_then(|i| layers.get(i))
        .map(|l| l.a)
        .ok_or_else(|| AeError::graph("network has no encoder layers"))?;
    let y_recon = if b.graph.dims(prev)? == [input_size].as_slice() {
        prev
    } else {
        b.graph.reshape(prev, &[input_size])?
    };
    b.graph.set_name(y_recon, "y_recon")?;

    let network_len = b.graph.len();
    Ok(NetworkGraph {
        graph: b.graph,
        x,
        y_target,
        a0,
        z,
        y_recon,
        layers,
        network_len,
    })
}
