//! Weight and bias allocation, including tied decoder weights.

use crate::engine::init::Initializer;
use crate::engine::params::{ParamId, ParamStore};
use crate::error::{AeError, Result};
use crate::network::shape::ArchitecturePlan;
use tracing::debug;

/// Per-layer tying choice for the decoder layers that accept one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TyingFlags(Vec<bool>);

impl TyingFlags {
    /// Validate raw flags. `None` means nothing is tied.
    pub fn parse(flags: Option<&[i64]>, expected: usize) -> Result<Self> {
        let Some(flags) = flags else {
            return Ok(Self(vec![false; expected]));
        };
        if flags.len() != expected {
            return Err(AeError::config(format!(
                "tiedWeights has {} entries, the network has {expected} tieable decoder layers",
                flags.len()
            )));
        }
        flags
            .iter()
            .enumerate()
            .map(|(i, &flag)| match flag {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(AeError::config(format!(
                    "unknown tiedWeights value {other} at position {i}: must be 0 or 1"
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn is_tied(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// How a tied weight is derived from its encoder source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiedView {
    /// Dense layers read the source transposed.
    Transpose,
    /// Transposed convolutions read the source filter as-is.
    Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightBinding {
    Owned(ParamId),
    /// Non-owning view of an encoder weight; no storage of its own.
    Tied { source: ParamId, view: TiedView },
}

impl WeightBinding {
    /// The parameter that actually stores the values.
    pub fn param(&self) -> ParamId {
        match *self {
            Self::Owned(id) | Self::Tied { source: id, .. } => id,
        }
    }

    pub fn is_tied(&self) -> bool {
        matches!(self, Self::Tied { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerParams {
    pub weight: WeightBinding,
    pub bias: ParamId,
}

/// Parameters of every layer, indexed by layer number from 1.
#[derive(Debug, Clone, Default)]
pub struct ParameterTable {
    layers: Vec<LayerParams>,
}

impl ParameterTable {
    pub fn layer(&self, k: usize) -> Option<&LayerParams> {
        k.checked_sub(1).and_then(|i| self.layers.get(i))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// `(layer number, params)` in layer order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &LayerParams)> {
        self.layers.iter().enumerate().map(|(i, p)| (i + 1, p))
    }
}

/// Parameters contributing to the L2 weight-decay term `sum(w^2) / 2`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightDecay {
    terms: Vec<ParamId>,
}

impl WeightDecay {
    pub fn add(&mut self, id: ParamId) {
        if !self.terms.contains(&id) {
            self.terms.push(id);
        }
    }

    pub fn params(&self) -> &[ParamId] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn value(&self, store: &ParamStore) -> Result<f32> {
        let mut total = 0.0;
        for id in &self.terms {
            total += store.value(*id)?.iter().map(|w| w * w).sum::<f32>() / 2.0;
        }
        Ok(total)
    }
}

fn prefix(plan: &ArchitecturePlan, k: usize) -> &'static str {
    if plan.is_encoder(k) { "encoder" } else { "decoder" }
}

/// Allocate every weight and bias of `plan` into `store`.
///
/// Flags are checked before anything is allocated, so a rejected
/// configuration leaves `store` untouched.
pub fn allocate(
    plan: &ArchitecturePlan,
    tied_weights: Option<&[i64]>,
    init: &mut Initializer,
    store: &mut ParamStore,
) -> Result<(ParameterTable, WeightDecay)> {
    let flags = TyingFlags::parse(tied_weights, plan.tieable.len())?;
    let tied_layers: Vec<usize> = plan
        .tieable
        .iter()
        .enumerate()
        .filter(|(i, _)| flags.is_tied(*i))
        .map(|(_, &k)| k)
        .collect();
    for &k in &tied_layers {
        check_tie(plan, k)?;
    }

    let mut table = ParameterTable::default();
    let mut decay = WeightDecay::default();
    for (index, spec) in plan.layers.iter().enumerate() {
        let k = index + 1;
        let kind = prefix(plan, k);
        let weight = if tied_layers.contains(&k) {
            let mirror = plan
                .mirror_of(k)
                .ok_or_else(|| AeError::config(format!("layer {k} has no encoder mirror")))?;
            let source = table
                .layer(mirror)
                .map(|p| p.weight.param())
                .ok_or_else(|| AeError::config(format!("layer {mirror} is not allocated")))?;
            let view = if spec.is_dense() {
                TiedView::Transpose
            } else {
                TiedView::Identity
            };
            debug!(layer = k, source = mirror, ?view, "Tied decoder weight");
            WeightBinding::Tied { source, view }
        } else {
            let value = init.sample(&spec.weight_shape())?;
            let id = store.insert(format!("{kind}_w{k}"), value)?;
            decay.add(id);
            WeightBinding::Owned(id)
        };
        let bias = store.insert(format!("{kind}_b{k}"), init.sample(&[spec.bias_len()])?)?;
        decay.add(bias);
        table.layers.push(LayerParams { weight, bias });
    }
    debug!(
        layers = table.len(),
        params = store.len(),
        values = store.num_values(),
        tied = tied_layers.len(),
        "Allocated parameters"
    );
    Ok((table, decay))
}

/// A tied layer's weight must be its mirror's weight, transposed for dense
/// layers and unchanged for transposed convolutions.
fn check_tie(plan: &ArchitecturePlan, k: usize) -> Result<()> {
    let (Some(spec), Some(mirror)) = (plan.layer(k), plan.mirror_of(k)) else {
        return Err(AeError::config(format!("layer {k} cannot be tied")));
    };
    let source = plan
        .layer(mirror)
        .ok_or_else(|| AeError::config(format!("layer {k} cannot be tied")))?;
    let mut expected = source.weight_shape();
    if spec.is_dense() {
        expected.reverse();
    }
    let own = spec.weight_shape();
    if own != expected || spec.is_dense() != source.is_dense() {
        return Err(AeError::shape_mismatch(format!(
            "layer {k} weight {own:?} cannot be tied to layer {mirror} weight {:?}",
            source.weight_shape()
        )));
    }
    Ok(())
}
