//! Parameter storage.
//!
//! A [`ParamStore`] owns every trainable tensor of one network. Graph nodes
//! refer to parameters by [`ParamId`]; the values themselves only live here,
//! so a session can take a private snapshot by cloning the store.

use crate::error::{AeError, Result};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index of a parameter inside a [`ParamStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub(crate) usize);

impl ParamId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A named trainable tensor.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: ArrayD<f32>,
}

/// Serialized form of a parameter: row-major values plus shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedParam {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    params: Vec<Parameter>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Add a parameter and return its id. Names must be unique.
    pub fn insert(&mut self, name: impl Into<String>, value: ArrayD<f32>) -> Result<ParamId> {
        let name = name.into();
        if self.find(&name).is_some() {
            return Err(AeError::graph(format!("parameter '{name}' already exists")));
        }
        self.params.push(Parameter { name, value });
        Ok(ParamId(self.params.len() - 1))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, id: ParamId) -> Option<&Parameter> {
        self.params.get(id.0)
    }

    pub fn value(&self, id: ParamId) -> Result<&ArrayD<f32>> {
        self.params
            .get(id.0)
            .map(|p| &p.value)
            .ok_or_else(|| AeError::graph(format!("unknown parameter #{}", id.0)))
    }

    pub fn value_mut(&mut self, id: ParamId) -> Result<&mut ArrayD<f32>> {
        self.params
            .get_mut(id.0)
            .map(|p| &mut p.value)
            .ok_or_else(|| AeError::graph(format!("unknown parameter #{}", id.0)))
    }

    pub fn find(&self, name: &str) -> Option<ParamId> {
        self.params.iter().position(|p| p.name == name).map(ParamId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Parameter)> {
        self.params.iter().enumerate().map(|(i, p)| (ParamId(i), p))
    }

    /// Total number of scalar values held.
    pub fn num_values(&self) -> usize {
        self.params.iter().map(|p| p.value.len()).sum()
    }

    /// Export every parameter keyed by name.
    pub fn to_saved(&self) -> BTreeMap<String, SavedParam> {
        self.params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    SavedParam {
                        shape: p.value.shape().to_vec(),
                        values: p.value.iter().copied().collect(),
                    },
                )
            })
            .collect()
    }

    /// Overwrite parameter values from a saved snapshot.
    ///
    /// Every saved entry must name an existing parameter of identical shape,
    /// and every parameter must be covered; nothing is modified otherwise.
    pub fn restore(&mut self, saved: &BTreeMap<String, SavedParam>) -> Result<()> {
        let mut staged = Vec::with_capacity(saved.len());
        for (name, entry) in saved {
            let id = self.find(name).ok_or_else(|| {
                AeError::checkpoint(format!("checkpoint holds unknown parameter '{name}'"))
            })?;
            let current = &self.params[id.0].value;
            if current.shape() != entry.shape.as_slice() {
                return Err(AeError::shape_mismatch(format!(
                    "parameter '{name}' has shape {:?}, checkpoint stores {:?}",
                    current.shape(),
                    entry.shape
                )));
            }
            let value = ArrayD::from_shape_vec(IxDyn(&entry.shape), entry.values.clone())?;
            staged.push((id, value));
        }
        if let Some(missing) = self.params.iter().find(|p| !saved.contains_key(&p.name)) {
            return Err(AeError::checkpoint(format!(
                "checkpoint is missing parameter '{}'",
                missing.name
            )));
        }
        for (id, value) in staged {
            self.params[id.0].value = value;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ParamStore {
        let mut store = ParamStore::new();
        store
            .insert("encoder_w1", ArrayD::from_elem(IxDyn(&[3, 2]), 0.5))
            .unwrap();
        store
            .insert("encoder_b1", ArrayD::zeros(IxDyn(&[2])))
            .unwrap();
        store
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut store = store();
        let err = store
            .insert("encoder_w1", ArrayD::zeros(IxDyn(&[1])))
            .unwrap_err();
        assert!(matches!(err, AeError::Graph(_)));
        assert_eq!(store.num_values(), 8);
    }

    #[test]
    fn test_restore_roundtrip() {
        let source = store();
        let saved = source.to_saved();
        let mut target = store();
        *target.value_mut(ParamId(0)).unwrap() = ArrayD::zeros(IxDyn(&[3, 2]));
        target.restore(&saved).unwrap();
        assert_eq!(target.value(ParamId(0)).unwrap(), source.value(ParamId(0)).unwrap());
    }

    #[test]
    fn test_restore_rejects_shape_change() {
        let mut saved = store().to_saved();
        saved.get_mut("encoder_b1").unwrap().shape = vec![3];
        saved.get_mut("encoder_b1").unwrap().values = vec![0.0; 3];
        let mut target = store();
        let before = target.value(ParamId(0)).unwrap().clone();
        assert!(matches!(target.restore(&saved), Err(AeError::ShapeMismatch(_))));
        assert_eq!(target.value(ParamId(0)).unwrap(), &before);
    }

    #[test]
    fn test_restore_requires_every_parameter() {
        let mut saved = store().to_saved();
        saved.remove("encoder_b1");
        assert!(matches!(store().restore(&saved), Err(AeError::Checkpoint(_))));
    }
}
