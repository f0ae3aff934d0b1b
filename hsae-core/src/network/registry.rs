//! Model name to checkpoint address.

use crate::error::{AeError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, PathBuf>,
}

impl ModelRegistry {
    /// Register `addr` under `name`, replacing any previous address.
    pub fn add(&mut self, name: impl Into<String>, addr: impl Into<PathBuf>) -> Option<PathBuf> {
        self.models.insert(name.into(), addr.into())
    }

    pub fn resolve(&self, name: &str) -> Result<&Path> {
        self.models
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| AeError::lookup(format!("no model registered as '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
