//! Parameter checkpoints.
//!
//! A checkpoint address is a directory holding `params.json` (parameter name
//! to shape and values) and `manifest.json` describing it.

use crate::engine::params::{ParamStore, SavedParam};
use crate::error::{AeError, Result};
use crate::persistence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

pub const PARAMS_FILE: &str = "params.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Manifest written next to the parameter payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub epoch: usize,
    pub loss: Option<f64>,
    /// SHA-256 of the `params.json` bytes.
    pub hash: String,
    pub size_bytes: u64,
    pub num_params: usize,
    pub created_at: DateTime<Utc>,
}

fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Write every parameter of `params` to the directory `addr`.
pub fn save(addr: &Path, params: &ParamStore, epoch: usize, loss: Option<f64>) -> Result<Checkpoint> {
    let payload = serde_json::to_vec(&params.to_saved())?;
    persistence::atomic_write(&addr.join(PARAMS_FILE), &payload)?;

    let checkpoint = Checkpoint {
        id: uuid::Uuid::new_v4().to_string(),
        epoch,
        loss,
        hash: digest(&payload),
        size_bytes: payload.len() as u64,
        num_params: params.len(),
        created_at: Utc::now(),
    };
    persistence::atomic_write_json(&addr.join(MANIFEST_FILE), &checkpoint)?;
    tracing::debug!(
        addr = %addr.display(),
        epoch,
        params = checkpoint.num_params,
        "Checkpoint written"
    );
    Ok(checkpoint)
}

/// Read and verify the checkpoint at `addr`.
pub fn load(addr: &Path) -> Result<(Checkpoint, BTreeMap<String, SavedParam>)> {
    if !addr.is_dir() {
        return Err(AeError::checkpoint(format!(
            "no checkpoint at '{}'",
            addr.display()
        )));
    }
    let checkpoint: Checkpoint = persistence::require_json(&addr.join(MANIFEST_FILE))?;
    let payload = std::fs::read(addr.join(PARAMS_FILE))?;
    let hash = digest(&payload);
    if hash != checkpoint.hash {
        return Err(AeError::checkpoint(format!(
            "'{}' is corrupt: hash {hash} does not match manifest {}",
            addr.display(),
            checkpoint.hash
        )));
    }
    let saved: BTreeMap<String, SavedParam> = serde_json::from_slice(&payload)?;
    Ok((checkpoint, saved))
}

/// Load the checkpoint at `addr` into `params`, all or nothing.
pub fn restore(addr: &Path, params: &mut ParamStore) -> Result<Checkpoint> {
    let (checkpoint, saved) = load(addr)?;
    params.restore(&saved)?;
    Ok(checkpoint)
}
