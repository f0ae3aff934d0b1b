//! File helpers shared by checkpoints and the CLI: atomic JSON writes and
//! JSON loading.

use crate::error::{AeError, Result};
use std::path::Path;

/// Serialize `data` as pretty JSON and write it atomically to `path`.
///
/// The payload goes to a `.tmp` sibling first and is then renamed over the
/// target, so a crash mid-write never leaves a truncated file behind.
/// Parent directories are created as needed.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(data)?;
    atomic_write(path, &json)
}

/// Atomically write raw bytes to `path`.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load and deserialize a JSON document, returning `Ok(None)` if the file
/// does not exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path)?;
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Load a JSON document that must exist.
pub fn require_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    load_json(path)?.ok_or_else(|| {
        AeError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        ))
    })
}
