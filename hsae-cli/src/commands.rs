//! Subcommand handlers.

use crate::config::RunConfig;
use anyhow::{Context, bail};
use hsae_core::persistence::{atomic_write_json, require_json};
use hsae_core::{Autoencoder, Dataset};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing::info;

const TRAIN_OP: &str = "train";
const CLI_MODEL: &str = "cli";

/// Which mapping of the network an inference command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inference {
    Encode,
    Decode,
    Reconstruct,
}

/// Print the layer-by-layer shape plan of the configured network.
pub fn plan(config: &RunConfig) -> anyhow::Result<()> {
    let plan = config.plan()?;
    println!("input  {}", plan.trace[0]);
    for (index, spec) in plan.layers.iter().enumerate() {
        let k = index + 1;
        let role = if plan.is_encoder(k) { "encoder" } else { "decoder" };
        let tieable = if plan.tieable.contains(&k) { " (tieable)" } else { "" };
        println!("{role} {k:>2}  {spec:?} -> {}{tieable}", plan.trace[k]);
    }
    if let Some(latent) = plan.latent() {
        println!("latent {latent}");
    }
    Ok(())
}

/// Train on `data` and write the metrics next to the checkpoints.
pub fn train(config: &RunConfig, data: &Path, val: Option<&Path>) -> anyhow::Result<()> {
    let mut ae = config.build()?;
    ae.add_train_op(TRAIN_OP, config.resolved_train_op())?;
    let data_train = read_samples(data)?;
    let data_val = val.map(read_samples).transpose()?;
    check_width(&ae, &data_train, data)?;

    let metrics = ae.train(&data_train, data_val.as_ref(), TRAIN_OP, &config.train)?;
    if let Some(save_addr) = &config.train.save_addr {
        let path = save_addr.join("metrics.json");
        atomic_write_json(&path, &metrics)?;
        info!(path = %path.display(), "Metrics written");
    }
    println!(
        "trained {} epochs, final loss {:.6}, best epoch {}",
        metrics.epochs_completed,
        metrics.last_loss().unwrap_or(f64::NAN),
        metrics.best_epoch.map_or_else(|| "-".to_string(), |e| e.to_string()),
    );
    Ok(())
}

/// Run an inference mapping with the parameters stored at `checkpoint`.
pub fn infer(
    config: &RunConfig,
    mode: Inference,
    checkpoint: PathBuf,
    input: &Path,
    output: &Path,
) -> anyhow::Result<()> {
    let mut ae = config.build()?;
    ae.add_model(checkpoint, CLI_MODEL);
    let samples = read_samples(input)?;
    let result = match mode {
        Inference::Encode => {
            check_width(&ae, &samples, input)?;
            ae.encoder(CLI_MODEL, samples.inputs())?
        }
        Inference::Decode => ae.decoder(CLI_MODEL, samples.inputs())?,
        Inference::Reconstruct => {
            check_width(&ae, &samples, input)?;
            ae.encoder_decoder(CLI_MODEL, samples.inputs())?
        }
    };
    write_samples(output, &result)?;
    info!(?mode, samples = result.nrows(), path = %output.display(), "Output written");
    Ok(())
}

/// Read a JSON array of equally long sample arrays.
pub fn read_samples(path: &Path) -> anyhow::Result<Dataset> {
    let rows: Vec<Vec<f32>> =
        require_json(path).with_context(|| format!("reading samples from {}", path.display()))?;
    Ok(Dataset::from_rows(rows)?)
}

pub fn write_samples(path: &Path, samples: &Array2<f32>) -> anyhow::Result<()> {
    let rows: Vec<Vec<f32>> = samples.rows().into_iter().map(|r| r.to_vec()).collect();
    atomic_write_json(path, &rows).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn check_width(ae: &Autoencoder, data: &Dataset, path: &Path) -> anyhow::Result<()> {
    if !data.is_empty() && data.width() != ae.input_size() {
        bail!(
            "{} holds samples of {} values but the network expects {}",
            path.display(),
            data.width(),
            ae.input_size()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsae_core::MlpConfig;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn config(dir: &Path) -> RunConfig {
        let mut config = RunConfig {
            mlp: MlpConfig {
                input_size: Some(6),
                encoder_size: vec![4, 2],
                seed: Some(4),
                ..MlpConfig::default()
            },
            ..RunConfig::default()
        };
        config.train.n_epochs = 3;
        config.train.save_epochs = vec![3];
        config.train.batch_size = 2;
        config.train.seed = Some(1);
        config.train.save_addr = Some(dir.join("run"));
        config
    }

    fn write_rows(path: &Path, rows: &[Vec<f32>]) {
        std::fs::write(path, serde_json::to_vec(rows).unwrap()).unwrap();
    }

    #[test]
    fn test_train_then_encode_and_decode() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let data = dir.path().join("data.json");
        write_rows(
            &data,
            &(0..5)
                .map(|i| (0..6).map(|j| ((i + j) % 3) as f32 / 2.0).collect())
                .collect::<Vec<_>>(),
        );
        train(&config, &data, None).unwrap();
        assert!(dir.path().join("run/metrics.json").exists());

        let checkpoint = dir.path().join("run/epoch_3");
        let codes = dir.path().join("codes.json");
        infer(&config, Inference::Encode, checkpoint.clone(), &data, &codes).unwrap();
        let z = read_samples(&codes).unwrap();
        assert_eq!((z.len(), z.width()), (5, 2));

        let decoded = dir.path().join("decoded.json");
        infer(&config, Inference::Decode, checkpoint.clone(), &codes, &decoded).unwrap();
        let recon = dir.path().join("recon.json");
        infer(&config, Inference::Reconstruct, checkpoint, &data, &recon).unwrap();
        let (decoded, recon) = (read_samples(&decoded).unwrap(), read_samples(&recon).unwrap());
        assert_eq!((decoded.len(), decoded.width()), (5, 6));
        let gap = (&decoded.inputs() - &recon.inputs()).fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(gap < 1e-5, "decode and reconstruct differ by {gap}");
    }

    #[test]
    fn test_wrong_sample_width() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data.json");
        write_rows(&data, &[vec![0.0; 5]]);
        let err = train(&config(dir.path()), &data, None).unwrap_err();
        assert!(err.to_string().contains("expects 6"), "{err}");
    }

    #[test]
    fn test_plan_reports_errors() {
        let config = RunConfig::default();
        assert!(plan(&config).is_err());
    }
}
