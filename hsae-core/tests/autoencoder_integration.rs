//! End-to-end tests: build, train, checkpoint and run inference through the
//! public API.

use hsae_core::engine::checkpoint;
use hsae_core::network::{ArchitecturePlan, BuildOptions, DataShape, LayerSpec, TrainOp};
use hsae_core::{
    AeError, Activation, Autoencoder, CnnConfig, Dataset, LossKind, MlpConfig, NetworkKind,
    Padding, TrainConfig, TrainOpConfig, WeightInit,
};
use ndarray::Array2;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn mlp(tied: Option<Vec<i64>>, skip: bool) -> Autoencoder {
    Autoencoder::mlp(&MlpConfig {
        input_size: Some(12),
        encoder_size: vec![8, 4],
        tied_weights: tied,
        skip_connect: skip,
        seed: Some(11),
        ..MlpConfig::default()
    })
    .unwrap()
}

/// Gaussian bumps at a few positions, a stand-in for smooth spectra.
fn spectra(n: usize, width: usize) -> Dataset {
    Dataset::new(Array2::from_shape_fn((n, width), |(i, j)| {
        let centre = (i % 4) as f32 * width as f32 / 4.0 + 1.0;
        (-((j as f32 - centre).powi(2)) / 6.0).exp()
    }))
}

#[test]
fn zero_vectors_reconstruct_to_input_width() {
    let mut ae = mlp(None, false);
    let dir = TempDir::new().unwrap();
    ae.save(dir.path(), 0, None).unwrap();
    ae.add_model(dir.path(), "init");

    let samples = Array2::<f32>::zeros((5, 12));
    let y = ae.encoder_decoder("init", samples.view()).unwrap();
    assert_eq!(y.dim(), (5, 12));
    assert!(y.iter().all(|v| v.is_finite()));
}

#[test]
fn tied_decoder_follows_encoder_weight() {
    let mut ae = mlp(Some(vec![1, 1]), false);
    let encoder_w1 = ae.params().find("encoder_w1").unwrap();
    assert!(ae.params().find("decoder_w4").is_none());

    let before = ae.effective_weight(4).unwrap();
    assert_eq!(before.shape(), &[8, 12]);
    ae.params_mut().value_mut(encoder_w1).unwrap()[[3, 5]] = 42.0;
    let after = ae.effective_weight(4).unwrap();
    assert_eq!(after[[5, 3]], 42.0);
}

#[test]
fn untied_decoder_is_independent() {
    let mut ae = mlp(Some(vec![0, 0]), false);
    let encoder_w1 = ae.params().find("encoder_w1").unwrap();
    let before = ae.effective_weight(4).unwrap();
    ae.params_mut().value_mut(encoder_w1).unwrap().fill(7.0);
    assert_eq!(ae.effective_weight(4).unwrap(), before);
}

#[test]
fn invalid_tying_flag_is_a_config_error() {
    let err = Autoencoder::mlp(&MlpConfig {
        input_size: Some(12),
        encoder_size: vec![8, 4],
        tied_weights: Some(vec![1, 2]),
        ..MlpConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, AeError::Config(_)), "{err}");
}

#[test]
fn skip_mismatch_is_a_shape_error() {
    let mut plan: ArchitecturePlan = hsae_core::network::plan_mlp(Some(12), &[8, 4]).unwrap();
    plan.layers[2] = LayerSpec::Dense {
        inputs: 4,
        outputs: 6,
    };
    plan.layers[3] = LayerSpec::Dense {
        inputs: 6,
        outputs: 12,
    };
    plan.trace[3] = DataShape::Flat(6);
    let options = BuildOptions {
        skip_connect: true,
        ..BuildOptions::from(&MlpConfig::default())
    };
    let err = Autoencoder::from_plan(NetworkKind::Mlp, plan, &options).unwrap_err();
    assert!(matches!(err, AeError::ShapeMismatch(_)), "{err}");
}

#[test]
fn model_lookup() {
    let mut ae = mlp(None, false);
    let dir = TempDir::new().unwrap();
    ae.save(dir.path(), 0, None).unwrap();
    ae.add_model(dir.path(), "first");
    assert_eq!(ae.models().resolve("first").unwrap(), dir.path());

    let samples = Array2::<f32>::zeros((1, 12));
    let err = ae.encoder("second", samples.view()).unwrap_err();
    assert!(matches!(err, AeError::Lookup(_)));
}

#[test]
fn training_reduces_loss_and_checkpoints_restore() {
    let mut ae = Autoencoder::mlp(&MlpConfig {
        input_size: Some(16),
        encoder_size: vec![8, 3],
        weight_init_opt: WeightInit::Xavier,
        seed: Some(3),
        ..MlpConfig::default()
    })
    .unwrap();
    ae.add_train_op(
        "sse",
        TrainOpConfig {
            loss_func: Some(LossKind::Sse),
            learning_rate: 0.01,
            ..TrainOpConfig::default()
        },
    )
    .unwrap();

    let dir = TempDir::new().unwrap();
    let config = TrainConfig {
        n_epochs: 80,
        save_addr: Some(dir.path().to_path_buf()),
        save_epochs: vec![80],
        batch_size: 8,
        seed: Some(1),
        ..TrainConfig::default()
    };
    let data = spectra(24, 16);
    let metrics = ae.train(&data, None, "sse", &config).unwrap();
    assert_eq!(metrics.epochs_completed, 80);
    assert!(metrics.loss_history[79] < metrics.loss_history[0]);

    let addr = hsae_core::training::epoch_addr(dir.path(), 80);
    let (manifest, saved) = checkpoint::load(&addr).unwrap();
    assert_eq!(manifest.epoch, 80);
    assert_eq!(saved.len(), ae.params().len());

    ae.add_model(&addr, "trained");
    let live = ae.encoder_decoder("trained", data.inputs()).unwrap();

    let mut fresh = Autoencoder::mlp(&MlpConfig {
        input_size: Some(16),
        encoder_size: vec![8, 3],
        seed: Some(99),
        ..MlpConfig::default()
    })
    .unwrap();
    fresh.add_model(&addr, "trained");
    assert_eq!(fresh.encoder_decoder("trained", data.inputs()).unwrap(), live);
}

#[test]
fn train_ops_with_different_losses_coexist() {
    let mut ae = mlp(None, false);
    ae.add_train_op("default", TrainOpConfig::default()).unwrap();
    ae.add_train_op(
        "sa",
        TrainOpConfig {
            loss_func: Some(LossKind::Sa),
            ..TrainOpConfig::default()
        },
    )
    .unwrap();
    let default = ae.train_ops().get("default").unwrap();
    assert_eq!(default.config().loss_func, Some(LossKind::Csa));
    assert!(ae.train_ops().contains("sa"));
    assert_eq!(ae.train_ops().len(), 2);
}

#[test]
fn cnn_end_to_end() {
    let mut ae = Autoencoder::cnn(&CnnConfig {
        input_size: Some(32),
        z_dim: 3,
        encoder_num_filters: vec![4, 4],
        encoder_filter_size: vec![5, 3],
        encoder_stride: vec![1, 2],
        padding: Padding::Same,
        activation_func: Activation::Relu,
        tied_weights: Some(vec![1, 1]),
        skip_connect: true,
        seed: Some(8),
        ..CnnConfig::default()
    })
    .unwrap();
    assert_eq!(ae.kind(), NetworkKind::Cnn);
    assert_eq!(ae.plan().latent(), Some(DataShape::Flat(3)));

    ae.add_train_op(
        "csa",
        TrainOpConfig {
            loss_func: Some(LossKind::Csa),
            wd_lambda: 1e-4,
            ..TrainOpConfig::default()
        },
    )
    .unwrap();
    let dir = TempDir::new().unwrap();
    let config = TrainConfig {
        n_epochs: 3,
        save_addr: Some(dir.path().to_path_buf()),
        save_epochs: vec![3],
        batch_size: 4,
        seed: Some(2),
        ..TrainConfig::default()
    };
    let data = spectra(8, 32);
    let metrics = ae.train(&data, Some(&spectra(4, 32)), "csa", &config).unwrap();
    assert_eq!(metrics.val_loss_history.len(), 3);

    ae.add_model(hsae_core::training::epoch_addr(dir.path(), 3), "cnn");
    let z = ae.encoder("cnn", data.inputs()).unwrap();
    assert_eq!(z.dim(), (8, 3));
    let y = ae.encoder_decoder("cnn", data.inputs()).unwrap();
    assert_eq!(y.dim(), (8, 32));
}

#[test]
fn denoising_targets_train_through_separate_views() {
    let clean = spectra(6, 12);
    let noisy = Array2::from_shape_fn((6, 12), |(i, j)| {
        clean.inputs()[[i, j]] + if (i + j) % 2 == 0 { 0.05 } else { -0.05 }
    });
    let data = Dataset::with_targets(noisy, clean.inputs().to_owned()).unwrap();

    let mut ae = mlp(None, false);
    let sse = TrainOpConfig {
        loss_func: Some(LossKind::Sse),
        ..TrainOpConfig::default()
    };
    ae.add_train_op("denoise", sse).unwrap();
    let config = TrainConfig {
        n_epochs: 5,
        save_epochs: Vec::new(),
        batch_size: 3,
        seed: Some(4),
        ..TrainConfig::default()
    };
    let metrics = ae.train(&data, Some(&data), "denoise", &config).unwrap();
    assert_eq!(metrics.val_loss_history.len(), 5);

    // the same step driven directly, inputs and targets borrowed from
    // different arrays
    let mut op: TrainOp = ae.train_ops().get("denoise").unwrap().clone();
    let mut params = ae.params().clone();
    let (inputs, targets) = (data.inputs(), data.targets());
    let step = op.step(ae.graph(), &mut params, inputs, targets, 0).unwrap();
    assert!(step.loss.is_finite());
    assert!(op.evaluate(ae.graph(), &params, inputs, targets).unwrap().is_finite());
}
