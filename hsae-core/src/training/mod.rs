//! Training infrastructure: datasets, the epoch loop and metrics.

pub mod dataset;
pub mod metrics;
pub mod runner;

pub use dataset::{Batch, BatchIterator, Dataset};
pub use metrics::TrainingMetrics;
pub use runner::{TrainConfig, epoch_addr};
