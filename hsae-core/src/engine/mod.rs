//! Minimal numeric engine: parameters, a computation graph with reverse-mode
//! gradients, layer kernels, losses, optimisers and checkpoints.

pub mod checkpoint;
pub mod graph;
pub mod init;
pub mod loss;
pub mod ops;
pub mod optim;
pub mod params;
pub mod session;

pub use checkpoint::Checkpoint;
pub use graph::{Evaluation, Feeds, Gradients, Graph, NodeId, Op};
pub use init::{Initializer, WeightInit};
pub use loss::LossKind;
pub use ops::{Activation, Padding};
pub use optim::{LearningRateSchedule, Optimizer, OptimizerMethod};
pub use params::{ParamId, ParamStore, SavedParam};
pub use session::Session;
