//! Autoencoder construction: shape planning, parameter allocation, graph
//! assembly, train ops and the model registry.

pub mod assemble;
pub mod autoencoder;
pub mod params;
pub mod registry;
pub mod shape;
pub mod train_op;

pub use assemble::{AssemblyOptions, LayerNodes, NetworkGraph};
pub use autoencoder::{Autoencoder, BuildOptions, NetworkKind};
pub use params::{LayerParams, ParameterTable, TiedView, TyingFlags, WeightBinding, WeightDecay};
pub use registry::ModelRegistry;
pub use shape::{ArchitecturePlan, DataShape, LayerSpec, conv_output_shape, plan_cnn, plan_mlp};
pub use train_op::{StepLoss, TrainOp, TrainOpConfig, TrainOpSet};
