//! # ipuflow
//!
//! Host-side orchestration for running traced models on IPU accelerators.
//!
//! Graph capture, compilation and execution are done by an external
//! compiler/runtime, reached through the [`runtime::Runtime`] trait. This
//! crate decides when that runtime is called and with what: it binds call
//! arguments, derives the trace view of a batch, strips and restores half
//! precision, converts optimizers, and keeps host and device weights in
//! step between a training and an inference wrapper.
//!
//! ## Usage
//!
//! ```rust
//! use ipuflow::prelude::*;
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `ipuflow-core` | DType, Shape, Layout, HostTensor, Value/ArgTree, Error |
//! | `ipuflow` | Options, argument binding, batching, precision, optimizers, execution |
//!
//! ## Modules
//!
//! - [`options`]: layered, validated configuration
//! - [`args`]: binding call arguments to a model signature
//! - [`batch`]: trace view of a full per-step batch
//! - [`precision`]: half precision around graph capture
//! - [`optimizer`]: host optimizers and device descriptors
//! - [`runtime`]: the external compiler/runtime boundary
//! - [`model`]: model capabilities, shared handles and staleness
//! - [`exec`]: training and inference wrappers
//! - [`ops`]: graph annotations (IPU blocks, losses, custom ops)
//! - [`logging`]: console subscriber setup

/// Re-export core types.
pub use ipuflow_core::{
    bail, ArgTree, DType, Error, HostTensor, Layout, Result, Shape, Storage, Value, WithDType,
};

pub mod args;
pub mod batch;
pub mod exec;
pub mod logging;
pub mod model;
pub mod ops;
pub mod optimizer;
pub mod options;
pub mod precision;
pub mod runtime;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::args::{Binding, CallArgs, Signature};
    pub use crate::exec::{
        inference_model, training_model, Executor, InferenceModel, Loss, Output, TrainingModel,
    };
    pub use crate::model::{HostSync, LayerInfo, Model, ModelRef, StalenessResolvable};
    pub use crate::ops::{custom_op, identity_loss, print_tensor, GraphAnnotator, IpuBlock, Reduction};
    pub use crate::optimizer::{HostOptimizer, OptimizerDescriptor, OptimizerType};
    pub use crate::options::{AnchorMode, ConnectionType, Options, SyncPattern};
    pub use crate::runtime::{propagate_input_shapes, Runtime, TracedGraph};
    pub use crate::{ArgTree, DType, Error, HostTensor, Result, Shape, Value};
}
