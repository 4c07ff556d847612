// Engine - The per-wrapper iteration state machine
//
// An Executor owns one model, one Options and, after the first call, one
// compiled executable. It moves through two states only:
//
//   Uncompiled ──first call / compile()──► Compiled
//
// The transition binds the call's arguments, narrows them to the trace
// view, strips half precision, captures the model (trace or script),
// restores half precision on the captured graph and compiles it. The
// executable is kept for the life of the wrapper; nothing here recompiles.
//
// Every call in the Compiled state:
//
//   1. binds the arguments at full size (non-contiguous tensors densified)
//   2. inference only: resolves host staleness through the shared model's
//      HostSync and, if host weights were refreshed since this wrapper last
//      looked, pushes them to this device
//   3. pushes host-edited weights if they were marked modified
//   4. executes, with the new optimizer descriptor if it differs from the
//      one on the device; the descriptor counts as pushed once execute
//      succeeds
//   5. training only: marks host weights stale
//   6. unwraps a single output, otherwise returns the sequence

use std::rc::Rc;

use tracing::{debug, info, warn};

use ipuflow_core::{ArgTree, Result, Value};

use crate::args::{Binding, CallArgs};
use crate::batch::BatchReshaper;
use crate::model::{DeviceState, Model, ModelRef};
use crate::optimizer::{HostOptimizer, OptimizerDescriptor};
use crate::options::{AnchorMode, ConnectionType, Options};
use crate::precision::PrecisionNormalizer;
use crate::runtime::{Runtime, TracedGraph};

// Output

/// What one call returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// The runtime returned exactly one result.
    Single(ArgTree),
    /// The runtime returned zero or several results, in order.
    Many(Vec<ArgTree>),
    /// The wrapper was compiled with `ConnectionType::Never` and nothing ran.
    NotExecuted,
}

impl Output {
    fn from_results(mut results: Vec<ArgTree>) -> Self {
        if results.len() == 1 {
            if let Some(single) = results.pop() {
                return Output::Single(single);
            }
        }
        Output::Many(results)
    }

    pub fn is_executed(&self) -> bool {
        !matches!(self, Output::NotExecuted)
    }

    /// The single result, if there was exactly one.
    pub fn single(self) -> Option<ArgTree> {
        match self {
            Output::Single(tree) => Some(tree),
            _ => None,
        }
    }

    /// All results as a list (empty when nothing ran).
    pub fn into_vec(self) -> Vec<ArgTree> {
        match self {
            Output::Single(tree) => vec![tree],
            Output::Many(trees) => trees,
            Output::NotExecuted => Vec::new(),
        }
    }
}

// Executor

/// Compiles a model on first use and runs it on the device.
pub struct Executor<R: Runtime + 'static, M: Model> {
    /// The wrapped host model.
    model: M,
    /// Configuration, resolved (anchor mode) by the constructors.
    options: Options,
    /// Whether executions update weights on the device.
    training: bool,
    /// Executable and staleness flags, shared with model handles.
    device: Rc<DeviceState<R>>,
    /// Descriptor currently on the device.
    optimizer: Option<OptimizerDescriptor>,
    /// Descriptor requested by `set_optimizer`, pushed on the next call.
    new_optimizer: Option<OptimizerDescriptor>,
    /// `HostSync::refreshes()` of the model when this device last got
    /// host weights.
    host_refreshes_seen: u64,
    warned_not_contiguous_input: bool,
}

impl<R: Runtime + 'static, M: Model> Executor<R, M> {
    /// Create an uncompiled executor. `optimizer` is the descriptor the
    /// executable is compiled with; it is only meaningful when training.
    pub fn new(
        runtime: Rc<R>,
        model: M,
        options: Options,
        training: bool,
        optimizer: Option<OptimizerDescriptor>,
    ) -> Self {
        Self {
            model,
            options,
            training,
            device: Rc::new(DeviceState::new(runtime)),
            new_optimizer: optimizer.clone(),
            optimizer,
            host_refreshes_seen: 0,
            warned_not_contiguous_input: false,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn is_compiled(&self) -> bool {
        self.device.is_compiled()
    }

    /// The device side of this wrapper, usable as a staleness hook.
    pub fn device_state(&self) -> Rc<DeviceState<R>> {
        Rc::clone(&self.device)
    }

    /// The optimizer descriptor currently on the device.
    pub fn optimizer(&self) -> Option<&OptimizerDescriptor> {
        self.optimizer.as_ref()
    }

    /// Replace the optimizer. The descriptor is pushed with the next call
    /// if it differs from the current one.
    pub fn set_optimizer(&mut self, optimizer: &HostOptimizer) -> Result<()> {
        self.new_optimizer = Some(OptimizerDescriptor::from_optimizer(optimizer)?);
        Ok(())
    }

    /// Copy device weights into the host model.
    pub fn copy_weights_to_host(&self) -> Result<()> {
        self.device.copy_weights_to_host()
    }

    /// Copy host weights onto the device. Compilation already does this, so
    /// it is only needed after editing host weights by hand.
    pub fn copy_weights_to_device(&self) -> Result<()> {
        self.device.copy_weights_to_device()
    }

    /// Record a host-side edit of the weights; the next call pushes them.
    pub fn mark_host_weights_modified(&self) {
        self.device.mark_device_stale();
    }

    /// Textual IR of the compiled executable.
    pub fn debug_ir(&self) -> Result<String> {
        self.device.with_executable(|rt, exe| rt.debug_ir(exe))
    }

    /// Compile for `call` without executing. No-op once compiled.
    pub fn compile(&mut self, call: &CallArgs) -> Result<()> {
        if self.is_compiled() {
            return Ok(());
        }
        let binding = self.bind(call)?;
        self.compile_binding(&binding)
    }

    /// Run one step, compiling first if needed.
    pub fn call(&mut self, call: &CallArgs) -> Result<Output> {
        let binding = self.bind(call)?;

        if !self.is_compiled() {
            self.compile_binding(&binding)?;
        }

        if self.options.connection_type() == Some(ConnectionType::Never) {
            info!("Compilation complete and ConnectionType::Never selected: returning");
            return Ok(Output::NotExecuted);
        }

        if !self.training {
            if let Some(sync) = self.model.host_sync() {
                sync.resolve()?;
                if sync.refreshes() != self.host_refreshes_seen {
                    debug!("Implicit copyWeightsToDevice()");
                    self.device.copy_weights_to_device()?;
                    self.host_refreshes_seen = sync.refreshes();
                }
            }
        }
        if self.device.device_stale() {
            debug!("Host weights modified: copyWeightsToDevice()");
            self.device.copy_weights_to_device()?;
        }

        let pending = self.new_optimizer.take();
        let push = pending
            .as_ref()
            .filter(|new| self.optimizer.as_ref() != Some(*new));

        let inputs = binding.as_flat_sequence();
        let results = match self
            .device
            .with_executable(|rt, exe| rt.execute(exe, &inputs, push))
        {
            Ok(results) => results,
            Err(e) => {
                // Not on the device yet: retry the push next call.
                self.new_optimizer = pending;
                return Err(e);
            }
        };
        if let Some(new) = pending {
            self.optimizer = Some(new);
        }

        if self.training {
            self.device.mark_host_stale();
        }

        Ok(Output::from_results(results))
    }

    /// Bind `call` to the model signature, densifying non-contiguous
    /// tensors.
    fn bind(&mut self, call: &CallArgs) -> Result<Binding> {
        let mut binding = Binding::bind(&self.model.signature(), call)?;
        let densified = binding.for_each_matched_at_least_once(
            |v| v.as_tensor().is_some_and(|t| !t.is_contiguous()),
            |v| match v {
                Value::Tensor(t) => Ok(Value::Tensor(t.contiguous()?)),
                other => Ok(other),
            },
        )?;
        if densified && !self.warned_not_contiguous_input {
            warn!(
                "At least one input tensor is not contiguous: non-contiguous tensors will be converted."
            );
            self.warned_not_contiguous_input = true;
        }
        Ok(binding)
    }

    fn compile_binding(&mut self, binding: &Binding) -> Result<()> {
        let flat_options = self.options.to_dict()?;
        info!(
            device_iterations = self.options.device_iterations(),
            training = self.training,
            "First call to the model: compiling"
        );

        let mut trace_view = binding.clone();
        BatchReshaper::from_options(&self.options).trace_view(&mut trace_view)?;
        let half_view = trace_view.clone();

        let mut precision = PrecisionNormalizer::new();
        precision.promote_inputs(&mut trace_view)?;

        let runtime = self.device.runtime();
        let optimizer = self.optimizer.as_ref();
        let executable = if self.options.trace_model() {
            info!("Compiling the model using tracing");
            precision.promote_model(&mut self.model)?;
            let traced = runtime.trace(&self.model, trace_view.as_slice());
            // The host model goes back to its own precision even if capture failed.
            precision.restore_model(&mut self.model)?;
            let mut graph = traced?;
            precision.restore(&mut graph)?;

            let inputs = if precision.converted_any_input() {
                half_view.as_flat_sequence()
            } else {
                trace_view.as_flat_sequence()
            };
            runtime.compile_with_trace(&graph, &inputs, &flat_options, self.training, optimizer)?
        } else {
            info!("Compiling the model using scripting");
            let mut graph = runtime.script(&self.model)?;
            // Input 0 of a scripted graph is the model itself.
            let count = graph.input_count();
            for (index, arg) in trace_view.as_slice().iter().enumerate() {
                if let Some(t) = arg.as_tensor() {
                    if index + 1 < count {
                        graph.infer_input_type(index + 1, t)?;
                    }
                }
            }
            runtime.compile_with_script(
                &graph,
                &trace_view.as_flat_sequence(),
                &flat_options,
                self.training,
                optimizer,
            )?
        };

        self.device.set_executable(executable);
        // Compilation uploads the current host weights.
        if let Some(sync) = self.model.host_sync() {
            self.host_refreshes_seen = sync.refreshes();
        }
        Ok(())
    }
}

/// An inference wrapper.
pub type InferenceModel<R, M> = Executor<R, ModelRef<M>>;

/// Wrap `model` for inference.
///
/// A Default anchor mode becomes All: every iteration's result is returned.
/// If a training wrapper shares `model` (through any clone of the handle),
/// each call first brings this device's weights up to date with training.
pub fn inference_model<R, M>(
    runtime: Rc<R>,
    model: ModelRef<M>,
    mut options: Options,
) -> Result<InferenceModel<R, M>>
where
    R: Runtime + 'static,
    M: Model,
{
    if options.is_default_anchor_mode() {
        options.set_anchor_mode(AnchorMode::All, None)?;
    }
    Ok(Executor::new(runtime, model, options, false, None))
}
