// Runtime - The boundary to the external graph compiler and device runtime
//
// Graph capture, compilation, placement and execution all happen outside
// this crate. Everything the orchestrator needs from that world is spelled
// out here as two traits:
//
//   TracedGraph  a captured graph: its inputs can be annotated with sample
//                tensors and its layers cast between precisions.
//   Runtime      capture (trace/script), compile, execute and weight copies.
//
// Implementations are free to do anything behind these calls; errors they
// return are wrapped in `Error::Runtime` and surface unchanged.

use ipuflow_core::{ArgTree, DType, Error, HostTensor, Result, Value};

use crate::model::Model;
use crate::optimizer::OptimizerDescriptor;
use crate::options::FlatOptions;

/// A graph captured from a model by tracing or scripting.
pub trait TracedGraph {
    /// Number of graph inputs. A scripted graph's first input is the model
    /// itself.
    fn input_count(&self) -> usize;

    /// Annotate input `index` with the shape and dtype of `sample`.
    fn infer_input_type(&mut self, index: usize, sample: &HostTensor) -> Result<()>;

    /// Convert the parameters of `layer` to `dtype` in the captured graph.
    fn cast_layer(&mut self, layer: &str, dtype: DType) -> Result<()>;
}

/// The external compiler and device runtime.
///
/// Methods take `&self`: one runtime is shared by every wrapper built on
/// it, and the executables it returns are owned by those wrappers.
pub trait Runtime {
    type Graph: TracedGraph;
    type Executable;

    /// Capture `model` by running it on `inputs`.
    fn trace(&self, model: &dyn Model, inputs: &[ArgTree]) -> Result<Self::Graph>;

    /// Capture `model` from its definition, without running it.
    fn script(&self, model: &dyn Model) -> Result<Self::Graph>;

    /// Propagate the annotated input shapes through the whole graph.
    fn propagate_input_shapes(&self, graph: &mut Self::Graph) -> Result<()>;

    /// Compile a traced graph. `inputs` are the flattened trace-view inputs
    /// whose dtypes become the executable's input contract.
    fn compile_with_trace(
        &self,
        graph: &Self::Graph,
        inputs: &[Value],
        options: &FlatOptions,
        training: bool,
        optimizer: Option<&OptimizerDescriptor>,
    ) -> Result<Self::Executable>;

    /// Compile a scripted graph whose inputs were annotated beforehand.
    fn compile_with_script(
        &self,
        graph: &Self::Graph,
        inputs: &[Value],
        options: &FlatOptions,
        training: bool,
        optimizer: Option<&OptimizerDescriptor>,
    ) -> Result<Self::Executable>;

    /// Run one step on the full-size inputs. `optimizer` is `Some` only when
    /// the device optimizer must be updated before running.
    fn execute(
        &self,
        executable: &Self::Executable,
        inputs: &[Value],
        optimizer: Option<&OptimizerDescriptor>,
    ) -> Result<Vec<ArgTree>>;

    /// Copy device weights into the host model's parameters.
    fn copy_weights_to_host(&self, executable: &Self::Executable) -> Result<()>;

    /// Copy the host model's parameters onto the device.
    fn copy_weights_to_device(&self, executable: &Self::Executable) -> Result<()>;

    /// Textual IR of a compiled executable, for debugging.
    fn debug_ir(&self, _executable: &Self::Executable) -> Result<String> {
        Err(Error::msg("this runtime cannot print the IR of an executable"))
    }

    /// Whether real IPU hardware is attached to this host.
    fn ipu_hardware_is_available(&self) -> bool;
}

/// Annotate the inputs of `graph` from `dummy_inputs`, then let the runtime
/// propagate shapes through the graph. Non-tensor inputs are skipped.
pub fn propagate_input_shapes<R: Runtime + ?Sized>(
    runtime: &R,
    graph: &mut R::Graph,
    dummy_inputs: &[Value],
) -> Result<()> {
    let count = graph.input_count();
    for (index, input) in dummy_inputs.iter().enumerate().take(count) {
        if let Value::Tensor(t) = input {
            graph.infer_input_type(index, t)?;
        }
    }
    runtime.propagate_input_shapes(graph)
}
