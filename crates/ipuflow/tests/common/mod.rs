// Shared test doubles: a recording runtime and small host models

#![allow(dead_code)]

use std::cell::{Cell, RefCell};

use ipuflow::options::FlatOptions;
use ipuflow::prelude::*;

// Mock graph

#[derive(Debug, Default)]
pub struct MockGraph {
    pub inputs: usize,
    /// (input index, dims, dtype) recorded by `infer_input_type`.
    pub annotated: Vec<(usize, Vec<usize>, DType)>,
    /// (layer, dtype) recorded by `cast_layer`.
    pub casts: Vec<(String, DType)>,
}

impl TracedGraph for MockGraph {
    fn input_count(&self) -> usize {
        self.inputs
    }

    fn infer_input_type(&mut self, index: usize, sample: &HostTensor) -> Result<()> {
        self.annotated
            .push((index, sample.dims().to_vec(), sample.dtype()));
        Ok(())
    }

    fn cast_layer(&mut self, layer: &str, dtype: DType) -> Result<()> {
        self.casts.push((layer.to_string(), dtype));
        Ok(())
    }
}

// Mock runtime

#[derive(Debug)]
pub struct MockExecutable {
    pub training: bool,
    pub annotated: Vec<(usize, Vec<usize>, DType)>,
    pub casts: Vec<(String, DType)>,
}

/// Records every call; `execute` returns `outputs` integer results.
#[derive(Debug, Default)]
pub struct MockRuntime {
    pub traces: Cell<usize>,
    pub scripts: Cell<usize>,
    pub compiles: Cell<usize>,
    pub executes: Cell<usize>,
    pub to_host: Cell<usize>,
    pub to_device: Cell<usize>,
    pub propagations: Cell<usize>,
    pub outputs: Cell<usize>,
    pub fail_compile: Cell<bool>,
    pub fail_execute: Cell<bool>,

    /// Top-level trace inputs seen by `trace`.
    pub traced_inputs: RefCell<Vec<Vec<ArgTree>>>,
    /// Layers of the model as seen while tracing.
    pub traced_layers: RefCell<Vec<LayerInfo>>,
    pub compiled_inputs: RefCell<Vec<Vec<Value>>>,
    pub compiled_options: RefCell<Option<FlatOptions>>,
    pub compiled_optimizer: RefCell<Option<OptimizerDescriptor>>,
    pub executed_inputs: RefCell<Vec<Vec<Value>>>,
    pub pushed_optimizers: RefCell<Vec<Option<OptimizerDescriptor>>>,
    pub last_executable: RefCell<Option<(usize, Vec<(String, DType)>)>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        let rt = Self::default();
        rt.outputs.set(1);
        rt
    }

    pub fn with_outputs(outputs: usize) -> Self {
        let rt = Self::new();
        rt.outputs.set(outputs);
        rt
    }

    fn bump(counter: &Cell<usize>) {
        counter.set(counter.get() + 1);
    }

    fn compile(
        &self,
        graph: &MockGraph,
        inputs: &[Value],
        options: &FlatOptions,
        training: bool,
        optimizer: Option<&OptimizerDescriptor>,
    ) -> Result<MockExecutable> {
        Self::bump(&self.compiles);
        if self.fail_compile.get() {
            return Err(Error::runtime("mock compiler exploded"));
        }
        self.compiled_inputs.borrow_mut().push(inputs.to_vec());
        *self.compiled_options.borrow_mut() = Some(options.clone());
        *self.compiled_optimizer.borrow_mut() = optimizer.cloned();
        Ok(MockExecutable {
            training,
            annotated: graph.annotated.clone(),
            casts: graph.casts.clone(),
        })
    }
}

impl Runtime for MockRuntime {
    type Graph = MockGraph;
    type Executable = MockExecutable;

    fn trace(&self, model: &dyn Model, inputs: &[ArgTree]) -> Result<MockGraph> {
        Self::bump(&self.traces);
        self.traced_inputs.borrow_mut().push(inputs.to_vec());
        *self.traced_layers.borrow_mut() = model.layers()?;
        model.forward(inputs)?;
        Ok(MockGraph {
            inputs: inputs.len(),
            ..MockGraph::default()
        })
    }

    fn script(&self, model: &dyn Model) -> Result<MockGraph> {
        Self::bump(&self.scripts);
        Ok(MockGraph {
            inputs: model.signature().len() + 1,
            ..MockGraph::default()
        })
    }

    fn propagate_input_shapes(&self, _graph: &mut MockGraph) -> Result<()> {
        Self::bump(&self.propagations);
        Ok(())
    }

    fn compile_with_trace(
        &self,
        graph: &MockGraph,
        inputs: &[Value],
        options: &FlatOptions,
        training: bool,
        optimizer: Option<&OptimizerDescriptor>,
    ) -> Result<MockExecutable> {
        self.compile(graph, inputs, options, training, optimizer)
    }

    fn compile_with_script(
        &self,
        graph: &MockGraph,
        inputs: &[Value],
        options: &FlatOptions,
        training: bool,
        optimizer: Option<&OptimizerDescriptor>,
    ) -> Result<MockExecutable> {
        self.compile(graph, inputs, options, training, optimizer)
    }

    fn execute(
        &self,
        executable: &MockExecutable,
        inputs: &[Value],
        optimizer: Option<&OptimizerDescriptor>,
    ) -> Result<Vec<ArgTree>> {
        Self::bump(&self.executes);
        self.executed_inputs.borrow_mut().push(inputs.to_vec());
        self.pushed_optimizers.borrow_mut().push(optimizer.cloned());
        if self.fail_execute.get() {
            return Err(Error::runtime("mock device lost"));
        }
        *self.last_executable.borrow_mut() =
            Some((executable.annotated.len(), executable.casts.clone()));
        Ok((0..self.outputs.get())
            .map(|i| ArgTree::from(i as i64))
            .collect())
    }

    fn copy_weights_to_host(&self, _executable: &MockExecutable) -> Result<()> {
        Self::bump(&self.to_host);
        Ok(())
    }

    fn copy_weights_to_device(&self, _executable: &MockExecutable) -> Result<()> {
        Self::bump(&self.to_device);
        Ok(())
    }

    fn debug_ir(&self, executable: &MockExecutable) -> Result<String> {
        Ok(format!("mock-ir training={}", executable.training))
    }

    fn ipu_hardware_is_available(&self) -> bool {
        false
    }
}

// Models

/// A single linear layer `fc` taking `(x, mask = None)`.
pub struct TinyModel {
    pub weight: HostTensor,
    pub bias: HostTensor,
}

impl TinyModel {
    pub fn new(dtype: DType) -> Self {
        Self {
            weight: HostTensor::zeros((3, 3), dtype),
            bias: HostTensor::zeros(3, dtype),
        }
    }
}

impl Model for TinyModel {
    fn signature(&self) -> Signature {
        Signature::new()
            .required("x")
            .optional("mask", ArgTree::none())
    }

    fn forward(&self, inputs: &[ArgTree]) -> Result<ArgTree> {
        inputs
            .first()
            .cloned()
            .ok_or_else(|| Error::msg("no input"))
    }

    fn named_parameters(&self) -> Result<Vec<(String, HostTensor)>> {
        Ok(vec![
            ("fc.weight".to_string(), self.weight.clone()),
            ("fc.bias".to_string(), self.bias.clone()),
        ])
    }

    fn cast_layer(&mut self, layer: &str, dtype: DType) -> Result<()> {
        if layer != "fc" {
            return Err(Error::UnknownLayer {
                name: layer.to_string(),
            });
        }
        self.weight = self.weight.to_dtype(dtype)?;
        self.bias = self.bias.to_dtype(dtype)?;
        Ok(())
    }
}

/// `rows × 3` F32 tensor counting up from 0.
pub fn batch(rows: usize) -> HostTensor {
    HostTensor::from_vec(
        (0..rows * 3).map(|i| i as f32).collect::<Vec<_>>(),
        (rows, 3),
    )
    .unwrap()
}

pub fn mse(output: &ArgTree, _target: &ArgTree) -> Result<ArgTree> {
    Ok(output.clone())
}
