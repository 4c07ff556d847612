// Train - Wrapping a model and a loss for training on the device
//
// The device runs forward, loss, backward and the optimizer step as one
// compiled graph. The host side only has to present the model and the loss
// as a single callable taking `(args, loss_inputs)`:
//
//   TrainingWrapper::forward([args, loss_inputs])
//       output = model.forward([args])
//       loss   = loss(output, loss_inputs)     when a loss was given
//       → (output, loss)                        or just output
//
// The wrapper calls the model directly, without resolving staleness: it is
// what gets captured, and capturing must not copy weights around.
//
// `training_model` installs its device state as the staleness hook of the
// model handle it was given. Every clone of that handle, before or after the
// call, then pulls trained weights back from the device before reads, and
// an inference wrapper built from any of them observes training progress.

use std::rc::Rc;

use ipuflow_core::{ArgTree, DType, Error, HostTensor, Result};

use super::engine::Executor;
use crate::args::Signature;
use crate::model::{LayerInfo, Model, ModelRef};
use crate::optimizer::{HostOptimizer, OptimizerDescriptor};
use crate::options::{AnchorMode, Options};
use crate::runtime::Runtime;

/// Learning rate of the optimizer used when none is supplied.
pub const DEFAULT_LEARNING_RATE: f64 = 0.01;

/// A loss computed from the model output and the loss inputs.
pub trait Loss {
    fn loss(&self, output: &ArgTree, target: &ArgTree) -> Result<ArgTree>;
}

impl<F> Loss for F
where
    F: Fn(&ArgTree, &ArgTree) -> Result<ArgTree>,
{
    fn loss(&self, output: &ArgTree, target: &ArgTree) -> Result<ArgTree> {
        self(output, target)
    }
}

/// A model plus an optional loss, called as `(args, loss_inputs)`.
pub struct TrainingWrapper<M> {
    model: ModelRef<M>,
    loss: Option<Box<dyn Loss>>,
}

impl<M> TrainingWrapper<M> {
    pub fn new(model: ModelRef<M>, loss: Option<Box<dyn Loss>>) -> Self {
        Self { model, loss }
    }

    /// The wrapped model.
    pub fn model(&self) -> &ModelRef<M> {
        &self.model
    }

    pub fn has_loss(&self) -> bool {
        self.loss.is_some()
    }
}

impl<M: Model> Model for TrainingWrapper<M> {
    fn signature(&self) -> Signature {
        Signature::new()
            .required("args")
            .optional("loss_inputs", ArgTree::none())
    }

    fn forward(&self, inputs: &[ArgTree]) -> Result<ArgTree> {
        let args = inputs.first().ok_or_else(|| Error::MissingMandatoryArgument {
            name: "args".to_string(),
        })?;
        let output = self.model.borrow()?.forward(std::slice::from_ref(args))?;
        match &self.loss {
            Some(loss) => {
                let target = inputs.get(1).cloned().unwrap_or_default();
                let loss = loss.loss(&output, &target)?;
                Ok(ArgTree::sequence([output, loss]))
            }
            None => Ok(output),
        }
    }

    fn named_parameters(&self) -> Result<Vec<(String, HostTensor)>> {
        self.model.borrow()?.named_parameters()
    }

    fn layers(&self) -> Result<Vec<LayerInfo>> {
        self.model.borrow()?.layers()
    }

    fn cast_layer(&mut self, layer: &str, dtype: DType) -> Result<()> {
        self.model.borrow_mut()?.cast_layer(layer, dtype)
    }
}

/// A training wrapper.
pub type TrainingModel<R, M> = Executor<R, TrainingWrapper<M>>;

impl<R: Runtime + 'static, M: Model> Executor<R, TrainingWrapper<M>> {
    /// Handle to the trained model. Reading parameters or calling forward
    /// through it first copies trained weights back from the device.
    pub fn trained_model(&self) -> ModelRef<M> {
        self.model().model().clone()
    }
}

/// Wrap `model` for training.
///
/// A Default anchor mode becomes Final: only the last result of each call
/// is returned. Without an optimizer, SGD with a learning rate of 0.01 is
/// used. Optimizer errors are reported here, before anything is compiled.
pub fn training_model<R, M>(
    runtime: Rc<R>,
    model: ModelRef<M>,
    mut options: Options,
    loss: Option<Box<dyn Loss>>,
    optimizer: Option<&HostOptimizer>,
) -> Result<TrainingModel<R, M>>
where
    R: Runtime + 'static,
    M: Model,
{
    if options.is_default_anchor_mode() {
        options.set_anchor_mode(AnchorMode::Final, None)?;
    }
    let descriptor = match optimizer {
        Some(optimizer) => OptimizerDescriptor::from_optimizer(optimizer)?,
        None => OptimizerDescriptor::from_optimizer(&HostOptimizer::sgd(DEFAULT_LEARNING_RATE))?,
    };
    let wrapper = TrainingWrapper::new(model.clone(), loss);
    let executor = Executor::new(runtime, wrapper, options, true, Some(descriptor));
    model.set_host_sync(executor.device_state());
    Ok(executor)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Double;

    impl Model for Double {
        fn signature(&self) -> Signature {
            Signature::new().required("x")
        }

        fn forward(&self, inputs: &[ArgTree]) -> Result<ArgTree> {
            match inputs[0] {
                ArgTree::Leaf(ipuflow_core::Value::Int(i)) => Ok(ArgTree::from(2 * i)),
                _ => Err(Error::msg("expected an int")),
            }
        }

        fn named_parameters(&self) -> Result<Vec<(String, HostTensor)>> {
            Ok(Vec::new())
        }
    }

    fn l1(output: &ArgTree, target: &ArgTree) -> Result<ArgTree> {
        match (output.as_leaf(), target.as_leaf()) {
            (
                Some(ipuflow_core::Value::Int(o)),
                Some(ipuflow_core::Value::Int(t)),
            ) => Ok(ArgTree::from((o - t).abs())),
            _ => Err(Error::msg("expected ints")),
        }
    }

    #[test]
    fn test_wrapper_returns_output_and_loss() {
        let w = TrainingWrapper::new(ModelRef::new(Double), Some(Box::new(l1)));
        let out = w
            .forward(&[ArgTree::from(3_i64), ArgTree::from(10_i64)])
            .unwrap();
        assert_eq!(
            out,
            ArgTree::sequence([ArgTree::from(6_i64), ArgTree::from(4_i64)])
        );
    }

    #[test]
    fn test_wrapper_without_loss_returns_output() {
        let w = TrainingWrapper::new(ModelRef::new(Double), None);
        assert!(!w.has_loss());
        assert_eq!(w.forward(&[ArgTree::from(4_i64)]).unwrap(), ArgTree::from(8_i64));
        assert_eq!(w.signature().names(), vec!["args", "loss_inputs"]);
    }
}
