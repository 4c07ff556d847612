// Precision - Keeping half precision out of the capture, then putting it back
//
// Graph capture runs in full precision. Before tracing:
//
//   - every model layer holding F16/BF16 parameters is cast to F32 and
//     remembered with its original dtype;
//   - every F16/BF16 input tensor of the trace view is promoted to F32, and
//     the fact that anything was promoted is recorded.
//
// After tracing, the remembered layers are cast back on the captured graph
// and on the host model, which keeps its original precision.
// If any input was promoted, the executable is compiled against the
// caller's original half inputs, so its input dtype contract matches what
// will be fed at execution time.

use tracing::debug;

use ipuflow_core::{DType, Result, Value};

use crate::args::Binding;
use crate::model::Model;
use crate::runtime::TracedGraph;

/// Bookkeeping for one half → full → half round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrecisionNormalizer {
    converted_layers: Vec<(String, DType)>,
    converted_any_input: bool,
}

impl PrecisionNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cast every half layer of `model` to F32.
    pub fn promote_model(&mut self, model: &mut dyn Model) -> Result<()> {
        for layer in model.layers()? {
            if let Some(dtype) = layer.half_dtype() {
                debug!("Casting layer {} from {dtype} to {} for tracing", layer.name, DType::F32);
                model.cast_layer(&layer.name, DType::F32)?;
                self.converted_layers.push((layer.name, dtype));
            }
        }
        Ok(())
    }

    /// Promote half input tensors of `binding` to F32.
    pub fn promote_inputs(&mut self, binding: &mut Binding) -> Result<()> {
        let promoted = binding.for_each_matched_at_least_once(
            |v| v.as_tensor().is_some_and(|t| t.dtype().is_half()),
            |v| match v {
                Value::Tensor(t) => Ok(Value::Tensor(t.to_dtype(t.dtype().full_precision())?)),
                other => Ok(other),
            },
        )?;
        self.converted_any_input |= promoted;
        Ok(())
    }

    /// Cast the promoted layers back to their original dtype on `graph`.
    pub fn restore<G: TracedGraph + ?Sized>(&self, graph: &mut G) -> Result<()> {
        for (layer, dtype) in &self.converted_layers {
            graph.cast_layer(layer, *dtype)?;
        }
        Ok(())
    }

    /// Cast the promoted layers of the host model back.
    pub fn restore_model(&self, model: &mut dyn Model) -> Result<()> {
        for (layer, dtype) in &self.converted_layers {
            model.cast_layer(layer, *dtype)?;
        }
        Ok(())
    }

    /// Layers that were promoted, with their original dtype.
    pub fn converted_layers(&self) -> &[(String, DType)] {
        &self.converted_layers
    }

    pub fn converted_any_input(&self) -> bool {
        self.converted_any_input
    }
}
