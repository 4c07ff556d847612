// Batch - Deriving the trace view from the full per-step batch
//
// One host call feeds the device with enough data for
//
//     device_iterations × replication_factor × gradient_accumulation
//
// micro-batches. The graph is traced and compiled for a single micro-batch,
// so every tensor's leading dimension is divided by that multiplier to build
// the trace view. The full-size inputs are what gets executed.

use ipuflow_core::{Error, HostTensor, Result, Value};

use crate::args::Binding;
use crate::options::Options;

/// Narrows the leading dimension of input tensors to one micro-batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReshaper {
    device_iterations: usize,
    replication_factor: usize,
    gradient_accumulation: usize,
}

impl BatchReshaper {
    /// Zero factors are treated as 1.
    pub fn new(
        device_iterations: usize,
        replication_factor: usize,
        gradient_accumulation: usize,
    ) -> Self {
        Self {
            device_iterations: device_iterations.max(1),
            replication_factor: replication_factor.max(1),
            gradient_accumulation: gradient_accumulation.max(1),
        }
    }

    /// Read the three factors from `options`. Non-positive values are
    /// treated as 1.
    pub fn from_options(options: &Options) -> Self {
        let factor = |v: i64| usize::try_from(v).ok().filter(|&v| v > 0).unwrap_or(1);
        Self::new(
            factor(options.device_iterations()),
            factor(options.replication_factor()),
            factor(options.gradient_accumulation()),
        )
    }

    pub fn multiplier(&self) -> Result<usize> {
        self.device_iterations
            .checked_mul(self.replication_factor)
            .and_then(|m| m.checked_mul(self.gradient_accumulation))
            .ok_or(Error::BatchMultiplierOverflow {
                device_iterations: self.device_iterations,
                replication_factor: self.replication_factor,
                gradient_accumulation: self.gradient_accumulation,
            })
    }

    /// Leading `dim0 / multiplier` rows of `tensor`, as a view.
    pub fn narrow(&self, tensor: &HostTensor) -> Result<HostTensor> {
        let batch_size = tensor.shape().leading_dim()?;
        let multiplier = self.multiplier()?;
        if batch_size % multiplier != 0 {
            return Err(Error::BatchDimension {
                shape: tensor.shape().clone(),
                batch_size,
                device_iterations: self.device_iterations,
                replication_factor: self.replication_factor,
                gradient_accumulation: self.gradient_accumulation,
                multiplier,
            });
        }
        tensor.narrow(0, 0, batch_size / multiplier)
    }

    /// Narrow every tensor leaf of `binding`. Non-tensor leaves are kept.
    pub fn trace_view(&self, binding: &mut Binding) -> Result<()> {
        binding.for_each(|v| match v {
            Value::Tensor(t) => Ok(Value::Tensor(self.narrow(&t)?)),
            other => Ok(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{CallArgs, Signature};
    use ipuflow_core::ArgTree;

    fn batch(n: usize) -> HostTensor {
        HostTensor::from_vec((0..n * 3).map(|i| i as f32).collect::<Vec<_>>(), (n, 3)).unwrap()
    }

    #[test]
    fn test_divides_leading_dim() {
        let opts = Options::new().with_device_iterations(4);
        let r = BatchReshaper::from_options(&opts);
        assert_eq!(r.multiplier().unwrap(), 4);
        let t = r.narrow(&batch(8)).unwrap();
        assert_eq!(t.dims(), &[2, 3]);
    }

    #[test]
    fn test_indivisible_reports_all_factors() {
        let r = BatchReshaper::new(4, 1, 1);
        match r.narrow(&batch(7)) {
            Err(Error::BatchDimension {
                batch_size,
                device_iterations,
                replication_factor,
                gradient_accumulation,
                multiplier,
                ..
            }) => {
                assert_eq!(batch_size, 7);
                assert_eq!(
                    (device_iterations, replication_factor, gradient_accumulation),
                    (4, 1, 1)
                );
                assert_eq!(multiplier, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_multiplier_overflow_is_an_error() {
        let opts = Options::new()
            .with_device_iterations(u32::MAX)
            .with_replication_factor(u32::MAX)
            .with_gradient_accumulation(u32::MAX);
        let r = BatchReshaper::from_options(&opts);
        assert!(matches!(
            r.narrow(&batch(8)),
            Err(Error::BatchMultiplierOverflow {
                device_iterations,
                ..
            }) if device_iterations == u32::MAX as usize
        ));
    }

    #[test]
    fn test_zero_factors_count_as_one() {
        let r = BatchReshaper::new(0, 2, 0);
        assert_eq!(r.multiplier().unwrap(), 2);
        assert_eq!(r.narrow(&batch(4)).unwrap().dims(), &[2, 3]);
    }

    #[test]
    fn test_scalar_has_no_batch_dim() {
        let scalar = HostTensor::from_vec(vec![1.0f32], ()).unwrap();
        assert!(matches!(
            BatchReshaper::new(1, 1, 1).narrow(&scalar),
            Err(Error::DimOutOfRange { .. })
        ));
    }

    #[test]
    fn test_trace_view_keeps_non_tensor_leaves() {
        let sig = Signature::new().required("x").required("k");
        let mut b = Binding::bind(&sig, &CallArgs::new().arg(batch(6)).arg(2_i64)).unwrap();
        BatchReshaper::new(1, 3, 2).trace_view(&mut b).unwrap();
        assert_eq!(b.as_slice()[0].as_tensor().unwrap().dims(), &[1, 3]);
        assert_eq!(b.as_slice()[1], ArgTree::from(2_i64));
    }
}
