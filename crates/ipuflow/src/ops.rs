// Ops - Annotations a model places in its captured graph
//
// A model's forward pass can mark where things should happen on the
// device: which IPU runs a span of layers, which value is the loss, which
// tensors should be printed at run time, and where a user-provided custom
// operation goes. These only have meaning to the graph-capture frontend, so
// they all go through the GraphAnnotator trait it implements.

use std::fmt;
use std::str::FromStr;

use tracing::warn;

use ipuflow_core::{Error, HostTensor, Result};

/// Graph annotation entry points of the capture frontend.
pub trait GraphAnnotator {
    /// Start placing subsequent operations on `ipu_id`.
    fn begin_ipu_block(&self, ipu_id: u64) -> Result<()>;

    fn end_ipu_block(&self) -> Result<()>;

    /// Mark `x` as the loss to minimise, reduced according to `reduction`.
    fn identity_loss(&self, x: &HostTensor, reduction: Reduction) -> Result<HostTensor>;

    /// Print `x` on the device when the graph runs. Returns `x`.
    fn print_tensor(&self, x: &HostTensor) -> Result<HostTensor>;

    /// Insert custom operation `name` from `domain`. `outputs` are
    /// zero-filled templates giving the shape and dtype of each result.
    fn custom_operation(
        &self,
        inputs: &[HostTensor],
        name: &str,
        domain: &str,
        domain_version: i64,
        outputs: Vec<HostTensor>,
    ) -> Result<Vec<HostTensor>>;
}

// IPU placement

/// Scoped IPU placement: operations captured while the guard is alive run
/// on `ipu_id`. The block is closed on drop, or explicitly with
/// [`end`](IpuBlock::end) to observe errors.
pub struct IpuBlock<'a, A: GraphAnnotator + ?Sized> {
    annotator: &'a A,
    open: bool,
}

impl<'a, A: GraphAnnotator + ?Sized> IpuBlock<'a, A> {
    pub fn begin(annotator: &'a A, ipu_id: u64) -> Result<Self> {
        annotator.begin_ipu_block(ipu_id)?;
        Ok(Self {
            annotator,
            open: true,
        })
    }

    pub fn end(mut self) -> Result<()> {
        self.open = false;
        self.annotator.end_ipu_block()
    }
}

impl<A: GraphAnnotator + ?Sized> Drop for IpuBlock<'_, A> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.annotator.end_ipu_block() {
                warn!("failed to close IPU block: {e}");
            }
        }
    }
}

/// Start an IPU block on `ipu_id` and run `layer` inside it.
///
/// The block is left open: everything captured afterwards stays on
/// `ipu_id` until the next block begins. This is how pipeline stages are
/// chained.
pub fn on_ipu<A, T>(annotator: &A, ipu_id: u64, layer: impl FnOnce() -> Result<T>) -> Result<T>
where
    A: GraphAnnotator + ?Sized,
{
    annotator.begin_ipu_block(ipu_id)?;
    layer()
}

// Losses

/// How `identity_loss` reduces its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Reduction {
    Sum,
    Mean,
    #[default]
    None,
}

impl Reduction {
    /// Integer code understood by the frontend.
    pub fn code(self) -> i64 {
        match self {
            Reduction::Sum => 0,
            Reduction::Mean => 1,
            Reduction::None => 2,
        }
    }
}

impl FromStr for Reduction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(Reduction::Sum),
            "mean" => Ok(Reduction::Mean),
            "none" => Ok(Reduction::None),
            other => Err(Error::UnsupportedReduction {
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reduction::Sum => "sum",
            Reduction::Mean => "mean",
            Reduction::None => "none",
        })
    }
}

/// Mark `x` as the training loss.
pub fn identity_loss<A: GraphAnnotator + ?Sized>(
    annotator: &A,
    x: &HostTensor,
    reduction: Reduction,
) -> Result<HostTensor> {
    annotator.identity_loss(x, reduction)
}

/// Print `x` at run time.
pub fn print_tensor<A: GraphAnnotator + ?Sized>(annotator: &A, x: &HostTensor) -> Result<HostTensor> {
    annotator.print_tensor(x)
}

/// Insert a custom operation. `example_outputs` only describe the results:
/// fresh zero-filled tensors of the same shape and dtype are handed to the
/// frontend so that a template can safely alias an input.
pub fn custom_op<A: GraphAnnotator + ?Sized>(
    annotator: &A,
    inputs: &[HostTensor],
    name: &str,
    domain: &str,
    domain_version: i64,
    example_outputs: &[HostTensor],
) -> Result<Vec<HostTensor>> {
    let templates = example_outputs.iter().map(HostTensor::zeros_like).collect();
    annotator.custom_operation(inputs, name, domain, domain_version, templates)
}
