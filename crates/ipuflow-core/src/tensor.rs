use std::fmt;
use std::sync::Arc;

use half::{bf16, f16};

use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::shape::Shape;

// HostTensor - A host-resident n-dimensional array
//
// The orchestration layer never does arithmetic on tensors. What it needs
// is a faithful host representation of the caller's inputs so that it can:
//
//   - narrow the leading (batch) dimension to build the trace view,
//   - detect and gather non-contiguous inputs,
//   - promote reduced-precision inputs to F32 and keep the originals,
//   - hand element data and shapes to the external compiler/runtime.
//
// MEMORY MODEL:
//
//   Storage lives behind an Arc, so cloning a HostTensor is O(1) and views
//   (narrow, transpose) share the buffer of the tensor they came from. Only
//   `contiguous()` and `to_dtype()` allocate.

/// Typed flat element buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    U8(Vec<u8>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Dispatch `$body` over every storage variant with `$v` bound to the
/// typed vector.
macro_rules! with_storage {
    ($storage:expr, $v:ident => $body:expr) => {
        match $storage {
            Storage::U8($v) => $body,
            Storage::U32($v) => $body,
            Storage::I64($v) => $body,
            Storage::F16($v) => $body,
            Storage::BF16($v) => $body,
            Storage::F32($v) => $body,
            Storage::F64($v) => $body,
        }
    };
}

/// Build a `Storage` of `dtype` by casting each element of `src`.
fn cast_into<T: WithDType>(
    src: &[T],
    indices: impl Iterator<Item = usize>,
    dtype: DType,
) -> Result<Storage> {
    fn collect<S: WithDType, D: WithDType>(
        src: &[S],
        indices: impl Iterator<Item = usize>,
    ) -> Result<Vec<D>> {
        indices
            .map(|i| D::cast_from(src[i]).ok_or(Error::UnrepresentableValue { dtype: D::DTYPE }))
            .collect()
    }
    Ok(match dtype {
        DType::U8 => Storage::U8(collect(src, indices)?),
        DType::U32 => Storage::U32(collect(src, indices)?),
        DType::I64 => Storage::I64(collect(src, indices)?),
        DType::F16 => Storage::F16(collect(src, indices)?),
        DType::BF16 => Storage::BF16(collect(src, indices)?),
        DType::F32 => Storage::F32(collect(src, indices)?),
        DType::F64 => Storage::F64(collect(src, indices)?),
    })
}

impl Storage {
    pub fn dtype(&self) -> DType {
        match self {
            Storage::U8(_) => DType::U8,
            Storage::U32(_) => DType::U32,
            Storage::I64(_) => DType::I64,
            Storage::F16(_) => DType::F16,
            Storage::BF16(_) => DType::BF16,
            Storage::F32(_) => DType::F32,
            Storage::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        with_storage!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn zeros(dtype: DType, len: usize) -> Storage {
        match dtype {
            DType::U8 => Storage::U8(vec![0; len]),
            DType::U32 => Storage::U32(vec![0; len]),
            DType::I64 => Storage::I64(vec![0; len]),
            DType::F16 => Storage::F16(vec![f16::ZERO; len]),
            DType::BF16 => Storage::BF16(vec![bf16::ZERO; len]),
            DType::F32 => Storage::F32(vec![0.0; len]),
            DType::F64 => Storage::F64(vec![0.0; len]),
        }
    }

    /// Gather the elements addressed by `layout` into a new row-major
    /// buffer of `dtype`.
    fn gather(&self, layout: &Layout, dtype: DType) -> Result<Storage> {
        with_storage!(self, v => cast_into(v, layout.strided_indices(), dtype))
    }
}

/// A host tensor: shared element storage seen through a [`Layout`].
#[derive(Clone)]
pub struct HostTensor {
    storage: Arc<Storage>,
    layout: Layout,
}

impl HostTensor {
    /// Create a contiguous tensor from a flat row-major vector.
    pub fn from_vec<T: WithDType>(data: Vec<T>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if shape.elem_count() != data.len() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: data.len(),
                shape,
            });
        }
        let storage = cast_into(&data, 0..data.len(), T::DTYPE)?;
        Ok(Self::from_storage(storage, Layout::contiguous(shape)))
    }

    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Self {
        let shape = shape.into();
        let storage = Storage::zeros(dtype, shape.elem_count());
        Self::from_storage(storage, Layout::contiguous(shape))
    }

    /// Zero-filled contiguous tensor with the shape and dtype of `self`.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape().clone(), self.dtype())
    }

    pub fn from_storage(storage: Storage, layout: Layout) -> Self {
        HostTensor {
            storage: Arc::new(storage),
            layout,
        }
    }

    fn view(&self, layout: Layout) -> Self {
        HostTensor {
            storage: Arc::clone(&self.storage),
            layout,
        }
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.layout.elem_count()
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    /// Whether `self` and `other` are views of the same buffer.
    pub fn shares_storage(&self, other: &HostTensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// View of `len` entries along `dim` starting at `start`. No copy.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self> {
        Ok(self.view(self.layout.narrow(dim, start, len)?))
    }

    /// Swap two dimensions. No copy; the result is usually non-contiguous.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Self> {
        Ok(self.view(self.layout.transpose(dim0, dim1)?))
    }

    /// Row-major copy of this tensor, or a cheap clone when already
    /// contiguous.
    pub fn contiguous(&self) -> Result<Self> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }
        let storage = self.storage.gather(&self.layout, self.dtype())?;
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(self.shape().clone()),
        ))
    }

    /// Convert elements to `dtype`. Returns a cheap clone when the dtype
    /// already matches.
    pub fn to_dtype(&self, dtype: DType) -> Result<Self> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        let storage = self.storage.gather(&self.layout, dtype)?;
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(self.shape().clone()),
        ))
    }

    /// Elements in logical order, cast to `T`.
    pub fn to_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        let storage = self.storage.gather(&self.layout, T::DTYPE)?;
        with_storage!(storage, v => v
            .into_iter()
            .map(|x| T::cast_from(x).ok_or(Error::UnrepresentableValue { dtype: T::DTYPE }))
            .collect())
    }
}

impl fmt::Debug for HostTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HostTensor(shape={}, dtype={}, contiguous={})",
            self.shape(),
            self.dtype(),
            self.is_contiguous()
        )
    }
}

/// Tensors compare by dtype, shape and logical contents, not by layout.
impl PartialEq for HostTensor {
    fn eq(&self, other: &Self) -> bool {
        if self.dtype() != other.dtype() || self.shape() != other.shape() {
            return false;
        }
        let dtype = self.dtype();
        match (
            self.storage.gather(&self.layout, dtype),
            other.storage.gather(&other.layout, dtype),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(n: usize, shape: impl Into<Shape>) -> HostTensor {
        HostTensor::from_vec((0..n).map(|i| i as f32).collect::<Vec<_>>(), shape).unwrap()
    }

    #[test]
    fn test_from_vec_checks_element_count() {
        let err = HostTensor::from_vec(vec![1.0f32, 2.0, 3.0], (2, 2)).unwrap_err();
        assert!(matches!(
            err,
            Error::ElementCountMismatch {
                expected: 4,
                got: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_narrow_is_a_view() {
        let t = iota(24, (8, 3));
        let n = t.narrow(0, 0, 2).unwrap();
        assert_eq!(n.dims(), &[2, 3]);
        assert!(n.shares_storage(&t));
        assert!(n.is_contiguous());
        assert_eq!(n.to_vec::<f32>().unwrap(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_contiguous_gathers_transposed_view() {
        let t = iota(6, (2, 3)).transpose(0, 1).unwrap();
        assert!(!t.is_contiguous());
        let c = t.contiguous().unwrap();
        assert!(c.is_contiguous());
        assert!(!c.shares_storage(&t));
        assert_eq!(c.to_vec::<f32>().unwrap(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert_eq!(c, t);
    }

    #[test]
    fn test_contiguous_is_cheap_when_already_dense() {
        let t = iota(4, 4);
        assert!(t.contiguous().unwrap().shares_storage(&t));
    }

    #[test]
    fn test_half_round_trip_through_f32() {
        let h = HostTensor::from_vec(
            vec![f16::from_f32(0.5), f16::from_f32(-2.0)],
            2,
        )
        .unwrap();
        assert_eq!(h.dtype(), DType::F16);
        let f = h.to_dtype(DType::F32).unwrap();
        assert_eq!(f.dtype(), DType::F32);
        assert_eq!(f.to_vec::<f32>().unwrap(), vec![0.5, -2.0]);
        assert_eq!(f.to_dtype(DType::F16).unwrap(), h);
    }

    #[test]
    fn test_zeros_like() {
        let t = HostTensor::zeros((2, 2), DType::BF16);
        let z = t.zeros_like();
        assert_eq!(z.dtype(), DType::BF16);
        assert_eq!(z.to_vec::<f32>().unwrap(), vec![0.0; 4]);
    }
}
