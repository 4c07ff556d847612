use crate::error::{Error, Result};
use crate::shape::Shape;

// Layout - How a host tensor's logical shape maps onto its flat storage
//
// A layout is shape + strides + offset. Views (narrow, transpose) only build
// a new layout over the same storage; no elements move. A view can end up
// non-contiguous, in which case `HostTensor::contiguous` gathers it into a
// fresh row-major buffer before it is handed to the device.
//
// Contiguity follows the usual tensor-library rule: strides must match the
// row-major strides for every dimension of size > 1. The storage offset does
// not matter, so narrowing the leading dimension keeps a tensor contiguous.

/// Shape, strides and storage offset of a host tensor view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Vec<usize>,
    offset: usize,
}

impl Layout {
    /// Row-major layout starting at offset 0.
    pub fn contiguous(shape: Shape) -> Self {
        let strides = shape.stride_contiguous();
        Layout {
            shape,
            strides,
            offset: 0,
        }
    }

    pub fn new(shape: Shape, strides: Vec<usize>, offset: usize) -> Self {
        Layout {
            shape,
            strides,
            offset,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    pub fn is_contiguous(&self) -> bool {
        let expected = self.shape.stride_contiguous();
        self.dims()
            .iter()
            .zip(self.strides.iter().zip(expected.iter()))
            .all(|(&size, (&got, &want))| size <= 1 || got == want)
    }

    /// Swap two dimensions. The result is usually non-contiguous.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Layout> {
        let rank = self.rank();
        if dim0 >= rank || dim1 >= rank {
            return Err(Error::DimOutOfRange {
                dim: dim0.max(dim1),
                rank,
            });
        }
        let mut dims = self.dims().to_vec();
        let mut strides = self.strides.clone();
        dims.swap(dim0, dim1);
        strides.swap(dim0, dim1);
        Ok(Layout::new(Shape::new(dims), strides, self.offset))
    }

    /// View of `len` entries of dimension `dim` starting at `start`.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Layout> {
        let dim_size = self.shape.dim(dim)?;
        if start + len > dim_size {
            return Err(Error::NarrowOutOfBounds {
                dim,
                start,
                len,
                dim_size,
            });
        }
        Ok(Layout::new(
            self.shape.with_dim(dim, len)?,
            self.strides.clone(),
            self.offset + start * self.strides[dim],
        ))
    }

    /// Storage indices of every element, in logical (row-major) order.
    pub fn strided_indices(&self) -> StridedIndices {
        StridedIndices {
            index: vec![0; self.rank()],
            dims: self.dims().to_vec(),
            strides: self.strides.clone(),
            next: Some(self.offset).filter(|_| self.elem_count() > 0),
        }
    }
}

/// Odometer over a layout's multi-dimensional index, yielding flat storage
/// positions.
pub struct StridedIndices {
    index: Vec<usize>,
    dims: Vec<usize>,
    strides: Vec<usize>,
    next: Option<usize>,
}

impl Iterator for StridedIndices {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        let mut flat = current;
        self.next = None;
        for d in (0..self.dims.len()).rev() {
            self.index[d] += 1;
            flat += self.strides[d];
            if self.index[d] < self.dims[d] {
                self.next = Some(flat);
                break;
            }
            flat -= self.strides[d] * self.index[d];
            self.index[d] = 0;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_indices() {
        let layout = Layout::contiguous(Shape::from((2, 3)));
        assert!(layout.is_contiguous());
        let idx: Vec<usize> = layout.strided_indices().collect();
        assert_eq!(idx, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_transpose_is_not_contiguous() {
        let layout = Layout::contiguous(Shape::from((2, 3))).transpose(0, 1).unwrap();
        assert!(!layout.is_contiguous());
        assert_eq!(layout.dims(), &[3, 2]);
        let idx: Vec<usize> = layout.strided_indices().collect();
        assert_eq!(idx, vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_leading_narrow_stays_contiguous() {
        let layout = Layout::contiguous(Shape::from((8, 3)));
        let view = layout.narrow(0, 2, 2).unwrap();
        assert!(view.is_contiguous());
        assert_eq!(view.offset(), 6);
        let idx: Vec<usize> = view.strided_indices().collect();
        assert_eq!(idx, vec![6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_inner_narrow_is_strided() {
        let layout = Layout::contiguous(Shape::from((2, 4)));
        let view = layout.narrow(1, 1, 2).unwrap();
        assert!(!view.is_contiguous());
        let idx: Vec<usize> = view.strided_indices().collect();
        assert_eq!(idx, vec![1, 2, 5, 6]);
    }

    #[test]
    fn test_narrow_out_of_bounds() {
        let layout = Layout::contiguous(Shape::from(4));
        assert!(matches!(
            layout.narrow(0, 3, 2),
            Err(Error::NarrowOutOfBounds { dim_size: 4, .. })
        ));
    }

    #[test]
    fn test_scalar_and_empty() {
        let scalar = Layout::contiguous(Shape::from(()));
        assert_eq!(scalar.strided_indices().collect::<Vec<_>>(), vec![0]);
        let empty = Layout::contiguous(Shape::from((0, 3)));
        assert_eq!(empty.strided_indices().count(), 0);
    }
}
