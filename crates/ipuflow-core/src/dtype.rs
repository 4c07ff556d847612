use std::fmt;

use half::{bf16, f16};
use num_traits::NumCast;

// DType - Element types a host tensor can carry
//
// The host side only needs to know enough about element types to answer two
// questions before handing inputs to the device compiler:
//
//   1. Is this value in reduced precision (F16 / BF16)? Reduced-precision
//      layers and inputs are promoted to F32 for shape inference and
//      restored afterwards.
//   2. How do we convert between element types when promoting/restoring?
//
// Integer types are carried through untouched (labels, indices, masks).

/// Element data type of a [`HostTensor`](crate::HostTensor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    U8,
    U32,
    I64,
    F16,
    BF16,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::U8 => 1,
            DType::F16 | DType::BF16 => 2,
            DType::U32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    /// Whether this is a reduced-precision float (F16 or BF16).
    pub fn is_half(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16)
    }

    /// The type a value of this dtype is promoted to before tracing.
    ///
    /// Half types widen to F32; everything else is already full precision.
    pub fn full_precision(&self) -> DType {
        if self.is_half() {
            DType::F32
        } else {
            *self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::U32 => "u32",
            DType::I64 => "i64",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// WithDType - Rust element types that map onto a DType
//
// Conversions go through num_traits::NumCast so that a lossy cast (NaN into
// an integer, an out-of-range value) is reported instead of silently
// wrapping.

/// Rust scalar types that can be stored in a host tensor.
pub trait WithDType: Copy + NumCast + fmt::Debug + PartialEq + Send + Sync + 'static {
    const DTYPE: DType;

    /// Cast from any other element type, `None` if the value is not
    /// representable.
    fn cast_from<T: WithDType>(v: T) -> Option<Self> {
        <Self as NumCast>::from(v)
    }
}

macro_rules! with_dtype {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl WithDType for $ty {
            const DTYPE: DType = DType::$variant;
        })*
    };
}

with_dtype! {
    u8 => U8,
    u32 => U32,
    i64 => I64,
    f16 => F16,
    bf16 => BF16,
    f32 => F32,
    f64 => F64,
}
