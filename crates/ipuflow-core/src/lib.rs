//! # ipuflow-core
//!
//! Host-side value primitives shared by the ipuflow orchestration layer.
//!
//! This crate provides:
//! - [`DType`]: element types, including the reduced-precision F16/BF16
//! - [`Shape`] / [`Layout`]: shape, strides and offset of a tensor view
//! - [`HostTensor`]: a host-resident tensor supporting views, gathering and
//!   dtype conversion
//! - [`Value`] / [`ArgTree`]: call arguments as a tree of leaves
//! - [`Error`]: the single error type used across ipuflow

pub mod dtype;
pub mod error;
pub mod layout;
pub mod shape;
pub mod tensor;
pub mod value;

pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use layout::Layout;
pub use shape::Shape;
pub use tensor::{HostTensor, Storage};
pub use value::{ArgTree, Value};
