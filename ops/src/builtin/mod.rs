//! Built-in leaf ops, registered through `register_op!`.

pub mod arith;
pub mod array;
pub mod binary;
pub mod convert;
pub mod create;

pub use arith::{Add, Arithmetic, ConstantArith, Divide, Multiply, Subtract, WithConstant};
pub use array::ArrayConstant;
pub use binary::{Aligned, Alignment, Combine, TensorArith, Unaligned};
pub use convert::{Cast, Convert, ConvertTarget};
pub use create::{CreateTensor, CREATE_TENSOR};

use ndops_core::ThreadContext;
use tensor::Tensor;

use crate::types::{AnyElement, OpError, ScalarAny, TensorAny};

fn tensor_of<T: AnyElement>(any: &TensorAny) -> Result<&Tensor<T>, OpError> {
    T::tensor(any)
        .ok_or_else(|| OpError::IllegalState(format!("expected a {} tensor, got {}", T::DTYPE, any.dtype())))
}

fn tensor_of_mut<T: AnyElement>(any: &mut TensorAny) -> Result<&mut Tensor<T>, OpError> {
    let found = any.dtype();
    T::tensor_mut(any).ok_or_else(|| OpError::IllegalState(format!("expected a {} tensor, got {found}", T::DTYPE)))
}

fn scalar_of<T: AnyElement>(scalar: &ScalarAny) -> Result<T, OpError> {
    T::scalar(scalar)
        .ok_or_else(|| OpError::IllegalState(format!("expected a {} parameter, got {}", T::DTYPE, scalar.dtype())))
}

fn nth<'a>(values: &[&'a TensorAny], index: usize) -> Result<&'a TensorAny, OpError> {
    values
        .get(index)
        .copied()
        .ok_or_else(|| OpError::IllegalState(format!("missing argument {index}")))
}

fn threads(ctx: &Option<ThreadContext>) -> Result<&ThreadContext, OpError> {
    ctx.as_ref().ok_or_else(|| OpError::IllegalState("op used before initialization".into()))
}
