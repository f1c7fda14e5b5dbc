use std::marker::PhantomData;

use core_types::StorageLayout;
use ndops_core::ThreadContext;

use super::arith::{Add, Arithmetic, Divide, Multiply, Subtract};
use super::{nth, scalar_of, tensor_of, tensor_of_mut, threads};
use crate::env::OpEnv;
use crate::op::Op;
use crate::register_op;
use crate::types::{
    AnyElement, Binding, DtypeConstraint, InplaceTarget, OpError, OpSignature, Priority, RegistrationInfo,
    ScalarAny, TensorAny,
};

/// Tensor ⊕ constant specialized for one element type on array storage.
///
/// Runs the chunker directly over the flat buffer, so it only conforms when
/// input and output are array-backed with identical views.
#[derive(Clone)]
pub struct ArrayConstant<K, T> {
    sig:      OpSignature,
    constant: T,
    threads:  Option<ThreadContext>,
    _kind:    PhantomData<K>,
}

impl<K: Arithmetic, T: AnyElement> ArrayConstant<K, T> {
    pub fn new() -> Self {
        let dtype = DtypeConstraint::Only(T::DTYPE);
        Self {
            sig: OpSignature {
                name:       format!("array-{}-{}", K::NAME, T::DTYPE),
                inputs:     vec![dtype],
                params:     vec![dtype],
                output:     dtype,
                same_dtype: true,
                compute:    true,
                mutate:     vec![InplaceTarget::First],
            },
            constant: T::default(),
            threads:  None,
            _kind:    PhantomData,
        }
    }
}

impl<K: Arithmetic, T: AnyElement> Default for ArrayConstant<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Arithmetic, T: AnyElement> RegistrationInfo for ArrayConstant<K, T> {
    const IDENTITY: &'static str = K::IDENTITY;
    const PRIORITY: Priority = Priority::HIGH.plus(1.0);
}

impl<K: Arithmetic, T: AnyElement> Op for ArrayConstant<K, T> {
    fn signature(&self) -> &OpSignature {
        &self.sig
    }

    fn bind(&mut self, params: &[ScalarAny]) -> Result<(), OpError> {
        let param = params
            .first()
            .ok_or_else(|| OpError::IllegalState(format!("{} needs a constant parameter", self.sig.name)))?;
        self.constant = scalar_of(param)?;
        Ok(())
    }

    fn initialize(&mut self, env: &OpEnv, _binding: &Binding) -> Result<(), OpError> {
        self.threads = Some(env.threads().clone());
        Ok(())
    }

    fn conforms(&self, binding: &Binding) -> Result<(), String> {
        let input = binding.inputs.first().ok_or("missing input")?;
        if input.layout() != StorageLayout::Array {
            return Err(format!("input {input} is not array-backed"));
        }
        match &binding.output {
            Some(out) if out.layout() != StorageLayout::Array => Err(format!("output {out} is not array-backed")),
            Some(out) if out.view != input.view => Err(format!("output {out} does not share the input's view")),
            _ => Ok(()),
        }
    }

    fn compute(&mut self, inputs: &[&TensorAny], output: &mut TensorAny) -> Result<(), OpError> {
        let input = tensor_of::<T>(nth(inputs, 0)?)?;
        let src_dims = input.dims().to_vec();
        let src = input
            .as_slice()
            .ok_or_else(|| OpError::IllegalState("input is not array-backed".into()))?;
        let out = tensor_of_mut::<T>(output)?;
        if usize::try_from(out.size()).ok() != Some(src.len()) {
            return Err(OpError::ShapeMismatch { expected: src_dims, found: out.dims().to_vec() });
        }
        let dst = out.shared();
        let c = self.constant;
        threads(&self.threads)?.chunk_default(src.len() as u64, |chunk| {
            let (start, step, count) = chunk.narrow::<usize>()?;
            for k in 0..count {
                let i = start + k * step;
                // SAFETY: chunks are disjoint
                unsafe { dst.write(i, K::apply(src[i], c)) };
            }
            Ok::<(), OpError>(())
        })
    }

    fn mutate(&mut self, _target: InplaceTarget, arg: &mut TensorAny, _others: &[&TensorAny]) -> Result<(), OpError> {
        let tensor = tensor_of_mut::<T>(arg)?;
        let n = tensor.size();
        let data = tensor.shared();
        let c = self.constant;
        threads(&self.threads)?.chunk_default(n, |chunk| {
            let (start, step, count) = chunk.narrow::<usize>()?;
            for k in 0..count {
                let i = start + k * step;
                // SAFETY: chunks are disjoint
                unsafe { data.write(i, K::apply(data.read(i), c)) };
            }
            Ok::<(), OpError>(())
        })
    }

    fn independent_instance(&self) -> Box<dyn Op> {
        Box::new(self.clone())
    }
}

register_op!(ArrayConstant<Add, i8>);
register_op!(ArrayConstant<Subtract, i8>);
register_op!(ArrayConstant<Multiply, i8>);
register_op!(ArrayConstant<Divide, i8>);
register_op!(ArrayConstant<Add, f64>);
register_op!(ArrayConstant<Subtract, f64>);
register_op!(ArrayConstant<Multiply, f64>);
register_op!(ArrayConstant<Divide, f64>);
