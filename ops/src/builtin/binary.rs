use std::marker::PhantomData;

use core_types::{Element, TensorType};
use ndops_core::ThreadContext;
use tensor::Tensor;

use super::arith::{Add, Arithmetic, Divide, Multiply, Subtract};
use super::{nth, tensor_of, tensor_of_mut, threads};
use crate::element::{BinaryComputerOp, BinaryInplaceOp};
use crate::env::OpEnv;
use crate::map::{self, Source};
use crate::op::Op;
use crate::register_op;
use crate::types::{
    visit_dtype, AnyElement, Binding, DtypeConstraint, DtypeVisitor, InplaceTarget, OpError, OpSignature,
    Priority, RegistrationInfo, TensorAny,
};

/// How the second argument of a tensor ⊕ tensor op is read.
pub trait Alignment: Copy + Default + Send + Sync + 'static {
    const LABEL: &'static str;
    const PRIORITY: Priority;

    fn conforms(args: &[&TensorType]) -> Result<(), String>;

    fn source<T: Element>(tensor: &Tensor<T>) -> Source<'_, T>;
}

/// Every argument iterates in the same order; cursors only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aligned;

/// Any argument layout; the second argument is read by coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unaligned;

impl Alignment for Aligned {
    const LABEL: &'static str = "aligned";
    const PRIORITY: Priority = Priority::HIGH;

    fn conforms(args: &[&TensorType]) -> Result<(), String> {
        let orders: Vec<_> = args.iter().map(|ty| Some(ty.iteration_order())).collect();
        if map::compatible(&orders) {
            Ok(())
        } else {
            Err("arguments are not index-aligned".into())
        }
    }

    fn source<T: Element>(tensor: &Tensor<T>) -> Source<'_, T> {
        Source::from(tensor)
    }
}

impl Alignment for Unaligned {
    const LABEL: &'static str = "unaligned";
    const PRIORITY: Priority = Priority::LOW;

    fn conforms(args: &[&TensorType]) -> Result<(), String> {
        match args.split_first() {
            Some((first, rest)) => match rest.iter().find(|ty| !ty.view.same_dims(&first.view)) {
                Some(other) => Err(format!("dimensions of {other} differ from {first}")),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn source<T: Element>(tensor: &Tensor<T>) -> Source<'_, T> {
        Source::random_access(tensor)
    }
}

/// `a ⊕ b` per element.
#[derive(Debug, Clone, Copy)]
pub struct Combine<K, T>(PhantomData<(K, T)>);

impl<K: Arithmetic, T: Element> Combine<K, T> {
    pub fn new() -> Self {
        Combine(PhantomData)
    }
}

impl<K: Arithmetic, T: Element> Default for Combine<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Arithmetic, T: Element> BinaryComputerOp<T, T, T> for Combine<K, T> {
    fn compute(&mut self, a: T, b: T) -> T {
        K::apply(a, b)
    }

    fn independent_instance(&self) -> Box<dyn BinaryComputerOp<T, T, T>> {
        Box::new(*self)
    }
}

impl<K: Arithmetic, T: Element> BinaryInplaceOp<T, T> for Combine<K, T> {
    fn mutate1(&mut self, arg: &mut T, other: T) {
        *arg = K::apply(*arg, other);
    }

    fn mutate2(&mut self, other: T, arg: &mut T) {
        *arg = K::apply(other, *arg);
    }

    fn independent_instance(&self) -> Box<dyn BinaryInplaceOp<T, T>> {
        Box::new(*self)
    }
}

/// Tensor ⊕ tensor for every element type.
#[derive(Clone)]
pub struct TensorArith<K, A> {
    sig:     OpSignature,
    threads: Option<ThreadContext>,
    _kind:   PhantomData<(K, A)>,
}

impl<K: Arithmetic, A: Alignment> TensorArith<K, A> {
    pub fn new() -> Self {
        Self {
            sig: OpSignature {
                name:       format!("tensor-{}-{}", K::NAME, A::LABEL),
                inputs:     vec![DtypeConstraint::Any, DtypeConstraint::Any],
                params:     vec![],
                output:     DtypeConstraint::Any,
                same_dtype: true,
                compute:    true,
                mutate:     vec![InplaceTarget::First, InplaceTarget::Second],
            },
            threads: None,
            _kind:   PhantomData,
        }
    }
}

impl<K: Arithmetic, A: Alignment> Default for TensorArith<K, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Arithmetic, A: Alignment> RegistrationInfo for TensorArith<K, A> {
    const IDENTITY: &'static str = K::IDENTITY;
    const PRIORITY: Priority = A::PRIORITY;
}

struct Compute<'a, K, A> {
    threads: &'a ThreadContext,
    a:       &'a TensorAny,
    b:       &'a TensorAny,
    output:  &'a mut TensorAny,
    _kind:   PhantomData<(K, A)>,
}

impl<K: Arithmetic, A: Alignment> DtypeVisitor for Compute<'_, K, A> {
    type Output = Result<(), OpError>;

    fn visit<T: AnyElement>(self) -> Self::Output {
        let a = tensor_of::<T>(self.a)?;
        let b = tensor_of::<T>(self.b)?;
        let op = Combine::<K, T>::new();
        map::binary_parallel(self.threads, &op, Source::from(a), A::source(b), tensor_of_mut::<T>(self.output)?)
    }
}

struct Mutate<'a, K, A> {
    threads: &'a ThreadContext,
    target:  InplaceTarget,
    arg:     &'a mut TensorAny,
    other:   &'a TensorAny,
    _kind:   PhantomData<(K, A)>,
}

impl<K: Arithmetic, A: Alignment> DtypeVisitor for Mutate<'_, K, A> {
    type Output = Result<(), OpError>;

    fn visit<T: AnyElement>(self) -> Self::Output {
        let other = tensor_of::<T>(self.other)?;
        let arg = tensor_of_mut::<T>(self.arg)?;
        let op = Combine::<K, T>::new();
        match self.target {
            InplaceTarget::First => map::inplace1_parallel(self.threads, &op, arg, A::source(other)),
            InplaceTarget::Second => map::inplace2_parallel(self.threads, &op, A::source(other), arg),
        }
    }
}

impl<K: Arithmetic, A: Alignment> Op for TensorArith<K, A> {
    fn signature(&self) -> &OpSignature {
        &self.sig
    }

    fn initialize(&mut self, env: &OpEnv, _binding: &Binding) -> Result<(), OpError> {
        self.threads = Some(env.threads().clone());
        Ok(())
    }

    fn conforms(&self, binding: &Binding) -> Result<(), String> {
        let args: Vec<&TensorType> = binding.inputs.iter().chain(&binding.output).collect();
        A::conforms(&args)
    }

    fn compute(&mut self, inputs: &[&TensorAny], output: &mut TensorAny) -> Result<(), OpError> {
        let visitor = Compute::<K, A> {
            threads: threads(&self.threads)?,
            a: nth(inputs, 0)?,
            b: nth(inputs, 1)?,
            output,
            _kind: PhantomData,
        };
        visit_dtype(visitor.a.dtype(), visitor)
    }

    fn mutate(&mut self, target: InplaceTarget, arg: &mut TensorAny, others: &[&TensorAny]) -> Result<(), OpError> {
        let dtype = arg.dtype();
        let visitor = Mutate::<K, A> {
            threads: threads(&self.threads)?,
            target,
            arg,
            other: nth(others, 0)?,
            _kind: PhantomData,
        };
        visit_dtype(dtype, visitor)
    }

    fn independent_instance(&self) -> Box<dyn Op> {
        Box::new(self.clone())
    }
}

register_op!(TensorArith<Add, Aligned>);
register_op!(TensorArith<Subtract, Aligned>);
register_op!(TensorArith<Multiply, Aligned>);
register_op!(TensorArith<Divide, Aligned>);
register_op!(TensorArith<Add, Unaligned>);
register_op!(TensorArith<Subtract, Unaligned>);
register_op!(TensorArith<Multiply, Unaligned>);
register_op!(TensorArith<Divide, Unaligned>);
