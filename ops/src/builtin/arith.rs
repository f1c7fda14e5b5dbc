use std::marker::PhantomData;

use core_types::{Element, TensorType};
use ndops_core::ThreadContext;

use super::{nth, scalar_of, tensor_of, tensor_of_mut, threads, CREATE_TENSOR};
use crate::element::{UnaryComputerOp, UnaryInplaceOp};
use crate::env::OpEnv;
use crate::map::{self, Source};
use crate::op::Op;
use crate::register_op;
use crate::special::Function;
use crate::types::{
    visit_dtype, AnyElement, Binding, DtypeConstraint, DtypeVisitor, InplaceTarget, OpError, OpSignature,
    Priority, RegistrationInfo, ScalarAny, TensorAny,
};

/// Element-wise arithmetic kind; picks the identity and the `Element` method.
pub trait Arithmetic: Copy + Default + Send + Sync + 'static {
    const IDENTITY: &'static str;
    const NAME: &'static str;

    fn apply<T: Element>(a: T, b: T) -> T;
}

macro_rules! arithmetic {
    ($kind:ident, $identity:literal, $name:literal, $method:ident) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $kind;

        impl Arithmetic for $kind {
            const IDENTITY: &'static str = $identity;
            const NAME: &'static str = $name;

            fn apply<T: Element>(a: T, b: T) -> T {
                a.$method(b)
            }
        }
    };
}

arithmetic!(Add, "math.add", "add", add);
arithmetic!(Subtract, "math.subtract", "subtract", sub);
arithmetic!(Multiply, "math.multiply", "multiply", mul);
arithmetic!(Divide, "math.divide", "divide", div);

/// `x ⊕ c` for a bound constant `c`. Stateless, so instances are copies.
#[derive(Debug, Clone, Copy)]
pub struct WithConstant<K, T> {
    constant: T,
    _kind:    PhantomData<K>,
}

impl<K: Arithmetic, T: Element> WithConstant<K, T> {
    pub fn new(constant: T) -> Self {
        Self { constant, _kind: PhantomData }
    }
}

impl<K: Arithmetic, T: Element> UnaryComputerOp<T, T> for WithConstant<K, T> {
    fn compute(&mut self, input: T) -> T {
        K::apply(input, self.constant)
    }

    fn independent_instance(&self) -> Box<dyn UnaryComputerOp<T, T>> {
        Box::new(*self)
    }
}

impl<K: Arithmetic, T: Element> UnaryInplaceOp<T> for WithConstant<K, T> {
    fn mutate(&mut self, arg: &mut T) {
        *arg = K::apply(*arg, self.constant);
    }

    fn independent_instance(&self) -> Box<dyn UnaryInplaceOp<T>> {
        Box::new(*self)
    }
}

/// Tensor ⊕ constant for every element type, mapped in parallel.
///
/// When the output may have to be allocated, a `create.tensor` function is
/// resolved at initialization and used for the allocation.
pub struct ConstantArith<K: Arithmetic> {
    sig:      OpSignature,
    constant: Option<ScalarAny>,
    threads:  Option<ThreadContext>,
    create:   Option<Function>,
    _kind:    PhantomData<K>,
}

impl<K: Arithmetic> ConstantArith<K> {
    pub fn new() -> Self {
        Self {
            sig: OpSignature {
                name:       format!("constant-{}", K::NAME),
                inputs:     vec![DtypeConstraint::Any],
                params:     vec![DtypeConstraint::Any],
                output:     DtypeConstraint::Any,
                same_dtype: true,
                compute:    true,
                mutate:     vec![InplaceTarget::First],
            },
            constant: None,
            threads:  None,
            create:   None,
            _kind:    PhantomData,
        }
    }

    fn constant(&self) -> Result<ScalarAny, OpError> {
        self.constant
            .ok_or_else(|| OpError::IllegalState(format!("{} has no bound constant", self.sig.name)))
    }
}

impl<K: Arithmetic> Default for ConstantArith<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Arithmetic> RegistrationInfo for ConstantArith<K> {
    const IDENTITY: &'static str = K::IDENTITY;
    const PRIORITY: Priority = Priority::NORMAL;
}

struct ComputeWith<'a, K> {
    constant: ScalarAny,
    threads:  &'a ThreadContext,
    input:    &'a TensorAny,
    output:   &'a mut TensorAny,
    _kind:    PhantomData<K>,
}

impl<K: Arithmetic> DtypeVisitor for ComputeWith<'_, K> {
    type Output = Result<(), OpError>;

    fn visit<T: AnyElement>(self) -> Self::Output {
        let op = WithConstant::<K, T>::new(scalar_of(&self.constant)?);
        let input = tensor_of::<T>(self.input)?;
        map::unary_parallel(self.threads, &op, Source::from(input), tensor_of_mut::<T>(self.output)?)
    }
}

struct MutateWith<'a, K> {
    constant: ScalarAny,
    threads:  &'a ThreadContext,
    arg:      &'a mut TensorAny,
    _kind:    PhantomData<K>,
}

impl<K: Arithmetic> DtypeVisitor for MutateWith<'_, K> {
    type Output = Result<(), OpError>;

    fn visit<T: AnyElement>(self) -> Self::Output {
        let op = WithConstant::<K, T>::new(scalar_of(&self.constant)?);
        map::inplace_parallel(self.threads, &op, tensor_of_mut::<T>(self.arg)?)
    }
}

impl<K: Arithmetic> Op for ConstantArith<K> {
    fn signature(&self) -> &OpSignature {
        &self.sig
    }

    fn bind(&mut self, params: &[ScalarAny]) -> Result<(), OpError> {
        self.constant = Some(*params.first().ok_or_else(|| {
            OpError::IllegalState(format!("{} needs a constant parameter", self.sig.name))
        })?);
        Ok(())
    }

    fn initialize(&mut self, env: &OpEnv, binding: &Binding) -> Result<(), OpError> {
        self.threads = Some(env.threads().clone());
        if binding.convention.may_allocate() {
            self.create = Some(env.function(CREATE_TENSOR, &binding.inputs, &[])?);
        }
        Ok(())
    }

    fn conforms(&self, binding: &Binding) -> Result<(), String> {
        let input = binding.inputs.first().ok_or("missing input")?;
        match &binding.output {
            Some(out) if out.iteration_order() != input.iteration_order() => {
                Err(format!("output {out} is not index-aligned with input {input}"))
            }
            _ => Ok(()),
        }
    }

    fn create_output(&mut self, inputs: &[&TensorAny]) -> Result<TensorAny, OpError> {
        match self.create.as_mut() {
            Some(create) => create.calculate(&inputs[..inputs.len().min(1)]),
            None => {
                let types: Vec<TensorType> = inputs.iter().map(|t| t.tensor_type()).collect();
                Ok(TensorAny::allocate(&self.output_type(&types)?)?)
            }
        }
    }

    fn compute(&mut self, inputs: &[&TensorAny], output: &mut TensorAny) -> Result<(), OpError> {
        let visitor = ComputeWith::<K> {
            constant: self.constant()?,
            threads:  threads(&self.threads)?,
            input:    nth(inputs, 0)?,
            output,
            _kind:    PhantomData,
        };
        visit_dtype(visitor.input.dtype(), visitor)
    }

    fn mutate(&mut self, _target: InplaceTarget, arg: &mut TensorAny, _others: &[&TensorAny]) -> Result<(), OpError> {
        let dtype = arg.dtype();
        let visitor = MutateWith::<K> {
            constant: self.constant()?,
            threads:  threads(&self.threads)?,
            arg,
            _kind:    PhantomData,
        };
        visit_dtype(dtype, visitor)
    }

    fn independent_instance(&self) -> Box<dyn Op> {
        Box::new(Self {
            sig:      self.sig.clone(),
            constant: self.constant,
            threads:  self.threads.clone(),
            create:   self.create.as_ref().map(Function::independent_instance),
            _kind:    PhantomData,
        })
    }
}

register_op!(ConstantArith<Add>);
register_op!(ConstantArith<Subtract>);
register_op!(ConstantArith<Multiply>);
register_op!(ConstantArith<Divide>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Convention;
    use core_types::DataType;
    use tensor::Tensor;

    fn env() -> OpEnv {
        OpEnv::builder().threads(4).parallel_threshold(0).build().unwrap()
    }

    #[test]
    fn hybrid_allocates_through_the_nested_function() {
        let env = env();
        let input = TensorAny::from(Tensor::from_vec(vec![1u16, 2, 3], &[3]).unwrap());
        let mut add = env
            .hybrid("math.add", &[input.tensor_type()], None, &[ScalarAny::from(5u16)])
            .unwrap();
        assert_eq!(add.bound().name(), "constant-add");

        let out = add.calculate(&[&input]).unwrap();
        assert_eq!(u16::tensor(&out).map(Tensor::to_vec), Some(vec![6, 7, 8]));
    }

    #[test]
    fn every_kind_over_floats() {
        let env = env();
        let input = TensorAny::from(Tensor::from_vec(vec![2.0f32, 4.0, 8.0], &[3]).unwrap());
        let ty = [input.tensor_type()];
        let param = [ScalarAny::from(2.0f32)];
        let run = |identity: &str| {
            let mut op = env.function(identity, &ty, &param).unwrap();
            f32::tensor(&op.calculate(&[&input]).unwrap()).map(Tensor::to_vec).unwrap()
        };
        assert_eq!(run("math.add"), vec![4.0, 6.0, 10.0]);
        assert_eq!(run("math.subtract"), vec![0.0, 2.0, 6.0]);
        assert_eq!(run("math.multiply"), vec![4.0, 8.0, 16.0]);
        assert_eq!(run("math.divide"), vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn integer_division_by_zero_is_zero() {
        let env = env();
        let mut arg = TensorAny::from(Tensor::from_vec(vec![7i32, -3], &[2]).unwrap());
        let mut div = env
            .inplace("math.divide", InplaceTarget::First, &[arg.tensor_type()], &[ScalarAny::from(0i32)])
            .unwrap();
        div.mutate(&mut arg, &[]).unwrap();
        assert_eq!(i32::tensor(&arg).map(Tensor::to_vec), Some(vec![0, 0]));
    }

    #[test]
    fn constant_must_share_the_element_type() {
        let env = env();
        let ty = TensorType::array(DataType::U8, &[4]).unwrap();
        let err = env.hybrid("math.add", &[ty], None, &[ScalarAny::from(1.0f64)]).unwrap_err();
        assert!(matches!(err, OpError::NoCandidates { .. }), "{err}");
        assert!(err.to_string().contains("mix element types"), "{err}");
    }

    #[test]
    fn unaligned_output_does_not_conform() {
        let env = env();
        let input = Tensor::from_vec(vec![1i64, 2, 3, 4], &[2, 2]).unwrap();
        let out = Tensor::<i64>::from_vec_column_major(vec![0; 4], &[2, 2]).unwrap();
        let err = env
            .computer("math.multiply", &[input.tensor_type()], &out.tensor_type(), &[ScalarAny::from(3i64)])
            .unwrap_err();
        assert!(matches!(err, OpError::NoMatch { .. }), "{err}");
        assert!(err.rejections().iter().any(|r| r.candidate == "constant-multiply"));
    }

    #[test]
    fn independent_instances_clone_the_nested_function() {
        let env = env();
        let ty = TensorType::array(DataType::I16, &[2]).unwrap();
        let add = env.function("math.add", &[ty], &[ScalarAny::from(1i16)]).unwrap();
        let mut copy = add.independent_instance();
        assert_eq!(copy.bound().binding().convention, Convention::Function);

        let input = TensorAny::from(Tensor::from_vec(vec![1i16, 2], &[2]).unwrap());
        let out = copy.calculate(&[&input]).unwrap();
        assert_eq!(i16::tensor(&out).map(Tensor::to_vec), Some(vec![2, 3]));
    }
}
