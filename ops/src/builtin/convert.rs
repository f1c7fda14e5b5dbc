use std::marker::PhantomData;

use core_types::{Element, TensorType};
use ndops_core::ThreadContext;

use super::{nth, tensor_of, tensor_of_mut, threads};
use crate::element::UnaryComputerOp;
use crate::env::OpEnv;
use crate::map::{self, Source};
use crate::op::Op;
use crate::register_op;
use crate::types::{
    visit_dtype, AnyElement, Binding, DtypeConstraint, DtypeVisitor, OpError, OpSignature, Priority,
    RegistrationInfo, TensorAny,
};

/// Element type a `convert.*` identity produces.
pub trait ConvertTarget: AnyElement {
    const IDENTITY: &'static str;
}

macro_rules! convert_target {
    ($($rust:ty => $identity:literal),* $(,)?) => {
        $(
            impl ConvertTarget for $rust {
                const IDENTITY: &'static str = $identity;
            }
        )*
    };
}

convert_target! {
    u8 => "convert.uint8",
    i32 => "convert.int32",
    f32 => "convert.float32",
    f64 => "convert.float64",
}

/// Numeric cast through `f64`. Out-of-range values saturate and NaN
/// becomes zero.
#[derive(Debug)]
pub struct Cast<I, O> {
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> Cast<I, O> {
    pub fn new() -> Self {
        Self { _types: PhantomData }
    }
}

impl<I, O> Default for Cast<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> Clone for Cast<I, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I, O> Copy for Cast<I, O> {}

impl<I: Element, O: Element> UnaryComputerOp<I, O> for Cast<I, O> {
    fn compute(&mut self, input: I) -> O {
        O::from_f64(input.to_f64())
    }

    fn independent_instance(&self) -> Box<dyn UnaryComputerOp<I, O>> {
        Box::new(*self)
    }
}

/// Any tensor to a tensor of `O` with the same dims and storage layout.
pub struct Convert<O: ConvertTarget> {
    sig:     OpSignature,
    threads: Option<ThreadContext>,
    _target: PhantomData<O>,
}

impl<O: ConvertTarget> Convert<O> {
    pub fn new() -> Self {
        Self {
            sig: OpSignature {
                name:       format!("convert-{}", O::DTYPE),
                inputs:     vec![DtypeConstraint::Any],
                params:     vec![],
                output:     DtypeConstraint::Only(O::DTYPE),
                same_dtype: false,
                compute:    true,
                mutate:     vec![],
            },
            threads: None,
            _target: PhantomData,
        }
    }
}

impl<O: ConvertTarget> Default for Convert<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: ConvertTarget> RegistrationInfo for Convert<O> {
    const IDENTITY: &'static str = O::IDENTITY;
    const PRIORITY: Priority = Priority::NORMAL;
}

struct CastFrom<'a, O> {
    threads: &'a ThreadContext,
    input:   &'a TensorAny,
    output:  &'a mut TensorAny,
    _target: PhantomData<O>,
}

impl<O: ConvertTarget> DtypeVisitor for CastFrom<'_, O> {
    type Output = Result<(), OpError>;

    fn visit<I: AnyElement>(self) -> Self::Output {
        let input = tensor_of::<I>(self.input)?;
        map::unary_parallel(self.threads, &Cast::<I, O>::new(), Source::from(input), tensor_of_mut::<O>(self.output)?)
    }
}

impl<O: ConvertTarget> Op for Convert<O> {
    fn signature(&self) -> &OpSignature {
        &self.sig
    }

    fn initialize(&mut self, env: &OpEnv, _binding: &Binding) -> Result<(), OpError> {
        self.threads = Some(env.threads().clone());
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

    fn output_type(&self, inputs: &[TensorType]) -> Result<TensorType, OpError> {
        let input = inputs
            .first()
            .ok_or_else(|| OpError::IllegalState(format!("{} has no input to convert", self.sig.name)))?;
        Ok(input.with_dtype(O::DTYPE))
    }

    fn compute(&mut self, inputs: &[&TensorAny], output: &mut TensorAny) -> Result<(), OpError> {
        let visitor = CastFrom::<O> {
            threads: threads(&self.threads)?,
            input: nth(inputs, 0)?,
            output,
            _target: PhantomData,
        };
        visit_dtype(visitor.input.dtype(), visitor)
    }

    fn independent_instance(&self) -> Box<dyn Op> {
        Box::new(Self { sig: self.sig.clone(), threads: self.threads.clone(), _target: PhantomData })
    }
}

register_op!(Convert<u8>);
register_op!(Convert<i32>);
register_op!(Convert<f32>);
register_op!(Convert<f64>);

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::DataType;
    use tensor::Tensor;

    fn env() -> OpEnv {
        OpEnv::builder().threads(2).parallel_threshold(0).build().unwrap()
    }

    #[test]
    fn cast_saturates_into_narrow_types() {
        let mut to_u8 = Cast::<f64, u8>::new();
        assert_eq!(to_u8.compute(300.0), 255);
        assert_eq!(to_u8.compute(-4.5), 0);
        assert_eq!(to_u8.compute(f64::NAN), 0);
        let mut to_f32 = Cast::<i32, f32>::new();
        assert_eq!(to_f32.compute(-7), -7.0);
    }

    #[test]
    fn function_allocates_the_target_type() {
        let env = env();
        let input = TensorAny::from(Tensor::from_vec(vec![1.9f32, -2.5, 400.0, 7.0], &[2, 2]).unwrap());
        let mut to_u8 = env.function("convert.uint8", &[input.tensor_type()], &[]).unwrap();
        assert_eq!(to_u8.bound().name(), "convert-u8");

        let out = to_u8.calculate(&[&input]).unwrap();
        assert_eq!(out.tensor_type(), input.tensor_type().with_dtype(DataType::U8));
        assert_eq!(u8::tensor(&out).map(Tensor::to_vec), Some(vec![1, 0, 255, 7]));
    }

    #[test]
    fn planar_inputs_keep_their_layout() {
        let env = env();
        let input = TensorAny::from(Tensor::from_planes(vec![vec![1u8, 2], vec![3, 4]], &[2, 1, 2]).unwrap());
        let mut to_i32 = env.function("convert.int32", &[input.tensor_type()], &[]).unwrap();
        let out = to_i32.calculate(&[&input]).unwrap();
        assert_eq!(out.tensor_type(), input.tensor_type().with_dtype(DataType::I32));
        assert_eq!(i32::tensor(&out).map(Tensor::to_vec), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn output_of_another_type_never_matches() {
        let env = env();
        let ty = TensorType::array(DataType::I16, &[3]).unwrap();
        let err = env.computer("convert.float32", &[ty], &ty, &[]).unwrap_err();
        assert!(matches!(err, OpError::NoCandidates { .. }), "{err}");
    }
}
