use super::tensor_of_mut;
use crate::op::Op;
use crate::register_op;
use crate::types::{
    visit_dtype, AnyElement, DtypeConstraint, DtypeVisitor, OpError, OpSignature, Priority, RegistrationInfo,
    TensorAny,
};

/// Identity of the allocation helper.
pub const CREATE_TENSOR: &str = "create.tensor";

/// Zeroed tensor shaped and laid out like its input.
#[derive(Debug, Clone)]
pub struct CreateTensor {
    sig: OpSignature,
}

impl CreateTensor {
    pub fn new() -> Self {
        Self {
            sig: OpSignature {
                name:       "zeros-like".into(),
                inputs:     vec![DtypeConstraint::Any],
                params:     vec![],
                output:     DtypeConstraint::Any,
                same_dtype: true,
                compute:    true,
                mutate:     vec![],
            },
        }
    }
}

impl Default for CreateTensor {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationInfo for CreateTensor {
    const IDENTITY: &'static str = CREATE_TENSOR;
    const PRIORITY: Priority = Priority::NORMAL;
    const ALIASES: &'static [&'static str] = &["create.img"];
}

impl Op for CreateTensor {
    fn signature(&self) -> &OpSignature {
        &self.sig
    }

    /// Zero an existing output in place. A fresh output from
    /// `create_output` is already zeroed.
    fn compute(&mut self, _inputs: &[&TensorAny], output: &mut TensorAny) -> Result<(), OpError> {
        let dtype = output.dtype();
        visit_dtype(dtype, Zero { output })
    }

    fn independent_instance(&self) -> Box<dyn Op> {
        Box::new(self.clone())
    }
}

struct Zero<'a> {
    output: &'a mut TensorAny,
}

impl DtypeVisitor for Zero<'_> {
    type Output = Result<(), OpError>;

    fn visit<T: AnyElement>(self) -> Self::Output {
        tensor_of_mut::<T>(self.output)?.fill(T::default());
        Ok(())
    }
}

register_op!(CreateTensor);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::OpEnv;
    use crate::types::AnyElement;
    use tensor::Tensor;

    #[test]
    fn creates_zeros_like_the_input() {
        let env = OpEnv::builder().threads(1).build().unwrap();
        let planar = TensorAny::from(Tensor::from_planes(vec![vec![7u8; 4], vec![9; 4]], &[2, 2, 2]).unwrap());

        let mut create = env.function("create.img", &[planar.tensor_type()], &[]).unwrap();
        let out = create.calculate(&[&planar]).unwrap();
        assert_eq!(out.tensor_type(), planar.tensor_type());
        assert_eq!(u8::tensor(&out).map(Tensor::to_vec), Some(vec![0; 8]));

        let mut reset = env.computer(CREATE_TENSOR, &[planar.tensor_type()], &planar.tensor_type(), &[]).unwrap();
        let mut target = planar.clone();
        reset.compute(&[&planar], &mut target).unwrap();
        assert_eq!(target, out);
    }

    #[test]
    fn function_allocates_once_and_computer_zeroes_in_place() {
        let mut create = CreateTensor::new();
        let input = TensorAny::from(Tensor::from_vec(vec![3i32, 4, 5], &[3]).unwrap());

        let fresh = create.create_output(&[&input]).unwrap();
        assert_eq!(fresh.tensor_type(), input.tensor_type());
        assert_eq!(i32::tensor(&fresh).map(Tensor::to_vec), Some(vec![0; 3]));

        let mut target = input.clone();
        let before = i32::tensor(&target).map(|t| t.as_slice().map(<[i32]>::as_ptr));
        create.compute(&[&input], &mut target).unwrap();
        let after = i32::tensor(&target).map(|t| t.as_slice().map(<[i32]>::as_ptr));
        assert_eq!(before, after);
        assert_eq!(i32::tensor(&target).map(Tensor::to_vec), Some(vec![0; 3]));
    }
}
