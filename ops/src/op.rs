use core_types::TensorType;

use crate::env::OpEnv;
use crate::types::{Binding, InplaceTarget, OpError, OpSignature, Priority, ScalarAny, TensorAny};

/// Trait to implement for each Op.
///
/// One functional core behind every calling convention: `compute` serves
/// Computer, Function and Hybrid; `mutate` serves Inplace.
pub trait Op: Send + Sync {
    /// Full signature
    fn signature(&self) -> &OpSignature;

    /// Store the scalar parameters of a request.
    fn bind(&mut self, _params: &[ScalarAny]) -> Result<(), OpError> {
        Ok(())
    }

    /// One-time setup. Nested helper ops are resolved here through `env`.
    fn initialize(&mut self, _env: &OpEnv, _binding: &Binding) -> Result<(), OpError> {
        Ok(())
    }

    /// Dynamic conformance: can this instance handle the concrete descriptors?
    fn conforms(&self, _binding: &Binding) -> Result<(), String> {
        Ok(())
    }

    /// Type of the output produced for `inputs`.
    fn output_type(&self, inputs: &[TensorType]) -> Result<TensorType, OpError> {
        inputs
            .first()
            .copied()
            .ok_or_else(|| OpError::IllegalState(format!("{} has no input to derive an output from", self.signature().name)))
    }

    /// Allocate the output for `inputs`; the result is handed to `compute`.
    fn create_output(&mut self, inputs: &[&TensorAny]) -> Result<TensorAny, OpError> {
        let types: Vec<TensorType> = inputs.iter().map(|t| t.tensor_type()).collect();
        Ok(TensorAny::allocate(&self.output_type(&types)?)?)
    }

    fn compute(&mut self, _inputs: &[&TensorAny], _output: &mut TensorAny) -> Result<(), OpError> {
        Err(OpError::IllegalState(format!("{} cannot compute into an output", self.signature().name)))
    }

    /// Mutate `arg`, the argument at `target`; `others` are the remaining
    /// arguments in positional order.
    fn mutate(&mut self, target: InplaceTarget, _arg: &mut TensorAny, _others: &[&TensorAny]) -> Result<(), OpError> {
        Err(OpError::IllegalState(format!("{} cannot mutate argument {target:?}", self.signature().name)))
    }

    /// Fresh instance for another thread. Shares only immutable configuration;
    /// scratch state is reset and nested ops are cloned recursively.
    fn independent_instance(&self) -> Box<dyn Op>;
}

/// Wrapper for op factory functions
pub struct OpFactory {
    pub identity: &'static str,
    pub priority: Priority,
    pub aliases:  &'static [&'static str],
    pub factory:  fn() -> Box<dyn Op>,
}

// Collect all registered ops
inventory::collect!(OpFactory);

/// Register an operation with the inventory system
#[macro_export]
macro_rules! register_op {
    ($op_type:ty) => {
        $crate::inventory::submit! {
            $crate::OpFactory {
                identity: <$op_type as $crate::RegistrationInfo>::IDENTITY,
                priority: <$op_type as $crate::RegistrationInfo>::PRIORITY,
                aliases:  <$op_type as $crate::RegistrationInfo>::ALIASES,
                factory:  || Box::new(<$op_type>::new()),
            }
        }
    };
}
