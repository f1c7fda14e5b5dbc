//! Calling-convention adapters over a bound op.
//!
//! Every adapter is Ready when handed out. Calls with argument descriptors
//! other than the bound ones re-run conformance first.

use core_types::TensorType;
use derive_more::From;

use crate::matcher::BoundOp;
use crate::types::{Convention, InplaceTarget, OpError, TensorAny};

fn types_of(values: &[&TensorAny]) -> Vec<TensorType> {
    values.iter().map(|t| t.tensor_type()).collect()
}

/// Validate `output` against the op's declared output type. Runs before
/// anything is written.
fn check_output(op: &BoundOp, inputs: &[TensorType], output: &TensorType) -> Result<(), OpError> {
    let expected = op.op().output_type(inputs)?;
    if expected.dtype() != output.dtype() {
        return Err(OpError::IllegalState(format!(
            "{} produces {} elements, output holds {}",
            op.name(),
            expected.dtype(),
            output.dtype()
        )));
    }
    if !expected.view.same_dims(&output.view) {
        return Err(OpError::ShapeMismatch { expected: expected.dims().to_vec(), found: output.dims().to_vec() });
    }
    Ok(())
}

fn compute_into(op: &mut BoundOp, inputs: &[&TensorAny], output: &mut TensorAny) -> Result<(), OpError> {
    let types = types_of(inputs);
    let out_ty = output.tensor_type();
    check_output(op, &types, &out_ty)?;
    op.rebind(&types, Some(&out_ty))?;
    op.op_mut().compute(inputs, output)
}

fn allocate_and_compute(op: &mut BoundOp, inputs: &[&TensorAny]) -> Result<TensorAny, OpError> {
    op.rebind(&types_of(inputs), None)?;
    let mut output = op.op_mut().create_output(inputs)?;
    op.op_mut().compute(inputs, &mut output)?;
    Ok(output)
}

/// Writes into a caller-provided output; never allocates.
#[derive(Debug)]
pub struct Computer {
    op: BoundOp,
}

impl Computer {
    pub(crate) fn new(op: BoundOp) -> Self {
        Self { op }
    }

    pub fn compute(&mut self, inputs: &[&TensorAny], output: &mut TensorAny) -> Result<(), OpError> {
        compute_into(&mut self.op, inputs, output)
    }

    pub fn bound(&self) -> &BoundOp {
        &self.op
    }

    pub fn independent_instance(&self) -> Self {
        Self { op: self.op.independent_instance() }
    }
}

/// Allocates and returns a fresh output on every call.
#[derive(Debug)]
pub struct Function {
    op: BoundOp,
}

impl Function {
    pub(crate) fn new(op: BoundOp) -> Self {
        Self { op }
    }

    pub fn calculate(&mut self, inputs: &[&TensorAny]) -> Result<TensorAny, OpError> {
        allocate_and_compute(&mut self.op, inputs)
    }

    pub fn bound(&self) -> &BoundOp {
        &self.op
    }

    pub fn independent_instance(&self) -> Self {
        Self { op: self.op.independent_instance() }
    }
}

/// Computer when given an output, Function otherwise.
#[derive(Debug)]
pub struct Hybrid {
    op: BoundOp,
}

impl Hybrid {
    pub(crate) fn new(op: BoundOp) -> Self {
        Self { op }
    }

    pub fn compute(&mut self, inputs: &[&TensorAny], output: &mut TensorAny) -> Result<(), OpError> {
        compute_into(&mut self.op, inputs, output)
    }

    pub fn calculate(&mut self, inputs: &[&TensorAny]) -> Result<TensorAny, OpError> {
        allocate_and_compute(&mut self.op, inputs)
    }

    /// Compute into `output` if given, else into a fresh allocation.
    pub fn run(&mut self, inputs: &[&TensorAny], output: Option<TensorAny>) -> Result<TensorAny, OpError> {
        match output {
            Some(mut out) => {
                self.compute(inputs, &mut out)?;
                Ok(out)
            }
            None => self.calculate(inputs),
        }
    }

    pub fn bound(&self) -> &BoundOp {
        &self.op
    }

    pub fn independent_instance(&self) -> Self {
        Self { op: self.op.independent_instance() }
    }
}

/// Mutates one positional argument.
#[derive(Debug)]
pub struct Inplace {
    op:     BoundOp,
    target: InplaceTarget,
}

impl Inplace {
    pub(crate) fn new(op: BoundOp, target: InplaceTarget) -> Self {
        Self { op, target }
    }

    pub fn target(&self) -> InplaceTarget {
        self.target
    }

    /// Mutate `arg`; `others` are the remaining arguments in positional order.
    pub fn mutate(&mut self, arg: &mut TensorAny, others: &[&TensorAny]) -> Result<(), OpError> {
        let index = self.target.index();
        if index > others.len() {
            return Err(OpError::IllegalState(format!(
                "{} mutates argument {index} but only {} were given",
                self.op.name(),
                others.len() + 1
            )));
        }
        let mut types = types_of(others);
        types.insert(index, arg.tensor_type());
        self.op.rebind(&types, None)?;
        self.op.op_mut().mutate(self.target, arg, others)
    }

    /// Binary form mutating the first argument.
    pub fn mutate1(&mut self, a: &mut TensorAny, b: &TensorAny) -> Result<(), OpError> {
        self.expect_target(InplaceTarget::First)?;
        self.mutate(a, &[b])
    }

    /// Binary form mutating the second argument.
    pub fn mutate2(&mut self, a: &TensorAny, b: &mut TensorAny) -> Result<(), OpError> {
        self.expect_target(InplaceTarget::Second)?;
        self.mutate(b, &[a])
    }

    fn expect_target(&self, target: InplaceTarget) -> Result<(), OpError> {
        if self.target != target {
            return Err(OpError::IllegalState(format!(
                "{} was resolved to mutate {:?}, not {target:?}",
                self.op.name(),
                self.target
            )));
        }
        Ok(())
    }

    pub fn bound(&self) -> &BoundOp {
        &self.op
    }

    pub fn independent_instance(&self) -> Self {
        Self { op: self.op.independent_instance(), target: self.target }
    }
}

/// The four calling conventions as one tagged union.
#[derive(Debug, From)]
pub enum Special {
    Computer(Computer),
    Function(Function),
    Hybrid(Hybrid),
    Inplace(Inplace),
}

impl Special {
    pub fn convention(&self) -> Convention {
        match self {
            Special::Computer(_) => Convention::Computer,
            Special::Function(_) => Convention::Function,
            Special::Hybrid(_) => Convention::Hybrid,
            Special::Inplace(op) => Convention::Inplace(op.target()),
        }
    }

    /// Uniform entry point. Computer needs `output`, Function and Inplace
    /// refuse one, Hybrid takes either; Inplace mutates `args` and returns
    /// `None`.
    pub fn apply(&mut self, args: &mut [TensorAny], output: Option<TensorAny>) -> Result<Option<TensorAny>, OpError> {
        let convention = self.convention();
        match self {
            Special::Computer(op) => {
                let mut out = output.ok_or_else(|| OpError::IllegalState("computer requires an output".into()))?;
                let inputs: Vec<&TensorAny> = args.iter().collect();
                op.compute(&inputs, &mut out)?;
                Ok(Some(out))
            }
            Special::Function(op) => {
                reject_output(convention, &output)?;
                let inputs: Vec<&TensorAny> = args.iter().collect();
                op.calculate(&inputs).map(Some)
            }
            Special::Hybrid(op) => {
                let inputs: Vec<&TensorAny> = args.iter().collect();
                op.run(&inputs, output).map(Some)
            }
            Special::Inplace(op) => {
                reject_output(convention, &output)?;
                let index = op.target().index();
                if index >= args.len() {
                    return Err(OpError::IllegalState(format!("no argument {index} to mutate")));
                }
                let (head, tail) = args.split_at_mut(index);
                let (arg, rest) = tail.split_first_mut().ok_or_else(|| OpError::IllegalState("no argument to mutate".into()))?;
                let others: Vec<&TensorAny> = head.iter().chain(rest.iter()).collect();
                op.mutate(arg, &others)?;
                Ok(None)
            }
        }
    }

    pub fn bound(&self) -> &BoundOp {
        match self {
            Special::Computer(op) => op.bound(),
            Special::Function(op) => op.bound(),
            Special::Hybrid(op) => op.bound(),
            Special::Inplace(op) => op.bound(),
        }
    }

    pub fn independent_instance(&self) -> Self {
        match self {
            Special::Computer(op) => op.independent_instance().into(),
            Special::Function(op) => op.independent_instance().into(),
            Special::Hybrid(op) => op.independent_instance().into(),
            Special::Inplace(op) => op.independent_instance().into(),
        }
    }
}

fn reject_output(convention: Convention, output: &Option<TensorAny>) -> Result<(), OpError> {
    match output {
        Some(_) => Err(OpError::IllegalState(format!("{convention} ops take no output"))),
        None => Ok(()),
    }
}
