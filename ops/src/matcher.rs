use std::fmt;
use std::sync::Arc;

use core_types::{DataType, TensorType};
use tracing::debug;

use crate::cache::{StaticKey, StaticMatch};
use crate::env::OpEnv;
use crate::op::Op;
use crate::types::{
    Binding, Convention, OpError, OpSignature, RejectReason, Rejection, ScalarAny,
};
use crate::{CandidateSet, OpDescriptor};

/// A request for one identity under one calling convention.
#[derive(Debug, Clone, Copy)]
pub struct OpRequest<'a> {
    pub identity:   &'a str,
    pub convention: Convention,
    /// Every positional argument, in order
    pub inputs:     &'a [TensorType],
    /// `None` lets Function and Hybrid allocate
    pub output:     Option<&'a TensorType>,
    pub params:     &'a [ScalarAny],
}

impl<'a> OpRequest<'a> {
    pub fn new(identity: &'a str, convention: Convention, inputs: &'a [TensorType]) -> Self {
        Self { identity, convention, inputs, output: None, params: &[] }
    }

    pub fn with_output(mut self, output: &'a TensorType) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_params(mut self, params: &'a [ScalarAny]) -> Self {
        self.params = params;
        self
    }

    fn static_key(&self, identity: &str) -> StaticKey {
        StaticKey {
            identity:   identity.to_string(),
            convention: self.convention,
            inputs:     self.inputs.iter().map(TensorType::dtype).collect(),
            output:     self.output.map(TensorType::dtype),
            params:     self.params.iter().map(ScalarAny::dtype).collect(),
        }
    }

    fn binding(&self) -> Binding {
        Binding {
            convention: self.convention,
            inputs:     self.inputs.to_vec(),
            output:     self.output.copied(),
            params:     self.params.to_vec(),
        }
    }
}

impl fmt::Display for OpRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe(f, self.convention, self.inputs, self.output)
    }
}

fn describe(
    f:          &mut fmt::Formatter<'_>,
    convention: Convention,
    inputs:     &[TensorType],
    output:     Option<&TensorType>,
) -> fmt::Result {
    write!(f, "{convention}(")?;
    for (i, ty) in inputs.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{ty}")?;
    }
    f.write_str(")")?;
    if let Some(out) = output {
        write!(f, " -> {out}")?;
    }
    Ok(())
}

struct Described<'a>(&'a Binding);

impl fmt::Display for Described<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe(f, self.0.convention, &self.0.inputs, self.0.output.as_ref())
    }
}

/* ------------------------------------------------------------------------- */
/* Static phase                                                              */
/* ------------------------------------------------------------------------- */

/// Check declared constraints against the element types of a request.
pub(crate) fn static_check(sig: &OpSignature, key: &StaticKey) -> Result<(), RejectReason> {
    let supported = match key.convention {
        Convention::Computer | Convention::Function | Convention::Hybrid => sig.compute,
        Convention::Inplace(target) => sig.mutate.contains(&target),
    };
    if !supported {
        return Err(RejectReason::Convention(key.convention));
    }

    if key.inputs.len() != sig.inputs.len() {
        return Err(RejectReason::Arity { expected: sig.inputs.len(), found: key.inputs.len() });
    }
    for (index, (expected, &found)) in sig.inputs.iter().zip(&key.inputs).enumerate() {
        if !expected.admits(found) {
            return Err(RejectReason::InputDtype { index, expected: *expected, found });
        }
    }

    if key.params.len() != sig.params.len() {
        return Err(RejectReason::ParamArity { expected: sig.params.len(), found: key.params.len() });
    }
    for (index, (expected, &found)) in sig.params.iter().zip(&key.params).enumerate() {
        if !expected.admits(found) {
            return Err(RejectReason::ParamDtype { index, expected: *expected, found });
        }
    }

    let written = match key.convention {
        Convention::Inplace(target) => key.inputs.get(target.index()).copied(),
        _ => key.output,
    };
    if let Some(found) = written {
        if !sig.output.admits(found) {
            return Err(RejectReason::OutputDtype { expected: sig.output, found });
        }
    }

    if sig.same_dtype {
        let mut seen: Vec<DataType> = key.inputs.iter().chain(&key.params).chain(&key.output).copied().collect();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() > 1 {
            return Err(RejectReason::MixedDtypes(seen));
        }
    }
    Ok(())
}

fn filter(set: &CandidateSet, key: &StaticKey) -> StaticMatch {
    let mut matched = StaticMatch::default();
    for descriptor in set.iter() {
        match static_check(descriptor.signature(), key) {
            Ok(()) => matched.survivors.push(descriptor.clone()),
            Err(reason) => {
                debug!(identity = %key.identity, candidate = descriptor.name(), %reason, "statically rejected");
                matched.rejected.push(Rejection {
                    candidate: descriptor.name().to_string(),
                    priority:  descriptor.priority(),
                    reason,
                });
            }
        }
    }
    matched
}

/* ------------------------------------------------------------------------- */
/* Dynamic phase                                                             */
/* ------------------------------------------------------------------------- */

/// Resolve a request to the first conforming candidate, in Ready state.
pub(crate) fn resolve(env: &OpEnv, request: &OpRequest<'_>) -> Result<BoundOp, OpError> {
    if request.convention == Convention::Computer && request.output.is_none() {
        return Err(OpError::IllegalState(format!("computer `{}` requires an output", request.identity)));
    }

    let registry = env.registry();
    let (identity, set) = match registry.canonical(request.identity).zip(registry.candidates(request.identity)) {
        Some(found) => found,
        None => {
            return Err(OpError::NoCandidates {
                identity: request.identity.to_string(),
                request:  request.to_string(),
                rejected: Vec::new(),
            });
        }
    };

    let matched = env.cache().get_or_insert_with(request.static_key(identity), |key| filter(set, key));
    if matched.survivors.is_empty() {
        return Err(OpError::NoCandidates {
            identity: identity.to_string(),
            request:  request.to_string(),
            rejected: matched.rejected.clone(),
        });
    }

    let binding = request.binding();
    let mut rejected = matched.rejected.clone();
    // First dims disagreement; reported only if no candidate accepted the output dims.
    let mut misshapen: Option<(Vec<u64>, Vec<u64>)> = None;
    let mut shaped = false;
    for descriptor in &matched.survivors {
        let mut bound = BoundOp::instantiate(descriptor.clone(), binding.clone());
        let outcome = match bound.initialize(env) {
            Ok(()) => match output_shape(&bound, request) {
                Err(reason) => {
                    if let RejectReason::OutputShape { expected, found } = &reason {
                        misshapen.get_or_insert_with(|| (expected.clone(), found.clone()));
                    }
                    Err(reason)
                }
                Ok(()) => {
                    shaped = true;
                    bound.ready().map_err(RejectReason::Conformance)
                }
            },
            Err(err) => Err(RejectReason::Initialize(err.to_string())),
        };
        match outcome {
            Ok(()) => {
                debug!(identity, candidate = descriptor.name(), priority = %descriptor.priority(), "selected");
                return Ok(bound);
            }
            Err(reason) => {
                debug!(identity, candidate = descriptor.name(), %reason, "rejected");
                rejected.push(Rejection {
                    candidate: descriptor.name().to_string(),
                    priority:  descriptor.priority(),
                    reason,
                });
            }
        }
    }

    match misshapen {
        Some((expected, found)) if !shaped => Err(OpError::ShapeMismatch { expected, found }),
        _ => Err(OpError::NoMatch { identity: identity.to_string(), request: request.to_string(), rejected }),
    }
}

/// Compare a requested output against the dims the candidate derives
/// from the inputs.
fn output_shape(bound: &BoundOp, request: &OpRequest<'_>) -> Result<(), RejectReason> {
    let Some(output) = request.output else {
        return Ok(());
    };
    let expected = bound.op().output_type(request.inputs).map_err(|err| RejectReason::Initialize(err.to_string()))?;
    if expected.view.same_dims(&output.view) {
        Ok(())
    } else {
        Err(RejectReason::OutputShape { expected: expected.dims().to_vec(), found: output.dims().to_vec() })
    }
}

/// Lifecycle of a bound op. Re-entering `Initialized` needs a fresh instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    Ready,
}

/// An instantiated candidate bound to concrete descriptors and parameters.
pub struct BoundOp {
    descriptor: Arc<OpDescriptor>,
    op:         Box<dyn Op>,
    state:      Lifecycle,
    binding:    Binding,
}

impl BoundOp {
    pub fn instantiate(descriptor: Arc<OpDescriptor>, binding: Binding) -> Self {
        let op = descriptor.instantiate();
        Self { descriptor, op, state: Lifecycle::Uninitialized, binding }
    }

    /// Bind parameters and run one-time setup.
    pub fn initialize(&mut self, env: &OpEnv) -> Result<(), OpError> {
        if self.state != Lifecycle::Uninitialized {
            return Err(OpError::IllegalState(format!(
                "{} is already initialized; resolve a fresh instance",
                self.name()
            )));
        }
        self.op.bind(&self.binding.params)?;
        self.op.initialize(env, &self.binding)?;
        self.state = Lifecycle::Initialized;
        Ok(())
    }

    /// Run the conformance predicate against the bound descriptors.
    pub fn ready(&mut self) -> Result<(), String> {
        if self.state == Lifecycle::Uninitialized {
            return Err(format!("{} is not initialized", self.name()));
        }
        self.op.conforms(&self.binding)?;
        self.state = Lifecycle::Ready;
        Ok(())
    }

    /// Re-check conformance when called with descriptors other than the
    /// bound ones. Element type changes need a fresh resolution.
    pub fn rebind(&mut self, inputs: &[TensorType], output: Option<&TensorType>) -> Result<(), OpError> {
        if self.state != Lifecycle::Ready {
            return Err(OpError::IllegalState(format!("{} is not ready ({:?})", self.name(), self.state)));
        }
        if self.binding.inputs == inputs && self.binding.output.as_ref() == output {
            return Ok(());
        }

        let same_dtypes = inputs.len() == self.binding.inputs.len()
            && inputs.iter().zip(&self.binding.inputs).all(|(a, b)| a.dtype() == b.dtype())
            && match (output, &self.binding.output) {
                (Some(a), Some(b)) => a.dtype() == b.dtype(),
                _ => true,
            };
        if !same_dtypes {
            let mut found = self.binding.clone();
            found.inputs = inputs.to_vec();
            found.output = output.copied();
            return Err(OpError::IllegalState(format!(
                "{} was resolved for {} but called with {}; resolve again",
                self.name(),
                Described(&self.binding),
                Described(&found),
            )));
        }

        let mut candidate = self.binding.clone();
        candidate.inputs = inputs.to_vec();
        candidate.output = output.copied();
        if let Err(reason) = self.op.conforms(&candidate) {
            debug!(identity = self.descriptor.identity(), candidate = self.name(), %reason, "no longer conforms");
            return Err(OpError::NoMatch {
                identity: self.descriptor.identity().to_string(),
                request:  Described(&candidate).to_string(),
                rejected: vec![Rejection {
                    candidate: self.name().to_string(),
                    priority:  self.descriptor.priority(),
                    reason:    RejectReason::Conformance(reason),
                }],
            });
        }
        self.binding = candidate;
        Ok(())
    }

    /// Clone for another thread; see [`Op::independent_instance`].
    pub fn independent_instance(&self) -> BoundOp {
        BoundOp {
            descriptor: self.descriptor.clone(),
            op:         self.op.independent_instance(),
            state:      self.state,
            binding:    self.binding.clone(),
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &OpDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn op(&self) -> &dyn Op {
        self.op.as_ref()
    }

    pub(crate) fn op_mut(&mut self) -> &mut dyn Op {
        self.op.as_mut()
    }
}

impl fmt::Debug for BoundOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundOp")
            .field("identity", &self.descriptor.identity())
            .field("candidate", &self.name())
            .field("state", &self.state)
            .field("binding", &self.binding)
            .finish()
    }
}
