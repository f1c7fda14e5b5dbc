use core_types::{DataType, Element, TensorType, ViewDescriptor};
use derive_more::From;
use ndops_core::ChunkError;
use std::cmp::Ordering;
use std::fmt;
use tensor::{Tensor, TensorError};

include!(concat!(env!("OUT_DIR"), "/generated_tensor_any.rs"));

/// Element types a signature slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtypeConstraint {
    Any,
    Integer,
    Float,
    Only(DataType),
    OneOf(&'static [DataType]),
}

impl DtypeConstraint {
    pub fn admits(&self, dtype: DataType) -> bool {
        match self {
            DtypeConstraint::Any => true,
            DtypeConstraint::Integer => !dtype.is_float(),
            DtypeConstraint::Float => dtype.is_float(),
            DtypeConstraint::Only(only) => *only == dtype,
            DtypeConstraint::OneOf(set) => set.contains(&dtype),
        }
    }
}

impl fmt::Display for DtypeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DtypeConstraint::Any => f.write_str("any element type"),
            DtypeConstraint::Integer => f.write_str("an integer type"),
            DtypeConstraint::Float => f.write_str("a float type"),
            DtypeConstraint::Only(dtype) => write!(f, "{dtype}"),
            DtypeConstraint::OneOf(set) => {
                f.write_str("one of ")?;
                for (i, dtype) in set.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{dtype}")?;
                }
                Ok(())
            }
        }
    }
}

/// Argument mutated by an in-place op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InplaceTarget {
    First,
    Second,
}

impl InplaceTarget {
    /// Position of the mutated argument.
    pub fn index(self) -> usize {
        match self {
            InplaceTarget::First => 0,
            InplaceTarget::Second => 1,
        }
    }
}

/// Execution shape a caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Convention {
    /// Writes into a preallocated output.
    Computer,
    /// Allocates and returns a fresh output.
    Function,
    /// Computer when given an output, Function otherwise.
    Hybrid,
    /// Mutates one of its arguments.
    Inplace(InplaceTarget),
}

impl Convention {
    /// True for conventions that may have to allocate the output.
    pub fn may_allocate(self) -> bool {
        matches!(self, Convention::Function | Convention::Hybrid)
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Convention::Computer => f.write_str("computer"),
            Convention::Function => f.write_str("function"),
            Convention::Hybrid => f.write_str("hybrid"),
            Convention::Inplace(InplaceTarget::First) => f.write_str("inplace1"),
            Convention::Inplace(InplaceTarget::Second) => f.write_str("inplace2"),
        }
    }
}

/// Declared constraints of one candidate, checked before instantiation.
#[derive(Debug, Clone)]
pub struct OpSignature {
    /// Candidate name, unique within an identity
    pub name:       String,
    pub inputs:     Vec<DtypeConstraint>,
    pub params:     Vec<DtypeConstraint>,
    pub output:     DtypeConstraint,
    /// Inputs, parameters and output all share one element type
    pub same_dtype: bool,
    /// Supports Computer, Function and Hybrid
    pub compute:    bool,
    /// Arguments it can mutate in place
    pub mutate:     Vec<InplaceTarget>,
}

/// Candidate precedence; larger runs first.
#[derive(Debug, Clone, Copy)]
pub struct Priority(pub f64);

impl Priority {
    pub const FIRST: Priority = Priority(f64::INFINITY);
    pub const HIGH: Priority = Priority(100.0);
    pub const NORMAL: Priority = Priority(0.0);
    pub const LOW: Priority = Priority(-100.0);
    pub const LAST: Priority = Priority(f64::NEG_INFINITY);

    pub const fn plus(self, delta: f64) -> Priority {
        Priority(self.0 + delta)
    }
}

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a candidate was passed over.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RejectReason {
    #[error("{0} convention not supported")]
    Convention(Convention),
    #[error("takes {expected} inputs, got {found}")]
    Arity { expected: usize, found: usize },
    #[error("takes {expected} parameters, got {found}")]
    ParamArity { expected: usize, found: usize },
    #[error("input {index} is {found}, expected {expected}")]
    InputDtype { index: usize, expected: DtypeConstraint, found: DataType },
    #[error("parameter {index} is {found}, expected {expected}")]
    ParamDtype { index: usize, expected: DtypeConstraint, found: DataType },
    #[error("output is {found}, expected {expected}")]
    OutputDtype { expected: DtypeConstraint, found: DataType },
    #[error("arguments mix element types {0:?}")]
    MixedDtypes(Vec<DataType>),
    #[error("output has dims {found:?}, op produces {expected:?}")]
    OutputShape { expected: Vec<u64>, found: Vec<u64> },
    #[error("initialization failed: {0}")]
    Initialize(String),
    #[error("{0}")]
    Conformance(String),
}

/// One rejected candidate, as reported by resolution errors.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub candidate: String,
    pub priority:  Priority,
    pub reason:    RejectReason,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (priority {}): {}", self.candidate, self.priority, self.reason)
    }
}

fn render_rejections(rejected: &[Rejection]) -> String {
    if rejected.is_empty() {
        return "no candidates registered".to_string();
    }
    rejected.iter().map(Rejection::to_string).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum OpError {
    #[error("no candidate for `{identity}` accepts {request}: {}", render_rejections(.rejected))]
    NoCandidates { identity: String, request: String, rejected: Vec<Rejection> },
    #[error("no candidate for `{identity}` conforms to {request}: {}", render_rejections(.rejected))]
    NoMatch { identity: String, request: String, rejected: Vec<Rejection> },
    #[error("output dimensions {found:?} do not match expected {expected:?}")]
    ShapeMismatch { expected: Vec<u64>, found: Vec<u64> },
    #[error(transparent)]
    Overflow(#[from] ChunkError),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl OpError {
    /// Rejected candidates carried by resolution errors.
    pub fn rejections(&self) -> &[Rejection] {
        match self {
            OpError::NoCandidates { rejected, .. } | OpError::NoMatch { rejected, .. } => rejected,
            _ => &[],
        }
    }
}

/// Static registration data of an op type, consumed by `register_op!`.
pub trait RegistrationInfo {
    /// Identity the op is requested by
    const IDENTITY: &'static str;
    const PRIORITY: Priority;
    const ALIASES: &'static [&'static str] = &[];
}

/// Concrete argument descriptors and parameters a candidate is bound to.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub convention: Convention,
    /// Every positional argument; for in-place ops this includes the target
    pub inputs:     Vec<TensorType>,
    pub output:     Option<TensorType>,
    pub params:     Vec<ScalarAny>,
}

impl Binding {
    /// Descriptor of the value the op writes: the output, or the mutated argument.
    pub fn written(&self) -> Option<&TensorType> {
        match self.convention {
            Convention::Inplace(target) => self.inputs.get(target.index()),
            _ => self.output.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_infinities() {
        let mut ps = vec![Priority::LOW, Priority::FIRST, Priority::NORMAL, Priority::LAST, Priority::HIGH.plus(1.0)];
        ps.sort();
        assert_eq!(ps, vec![Priority::LAST, Priority::LOW, Priority::NORMAL, Priority(101.0), Priority::FIRST]);
    }

    #[test]
    fn constraints_admit() {
        assert!(DtypeConstraint::Integer.admits(DataType::U16));
        assert!(!DtypeConstraint::Integer.admits(DataType::F32));
        assert!(DtypeConstraint::OneOf(&[DataType::I8, DataType::F64]).admits(DataType::F64));
        assert_eq!(DtypeConstraint::OneOf(&[DataType::I8, DataType::U8]).to_string(), "one of i8|u8");
    }

    #[test]
    fn tensor_any_wraps_and_allocates() {
        let any = TensorAny::from(Tensor::from_vec(vec![1u8, 2, 3], &[3]).unwrap());
        assert_eq!(any.dtype(), DataType::U8);
        assert!(u8::tensor(&any).is_some());
        assert!(i8::tensor(&any).is_none());

        let ty = TensorType::array(DataType::F32, &[2, 2]).unwrap();
        let zeros = TensorAny::allocate(&ty).unwrap();
        assert_eq!(zeros.tensor_type(), ty);
        assert_eq!(f32::tensor(&zeros).map(Tensor::to_vec), Some(vec![0.0; 4]));
    }

    #[test]
    fn scalar_any_dtype() {
        let s = ScalarAny::from(5i16);
        assert_eq!(s.dtype(), DataType::I16);
        assert_eq!(s.to_f64(), 5.0);
        assert_eq!(i16::scalar(&s), Some(5));
        assert_eq!(u16::scalar(&s), None);
    }

    #[test]
    fn visitor_picks_the_runtime_type() {
        struct Width;
        impl DtypeVisitor for Width {
            type Output = usize;
            fn visit<T: AnyElement>(self) -> usize {
                std::mem::size_of::<T>()
            }
        }
        for dtype in DataType::ALL {
            assert_eq!(visit_dtype(dtype, Width), dtype.size_in_bytes());
        }
    }

    #[test]
    fn rejection_report_lists_candidates() {
        let err = OpError::NoMatch {
            identity: "math.add".into(),
            request:  "computer(f64[3] array)".into(),
            rejected: vec![Rejection {
                candidate: "array-add-i8".into(),
                priority:  Priority(101.0),
                reason:    RejectReason::Conformance("input is not array-backed".into()),
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains("array-add-i8 (priority 101): input is not array-backed"), "{msg}");
        assert_eq!(err.rejections().len(), 1);
    }
}
