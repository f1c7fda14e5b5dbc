//! ndops: an op-matching and dispatch engine for element-wise N-d kernels.
//!
//! Ops register candidates under an identity; an [`OpEnv`] resolves a request
//! to the highest-priority candidate whose signature and conformance accept
//! the concrete argument descriptors, and hands it out behind one of four
//! calling conventions.

pub use core_types::{DataType, Element, ElementDescriptor, IterationOrder, StorageLayout, TensorType, ViewDescriptor};
pub use ndops_core::{Chunk, ChunkError, EngineConfig, Partition, ThreadContext};
pub use ndops_ops::{
    builtin, element, map, BoundOp, Computer, Convention, Function, Hybrid, Inplace, InplaceTarget, Op, OpEnv,
    OpEnvBuilder, OpError, OpRequest, OpSignature, Priority, RegistrationInfo, ScalarAny, Special, TensorAny,
};
pub use tensor::{PermutedView, Tensor, TensorError};
