use core_types::{Element, IterationOrder, ViewDescriptor};
use ndops_core::{Chunk, ThreadContext};
use tensor::{SharedTensor, Tensor};

use super::{drive, Layout, Source};
use crate::element::{BinaryInplaceOp, UnaryInplaceOp};
use crate::types::OpError;

fn own_order<T: Element>(arg: &SharedTensor<'_, T>) -> Option<IterationOrder> {
    Some(arg.view().iteration_order())
}

/// # Safety
/// No other thread may access the elements of `arg` addressed by `chunk`.
unsafe fn unary_chunk<A: Element>(
    op:     &mut dyn UnaryInplaceOp<A>,
    layout: &Layout<1>,
    arg:    &SharedTensor<'_, A>,
    chunk:  Chunk,
) -> Result<(), OpError> {
    let (start, step, count) = chunk.narrow::<usize>()?;
    drive(layout, start, step, count, |index, _| {
        // SAFETY: `index` lies in this chunk, exclusive per contract
        unsafe {
            let mut value = arg.read(index);
            op.mutate(&mut value);
            arg.write(index, value);
        }
        Ok(())
    })
}

/// `arg[i] = op(arg[i])` on the calling thread.
pub fn inplace<A: Element>(op: &mut dyn UnaryInplaceOp<A>, arg: &mut Tensor<A>) -> Result<(), OpError> {
    let shared = arg.shared();
    let layout = Layout::new([(shared.view(), own_order(&shared))])?;
    // SAFETY: single writer
    unsafe { unary_chunk(op, &layout, &shared, Chunk::whole(layout.total)) }
}

pub fn inplace_parallel<A: Element>(
    ctx: &ThreadContext,
    op:  &dyn UnaryInplaceOp<A>,
    arg: &mut Tensor<A>,
) -> Result<(), OpError> {
    let shared = arg.shared();
    let layout = Layout::new([(shared.view(), own_order(&shared))])?;
    ctx.chunk_default(layout.total, |chunk| {
        let mut local = op.independent_instance();
        // SAFETY: chunks are disjoint
        unsafe { unary_chunk(local.as_mut(), &layout, &shared, chunk) }
    })
}

fn arg_position<'v, T: Element>(arg: &'v SharedTensor<'_, T>) -> (&'v ViewDescriptor, Option<IterationOrder>) {
    (arg.view(), own_order(arg))
}

/// # Safety
/// No other thread may access the elements of `arg` addressed by `chunk`.
unsafe fn first_chunk<A: Element, B: Element>(
    op:     &mut dyn BinaryInplaceOp<A, B>,
    layout: &Layout<2>,
    arg:    &SharedTensor<'_, A>,
    other:  &Source<'_, B>,
    chunk:  Chunk,
) -> Result<(), OpError> {
    let (start, step, count) = chunk.narrow::<usize>()?;
    drive(layout, start, step, count, |index, coords| {
        let at = layout.slot(0, arg.view(), index, coords)?;
        let b = other.fetch(layout.fetch[1], index, coords);
        // SAFETY: `at` lies in this chunk, exclusive per contract
        unsafe {
            let mut value = arg.read(at);
            op.mutate1(&mut value, b);
            arg.write(at, value);
        }
        Ok(())
    })
}

/// # Safety
/// No other thread may access the elements of `arg` addressed by `chunk`.
unsafe fn second_chunk<A: Element, B: Element>(
    op:     &mut dyn BinaryInplaceOp<A, B>,
    layout: &Layout<2>,
    other:  &Source<'_, A>,
    arg:    &SharedTensor<'_, B>,
    chunk:  Chunk,
) -> Result<(), OpError> {
    let (start, step, count) = chunk.narrow::<usize>()?;
    drive(layout, start, step, count, |index, coords| {
        let a = other.fetch(layout.fetch[0], index, coords);
        let at = layout.slot(1, arg.view(), index, coords)?;
        // SAFETY: `at` lies in this chunk, exclusive per contract
        unsafe {
            let mut value = arg.read(at);
            op.mutate2(a, &mut value);
            arg.write(at, value);
        }
        Ok(())
    })
}

/// `arg[i] = op.mutate1(arg[i], other[i])` on the calling thread.
pub fn inplace1<A: Element, B: Element>(
    op:    &mut dyn BinaryInplaceOp<A, B>,
    arg:   &mut Tensor<A>,
    other: Source<'_, B>,
) -> Result<(), OpError> {
    let shared = arg.shared();
    let layout = Layout::new([arg_position(&shared), (other.view(), other.iteration_order())])?;
    let whole = Chunk::whole(layout.total);
    // SAFETY: single writer
    unsafe { first_chunk(op, &layout, &shared, &other, whole) }
}

pub fn inplace1_parallel<A: Element, B: Element>(
    ctx:   &ThreadContext,
    op:    &dyn BinaryInplaceOp<A, B>,
    arg:   &mut Tensor<A>,
    other: Source<'_, B>,
) -> Result<(), OpError> {
    let shared = arg.shared();
    let layout = Layout::new([arg_position(&shared), (other.view(), other.iteration_order())])?;
    ctx.chunk_default(layout.total, |chunk| {
        let mut local = op.independent_instance();
        // SAFETY: chunks are disjoint and distinct primary indices address
        // distinct elements of `arg`
        unsafe { first_chunk(local.as_mut(), &layout, &shared, &other, chunk) }
    })
}

/// `arg[i] = op.mutate2(other[i], arg[i])` on the calling thread.
pub fn inplace2<A: Element, B: Element>(
    op:    &mut dyn BinaryInplaceOp<A, B>,
    other: Source<'_, A>,
    arg:   &mut Tensor<B>,
) -> Result<(), OpError> {
    let shared = arg.shared();
    let layout = Layout::new([(other.view(), other.iteration_order()), arg_position(&shared)])?;
    let whole = Chunk::whole(layout.total);
    // SAFETY: single writer
    unsafe { second_chunk(op, &layout, &other, &shared, whole) }
}

pub fn inplace2_parallel<A: Element, B: Element>(
    ctx:   &ThreadContext,
    op:    &dyn BinaryInplaceOp<A, B>,
    other: Source<'_, A>,
    arg:   &mut Tensor<B>,
) -> Result<(), OpError> {
    let shared = arg.shared();
    let layout = Layout::new([(other.view(), other.iteration_order()), arg_position(&shared)])?;
    ctx.chunk_default(layout.total, |chunk| {
        let mut local = op.independent_instance();
        // SAFETY: chunks are disjoint and distinct primary indices address
        // distinct elements of `arg`
        unsafe { second_chunk(local.as_mut(), &layout, &other, &shared, chunk) }
    })
}
