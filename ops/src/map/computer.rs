use core_types::Element;
use ndops_core::{Chunk, ThreadContext};
use tensor::{SharedTensor, Tensor};

use super::{drive, Layout, Source};
use crate::element::{BinaryComputerOp, UnaryComputerOp};
use crate::types::OpError;

fn unary_layout<I: Element, O: Element>(input: &Source<'_, I>, out: &SharedTensor<'_, O>) -> Result<Layout<2>, OpError> {
    Layout::new([
        (input.view(), input.iteration_order()),
        (out.view(), Some(out.view().iteration_order())),
    ])
}

/// # Safety
/// No other thread may access the output elements addressed by `chunk`.
unsafe fn unary_chunk<I: Element, O: Element>(
    op:     &mut dyn UnaryComputerOp<I, O>,
    layout: &Layout<2>,
    input:  &Source<'_, I>,
    out:    &SharedTensor<'_, O>,
    chunk:  Chunk,
) -> Result<(), OpError> {
    let (start, step, count) = chunk.narrow::<usize>()?;
    drive(layout, start, step, count, |index, coords| {
        let value = op.compute(input.fetch(layout.fetch[0], index, coords));
        let at = layout.slot(1, out.view(), index, coords)?;
        // SAFETY: `at` lies in this chunk, exclusive per contract
        unsafe { out.write(at, value) };
        Ok(())
    })
}

/// `output[i] = op(input[i])` on the calling thread.
pub fn unary<I: Element, O: Element>(
    op:     &mut dyn UnaryComputerOp<I, O>,
    input:  Source<'_, I>,
    output: &mut Tensor<O>,
) -> Result<(), OpError> {
    let out = output.shared();
    let layout = unary_layout(&input, &out)?;
    // SAFETY: single writer
    unsafe { unary_chunk(op, &layout, &input, &out, Chunk::whole(layout.total)) }
}

/// [`unary`] over chunks; every chunk runs its own instance of `op`.
pub fn unary_parallel<I: Element, O: Element>(
    ctx:    &ThreadContext,
    op:     &dyn UnaryComputerOp<I, O>,
    input:  Source<'_, I>,
    output: &mut Tensor<O>,
) -> Result<(), OpError> {
    let out = output.shared();
    let layout = unary_layout(&input, &out)?;
    ctx.chunk_default(layout.total, |chunk| {
        let mut local = op.independent_instance();
        // SAFETY: chunks are disjoint and distinct primary indices address
        // distinct output elements
        unsafe { unary_chunk(local.as_mut(), &layout, &input, &out, chunk) }
    })
}

fn binary_layout<I1: Element, I2: Element, O: Element>(
    in1: &Source<'_, I1>,
    in2: &Source<'_, I2>,
    out: &SharedTensor<'_, O>,
) -> Result<Layout<3>, OpError> {
    Layout::new([
        (in1.view(), in1.iteration_order()),
        (in2.view(), in2.iteration_order()),
        (out.view(), Some(out.view().iteration_order())),
    ])
}

/// # Safety
/// No other thread may access the output elements addressed by `chunk`.
unsafe fn binary_chunk<I1: Element, I2: Element, O: Element>(
    op:     &mut dyn BinaryComputerOp<I1, I2, O>,
    layout: &Layout<3>,
    in1:    &Source<'_, I1>,
    in2:    &Source<'_, I2>,
    out:    &SharedTensor<'_, O>,
    chunk:  Chunk,
) -> Result<(), OpError> {
    let (start, step, count) = chunk.narrow::<usize>()?;
    drive(layout, start, step, count, |index, coords| {
        let a = in1.fetch(layout.fetch[0], index, coords);
        let b = in2.fetch(layout.fetch[1], index, coords);
        let at = layout.slot(2, out.view(), index, coords)?;
        // SAFETY: `at` lies in this chunk, exclusive per contract
        unsafe { out.write(at, op.compute(a, b)) };
        Ok(())
    })
}

/// `output[i] = op(in1[i], in2[i])` on the calling thread.
pub fn binary<I1: Element, I2: Element, O: Element>(
    op:     &mut dyn BinaryComputerOp<I1, I2, O>,
    in1:    Source<'_, I1>,
    in2:    Source<'_, I2>,
    output: &mut Tensor<O>,
) -> Result<(), OpError> {
    let out = output.shared();
    let layout = binary_layout(&in1, &in2, &out)?;
    // SAFETY: single writer
    unsafe { binary_chunk(op, &layout, &in1, &in2, &out, Chunk::whole(layout.total)) }
}

pub fn binary_parallel<I1: Element, I2: Element, O: Element>(
    ctx:    &ThreadContext,
    op:     &dyn BinaryComputerOp<I1, I2, O>,
    in1:    Source<'_, I1>,
    in2:    Source<'_, I2>,
    output: &mut Tensor<O>,
) -> Result<(), OpError> {
    let out = output.shared();
    let layout = binary_layout(&in1, &in2, &out)?;
    ctx.chunk_default(layout.total, |chunk| {
        let mut local = op.independent_instance();
        // SAFETY: chunks are disjoint and distinct primary indices address
        // distinct output elements
        unsafe { binary_chunk(local.as_mut(), &layout, &in1, &in2, &out, chunk) }
    })
}
