//! Per-element op contracts driven by the [`map`](crate::map) combinator.
//!
//! Each trait carries its own `independent_instance`, so the parallel map
//! variants can give every chunk a private copy of a stateful op.

use core_types::Element;

pub trait UnaryComputerOp<I: Element, O: Element>: Send + Sync {
    fn compute(&mut self, input: I) -> O;

    fn independent_instance(&self) -> Box<dyn UnaryComputerOp<I, O>>;
}

pub trait BinaryComputerOp<I1: Element, I2: Element, O: Element>: Send + Sync {
    fn compute(&mut self, a: I1, b: I2) -> O;

    fn independent_instance(&self) -> Box<dyn BinaryComputerOp<I1, I2, O>>;
}

pub trait UnaryInplaceOp<A: Element>: Send + Sync {
    fn mutate(&mut self, arg: &mut A);

    fn independent_instance(&self) -> Box<dyn UnaryInplaceOp<A>>;
}

/// Mutates either position of a pair.
pub trait BinaryInplaceOp<A: Element, B: Element>: Send + Sync {
    fn mutate1(&mut self, arg: &mut A, other: B);

    fn mutate2(&mut self, other: A, arg: &mut B);

    fn independent_instance(&self) -> Box<dyn BinaryInplaceOp<A, B>>;
}
