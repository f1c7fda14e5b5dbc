//! Element-wise map over one or two N-d sources.
//!
//! A position (input, second input, output) is either iterable, with a cursor
//! in its own iteration order, or random-access. The first iterable position
//! drives the domain; every other position is reached by cursor when its
//! iteration order equals the primary's and by coordinates otherwise.

mod computer;
mod inplace;

pub use computer::{binary, binary_parallel, unary, unary_parallel};
pub use inplace::{inplace, inplace1, inplace1_parallel, inplace2, inplace2_parallel, inplace_parallel};

use core_types::{Element, IterationOrder, ViewDescriptor, MAX_DIMS};
use ndops_core::ChunkError;
use tensor::{Iterable, PermutedView, RandomAccessible, Tensor};

use crate::types::OpError;

/// Read side of a map position.
#[derive(Clone, Copy)]
pub enum Source<'a, T: Element> {
    Iterable(&'a dyn Iterable<T>),
    RandomAccess(&'a dyn RandomAccessible<T>),
}

impl<'a, T: Element> Source<'a, T> {
    /// Address `tensor` by coordinates even though it could iterate.
    pub fn random_access(tensor: &'a Tensor<T>) -> Self {
        Source::RandomAccess(tensor)
    }

    pub fn view(&self) -> &ViewDescriptor {
        match self {
            Source::Iterable(s) => s.view(),
            Source::RandomAccess(s) => s.view(),
        }
    }

    /// `None` for random-access sources.
    pub fn iteration_order(&self) -> Option<IterationOrder> {
        match self {
            Source::Iterable(s) => Some(s.iteration_order()),
            Source::RandomAccess(_) => None,
        }
    }

    fn fetch(&self, fetch: Fetch, index: usize, coords: &[u64]) -> T {
        match (self, fetch) {
            (Source::Iterable(s), Fetch::Cursor) => s.get_linear(index),
            (Source::Iterable(s), Fetch::Coords) => s.get_at(coords),
            (Source::RandomAccess(s), _) => s.get_at(coords),
        }
    }
}

impl<'a, T: Element> From<&'a Tensor<T>> for Source<'a, T> {
    fn from(tensor: &'a Tensor<T>) -> Self {
        Source::Iterable(tensor)
    }
}

impl<'a, 'b: 'a, T: Element> From<&'a PermutedView<'b, T>> for Source<'a, T> {
    fn from(view: &'a PermutedView<'b, T>) -> Self {
        Source::RandomAccess(view)
    }
}

/// True iff every iterable position reports the same iteration order;
/// `None` marks a random-access position.
pub fn compatible(orders: &[Option<IterationOrder>]) -> bool {
    let mut iterable = orders.iter().flatten();
    match iterable.next() {
        Some(first) => iterable.all(|order| order == first),
        None => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fetch {
    Cursor,
    Coords,
}

/// Access plan for `N` positions over one shared domain.
#[derive(Debug)]
struct Layout<const N: usize> {
    primary: ViewDescriptor,
    fetch:   [Fetch; N],
    total:   u64,
}

impl<const N: usize> Layout<N> {
    fn new(positions: [(&ViewDescriptor, Option<IterationOrder>); N]) -> Result<Self, OpError> {
        let Some((first, _)) = positions.first().copied() else {
            return Err(OpError::IllegalState("map over no positions".into()));
        };
        if let Some((view, _)) = positions.iter().find(|(view, _)| !view.same_dims(first)) {
            return Err(OpError::ShapeMismatch { expected: first.dims().to_vec(), found: view.dims().to_vec() });
        }
        let primary = positions
            .iter()
            .find_map(|(_, order)| *order)
            .ok_or_else(|| OpError::IllegalState("map needs at least one iterable position".into()))?;
        let fetch = positions.map(|(_, order)| if order == Some(primary) { Fetch::Cursor } else { Fetch::Coords });
        Ok(Self { primary: *primary.view(), fetch, total: first.size() })
    }

    /// Storage index for `position` at primary index `index`.
    fn slot(&self, position: usize, view: &ViewDescriptor, index: usize, coords: &[u64]) -> Result<usize, OpError> {
        match self.fetch[position] {
            Fetch::Cursor => Ok(index),
            Fetch::Coords => to_index(view.linear_of(coords)),
        }
    }
}

/// Narrow a storage position to `usize`.
fn to_index(linear: u64) -> Result<usize, OpError> {
    usize::try_from(linear).map_err(|_| {
        OpError::Overflow(ChunkError::Overflow { value: linear, target: std::any::type_name::<usize>() })
    })
}

/// Walk `count` primary indices from `start` by `step`, handing each index
/// and its coordinates (when some position needs them) to `body`.
fn drive<const N: usize>(
    layout: &Layout<N>,
    start:  usize,
    step:   usize,
    count:  usize,
    mut body: impl FnMut(usize, &[u64]) -> Result<(), OpError>,
) -> Result<(), OpError> {
    let ndim = layout.primary.ndim();
    let with_coords = layout.fetch.contains(&Fetch::Coords);
    let mut coords = [0u64; MAX_DIMS];
    for k in 0..count {
        let index = start + k * step;
        if with_coords {
            layout.primary.coords_of(index as u64, &mut coords[..ndim]);
        }
        body(index, &coords[..ndim])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{BinaryComputerOp, BinaryInplaceOp, UnaryComputerOp, UnaryInplaceOp};
    use ndops_core::{EngineConfig, ThreadContext};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn context(threads: usize) -> ThreadContext {
        ThreadContext::new(&EngineConfig::default().with_threads(threads).with_parallel_threshold(0)).unwrap()
    }

    #[derive(Clone)]
    struct AddConst(i64);

    impl UnaryComputerOp<i64, i64> for AddConst {
        fn compute(&mut self, input: i64) -> i64 {
            input + self.0
        }

        fn independent_instance(&self) -> Box<dyn UnaryComputerOp<i64, i64>> {
            Box::new(self.clone())
        }
    }

    impl UnaryInplaceOp<i64> for AddConst {
        fn mutate(&mut self, arg: &mut i64) {
            *arg += self.0;
        }

        fn independent_instance(&self) -> Box<dyn UnaryInplaceOp<i64>> {
            Box::new(self.clone())
        }
    }

    /// Works through scratch state; every independent instance gets its own
    /// buffer.
    struct Stateful {
        c:       i64,
        scratch: Vec<i64>,
    }

    impl UnaryComputerOp<i64, i64> for Stateful {
        fn compute(&mut self, input: i64) -> i64 {
            self.scratch.clear();
            self.scratch.extend([input, self.c]);
            self.scratch.iter().sum()
        }

        fn independent_instance(&self) -> Box<dyn UnaryComputerOp<i64, i64>> {
            Box::new(Stateful { c: self.c, scratch: Vec::with_capacity(2) })
        }
    }

    #[derive(Clone, Copy)]
    struct Minus;

    impl BinaryComputerOp<i32, i32, i32> for Minus {
        fn compute(&mut self, a: i32, b: i32) -> i32 {
            a - b
        }

        fn independent_instance(&self) -> Box<dyn BinaryComputerOp<i32, i32, i32>> {
            Box::new(*self)
        }
    }

    impl BinaryInplaceOp<i32, i32> for Minus {
        fn mutate1(&mut self, arg: &mut i32, other: i32) {
            *arg -= other;
        }

        fn mutate2(&mut self, other: i32, arg: &mut i32) {
            *arg = other - *arg;
        }

        fn independent_instance(&self) -> Box<dyn BinaryInplaceOp<i32, i32>> {
            Box::new(*self)
        }
    }

    #[test]
    fn add_five_sequential_and_parallel() {
        let input = Tensor::from_vec(vec![1i64, 2, 3], &[3]).unwrap();
        let mut seq = Tensor::zeros(&[3]).unwrap();
        unary(&mut AddConst(5), Source::from(&input), &mut seq).unwrap();
        assert_eq!(seq.to_vec(), vec![6, 7, 8]);

        let mut par = Tensor::zeros(&[3]).unwrap();
        unary_parallel(&context(8), &AddConst(5), Source::from(&input), &mut par).unwrap();
        assert_eq!(par, seq);
    }

    #[test]
    fn stateful_op_in_parallel_matches_sequential() {
        let mut rng = StdRng::seed_from_u64(7);
        let data: Vec<i64> = (0..10_000).map(|_| rng.random_range(-1000..1000)).collect();
        let input = Tensor::from_vec(data, &[100, 100]).unwrap();

        let mut seq = Tensor::zeros(&[100, 100]).unwrap();
        unary(&mut Stateful { c: 3, scratch: Vec::new() }, Source::from(&input), &mut seq).unwrap();

        let ctx = context(8);
        for _ in 0..20 {
            let mut par = Tensor::zeros(&[100, 100]).unwrap();
            unary_parallel(&ctx, &Stateful { c: 3, scratch: Vec::new() }, Source::from(&input), &mut par).unwrap();
            assert_eq!(par, seq);
        }
    }

    #[test]
    fn mismatched_orders_fall_back_to_coordinates() {
        let input = Tensor::from_vec_column_major((1..=6i64).collect(), &[2, 3]).unwrap();
        let mut out = Tensor::zeros(&[2, 3]).unwrap();
        assert!(!compatible(&[Some(input.iteration_order()), Some(out.iteration_order())]));

        unary_parallel(&context(3), &AddConst(0), Source::from(&input), &mut out).unwrap();
        for i in 0..2 {
            for j in 0..3 {
                assert_eq!(out.get_at(&[i, j]), input.get_at(&[i, j]));
            }
        }
        assert_eq!(out.to_vec(), vec![1, 3, 5, 2, 4, 6]);
    }

    #[test]
    fn random_access_source_drives_from_the_output() {
        let t = Tensor::from_vec(vec![1i64, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
        let tr = PermutedView::transpose(&t).unwrap();
        let mut out = Tensor::zeros(&[3, 2]).unwrap();
        unary(&mut AddConst(10), Source::from(&tr), &mut out).unwrap();
        assert_eq!(out.to_vec(), vec![11, 14, 12, 15, 13, 16]);
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let input = Tensor::from_vec(vec![1i64, 2, 3], &[3]).unwrap();
        let mut out = Tensor::zeros(&[4]).unwrap();
        let err = unary(&mut AddConst(1), Source::from(&input), &mut out).unwrap_err();
        assert!(matches!(err, OpError::ShapeMismatch { ref expected, ref found } if expected == &[3] && found == &[4]));
        assert_eq!(out.to_vec(), vec![0; 4]);
    }

    #[test]
    fn binary_with_random_access_second_input() {
        let a = Tensor::from_vec((0..12i32).collect(), &[3, 4]).unwrap();
        let b = Tensor::from_vec_column_major((0..12i32).map(|v| v * 2).collect(), &[3, 4]).unwrap();
        let mut seq = Tensor::zeros(&[3, 4]).unwrap();
        binary(&mut Minus, Source::from(&a), Source::random_access(&b), &mut seq).unwrap();

        let mut par = Tensor::zeros(&[3, 4]).unwrap();
        binary_parallel(&context(4), &Minus, Source::from(&a), Source::from(&b), &mut par).unwrap();
        assert_eq!(par, seq);
        for i in 0..3 {
            for j in 0..4 {
                assert_eq!(seq.get_at(&[i, j]), a.get_at(&[i, j]) - b.get_at(&[i, j]));
            }
        }
    }

    #[test]
    fn inplace_variants() {
        let ctx = context(2);
        let mut t = Tensor::from_vec(vec![1i64, 2, 3, 4], &[4]).unwrap();
        inplace(&mut AddConst(1), &mut t).unwrap();
        inplace_parallel(&ctx, &AddConst(1), &mut t).unwrap();
        assert_eq!(t.to_vec(), vec![3, 4, 5, 6]);

        let other = Tensor::from_vec(vec![1i32, 1, 1, 1], &[2, 2]).unwrap();
        let mut first = Tensor::from_vec(vec![5i32, 6, 7, 8], &[2, 2]).unwrap();
        inplace1(&mut Minus, &mut first, Source::from(&other)).unwrap();
        assert_eq!(first.to_vec(), vec![4, 5, 6, 7]);
        inplace1_parallel(&ctx, &Minus, &mut first, Source::from(&other)).unwrap();
        assert_eq!(first.to_vec(), vec![3, 4, 5, 6]);

        let mut second = Tensor::from_vec(vec![1i32, 2, 3, 4], &[2, 2]).unwrap();
        inplace2(&mut Minus, Source::from(&first), &mut second).unwrap();
        assert_eq!(second.to_vec(), vec![2, 2, 2, 2]);
        inplace2_parallel(&ctx, &Minus, Source::from(&first), &mut second).unwrap();
        assert_eq!(second.to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn storage_positions_beyond_usize_are_errors() {
        let big = u64::from(u32::MAX) + 1;
        if cfg!(target_pointer_width = "64") {
            assert_eq!(to_index(big).ok(), Some(big as usize));
        } else {
            assert!(matches!(to_index(big), Err(OpError::Overflow(ChunkError::Overflow { value, .. })) if value == big));
        }
        assert_eq!(to_index(7).ok(), Some(7));
    }

    #[test]
    fn compatibility_ignores_random_access() {
        let rm = Tensor::<u8>::zeros(&[2, 2]).unwrap();
        let cm = Tensor::<u8>::from_vec_column_major(vec![0; 4], &[2, 2]).unwrap();
        assert!(compatible(&[Some(rm.iteration_order()), None, Some(rm.iteration_order())]));
        assert!(!compatible(&[Some(rm.iteration_order()), Some(cm.iteration_order())]));
        assert!(compatible(&[None, None]));
    }
}
