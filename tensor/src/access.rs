use core_types::{Element, IterationOrder, ViewDescriptor, ViewError, MAX_DIMS};

use crate::Tensor;

/// Coordinate-addressed source.
pub trait RandomAccessible<T: Element>: Sync {
    /// Logical shape. Strides are only meaningful for iterable sources.
    fn view(&self) -> &ViewDescriptor;

    fn get_at(&self, coords: &[u64]) -> T;

    fn dims(&self) -> &[u64] {
        self.view().dims()
    }
}

/// Source with a fast sequential cursor over its own iteration order.
pub trait Iterable<T: Element>: RandomAccessible<T> {
    fn iteration_order(&self) -> IterationOrder;

    /// Element at position `index` of the iteration order.
    fn get_linear(&self, index: usize) -> T;

    fn size(&self) -> u64 {
        self.view().size()
    }
}

impl<T: Element> RandomAccessible<T> for Tensor<T> {
    fn view(&self) -> &ViewDescriptor {
        Tensor::view(self)
    }

    fn get_at(&self, coords: &[u64]) -> T {
        Tensor::get_at(self, coords)
    }
}

impl<T: Element> Iterable<T> for Tensor<T> {
    fn iteration_order(&self) -> IterationOrder {
        Tensor::iteration_order(self)
    }

    fn get_linear(&self, index: usize) -> T {
        Tensor::get_linear(self, index)
    }
}

/// Axis permutation of a tensor, addressable by coordinates only.
///
/// Axis `d` of the view is axis `axes[d]` of the source.
pub struct PermutedView<'a, T: Element> {
    source: &'a Tensor<T>,
    axes:   [usize; MAX_DIMS],
    view:   ViewDescriptor,
}

impl<'a, T: Element> PermutedView<'a, T> {
    pub fn new(source: &'a Tensor<T>, axes: &[usize]) -> Result<Self, ViewError> {
        let src_dims = source.dims();
        if axes.len() != src_dims.len() {
            return Err(ViewError::BadAxisOrder { order: axes.to_vec(), ndim: src_dims.len() });
        }
        let shape: Vec<usize> = axes
            .iter()
            .map(|&a| src_dims.get(a).map(|&d| d as usize))
            .collect::<Option<_>>()
            .ok_or_else(|| ViewError::BadAxisOrder { order: axes.to_vec(), ndim: src_dims.len() })?;
        // validates the permutation as a side effect
        let view = ViewDescriptor::with_axis_order(&shape, axes)?;

        let mut fixed = [0usize; MAX_DIMS];
        fixed[..axes.len()].copy_from_slice(axes);
        Ok(Self { source, axes: fixed, view })
    }

    /// Transpose of a two-dimensional tensor.
    pub fn transpose(source: &'a Tensor<T>) -> Result<Self, ViewError> {
        Self::new(source, &[1, 0])
    }
}

impl<T: Element> RandomAccessible<T> for PermutedView<'_, T> {
    fn view(&self) -> &ViewDescriptor {
        &self.view
    }

    fn get_at(&self, coords: &[u64]) -> T {
        let ndim = self.view.ndim();
        let mut src = [0u64; MAX_DIMS];
        for d in 0..ndim {
            src[self.axes[d]] = coords[d];
        }
        self.source.get_at(&src[..ndim])
    }
}
