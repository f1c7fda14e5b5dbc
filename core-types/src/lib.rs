use bytemuck::{Pod, Zeroable};
use std::fmt;

include!(concat!(env!("OUT_DIR"), "/generated_data_types.rs"));

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maximum number of dimensions for a view descriptor
pub const MAX_DIMS: usize = 8; // (B, C, H, W, D, T) + 2 should be enough

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    #[error("{found} dimensions requested, at most {max} are supported", max = MAX_DIMS)]
    TooManyDims { found: usize },
    #[error("axis order {order:?} is not a permutation of 0..{ndim}")]
    BadAxisOrder { order: Vec<usize>, ndim: usize },
}

/// Descriptor for a view into element storage.
///
/// `strides` map coordinates to the position in storage. Traversing storage
/// front to back is the view's iteration order. Only the checked constructors
/// build one; a descriptor cast from raw bytes is clamped to `MAX_DIMS`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq, Eq, Hash)]
pub struct ViewDescriptor {
    ndim:    u64,
    shape:   [u64; MAX_DIMS],
    strides: [u64; MAX_DIMS],
}

impl ViewDescriptor {
    /// Last axis varies fastest.
    pub fn row_major(shape: &[usize]) -> Result<Self, ViewError> {
        let order: Vec<usize> = (0..shape.len()).collect();
        Self::with_axis_order(shape, &order)
    }

    /// First axis varies fastest.
    pub fn column_major(shape: &[usize]) -> Result<Self, ViewError> {
        let order: Vec<usize> = (0..shape.len()).rev().collect();
        Self::with_axis_order(shape, &order)
    }

    /// Dense view whose axes are laid out from slowest (`order[0]`) to
    /// fastest (`order[ndim - 1]`).
    pub fn with_axis_order(shape: &[usize], order: &[usize]) -> Result<Self, ViewError> {
        if shape.len() > MAX_DIMS {
            return Err(ViewError::TooManyDims { found: shape.len() });
        }
        let mut seen = [false; MAX_DIMS];
        let is_permutation = order.len() == shape.len()
            && order.iter().all(|&axis| {
                axis < shape.len() && !std::mem::replace(&mut seen[axis], true)
            });
        if !is_permutation {
            return Err(ViewError::BadAxisOrder { order: order.to_vec(), ndim: shape.len() });
        }

        let mut vd = ViewDescriptor::zeroed();
        vd.ndim = shape.len() as u64;
        for (i, &d) in shape.iter().enumerate() {
            vd.shape[i] = d as u64;
        }
        let mut stride = 1u64;
        for &axis in order.iter().rev() {
            vd.strides[axis] = stride;
            stride *= vd.shape[axis];
        }
        Ok(vd)
    }

    pub fn ndim(&self) -> usize {
        self.ndim.min(MAX_DIMS as u64) as usize
    }

    pub fn dims(&self) -> &[u64] {
        &self.shape[..self.ndim()]
    }

    pub fn strides(&self) -> &[u64] {
        &self.strides[..self.ndim()]
    }

    /// Number of elements; a zero-dimensional view holds one.
    pub fn size(&self) -> u64 {
        self.dims().iter().product()
    }

    pub fn same_dims(&self, other: &ViewDescriptor) -> bool {
        self.dims() == other.dims()
    }

    /// Coordinates of the `linear`-th element in iteration order.
    pub fn coords_of(&self, linear: u64, coords: &mut [u64]) {
        for (d, c) in coords.iter_mut().enumerate().take(self.ndim()) {
            let extent = self.shape[d];
            *c = if extent == 0 { 0 } else { (linear / self.strides[d]) % extent };
        }
    }

    /// Position in iteration order of the element at `coords`.
    pub fn linear_of(&self, coords: &[u64]) -> u64 {
        coords.iter().zip(self.strides()).map(|(c, s)| c * s).sum()
    }

    pub fn iteration_order(&self) -> IterationOrder {
        IterationOrder { view: *self }
    }
}

/// Traversal sequence of a cursor-based source. Two sources visit logically
/// corresponding elements in the same sequence iff their orders are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IterationOrder {
    view: ViewDescriptor,
}

impl IterationOrder {
    pub fn view(&self) -> &ViewDescriptor {
        &self.view
    }
}

/// How elements are physically backed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageLayout {
    /// One contiguous buffer.
    Array,
    /// Several equally sized buffers, one per plane.
    Planar,
}

impl fmt::Display for StorageLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLayout::Array => f.write_str("array"),
            StorageLayout::Planar => f.write_str("planar"),
        }
    }
}

/// Element representation of a runtime value: what a candidate's
/// conformance predicate inspects instead of the value itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ElementDescriptor {
    pub dtype:  DataType,
    pub layout: StorageLayout,
}

impl ElementDescriptor {
    pub fn is(&self, dtype: DataType, layout: StorageLayout) -> bool {
        self.dtype == dtype && self.layout == layout
    }
}

/// Structural descriptor of an N-dimensional value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub element: ElementDescriptor,
    pub view:    ViewDescriptor,
}

impl TensorType {
    pub fn new(dtype: DataType, layout: StorageLayout, view: ViewDescriptor) -> Self {
        Self { element: ElementDescriptor { dtype, layout }, view }
    }

    /// Row-major array-backed type, the common case.
    pub fn array(dtype: DataType, shape: &[usize]) -> Result<Self, ViewError> {
        Ok(Self::new(dtype, StorageLayout::Array, ViewDescriptor::row_major(shape)?))
    }

    pub fn dtype(&self) -> DataType {
        self.element.dtype
    }

    pub fn layout(&self) -> StorageLayout {
        self.element.layout
    }

    pub fn dims(&self) -> &[u64] {
        self.view.dims()
    }

    pub fn size(&self) -> u64 {
        self.view.size()
    }

    pub fn iteration_order(&self) -> IterationOrder {
        self.view.iteration_order()
    }

    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.element.dtype = dtype;
        self
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.dtype())?;
        for (i, d) in self.dims().iter().enumerate() {
            if i > 0 {
                f.write_str("x")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "] {}", self.layout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_and_column_major_strides() {
        let rm = ViewDescriptor::row_major(&[2, 3, 4]).unwrap();
        assert_eq!(rm.strides(), &[12, 4, 1]);
        let cm = ViewDescriptor::column_major(&[2, 3, 4]).unwrap();
        assert_eq!(cm.strides(), &[1, 2, 6]);
        assert_eq!(rm.size(), 24);
        assert!(rm.same_dims(&cm));
        assert_ne!(rm.iteration_order(), cm.iteration_order());
    }

    #[test]
    fn coords_round_trip_through_linear_index() {
        let cm = ViewDescriptor::column_major(&[3, 2]).unwrap();
        let mut coords = [0u64; 2];
        cm.coords_of(1, &mut coords);
        assert_eq!(coords, [1, 0]);
        cm.coords_of(4, &mut coords);
        assert_eq!(coords, [1, 1]);
        assert_eq!(cm.linear_of(&coords), 4);
    }

    #[test]
    fn rejects_bad_views() {
        assert!(matches!(
            ViewDescriptor::row_major(&[1; MAX_DIMS + 1]),
            Err(ViewError::TooManyDims { found: 9 })
        ));
        assert!(ViewDescriptor::with_axis_order(&[2, 2], &[0, 0]).is_err());
    }

    #[test]
    fn descriptor_from_raw_bytes_stays_in_bounds() {
        let mut words = [0u64; 1 + 2 * MAX_DIMS];
        words[0] = 1_000;
        words[1..=MAX_DIMS].fill(2);
        let vd: ViewDescriptor = bytemuck::cast(words);
        assert_eq!(vd.ndim(), MAX_DIMS);
        assert_eq!(vd.dims(), &[2; MAX_DIMS]);
        assert_eq!(ViewDescriptor::row_major(&[3, 4]).unwrap().ndim(), 2);
    }

    #[test]
    fn element_arithmetic_wraps_for_integers() {
        assert_eq!(Element::add(127i8, 1), -128);
        assert_eq!(Element::div(7u16, 0), 0);
        assert_eq!(Element::div(7.0f64, 2.0), 3.5);
        assert_eq!(<u8 as Element>::from_f64(300.0), 255);
        assert_eq!(i32::DTYPE, DataType::I32);
        assert_eq!(DataType::F32.size_in_bytes(), 4);
        assert!(DataType::F64.is_float() && !DataType::U8.is_signed());
    }

    #[test]
    fn tensor_type_display() {
        let ty = TensorType::array(DataType::I8, &[2, 3]).unwrap();
        assert_eq!(ty.to_string(), "i8[2x3] array");
        assert_eq!(ty.with_dtype(DataType::F64).dtype(), DataType::F64);
    }
}
