mod access;
mod shared;
mod utils;

use core_types::{
    Element, ElementDescriptor, IterationOrder, StorageLayout, TensorType, ViewDescriptor, ViewError,
};
use utils::{native_len, plane_len, planar_plane_len};

pub use access::{Iterable, PermutedView, RandomAccessible};
pub use shared::SharedTensor;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TensorError {
    #[error(transparent)]
    View(#[from] ViewError),
    #[error("{found} elements supplied for a tensor of {expected}")]
    DataLength { expected: usize, found: usize },
    #[error("{len} elements cannot be split into {planes} equal planes")]
    PlaneSplit { len: usize, planes: usize },
    #[error("tensor of {expected} cannot hold {found} elements")]
    DtypeMismatch { expected: core_types::DataType, found: core_types::DataType },
    #[error("tensor does not fit in addressable memory")]
    TooLarge,
}

/// Element storage backing a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage<T> {
    Array(Vec<T>),
    Planar { planes: Vec<Vec<T>>, plane_len: usize },
}

/// Dense N-dimensional tensor: a view descriptor over array or planar storage.
///
/// Storage is traversed front to back in the view's iteration order, so the
/// linear index of an element is its position in that traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T: Element> {
    view:    ViewDescriptor,
    storage: Storage<T>,
}

impl<T: Element> Tensor<T> {
    /* --------------------------------------------------------------------- */
    /* Constructors                                                          */
    /* --------------------------------------------------------------------- */

    /// Row-major, array-backed tensor of zeros.
    pub fn zeros(shape: &[usize]) -> Result<Self, TensorError> {
        let view = ViewDescriptor::row_major(shape)?;
        let len = native_len(&view)?;
        Ok(Self { view, storage: Storage::Array(vec![T::default(); len]) })
    }

    /// Row-major, array-backed tensor over `data`.
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self, TensorError> {
        Self::from_vec_with_view(data, ViewDescriptor::row_major(shape)?)
    }

    /// Column-major, array-backed tensor over `data`.
    pub fn from_vec_column_major(data: Vec<T>, shape: &[usize]) -> Result<Self, TensorError> {
        Self::from_vec_with_view(data, ViewDescriptor::column_major(shape)?)
    }

    fn from_vec_with_view(data: Vec<T>, view: ViewDescriptor) -> Result<Self, TensorError> {
        let expected = native_len(&view)?;
        if data.len() != expected {
            return Err(TensorError::DataLength { expected, found: data.len() });
        }
        Ok(Self { view, storage: Storage::Array(data) })
    }

    /// Row-major, planar tensor; every plane holds the two fastest axes.
    pub fn from_planes(planes: Vec<Vec<T>>, shape: &[usize]) -> Result<Self, TensorError> {
        let view = ViewDescriptor::row_major(shape)?;
        let expected = native_len(&view)?;
        let found: usize = planes.iter().map(Vec::len).sum();
        if found != expected {
            return Err(TensorError::DataLength { expected, found });
        }
        let per_plane = if expected == 0 { 0 } else { plane_len(expected, planes.len())? };
        if planes.iter().any(|p| p.len() != per_plane)
            || (expected > 0 && per_plane as u64 != planar_plane_len(&view))
        {
            return Err(TensorError::PlaneSplit { len: expected, planes: planes.len() });
        }
        Ok(Self { view, storage: Storage::Planar { planes, plane_len: per_plane } })
    }

    /// Zeroed tensor with the layout and view described by `ty`.
    pub fn zeros_like(ty: &TensorType) -> Result<Self, TensorError> {
        if ty.dtype() != T::DTYPE {
            return Err(TensorError::DtypeMismatch { expected: T::DTYPE, found: ty.dtype() });
        }
        let view = ty.view;
        let len = native_len(&view)?;
        let storage = match ty.layout() {
            StorageLayout::Array => Storage::Array(vec![T::default(); len]),
            StorageLayout::Planar if len == 0 => Storage::Planar { planes: Vec::new(), plane_len: 0 },
            StorageLayout::Planar => {
                let per_plane = usize::try_from(planar_plane_len(&view)).map_err(|_| TensorError::TooLarge)?;
                let planes = vec![vec![T::default(); per_plane]; len / per_plane];
                Storage::Planar { planes, plane_len: per_plane }
            }
        };
        Ok(Self { view, storage })
    }

    /* --------------------------------------------------------------------- */
    /* Accessors                                                             */
    /* --------------------------------------------------------------------- */

    /// The view descriptor (shape, strides)
    pub fn view(&self) -> &ViewDescriptor {
        &self.view
    }

    pub fn dims(&self) -> &[u64] {
        self.view.dims()
    }

    /// Number of elements
    pub fn size(&self) -> u64 {
        self.view.size()
    }

    pub fn layout(&self) -> StorageLayout {
        match self.storage {
            Storage::Array(_) => StorageLayout::Array,
            Storage::Planar { .. } => StorageLayout::Planar,
        }
    }

    pub fn element(&self) -> ElementDescriptor {
        ElementDescriptor { dtype: T::DTYPE, layout: self.layout() }
    }

    /// Structural descriptor of this tensor.
    pub fn tensor_type(&self) -> TensorType {
        TensorType { element: self.element(), view: self.view }
    }

    pub fn iteration_order(&self) -> IterationOrder {
        self.view.iteration_order()
    }

    pub fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    /// The flat buffer, for array-backed tensors.
    pub fn as_slice(&self) -> Option<&[T]> {
        match &self.storage {
            Storage::Array(data) => Some(data),
            Storage::Planar { .. } => None,
        }
    }

    pub fn as_mut_slice(&mut self) -> Option<&mut [T]> {
        match &mut self.storage {
            Storage::Array(data) => Some(data),
            Storage::Planar { .. } => None,
        }
    }

    /// Raw bytes of an array-backed tensor.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.as_slice().map(bytemuck::cast_slice)
    }

    /* --------------------------------------------------------------------- */
    /* Element access                                                        */
    /* --------------------------------------------------------------------- */

    /// Element at position `index` of the iteration order.
    pub fn get_linear(&self, index: usize) -> T {
        match &self.storage {
            Storage::Array(data) => data[index],
            Storage::Planar { planes, plane_len } => planes[index / plane_len][index % plane_len],
        }
    }

    pub fn set_linear(&mut self, index: usize, value: T) {
        match &mut self.storage {
            Storage::Array(data) => data[index] = value,
            Storage::Planar { planes, plane_len } => planes[index / *plane_len][index % *plane_len] = value,
        }
    }

    pub fn get_at(&self, coords: &[u64]) -> T {
        self.get_linear(self.index_of(coords))
    }

    pub fn set_at(&mut self, coords: &[u64], value: T) {
        let index = self.index_of(coords);
        self.set_linear(index, value);
    }

    /// Storage position of `coords`. Positions past `usize::MAX` saturate, so
    /// they fail the bounds check instead of aliasing another element.
    fn index_of(&self, coords: &[u64]) -> usize {
        usize::try_from(self.view.linear_of(coords)).unwrap_or(usize::MAX)
    }

    /// Overwrite every element with `value`, keeping storage and view.
    pub fn fill(&mut self, value: T) {
        match &mut self.storage {
            Storage::Array(data) => data.fill(value),
            Storage::Planar { planes, .. } => planes.iter_mut().for_each(|p| p.fill(value)),
        }
    }

    /// Elements in iteration order.
    pub fn to_vec(&self) -> Vec<T> {
        match &self.storage {
            Storage::Array(data) => data.clone(),
            Storage::Planar { planes, .. } => planes.concat(),
        }
    }

    /// Writer handle for disjoint concurrent writes; see [`SharedTensor`].
    pub fn shared(&mut self) -> SharedTensor<'_, T> {
        SharedTensor::new(self.view, &mut self.storage)
    }
}

/* ------------------------------------------------------------------------- */
/*                                     Tests                                 */
/* ------------------------------------------------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;
    use core_types::DataType;

    #[test]
    fn test_zeros_dtype_and_view() {
        let shape = [2, 3, 4];
        let t: Tensor<f32> = Tensor::zeros(&shape).unwrap();

        assert_eq!(t.element().dtype, DataType::F32);
        assert_eq!(t.layout(), StorageLayout::Array);

        assert_eq!(t.view().ndim(), shape.len());
        assert_eq!(t.view().dims(), &[2, 3, 4]);
        assert_eq!(t.view().strides(), &[12, 4, 1]);
        assert_eq!(t.to_vec(), vec![0.0; 24]);
    }

    #[test]
    fn test_from_vec_checks_length() {
        let err = Tensor::from_vec(vec![1u8, 2, 3], &[2, 2]).unwrap_err();
        assert_eq!(err, TensorError::DataLength { expected: 4, found: 3 });
    }

    #[test]
    fn test_column_major_coordinates() {
        // storage order: (0,0) (1,0) (0,1) (1,1)
        let t = Tensor::from_vec_column_major(vec![1i32, 2, 3, 4], &[2, 2]).unwrap();
        assert_eq!(t.get_at(&[1, 0]), 2);
        assert_eq!(t.get_at(&[0, 1]), 3);
        let rm = Tensor::from_vec(vec![1i32, 2, 3, 4], &[2, 2]).unwrap();
        assert_ne!(t.iteration_order(), rm.iteration_order());
    }

    #[test]
    fn test_planar_access() {
        let mut t = Tensor::from_planes(vec![vec![1u16, 2, 3, 4], vec![5, 6, 7, 8]], &[2, 2, 2]).unwrap();
        assert_eq!(t.layout(), StorageLayout::Planar);
        assert_eq!(t.get_linear(5), 6);
        assert_eq!(t.get_at(&[1, 0, 1]), 6);
        t.set_at(&[0, 1, 1], 40);
        assert_eq!(t.to_vec(), vec![1, 2, 3, 40, 5, 6, 7, 8]);
        assert!(t.as_slice().is_none());

        assert!(Tensor::from_planes(vec![vec![1u16, 2], vec![3, 4, 5, 6]], &[2, 3]).is_err());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_coordinates_past_the_end_panic() {
        let t = Tensor::from_vec(vec![1u8, 2, 3, 4], &[2, 2]).unwrap();
        t.get_at(&[5, 0]);
    }

    #[test]
    fn test_fill_keeps_layout() {
        let mut t = Tensor::from_planes(vec![vec![1i32; 4], vec![2; 4]], &[2, 2, 2]).unwrap();
        let ty = t.tensor_type();
        t.fill(0);
        assert_eq!(t.tensor_type(), ty);
        assert_eq!(t.to_vec(), vec![0; 8]);
    }

    #[test]
    fn test_zeros_like_keeps_layout() {
        let planar = Tensor::from_planes(vec![vec![1.0f64; 6], vec![2.0; 6]], &[2, 2, 3]).unwrap();
        let copy = Tensor::<f64>::zeros_like(&planar.tensor_type()).unwrap();
        assert_eq!(copy.tensor_type(), planar.tensor_type());
        assert_eq!(copy.to_vec(), vec![0.0; 12]);

        let err = Tensor::<i8>::zeros_like(&planar.tensor_type()).unwrap_err();
        assert_eq!(err, TensorError::DtypeMismatch { expected: DataType::I8, found: DataType::F64 });
    }

    #[test]
    fn test_as_bytes() {
        let t = Tensor::from_vec(vec![1u16, 2], &[2]).unwrap();
        assert_eq!(t.as_bytes().map(<[u8]>::len), Some(4));
    }
}
