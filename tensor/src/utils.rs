use core_types::ViewDescriptor;

use crate::TensorError;

/// Element count of `view` as a native length.
pub fn native_len(view: &ViewDescriptor) -> Result<usize, TensorError> {
    let mut len = 1u64;
    for &d in view.dims() {
        len = len.checked_mul(d).ok_or(TensorError::TooLarge)?;
    }
    usize::try_from(len).map_err(|_| TensorError::TooLarge)
}

/// Split `len` elements into `planes` equally sized planes.
pub fn plane_len(len: usize, planes: usize) -> Result<usize, TensorError> {
    if planes == 0 || len % planes != 0 {
        return Err(TensorError::PlaneSplit { len, planes });
    }
    Ok(len / planes)
}

/// Elements per plane of planar storage: the extent of the two fastest
/// varying axes. Views of two or fewer dimensions form a single plane.
pub fn planar_plane_len(view: &ViewDescriptor) -> u64 {
    if view.ndim() <= 2 {
        return view.size();
    }
    let mut strides = view.strides().to_vec();
    strides.sort_unstable();
    strides[2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_len_simple() {
        let vd = ViewDescriptor::row_major(&[2, 3, 4]).unwrap();
        assert_eq!(native_len(&vd).unwrap(), 24);
        let scalar = ViewDescriptor::row_major(&[]).unwrap();
        assert_eq!(native_len(&scalar).unwrap(), 1);
        let empty = ViewDescriptor::row_major(&[4, 0]).unwrap();
        assert_eq!(native_len(&empty).unwrap(), 0);
    }

    #[test]
    fn test_plane_len() {
        assert_eq!(plane_len(12, 3).unwrap(), 4);
        assert!(plane_len(12, 5).is_err());
        assert!(plane_len(12, 0).is_err());
    }

    #[test]
    fn test_planar_plane_len() {
        let vd = ViewDescriptor::row_major(&[3, 2, 5]).unwrap();
        assert_eq!(planar_plane_len(&vd), 10);
        let cm = ViewDescriptor::column_major(&[5, 2, 3]).unwrap();
        assert_eq!(planar_plane_len(&cm), 10);
        let flat = ViewDescriptor::row_major(&[4, 4]).unwrap();
        assert_eq!(planar_plane_len(&flat), 16);
    }
}
