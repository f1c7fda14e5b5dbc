use std::marker::PhantomData;

use core_types::{Element, ViewDescriptor};

use crate::Storage;

#[derive(Clone, Copy)]
struct RawPlane<T> {
    ptr: *mut T,
    len: usize,
}

/// Shared handle to a mutably borrowed tensor, for workers that touch
/// pairwise disjoint index sets.
///
/// The handle holds the tensor's exclusive borrow for its whole lifetime, so
/// nothing outside the handle can observe the storage while it is alive.
pub struct SharedTensor<'a, T: Element> {
    view:      ViewDescriptor,
    planes:    Vec<RawPlane<T>>,
    plane_len: usize,
    _borrow:   PhantomData<&'a mut [T]>,
}

// SAFETY: the handle only hands out element reads and writes through its
// unsafe methods, whose callers guarantee no index is accessed by two threads
// at once. `T: Element` is `Send + Sync`.
unsafe impl<T: Element> Send for SharedTensor<'_, T> {}
unsafe impl<T: Element> Sync for SharedTensor<'_, T> {}

impl<'a, T: Element> SharedTensor<'a, T> {
    pub(crate) fn new(view: ViewDescriptor, storage: &'a mut Storage<T>) -> Self {
        match storage {
            Storage::Array(data) => {
                let len = data.len();
                Self {
                    view,
                    planes: vec![RawPlane { ptr: data.as_mut_ptr(), len }],
                    plane_len: len,
                    _borrow: PhantomData,
                }
            }
            Storage::Planar { planes, plane_len } => Self {
                view,
                planes: planes
                    .iter_mut()
                    .map(|p| RawPlane { ptr: p.as_mut_ptr(), len: p.len() })
                    .collect(),
                plane_len: *plane_len,
                _borrow: PhantomData,
            },
        }
    }

    pub fn view(&self) -> &ViewDescriptor {
        &self.view
    }

    pub fn size(&self) -> u64 {
        self.view.size()
    }

    fn locate(&self, index: usize) -> *mut T {
        let (plane, offset) = match self.planes.len() {
            1 => (0, index),
            _ => (index / self.plane_len, index % self.plane_len),
        };
        let raw = self.planes.get(plane).copied();
        match raw {
            // SAFETY: offset < len keeps the pointer inside the plane
            Some(p) if offset < p.len => unsafe { p.ptr.add(offset) },
            _ => panic!("index {index} out of bounds for tensor of {} elements", self.size()),
        }
    }

    /// Read the element at position `index` of the iteration order.
    ///
    /// # Safety
    /// No other thread may write `index` concurrently.
    pub unsafe fn read(&self, index: usize) -> T {
        // SAFETY: in bounds per `locate`, no concurrent writer per contract
        unsafe { self.locate(index).read() }
    }

    /// Write the element at position `index` of the iteration order.
    ///
    /// # Safety
    /// No other thread may read or write `index` concurrently.
    pub unsafe fn write(&self, index: usize, value: T) {
        // SAFETY: in bounds per `locate`, exclusive per contract
        unsafe { self.locate(index).write(value) }
    }
}

#[cfg(test)]
mod tests {
    use crate::Tensor;

    #[test]
    fn disjoint_writers_from_threads() {
        let mut t = Tensor::<u32>::zeros(&[4, 25]).unwrap();
        {
            let shared = t.shared();
            std::thread::scope(|s| {
                for worker in 0..4usize {
                    let shared = &shared;
                    s.spawn(move || {
                        for i in (worker..100).step_by(4) {
                            // SAFETY: residues mod 4 are disjoint
                            unsafe { shared.write(i, i as u32 * 2) };
                        }
                    });
                }
            });
        }
        assert_eq!(t.to_vec(), (0..100u32).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn planar_read_write() {
        let mut t = Tensor::from_planes(vec![vec![1i64, 2, 3, 4], vec![5, 6, 7, 8]], &[2, 2, 2]).unwrap();
        let shared = t.shared();
        // SAFETY: single thread
        unsafe {
            assert_eq!(shared.read(6), 7);
            shared.write(6, 70);
        }
        drop(shared);
        assert_eq!(t.get_linear(6), 70);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_bounds_panics() {
        let mut t = Tensor::<u8>::zeros(&[3]).unwrap();
        let shared = t.shared();
        // SAFETY: single thread
        unsafe { shared.write(3, 1) };
    }
}
