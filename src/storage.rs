//! Flat typed buffers shared between a tensor and its views.
//!
//! A [`Storage`] is a reference-counted slice of cells: cloning it shares the
//! buffer, and a write through any holder is visible to every other holder.
//! Kernels that fan out to worker threads never receive a `Storage`; they get
//! a raw base pointer plus a layout (see [`crate::kernel::RawView`]).

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::dtype::{DType, Element};
use crate::simd;

/// Reference-counted element buffer; clones share it.
#[derive(Clone)]
pub struct Storage<T> {
    data: Rc<[Cell<T>]>,
}

impl<T: Element> Storage<T> {
    pub fn from_vec(values: Vec<T>) -> Self {
        let data: Rc<[Cell<T>]> = values.into_iter().map(Cell::new).collect();
        Self { data }
    }

    pub fn full(len: usize, value: T) -> Self {
        Self::from_vec(vec![value; len])
    }

    pub fn zeros(len: usize) -> Self {
        Self::full(len, T::zero())
    }

    #[inline]
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Panics when `ptr` is outside the buffer.
    #[inline]
    pub fn get(&self, ptr: usize) -> T {
        self.data[ptr].get()
    }

    #[inline]
    pub fn set(&self, ptr: usize, value: T) {
        self.data[ptr].set(value)
    }

    #[inline]
    pub fn inc(&self, ptr: usize, value: T) {
        let cell = &self.data[ptr];
        cell.set(cell.get().add(value));
    }

    /// Read `out.len()` elements starting at `ptr`, `step` apart.
    pub fn get_lanes(&self, ptr: usize, step: isize, out: &mut [T]) {
        let mut p = ptr as isize;
        for v in out.iter_mut() {
            *v = self.data[p as usize].get();
            p += step;
        }
    }

    /// Read one element per lane at `ptr + index_map[lane]`.
    pub fn get_lanes_mapped(&self, ptr: usize, index_map: &[isize], out: &mut [T]) {
        for (v, &i) in out.iter_mut().zip(index_map) {
            *v = self.data[(ptr as isize + i) as usize].get();
        }
    }

    /// Write `values` starting at `ptr`, `step` apart.
    pub fn set_lanes(&self, ptr: usize, step: isize, values: &[T]) {
        let mut p = ptr as isize;
        for &v in values {
            self.data[p as usize].set(v);
            p += step;
        }
    }

    pub fn set_lanes_mapped(&self, ptr: usize, index_map: &[isize], values: &[T]) {
        for (&v, &i) in values.iter().zip(index_map) {
            self.data[(ptr as isize + i) as usize].set(v);
        }
    }

    /// Whether lane-blocked kernels are vectorized for this element type.
    pub fn supports_simd(&self) -> bool {
        simd::supports_simd()
    }

    /// NaN predicate for this element type; always false for integers.
    #[inline]
    pub fn is_nan(&self, value: T) -> bool {
        value.is_nan()
    }

    /// Copy of the whole buffer in storage order.
    pub fn to_vec(&self) -> Vec<T> {
        self.data.iter().map(Cell::get).collect()
    }

    /// Two storages alias the same buffer.
    #[inline]
    pub fn ptr_eq(&self, other: &Storage<T>) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    /// Number of tensors and views holding this buffer.
    pub fn holders(&self) -> usize {
        Rc::strong_count(&self.data)
    }

    /// Base pointer for raw kernels. `Cell<T>` has the layout of `T`, and
    /// writes through the pointer are permitted by the cell's interior
    /// mutability.
    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut T {
        self.data.as_ptr() as *mut T
    }
}

impl<T: Element> fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("dtype", &T::DTYPE)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_writes_are_visible() {
        let a = Storage::from_vec(vec![1.0f64, 2.0, 3.0]);
        let b = a.clone();
        b.set(1, 10.0);
        assert_eq!(a.get(1), 10.0);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.holders(), 2);
    }

    #[test]
    fn test_lane_access() {
        let s = Storage::from_vec((0..12).collect::<Vec<i32>>());
        let mut out = [0i32; 4];
        s.get_lanes(1, 3, &mut out);
        assert_eq!(out, [1, 4, 7, 10]);

        s.get_lanes_mapped(2, &[0, 2, 4, 6], &mut out);
        assert_eq!(out, [2, 4, 6, 8]);

        s.set_lanes(0, 2, &[-1, -2]);
        assert_eq!(s.get(0), -1);
        assert_eq!(s.get(2), -2);

        s.set_lanes_mapped(10, &[0, 1], &[7, 8]);
        assert_eq!(&s.to_vec()[10..], &[7, 8]);
    }

    #[test]
    fn test_inc_and_nan() {
        let s = Storage::<f32>::zeros(2);
        s.inc(0, 2.5);
        s.inc(0, 0.5);
        assert_eq!(s.get(0), 3.0);
        assert!(s.is_nan(f32::NAN));
        assert!(!Storage::<u8>::zeros(1).is_nan(0));
    }
}
