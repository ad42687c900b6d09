use std::ops::{Index, IndexMut};

use serde::{ser::SerializeStruct, Serialize, Serializer};

/// Dense row-major tensor with a fixed rank.
///
/// Every market quantity lives in one of these; entity identity is the
/// coordinate, never a pointer. Storage is a single flat `Vec` so hot loops
/// can walk the last axis as a contiguous slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T, const N: usize> {
    shape: [usize; N],
    strides: [usize; N],
    data: Vec<T>,
}

impl<T: Clone, const N: usize> Tensor<T, N> {
    pub fn filled(shape: [usize; N], value: T) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            strides: strides_for(shape),
            data: vec![value; len],
        }
    }

    pub fn fill(&mut self, value: T) {
        for slot in &mut self.data {
            *slot = value.clone();
        }
    }
}

impl<T: Clone + Default, const N: usize> Tensor<T, N> {
    pub fn zeros(shape: [usize; N]) -> Self {
        Self::filled(shape, T::default())
    }
}

impl<T, const N: usize> Tensor<T, N> {
    #[inline]
    pub fn shape(&self) -> [usize; N] {
        self.shape
    }

    #[inline]
    pub fn offset(&self, index: [usize; N]) -> usize {
        let mut offset = 0;
        for axis in 0..N {
            debug_assert!(
                index[axis] < self.shape[axis],
                "index {index:?} out of bounds for shape {:?}",
                self.shape
            );
            offset += index[axis] * self.strides[axis];
        }
        offset
    }

    /// Contiguous run along the last axis, addressed by the leading `N - 1`
    /// coordinates.
    #[inline]
    pub fn lane(&self, head: &[usize]) -> &[T] {
        let (start, len) = self.lane_bounds(head);
        &self.data[start..start + len]
    }

    #[inline]
    pub fn lane_mut(&mut self, head: &[usize]) -> &mut [T] {
        let (start, len) = self.lane_bounds(head);
        &mut self.data[start..start + len]
    }

    /// Contiguous block below the leading axis (e.g. one tick of a history).
    pub fn outer(&self, index: usize) -> &[T] {
        let len = self.strides[0];
        &self.data[index * len..(index + 1) * len]
    }

    pub fn outer_mut(&mut self, index: usize) -> &mut [T] {
        let len = self.strides[0];
        &mut self.data[index * len..(index + 1) * len]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    fn lane_bounds(&self, head: &[usize]) -> (usize, usize) {
        debug_assert_eq!(head.len() + 1, N);
        let mut start = 0;
        for (axis, &coord) in head.iter().enumerate() {
            debug_assert!(coord < self.shape[axis]);
            start += coord * self.strides[axis];
        }
        (start, self.shape[N - 1])
    }
}

impl<T, const N: usize> Index<[usize; N]> for Tensor<T, N> {
    type Output = T;

    #[inline]
    fn index(&self, index: [usize; N]) -> &Self::Output {
        &self.data[self.offset(index)]
    }
}

impl<T, const N: usize> IndexMut<[usize; N]> for Tensor<T, N> {
    #[inline]
    fn index_mut(&mut self, index: [usize; N]) -> &mut Self::Output {
        let offset = self.offset(index);
        &mut self.data[offset]
    }
}

impl<T: Serialize, const N: usize> Serialize for Tensor<T, N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Tensor", 2)?;
        state.serialize_field("shape", &self.shape[..])?;
        state.serialize_field("data", &self.data)?;
        state.end()
    }
}

fn strides_for<const N: usize>(shape: [usize; N]) -> [usize; N] {
    let mut strides = [1usize; N];
    let mut acc = 1usize;
    for axis in (0..N).rev() {
        strides[axis] = acc;
        acc *= shape[axis];
    }
    strides
}
