use crate::tensor::dims::{Dim1, Dim2, Dim3, Dim4, Dim5, Dim6, Dims};
use crate::tensor::{ITensor, TensorBase, TensorBaseMut};
use num_traits::Zero;
use rand::Rng;
use rand::distributions::Distribution;
use std::slice::{Iter, IterMut};
use std::vec::IntoIter;

pub struct Tensor<T, D>
where
    D: Dims,
{
    data: Vec<T>,
    dims: D,
}

pub type Tensor1<T> = Tensor<T, Dim1>;
pub type Tensor2<T> = Tensor<T, Dim2>;
pub type Tensor3<T> = Tensor<T, Dim3>;
pub type Tensor4<T> = Tensor<T, Dim4>;
pub type Tensor5<T> = Tensor<T, Dim5>;
pub type Tensor6<T> = Tensor<T, Dim6>;

impl<T, D: Dims> Tensor<T, D> {
    pub fn from_vec(data: Vec<T>, dims: D) -> Self {
        assert_eq!(
            data.len(),
            dims.tensor_len(),
            "Mismatched data length {} and dimensions {}",
            data.len(),
            dims
        );
        Tensor { data, dims }
    }

    pub fn from_distribution<R, S>(rng: &mut R, dist: S, dims: D) -> Self
    where
        R: Rng,
        S: Distribution<T>,
    {
        let data: Vec<T> = dist.sample_iter(rng).take(dims.tensor_len()).collect();
        Tensor { data, dims }
    }

    #[inline]
    pub(super) unsafe fn from_vec_unchecked(data: Vec<T>, dims: D) -> Self {
        debug_assert_eq!(data.len(), dims.tensor_len());
        Tensor { data, dims }
    }

    /// Reinterprets the tensor under new dimensions with the same total
    /// element count. Data is neither copied nor reordered.
    pub fn into_reshaped<E: Dims>(self, dims: E) -> Tensor<T, E> {
        assert_eq!(
            self.data.len(),
            dims.tensor_len(),
            "Cannot reshape tensor of length {} into dimensions {}",
            self.data.len(),
            dims
        );
        Tensor { data: self.data, dims }
    }
}

impl<T> Tensor1<T> {
    pub fn from_vec_1d(data: Vec<T>) -> Self {
        let len = data.len();
        Tensor { data, dims: Dim1(len) }
    }
}

impl<T> Tensor2<T> {
    pub fn from_vec_2d<const N: usize>(vec: Vec<[T; N]>) -> Self {
        let rows = vec.len();
        let data: Vec<T> = vec.into_iter().flatten().collect();
        unsafe { Tensor::from_vec_unchecked(data, Dim2(rows, N)) }
    }
}

impl<T> Tensor3<T> {
    pub fn from_vec_3d<const N: usize, const M: usize>(vec: Vec<[[T; M]; N]>) -> Self {
        let outer = vec.len();
        let data: Vec<T> = vec.into_iter().flatten().flatten().collect();
        unsafe { Tensor::from_vec_unchecked(data, Dim3(outer, N, M)) }
    }
}

impl<T: Clone, D: Dims> Tensor<T, D> {
    pub fn filled(value: T, dims: D) -> Self {
        Tensor {
            data: vec![value; dims.tensor_len()],
            dims,
        }
    }
    #[inline]
    pub fn fill(&mut self, fill: T) {
        self.data.fill(fill);
    }
}

impl<T: Zero + Clone, D: Dims> Tensor<T, D> {
    #[inline]
    pub fn zeroed(dims: D) -> Self {
        Self::filled(T::zero(), dims)
    }
}

impl<T, D: Dims> ITensor<D> for Tensor<T, D> {
    #[inline]
    fn len(&self) -> usize {
        self.data.len()
    }
    #[inline]
    fn dims(&self) -> &D {
        &self.dims
    }
}

impl<T, D: Dims> AsRef<[T]> for Tensor<T, D> {
    #[inline]
    fn as_ref(&self) -> &[T] {
        &self.data
    }
}

impl<T, D: Dims> AsMut<[T]> for Tensor<T, D> {
    #[inline]
    fn as_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T, D: Dims> TensorBase<T, D> for Tensor<T, D> {
    #[inline]
    fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl<T, D: Dims> TensorBaseMut<T, D> for Tensor<T, D> {}

impl<'a, T, D: Dims> IntoIterator for &'a Tensor<T, D> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl<'a, T, D: Dims> IntoIterator for &'a mut Tensor<T, D> {
    type Item = &'a mut T;
    type IntoIter = IterMut<'a, T>;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.data.iter_mut()
    }
}

impl<T, D: Dims> IntoIterator for Tensor<T, D> {
    type Item = T;
    type IntoIter = IntoIter<T>;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

impl<T: Clone, D: Dims> Clone for Tensor<T, D> {
    fn clone(&self) -> Self {
        unsafe { Tensor::from_vec_unchecked(self.data.clone(), self.dims) }
    }
}

#[macro_export]
macro_rules! tensor {
    ($([$([$($x:expr),* $(,)*]),+ $(,)*]),+ $(,)*) => {
        $crate::tensor::Tensor3::from_vec_3d(vec![$([$([$($x,)*],)*],)*])
    };
    ($([$($x:expr),* $(,)*]),+ $(,)*) => {
        $crate::tensor::Tensor2::from_vec_2d(vec![$([$($x,)*],)*])
    };
    ($($x:expr),* $(,)*) => {
        $crate::tensor::Tensor1::from_vec_1d(vec![$($x,)*])
    };
}
