use crate::tensor::{Dims, ITensor, TensorView, TensorViewMut};

pub trait TensorBase<T, D: Dims>: ITensor<D> + AsRef<[T]> {
    fn into_vec(self) -> Vec<T>
    where
        T: Clone;

    #[inline]
    fn view(&self) -> TensorView<T, D> {
        unsafe { TensorView::from_slice_unchecked(self.as_ref(), *self.dims()) }
    }
}

pub trait TensorBaseMut<T, D: Dims>: TensorBase<T, D> + AsMut<[T]> {
    #[inline]
    fn view_mut(&mut self) -> TensorViewMut<T, D> {
        let dims = *self.dims();
        unsafe { TensorViewMut::from_slice_unchecked(self.as_mut(), dims) }
    }
}
