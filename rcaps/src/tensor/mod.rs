mod dims;
mod native;

pub use dims::*;
pub use native::base::*;
pub use native::owned::*;
pub use native::view::*;

/// Generic tensor interface shared by owned tensors and borrowed views.
pub trait ITensor<D: Dims> {
    fn len(&self) -> usize;
    fn dims(&self) -> &D;
}
