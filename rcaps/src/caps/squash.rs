use crate::caps::NORM_EPSILON;
use crate::dtype::DTypeFloat;
use crate::tensor::{Dims, Tensor, TensorBase};

/// Squash nonlinearity for capsule tensors.
///
/// Rescales each capsule vector along the atoms axis (axis 2) so that its
/// norm lands in [0, 1): `squash(v) = (v / ||v||) * (||v||^2 / (1 + ||v||^2))`.
/// Short vectors shrink toward zero, long vectors approach unit length.
/// Accepts the rank-3 fully connected layout `[batch, types, atoms]` or the
/// rank-5 convolutional layout `[batch, types, atoms, height, width]`, and any
/// higher rank with extra trailing spatial axes.
pub fn squash<T, V, D>(input: &V) -> Tensor<T, D>
where
    T: DTypeFloat,
    V: TensorBase<T, D>,
    D: Dims,
{
    let dims = *input.dims();
    let shape = dims.as_vec();
    assert!(
        shape.len() >= 3,
        "squash expects a capsule tensor of rank 3 or higher, got rank {}",
        shape.len()
    );
    let atoms = shape[2];
    let spatial: usize = shape[3..].iter().product();
    let mut data = input.as_ref().to_vec();
    squash_in_place(&mut data, atoms, spatial);
    Tensor::from_vec(data, dims)
}

/// In-place squash over data laid out as `[outer, atoms, spatial]` groups.
pub(crate) fn squash_in_place<T: DTypeFloat>(data: &mut [T], atoms: usize, spatial: usize) {
    let group = atoms * spatial;
    if group == 0 || data.is_empty() {
        return;
    }
    assert_eq!(
        data.len() % group,
        0,
        "Mismatched data length {} for {} atoms and {} spatial positions",
        data.len(),
        atoms,
        spatial
    );
    let eps = T::from_f64(NORM_EPSILON);
    for chunk in data.chunks_exact_mut(group) {
        for p in 0..spatial {
            let mut norm_sq = T::ZERO;
            for a in 0..atoms {
                let v = chunk[a * spatial + p];
                norm_sq += v * v;
            }
            let norm = norm_sq.sqrt();
            let scale = norm_sq / ((T::ONE + norm_sq) * (norm + eps));
            for a in 0..atoms {
                chunk[a * spatial + p] *= scale;
            }
        }
    }
}
