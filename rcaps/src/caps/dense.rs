use crate::caps::routing::{RoutingOutput, RoutingParams, route_dense};
use crate::dtype::DType;
use crate::initializer::ParamInitializer;
use crate::math::DTypeOps;
use crate::tensor::{Dim2, Dim3, Dim4, ITensor, Tensor, Tensor2, Tensor3, Tensor4, TensorBase};
use crate::visual::Diagnostics;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CapsuleLayerParams {
    /// Number of input capsule types.
    pub in_dim: usize,
    /// Atoms per input capsule.
    pub in_atoms: usize,
    /// Number of output capsule types.
    pub out_dim: usize,
    /// Atoms per output capsule.
    pub out_atoms: usize,
    pub routing: RoutingParams,
}

/// Fully connected capsule layer. Every input capsule votes for every output
/// capsule through a learned linear map, and routing-by-agreement decides how
/// much each vote counts.
///
/// Input is `[batch, in_dim, in_atoms]`, output `[batch, out_dim, out_atoms]`.
#[derive(Debug)]
pub struct CapsuleLayer<T: DType> {
    params: CapsuleLayerParams,
    /// `[in_dim, in_atoms, out_dim * out_atoms]`
    weights: Tensor3<T>,
    /// `[out_dim, out_atoms]`
    biases: Tensor2<T>,
}

impl<T: DType> CapsuleLayer<T> {
    pub fn new<I: ParamInitializer<T>>(params: CapsuleLayerParams, initializer: &mut I) -> Self {
        let CapsuleLayerParams {
            in_dim,
            in_atoms,
            out_dim,
            out_atoms,
            ..
        } = params;
        assert!(in_dim >= 1 && in_atoms >= 1 && out_dim >= 1 && out_atoms >= 1);
        let weights = initializer.weights(
            Dim3(in_dim, in_atoms, out_dim * out_atoms),
            in_atoms,
            out_dim * out_atoms,
        );
        let biases = initializer.biases(Dim2(out_dim, out_atoms));
        CapsuleLayer {
            params,
            weights,
            biases,
        }
    }

    /// Builds a layer from explicit parameters, e.g. values trained elsewhere.
    pub fn from_parts(params: CapsuleLayerParams, weights: Tensor3<T>, biases: Tensor2<T>) -> Self {
        let CapsuleLayerParams {
            in_dim,
            in_atoms,
            out_dim,
            out_atoms,
            ..
        } = params;
        assert_eq!(
            weights.dims(),
            &Dim3(in_dim, in_atoms, out_dim * out_atoms),
            "Invalid dimensions for weight tensor"
        );
        assert_eq!(
            biases.dims(),
            &Dim2(out_dim, out_atoms),
            "Invalid dimensions for bias tensor"
        );
        CapsuleLayer {
            params,
            weights,
            biases,
        }
    }

    #[inline]
    pub fn params(&self) -> &CapsuleLayerParams {
        &self.params
    }

    pub fn weights(&self) -> &Tensor3<T> {
        &self.weights
    }

    pub fn biases(&self) -> &Tensor2<T> {
        &self.biases
    }
}

impl<T: DTypeOps> CapsuleLayer<T> {
    /// Computes the vote tensor `[batch, in_dim, out_dim, out_atoms]`: for
    /// each input capsule, its atoms multiplied by that capsule's weight
    /// matrix.
    pub fn votes<V: TensorBase<T, Dim3>>(&self, input: &V) -> Tensor4<T> {
        let CapsuleLayerParams {
            in_dim,
            in_atoms,
            out_dim,
            out_atoms,
            ..
        } = self.params;
        let &Dim3(batch, input_dim, input_atoms) = input.dims();
        assert_eq!(
            (input_dim, input_atoms),
            (in_dim, in_atoms),
            "Invalid dimensions for input tensor"
        );
        let ocap = out_dim * out_atoms;
        let mut votes = Tensor::zeroed(Dim4(batch, in_dim, out_dim, out_atoms));
        let a = input.as_ref().as_ptr();
        let b = self.weights.as_ref().as_ptr();
        let c: *mut T = votes.as_mut().as_mut_ptr();
        // one gemm per input capsule type, batched over images by striding
        // the input and vote buffers
        for i in 0..in_dim {
            unsafe {
                T::gemm(
                    batch,
                    in_atoms,
                    ocap,
                    T::ONE,
                    a.add(i * in_atoms),
                    (in_dim * in_atoms) as isize,
                    1,
                    b.add(i * in_atoms * ocap),
                    ocap as isize,
                    1,
                    T::ZERO,
                    c.add(i * ocap),
                    (in_dim * ocap) as isize,
                    1,
                );
            }
        }
        votes
    }

    /// Full forward pass: votes, then routing-by-agreement, returning the
    /// activations of every routing iteration.
    pub fn forward_all<V: TensorBase<T, Dim3>>(
        &self,
        input: &V,
        mut diag: Option<&mut Diagnostics<T>>,
    ) -> RoutingOutput<T, Dim3> {
        let votes = self.votes(input);
        if let Some(d) = diag.as_deref_mut() {
            d.record("capsule/votes", &votes);
        }
        route_dense(&votes, &self.biases, &self.params.routing, diag)
    }

    pub fn forward<V: TensorBase<T, Dim3>>(
        &self,
        input: &V,
        diag: Option<&mut Diagnostics<T>>,
    ) -> Tensor3<T> {
        self.forward_all(input, diag).into_final_activation()
    }
}
