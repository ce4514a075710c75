use crate::caps::routing::{RoutingOutput, RoutingParams, route_conv};
use crate::conv::{Padding, conv2d};
use crate::dtype::DType;
use crate::initializer::ParamInitializer;
use crate::math::DTypeOps;
use crate::tensor::{Dim2, Dim4, Dim5, Dim6, ITensor, Tensor, Tensor2, Tensor4, Tensor5, Tensor6, TensorBase, TensorView};
use crate::visual::Diagnostics;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConvCapsuleLayerParams {
    /// Number of input capsule types.
    pub in_dim: usize,
    /// Atoms per input capsule.
    pub in_atoms: usize,
    /// Number of output capsule types.
    pub out_dim: usize,
    /// Atoms per output capsule.
    pub out_atoms: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: Padding,
    pub routing: RoutingParams,
}

/// Convolutional capsule layer. The same kernel slides over every input
/// capsule type's atom grid to produce spatially local votes, which are then
/// routed position by position.
///
/// Input is `[batch, in_dim, in_atoms, height, width]`, output
/// `[batch, out_dim, out_atoms, out_height, out_width]`. The bias for each
/// output atom is shared across all spatial positions.
#[derive(Debug)]
pub struct ConvCapsuleLayer<T: DType> {
    params: ConvCapsuleLayerParams,
    /// `[kernel_size, kernel_size, in_atoms, out_dim * out_atoms]`
    kernel: Tensor4<T>,
    /// `[out_dim, out_atoms]`
    biases: Tensor2<T>,
}

impl<T: DType> ConvCapsuleLayer<T> {
    pub fn new<I: ParamInitializer<T>>(params: ConvCapsuleLayerParams, initializer: &mut I) -> Self {
        let ConvCapsuleLayerParams {
            in_dim,
            in_atoms,
            out_dim,
            out_atoms,
            kernel_size,
            ..
        } = params;
        assert!(in_dim >= 1 && in_atoms >= 1 && out_dim >= 1 && out_atoms >= 1 && kernel_size >= 1);
        let kernel = initializer.weights(
            Dim4(kernel_size, kernel_size, in_atoms, out_dim * out_atoms),
            kernel_size * kernel_size * in_atoms,
            out_dim * out_atoms,
        );
        let biases = initializer.biases(Dim2(out_dim, out_atoms));
        ConvCapsuleLayer {
            params,
            kernel,
            biases,
        }
    }

    pub fn from_parts(params: ConvCapsuleLayerParams, kernel: Tensor4<T>, biases: Tensor2<T>) -> Self {
        let ConvCapsuleLayerParams {
            in_atoms,
            out_dim,
            out_atoms,
            kernel_size,
            ..
        } = params;
        assert_eq!(
            kernel.dims(),
            &Dim4(kernel_size, kernel_size, in_atoms, out_dim * out_atoms),
            "Invalid dimensions for kernel tensor"
        );
        assert_eq!(
            biases.dims(),
            &Dim2(out_dim, out_atoms),
            "Invalid dimensions for bias tensor"
        );
        ConvCapsuleLayer {
            params,
            kernel,
            biases,
        }
    }

    #[inline]
    pub fn params(&self) -> &ConvCapsuleLayerParams {
        &self.params
    }

    pub fn kernel(&self) -> &Tensor4<T> {
        &self.kernel
    }

    pub fn biases(&self) -> &Tensor2<T> {
        &self.biases
    }

    /// Output grid size for a given input grid size.
    pub fn output_spatial(&self, height: usize, width: usize) -> (usize, usize) {
        let ConvCapsuleLayerParams {
            kernel_size,
            stride,
            padding,
            ..
        } = self.params;
        (
            padding.output_size(height, kernel_size, stride),
            padding.output_size(width, kernel_size, stride),
        )
    }
}

impl<T: DTypeOps> ConvCapsuleLayer<T> {
    /// Computes the vote tensor
    /// `[batch, in_dim, out_dim, out_atoms, out_height, out_width]` by running
    /// the shared kernel over each input capsule type independently. Batch and
    /// input type collapse into one convolution batch axis.
    pub fn votes<V: TensorBase<T, Dim5>>(&self, input: &V) -> Tensor6<T> {
        let ConvCapsuleLayerParams {
            in_dim,
            in_atoms,
            out_dim,
            out_atoms,
            stride,
            padding,
            ..
        } = self.params;
        let &Dim5(batch, input_dim, input_atoms, height, width) = input.dims();
        assert_eq!(
            (input_dim, input_atoms),
            (in_dim, in_atoms),
            "Invalid dimensions for input tensor"
        );
        let flat = TensorView::from_slice(input.as_ref(), Dim4(batch * in_dim, in_atoms, height, width));
        let (out_height, out_width) = self.output_spatial(height, width);
        conv2d(&flat, &self.kernel, stride, padding)
            .into_reshaped(Dim6(batch, in_dim, out_dim, out_atoms, out_height, out_width))
    }

    pub fn forward_all<V: TensorBase<T, Dim5>>(
        &self,
        input: &V,
        mut diag: Option<&mut Diagnostics<T>>,
    ) -> RoutingOutput<T, Dim5> {
        let votes = self.votes(input);
        if let Some(d) = diag.as_deref_mut() {
            d.record("conv_capsule/votes", &votes);
        }
        let &Dim6(_, _, out_dim, out_atoms, out_height, out_width) = votes.dims();
        // tile the per-atom biases over the output grid
        let mut tiled = Tensor::zeroed(Dim4(out_dim, out_atoms, out_height, out_width));
        for (chunk, &bias) in tiled.as_mut().chunks_exact_mut(out_height * out_width).zip(self.biases.as_ref()) {
            chunk.fill(bias);
        }
        route_conv(&votes, &tiled, &self.params.routing, diag)
    }

    pub fn forward<V: TensorBase<T, Dim5>>(
        &self,
        input: &V,
        diag: Option<&mut Diagnostics<T>>,
    ) -> Tensor5<T> {
        self.forward_all(input, diag).into_final_activation()
    }
}

#[cfg(test)]
mod test {
    use super::{ConvCapsuleLayer, ConvCapsuleLayerParams};
    use crate::caps::routing::RoutingParams;
    use crate::caps::squash;
    use crate::conv::Padding;
    use crate::initializer::RandomInitializer;
    use crate::tensor::{Dim2, Dim4, Dim5, Dim6, ITensor, Tensor, Tensor5, TensorBase};
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::StandardNormal;

    fn params(in_dim: usize, in_atoms: usize, out_dim: usize, out_atoms: usize, kernel_size: usize) -> ConvCapsuleLayerParams {
        ConvCapsuleLayerParams {
            in_dim,
            in_atoms,
            out_dim,
            out_atoms,
            kernel_size,
            stride: 1,
            padding: Padding::Same,
            routing: RoutingParams {
                iterations: 3,
                leaky: false,
            },
        }
    }

    #[test]
    fn test_vote_shapes_stride_two() {
        let mut init = RandomInitializer::seed_from_u64(1);
        let mut p = params(1, 4, 8, 2, 9);
        p.stride = 2;
        let layer: ConvCapsuleLayer<f32> = ConvCapsuleLayer::new(p, &mut init);
        assert_eq!(layer.output_spatial(16, 16), (8, 8));

        let input = Tensor::zeroed(Dim5(2, 1, 4, 16, 16));
        let votes = layer.votes(&input);
        assert_eq!(votes.dims(), &Dim6(2, 1, 8, 2, 8, 8));
    }

    #[test]
    fn test_forward_shapes() {
        let mut init = RandomInitializer::seed_from_u64(2);
        let layer: ConvCapsuleLayer<f64> = ConvCapsuleLayer::new(params(2, 3, 4, 2, 3), &mut init);
        let mut rng = StdRng::seed_from_u64(3);
        let input: Tensor5<f64> = Tensor::from_distribution(&mut rng, StandardNormal, Dim5(1, 2, 3, 5, 5));
        let out = layer.forward(&input, None);
        assert_eq!(out.dims(), &Dim5(1, 4, 2, 5, 5));
    }

    #[test]
    fn test_unit_kernel_squashes_input() {
        // a 1x1 identity kernel mapping one input type to one output type
        // makes every vote equal the input, so a single routing iteration
        // with zero biases reduces to the squash of the input
        let atoms = 3;
        let mut kernel = Tensor::zeroed(Dim4(1, 1, atoms, atoms));
        for a in 0..atoms {
            kernel.as_mut()[a * atoms + a] = 1.0;
        }
        let p = ConvCapsuleLayerParams {
            in_dim: 1,
            in_atoms: atoms,
            out_dim: 1,
            out_atoms: atoms,
            kernel_size: 1,
            stride: 1,
            padding: Padding::Valid,
            routing: RoutingParams {
                iterations: 1,
                leaky: false,
            },
        };
        let layer = ConvCapsuleLayer::from_parts(p, kernel, Tensor::zeroed(Dim2(1, atoms)));

        let mut rng = StdRng::seed_from_u64(4);
        let input: Tensor5<f64> = Tensor::from_distribution(&mut rng, StandardNormal, Dim5(2, 1, atoms, 4, 4));
        let out = layer.forward(&input, None);
        let expected = squash(&input);
        assert_abs_diff_eq!(&out, &expected, epsilon = 1e-12);
    }

    #[test]
    fn test_forward_records_votes() {
        let mut init = RandomInitializer::seed_from_u64(5);
        let layer: ConvCapsuleLayer<f32> = ConvCapsuleLayer::new(params(1, 2, 3, 2, 3), &mut init);
        let input = Tensor::filled(0.25f32, Dim5(1, 1, 2, 4, 4));
        let mut diag = crate::visual::Diagnostics::new();
        layer.forward(&input, Some(&mut diag));
        let rec = diag.get("conv_capsule/votes").unwrap();
        assert_eq!(rec.dims, vec![1, 1, 3, 2, 4, 4]);
        assert!(diag.get("routing/coefficients/0").is_some());
    }

    #[test]
    #[should_panic(expected = "Invalid dimensions for input tensor")]
    fn test_rejects_wrong_input_atoms() {
        let mut init = RandomInitializer::seed_from_u64(0);
        let layer: ConvCapsuleLayer<f32> = ConvCapsuleLayer::new(params(1, 2, 3, 2, 3), &mut init);
        let input = Tensor::zeroed(Dim5(1, 1, 3, 4, 4));
        layer.votes(&input);
    }
}
