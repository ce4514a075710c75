use crate::caps::{
    CapsuleLayer, CapsuleLayerParams, ConvCapsuleLayer, ConvCapsuleLayerParams, RoutingParams,
};
use crate::conv::{Padding, conv2d};
use crate::dtype::DType;
use crate::initializer::ParamInitializer;
use crate::math::{DTypeOps, bias_add_nchw, relu_in_place};
use crate::tensor::{Dim1, Dim2, Dim3, Dim4, Dim5, ITensor, Tensor, Tensor1, Tensor2, Tensor3, Tensor4, Tensor5, TensorBase};
use crate::visual::Diagnostics;

/// Architecture of the capsule classifier.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CapsuleModelParams {
    /// Input image edge length after cropping.
    pub image_size: usize,
    /// Input channels.
    pub depth: usize,
    pub classes: usize,
    /// Channels produced by the opening convolution.
    pub conv_channels: usize,
    pub conv_kernel: usize,
    pub num_prime_capsules: usize,
    pub prime_atoms: usize,
    pub digit_atoms: usize,
    pub capsule_kernel: usize,
    pub stride: usize,
    pub padding: Padding,
    pub routing: RoutingParams,
}

impl Default for CapsuleModelParams {
    fn default() -> Self {
        CapsuleModelParams {
            image_size: 24,
            depth: 3,
            classes: 10,
            conv_channels: 256,
            conv_kernel: 9,
            num_prime_capsules: 32,
            prime_atoms: 8,
            digit_atoms: 16,
            capsule_kernel: 9,
            stride: 2,
            padding: Padding::Same,
            routing: RoutingParams {
                iterations: 3,
                leaky: false,
            },
        }
    }
}

/// Capsule network classifier: an opening ReLU convolution, a convolutional
/// capsule layer forming the primary capsules, and a fully connected capsule
/// layer producing one capsule per class. Class logits are the norms of the
/// class capsules.
#[derive(Debug)]
pub struct CapsuleModel<T: DType> {
    params: CapsuleModelParams,
    /// `[conv_kernel, conv_kernel, depth, conv_channels]`
    conv_kernel: Tensor4<T>,
    conv_biases: Tensor1<T>,
    prime_caps: ConvCapsuleLayer<T>,
    digit_caps: CapsuleLayer<T>,
    /// Primary capsule grid size, fixed by `image_size` and the strides.
    prime_grid: (usize, usize),
}

impl<T: DType> CapsuleModel<T> {
    pub fn new<I: ParamInitializer<T>>(params: CapsuleModelParams, initializer: &mut I) -> Self {
        let conv_kernel = initializer.weights(
            Dim4(params.conv_kernel, params.conv_kernel, params.depth, params.conv_channels),
            params.conv_kernel * params.conv_kernel * params.depth,
            params.conv_channels,
        );
        let conv_biases = initializer.biases(Dim1(params.conv_channels));

        // the opening convolution keeps the grid size (stride 1, same padding),
        // each of its output channels becoming one atom of a single capsule
        let prime_caps = ConvCapsuleLayer::new(
            ConvCapsuleLayerParams {
                in_dim: 1,
                in_atoms: params.conv_channels,
                out_dim: params.num_prime_capsules,
                out_atoms: params.prime_atoms,
                kernel_size: params.capsule_kernel,
                stride: params.stride,
                padding: params.padding,
                routing: RoutingParams {
                    iterations: 1,
                    leaky: params.routing.leaky,
                },
            },
            initializer,
        );
        let prime_grid = prime_caps.output_spatial(params.image_size, params.image_size);

        let digit_caps = CapsuleLayer::new(
            CapsuleLayerParams {
                in_dim: params.num_prime_capsules * prime_grid.0 * prime_grid.1,
                in_atoms: params.prime_atoms,
                out_dim: params.classes,
                out_atoms: params.digit_atoms,
                routing: params.routing,
            },
            initializer,
        );

        CapsuleModel {
            params,
            conv_kernel,
            conv_biases,
            prime_caps,
            digit_caps,
            prime_grid,
        }
    }

    #[inline]
    pub fn params(&self) -> &CapsuleModelParams {
        &self.params
    }

    #[inline]
    pub fn prime_grid(&self) -> (usize, usize) {
        self.prime_grid
    }
}

impl<T: DTypeOps> CapsuleModel<T> {
    /// Class capsule embeddings `[batch, classes, digit_atoms]` for a batch of
    /// CHW images.
    pub fn embed<V: TensorBase<T, Dim4>>(&self, input: &V, mut diag: Option<&mut Diagnostics<T>>) -> Tensor3<T> {
        let CapsuleModelParams {
            image_size,
            depth,
            conv_channels,
            ..
        } = self.params;
        let &Dim4(batch, input_depth, height, width) = input.dims();
        assert_eq!(
            (input_depth, height, width),
            (depth, image_size, image_size),
            "Invalid dimensions for input tensor"
        );

        let mut conv = conv2d(input, &self.conv_kernel, 1, Padding::Same);
        bias_add_nchw(conv.as_mut(), conv_channels, image_size * image_size, self.conv_biases.as_ref());
        if let Some(d) = diag.as_deref_mut() {
            d.record("conv1/preactivation", &conv);
        }
        relu_in_place(conv.as_mut());

        let capsules = conv.into_reshaped(Dim5(batch, 1, conv_channels, image_size, image_size));
        let prime = self.prime_caps.forward(&capsules, diag.as_deref_mut());
        let flat = atoms_last(&prime);
        let embedding = self.digit_caps.forward(&flat, diag.as_deref_mut());
        if let Some(d) = diag.as_deref_mut() {
            d.record("digit_capsule/embedding", &embedding);
        }
        embedding
    }

    /// Class logits `[batch, classes]`: the norms of the class capsules.
    pub fn forward<V: TensorBase<T, Dim4>>(&self, input: &V, mut diag: Option<&mut Diagnostics<T>>) -> Tensor2<T> {
        let embedding = self.embed(input, diag.as_deref_mut());
        let &Dim3(batch, classes, atoms) = embedding.dims();
        let logits: Vec<T> = embedding
            .as_ref()
            .chunks_exact(atoms)
            .map(|capsule| capsule.iter().map(|&x| x * x).fold(T::ZERO, |acc, x| acc + x).sqrt())
            .collect();
        let logits = Tensor::from_vec(logits, Dim2(batch, classes));
        if let Some(d) = diag.as_deref_mut() {
            d.record("logits", &logits);
        }
        logits
    }
}

/// Reorders convolutional capsule activations `[batch, types, atoms, h, w]`
/// into the fully connected layout `[batch, types * h * w, atoms]`, treating
/// every grid position of every type as its own capsule.
fn atoms_last<T: DType>(act: &Tensor5<T>) -> Tensor3<T> {
    let &Dim5(batch, types, atoms, height, width) = act.dims();
    let spatial = height * width;
    let src = act.as_ref();
    let mut out = Vec::with_capacity(src.len());
    for b in 0..batch {
        for t in 0..types {
            for p in 0..spatial {
                for a in 0..atoms {
                    out.push(src[((b * types + t) * atoms + a) * spatial + p]);
                }
            }
        }
    }
    Tensor::from_vec(out, Dim3(batch, types * spatial, atoms))
}
