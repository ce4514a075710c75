use crate::math::DTypeOps;
use crate::tensor::{Dim4, ITensor, Tensor, Tensor4, TensorBase};

/// Spatial padding policy for 2D convolutions.
///
/// `Same` pads so that the output spatial size is `ceil(input / stride)`;
/// `Valid` applies no padding and only keeps fully covered positions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Padding {
    Same,
    Valid,
}

impl Padding {
    pub fn output_size(&self, input: usize, kernel: usize, stride: usize) -> usize {
        assert!(stride >= 1, "stride must be at least 1");
        match self {
            Padding::Same => input.div_ceil(stride),
            Padding::Valid => {
                assert!(
                    input >= kernel,
                    "input size {input} is smaller than kernel size {kernel} with no padding"
                );
                (input - kernel) / stride + 1
            }
        }
    }

    fn pad_before(&self, input: usize, kernel: usize, stride: usize) -> usize {
        match self {
            Padding::Same => {
                let output = input.div_ceil(stride);
                let covered = (output - 1) * stride + kernel;
                covered.saturating_sub(input) / 2
            }
            Padding::Valid => 0,
        }
    }
}

/// 2D convolution over a batched NCHW input with an HWIO kernel
/// `[kernel_h, kernel_w, in_channels, out_channels]`, lowered to a gemm per
/// image through an im2col buffer.
pub fn conv2d<T, V>(input: &V, kernel: &Tensor4<T>, stride: usize, padding: Padding) -> Tensor4<T>
where
    T: DTypeOps,
    V: TensorBase<T, Dim4>,
{
    let &Dim4(batch, in_channels, in_height, in_width) = input.dims();
    let &Dim4(kernel_h, kernel_w, kernel_channels, out_channels) = kernel.dims();
    assert_eq!(
        kernel_channels, in_channels,
        "Mismatched kernel channels {kernel_channels} and input channels {in_channels}"
    );
    assert!(stride >= 1, "stride must be at least 1");

    let out_height = padding.output_size(in_height, kernel_h, stride);
    let out_width = padding.output_size(in_width, kernel_w, stride);
    let pad_top = padding.pad_before(in_height, kernel_h, stride);
    let pad_left = padding.pad_before(in_width, kernel_w, stride);

    let patch_len = kernel_h * kernel_w * in_channels;
    let out_spatial = out_height * out_width;
    let mut columns = vec![T::ZERO; patch_len * out_spatial];
    let mut output = vec![T::ZERO; batch * out_channels * out_spatial];

    let in_data = input.as_ref();
    let image_len = in_channels * in_height * in_width;

    for image in 0..batch {
        let img = &in_data[image * image_len..(image + 1) * image_len];

        // Gather patches; row order must match the kernel layout (kh, kw, c).
        for ky in 0..kernel_h {
            for kx in 0..kernel_w {
                for c in 0..in_channels {
                    let row = (ky * kernel_w + kx) * in_channels + c;
                    let col_row = &mut columns[row * out_spatial..(row + 1) * out_spatial];
                    for oy in 0..out_height {
                        let iy = (oy * stride + ky) as isize - pad_top as isize;
                        for ox in 0..out_width {
                            let ix = (ox * stride + kx) as isize - pad_left as isize;
                            let inside = iy >= 0 && iy < in_height as isize && ix >= 0 && ix < in_width as isize;
                            col_row[oy * out_width + ox] = if inside {
                                img[(c * in_height + iy as usize) * in_width + ix as usize]
                            } else {
                                T::ZERO
                            };
                        }
                    }
                }
            }
        }

        // kernel[(ky, kx, c), o] is used transposed as the left operand
        unsafe {
            T::gemm(
                out_channels,
                patch_len,
                out_spatial,
                T::ONE,
                kernel.as_ref().as_ptr(),
                1,
                out_channels as isize,
                columns.as_ptr(),
                out_spatial as isize,
                1,
                T::ZERO,
                output.as_mut_ptr().add(image * out_channels * out_spatial),
                out_spatial as isize,
                1,
            );
        }
    }

    Tensor::from_vec(output, Dim4(batch, out_channels, out_height, out_width))
}

#[cfg(test)]
mod test {
    use super::{Padding, conv2d};
    use crate::tensor::{Dim4, ITensor, Tensor, TensorBase};

    #[test]
    fn test_output_size_same() {
        assert_eq!(Padding::Same.output_size(32, 9, 1), 32);
        assert_eq!(Padding::Same.output_size(24, 9, 2), 12);
        assert_eq!(Padding::Same.output_size(16, 9, 2), 8);
        assert_eq!(Padding::Same.output_size(7, 3, 2), 4);
    }

    #[test]
    fn test_output_size_valid() {
        assert_eq!(Padding::Valid.output_size(9, 9, 2), 1);
        assert_eq!(Padding::Valid.output_size(24, 9, 1), 16);
        assert_eq!(Padding::Valid.output_size(7, 3, 2), 3);
    }

    #[test]
    #[should_panic]
    fn test_output_size_valid_too_small() {
        Padding::Valid.output_size(5, 9, 1);
    }

    #[test]
    fn test_identity_kernel() {
        // 1x1 kernel with weight 1 reproduces the input
        let input = Tensor::from_vec((1..=9).map(|x| x as f32).collect(), Dim4(1, 1, 3, 3));
        let kernel = Tensor::from_vec(vec![1.0f32], Dim4(1, 1, 1, 1));
        let out = conv2d(&input, &kernel, 1, Padding::Valid);
        assert_eq!(out.dims(), &Dim4(1, 1, 3, 3));
        assert_eq!(out.as_ref(), input.as_ref());
    }

    #[test]
    fn test_box_kernel_valid() {
        // 2x2 all-ones kernel sums each window
        let input = Tensor::from_vec((1..=9).map(|x| x as f32).collect(), Dim4(1, 1, 3, 3));
        let kernel = Tensor::from_vec(vec![1.0f32; 4], Dim4(2, 2, 1, 1));
        let out = conv2d(&input, &kernel, 1, Padding::Valid);
        assert_eq!(out.dims(), &Dim4(1, 1, 2, 2));
        assert_eq!(out.as_ref(), &[12.0, 16.0, 24.0, 28.0]);
    }

    #[test]
    fn test_box_kernel_same_pads_with_zeros() {
        let input = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], Dim4(1, 1, 2, 2));
        let kernel = Tensor::from_vec(vec![1.0f32; 9], Dim4(3, 3, 1, 1));
        let out = conv2d(&input, &kernel, 1, Padding::Same);
        assert_eq!(out.dims(), &Dim4(1, 1, 2, 2));
        // every output sums all four inputs since the rest is zero padding
        assert_eq!(out.as_ref(), &[10.0, 10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_multi_channel() {
        // two input channels summed by a 1x1 kernel with unit weights
        let input = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0], Dim4(1, 2, 2, 2));
        let kernel = Tensor::from_vec(vec![1.0f32, 1.0], Dim4(1, 1, 2, 1));
        let out = conv2d(&input, &kernel, 1, Padding::Valid);
        assert_eq!(out.dims(), &Dim4(1, 1, 2, 2));
        assert_eq!(out.as_ref(), &[11.0, 22.0, 33.0, 44.0]);
    }

    #[test]
    fn test_stride_two() {
        let input = Tensor::from_vec((0..16).map(|x| x as f32).collect(), Dim4(1, 1, 4, 4));
        let kernel = Tensor::from_vec(vec![1.0f32], Dim4(1, 1, 1, 1));
        let out = conv2d(&input, &kernel, 2, Padding::Valid);
        assert_eq!(out.dims(), &Dim4(1, 1, 2, 2));
        assert_eq!(out.as_ref(), &[0.0, 2.0, 8.0, 10.0]);
    }

    #[test]
    fn test_batched() {
        let input = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], Dim4(2, 1, 1, 2));
        let kernel = Tensor::from_vec(vec![2.0f32], Dim4(1, 1, 1, 1));
        let out = conv2d(&input, &kernel, 1, Padding::Valid);
        assert_eq!(out.dims(), &Dim4(2, 1, 1, 2));
        assert_eq!(out.as_ref(), &[2.0, 4.0, 6.0, 8.0]);
    }
}
