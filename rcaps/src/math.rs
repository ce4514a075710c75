use crate::dtype::DTypeFloat;
use crate::tensor::{Dim2, ITensor, TensorBase, TensorBaseMut};

/// Float types with a gemm kernel. The strided form is the primitive; the
/// dense vote transform and the convolution lowering both call it with
/// non-contiguous layouts.
pub trait DTypeOps: DTypeFloat {
    #[allow(clippy::too_many_arguments)]
    unsafe fn gemm(
        m: usize,
        k: usize,
        n: usize,
        alpha: Self,
        a: *const Self,
        rsa: isize,
        csa: isize,
        b: *const Self,
        rsb: isize,
        csb: isize,
        beta: Self,
        c: *mut Self,
        rsc: isize,
        csc: isize,
    );

    fn matrix_multiply<A, B, C>(alpha: Self, a: &A, ta: bool, b: &B, tb: bool, beta: Self, c: &mut C, tc: bool)
    where
        A: TensorBase<Self, Dim2>,
        B: TensorBase<Self, Dim2>,
        C: TensorBaseMut<Self, Dim2>,
    {
        let (a_rows, a_cols) = (a.dims().rows(), a.dims().cols());
        let (b_rows, b_cols) = (b.dims().rows(), b.dims().cols());
        let c_cols = c.dims().cols();
        let (m, k, rsa, csa) = if ta {
            (a_cols, a_rows, 1, a_cols as isize)
        } else {
            (a_rows, a_cols, a_cols as isize, 1)
        };
        let (n, rsb, csb) = if tb {
            assert_eq!(b_cols, k);
            (b_rows, 1, b_cols as isize)
        } else {
            assert_eq!(b_rows, k);
            (b_cols, b_cols as isize, 1)
        };
        let (rsc, csc) = if tc {
            assert_eq!(c.dims(), &Dim2(n, m));
            (1, c_cols as isize)
        } else {
            assert_eq!(c.dims(), &Dim2(m, n));
            (c_cols as isize, 1)
        };
        unsafe {
            Self::gemm(
                m,
                k,
                n,
                alpha,
                a.as_ref().as_ptr(),
                rsa,
                csa,
                b.as_ref().as_ptr(),
                rsb,
                csb,
                beta,
                c.as_mut().as_mut_ptr(),
                rsc,
                csc,
            );
        }
    }
}

macro_rules! implement_dtype_ops {
    ($t:ident, $g:ident) => {
        impl DTypeOps for $t {
            #[inline]
            unsafe fn gemm(
                m: usize,
                k: usize,
                n: usize,
                alpha: Self,
                a: *const Self,
                rsa: isize,
                csa: isize,
                b: *const Self,
                rsb: isize,
                csb: isize,
                beta: Self,
                c: *mut Self,
                rsc: isize,
                csc: isize,
            ) {
                unsafe {
                    matrixmultiply::$g(m, k, n, alpha, a, rsa, csa, b, rsb, csb, beta, c, rsc, csc);
                }
            }
        }
    };
}

implement_dtype_ops!(f32, sgemm);
implement_dtype_ops!(f64, dgemm);

/// Rectified linear unit, applied elementwise in place.
pub fn relu_in_place<T: DTypeFloat>(data: &mut [T]) {
    for x in data.iter_mut() {
        if *x < T::ZERO {
            *x = T::ZERO;
        }
    }
}

/// Adds a per-channel bias to a batched NCHW activation. `data` holds
/// `batch * channels * spatial` elements; `biases` holds one value per channel.
pub fn bias_add_nchw<T: DTypeFloat>(data: &mut [T], channels: usize, spatial: usize, biases: &[T]) {
    assert_eq!(biases.len(), channels, "Invalid dimensions for bias tensor");
    assert_eq!(data.len() % (channels * spatial), 0, "Invalid dimensions for activation tensor");
    for image in data.chunks_exact_mut(channels * spatial) {
        for (channel, &bias) in image.chunks_exact_mut(spatial).zip(biases) {
            for x in channel.iter_mut() {
                *x += bias;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::math::{DTypeOps, bias_add_nchw, relu_in_place};
    use crate::tensor::{Dim2, Tensor};

    macro_rules! assert_slice_equal {
        ($a:ident, $b:expr) => {{
            let b = $b;
            let a = $a.as_ref();
            if a.len() != b.len() || !std::iter::zip(a, &b).all(|(&i, &j)| (i - j).abs() <= f32::EPSILON) {
                let mismatch: Vec<usize> = std::iter::zip(a, &b)
                    .enumerate()
                    .filter(|&(_, (&i, &j))| (i - j).abs() > f32::EPSILON)
                    .map(|(idx, _)| idx)
                    .collect();
                panic!(
                    "slices not equal: left={:?}, right={:?}, mismatched indexes={:?}",
                    &a, &b, &mismatch
                );
            }
        }};
    }

    #[test]
    fn test_mat_mul() {
        let a = Tensor::from_vec(vec![1., 2., 3., 4., 5., 6.], Dim2(2, 3));
        let b = Tensor::from_vec(vec![7., 8., 9., 10., 11., 12.], Dim2(3, 2));
        let c = Tensor::from_vec(vec![0.5, 1., 1., 0.25], Dim2(2, 2));

        let mut r2x2 = Tensor::filled(0., Dim2(2, 2));
        let mut r2x3 = Tensor::filled(0., Dim2(2, 3));
        let mut r3x2 = Tensor::filled(0., Dim2(3, 2));
        let mut r3x3 = Tensor::filled(0., Dim2(3, 3));

        // various combinations of A X B

        r2x2.fill(100.); // existing values should be ignored
        f32::matrix_multiply(1.0, &a, false, &b, false, 0.0, &mut r2x2, false);
        assert_slice_equal!(r2x2, [58., 64., 139., 154.]);

        r2x2.fill(0.);
        f32::matrix_multiply(0.5, &a, false, &b, false, 0.0, &mut r2x2, false);
        assert_slice_equal!(r2x2, [29., 32., 69.5, 77.]);

        r2x2.fill(1.);
        f32::matrix_multiply(1.0, &a, false, &b, false, 5.0, &mut r2x2, false);
        assert_slice_equal!(r2x2, [63., 69., 144., 159.]);

        // B X A

        r3x3.fill(100.);
        f32::matrix_multiply(1.0, &b, false, &a, false, 0.0, &mut r3x3, false);
        assert_slice_equal!(r3x3, [39., 54., 69., 49., 68., 87., 59., 82., 105.]);

        // C X Bt

        r2x3.fill(100.);
        f32::matrix_multiply(1.0, &c, false, &b, true, 0.0, &mut r2x3, false);
        assert_slice_equal!(r2x3, [11.5, 14.5, 17.5, 9., 11.5, 14.]);

        // At X C

        r3x2.fill(100.);
        f32::matrix_multiply(1.0, &a, true, &c, false, 0.0, &mut r3x2, false);
        assert_slice_equal!(r3x2, [4.5, 2., 6., 3.25, 7.5, 4.5]);

        // At X C -> Rt

        r2x3.fill(100.);
        f32::matrix_multiply(1.0, &a, true, &c, false, 0.0, &mut r2x3, true);
        assert_slice_equal!(r2x3, [4.5, 6., 7.5, 2., 3.25, 4.5]);
    }

    #[test]
    fn test_relu() {
        let mut data = [-1.0f32, 0.0, 2.5, -0.0001, 3.0];
        relu_in_place(&mut data);
        assert_slice_equal!(data, [0.0, 0.0, 2.5, 0.0, 3.0]);
    }

    #[test]
    fn test_bias_add_nchw() {
        // 1 image, 2 channels, 2x1 spatial
        let mut data = [1.0f32, 2.0, 3.0, 4.0];
        bias_add_nchw(&mut data, 2, 2, &[10.0, 20.0]);
        assert_slice_equal!(data, [11.0, 12.0, 23.0, 24.0]);
    }
}
