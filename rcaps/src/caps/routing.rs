use crate::caps::squash::squash_in_place;
use crate::dtype::DTypeFloat;
use crate::tensor::{Dim2, Dim3, Dim4, Dim5, Dim6, Dims, ITensor, Tensor, Tensor2, Tensor4, Tensor6};
use crate::visual::Diagnostics;

/// Configuration for routing-by-agreement.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RoutingParams {
    /// Number of agreement iterations; must be at least 1.
    pub iterations: usize,
    /// Adds a constant-zero leak channel to the softmax so an input capsule
    /// can route to "none of the above" instead of fully committing to one
    /// output capsule. The leaked mass uniformly scales down all real
    /// coefficients.
    pub leaky: bool,
}

impl Default for RoutingParams {
    fn default() -> Self {
        RoutingParams {
            iterations: 3,
            leaky: false,
        }
    }
}

/// Activations produced by every routing iteration. The final iteration is the
/// layer output; earlier ones are kept for inspection.
pub struct RoutingOutput<T, D: Dims> {
    pub iterations: Vec<Tensor<T, D>>,
}

impl<T, D: Dims> RoutingOutput<T, D> {
    pub fn final_activation(&self) -> &Tensor<T, D> {
        self.iterations.last().unwrap()
    }

    pub fn into_final_activation(mut self) -> Tensor<T, D> {
        self.iterations.pop().unwrap()
    }
}

/// Vote layout shared by the fully connected and convolutional forms: the
/// trailing spatial axes (none for dense votes, two for convolutional votes)
/// are flattened into a single extent, so one code path serves both ranks.
#[derive(Copy, Clone, Debug)]
struct VoteGeometry {
    batch: usize,
    in_dim: usize,
    out_dim: usize,
    atoms: usize,
    spatial: usize,
}

/// Routes dense votes `[batch, in_dim, out_dim, out_atoms]` with biases
/// `[out_dim, out_atoms]`, producing activations `[batch, out_dim, out_atoms]`
/// per iteration.
pub fn route_dense<T: DTypeFloat>(
    votes: &Tensor4<T>,
    biases: &Tensor2<T>,
    params: &RoutingParams,
    mut diag: Option<&mut Diagnostics<T>>,
) -> RoutingOutput<T, Dim3> {
    let &Dim4(batch, in_dim, out_dim, atoms) = votes.dims();
    assert_eq!(
        biases.dims(),
        &Dim2(out_dim, atoms),
        "Invalid dimensions for bias tensor"
    );
    let geometry = VoteGeometry {
        batch,
        in_dim,
        out_dim,
        atoms,
        spatial: 1,
    };
    let iterations = update_routing(
        votes.as_ref(),
        biases.as_ref(),
        geometry,
        params,
        &[batch, in_dim, out_dim],
        diag.as_deref_mut(),
    );
    let iterations: Vec<_> = iterations
        .into_iter()
        .map(|data| Tensor::from_vec(data, Dim3(batch, out_dim, atoms)))
        .collect();
    if let Some(d) = diag {
        for (i, activation) in iterations.iter().enumerate() {
            d.record(format!("routing/activations/{i}"), activation);
        }
    }
    RoutingOutput { iterations }
}

/// Routes convolutional votes `[batch, in_dim, out_dim, out_atoms, H, W]` with
/// spatially tiled biases `[out_dim, out_atoms, H, W]`, producing activations
/// `[batch, out_dim, out_atoms, H, W]` per iteration.
pub fn route_conv<T: DTypeFloat>(
    votes: &Tensor6<T>,
    biases: &Tensor4<T>,
    params: &RoutingParams,
    mut diag: Option<&mut Diagnostics<T>>,
) -> RoutingOutput<T, Dim5> {
    let &Dim6(batch, in_dim, out_dim, atoms, height, width) = votes.dims();
    assert_eq!(
        biases.dims(),
        &Dim4(out_dim, atoms, height, width),
        "Invalid dimensions for bias tensor"
    );
    let geometry = VoteGeometry {
        batch,
        in_dim,
        out_dim,
        atoms,
        spatial: height * width,
    };
    let iterations = update_routing(
        votes.as_ref(),
        biases.as_ref(),
        geometry,
        params,
        &[batch, in_dim, out_dim, height, width],
        diag.as_deref_mut(),
    );
    let iterations: Vec<_> = iterations
        .into_iter()
        .map(|data| Tensor::from_vec(data, Dim5(batch, out_dim, atoms, height, width)))
        .collect();
    if let Some(d) = diag {
        for (i, activation) in iterations.iter().enumerate() {
            d.record(format!("routing/activations/{i}"), activation);
        }
    }
    RoutingOutput { iterations }
}

/// Iteratively refines routing logits from vote/activation agreement and
/// returns each iteration's activation as `[batch, out_dim, atoms, spatial]`
/// data.
///
/// Votes are laid out `[batch, in_dim, out_dim, atoms, spatial]`, logits and
/// coefficients `[batch, in_dim, out_dim, spatial]`, biases
/// `[out_dim, atoms, spatial]`. Logits start at zero on every call.
fn update_routing<T: DTypeFloat>(
    votes: &[T],
    biases: &[T],
    g: VoteGeometry,
    params: &RoutingParams,
    coefficient_dims: &[usize],
    mut diag: Option<&mut Diagnostics<T>>,
) -> Vec<Vec<T>> {
    let VoteGeometry {
        batch,
        in_dim,
        out_dim,
        atoms,
        spatial,
    } = g;
    assert!(params.iterations >= 1, "routing requires at least one iteration");
    assert!(in_dim >= 1, "routing requires at least one input capsule type");
    assert!(out_dim >= 1, "routing requires at least one output capsule type");
    assert_eq!(
        votes.len(),
        batch * in_dim * out_dim * atoms * spatial,
        "Invalid dimensions for vote tensor"
    );
    assert_eq!(
        biases.len(),
        out_dim * atoms * spatial,
        "Invalid dimensions for bias tensor"
    );

    let mut logits = vec![T::ZERO; batch * in_dim * out_dim * spatial];
    let mut coefficients = vec![T::ZERO; logits.len()];
    let mut activations = Vec::with_capacity(params.iterations);

    for iteration in 0..params.iterations {
        // softmax over the output-capsule axis, independently per input
        // capsule, batch element, and spatial position
        for bi in 0..batch * in_dim {
            for p in 0..spatial {
                let base = bi * out_dim * spatial + p;
                let mut max = logits[base];
                for j in 1..out_dim {
                    let l = logits[base + j * spatial];
                    if l > max {
                        max = l;
                    }
                }
                if params.leaky && T::ZERO > max {
                    max = T::ZERO;
                }
                // the leak channel contributes exp(0) to the denominator and
                // its share of the mass is discarded
                let mut denom = if params.leaky {
                    (T::ZERO - max).exp()
                } else {
                    T::ZERO
                };
                for j in 0..out_dim {
                    let e = (logits[base + j * spatial] - max).exp();
                    coefficients[base + j * spatial] = e;
                    denom += e;
                }
                for j in 0..out_dim {
                    coefficients[base + j * spatial] /= denom;
                }
            }
        }

        if let Some(d) = diag.as_deref_mut() {
            d.record_parts(
                format!("routing/coefficients/{iteration}"),
                coefficient_dims.to_vec(),
                coefficients.clone(),
            );
        }

        // coefficient-weighted vote sum over input capsules, plus bias
        let mut activation = vec![T::ZERO; batch * out_dim * atoms * spatial];
        for b in 0..batch {
            for i in 0..in_dim {
                let bi = b * in_dim + i;
                for j in 0..out_dim {
                    let vote_base = ((bi * out_dim + j) * atoms) * spatial;
                    let coeff_base = (bi * out_dim + j) * spatial;
                    let act_base = ((b * out_dim + j) * atoms) * spatial;
                    for a in 0..atoms {
                        for p in 0..spatial {
                            activation[act_base + a * spatial + p] +=
                                coefficients[coeff_base + p] * votes[vote_base + a * spatial + p];
                        }
                    }
                }
            }
            let act = &mut activation[b * out_dim * atoms * spatial..(b + 1) * out_dim * atoms * spatial];
            for (x, &bias) in act.iter_mut().zip(biases) {
                *x += bias;
            }
        }
        squash_in_place(&mut activation, atoms, spatial);

        // agreement update: dot product between each original vote and the
        // new activation, accumulated into the logits
        for b in 0..batch {
            for i in 0..in_dim {
                let bi = b * in_dim + i;
                for j in 0..out_dim {
                    let vote_base = ((bi * out_dim + j) * atoms) * spatial;
                    let act_base = ((b * out_dim + j) * atoms) * spatial;
                    let logit_base = (bi * out_dim + j) * spatial;
                    for p in 0..spatial {
                        let mut agreement = T::ZERO;
                        for a in 0..atoms {
                            agreement += votes[vote_base + a * spatial + p] * activation[act_base + a * spatial + p];
                        }
                        logits[logit_base + p] += agreement;
                    }
                }
            }
        }

        activations.push(activation);
    }

    activations
}

#[cfg(test)]
mod test {
    use super::{RoutingParams, route_conv, route_dense};
    use crate::caps::squash;
    use crate::tensor::{Dim2, Dim3, Dim4, Dim5, Dim6, ITensor, Tensor, TensorBase};
    use crate::visual::Diagnostics;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::StandardNormal;

    fn coefficient_sums(diag: &Diagnostics<f64>, iteration: usize, out_dim: usize) -> Vec<f64> {
        let rec = diag.get(&format!("routing/coefficients/{iteration}")).unwrap();
        let spatial: usize = rec.dims[3..].iter().product();
        let groups = rec.data.len() / (out_dim * spatial);
        let mut sums = vec![0.0; groups * spatial];
        for (g, chunk) in rec.data.chunks_exact(out_dim * spatial).enumerate() {
            for j in 0..out_dim {
                for p in 0..spatial {
                    sums[g * spatial + p] += chunk[j * spatial + p];
                }
            }
        }
        sums
    }

    #[test]
    fn test_dense_shapes_and_coefficient_sums() {
        let mut rng = StdRng::seed_from_u64(0x7ca5);
        let votes = Tensor::from_distribution(&mut rng, StandardNormal, Dim4(1, 2, 3, 5));
        let biases: Tensor<f64, Dim2> = Tensor::zeroed(Dim2(3, 5));
        let params = RoutingParams {
            iterations: 3,
            leaky: false,
        };
        let mut diag = Diagnostics::new();
        let out = route_dense(&votes, &biases, &params, Some(&mut diag));
        assert_eq!(out.iterations.len(), 3);
        assert_eq!(out.final_activation().dims(), &Dim3(1, 3, 5));
        for iteration in 0..3 {
            for sum in coefficient_sums(&diag, iteration, 3) {
                assert!((sum - 1.0).abs() < 1e-12, "coefficients sum to {sum}");
            }
        }
    }

    #[test]
    fn test_single_iteration_is_uniform() {
        let mut rng = StdRng::seed_from_u64(1);
        let votes: Tensor<f64, Dim4> = Tensor::from_distribution(&mut rng, StandardNormal, Dim4(2, 4, 3, 2));
        let biases = Tensor::zeroed(Dim2(3, 2));
        let params = RoutingParams {
            iterations: 1,
            leaky: false,
        };
        let mut diag = Diagnostics::new();
        route_dense(&votes, &biases, &params, Some(&mut diag));
        let rec = diag.get("routing/coefficients/0").unwrap();
        for &c in &rec.data {
            assert!((c - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_single_iteration_matches_uniform_sum() {
        // with zero logits the first activation is squash(mean of votes + bias)
        let votes = Tensor::from_vec(
            vec![
                1.0, 2.0, // i=0, j=0
                -1.0, 0.5, // i=0, j=1
                3.0, -2.0, // i=1, j=0
                0.0, 1.0, // i=1, j=1
            ],
            Dim4(1, 2, 2, 2),
        );
        let biases = Tensor::from_vec(vec![0.1, -0.1, 0.2, 0.0], Dim2(2, 2));
        let params = RoutingParams {
            iterations: 1,
            leaky: false,
        };
        let out = route_dense(&votes, &biases, &params, None);

        let expected_pre = Tensor::from_vec(
            vec![
                0.5 * (1.0 + 3.0) + 0.1,
                0.5 * (2.0 - 2.0) - 0.1,
                0.5 * (-1.0 + 0.0) + 0.2,
                0.5 * (0.5 + 1.0) + 0.0,
            ],
            Dim3(1, 2, 2),
        );
        let expected = squash(&expected_pre);
        assert_abs_diff_eq!(out.final_activation(), &expected, epsilon = 1e-12);
    }

    #[test]
    fn test_output_shape_independent_of_iterations() {
        let mut rng = StdRng::seed_from_u64(2);
        let votes: Tensor<f64, Dim4> = Tensor::from_distribution(&mut rng, StandardNormal, Dim4(2, 3, 4, 6));
        let biases = Tensor::zeroed(Dim2(4, 6));
        for iterations in [1, 2, 5] {
            let params = RoutingParams {
                iterations,
                leaky: false,
            };
            let out = route_dense(&votes, &biases, &params, None);
            assert_eq!(out.iterations.len(), iterations);
            assert_eq!(out.final_activation().dims(), &Dim3(2, 4, 6));
        }
    }

    #[test]
    fn test_leaky_sums_below_one_and_rising() {
        // all votes agree, so real logits grow and the leak loses mass
        let votes = Tensor::from_vec(vec![1.0; 2 * 5 * 3], Dim4(1, 2, 5, 3));
        let biases = Tensor::zeroed(Dim2(5, 3));
        let params = RoutingParams {
            iterations: 4,
            leaky: true,
        };
        let mut diag = Diagnostics::new();
        route_dense(&votes, &biases, &params, Some(&mut diag));
        let mut prev = 0.0;
        for iteration in 0..4 {
            for sum in coefficient_sums(&diag, iteration, 5) {
                assert!(sum > 0.0 && sum < 1.0, "leaky sum {sum} not in (0, 1)");
                assert!(sum > prev, "leaky sum {sum} did not rise above {prev}");
            }
            prev = coefficient_sums(&diag, iteration, 5)[0];
        }
        // first iteration leaks exactly one uniform share
        let first = coefficient_sums(&diag, 0, 5)[0];
        assert!((first - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_agreement_concentrates_coefficients() {
        // input capsule votes exactly like output capsule 0's consensus and
        // against capsule 1, so iteration drives weight toward capsule 0
        let votes: Tensor<f64, Dim4> = Tensor::from_vec(
            vec![
                2.0, 2.0, // j=0
                -2.0, -2.0, // j=1
            ],
            Dim4(1, 1, 2, 2),
        );
        let biases = Tensor::zeroed(Dim2(2, 2));
        let params = RoutingParams {
            iterations: 3,
            leaky: false,
        };
        let mut diag = Diagnostics::new();
        route_dense(&votes, &biases, &params, Some(&mut diag));
        let first = diag.get("routing/coefficients/0").unwrap().data.clone();
        let last = diag.get("routing/coefficients/2").unwrap().data.clone();
        assert!((first[0] - 0.5).abs() < 1e-12);
        assert!(last[0] > 0.9, "coefficient {} did not concentrate", last[0]);
        assert!(last[1] < 0.1);
    }

    #[test]
    fn test_conv_shapes_and_coefficient_sums() {
        let mut rng = StdRng::seed_from_u64(3);
        let votes: Tensor<f64, Dim6> = Tensor::from_distribution(&mut rng, StandardNormal, Dim6(1, 2, 3, 4, 2, 2));
        let biases = Tensor::zeroed(Dim4(3, 4, 2, 2));
        let params = RoutingParams {
            iterations: 2,
            leaky: false,
        };
        let mut diag = Diagnostics::new();
        let out = route_conv(&votes, &biases, &params, Some(&mut diag));
        assert_eq!(out.final_activation().dims(), &Dim5(1, 3, 4, 2, 2));
        let rec = diag.get("routing/coefficients/0").unwrap();
        assert_eq!(rec.dims, vec![1, 2, 3, 2, 2]);
        for iteration in 0..2 {
            for sum in coefficient_sums(&diag, iteration, 3) {
                assert!((sum - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_activations_stay_below_unit_norm() {
        let votes = Tensor::from_vec(vec![100.0; 1 * 2 * 2 * 4], Dim4(1, 2, 2, 4));
        let biases = Tensor::zeroed(Dim2(2, 4));
        let params = RoutingParams::default();
        let out = route_dense(&votes, &biases, &params, None);
        for activation in &out.iterations {
            for capsule in activation.as_ref().chunks_exact(4) {
                let norm: f64 = capsule.iter().map(|x| x * x).sum::<f64>().sqrt();
                assert!(norm < 1.0);
            }
        }
    }

    #[test]
    #[should_panic(expected = "at least one iteration")]
    fn test_zero_iterations_rejected() {
        let votes: Tensor<f64, Dim4> = Tensor::zeroed(Dim4(1, 1, 1, 1));
        let biases = Tensor::zeroed(Dim2(1, 1));
        let params = RoutingParams {
            iterations: 0,
            leaky: false,
        };
        route_dense(&votes, &biases, &params, None);
    }

    #[test]
    #[should_panic(expected = "Invalid dimensions for bias tensor")]
    fn test_mismatched_biases_rejected() {
        let votes: Tensor<f64, Dim4> = Tensor::zeroed(Dim4(1, 2, 3, 4));
        let biases = Tensor::zeroed(Dim2(3, 5));
        route_dense(&votes, &biases, &RoutingParams::default(), None);
    }
}
