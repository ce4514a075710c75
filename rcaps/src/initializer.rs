use crate::dtype::DType;
use crate::tensor::{Dims, Tensor};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Source of freshly initialized layer parameters. Layers only depend on the
/// shape contract; the initialization policy lives behind this trait.
pub trait ParamInitializer<T: DType> {
    fn weights<D: Dims>(&mut self, dims: D, fan_in: usize, fan_out: usize) -> Tensor<T, D>;
    fn biases<D: Dims>(&mut self, dims: D) -> Tensor<T, D>;
}

/// Truncated-normal weights (resampled beyond two standard deviations) and
/// zero biases. The standard deviation defaults to sqrt(2 / (fan_in + fan_out))
/// unless fixed with [`RandomInitializer::with_stddev`].
pub struct RandomInitializer {
    rng: StdRng,
    stddev: Option<f64>,
}

impl RandomInitializer {
    pub fn seed_from_u64(seed: u64) -> Self {
        RandomInitializer {
            rng: StdRng::seed_from_u64(seed),
            stddev: None,
        }
    }

    pub fn with_stddev(mut self, stddev: f64) -> Self {
        assert!(stddev > 0.0, "stddev must be positive");
        self.stddev = Some(stddev);
        self
    }
}

impl Default for RandomInitializer {
    fn default() -> Self {
        RandomInitializer {
            rng: StdRng::from_entropy(),
            stddev: None,
        }
    }
}

impl<T: DType> ParamInitializer<T> for RandomInitializer {
    fn weights<D: Dims>(&mut self, dims: D, fan_in: usize, fan_out: usize) -> Tensor<T, D> {
        let std = self
            .stddev
            .unwrap_or_else(|| (2.0 / (fan_in + fan_out).max(1) as f64).sqrt());
        let dist = Normal::new(0.0, std).unwrap();
        let limit = 2.0 * std;
        let data: Vec<T> = (0..dims.tensor_len())
            .map(|_| {
                let mut x = dist.sample(&mut self.rng);
                while x.abs() > limit {
                    x = dist.sample(&mut self.rng);
                }
                T::from_f64(x)
            })
            .collect();
        Tensor::from_vec(data, dims)
    }

    fn biases<D: Dims>(&mut self, dims: D) -> Tensor<T, D> {
        Tensor::zeroed(dims)
    }
}
