use rand::Rng;
use rcaps::data::{CHANNELS, IMAGE_SIZE, NUM_CLASSES, SvhnData};
use rcaps::tensor::{Dim4, Tensor};
use std::cmp::Ordering;

/// Generates a stand-in dataset with the SVHN shape: each image is noise
/// around a class-specific color, so a model has a learnable (if trivial)
/// signal and the full input pipeline gets exercised.
pub fn synthetic_svhn_data<R: Rng>(count: usize, rng: &mut R) -> SvhnData {
    let mut images = Vec::with_capacity(count * IMAGE_SIZE * IMAGE_SIZE * CHANNELS);
    let mut labels = Vec::with_capacity(count);
    for _ in 0..count {
        let class = rng.gen_range(0..NUM_CLASSES as u8);
        let base = [
            25u8.wrapping_mul(class),
            255 - 25 * class,
            128u8.wrapping_add(13 * class),
        ];
        for _ in 0..IMAGE_SIZE * IMAGE_SIZE {
            for &b in &base {
                let noise: i16 = rng.gen_range(-20..=20);
                images.push((b as i16 + noise).clamp(0, 255) as u8);
            }
        }
        labels.push(class);
    }
    SvhnData::new(
        Tensor::from_vec(images, Dim4(count, IMAGE_SIZE, IMAGE_SIZE, CHANNELS)),
        Tensor::from_vec_1d(labels),
    )
}

pub fn max_index<T: Copy + PartialOrd>(a: &[T]) -> usize {
    a.iter()
        .enumerate()
        .max_by(|&(_, &a), &(_, &b)| {
            if a < b {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        })
        .expect("expected at least one element")
        .0
}

#[cfg(test)]
mod test {
    use super::{max_index, synthetic_svhn_data};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_max_index() {
        assert_eq!(max_index(&[0.1, 0.9, 0.3]), 1);
        assert_eq!(max_index(&[5.0]), 0);
    }

    #[test]
    fn test_synthetic_data_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let data = synthetic_svhn_data(12, &mut rng);
        assert_eq!(data.len(), 12);
    }
}
