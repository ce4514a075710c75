use crate::dtype::DTypeFloat;
use crate::tensor::{Dim1, Dim2, Dim3, Dim4, ITensor, Tensor, Tensor1, Tensor2, Tensor4, TensorView};
use rand::Rng;
use rand::seq::SliceRandom;

/// Stored image edge length.
pub const IMAGE_SIZE: usize = 32;
/// Edge length after cropping.
pub const CROP_SIZE: usize = 24;
pub const CHANNELS: usize = 3;
pub const NUM_CLASSES: usize = 10;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Split {
    /// Shuffled order, random crops.
    Train,
    /// Stored order, central crops.
    Test,
}

/// A set of 32x32 RGB house-number images in HWC layout with digit labels.
pub struct SvhnData {
    /// `[count, 32, 32, 3]`
    images: Tensor4<u8>,
    labels: Tensor1<u8>,
}

impl SvhnData {
    pub fn new(images: Tensor4<u8>, labels: Tensor1<u8>) -> Self {
        let &Dim4(count, height, width, channels) = images.dims();
        assert_eq!(
            (height, width, channels),
            (IMAGE_SIZE, IMAGE_SIZE, CHANNELS),
            "Invalid dimensions for image tensor"
        );
        assert_eq!(labels.dims(), &Dim1(count), "Invalid dimensions for label tensor");
        assert!(
            labels.as_ref().iter().all(|&l| (l as usize) < NUM_CLASSES),
            "label out of range"
        );
        SvhnData { images, labels }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.images.dims().0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn image(&self, index: usize) -> TensorView<'_, u8, Dim3> {
        let image_len = IMAGE_SIZE * IMAGE_SIZE * CHANNELS;
        TensorView::from_slice(
            &self.images.as_ref()[index * image_len..(index + 1) * image_len],
            Dim3(IMAGE_SIZE, IMAGE_SIZE, CHANNELS),
        )
    }

    #[inline]
    pub fn label(&self, index: usize) -> u8 {
        self.labels.as_ref()[index]
    }

    /// Prepares model-ready batches: crops to 24x24 (randomly for
    /// [`Split::Train`], centrally for [`Split::Test`]), scales channel values
    /// to [0, 1], reorders to CHW and one-hot encodes the labels. The final
    /// batch may be smaller than `batch_size`.
    pub fn batches<T: DTypeFloat, R: Rng>(&self, split: Split, batch_size: usize, rng: &mut R) -> Vec<Batch<T>> {
        assert!(batch_size >= 1, "batch size must be at least 1");
        let mut order: Vec<usize> = (0..self.len()).collect();
        if split == Split::Train {
            order.shuffle(rng);
        }

        let scale = T::from_f64(1.0 / 255.0);
        let margin = IMAGE_SIZE - CROP_SIZE;
        order
            .chunks(batch_size)
            .map(|chunk| {
                let mut images = Vec::with_capacity(chunk.len() * CHANNELS * CROP_SIZE * CROP_SIZE);
                let mut labels = vec![T::ZERO; chunk.len() * NUM_CLASSES];
                for (slot, &index) in chunk.iter().enumerate() {
                    let (top, left) = match split {
                        Split::Train => (rng.gen_range(0..=margin), rng.gen_range(0..=margin)),
                        Split::Test => (margin / 2, margin / 2),
                    };
                    let img = self.image(index);
                    let src = img.as_ref();
                    for c in 0..CHANNELS {
                        for y in 0..CROP_SIZE {
                            for x in 0..CROP_SIZE {
                                let hwc = ((top + y) * IMAGE_SIZE + left + x) * CHANNELS + c;
                                images.push(T::from_usize(src[hwc] as usize) * scale);
                            }
                        }
                    }
                    labels[slot * NUM_CLASSES + self.label(index) as usize] = T::ONE;
                }
                Batch {
                    images: Tensor::from_vec(images, Dim4(chunk.len(), CHANNELS, CROP_SIZE, CROP_SIZE)),
                    labels: Tensor::from_vec(labels, Dim2(chunk.len(), NUM_CLASSES)),
                }
            })
            .collect()
    }
}

/// One batch of preprocessed images `[batch, 3, 24, 24]` with one-hot labels
/// `[batch, 10]`.
pub struct Batch<T> {
    pub images: Tensor4<T>,
    pub labels: Tensor2<T>,
}
