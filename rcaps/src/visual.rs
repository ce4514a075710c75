use crate::dtype::DTypeFloat;
use crate::tensor::{Dim3, Dims, ITensor, Tensor, Tensor3, TensorBase};

/// A named tensor snapshot captured during a forward pass.
pub struct TensorRecord<T> {
    pub name: String,
    pub dims: Vec<usize>,
    pub data: Vec<T>,
}

/// Collects named tensors published by layers for downstream inspection.
///
/// Callers that want intermediate tensors (routing coefficients, convolutional
/// votes, pre-activations) pass `Some(&mut diagnostics)` into the forward
/// methods; passing `None` skips all snapshot copies.
pub struct Diagnostics<T> {
    records: Vec<TensorRecord<T>>,
}

impl<T> Diagnostics<T> {
    pub fn new() -> Self {
        Diagnostics { records: Vec::new() }
    }

    pub fn record<V, D>(&mut self, name: impl Into<String>, tensor: &V)
    where
        V: TensorBase<T, D>,
        D: Dims,
        T: Clone,
    {
        self.record_parts(name, tensor.dims().as_vec(), tensor.as_ref().to_vec());
    }

    pub(crate) fn record_parts(&mut self, name: impl Into<String>, dims: Vec<usize>, data: Vec<T>) {
        self.records.push(TensorRecord {
            name: name.into(),
            dims,
            data,
        });
    }

    pub fn get(&self, name: &str) -> Option<&TensorRecord<T>> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TensorRecord<T>> {
        self.records.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<TensorRecord<T>> {
        self.records
    }
}

impl<T> Default for Diagnostics<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reorders a CHW image into HWC layout.
pub fn chw_to_hwc<T, V>(img: &V) -> Tensor3<T>
where
    T: Copy,
    V: TensorBase<T, Dim3>,
{
    let &Dim3(channels, height, width) = img.dims();
    let data = img.as_ref();
    let mut out = Vec::with_capacity(data.len());
    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                out.push(data[(c * height + y) * width + x]);
            }
        }
    }
    Tensor::from_vec(out, Dim3(height, width, channels))
}

const STD_FLOOR: f64 = 1e-4;

/// Standardizes an image for display: zero-centers it, divides by its standard
/// deviation (floored to avoid division by zero), scales by `s` and shifts the
/// mean to 0.5.
pub fn standardize_image<T, V>(img: &V, s: T) -> Tensor3<T>
where
    T: DTypeFloat,
    V: TensorBase<T, Dim3>,
{
    let data = img.as_ref();
    let count = T::from_usize(data.len().max(1));
    let mut mean = T::ZERO;
    for &x in data {
        mean += x;
    }
    mean = mean / count;
    let mut var = T::ZERO;
    for &x in data {
        let d = x - mean;
        var += d * d;
    }
    let std = (var / count).sqrt().max(T::from_f64(STD_FLOOR));
    let half = T::from_f64(0.5);
    let out = data.iter().map(|&x| (x - mean) / std * s + half).collect();
    Tensor::from_vec(out, *img.dims())
}

/// Clamps a standardized image to [0, 1] and converts to 8-bit channel values.
pub fn to_rgb_bytes<T, V>(img: &V) -> Vec<u8>
where
    T: DTypeFloat,
    V: TensorBase<T, Dim3>,
{
    img.as_ref()
        .iter()
        .map(|&x| {
            let clamped = x.max(T::ZERO).min(T::ONE);
            (clamped.to_f64().unwrap_or(0.0) * 255.0) as u8
        })
        .collect()
}
