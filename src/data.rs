use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

use crate::dataset::{DatasetDescriptor, ImageItem};

/// Canonical square resolution every image is resized to.
pub const IMAGE_SIDE: usize = 32;
/// Channel count fed to the network; grayscale sources are replicated.
pub const IMAGE_CHANNELS: usize = 3;

/// Per-channel normalizer built from a dataset descriptor's statistics.
#[derive(Clone, Debug)]
pub struct Normalizer<B: Backend> {
    pub mean: Tensor<B, 4>,
    pub std: Tensor<B, 4>,
}

impl<B: Backend> Normalizer<B> {
    /// Single-channel statistics are broadcast over all input channels, the
    /// same way they apply to a replicated grayscale image.
    pub fn new(desc: &DatasetDescriptor, device: &Device<B>) -> Self {
        let mean = channel_stats(desc.mean);
        let std = channel_stats(desc.std);
        Self {
            mean: Tensor::<B, 1>::from_floats(mean, device).reshape([1, IMAGE_CHANNELS, 1, 1]),
            std: Tensor::<B, 1>::from_floats(std, device).reshape([1, IMAGE_CHANNELS, 1, 1]),
        }
    }

    /// Normalizes an input in the range [0, 1] to `(input - mean) / std`.
    pub fn normalize(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        (input - self.mean.clone()) / self.std.clone()
    }

    /// Returns a new normalizer on the given device.
    pub fn to_device(&self, device: &B::Device) -> Self {
        Self {
            mean: self.mean.clone().to_device(device),
            std: self.std.clone().to_device(device),
        }
    }
}

fn channel_stats(stats: &[f32]) -> [f32; IMAGE_CHANNELS] {
    match stats {
        [value] => [*value; IMAGE_CHANNELS],
        [r, g, b] => [*r, *g, *b],
        _ => panic!("normalization statistics must have one or three channels"),
    }
}

#[derive(Clone)]
pub struct ClassificationBatcher<B: Backend> {
    normalizer: Normalizer<B>,
}

#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ClassificationBatcher<B> {
    pub fn new(desc: &DatasetDescriptor, device: B::Device) -> Self {
        Self {
            normalizer: Normalizer::new(desc, &device),
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ClassificationBatch<B>> for ClassificationBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ClassificationBatch<B> {
        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    TensorData::from([(item.label as i64).elem::<B::IntElem>()]),
                    device,
                )
            })
            .collect();

        let images = items
            .into_iter()
            .map(|item| {
                debug_assert_eq!(item.image.len(), item.channels * item.side * item.side);
                let data = TensorData::new(
                    item.image,
                    Shape::new([item.channels, item.side, item.side]),
                );
                Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), device) / 255
            })
            .collect();

        let images = Tensor::stack(images, 0);
        let [_, channels, height, width] = images.dims();

        // Resize to the canonical resolution before channel replication and
        // normalization, mirroring the per-image preprocessing order.
        let images = if height == IMAGE_SIDE && width == IMAGE_SIDE {
            images
        } else {
            interpolate(
                images,
                [IMAGE_SIDE, IMAGE_SIDE],
                InterpolateOptions::new(InterpolateMode::Bilinear),
            )
        };
        let images = if channels == 1 {
            images.repeat_dim(1, IMAGE_CHANNELS)
        } else {
            images
        };
        let images = self.normalizer.to_device(device).normalize(images);

        ClassificationBatch {
            images,
            targets: Tensor::cat(targets, 0),
        }
    }
}
