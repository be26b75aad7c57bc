use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use burn::data::dataset::transform::PartialDataset;
use burn::data::dataset::InMemDataset;
use serde::{Deserialize, Serialize};

mod cifar;
mod download;
mod idx;
mod svhn;

/// A single image with its class label, stored channel-major (CHW).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ImageItem {
    /// Raw pixel bytes, `channels * side * side` long.
    pub image: Vec<u8>,
    /// Number of stored channels (1 for the grayscale sources, 3 otherwise).
    pub channels: usize,
    /// Square edge length of the stored image.
    pub side: usize,
    /// Integer class label.
    pub label: u8,
}

/// On-disk encoding of a dataset's raw files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    /// Gzipped IDX image/label pairs (MNIST and its drop-in relatives).
    Idx,
    /// Tarred binary batches of fixed-size label+pixel records.
    CifarBinary,
    /// MATLAB 5 container with `X`/`y` uint8 arrays (SVHN cropped digits).
    SvhnMat,
}

/// Static per-dataset configuration, fixed for the whole run.
///
/// `train_range` and `valid_range` select disjoint index ranges of the raw
/// training pool; the test pool is held out separately and truncated to
/// `test_size` examples.
#[derive(Clone, Debug)]
pub struct DatasetDescriptor {
    pub name: &'static str,
    pub format: SourceFormat,
    /// Per-channel normalization mean; a single entry is broadcast over the
    /// three network input channels.
    pub mean: &'static [f32],
    /// Per-channel normalization standard deviation.
    pub std: &'static [f32],
    pub train_range: Range<usize>,
    pub valid_range: Range<usize>,
    pub test_size: usize,
    pub num_classes: usize,
}

/// The six benchmark datasets, in their fixed evaluation order.
pub fn descriptors() -> [DatasetDescriptor; 6] {
    [
        DatasetDescriptor {
            name: "MNIST",
            format: SourceFormat::Idx,
            mean: &[0.1307],
            std: &[0.3081],
            train_range: 0..50_000,
            valid_range: 50_000..60_000,
            test_size: 10_000,
            num_classes: 10,
        },
        DatasetDescriptor {
            name: "FashionMNIST",
            format: SourceFormat::Idx,
            mean: &[0.1307],
            std: &[0.3081],
            train_range: 0..50_000,
            valid_range: 50_000..60_000,
            test_size: 10_000,
            num_classes: 10,
        },
        DatasetDescriptor {
            name: "KMNIST",
            format: SourceFormat::Idx,
            mean: &[0.1307],
            std: &[0.3081],
            train_range: 0..50_000,
            valid_range: 50_000..60_000,
            test_size: 10_000,
            num_classes: 10,
        },
        DatasetDescriptor {
            name: "CIFAR10",
            format: SourceFormat::CifarBinary,
            mean: &[0.4914, 0.4822, 0.4465],
            std: &[0.2023, 0.1994, 0.2010],
            train_range: 0..40_000,
            valid_range: 40_000..50_000,
            test_size: 10_000,
            num_classes: 10,
        },
        DatasetDescriptor {
            name: "CIFAR100",
            format: SourceFormat::CifarBinary,
            mean: &[0.5071, 0.4865, 0.4409],
            std: &[0.2673, 0.2564, 0.2762],
            train_range: 0..40_000,
            valid_range: 40_000..50_000,
            test_size: 10_000,
            num_classes: 100,
        },
        DatasetDescriptor {
            name: "SVHN",
            format: SourceFormat::SvhnMat,
            mean: &[0.5, 0.5, 0.5],
            std: &[0.5, 0.5, 0.5],
            train_range: 0..4_000,
            valid_range: 4_000..5_000,
            test_size: 8_000,
            num_classes: 10,
        },
    ]
}

/// Number of examples each split keeps in smoke mode.
const SMOKE_SPLIT_LEN: usize = 10;

/// Whether the run exercises the full splits or the truncated smoke splits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    Smoke,
    Full,
}

impl RunMode {
    pub fn num_epochs(self) -> usize {
        match self {
            RunMode::Smoke => 2,
            RunMode::Full => 20,
        }
    }

    /// Restricts a split's index range to its first examples in smoke mode.
    fn clamp(self, range: Range<usize>) -> Range<usize> {
        match self {
            RunMode::Full => range,
            RunMode::Smoke => {
                let len = range.len().min(SMOKE_SPLIT_LEN);
                range.start..range.start + len
            }
        }
    }
}

pub type Pool = Arc<InMemDataset<ImageItem>>;

/// A contiguous index-range view over a shared in-memory pool.
pub type SplitView = PartialDataset<Pool, ImageItem>;

/// The three data sources for one (dataset, run) combination.
pub struct DatasetSplits {
    pub train: SplitView,
    pub valid: SplitView,
    pub test: SplitView,
}

/// A decoded dataset with its split ranges resolved for the run mode.
///
/// Pools are reference-counted so fresh split views can be handed to each
/// activation variant without re-reading the cache.
pub struct ProvisionedDataset {
    train_pool: Pool,
    test_pool: Pool,
    train_range: Range<usize>,
    valid_range: Range<usize>,
    test_len: usize,
}

impl ProvisionedDataset {
    pub fn splits(&self) -> DatasetSplits {
        DatasetSplits {
            train: PartialDataset::new(
                self.train_pool.clone(),
                self.train_range.start,
                self.train_range.end,
            ),
            valid: PartialDataset::new(
                self.train_pool.clone(),
                self.valid_range.start,
                self.valid_range.end,
            ),
            test: PartialDataset::new(self.test_pool.clone(), 0, self.test_len),
        }
    }
}

/// Downloads (when absent), decodes and splits one dataset.
///
/// Train and validation are disjoint views over the same training pool; the
/// test pool is held out. Any download or decode failure is fatal.
pub fn provision(
    desc: &DatasetDescriptor,
    cache_dir: &Path,
    mode: RunMode,
) -> Result<ProvisionedDataset> {
    let (train_items, test_items) = match desc.format {
        SourceFormat::Idx => idx::load(desc.name, cache_dir),
        SourceFormat::CifarBinary => cifar::load(desc.name, cache_dir),
        SourceFormat::SvhnMat => svhn::load(cache_dir),
    }
    .with_context(|| format!("failed to load raw data for {}", desc.name))?;

    let train_range = mode.clamp(desc.train_range.clone());
    let valid_range = mode.clamp(desc.valid_range.clone());
    let test_len = mode.clamp(0..desc.test_size).end;

    ensure!(
        valid_range.end <= train_items.len(),
        "{}: training pool has {} examples, but the validation range ends at {}",
        desc.name,
        train_items.len(),
        valid_range.end,
    );
    ensure!(
        test_len <= test_items.len(),
        "{}: test pool has {} examples, but {} were requested",
        desc.name,
        test_items.len(),
        test_len,
    );

    log::info!(
        "{}: {} train / {} validation / {} test examples",
        desc.name,
        train_range.len(),
        valid_range.len(),
        test_len,
    );

    Ok(ProvisionedDataset {
        train_pool: Arc::new(InMemDataset::new(train_items)),
        test_pool: Arc::new(InMemDataset::new(test_items)),
        train_range,
        valid_range,
        test_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataset::Dataset;

    fn item(label: u8) -> ImageItem {
        ImageItem {
            image: vec![0; 4],
            channels: 1,
            side: 2,
            label,
        }
    }

    #[test]
    fn split_ranges_are_disjoint_and_within_the_pool() {
        for desc in descriptors() {
            assert!(desc.train_range.end <= desc.valid_range.start, "{}", desc.name);
            let nominal_pool = desc.valid_range.end;
            assert!(desc.train_range.end <= nominal_pool, "{}", desc.name);
            assert!(desc.valid_range.end <= nominal_pool, "{}", desc.name);
            assert!(!desc.train_range.is_empty(), "{}", desc.name);
            assert!(!desc.valid_range.is_empty(), "{}", desc.name);
        }
    }

    #[test]
    fn normalization_stats_have_one_or_three_channels() {
        for desc in descriptors() {
            assert!(matches!(desc.mean.len(), 1 | 3), "{}", desc.name);
            assert_eq!(desc.mean.len(), desc.std.len(), "{}", desc.name);
        }
    }

    #[test]
    fn smoke_mode_keeps_the_first_ten_of_each_split() {
        assert_eq!(RunMode::Smoke.clamp(50_000..60_000), 50_000..50_010);
        assert_eq!(RunMode::Smoke.clamp(0..4), 0..4);
        assert_eq!(RunMode::Full.clamp(0..40_000), 0..40_000);
    }

    #[test]
    fn split_views_share_the_pool_without_overlap() {
        let items: Vec<ImageItem> = (0..20).map(|i| item(i as u8)).collect();
        let provisioned = ProvisionedDataset {
            train_pool: Arc::new(InMemDataset::new(items.clone())),
            test_pool: Arc::new(InMemDataset::new(items)),
            train_range: 0..12,
            valid_range: 12..20,
            test_len: 5,
        };

        let splits = provisioned.splits();
        assert_eq!(splits.train.len(), 12);
        assert_eq!(splits.valid.len(), 8);
        assert_eq!(splits.test.len(), 5);

        let last_train = splits.train.get(11).unwrap().label;
        let first_valid = splits.valid.get(0).unwrap().label;
        assert_eq!(last_train, 11);
        assert_eq!(first_valid, 12);
    }
}
