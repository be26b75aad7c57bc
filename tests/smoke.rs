//! End-to-end smoke run over a synthetic dataset: a reduced-width network is
//! trained for two epochs per variant, checkpointed, evaluated, and the whole
//! sequence is repeated to check seeded reproducibility.

use std::sync::Arc;

use activation_bench::dataset::{DatasetDescriptor, DatasetSplits, ImageItem, SourceFormat};
use activation_bench::model::{VggConfig, VARIANTS};
use activation_bench::training::{checkpoint_path, train_variant, ExperimentConfig};
use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::Autodiff;
use burn::data::dataset::transform::PartialDataset;
use burn::data::dataset::InMemDataset;
use burn::optim::SgdConfig;
use burn::tensor::backend::Backend;

type TestBackend = Autodiff<NdArray>;

fn synthetic_descriptor() -> DatasetDescriptor {
    DatasetDescriptor {
        name: "Synthetic",
        format: SourceFormat::Idx,
        mean: &[0.5],
        std: &[0.5],
        train_range: 0..8,
        valid_range: 8..12,
        test_size: 4,
        num_classes: 4,
    }
}

/// Deterministic grayscale 8x8 items with labels cycling through 4 classes.
fn pool(count: usize) -> Vec<ImageItem> {
    (0..count)
        .map(|index| ImageItem {
            image: (0..8 * 8)
                .map(|pixel| ((index * 37 + pixel * 11) % 256) as u8)
                .collect(),
            channels: 1,
            side: 8,
            label: (index % 4) as u8,
        })
        .collect()
}

fn splits() -> DatasetSplits {
    let train_pool = Arc::new(InMemDataset::new(pool(12)));
    let test_pool = Arc::new(InMemDataset::new(pool(4)));
    DatasetSplits {
        train: PartialDataset::new(train_pool.clone(), 0, 8),
        valid: PartialDataset::new(train_pool, 8, 12),
        test: PartialDataset::new(test_pool, 0, 4),
    }
}

fn config() -> ExperimentConfig {
    ExperimentConfig::new(
        VggConfig::new()
            .with_num_classes(4)
            .with_base_width(1)
            .with_hidden_size(8),
        SgdConfig::new(),
    )
    .with_num_epochs(2)
    .with_batch_size(4)
    .with_test_batch_size(4)
}

#[test]
fn smoke_run_checkpoints_both_variants_and_reproduces_seeded_losses() {
    let desc = synthetic_descriptor();
    let config = config();
    let device = NdArrayDevice::Cpu;
    let dir = tempfile::tempdir().unwrap();

    let mut first_run_losses = Vec::new();
    for run in 0..2 {
        <TestBackend as Backend>::seed(config.seed);

        for (index, variant) in VARIANTS.into_iter().enumerate() {
            let checkpoint = checkpoint_path(dir.path(), desc.name, variant);
            let outcome = train_variant::<TestBackend>(
                &desc,
                splits(),
                variant,
                &config,
                &checkpoint,
                device.clone(),
            )
            .unwrap();

            assert_eq!(outcome.train_loss.len(), config.num_epochs);
            assert_eq!(outcome.valid_loss.len(), config.num_epochs);
            assert!(outcome.test_accuracy >= 0.0 && outcome.test_accuracy <= 100.0);
            assert!(outcome.num_params > 0);
            assert!(
                checkpoint.with_extension("mpk").exists(),
                "missing checkpoint for {}",
                variant.label(),
            );

            if run == 0 {
                first_run_losses.push(outcome.train_loss[0]);
            } else {
                assert_eq!(
                    outcome.train_loss[0].to_bits(),
                    first_run_losses[index].to_bits(),
                    "epoch-0 training loss must reproduce bit-identically for {}",
                    variant.label(),
                );
            }
        }
    }
}
