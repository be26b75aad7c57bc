use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::config::Config;
use burn::data::dataloader::DataLoaderBuilder;
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;

use crate::cli::Cli;
use crate::data::ClassificationBatcher;
use crate::dataset::{self, DatasetDescriptor, DatasetSplits, RunMode};
use crate::export;
use crate::metrics::{accuracy_percent, classification_counts, RunMetrics};
use crate::model::{ActivationKind, Vgg, VggConfig, VARIANTS};

/// Run hyperparameters, saved alongside the artifacts of every run.
#[derive(Config)]
pub struct ExperimentConfig {
    pub model: VggConfig,
    pub optimizer: SgdConfig,
    #[config(default = 20)]
    pub num_epochs: usize,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 1000)]
    pub test_batch_size: usize,
    #[config(default = 0.01)]
    pub lr: f64,
    #[config(default = 0)]
    pub seed: u64,
}

/// Tracks the running minimum validation loss for one (dataset, variant)
/// pair.
///
/// The tracker starts unset so the first epoch always persists; only a
/// strictly lower loss displaces the stored checkpoint, so ties keep the
/// earlier epoch.
#[derive(Debug, Default)]
pub struct BestCheckpoint {
    best: Option<f64>,
}

impl BestCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `loss` strictly improves on the best seen so far.
    pub fn observe(&mut self, loss: f64) -> bool {
        if loss < self.best.unwrap_or(f64::INFINITY) {
            self.best = Some(loss);
            true
        } else {
            false
        }
    }

    pub fn best(&self) -> f64 {
        self.best.unwrap_or(f64::INFINITY)
    }
}

/// Everything measured for one (dataset, variant) pair.
pub struct VariantOutcome {
    pub train_loss: Vec<f64>,
    pub valid_loss: Vec<f64>,
    pub test_accuracy: f64,
    pub num_params: u64,
}

/// Deterministic checkpoint location for one (dataset, variant) pair; the
/// recorder appends its own file extension.
pub fn checkpoint_path(results_dir: &Path, dataset: &str, variant: ActivationKind) -> PathBuf {
    results_dir.join(format!("{dataset}-{}", variant.label()))
}

/// Trains one variant on one dataset, keeping the best checkpoint by
/// validation loss, then evaluates that checkpoint on the test split.
pub fn train_variant<B: AutodiffBackend>(
    desc: &DatasetDescriptor,
    splits: DatasetSplits,
    variant: ActivationKind,
    config: &ExperimentConfig,
    checkpoint: &Path,
    device: B::Device,
) -> Result<VariantOutcome> {
    let batcher_train = ClassificationBatcher::<B>::new(desc, device.clone());
    let batcher_valid = ClassificationBatcher::<B::InnerBackend>::new(desc, device.clone());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(1)
        .build(splits.train);
    let dataloader_valid = DataLoaderBuilder::new(batcher_valid.clone())
        .batch_size(config.batch_size)
        .num_workers(1)
        .build(splits.valid);
    let dataloader_test = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.test_batch_size)
        .num_workers(1)
        .build(splits.test);

    let mut model = config.model.init_variant::<B>(variant, &device);
    let num_params = model.num_params() as u64;
    let mut optim = config.optimizer.init::<B, Vgg<B>>();
    let recorder = CompactRecorder::new();

    let mut train_losses = Vec::with_capacity(config.num_epochs);
    let mut valid_losses = Vec::with_capacity(config.num_epochs);
    let mut best = BestCheckpoint::new();

    for epoch in 0..config.num_epochs {
        // Training phase: one pass over every training batch.
        let mut loss_sum = 0.0;
        let mut num_batches = 0usize;
        for batch in dataloader_train.iter() {
            let output = model.forward(batch.images);
            let loss = CrossEntropyLossConfig::new()
                .init(&device)
                .forward(output, batch.targets);
            loss_sum += loss.clone().into_scalar().elem::<f64>();
            num_batches += 1;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(config.lr, model, grads);
        }
        let train_loss = loss_sum / num_batches.max(1) as f64;
        train_losses.push(train_loss);

        // Validation phase: gradient-free pass over the validation batches.
        let model_valid = model.valid();
        let mut loss_sum = 0.0;
        let mut num_batches = 0usize;
        let mut correct = 0;
        let mut total = 0;
        for batch in dataloader_valid.iter() {
            let output = model_valid.forward(batch.images);
            let loss = CrossEntropyLossConfig::new()
                .init(&device)
                .forward(output.clone(), batch.targets.clone());
            loss_sum += loss.into_scalar().elem::<f64>();
            num_batches += 1;

            let (batch_correct, batch_total) = classification_counts(output, batch.targets);
            correct += batch_correct;
            total += batch_total;
        }
        let valid_loss = loss_sum / num_batches.max(1) as f64;
        valid_losses.push(valid_loss);

        println!(
            "{}, {}, epoch {epoch}: train loss {train_loss:.4}, validation loss {valid_loss:.4}, validation accuracy {:.2}%",
            desc.name,
            variant.label(),
            accuracy_percent(correct, total),
        );

        if best.observe(valid_loss) {
            model
                .clone()
                .save_file(checkpoint.to_path_buf(), &recorder)
                .with_context(|| {
                    format!("failed to persist checkpoint for {} {}", desc.name, variant.label())
                })?;
            println!("{}, {}: checkpoint updated", desc.name, variant.label());
        }
    }

    // Test evaluation: a fresh instance of the same variant, loaded from the
    // best checkpoint, evaluated in a single gradient-free pass.
    let model_test = config
        .model
        .init_variant::<B::InnerBackend>(variant, &device)
        .load_file(checkpoint.to_path_buf(), &recorder, &device)
        .with_context(|| {
            format!("failed to load best checkpoint for {} {}", desc.name, variant.label())
        })?;

    let mut correct = 0;
    let mut total = 0;
    for batch in dataloader_test.iter() {
        let output = model_test.forward(batch.images);
        let (batch_correct, batch_total) = classification_counts(output, batch.targets);
        correct += batch_correct;
        total += batch_total;
    }
    let test_accuracy = accuracy_percent(correct, total);
    println!(
        "{}, {}: test accuracy {test_accuracy:.2}%",
        desc.name,
        variant.label(),
    );

    Ok(VariantOutcome {
        train_loss: train_losses,
        valid_loss: valid_losses,
        test_accuracy,
        num_params,
    })
}

/// Drives the whole experiment: every dataset and variant sequentially, then
/// exports the aggregated artifacts.
pub fn run<B: AutodiffBackend>(cli: Cli, device: B::Device) -> Result<()> {
    let mode = if cli.full { RunMode::Full } else { RunMode::Smoke };
    let config = ExperimentConfig::new(VggConfig::new(), SgdConfig::new())
        .with_num_epochs(mode.num_epochs());

    // Global determinism state, set once before any data or model
    // construction and never touched again.
    B::seed(config.seed);

    fs::create_dir_all(&cli.results_dir).with_context(|| {
        format!("failed to create results directory {}", cli.results_dir.display())
    })?;
    config
        .save(cli.results_dir.join("config.json"))
        .context("failed to save the run configuration")?;

    let descriptors = dataset::descriptors();
    let mut metrics = RunMetrics::new(descriptors.len(), VARIANTS.len(), config.num_epochs);

    for (dataset_index, desc) in descriptors.iter().enumerate() {
        let provisioned = dataset::provision(desc, &cli.cache_dir, mode)
            .with_context(|| format!("failed to provision dataset {}", desc.name))?;

        for (variant_index, variant) in VARIANTS.into_iter().enumerate() {
            let checkpoint = checkpoint_path(&cli.results_dir, desc.name, variant);
            let outcome = train_variant::<B>(
                desc,
                provisioned.splits(),
                variant,
                &config,
                &checkpoint,
                device.clone(),
            )?;

            for (epoch, (&train, &valid)) in outcome
                .train_loss
                .iter()
                .zip(&outcome.valid_loss)
                .enumerate()
            {
                metrics.train_loss[[dataset_index, variant_index, epoch]] = train;
                metrics.valid_loss[[dataset_index, variant_index, epoch]] = valid;
            }
            metrics.test_accuracy[[dataset_index, variant_index]] = outcome.test_accuracy;
            metrics.num_params[variant_index] = outcome.num_params;
        }
    }

    export::write_all(&cli.results_dir, &config, &metrics, &descriptors)
}
