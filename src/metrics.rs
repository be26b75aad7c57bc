use burn::prelude::*;
use ndarray::{Array2, Array3};

/// Dense result tables, allocated up front since every dimension is known
/// before the run starts. Each cell is written exactly once.
#[derive(Debug)]
pub struct RunMetrics {
    /// Mean training loss per (dataset, variant, epoch).
    pub train_loss: Array3<f64>,
    /// Mean validation loss per (dataset, variant, epoch).
    pub valid_loss: Array3<f64>,
    /// Test accuracy percentage per (dataset, variant).
    pub test_accuracy: Array2<f64>,
    /// Trainable parameter count per variant.
    pub num_params: Vec<u64>,
}

impl RunMetrics {
    pub fn new(num_datasets: usize, num_variants: usize, num_epochs: usize) -> Self {
        Self {
            train_loss: Array3::zeros((num_datasets, num_variants, num_epochs)),
            valid_loss: Array3::zeros((num_datasets, num_variants, num_epochs)),
            test_accuracy: Array2::zeros((num_datasets, num_variants)),
            num_params: vec![0; num_variants],
        }
    }

    pub fn num_datasets(&self) -> usize {
        self.test_accuracy.nrows()
    }

    pub fn num_variants(&self) -> usize {
        self.test_accuracy.ncols()
    }
}

/// Top-1 classification counts for one batch: (correct, total).
pub fn classification_counts<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> (usize, usize) {
    let total = targets.dims()[0];
    let predictions = logits.argmax(1).flatten::<1>(0, 1);
    let correct = predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize;
    (correct, total)
}

pub fn accuracy_percent(correct: usize, total: usize) -> f64 {
    100.0 * correct as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn counts_argmax_matches() {
        let device = Default::default();
        // Rows 0 and 2 predict their target; row 1 misses.
        let logits = Tensor::<TestBackend, 2>::from_floats(
            [[0.9, 0.1, 0.0], [0.8, 0.1, 0.1], [0.0, 0.2, 0.7]],
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 2], &device);

        let (correct, total) = classification_counts(logits, targets);
        assert_eq!((correct, total), (2, 3));
        assert!((accuracy_percent(correct, total) - 100.0 * 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn all_and_none_correct_are_the_extremes() {
        let device = Default::default();
        let logits =
            Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0], [0.0, 1.0]], &device);

        let hits = Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device);
        assert_eq!(classification_counts(logits.clone(), hits), (2, 2));

        let misses = Tensor::<TestBackend, 1, Int>::from_ints([1, 0], &device);
        assert_eq!(classification_counts(logits, misses), (0, 2));
    }

    #[test]
    fn tables_are_sized_by_run_dimensions() {
        let metrics = RunMetrics::new(6, 2, 20);
        assert_eq!(metrics.train_loss.dim(), (6, 2, 20));
        assert_eq!(metrics.valid_loss.dim(), (6, 2, 20));
        assert_eq!(metrics.test_accuracy.dim(), (6, 2));
        assert_eq!(metrics.num_params.len(), 2);
        assert_eq!(metrics.num_datasets(), 6);
        assert_eq!(metrics.num_variants(), 2);
    }
}
