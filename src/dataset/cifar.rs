//! Reader for the CIFAR-10/CIFAR-100 binary distributions: tar.gz archives
//! of fixed-size records, one or two label bytes followed by a 32x32 RGB
//! image in channel-major order.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;

use super::download;
use super::ImageItem;

const CIFAR10_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz";
const CIFAR100_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-100-binary.tar.gz";

const CIFAR10_DIR: &str = "cifar-10-batches-bin";
const CIFAR100_DIR: &str = "cifar-100-binary";

const SIDE: usize = 32;
const PIXELS: usize = 3 * SIDE * SIDE;

/// Loads the (train pool, test pool) of one CIFAR dataset.
///
/// CIFAR-10 training batches are concatenated in their numbered order, so
/// pool indices are stable across runs.
pub fn load(name: &str, cache_dir: &Path) -> Result<(Vec<ImageItem>, Vec<ImageItem>)> {
    match name {
        "CIFAR10" => {
            let dir = extract(CIFAR10_URL, "cifar-10-binary.tar.gz", cache_dir, CIFAR10_DIR)?;
            let mut train = Vec::new();
            for batch in [
                "data_batch_1.bin",
                "data_batch_2.bin",
                "data_batch_3.bin",
                "data_batch_4.bin",
                "data_batch_5.bin",
            ] {
                train.extend(read_batch(&dir.join(batch), 1)?);
            }
            let test = read_batch(&dir.join("test_batch.bin"), 1)?;
            Ok((train, test))
        }
        "CIFAR100" => {
            let dir = extract(CIFAR100_URL, "cifar-100-binary.tar.gz", cache_dir, CIFAR100_DIR)?;
            let train = read_batch(&dir.join("train.bin"), 2)?;
            let test = read_batch(&dir.join("test.bin"), 2)?;
            Ok((train, test))
        }
        other => bail!("no CIFAR source is defined for dataset {other}"),
    }
}

/// Downloads and unpacks the archive unless its content directory exists.
fn extract(url: &str, file_name: &str, cache_dir: &Path, inner_dir: &str) -> Result<PathBuf> {
    let out = cache_dir.join(inner_dir);
    if !out.exists() {
        let archive_path = download::fetch(url, cache_dir, file_name)?;
        let file = File::open(&archive_path)
            .with_context(|| format!("failed to open {}", archive_path.display()))?;
        Archive::new(GzDecoder::new(file))
            .unpack(cache_dir)
            .with_context(|| format!("failed to unpack {file_name}"))?;
        ensure!(
            out.exists(),
            "{file_name} did not contain the expected {inner_dir} directory",
        );
    }
    Ok(out)
}

fn read_batch(path: &Path, label_bytes: usize) -> Result<Vec<ImageItem>> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    read_records(&bytes, label_bytes)
        .with_context(|| format!("failed to decode {}", path.display()))
}

/// Decodes fixed-size records; the last label byte is the (fine) class.
fn read_records(bytes: &[u8], label_bytes: usize) -> Result<Vec<ImageItem>> {
    let record = label_bytes + PIXELS;
    ensure!(
        !bytes.is_empty() && bytes.len() % record == 0,
        "batch size {} is not a multiple of the {record}-byte record",
        bytes.len(),
    );

    Ok(bytes
        .chunks_exact(record)
        .map(|chunk| ImageItem {
            image: chunk[label_bytes..].to_vec(),
            channels: 3,
            side: SIDE,
            label: chunk[label_bytes - 1],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label_bytes: &[u8], fill: u8) -> Vec<u8> {
        let mut bytes = label_bytes.to_vec();
        bytes.extend(std::iter::repeat(fill).take(PIXELS));
        bytes
    }

    #[test]
    fn decodes_single_label_records() {
        let mut bytes = record(&[7], 1);
        bytes.extend(record(&[2], 9));

        let items = read_records(&bytes, 1).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, 7);
        assert_eq!(items[1].label, 2);
        assert_eq!(items[1].image.len(), PIXELS);
        assert!(items[1].image.iter().all(|&p| p == 9));
    }

    #[test]
    fn coarse_label_is_ignored_for_cifar100_records() {
        let bytes = record(&[11, 42], 0);
        let items = read_records(&bytes, 2).unwrap();
        assert_eq!(items[0].label, 42);
    }

    #[test]
    fn rejects_truncated_batches() {
        let mut bytes = record(&[1], 0);
        bytes.pop();
        assert!(read_records(&bytes, 1).is_err());
        assert!(read_records(&[], 1).is_err());
    }
}
