//! Reader for the gzipped IDX image/label files shared by MNIST,
//! FashionMNIST and KMNIST.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;

use super::download;
use super::ImageItem;

// CVDF mirror of http://yann.lecun.com/exdb/mnist/
const MNIST_URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";
const FASHION_MNIST_URL: &str = "http://fashion-mnist.s3-website.eu-central-1.amazonaws.com/";
const KMNIST_URL: &str = "http://codh.rois.ac.jp/kmnist/dataset/kmnist/";

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte.gz";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte.gz";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte.gz";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte.gz";

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

/// Loads the (train pool, test pool) of one IDX-encoded dataset.
pub fn load(name: &str, cache_dir: &Path) -> Result<(Vec<ImageItem>, Vec<ImageItem>)> {
    let base = match name {
        "MNIST" => MNIST_URL,
        "FashionMNIST" => FASHION_MNIST_URL,
        "KMNIST" => KMNIST_URL,
        other => bail!("no IDX source is defined for dataset {other}"),
    };
    let dir = cache_dir.join(name);

    let train = load_split(base, &dir, TRAIN_IMAGES, TRAIN_LABELS)?;
    let test = load_split(base, &dir, TEST_IMAGES, TEST_LABELS)?;
    Ok((train, test))
}

fn load_split(
    base: &str,
    dir: &Path,
    images_name: &str,
    labels_name: &str,
) -> Result<Vec<ImageItem>> {
    let images_path = download::fetch(&format!("{base}{images_name}"), dir, images_name)?;
    let labels_path = download::fetch(&format!("{base}{labels_name}"), dir, labels_name)?;

    let (side, images) = read_images(&gunzip(&images_path)?)
        .with_context(|| format!("failed to decode {images_name}"))?;
    let labels = read_labels(&gunzip(&labels_path)?)
        .with_context(|| format!("failed to decode {labels_name}"))?;
    ensure!(
        images.len() == labels.len(),
        "{images_name} holds {} images but {labels_name} holds {} labels",
        images.len(),
        labels.len(),
    );

    Ok(images
        .into_iter()
        .zip(labels)
        .map(|(image, label)| ImageItem {
            image,
            channels: 1,
            side,
            label,
        })
        .collect())
}

fn gunzip(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut bytes = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .with_context(|| format!("failed to decompress {}", path.display()))?;
    Ok(bytes)
}

/// Decodes an IDX image file into its edge length and per-image pixel rows.
fn read_images(bytes: &[u8]) -> Result<(usize, Vec<Vec<u8>>)> {
    let mut reader = bytes;
    let magic = reader.read_u32::<BigEndian>().context("truncated header")?;
    ensure!(magic == IMAGES_MAGIC, "bad image magic {magic}");

    let count = reader.read_u32::<BigEndian>().context("truncated header")? as usize;
    let rows = reader.read_u32::<BigEndian>().context("truncated header")? as usize;
    let cols = reader.read_u32::<BigEndian>().context("truncated header")? as usize;
    ensure!(rows == cols, "expected square images, got {rows}x{cols}");
    ensure!(
        reader.len() == count * rows * cols,
        "expected {count} images of {rows}x{cols} pixels, found {} bytes",
        reader.len(),
    );

    let images = reader
        .chunks_exact(rows * cols)
        .map(|chunk| chunk.to_vec())
        .collect();
    Ok((rows, images))
}

/// Decodes an IDX label file.
fn read_labels(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut reader = bytes;
    let magic = reader.read_u32::<BigEndian>().context("truncated header")?;
    ensure!(magic == LABELS_MAGIC, "bad label magic {magic}");

    let count = reader.read_u32::<BigEndian>().context("truncated header")? as usize;
    ensure!(
        reader.len() == count,
        "expected {count} labels, found {} bytes",
        reader.len(),
    );
    Ok(reader.to_vec())
}
