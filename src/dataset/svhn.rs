//! Reader for the SVHN cropped-digit distribution: MATLAB 5 containers
//! holding a column-major uint8 image array `X` of shape [side, side, 3, N]
//! and a label vector `y` where class 10 encodes the digit zero.

use std::fs;
use std::io::Read;
use std::ops::Range;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use flate2::read::ZlibDecoder;

use super::download;
use super::ImageItem;

const TRAIN_URL: &str = "http://ufldl.stanford.edu/housenumbers/train_32x32.mat";
const TEST_URL: &str = "http://ufldl.stanford.edu/housenumbers/test_32x32.mat";

const HEADER_LEN: usize = 128;

// MAT5 data element types.
const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;

// MAT5 array class for uint8 matrices.
const MX_UINT8_CLASS: u8 = 9;

/// Loads the (train pool, test pool) of SVHN.
pub fn load(cache_dir: &Path) -> Result<(Vec<ImageItem>, Vec<ImageItem>)> {
    let dir = cache_dir.join("SVHN");
    let train = load_split(TRAIN_URL, "train_32x32.mat", &dir)?;
    let test = load_split(TEST_URL, "test_32x32.mat", &dir)?;
    Ok((train, test))
}

fn load_split(url: &str, file_name: &str, dir: &Path) -> Result<Vec<ImageItem>> {
    let path = download::fetch(url, dir, file_name)?;
    let bytes = fs::read(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_mat(&bytes).with_context(|| format!("failed to decode {file_name}"))
}

/// Decodes a cropped-digit MAT5 file into labeled CHW images.
fn parse_mat(bytes: &[u8]) -> Result<Vec<ImageItem>> {
    ensure!(bytes.len() >= HEADER_LEN, "file shorter than the MAT5 header");
    ensure!(
        &bytes[126..128] == b"IM",
        "not a little-endian MAT5 file",
    );

    let mut variables = Vec::new();
    let mut offset = HEADER_LEN;
    while let Some((ty, payload, next)) = element(bytes, offset)? {
        match ty {
            MI_COMPRESSED => {
                let mut inflated = Vec::new();
                ZlibDecoder::new(&bytes[payload])
                    .read_to_end(&mut inflated)
                    .context("failed to inflate a compressed MAT element")?;
                if let Some((inner_ty, inner_payload, _)) = element(&inflated, 0)? {
                    if inner_ty == MI_MATRIX {
                        variables.push(parse_matrix(&inflated[inner_payload])?);
                    }
                }
            }
            MI_MATRIX => variables.push(parse_matrix(&bytes[payload])?),
            _ => {}
        }
        offset = next;
    }

    let (x_dims, x) = take_variable(&mut variables, "X")?;
    let (y_dims, y) = take_variable(&mut variables, "y")?;

    ensure!(
        x_dims.len() == 4 && x_dims[0] == x_dims[1] && x_dims[2] == 3,
        "unexpected image array shape {x_dims:?}",
    );
    let side = x_dims[0];
    let count = x_dims[3];
    let plane = side * side;
    ensure!(
        x.len() == 3 * plane * count,
        "image array holds {} bytes, expected {}",
        x.len(),
        3 * plane * count,
    );
    ensure!(
        y_dims.first() == Some(&count) && y.len() == count,
        "label array shape {y_dims:?} does not match {count} images",
    );

    // Column-major [H, W, C, N] to row-major CHW per image.
    let mut items = Vec::with_capacity(count);
    for n in 0..count {
        let mut image = vec![0u8; 3 * plane];
        for c in 0..3 {
            for h in 0..side {
                for w in 0..side {
                    image[c * plane + h * side + w] = x[h + side * w + plane * c + 3 * plane * n];
                }
            }
        }
        items.push(ImageItem {
            image,
            channels: 3,
            side,
            // Class 10 stands for the digit zero.
            label: y[n] % 10,
        });
    }
    Ok(items)
}

fn take_variable(
    variables: &mut Vec<(String, Vec<usize>, Vec<u8>)>,
    name: &str,
) -> Result<(Vec<usize>, Vec<u8>)> {
    let index = variables
        .iter()
        .position(|(candidate, _, _)| candidate == name)
        .with_context(|| format!("file does not contain a variable named {name}"))?;
    let (_, dims, data) = variables.swap_remove(index);
    Ok((dims, data))
}

/// Reads the data element starting at `offset`, handling the packed
/// small-element form. Returns its type, payload range and the offset of the
/// following element; `None` once fewer than a tag's worth of bytes remain.
///
/// Regular elements are padded to an 8-byte boundary; compressed elements are
/// not.
fn element(bytes: &[u8], offset: usize) -> Result<Option<(u32, Range<usize>, usize)>> {
    if offset + 8 > bytes.len() {
        return Ok(None);
    }
    let word = u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("4 bytes"));

    if word >> 16 != 0 {
        // Small element: size lives in the upper half-word, payload in the
        // remaining 4 tag bytes.
        let ty = word & 0xffff;
        let size = (word >> 16) as usize;
        ensure!(size <= 4, "small element claims {size} bytes");
        return Ok(Some((ty, offset + 4..offset + 4 + size, offset + 8)));
    }

    let size =
        u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().expect("4 bytes")) as usize;
    let start = offset + 8;
    ensure!(
        start + size <= bytes.len(),
        "element at offset {offset} overruns the file",
    );
    let next = if word == MI_COMPRESSED {
        start + size
    } else {
        start + size.div_ceil(8) * 8
    };
    Ok(Some((word, start..start + size, next)))
}

/// Parses a miMATRIX payload into (name, dimensions, raw uint8 data).
fn parse_matrix(payload: &[u8]) -> Result<(String, Vec<usize>, Vec<u8>)> {
    let (flags_ty, flags, offset) =
        element(payload, 0)?.context("matrix missing its array flags")?;
    ensure!(
        flags_ty == MI_UINT32 && flags.len() == 8,
        "malformed array flags",
    );
    let class = payload[flags.start];
    ensure!(
        class == MX_UINT8_CLASS,
        "expected a uint8 array, got class {class}",
    );

    let (dims_ty, dims_range, offset) =
        element(payload, offset)?.context("matrix missing its dimensions")?;
    ensure!(dims_ty == MI_INT32, "malformed dimensions element");
    let dims = payload[dims_range]
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes(chunk.try_into().expect("4 bytes")) as usize)
        .collect();

    let (name_ty, name_range, offset) =
        element(payload, offset)?.context("matrix missing its name")?;
    ensure!(name_ty == MI_INT8, "malformed name element");
    let name = String::from_utf8_lossy(&payload[name_range]).into_owned();

    let (data_ty, data_range, _) =
        element(payload, offset)?.context("matrix missing its data")?;
    ensure!(
        data_ty == MI_UINT8,
        "expected uint8 matrix data, got element type {data_ty}",
    );

    Ok((name, dims, payload[data_range].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn tag(ty: u32, payload: &[u8], pad: bool) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(ty.to_le_bytes());
        out.extend((payload.len() as u32).to_le_bytes());
        out.extend(payload);
        if pad {
            while out.len() % 8 != 0 {
                out.push(0);
            }
        }
        out
    }

    fn small_tag(ty: u32, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() <= 4);
        let word = ty | (payload.len() as u32) << 16;
        let mut out = Vec::new();
        out.extend(word.to_le_bytes());
        out.extend(payload);
        while out.len() % 8 != 0 {
            out.push(0);
        }
        out
    }

    fn matrix(name: &str, dims: &[i32], data: &[u8], small_name: bool) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend(tag(MI_UINT32, &[MX_UINT8_CLASS, 0, 0, 0, 0, 0, 0, 0], true));
        let dim_bytes: Vec<u8> = dims.iter().flat_map(|d| d.to_le_bytes()).collect();
        body.extend(tag(MI_INT32, &dim_bytes, true));
        if small_name {
            body.extend(small_tag(MI_INT8, name.as_bytes()));
        } else {
            body.extend(tag(MI_INT8, name.as_bytes(), true));
        }
        body.extend(tag(MI_UINT8, data, true));
        tag(MI_MATRIX, &body, true)
    }

    fn header() -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[..19].copy_from_slice(b"MATLAB 5.0 MAT-file");
        bytes[124] = 0;
        bytes[125] = 1;
        bytes[126] = b'I';
        bytes[127] = b'M';
        bytes
    }

    /// Two 2x2 images: pixel value = 100*n + 10*c + (h*2 + w), stored
    /// column-major, plus labels [10, 3].
    fn sample_arrays() -> (Vec<u8>, Vec<u8>) {
        let side = 2;
        let count = 2;
        let mut x = vec![0u8; side * side * 3 * count];
        for n in 0..count {
            for c in 0..3 {
                for h in 0..side {
                    for w in 0..side {
                        x[h + side * w + side * side * c + side * side * 3 * n] =
                            (100 * n + 10 * c + h * side + w) as u8;
                    }
                }
            }
        }
        (x, vec![10, 3])
    }

    fn assert_sample_items(items: &[ImageItem]) {
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, 0, "class 10 must map to digit zero");
        assert_eq!(items[1].label, 3);
        for (n, item) in items.iter().enumerate() {
            assert_eq!(item.channels, 3);
            assert_eq!(item.side, 2);
            for c in 0..3 {
                for p in 0..4 {
                    assert_eq!(item.image[c * 4 + p], (100 * n + 10 * c + p) as u8);
                }
            }
        }
    }

    #[test]
    fn decodes_uncompressed_variables() {
        let (x, y) = sample_arrays();
        let mut bytes = header();
        bytes.extend(matrix("X", &[2, 2, 3, 2], &x, false));
        bytes.extend(matrix("y", &[2, 1], &y, true));

        assert_sample_items(&parse_mat(&bytes).unwrap());
    }

    #[test]
    fn decodes_compressed_variables_with_small_names() {
        let (x, y) = sample_arrays();
        let mut bytes = header();
        for (name, dims, data) in [("X", vec![2, 2, 3, 2], x), ("y", vec![2, 1], y)] {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&matrix(name, &dims, &data, true)).unwrap();
            let compressed = encoder.finish().unwrap();
            bytes.extend(tag(MI_COMPRESSED, &compressed, false));
        }

        assert_sample_items(&parse_mat(&bytes).unwrap());
    }

    #[test]
    fn rejects_files_without_the_image_variable() {
        let mut bytes = header();
        bytes.extend(matrix("y", &[1, 1], &[5], true));
        assert!(parse_mat(&bytes).is_err());
    }

    #[test]
    fn rejects_big_endian_files() {
        let mut bytes = header();
        bytes[126] = b'M';
        bytes[127] = b'I';
        assert!(parse_mat(&bytes).is_err());
    }

    #[test]
    fn rejects_mismatched_label_counts() {
        let (x, _) = sample_arrays();
        let mut bytes = header();
        bytes.extend(matrix("X", &[2, 2, 3, 2], &x, false));
        bytes.extend(matrix("y", &[1, 1], &[3], true));
        assert!(parse_mat(&bytes).is_err());
    }
}
