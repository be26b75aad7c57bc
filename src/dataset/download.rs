use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

/// Fetches `url` into `dir/file_name`, returning the cached path.
///
/// Already-cached files are reused without touching the network; a failed
/// transfer leaves no partial file behind.
pub fn fetch(url: &str, dir: &Path, file_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create cache directory {}", dir.display()))?;

    let target = dir.join(file_name);
    if target.exists() {
        log::debug!("{file_name}: already cached");
        return Ok(target);
    }

    let bytes = download_bytes(url, file_name)?;
    fs::write(&target, &bytes)
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(target)
}

/// Downloads a file into memory, reporting progress on the terminal.
fn download_bytes(url: &str, message: &str) -> Result<Vec<u8>> {
    log::info!("downloading {url}");
    let mut response = reqwest::blocking::Client::new()
        .get(url)
        .send()
        .with_context(|| format!("failed to reach {url}"))?;
    if !response.status().is_success() {
        bail!("{url} returned HTTP {}", response.status());
    }

    let bar = match response.content_length() {
        Some(length) => ProgressBar::new(length).with_style(ProgressStyle::default_bar()),
        None => ProgressBar::new_spinner(),
    };
    bar.set_message(message.to_owned());

    let mut bytes = Vec::new();
    let mut chunk = [0u8; 1 << 16];
    loop {
        let read = response
            .read(&mut chunk)
            .with_context(|| format!("transfer from {url} interrupted"))?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..read]);
        bar.inc(read as u64);
    }
    bar.finish_and_clear();

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_files_are_reused_without_a_request() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("archive.bin");
        fs::write(&cached, b"cached bytes").unwrap();

        // The URL is unroutable, so this only succeeds via the cache.
        let path = fetch("http://invalid.invalid/archive.bin", dir.path(), "archive.bin").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"cached bytes");
    }

    #[test]
    fn unreachable_hosts_fail_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let result = fetch("http://invalid.invalid/missing.bin", dir.path(), "missing.bin");
        assert!(result.is_err());
        assert!(!dir.path().join("missing.bin").exists());
    }
}
