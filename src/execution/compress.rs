//! Gzip compression of dump files.
//!
//! `compress` writes `<file>.gz` next to the input; `decompress` writes the
//! input path with its `.gz` extension removed. Both run on the blocking pool.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::executor::ExecutionError;

/// Extension appended to compressed files.
pub const GZIP_EXTENSION: &str = "gz";

/// Path of the compressed copy of `path`.
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(GZIP_EXTENSION);
    PathBuf::from(name)
}

/// Path of the decompressed copy of `path`, if it ends in `.gz` (any case).
pub fn decompressed_path(path: &Path) -> Option<PathBuf> {
    let extension = path.extension()?.to_str()?;
    if extension.eq_ignore_ascii_case(GZIP_EXTENSION) {
        Some(path.with_extension(""))
    } else {
        None
    }
}

/// Gzip compressor.
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: Compression,
}

impl Default for Compressor {
    fn default() -> Self {
        Self {
            level: Compression::best(),
        }
    }
}

impl Compressor {
    /// Create a compressor using the best compression level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress `path` into `<path>.gz`, replacing any existing file.
    pub async fn compress(&self, path: &Path) -> Result<PathBuf, ExecutionError> {
        let source = path.to_path_buf();
        let destination = compressed_path(path);
        let level = self.level;

        let target = destination.clone();
        tokio::task::spawn_blocking(move || compress_file(&source, &target, level))
            .await
            .map_err(|e| ExecutionError::Panicked(e.to_string()))??;
        Ok(destination)
    }

    /// Decompress `path` into the same path without `.gz`.
    pub async fn decompress(&self, path: &Path) -> Result<PathBuf, ExecutionError> {
        let destination =
            decompressed_path(path).ok_or_else(|| ExecutionError::NotGzip(path.to_path_buf()))?;
        let source = path.to_path_buf();

        let target = destination.clone();
        tokio::task::spawn_blocking(move || decompress_file(&source, &target))
            .await
            .map_err(|e| ExecutionError::Panicked(e.to_string()))??;
        Ok(destination)
    }
}

fn compress_file(source: &Path, destination: &Path, level: Compression) -> Result<(), ExecutionError> {
    let context = || format!("compressing '{}'", source.display());

    let input = File::open(source).map_err(|e| ExecutionError::io(context(), e))?;
    let output = File::create(destination).map_err(|e| ExecutionError::io(context(), e))?;

    let mut encoder = GzEncoder::new(BufWriter::new(output), level);
    std::io::copy(&mut BufReader::new(input), &mut encoder)
        .map_err(|e| ExecutionError::io(context(), e))?;
    encoder
        .finish()
        .map_err(|e| ExecutionError::io(context(), e))?
        .flush()
        .map_err(|e| ExecutionError::io(context(), e))?;
    Ok(())
}

fn decompress_file(source: &Path, destination: &Path) -> Result<(), ExecutionError> {
    let context = || format!("decompressing '{}'", source.display());

    let input = File::open(source).map_err(|e| ExecutionError::io(context(), e))?;
    let output = File::create(destination).map_err(|e| ExecutionError::io(context(), e))?;

    let mut decoder = GzDecoder::new(BufReader::new(input));
    let mut writer = BufWriter::new(output);
    std::io::copy(&mut decoder, &mut writer).map_err(|e| ExecutionError::io(context(), e))?;
    writer.flush().map_err(|e| ExecutionError::io(context(), e))?;
    Ok(())
}
