//! Labelled images from CIFAR-10 style binary batches.
//!
//! Every record is one label byte followed by the image's pixel bytes, one
//! full plane per channel, each plane row-major.
use crate::error::{PropGenError, Result};
use crate::NNVFloat;
use log::debug;
use ndarray::Array3;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub image: Array3<NNVFloat>,
    pub label: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImageFormat {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub num_classes: usize,
}

impl ImageFormat {
    pub const CIFAR10: Self = Self {
        channels: 3,
        height: 32,
        width: 32,
        num_classes: 10,
    };

    pub const fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    pub const fn pixels(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// Bytes per record, label included.
    pub const fn record_len(&self) -> usize {
        self.pixels() + 1
    }
}

impl Default for ImageFormat {
    fn default() -> Self {
        Self::CIFAR10
    }
}

/// # Errors
/// If `bytes` is not a whole number of records or a label is out of range.
/// `path` only labels the error.
pub fn decode_binary_batch(bytes: &[u8], format: &ImageFormat, path: &Path) -> Result<Vec<Sample>> {
    let record_len = format.record_len();
    if bytes.len() % record_len != 0 {
        return Err(PropGenError::Dataset {
            path: path.to_path_buf(),
            reason: format!(
                "{} bytes is not a multiple of the {} byte record",
                bytes.len(),
                record_len
            ),
        });
    }
    bytes
        .chunks_exact(record_len)
        .enumerate()
        .map(|(idx, record)| {
            let label = usize::from(record[0]);
            if label >= format.num_classes {
                return Err(PropGenError::Dataset {
                    path: path.to_path_buf(),
                    reason: format!(
                        "record {} has label {} but there are {} classes",
                        idx, label, format.num_classes
                    ),
                });
            }
            let pixels: Vec<NNVFloat> = record[1..]
                .iter()
                .map(|&b| NNVFloat::from(b) / 255.)
                .collect();
            let image = Array3::from_shape_vec(format.shape(), pixels)?;
            Ok(Sample { image, label })
        })
        .collect()
}

/// # Errors
/// If the file cannot be read or does not decode
pub fn load_binary_batch(path: &Path, format: &ImageFormat) -> Result<Vec<Sample>> {
    let bytes = fs::read(path).map_err(|err| PropGenError::io(path, err))?;
    let samples = decode_binary_batch(&bytes, format, path)?;
    debug!("loaded {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

/// Order in which the samples are visited: dataset order, or a random
/// permutation of it drawn from `rng`.
pub fn sample_order<R: Rng + ?Sized>(len: usize, shuffle: bool, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    if shuffle {
        order.shuffle(rng);
    }
    order
}
