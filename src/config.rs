//! Settings of a generation run
use crate::attack::PgdConfig;
use crate::dataset::ImageFormat;
use crate::error::{PropGenError, Result};
use crate::normalize::Normalization;
use crate::NNVFloat;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    /// Network weights, as written by `DNN::save_json`.
    pub model: PathBuf,
    /// Model path recorded in the instance manifest, e.g. the ONNX export
    /// that verifiers consume.
    pub manifest_model: PathBuf,
    pub dataset: PathBuf,
    pub image_format: ImageFormat,
    /// Dataset name written into each property's title comment.
    pub dataset_title: String,
    pub output_dir: PathBuf,
    pub epsilons: Vec<NNVFloat>,
    /// Properties to generate per epsilon.
    pub num_images: usize,
    pub seed: Option<u64>,
    /// Visit samples in dataset order instead of a seeded shuffle.
    pub deterministic: bool,
    pub timeout_secs: u64,
    pub normalization: Normalization,
    pub attack: PgdConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("model.json"),
            manifest_model: PathBuf::from("onnx/resnet_2b.onnx"),
            dataset: PathBuf::from("cifar-10-batches-bin/test_batch.bin"),
            image_format: ImageFormat::CIFAR10,
            dataset_title: "CIFAR10".to_string(),
            output_dir: PathBuf::from("vnnlib_properties_pgd_filtered"),
            epsilons: vec![2. / 255.],
            num_images: 48,
            seed: Some(0),
            deterministic: false,
            timeout_secs: 300,
            normalization: Normalization::cifar10(),
            attack: PgdConfig::default(),
        }
    }
}

impl GenerationConfig {
    /// # Errors
    /// If the file cannot be read or holds unknown or malformed settings
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| PropGenError::io(path, err))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| PropGenError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// # Errors
    pub fn validate(&self) -> Result<()> {
        if self.epsilons.is_empty() {
            return Err(PropGenError::InvalidConfig("no epsilons given".to_string()));
        }
        if let Some(eps) = self.epsilons.iter().find(|&&eps| !(eps >= 0. && eps.is_finite())) {
            return Err(PropGenError::InvalidConfig(format!(
                "epsilon must be non-negative and finite, got {}",
                eps
            )));
        }
        if self.normalization.channels() != self.image_format.channels {
            return Err(PropGenError::ShapeMismatch {
                context: "normalization channels".to_string(),
                expected: self.image_format.channels,
                found: self.normalization.channels(),
            });
        }
        self.normalization.validate()?;
        self.attack.validate()
    }
}

/// Parses a budget written as a decimal (`0.008`) or a fraction (`2/255`).
///
/// # Errors
/// If the text is neither
pub fn parse_epsilon(text: &str) -> Result<NNVFloat> {
    let err = || PropGenError::Epsilon(text.to_string());
    let value = match text.split_once('/') {
        Some((num, den)) => {
            let num: NNVFloat = num.trim().parse().map_err(|_| err())?;
            let den: NNVFloat = den.trim().parse().map_err(|_| err())?;
            if den == 0. {
                return Err(err());
            }
            num / den
        }
        None => text.trim().parse().map_err(|_| err())?,
    };
    Ok(value)
}
