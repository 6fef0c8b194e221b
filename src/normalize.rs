//! Per-channel input normalization applied in front of the classifier
use crate::error::{PropGenError, Result};
use crate::NNVFloat;
use ndarray::{Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

/// `(x - mean[c]) / std[c]` for every value of channel `c`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Normalization {
    mean: Vec<NNVFloat>,
    std: Vec<NNVFloat>,
}

impl Normalization {
    /// # Errors
    /// If the vectors differ in length, are empty, or any std is not strictly positive
    pub fn new(mean: Vec<NNVFloat>, std: Vec<NNVFloat>) -> Result<Self> {
        let norm = Self { mean, std };
        norm.validate()?;
        Ok(norm)
    }

    /// Channel statistics of the CIFAR-10 training set.
    pub fn cifar10() -> Self {
        Self {
            mean: vec![0.4914, 0.4822, 0.4465],
            std: vec![0.2471, 0.2435, 0.2616],
        }
    }

    pub fn identity(channels: usize) -> Self {
        Self {
            mean: vec![0.; channels],
            std: vec![1.; channels],
        }
    }

    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[NNVFloat] {
        &self.mean
    }

    pub fn std(&self) -> &[NNVFloat] {
        &self.std
    }

    /// # Errors
    pub fn validate(&self) -> Result<()> {
        if self.mean.is_empty() || self.mean.len() != self.std.len() {
            return Err(PropGenError::InvalidConfig(format!(
                "normalization needs one mean and one std per channel, got {} and {}",
                self.mean.len(),
                self.std.len()
            )));
        }
        // Positive std keeps the transform monotone, so box bounds stay ordered.
        if let Some(s) = self.std.iter().find(|&&s| !(s > 0. && s.is_finite())) {
            return Err(PropGenError::InvalidConfig(format!(
                "normalization std must be positive and finite, got {}",
                s
            )));
        }
        Ok(())
    }

    fn check_channels(&self, found: usize) -> Result<()> {
        if found == self.channels() {
            Ok(())
        } else {
            Err(PropGenError::ShapeMismatch {
                context: "image channels".to_string(),
                expected: self.channels(),
                found,
            })
        }
    }

    /// # Errors
    /// If the image channel count differs from the normalization's
    pub fn apply(&self, image: &ArrayView3<NNVFloat>) -> Result<Array3<NNVFloat>> {
        self.check_channels(image.len_of(Axis(0)))?;
        let mut out = image.to_owned();
        for (c, mut plane) in out.axis_iter_mut(Axis(0)).enumerate() {
            let (m, s) = (self.mean[c], self.std[c]);
            plane.mapv_inplace(|x| (x - m) / s);
        }
        Ok(out)
    }

    /// Maps a gradient with respect to the normalized input back to raw pixel space.
    ///
    /// # Errors
    /// If the gradient channel count differs from the normalization's
    pub fn pullback(&self, grad: &ArrayView3<NNVFloat>) -> Result<Array3<NNVFloat>> {
        self.check_channels(grad.len_of(Axis(0)))?;
        let mut out = grad.to_owned();
        for (c, mut plane) in out.axis_iter_mut(Axis(0)).enumerate() {
            let s = self.std[c];
            plane.mapv_inplace(|g| g / s);
        }
        Ok(out)
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::cifar10()
    }
}
