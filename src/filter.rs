//! Screening of candidate images: keep only those the base model gets right
//! and no targeted attack manages to flip.
use crate::attack::ProjectedAttack;
use crate::bounds::Bounds1;
use crate::classifier::{Classifier, NormalizedModel};
use crate::error::Result;
use crate::input_bounds::derive_input_bounds;
use crate::NNVFloat;
use log::{debug, info};
use ndarray::ArrayView3;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq)]
pub enum FilterDecision {
    /// The base model already gets the image wrong.
    Misclassified { predicted: usize },
    /// The attack toward `target` succeeded.
    Attacked { target: usize },
    Accepted {
        bounds: Bounds1,
        /// First target that was tried and failed.
        runner_up: Option<usize>,
    },
}

impl FilterDecision {
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FilterStats {
    pub examined: usize,
    /// Images the base model classifies correctly.
    pub correct: usize,
    /// Images that also survive every attack.
    pub robust: usize,
}

/// Destination for accepted properties.
pub trait PropertySink {
    /// `index` counts accepted properties from zero, `sample` is the image's
    /// position in the dataset.
    ///
    /// # Errors
    fn emit(
        &mut self,
        index: usize,
        sample: usize,
        bounds: &Bounds1,
        label: usize,
        runner_up: Option<usize>,
    ) -> Result<()>;
}

impl PropertySink for Vec<(usize, Bounds1, usize)> {
    fn emit(
        &mut self,
        _index: usize,
        sample: usize,
        bounds: &Bounds1,
        label: usize,
        _runner_up: Option<usize>,
    ) -> Result<()> {
        self.push((sample, bounds.clone(), label));
        Ok(())
    }
}

/// Every label but `label`, ascending.
pub fn candidate_targets(label: usize, num_classes: usize) -> impl Iterator<Item = usize> {
    (0..num_classes).filter(move |&target| target != label)
}

pub struct FilterLoop<'a, C: Classifier + ?Sized> {
    model: NormalizedModel<'a, C>,
    attack: ProjectedAttack,
    num_images: usize,
}

impl<'a, C: Classifier + ?Sized> FilterLoop<'a, C> {
    pub const fn new(model: NormalizedModel<'a, C>, attack: ProjectedAttack, num_images: usize) -> Self {
        Self {
            model,
            attack,
            num_images,
        }
    }

    pub const fn attack(&self) -> &ProjectedAttack {
        &self.attack
    }

    /// # Errors
    /// If the label is out of range or the image is unusable for the model
    pub fn screen<R: Rng + ?Sized>(
        &self,
        image: &ArrayView3<NNVFloat>,
        label: usize,
        rng: &mut R,
    ) -> Result<FilterDecision> {
        self.model.check_label(label)?;
        let predicted = self.model.predict(image)?;
        if predicted != label {
            return Ok(FilterDecision::Misclassified { predicted });
        }
        let mut runner_up = None;
        for target in candidate_targets(label, self.model.num_classes()) {
            info!("attacking label {} toward target {}", label, target);
            let result = self.attack.attack(&self.model, image, label, Some(target), rng)?;
            if result.success {
                return Ok(FilterDecision::Attacked { target });
            }
            runner_up.get_or_insert(target);
        }
        let bounds = derive_input_bounds(image, self.attack.epsilon(), self.model.normalization())?;
        Ok(FilterDecision::Accepted { bounds, runner_up })
    }

    /// Screens `samples` of `(dataset index, image, label)` in order until
    /// `num_images` are accepted or the samples run out.
    ///
    /// # Errors
    /// If screening fails or the sink rejects a property
    pub fn run<'s, I, R, S>(&self, samples: I, rng: &mut R, sink: &mut S) -> Result<FilterStats>
    where
        I: IntoIterator<Item = (usize, ArrayView3<'s, NNVFloat>, usize)>,
        R: Rng + ?Sized,
        S: PropertySink + ?Sized,
    {
        let mut stats = FilterStats::default();
        for (sample, image, label) in samples {
            if stats.robust >= self.num_images {
                break;
            }
            stats.examined += 1;
            info!("sample {} (label {})", sample, label);
            match self.screen(&image, label, rng)? {
                FilterDecision::Misclassified { predicted } => {
                    debug!("sample {} misclassified as {}", sample, predicted);
                }
                FilterDecision::Attacked { target } => {
                    stats.correct += 1;
                    debug!("sample {} attacked toward {}", sample, target);
                }
                FilterDecision::Accepted { bounds, runner_up } => {
                    stats.correct += 1;
                    sink.emit(stats.robust, sample, &bounds, label, runner_up)?;
                    stats.robust += 1;
                }
            }
        }
        Ok(stats)
    }
}
