#![allow(clippy::module_name_repetitions)]
//! Multi-restart projected gradient (PGD) attack under an L∞ budget.
//!
//! Each restart starts from a uniform sample of the feasible perturbations,
//! takes `num_steps` signed gradient steps on the cross-entropy objective and
//! projects back onto the epsilon ball and the pixel box after every step.
//! The restart with the highest final objective supplies the perturbation
//! that decides the outcome.
use crate::bounds::Bounds3;
use crate::classifier::{Classifier, NormalizedModel};
use crate::error::{PropGenError, Result};
use crate::loss::Objective;
use crate::NNVFloat;
use log::{debug, trace};
use ndarray::{Array3, ArrayView3, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Slack allowed on the budget check for floating point round-off.
const BUDGET_TOLERANCE: NNVFloat = 1e-12;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PgdConfig {
    /// Size of one signed gradient step, in raw pixel units.
    pub step_size: NNVFloat,
    pub num_steps: usize,
    pub num_restarts: usize,
    /// Smallest valid raw pixel value.
    pub lower_limit: NNVFloat,
    /// Largest valid raw pixel value.
    pub upper_limit: NNVFloat,
}

impl Default for PgdConfig {
    fn default() -> Self {
        Self {
            step_size: 0.5 / 255.,
            num_steps: 50,
            num_restarts: 5,
            lower_limit: 0.,
            upper_limit: 1.,
        }
    }
}

impl PgdConfig {
    /// # Errors
    /// If the step size is negative or not finite, or the pixel limits are
    /// unordered or not finite
    pub fn validate(&self) -> Result<()> {
        if !(self.step_size >= 0. && self.step_size.is_finite()) {
            return Err(PropGenError::InvalidConfig(format!(
                "step size must be non-negative and finite, got {}",
                self.step_size
            )));
        }
        if !(self.lower_limit.is_finite()
            && self.upper_limit.is_finite()
            && self.lower_limit <= self.upper_limit)
        {
            return Err(PropGenError::InvalidConfig(format!(
                "pixel limits [{}, {}] are not a finite ordered range",
                self.lower_limit, self.upper_limit
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct AttackResult {
    pub success: bool,
    /// Perturbation of the best restart, zero when no restart ran.
    pub delta: Array3<NNVFloat>,
    /// Final objective of the best restart, `-inf` when no restart ran.
    pub best_loss: NNVFloat,
    /// Class predicted at the perturbed image.
    pub predicted: usize,
    pub best_restart: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedAttack {
    epsilon: NNVFloat,
    config: PgdConfig,
}

impl ProjectedAttack {
    /// # Errors
    /// If `epsilon` is negative, NaN or infinite, or `config` is invalid
    pub fn new(epsilon: NNVFloat, config: PgdConfig) -> Result<Self> {
        if !(epsilon >= 0. && epsilon.is_finite()) {
            return Err(PropGenError::InvalidConfig(format!(
                "epsilon must be non-negative and finite, got {}",
                epsilon
            )));
        }
        config.validate()?;
        Ok(Self { epsilon, config })
    }

    pub const fn epsilon(&self) -> NNVFloat {
        self.epsilon
    }

    pub const fn config(&self) -> &PgdConfig {
        &self.config
    }

    /// The pixel box `[lower_limit, upper_limit]` over the image's shape.
    ///
    /// # Errors
    pub fn pixel_box(&self, image: &ArrayView3<NNVFloat>) -> Result<Bounds3> {
        let lower = Array3::from_elem(image.raw_dim(), self.config.lower_limit);
        let upper = Array3::from_elem(image.raw_dim(), self.config.upper_limit);
        Ok(Bounds3::new(lower.view(), upper.view())?)
    }

    /// The `[-epsilon, epsilon]` ball over the image's shape, in delta space.
    ///
    /// # Errors
    pub fn epsilon_ball(&self, image: &ArrayView3<NNVFloat>) -> Result<Bounds3> {
        let lower = Array3::from_elem(image.raw_dim(), -self.epsilon);
        let upper = Array3::from_elem(image.raw_dim(), self.epsilon);
        Ok(Bounds3::new(lower.view(), upper.view())?)
    }

    /// Perturbations keeping `image + delta` inside the pixel box, in delta space.
    ///
    /// # Errors
    pub fn feasible_box(&self, image: &ArrayView3<NNVFloat>) -> Result<Bounds3> {
        let lower = image.mapv(|x| self.config.lower_limit - x);
        let upper = image.mapv(|x| self.config.upper_limit - x);
        Ok(Bounds3::new(lower.view(), upper.view())?)
    }

    /// Region the starting perturbation of every restart is drawn from: the
    /// epsilon ball intersected with the feasible box.
    ///
    /// # Errors
    pub fn feasible_start(&self, image: &ArrayView3<NNVFloat>) -> Result<Bounds3> {
        Ok(self.epsilon_ball(image)?.intersection(&self.feasible_box(image)?))
    }

    /// # Errors
    /// If any pixel, NaN included, lies outside the pixel box
    pub fn check_image(&self, image: &ArrayView3<NNVFloat>) -> Result<()> {
        let (lower, upper) = (self.config.lower_limit, self.config.upper_limit);
        match image
            .iter()
            .enumerate()
            .find(|(_, &value)| !(lower <= value && value <= upper))
        {
            Some((index, &value)) => Err(PropGenError::ImageOutOfRange {
                index,
                value,
                lower,
                upper,
            }),
            None => Ok(()),
        }
    }

    /// Searches the epsilon ball around `image` for a perturbation that makes
    /// the model predict `target`, or anything but `true_label` when no
    /// target is given.
    ///
    /// # Errors
    /// If a label is out of range, `target` equals `true_label`, the image
    /// lies outside the pixel box, or the shapes of image, normalization and
    /// model disagree
    ///
    /// # Panics
    /// If a restart ends with a perturbation outside the epsilon ball, which
    /// includes perturbations poisoned by NaN gradients
    pub fn attack<C, R>(
        &self,
        model: &NormalizedModel<C>,
        image: &ArrayView3<NNVFloat>,
        true_label: usize,
        target: Option<usize>,
        rng: &mut R,
    ) -> Result<AttackResult>
    where
        C: Classifier + ?Sized,
        R: Rng + ?Sized,
    {
        model.check_label(true_label)?;
        if let Some(target) = target {
            model.check_label(target)?;
            if target == true_label {
                return Err(PropGenError::TargetIsTrueLabel(target));
            }
        }
        self.check_image(image)?;

        let objective = target.map_or(
            Objective::AwayFromLabel(true_label),
            Objective::TowardTarget,
        );
        let start = self.feasible_start(image)?;
        let ball = self.epsilon_ball(image)?;
        let feasible = self.feasible_box(image)?;

        let mut best: Option<(usize, NNVFloat, Array3<NNVFloat>)> = None;
        for restart in 0..self.config.num_restarts {
            let mut delta = start.sample_uniform(rng);
            for _ in 0..self.config.num_steps {
                let adversarial = image + &delta;
                let (_, grad) = model.objective_and_grad(&adversarial.view(), &objective)?;
                let step = self.config.step_size;
                Zip::from(&mut delta)
                    .and(&sign(&grad.view()))
                    .for_each(|d, &s| *d += step * s);
                ball.clip(delta.view_mut());
                feasible.clip(delta.view_mut());
            }
            assert_within_budget(&delta.view(), self.epsilon, restart);

            let loss = model.objective(&(image + &delta).view(), &objective)?;
            trace!("restart {}: final loss {}", restart, loss);
            let improves = best
                .as_ref()
                .map_or(!loss.is_nan(), |(_, best_loss, _)| loss > *best_loss);
            if improves {
                best = Some((restart, loss, delta));
            }
        }

        let (best_restart, best_loss, delta) = match best {
            Some((restart, loss, delta)) => (Some(restart), loss, delta),
            None => (None, NNVFloat::NEG_INFINITY, Array3::zeros(image.raw_dim())),
        };
        let mut adversarial = image + &delta;
        self.pixel_box(image)?.clip(adversarial.view_mut());
        let predicted = model.predict(&adversarial.view())?;
        let success = match target {
            Some(target) => predicted == target,
            None => predicted != true_label,
        };
        debug!(
            "attack on label {} toward {:?} at epsilon {}: predicted {}, best loss {}, success {}",
            true_label, target, self.epsilon, predicted, best_loss, success
        );
        Ok(AttackResult {
            success,
            delta,
            best_loss,
            predicted,
            best_restart,
        })
    }
}

/// Elementwise sign with `sign(0) = 0`. NaN stays NaN.
pub fn sign(grad: &ArrayView3<NNVFloat>) -> Array3<NNVFloat> {
    grad.mapv(|g| {
        if g > 0. {
            1.
        } else if g < 0. {
            -1.
        } else {
            g * 0.
        }
    })
}

/// # Panics
/// If any entry of `delta` exceeds `epsilon` in magnitude or is NaN
pub fn assert_within_budget(delta: &ArrayView3<NNVFloat>, epsilon: NNVFloat, restart: usize) {
    let max_abs = delta.fold(0., |max: NNVFloat, &d| {
        if d.is_nan() || max.is_nan() {
            NNVFloat::NAN
        } else {
            max.max(d.abs())
        }
    });
    assert!(
        max_abs <= epsilon + BUDGET_TOLERANCE,
        "restart {}: perturbation magnitude {} exceeds epsilon {}",
        restart,
        max_abs,
        epsilon
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dnn::{Dense, DNN};
    use crate::normalize::Normalization;
    use crate::test_util::*;
    use ndarray::{arr1, arr2, Array1};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;
    use std::cell::Cell;

    fn two_pixel_model() -> DNN {
        DNN::new(vec![Box::new(Dense::from_parts(
            arr2(&[[1., -1.], [-1., 1.]]),
            arr1(&[0., 0.]),
        ))])
    }

    fn two_pixel_image() -> Array3<NNVFloat> {
        Array3::from_shape_vec((1, 1, 2), vec![0.6, 0.4]).unwrap()
    }

    fn fast_config() -> PgdConfig {
        PgdConfig {
            step_size: 0.05,
            num_steps: 20,
            num_restarts: 3,
            ..PgdConfig::default()
        }
    }

    #[derive(Debug)]
    struct NanModel;

    impl Classifier for NanModel {
        fn input_dims(&self) -> usize {
            2
        }

        fn num_classes(&self) -> usize {
            2
        }

        fn logits(&self, _input: &Array1<NNVFloat>) -> Array1<NNVFloat> {
            Array1::from_elem(2, NNVFloat::NAN)
        }

        fn pullback(&self, input: &Array1<NNVFloat>, _cotangent: &Array1<NNVFloat>) -> Array1<NNVFloat> {
            Array1::from_elem(input.len(), NNVFloat::NAN)
        }
    }

    /// Two-pixel model whose logits are NaN on the listed calls.
    struct NanOnCalls {
        inner: DNN,
        nan_calls: Vec<usize>,
        calls: Cell<usize>,
    }

    impl Classifier for NanOnCalls {
        fn input_dims(&self) -> usize {
            2
        }

        fn num_classes(&self) -> usize {
            2
        }

        fn logits(&self, input: &Array1<NNVFloat>) -> Array1<NNVFloat> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            if self.nan_calls.contains(&call) {
                Array1::from_elem(2, NNVFloat::NAN)
            } else {
                self.inner.forward1(input)
            }
        }

        fn pullback(&self, input: &Array1<NNVFloat>, cotangent: &Array1<NNVFloat>) -> Array1<NNVFloat> {
            self.inner.backward1(input, cotangent)
        }
    }

    /// Starting perturbations the attack draws from `seed` when it takes no steps.
    fn sampled_starts(attack: &ProjectedAttack, image: &Array3<NNVFloat>, seed: u64) -> Vec<Array3<NNVFloat>> {
        let start = attack.feasible_start(&image.view()).unwrap();
        let mut rng = Pcg64::seed_from_u64(seed);
        (0..attack.config().num_restarts)
            .map(|_| start.sample_uniform(&mut rng))
            .collect()
    }

    /// First index of the strictly largest non-NaN loss.
    fn first_argmax(losses: &[NNVFloat]) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, &loss) in losses.iter().enumerate() {
            if loss.is_nan() {
                continue;
            }
            if best.map_or(true, |b| loss > losses[b]) {
                best = Some(idx);
            }
        }
        best
    }

    #[test]
    fn test_best_restart_has_highest_loss() {
        let dnn = two_pixel_model();
        let norm = Normalization::identity(1);
        let model = NormalizedModel::new(&dnn, &norm);
        let image = two_pixel_image();
        let config = PgdConfig {
            num_steps: 0,
            num_restarts: 6,
            ..PgdConfig::default()
        };
        let attack = ProjectedAttack::new(0.1, config).unwrap();
        let objective = Objective::TowardTarget(1);
        let starts = sampled_starts(&attack, &image, 4);
        let losses: Vec<NNVFloat> = starts
            .iter()
            .map(|delta| model.objective(&(&image + delta).view(), &objective).unwrap())
            .collect();
        let expected = first_argmax(&losses).unwrap();

        let result = attack
            .attack(&model, &image.view(), 0, Some(1), &mut Pcg64::seed_from_u64(4))
            .unwrap();
        assert_eq!(result.best_restart, Some(expected));
        assert_eq!(result.best_loss, losses[expected]);
        assert_eq!(result.delta, starts[expected]);
        assert!(losses.iter().all(|&loss| loss <= result.best_loss));
    }

    #[test]
    fn test_tied_losses_keep_first_restart() {
        // constant logits: every restart ends with the same loss
        let dnn = DNN::new(vec![Box::new(Dense::from_parts(
            arr2(&[[0., 0.], [0., 0.]]),
            arr1(&[0.3, 0.1]),
        ))]);
        let norm = Normalization::identity(1);
        let model = NormalizedModel::new(&dnn, &norm);
        let image = two_pixel_image();
        let config = PgdConfig {
            num_steps: 0,
            num_restarts: 4,
            ..PgdConfig::default()
        };
        let attack = ProjectedAttack::new(0.1, config).unwrap();
        let starts = sampled_starts(&attack, &image, 11);
        let result = attack
            .attack(&model, &image.view(), 0, Some(1), &mut Pcg64::seed_from_u64(11))
            .unwrap();
        assert_eq!(result.best_restart, Some(0));
        assert_eq!(result.delta, starts[0]);
        assert!(!result.success);
    }

    #[test]
    fn test_nan_loss_never_wins() {
        let norm = Normalization::identity(1);
        let image = two_pixel_image();
        let config = PgdConfig {
            num_steps: 0,
            num_restarts: 5,
            ..PgdConfig::default()
        };
        let attack = ProjectedAttack::new(0.1, config).unwrap();
        let starts = sampled_starts(&attack, &image, 7);

        let reference = two_pixel_model();
        let reference_model = NormalizedModel::new(&reference, &norm);
        let objective = Objective::TowardTarget(1);
        let nan_calls = vec![0, 3];
        let losses: Vec<NNVFloat> = starts
            .iter()
            .enumerate()
            .map(|(idx, delta)| {
                if nan_calls.contains(&idx) {
                    NNVFloat::NAN
                } else {
                    reference_model
                        .objective(&(&image + delta).view(), &objective)
                        .unwrap()
                }
            })
            .collect();
        let expected = first_argmax(&losses).unwrap();

        // one logits call per restart when no steps are taken
        let flaky = NanOnCalls {
            inner: two_pixel_model(),
            nan_calls,
            calls: Cell::new(0),
        };
        let model = NormalizedModel::new(&flaky, &norm);
        let result = attack
            .attack(&model, &image.view(), 0, Some(1), &mut Pcg64::seed_from_u64(7))
            .unwrap();
        assert_ne!(result.best_restart, Some(0));
        assert_ne!(result.best_restart, Some(3));
        assert_eq!(result.best_restart, Some(expected));
        assert_eq!(result.best_loss, losses[expected]);
        assert!(!result.best_loss.is_nan());
    }

    #[test]
    fn test_large_budget_flips_prediction() {
        let dnn = two_pixel_model();
        let norm = Normalization::identity(1);
        let model = NormalizedModel::new(&dnn, &norm);
        let image = two_pixel_image();
        let mut rng = Pcg64::seed_from_u64(0);

        let attack = ProjectedAttack::new(0.25, fast_config()).unwrap();
        let result = attack.attack(&model, &image.view(), 0, Some(1), &mut rng).unwrap();
        assert!(result.success);
        assert_eq!(result.predicted, 1);
        assert!(result.best_restart.is_some());

        let untargeted = attack.attack(&model, &image.view(), 0, None, &mut rng).unwrap();
        assert!(untargeted.success);
    }

    #[test]
    fn test_small_budget_fails() {
        let dnn = two_pixel_model();
        let norm = Normalization::identity(1);
        let model = NormalizedModel::new(&dnn, &norm);
        let image = two_pixel_image();
        let mut rng = Pcg64::seed_from_u64(1);
        let attack = ProjectedAttack::new(0.05, fast_config()).unwrap();
        let result = attack.attack(&model, &image.view(), 0, Some(1), &mut rng).unwrap();
        assert!(!result.success);
        assert_eq!(result.predicted, 0);
        assert!(result.delta.iter().all(|d| d.abs() <= 0.05 + 1e-12));
    }

    #[test]
    fn test_zero_budget_leaves_image_untouched() {
        let dnn = two_pixel_model();
        let norm = Normalization::identity(1);
        let model = NormalizedModel::new(&dnn, &norm);
        let image = two_pixel_image();
        let mut rng = Pcg64::seed_from_u64(2);
        let attack = ProjectedAttack::new(0., fast_config()).unwrap();
        let result = attack.attack(&model, &image.view(), 0, Some(1), &mut rng).unwrap();
        assert!(!result.success);
        assert!(result.delta.iter().all(|&d| d == 0.));
    }

    #[test]
    fn test_no_steps_returns_sampled_start() {
        let dnn = two_pixel_model();
        let norm = Normalization::identity(1);
        let model = NormalizedModel::new(&dnn, &norm);
        let image = two_pixel_image();
        let config = PgdConfig {
            num_steps: 0,
            num_restarts: 1,
            ..PgdConfig::default()
        };
        let attack = ProjectedAttack::new(0.1, config).unwrap();
        let result = attack
            .attack(&model, &image.view(), 0, Some(1), &mut Pcg64::seed_from_u64(9))
            .unwrap();
        let expected = attack
            .feasible_start(&image.view())
            .unwrap()
            .sample_uniform(&mut Pcg64::seed_from_u64(9));
        assert_eq!(result.delta, expected);
        assert_eq!(result.best_restart, Some(0));
    }

    #[test]
    fn test_no_restarts_falls_back_to_clean_image() {
        let dnn = two_pixel_model();
        let norm = Normalization::identity(1);
        let model = NormalizedModel::new(&dnn, &norm);
        let config = PgdConfig {
            num_restarts: 0,
            ..PgdConfig::default()
        };
        let attack = ProjectedAttack::new(0.1, config).unwrap();
        let result = attack
            .attack(&model, &two_pixel_image().view(), 0, Some(1), &mut Pcg64::seed_from_u64(0))
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.best_restart, None);
        assert_eq!(result.best_loss, NNVFloat::NEG_INFINITY);
    }

    #[test]
    fn test_rejects_invalid_requests() {
        let dnn = two_pixel_model();
        let norm = Normalization::identity(1);
        let model = NormalizedModel::new(&dnn, &norm);
        let image = two_pixel_image();
        let mut rng = Pcg64::seed_from_u64(0);
        let attack = ProjectedAttack::new(0.1, PgdConfig::default()).unwrap();
        assert!(matches!(
            attack.attack(&model, &image.view(), 1, Some(1), &mut rng),
            Err(PropGenError::TargetIsTrueLabel(1))
        ));
        assert!(matches!(
            attack.attack(&model, &image.view(), 0, Some(5), &mut rng),
            Err(PropGenError::LabelOutOfRange { label: 5, .. })
        ));
        let bright = Array3::from_shape_vec((1, 1, 2), vec![0.5, 1.5]).unwrap();
        assert!(matches!(
            attack.attack(&model, &bright.view(), 0, Some(1), &mut rng),
            Err(PropGenError::ImageOutOfRange { index: 1, .. })
        ));
        assert!(ProjectedAttack::new(-0.1, PgdConfig::default()).is_err());
        assert!(ProjectedAttack::new(NNVFloat::NAN, PgdConfig::default()).is_err());
        let unordered = PgdConfig {
            lower_limit: 1.,
            upper_limit: 0.,
            ..PgdConfig::default()
        };
        assert!(ProjectedAttack::new(0.1, unordered).is_err());
    }

    #[test]
    fn test_sign_of_zero_is_zero() {
        let grad = Array3::from_shape_vec((1, 1, 4), vec![-2., 0., 3., NNVFloat::NAN]).unwrap();
        let signs = sign(&grad.view());
        assert_eq!(signs[[0, 0, 0]], -1.);
        assert_eq!(signs[[0, 0, 1]], 0.);
        assert_eq!(signs[[0, 0, 2]], 1.);
        assert!(signs[[0, 0, 3]].is_nan());
    }

    #[test]
    #[should_panic(expected = "exceeds epsilon")]
    fn test_budget_violation_panics() {
        let delta = Array3::from_shape_vec((1, 1, 2), vec![0.1, -0.3]).unwrap();
        assert_within_budget(&delta.view(), 0.2, 0);
    }

    #[test]
    #[should_panic(expected = "exceeds epsilon")]
    fn test_nan_gradients_trip_budget_check() {
        let norm = Normalization::identity(1);
        let model = NormalizedModel::new(&NanModel, &norm);
        let attack = ProjectedAttack::new(0.1, PgdConfig::default()).unwrap();
        let _ = attack.attack(
            &model,
            &two_pixel_image().view(),
            0,
            Some(1),
            &mut Pcg64::seed_from_u64(0),
        );
    }

    proptest! {
        #[test]
        fn test_start_inside_ball_and_box(
            image in unit_image(2, 3, 3),
            epsilon in 0.0..0.5f64,
            seed in any::<u64>(),
        ) {
            let attack = ProjectedAttack::new(epsilon, PgdConfig::default()).unwrap();
            let delta = attack
                .feasible_start(&image.view())
                .unwrap()
                .sample_uniform(&mut Pcg64::seed_from_u64(seed));
            for (&d, &x) in delta.iter().zip(image.iter()) {
                prop_assert!(d.abs() <= epsilon + 1e-12);
                prop_assert!(x + d >= -1e-12 && x + d <= 1. + 1e-12);
            }
        }

        #[test]
        fn test_every_result_within_budget(
            (dnn, image) in fc_model_and_image(2, 4, 3),
            epsilon in 0.0..0.1f64,
            seed in any::<u64>(),
        ) {
            let norm = Normalization::identity(2);
            let model = NormalizedModel::new(&dnn, &norm);
            let config = PgdConfig { step_size: 0.02, num_steps: 5, num_restarts: 2, ..PgdConfig::default() };
            let attack = ProjectedAttack::new(epsilon, config).unwrap();
            let result = attack
                .attack(&model, &image.view(), 0, Some(1), &mut Pcg64::seed_from_u64(seed))
                .unwrap();
            prop_assert!(result.delta.iter().all(|d| d.abs() <= epsilon + 1e-12));
        }
    }
}
