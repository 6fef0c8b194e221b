//! The model capability consumed by the attack and the filter loop
use crate::error::{PropGenError, Result};
use crate::loss::Objective;
use crate::normalize::Normalization;
use crate::NNVFloat;
use ndarray::{Array1, Array3, ArrayView3};
use ndarray_stats::QuantileExt;

/// A differentiable function from a normalized, flattened input to class scores.
pub trait Classifier {
    fn input_dims(&self) -> usize;
    fn num_classes(&self) -> usize;

    fn logits(&self, input: &Array1<NNVFloat>) -> Array1<NNVFloat>;

    /// Gradient of `<cotangent, logits(input)>` with respect to `input`.
    fn pullback(&self, input: &Array1<NNVFloat>, cotangent: &Array1<NNVFloat>) -> Array1<NNVFloat>;

    /// Objective value at `input` and its gradient with respect to `input`.
    fn objective_and_grad(
        &self,
        input: &Array1<NNVFloat>,
        objective: &Objective,
    ) -> (NNVFloat, Array1<NNVFloat>) {
        let logits = self.logits(input);
        let (value, cotangent) = objective.value_and_grad(&logits.view());
        (value, self.pullback(input, &cotangent))
    }
}

/// A classifier together with the normalization in front of it, evaluated on
/// raw C×H×W images.
pub struct NormalizedModel<'a, C: Classifier + ?Sized> {
    model: &'a C,
    normalization: &'a Normalization,
}

impl<'a, C: Classifier + ?Sized> Clone for NormalizedModel<'a, C> {
    fn clone(&self) -> Self {
        Self {
            model: self.model,
            normalization: self.normalization,
        }
    }
}

impl<'a, C: Classifier + ?Sized> NormalizedModel<'a, C> {
    pub const fn new(model: &'a C, normalization: &'a Normalization) -> Self {
        Self {
            model,
            normalization,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    pub const fn normalization(&self) -> &Normalization {
        self.normalization
    }

    pub const fn model(&self) -> &C {
        self.model
    }

    /// # Errors
    /// If `label` is not a class of the model
    pub fn check_label(&self, label: usize) -> Result<()> {
        if label < self.num_classes() {
            Ok(())
        } else {
            Err(PropGenError::LabelOutOfRange {
                label,
                num_classes: self.num_classes(),
            })
        }
    }

    fn model_input(&self, image: &ArrayView3<NNVFloat>) -> Result<Array1<NNVFloat>> {
        if image.len() != self.model.input_dims() {
            return Err(PropGenError::ShapeMismatch {
                context: "model input".to_string(),
                expected: self.model.input_dims(),
                found: image.len(),
            });
        }
        let normalized = self.normalization.apply(image)?;
        Ok(normalized.iter().copied().collect())
    }

    /// # Errors
    pub fn scores(&self, image: &ArrayView3<NNVFloat>) -> Result<Array1<NNVFloat>> {
        Ok(self.model.logits(&self.model_input(image)?))
    }

    /// Index of the highest score, the first one on ties.
    ///
    /// # Errors
    /// If the scores are empty or contain NaN
    pub fn predict(&self, image: &ArrayView3<NNVFloat>) -> Result<usize> {
        Ok(self.scores(image)?.argmax()?)
    }

    /// # Errors
    pub fn objective(&self, image: &ArrayView3<NNVFloat>, objective: &Objective) -> Result<NNVFloat> {
        Ok(objective.value(&self.scores(image)?.view()))
    }

    /// Objective value and its gradient with respect to the raw image.
    ///
    /// # Errors
    pub fn objective_and_grad(
        &self,
        image: &ArrayView3<NNVFloat>,
        objective: &Objective,
    ) -> Result<(NNVFloat, Array3<NNVFloat>)> {
        let (value, grad) = self
            .model
            .objective_and_grad(&self.model_input(image)?, objective);
        let grad = Array3::from_shape_vec(image.raw_dim(), grad.to_vec())?;
        Ok((value, self.normalization.pullback(&grad.view())?))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dnn::{Dense, DNN};
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Array3};

    fn two_pixel_model() -> DNN {
        DNN::new(vec![Box::new(Dense::from_parts(
            arr2(&[[1., -1.], [-1., 1.]]),
            arr1(&[0., 0.]),
        ))])
    }

    #[test]
    fn test_predict_and_scores() {
        let dnn = two_pixel_model();
        let norm = Normalization::identity(1);
        let model = NormalizedModel::new(&dnn, &norm);
        let image = Array3::from_shape_vec((1, 1, 2), vec![0.6, 0.4]).unwrap();
        let scores = model.scores(&image.view()).unwrap();
        assert_abs_diff_eq!(scores[0], 0.2, epsilon = 1e-12);
        assert_eq!(model.predict(&image.view()).unwrap(), 0);
        assert!(model.check_label(1).is_ok());
        assert!(model.check_label(2).is_err());
    }

    #[test]
    fn test_gradient_chains_through_normalization() {
        let dnn = two_pixel_model();
        let norm = Normalization::new(vec![0.5], vec![0.5]).unwrap();
        let model = NormalizedModel::new(&dnn, &norm);
        let image = Array3::from_shape_vec((1, 1, 2), vec![0.3, 0.8]).unwrap();
        let objective = Objective::TowardTarget(0);
        let (value, grad) = model.objective_and_grad(&image.view(), &objective).unwrap();
        assert_abs_diff_eq!(
            value,
            model.objective(&image.view(), &objective).unwrap(),
            epsilon = 1e-12
        );
        let h = 1e-6;
        for i in 0..2 {
            let mut bumped = image.clone();
            bumped[[0, 0, i]] += h;
            let numeric = (model.objective(&bumped.view(), &objective).unwrap() - value) / h;
            assert_abs_diff_eq!(numeric, grad[[0, 0, i]], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_rejects_wrong_image_size() {
        let dnn = two_pixel_model();
        let norm = Normalization::identity(1);
        let model = NormalizedModel::new(&dnn, &norm);
        let image = Array3::<NNVFloat>::zeros((1, 2, 2));
        assert!(matches!(
            model.predict(&image.view()),
            Err(PropGenError::ShapeMismatch { expected: 2, found: 4, .. })
        ));
    }
}
