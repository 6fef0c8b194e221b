use crate::affine::Affine2;
use crate::dnn::layer::Layer;
use crate::error::{PropGenError, Result};
use crate::NNVFloat;
use ndarray::Array1;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Dense {
    aff: Affine2,
}

impl Dense {
    pub const fn new(aff: Affine2) -> Self {
        Self { aff }
    }

    pub fn from_parts(mul: Array2<NNVFloat>, add: Array1<NNVFloat>) -> Self {
        Self {
            aff: Affine2::new(mul, add),
        }
    }

    pub const fn affine(&self) -> &Affine2 {
        &self.aff
    }
}

#[typetag::serde]
impl Layer for Dense {
    fn input_dims(&self) -> usize {
        self.aff.input_dim()
    }

    fn output_dims(&self) -> usize {
        self.aff.output_dim()
    }

    fn forward1(&self, input: &Array1<NNVFloat>) -> Array1<NNVFloat> {
        debug_assert_eq!(input.len(), self.aff.input_dim());
        self.aff.apply(&input.view())
    }

    fn backward1(
        &self,
        _input: &Array1<NNVFloat>,
        grad_output: &Array1<NNVFloat>,
    ) -> Array1<NNVFloat> {
        self.aff.apply_transpose(&grad_output.view())
    }

    fn check(&self) -> Result<()> {
        let rows = self.aff.basis().nrows();
        if rows == self.aff.output_dim() {
            Ok(())
        } else {
            Err(PropGenError::ShapeMismatch {
                context: "dense shift".to_string(),
                expected: rows,
                found: self.aff.output_dim(),
            })
        }
    }
}

impl fmt::Display for Dense {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Dense {}", self.aff.output_dim())
    }
}
