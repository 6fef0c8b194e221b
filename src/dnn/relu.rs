use crate::dnn::layer::Layer;
use crate::NNVFloat;
use ndarray::Array1;
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReLU {
    ndims: usize,
}

impl ReLU {
    pub const fn new(ndims: usize) -> Self {
        Self { ndims }
    }
}

impl Display for ReLU {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "ReLU")
    }
}

#[typetag::serde]
impl Layer for ReLU {
    fn input_dims(&self) -> usize {
        self.ndims
    }

    fn output_dims(&self) -> usize {
        self.ndims
    }

    fn forward1(&self, input: &Array1<NNVFloat>) -> Array1<NNVFloat> {
        input.mapv(|x| if x.lt(&0.) { 0. } else { x })
    }

    /// The subgradient at zero is taken to be zero.
    fn backward1(
        &self,
        input: &Array1<NNVFloat>,
        grad_output: &Array1<NNVFloat>,
    ) -> Array1<NNVFloat> {
        Zip::from(input)
            .and(grad_output)
            .map_collect(|&x, &g| if x > 0. { g } else { 0. })
    }
}
