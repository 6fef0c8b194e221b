use crate::error::Result;
use crate::NNVFloat;
use dyn_clone::DynClone;
use ndarray::Array1;
use std::fmt::{Debug, Display};

/// A differentiable layer acting on flattened representations.
#[typetag::serde(tag = "type")]
pub trait Layer: DynClone + Display + Debug + Send + Sync {
    fn input_dims(&self) -> usize;
    fn output_dims(&self) -> usize;

    fn forward1(&self, input: &Array1<NNVFloat>) -> Array1<NNVFloat>;

    /// Vector-Jacobian product: pulls `grad_output` back through the layer
    /// linearized at `input`.
    fn backward1(&self, input: &Array1<NNVFloat>, grad_output: &Array1<NNVFloat>)
        -> Array1<NNVFloat>;

    /// Internal consistency of the layer's parameters, for layers read from disk.
    ///
    /// # Errors
    fn check(&self) -> Result<()> {
        Ok(())
    }
}

dyn_clone::clone_trait_object!(Layer);
