#![allow(clippy::must_use_candidate)]
extern crate ndarray;
extern crate ndarray_stats;
extern crate rand;

pub mod affine;
pub mod attack;
pub mod bounds;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod dnn;
pub mod error;
pub mod filter;
pub mod generate;
pub mod input_bounds;
pub mod instances;
pub mod loss;
pub mod normalize;
pub mod tensorshape;
mod test_util;
pub mod vnnlib;

pub type NNVFloat = f64;

pub use attack::{AttackResult, PgdConfig, ProjectedAttack};
pub use bounds::{Bounds, Bounds1, Bounds3};
pub use classifier::{Classifier, NormalizedModel};
pub use config::GenerationConfig;
pub use error::{PropGenError, Result};
pub use filter::{FilterDecision, FilterLoop, FilterStats, PropertySink};
pub use generate::generate_properties;
pub use input_bounds::derive_input_bounds;
pub use normalize::Normalization;
