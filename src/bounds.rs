#![allow(clippy::module_name_repetitions)]
use crate::NNVFloat;
use ndarray::iter::{Lanes, LanesMut};
use ndarray::{stack, Array, Array2, ArrayView, ArrayViewMut, Axis, Dimension, Ix2, Ix4};
use ndarray::{RemoveAxis, ShapeError, Zip};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Bounds over a flat feature vector, e.g. a property's input box.
pub type Bounds1 = Bounds<Ix2>;
/// Bounds over a C×H×W image tensor.
pub type Bounds3 = Bounds<Ix4>;

/// Elementwise box: lower bounds stacked over upper bounds along axis 0.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Bounds<D: Dimension> {
    data: Array<NNVFloat, D>,
}

impl<D: Dimension + RemoveAxis> Bounds<D> {
    /// # Errors
    /// If `lower` and `upper` differ in shape
    pub fn new<'a, S: Dimension<Larger = D>>(
        lower: ArrayView<'a, NNVFloat, S>,
        upper: ArrayView<'a, NNVFloat, S>,
    ) -> Result<Self, ShapeError> {
        let data: Array<NNVFloat, D> = stack(Axis(0), &[lower, upper])?;
        Ok(Self { data })
    }

    pub fn lower(&self) -> ArrayView<NNVFloat, D::Smaller> {
        self.data.index_axis(Axis(0), 0)
    }

    pub fn upper(&self) -> ArrayView<NNVFloat, D::Smaller> {
        self.data.index_axis(Axis(0), 1)
    }

    /// Number of bounded scalars.
    pub fn ndim(&self) -> usize {
        self.data.shape().iter().skip(1).product()
    }

    pub fn bounds_iter(&self) -> Lanes<NNVFloat, D::Smaller> {
        self.data.lanes(Axis(0))
    }

    pub fn bounds_iter_mut(&mut self) -> LanesMut<NNVFloat, D::Smaller> {
        self.data.lanes_mut(Axis(0))
    }

    pub fn is_ordered(&self) -> bool {
        Zip::from(self.lower())
            .and(self.upper())
            .all(|&lb, &ub| lb <= ub)
    }

    /// True when every box collapses to a single point.
    pub fn is_degenerate(&self) -> bool {
        Zip::from(self.lower())
            .and(self.upper())
            .all(|&lb, &ub| lb == ub)
    }

    pub fn is_member(&self, x: &ArrayView<NNVFloat, D::Smaller>) -> bool {
        let eps = 1e-12;
        Zip::from(x)
            .and(self.bounds_iter())
            .all(|&x, bounds| bounds[0] - eps <= x && x <= bounds[1] + eps)
    }

    /// Elementwise intersection of two boxes over the same shape.
    ///
    /// # Panics
    /// If the shapes differ
    pub fn intersection(&self, other: &Self) -> Self {
        let mut out = self.clone();
        Zip::from(out.bounds_iter_mut())
            .and(other.bounds_iter())
            .for_each(|mut mine, theirs| {
                mine[0] = mine[0].max(theirs[0]);
                mine[1] = mine[1].min(theirs[1]);
            });
        out
    }

    /// Projects `x` onto the box in place. NaN entries are left as NaN.
    ///
    /// # Panics
    /// If `x` does not have the bounded shape
    pub fn clip(&self, x: ArrayViewMut<NNVFloat, D::Smaller>) {
        Zip::from(x).and(self.bounds_iter()).for_each(|x, bounds| {
            if *x > bounds[1] {
                *x = bounds[1];
            } else if *x < bounds[0] {
                *x = bounds[0];
            }
        });
    }

    /// # Panics
    /// If a box is unordered or unbounded
    pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> Array<NNVFloat, D::Smaller> {
        Zip::from(self.bounds_iter())
            .map_collect(|x| Uniform::new_inclusive(x[0], x[1]).sample(rng))
    }
}

impl Bounds1 {
    /// `(lower, upper)` per feature, in feature order.
    pub fn features(&self) -> impl Iterator<Item = (NNVFloat, NNVFloat)> + '_ {
        self.lower()
            .into_iter()
            .copied()
            .zip(self.upper().into_iter().copied())
    }

    /// N×2 matrix with lower bounds in column 0 and upper bounds in column 1.
    pub fn to_columns(&self) -> Array2<NNVFloat> {
        self.data.t().to_owned()
    }
}

impl<D: Dimension + RemoveAxis> Display for Bounds<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(f, "Lower: {}\nUpper: {}", self.lower(), self.upper())
    }
}
