use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

/// Fixed tensor shape, outermost axis first (C×H×W for images).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TensorShape {
	dims: Vec<usize>,
}

impl TensorShape {
	pub fn new(dims: Vec<usize>) -> Self {
		Self { dims }
	}

	pub fn rank(&self) -> usize {
		self.dims.len()
	}

	/// Number of scalars in a tensor of this shape.
	pub fn dims(&self) -> usize {
		self.dims.iter().product()
	}

	pub fn is_compatible_with(&self, other: &[usize]) -> bool {
		self.dims == other
	}
}

impl Index<usize> for TensorShape {
	type Output = usize;

	fn index(&self, idx: usize) -> &usize {
		&self.dims[idx]
	}
}

impl fmt::Display for TensorShape {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let dims: Vec<String> = self.dims.iter().map(ToString::to_string).collect();
		write!(f, "({})", dims.join("x"))
	}
}
