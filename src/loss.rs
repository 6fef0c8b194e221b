//! Cross-entropy objectives driving the attack
use crate::NNVFloat;
use ndarray::{Array1, ArrayView1};

/// What the attack ascends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Objective {
    /// `-CE(logits, target)`: pull the prediction toward `target`.
    TowardTarget(usize),
    /// `CE(logits, label)`: push the prediction away from `label`.
    AwayFromLabel(usize),
}

impl Objective {
    pub const fn label(&self) -> usize {
        match self {
            Self::TowardTarget(label) | Self::AwayFromLabel(label) => *label,
        }
    }

    pub fn value(&self, logits: &ArrayView1<NNVFloat>) -> NNVFloat {
        let ce = cross_entropy(logits, self.label());
        match self {
            Self::TowardTarget(_) => -ce,
            Self::AwayFromLabel(_) => ce,
        }
    }

    /// Objective value and its gradient with respect to the logits.
    pub fn value_and_grad(&self, logits: &ArrayView1<NNVFloat>) -> (NNVFloat, Array1<NNVFloat>) {
        let log_probs = log_softmax(logits);
        let label = self.label();
        let ce = -log_probs[label];
        // d CE / d logits = softmax - onehot(label)
        let mut grad = log_probs.mapv(NNVFloat::exp);
        grad[label] -= 1.;
        match self {
            Self::TowardTarget(_) => (-ce, -grad),
            Self::AwayFromLabel(_) => (ce, grad),
        }
    }
}

/// Numerically stable log-softmax.
pub fn log_softmax(logits: &ArrayView1<NNVFloat>) -> Array1<NNVFloat> {
    let max = logits.fold(NNVFloat::NEG_INFINITY, |m, &x| m.max(x));
    let log_sum = logits.mapv(|x| (x - max).exp()).sum().ln() + max;
    logits.mapv(|x| x - log_sum)
}

/// Cross-entropy of the softmax distribution against `label`.
///
/// # Panics
/// If `label` is not a valid index into `logits`
pub fn cross_entropy(logits: &ArrayView1<NNVFloat>, label: usize) -> NNVFloat {
    -log_softmax(logits)[label]
}
