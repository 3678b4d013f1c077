//! Pseudo-outcome computation for the splitting rule.

use crate::data::Data;

/// Maps a node's training rows to the pseudo-outcomes the splitter scores.
///
/// Regression uses the outcomes unchanged. The seam exists so that other
/// estimator families can substitute their own pseudo-outcomes without
/// touching the splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelabelingStrategy {
    /// Identity relabeling: pseudo-outcome = outcome.
    Regression,
}

impl RelabelingStrategy {
    /// Compute pseudo-outcomes for `samples`, aligned by position.
    ///
    /// Returns `None` when the node cannot be relabeled and must become a
    /// leaf. The regression strategy never skips.
    pub(crate) fn relabel(
        &self,
        samples: &[usize],
        data: &Data,
        outcome_index: usize,
    ) -> Option<Vec<f64>> {
        match self {
            RelabelingStrategy::Regression => Some(
                samples
                    .iter()
                    .map(|&row| data.get(row, outcome_index))
                    .collect(),
            ),
        }
    }
}
